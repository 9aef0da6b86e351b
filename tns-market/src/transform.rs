mod demand;
pub use demand::{include_demand_charges, remove_demand_charges};

mod losses;
pub use losses::{include_marginal_losses, remove_marginal_losses};
