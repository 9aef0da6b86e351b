mod clock;
mod source;
mod transport;

pub use clock::{Clock, SimulatedClock, SystemClock};
pub use source::{ConstantValue, CurveSource, ProfileValue, ValueSource};
pub use transport::SignalTransport;
