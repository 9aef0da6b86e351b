use tns_core::models::Vertex;
use tracing::{Level, event};

/// Charge the recipient of imported power for transport losses.
///
/// Each importing vertex (`power > 0`) delivers `power / f` at price `price · f`,
/// where `f = 1 + loss_factor · (power / max_power)²`.
pub fn include_marginal_losses(vertices: &mut [Vertex], loss_factor: f64, max_power: f64) {
    if loss_factor == 0.0 || !max_power.is_finite() || max_power <= 0.0 {
        return;
    }
    for vertex in vertices.iter_mut().filter(|v| v.power > 0.0) {
        let ratio = vertex.power / max_power;
        let factor = 1.0 + loss_factor * ratio * ratio;
        vertex.power /= factor;
        vertex.marginal_price *= factor;
    }
}

/// Undo [`include_marginal_losses`] by solving its relation for the sent power.
///
/// With `y = power' / max_power`, the sent ratio `x` is the smaller root of
/// `loss_factor · y · x² − x + y = 0`. Beyond the curve's peak deliverable
/// power no root exists; the discriminant is clamped to zero there.
pub fn remove_marginal_losses(vertices: &mut [Vertex], loss_factor: f64, max_power: f64) {
    if loss_factor == 0.0 || !max_power.is_finite() || max_power <= 0.0 {
        return;
    }
    for vertex in vertices.iter_mut().filter(|v| v.power > 0.0) {
        let y = vertex.power / max_power;
        let discriminant = 1.0 - 4.0 * loss_factor * y * y;
        let x = if discriminant < 0.0 {
            event!(
                Level::WARN,
                power = vertex.power,
                loss_factor,
                "power exceeds the deliverable maximum, clamping"
            );
            1.0 / (2.0 * loss_factor * y)
        } else {
            // the smaller root, (1 − √d) / (2·lf·y), without the cancellation
            2.0 * y / (1.0 + discriminant.sqrt())
        };
        vertex.power = x * max_power;
        vertex.marginal_price /= 1.0 + loss_factor * x * x;
    }
}
