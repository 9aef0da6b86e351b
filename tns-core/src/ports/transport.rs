use crate::models::SignalPayload;

/// Ships signals to neighboring nodes.
///
/// Delivery is not assumed to be reliable or ordered: the negotiation
/// protocol re-sends whatever it has not seen answered.
pub trait SignalTransport {
    /// Error type for transport failures
    type Error: std::error::Error;

    /// Publish `payload` on `topic` (see [`crate::models::signal_topic`])
    fn send(&mut self, topic: &str, payload: SignalPayload) -> Result<(), Self::Error>;
}
