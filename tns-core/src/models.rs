mod config;
mod interval;
mod map;
mod record;
mod vertex;

pub use config::*;
pub use interval::{IntervalId, IntervalState, TimeInterval};
pub use map::Map;
pub use record::{SignalPayload, TransactiveRecord, parse_topic, signal_topic};
pub use vertex::Vertex;
