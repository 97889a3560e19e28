pub mod errors;
pub mod nats;
pub mod sink;

pub use errors::{MqError, MqResult};
pub use nats::NatsSink;
pub use sink::Sink;
