pub mod protocol;

pub use protocol::{connect_ack, unwrap_envelope, Health, PushAck};
