//! Wire protocol and transports

pub mod codec;
pub mod outbox;
pub mod protocol;
pub mod session;
pub mod transport;
