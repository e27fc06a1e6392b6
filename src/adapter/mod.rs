//! In-process and on-disk implementations of the ports

pub mod bus;
pub mod http;
pub mod message_bus;
pub mod state;
pub mod timer;
