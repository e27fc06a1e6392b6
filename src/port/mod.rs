//! Interfaces to the collaborators the actors depend on

pub mod bus;
pub mod http;
pub mod message_bus;
pub mod state;
pub mod timer;
