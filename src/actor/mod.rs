//! Actor-based task and workflow orchestration
//!
//! Each task and each workflow is a Ractor actor addressed by id. Actors are activated on
//! demand from durable state, process one message at a time and persist every state change
//! before replying.

pub mod cell;
pub mod directory;
pub mod message;
pub mod runtime;
pub mod task;
pub mod workflow;

#[cfg(test)]
mod tests;

pub use message::*;
pub use runtime::Runtime;

use ractor::RpcReplyPort;
use tracing::{Level, event};

use crate::domain::constant::runtime as events;

/// Send a reply; the caller may have timed out and gone away
pub(crate) fn respond<T: Send + 'static>(reply: RpcReplyPort<T>, value: T) {
    if reply.send(value).is_err() {
        event!(Level::DEBUG, event = events::DELIVERY_FAILED, message = "caller dropped the reply port");
    }
}
