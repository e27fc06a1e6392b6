pub mod completion;
pub mod constant;
pub mod definition;
pub mod error;
pub mod retry;
pub mod task;
pub mod workflow;
