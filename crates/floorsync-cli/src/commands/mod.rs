pub mod cache;
pub mod clear;
pub mod common;
pub mod completions;
pub mod conflicts;
pub mod enqueue;
pub mod queue;
pub mod sync;
pub mod watch;
