//! Concurrency primitives shared by the lesson and speech paths.

pub mod inflight;
pub mod retry;

pub use inflight::{Flight, InFlight};
pub use retry::RetryPolicy;
