//! Background warm-up: audio for the active lesson, content for the next one.

pub mod lookahead;
pub mod pool;

pub use lookahead::LookaheadScheduler;
pub use pool::{PrefetchHandle, PrefetchPool, PrefetchReport};
