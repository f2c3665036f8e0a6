pub mod concurrency;
pub mod config;
pub mod error;
pub mod lesson;
pub mod prefetch;
pub mod provider;
pub mod session;
pub mod speech;
pub mod store;
pub mod utils;

pub use config::Config;
pub use error::{LessonError, UpstreamError};
pub use session::LessonSession;
