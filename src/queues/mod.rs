//! Job queues and batch processing.

pub mod extract;
pub mod jobs;
pub mod work;
