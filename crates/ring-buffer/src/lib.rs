//! Rolling Window Buffer
//!
//! Provides a capped FIFO window: pushing beyond capacity evicts the oldest
//! entry. Used for the per-source analysis history.

mod buffer;

pub use buffer::RingBuffer;
