//! Message-path helpers
//!
//! Both components are called synchronously by the message handling path and
//! share no mutable state with the monitoring loops:
//! - [`ContextCompressor`] shrinks a conversation to fit a token budget
//! - [`StreamingPacer`] recommends the interval between outbound chunks

mod compressor;
mod pacer;

pub use compressor::{CompressionResult, ContextCompressor};
pub use pacer::{ContentType, PacingContext, PacingDecision, StreamingPacer};
