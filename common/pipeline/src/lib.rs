//! The consume, process, produce loop shared by the image pipeline workers.
pub mod config;
pub mod decode;
pub mod pipeline;
pub mod publisher;
pub mod signals;
pub mod test_utils;

pub use decode::{decode, DecodeError};
pub use pipeline::{MessageOutcome, NoOutput, Pipeline, PipelineError, PipelineState, Processor};
pub use publisher::{FlushPolicy, PublishError, Publisher};
