//! Output side of the pipeline.

mod writer;

pub use writer::{ColumnarWriter, ColumnarWriterConfig, WrittenFile};
