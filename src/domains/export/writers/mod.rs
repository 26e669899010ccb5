pub mod parquet_writer;

pub use parquet_writer::{read_artifact, ParquetEncoder, RecordBatchBuilder, ARTIFACT_EXTENSION};
