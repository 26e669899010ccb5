pub mod inference;
pub mod parquet;

pub use inference::{infer, infer_declared};
pub use parquet::{column_schema, dataset_schema, SchemaBuilder};
