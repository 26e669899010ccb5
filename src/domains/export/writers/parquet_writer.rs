use arrow::array::*;
use arrow::datatypes::{DataType, Field, Int64Type, Float64Type, SchemaRef};
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, ZstdLevel};
use parquet::file::properties::{WriterProperties, WriterVersion};
use rust_decimal::prelude::ToPrimitive;
use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::domains::export::schemas::{column_schema, dataset_schema};
use crate::domains::export::types::*;
use crate::errors::{ExportError, ExportResult};
use crate::types::SqlValue;

/// File extension of published artifacts.
pub const ARTIFACT_EXTENSION: &str = "parquet";

/// Rows per record batch handed to the writer.
const BATCH_ROWS: usize = 8_192;

/// Serializes row sets into self-describing Parquet files.
#[derive(Debug, Clone, Default)]
pub struct ParquetEncoder {
    compression: ParquetCompression,
}

impl ParquetEncoder {
    pub fn new(compression: ParquetCompression) -> Self {
        Self { compression }
    }

    fn writer_properties(&self) -> WriterProperties {
        let compression = match self.compression {
            ParquetCompression::None => Compression::UNCOMPRESSED,
            ParquetCompression::Snappy => Compression::SNAPPY,
            ParquetCompression::Zstd => Compression::ZSTD(ZstdLevel::default()),
        };

        WriterProperties::builder()
            .set_compression(compression)
            .set_writer_version(WriterVersion::PARQUET_1_0)
            .set_created_by(concat!("warehouse_export ", env!("CARGO_PKG_VERSION")).to_string())
            .build()
    }

    /// Encode `rows` under `schema`.
    ///
    /// Zero rows still yield a valid file holding only the schema. Fails with
    /// `TypeMismatch` when a cell cannot be cast to its column type; `String`
    /// columns accept anything.
    pub fn encode(
        &self,
        dataset: &str,
        schema: &ColumnSchema,
        rows: &[Vec<SqlValue>],
    ) -> ExportResult<EncodedArtifact> {
        let arrow_schema: SchemaRef = Arc::new(dataset_schema(dataset, schema));
        let mut buffer: Vec<u8> = Vec::new();

        {
            let mut writer = ArrowWriter::try_new(
                &mut buffer,
                arrow_schema.clone(),
                Some(self.writer_properties()),
            )?;

            let mut batch_builder = RecordBatchBuilder::new(arrow_schema.clone());
            for (offset, chunk) in rows.chunks(BATCH_ROWS).enumerate() {
                for (i, row) in chunk.iter().enumerate() {
                    batch_builder
                        .append_row(offset * BATCH_ROWS + i, row)
                        .map_err(|e| e.in_dataset(dataset))?;
                }
                writer.write(&batch_builder.finish()?)?;
            }

            writer.close()?;
        }

        if rows.is_empty() {
            log::debug!("Dataset {} is empty - wrote schema-only artifact", dataset);
        }

        let checksum = hex::encode(Sha256::digest(&buffer));
        Ok(EncodedArtifact {
            bytes: buffer,
            schema: schema.clone(),
            row_count: rows.len(),
            checksum,
        })
    }
}

/// Read an artifact back into its schema and rows.
pub fn read_artifact(bytes: &[u8]) -> ExportResult<DecodedArtifact> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(Bytes::copy_from_slice(bytes))?;
    let schema = column_schema(builder.schema());
    let reader = builder.build()?;

    let mut rows = Vec::new();
    for batch in reader {
        let batch = batch?;
        for row in 0..batch.num_rows() {
            let values = batch
                .columns()
                .iter()
                .map(|column| value_at(column, row))
                .collect::<ExportResult<Vec<_>>>()?;
            rows.push(values);
        }
    }

    Ok(DecodedArtifact { schema, rows })
}

fn value_at(column: &ArrayRef, row: usize) -> ExportResult<SqlValue> {
    if column.is_null(row) {
        return Ok(SqlValue::Null);
    }
    let value = match column.data_type() {
        DataType::Int64 => SqlValue::Int(column.as_primitive::<Int64Type>().value(row)),
        DataType::Float64 => SqlValue::Float(column.as_primitive::<Float64Type>().value(row)),
        DataType::Boolean => SqlValue::Bool(column.as_boolean().value(row)),
        DataType::Utf8 => SqlValue::Text(column.as_string::<i32>().value(row).to_string()),
        other => {
            return Err(ExportError::Encoding(format!(
                "Unsupported column type in artifact: {}",
                other
            )))
        }
    };
    Ok(value)
}

/// Record batch builder for accumulating rows
pub struct RecordBatchBuilder {
    schema: SchemaRef,
    builders: Vec<Box<dyn ArrayBuilder>>,
}

impl RecordBatchBuilder {
    pub fn new(schema: SchemaRef) -> Self {
        let builders = schema
            .fields()
            .iter()
            .map(|field| Self::create_builder(field))
            .collect();

        Self { schema, builders }
    }

    fn create_builder(field: &Field) -> Box<dyn ArrayBuilder> {
        match field.data_type() {
            DataType::Int64 => Box::new(Int64Builder::new()),
            DataType::Float64 => Box::new(Float64Builder::new()),
            DataType::Boolean => Box::new(BooleanBuilder::new()),
            _ => Box::new(StringBuilder::new()),
        }
    }

    /// Append one source row. `row_index` is only used for error reporting.
    pub fn append_row(&mut self, row_index: usize, row: &[SqlValue]) -> ExportResult<()> {
        if row.len() != self.builders.len() {
            return Err(ExportError::Encoding(format!(
                "Row {} has {} values, schema has {} columns",
                row_index,
                row.len(),
                self.builders.len()
            )));
        }
        for (column_index, value) in row.iter().enumerate() {
            self.append_value(column_index, row_index, value)?;
        }
        Ok(())
    }

    pub fn append_value(
        &mut self,
        column_index: usize,
        row_index: usize,
        value: &SqlValue,
    ) -> ExportResult<()> {
        if column_index >= self.builders.len() {
            return Err(ExportError::Encoding("Column index out of bounds".to_string()));
        }

        let field = self.schema.field(column_index).clone();
        let builder = self.builders[column_index].as_any_mut();
        let mismatch = || ExportError::TypeMismatch {
            dataset: None,
            column: field.name().clone(),
            row: row_index,
            expected: field.data_type().to_string(),
            value: format!("{} {:?}", value.kind(), value.to_string()),
        };
        let wrong_builder =
            || ExportError::Encoding(format!("Builder mismatch for column {}", field.name()));

        match field.data_type() {
            DataType::Int64 => {
                let builder = builder
                    .downcast_mut::<Int64Builder>()
                    .ok_or_else(wrong_builder)?;
                match value {
                    SqlValue::Null => builder.append_null(),
                    other => builder.append_value(cast_i64(other).ok_or_else(mismatch)?),
                }
            }
            DataType::Float64 => {
                let builder = builder
                    .downcast_mut::<Float64Builder>()
                    .ok_or_else(wrong_builder)?;
                match value {
                    SqlValue::Null => builder.append_null(),
                    other => builder.append_value(cast_f64(other).ok_or_else(mismatch)?),
                }
            }
            DataType::Boolean => {
                let builder = builder
                    .downcast_mut::<BooleanBuilder>()
                    .ok_or_else(wrong_builder)?;
                match value {
                    SqlValue::Null => builder.append_null(),
                    other => builder.append_value(cast_bool(other).ok_or_else(mismatch)?),
                }
            }
            _ => {
                // Fallback column type: every value has a string form
                let builder = builder
                    .downcast_mut::<StringBuilder>()
                    .ok_or_else(wrong_builder)?;
                match value {
                    SqlValue::Null => builder.append_null(),
                    SqlValue::Text(s) => builder.append_value(s),
                    other => builder.append_value(other.to_string()),
                }
            }
        }

        Ok(())
    }

    pub fn finish(&mut self) -> ExportResult<RecordBatch> {
        let arrays: Vec<ArrayRef> = self
            .builders
            .iter_mut()
            .map(|builder| builder.finish())
            .collect();

        RecordBatch::try_new(self.schema.clone(), arrays).map_err(ExportError::from)
    }
}

fn cast_i64(value: &SqlValue) -> Option<i64> {
    match value {
        SqlValue::Int(i) => Some(*i),
        SqlValue::Bool(b) => Some(i64::from(*b)),
        SqlValue::Float(f) => {
            let truncated = f.trunc();
            // i64::MAX as f64 rounds up to 2^63, which is out of range
            if truncated.is_finite() && truncated >= i64::MIN as f64 && truncated < i64::MAX as f64 {
                Some(truncated as i64)
            } else {
                None
            }
        }
        SqlValue::Decimal(d) => d.trunc().to_i64(),
        SqlValue::Text(s) => s.trim().parse().ok(),
        SqlValue::Null => None,
    }
}

fn cast_f64(value: &SqlValue) -> Option<f64> {
    match value {
        SqlValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        SqlValue::Text(s) => s.trim().parse().ok(),
        other => other.as_f64(),
    }
}

fn cast_bool(value: &SqlValue) -> Option<bool> {
    match value {
        SqlValue::Bool(b) => Some(*b),
        SqlValue::Int(0) => Some(false),
        SqlValue::Int(1) => Some(true),
        SqlValue::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}
