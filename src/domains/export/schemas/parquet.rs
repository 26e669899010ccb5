use arrow::datatypes::{DataType, Field, Schema};
use std::collections::HashMap;

use crate::domains::export::types::{ColumnField, ColumnSchema, ExportType};

/// Schema metadata key holding the dataset name.
pub const DATASET_METADATA_KEY: &str = "warehouse_export.dataset";
/// Schema metadata key holding the producer version.
pub const PRODUCER_METADATA_KEY: &str = "warehouse_export.producer";

pub fn arrow_type(export_type: ExportType) -> DataType {
    match export_type {
        ExportType::Int64 => DataType::Int64,
        ExportType::Float64 => DataType::Float64,
        ExportType::Bool => DataType::Boolean,
        ExportType::String => DataType::Utf8,
    }
}

/// Inverse of [`arrow_type`]. Types this crate never writes read back as `String`.
pub fn export_type(data_type: &DataType) -> ExportType {
    match data_type {
        DataType::Int8 | DataType::Int16 | DataType::Int32 | DataType::Int64 => ExportType::Int64,
        DataType::Float32 | DataType::Float64 => ExportType::Float64,
        DataType::Boolean => ExportType::Bool,
        _ => ExportType::String,
    }
}

/// Schema builder for dataset schemas
pub struct SchemaBuilder {
    fields: Vec<Field>,
    metadata: HashMap<String, String>,
}

impl SchemaBuilder {
    pub fn new() -> Self {
        Self {
            fields: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    /// Every exported column is nullable; source views give no guarantee otherwise.
    pub fn add_field(mut self, name: &str, export_type: ExportType) -> Self {
        self.fields.push(Field::new(name, arrow_type(export_type), true));
        self
    }

    pub fn add_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }

    pub fn build(self) -> Schema {
        Schema::new(self.fields).with_metadata(self.metadata)
    }
}

impl Default for SchemaBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Arrow schema for a dataset, tagged with the dataset name and producer.
pub fn dataset_schema(dataset: &str, schema: &ColumnSchema) -> Schema {
    schema
        .fields()
        .iter()
        .fold(SchemaBuilder::new(), |builder, field| {
            builder.add_field(&field.name, field.export_type)
        })
        .add_metadata(DATASET_METADATA_KEY, dataset)
        .add_metadata(
            PRODUCER_METADATA_KEY,
            concat!("warehouse_export/", env!("CARGO_PKG_VERSION")),
        )
        .build()
}

pub fn column_schema(schema: &Schema) -> ColumnSchema {
    ColumnSchema::new(
        schema
            .fields()
            .iter()
            .map(|field| ColumnField {
                name: field.name().clone(),
                export_type: export_type(field.data_type()),
            })
            .collect(),
    )
}
