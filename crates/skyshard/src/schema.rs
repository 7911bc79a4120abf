//! Record schema and the validated cast shared by ingest and write time.
//!
//! Every photon-event row carries exactly fifteen fields. Only the partition
//! key fields are cast while reading; the rest stay as raw text until a flush
//! casts the whole buffer.

use std::sync::{Arc, LazyLock};

use arrow::datatypes::{DataType, Field as ArrowField, Schema as ArrowSchema, SchemaRef};
use snafu::Snafu;

/// Canonical type of one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Int8,
    Int16,
    Int32,
    Int64,
    Float64,
}

/// A field value after a successful cast.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CastValue {
    Int(i64),
    Float(f64),
}

impl CastValue {
    /// Numeric value widened to `f64`.
    pub fn as_f64(self) -> f64 {
        match self {
            CastValue::Int(v) => v as f64,
            CastValue::Float(v) => v,
        }
    }

    /// Numeric value as `i64`; floats are truncated.
    pub fn as_i64(self) -> i64 {
        match self {
            CastValue::Int(v) => v,
            CastValue::Float(v) => v as i64,
        }
    }
}

/// A raw value could not be converted to its canonical type.
#[derive(Debug, Clone, PartialEq, Snafu)]
#[snafu(display("value {value:?} is not a valid {field_type:?}"))]
pub struct CastError {
    pub value: String,
    pub field_type: FieldType,
}

impl FieldType {
    /// Convert to Arrow DataType.
    pub fn to_arrow_type(self) -> DataType {
        match self {
            FieldType::Int8 => DataType::Int8,
            FieldType::Int16 => DataType::Int16,
            FieldType::Int32 => DataType::Int32,
            FieldType::Int64 => DataType::Int64,
            FieldType::Float64 => DataType::Float64,
        }
    }

    /// Cast raw text to this type. Surrounding whitespace is ignored and
    /// integers must fit the narrow type without wrapping.
    pub fn cast(self, raw: &str) -> Result<CastValue, CastError> {
        let text = raw.trim();
        let value = match self {
            FieldType::Int8 => text.parse::<i8>().ok().map(|v| CastValue::Int(v.into())),
            FieldType::Int16 => text.parse::<i16>().ok().map(|v| CastValue::Int(v.into())),
            FieldType::Int32 => text.parse::<i32>().ok().map(|v| CastValue::Int(v.into())),
            FieldType::Int64 => text.parse::<i64>().ok().map(CastValue::Int),
            FieldType::Float64 => text.parse::<f64>().ok().map(CastValue::Float),
        };
        value.ok_or_else(|| CastError {
            value: raw.to_string(),
            field_type: self,
        })
    }
}

/// One named, typed field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: &'static str,
    pub field_type: FieldType,
}

const fn field(name: &'static str, field_type: FieldType) -> Field {
    Field { name, field_type }
}

const PHOTON_FIELDS: [Field; 15] = [
    field("zoneID", FieldType::Int32),
    field("time", FieldType::Int64),
    field("cx", FieldType::Float64),
    field("cy", FieldType::Float64),
    field("cz", FieldType::Float64),
    field("x", FieldType::Float64),
    field("y", FieldType::Float64),
    field("xa", FieldType::Int16),
    field("ya", FieldType::Int16),
    field("q", FieldType::Int16),
    field("xi", FieldType::Float64),
    field("eta", FieldType::Float64),
    field("ra", FieldType::Float64),
    field("dec", FieldType::Float64),
    field("flag", FieldType::Int8),
];

static PHOTON_SCHEMA: LazyLock<Arc<Schema>> =
    LazyLock::new(|| Arc::new(Schema::new(PHOTON_FIELDS.to_vec())));

/// Ordered field list for one input record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    fields: Vec<Field>,
}

impl Schema {
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    /// The fifteen-field photon-event schema.
    pub fn photon_events() -> Arc<Schema> {
        Arc::clone(&PHOTON_SCHEMA)
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Position of the field called `name`.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Convert to an Arrow schema with non-nullable columns.
    pub fn to_arrow_schema(&self) -> SchemaRef {
        let fields: Vec<ArrowField> = self
            .fields
            .iter()
            .map(|f| ArrowField::new(f.name, f.field_type.to_arrow_type(), false))
            .collect();
        Arc::new(ArrowSchema::new(fields))
    }
}

/// Positions of the partition key fields within a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyFields {
    pub zone_id: usize,
    pub ra: usize,
    /// Present only when declination partitioning is enabled.
    pub dec: Option<usize>,
}

impl KeyFields {
    /// Key positions in [`Schema::photon_events`].
    pub fn photon(with_dec: bool) -> Self {
        Self {
            zone_id: 0,
            ra: 12,
            dec: with_dec.then_some(13),
        }
    }

    /// Locate `zoneID`, `ra` and optionally `dec` in `schema`.
    pub fn locate(schema: &Schema, with_dec: bool) -> Option<Self> {
        Some(Self {
            zone_id: schema.index_of("zoneID")?,
            ra: schema.index_of("ra")?,
            dec: if with_dec {
                Some(schema.index_of("dec")?)
            } else {
                None
            },
        })
    }
}
