//! Parquet file writer for flushed partition buffers.
//!
//! Casts every buffered field to its canonical type, optionally orders rows
//! by right ascension, and writes one compressed Parquet file per flush. The
//! file is assembled under a temporary name in the destination directory and
//! renamed into place only once complete, so readers never see partial files.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{ArrayRef, PrimitiveBuilder, RecordBatch};
use arrow::compute::{sort_to_indices, take_record_batch};
use arrow::datatypes::{
    ArrowPrimitiveType, Float64Type, Int8Type, Int16Type, Int32Type, Int64Type, SchemaRef,
};
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, GzipLevel, ZstdLevel};
use parquet::file::properties::WriterProperties;
use snafu::prelude::*;
use tempfile::NamedTempFile;
use tracing::debug;

use skyshard_core::ParquetCompression;

use crate::error::{
    BatchSnafu, CreateTempSnafu, DestinationExistsSnafu, FieldCastSnafu, ParquetWriteSnafu,
    PersistSnafu, RowAritySnafu, WriteError, WriterCreateSnafu,
};
use crate::schema::{CastValue, Field, FieldType, Schema};
use crate::source::RawRecord;

/// Configuration for the Parquet writer.
#[derive(Debug, Clone, Default)]
pub struct ColumnarWriterConfig {
    /// Compression codec.
    pub compression: ParquetCompression,
    /// Order rows by ascending `ra` within each file.
    pub sort_by_ra: bool,
}

impl ColumnarWriterConfig {
    /// Set the compression codec.
    pub fn with_compression(mut self, compression: ParquetCompression) -> Self {
        self.compression = compression;
        self
    }

    /// Enable or disable sorting by `ra`.
    pub fn with_sort_by_ra(mut self, sort_by_ra: bool) -> Self {
        self.sort_by_ra = sort_by_ra;
        self
    }
}

/// A Parquet file that was written and moved into place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenFile {
    pub path: PathBuf,
    pub records: usize,
    /// Size of the file on disk.
    pub bytes: u64,
}

/// Writes buffered records as Parquet files.
#[derive(Debug, Clone)]
pub struct ColumnarWriter {
    schema: Arc<Schema>,
    arrow_schema: SchemaRef,
    config: ColumnarWriterConfig,
    properties: WriterProperties,
}

impl ColumnarWriter {
    pub fn new(schema: Arc<Schema>, config: ColumnarWriterConfig) -> Self {
        let arrow_schema = schema.to_arrow_schema();
        let properties = writer_properties(config.compression);
        Self {
            schema,
            arrow_schema,
            config,
            properties,
        }
    }

    /// Write `records` to `destination`, which must not exist yet.
    ///
    /// Nothing is left on disk when any step fails.
    pub fn write(
        &self,
        records: &[RawRecord],
        destination: &Path,
    ) -> Result<WrittenFile, WriteError> {
        ensure!(
            !destination.exists(),
            DestinationExistsSnafu { path: destination }
        );

        let mut batch = self.build_batch(records)?;
        if self.config.sort_by_ra {
            batch = self.sort_by_ra(batch)?;
        }

        let dir = destination.parent().unwrap_or_else(|| Path::new("."));
        let mut temp = NamedTempFile::new_in(dir).context(CreateTempSnafu { dir })?;

        let mut writer = ArrowWriter::try_new(
            temp.as_file_mut(),
            Arc::clone(&self.arrow_schema),
            Some(self.properties.clone()),
        )
        .context(WriterCreateSnafu)?;
        writer.write(&batch).context(ParquetWriteSnafu)?;
        writer.close().context(ParquetWriteSnafu)?;

        let file = match temp.persist_noclobber(destination) {
            Ok(file) => file,
            Err(err) if err.error.kind() == std::io::ErrorKind::AlreadyExists => {
                return DestinationExistsSnafu { path: destination }.fail();
            }
            Err(err) => {
                return Err(err.error).context(PersistSnafu { path: destination });
            }
        };
        let bytes = file
            .metadata()
            .context(PersistSnafu { path: destination })?
            .len();

        debug!(
            path = %destination.display(),
            records = records.len(),
            bytes,
            "Wrote parquet file"
        );

        Ok(WrittenFile {
            path: destination.to_path_buf(),
            records: records.len(),
            bytes,
        })
    }

    /// Cast every field of every record into typed Arrow columns.
    fn build_batch(&self, records: &[RawRecord]) -> Result<RecordBatch, WriteError> {
        let expected = self.schema.len();
        for (row, record) in records.iter().enumerate() {
            ensure!(
                record.len() == expected,
                RowAritySnafu {
                    row,
                    found: record.len(),
                    expected,
                }
            );
        }

        let columns = self
            .schema
            .fields()
            .iter()
            .enumerate()
            .map(|(index, field)| match field.field_type {
                FieldType::Int8 => column::<Int8Type>(records, index, field, |v| v.as_i64() as i8),
                FieldType::Int16 => {
                    column::<Int16Type>(records, index, field, |v| v.as_i64() as i16)
                }
                FieldType::Int32 => {
                    column::<Int32Type>(records, index, field, |v| v.as_i64() as i32)
                }
                FieldType::Int64 => column::<Int64Type>(records, index, field, CastValue::as_i64),
                FieldType::Float64 => {
                    column::<Float64Type>(records, index, field, CastValue::as_f64)
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        RecordBatch::try_new(Arc::clone(&self.arrow_schema), columns).context(BatchSnafu)
    }

    fn sort_by_ra(&self, batch: RecordBatch) -> Result<RecordBatch, WriteError> {
        let Some(ra) = self.schema.index_of("ra") else {
            return Ok(batch);
        };
        let indices = sort_to_indices(batch.column(ra), None, None).context(BatchSnafu)?;
        take_record_batch(&batch, &indices).context(BatchSnafu)
    }
}

fn column<T: ArrowPrimitiveType>(
    records: &[RawRecord],
    index: usize,
    field: &Field,
    convert: impl Fn(CastValue) -> T::Native,
) -> Result<ArrayRef, WriteError> {
    let mut builder = PrimitiveBuilder::<T>::with_capacity(records.len());
    for (row, record) in records.iter().enumerate() {
        let raw = record.get(index).unwrap_or_default();
        let value = field.field_type.cast(raw).context(FieldCastSnafu {
            field: field.name,
            row,
        })?;
        builder.append_value(convert(value));
    }
    Ok(Arc::new(builder.finish()))
}

fn writer_properties(compression: ParquetCompression) -> WriterProperties {
    WriterProperties::builder()
        .set_compression(match compression {
            ParquetCompression::Uncompressed => Compression::UNCOMPRESSED,
            ParquetCompression::Snappy => Compression::SNAPPY,
            ParquetCompression::Gzip => Compression::GZIP(GzipLevel::default()),
            ParquetCompression::Zstd => Compression::ZSTD(ZstdLevel::default()),
            ParquetCompression::Lz4 => Compression::LZ4,
        })
        .build()
}
