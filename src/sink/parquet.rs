//! Parquet serialization with per-column compression and size-based rolling.

use std::collections::HashMap;
use std::io::Write;
use std::sync::{Arc, Mutex};

use arrow::array::RecordBatch;
use arrow::datatypes::SchemaRef;
use bytes::{BufMut, Bytes, BytesMut};
use parquet::arrow::ArrowWriter;
use parquet::file::properties::WriterProperties;
use parquet::schema::types::ColumnPath;
use uuid::Uuid;

use crate::config::{MB, ParquetCompression};
use crate::error::{ExportError, ParquetWriteSnafu, WriterCreateSnafu};
use snafu::ResultExt;

/// A finished Parquet file awaiting staging.
#[derive(Debug, Clone)]
pub struct FinishedFile {
    /// Partition-relative path, e.g. `family=numeric/part-<uuid>.parquet`.
    pub filename: String,
    /// Serialized size in bytes.
    pub size: usize,
    /// Rows in the file.
    pub record_count: usize,
    /// The serialized file contents.
    pub bytes: Bytes,
}

/// A buffer with interior mutability for the ArrowWriter.
#[derive(Clone)]
struct SharedBuffer {
    buffer: Arc<Mutex<bytes::buf::Writer<BytesMut>>>,
}

impl SharedBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            buffer: Arc::new(Mutex::new(BytesMut::with_capacity(capacity).writer())),
        }
    }

    fn into_inner(self) -> Result<BytesMut, ExportError> {
        let mutex = Arc::into_inner(self.buffer).ok_or(ExportError::BufferInUse)?;
        let writer = mutex.into_inner().map_err(|_| ExportError::BufferInUse)?;
        Ok(writer.into_inner())
    }

    fn len(&self) -> usize {
        self.buffer
            .lock()
            .map(|guard| guard.get_ref().len())
            .unwrap_or(0)
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut buffer = self
            .buffer
            .lock()
            .map_err(|_| std::io::Error::other("buffer lock poisoned"))?;
        Write::write(&mut *buffer, buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Configuration for the Parquet writer.
#[derive(Debug, Clone)]
pub struct ParquetWriterConfig {
    /// Target file size in bytes before rolling.
    pub target_file_size: usize,
    /// Default compression codec.
    pub compression: ParquetCompression,
    /// Per-column codec overrides.
    pub column_compression: HashMap<String, ParquetCompression>,
}

impl Default for ParquetWriterConfig {
    fn default() -> Self {
        Self {
            target_file_size: 128 * MB,
            compression: ParquetCompression::default(),
            column_compression: HashMap::new(),
        }
    }
}

/// Parquet file writer that buffers batches and rolls files by size.
///
/// One partition (directory) is active at a time; switching partitions
/// rolls the current file.
pub struct ParquetWriter {
    schema: SchemaRef,
    config: ParquetWriterConfig,
    writer: Option<ArrowWriter<SharedBuffer>>,
    buffer: SharedBuffer,
    partition: String,
    record_count: usize,
    finished: Vec<FinishedFile>,
}

impl ParquetWriter {
    /// Create a new Parquet writer for the unified schema.
    pub fn new(schema: SchemaRef, config: ParquetWriterConfig) -> Result<Self, ExportError> {
        let buffer = SharedBuffer::new(MB);
        let writer = Self::create_writer(&schema, &config, buffer.clone())?;

        Ok(Self {
            schema,
            config,
            writer: Some(writer),
            buffer,
            partition: String::new(),
            record_count: 0,
            finished: Vec::new(),
        })
    }

    fn create_writer(
        schema: &SchemaRef,
        config: &ParquetWriterConfig,
        buffer: SharedBuffer,
    ) -> Result<ArrowWriter<SharedBuffer>, ExportError> {
        // Modest row groups keep the writer's buffered memory bounded when
        // a detail family runs to hundreds of millions of rows.
        let mut builder = WriterProperties::builder()
            .set_compression(config.compression.to_parquet())
            .set_max_row_group_size(256 * 1024);
        for (column, codec) in &config.column_compression {
            builder = builder
                .set_column_compression(ColumnPath::from(column.clone()), codec.to_parquet());
        }

        ArrowWriter::try_new(buffer, schema.clone(), Some(builder.build()))
            .context(WriterCreateSnafu)
    }

    /// Switch the active output partition, rolling any open file.
    pub fn set_partition(&mut self, partition: &str) -> Result<(), ExportError> {
        if self.partition != partition {
            self.roll()?;
            self.partition = partition.to_string();
        }
        Ok(())
    }

    /// Write one batch, rolling the file when it reaches the target size.
    pub fn write_batch(&mut self, batch: &RecordBatch) -> Result<(), ExportError> {
        let writer = self.writer.as_mut().ok_or(ExportError::BufferInUse)?;
        writer.write(batch).context(ParquetWriteSnafu)?;
        self.record_count += batch.num_rows();

        if self.buffer.len() >= self.config.target_file_size {
            self.roll()?;
        }
        Ok(())
    }

    /// Close the current file and start a new one, keeping empty files out
    /// of the artifact.
    fn roll(&mut self) -> Result<(), ExportError> {
        if self.record_count == 0 {
            return Ok(());
        }

        let writer = self.writer.take().ok_or(ExportError::BufferInUse)?;
        writer.close().context(ParquetWriteSnafu)?;

        let fresh = SharedBuffer::new(MB);
        let buffer = std::mem::replace(&mut self.buffer, fresh);
        let bytes = buffer.into_inner()?.freeze();

        self.finished.push(FinishedFile {
            filename: format!("{}/part-{}.parquet", self.partition, Uuid::new_v4()),
            size: bytes.len(),
            record_count: self.record_count,
            bytes,
        });
        self.record_count = 0;

        self.writer = Some(Self::create_writer(
            &self.schema,
            &self.config,
            self.buffer.clone(),
        )?);
        Ok(())
    }

    /// Take files finished so far.
    pub fn take_finished(&mut self) -> Vec<FinishedFile> {
        std::mem::take(&mut self.finished)
    }

    /// Finish the open file and return everything not yet taken.
    pub fn close(mut self) -> Result<Vec<FinishedFile>, ExportError> {
        self.roll()?;
        if let Some(writer) = self.writer.take() {
            writer.close().context(ParquetWriteSnafu)?;
        }
        Ok(self.finished)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::StringArray;
    use arrow::datatypes::{DataType, Field, Schema};
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

    fn test_schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("rpt_rec_num", DataType::Utf8, true),
            Field::new("itm_val", DataType::Utf8, true),
            Field::new("source_family", DataType::Utf8, false),
        ]))
    }

    fn test_batch(rows: usize, family: &str) -> RecordBatch {
        let ids: Vec<String> = (0..rows).map(|i| format!("R{i}")).collect();
        let values: Vec<String> = (0..rows).map(|i| format!("{i}")).collect();
        RecordBatch::try_new(
            test_schema(),
            vec![
                Arc::new(StringArray::from(ids)),
                Arc::new(StringArray::from(values)),
                Arc::new(StringArray::from(vec![family; rows])),
            ],
        )
        .unwrap()
    }

    #[test]
    fn writes_and_rolls_per_partition() {
        let mut writer = ParquetWriter::new(test_schema(), ParquetWriterConfig::default()).unwrap();

        writer.set_partition("family=numeric").unwrap();
        writer.write_batch(&test_batch(10, "numeric")).unwrap();

        writer.set_partition("family=alphanumeric").unwrap();
        writer.write_batch(&test_batch(5, "alphanumeric")).unwrap();

        let files = writer.close().unwrap();
        assert_eq!(files.len(), 2);
        assert!(files[0].filename.starts_with("family=numeric/part-"));
        assert!(files[1].filename.starts_with("family=alphanumeric/part-"));
        assert_eq!(files[0].record_count, 10);
        assert_eq!(files[1].record_count, 5);
    }

    #[test]
    fn round_trips_rows_and_schema() {
        let mut writer = ParquetWriter::new(test_schema(), ParquetWriterConfig::default()).unwrap();
        writer.set_partition("family=numeric").unwrap();
        writer.write_batch(&test_batch(25, "numeric")).unwrap();
        let files = writer.close().unwrap();
        assert_eq!(files.len(), 1);

        let reader = ParquetRecordBatchReaderBuilder::try_new(files[0].bytes.clone())
            .unwrap()
            .build()
            .unwrap();
        let batches: Vec<RecordBatch> = reader.map(|b| b.unwrap()).collect();

        let rows: usize = batches.iter().map(|b| b.num_rows()).sum();
        assert_eq!(rows, 25);
        assert_eq!(batches[0].schema().fields().len(), 3);
        assert_eq!(batches[0].schema().field(1).name(), "itm_val");
    }

    #[test]
    fn small_target_size_rolls_multiple_files() {
        let config = ParquetWriterConfig {
            target_file_size: 1,
            ..ParquetWriterConfig::default()
        };
        let mut writer = ParquetWriter::new(test_schema(), config).unwrap();
        writer.set_partition("family=numeric").unwrap();
        writer.write_batch(&test_batch(10, "numeric")).unwrap();
        writer.write_batch(&test_batch(10, "numeric")).unwrap();

        let files = writer.close().unwrap();
        assert_eq!(files.len(), 2);
        let total: usize = files.iter().map(|f| f.record_count).sum();
        assert_eq!(total, 20);
    }

    #[test]
    fn per_column_overrides_are_accepted() {
        let config = ParquetWriterConfig {
            compression: ParquetCompression::Zstd,
            column_compression: HashMap::from([
                ("source_family".to_string(), ParquetCompression::Snappy),
                ("rpt_rec_num".to_string(), ParquetCompression::Snappy),
            ]),
            ..ParquetWriterConfig::default()
        };
        let mut writer = ParquetWriter::new(test_schema(), config).unwrap();
        writer.set_partition("family=numeric").unwrap();
        writer.write_batch(&test_batch(10, "numeric")).unwrap();

        let files = writer.close().unwrap();
        assert_eq!(files.len(), 1);

        // Still readable with mixed codecs.
        let reader = ParquetRecordBatchReaderBuilder::try_new(files[0].bytes.clone())
            .unwrap()
            .build()
            .unwrap();
        let rows: usize = reader.map(|b| b.unwrap().num_rows()).sum();
        assert_eq!(rows, 10);
    }

    #[test]
    fn empty_writer_produces_no_files() {
        let writer = ParquetWriter::new(test_schema(), ParquetWriterConfig::default()).unwrap();
        let files = writer.close().unwrap();
        assert!(files.is_empty());
    }
}
