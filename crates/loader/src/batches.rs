use std::fs::File;
use std::path::{Path, PathBuf};

use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::{ParquetRecordBatchReader, ParquetRecordBatchReaderBuilder};

use crate::error::LoadError;

/// One bounded slice of a row group.
#[derive(Debug, Clone)]
pub struct SourceBatch {
    pub row_group: usize,
    /// Position of this batch within its row group.
    pub index: usize,
    pub batch: RecordBatch,
}

/// Lazy sequence of batches over a parquet file, one row group at a time.
///
/// Batches hold at most `batch_size` rows and never span row groups. Only the
/// current row group's reader is open. [`restart`](Self::restart) rewinds to
/// the first row group.
pub struct RowGroupBatches {
    path: PathBuf,
    batch_size: usize,
    num_row_groups: usize,
    total_rows: u64,
    row_group: usize,
    index: usize,
    current: Option<ParquetRecordBatchReader>,
}

impl RowGroupBatches {
    /// Reads the footer only; no row data is decoded until iteration.
    pub fn open(path: &Path, batch_size: usize) -> Result<Self, LoadError> {
        let builder = ParquetRecordBatchReaderBuilder::try_new(File::open(path)?)?;
        let metadata = builder.metadata();
        Ok(Self {
            path: path.to_path_buf(),
            batch_size: batch_size.max(1),
            num_row_groups: metadata.num_row_groups(),
            total_rows: metadata.file_metadata().num_rows().max(0) as u64,
            row_group: 0,
            index: 0,
            current: None,
        })
    }

    pub fn num_row_groups(&self) -> usize {
        self.num_row_groups
    }

    pub fn total_rows(&self) -> u64 {
        self.total_rows
    }

    pub fn restart(&mut self) {
        self.row_group = 0;
        self.index = 0;
        self.current = None;
    }

    fn open_row_group(&self, row_group: usize) -> Result<ParquetRecordBatchReader, LoadError> {
        let reader = ParquetRecordBatchReaderBuilder::try_new(File::open(&self.path)?)?
            .with_row_groups(vec![row_group])
            .with_batch_size(self.batch_size)
            .build()?;
        Ok(reader)
    }

    fn stop(&mut self) {
        self.current = None;
        self.row_group = self.num_row_groups;
    }
}

impl Iterator for RowGroupBatches {
    type Item = Result<SourceBatch, LoadError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.current.is_none() {
                if self.row_group >= self.num_row_groups {
                    return None;
                }
                match self.open_row_group(self.row_group) {
                    Ok(reader) => {
                        self.current = Some(reader);
                        self.index = 0;
                    }
                    Err(e) => {
                        self.stop();
                        return Some(Err(e));
                    }
                }
            }

            let reader = self.current.as_mut()?;
            match reader.next() {
                Some(Ok(batch)) if batch.num_rows() == 0 => continue,
                Some(Ok(batch)) => {
                    let item = SourceBatch {
                        row_group: self.row_group,
                        index: self.index,
                        batch,
                    };
                    self.index += 1;
                    return Some(Ok(item));
                }
                Some(Err(e)) => {
                    self.stop();
                    return Some(Err(e.into()));
                }
                None => {
                    self.current = None;
                    self.row_group += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use arrow::array::Int64Array;
    use arrow::datatypes::{DataType, Field, Schema};
    use parquet::arrow::ArrowWriter;
    use parquet::file::properties::WriterProperties;

    fn write_fixture(path: &Path, rows: i64, row_group_size: usize) {
        let schema = Arc::new(Schema::new(vec![Field::new("vendorid", DataType::Int64, true)]));
        let props = WriterProperties::builder()
            .set_max_row_group_size(row_group_size)
            .build();
        let mut writer = ArrowWriter::try_new(File::create(path).unwrap(), schema.clone(), Some(props)).unwrap();
        let batch = RecordBatch::try_new(
            schema,
            vec![Arc::new(Int64Array::from_iter_values(0..rows))],
        )
        .unwrap();
        writer.write(&batch).unwrap();
        writer.close().unwrap();
    }

    #[test]
    fn ten_thousand_rows_in_two_batches() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.parquet");
        write_fixture(&path, 10_000, 10_000);

        let batches: Vec<SourceBatch> = RowGroupBatches::open(&path, 5_000)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(batches.len(), 2);
        assert!(batches.iter().all(|b| b.batch.num_rows() == 5_000));
        assert_eq!((batches[1].row_group, batches[1].index), (0, 1));
    }

    #[test]
    fn batches_never_span_row_groups() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.parquet");
        write_fixture(&path, 2_500, 1_000);

        let mut seq = RowGroupBatches::open(&path, 700).unwrap();
        assert_eq!(seq.num_row_groups(), 3);
        assert_eq!(seq.total_rows(), 2_500);

        let sizes: Vec<(usize, usize)> = seq
            .by_ref()
            .map(|b| b.map(|b| (b.row_group, b.batch.num_rows())))
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(
            sizes,
            vec![(0, 700), (0, 300), (1, 700), (1, 300), (2, 500)]
        );

        // Exhausted, then replayable.
        assert!(seq.next().is_none());
        seq.restart();
        let total: usize = seq.map(|b| b.unwrap().batch.num_rows()).sum();
        assert_eq!(total, 2_500);
    }

    #[test]
    fn non_parquet_file_fails_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.parquet");
        std::fs::write(&path, b"not parquet at all").unwrap();
        assert!(matches!(
            RowGroupBatches::open(&path, 10),
            Err(LoadError::Parquet(_))
        ));
    }
}
