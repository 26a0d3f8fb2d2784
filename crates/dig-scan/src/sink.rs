//! Record consumers.

use crate::record::{Record, RecordKind};
use dig_error::{DigError, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::debug;

/// Consumer of scan output, called once per record in scan order.
pub trait RecordSink {
    fn accept(&mut self, record: Record) -> Result<()>;
}

impl RecordSink for Vec<Record> {
    fn accept(&mut self, record: Record) -> Result<()> {
        self.push(record);
        Ok(())
    }
}

impl<S: RecordSink + ?Sized> RecordSink for &mut S {
    fn accept(&mut self, record: Record) -> Result<()> {
        (**self).accept(record)
    }
}

/// Writes each record as one CSV row, in arrival order.
#[derive(Debug)]
pub struct CsvWriter<W: Write> {
    out: W,
}

impl<W: Write> CsvWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> RecordSink for CsvWriter<W> {
    fn accept(&mut self, record: Record) -> Result<()> {
        record.write_row(&mut self.out)?;
        Ok(())
    }
}

/// Writes each record as one JSON object per line.
#[derive(Debug)]
pub struct JsonLinesWriter<W: Write> {
    out: W,
}

impl<W: Write> JsonLinesWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> RecordSink for JsonLinesWriter<W> {
    fn accept(&mut self, record: Record) -> Result<()> {
        write_json_line(&mut self.out, &record)
    }
}

fn write_json_line(out: &mut impl Write, record: &Record) -> Result<()> {
    serde_json::to_writer(&mut *out, record).map_err(|e| DigError::Io(e.into()))?;
    out.write_all(b"\n")?;
    Ok(())
}

/// Buffers records into one stream per kind.
///
/// Reading the streams back in [`RecordKind::ALL`] order yields the
/// canonical concatenated output: every SUPERBLOCK row, then every GROUP
/// row, and so on, each stream keeping scan order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordStreams {
    streams: [Vec<Record>; 7],
}

impl RecordStreams {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn records(&self, kind: RecordKind) -> &[Record] {
        &self.streams[kind.index()]
    }

    /// All records in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.streams.iter().flatten()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.streams.iter().map(Vec::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.streams.iter().all(Vec::is_empty)
    }

    pub fn write_csv(&self, out: &mut impl Write) -> Result<()> {
        for record in self.iter() {
            record.write_row(out)?;
        }
        Ok(())
    }

    pub fn write_json_lines(&self, out: &mut impl Write) -> Result<()> {
        for record in self.iter() {
            write_json_line(out, record)?;
        }
        Ok(())
    }

    /// Write one CSV file per kind into `dir`, creating empty files for
    /// kinds with no records.
    pub fn write_files(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        for kind in RecordKind::ALL {
            let path = dir.join(kind.file_name());
            let mut out = BufWriter::new(File::create(&path)?);
            for record in self.records(kind) {
                record.write_row(&mut out)?;
            }
            out.flush()?;
            debug!(path = %path.display(), rows = self.records(kind).len(), "wrote stream");
        }
        Ok(())
    }
}

impl RecordSink for RecordStreams {
    fn accept(&mut self, record: Record) -> Result<()> {
        self.streams[record.kind().index()].push(record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::DirentRecord;

    fn dirent(inode: u32) -> Record {
        Record::Dirent(DirentRecord {
            parent: 2,
            offset: 0,
            inode,
            rec_len: 12,
            name_len: 1,
            name: "x".into(),
        })
    }

    #[test]
    fn streams_reorder_by_kind_and_keep_arrival_order() {
        let mut streams = RecordStreams::new();
        streams.accept(Record::Ifree { inode: 5 }).unwrap();
        streams.accept(dirent(12)).unwrap();
        streams.accept(Record::Bfree { block: 9 }).unwrap();
        streams.accept(Record::Bfree { block: 3 }).unwrap();
        streams.accept(dirent(11)).unwrap();

        assert_eq!(streams.len(), 5);
        assert_eq!(streams.records(RecordKind::Bfree).len(), 2);

        let mut out = Vec::new();
        streams.write_csv(&mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "BFREE,9\nBFREE,3\nIFREE,5\nDIRENT,2,0,12,12,1,'x'\nDIRENT,2,0,11,12,1,'x'\n"
        );
    }

    #[test]
    fn csv_writer_keeps_arrival_order() {
        let mut writer = CsvWriter::new(Vec::new());
        writer.accept(Record::Ifree { inode: 5 }).unwrap();
        writer.accept(Record::Bfree { block: 9 }).unwrap();
        assert_eq!(writer.into_inner(), b"IFREE,5\nBFREE,9\n");
    }

    #[test]
    fn json_lines_writer_emits_one_object_per_line() {
        let mut writer = JsonLinesWriter::new(Vec::new());
        writer.accept(Record::Bfree { block: 1 }).unwrap();
        writer.accept(Record::Ifree { inode: 2 }).unwrap();
        let text = String::from_utf8(writer.into_inner()).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines, [r#"{"kind":"BFREE","block":1}"#, r#"{"kind":"IFREE","inode":2}"#]);
    }

    #[test]
    fn write_files_creates_every_stream() {
        let dir = tempfile::tempdir().unwrap();
        let mut streams = RecordStreams::new();
        streams.accept(Record::Bfree { block: 4 }).unwrap();
        streams.write_files(dir.path()).unwrap();

        for kind in RecordKind::ALL {
            assert!(dir.path().join(kind.file_name()).exists(), "{kind} missing");
        }
        let bfree = std::fs::read_to_string(dir.path().join("bfree.csv")).unwrap();
        assert_eq!(bfree, "BFREE,4\n");
        let inode = std::fs::read_to_string(dir.path().join("inode.csv")).unwrap();
        assert!(inode.is_empty());
    }

    #[test]
    fn vec_sink_collects() {
        let mut records: Vec<Record> = Vec::new();
        let sink: &mut dyn RecordSink = &mut records;
        sink.accept(Record::Bfree { block: 1 }).unwrap();
        assert_eq!(records, vec![Record::Bfree { block: 1 }]);
    }
}
