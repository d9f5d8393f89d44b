use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use subrec_core::SubscriberKind;
use tracing::warn;

use crate::StoreError;

/// CSV of legacy records that were skipped because their match was ambiguous or
/// collided with an existing user. Every row is flushed as soon as it is written.
pub struct ConflictReport<W: Write> {
    kind: SubscriberKind,
    writer: csv::Writer<W>,
    rows: usize,
}

impl ConflictReport<File> {
    /// Create (or truncate) `<dir>/<model>_conflicts.csv` and write its header.
    pub fn create_in(dir: &Path, kind: SubscriberKind) -> Result<(Self, PathBuf), StoreError> {
        let path = dir.join(kind.conflict_file_name());
        let file = File::create(&path)?;
        Ok((Self::from_writer(file, kind)?, path))
    }
}

impl<W: Write> ConflictReport<W> {
    pub fn from_writer(inner: W, kind: SubscriberKind) -> Result<Self, StoreError> {
        let mut writer = csv::Writer::from_writer(inner);
        writer.write_record(["ID", kind.key_field().header()])?;
        writer.flush()?;
        Ok(Self {
            kind,
            writer,
            rows: 0,
        })
    }

    pub fn record(&mut self, id: i64, key: &str) -> Result<(), StoreError> {
        warn!(kind = %self.kind, id, key, "conflict recorded");
        self.writer.write_record([id.to_string().as_str(), key])?;
        self.writer.flush()?;
        self.rows += 1;
        Ok(())
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn into_inner(self) -> Result<W, StoreError> {
        self.writer
            .into_inner()
            .map_err(|err| StoreError::Io(err.into_error()))
    }
}
