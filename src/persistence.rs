//! On-disk persistence of Application and User lifetime data.
//!
//! Each metric kind is kept in a single JSON file, `<kind>.json`, under the
//! data directory. A flush serializes the full set of persisted records for
//! a kind into `<kind>.json.tmp`, syncs it and renames it over the previous
//! file, so a crash mid-flush leaves the last good file in place.

use crate::error::Error;
use crate::metric::MetricKind;
use crate::storage::{PersistedRecord, StoredValue};
use std::fs;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// The data directory.
#[derive(Debug, Clone)]
pub struct Persistence {
    root: PathBuf,
}

impl Persistence {
    /// Open `root`, creating it if need be.
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Persistence, Error> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Persistence { root })
    }

    /// The data directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The file holding records of `kind`.
    pub fn path(&self, kind: MetricKind) -> PathBuf {
        self.root.join(format!("{}.json", kind.as_str()))
    }

    /// Replace the persisted records of `kind`.
    pub fn flush<V>(&self, kind: MetricKind, records: &[PersistedRecord<V>]) -> Result<(), Error>
    where
        V: StoredValue,
    {
        let path = self.path(kind);
        let tmp = self.root.join(format!("{}.json.tmp", kind.as_str()));
        {
            let fp = fs::File::create(&tmp)?;
            let mut writer = BufWriter::new(fp);
            serde_json::to_writer(&mut writer, records)?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp, &path)?;
        trace!("flushed {} {} records to {:?}", records.len(), kind, path);
        Ok(())
    }

    /// Read the persisted records of `kind`. A missing file holds nothing.
    pub fn load<V>(&self, kind: MetricKind) -> Result<Vec<PersistedRecord<V>>, Error>
    where
        V: StoredValue,
    {
        let path = self.path(kind);
        let fp = match fs::File::open(&path) {
            Ok(fp) => fp,
            Err(ref e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let records: Vec<PersistedRecord<V>> = serde_json::from_reader(BufReader::new(fp))?;
        debug!("loaded {} {} records from {:?}", records.len(), kind, path);
        Ok(records)
    }
}
