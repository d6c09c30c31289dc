//! Append-only record of every store a scan has seen.
//!
//! Lines are flushed before the coordinate they came from is checkpointed,
//! so resuming from the journal never loses a store the checkpoint claims.

use std::{
    fs::{self, File, OpenOptions},
    io::{self, BufWriter, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{info, warn};

use crate::{
    stores::{DiscoveredStore, StoreSet},
    utils::write_atomic,
};

pub struct Journal {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl Journal {
    /// Opens the journal, keeping earlier lines only when `resume` is set.
    pub fn open(path: impl Into<PathBuf>, resume: bool) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(resume)
            .write(true)
            .truncate(!resume)
            .open(&path)
            .with_context(|| format!("failed to open journal {}", path.display()))?;

        // a write cut short leaves a partial last line, which must not swallow
        // the next store
        if resume && !ends_with_newline(&mut file)? {
            file.write_all(b"\n")
                .with_context(|| format!("failed to write journal {}", path.display()))?;
        }

        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    /// Stores seen by earlier runs, and the journal to record this run in.
    ///
    /// Earlier lines are only kept when the scan resumes from a checkpoint.
    pub fn resume<S>(path: impl Into<PathBuf>, resumed: bool) -> Result<(StoreSet<S>, Self)>
    where
        S: DiscoveredStore + DeserializeOwned,
    {
        let path = path.into();
        let mut found = StoreSet::new();
        if resumed {
            found.merge(Self::load::<S>(&path)?);
            info!(stores = found.len(), "loaded stores from earlier runs");
        }
        let journal = Self::open(path, resumed)?;
        Ok((found, journal))
    }

    pub fn append<S: Serialize>(&mut self, stores: &[S]) -> Result<()> {
        for store in stores {
            serde_json::to_writer(&mut self.writer, store)?;
            self.writer.write_all(b"\n")?;
        }
        self.writer
            .flush()
            .with_context(|| format!("failed to write journal {}", self.path.display()))
    }

    /// Reads every complete line. A damaged line, such as one cut short by
    /// an interrupted write, is skipped.
    pub fn load<S: DeserializeOwned>(path: &Path) -> Result<Vec<S>> {
        let contents = match fs::read_to_string(path) {
            Ok(x) => x,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read journal {}", path.display()))
            }
        };

        let mut output = Vec::new();
        for (number, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(x) => output.push(x),
                Err(e) => warn!(
                    path = %path.display(),
                    line = number + 1,
                    error = %e,
                    "skipping damaged journal line"
                ),
            }
        }
        Ok(output)
    }
}

fn ends_with_newline(file: &mut File) -> io::Result<bool> {
    if file.metadata()?.len() == 0 {
        return Ok(true);
    }
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

/// Writes the final store list, one JSON object per line in key order.
pub fn write_output<S>(path: &Path, stores: &StoreSet<S>) -> Result<()>
where
    S: DiscoveredStore + Serialize,
{
    let mut contents = String::new();
    for store in stores.iter() {
        contents.push_str(&serde_json::to_string(store)?);
        contents.push('\n');
    }
    write_atomic(path, contents.as_bytes())
        .with_context(|| format!("failed to write {}", path.display()))
}
