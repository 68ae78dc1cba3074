//! Compressed archives of raw dumps
//!
//! Archives are written under a hidden temporary name next to their final
//! location and renamed into place only once fully written and synced, so an
//! artifact with its final name is always complete.

use super::pg_dump::RawDump;
use crate::managers::job::JobId;
use chrono::{DateTime, Local};
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Timestamp format shared by artifact and run log names
pub const RUN_STAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

pub fn run_stamp(at: DateTime<Local>) -> String {
    at.format(RUN_STAMP_FORMAT).to_string()
}

/// A finished backup archive
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artifact {
    pub path: PathBuf,
    pub size_bytes: u64,
}

#[derive(Debug, thiserror::Error)]
#[error("Failed to write archive {}: {source}", .path.display())]
pub struct CompressionFailure {
    /// Final artifact path that was not produced
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

/// Destination of archive bytes
pub trait ArchiveSink: Write {
    /// Make the written bytes durable before the archive is published
    fn commit(self) -> io::Result<()>;
}

impl ArchiveSink for File {
    fn commit(self) -> io::Result<()> {
        self.sync_all()
    }
}

/// Packs raw dumps into `.tar.gz` artifacts for one run
#[derive(Debug, Clone)]
pub struct Compressor {
    level: Compression,
    stamp: String,
}

impl Compressor {
    /// Maximum compression, artifacts stamped with the run's start time
    pub fn for_run(started_at: DateTime<Local>) -> Self {
        Self {
            level: Compression::best(),
            stamp: run_stamp(started_at),
        }
    }

    /// `<server>_<database>_<YYYYMMDD-HHMMSS>.tar.gz`
    pub fn artifact_name(&self, job: &JobId) -> String {
        format!("{}_{}.tar.gz", job.file_stem(), self.stamp)
    }

    /// Archive `raw` into `destination`
    pub fn compress(&self, raw: &RawDump, destination: &Path) -> Result<Artifact, CompressionFailure> {
        self.compress_with(raw, destination, |path| {
            OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(path)
        })
    }

    /// Archive `raw` into `destination`, writing through the sink `open` returns
    /// for the temporary path.
    ///
    /// On any error the temporary file is removed and no artifact is published.
    pub fn compress_with<S, F>(
        &self,
        raw: &RawDump,
        destination: &Path,
        open: F,
    ) -> Result<Artifact, CompressionFailure>
    where
        S: ArchiveSink,
        F: FnOnce(&Path) -> io::Result<S>,
    {
        let name = self.artifact_name(raw.job());
        let final_path = destination.join(&name);
        let failure = |source| CompressionFailure {
            path: final_path.clone(),
            source,
        };

        if final_path.exists() {
            return Err(failure(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "artifact already exists",
            )));
        }

        let temp_path = destination.join(format!(".{name}.tmp"));
        debug!("Writing archive for {} to {:?}", raw.job(), temp_path);

        let written = self
            .write_archive(raw, &temp_path, open)
            .and_then(|()| fs::rename(&temp_path, &final_path));

        if let Err(source) = written {
            if let Err(e) = fs::remove_file(&temp_path) {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!("Failed to remove partial archive {:?}: {}", temp_path, e);
                }
            }
            return Err(failure(source));
        }

        let size_bytes = fs::metadata(&final_path).map(|m| m.len()).unwrap_or(0);
        info!(
            "Compressed {} ({} bytes -> {} bytes)",
            raw.job(),
            raw.size_bytes(),
            size_bytes
        );

        Ok(Artifact {
            path: final_path,
            size_bytes,
        })
    }

    fn write_archive<S, F>(&self, raw: &RawDump, temp_path: &Path, open: F) -> io::Result<()>
    where
        S: ArchiveSink,
        F: FnOnce(&Path) -> io::Result<S>,
    {
        let sink = open(temp_path)?;
        let mut builder = tar::Builder::new(GzEncoder::new(sink, self.level));
        builder.append_path_with_name(raw.path(), raw.entry_name())?;

        let encoder = builder.into_inner()?;
        encoder.finish()?.commit()
    }
}
