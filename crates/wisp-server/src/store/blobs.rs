//! Filesystem blob backend for payloads too large to inline. One
//! `<id>.blob` file per secret in a single flat directory, written
//! create-exclusive and fsynced before the index row ever exists.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use tracing::warn;

use crate::error::Error;
use crate::id::{self, SecretId};

/// Large-payload persistence port. `open_for_consume` must hand out
/// delete-on-close readers so one-time consumption stays symmetric with
/// the index hard-delete; deletion failures are tolerated because
/// reconciliation retries them.
pub trait BlobBackend: Send + Sync {
    /// Create the blob for `id`, streaming exactly `size` bytes from `r`.
    /// Fails if the blob already exists or the reader runs short; any
    /// partial file is removed before returning. Durable on return.
    fn write(&self, id: &SecretId, r: &mut dyn Read, size: u64) -> Result<(), Error>;

    /// Open the blob for its single read. Dropping the returned reader
    /// deletes the underlying file whether or not it was read.
    fn open_for_consume(&self, id: &SecretId) -> Result<BlobReader, Error>;

    /// Force-remove a blob (expiry and reconciliation paths). An empty id
    /// is a no-op; a missing blob is an error.
    fn delete(&self, id: &str) -> Result<(), Error>;

    /// Ids of blobs currently present, omitting entries younger than the
    /// configured minimum age so a scan cannot race the write-then-insert
    /// sequence in `Store::save`.
    fn list(&self) -> Result<Vec<String>, Error>;
}

/// Reader over a blob file that unlinks the file when dropped.
#[derive(Debug)]
pub struct BlobReader {
    file: Option<File>,
    path: PathBuf,
}

impl Read for BlobReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.file.as_mut() {
            Some(f) => f.read(buf),
            None => Ok(0),
        }
    }
}

impl Drop for BlobReader {
    fn drop(&mut self) {
        // Close before unlink so the data hits the platform's directory
        // semantics cleanly; a failed unlink is left to reconciliation.
        drop(self.file.take());
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(error = %e, "delete consumed blob");
        }
    }
}

/// Blob store rooted at a single flat directory.
pub struct FsBlobStore {
    root: PathBuf,
    /// Freshness guard: `list` omits entries modified less than this long
    /// ago. Zero disables the guard (tests).
    min_age: Duration,
}

impl FsBlobStore {
    /// The directory must already exist with owner-only permissions;
    /// bootstrap creates it.
    pub fn new(root: &Path, min_age: Duration) -> Result<Self, Error> {
        let meta = fs::metadata(root).context("stat blob root")?;
        if !meta.is_dir() {
            return Err(Error::Internal(anyhow::anyhow!(
                "blob root is not a directory"
            )));
        }
        Ok(Self {
            root: root.to_owned(),
            min_age,
        })
    }

    fn blob_path(&self, id: &str) -> PathBuf {
        self.root.join(format!("{id}.blob"))
    }

    fn remove_partial(&self, path: &Path) {
        if let Err(e) = fs::remove_file(path) {
            warn!(error = %e, "remove partial blob");
        }
    }
}

impl BlobBackend for FsBlobStore {
    fn write(&self, id: &SecretId, r: &mut dyn Read, size: u64) -> Result<(), Error> {
        let path = self.blob_path(id.as_str());

        let mut opts = OpenOptions::new();
        opts.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            opts.mode(0o600);
        }
        let mut file = opts.open(&path).context("create blob file")?;

        let copied = match io::copy(&mut r.take(size), &mut file) {
            Ok(n) => n,
            Err(e) => {
                drop(file);
                self.remove_partial(&path);
                return Err(Error::Internal(
                    anyhow::Error::from(e).context("stream blob payload"),
                ));
            }
        };
        if copied != size {
            drop(file);
            self.remove_partial(&path);
            return Err(Error::Internal(anyhow::anyhow!(
                "short payload: got {copied} of {size} bytes"
            )));
        }
        if let Err(e) = file.sync_all() {
            drop(file);
            self.remove_partial(&path);
            return Err(Error::Internal(
                anyhow::Error::from(e).context("sync blob file"),
            ));
        }
        Ok(())
    }

    fn open_for_consume(&self, id: &SecretId) -> Result<BlobReader, Error> {
        let path = self.blob_path(id.as_str());
        let file = match File::open(&path) {
            Ok(f) => f,
            // The index row existed but the payload is gone; callers must
            // not be able to distinguish this from never-existed.
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(Error::NotFound),
            Err(e) => {
                return Err(Error::Internal(
                    anyhow::Error::from(e).context("open blob file"),
                ))
            }
        };
        Ok(BlobReader {
            file: Some(file),
            path,
        })
    }

    fn delete(&self, id: &str) -> Result<(), Error> {
        if id.is_empty() {
            return Ok(());
        }
        let id = SecretId::parse(id)?;
        fs::remove_file(self.blob_path(id.as_str())).context("remove blob file")?;
        Ok(())
    }

    fn list(&self) -> Result<Vec<String>, Error> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.root).context("read blob directory")? {
            let entry = entry.context("read blob directory entry")?;
            let meta = entry.metadata().context("stat blob entry")?;
            if !meta.is_file() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(stem) = name.strip_suffix(".blob") else {
                continue;
            };
            if !id::is_valid_id(stem) {
                continue;
            }
            if !self.min_age.is_zero() {
                // A file whose mtime cannot be read, or reads as being in
                // the future, counts as fresh and is skipped.
                let fresh = meta
                    .modified()
                    .ok()
                    .and_then(|m| m.elapsed().ok())
                    .map_or(true, |age| age < self.min_age);
                if fresh {
                    continue;
                }
            }
            ids.push(stem.to_owned());
        }
        Ok(ids)
    }
}
