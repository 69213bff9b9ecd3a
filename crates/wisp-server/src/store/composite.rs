//! The composite secret store: an [`Index`] and a [`BlobBackend`] under a
//! single placement policy. Payloads at or below `inline_max` live in the
//! index row; larger ones go to the blob store first, then the index row
//! is inserted (two-phase, so a visible row always has its payload).

use std::collections::HashSet;
use std::io::{self, Read};
use std::sync::Arc;

use anyhow::Context;
use tracing::{debug, warn};
use zeroize::Zeroizing;

use super::blobs::{BlobBackend, BlobReader};
use super::index::Index;
use super::model::Meta;
use crate::clock::Clock;
use crate::error::Error;
use crate::id::SecretId;

/// Application-facing storage port. Implementations own durability and
/// the single-consume invariant.
pub trait SecretStore: Send + Sync {
    /// Persist a new secret with an absolute expiry. `r` streams exactly
    /// `size` bytes of ciphertext; data and metadata are crash-safe when
    /// this returns.
    fn save(
        &self,
        id: &SecretId,
        meta: &Meta,
        r: &mut dyn Read,
        size: u64,
        expires_at: i64,
    ) -> Result<(), Error>;

    /// Retrieve a secret exactly once, destroying it in the process. A
    /// secret that is absent, already consumed, or expired is `NotFound`.
    fn consume(&self, id: &SecretId) -> Result<Consumed, Error>;

    /// Remove secrets whose expiry precedes `t`; returns how many.
    fn delete_expired(&self, t: i64) -> Result<usize, Error>;

    /// Remove blob files no longer referenced by the index. Idempotent
    /// and safe to run alongside normal traffic.
    fn reconcile(&self) -> Result<(), Error>;
}

/// A consumed secret: metadata plus the one-shot payload reader.
#[derive(Debug)]
pub struct Consumed {
    pub meta: Meta,
    pub reader: SecretReader,
    pub size: u64,
}

/// Payload reader returned by consume. The external variant deletes its
/// blob file on drop; the inline variant wipes its buffer on drop.
#[derive(Debug)]
pub enum SecretReader {
    Inline(InlineReader),
    External(BlobReader),
}

impl Read for SecretReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            SecretReader::Inline(r) => r.read(buf),
            SecretReader::External(r) => r.read(buf),
        }
    }
}

/// Zero-copy reads over an inline payload held in a zeroizing buffer.
#[derive(Debug)]
pub struct InlineReader {
    buf: Zeroizing<Vec<u8>>,
    pos: usize,
}

impl InlineReader {
    fn new(buf: Vec<u8>) -> Self {
        Self {
            buf: Zeroizing::new(buf),
            pos: 0,
        }
    }
}

impl Read for InlineReader {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let remaining = &self.buf[self.pos..];
        if remaining.is_empty() {
            return Ok(0);
        }
        let n = remaining.len().min(out.len());
        out[..n].copy_from_slice(&remaining[..n]);
        self.pos += n;
        Ok(n)
    }
}

/// Composite store. Thread-safe; the handles are shared, the policy is a
/// single threshold.
#[derive(Clone)]
pub struct Store {
    index: Arc<dyn Index>,
    blobs: Arc<dyn BlobBackend>,
    clock: Arc<dyn Clock>,
    inline_max: u64,
}

impl Store {
    pub fn new(
        index: Arc<dyn Index>,
        blobs: Arc<dyn BlobBackend>,
        clock: Arc<dyn Clock>,
        inline_max: u64,
    ) -> Self {
        Self {
            index,
            blobs,
            clock,
            inline_max,
        }
    }
}

impl SecretStore for Store {
    fn save(
        &self,
        id: &SecretId,
        meta: &Meta,
        r: &mut dyn Read,
        size: u64,
        expires_at: i64,
    ) -> Result<(), Error> {
        let created_at = self.clock.now();

        if size <= self.inline_max {
            let mut inline = Zeroizing::new(vec![0u8; size as usize]);
            r.read_exact(&mut inline)
                .context("read inline payload")?;
            self.index.insert(
                id,
                meta,
                Some(&inline),
                false,
                size,
                created_at,
                expires_at,
            )
        } else {
            self.blobs.write(id, r, size)?;
            // If this insert fails the blob just written has no row
            // pointing at it; the next reconcile collects it.
            self.index
                .insert(id, meta, None, true, size, created_at, expires_at)
        }
    }

    fn consume(&self, id: &SecretId) -> Result<Consumed, Error> {
        let now = self.clock.now();
        let res = self.index.consume_and_delete(id, now)?;

        if now >= res.expires_at {
            // The row is already gone, which is exactly what an expired
            // record touched by a reader should become. Any blob it left
            // behind is unreferenced now and reconciliation collects it.
            debug!("evicted expired secret on consume");
            return Err(Error::NotFound);
        }

        if res.external {
            let reader = self.blobs.open_for_consume(id)?;
            Ok(Consumed {
                meta: res.meta,
                reader: SecretReader::External(reader),
                size: res.size,
            })
        } else {
            let inline = res.inline.unwrap_or_default();
            let size = inline.len() as u64;
            Ok(Consumed {
                meta: res.meta,
                reader: SecretReader::Inline(InlineReader::new(inline)),
                size,
            })
        }
    }

    fn delete_expired(&self, t: i64) -> Result<usize, Error> {
        let expired = self.index.expire_before(t)?;
        for rec in &expired {
            if rec.external {
                // Best-effort: a failed unlink is retried by reconcile.
                if let Err(e) = self.blobs.delete(&rec.id) {
                    warn!(error = %e, "delete expired blob");
                }
            }
        }
        Ok(expired.len())
    }

    fn reconcile(&self) -> Result<(), Error> {
        let blob_ids = self.blobs.list()?;
        let referenced: HashSet<String> = self.index.list_external_ids()?.into_iter().collect();

        for bid in blob_ids {
            if !referenced.contains(&bid) {
                match self.blobs.delete(&bid) {
                    Ok(()) => debug!("removed orphan blob"),
                    Err(e) => warn!(error = %e, "remove orphan blob"),
                }
            }
        }
        Ok(())
    }
}
