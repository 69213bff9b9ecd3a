//! Metadata index backed by redb. One table, keyed by the secret id,
//! holding bincode-encoded [`StoredRecord`]s. redb gives us serialized
//! write transactions (the consume-and-delete linearization point) and
//! fsync-on-commit durability.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use redb::{Database, ReadableTable, TableDefinition};

use super::model::{ExpiredRecord, IndexResult, Meta, StoredRecord};
use crate::error::Error;
use crate::id::SecretId;

const SECRETS: TableDefinition<&str, &[u8]> = TableDefinition::new("secrets");

/// Metadata/index port. Stores secret metadata, inlined small ciphertext,
/// and references to blob files for larger payloads.
pub trait Index: Send + Sync {
    /// Persist a new row. A duplicate id is an error (a fresh random id
    /// colliding means the random source is broken, not a retry case).
    /// Durable when this returns.
    #[allow(clippy::too_many_arguments)]
    fn insert(
        &self,
        id: &SecretId,
        meta: &Meta,
        inline: Option<&[u8]>,
        external: bool,
        size: u64,
        created_at: i64,
        expires_at: i64,
    ) -> Result<(), Error>;

    /// Atomically remove the row and return its fields. Absent row →
    /// `NotFound`. Expiry is deliberately not interpreted here; the
    /// caller compares `now` against the returned `expires_at`.
    fn consume_and_delete(&self, id: &SecretId, now: i64) -> Result<IndexResult, Error>;

    /// Remove every row with `expires_at < t` (strict) in one atomic
    /// transaction and return what was removed.
    fn expire_before(&self, t: i64) -> Result<Vec<ExpiredRecord>, Error>;

    /// Ids of rows whose payload lives in the blob store. Need not be a
    /// consistent snapshot against concurrent inserts.
    fn list_external_ids(&self) -> Result<Vec<String>, Error>;
}

/// Thread-safe handle to the redb index.
#[derive(Clone)]
pub struct RedbIndex {
    db: Arc<Database>,
}

impl RedbIndex {
    /// Open (or create) the database at `path` and ensure the table exists.
    pub fn open(path: &Path) -> Result<Self, Error> {
        let db = Database::create(path).context("open redb database")?;

        let write_txn = db.begin_write().context("begin schema transaction")?;
        write_txn
            .open_table(SECRETS)
            .context("open secrets table")?;
        write_txn.commit().context("commit schema transaction")?;

        Ok(Self { db: Arc::new(db) })
    }
}

impl Index for RedbIndex {
    #[allow(clippy::too_many_arguments)]
    fn insert(
        &self,
        id: &SecretId,
        meta: &Meta,
        inline: Option<&[u8]>,
        external: bool,
        size: u64,
        created_at: i64,
        expires_at: i64,
    ) -> Result<(), Error> {
        let record = StoredRecord {
            version: meta.version,
            nonce_b64u: meta.nonce_b64u.clone(),
            inline: inline.map(|b| b.to_vec()),
            external,
            size,
            created_at,
            expires_at,
        };
        let bytes = encode(&record)?;

        let write_txn = self.db.begin_write().context("begin insert")?;
        let duplicate = {
            let mut table = write_txn.open_table(SECRETS).context("open secrets table")?;
            let prev = table
                .insert(id.as_str(), bytes.as_slice())
                .context("insert secret row")?
                .is_some();
            prev
        };
        if duplicate {
            write_txn.abort().context("abort duplicate insert")?;
            return Err(Error::Internal(anyhow::anyhow!(
                "duplicate secret id on insert"
            )));
        }
        write_txn.commit().context("commit insert")?;
        Ok(())
    }

    fn consume_and_delete(&self, id: &SecretId, _now: i64) -> Result<IndexResult, Error> {
        let write_txn = self.db.begin_write().context("begin consume")?;
        let removed: Option<Vec<u8>> = {
            let mut table = write_txn.open_table(SECRETS).context("open secrets table")?;
            let value = table
                .remove(id.as_str())
                .context("remove secret row")?
                .map(|guard| guard.value().to_vec());
            value
        };
        let Some(bytes) = removed else {
            write_txn.abort().context("abort empty consume")?;
            return Err(Error::NotFound);
        };
        // Decode before committing: a corrupt row aborts the transaction
        // instead of silently destroying the secret.
        let mut record = decode(&bytes)?;
        write_txn.commit().context("commit consume")?;

        Ok(IndexResult {
            meta: Meta {
                version: record.version,
                nonce_b64u: std::mem::take(&mut record.nonce_b64u),
            },
            inline: std::mem::take(&mut record.inline),
            external: record.external,
            size: record.size,
            expires_at: record.expires_at,
        })
    }

    fn expire_before(&self, t: i64) -> Result<Vec<ExpiredRecord>, Error> {
        let write_txn = self.db.begin_write().context("begin expiry sweep")?;
        let expired = {
            let mut table = write_txn.open_table(SECRETS).context("open secrets table")?;

            // Collect first: the removals below need a mutable borrow.
            let mut doomed: Vec<ExpiredRecord> = Vec::new();
            for item in table.iter().context("scan secrets")? {
                let (key, value) = item.context("read secret row")?;
                let record = decode(value.value())?;
                if record.expires_at < t {
                    doomed.push(ExpiredRecord {
                        id: key.value().to_owned(),
                        external: record.external,
                    });
                }
            }
            for rec in &doomed {
                table
                    .remove(rec.id.as_str())
                    .context("remove expired row")?;
            }
            doomed
        };
        write_txn.commit().context("commit expiry sweep")?;
        Ok(expired)
    }

    fn list_external_ids(&self) -> Result<Vec<String>, Error> {
        let read_txn = self.db.begin_read().context("begin external-id scan")?;
        let table = read_txn.open_table(SECRETS).context("open secrets table")?;

        let mut ids = Vec::new();
        for item in table.iter().context("scan secrets")? {
            let (key, value) = item.context("read secret row")?;
            let record = decode(value.value())?;
            if record.external {
                ids.push(key.value().to_owned());
            }
        }
        Ok(ids)
    }
}

fn encode(record: &StoredRecord) -> Result<Vec<u8>, Error> {
    Ok(bincode::serde::encode_to_vec(record, bincode::config::standard())
        .context("bincode encode secret record")?)
}

fn decode(bytes: &[u8]) -> Result<StoredRecord, Error> {
    let (record, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .context("bincode decode secret record")?;
    Ok(record)
}
