use serde::{Deserialize, Serialize};
use zeroize::ZeroizeOnDrop;

/// Per-secret metadata required by clients to decrypt the payload.
/// Both fields are opaque to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Meta {
    /// Encryption scheme tag negotiated client-side.
    pub version: u8,
    /// base64url-encoded nonce supplied by the client. Never inspected
    /// beyond a non-empty check at the transport boundary.
    pub nonce_b64u: String,
}

/// Stored in redb as bincode-encoded bytes, one row per secret.
/// `inline` holds the ciphertext for small payloads; larger payloads live
/// in the blob store under the same id and `inline` is `None`.
/// All timestamps are Unix seconds.
#[derive(Debug, Clone, Serialize, Deserialize, ZeroizeOnDrop)]
pub struct StoredRecord {
    pub version: u8,
    pub nonce_b64u: String,
    /// Ciphertext, present iff `external` is false.
    pub inline: Option<Vec<u8>>,
    /// True iff the payload is in the blob store under this record's id.
    pub external: bool,
    /// Payload byte count; equals `inline.len()` for inline records.
    pub size: u64,
    pub created_at: i64,
    pub expires_at: i64,
}

/// Fields handed back by a successful consume-and-delete. Expiry is not
/// interpreted at the index layer; `expires_at` is returned so the caller
/// can decide.
#[derive(Debug)]
pub struct IndexResult {
    pub meta: Meta,
    pub inline: Option<Vec<u8>>,
    pub external: bool,
    pub size: u64,
    pub expires_at: i64,
}

/// An expired row removed by a sweep; `external` tells the caller whether
/// a blob file needs best-effort cleanup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpiredRecord {
    pub id: String,
    pub external: bool,
}
