pub mod blobs;
pub mod composite;
pub mod index;
pub mod model;

pub use blobs::{BlobBackend, BlobReader, FsBlobStore};
pub use composite::{Consumed, SecretReader, SecretStore, Store};
pub use index::{Index, RedbIndex};
pub use model::{ExpiredRecord, IndexResult, Meta, StoredRecord};
