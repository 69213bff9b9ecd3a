//! Request-level orchestration: validates inputs, mints identifiers,
//! computes expiry, and delegates to the store. Performs no I/O of its
//! own and never touches the index or blob store directly.

use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;
use crate::error::Error;
use crate::id::SecretId;
use crate::metrics::{self, MetricsSink};
use crate::store::{Consumed, Meta, SecretStore};

/// Service wiring and request bounds. A zero `min_ttl`/`max_ttl`
/// disables that bound.
pub struct Service {
    pub store: Arc<dyn SecretStore>,
    pub clock: Arc<dyn Clock>,
    pub max_bytes: u64,
    pub min_ttl: Duration,
    pub max_ttl: Duration,
    pub metrics: Option<Arc<dyn MetricsSink>>,
}

impl Service {
    /// Validate inputs, assign a fresh id, compute the absolute expiry,
    /// and persist the secret. Returns the id and expiry (Unix seconds).
    pub fn create_secret(
        &self,
        ciphertext: &mut dyn Read,
        size: u64,
        version: u8,
        nonce: &str,
        ttl: Duration,
    ) -> Result<(SecretId, i64), Error> {
        validate_ttl(ttl, self.min_ttl, self.max_ttl)?;
        if size == 0 || size > self.max_bytes {
            return Err(Error::SizeExceeded);
        }
        let id = SecretId::new()?;
        let now = self.clock.now();
        let expires_at = now + ttl.as_secs() as i64;
        let meta = Meta {
            version,
            nonce_b64u: nonce.to_owned(),
        };
        self.store.save(&id, &meta, ciphertext, size, expires_at)?;
        if let Some(m) = &self.metrics {
            m.inc(metrics::SECRETS_CREATED, 1);
        }
        Ok((id, expires_at))
    }

    /// Validate the identifier, then delegate the one-time retrieval.
    pub fn consume(&self, id_str: &str) -> Result<Consumed, Error> {
        let id = SecretId::parse(id_str)?;
        let consumed = self.store.consume(&id)?;
        if let Some(m) = &self.metrics {
            m.inc(metrics::SECRETS_CONSUMED, 1);
        }
        Ok(consumed)
    }
}

/// A TTL is acceptable when positive and within the configured inclusive
/// bounds (each bound applies only when non-zero).
fn validate_ttl(ttl: Duration, min: Duration, max: Duration) -> Result<(), Error> {
    if ttl.is_zero() {
        return Err(Error::TtlInvalid);
    }
    if !min.is_zero() && ttl < min {
        return Err(Error::TtlInvalid);
    }
    if !max.is_zero() && ttl > max {
        return Err(Error::TtlInvalid);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::id;
    use crate::metrics::InMemoryMetrics;
    use std::io::Cursor;
    use std::sync::Mutex;

    /// Records save calls and returns a configurable result; the service
    /// tests only need to observe what reached the store.
    #[derive(Default)]
    struct RecordingStore {
        saves: Mutex<Vec<(String, Meta, Vec<u8>, u64, i64)>>,
        fail_save: bool,
    }

    impl SecretStore for RecordingStore {
        fn save(
            &self,
            id: &SecretId,
            meta: &Meta,
            r: &mut dyn Read,
            size: u64,
            expires_at: i64,
        ) -> Result<(), Error> {
            if self.fail_save {
                return Err(Error::Internal(anyhow::anyhow!("save failed")));
            }
            let mut payload = Vec::new();
            r.read_to_end(&mut payload).unwrap();
            self.saves.lock().unwrap().push((
                id.as_str().to_owned(),
                meta.clone(),
                payload,
                size,
                expires_at,
            ));
            Ok(())
        }

        fn consume(&self, _id: &SecretId) -> Result<Consumed, Error> {
            Err(Error::NotFound)
        }

        fn delete_expired(&self, _t: i64) -> Result<usize, Error> {
            Ok(0)
        }

        fn reconcile(&self) -> Result<(), Error> {
            Ok(())
        }
    }

    fn make_service(store: Arc<RecordingStore>, metrics: Arc<InMemoryMetrics>) -> Service {
        Service {
            store,
            clock: Arc::new(ManualClock::new(1_000)),
            max_bytes: 1024,
            min_ttl: Duration::from_secs(60),
            max_ttl: Duration::from_secs(3_600),
            metrics: Some(metrics),
        }
    }

    #[test]
    fn create_mints_id_and_computes_expiry() {
        let store = Arc::new(RecordingStore::default());
        let metrics = Arc::new(InMemoryMetrics::default());
        let svc = make_service(store.clone(), metrics.clone());

        let (id, expires_at) = svc
            .create_secret(&mut Cursor::new(&b"payload"[..]), 7, 2, "n1", Duration::from_secs(300))
            .unwrap();

        assert!(id::is_valid_id(id.as_str()));
        assert_eq!(expires_at, 1_300);

        let saves = store.saves.lock().unwrap();
        assert_eq!(saves.len(), 1);
        let (saved_id, meta, payload, size, saved_expiry) = &saves[0];
        assert_eq!(saved_id, id.as_str());
        assert_eq!(meta.version, 2);
        assert_eq!(meta.nonce_b64u, "n1");
        assert_eq!(payload, b"payload");
        assert_eq!(*size, 7);
        assert_eq!(*saved_expiry, 1_300);

        assert_eq!(metrics.counter(metrics::SECRETS_CREATED), 1);
    }

    #[test]
    fn ttl_bounds_are_inclusive() {
        let store = Arc::new(RecordingStore::default());
        let metrics = Arc::new(InMemoryMetrics::default());
        let svc = make_service(store, metrics);

        let try_ttl = |secs: u64| {
            svc.create_secret(
                &mut Cursor::new(&b"x"[..]),
                1,
                1,
                "n",
                Duration::from_secs(secs),
            )
        };

        assert!(matches!(try_ttl(0), Err(Error::TtlInvalid)));
        assert!(matches!(try_ttl(59), Err(Error::TtlInvalid)));
        assert!(try_ttl(60).is_ok());
        assert!(try_ttl(3_600).is_ok());
        assert!(matches!(try_ttl(3_601), Err(Error::TtlInvalid)));
    }

    #[test]
    fn unbounded_ttl_when_limits_are_zero() {
        let store = Arc::new(RecordingStore::default());
        let svc = Service {
            store,
            clock: Arc::new(ManualClock::new(0)),
            max_bytes: 1024,
            min_ttl: Duration::ZERO,
            max_ttl: Duration::ZERO,
            metrics: None,
        };
        assert!(svc
            .create_secret(
                &mut Cursor::new(&b"x"[..]),
                1,
                1,
                "n",
                Duration::from_secs(86_400 * 365),
            )
            .is_ok());
    }

    #[test]
    fn size_bounds() {
        let store = Arc::new(RecordingStore::default());
        let metrics = Arc::new(InMemoryMetrics::default());
        let svc = make_service(store, metrics.clone());

        let try_size = |size: u64| {
            let payload = vec![0u8; size as usize];
            svc.create_secret(
                &mut Cursor::new(payload),
                size,
                1,
                "n",
                Duration::from_secs(300),
            )
        };

        assert!(matches!(try_size(0), Err(Error::SizeExceeded)));
        assert!(try_size(1024).is_ok());
        assert!(matches!(try_size(1025), Err(Error::SizeExceeded)));
        // Validation failures never reach the store, so only the two
        // accepted sizes counted.
        assert_eq!(metrics.counter(metrics::SECRETS_CREATED), 2);
    }

    #[test]
    fn store_failure_surfaces_and_skips_metric() {
        let store = Arc::new(RecordingStore {
            fail_save: true,
            ..Default::default()
        });
        let metrics = Arc::new(InMemoryMetrics::default());
        let svc = make_service(store, metrics.clone());

        let err = svc
            .create_secret(&mut Cursor::new(&b"x"[..]), 1, 1, "n", Duration::from_secs(300))
            .unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
        assert_eq!(metrics.counter(metrics::SECRETS_CREATED), 0);
    }

    #[test]
    fn consume_rejects_malformed_id_before_store() {
        let store = Arc::new(RecordingStore::default());
        let metrics = Arc::new(InMemoryMetrics::default());
        let svc = make_service(store, metrics.clone());

        assert!(matches!(svc.consume("not-an-id"), Err(Error::InvalidId)));
        assert!(matches!(
            svc.consume("0123456789ABCDEF0123456789ABCDEF"),
            Err(Error::InvalidId)
        ));
        // Well-formed but absent: NotFound from the store, no metric.
        assert!(matches!(
            svc.consume("0123456789abcdef0123456789abcdef"),
            Err(Error::NotFound)
        ));
        assert_eq!(metrics.counter(metrics::SECRETS_CONSUMED), 0);
    }
}
