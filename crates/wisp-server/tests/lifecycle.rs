//! End-to-end lifecycle suite: create/consume round trips, placement,
//! expiry, reconciliation, and the one-time-delivery property under
//! concurrency. Time is driven by a manual clock throughout.

use std::io::{Cursor, Read};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use wisp_server::clock::Clock;

use wisp_server::clock::ManualClock;
use wisp_server::error::Error;
use wisp_server::id::SecretId;
use wisp_server::metrics::{self, InMemoryMetrics};
use wisp_server::service::Service;
use wisp_server::store::{Consumed, FsBlobStore, Meta, RedbIndex, SecretStore, Store};

const T0: i64 = 1_700_000_000;

struct Harness {
    service: Service,
    store: Arc<dyn SecretStore>,
    clock: Arc<ManualClock>,
    metrics: Arc<InMemoryMetrics>,
    blob_dir: PathBuf,
    _dir: tempfile::TempDir,
}

fn harness(inline_max: u64) -> Harness {
    harness_with_min_age(inline_max, Duration::ZERO)
}

fn harness_with_min_age(inline_max: u64, blob_min_age: Duration) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let blob_dir = dir.path().join("blobs");
    std::fs::create_dir(&blob_dir).unwrap();

    let clock = Arc::new(ManualClock::new(T0));
    let index = Arc::new(RedbIndex::open(&dir.path().join("wisp.db")).unwrap());
    let blobs = Arc::new(FsBlobStore::new(&blob_dir, blob_min_age).unwrap());
    let store: Arc<dyn SecretStore> =
        Arc::new(Store::new(index, blobs, clock.clone(), inline_max));
    let metrics = Arc::new(InMemoryMetrics::default());

    let service = Service {
        store: store.clone(),
        clock: clock.clone(),
        max_bytes: 1024 * 1024,
        min_ttl: Duration::from_secs(60),
        max_ttl: Duration::from_secs(86_400),
        metrics: Some(metrics.clone()),
    };

    Harness {
        service,
        store,
        clock,
        metrics,
        blob_dir,
        _dir: dir,
    }
}

impl Harness {
    fn create(&self, payload: &[u8], version: u8, nonce: &str, ttl_secs: u64) -> (SecretId, i64) {
        self.service
            .create_secret(
                &mut Cursor::new(payload),
                payload.len() as u64,
                version,
                nonce,
                Duration::from_secs(ttl_secs),
            )
            .unwrap()
    }

    fn blob_path(&self, id: &SecretId) -> PathBuf {
        self.blob_dir.join(format!("{id}.blob"))
    }
}

fn read_all(consumed: &mut Consumed) -> Vec<u8> {
    let mut buf = Vec::new();
    consumed.reader.read_to_end(&mut buf).unwrap();
    buf
}

// ── S1: inline create + consume ───────────────────────────────────────────────

#[test]
fn inline_create_consume_once() {
    let h = harness(64);
    let (id, expires_at) = h.create(b"hello-inline", 1, "n1", 300);
    assert_eq!(expires_at, T0 + 300);
    assert!(!h.blob_path(&id).exists());

    let mut consumed = h.service.consume(id.as_str()).unwrap();
    assert_eq!(consumed.meta.version, 1);
    assert_eq!(consumed.meta.nonce_b64u, "n1");
    assert_eq!(consumed.size, 12);
    assert_eq!(read_all(&mut consumed), b"hello-inline");

    assert!(matches!(
        h.service.consume(id.as_str()),
        Err(Error::NotFound)
    ));
    assert_eq!(h.metrics.counter(metrics::SECRETS_CREATED), 1);
    assert_eq!(h.metrics.counter(metrics::SECRETS_CONSUMED), 1);
}

// ── S2: external create + consume ─────────────────────────────────────────────

#[test]
fn external_create_consume_deletes_blob() {
    let h = harness(4);
    let (id, _) = h.create(b"this-is-external-data", 2, "n2", 600);

    // The blob is on disk the moment save returns.
    assert!(h.blob_path(&id).exists());

    let mut consumed = h.service.consume(id.as_str()).unwrap();
    assert_eq!(consumed.meta.version, 2);
    assert_eq!(consumed.size, 21);
    assert_eq!(read_all(&mut consumed), b"this-is-external-data");

    // Closing (dropping) the reader removes the blob file.
    drop(consumed);
    assert!(!h.blob_path(&id).exists());

    assert!(matches!(
        h.service.consume(id.as_str()),
        Err(Error::NotFound)
    ));
}

// ── S3: expired on read ───────────────────────────────────────────────────────

#[test]
fn expired_secret_is_not_found_and_row_is_gone() {
    let h = harness(64);

    // Insert directly with an expiry already in the past.
    let id = SecretId::new().unwrap();
    let meta = Meta {
        version: 1,
        nonce_b64u: "n3".into(),
    };
    h.store
        .save(&id, &meta, &mut Cursor::new(&b"stale"[..]), 5, T0 - 60)
        .unwrap();

    assert!(matches!(h.store.consume(&id), Err(Error::NotFound)));

    // The touch removed the row: even winding the clock back cannot
    // resurrect it.
    h.clock.set(T0 - 3_600);
    assert!(matches!(h.store.consume(&id), Err(Error::NotFound)));
}

// ── S4: bulk expiry with mixed storage ────────────────────────────────────────

#[test]
fn bulk_expiry_mixed_storage() {
    let h = harness(4);
    let (dead_ext, _) = h.create(b"external-and-doomed", 1, "n", 60);
    let (dead_inline, _) = h.create(b"tiny", 1, "n", 60);
    let (future, _) = h.create(b"tin2", 1, "n", 7_200);

    h.clock.advance(61);
    let n = h.store.delete_expired(h.clock.now()).unwrap();
    assert_eq!(n, 2);

    assert!(!h.blob_path(&dead_ext).exists());
    assert!(matches!(
        h.service.consume(dead_inline.as_str()),
        Err(Error::NotFound)
    ));

    let mut consumed = h.service.consume(future.as_str()).unwrap();
    assert_eq!(read_all(&mut consumed), b"tin2");
}

// ── S5: orphan reconciliation + freshness guard ───────────────────────────────

#[test]
fn reconcile_collects_orphans_after_freshness_guard() {
    let h = harness_with_min_age(4, Duration::from_millis(100));
    let (referenced, _) = h.create(b"external-referenced", 1, "n", 3_600);

    // A blob with no index row: exactly what a crash between blob write
    // and index insert leaves behind.
    let orphan = SecretId::new().unwrap();
    std::fs::write(h.blob_path(&orphan), b"orphan-bytes").unwrap();

    // Too young: the guard hides it from the scan.
    h.store.reconcile().unwrap();
    assert!(h.blob_path(&orphan).exists());

    std::thread::sleep(Duration::from_millis(150));
    h.store.reconcile().unwrap();
    assert!(!h.blob_path(&orphan).exists());
    assert!(h.blob_path(&referenced).exists());
}

// ── S6: concurrent consumers ──────────────────────────────────────────────────

fn concurrent_consume(h: &Harness, payload: &[u8]) {
    let (id, _) = h.create(payload, 1, "n", 3_600);

    let wins = AtomicUsize::new(0);
    let losses = AtomicUsize::new(0);
    std::thread::scope(|s| {
        for _ in 0..16 {
            let service = &h.service;
            let id = id.clone();
            let wins = &wins;
            let losses = &losses;
            let expected = payload.to_vec();
            s.spawn(move || match service.consume(id.as_str()) {
                Ok(mut consumed) => {
                    assert_eq!(read_all(&mut consumed), expected);
                    wins.fetch_add(1, Ordering::SeqCst);
                }
                Err(Error::NotFound) => {
                    losses.fetch_add(1, Ordering::SeqCst);
                }
                Err(e) => panic!("unexpected error: {e}"),
            });
        }
    });

    assert_eq!(wins.load(Ordering::SeqCst), 1);
    assert_eq!(losses.load(Ordering::SeqCst), 15);
    assert!(matches!(
        h.service.consume(id.as_str()),
        Err(Error::NotFound)
    ));
    assert!(!h.blob_path(&id).exists());
}

#[test]
fn concurrent_consumers_inline_exactly_one_wins() {
    let h = harness(64);
    concurrent_consume(&h, b"contested-inline");
}

#[test]
fn concurrent_consumers_external_exactly_one_wins() {
    let h = harness(4);
    concurrent_consume(&h, b"contested-external-payload");
}

// ── Round-trip fidelity across the placement boundary ─────────────────────────

#[test]
fn round_trip_fidelity_across_sizes() {
    let inline_max = 64u64;
    for size in [1usize, 63, 64, 65, 4096] {
        let h = harness(inline_max);
        let payload: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
        let (id, _) = h.create(&payload, 7, "round-trip", 600);

        let external = h.blob_path(&id).exists();
        assert_eq!(
            external,
            size as u64 > inline_max,
            "placement policy violated at size {size}"
        );

        let mut consumed = h.service.consume(id.as_str()).unwrap();
        assert_eq!(consumed.meta.version, 7);
        assert_eq!(consumed.meta.nonce_b64u, "round-trip");
        assert_eq!(consumed.size, size as u64);
        assert_eq!(read_all(&mut consumed), payload);
    }
}

// ── Expiry boundaries ─────────────────────────────────────────────────────────

#[test]
fn consume_at_exact_expiry_is_not_found() {
    let h = harness(64);
    let (id, expires_at) = h.create(b"boundary", 1, "n", 300);

    h.clock.set(expires_at);
    assert!(matches!(
        h.service.consume(id.as_str()),
        Err(Error::NotFound)
    ));
}

#[test]
fn consume_one_second_before_expiry_succeeds() {
    let h = harness(64);
    let (id, expires_at) = h.create(b"boundary", 1, "n", 300);

    h.clock.set(expires_at - 1);
    assert!(h.service.consume(id.as_str()).is_ok());
}

#[test]
fn sweep_retains_record_expiring_exactly_at_t() {
    let h = harness(64);
    let (id, expires_at) = h.create(b"edge", 1, "n", 300);

    let n = h.store.delete_expired(expires_at).unwrap();
    assert_eq!(n, 0);

    // Still consumable right up to the boundary.
    h.clock.set(expires_at - 1);
    assert!(h.service.consume(id.as_str()).is_ok());
}

// ── No resurrection after sweep ───────────────────────────────────────────────

#[test]
fn swept_secret_never_comes_back() {
    let h = harness(64);
    let (id, expires_at) = h.create(b"swept", 1, "n", 300);

    h.clock.set(expires_at + 1);
    assert_eq!(h.store.delete_expired(h.clock.now()).unwrap(), 1);

    h.clock.set(T0); // back within the original lifetime
    assert!(matches!(
        h.service.consume(id.as_str()),
        Err(Error::NotFound)
    ));
}

// ── Reconciliation convergence ────────────────────────────────────────────────

#[test]
fn reconcile_converges_to_referenced_blobs_only() {
    let h = harness(4);
    let (a, _) = h.create(b"external-aaaa", 1, "n", 3_600);
    let (b, _) = h.create(b"external-bbbb", 1, "n", 3_600);

    for _ in 0..3 {
        let orphan = SecretId::new().unwrap();
        std::fs::write(h.blob_path(&orphan), b"junk").unwrap();
    }

    h.store.reconcile().unwrap();
    h.store.reconcile().unwrap(); // idempotent

    let remaining: Vec<_> = std::fs::read_dir(&h.blob_dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect();
    assert_eq!(remaining.len(), 2);
    assert!(remaining.contains(&format!("{a}.blob")));
    assert!(remaining.contains(&format!("{b}.blob")));
}
