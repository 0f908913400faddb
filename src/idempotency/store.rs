use crate::config::IdempotencyConfig;
use crate::idempotency::Reservation;
use crate::storage::{self, SharedStorage, Storage, StorageResult};
use chrono::{Duration, Utc};
use tracing::debug;

/// Fingerprint reservations backed by the shared database
///
/// The unique index on the fingerprint column is the only synchronization:
/// reservation is a single `INSERT OR IGNORE` inside an immediate
/// transaction, so exactly one concurrent caller wins.
#[derive(Clone)]
pub struct IdempotencyStore {
    storage: SharedStorage,
    ttl: Option<Duration>,
}

impl IdempotencyStore {
    pub fn new(storage: SharedStorage, config: &IdempotencyConfig) -> Self {
        let ttl = match config.fingerprint_ttl_hours {
            0 => None,
            hours => Some(Duration::hours(hours as i64)),
        };
        Self { storage, ttl }
    }

    /// Reserves `fingerprint` for `job_id`, or reports its current owner
    pub fn check_and_reserve(&self, fingerprint: &str, job_id: &str) -> StorageResult<Reservation> {
        let reservation = storage::lock(&self.storage)?.reserve_fingerprint(
            fingerprint,
            job_id,
            Utc::now(),
            self.ttl,
        )?;

        if let Reservation::AlreadyProcessed { owner } = &reservation {
            debug!(job_id, owner = %owner, "Fingerprint already claimed");
        }

        Ok(reservation)
    }

    /// Marks a reservation as durably processed
    pub fn mark_processed(&self, fingerprint: &str, job_id: &str) -> StorageResult<()> {
        storage::lock(&self.storage)?.mark_fingerprint_processed(fingerprint, job_id, Utc::now())
    }

    /// Gives up a reservation so the payload can be processed again
    pub fn release(&self, fingerprint: &str, job_id: &str) -> StorageResult<()> {
        storage::lock(&self.storage)?.release_fingerprint(fingerprint, job_id)
    }

    /// Deletes processed fingerprints older than the TTL
    pub fn purge_expired(&self) -> StorageResult<u64> {
        match self.ttl {
            Some(ttl) => storage::lock(&self.storage)?.purge_fingerprints(Utc::now() - ttl),
            None => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteStorage;
    use std::sync::{Arc, Barrier};
    use std::thread;

    fn create_test_store(ttl_hours: u64) -> IdempotencyStore {
        let storage = storage::shared(SqliteStorage::new_in_memory().unwrap());
        IdempotencyStore::new(
            storage,
            &IdempotencyConfig {
                fingerprint_ttl_hours: ttl_hours,
            },
        )
    }

    #[test]
    fn test_first_caller_reserves() {
        let store = create_test_store(24);
        assert_eq!(
            store.check_and_reserve("fp", "job-a").unwrap(),
            Reservation::Reserved
        );
        assert_eq!(
            store.check_and_reserve("fp", "job-b").unwrap(),
            Reservation::AlreadyProcessed {
                owner: "job-a".to_string()
            }
        );
    }

    #[test]
    fn test_owner_reserves_again() {
        let store = create_test_store(24);
        store.check_and_reserve("fp", "job-a").unwrap();
        assert_eq!(
            store.check_and_reserve("fp", "job-a").unwrap(),
            Reservation::Reserved
        );
    }

    #[test]
    fn test_release_frees_fingerprint() {
        let store = create_test_store(24);
        store.check_and_reserve("fp", "job-a").unwrap();
        store.release("fp", "job-a").unwrap();
        assert_eq!(
            store.check_and_reserve("fp", "job-b").unwrap(),
            Reservation::Reserved
        );
    }

    #[test]
    fn test_release_by_non_owner_is_ignored() {
        let store = create_test_store(24);
        store.check_and_reserve("fp", "job-a").unwrap();
        store.release("fp", "job-b").unwrap();
        assert!(matches!(
            store.check_and_reserve("fp", "job-c").unwrap(),
            Reservation::AlreadyProcessed { .. }
        ));
    }

    #[test]
    fn test_processed_blocks_duplicates() {
        let store = create_test_store(0);
        store.check_and_reserve("fp", "job-a").unwrap();
        store.mark_processed("fp", "job-a").unwrap();

        assert!(matches!(
            store.check_and_reserve("fp", "job-b").unwrap(),
            Reservation::AlreadyProcessed { .. }
        ));
        assert_eq!(store.purge_expired().unwrap(), 0);
    }

    #[test]
    fn test_concurrent_reservation_single_winner() {
        let store = create_test_store(24);
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    store
                        .check_and_reserve("shared-fp", &format!("job-{}", i))
                        .unwrap()
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|r| *r == Reservation::Reserved)
            .count();
        assert_eq!(winners, 1);
    }
}
