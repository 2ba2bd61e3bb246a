use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::record::CourseKey;

/// Outcome of [`CourseRegistry::create`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// This call assigned the id; the caller is responsible for the course.
    Created(u32),
    /// Another caller already registered the key.
    Existing(u32),
}

impl Registration {
    pub fn id(self) -> u32 {
        match self {
            Registration::Created(id) | Registration::Existing(id) => id,
        }
    }
}

#[derive(Debug)]
struct Courses {
    next_id: u32,
    ids: HashMap<CourseKey, u32>,
}

impl Default for Courses {
    fn default() -> Self {
        Self {
            next_id: 1,
            ids: HashMap::new(),
        }
    }
}

/// Process-wide mapping from (subject, number) to course id, shared by all
/// workers. Ids only grow and a key is never assigned twice.
#[derive(Debug, Default)]
pub struct CourseRegistry {
    inner: Mutex<Courses>,
}

impl CourseRegistry {
    /// Restore from persisted courses. The next id continues after the
    /// largest id seen.
    pub fn seeded(known: impl IntoIterator<Item = (CourseKey, u32)>) -> Self {
        let mut courses = Courses::default();
        for (key, id) in known {
            courses.next_id = courses.next_id.max(id.saturating_add(1));
            courses.ids.insert(key, id);
        }
        Self {
            inner: Mutex::new(courses),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Courses> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn resolve(&self, key: &CourseKey) -> Option<u32> {
        self.lock().ids.get(key).copied()
    }

    /// Assign the next id to `key`, or report the id a previous caller got.
    pub fn create(&self, key: CourseKey) -> Registration {
        let mut courses = self.lock();
        if let Some(&id) = courses.ids.get(&key) {
            return Registration::Existing(id);
        }
        let id = courses.next_id;
        courses.next_id += 1;
        courses.ids.insert(key, id);
        Registration::Created(id)
    }

    pub fn len(&self) -> usize {
        self.lock().ids.len()
    }

    pub fn next_id(&self) -> u32 {
        self.lock().next_id
    }
}

/// Why a row identifier is already in the [`SectionLedger`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Seen {
    /// On disk before this run started.
    Persisted,
    /// Handed to the sink earlier in this run.
    Emitted,
}

/// Row identifiers that must not be emitted again: everything already on
/// disk at startup plus everything handed to the sink during this run.
#[derive(Debug, Default)]
pub struct SectionLedger {
    seen: Mutex<HashMap<u64, Seen>>,
}

impl SectionLedger {
    pub fn seeded(persisted: impl IntoIterator<Item = u64>) -> Self {
        Self {
            seen: Mutex::new(persisted.into_iter().map(|id| (id, Seen::Persisted)).collect()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, Seen>> {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn status(&self, data_id: u64) -> Option<Seen> {
        self.lock().get(&data_id).copied()
    }

    /// Returns false if the id was already recorded.
    pub fn record(&self, data_id: u64) -> bool {
        let mut seen = self.lock();
        if seen.contains_key(&data_id) {
            return false;
        }
        seen.insert(data_id, Seen::Emitted);
        true
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;

    use super::*;

    fn key(n: usize) -> CourseKey {
        CourseKey::new("CMPT", format!("{}", 100 + n))
    }

    #[test]
    fn create_then_resolve() {
        let registry = CourseRegistry::default();
        assert_eq!(registry.resolve(&key(1)), None);
        assert_eq!(registry.create(key(1)), Registration::Created(1));
        assert_eq!(registry.create(key(2)), Registration::Created(2));
        assert_eq!(registry.create(key(1)), Registration::Existing(1));
        assert_eq!(registry.resolve(&key(2)), Some(2));
    }

    #[test]
    fn seed_continues_after_max_id() {
        let registry = CourseRegistry::seeded([(key(1), 4), (key(2), 9), (key(3), 2)]);
        assert_eq!(registry.next_id(), 10);
        assert_eq!(registry.create(key(2)), Registration::Existing(9));
        assert_eq!(registry.create(key(4)), Registration::Created(10));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_creates_assign_one_id_per_key() {
        const DISTINCT: usize = 40;
        const REPEATS: usize = 8;
        let registry = Arc::new(CourseRegistry::default());

        let mut handles = Vec::new();
        for worker in 0..REPEATS {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                let mut seen = Vec::new();
                for n in 0..DISTINCT {
                    // Each worker walks the keys in a different order.
                    let k = key((n + worker * 7) % DISTINCT);
                    let id = registry.create(k.clone()).id();
                    tokio::task::yield_now().await;
                    assert_eq!(registry.resolve(&k), Some(id));
                    seen.push((k, id));
                }
                seen
            }));
        }

        let mut by_key: HashMap<CourseKey, u32> = HashMap::new();
        for handle in handles {
            for (k, id) in handle.await.unwrap() {
                let first = *by_key.entry(k).or_insert(id);
                assert_eq!(first, id);
            }
        }

        let ids: BTreeSet<u32> = by_key.values().copied().collect();
        assert_eq!(by_key.len(), DISTINCT);
        assert_eq!(ids, (1..=DISTINCT as u32).collect());
        assert_eq!(registry.len(), DISTINCT);
    }

    #[test]
    fn ledger_records_once() {
        let ledger = SectionLedger::seeded([10, 11]);
        assert_eq!(ledger.status(10), Some(Seen::Persisted));
        assert_eq!(ledger.status(12), None);
        assert!(!ledger.record(11));
        assert!(ledger.record(12));
        assert!(!ledger.record(12));
        assert_eq!(ledger.status(11), Some(Seen::Persisted));
        assert_eq!(ledger.status(12), Some(Seen::Emitted));
        assert_eq!(ledger.len(), 3);
    }
}
