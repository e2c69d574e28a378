use parking_lot::RwLock;
use std::{
    collections::{hash_map::DefaultHasher, HashMap},
    hash::{Hash, Hasher},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use crate::{
    endpoint::{Grouping, RecordKey},
    stats::{Accumulator, Stats},
};

pub const DEFAULT_SHARDS: usize = 16;

#[derive(Debug)]
struct Entry {
    seq: u64,
    stats: Accumulator,
}

/// Concurrent mapping from [`RecordKey`] to accumulated [`Stats`].
///
/// Keys are spread over independently locked shards. Recording on a key that
/// already exists only takes a shard read lock; the merge itself is atomic.
#[derive(Debug)]
pub struct CallStore {
    shards: Box<[RwLock<HashMap<RecordKey, Arc<Entry>>>]>,
    seq: AtomicU64,
}

impl CallStore {
    pub fn new() -> Self {
        Self::with_shards(DEFAULT_SHARDS)
    }

    pub fn with_shards(shards: usize) -> Self {
        let shards = (0..shards.max(1))
            .map(|_| RwLock::new(HashMap::new()))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            shards,
            seq: AtomicU64::new(0),
        }
    }

    fn shard(&self, key: &RecordKey) -> &RwLock<HashMap<RecordKey, Arc<Entry>>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let index = (hasher.finish() % self.shards.len() as u64) as usize;

        &self.shards[index]
    }

    pub fn record(&self, key: RecordKey, delta: &Stats) {
        let shard = self.shard(&key);

        if let Some(entry) = shard.read().get(&key) {
            entry.stats.accumulate(delta);
            return;
        }

        let entry = {
            let mut data = shard.write();
            data.entry(key)
                .or_insert_with(|| {
                    Arc::new(Entry {
                        seq: self.seq.fetch_add(1, Ordering::Relaxed),
                        stats: Accumulator::new(),
                    })
                })
                .clone()
        };

        entry.stats.accumulate(delta);
    }

    fn entries(&self) -> Vec<(RecordKey, Arc<Entry>)> {
        let mut entries = self
            .shards
            .iter()
            .flat_map(|shard| {
                shard
                    .read()
                    .iter()
                    .map(|(key, entry)| (key.clone(), entry.clone()))
                    .collect::<Vec<_>>()
            })
            .collect::<Vec<_>>();

        entries.sort_by_key(|(_, entry)| entry.seq);
        entries
    }

    /// Independent copy of the matching entries, in insertion order.
    pub fn snapshot<F>(&self, filter: F, grouping: &Grouping) -> Snapshot
    where
        F: Fn(&RecordKey) -> bool,
    {
        let mut snapshot = Snapshot::default();

        for (key, entry) in self.entries() {
            if !filter(&key) {
                continue;
            }

            snapshot.merge(key.coarsen(grouping), &entry.stats.load());
        }

        snapshot
    }

    /// Current stats of every key, used as the starting point of a diff.
    pub fn baseline(&self) -> HashMap<RecordKey, Stats> {
        self.shards
            .iter()
            .flat_map(|shard| {
                shard
                    .read()
                    .iter()
                    .map(|(key, entry)| (key.clone(), entry.stats.load()))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    pub fn get(&self, key: &RecordKey) -> Option<Stats> {
        self.shard(key).read().get(key).map(|entry| entry.stats.load())
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|shard| shard.read().is_empty())
    }

    pub fn reset(&self) {
        for shard in self.shards.iter() {
            shard.write().clear();
        }

        tracing::debug!("call store reset");
    }
}

impl Default for CallStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Insertion-ordered copy of store entries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    entries: Vec<(RecordKey, Stats)>,
    index: HashMap<RecordKey, usize>,
}

impl Snapshot {
    /// Adds `stats` to `key`, appending the key if it is new.
    pub fn merge(&mut self, key: RecordKey, stats: &Stats) {
        match self.index.get(&key) {
            Some(position) => self.entries[*position].1.accumulate(stats),
            None => {
                self.index.insert(key.clone(), self.entries.len());
                self.entries.push((key, *stats));
            }
        }
    }

    pub fn get(&self, key: &RecordKey) -> Option<&Stats> {
        self.index.get(key).map(|position| &self.entries[*position].1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&RecordKey, &Stats)> {
        self.entries.iter().map(|(key, stats)| (key, stats))
    }

    pub fn keys(&self) -> impl Iterator<Item = &RecordKey> {
        self.entries.iter().map(|(key, _)| key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total(&self) -> Stats {
        self.entries.iter().fold(Stats::default(), |mut total, (_, stats)| {
            total.accumulate(stats);
            total
        })
    }
}

impl IntoIterator for Snapshot {
    type Item = (RecordKey, Stats);
    type IntoIter = std::vec::IntoIter<(RecordKey, Stats)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}
