//! Bounded in-memory sample buffers
//!
//! ## Layout
//!
//! A [`RingStore`] holds one [`RingBuffer`] per key (e.g. `(entity, kind)` for
//! metrics, `entity` for logs). Each buffer sits behind its own mutex, so two
//! producers only contend when they write the same key.
//!
//! ## Dirty tracking
//!
//! Every pushed sample gets a per-buffer sequence number. `synced_through` marks
//! the first sequence that has not been confirmed durable yet:
//!
//! ```text
//!   seq:   10 11 12 13 14 15
//!          [ synced  ][dirty]
//!                      ^ synced_through = 13
//! ```
//!
//! Durable sync copies the dirty tail out with [`RingStore::take_unsynced`] and
//! only advances `synced_through` once the write succeeded, so a failed flush
//! simply sees the same samples again on the next tick.

use std::collections::VecDeque;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::samples::Sample;

/// Fixed-capacity FIFO of samples with sync bookkeeping
#[derive(Debug)]
pub struct RingBuffer<T> {
    capacity: usize,
    entries: VecDeque<(u64, T)>,
    next_seq: u64,
    synced_through: u64,
    /// Newest timestamp that has left the buffer (evicted or pruned)
    truncated_at: Option<DateTime<Utc>>,
    /// Samples that left the buffer before they were ever flushed
    lost_unsynced: u64,
}

impl<T: Sample> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity.min(1024)),
            next_seq: 0,
            synced_through: 0,
            truncated_at: None,
            lost_unsynced: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append a sample, evicting (and returning) the oldest one when full
    pub fn push(&mut self, sample: T) -> Option<T> {
        let evicted = if self.entries.len() >= self.capacity {
            self.entries.pop_front().map(|(seq, old)| {
                self.note_removed(seq, &old);
                old
            })
        } else {
            None
        };

        self.entries.push_back((self.next_seq, sample));
        self.next_seq += 1;
        evicted
    }

    fn note_removed(&mut self, seq: u64, sample: &T) {
        if seq >= self.synced_through {
            self.lost_unsynced += 1;
        }
        let ts = sample.timestamp();
        if self.truncated_at.is_none_or(|t| ts > t) {
            self.truncated_at = Some(ts);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter().map(|(_, sample)| sample)
    }

    pub fn latest(&self) -> Option<&T> {
        self.entries.back().map(|(_, sample)| sample)
    }

    /// Samples at or after `since`, ascending by timestamp
    pub fn since(&self, since: DateTime<Utc>) -> Vec<T> {
        let mut samples: Vec<T> = self
            .iter()
            .filter(|sample| sample.timestamp() >= since)
            .cloned()
            .collect();
        // producers stamp before taking the lock, so neighbours may be swapped
        samples.sort_by_key(|sample| sample.timestamp());
        samples
    }

    /// Copy of every sample not yet confirmed durable, plus the sequence to
    /// pass to [`RingBuffer::mark_synced`] once the copy has been written.
    pub fn unsynced(&self) -> Option<(Vec<T>, u64)> {
        if self.next_seq <= self.synced_through {
            return None;
        }
        let pending: Vec<T> = self
            .entries
            .iter()
            .filter(|(seq, _)| *seq >= self.synced_through)
            .map(|(_, sample)| sample.clone())
            .collect();
        Some((pending, self.next_seq))
    }

    pub fn mark_synced(&mut self, through: u64) {
        self.synced_through = self.synced_through.max(through);
    }

    pub fn has_unsynced(&self) -> bool {
        self.next_seq > self.synced_through
    }

    /// Drop samples older than `cutoff`, returning how many were removed
    pub fn prune_before(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        let mut kept = VecDeque::with_capacity(before);
        for (seq, sample) in std::mem::take(&mut self.entries) {
            if sample.timestamp() < cutoff {
                self.note_removed(seq, &sample);
            } else {
                kept.push_back((seq, sample));
            }
        }
        self.entries = kept;
        before - self.entries.len()
    }

    pub fn truncated_at(&self) -> Option<DateTime<Utc>> {
        self.truncated_at
    }

    pub fn lost_unsynced(&self) -> u64 {
        self.lost_unsynced
    }
}

/// Samples read from one buffer for a query window
#[derive(Debug, Clone)]
pub struct Window<T> {
    pub samples: Vec<T>,
    /// Set when older samples have left memory, i.e. the window may be incomplete
    pub truncated_at: Option<DateTime<Utc>>,
}

/// Dirty samples copied out of one buffer for flushing
#[derive(Debug, Clone)]
pub struct PendingBatch<K, T> {
    pub key: K,
    pub samples: Vec<T>,
    pub through: u64,
}

/// Keyed collection of ring buffers with per-key locking
#[derive(Debug)]
pub struct RingStore<K, T>
where
    K: Eq + Hash,
{
    capacity: usize,
    buffers: DashMap<K, Arc<Mutex<RingBuffer<T>>>>,
    /// `lost_unsynced` of buffers dropped after being pruned empty
    retired_lost: AtomicU64,
}

impl<K, T> RingStore<K, T>
where
    K: Eq + Hash + Clone,
    T: Sample,
{
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            buffers: DashMap::new(),
            retired_lost: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn buffer(&self, key: &K) -> Arc<Mutex<RingBuffer<T>>> {
        if let Some(existing) = self.buffers.get(key) {
            return Arc::clone(existing.value());
        }
        let entry = self
            .buffers
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(RingBuffer::new(self.capacity))));
        Arc::clone(entry.value())
    }

    fn existing(&self, key: &K) -> Option<Arc<Mutex<RingBuffer<T>>>> {
        self.buffers.get(key).map(|entry| Arc::clone(entry.value()))
    }

    /// Snapshot of all buffers so no map shard lock is held while locking one
    fn all(&self) -> Vec<(K, Arc<Mutex<RingBuffer<T>>>)> {
        self.buffers
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect()
    }

    /// Append a sample to the buffer for `key`
    ///
    /// The map guard stays held across the push so `prune_before` cannot
    /// drop the buffer in between.
    pub fn record(&self, key: K, sample: T) -> Option<T> {
        if let Some(entry) = self.buffers.get(&key) {
            return entry.value().lock().push(sample);
        }
        let entry = self
            .buffers
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(RingBuffer::new(self.capacity))));
        let evicted = entry.value().lock().push(sample);
        evicted
    }

    /// Re-seed a buffer with samples that are already durable
    pub fn restore(&self, key: K, samples: impl IntoIterator<Item = T>) {
        let buffer = self.buffer(&key);
        let mut buffer = buffer.lock();
        for sample in samples {
            buffer.push(sample);
        }
        let through = buffer.next_seq;
        buffer.mark_synced(through);
    }

    /// Samples for `key` at or after `since`; `None` if the key was never recorded
    pub fn query(&self, key: &K, since: DateTime<Utc>) -> Option<Window<T>> {
        let buffer = self.existing(key)?;
        let buffer = buffer.lock();
        Some(Window {
            samples: buffer.since(since),
            truncated_at: buffer.truncated_at(),
        })
    }

    pub fn latest(&self, key: &K) -> Option<T> {
        let buffer = self.existing(key)?;
        let buffer = buffer.lock();
        buffer.latest().cloned()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.buffers.contains_key(key)
    }

    pub fn keys(&self) -> Vec<K> {
        self.buffers.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len_of(&self, key: &K) -> usize {
        self.existing(key).map(|buffer| buffer.lock().len()).unwrap_or(0)
    }

    /// Total samples held across all keys
    pub fn total_len(&self) -> usize {
        self.all().iter().map(|(_, buffer)| buffer.lock().len()).sum()
    }

    pub fn has_unsynced(&self) -> bool {
        self.all().iter().any(|(_, buffer)| buffer.lock().has_unsynced())
    }

    /// Copy the dirty tail of every buffer
    pub fn take_unsynced(&self) -> Vec<PendingBatch<K, T>> {
        self.all()
            .into_iter()
            .filter_map(|(key, buffer)| {
                let buffer = buffer.lock();
                buffer.unsynced().map(|(samples, through)| PendingBatch {
                    key,
                    samples,
                    through,
                })
            })
            .collect()
    }

    pub fn mark_synced(&self, key: &K, through: u64) {
        if let Some(buffer) = self.existing(key) {
            buffer.lock().mark_synced(through);
        }
    }

    /// Samples that were evicted or pruned before ever being flushed
    pub fn lost_unsynced(&self) -> u64 {
        let live: u64 = self.all().iter().map(|(_, buffer)| buffer.lock().lost_unsynced()).sum();
        live + self.retired_lost.load(Ordering::Relaxed)
    }

    /// Drop samples older than `cutoff` from every buffer; keys left empty are removed
    pub fn prune_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut pruned = 0;
        for (key, buffer) in self.all() {
            let removed = buffer.lock().prune_before(cutoff);
            pruned += removed;
            if removed == 0 {
                continue;
            }
            let dropped = self.buffers.remove_if(&key, |_, buffer| buffer.lock().is_empty());
            if let Some((_, buffer)) = dropped {
                self.retired_lost
                    .fetch_add(buffer.lock().lost_unsynced(), Ordering::Relaxed);
            }
        }
        pruned
    }
}
