use crate::sync::batch::{BatchId, HeaderSyncBatch};
use std::collections::{BTreeMap, HashMap};

/// Batches waiting for a header at a given number to be connected.
///
/// Keyed by the missing parent's number. A batch sits in at most one bucket;
/// parking it again moves it.
#[derive(Debug)]
pub struct HeaderDependencyIndex {
    buckets: BTreeMap<u64, Vec<HeaderSyncBatch>>,
    location: HashMap<BatchId, u64>,
    capacity: usize,
}

impl HeaderDependencyIndex {
    pub fn new(capacity: usize) -> Self {
        Self {
            buckets: BTreeMap::new(),
            location: HashMap::new(),
            capacity,
        }
    }

    /// Park `batch` under `number`. Hands the batch back when the index is
    /// full.
    pub fn park(&mut self, number: u64, batch: HeaderSyncBatch) -> Result<(), HeaderSyncBatch> {
        if let Some(previous) = self.location.get(&batch.id).copied() {
            self.unpark(previous, batch.id);
        } else if self.location.len() >= self.capacity {
            return Err(batch);
        }

        self.location.insert(batch.id, number);
        self.buckets.entry(number).or_default().push(batch);
        Ok(())
    }

    /// Remove and return every batch waiting on `number`, in parking order.
    pub fn take(&mut self, number: u64) -> Vec<HeaderSyncBatch> {
        let batches = self.buckets.remove(&number).unwrap_or_default();
        for batch in &batches {
            self.location.remove(&batch.id);
        }
        batches
    }

    /// Bucket keys in ascending order.
    pub fn keys(&self) -> Vec<u64> {
        self.buckets.keys().copied().collect()
    }

    /// The lowest missing parent number, if anything is parked.
    pub fn lowest_key(&self) -> Option<u64> {
        self.buckets.keys().next().copied()
    }

    pub fn bucket_of(&self, id: BatchId) -> Option<u64> {
        self.location.get(&id).copied()
    }

    pub fn contains_key(&self, number: u64) -> bool {
        self.buckets.contains_key(&number)
    }

    /// Number of parked batches across all buckets.
    pub fn len(&self) -> usize {
        self.location.len()
    }

    pub fn is_empty(&self) -> bool {
        self.location.is_empty()
    }

    fn unpark(&mut self, number: u64, id: BatchId) {
        if let Some(bucket) = self.buckets.get_mut(&number) {
            bucket.retain(|b| b.id != id);
            if bucket.is_empty() {
                self.buckets.remove(&number);
            }
        }
        self.location.remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(id: u64, start: u64) -> HeaderSyncBatch {
        HeaderSyncBatch::new(BatchId(id), start, 10)
    }

    #[test]
    fn test_take_returns_in_parking_order() {
        let mut index = HeaderDependencyIndex::new(16);
        index.park(9, batch(1, 10)).unwrap();
        index.park(9, batch(2, 10)).unwrap();
        index.park(19, batch(3, 20)).unwrap();

        assert_eq!(index.keys(), vec![9, 19]);
        assert_eq!(index.lowest_key(), Some(9));
        let taken: Vec<_> = index.take(9).into_iter().map(|b| b.id).collect();
        assert_eq!(taken, vec![BatchId(1), BatchId(2)]);
        assert!(!index.contains_key(9));
        assert_eq!(index.len(), 1);
        assert!(index.take(9).is_empty());
        assert_eq!(index.lowest_key(), Some(19));
    }

    #[test]
    fn test_reparking_moves_batch() {
        let mut index = HeaderDependencyIndex::new(16);
        index.park(20, batch(1, 21)).unwrap();
        index.park(5, batch(1, 6)).unwrap();

        assert_eq!(index.len(), 1);
        assert_eq!(index.bucket_of(BatchId(1)), Some(5));
        assert_eq!(index.keys(), vec![5]);
    }

    #[test]
    fn test_full_index_hands_batch_back() {
        let mut index = HeaderDependencyIndex::new(1);
        index.park(1, batch(1, 2)).unwrap();
        let rejected = index.park(2, batch(2, 3)).unwrap_err();
        assert_eq!(rejected.id, BatchId(2));
        assert_eq!(index.len(), 1);
    }
}
