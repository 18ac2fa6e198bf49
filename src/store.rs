use std::collections::VecDeque;
use std::sync::Arc;
use tracing::debug;

use crate::config::DEFAULT_CAPACITY;
use crate::packet::Packet;

/// Bounded capture window. Always holds the most recent `capacity` packets
/// in arrival order, plus a weak (by id) selection into them.
pub struct CaptureStore {
    packets: VecDeque<Arc<Packet>>,
    capacity: usize,
    selected: Option<u64>,
    total_appended: u64,
    total_evicted: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoreStats {
    pub len: usize,
    pub capacity: usize,
    pub utilization_percent: u8,
    pub total_appended: u64,
    pub total_evicted: u64,
}

impl CaptureStore {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Panics on a zero capacity; `SessionConfig::validate` rejects it first.
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "capture store capacity must be non-zero");
        Self {
            packets: VecDeque::with_capacity(capacity),
            capacity,
            selected: None,
            total_appended: 0,
            total_evicted: 0,
        }
    }

    /// Add a packet at the tail, dropping the oldest ones past capacity.
    /// Returns how many packets were evicted.
    pub fn append(&mut self, packet: Arc<Packet>) -> usize {
        if let Some(last) = self.packets.back() {
            assert!(
                packet.id > last.id,
                "packet ids must increase: {} after {}",
                packet.id,
                last.id
            );
        }

        self.packets.push_back(packet);
        self.total_appended += 1;

        let mut evicted = 0;
        while self.packets.len() > self.capacity {
            if let Some(old) = self.packets.pop_front() {
                debug!("Evicted packet {} from capture window", old.id);
                evicted += 1;
            }
        }
        self.total_evicted += evicted as u64;
        evicted
    }

    /// Drop every packet and forget the selection.
    pub fn clear(&mut self) {
        self.packets.clear();
        self.selected = None;
    }

    /// Current contents, oldest first.
    pub fn snapshot(&self) -> Vec<Arc<Packet>> {
        self.packets.iter().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Packet>> {
        self.packets.iter()
    }

    /// Ids are strictly increasing, so lookups are a binary search.
    pub fn get(&self, id: u64) -> Option<Arc<Packet>> {
        self.packets
            .binary_search_by_key(&id, |p| p.id)
            .ok()
            .map(|index| self.packets[index].clone())
    }

    pub fn contains(&self, id: u64) -> bool {
        self.get(id).is_some()
    }

    pub fn latest(&self) -> Option<Arc<Packet>> {
        self.packets.back().cloned()
    }

    /// Record a selection when `id` is held; otherwise the selection becomes none.
    pub fn select(&mut self, id: u64) -> bool {
        self.selected = self.contains(id).then_some(id);
        self.selected.is_some()
    }

    pub fn deselect(&mut self) {
        self.selected = None;
    }

    /// Selected id, or none once that packet has been evicted.
    pub fn selected_id(&self) -> Option<u64> {
        self.selected.filter(|&id| self.contains(id))
    }

    pub fn selected(&self) -> Option<Arc<Packet>> {
        self.selected.and_then(|id| self.get(id))
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> StoreStats {
        let utilization = (self.packets.len() as f64 / self.capacity as f64) * 100.0;
        StoreStats {
            len: self.packets.len(),
            capacity: self.capacity,
            utilization_percent: utilization.round() as u8,
            total_appended: self.total_appended,
            total_evicted: self.total_evicted,
        }
    }
}

impl Default for CaptureStore {
    fn default() -> Self {
        Self::new()
    }
}
