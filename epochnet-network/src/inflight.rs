//! Cross-session bookkeeping of inventory being fetched or already known

use std::collections::{HashMap, HashSet, VecDeque};

use crate::{protocol::InvVector, PeerId};

/// Tracks which peer owns the fetch of each inventory item and which items
/// are already known, so that two sessions never fetch the same thing.
///
/// The known set is bounded; once full, the oldest entries are forgotten.
#[derive(Debug)]
pub struct InFlightRegistry {
    owners: HashMap<InvVector, PeerId>,
    known: HashSet<InvVector>,
    known_order: VecDeque<InvVector>,
    known_capacity: usize,
}

impl InFlightRegistry {
    pub fn new(known_capacity: usize) -> Self {
        Self {
            owners: HashMap::new(),
            known: HashSet::new(),
            known_order: VecDeque::new(),
            known_capacity,
        }
    }

    pub fn is_known(&self, item: &InvVector) -> bool {
        self.known.contains(item)
    }

    pub fn owner(&self, item: &InvVector) -> Option<&PeerId> {
        self.owners.get(item)
    }

    pub fn in_flight(&self) -> usize {
        self.owners.len()
    }

    /// Whether the item is worth requesting at all
    pub fn is_wanted(&self, item: &InvVector) -> bool {
        !self.is_known(item) && !self.owners.contains_key(item)
    }

    /// Claims the fetch of an item for a peer. Fails if it's known or some
    /// other peer already owns it.
    pub fn claim(&mut self, item: InvVector, pid: PeerId) -> bool {
        if !self.is_wanted(&item) {
            return false;
        }

        self.owners.insert(item, pid);
        true
    }

    /// Gives up a claim so another peer may fetch the item
    pub fn release(&mut self, item: &InvVector, pid: &PeerId) {
        if self.owners.get(item) == Some(pid) {
            self.owners.remove(item);
        }
    }

    /// Releases every claim held by a peer, returning how many were dropped
    pub fn release_peer(&mut self, pid: &PeerId) -> usize {
        let before = self.owners.len();
        self.owners.retain(|_, owner| owner != pid);
        before - self.owners.len()
    }

    /// Records an item as known, clearing any claim on it
    pub fn mark_known(&mut self, item: InvVector) {
        self.owners.remove(&item);

        if self.known_capacity == 0 || !self.known.insert(item) {
            return;
        }

        self.known_order.push_back(item);

        while self.known_order.len() > self.known_capacity {
            if let Some(oldest) = self.known_order.pop_front() {
                self.known.remove(&oldest);
            }
        }
    }
}
