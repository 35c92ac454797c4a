//! Bounded store of peer addresses learned through discovery

use std::collections::{HashSet, VecDeque};

use rand::{seq::IteratorRandom, Rng};
use tracing::debug;

use crate::protocol::{Address, IpAddress};

#[derive(Debug, Clone, Copy)]
pub struct AddressBookConfig {
    pub capacity: usize,
    pub max_peers_response: usize,
}

/// Known peer addresses, oldest first
///
/// Inserting into a full book evicts the oldest entry. Addresses of banned
/// IPs are purged and never accepted again.
#[derive(Debug)]
pub struct AddressBook {
    config: AddressBookConfig,
    entries: VecDeque<Address>,
    index: HashSet<Address>,
    banned: HashSet<IpAddress>,
}

impl AddressBook {
    pub fn new(config: AddressBookConfig) -> Self {
        Self {
            config,
            entries: VecDeque::new(),
            index: HashSet::new(),
            banned: HashSet::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.index.contains(address)
    }

    pub fn is_banned(&self, ip: &IpAddress) -> bool {
        self.banned.contains(ip)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Address> {
        self.entries.iter()
    }

    pub fn snapshot(&self) -> Vec<Address> {
        self.entries.iter().copied().collect()
    }

    /// Adds an address, returning whether it was new and acceptable
    pub fn add(&mut self, address: Address) -> bool {
        if self.config.capacity == 0
            || !address.is_valid()
            || self.is_banned(&address.ip)
            || self.index.contains(&address)
        {
            return false;
        }

        while self.entries.len() >= self.config.capacity {
            if let Some(oldest) = self.entries.pop_front() {
                self.index.remove(&oldest);
            }
        }

        self.entries.push_back(address);
        self.index.insert(address);

        true
    }

    /// Merges the addresses of a `Peers` message, returning how many were new
    pub fn merge(&mut self, addresses: impl IntoIterator<Item = Address>) -> usize {
        let added = addresses.into_iter().filter(|x| self.add(*x)).count();
        debug!(added, total = self.len(), "address book merged");
        added
    }

    pub fn remove(&mut self, address: &Address) -> bool {
        if !self.index.remove(address) {
            return false;
        }

        self.entries.retain(|x| x != address);
        true
    }

    /// Bans an IP, dropping every address it has in the book
    pub fn ban(&mut self, ip: IpAddress) {
        self.banned.insert(ip);
        self.entries.retain(|x| x.ip != ip);
        self.index.retain(|x| x.ip != ip);
    }

    /// Random sample answering a `GetPeers`, leaving out the requester's own
    /// addresses.
    pub fn sample(&self, requester: &IpAddress, rng: &mut impl Rng) -> Vec<Address> {
        self.entries
            .iter()
            .filter(|x| x.ip != *requester)
            .copied()
            .choose_multiple(rng, self.config.max_peers_response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};
    use std::net::SocketAddr;

    fn address(text: &str) -> Address {
        text.parse::<SocketAddr>().unwrap().into()
    }

    fn book(capacity: usize, max_peers_response: usize) -> AddressBook {
        AddressBook::new(AddressBookConfig {
            capacity,
            max_peers_response,
        })
    }

    #[test]
    fn full_book_evicts_oldest() {
        let mut b = book(2, 10);

        assert!(b.add(address("10.0.0.1:1")));
        assert!(b.add(address("10.0.0.2:1")));
        assert!(!b.add(address("10.0.0.2:1")));
        assert!(b.add(address("10.0.0.3:1")));

        assert_eq!(b.len(), 2);
        assert!(!b.contains(&address("10.0.0.1:1")));
        assert!(b.contains(&address("10.0.0.3:1")));
    }

    #[test]
    fn invalid_addresses_are_refused() {
        let mut b = book(10, 10);

        let added = b.merge(vec![
            address("0.0.0.0:21337"),
            address("10.0.0.1:0"),
            address("10.0.0.1:21337"),
        ]);

        assert_eq!(added, 1);
    }

    #[test]
    fn sample_is_capped_and_excludes_requester() {
        let mut b = book(100, 3);

        for i in 1..=20 {
            b.add(address(&format!("10.0.0.{i}:21337")));
        }

        b.add(address("10.0.0.99:21337"));
        b.add(address("10.0.0.99:21338"));

        let requester = address("10.0.0.99:5000").ip;
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..20 {
            let sample = b.sample(&requester, &mut rng);
            assert_eq!(sample.len(), 3);
            assert!(sample.iter().all(|x| x.ip != requester));
        }
    }

    #[test]
    fn banning_purges_and_blocks() {
        let mut b = book(10, 10);
        b.add(address("10.0.0.1:1"));
        b.add(address("10.0.0.1:2"));
        b.add(address("10.0.0.2:1"));

        b.ban(address("10.0.0.1:1").ip);

        assert_eq!(b.snapshot(), vec![address("10.0.0.2:1")]);
        assert!(!b.add(address("10.0.0.1:3")));
    }
}
