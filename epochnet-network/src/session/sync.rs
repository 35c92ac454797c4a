use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use tracing::{debug, warn};

use crate::{
    inflight::InFlightRegistry,
    protocol::{CheckpointBeacon, Command, InvType, InvVector},
    PeerId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    AwaitingInv,
    FetchingBlocks,
}

/// What happened to a block received from the peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockDisposition {
    /// We asked for it and it's new
    Requested,
    /// Nobody asked for it but it's new, within the unsolicited allowance
    Unsolicited,
    /// Already known or over the allowance, dropped silently
    Discarded,
}

#[derive(Debug, Clone, Copy)]
pub struct SyncConfig {
    /// Max items requested through `GetData` and not yet delivered
    pub max_inflight: usize,
    pub fetch_timeout: Duration,
    /// Max unrequested blocks accepted per sync round
    pub max_unsolicited: usize,
}

/// Drives `GetBlocks` / `Inv` / `GetData` / `Block` with one peer
#[derive(Debug)]
pub struct SyncSession {
    pid: PeerId,
    config: SyncConfig,
    state: State,
    requested: HashMap<InvVector, Instant>,
    inv_deadline: Option<Instant>,
    parked: Option<CheckpointBeacon>,
    unsolicited_allowance: usize,
}

impl SyncSession {
    pub fn new(pid: PeerId, config: SyncConfig) -> Self {
        Self {
            pid,
            config,
            state: State::Idle,
            requested: HashMap::new(),
            inv_deadline: None,
            parked: None,
            unsolicited_allowance: config.max_unsolicited,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn in_flight(&self) -> usize {
        self.requested.len()
    }

    pub fn has_parked_round(&self) -> bool {
        self.parked.is_some()
    }

    pub fn is_requested(&self, item: &InvVector) -> bool {
        self.requested.contains_key(item)
    }

    fn settle(&mut self) {
        if self.state == State::FetchingBlocks && self.requested.is_empty() {
            self.state = State::Idle;
        }
    }

    /// Starts a sync round from the given beacon
    ///
    /// If a round is already running or the fetch budget is exhausted, the
    /// round is parked (replacing any previously parked one) and issued by a
    /// later [`SyncSession::poll`].
    pub fn request_blocks(&mut self, beacon: CheckpointBeacon, now: Instant) -> Option<Command> {
        if self.state != State::Idle || self.requested.len() >= self.config.max_inflight {
            debug!(pid = %self.pid, checkpoint = beacon.checkpoint, "sync round parked");
            self.parked = Some(beacon);
            return None;
        }

        self.state = State::AwaitingInv;
        self.inv_deadline = Some(now + self.config.fetch_timeout);
        self.unsolicited_allowance = self.config.max_unsolicited;

        Some(Command::GetBlocks(beacon))
    }

    /// Issues a parked round once the session is free again
    pub fn poll(&mut self, now: Instant) -> Option<Command> {
        if self.state != State::Idle {
            return None;
        }

        let beacon = self.parked.take()?;
        self.request_blocks(beacon, now)
    }

    /// Picks from an announced inventory what is worth fetching from this
    /// peer and returns the `GetData` asking for it, if anything.
    ///
    /// Only blocks are fetched, since a `Block` is the only answer a
    /// `GetData` can get. Other vectors are ignored.
    pub fn on_inv(
        &mut self,
        inventory: &[InvVector],
        registry: &mut InFlightRegistry,
        now: Instant,
    ) -> Option<Command> {
        let budget = self.config.max_inflight.saturating_sub(self.requested.len());
        let mut wanted = Vec::new();

        for item in inventory {
            if wanted.len() >= budget {
                break;
            }

            if item.inv_type != InvType::Block {
                continue;
            }

            if self.requested.contains_key(item) {
                continue;
            }

            if !registry.claim(*item, self.pid) {
                continue;
            }

            self.requested
                .insert(*item, now + self.config.fetch_timeout);

            wanted.push(*item);
        }

        self.inv_deadline = None;

        self.state = match self.requested.is_empty() {
            true => State::Idle,
            false => State::FetchingBlocks,
        };

        debug!(
            pid = %self.pid,
            announced = inventory.len(),
            wanted = wanted.len(),
            "inventory received"
        );

        match wanted.is_empty() {
            true => None,
            false => Some(Command::GetData(wanted)),
        }
    }

    pub fn on_block(
        &mut self,
        item: InvVector,
        registry: &mut InFlightRegistry,
    ) -> BlockDisposition {
        if self.requested.remove(&item).is_some() {
            let delivered_elsewhere = registry.is_known(&item);
            registry.mark_known(item);
            self.settle();

            return match delivered_elsewhere {
                true => BlockDisposition::Discarded,
                false => BlockDisposition::Requested,
            };
        }

        if registry.is_known(&item) || self.unsolicited_allowance == 0 {
            return BlockDisposition::Discarded;
        }

        self.unsolicited_allowance -= 1;
        registry.mark_known(item);

        BlockDisposition::Unsolicited
    }

    /// Drops every request older than the fetch timeout, releasing them so
    /// another peer can be asked. Returns the expired items.
    pub fn expire(&mut self, now: Instant, registry: &mut InFlightRegistry) -> Vec<InvVector> {
        if self.state == State::AwaitingInv && self.inv_deadline.is_some_and(|x| now >= x) {
            warn!(pid = %self.pid, "peer never answered GetBlocks");
            self.inv_deadline = None;
            self.state = State::Idle;
        }

        let expired: Vec<_> = self
            .requested
            .iter()
            .filter(|(_, deadline)| now >= **deadline)
            .map(|(item, _)| *item)
            .collect();

        for item in expired.iter() {
            self.requested.remove(item);
            registry.release(item, &self.pid);
        }

        self.settle();

        expired
    }

    /// Releases everything this session holds in the registry
    pub fn cancel(&mut self, registry: &mut InFlightRegistry) {
        registry.release_peer(&self.pid);
        self.requested.clear();
        self.parked = None;
        self.inv_deadline = None;
        self.state = State::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Hash;

    fn item(x: u8) -> InvVector {
        InvVector::block(Hash::Sha256([x; 32]))
    }

    fn pid(port: u16) -> PeerId {
        PeerId::from(std::net::SocketAddr::from(([10, 0, 0, 1], port)))
    }

    fn beacon() -> CheckpointBeacon {
        CheckpointBeacon {
            checkpoint: 10,
            hash_prev_block: Hash::Sha256([9; 32]),
        }
    }

    fn session(port: u16, max_inflight: usize) -> SyncSession {
        SyncSession::new(
            pid(port),
            SyncConfig {
                max_inflight,
                fetch_timeout: Duration::from_secs(30),
                max_unsolicited: 1,
            },
        )
    }

    #[test]
    fn full_round() {
        let now = Instant::now();
        let mut registry = InFlightRegistry::new(100);
        let mut s = session(1, 10);

        assert_eq!(
            s.request_blocks(beacon(), now),
            Some(Command::GetBlocks(beacon()))
        );
        assert_eq!(s.state(), State::AwaitingInv);

        let out = s.on_inv(&[item(1), item(2)], &mut registry, now);
        assert_eq!(out, Some(Command::GetData(vec![item(1), item(2)])));
        assert_eq!(s.state(), State::FetchingBlocks);

        assert_eq!(s.on_block(item(1), &mut registry), BlockDisposition::Requested);
        assert_eq!(s.state(), State::FetchingBlocks);

        assert_eq!(s.on_block(item(2), &mut registry), BlockDisposition::Requested);
        assert_eq!(s.state(), State::Idle);
        assert!(registry.is_known(&item(2)));
    }

    #[test]
    fn items_in_flight_elsewhere_are_skipped() {
        let now = Instant::now();
        let mut registry = InFlightRegistry::new(100);
        let mut a = session(1, 10);
        let mut b = session(2, 10);

        a.on_inv(&[item(1)], &mut registry, now);

        b.request_blocks(beacon(), now);
        let out = b.on_inv(&[item(1), item(2)], &mut registry, now);

        assert_eq!(out, Some(Command::GetData(vec![item(2)])));
    }

    #[test]
    fn nothing_new_returns_to_idle() {
        let now = Instant::now();
        let mut registry = InFlightRegistry::new(100);
        registry.mark_known(item(1));

        let mut s = session(1, 10);
        s.request_blocks(beacon(), now);

        assert_eq!(s.on_inv(&[item(1), item(1)], &mut registry, now), None);
        assert_eq!(s.state(), State::Idle);
    }

    #[test]
    fn only_blocks_are_requested() {
        let now = Instant::now();
        let mut registry = InFlightRegistry::new(100);
        let mut s = session(1, 10);
        s.request_blocks(beacon(), now);

        let tx = InvVector {
            inv_type: InvType::Tx,
            hash: Hash::Sha256([2; 32]),
        };

        let error = InvVector {
            inv_type: InvType::Error,
            hash: Hash::Sha256([1; 32]),
        };

        assert_eq!(s.on_inv(&[error, tx], &mut registry, now), None);
        assert_eq!(s.state(), State::Idle);
        assert_eq!(s.in_flight(), 0);
        assert!(registry.is_wanted(&tx));

        let out = s.on_inv(&[tx, item(3)], &mut registry, now);
        assert_eq!(out, Some(Command::GetData(vec![item(3)])));

        // a new round isn't held back by the ignored vectors
        s.on_block(item(3), &mut registry);
        assert_eq!(
            s.request_blocks(beacon(), now),
            Some(Command::GetBlocks(beacon()))
        );
    }

    #[test]
    fn budget_caps_requests_and_parks_rounds() {
        let now = Instant::now();
        let mut registry = InFlightRegistry::new(100);
        let mut s = session(1, 2);

        s.request_blocks(beacon(), now);
        let out = s.on_inv(&[item(1), item(2), item(3)], &mut registry, now);
        assert_eq!(out, Some(Command::GetData(vec![item(1), item(2)])));

        assert_eq!(s.request_blocks(beacon(), now), None);
        assert!(s.has_parked_round());
        assert_eq!(s.poll(now), None);

        s.on_block(item(1), &mut registry);
        s.on_block(item(2), &mut registry);

        assert_eq!(s.poll(now), Some(Command::GetBlocks(beacon())));
        assert!(!s.has_parked_round());
    }

    #[test]
    fn unsolicited_blocks_are_bounded() {
        let mut registry = InFlightRegistry::new(100);
        let mut s = session(1, 10);

        assert_eq!(s.on_block(item(5), &mut registry), BlockDisposition::Unsolicited);
        assert_eq!(s.on_block(item(5), &mut registry), BlockDisposition::Discarded);
        assert_eq!(s.on_block(item(6), &mut registry), BlockDisposition::Discarded);
    }

    #[test]
    fn expired_requests_are_released() {
        let now = Instant::now();
        let mut registry = InFlightRegistry::new(100);
        let mut s = session(1, 10);

        s.request_blocks(beacon(), now);
        s.on_inv(&[item(1)], &mut registry, now);

        assert!(s.expire(now + Duration::from_secs(29), &mut registry).is_empty());

        let expired = s.expire(now + Duration::from_secs(30), &mut registry);
        assert_eq!(expired, vec![item(1)]);
        assert_eq!(s.state(), State::Idle);
        assert!(registry.is_wanted(&item(1)));
    }

    #[test]
    fn silent_peer_frees_the_round() {
        let now = Instant::now();
        let mut registry = InFlightRegistry::new(100);
        let mut s = session(1, 10);

        s.request_blocks(beacon(), now);
        s.expire(now + Duration::from_secs(31), &mut registry);

        assert_eq!(s.state(), State::Idle);
    }
}
