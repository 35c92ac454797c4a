//! Single-owner coordinator of every peer connection
//!
//! The manager is sans-IO. A driver feeds it connection lifecycle events,
//! inbound frames and clock ticks; it answers with [`Output`]s that the
//! driver drains and executes. All shared state (address book, in-flight
//! registry, misbehavior counters) lives here, so every mutation goes
//! through one owner.

use std::{
    collections::{HashMap, VecDeque},
    time::{Duration, Instant},
};

use epochnet_codec::{from_slice_with_limits, Limits};
use rand::Rng;
use tracing::{debug, info, trace, warn};

use crate::{
    addressbook::{AddressBook, AddressBookConfig},
    inflight::InFlightRegistry,
    protocol::{
        Address, Block, CheckpointBeacon, Command, Error, Hash, InvVector, IpAddress, Magic,
        Message, Version,
    },
    session::{
        handshake::{self, RejectReason},
        sync::{BlockDisposition, SyncConfig},
        HandshakeSession, LivenessMonitor, SyncSession,
    },
    PeerId,
};

#[derive(Debug, Clone)]
pub struct Config {
    pub magic: Magic,
    pub protocol_version: u32,
    pub min_protocol_version: u32,
    pub capabilities: u64,
    pub user_agent: String,
    pub genesis: Hash,
    pub limits: Limits,
    pub handshake_timeout: Duration,
    pub ping_interval: Duration,
    pub pong_timeout: Duration,
    pub sync: SyncConfig,
    pub address_book: AddressBookConfig,
    pub known_inventory_capacity: usize,
    pub inbound_limit: usize,
    pub outbound_limit: usize,
    /// Violations from the same IP before it gets banned
    pub ban_threshold: u32,
    /// IPs whose violations are remembered; the oldest is forgotten first
    pub max_tracked_violators: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            magic: 0,
            protocol_version: 1,
            min_protocol_version: 1,
            capabilities: 0,
            user_agent: concat!("epochnet/", env!("CARGO_PKG_VERSION")).to_string(),
            genesis: Hash::Sha256([0; 32]),
            limits: Limits::default(),
            handshake_timeout: Duration::from_secs(10),
            ping_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(10),
            sync: SyncConfig {
                max_inflight: 64,
                fetch_timeout: Duration::from_secs(30),
                max_unsolicited: 8,
            },
            address_book: AddressBookConfig {
                capacity: 1024,
                max_peers_response: 32,
            },
            known_inventory_capacity: 10_000,
            inbound_limit: 128,
            outbound_limit: 8,
            ban_threshold: 3,
            max_tracked_violators: 4096,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

/// Everything the manager keeps about one connection
#[derive(Debug)]
pub struct PeerState {
    pub direction: Direction,
    pub handshake: HandshakeSession,
    pub sync: SyncSession,
    pub liveness: LivenessMonitor,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManagerEvent {
    PeerReady {
        pid: PeerId,
        direction: Direction,
        version: Version,
    },
    PeerDisconnected {
        pid: PeerId,
        reason: Option<Error>,
    },
    PeerBanned {
        ip: IpAddress,
    },
    BlockReceived {
        pid: PeerId,
        block: Block,
        solicited: bool,
    },
    /// The peer sent `GetBlocks`; answer through [`ConnectionManager::send_inventory`]
    BlocksRequested {
        pid: PeerId,
        from: CheckpointBeacon,
    },
    /// The peer sent `GetData`; answer through [`ConnectionManager::send_block`]
    DataRequested {
        pid: PeerId,
        items: Vec<InvVector>,
    },
    FetchTimedOut {
        pid: PeerId,
        item: InvVector,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output {
    Send(PeerId, Message),
    Disconnect(PeerId, Error),
    Event(ManagerEvent),
}

/// Violation counts per IP, bounded to a fixed number of IPs
#[derive(Debug)]
struct Violations {
    counts: HashMap<IpAddress, u32>,
    order: VecDeque<IpAddress>,
    capacity: usize,
}

impl Violations {
    fn new(capacity: usize) -> Self {
        Self {
            counts: HashMap::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    /// Counts one more violation, returning the total for the IP
    fn record(&mut self, ip: IpAddress) -> u32 {
        if let Some(count) = self.counts.get_mut(&ip) {
            *count += 1;
            return *count;
        }

        if self.capacity == 0 {
            return 1;
        }

        while self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.counts.remove(&oldest);
            }
        }

        self.counts.insert(ip, 1);
        self.order.push_back(ip);

        1
    }

    fn forget(&mut self, ip: &IpAddress) {
        if self.counts.remove(ip).is_some() {
            self.order.retain(|x| x != ip);
        }
    }
}

pub struct ConnectionManager {
    config: Config,
    local_address: Address,
    local_nonce: u64,
    last_epoch: u32,
    peers: HashMap<PeerId, PeerState>,
    address_book: AddressBook,
    registry: InFlightRegistry,
    violations: Violations,
    outbound: VecDeque<Output>,
}

impl ConnectionManager {
    pub fn new(config: Config, local_address: Address) -> Self {
        Self {
            address_book: AddressBook::new(config.address_book),
            registry: InFlightRegistry::new(config.known_inventory_capacity),
            violations: Violations::new(config.max_tracked_violators),
            config,
            local_address,
            local_nonce: rand::thread_rng().gen(),
            last_epoch: 0,
            peers: HashMap::new(),
            outbound: VecDeque::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn set_last_epoch(&mut self, epoch: u32) {
        self.last_epoch = epoch;
    }

    pub fn address_book(&self) -> &AddressBook {
        &self.address_book
    }

    pub fn add_known_peers(&mut self, addresses: impl IntoIterator<Item = Address>) -> usize {
        self.address_book.merge(addresses)
    }

    pub fn registry(&self) -> &InFlightRegistry {
        &self.registry
    }

    /// Records an item the higher layer already has, so it's never fetched
    pub fn mark_known(&mut self, item: InvVector) {
        self.registry.mark_known(item);
    }

    pub fn peer(&self, pid: &PeerId) -> Option<&PeerState> {
        self.peers.get(pid)
    }

    pub fn is_connected(&self, pid: &PeerId) -> bool {
        self.peers.contains_key(pid)
    }

    pub fn ready_peers(&self) -> Vec<PeerId> {
        self.peers
            .iter()
            .filter(|(_, peer)| peer.handshake.is_ready())
            .map(|(pid, _)| *pid)
            .collect()
    }

    pub fn count(&self, direction: Direction) -> usize {
        self.peers
            .values()
            .filter(|x| x.direction == direction)
            .count()
    }

    /// Addresses worth dialing to fill the outbound slots
    pub fn bootstrap_candidates(&self) -> Vec<Address> {
        let wanted = self
            .config
            .outbound_limit
            .saturating_sub(self.count(Direction::Outbound));

        self.address_book
            .iter()
            .filter(|x| **x != self.local_address)
            .filter(|x| !self.is_connected(&PeerId::from(x.to_socket_addr())))
            .take(wanted)
            .copied()
            .collect()
    }

    pub fn next_output(&mut self) -> Option<Output> {
        self.outbound.pop_front()
    }

    pub fn drain(&mut self) -> impl Iterator<Item = Output> + '_ {
        self.outbound.drain(..)
    }

    fn send(outbound: &mut VecDeque<Output>, magic: Magic, pid: PeerId, command: Command) {
        trace!(%pid, command = command.name(), "outbound");
        outbound.push_back(Output::Send(pid, Message::new(magic, command)));
    }

    /// Every connection advertises the same nonce, which lets an inbound
    /// session recognize a connection we dialed to ourselves.
    fn our_version(&self, pid: &PeerId) -> Version {
        Version {
            version: self.config.protocol_version,
            timestamp: chrono::Utc::now().timestamp(),
            capabilities: self.config.capabilities,
            sender_address: self.local_address,
            receiver_address: pid.addr().into(),
            user_agent: self.config.user_agent.clone(),
            last_epoch: self.last_epoch,
            genesis: self.config.genesis,
            nonce: self.local_nonce,
        }
    }

    /// Registers a new connection, opening the handshake if we dialed it
    ///
    /// Fails without side effects when the peer is banned, already connected
    /// or the limit for its direction is reached; the driver is expected to
    /// drop the connection.
    #[tracing::instrument(skip_all, fields(pid = %pid))]
    pub fn on_connected(
        &mut self,
        pid: PeerId,
        direction: Direction,
        now: Instant,
    ) -> Result<(), Error> {
        if self.address_book.is_banned(&pid.ip()) {
            return Err(Error::PeerMisbehavior(format!("{} is banned", pid.addr().ip())));
        }

        if self.peers.contains_key(&pid) {
            return Err(Error::violation("already connected"));
        }

        let limit = match direction {
            Direction::Inbound => self.config.inbound_limit,
            Direction::Outbound => self.config.outbound_limit,
        };

        if self.count(direction) >= limit {
            return Err(Error::ResourceLimitExceeded(format!(
                "{direction:?} connection limit of {limit}"
            )));
        }

        let mut handshake = HandshakeSession::new(
            self.our_version(&pid),
            self.config.min_protocol_version,
            now + self.config.handshake_timeout,
        );

        if direction == Direction::Outbound {
            let version = handshake.start()?;
            Self::send(&mut self.outbound, self.config.magic, pid, version);
        }

        let peer = PeerState {
            direction,
            handshake,
            sync: SyncSession::new(pid, self.config.sync),
            liveness: LivenessMonitor::new(
                self.config.ping_interval,
                self.config.pong_timeout,
                now,
            ),
        };

        self.peers.insert(pid, peer);
        info!(?direction, "peer connected");

        Ok(())
    }

    /// Transport went away; drops the peer and everything it held
    pub fn on_disconnected(&mut self, pid: &PeerId) {
        let Some(mut peer) = self.peers.remove(pid) else {
            return;
        };

        peer.sync.cancel(&mut self.registry);
        info!(%pid, "peer disconnected");

        self.outbound
            .push_back(Output::Event(ManagerEvent::PeerDisconnected {
                pid: *pid,
                reason: None,
            }));
    }

    fn decode(&self, bytes: &[u8]) -> Result<Message, Error> {
        let magic = Message::peek_magic(bytes)?;

        if magic != self.config.magic {
            return Err(Error::WrongNetwork {
                expected: self.config.magic,
                actual: magic,
            });
        }

        Ok(from_slice_with_limits(bytes, self.config.limits)?)
    }

    /// Handles one inbound frame from a peer
    #[tracing::instrument(skip_all, fields(pid = %pid))]
    pub fn on_bytes(&mut self, pid: PeerId, bytes: &[u8], now: Instant) {
        if !self.peers.contains_key(&pid) {
            debug!("frame from unknown peer, ignoring");
            return;
        }

        trace!(bytes = %hex::encode(bytes), "inbound frame");

        let result = self
            .decode(bytes)
            .and_then(|msg| self.on_command(pid, msg.command, now));

        if let Err(err) = result {
            self.disconnect(pid, err);
        }
    }

    fn on_command(&mut self, pid: PeerId, command: Command, now: Instant) -> Result<(), Error> {
        debug!(command = command.name(), "inbound");

        let Some(peer) = self.peers.get_mut(&pid) else {
            return Ok(());
        };

        if !peer.handshake.is_ready() {
            for reply in peer.handshake.receive(&command)? {
                Self::send(&mut self.outbound, self.config.magic, pid, reply);
            }

            if peer.handshake.is_ready() {
                self.on_ready(pid);
            }

            return Ok(());
        }

        let magic = self.config.magic;

        match command {
            Command::Version(_) | Command::Verack => {
                return Err(Error::violation(format!(
                    "{} after handshake completed",
                    command.name()
                )));
            }
            Command::GetPeers => {
                let sample = self.address_book.sample(&pid.ip(), &mut rand::thread_rng());
                Self::send(&mut self.outbound, magic, pid, Command::Peers(sample));
            }
            Command::Peers(addresses) => {
                self.address_book.merge(addresses);
            }
            Command::Ping(nonce) => {
                Self::send(&mut self.outbound, magic, pid, Command::Pong(nonce));
            }
            Command::Pong(nonce) => {
                peer.liveness.on_pong(nonce, now);
            }
            Command::Inv(items) => {
                if let Some(request) = peer.sync.on_inv(&items, &mut self.registry, now) {
                    Self::send(&mut self.outbound, magic, pid, request);
                }

                if let Some(round) = peer.sync.poll(now) {
                    Self::send(&mut self.outbound, magic, pid, round);
                }
            }
            Command::Block(block) => {
                let item = block.inv_vector();

                let solicited = match peer.sync.on_block(item, &mut self.registry) {
                    BlockDisposition::Requested => Some(true),
                    BlockDisposition::Unsolicited => Some(false),
                    BlockDisposition::Discarded => None,
                };

                match solicited {
                    Some(solicited) => {
                        self.outbound
                            .push_back(Output::Event(ManagerEvent::BlockReceived {
                                pid,
                                block,
                                solicited,
                            }))
                    }
                    None => debug!(%item, "discarding block"),
                }

                if let Some(round) = peer.sync.poll(now) {
                    Self::send(&mut self.outbound, magic, pid, round);
                }
            }
            Command::GetData(items) => {
                self.outbound
                    .push_back(Output::Event(ManagerEvent::DataRequested { pid, items }));
            }
            Command::GetBlocks(from) => {
                self.outbound
                    .push_back(Output::Event(ManagerEvent::BlocksRequested { pid, from }));
            }
        }

        Ok(())
    }

    fn on_ready(&mut self, pid: PeerId) {
        let Some(peer) = self.peers.get(&pid) else {
            return;
        };

        let Some(version) = peer.handshake.peer_version().cloned() else {
            return;
        };

        let direction = peer.direction;

        info!(
            user_agent = %version.user_agent,
            version = version.version,
            last_epoch = version.last_epoch,
            "handshake completed"
        );

        if version.sender_address != self.local_address {
            self.address_book.add(version.sender_address);
        }

        // discovery
        if direction == Direction::Outbound {
            Self::send(&mut self.outbound, self.config.magic, pid, Command::GetPeers);
        }

        self.outbound
            .push_back(Output::Event(ManagerEvent::PeerReady {
                pid,
                direction,
                version,
            }));
    }

    /// Drops a peer because of an error, counting it against the peer's IP
    ///
    /// Once an IP reaches the ban threshold it's banned and the error
    /// reported becomes [`Error::PeerMisbehavior`].
    pub fn disconnect(&mut self, pid: PeerId, err: Error) {
        let Some(mut peer) = self.peers.remove(&pid) else {
            return;
        };

        peer.sync.cancel(&mut self.registry);

        let self_connection = matches!(
            peer.handshake.state(),
            handshake::State::Rejected(RejectReason::SelfConnection)
        );

        let mut err = err;

        if self_connection {
            info!(%pid, "dropping connection to ourselves");
            self.address_book.remove(&pid.addr().into());
        } else if err.is_misbehavior() {
            let ip = pid.ip();
            let count = self.violations.record(ip);

            warn!(%pid, %err, violations = count, "peer violation");

            if count >= self.config.ban_threshold {
                err = Error::PeerMisbehavior(format!("{count} violations, last: {err}"));
                self.address_book.ban(ip);
                self.violations.forget(&ip);

                warn!(%pid, "peer banned");
                self.outbound
                    .push_back(Output::Event(ManagerEvent::PeerBanned { ip }));
            }
        } else {
            info!(%pid, %err, "dropping peer");
        }

        self.outbound
            .push_back(Output::Disconnect(pid, err.clone()));

        self.outbound
            .push_back(Output::Event(ManagerEvent::PeerDisconnected {
                pid,
                reason: Some(err),
            }));
    }

    /// Runs every timer: handshake and liveness deadlines, pings, fetch
    /// expiry and parked sync rounds.
    pub fn housekeeping(&mut self, now: Instant) {
        let pids: Vec<_> = self.peers.keys().copied().collect();

        for pid in pids {
            if let Err(err) = self.housekeep_peer(pid, now) {
                self.disconnect(pid, err);
            }
        }
    }

    fn housekeep_peer(&mut self, pid: PeerId, now: Instant) -> Result<(), Error> {
        let magic = self.config.magic;

        let Some(peer) = self.peers.get_mut(&pid) else {
            return Ok(());
        };

        if !peer.handshake.is_ready() {
            return peer.handshake.check_timeout(now);
        }

        peer.liveness.check(now)?;

        if let Some(ping) = peer.liveness.poll(now, || rand::thread_rng().gen()) {
            Self::send(&mut self.outbound, magic, pid, ping);
        }

        for item in peer.sync.expire(now, &mut self.registry) {
            warn!(%pid, %item, "fetch timed out");

            self.outbound
                .push_back(Output::Event(ManagerEvent::FetchTimedOut { pid, item }));
        }

        if let Some(round) = peer.sync.poll(now) {
            Self::send(&mut self.outbound, magic, pid, round);
        }

        Ok(())
    }

    /// Starts a sync round with one ready peer. Returns false if the peer
    /// isn't ready.
    pub fn request_blocks(&mut self, pid: PeerId, from: CheckpointBeacon, now: Instant) -> bool {
        let Some(peer) = self.peers.get_mut(&pid) else {
            return false;
        };

        if !peer.handshake.is_ready() {
            return false;
        }

        if let Some(request) = peer.sync.request_blocks(from, now) {
            Self::send(&mut self.outbound, self.config.magic, pid, request);
        }

        true
    }

    /// Starts a sync round with every ready peer; the in-flight registry
    /// makes sure each item is fetched from a single one of them.
    pub fn sync(&mut self, from: CheckpointBeacon, now: Instant) -> usize {
        self.ready_peers()
            .into_iter()
            .filter(|pid| self.request_blocks(*pid, from, now))
            .count()
    }

    fn send_ready(&mut self, pid: PeerId, command: Command) -> bool {
        match self.peers.get(&pid) {
            Some(peer) if peer.handshake.is_ready() => {
                Self::send(&mut self.outbound, self.config.magic, pid, command);
                true
            }
            _ => false,
        }
    }

    /// Answers a `GetBlocks` with the inventory the higher layer has
    pub fn send_inventory(&mut self, pid: PeerId, items: Vec<InvVector>) -> bool {
        self.send_ready(pid, Command::Inv(items))
    }

    /// Answers a `GetData` with a block
    pub fn send_block(&mut self, pid: PeerId, block: Block) -> bool {
        self.send_ready(pid, Command::Block(block))
    }

    /// Announces new inventory to every ready peer
    pub fn announce(&mut self, items: Vec<InvVector>) {
        for pid in self.ready_peers() {
            self.send_ready(pid, Command::Inv(items.clone()));
        }
    }
}
