//! Tokio driver running a [`ConnectionManager`] over TCP
//!
//! The manager lives inside a single task. Every connection gets a reader
//! task forwarding frames to it and a writer task draining a bounded queue of
//! outbound frames. The rest of the application talks to the node through a
//! [`NodeHandle`] and listens to [`ManagerEvent`]s.

use std::{
    collections::{HashMap, HashSet},
    net::SocketAddr,
    time::Duration,
};

use epochnet_codec::to_vec;
use thiserror::Error;
use tokio::{
    net::TcpListener,
    select,
    sync::{
        mpsc::{self, error::TrySendError},
        oneshot,
    },
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    bearer::{self, Bearer},
    manager::{self, ConnectionManager, Direction, ManagerEvent, Output},
    protocol::{Address, Block, CheckpointBeacon, InvVector},
    PeerId,
};

#[derive(Debug, Error)]
pub enum Error {
    #[error("node is not running")]
    Stopped,
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Where to accept inbound connections, if anywhere
    pub listen_addr: Option<SocketAddr>,
    /// Address advertised to peers; defaults to the listener's
    pub public_addr: Option<SocketAddr>,
    pub known_peers: Vec<SocketAddr>,
    pub connect_timeout: Duration,
    pub housekeeping_interval: Duration,
    pub bootstrap_period: Duration,
    /// Outbound frames queued per peer before it's considered too slow
    pub peer_queue_len: usize,
    pub manager: manager::Config,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen_addr: None,
            public_addr: None,
            known_peers: vec![],
            connect_timeout: Duration::from_secs(5),
            housekeeping_interval: Duration::from_secs(1),
            bootstrap_period: Duration::from_secs(5),
            peer_queue_len: 256,
            manager: manager::Config::default(),
        }
    }
}

#[derive(Debug)]
pub enum NodeCommand {
    Connect(SocketAddr),
    Sync(CheckpointBeacon),
    MarkKnown(InvVector),
    SetLastEpoch(u32),
    SendInventory(PeerId, Vec<InvVector>),
    SendBlock(PeerId, Block),
    Announce(Vec<InvVector>),
    KnownPeers(oneshot::Sender<Vec<Address>>),
    ReadyPeers(oneshot::Sender<Vec<PeerId>>),
    Shutdown,
}

#[derive(Debug, Clone)]
pub struct NodeHandle {
    commands: mpsc::Sender<NodeCommand>,
}

impl NodeHandle {
    async fn execute(&self, cmd: NodeCommand) -> Result<(), Error> {
        self.commands.send(cmd).await.map_err(|_| Error::Stopped)
    }

    pub async fn connect(&self, addr: SocketAddr) -> Result<(), Error> {
        self.execute(NodeCommand::Connect(addr)).await
    }

    pub async fn sync(&self, from: CheckpointBeacon) -> Result<(), Error> {
        self.execute(NodeCommand::Sync(from)).await
    }

    pub async fn mark_known(&self, item: InvVector) -> Result<(), Error> {
        self.execute(NodeCommand::MarkKnown(item)).await
    }

    pub async fn set_last_epoch(&self, epoch: u32) -> Result<(), Error> {
        self.execute(NodeCommand::SetLastEpoch(epoch)).await
    }

    pub async fn send_inventory(&self, pid: PeerId, items: Vec<InvVector>) -> Result<(), Error> {
        self.execute(NodeCommand::SendInventory(pid, items)).await
    }

    pub async fn send_block(&self, pid: PeerId, block: Block) -> Result<(), Error> {
        self.execute(NodeCommand::SendBlock(pid, block)).await
    }

    pub async fn announce(&self, items: Vec<InvVector>) -> Result<(), Error> {
        self.execute(NodeCommand::Announce(items)).await
    }

    /// Snapshot of the address book
    pub async fn known_peers(&self) -> Result<Vec<Address>, Error> {
        let (tx, rx) = oneshot::channel();
        self.execute(NodeCommand::KnownPeers(tx)).await?;
        rx.await.map_err(|_| Error::Stopped)
    }

    pub async fn ready_peers(&self) -> Result<Vec<PeerId>, Error> {
        let (tx, rx) = oneshot::channel();
        self.execute(NodeCommand::ReadyPeers(tx)).await?;
        rx.await.map_err(|_| Error::Stopped)
    }

    pub async fn shutdown(&self) -> Result<(), Error> {
        self.execute(NodeCommand::Shutdown).await
    }
}

/// One connection to a peer. The generation tells apart successive
/// connections from the same socket address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LinkId {
    pid: PeerId,
    generation: u64,
}

enum Internal {
    Dialed(SocketAddr, tokio::io::Result<Bearer>),
    Frame(LinkId, Vec<u8>),
    Closed(LinkId, Option<bearer::Error>),
}

struct PeerLink {
    generation: u64,
    frames: mpsc::Sender<Vec<u8>>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Drop for PeerLink {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

async fn accept(listener: Option<&TcpListener>) -> tokio::io::Result<(Bearer, SocketAddr)> {
    match listener {
        Some(listener) => Bearer::accept_tcp(listener).await,
        None => std::future::pending().await,
    }
}

fn now() -> std::time::Instant {
    tokio::time::Instant::now().into_std()
}

pub struct Node {
    config: NodeConfig,
    manager: ConnectionManager,
    listener: Option<TcpListener>,
    commands: mpsc::Receiver<NodeCommand>,
    internal_tx: mpsc::Sender<Internal>,
    internal_rx: mpsc::Receiver<Internal>,
    events: mpsc::Sender<ManagerEvent>,
    links: HashMap<PeerId, PeerLink>,
    next_generation: u64,
    dialing: HashSet<SocketAddr>,
}

impl Node {
    /// Binds the listener (if any) and builds the node
    ///
    /// The returned event receiver must be drained: the node waits for room
    /// in it before moving on.
    pub async fn bind(
        config: NodeConfig,
    ) -> tokio::io::Result<(Self, NodeHandle, mpsc::Receiver<ManagerEvent>)> {
        let listener = match config.listen_addr {
            Some(addr) => Some(TcpListener::bind(addr).await?),
            None => None,
        };

        let local_addr = match (&listener, config.public_addr) {
            (_, Some(public)) => public,
            (Some(listener), None) => listener.local_addr()?,
            (None, None) => SocketAddr::from(([0, 0, 0, 0], 0)),
        };

        let mut manager = ConnectionManager::new(config.manager.clone(), local_addr.into());
        manager.add_known_peers(config.known_peers.iter().map(|x| Address::from(*x)));

        let (commands_tx, commands_rx) = mpsc::channel(64);
        let (internal_tx, internal_rx) = mpsc::channel(1024);
        let (events_tx, events_rx) = mpsc::channel(256);

        let node = Self {
            config,
            manager,
            listener,
            commands: commands_rx,
            internal_tx,
            internal_rx,
            events: events_tx,
            links: HashMap::new(),
            next_generation: 0,
            dialing: HashSet::new(),
        };

        let handle = NodeHandle {
            commands: commands_tx,
        };

        Ok((node, handle, events_rx))
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|x| x.local_addr().ok())
    }

    pub async fn run(mut self) {
        if let Some(addr) = self.local_addr() {
            info!(%addr, "listening");
        }

        let mut housekeeping = tokio::time::interval(self.config.housekeeping_interval);
        let mut bootstrap = tokio::time::interval(self.config.bootstrap_period);

        loop {
            select! {
                cmd = self.commands.recv() => match cmd {
                    Some(NodeCommand::Shutdown) | None => break,
                    Some(cmd) => self.apply_command(cmd),
                },
                Some(internal) = self.internal_rx.recv() => self.apply_internal(internal),
                accepted = accept(self.listener.as_ref()) => self.on_accepted(accepted),
                _ = housekeeping.tick() => self.manager.housekeeping(now()),
                _ = bootstrap.tick() => self.bootstrap(),
            }

            self.flush().await;
        }

        info!(peers = self.links.len(), "node stopping");
        self.links.clear();
    }

    fn apply_command(&mut self, cmd: NodeCommand) {
        match cmd {
            NodeCommand::Connect(addr) => self.dial(addr),
            NodeCommand::Sync(from) => {
                let peers = self.manager.sync(from, now());
                debug!(peers, checkpoint = from.checkpoint, "sync requested");
            }
            NodeCommand::MarkKnown(item) => self.manager.mark_known(item),
            NodeCommand::SetLastEpoch(epoch) => self.manager.set_last_epoch(epoch),
            NodeCommand::SendInventory(pid, items) => {
                if !self.manager.send_inventory(pid, items) {
                    debug!(%pid, "can't send inventory to peer that isn't ready");
                }
            }
            NodeCommand::SendBlock(pid, block) => {
                if !self.manager.send_block(pid, block) {
                    debug!(%pid, "can't send block to peer that isn't ready");
                }
            }
            NodeCommand::Announce(items) => self.manager.announce(items),
            NodeCommand::KnownPeers(reply) => {
                let _ = reply.send(self.manager.address_book().snapshot());
            }
            NodeCommand::ReadyPeers(reply) => {
                let _ = reply.send(self.manager.ready_peers());
            }
            NodeCommand::Shutdown => (),
        }
    }

    fn dial(&mut self, addr: SocketAddr) {
        if self.dialing.contains(&addr) || self.manager.is_connected(&PeerId::from(addr)) {
            return;
        }

        debug!(%addr, "dialing");
        self.dialing.insert(addr);

        let internal = self.internal_tx.clone();
        let timeout = self.config.connect_timeout;

        tokio::spawn(async move {
            let result = Bearer::connect_tcp_timeout(addr, timeout).await;
            let _ = internal.send(Internal::Dialed(addr, result)).await;
        });
    }

    fn bootstrap(&mut self) {
        let candidates = self.manager.bootstrap_candidates();
        let wanted = candidates.len().saturating_sub(self.dialing.len());

        let addrs: Vec<_> = candidates
            .iter()
            .map(|x| x.to_socket_addr())
            .filter(|x| !self.dialing.contains(x))
            .take(wanted)
            .collect();

        for addr in addrs {
            self.dial(addr);
        }
    }

    fn on_accepted(&mut self, accepted: tokio::io::Result<(Bearer, SocketAddr)>) {
        match accepted {
            Ok((bearer, addr)) => self.attach(PeerId::from(addr), Direction::Inbound, bearer),
            Err(err) => warn!(%err, "accept failed"),
        }
    }

    fn apply_internal(&mut self, internal: Internal) {
        match internal {
            Internal::Dialed(addr, result) => {
                self.dialing.remove(&addr);

                match result {
                    Ok(bearer) => self.attach(PeerId::from(addr), Direction::Outbound, bearer),
                    Err(err) => warn!(%addr, %err, "dial failed"),
                }
            }
            Internal::Frame(link, _) | Internal::Closed(link, _) if !self.is_current(&link) => {
                debug!(pid = %link.pid, "ignoring a connection already replaced");
            }
            Internal::Frame(link, frame) => self.manager.on_bytes(link.pid, &frame, now()),
            Internal::Closed(LinkId { pid, .. }, reason) => {
                self.links.remove(&pid);

                match reason {
                    Some(bearer::Error::FrameTooLarge { len, max }) => self.manager.disconnect(
                        pid,
                        crate::Error::ResourceLimitExceeded(format!(
                            "frame of {len} bytes over limit of {max}"
                        )),
                    ),
                    Some(err) => {
                        debug!(%pid, %err, "bearer failed");
                        self.manager.on_disconnected(&pid);
                    }
                    None => self.manager.on_disconnected(&pid),
                }
            }
        }
    }

    fn is_current(&self, link: &LinkId) -> bool {
        self.links
            .get(&link.pid)
            .is_some_and(|x| x.generation == link.generation)
    }

    fn attach(&mut self, pid: PeerId, direction: Direction, bearer: Bearer) {
        if let Err(err) = self.manager.on_connected(pid, direction, now()) {
            warn!(%pid, %err, "refusing connection");
            return;
        }

        self.next_generation += 1;

        let id = LinkId {
            pid,
            generation: self.next_generation,
        };

        let (mut reader, mut writer) = bearer.into_split();
        let (frames_tx, mut frames_rx) = mpsc::channel::<Vec<u8>>(self.config.peer_queue_len);

        let internal = self.internal_tx.clone();
        let max_len = self.config.manager.limits.max_message_bytes;

        let reader = tokio::spawn(async move {
            loop {
                match reader.read_frame(max_len).await {
                    Ok(Some(frame)) => {
                        if internal.send(Internal::Frame(id, frame)).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => {
                        let _ = internal.send(Internal::Closed(id, None)).await;
                        break;
                    }
                    Err(err) => {
                        let _ = internal.send(Internal::Closed(id, Some(err))).await;
                        break;
                    }
                }
            }
        });

        let writer = tokio::spawn(async move {
            while let Some(frame) = frames_rx.recv().await {
                if let Err(err) = writer.write_frame(&frame).await {
                    debug!(%pid, %err, "write failed");
                    break;
                }
            }
        });

        self.links.insert(
            pid,
            PeerLink {
                generation: id.generation,
                frames: frames_tx,
                reader,
                writer,
            },
        );
    }

    async fn flush(&mut self) {
        while let Some(output) = self.manager.next_output() {
            match output {
                Output::Send(pid, msg) => {
                    let Some(link) = self.links.get(&pid) else {
                        continue;
                    };

                    match link.frames.try_send(to_vec(&msg)) {
                        Ok(()) => (),
                        Err(TrySendError::Full(_)) => {
                            warn!(%pid, "outbound queue full");
                            self.manager.disconnect(
                                pid,
                                crate::Error::ResourceLimitExceeded(
                                    "outbound queue full".into(),
                                ),
                            );
                        }
                        Err(TrySendError::Closed(_)) => {
                            self.links.remove(&pid);
                            self.manager.on_disconnected(&pid);
                        }
                    }
                }
                Output::Disconnect(pid, err) => {
                    debug!(%pid, %err, "closing connection");
                    self.links.remove(&pid);
                }
                Output::Event(event) => {
                    if self.events.send(event).await.is_err() {
                        debug!("event receiver dropped");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn node() -> Node {
        let config = NodeConfig {
            manager: manager::Config {
                inbound_limit: 4,
                ..Default::default()
            },
            ..Default::default()
        };

        let (node, _, _) = Node::bind(config).await.unwrap();
        node
    }

    #[tokio::test]
    async fn stale_close_leaves_the_new_connection_alone() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server = listener.local_addr().unwrap();

        let mut node = node().await;
        let pid = PeerId::from(SocketAddr::from(([10, 0, 0, 2], 21337)));

        let first = Bearer::connect_tcp(server).await.unwrap();
        node.attach(pid, Direction::Inbound, first);
        let old = LinkId { pid, generation: 1 };

        node.apply_internal(Internal::Closed(old, None));
        assert!(!node.manager.is_connected(&pid));
        assert!(!node.links.contains_key(&pid));

        // same socket address comes back before the old reader's messages
        // are all processed
        let second = Bearer::connect_tcp(server).await.unwrap();
        node.attach(pid, Direction::Inbound, second);

        node.apply_internal(Internal::Frame(old, vec![0xff]));
        node.apply_internal(Internal::Closed(old, None));

        assert!(node.manager.is_connected(&pid));
        assert_eq!(node.links.get(&pid).map(|x| x.generation), Some(2));

        let current = LinkId { pid, generation: 2 };
        node.apply_internal(Internal::Closed(current, None));

        assert!(!node.manager.is_connected(&pid));
        assert!(!node.links.contains_key(&pid));
    }
}
