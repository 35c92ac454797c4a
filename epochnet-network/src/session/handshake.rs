use std::time::Instant;

use tracing::debug;

use crate::protocol::{Command, Error, Hash, Nonce, TimeoutKind, Version};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    IncompatibleVersion { min: u32, actual: u32 },
    GenesisMismatch { expected: Hash, actual: Hash },
    SelfConnection,
    Violation(String),
    Timeout,
}

impl RejectReason {
    fn to_error(&self) -> Error {
        match self {
            RejectReason::IncompatibleVersion { min, actual } => Error::violation(format!(
                "protocol version {actual} is below minimum {min}"
            )),
            RejectReason::GenesisMismatch { expected, actual } => {
                Error::violation(format!("genesis {actual} doesn't match ours ({expected})"))
            }
            RejectReason::SelfConnection => Error::violation("connected to ourselves"),
            RejectReason::Violation(x) => Error::ProtocolViolation(x.clone()),
            RejectReason::Timeout => Error::Timeout(TimeoutKind::Handshake),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum State {
    Idle,
    VersionSent,
    AwaitingVerack,
    Ready,
    Rejected(RejectReason),
}

/// Negotiates `Version`/`Verack` with one peer
///
/// Either side may open: the initiator calls [`HandshakeSession::start`], the
/// responder waits for the peer's `Version` and answers with `Verack` plus its
/// own `Version`. The session is ready once the peer's version has been
/// accepted and our version has been acknowledged.
#[derive(Debug)]
pub struct HandshakeSession {
    state: State,
    ours: Version,
    min_version: u32,
    deadline: Instant,
    verack_received: bool,
    peer_version: Option<Version>,
}

impl HandshakeSession {
    pub fn new(ours: Version, min_version: u32, deadline: Instant) -> Self {
        Self {
            state: State::Idle,
            ours,
            min_version,
            deadline,
            verack_received: false,
            peer_version: None,
        }
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, State::Ready)
    }

    pub fn is_done(&self) -> bool {
        matches!(self.state, State::Ready | State::Rejected(_))
    }

    pub fn local_nonce(&self) -> Nonce {
        self.ours.nonce
    }

    pub fn peer_version(&self) -> Option<&Version> {
        self.peer_version.as_ref()
    }

    fn reject(&mut self, reason: RejectReason) -> Error {
        debug!(?reason, "handshake rejected");
        let err = reason.to_error();
        self.state = State::Rejected(reason);
        err
    }

    /// Sends our version, opening the handshake as initiator
    pub fn start(&mut self) -> Result<Command, Error> {
        match self.state {
            State::Idle => {
                self.state = State::VersionSent;
                Ok(Command::Version(self.ours.clone()))
            }
            _ => Err(Error::violation("handshake already started")),
        }
    }

    fn validate(&self, theirs: &Version) -> Result<(), RejectReason> {
        if theirs.version < self.min_version {
            return Err(RejectReason::IncompatibleVersion {
                min: self.min_version,
                actual: theirs.version,
            });
        }

        if theirs.genesis != self.ours.genesis {
            return Err(RejectReason::GenesisMismatch {
                expected: self.ours.genesis,
                actual: theirs.genesis,
            });
        }

        if theirs.nonce == self.ours.nonce {
            return Err(RejectReason::SelfConnection);
        }

        Ok(())
    }

    fn on_version(&mut self, theirs: &Version) -> Result<Vec<Command>, Error> {
        if self.peer_version.is_some() {
            return Err(self.reject(RejectReason::Violation("duplicate Version".into())));
        }

        if let Err(reason) = self.validate(theirs) {
            return Err(self.reject(reason));
        }

        self.peer_version = Some(theirs.clone());

        let mut out = vec![Command::Verack];

        if self.state == State::Idle {
            out.push(Command::Version(self.ours.clone()));
        }

        self.state = match self.verack_received {
            true => State::Ready,
            false => State::AwaitingVerack,
        };

        Ok(out)
    }

    fn on_verack(&mut self) -> Result<Vec<Command>, Error> {
        if self.state == State::Idle {
            return Err(self.reject(RejectReason::Violation(
                "Verack before we sent a Version".into(),
            )));
        }

        if self.verack_received {
            return Err(self.reject(RejectReason::Violation("duplicate Verack".into())));
        }

        self.verack_received = true;

        if self.peer_version.is_some() {
            self.state = State::Ready;
        }

        Ok(vec![])
    }

    /// Applies an inbound command, returning the commands to send back
    pub fn receive(&mut self, cmd: &Command) -> Result<Vec<Command>, Error> {
        match &self.state {
            State::Rejected(reason) => return Err(reason.to_error()),
            State::Ready => {
                return Err(self.reject(RejectReason::Violation(format!(
                    "{} after handshake completed",
                    cmd.name()
                ))))
            }
            _ => (),
        }

        match cmd {
            Command::Version(theirs) => self.on_version(theirs),
            Command::Verack => self.on_verack(),
            other => Err(self.reject(RejectReason::Violation(format!(
                "{} before handshake completed",
                other.name()
            )))),
        }
    }

    /// Forces the session into `Rejected` once the deadline has passed
    pub fn check_timeout(&mut self, now: Instant) -> Result<(), Error> {
        if !self.is_done() && now >= self.deadline {
            return Err(self.reject(RejectReason::Timeout));
        }

        Ok(())
    }
}
