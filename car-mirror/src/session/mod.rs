//! Stateful session wrappers around the one-round `push`/`pull` functions.
//!
//! The functions in `push`/`pull`/`common` are pure: they take the previous
//! round's response and return the next request/response, leaving the
//! caller to thread `Option<PushResponse>`/`Option<CarFile>` through by
//! hand. The types here wrap that threading into a long-lived object that
//! owns its round counter, queues, and bloom filter (spec.md §4.4/§4.5), and
//! [`registry`] drives many of them concurrently to completion (spec.md
//! §4.6).
//!
//! Roles are kept symmetric with the rest of the crate: a [`source::SourceSession`]
//! is the end that already has the blocks (push-requester or pull-responder);
//! a [`sink::SinkSession`] is the end that wants them (pull-requester or
//! push-responder).

use rand::{distributions::Alphanumeric, Rng};
use std::fmt;
use std::future::Future;
use wnfs_common::utils::{CondSend, CondSync};

use crate::{
    error::Error,
    messages::{PullRequest, PushRequest, PushResponse},
};

pub mod registry;
pub mod sink;
pub mod source;

pub use registry::{SessionInfo, SessionRegistry};
pub use sink::SinkSession;
pub use source::SourceSession;

/// The length of a generated [`SessionId`]'s token. Comfortably above the
/// spec's `length >= 10` floor (spec.md §3).
const SESSION_ID_LEN: usize = 16;

/// A short, printable-ASCII, collision-resistant-within-process token
/// identifying a live session.
///
/// Grounded in the original Go implementation's `oldcarmirror.session`,
/// which generates a 10-character alphanumeric token per session
/// (`examples/original_source/oldcarmirror/session.go`'s
/// `randStringBytesMask`); this uses `rand`'s `Alphanumeric` distribution
/// instead of hand-rolled bit-twiddling over a custom alphabet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a new random session id.
    pub fn generate() -> Self {
        let token: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(SESSION_ID_LEN)
            .map(char::from)
            .collect();
        Self(token)
    }

    /// Borrow the token as a string slice, e.g. to put into a
    /// `car-mirror-sid` header.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Which end of the protocol a session is playing.
///
/// Source sessions hold the blocks and decide what to transfer; sink
/// sessions want the blocks and decide what's still missing. See spec.md
/// §4.4/§4.5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// The block-sending end: push-requester or pull-responder.
    Source,
    /// The block-receiving end: pull-requester or push-responder.
    Sink,
}

/// A session's lifecycle state, modeled as a tagged sum type rather than
/// booleans so illegal combinations (e.g. "closed and cancelled") are
/// unrepresentable, per spec.md §9's design note.
///
/// ```text
///           enqueue(root)
/// init ────────────────▶ open
///                         │   next_round() has work
///                         ▼
///                       active  ──── remote error ───▶ errored ──▶ closed
///                         │
///                         │   queues drained + no cleanup
///                         ▼
///                       draining
///                         │   close() or deadline
///                         ▼
///                       closed
///                         │   cancel() at any live state
///                         ▼
///                      cancelled
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    /// Session created, no round has run yet (may still be waiting on an
    /// initial `enqueue`).
    Open,
    /// At least one round is in flight or has completed and more work
    /// remains.
    Active,
    /// All queues empty and no cleanup round pending; finishing up.
    Draining,
    /// Terminal: completed successfully.
    Closed,
    /// Terminal: the session failed in a way that can't be recovered from.
    Errored(String),
    /// Terminal: cancelled by the caller, the registry's deadline
    /// supervisor, or a timeout.
    Cancelled(String),
}

impl Status {
    /// Whether this is one of the three terminal states. Transitions out of
    /// a terminal state are forbidden (spec.md §4.5).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Closed | Status::Errored(_) | Status::Cancelled(_))
    }
}

/// Per-session counters, kept by the registry and returned by
/// `inspect`/`stats` (spec.md §4.6, §9's "Supplemented features").
#[derive(Debug, Clone, Default)]
pub struct Stats {
    /// Number of rounds completed so far.
    pub rounds: u64,
    /// Total blocks sent (meaningful for [`Role::Source`] sessions).
    pub blocks_sent: u64,
    /// Total blocks received (meaningful for [`Role::Sink`] sessions).
    pub blocks_received: u64,
    /// Total bytes sent.
    pub bytes_sent: u64,
    /// Total bytes received.
    pub bytes_received: u64,
}

/// The narrow capability a driven session needs to actually move bytes for
/// a round. Implementations live outside the core (HTTP via
/// `car-mirror-reqwest`, or an in-process shortcut for tests); the session
/// and registry code only ever call through this trait, per spec.md §4.8 /
/// §9's "Polymorphism over stores and transports" design note.
pub trait Transport: CondSync {
    /// Send a push request to the remote and await its response.
    fn push(
        &self,
        session_id: Option<&SessionId>,
        request: PushRequest,
    ) -> impl Future<Output = Result<PushResponse, Error>> + CondSend;

    /// Send a pull request to the remote and await a raw CAR response.
    fn pull(
        &self,
        session_id: Option<&SessionId>,
        request: PullRequest,
    ) -> impl Future<Output = Result<crate::common::CarFile, Error>> + CondSend;
}
