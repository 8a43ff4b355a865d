//! Drives many concurrent CAR mirror sessions to completion (spec.md §4.6).
//!
//! Neither `push`/`pull` nor [`super::source::SourceSession`]/
//! [`super::sink::SinkSession`] know anything about concurrency: they're
//! round-at-a-time state machines that need something to call them
//! repeatedly and move bytes between calls. That's this module's job,
//! generalized from the teacher's `car-mirror-axum`/`car-mirror-reqwest`
//! crates (which each hand-roll a single request/response cycle) into a
//! registry that owns many sessions at once, each behind its own driver
//! task and cancellation token.

use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};
use wnfs_common::{BlockStore, Cid};

use crate::{
    cache::Cache,
    common::Config,
    error::{Error, SessionError},
    session::{
        sink::SinkSession, source::SourceSession, Role, SessionId, Stats, Status, Transport,
    },
};

/// A snapshot of one session's lifecycle state and counters, returned by
/// [`SessionRegistry::inspect`].
#[derive(Debug, Clone)]
pub struct SessionInfo {
    /// Which end of the protocol this session is playing.
    pub role: Role,
    /// The session's current lifecycle state.
    pub status: Status,
    /// Rounds/blocks/bytes transferred so far.
    pub stats: Stats,
}

struct Handle {
    role: Role,
    status: Arc<RwLock<Status>>,
    stats: Arc<RwLock<Stats>>,
    enqueue: mpsc::UnboundedSender<Cid>,
    /// Observed at every suspension point; aborts an in-flight round too
    /// (spec.md §5: "Cancellation is observable at every suspension
    /// point... releases any pending request").
    cancellation: CancellationToken,
    /// Observed only between rounds: no new round starts once this fires,
    /// but a round already in flight is left to finish (spec.md §5:
    /// "Close is graceful: no new rounds start, in-flight round finishes,
    /// then transition to closed").
    close: CancellationToken,
    deadline: tokio::time::Instant,
    /// Set once the driver task observes a terminal status; used by the
    /// deadline supervisor to reap the entry after `session_retention` has
    /// elapsed, rather than immediately (spec.md §4.6/§8 scenario 6).
    closed_at: Arc<RwLock<Option<tokio::time::Instant>>>,
}

/// A concurrency-safe map of live sessions plus the driver tasks that run
/// them to completion, per spec.md §4.6's "Session registry / orchestrator"
/// component.
///
/// Grounded on `car-mirror-axum`'s `ServerState<B>` (a `Clone + 'static`
/// block store shared across request handlers,
/// `car-mirror-axum/src/server.rs`) for the generic bounds, and on the Go
/// implementation's `cm` package Orchestrator, which keeps a map of
/// in-flight transfers and drives each with its own goroutine
/// (`examples/original_source/cm/*.go`) for the overall shape.
pub struct SessionRegistry<B, C, T>
where
    B: BlockStore + Clone + 'static,
    C: Cache + Clone + 'static,
    T: Transport + Clone + 'static,
{
    store: B,
    cache: C,
    transport: T,
    config: Config,
    sessions: Arc<RwLock<HashMap<SessionId, Handle>>>,
}

impl<B, C, T> Clone for SessionRegistry<B, C, T>
where
    B: BlockStore + Clone + 'static,
    C: Cache + Clone + 'static,
    T: Transport + Clone + 'static,
{
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            cache: self.cache.clone(),
            transport: self.transport.clone(),
            config: self.config.clone(),
            sessions: self.sessions.clone(),
        }
    }
}

impl<B, C, T> SessionRegistry<B, C, T>
where
    B: BlockStore + Clone + 'static,
    C: Cache + Clone + 'static,
    T: Transport + Clone + 'static,
{
    /// Build a fresh, empty registry over the given store/cache/transport,
    /// using `config` for every session it opens. Call
    /// [`Self::spawn_deadline_supervisor`] once to enable TTL enforcement.
    pub fn new(store: B, cache: C, transport: T, config: Config) -> Self {
        Self {
            store,
            cache,
            transport,
            config,
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Open a new session for `roots` in the given role and start its
    /// driver task. Returns the freshly minted [`SessionId`] the caller can
    /// use to enqueue further roots, inspect progress, or cancel.
    #[instrument(skip(self, roots, shared_roots))]
    pub async fn open(
        &self,
        role: Role,
        roots: Vec<Cid>,
        shared_roots: Vec<Cid>,
    ) -> Result<SessionId, Error> {
        if roots.is_empty() {
            return Err(SessionError::InvalidRequest {
                reason: "a session needs at least one root".into(),
            }
            .into());
        }

        let session_id = SessionId::generate();
        let (enqueue_tx, enqueue_rx) = mpsc::unbounded_channel();
        let cancellation = CancellationToken::new();
        let close = CancellationToken::new();
        let status = Arc::new(RwLock::new(Status::Open));
        let stats = Arc::new(RwLock::new(Stats::default()));
        let deadline = tokio::time::Instant::now() + self.config.session_ttl;
        let closed_at = Arc::new(RwLock::new(None));

        let handle = Handle {
            role,
            status: status.clone(),
            stats: stats.clone(),
            enqueue: enqueue_tx,
            cancellation: cancellation.clone(),
            close: close.clone(),
            deadline,
            closed_at: closed_at.clone(),
        };

        self.sessions
            .write()
            .await
            .insert(session_id.clone(), handle);

        let driver = Driver {
            id: session_id.clone(),
            store: self.store.clone(),
            cache: self.cache.clone(),
            transport: self.transport.clone(),
            config: self.config.clone(),
            status,
            stats,
            cancellation,
            close,
        };

        tokio::spawn(async move {
            match role {
                Role::Source => driver.drive_source(roots, enqueue_rx).await,
                Role::Sink => driver.drive_sink(roots, shared_roots, enqueue_rx).await,
            }
            // Leave the entry in the map, terminal, so `inspect`/`list` can
            // still see it; the deadline supervisor reaps it after
            // `session_retention`.
            *closed_at.write().await = Some(tokio::time::Instant::now());
        });

        Ok(session_id)
    }

    /// Add a root to a live session's queue (spec.md §4.6's `enqueue`
    /// operation). A session already in a terminal state is treated the
    /// same as one that's been fully reaped: `unknown_session`, per spec.md
    /// §7's error taxonomy and §8 scenario 5 ("a subsequent `enqueue` on the
    /// same id returns `unknown_session`" after cancellation), even though
    /// the registry keeps its entry around a while longer for `inspect`.
    pub async fn enqueue(&self, session_id: &SessionId, root: Cid) -> Result<(), Error> {
        let sessions = self.sessions.read().await;
        let handle = sessions
            .get(session_id)
            .ok_or_else(|| SessionError::UnknownSession {
                session_id: session_id.to_string(),
            })?;

        if handle.status.read().await.is_terminal() {
            return Err(SessionError::UnknownSession {
                session_id: session_id.to_string(),
            }
            .into());
        }

        handle
            .enqueue
            .send(root)
            .map_err(|_| SessionError::UnknownSession {
                session_id: session_id.to_string(),
            })?;
        Ok(())
    }

    /// Signal a session's driver task to stop at the next opportunity and
    /// mark it cancelled. Unlike [`Self::close`], this aborts a round
    /// already in flight: any pending request/response is dropped rather
    /// than awaited to completion (spec.md §5).
    pub async fn cancel(&self, session_id: &SessionId) -> Result<(), Error> {
        let sessions = self.sessions.read().await;
        let handle = sessions
            .get(session_id)
            .ok_or_else(|| SessionError::UnknownSession {
                session_id: session_id.to_string(),
            })?;
        handle.cancellation.cancel();
        Ok(())
    }

    /// Ask a session to shut down gracefully: no further rounds are
    /// started, but a round already in flight is left to finish before the
    /// session transitions `Draining` → `Closed` (spec.md §4.6's `close`
    /// lifecycle operation, §5: "Close is graceful: no new rounds start,
    /// in-flight round finishes, then transition to closed"). Distinct from
    /// [`Self::cancel`], which aborts immediately.
    pub async fn close(&self, session_id: &SessionId) -> Result<(), Error> {
        let sessions = self.sessions.read().await;
        let handle = sessions
            .get(session_id)
            .ok_or_else(|| SessionError::UnknownSession {
                session_id: session_id.to_string(),
            })?;
        handle.close.cancel();
        Ok(())
    }

    /// Look up a session's role, status, and stats. A terminal session stays
    /// inspectable for `session_retention` after it closes/errors/cancels
    /// (spec.md §4.6, §8 scenario 6), then `None` once the deadline
    /// supervisor has reaped it; callers that need post-mortem stats past
    /// that window should poll sooner, or retain the last [`SessionInfo`].
    pub async fn inspect(&self, session_id: &SessionId) -> Option<SessionInfo> {
        let sessions = self.sessions.read().await;
        let handle = sessions.get(session_id)?;
        Some(SessionInfo {
            role: handle.role,
            status: handle.status.read().await.clone(),
            stats: handle.stats.read().await.clone(),
        })
    }

    /// All currently-tracked session ids, in no particular order.
    pub async fn list(&self) -> Vec<SessionId> {
        self.sessions.read().await.keys().cloned().collect()
    }

    /// Spawn a background task that periodically cancels any session whose
    /// `session_ttl` deadline has passed (spec.md §4.6: "sessions that
    /// exceed their configured TTL are cancelled by the registry, not left
    /// to the caller to notice"), and reaps any terminal session whose
    /// `session_retention` window has elapsed since it closed (spec.md §8
    /// scenario 6: "`ls` lists it until a configurable retention expires").
    /// `interval` governs how often the sweep runs; it should be
    /// meaningfully smaller than both `session_ttl` and `session_retention`.
    pub fn spawn_deadline_supervisor(&self, interval: Duration) {
        let sessions = self.sessions.clone();
        let retention = self.config.session_retention;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let now = tokio::time::Instant::now();

                let mut to_reap = Vec::new();
                {
                    let sessions = sessions.read().await;
                    for (id, handle) in sessions.iter() {
                        if now >= handle.deadline && !handle.cancellation.is_cancelled() {
                            debug!(session_id = %id, "session exceeded its TTL, cancelling");
                            handle.cancellation.cancel();
                        }
                        if let Some(closed_at) = *handle.closed_at.read().await {
                            if now >= closed_at + retention {
                                to_reap.push(id.clone());
                            }
                        }
                    }
                }

                if !to_reap.is_empty() {
                    let mut sessions = sessions.write().await;
                    for id in to_reap {
                        debug!(session_id = %id, "reaping session past its retention window");
                        sessions.remove(&id);
                    }
                }
            }
        });
    }
}

struct Driver<B, C, T> {
    id: SessionId,
    store: B,
    cache: C,
    transport: T,
    config: Config,
    status: Arc<RwLock<Status>>,
    stats: Arc<RwLock<Stats>>,
    cancellation: CancellationToken,
    close: CancellationToken,
}

impl<B, C, T> Driver<B, C, T>
where
    B: BlockStore + Clone + 'static,
    C: Cache + Clone + 'static,
    T: Transport + Clone + 'static,
{
    async fn set_status(&self, status: Status) {
        *self.status.write().await = status;
    }

    async fn record(&self, f: impl FnOnce(&mut Stats)) {
        let mut stats = self.stats.write().await;
        f(&mut stats);
    }

    /// Drive a [`SourceSession`] (push-requester): pull overflow/extra
    /// roots off `enqueue_rx` between rounds, send batches, and fold in the
    /// remote's response, until nothing remains to offer.
    #[instrument(skip_all, fields(session_id = %self.id))]
    async fn drive_source(&self, roots: Vec<Cid>, mut enqueue_rx: mpsc::UnboundedReceiver<Cid>) {
        let mut session = SourceSession::new(roots, &self.config);
        self.set_status(Status::Active).await;

        loop {
            if self.cancellation.is_cancelled() {
                self.set_status(Status::Cancelled("cancelled by caller or TTL supervisor".into()))
                    .await;
                return;
            }

            if self.close.is_cancelled() {
                self.set_status(Status::Draining).await;
                self.set_status(Status::Closed).await;
                return;
            }

            while let Ok(extra) = enqueue_rx.try_recv() {
                session.enqueue(extra);
            }

            let batch = tokio::select! {
                _ = self.cancellation.cancelled() => {
                    self.set_status(Status::Cancelled("cancelled mid-round".into())).await;
                    return;
                }
                result = session.next_batch(self.store.clone(), self.cache.clone()) => result,
            };

            let batch = match batch {
                Ok(batch) => batch,
                Err(err) => {
                    warn!(session_id = %self.id, error = %err, "source session failed");
                    self.set_status(Status::Errored(err.to_string())).await;
                    return;
                }
            };

            if !batch.not_found.is_empty() {
                debug!(session_id = %self.id, missing = ?batch.not_found, "roots not found locally");
            }

            let request = match session.to_push_request(batch.car, self.store.clone(), self.cache.clone()).await {
                Ok(request) => request,
                Err(err) => {
                    self.set_status(Status::Errored(err.to_string())).await;
                    return;
                }
            };

            self.record(|stats| {
                stats.rounds += 1;
                stats.blocks_sent = session.blocks_sent();
                stats.bytes_sent = session.bytes_sent();
            })
            .await;

            let response = match self.transport.push(Some(&self.id), request).await {
                Ok(response) => response,
                Err(err) => {
                    self.set_status(Status::Errored(err.to_string())).await;
                    return;
                }
            };

            let finished = response.indicates_finished();
            session.handle_push_response(response);

            if finished && session.is_finished() {
                self.set_status(Status::Draining).await;
                self.set_status(Status::Closed).await;
                return;
            }
        }
    }

    /// Drive a [`SinkSession`] (pull-requester): issue pull requests,
    /// ingest the CAR responses, and keep going (picking up any roots the
    /// caller enqueues along the way) until the sink has everything.
    #[instrument(skip_all, fields(session_id = %self.id))]
    async fn drive_sink(
        &self,
        roots: Vec<Cid>,
        shared_roots: Vec<Cid>,
        mut enqueue_rx: mpsc::UnboundedReceiver<Cid>,
    ) {
        let mut session = SinkSession::new(roots, shared_roots, &self.config);
        self.set_status(Status::Active).await;

        if let Err(err) = session.cold_start(self.store.clone(), self.cache.clone()).await {
            self.set_status(Status::Errored(err.to_string())).await;
            return;
        }

        loop {
            if self.cancellation.is_cancelled() {
                self.set_status(Status::Cancelled("cancelled by caller or TTL supervisor".into()))
                    .await;
                return;
            }

            while let Ok(extra) = enqueue_rx.try_recv() {
                session.enqueue(extra);
            }

            if session.is_finished() {
                self.set_status(Status::Draining).await;
                self.set_status(Status::Closed).await;
                return;
            }

            if self.close.is_cancelled() {
                self.set_status(Status::Draining).await;
                self.set_status(Status::Closed).await;
                return;
            }

            let request = session.to_pull_request();

            let car = tokio::select! {
                _ = self.cancellation.cancelled() => {
                    self.set_status(Status::Cancelled("cancelled mid-round".into())).await;
                    return;
                }
                result = self.transport.pull(Some(&self.id), request) => result,
            };

            let car = match car {
                Ok(car) => car,
                Err(err) => {
                    self.set_status(Status::Errored(err.to_string())).await;
                    return;
                }
            };

            if let Err(err) = session
                .ingest_pull_response(car, self.store.clone(), self.cache.clone())
                .await
            {
                self.set_status(Status::Errored(err.to_string())).await;
                return;
            }

            self.record(|stats| {
                stats.rounds += 1;
                stats.blocks_received = session.blocks_received();
                stats.bytes_received = session.bytes_received();
            })
            .await;
        }
    }
}
