//! The block-receiving end of a session: pull-requester or push-responder
//! (spec.md §4.5).

use bytes::Bytes;
use iroh_car::CarReader;
use std::collections::{HashSet, VecDeque};
use std::io::Cursor;
use tracing::instrument;
use wnfs_common::{BlockStore, Cid};

use crate::{
    bloom::BloomFilter,
    cache::Cache,
    common::{CarFile, Config},
    dag_walk::DagWalk,
    error::Error,
    incremental_verification::{BlockState, IncrementalDagVerification},
    messages::{Bloom, PullRequest, PushRequest, PushResponse},
};

/// Stateful driver for the block-receiving side of a session: the sink
/// wants the DAG below some roots and tracks, round by round, what it's
/// already asked for and what it believes it already has.
///
/// Grounded on the teacher's `pull::request`/`push::response` functions,
/// plus the `diff`/shared-roots idea from `cm.go`/`carmirror/push.go`
/// (`examples/original_source/`), generalized into a persistent struct per
/// spec.md §4.5.
#[derive(Debug, Clone)]
pub struct SinkSession {
    /// All roots this session was opened for (used to seed incremental
    /// verification on the push-responder path).
    roots: Vec<Cid>,
    /// Roots still to be asked for.
    pending_roots: VecDeque<Cid>,
    /// Dedup index for `pending_roots` (spec.md §5: "Enqueued roots are
    /// processed in FIFO order with deduplication").
    queued: HashSet<Cid>,
    /// CIDs whose subtrees are assumed likely-present at the remote
    /// already (the "diff" parameter, spec.md §9's open question #3),
    /// folded into the cold-start estimate alongside `pending_roots`.
    shared_roots: Vec<Cid>,
    /// What the sink believes it already has, as a bloom.
    estimate: Option<BloomFilter>,
    /// Whether a cleanup round (no bloom, forces full transmission) is
    /// scheduled for the next request.
    cleanup_pending: bool,
    /// Whether the round about to be (or just) ingested *was* a cleanup
    /// round, tracked across the request/response boundary.
    in_cleanup_round: bool,
    /// The roots asked for in the most recently built request, used to
    /// detect "response returned only what was asked" (spec.md §4.5 step 4).
    last_ask: Vec<Cid>,
    round: u64,
    max_blocks_per_round: usize,
    max_roots_per_round: usize,
    receive_maximum: usize,
    bloom_fpp: f64,
    bloom_min_capacity: u64,
    blocks_received: u64,
    bytes_received: u64,
}

impl SinkSession {
    /// Open a new sink session wanting `roots`, optionally seeded with
    /// `shared_roots` already believed present at the remote.
    pub fn new(roots: Vec<Cid>, shared_roots: Vec<Cid>, config: &Config) -> Self {
        let queued: HashSet<Cid> = roots.iter().copied().collect();
        Self {
            pending_roots: roots.iter().copied().collect(),
            queued,
            roots,
            shared_roots,
            estimate: None,
            cleanup_pending: false,
            in_cleanup_round: false,
            last_ask: Vec::new(),
            round: 0,
            max_blocks_per_round: config.max_blocks_per_round,
            max_roots_per_round: config.max_roots_per_round,
            receive_maximum: config.receive_maximum,
            bloom_fpp: config.bloom_fpp,
            bloom_min_capacity: config.bloom_min_capacity,
            blocks_received: 0,
            bytes_received: 0,
        }
    }

    /// Append a root to the pending queue (the registry's `enqueue`
    /// operation, spec.md §4.6). Deduplicated against whatever's already
    /// queued.
    pub fn enqueue(&mut self, root: Cid) {
        if self.queued.insert(root) {
            self.pending_roots.push_back(root);
        }
    }

    /// The current round number. Round 0 is the cold call.
    pub fn round(&self) -> u64 {
        self.round
    }

    /// Whether the session has nothing left to ask for and no cleanup
    /// round pending (spec.md §4.5 step 6).
    pub fn is_finished(&self) -> bool {
        self.pending_roots.is_empty() && !self.cleanup_pending
    }

    /// Total blocks received and verified so far.
    pub fn blocks_received(&self) -> u64 {
        self.blocks_received
    }

    /// Total bytes received so far.
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    /// Round-0 bookkeeping: build `estimate` from everything already
    /// locally reachable under `pending_roots ∪ shared_roots`. Leaves
    /// `estimate` as `None` if nothing is found (the "no estimate" signal
    /// to the remote, spec.md §4.5).
    #[instrument(skip(self, store, cache))]
    pub async fn cold_start(&mut self, store: impl BlockStore, cache: impl Cache) -> Result<(), Error> {
        let seeds = self
            .pending_roots
            .iter()
            .chain(self.shared_roots.iter())
            .copied();

        self.estimate = reachable_have_bloom(seeds, &store, &cache, self.bloom_fpp, self.bloom_min_capacity).await?;
        Ok(())
    }

    /// Build the next `PullRequest`: up to `max_blocks_per_round` roots
    /// from the front of `pending_roots`, plus the current estimate bloom
    /// (omitted entirely during a cleanup round, so nothing is elided).
    pub fn to_pull_request(&mut self) -> PullRequest {
        let mut ask = Vec::new();
        while ask.len() < self.max_blocks_per_round {
            let Some(cid) = self.pending_roots.pop_front() else {
                break;
            };
            self.queued.remove(&cid);
            ask.push(cid);
        }

        self.last_ask = ask.clone();
        self.in_cleanup_round = self.cleanup_pending;

        let bloom = if self.cleanup_pending {
            None
        } else {
            self.estimate.as_ref()
        };

        PullRequest {
            resources: ask,
            bloom: Bloom::from_filter(bloom),
        }
    }

    /// Ingest a CAR response to a pull request: verify and store each
    /// block, grow the estimate, detect whether a cleanup round is now
    /// needed, and recompute `pending_roots` from whatever's still missing
    /// below the original roots, per the teacher's `finish_block_receive`
    /// (`common.rs`), which derives exactly this from
    /// `IncrementalDagVerification::want_cids` rather than re-deriving a
    /// subgraph frontier from only the blocks just received.
    #[instrument(skip(self, car, store, cache))]
    pub async fn ingest_pull_response(
        &mut self,
        car: CarFile,
        store: impl BlockStore,
        cache: impl Cache,
    ) -> Result<(), Error> {
        let received = self.ingest_car(self.roots.clone(), car, &store, &cache).await?;
        self.bytes_received += received.bytes_total as u64;

        let received_set: HashSet<Cid> = received.cids.iter().copied().collect();
        let asked_set: HashSet<Cid> = self.last_ask.iter().copied().collect();

        self.cleanup_pending = if self.in_cleanup_round {
            false
        } else {
            !asked_set.is_empty() && received_set == asked_set
        };

        for cid in received.missing {
            self.enqueue(cid);
        }

        self.round += 1;
        Ok(())
    }

    /// Push-responder side: ingest an incoming `PushRequest`'s CAR payload
    /// and reply with the blocks the pusher should keep sending
    /// descendants of, plus a confirmation bloom of what's locally
    /// reachable beneath them (spec.md §4.5's "Push acceptance").
    #[instrument(skip(self, request, store, cache))]
    pub async fn respond_to_push(
        &mut self,
        request: PushRequest,
        store: impl BlockStore,
        cache: impl Cache,
    ) -> Result<PushResponse, Error> {
        let car = CarFile {
            bytes: request.payload.into(),
        };
        let received = self.ingest_car(self.roots.clone(), car, &store, &cache).await?;
        self.bytes_received += received.bytes_total as u64;

        let confirmation = reachable_have_bloom(
            received.missing.iter().copied(),
            &store,
            &cache,
            self.bloom_fpp,
            self.bloom_min_capacity,
        )
        .await?;

        for cid in &received.missing {
            self.enqueue(*cid);
        }
        self.round += 1;

        Ok(PushResponse {
            subgraph_roots: received.missing,
            bloom: Bloom::from_filter(confirmation.as_ref()),
        })
    }

    async fn ingest_car(
        &mut self,
        roots: Vec<Cid>,
        car: CarFile,
        store: &impl BlockStore,
        cache: &impl Cache,
    ) -> Result<ReceivedBatch, Error> {
        let mut dag_verification = IncrementalDagVerification::new(roots, store, cache).await?;
        let mut reader = CarReader::new(Cursor::new(car.bytes)).await.map_err(Error::CarFileError)?;

        let mut cids = Vec::new();
        let mut bytes_total = 0usize;

        while let Some((cid, raw)) = reader.next_block().await.map_err(Error::CarFileError)? {
            let bytes = Bytes::from(raw);

            bytes_total += bytes.len();
            if bytes_total > self.receive_maximum {
                return Err(Error::TooManyBytes {
                    block_bytes: bytes_total,
                    receive_maximum: self.receive_maximum,
                });
            }

            match dag_verification.block_state(cid) {
                BlockState::Have => continue,
                BlockState::Unexpected => break,
                BlockState::Want => {
                    dag_verification
                        .verify_and_store_block((cid, bytes.clone()), store, cache)
                        .await?;
                    self.blocks_received += 1;
                    cids.push(cid);
                }
            }
        }

        for cid in &cids {
            self.grow_estimate(*cid);
        }

        let missing = dag_verification
            .want_cids
            .iter()
            .take(self.max_roots_per_round)
            .copied()
            .collect();

        Ok(ReceivedBatch {
            cids,
            missing,
            bytes_total,
        })
    }

    /// Add a newly-received CID to the estimate, rebuilding it at double
    /// size first if it's crossed the saturation threshold (spec.md §4.7:
    /// "if ones/m > 0.5, rebuild the bloom at double m before the next
    /// round").
    fn grow_estimate(&mut self, cid: Cid) {
        let bloom = self.estimate.get_or_insert_with(|| {
            BloomFilter::new_with_fpp(1, self.bloom_fpp, self.bloom_min_capacity)
        });

        if bloom.saturation() > 0.5 {
            *bloom = bloom.doubled();
        }

        bloom.add(cid.to_bytes());
    }
}

struct ReceivedBatch {
    cids: Vec<Cid>,
    missing: Vec<Cid>,
    bytes_total: usize,
}

/// Shared cold-start-style helper: BFS from `seeds`, collecting every CID
/// that's already present locally, and build a bloom sized for that count.
/// Returns `None` if nothing was found, which is the wire "no estimate"
/// signal (spec.md §4.5).
async fn reachable_have_bloom(
    seeds: impl IntoIterator<Item = Cid>,
    store: &impl BlockStore,
    cache: &impl Cache,
    bloom_fpp: f64,
    bloom_min_capacity: u64,
) -> Result<Option<BloomFilter>, Error> {
    let mut have = Vec::new();
    let mut walk = DagWalk::breadth_first(seeds);

    loop {
        match walk.next(store, cache).await {
            Ok(None) => break,
            Ok(Some(item)) => have.push(item.cid),
            Err(Error::BlockStoreError(wnfs_common::BlockStoreError::CIDNotFound(_))) => continue,
            Err(e) => return Err(e),
        }
    }

    if have.is_empty() {
        return Ok(None);
    }

    let mut bloom = BloomFilter::new_with_fpp(have.len() as u64, bloom_fpp, bloom_min_capacity);
    for cid in have {
        bloom.add(cid.to_bytes());
    }
    Ok(Some(bloom))
}
