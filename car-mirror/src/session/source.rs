//! The block-sending end of a session: push-requester or pull-responder
//! (spec.md §4.4).

use bytes::Bytes;
use iroh_car::{CarHeader, CarWriter};
use std::collections::{HashSet, VecDeque};
use tracing::{debug, instrument};
use wnfs_common::{BlockStore, BlockStoreError, Cid};

use crate::{
    bloom::BloomFilter,
    cache::Cache,
    common::{CarFile, Config},
    dag_walk::DagWalk,
    error::Error,
    messages::{Bloom, PullRequest, PushRequest, PushResponse},
};

/// The result of running [`SourceSession::next_batch`]: the CAR payload to
/// send, plus anything that couldn't be resolved locally. `not_found` CIDs
/// are surfaced rather than failing the whole round, per spec.md §4.2/§4.4
/// ("Blocks not resolvable locally become not_found and are surfaced as an
/// error for that specific root; the rest of the batch proceeds").
#[derive(Debug)]
pub struct SourceBatch {
    /// The CAR-encoded blocks chosen for this round.
    pub car: CarFile,
    /// Roots that couldn't be found in the local store.
    pub not_found: Vec<Cid>,
}

/// Stateful driver for the block-sending side of a session: the source
/// holds the blocks and decides, round by round and under a block budget,
/// which of them the other side still needs.
///
/// Grounded on the teacher's `push::request`/`pull::response` *functions*,
/// generalized to hold state across rounds (`remaining_roots`,
/// `confirmation`, `round`) instead of requiring the caller to pass
/// `Option<PushResponse>` by hand each time.
#[derive(Debug, Clone)]
pub struct SourceSession {
    /// The roots this session was opened for. Roots always bypass the
    /// bloom filter (spec.md §4.4: "protecting against false positives").
    roots: Vec<Cid>,
    /// Roots still to be walked this round and onward.
    remaining_roots: VecDeque<Cid>,
    /// The remote's best-known "already has" estimate.
    confirmation: Option<BloomFilter>,
    /// Frontier collected by the most recent `next_batch` call, once the
    /// per-round budget was exhausted. Folded into `remaining_roots` once
    /// the caller reports back the remote's subgraph-roots via
    /// `handle_push_response`, per spec.md §4.4's "Next-batch algorithm"/
    /// "On response".
    pending_overflow: Vec<Cid>,
    round: u64,
    max_blocks_per_round: usize,
    max_blocks_per_cold_call: usize,
    bloom_fpp: f64,
    bloom_min_capacity: u64,
    blocks_sent: u64,
    bytes_sent: u64,
}

impl SourceSession {
    /// Open a new source session for the given roots.
    pub fn new(roots: Vec<Cid>, config: &Config) -> Self {
        Self {
            remaining_roots: roots.iter().cloned().collect(),
            roots,
            confirmation: None,
            pending_overflow: Vec::new(),
            round: 0,
            max_blocks_per_round: config.max_blocks_per_round,
            max_blocks_per_cold_call: config.max_blocks_per_cold_call,
            bloom_fpp: config.bloom_fpp,
            bloom_min_capacity: config.bloom_min_capacity,
            blocks_sent: 0,
            bytes_sent: 0,
        }
    }

    /// Seed (or replace) the session's estimate of what the remote already
    /// has. Used when a `PushRequest`'s own bloom (the "remaining not yet
    /// sent" hint, see [`to_push_request`](Self::to_push_request)) or a
    /// `PullRequest`'s bloom arrives from the other side.
    pub fn merge_confirmation(&mut self, bloom: Option<BloomFilter>) {
        let Some(incoming) = bloom else {
            return;
        };
        match &mut self.confirmation {
            Some(existing) if existing.merge(&incoming) => {}
            _ => self.confirmation = Some(incoming),
        }
    }

    /// The current round number. Round 0 is the cold call.
    pub fn round(&self) -> u64 {
        self.round
    }

    /// Whether there's nothing left to offer: no roots remain and no
    /// overflow is waiting on a response.
    pub fn is_finished(&self) -> bool {
        self.remaining_roots.is_empty() && self.pending_overflow.is_empty()
    }

    /// Offer an additional root in a later round, without disturbing
    /// anything already in flight (the registry's `enqueue` operation for a
    /// source session, spec.md §4.6).
    pub fn enqueue(&mut self, root: Cid) {
        if !self.roots.contains(&root) {
            self.roots.push(root);
        }
        if !self.remaining_roots.contains(&root) {
            self.remaining_roots.push_back(root);
        }
    }

    /// Total blocks written into CAR batches so far.
    pub fn blocks_sent(&self) -> u64 {
        self.blocks_sent
    }

    /// Total bytes written into CAR batches so far.
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    /// Run the "Next-batch algorithm" of spec.md §4.4 against the current
    /// `remaining_roots` and `confirmation`.
    ///
    /// - Round 0 uses `max_blocks_per_cold_call`; later rounds use
    ///   `max_blocks_per_round`.
    /// - A requested root is always included, bypassing the bloom.
    /// - A non-root block is skipped (and its descendants never visited;
    ///   see `dag_walk::DagWalk::skip_walking`) when the confirmation bloom
    ///   claims the remote already has it (spec.md §4.2's bloom-prune stop
    ///   condition).
    /// - Once the budget is filled, subsequent frontier blocks are recorded
    ///   as overflow (to become next round's roots) and likewise have their
    ///   descent pruned, rather than being fetched and discarded.
    #[instrument(skip(self, store, cache))]
    pub async fn next_batch(
        &mut self,
        store: impl BlockStore,
        cache: impl Cache,
    ) -> Result<SourceBatch, Error> {
        let budget = if self.round == 0 {
            self.max_blocks_per_cold_call
        } else {
            self.max_blocks_per_round
        };

        let roots: HashSet<Cid> = self.remaining_roots.iter().copied().collect();
        let mut walk = DagWalk::breadth_first(self.remaining_roots.iter().copied());

        let mut batch: Vec<(Cid, Bytes)> = Vec::new();
        let mut overflow = Vec::new();
        let mut not_found = Vec::new();

        loop {
            match walk.next(&store, &cache).await {
                Ok(None) => break,
                Ok(Some(item)) => {
                    let is_root = roots.contains(&item.cid);
                    let remote_has_it = !is_root
                        && self
                            .confirmation
                            .as_ref()
                            .is_some_and(|bloom| bloom.test(item.cid.to_bytes()));

                    if remote_has_it {
                        debug!(cid = %item.cid, "pruning descent, confirmation bloom claims remote has it");
                        walk.skip_walking((item.cid, item.bytes))?;
                        continue;
                    }

                    if batch.len() < budget {
                        batch.push((item.cid, item.bytes));
                    } else {
                        overflow.push(item.cid);
                        walk.skip_walking((item.cid, item.bytes))?;
                    }
                }
                Err(Error::BlockStoreError(BlockStoreError::CIDNotFound(cid))) => {
                    not_found.push(cid);
                }
                Err(e) => return Err(e),
            }
        }

        self.blocks_sent += batch.len() as u64;
        let car = write_car(&batch).await?;
        self.bytes_sent += car.bytes.len() as u64;
        self.pending_overflow = overflow;

        Ok(SourceBatch { car, not_found })
    }

    /// Fold the remote's response into session state: the next round's
    /// roots are the union of this round's overflow and the remote's
    /// reported subgraph-roots; the remote's bloom becomes (or extends)
    /// the confirmation estimate.
    pub fn handle_push_response(&mut self, response: PushResponse) {
        let mut seen: HashSet<Cid> = HashSet::new();
        self.remaining_roots = self
            .pending_overflow
            .drain(..)
            .chain(response.subgraph_roots)
            .filter(|cid| seen.insert(*cid))
            .collect();

        self.merge_confirmation(response.bloom.into_filter());
        self.round += 1;
    }

    /// Build the `PushRequest` for the batch most recently produced by
    /// `next_batch`.
    ///
    /// On the cold call only, this also attaches a bloom over every CID
    /// still queued up (`remaining_roots` plus this round's overflow) that
    /// the session would still offer in future rounds, sized the same way
    /// a sink's cold-start estimate is (spec.md §4.1/§4.4): "an optional
    /// bloom of the remaining-not-yet-sent CIDs...used on the cold call to
    /// let the remote reply with a confirmation [in the next round]".
    pub async fn to_push_request(
        &self,
        car: CarFile,
        store: impl BlockStore,
        cache: impl Cache,
    ) -> Result<PushRequest, Error> {
        let bloom = if self.round == 0 {
            self.remaining_not_sent_bloom(store, cache).await?
        } else {
            None
        };

        Ok(PushRequest {
            bloom: Bloom::from_filter(bloom.as_ref()),
            payload: car.bytes.to_vec(),
        })
    }

    async fn remaining_not_sent_bloom(
        &self,
        store: impl BlockStore,
        cache: impl Cache,
    ) -> Result<Option<BloomFilter>, Error> {
        let seeds = self
            .remaining_roots
            .iter()
            .chain(self.pending_overflow.iter())
            .copied();

        let mut cids = Vec::new();
        let mut walk = DagWalk::breadth_first(seeds);
        loop {
            match walk.next(&store, &cache).await {
                Ok(None) => break,
                Ok(Some(item)) => cids.push(item.cid),
                Err(Error::BlockStoreError(BlockStoreError::CIDNotFound(_))) => continue,
                Err(e) => return Err(e),
            }
        }

        if cids.is_empty() {
            return Ok(None);
        }

        let mut bloom = BloomFilter::new_with_fpp(cids.len() as u64, self.bloom_fpp, self.bloom_min_capacity);
        for cid in cids {
            bloom.add(cid.to_bytes());
        }
        Ok(Some(bloom))
    }

    /// Answer a single `PullRequest` on the pull-responder side: seed a
    /// fresh session from the request's roots and bloom, then run one
    /// round of the next-batch algorithm. Kept as a method on
    /// `SourceSession` (rather than a free function) so a registry-driven
    /// responder can reuse round-count/byte stats across repeated requests
    /// from the same sink (e.g. correlated via a `car-mirror-sid` header).
    pub async fn respond_to_pull(
        request: PullRequest,
        config: &Config,
        store: impl BlockStore,
        cache: impl Cache,
    ) -> Result<CarFile, Error> {
        let mut session = Self::new(request.resources, config);
        session.confirmation = request.bloom.into_filter();
        let batch = session.next_batch(store, cache).await?;
        Ok(batch.car)
    }
}

async fn write_car(blocks: &[(Cid, Bytes)]) -> Result<CarFile, Error> {
    let first_root = blocks.first().map(|(cid, _)| *cid);
    let mut writer = CarWriter::new(CarHeader::new_v1(first_root.into_iter().collect()), Vec::new());

    writer.write_header().await.map_err(Error::CarFileError)?;
    for (cid, bytes) in blocks {
        writer.write(*cid, bytes).await.map_err(Error::CarFileError)?;
    }

    Ok(CarFile {
        bytes: writer.finish().await.map_err(Error::CarFileError)?.into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{cache::NoCache, test_utils::encode};
    use ipld_core::{cid::multihash::Multihash, ipld::Ipld};
    use testresult::TestResult;
    use wnfs_common::{MemoryBlockStore, CODEC_DAG_CBOR, MULTIHASH_BLAKE3};

    fn missing_cid() -> Cid {
        let hash = Multihash::wrap(MULTIHASH_BLAKE3, blake3::hash(b"never stored").as_bytes()).unwrap();
        Cid::new_v1(CODEC_DAG_CBOR, hash)
    }

    async fn linear_dag(store: &MemoryBlockStore, n: usize) -> Cid {
        let mut cid = store
            .put_block(encode(&Ipld::String("leaf".into())), CODEC_DAG_CBOR)
            .await
            .unwrap();
        for _ in 0..n {
            cid = store
                .put_block(encode(&Ipld::List(vec![Ipld::Link(cid)])), CODEC_DAG_CBOR)
                .await
                .unwrap();
        }
        cid
    }

    #[test_log::test(async_std::test)]
    async fn single_round_covers_small_dag() -> TestResult {
        let store = MemoryBlockStore::new();
        let root = linear_dag(&store, 2).await;

        let config = Config::default();
        let mut session = SourceSession::new(vec![root], &config);
        let batch = session.next_batch(&store, &NoCache).await?;

        assert!(batch.not_found.is_empty());
        assert!(session.pending_overflow.is_empty());
        assert_eq!(session.blocks_sent(), 3);
        Ok(())
    }

    #[test_log::test(async_std::test)]
    async fn budget_overflow_becomes_new_remaining_roots() -> TestResult {
        let store = MemoryBlockStore::new();
        let root = linear_dag(&store, 10).await;

        let config = Config {
            max_blocks_per_cold_call: 3,
            ..Config::default()
        };
        let mut session = SourceSession::new(vec![root], &config);
        let batch = session.next_batch(&store, &NoCache).await?;

        assert_eq!(session.blocks_sent(), 3);
        assert!(!session.pending_overflow.is_empty());
        assert!(batch.not_found.is_empty());

        session.handle_push_response(PushResponse {
            subgraph_roots: Vec::new(),
            bloom: Bloom::none(),
        });
        assert!(!session.is_finished());
        assert_eq!(session.round(), 1);
        Ok(())
    }

    #[test_log::test(async_std::test)]
    async fn confirmation_bloom_prunes_descent() -> TestResult {
        let store = MemoryBlockStore::new();
        let leaf = store
            .put_block(encode(&Ipld::String("leaf".into())), CODEC_DAG_CBOR)
            .await?;
        let root = store
            .put_block(encode(&Ipld::List(vec![Ipld::Link(leaf)])), CODEC_DAG_CBOR)
            .await?;

        let config = Config::default();
        let mut session = SourceSession::new(vec![root], &config);

        let mut bloom = BloomFilter::new_with_fpp(1, config.bloom_fpp, config.bloom_min_capacity);
        bloom.add(leaf.to_bytes());
        session.merge_confirmation(Some(bloom));

        let batch = session.next_batch(&store, &NoCache).await?;
        // root is always included (bypasses bloom); leaf is pruned.
        assert_eq!(session.blocks_sent(), 1);
        assert!(batch.not_found.is_empty());
        Ok(())
    }

    #[test_log::test(async_std::test)]
    async fn not_found_roots_are_surfaced_not_fatal() -> TestResult {
        let store = MemoryBlockStore::new();
        let real_root = linear_dag(&store, 1).await;
        let missing = missing_cid();

        let config = Config::default();
        let mut session = SourceSession::new(vec![real_root, missing], &config);
        let batch = session.next_batch(&store, &NoCache).await?;

        assert_eq!(batch.not_found, vec![missing]);
        assert_eq!(session.blocks_sent(), 2);
        Ok(())
    }
}
