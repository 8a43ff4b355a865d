#![allow(unknown_lints)] // Because the `instrument` macro contains some `#[allow]`s that rust 1.66 doesn't know yet.

use anyhow::anyhow;
use async_stream::try_stream;
use bytes::Bytes;
use futures::{Stream, TryStreamExt};
use ipld_core::{codec::References, ipld::Ipld};
use iroh_car::{CarHeader, CarReader, CarWriter};
use std::{io::Cursor, pin::Pin, time::Duration};
use tracing::{debug, instrument, trace, warn};
use wnfs_common::{BlockStore, Cid, IpldCodec};

use crate::{
    bloom::BloomFilter,
    cache::Cache,
    dag_walk::DagWalk,
    error::Error,
    incremental_verification::{BlockState, IncrementalDagVerification},
    messages::{Bloom, PullRequest, PushResponse},
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Configuration values (byte/block budgets, bloom parameters, session TTL) for the
/// CAR mirror protocol, per spec.md §6.
#[derive(Clone, Debug)]
pub struct Config {
    /// A client will try to send at least `send_minimum` bytes of block data
    /// in each request, except if close to the end of the protocol (when there's)
    /// not that much data left.
    pub send_minimum: usize,
    /// The maximum number of bytes per request that the server accepts.
    pub receive_maximum: usize,
    /// The maximum number of roots per request that the server will send to the client,
    /// and that the client will consume.
    pub max_roots_per_round: usize,
    /// The target false positive rate for the bloom filter that the server sends,
    /// as a function of the number of elements inserted so far.
    pub bloom_fpr: fn(u64) -> f64,
    /// Per-round block count budget for session-driven traversal (spec.md §4.4,
    /// `max_blocks_per_round`). Distinct from `send_minimum`/`receive_maximum`,
    /// which bound one-round push/pull by bytes; the session layer bounds by
    /// block count instead.
    pub max_blocks_per_round: usize,
    /// The first-round (cold call) block count budget, usually smaller than
    /// `max_blocks_per_round` so a cold session gets a fast first response.
    pub max_blocks_per_cold_call: usize,
    /// Target false positive probability used when a session builds a bloom
    /// filter from scratch (spec.md §4.1).
    pub bloom_fpp: f64,
    /// Floor on the bit count of a session-built bloom filter, regardless of
    /// how few elements it's sized for (spec.md §4.1's `min_bits`).
    pub bloom_min_capacity: u64,
    /// Idle time-to-live for a session before the registry auto-cancels it
    /// (spec.md §4.6/§6, `session_ttl`).
    pub session_ttl: Duration,
    /// How long a terminal (closed/errored/cancelled) session's entry and
    /// stats snapshot are kept around after the fact, so `ls`/`stats`-shaped
    /// registry queries can still see it (spec.md §4.6: "The registry also
    /// holds a statistics snapshot keyed by session id so `ls` and `stats`
    /// can report on closed sessions"; §8 scenario 6: "`ls` lists it until a
    /// configurable retention expires").
    pub session_retention: Duration,
    /// Numeric tag selecting the registered hash function for bloom indexing.
    /// Only one hash function is registered at the moment (XXH3-64, id `0`).
    pub hash_function_id: u32,
}

/// Some information that the block receiving end provides the block sending end
/// in order to deduplicate block transfers.
#[derive(Debug, Clone)]
pub struct ReceiverState {
    /// At least *some* of the subgraph roots that are missing for sure on the receiving end.
    pub missing_subgraph_roots: Vec<Cid>,
    /// An optional bloom filter of all CIDs below the root that the receiving end has.
    pub have_cids_bloom: Option<BloomFilter>,
}

/// Newtype around bytes that are supposed to represent a CAR file
#[derive(Debug, Clone)]
pub struct CarFile {
    /// The car file contents as bytes.
    /// (`CarFile` is cheap to clone, since `Bytes` is an `Arc` wrapper around a byte buffer.)
    pub bytes: Bytes,
}

/// A stream of CARv1-framed bytes, as produced by the `_streaming` variants of
/// `push`/`pull`. The full round's batch is still bounded by the same
/// per-round budget as the non-streaming path (`Config::send_minimum`), so
/// memory use stays `O(budget)`, not `O(DAG size)`, per spec.md §5.
pub type CarStream<'a> = Pin<Box<dyn Stream<Item = Result<Bytes, Error>> + Send + 'a>>;

/// Chunk size used to turn a fully-assembled `CarFile` into a `CarStream`.
const STREAM_CHUNK_SIZE: usize = 16 * 1024;

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// This function is run on the block sending side of the protocol.
///
/// It's used on the client during the push protocol, or on the server
/// during the pull protocol.
///
/// It returns a `CarFile` of (a subset) of all blocks below `root`, that
/// are thought to be missing on the receiving end.
#[instrument(skip(config, store, cache))]
pub async fn block_send(
    root: Cid,
    last_state: Option<ReceiverState>,
    config: &Config,
    store: impl BlockStore,
    cache: impl Cache,
) -> Result<CarFile, Error> {
    let ReceiverState {
        ref missing_subgraph_roots,
        have_cids_bloom,
    } = last_state.unwrap_or(ReceiverState {
        missing_subgraph_roots: vec![root],
        have_cids_bloom: None,
    });

    // Verify that all missing subgraph roots are in the relevant DAG:
    let subgraph_roots =
        verify_missing_subgraph_roots(root, missing_subgraph_roots, &store, &cache).await?;

    let bloom = handle_missing_bloom(have_cids_bloom);

    let mut writer = CarWriter::new(
        CarHeader::new_v1(
            // https://github.com/wnfs-wg/car-mirror-spec/issues/6
            // CAR files *must* have at least one CID in them, and all of them
            // need to appear as a block in the payload.
            // It would probably make most sense to just write all subgraph roots into this,
            // but we don't know how many of the subgraph roots fit into this round yet,
            // so we're simply writing the first one in here, since we know
            // at least one block will be written (and it'll be that one).
            subgraph_roots.iter().take(1).cloned().collect(),
        ),
        Vec::new(),
    );

    writer
        .write_header()
        .await
        .map_err(Error::CarFileError)?;

    write_blocks_into_car(
        &mut writer,
        subgraph_roots,
        &bloom,
        config.send_minimum,
        &store,
        &cache,
    )
    .await?;

    Ok(CarFile {
        bytes: writer
            .finish()
            .await
            .map_err(Error::CarFileError)?
            .into(),
    })
}

/// Enumerate the `(Cid, Bytes)` pairs that `block_send` would write into a
/// CAR file, without the CAR framing itself. Used by `stream_car_frames` to
/// build a `CarStream` directly from a block stream, e.g. when the caller
/// wants to interleave CAR encoding with something other than this crate's
/// own `Config::send_minimum` byte budget.
#[instrument(skip(store, cache))]
pub async fn block_send_block_stream<'a>(
    root: Cid,
    last_state: Option<ReceiverState>,
    store: impl BlockStore + 'a,
    cache: impl Cache + 'a,
) -> Result<impl Stream<Item = Result<(Cid, Bytes), Error>> + 'a, Error> {
    let ReceiverState {
        missing_subgraph_roots,
        have_cids_bloom,
    } = last_state.unwrap_or(ReceiverState {
        missing_subgraph_roots: vec![root],
        have_cids_bloom: None,
    });

    let subgraph_roots =
        verify_missing_subgraph_roots(root, &missing_subgraph_roots, &store, &cache).await?;
    let bloom = handle_missing_bloom(have_cids_bloom);

    Ok(try_stream! {
        let mut dag_walk = DagWalk::breadth_first(subgraph_roots.clone());

        while let Some(item) = dag_walk.next(&store, &cache).await? {
            if bloom.test(item.cid.to_bytes()) && !subgraph_roots.contains(&item.cid) {
                continue;
            }

            yield (item.cid, item.bytes);
        }
    })
}

/// Wrap a stream of `(Cid, Bytes)` blocks (e.g. from `block_send_block_stream`)
/// into a CARv1-framed `CarStream`. The block stream is fully drained into a
/// single `CarFile` first (the CAR container codec is an external
/// collaborator per spec.md §1, and its streaming writer isn't assumed here),
/// then re-chunked, so memory use is bounded by however the block stream
/// itself was bounded (typically `Config::send_minimum`/`max_blocks_per_round`).
pub async fn stream_car_frames<'a>(
    block_stream: impl Stream<Item = Result<(Cid, Bytes), Error>> + 'a,
) -> Result<CarStream<'a>, Error> {
    futures::pin_mut!(block_stream);

    let mut first_root = None;
    let mut blocks = Vec::new();
    while let Some((cid, bytes)) = block_stream.try_next().await? {
        if first_root.is_none() {
            first_root = Some(cid);
        }
        blocks.push((cid, bytes));
    }

    let mut writer = CarWriter::new(
        CarHeader::new_v1(first_root.into_iter().collect()),
        Vec::new(),
    );

    writer
        .write_header()
        .await
        .map_err(Error::CarFileError)?;

    for (cid, bytes) in blocks {
        writer
            .write(cid, &bytes)
            .await
            .map_err(Error::CarFileError)?;
    }

    let bytes: Bytes = writer
        .finish()
        .await
        .map_err(Error::CarFileError)?
        .into();

    Ok(chunk_car_file(CarFile { bytes }))
}

fn chunk_car_file(car: CarFile) -> CarStream<'static> {
    Box::pin(try_stream! {
        let mut offset = 0;
        while offset < car.bytes.len() {
            let end = (offset + STREAM_CHUNK_SIZE).min(car.bytes.len());
            yield car.bytes.slice(offset..end);
            offset = end;
        }
    })
}

/// This function is run on the block receiving end of the protocol.
///
/// It's used on the client during the pull protocol and on the server
/// during the push protocol.
///
/// It takes a `CarFile`, verifies that its contents are related to the
/// `root` and returns some information to help the block sending side
/// figure out what blocks to send next.
#[instrument(skip(last_car, config, store, cache), fields(car_bytes = last_car.as_ref().map(|car| car.bytes.len())))]
pub async fn block_receive(
    root: Cid,
    last_car: Option<CarFile>,
    config: &Config,
    store: impl BlockStore,
    cache: impl Cache,
) -> Result<ReceiverState, Error> {
    let mut dag_verification = IncrementalDagVerification::new([root], &store, &cache).await?;

    if let Some(car) = last_car {
        let mut reader = CarReader::new(Cursor::new(car.bytes))
            .await
            .map_err(Error::CarFileError)?;

        read_and_verify_blocks(
            &mut dag_verification,
            &mut reader,
            config.receive_maximum,
            &store,
            &cache,
        )
        .await?;
    }

    finish_block_receive(dag_verification, config)
}

/// Streaming variant of `block_receive`: reads CAR frames directly off an
/// `AsyncRead` as they arrive, instead of requiring the whole batch to be
/// buffered up front. This lets the receiving end stop reading as soon as it
/// notices a block it didn't expect (most likely a bloom false positive on
/// the sender's side), per the doc comments on `push::response_streaming`
/// and `pull::handle_response_streaming`.
#[instrument(skip(reader, config, store, cache))]
pub async fn block_receive_car_stream(
    root: Cid,
    reader: impl tokio::io::AsyncRead + Unpin + wnfs_common::utils::CondSend,
    config: &Config,
    store: impl BlockStore,
    cache: impl Cache,
) -> Result<ReceiverState, Error> {
    let mut dag_verification = IncrementalDagVerification::new([root], &store, &cache).await?;

    let mut car_reader = CarReader::new(reader)
        .await
        .map_err(Error::CarFileError)?;

    read_and_verify_blocks(
        &mut dag_verification,
        &mut car_reader,
        config.receive_maximum,
        &store,
        &cache,
    )
    .await?;

    finish_block_receive(dag_verification, config)
}

fn finish_block_receive(
    dag_verification: IncrementalDagVerification,
    config: &Config,
) -> Result<ReceiverState, Error> {
    let missing_subgraph_roots = dag_verification
        .want_cids
        .iter()
        .take(config.max_roots_per_round)
        .cloned()
        .collect::<Vec<_>>();

    let bloom_capacity = dag_verification.have_cids.len() as u64;

    if bloom_capacity == 0 || missing_subgraph_roots.is_empty() {
        // Either nothing has been received yet, or we're done: no need to
        // compute a bloom.
        return Ok(ReceiverState {
            missing_subgraph_roots,
            have_cids_bloom: None,
        });
    }

    let mut bloom = BloomFilter::new_with_fpp(
        bloom_capacity,
        (config.bloom_fpr)(bloom_capacity),
        config.bloom_min_capacity,
    );

    dag_verification
        .have_cids
        .iter()
        .for_each(|cid| bloom.add(cid.to_bytes()));

    debug!(
        inserted_elements = bloom_capacity,
        size_bits = bloom.m(),
        hash_count = bloom.k(),
        ones_count = bloom.count_ones(),
        estimated_fpr = bloom.fpp(bloom_capacity),
        "built 'have cids' bloom",
    );

    Ok(ReceiverState {
        missing_subgraph_roots,
        have_cids_bloom: Some(bloom),
    })
}

/// Find all CIDs that a block references.
///
/// This will error out if
/// - the codec is not supported
/// - the block can't be parsed.
pub fn references<E: Extend<Cid>>(
    cid: Cid,
    block: impl AsRef<[u8]>,
    mut refs: E,
) -> Result<E, Error> {
    let codec: IpldCodec = cid
        .codec()
        .try_into()
        .map_err(|_| Error::UnsupportedCodec { cid })?;

    <Ipld as References<IpldCodec>>::references(codec, &mut Cursor::new(block), &mut refs)
        .map_err(|e| Error::ParsingError(anyhow!(e)))?;
    Ok(refs)
}

//--------------------------------------------------------------------------------------------------
// Private Functions
//--------------------------------------------------------------------------------------------------

async fn verify_missing_subgraph_roots(
    root: Cid,
    missing_subgraph_roots: &Vec<Cid>,
    store: &impl BlockStore,
    cache: &impl Cache,
) -> Result<Vec<Cid>, Error> {
    let subgraph_roots: Vec<Cid> = DagWalk::breadth_first([root])
        .stream(store, cache)
        .try_filter_map(
            |item| async move { Ok(missing_subgraph_roots.contains(&item.cid).then_some(item.cid)) },
        )
        .try_collect()
        .await?;

    if subgraph_roots.len() != missing_subgraph_roots.len() {
        let unrelated_roots = missing_subgraph_roots
            .iter()
            .filter(|cid| !subgraph_roots.contains(cid))
            .map(|cid| cid.to_string())
            .collect::<Vec<_>>()
            .join(", ");

        warn!(
            unrelated_roots = %unrelated_roots,
            "got asked for DAG-unrelated blocks"
        );
    }

    Ok(subgraph_roots)
}

fn handle_missing_bloom(have_cids_bloom: Option<BloomFilter>) -> BloomFilter {
    if let Some(bloom) = &have_cids_bloom {
        debug!(
            size_bits = bloom.m(),
            hash_count = bloom.k(),
            ones_count = bloom.count_ones(),
            "received 'have cids' bloom",
        );
    }

    have_cids_bloom.unwrap_or_else(BloomFilter::empty)
}

async fn write_blocks_into_car<W: tokio::io::AsyncWrite + Unpin + Send>(
    writer: &mut CarWriter<W>,
    subgraph_roots: Vec<Cid>,
    bloom: &BloomFilter,
    send_minimum: usize,
    store: &impl BlockStore,
    cache: &impl Cache,
) -> Result<(), Error> {
    let mut block_bytes = 0;
    let mut dag_walk = DagWalk::breadth_first(subgraph_roots.clone());

    while let Some(item) = dag_walk.next(store, cache).await? {
        let cid = item.cid;
        let block = item.bytes;

        if bloom.test(cid.to_bytes()) && !subgraph_roots.contains(&cid) {
            debug!(
                cid = %cid,
                "skipped writing block, bloom claims the receiver already has it"
            );
            continue;
        }

        debug!(
            cid = %cid,
            num_bytes = block.len(),
            "writing block to CAR",
        );

        writer
            .write(cid, &block)
            .await
            .map_err(Error::CarFileError)?;

        // TODO(matheus23): Count the actual bytes sent?
        // At the moment, this is a rough estimate. iroh-car could be improved to return the written bytes.
        block_bytes += block.len();
        if block_bytes > send_minimum {
            break;
        }
    }

    Ok(())
}

async fn read_and_verify_blocks<R: tokio::io::AsyncRead + Unpin>(
    dag_verification: &mut IncrementalDagVerification,
    reader: &mut CarReader<R>,
    receive_maximum: usize,
    store: &impl BlockStore,
    cache: &impl Cache,
) -> Result<(), Error> {
    let mut block_bytes = 0;
    while let Some((cid, vec)) = reader
        .next_block()
        .await
        .map_err(Error::CarFileError)?
    {
        let block = Bytes::from(vec);

        debug!(
            cid = %cid,
            num_bytes = block.len(),
            "reading block from CAR",
        );

        block_bytes += block.len();
        if block_bytes > receive_maximum {
            return Err(Error::TooManyBytes {
                block_bytes,
                receive_maximum,
            });
        }

        match dag_verification.block_state(cid) {
            BlockState::Have => continue,
            BlockState::Unexpected => {
                trace!(
                    cid = %cid,
                    "received block out of order (possibly due to bloom false positive)"
                );
                break;
            }
            BlockState::Want => {
                dag_verification
                    .verify_and_store_block((cid, block), store, cache)
                    .await?;
            }
        }
    }

    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Implementations
//--------------------------------------------------------------------------------------------------

impl From<PushResponse> for ReceiverState {
    fn from(push: PushResponse) -> Self {
        let PushResponse {
            subgraph_roots,
            bloom,
        } = push;

        Self {
            missing_subgraph_roots: subgraph_roots,
            have_cids_bloom: bloom.into_filter(),
        }
    }
}

impl From<PullRequest> for ReceiverState {
    fn from(pull: PullRequest) -> Self {
        let PullRequest { resources, bloom } = pull;

        Self {
            missing_subgraph_roots: resources,
            have_cids_bloom: bloom.into_filter(),
        }
    }
}

impl From<ReceiverState> for PushResponse {
    fn from(receiver_state: ReceiverState) -> PushResponse {
        let ReceiverState {
            missing_subgraph_roots,
            have_cids_bloom,
        } = receiver_state;

        PushResponse {
            subgraph_roots: missing_subgraph_roots,
            bloom: Bloom::from_filter(have_cids_bloom.as_ref()),
        }
    }
}

impl From<ReceiverState> for PullRequest {
    fn from(receiver_state: ReceiverState) -> PullRequest {
        let ReceiverState {
            missing_subgraph_roots,
            have_cids_bloom,
        } = receiver_state;

        PullRequest {
            resources: missing_subgraph_roots,
            bloom: Bloom::from_filter(have_cids_bloom.as_ref()),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            send_minimum: 128 * 1024,    // 128KiB
            receive_maximum: 512 * 1024, // 512KiB
            max_roots_per_round: 1000,   // max. ~41KB of CIDs
            bloom_fpr: |num_of_elems| f64::min(0.001, 0.1 / num_of_elems as f64),
            max_blocks_per_round: 100,
            max_blocks_per_cold_call: 20,
            bloom_fpp: 1.0e-4,
            bloom_min_capacity: crate::bloom::DEFAULT_MIN_BITS,
            session_ttl: Duration::from_secs(30),
            session_retention: Duration::from_secs(5 * 60),
            hash_function_id: 0,
        }
    }
}
