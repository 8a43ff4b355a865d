//! Drives a CAR Mirror pull between two in-process "counterparts": a source
//! that already holds a small DAG, and a sink that wants it. Unlike the
//! streaming/non-streaming doctests in `car_mirror::pull`, this uses the
//! stateful `SourceSession`/`SinkSession` pair directly, round by round,
//! with no transport in between - the shape a caller embedding the engine
//! into its own request/response plumbing would actually write.

use car_mirror::{
    cache::NoCache,
    common::Config,
    session::{sink::SinkSession, source::SourceSession},
};
use ipld_core::ipld::Ipld;
use wnfs_common::{BlockStore, MemoryBlockStore, CODEC_DAG_CBOR};

async fn put_ipld(store: &MemoryBlockStore, ipld: &Ipld) -> anyhow::Result<wnfs_common::Cid> {
    let bytes = serde_ipld_dagcbor_bytes(ipld)?;
    Ok(store.put_block(bytes, CODEC_DAG_CBOR).await?)
}

fn serde_ipld_dagcbor_bytes(ipld: &Ipld) -> anyhow::Result<Vec<u8>> {
    Ok(serde_ipld_dagcbor::to_vec(ipld)?)
}

#[async_std::main]
async fn main() -> anyhow::Result<()> {
    let source_store = MemoryBlockStore::new();

    // A handful of leaves, linked from a single root - small enough to fit
    // in one round at the default per-round budget.
    let leaf_a = put_ipld(&source_store, &Ipld::String("a".into())).await?;
    let leaf_b = put_ipld(&source_store, &Ipld::String("b".into())).await?;
    let root = put_ipld(
        &source_store,
        &Ipld::List(vec![Ipld::Link(leaf_a), Ipld::Link(leaf_b)]),
    )
    .await?;

    let sink_store = MemoryBlockStore::new();
    let config = Config::default();

    let mut sink = SinkSession::new(vec![root], Vec::new(), &config);
    sink.cold_start(&sink_store, &NoCache).await?;

    let mut rounds = 0;
    while !sink.is_finished() {
        let request = sink.to_pull_request();

        // The source is rebuilt each round here purely to keep the demo
        // self-contained; a real counterpart would keep one `SourceSession`
        // alive across rounds (see `SessionRegistry`) so its `confirmation`
        // bloom and round counter persist.
        let mut source = SourceSession::new(request.resources.clone(), &config);
        source.merge_confirmation(request.bloom.into_filter());
        let batch = source.next_batch(&source_store, &NoCache).await?;

        sink.ingest_pull_response(batch.car, &sink_store, &NoCache).await?;
        rounds += 1;
    }

    println!(
        "sink received {} block(s) across {rounds} round(s)",
        sink.blocks_received()
    );

    assert!(sink_store.get_block(&root).await.is_ok());
    assert!(sink_store.get_block(&leaf_a).await.is_ok());
    assert!(sink_store.get_block(&leaf_b).await.is_ok());

    Ok(())
}
