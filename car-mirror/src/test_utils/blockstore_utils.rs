use anyhow::Result;
use bytes::Bytes;
use ipld_core::ipld::Ipld;
use wnfs_common::{BlockStore, Cid, MemoryBlockStore, CODEC_DAG_CBOR};

/// Take a list of dag-cbor IPLD blocks and store all of them as dag-cbor in a
/// MemoryBlockStore & return it.
pub async fn setup_blockstore(blocks: Vec<(Cid, Ipld)>) -> Result<MemoryBlockStore> {
    let store = MemoryBlockStore::new();
    for (cid, ipld) in blocks.into_iter() {
        let cid_store = store.put_block(encode(&ipld), CODEC_DAG_CBOR).await?;
        debug_assert_eq!(cid, cid_store);
    }

    Ok(store)
}

/// Encode some IPLD as dag-cbor.
pub fn encode(ipld: &Ipld) -> Bytes {
    Bytes::from(serde_ipld_dagcbor::to_vec(ipld).unwrap())
}

/// Chunk & store some file contents as UnixFS, returning the root CID.
///
/// Used by the push/pull test suites to exercise the protocol against
/// realistically-shaped DAGs (unixfs file trees) rather than only the
/// synthetic IPLD DAGs from `dag_strategy`. Gated to `cfg(test)` since
/// `wnfs-unixfs-file` is only a dev-dependency.
#[cfg(test)]
pub(crate) async fn store_test_unixfs(content: Vec<u8>, store: &impl BlockStore) -> Result<Cid> {
    use wnfs_unixfs_file::builder::FileBuilder;

    let root = FileBuilder::new()
        .content_bytes(content)
        .build()?
        .store(store)
        .await?;

    Ok(root)
}
