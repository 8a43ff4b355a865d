//! Computing subgraph-roots: the frontier of a partially-transferred DAG.
//!
//! Given a set of CIDs that are all known locally (e.g. everything a batch
//! just wrote into a store), the subgraph-roots are the links that leave
//! that set — the minimal cut that, together with the set itself, still
//! covers the DAG below. Both the source session (§4.4, computing what to
//! send next) and the sink session (§4.5, computing what to ask for next,
//! or what to report back after a push) need exactly this computation, so
//! it's pulled out of `common.rs`'s ad hoc loops into its own component.

use crate::{common::references, error::Error};
use std::collections::HashSet;
use wnfs_common::Cid;

/// Compute `R = { link ∈ links(b) | b ∈ known, link ∉ known }` for a set of
/// locally-known blocks.
///
/// `known` is every CID considered "inside" the set (e.g. everything
/// reachable and present after a batch of traversal). For each block in
/// `known`, this looks up its bytes in `blocks` and extracts its references;
/// any reference not already in `known` is a subgraph root. The result is
/// deduplicated; order follows first discovery and is otherwise
/// insignificant, per spec.md §4.3.
pub fn subgraph_roots<'a>(
    known: impl IntoIterator<Item = &'a Cid>,
    blocks: impl Fn(&Cid) -> Option<&'a [u8]>,
) -> Result<Vec<Cid>, Error> {
    let known: HashSet<Cid> = known.into_iter().copied().collect();
    let mut roots = Vec::new();
    let mut seen = HashSet::new();

    for cid in known.iter() {
        let Some(bytes) = blocks(cid) else {
            continue;
        };

        let refs: Vec<Cid> = references(*cid, bytes, Vec::new())?;
        for link in refs {
            if !known.contains(&link) && seen.insert(link) {
                roots.push(link);
            }
        }
    }

    Ok(roots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::encode;
    use ipld_core::{cid::multihash::Multihash, ipld::Ipld};
    use std::collections::HashMap;
    use wnfs_common::{CODEC_DAG_CBOR, MULTIHASH_BLAKE3};

    fn cid_for(bytes: &[u8]) -> Cid {
        let digest = Multihash::wrap(MULTIHASH_BLAKE3, blake3::hash(bytes).as_bytes()).unwrap();
        Cid::new_v1(CODEC_DAG_CBOR, digest)
    }

    #[test]
    fn finds_links_leaving_the_known_set() {
        let leaf_bytes = encode(&Ipld::String("leaf".into()));
        let leaf_cid = cid_for(&leaf_bytes);

        let mid_bytes = encode(&Ipld::List(vec![Ipld::Link(leaf_cid)]));
        let mid_cid = cid_for(&mid_bytes);

        let root_bytes = encode(&Ipld::List(vec![Ipld::Link(mid_cid)]));
        let root_cid = cid_for(&root_bytes);

        let mut store = HashMap::new();
        store.insert(root_cid, root_bytes.clone());

        let known = [root_cid];
        let roots =
            subgraph_roots(known.iter(), |cid| store.get(cid).map(|b| b.as_ref())).unwrap();

        assert_eq!(roots, vec![mid_cid]);
    }

    #[test]
    fn empty_when_every_link_is_already_known() {
        let leaf_bytes = encode(&Ipld::String("leaf".into()));
        let leaf_cid = cid_for(&leaf_bytes);

        let root_bytes = encode(&Ipld::List(vec![Ipld::Link(leaf_cid)]));
        let root_cid = cid_for(&root_bytes);

        let mut store = HashMap::new();
        store.insert(root_cid, root_bytes);
        store.insert(leaf_cid, leaf_bytes);

        let known = [root_cid, leaf_cid];
        let roots =
            subgraph_roots(known.iter(), |cid| store.get(cid).map(|b| b.as_ref())).unwrap();

        assert!(roots.is_empty());
    }

    #[test]
    fn deduplicates_shared_links() {
        let leaf_bytes = encode(&Ipld::String("shared".into()));
        let leaf_cid = cid_for(&leaf_bytes);

        let a_bytes = encode(&Ipld::List(vec![Ipld::Link(leaf_cid)]));
        let a_cid = cid_for(&a_bytes);
        let b_bytes = encode(&Ipld::List(vec![Ipld::Link(leaf_cid)]));
        let b_cid = cid_for(&b_bytes);

        let mut store = HashMap::new();
        store.insert(a_cid, a_bytes);
        store.insert(b_cid, b_bytes);

        let known = [a_cid, b_cid];
        let roots =
            subgraph_roots(known.iter(), |cid| store.get(cid).map(|b| b.as_ref())).unwrap();

        assert_eq!(roots, vec![leaf_cid]);
    }
}
