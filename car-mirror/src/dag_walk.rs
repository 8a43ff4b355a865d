use crate::{cache::Cache, common::references, error::Error};
use bytes::Bytes;
use futures::{stream::try_unfold, Stream};
use std::collections::{HashSet, VecDeque};
use tracing::instrument;
use wnfs_common::{BlockStore, Cid};

/// A single block discovered during a [`DagWalk`], along with the depth at
/// which it was found (roots are depth 0).
#[derive(Clone, Debug)]
pub struct DagWalkItem {
    /// The CID of the discovered block.
    pub cid: Cid,
    /// The block's raw bytes.
    pub bytes: Bytes,
    /// Distance from the nearest root that led to this block.
    pub depth: usize,
}

impl DagWalkItem {
    /// The CID of this item, regardless of whether it was pruned.
    pub fn to_cid(&self) -> Result<Cid, Error> {
        Ok(self.cid)
    }
}

/// A struct that represents an ongoing walk through the Dag.
#[derive(Clone, Debug)]
pub struct DagWalk {
    /// A queue of (CID, depth) pairs to visit next.
    frontier: VecDeque<(Cid, usize)>,
    /// The set of already visited CIDs. This prevents re-visiting.
    visited: HashSet<Cid>,
    /// Whether to do a breadth-first or depth-first traversal.
    breadth_first: bool,
    /// An optional cap on traversal depth. Blocks beyond this depth are
    /// neither fetched nor expanded.
    max_depth: Option<usize>,
}

impl DagWalk {
    /// Start a breadth-first traversal of given roots.
    ///
    /// Breadth-first visits each node in the tree layer-by-layer, so the
    /// first nodes visited are going to be all roots in order.
    pub fn breadth_first(roots: impl IntoIterator<Item = Cid>) -> Self {
        Self::new(roots, true)
    }

    /// Start a depth-first traversal of given roots.
    ///
    /// Depth-first follows links immediately after discovering them, taking
    /// the fastest path towards leaves. The very first node is guaranteed to
    /// be the first root, but subsequent nodes may not be from the initial
    /// roots.
    pub fn depth_first(roots: impl IntoIterator<Item = Cid>) -> Self {
        Self::new(roots, false)
    }

    /// Start a DAG traversal of given roots. See also `breadth_first` and
    /// `depth_first`.
    pub fn new(roots: impl IntoIterator<Item = Cid>, breadth_first: bool) -> Self {
        let frontier = roots.into_iter().map(|cid| (cid, 0)).collect();
        Self {
            frontier,
            visited: HashSet::new(),
            breadth_first,
            max_depth: None,
        }
    }

    /// Cap the traversal at `max_depth`: blocks found deeper than this are
    /// left in the frontier unvisited, instead of being fetched and expanded.
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = Some(max_depth);
        self
    }

    /// Return the next node in the traversal.
    ///
    /// Returns `None` if no nodes are left to be visited (or all remaining
    /// frontier nodes exceed the configured max depth).
    #[instrument(level = "trace", skip_all)]
    pub async fn next(
        &mut self,
        store: &impl BlockStore,
        cache: &impl Cache,
    ) -> Result<Option<DagWalkItem>, Error> {
        let (cid, depth) = loop {
            let popped = if self.breadth_first {
                self.frontier.pop_back()
            } else {
                self.frontier.pop_front()
            };

            let Some((cid, depth)) = popped else {
                return Ok(None);
            };

            if let Some(max_depth) = self.max_depth {
                if depth > max_depth {
                    continue;
                }
            }

            // We loop until we find an unvisited block
            if self.visited.insert(cid) {
                break (cid, depth);
            }
        };

        let bytes = store.get_block(&cid).await.map_err(Error::BlockStoreError)?;
        let refs = cache.references(cid, store).await?;
        for ref_cid in refs {
            if !self.visited.contains(&ref_cid) {
                self.frontier.push_front((ref_cid, depth + 1));
            }
        }

        Ok(Some(DagWalkItem { cid, bytes, depth }))
    }

    /// Turn this traversal into a stream.
    pub fn stream<'a>(
        self,
        store: &'a impl BlockStore,
        cache: &'a impl Cache,
    ) -> impl Stream<Item = Result<DagWalkItem, Error>> + Unpin + 'a {
        Box::pin(try_unfold(self, move |mut this| async move {
            let maybe_item = this.next(store, cache).await?;
            Ok(maybe_item.map(|item| (item, this)))
        }))
    }

    /// Find out whether the traversal is finished.
    ///
    /// The next call to `next` would result in `None` if this returns true.
    pub fn is_finished(&self) -> bool {
        !self
            .frontier
            .iter()
            .any(|(cid, _)| !self.visited.contains(cid))
    }

    /// Skip a node from the traversal for now: mark it visited and drop its
    /// direct children from the frontier without fetching anything further.
    pub fn skip_walking(&mut self, block: (Cid, Bytes)) -> Result<(), Error> {
        let (cid, bytes) = block;
        let refs = references(cid, bytes, Vec::new())?;
        self.visited.insert(cid);
        self.frontier.retain(|(frontier_cid, _)| !refs.contains(frontier_cid));

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::NoCache;
    use futures::TryStreamExt;
    use ipld_core::ipld::Ipld;
    use wnfs_common::MemoryBlockStore;

    #[async_std::test]
    async fn test_walk_dag_breadth_first() -> Result<(), Error> {
        let store = &MemoryBlockStore::new();

        let cid_1 = store.put_serializable(&Ipld::String("1".into())).await.unwrap();
        let cid_2 = store.put_serializable(&Ipld::String("2".into())).await.unwrap();
        let cid_3 = store.put_serializable(&Ipld::String("3".into())).await.unwrap();

        let cid_1_wrap = store
            .put_serializable(&Ipld::List(vec![Ipld::Link(cid_1)]))
            .await
            .unwrap();

        let cid_root = store
            .put_serializable(&Ipld::List(vec![
                Ipld::Link(cid_1_wrap),
                Ipld::Link(cid_2),
                Ipld::Link(cid_3),
            ]))
            .await
            .unwrap();

        let cids = DagWalk::breadth_first([cid_root])
            .stream(store, &NoCache)
            .try_collect::<Vec<_>>()
            .await?
            .into_iter()
            .map(|item| item.cid)
            .collect::<Vec<_>>();

        assert_eq!(cids, vec![cid_root, cid_1_wrap, cid_2, cid_3, cid_1]);

        Ok(())
    }

    #[async_std::test]
    async fn test_max_depth_stops_expansion() -> Result<(), Error> {
        let store = &MemoryBlockStore::new();

        let leaf = store.put_serializable(&Ipld::String("leaf".into())).await.unwrap();
        let mid = store
            .put_serializable(&Ipld::List(vec![Ipld::Link(leaf)]))
            .await
            .unwrap();
        let root = store
            .put_serializable(&Ipld::List(vec![Ipld::Link(mid)]))
            .await
            .unwrap();

        let cids = DagWalk::breadth_first([root])
            .with_max_depth(1)
            .stream(store, &NoCache)
            .try_collect::<Vec<_>>()
            .await?
            .into_iter()
            .map(|item| item.cid)
            .collect::<Vec<_>>();

        assert_eq!(cids, vec![root, mid]);

        Ok(())
    }
}
