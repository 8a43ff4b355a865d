use crate::bloom::BloomFilter;
use ipld_core::cid::Cid;
use serde::{Deserialize, Serialize};

/// Initial and subsequent message for pull requests.
///
/// Over-the-wire data type, CBOR-encoded with lowercase two-letter field
/// names, per spec.md §6.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    /// Requested CID roots.
    #[serde(rename = "rs")]
    pub resources: Vec<Cid>,

    /// A bloom of blocks the requestor already has.
    #[serde(flatten)]
    pub bloom: Bloom,
}

/// Message sent alongside (or in place of) the push CAR payload.
///
/// Unlike the response-only bloom carried by `PushResponse`, `PushRequest`
/// also carries a bloom: the block-sending side's best guess at which of
/// its *remaining, not-yet-sent* CIDs the remote already has, so a cold
/// push call can receive a useful confirmation in the very next round
/// instead of only on round 2.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushRequest {
    /// A bloom filter over CIDs the pusher expects not to need to send.
    #[serde(flatten)]
    pub bloom: Bloom,

    /// CARv1-framed block payload.
    #[serde(rename = "pl", with = "crate::serde_bloom_bytes")]
    pub payload: Vec<u8>,
}

/// The response sent after a push request.
///
/// Wire data type from spec.md §6.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushResponse {
    /// Incomplete subgraph roots: CIDs the pusher should keep sending
    /// descendants of.
    #[serde(rename = "sr")]
    pub subgraph_roots: Vec<Cid>,

    /// A bloom containing blocks the responder believes it now has.
    #[serde(flatten)]
    pub bloom: Bloom,
}

/// The serialization format for bloom filters in CAR mirror: hash count
/// plus raw bits. `bk = 0, bb = empty` is the wire form of "no estimate".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bloom {
    /// Bloom filter hash count.
    #[serde(rename = "bk")]
    pub hash_count: u32,

    /// Bloom filter bits.
    #[serde(rename = "bb", with = "crate::serde_bloom_bytes")]
    pub bytes: Vec<u8>,
}

impl Bloom {
    /// The wire form of "no estimate".
    pub fn none() -> Self {
        Self {
            hash_count: 0,
            bytes: Vec::new(),
        }
    }

    /// Convert to a [`BloomFilter`], or `None` if this is the "no estimate"
    /// sentinel (empty bytes).
    pub fn into_filter(self) -> Option<BloomFilter> {
        if self.bytes.is_empty() {
            None
        } else {
            Some(BloomFilter::from_bytes(self.bytes, self.hash_count as u64))
        }
    }

    /// Build the wire form from an optional filter.
    pub fn from_filter(filter: Option<&BloomFilter>) -> Self {
        match filter {
            Some(f) => Self {
                hash_count: f.k() as u32,
                bytes: f.as_bytes().to_vec(),
            },
            None => Self::none(),
        }
    }
}

impl PushResponse {
    /// Whether this response indicates that the protocol is finished: no
    /// further subgraph roots remain to chase down.
    pub fn indicates_finished(&self) -> bool {
        self.subgraph_roots.is_empty()
    }
}

impl PullRequest {
    /// Whether there's nothing left to ask for. If true, the protocol is
    /// finished and this request need not be sent.
    pub fn indicates_finished(&self) -> bool {
        self.resources.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ipld_core::cid::multihash::Multihash;
    use wnfs_common::{CODEC_DAG_CBOR, MULTIHASH_BLAKE3};

    fn test_cid(seed: u8) -> Cid {
        let hash = Multihash::wrap(MULTIHASH_BLAKE3, blake3::hash(&[seed]).as_bytes()).unwrap();
        Cid::new_v1(CODEC_DAG_CBOR, hash)
    }

    #[test]
    fn pull_request_round_trips_through_cbor() {
        let req = PullRequest {
            resources: vec![test_cid(1), test_cid(2)],
            bloom: Bloom {
                hash_count: 3,
                bytes: vec![0xff, 0x00, 0x1a],
            },
        };

        let bytes = serde_ipld_dagcbor::to_vec(&req).unwrap();
        let decoded: PullRequest = serde_ipld_dagcbor::from_slice(&bytes).unwrap();
        assert_eq!(req, decoded);
    }

    #[test]
    fn push_request_round_trips_through_cbor() {
        let req = PushRequest {
            bloom: Bloom::none(),
            payload: vec![1, 2, 3, 4],
        };

        let bytes = serde_ipld_dagcbor::to_vec(&req).unwrap();
        let decoded: PushRequest = serde_ipld_dagcbor::from_slice(&bytes).unwrap();
        assert_eq!(req, decoded);
    }

    #[test]
    fn push_response_round_trips_through_cbor() {
        let resp = PushResponse {
            subgraph_roots: vec![test_cid(3)],
            bloom: Bloom::from_filter(None),
        };

        let bytes = serde_ipld_dagcbor::to_vec(&resp).unwrap();
        let decoded: PushResponse = serde_ipld_dagcbor::from_slice(&bytes).unwrap();
        assert_eq!(resp, decoded);
        assert!(!decoded.indicates_finished());
    }

    #[test]
    fn empty_push_response_indicates_finished() {
        let resp = PushResponse {
            subgraph_roots: vec![],
            bloom: Bloom::none(),
        };
        assert!(resp.indicates_finished());
    }

    #[test]
    fn bloom_none_round_trips_through_filter_conversion() {
        assert!(Bloom::none().into_filter().is_none());
    }
}
