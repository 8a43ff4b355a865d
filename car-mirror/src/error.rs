use crate::incremental_verification::BlockState;
use wnfs_common::{BlockStoreError, Cid};

/// Errors raised from the CAR mirror library.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// An error raised during receival of blocks, when more than the configured maximum
    /// bytes are received in a single batch. See the `Config` type.
    #[error("Expected to receive no more than {receive_maximum} bytes, but got at least {block_bytes}, aborting request.")]
    TooManyBytes {
        /// The configured amount of maximum bytes to receive
        receive_maximum: usize,
        /// The actual amount of bytes received so far
        block_bytes: usize,
    },

    /// An error raised when an individual block exceeded the maximum configured block size
    #[error("Maximum block size exceeded, maximum configured block size is {max_block_size} bytes, but got {block_bytes} at {cid}")]
    BlockSizeExceeded {
        /// The CID of the block that exceeded the maximum
        cid: Cid,
        /// The amount of bytes we got for this block up to this point
        block_bytes: usize,
        /// The maximum block size from our configuration
        max_block_size: usize,
    },

    /// This library only supports a subset of codecs, including DAG-CBOR, DAG-PB and raw.
    #[error("Unsupported codec in Cid: {cid}")]
    UnsupportedCodec {
        /// The CID with the unsupported codec
        cid: Cid,
    },

    /// This library only supports BLAKE3 as a hash function, matching `wnfs_common`'s
    /// canonical blockstore hashing.
    #[error("Unsupported hash code in CID {cid}")]
    UnsupportedHashCode {
        /// The CID with the unsupported hash function
        cid: Cid,
    },

    /// An error raised from the blockstore.
    #[error("BlockStore error: {0}")]
    BlockStoreError(#[from] BlockStoreError),

    /// The blockstore computed a different CID than the one the caller expected for
    /// the same bytes, most likely because it's using a different hash function.
    #[error("BlockStore computed an incompatible CID: expected {cid}, got {actual_cid}")]
    BlockStoreIncompatible {
        /// The CID we expected the block to be stored under
        cid: Box<Cid>,
        /// The CID the blockstore actually returned
        actual_cid: Box<Cid>,
    },

    // -------------
    // Anyhow Errors
    // -------------
    /// An error raised when trying to parse a block (e.g. to look for further links)
    #[error("Error during block parsing: {0}")]
    ParsingError(#[from] anyhow::Error),

    // ----------
    // Sub-errors
    // ----------
    /// Errors related to incremental verification
    #[error(transparent)]
    IncrementalVerificationError(#[from] IncrementalVerificationError),

    /// An error raised when trying to read or write a CAR file.
    #[error("CAR (de)serialization error: {0}")]
    CarFileError(#[from] iroh_car::Error),

    /// Errors related to session lifecycle management.
    #[error(transparent)]
    SessionError(#[from] SessionError),
}

/// Errors related to incremental verification.
#[derive(thiserror::Error, Debug)]
pub enum IncrementalVerificationError {
    /// Raised when we receive a block with a CID that we don't expect.
    /// We only expect blocks when they're related to the root CID of a DAG.
    /// So a CID needs to have a path back to the root.
    #[error("Expected to want block {cid}, but block state is: {block_state:?}")]
    ExpectedWantedBlock {
        /// The CID of the block we're currently processing
        cid: Box<Cid>,
        /// The block state it has during incremental verification.
        block_state: BlockState,
    },

    /// Raised when the block stored in the CAR file doesn't match its hash.
    #[error("Digest mismatch in CAR file: expected {cid}, got {actual_cid}")]
    DigestMismatch {
        /// The expected CID
        cid: Box<Cid>,
        /// The CID it actually hashes to
        actual_cid: Box<Cid>,
    },
}

/// Errors related to driving a session through the registry: malformed requests,
/// unknown session tokens, and the various ways a session's driver task can fail
/// or be interrupted.
#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    /// The caller asked to open, enqueue onto, or inspect a session with parameters
    /// that don't make sense (e.g. an empty root set).
    #[error("Invalid request: {reason}")]
    InvalidRequest {
        /// A human-readable explanation of what was invalid.
        reason: String,
    },

    /// The session token doesn't (or no longer) refer to a live session.
    #[error("Unknown session: {session_id}")]
    UnknownSession {
        /// The session token that wasn't found.
        session_id: String,
    },

    /// The underlying block store failed in a way unrelated to CAR Mirror's own
    /// verification logic.
    #[error("Store failure in session {session_id}: {source}")]
    StoreFailure {
        /// The session in which the failure happened.
        session_id: String,
        /// The underlying error.
        #[source]
        source: BlockStoreError,
    },

    /// The transport (HTTP, or whatever the binding crate uses) failed to deliver
    /// a round's request or response.
    #[error("Transport failure in session {session_id}: {reason}")]
    TransportFailure {
        /// The session in which the failure happened.
        session_id: String,
        /// A human-readable explanation from the transport layer.
        reason: String,
    },

    /// The remote peer sent a message that violates the protocol (e.g. a CID
    /// outside of what was ever asked for, malformed CBOR, etc).
    #[error("Protocol violation in session {session_id}: {reason}")]
    ProtocolViolation {
        /// The session in which the violation happened.
        session_id: String,
        /// A human-readable explanation of the violation.
        reason: String,
    },

    /// The session exceeded its configured time-to-live without completing.
    #[error("Session {session_id} timed out")]
    Timeout {
        /// The session that timed out.
        session_id: String,
    },

    /// The session was cancelled, either by the caller or by the registry during
    /// shutdown.
    #[error("Session {session_id} was cancelled")]
    Cancelled {
        /// The session that was cancelled.
        session_id: String,
    },
}
