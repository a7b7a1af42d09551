//! Penholder wire protocol.
//!
//! Types shared by every peer in a Penholder session: identities, the
//! replicated session snapshot, protocol messages and the relay frame that
//! carries them. Everything here is plain data; the state machines that act on
//! it live in `penholder-core`.
//!
//! # Encoding
//!
//! Messages and frames are CBOR (via `ciborium`). Over a byte stream each
//! [`Envelope`] is prefixed with its length as a little-endian `u32`, capped at
//! [`MAX_FRAME_SIZE`].

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod codec;
mod error;
mod identity;
mod message;
mod topic;

pub use codec::{MAX_FRAME_SIZE, decode, encode, read_envelope, write_envelope};
pub use error::ProtoError;
pub use identity::{MAX_USERNAME_LEN, PeerId, Username, UsernameError};
pub use message::{Envelope, RejectReason, SessionMessage, SessionSnapshot, WireFrame};
pub use topic::{RELAY_PREFIX, Topic};
