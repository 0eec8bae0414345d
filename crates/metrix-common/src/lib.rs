//! Shared wire model and payload codecs for the metrix agent and server.
//!
//! The agent serializes [`types::Metric`] batches, gzips them, optionally
//! encrypts them with [`cipher::PayloadEncryptor`] and signs the final bytes
//! with [`signature::HashSigner`]. The server reverses the same pipeline.

pub mod cipher;
pub mod codec;
pub mod signature;
pub mod types;

/// Header carrying the hex HMAC-SHA256 of the request or response body.
pub const HASH_HEADER: &str = "HashSHA256";

/// Header carrying the agent's outward-facing IP address.
pub const REAL_IP_HEADER: &str = "X-Real-IP";
