//! Cryptographic primitives shared by the chat backend.
//!
//! - [`envelope`]: salted AES-256-GCM envelopes for data at rest
//! - [`hash`]: SHA-256 helpers, including the participant-set digest
//! - [`jwt`]: bearer token verification

pub mod envelope;
pub mod hash;
pub mod jwt;

pub use envelope::{EnvelopeCipher, EnvelopeError};
pub use hash::{hash_participants, sha256};
pub use jwt::{Claims, JwtVerifier, TokenError};
