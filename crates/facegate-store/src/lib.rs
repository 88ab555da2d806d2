//! facegate-store — persistence for the facegate service.
//!
//! A SQLite-backed user registry, filesystem blob stores for images and
//! signatures (staged writes, atomic commit), and the self-describing
//! binary signature format.

pub mod blobs;
pub mod codec;
pub mod error;
pub mod registry;

pub use blobs::BlobStore;
pub use codec::CodecError;
pub use error::StoreError;
pub use registry::{NewUser, UserRegistry, UserRecord};
