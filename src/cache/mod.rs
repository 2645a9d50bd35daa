//! Prediction response cache: deterministic keying plus the distributed
//! cache seam with an in-process default implementation.

pub mod key;
pub mod store;

pub use key::{family_pattern, fingerprint, version_pattern};
pub use store::{DistributedCache, InMemoryCache};
