//! formulary-storage: the storage seam of the computation pipeline.
//!
//! Defines the [`EntityStore`] trait every backend implements, the record
//! and error types crossing it, an [`InMemoryStore`] backend, and a
//! [`conformance`] suite backends can run against themselves.

pub mod conformance;
mod error;
mod memory;
mod record;
mod traits;

pub use error::StorageError;
pub use memory::{InMemoryStore, StoreCounters, StoreFixture, TenantFixture};
pub use record::PropertyStateRecord;
pub use traits::EntityStore;
