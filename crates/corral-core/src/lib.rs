//! Core traits, types and errors for corral single-flight coordination.
//!
//! This crate defines the boundary between the coordination runtime (the
//! `corral` crate) and storage backends:
//!
//! - [`Cache`] / [`Leases`]: the backend traits and their atomicity
//!   contracts
//! - [`LeaseRecord`], [`AcquireResult`], [`ReadyState`]: the lease data
//!   model
//! - [`Outcome`], [`FlightMeta`], [`FlightResult`]: what a call returns
//! - [`Phase`]: the named side-effecting steps, with stable identifiers
//! - [`FlightError`] / [`AdapterError`]: the tagged error taxonomy
//! - [`MemoryCache`] / [`MemoryLeases`]: deterministic in-memory reference
//!   backends
//!
//! Backends that persist leases externally store [`LeaseRecord`] as JSON and
//! must provide the compare-and-set acquire described on [`Leases`]; the
//! in-memory implementations are the executable specification of those
//! rules.

pub mod error;
pub mod memory;
pub mod phase;
pub mod traits;
pub mod types;

pub use error::AdapterError;
pub use error::BoxedError;
pub use error::FlightError;
pub use error::Result;
pub use memory::MemoryCache;
pub use memory::MemoryLeases;
pub use phase::Phase;
pub use traits::Cache;
pub use traits::Leases;
pub use types::AcquireResult;
pub use types::FlightMeta;
pub use types::FlightResult;
pub use types::LeaseRecord;
pub use types::Outcome;
pub use types::ReadyState;
pub use types::ttl_ms_to_secs_ceil;

/// Maximum key size in bytes accepted by validation.
pub const MAX_KEY_SIZE: usize = 4096;

/// Maximum owner id size in bytes accepted by validation.
pub const MAX_OWNER_ID_SIZE: usize = 256;
