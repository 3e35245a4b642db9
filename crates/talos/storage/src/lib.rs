//! Talos storage abstractions.
//!
//! One narrow port per entity family, so each engine stays testable against
//! an in-memory fake and the atomicity the engines rely on is explicit at the
//! interface boundary:
//! - `LedgerStore` owns append-with-computed-sequence (serialized per tenant)
//! - `MachineStore` owns compare-and-swap token status updates
//! - `OverrideStore` owns conditional override status updates and the
//!   single-consistent-read approval append
//!
//! The in-memory adapter is the deterministic reference implementation;
//! production deployments put a transactional backend behind the same traits.

#![deny(unsafe_code)]
#![warn(rust_2018_idioms)]

mod error;
pub mod memory;
mod model;
mod traits;

pub use error::{StorageError, StorageResult};
pub use model::MachineRecord;
pub use traits::{
    LedgerStore, MachineStore, OverrideStore, OverrideUpdate, PackStore, PolicyStore, TrustStorage,
};
