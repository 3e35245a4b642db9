//! Talos Types - shared trust-object contracts.
//!
//! Every engine exchanges data through the types in this crate: tenant and
//! asset references, the evidence ledger's record shapes, the policy DSL,
//! state-machine and gate-token contracts, override governance records, and
//! the sealed evidence-pack manifest. Engines own their logic; this crate
//! owns the vocabulary.

#![deny(unsafe_code)]

pub mod common;
pub mod gate;
pub mod governance;
pub mod ledger;
pub mod pack;
pub mod policy;

pub use common::{Actor, ActorKind, AssetRef, TenantId};
