//! State machine / gate engine.
//!
//! Machines define per-domain asset lifecycles as (from, to) edges with an
//! enforcement mode per edge. HARD edges demand a valid single-use gate
//! token or an explicit override; SOFT edges enforce requirements without a
//! token mandate; SHADOW edges only observe.

#![deny(unsafe_code)]

mod error;
mod manager;
pub mod validator;

pub use error::{GateError, GateResult};
pub use manager::StateMachineManager;
