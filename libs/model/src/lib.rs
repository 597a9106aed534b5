//! # gantry-model
//!
//! Orchestrator object model and resource arithmetic for the gantry shim.
//!
//! ## Design Principles
//!
//! - Objects mirror what the orchestrator informers deliver; they carry no
//!   behavior beyond accessors.
//! - All identifiers (node names, pod uids, application ids) are
//!   orchestrator-assigned strings; the shim never generates ids.
//! - Resource vectors use one unit per dimension: `memory` in bytes,
//!   `vcore` in milli-CPU. Quantity parsing is exact integer arithmetic.

pub mod constants;
mod objects;
mod resource;

pub use objects::*;
pub use resource::{parse_milli_quantity, parse_quantity, QuantityError, Resource, MEMORY, VCORE};
