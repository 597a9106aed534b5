//! # gantry-shim
//!
//! Context subsystem of the gantry scheduler shim: the bridge between an
//! orchestrator control plane and an external scheduling core.
//!
//! ## Architecture
//!
//! ```text
//! informer events ──> Context ──> SchedulerCache (nodes, pods, occupancy)
//!                       │   └──> SchedulerApi (node / allocation RPCs)
//!                       │
//! core callbacks ──> Dispatcher ──> Application / Task state machines
//!                                      └──> Orchestrator (bind, events)
//! ```
//!
//! The context owns every map; external collaborators (RPC transport,
//! informers, volume binder, event recorder) are traits with mock
//! implementations for tests and development.
//!
//! ## Modules
//!
//! - `cache`: authoritative in-memory cluster view
//! - `context`: the facade coordinating everything
//! - `dispatcher`: bounded single-consumer event bus
//! - `application`, `task`: per-entity state machines
//! - `client`, `orchestrator`, `volume`, `recorder`: external seams

pub mod application;
pub mod cache;
pub mod client;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod events;
pub mod metadata;
pub mod orchestrator;
pub mod recorder;
pub mod task;
pub mod volume;

mod namespace;

// Re-export the types most embedders touch.
pub use application::{Application, ApplicationState};
pub use cache::{NodeLifecycle, OccupiedOp, OccupiedUpdate, SchedulerCache};
pub use client::{MockSchedulerApi, NodeAction, SchedulerApi};
pub use config::ShimConfig;
pub use context::{
    AddApplicationRequest, AddTaskRequest, Context, ContextError, Dependencies, NodeDeletion,
    PodDeletion, TaskMetadata,
};
pub use dispatcher::{Dispatcher, EventKind, ShimEvent};
pub use metadata::ApplicationMetadata;
pub use orchestrator::{MockOrchestrator, Orchestrator};
pub use recorder::{EventRecorder, MockEventRecorder};
pub use task::{Task, TaskState};
pub use volume::{MockVolumeBinder, VolumeBinder};
