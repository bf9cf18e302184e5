//! Cadence Runtime
//!
//! This crate runs validated recipes. The pieces, bottom-up:
//! - [`InputResolver`] reads node inputs from the caller payload and prior
//!   node outputs
//! - [`ActionDispatcher`] performs one node's action with timeout and retry
//! - [`ExecutionTracker`] is the single writer of an execution document
//! - [`Orchestrator`] walks the execution plan and ties the above together
//!   with the adaptor and prompt resolvers
//!
//! Progress is reported through `tracing` and an [`ExecutionNotifier`].

mod dispatch;
mod error;
mod events;
mod input;
mod orchestrator;
mod tracker;

pub use dispatch::{ActionDispatcher, DispatchFailure, DispatchOutcome, Invocation};
pub use error::{DispatchError, ExecutionError, OrchestratorError, ResolutionError, TrackerError};
pub use events::{ChannelNotifier, ExecutionEvent, ExecutionNotifier, NoopNotifier};
pub use input::InputResolver;
pub use orchestrator::{Orchestrator, PreparedExecution};
pub use tracker::ExecutionTracker;
