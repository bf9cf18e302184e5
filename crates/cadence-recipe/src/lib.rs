//! Cadence Recipe
//!
//! This crate turns a [`Recipe`](cadence_config::Recipe) document into an
//! [`ExecutionPlan`]: a validated, deterministic linear order of its nodes.
//!
//! Validation checks, in order:
//! - node ids are unique and output keys are unique and well formed
//! - every edge endpoint is a node of the recipe
//! - declared `dependencies` agree with the incoming edges
//! - the graph is acyclic (Kahn's algorithm, ties broken by declaration order)
//! - every input binding reads the payload or an ancestor's output key
//!
//! Everything here is pure computation; no I/O happens.

mod error;
mod graph;
mod plan;
mod validator;

pub use error::ValidationError;
pub use graph::Graph;
pub use plan::ExecutionPlan;
pub use validator::validate;
