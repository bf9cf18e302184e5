//! Cadence Config
//!
//! This crate contains the serializable documents Cadence works with. These
//! types mirror the persistence schema: recipes, prompt templates and adaptor
//! configs are read from the document store as JSON, and the process-wide
//! [`EngineSettings`] are read from a settings file.
//!
//! Nothing here is validated. `cadence-recipe` checks a [`Recipe`] and turns it
//! into an execution plan; the resolvers interpret templates and adaptor
//! configs.

mod adaptor;
mod edge;
mod enums;
mod input;
mod node;
mod prompt;
mod recipe;
mod settings;

pub use adaptor::{AdaptorConfig, UnitPricing};
pub use edge::Edge;
pub use enums::{Capability, DispatchMode, OnError, RetryBackoff};
pub use input::{EXTERNAL_ROOT, InputBinding, InputSource, select_path};
pub use node::{ErrorPolicy, Node, NodeKind, Selector};
pub use prompt::{CapabilityPrompt, PromptTemplate, TemplateScope};
pub use recipe::{ExecutionConfig, Recipe, RetryPolicy};
pub use settings::{DispatchSettings, EngineSettings};
