//! Cadence Resolver
//!
//! Per-node lookups that turn a recipe node into a concrete invocation:
//! - [`AdaptorResolver`] picks the provider + model configured for a
//!   project, stage and capability, and instantiates it through the
//!   [`AdaptorRegistry`](cadence_adaptor::AdaptorRegistry)
//! - [`PromptResolver`] picks the active prompt template with project-level
//!   precedence and renders it against the node's resolved inputs
//!
//! Both read configuration through the [`Store`](cadence_store::Store) and
//! never write.

mod adaptor;
mod prompt;

pub use adaptor::{AdaptorError, AdaptorResolver, ConfigSource, ResolvedAdaptor, ScopedAdaptorResolver};
pub use prompt::{
  PromptError, PromptResolver, Rendered, ResolvedPrompt, render, substitute, unreferenced_required,
};
