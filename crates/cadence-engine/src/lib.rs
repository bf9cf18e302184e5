//! Cadence Engine
//!
//! The trigger surface of the orchestration engine. A [`RecipeEngine`]
//! validates and creates executions synchronously, then runs each one on its
//! own tokio task:
//!
//! ```text
//! execute(recipe_id, input, project) ──► prepare ──► execution id
//!                                          │
//!                                          └─► tokio::spawn(run)
//! execution(id) ──► store ──► ExecutionView
//! cancel(id)    ──► child CancellationToken
//! ```
//!
//! # Usage
//!
//! ```ignore
//! let engine = RecipeEngine::new(store, Arc::new(registry), Arc::new(settings));
//! let execution_id = engine.execute("blog-post", json!({"topic": "rust"}), "acme").await?;
//! let view = engine.execution(&execution_id).await?;
//! let finished = engine.wait(&execution_id).await?;
//! ```

mod engine;
mod view;

pub use engine::{EngineError, RecipeEngine};
pub use view::ExecutionView;
