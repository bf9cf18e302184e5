//! Cadence Adaptor
//!
//! The engine talks to generation backends only through the [`Adaptor`]
//! trait. Concrete providers are registered by id in an [`AdaptorRegistry`]
//! that the caller builds and injects; there is no process-global registry, so
//! several configurations (tests, tenants) can coexist.
//!
//! An [`EchoAdaptor`] is included for dry runs: it reflects the prompt back and
//! reports word counts as usage.

mod adaptor;
mod echo;
mod error;
mod registry;

pub use adaptor::{Adaptor, GenerationRequest, ProviderResponse, ProviderUsage};
pub use echo::{ECHO_PROVIDER_ID, EchoAdaptor};
pub use error::{ProviderError, RegistryError};
pub use registry::{AdaptorFactory, AdaptorRegistry};
