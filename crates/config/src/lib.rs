//! Resolved configuration for the orchestration core.
//!
//! The core never reads the environment on the request path: the binary
//! resolves everything once at startup into a [`ProviderRegistry`], and each
//! chat request carries its own [`GenerationConfig`].

#![deny(missing_docs)]

mod generation;
mod registry;

pub use generation::GenerationConfig;
pub use registry::{ModelOption, ProviderConfig, ProviderFamily, ProviderRegistry};
