//! Spoke cluster access
//!
//! Resolution of the spoke kubeconfig from its hub secret, construction of a
//! client bound to the spoke API server, and the per-identity client cache
//! shared across reconciles.

mod cache;
mod factory;
mod resolver;

pub use cache::SpokeClientCache;
pub use factory::{KubeconfigClientFactory, SpokeClientFactory};
pub use resolver::{resolve_kubeconfig, KUBECONFIG_SECRET_KEY};
