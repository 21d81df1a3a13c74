//! Reconciliation engines
//!
//! Business logic invoked by the controllers; kept separate from the watch
//! wiring so it can be driven directly against fake API surfaces in tests.

pub mod provisioner;

pub use provisioner::ProvisionerReconciler;
