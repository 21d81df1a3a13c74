//! CRD YAML Generator
//!
//! This binary generates Kubernetes CRD manifests for the custom resources
//! defined by the agent-provision-operator.
//!
//! Usage: cargo run --bin crdgen > deploy/crds/all.yaml

use agent_provision_operator::crd::generate_crds;

fn main() {
    for crd in generate_crds() {
        println!("---");
        print!("{}", crd);
    }
}
