//! CRD YAML Generator
//!
//! This binary generates Kubernetes CRD manifests for all custom resources
//! defined by the operand-lifecycle-operator.
//!
//! Usage: cargo run --bin crdgen > deploy/crds/all.yaml

use operand_lifecycle_operator::crd::generate_crds;

fn main() {
    for crd in generate_crds() {
        println!("---");
        print!("{}", crd);
    }
}
