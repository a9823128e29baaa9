//! Prints every CRD served by the operator as a multi-document YAML stream.
//!
//! Usage: `cargo run -p crds --bin crdgen > deploy/crds.yaml`

use crds::{N3000Cluster, N3000Node, SriovFecClusterConfig, SriovFecNodeConfig};
use kube::CustomResourceExt;

fn main() -> Result<(), serde_yaml::Error> {
    let crds = [
        SriovFecClusterConfig::crd(),
        SriovFecNodeConfig::crd(),
        N3000Cluster::crd(),
        N3000Node::crd(),
    ];
    for crd in crds {
        print!("---\n{}", serde_yaml::to_string(&crd)?);
    }
    Ok(())
}
