//! # CRD Generator
//!
//! Prints the `IBMSecurityVerifyAccess` CustomResourceDefinition as YAML,
//! generated from the shared library types.
//!
//! ```bash
//! cargo run --bin crdgen > config/crd/ibmsecurityverifyaccess.yaml
//! cargo run --bin crdgen | kubectl apply -f -
//! ```

use kube::core::CustomResourceExt;

use verify_access_operator::crd::IBMSecurityVerifyAccess;

fn main() {
    let crd = IBMSecurityVerifyAccess::crd();

    match serde_yaml::to_string(&crd) {
        Ok(yaml) => {
            print!("{yaml}");
        }
        Err(e) => {
            eprintln!("Failed to serialize CRD to YAML: {e}");
            std::process::exit(1);
        }
    }
}
