//! # Deployment Builder
//!
//! Deterministic construction of the Deployment owned by a
//! `IBMSecurityVerifyAccess` resource. The same spec always produces the
//! same object graph; the owner reference is the only caller-supplied input.
//!
//! Field mapping from the custom resource:
//!
//! | spec field           | Deployment field                            |
//! |----------------------|---------------------------------------------|
//! | replicas             | spec.replicas                               |
//! | image                | template.spec.containers[0].image           |
//! | snapshotId           | template.spec.containers[0].env             |
//! | fixpacks             | template.spec.containers[0].env             |
//! | instance             | template.spec.containers[0].env             |
//! | language             | template.spec.containers[0].env             |
//! | volumes              | template.spec.volumes                       |
//! | imagePullSecrets     | template.spec.imagePullSecrets              |
//! | serviceAccountName   | template.spec.serviceAccountName            |
//! | container            | template.spec.containers[0]                 |
//!
//! Metadata, selector, container name, ports, default probes and the
//! `CONFIG_SERVICE_*` variables are pre-populated here.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, EnvVarSource, ExecAction, PodSpec, PodTemplateSpec, Probe,
    SecretKeySelector,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use kube::ResourceExt;

use crate::crd::{LicenseModule, VerifyAccess};
use crate::secret::SecretConfig;

/// Label value of the `kind` key on every managed Deployment.
pub const KIND_LABEL: &str = "IBMSecurityVerifyAccess";

/// The single HTTPS port exported by every deployment.
pub const HTTPS_PORT: i32 = 9443;

const HEALTH_CHECK: &str = "/sbin/health_check.sh";

/// Product identity emitted into the license annotations.
#[derive(Debug, Clone, Copy)]
pub struct ProductIdentity {
    pub name: &'static str,
    pub id: &'static str,
}

/// Identity used in production mode when no module-specific row matches.
const BASE_IDENTITY: ProductIdentity = ProductIdentity {
    name: "IBM Security Verify Access Virtual Edition",
    id: "e2ba21cf5df245bb8524be1957857d9f",
};

/// Identity used in non-production mode when no module-specific row matches.
const NON_PRODUCTION_IDENTITY: ProductIdentity = ProductIdentity {
    name: "IBM Security Verify Access Virtual Edition Non-Production",
    id: "8e4a78ab1e9249b1b46b6870babf4945",
};

/// License identity table keyed by (module, production). Modules without a
/// row (webseal) fall back to the generic identities above.
const LICENSE_TABLE: &[(LicenseModule, bool, ProductIdentity)] = &[
    (
        LicenseModule::AccessControl,
        true,
        ProductIdentity {
            name: "IBM Security Verify Access Virtual Edition AAC Module AOS",
            id: "25d814176e0f4f21b64db66b916414d4",
        },
    ),
    (
        LicenseModule::AccessControl,
        false,
        ProductIdentity {
            name: "IBM Security Verify Access Virtual Edition AAC Module Non-Production AOS",
            id: "707987d5b0ca48e8af8e5856c027980f",
        },
    ),
    (
        LicenseModule::Federation,
        true,
        ProductIdentity {
            name: "IBM Security Verify Access Virtual Edition Federation Module AOS",
            id: "13ce5584032a42eab5704711369a11a4",
        },
    ),
    (
        LicenseModule::Federation,
        false,
        ProductIdentity {
            name: "IBM Security Verify Access Virtual Ed Federation Module Non-Production AOS",
            id: "01a9d83608044a4687b3d29a0d4d0a35",
        },
    ),
    (
        LicenseModule::Enterprise,
        true,
        ProductIdentity {
            name: "IBM Security Verify Access Virtual Enterprise Edition",
            id: "62b1cf23e32140a684284a0cf9a37329",
        },
    ),
    (
        LicenseModule::Enterprise,
        false,
        ProductIdentity {
            name: "IBM Security Verify Access Virtual Enterprise Edition Non-Production",
            id: "de0d1dce07f145ce9380be5182a68544",
        },
    ),
];

/// Resolve the product identity for a (module, production) pair.
#[must_use]
pub fn product_identity(module: LicenseModule, production: bool) -> ProductIdentity {
    LICENSE_TABLE
        .iter()
        .find(|(m, p, _)| *m == module && *p == production)
        .map_or(
            if production {
                BASE_IDENTITY
            } else {
                NON_PRODUCTION_IDENTITY
            },
            |(_, _, identity)| *identity,
        )
}

/// Build the License Metric Tool annotation set for a (module, production)
/// pair: the fixed base keys plus the resolved product identity.
#[must_use]
pub fn license_annotations(module: LicenseModule, production: bool) -> BTreeMap<String, String> {
    let mut annotations = BTreeMap::from([
        (
            "productMetric".to_string(),
            "PROCESSOR_VALUE_UNIT".to_string(),
        ),
        ("productChargedContainers".to_string(), "All".to_string()),
        ("productName".to_string(), BASE_IDENTITY.name.to_string()),
        ("productId".to_string(), BASE_IDENTITY.id.to_string()),
    ]);

    let identity = product_identity(module, production);
    annotations.insert("productName".to_string(), identity.name.to_string());
    annotations.insert("productId".to_string(), identity.id.to_string());

    annotations
}

/// Derive the service label value from the image name and instance.
///
/// The workload role is classified by suffix-matching the image path before
/// the tag delimiter. An unrecognized image yields the literal `unknown`;
/// this is a soft fail, never an error.
#[must_use]
pub fn service_name(image: &str, instance: &str) -> String {
    let image_component = image.split(':').next().unwrap_or(image);

    if image_component.ends_with("wrp") {
        if instance.is_empty() {
            "wrp-default".to_string()
        } else {
            format!("wrp-{instance}")
        }
    } else if image_component.ends_with("runtime") {
        "runtime".to_string()
    } else if image_component.ends_with("dsc") {
        if instance.is_empty() {
            "dsc-1".to_string()
        } else {
            format!("dsc-{instance}")
        }
    } else {
        "unknown".to_string()
    }
}

fn labels(name: &str, service: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("kind".to_string(), KIND_LABEL.to_string()),
        ("app".to_string(), name.to_string()),
        ("VerifyAccess_cr".to_string(), name.to_string()),
        ("service".to_string(), service.to_string()),
    ])
}

fn secret_env_var(name: &str, secret_name: &str, key: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: secret_name.to_string(),
                key: key.to_string(),
                optional: Some(false),
            }),
            ..EnvVarSource::default()
        }),
        ..EnvVar::default()
    }
}

fn plain_env_var(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        ..EnvVar::default()
    }
}

/// Environment variables derived from the spec, in fixed order.
///
/// The three credential variables always reference the managed secret, never
/// inline values. `CONFIG_SERVICE_TLS_CACERT` is always present and defaults
/// to the `operator` sentinel, meaning default PKI trust through the
/// operator secret. All other variables appear only when their source field
/// is non-empty.
#[must_use]
pub fn derived_env(resource: &VerifyAccess, secret: &SecretConfig) -> Vec<EnvVar> {
    let spec = &resource.spec;
    let mut env = Vec::with_capacity(9);

    env.push(secret_env_var(
        "CONFIG_SERVICE_URL",
        &secret.secret_name,
        &secret.url_key,
    ));
    env.push(secret_env_var(
        "CONFIG_SERVICE_USER_NAME",
        &secret.secret_name,
        &secret.user_key,
    ));
    env.push(secret_env_var(
        "CONFIG_SERVICE_USER_PWD",
        &secret.secret_name,
        &secret.ro_pwd_key,
    ));

    if !spec.snapshot_secrets.is_empty() {
        env.push(plain_env_var("CONFIG_SNAPSHOT_SECRETS", &spec.snapshot_secrets));
    }

    if spec.snapshot_tls_cacert.is_empty() {
        env.push(plain_env_var("CONFIG_SERVICE_TLS_CACERT", "operator"));
    } else {
        env.push(plain_env_var(
            "CONFIG_SERVICE_TLS_CACERT",
            &spec.snapshot_tls_cacert,
        ));
    }

    if !spec.snapshot_id.is_empty() {
        env.push(plain_env_var("SNAPSHOT_ID", &spec.snapshot_id));
    }

    if !spec.fixpacks.is_empty() {
        env.push(plain_env_var("FIXPACKS", &spec.fixpacks.join(",")));
    }

    if !spec.instance.is_empty() {
        env.push(plain_env_var("INSTANCE", &spec.instance));
    }

    if let Some(language) = spec.language {
        env.push(plain_env_var("LANG", language.as_str()));
    }

    env
}

fn exec_probe(command: &[&str]) -> ExecAction {
    ExecAction {
        command: Some(command.iter().map(ToString::to_string).collect()),
    }
}

fn default_liveness_probe() -> Probe {
    Probe {
        timeout_seconds: Some(3),
        exec: Some(exec_probe(&[HEALTH_CHECK, "livenessProbe"])),
        ..Probe::default()
    }
}

fn default_readiness_probe() -> Probe {
    Probe {
        timeout_seconds: Some(3),
        exec: Some(exec_probe(&[HEALTH_CHECK])),
        ..Probe::default()
    }
}

fn default_startup_probe() -> Probe {
    Probe {
        initial_delay_seconds: Some(5),
        timeout_seconds: Some(20),
        failure_threshold: Some(30),
        exec: Some(exec_probe(&[HEALTH_CHECK, "startupProbe"])),
        ..Probe::default()
    }
}

fn none_if_empty<T>(values: Vec<T>) -> Option<Vec<T>> {
    if values.is_empty() {
        None
    } else {
        Some(values)
    }
}

/// Pod template annotations: the license set (when requested) overlaid with
/// the administrator's custom annotations, last writer wins per key.
fn template_annotations(resource: &VerifyAccess) -> Option<BTreeMap<String, String>> {
    let spec = &resource.spec;
    let mut annotations = BTreeMap::new();

    if let Some(license) = &spec.license_annotations {
        annotations.extend(license_annotations(license.module, license.production));
    }

    // Administrator intent dominates, including over the license identity.
    for custom in &spec.custom_annotations {
        annotations.insert(custom.key.clone(), custom.value.clone());
    }

    if annotations.is_empty() {
        None
    } else {
        Some(annotations)
    }
}

/// Build the Deployment for the given resource.
///
/// Construction is pure data transformation and cannot fail; persistence and
/// its error handling belong to the caller. The selector is built from the
/// same label map as the template, keeping them equal by construction.
#[must_use]
pub fn build(resource: &VerifyAccess, secret: &SecretConfig, owner: OwnerReference) -> Deployment {
    let spec = &resource.spec;
    let name = resource.name_any();
    let namespace = resource.namespace().unwrap_or_default();

    let service = service_name(&spec.image, &spec.instance);
    let labels = labels(&name, &service);

    let container = &spec.container;

    let mut env = derived_env(resource, secret);
    // Spec-provided variables come after the derived ones; conflicting names
    // are kept as-is and resolved by platform env-merge semantics.
    env.extend(container.env.iter().cloned());

    Deployment {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: Some(namespace),
            labels: Some(labels.clone()),
            owner_references: Some(vec![owner]),
            ..ObjectMeta::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(spec.replicas),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..LabelSelector::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    annotations: template_annotations(resource),
                    ..ObjectMeta::default()
                }),
                spec: Some(PodSpec {
                    volumes: none_if_empty(spec.volumes.clone()),
                    image_pull_secrets: none_if_empty(spec.image_pull_secrets.clone()),
                    service_account_name: if spec.service_account_name.is_empty() {
                        None
                    } else {
                        Some(spec.service_account_name.clone())
                    },
                    containers: vec![Container {
                        name: name.clone(),
                        image: Some(spec.image.clone()),
                        image_pull_policy: container.image_pull_policy.clone(),
                        ports: Some(vec![ContainerPort {
                            name: Some("https".to_string()),
                            container_port: HTTPS_PORT,
                            protocol: Some("TCP".to_string()),
                            ..ContainerPort::default()
                        }]),
                        env: Some(env),
                        env_from: none_if_empty(container.env_from.clone()),
                        resources: container.resources.clone(),
                        liveness_probe: Some(
                            container
                                .liveness_probe
                                .clone()
                                .unwrap_or_else(default_liveness_probe),
                        ),
                        readiness_probe: Some(
                            container
                                .readiness_probe
                                .clone()
                                .unwrap_or_else(default_readiness_probe),
                        ),
                        startup_probe: Some(
                            container
                                .startup_probe
                                .clone()
                                .unwrap_or_else(default_startup_probe),
                        ),
                        security_context: container.security_context.clone(),
                        volume_mounts: none_if_empty(container.volume_mounts.clone()),
                        volume_devices: none_if_empty(container.volume_devices.clone()),
                        ..Container::default()
                    }],
                    ..PodSpec::default()
                }),
            },
            ..DeploymentSpec::default()
        }),
        ..Deployment::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrp_image_uses_instance_name() {
        assert_eq!(service_name("icr.io/isva/isva-wrp:10.0.8", "intranet"), "wrp-intranet");
        assert_eq!(service_name("icr.io/isva/isva-wrp:10.0.8", ""), "wrp-default");
    }

    #[test]
    fn runtime_image_ignores_instance() {
        assert_eq!(service_name("icr.io/isva/isva-runtime:latest", "x"), "runtime");
    }

    #[test]
    fn dsc_image_defaults_to_first_replica_set() {
        assert_eq!(service_name("icr.io/isva/isva-dsc", ""), "dsc-1");
        assert_eq!(service_name("icr.io/isva/isva-dsc:1.2", "ha"), "dsc-ha");
    }

    #[test]
    fn unrecognized_image_is_a_soft_fail() {
        assert_eq!(service_name("docker.io/library/nginx:1.27", "x"), "unknown");
    }

    #[test]
    fn license_table_resolves_module_specific_identities() {
        let id = product_identity(LicenseModule::Federation, false);
        assert_eq!(id.id, "01a9d83608044a4687b3d29a0d4d0a35");

        let id = product_identity(LicenseModule::AccessControl, true);
        assert_eq!(id.id, "25d814176e0f4f21b64db66b916414d4");

        let id = product_identity(LicenseModule::Enterprise, false);
        assert_eq!(id.id, "de0d1dce07f145ce9380be5182a68544");
    }

    #[test]
    fn webseal_falls_back_to_generic_identities() {
        let id = product_identity(LicenseModule::Webseal, true);
        assert_eq!(id.id, BASE_IDENTITY.id);

        let id = product_identity(LicenseModule::Webseal, false);
        assert_eq!(id.id, NON_PRODUCTION_IDENTITY.id);
    }

    #[test]
    fn license_annotations_contain_base_keys() {
        let annotations = license_annotations(LicenseModule::Webseal, true);
        assert_eq!(annotations["productMetric"], "PROCESSOR_VALUE_UNIT");
        assert_eq!(annotations["productChargedContainers"], "All");
        assert_eq!(annotations["productName"], BASE_IDENTITY.name);
        assert_eq!(annotations["productId"], BASE_IDENTITY.id);
    }
}
