//! # Custom Resource Definition
//!
//! Type definitions for the `IBMSecurityVerifyAccess` custom resource.
//!
//! The spec mirrors the container-facing surface of a Deployment: an image,
//! a replica count, snapshot configuration for the embedded configuration
//! service, and a constrained set of container overrides. Everything else in
//! the generated Deployment is derived by the builder in [`crate::deployment`].

use k8s_openapi::api::core::v1::{
    EnvFromSource, EnvVar, LocalObjectReference, Probe, ResourceRequirements, SecurityContext,
    Volume, VolumeDevice, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Language in which messages are logged by the deployment.
///
/// The values are the locale identifiers understood by the Verify Access
/// runtime containers and are passed through verbatim as the `LANG`
/// environment variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum Language {
    #[serde(rename = "zh_CN.utf8")]
    ChineseSimplified,
    #[serde(rename = "zh_TW.utf8")]
    ChineseTraditional,
    #[serde(rename = "cs_CZ.utf8")]
    Czech,
    #[serde(rename = "en_US.utf8")]
    English,
    #[serde(rename = "fr_FR.utf8")]
    French,
    #[serde(rename = "de_DE.utf8")]
    German,
    #[serde(rename = "hu_HU.utf8")]
    Hungarian,
    #[serde(rename = "it_IT.utf8")]
    Italian,
    #[serde(rename = "ja_JP.utf8")]
    Japanese,
    #[serde(rename = "ko_KR.utf8")]
    Korean,
    #[serde(rename = "pl_PL.utf8")]
    Polish,
    #[serde(rename = "pt_BR.utf8")]
    Portuguese,
    #[serde(rename = "ru_RU.utf8")]
    Russian,
    #[serde(rename = "es_ES.utf8")]
    Spanish,
}

impl Language {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ChineseSimplified => "zh_CN.utf8",
            Self::ChineseTraditional => "zh_TW.utf8",
            Self::Czech => "cs_CZ.utf8",
            Self::English => "en_US.utf8",
            Self::French => "fr_FR.utf8",
            Self::German => "de_DE.utf8",
            Self::Hungarian => "hu_HU.utf8",
            Self::Italian => "it_IT.utf8",
            Self::Japanese => "ja_JP.utf8",
            Self::Korean => "ko_KR.utf8",
            Self::Polish => "pl_PL.utf8",
            Self::Portuguese => "pt_BR.utf8",
            Self::Russian => "ru_RU.utf8",
            Self::Spanish => "es_ES.utf8",
        }
    }
}

/// Licensed module tracked by the IBM License Metric Tool annotations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum LicenseModule {
    #[default]
    Webseal,
    Federation,
    AccessControl,
    Enterprise,
}

/// License Metric Tool annotations added to the pod template so that IBM
/// license tracking can attribute usage to the correct product identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IlmtAnnotations {
    /// Licensed module to attach to the container.
    #[serde(default)]
    pub module: LicenseModule,
    /// Switches between production and non-production annotations.
    #[serde(default = "default_true")]
    pub production: bool,
}

/// A single administrator-provided annotation for the pod template.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct CustomAnnotation {
    /// Key of the annotation to create.
    pub key: String,
    /// Value of the annotation to create.
    pub value: String,
}

/// Container overrides, loosely based on `corev1.Container`.
///
/// Only the fields an administrator may reasonably tune are exposed; the
/// container name, image, ports and default probes are owned by the builder.
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VerifyAccessContainer {
    /// List of sources to populate environment variables in the container.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env_from: Vec<EnvFromSource>,

    /// List of environment variables to set in the container.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,

    /// Compute resources required by the container.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,

    /// Pod volumes to mount into the container's filesystem.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_mounts: Vec<VolumeMount>,

    /// Block devices to be used by the container.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_devices: Vec<VolumeDevice>,

    /// Periodic probe of container liveness.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub liveness_probe: Option<Probe>,

    /// Periodic probe of container service readiness.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readiness_probe: Option<Probe>,

    /// Probe run until the pod has successfully initialized.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub startup_probe: Option<Probe>,

    /// Image pull policy. One of `Always`, `Never`, `IfNotPresent`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<String>,

    /// Security options the container should be run with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_context: Option<SecurityContext>,
}

/// Desired state of an `IBMSecurityVerifyAccess` resource.
#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[kube(
    kind = "IBMSecurityVerifyAccess",
    group = "ibm.com",
    version = "v1",
    namespaced,
    status = "VerifyAccessStatus",
    printcolumn = r#"{"name":"Available", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Available\")].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct VerifyAccessSpec {
    /// The name of the image which will be used in the deployment.
    pub image: String,

    /// The number of pods which will be started for the deployment.
    #[serde(default = "default_replicas")]
    pub replicas: i32,

    /// Whether the deployment should be restarted when a new snapshot is
    /// published. Consumed by the snapshot manager, not by reconciliation.
    #[serde(default = "default_true")]
    pub auto_restart: bool,

    /// Identifier of the configuration snapshot to use.
    #[serde(default = "default_snapshot_id")]
    pub snapshot_id: String,

    /// Secrets used to decrypt configuration snapshot files, separated by
    /// `||`. Equivalent to the `CONFIG_SNAPSHOT_SECRETS` environment property.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub snapshot_secrets: String,

    /// How the runtime containers verify connections to the snapshot
    /// management service. Equivalent to the `CONFIG_SERVICE_TLS_CACERT`
    /// environment property. When empty the sentinel `operator` is used,
    /// meaning the X509 certificate is read from the operator secret.
    #[serde(
        default,
        rename = "snapshotTLSCacert",
        skip_serializing_if = "String::is_empty"
    )]
    pub snapshot_tls_cacert: String,

    /// Names of fixpacks which should be installed in the deployment, in
    /// installation order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fixpacks: Vec<String>,

    /// Name of the Verify Access instance being started. Only used for WRP
    /// and DSC deployments.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub instance: String,

    /// Language used for messages logged by the deployment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<Language>,

    /// Volumes that can be mounted by containers belonging to the pod.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,

    /// References to image pull secrets in the same namespace.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_pull_secrets: Vec<LocalObjectReference>,

    /// Name of the ServiceAccount used to run the pod.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub service_account_name: String,

    /// Custom annotations added to the pod template. Applied last, so they
    /// may overwrite the license annotations.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub custom_annotations: Vec<CustomAnnotation>,

    /// IBM License Metric Tool annotations to add to the pod template.
    #[serde(
        default,
        rename = "ilmtAnnotations",
        skip_serializing_if = "Option::is_none"
    )]
    pub license_annotations: Option<IlmtAnnotations>,

    /// Overrides for the single container in the deployment.
    #[serde(default)]
    pub container: VerifyAccessContainer,
}

/// Observed state of an `IBMSecurityVerifyAccess` resource.
///
/// Holds a single `Available` condition describing the outcome of the last
/// convergence pass; no condition history is retained.
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VerifyAccessStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

/// Shorthand for the generated custom resource type.
pub type VerifyAccess = IBMSecurityVerifyAccess;

fn default_replicas() -> i32 {
    1
}

fn default_true() -> bool {
    true
}

fn default_snapshot_id() -> String {
    "published".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_defaults_apply_on_minimal_manifest() {
        let spec: VerifyAccessSpec =
            serde_yaml::from_str("image: icr.io/isva/verify-access-runtime:10.0.8").unwrap();

        assert_eq!(spec.replicas, 1);
        assert!(spec.auto_restart);
        assert_eq!(spec.snapshot_id, "published");
        assert!(spec.snapshot_secrets.is_empty());
        assert!(spec.snapshot_tls_cacert.is_empty());
        assert!(spec.fixpacks.is_empty());
        assert!(spec.instance.is_empty());
        assert!(spec.language.is_none());
        assert!(spec.license_annotations.is_none());
    }

    #[test]
    fn tls_cacert_field_uses_original_casing() {
        let spec: VerifyAccessSpec = serde_yaml::from_str(
            "image: icr.io/isva/verify-access-runtime:10.0.8\nsnapshotTLSCacert: my-ca-secret",
        )
        .unwrap();

        assert_eq!(spec.snapshot_tls_cacert, "my-ca-secret");
    }

    #[test]
    fn license_module_parses_snake_case_values() {
        let ann: IlmtAnnotations =
            serde_yaml::from_str("module: access_control\nproduction: false").unwrap();
        assert_eq!(ann.module, LicenseModule::AccessControl);
        assert!(!ann.production);

        let ann: IlmtAnnotations = serde_yaml::from_str("module: webseal").unwrap();
        assert_eq!(ann.module, LicenseModule::Webseal);
        assert!(ann.production);
    }

    #[test]
    fn language_round_trips_locale_identifiers() {
        let lang: Language = serde_yaml::from_str("ja_JP.utf8").unwrap();
        assert_eq!(lang, Language::Japanese);
        assert_eq!(lang.as_str(), "ja_JP.utf8");
    }
}
