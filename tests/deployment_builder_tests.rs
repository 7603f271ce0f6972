//! Tests for the deterministic Deployment builder.
//!
//! The builder is pure data transformation, so these tests assert directly
//! on the constructed object graph without any cluster involvement.

use k8s_openapi::api::core::v1::{EnvVar, Probe};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::Resource;

use verify_access_operator::crd::{VerifyAccess, VerifyAccessSpec};
use verify_access_operator::deployment;
use verify_access_operator::secret::SecretConfig;

fn resource_from_yaml(spec_yaml: &str) -> VerifyAccess {
    let spec: VerifyAccessSpec = serde_yaml::from_str(spec_yaml).unwrap();
    let mut resource = VerifyAccess::new("test-isva", spec);
    resource.metadata.namespace = Some("isva".to_string());
    resource.metadata.uid = Some("9f6af4a7-0000-4000-8000-c0ffee000001".to_string());
    resource
}

fn owner_of(resource: &VerifyAccess) -> OwnerReference {
    resource.controller_owner_ref(&()).unwrap()
}

fn build(resource: &VerifyAccess) -> k8s_openapi::api::apps::v1::Deployment {
    deployment::build(resource, &SecretConfig::default(), owner_of(resource))
}

fn container_env(dep: &k8s_openapi::api::apps::v1::Deployment) -> Vec<EnvVar> {
    dep.spec.as_ref().unwrap().template.spec.as_ref().unwrap().containers[0]
        .env
        .clone()
        .unwrap()
}

fn env_value<'a>(env: &'a [EnvVar], name: &str) -> Option<&'a str> {
    env.iter()
        .find(|e| e.name == name)
        .and_then(|e| e.value.as_deref())
}

#[test]
fn selector_equals_template_labels() {
    let resource = resource_from_yaml("image: icr.io/isva/isva-runtime:10.0.8");
    let dep = build(&resource);

    let spec = dep.spec.as_ref().unwrap();
    let template_labels = spec
        .template
        .metadata
        .as_ref()
        .unwrap()
        .labels
        .as_ref()
        .unwrap();

    assert_eq!(spec.selector.match_labels.as_ref().unwrap(), template_labels);
    assert_eq!(dep.metadata.labels.as_ref().unwrap(), template_labels);

    assert_eq!(template_labels["kind"], "IBMSecurityVerifyAccess");
    assert_eq!(template_labels["app"], "test-isva");
    assert_eq!(template_labels["VerifyAccess_cr"], "test-isva");
    assert_eq!(template_labels["service"], "runtime");
}

#[test]
fn unknown_image_builds_with_unknown_service_label() {
    let resource = resource_from_yaml("image: docker.io/library/nginx:1.27");
    let dep = build(&resource);

    let labels = dep.metadata.labels.as_ref().unwrap();
    assert_eq!(labels["service"], "unknown");
}

#[test]
fn replicas_and_identity_come_from_the_resource() {
    let resource = resource_from_yaml("image: icr.io/isva/isva-runtime:10.0.8\nreplicas: 3");
    let dep = build(&resource);

    assert_eq!(dep.metadata.name.as_deref(), Some("test-isva"));
    assert_eq!(dep.metadata.namespace.as_deref(), Some("isva"));
    assert_eq!(dep.spec.as_ref().unwrap().replicas, Some(3));
}

#[test]
fn owner_reference_points_at_the_custom_resource() {
    let resource = resource_from_yaml("image: icr.io/isva/isva-runtime:10.0.8");
    let dep = build(&resource);

    let owners = dep.metadata.owner_references.as_ref().unwrap();
    assert_eq!(owners.len(), 1);
    assert_eq!(owners[0].kind, "IBMSecurityVerifyAccess");
    assert_eq!(owners[0].name, "test-isva");
    assert_eq!(owners[0].controller, Some(true));
}

#[test]
fn https_port_is_fixed() {
    let resource = resource_from_yaml("image: icr.io/isva/isva-runtime:10.0.8");
    let dep = build(&resource);

    let ports = dep.spec.as_ref().unwrap().template.spec.as_ref().unwrap().containers[0]
        .ports
        .as_ref()
        .unwrap();
    assert_eq!(ports.len(), 1);
    assert_eq!(ports[0].container_port, 9443);
    assert_eq!(ports[0].name.as_deref(), Some("https"));
    assert_eq!(ports[0].protocol.as_deref(), Some("TCP"));
}

#[test]
fn credential_env_vars_reference_the_managed_secret() {
    let resource = resource_from_yaml("image: icr.io/isva/isva-runtime:10.0.8");
    let env = container_env(&build(&resource));

    let expected = [
        ("CONFIG_SERVICE_URL", "url"),
        ("CONFIG_SERVICE_USER_NAME", "user"),
        ("CONFIG_SERVICE_USER_PWD", "ro.pwd"),
    ];

    for (i, (name, key)) in expected.iter().enumerate() {
        assert_eq!(env[i].name, *name);
        assert!(env[i].value.is_none(), "{name} must never be inlined");

        let selector = env[i]
            .value_from
            .as_ref()
            .unwrap()
            .secret_key_ref
            .as_ref()
            .unwrap();
        assert_eq!(selector.name, "verify-access-operator");
        assert_eq!(selector.key, *key);
        assert_eq!(selector.optional, Some(false));
    }
}

#[test]
fn tls_cacert_defaults_to_the_operator_sentinel() {
    let resource = resource_from_yaml("image: icr.io/isva/isva-runtime:10.0.8");
    let env = container_env(&build(&resource));

    assert_eq!(env_value(&env, "CONFIG_SERVICE_TLS_CACERT"), Some("operator"));
}

#[test]
fn explicit_tls_cacert_wins_over_the_sentinel() {
    let resource = resource_from_yaml(
        "image: icr.io/isva/isva-runtime:10.0.8\nsnapshotTLSCacert: custom-ca-secret",
    );
    let env = container_env(&build(&resource));

    assert_eq!(
        env_value(&env, "CONFIG_SERVICE_TLS_CACERT"),
        Some("custom-ca-secret")
    );
}

#[test]
fn fixpacks_join_with_commas() {
    let resource = resource_from_yaml(
        "image: icr.io/isva/isva-runtime:10.0.8\nfixpacks:\n  - fp1\n  - fp2",
    );
    let env = container_env(&build(&resource));

    assert_eq!(env_value(&env, "FIXPACKS"), Some("fp1,fp2"));
}

#[test]
fn empty_instance_emits_no_instance_variable() {
    let resource = resource_from_yaml("image: icr.io/isva/isva-runtime:10.0.8");
    let env = container_env(&build(&resource));

    assert!(env.iter().all(|e| e.name != "INSTANCE"));
}

#[test]
fn optional_env_vars_appear_when_their_fields_are_set() {
    let resource = resource_from_yaml(
        "image: icr.io/isva/isva-wrp:10.0.8\n\
         instance: intranet\n\
         snapshotSecrets: key1||key2\n\
         language: fr_FR.utf8",
    );
    let env = container_env(&build(&resource));

    assert_eq!(env_value(&env, "INSTANCE"), Some("intranet"));
    assert_eq!(env_value(&env, "CONFIG_SNAPSHOT_SECRETS"), Some("key1||key2"));
    assert_eq!(env_value(&env, "LANG"), Some("fr_FR.utf8"));
    assert_eq!(env_value(&env, "SNAPSHOT_ID"), Some("published"));

    let labels = build(&resource).metadata.labels.unwrap();
    assert_eq!(labels["service"], "wrp-intranet");
}

#[test]
fn container_env_is_appended_after_derived_and_not_deduplicated() {
    let resource = resource_from_yaml(
        "image: icr.io/isva/isva-runtime:10.0.8\n\
         container:\n  env:\n    - name: SNAPSHOT_ID\n      value: pinned\n    - name: EXTRA\n      value: value",
    );
    let env = container_env(&build(&resource));

    let snapshot_ids: Vec<_> = env.iter().filter(|e| e.name == "SNAPSHOT_ID").collect();
    assert_eq!(snapshot_ids.len(), 2, "conflicting keys both appear");
    assert_eq!(snapshot_ids[0].value.as_deref(), Some("published"));
    assert_eq!(snapshot_ids[1].value.as_deref(), Some("pinned"));

    // Spec-provided variables come last.
    assert_eq!(env.last().unwrap().name, "EXTRA");
}

#[test]
fn default_probes_use_the_health_check_entrypoint() {
    let resource = resource_from_yaml("image: icr.io/isva/isva-runtime:10.0.8");
    let dep = build(&resource);
    let container = &dep.spec.as_ref().unwrap().template.spec.as_ref().unwrap().containers[0];

    let liveness = container.liveness_probe.as_ref().unwrap();
    assert_eq!(liveness.timeout_seconds, Some(3));
    assert_eq!(
        liveness.exec.as_ref().unwrap().command.as_ref().unwrap(),
        &["/sbin/health_check.sh", "livenessProbe"]
    );

    let readiness = container.readiness_probe.as_ref().unwrap();
    assert_eq!(readiness.timeout_seconds, Some(3));
    assert_eq!(
        readiness.exec.as_ref().unwrap().command.as_ref().unwrap(),
        &["/sbin/health_check.sh"]
    );

    let startup = container.startup_probe.as_ref().unwrap();
    assert_eq!(startup.initial_delay_seconds, Some(5));
    assert_eq!(startup.timeout_seconds, Some(20));
    assert_eq!(startup.failure_threshold, Some(30));
    assert_eq!(
        startup.exec.as_ref().unwrap().command.as_ref().unwrap(),
        &["/sbin/health_check.sh", "startupProbe"]
    );
}

#[test]
fn probe_overrides_replace_the_defaults() {
    let resource = resource_from_yaml(
        "image: icr.io/isva/isva-runtime:10.0.8\n\
         container:\n  livenessProbe:\n    timeoutSeconds: 9\n    httpGet:\n      path: /healthz\n      port: 9443",
    );
    let dep = build(&resource);
    let container = &dep.spec.as_ref().unwrap().template.spec.as_ref().unwrap().containers[0];

    let liveness: &Probe = container.liveness_probe.as_ref().unwrap();
    assert_eq!(liveness.timeout_seconds, Some(9));
    assert!(liveness.exec.is_none());
    assert!(liveness.http_get.is_some());

    // Unrelated probes keep their defaults.
    assert!(container.readiness_probe.as_ref().unwrap().exec.is_some());
}

#[test]
fn license_annotations_resolve_federation_non_production() {
    let resource = resource_from_yaml(
        "image: icr.io/isva/isva-runtime:10.0.8\n\
         ilmtAnnotations:\n  module: federation\n  production: false",
    );
    let dep = build(&resource);

    let annotations = dep
        .spec
        .unwrap()
        .template
        .metadata
        .unwrap()
        .annotations
        .unwrap();

    assert_eq!(annotations["productId"], "01a9d83608044a4687b3d29a0d4d0a35");
    assert_eq!(
        annotations["productName"],
        "IBM Security Verify Access Virtual Ed Federation Module Non-Production AOS"
    );
    assert_eq!(annotations["productMetric"], "PROCESSOR_VALUE_UNIT");
    assert_eq!(annotations["productChargedContainers"], "All");
}

#[test]
fn custom_annotations_override_license_annotations() {
    let resource = resource_from_yaml(
        "image: icr.io/isva/isva-runtime:10.0.8\n\
         ilmtAnnotations:\n  module: federation\n  production: false\n\
         customAnnotations:\n  - key: productId\n    value: X\n  - key: team\n    value: iam",
    );
    let dep = build(&resource);

    let annotations = dep
        .spec
        .unwrap()
        .template
        .metadata
        .unwrap()
        .annotations
        .unwrap();

    assert_eq!(annotations["productId"], "X");
    assert_eq!(annotations["team"], "iam");
    // Untouched license keys survive the overlay.
    assert_eq!(annotations["productMetric"], "PROCESSOR_VALUE_UNIT");
}

#[test]
fn no_annotations_without_license_or_custom_entries() {
    let resource = resource_from_yaml("image: icr.io/isva/isva-runtime:10.0.8");
    let dep = build(&resource);

    assert!(dep
        .spec
        .unwrap()
        .template
        .metadata
        .unwrap()
        .annotations
        .is_none());
}

#[test]
fn pod_spec_passthrough_fields_are_carried() {
    let resource = resource_from_yaml(
        "image: icr.io/isva/isva-runtime:10.0.8\n\
         serviceAccountName: isva-runner\n\
         imagePullSecrets:\n\
           - name: regcred\n\
         volumes:\n\
           - name: scratch\n\
             emptyDir: {}",
    );
    let dep = build(&resource);
    let pod = dep.spec.unwrap().template.spec.unwrap();

    assert_eq!(pod.service_account_name.as_deref(), Some("isva-runner"));
    assert_eq!(pod.image_pull_secrets.unwrap()[0].name, "regcred");
    assert_eq!(pod.volumes.unwrap()[0].name, "scratch");
}

#[test]
fn build_is_deterministic() {
    let resource = resource_from_yaml(
        "image: icr.io/isva/isva-wrp:10.0.8\n\
         instance: intranet\n\
         fixpacks: [fp1]\n\
         ilmtAnnotations:\n\
           module: enterprise\n\
           production: true",
    );

    let first = build(&resource);
    let second = build(&resource);

    assert_eq!(
        serde_json::to_value(&first).unwrap(),
        serde_json::to_value(&second).unwrap()
    );
}
