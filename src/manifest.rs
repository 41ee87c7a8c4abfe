//! Pod manifests for the test pods.
//!
//! Applying them to the cluster is left to the deployment tooling; tasks only
//! render them. A file `<pod-name>.yaml` in the directory named by
//! `TFT_MANIFESTS_OVERRIDES` replaces the generated manifest.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::output::PodInfo;
use crate::settings::TestSettings;
use crate::types::{str_sanitize, ConnectionMode, PodType};

pub const ENV_MANIFESTS_OVERRIDES: &str = "TFT_MANIFESTS_OVERRIDES";
pub const ENV_TOOLS_IMAGE: &str = "TFT_TOOLS_IMAGE";
pub const DEFAULT_TOOLS_IMAGE: &str = "ghcr.io/ovn-kubernetes/kubernetes-traffic-flow-tests:latest";

const NETWORKS_ANNOTATION: &str = "k8s.v1.cni.cncf.io/networks";
const DEFAULT_NETWORK_ANNOTATION: &str = "v1.multus-cni.io/default-network";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PodManifest {
    pub api_version: String,
    pub kind: String,
    pub metadata: Metadata,
    pub spec: PodSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metadata {
    pub name: String,
    pub namespace: String,
    pub labels: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PodSpec {
    pub node_name: String,
    pub host_network: bool,
    pub containers: Vec<Container>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
    pub security_context: SecurityContext,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<Resources>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SecurityContext {
    pub privileged: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resources {
    pub requests: BTreeMap<String, String>,
    pub limits: BTreeMap<String, String>,
}

impl PodManifest {
    /// Manifest for `pod` on `node`. `command` is the container's entry
    /// point; persistent servers start their tool here.
    pub fn build(
        ts: &TestSettings,
        pod: &PodInfo,
        node: &str,
        privileged: bool,
        default_network: &str,
        command: Vec<String>,
    ) -> Self {
        let mut labels = BTreeMap::new();
        labels.insert("app".to_string(), "tft-tests".to_string());
        labels.insert("tft-tests".to_string(), str_sanitize(&ts.test_group_name));

        let mut annotations = BTreeMap::new();
        let mut resources = None;
        if pod.pod_type != PodType::Hostbacked {
            annotations.insert(
                DEFAULT_NETWORK_ANNOTATION.to_string(),
                default_network.to_string(),
            );
            let secondary = pod.pod_type == PodType::Sriov
                || ts.connection_mode() == ConnectionMode::MultiNetwork;
            if secondary {
                annotations.insert(
                    NETWORKS_ANNOTATION.to_string(),
                    ts.connection.effective_secondary_network_nad(),
                );
            }
            if let Some(resource) = &ts.connection.resource_name {
                let one: BTreeMap<_, _> = [(resource.clone(), "1".to_string())].into();
                resources = Some(Resources {
                    requests: one.clone(),
                    limits: one,
                });
            }
        }

        Self {
            api_version: "v1".to_string(),
            kind: "Pod".to_string(),
            metadata: Metadata {
                name: pod.name.clone(),
                namespace: ts.namespace.clone(),
                labels,
                annotations,
            },
            spec: PodSpec {
                node_name: node.to_string(),
                host_network: pod.pod_type == PodType::Hostbacked,
                containers: vec![Container {
                    name: pod.name.clone(),
                    image: tools_image(),
                    command,
                    security_context: SecurityContext { privileged },
                    resources,
                }],
            },
        }
    }

    /// Render as YAML, preferring an override file from `overrides_dir`.
    pub fn render(&self, overrides_dir: Option<&Path>) -> std::io::Result<String> {
        if let Some(dir) = overrides_dir {
            let path = override_path(dir, &self.metadata.name);
            if path.exists() {
                return std::fs::read_to_string(path);
            }
        }
        serde_yaml::to_string(self).map_err(std::io::Error::other)
    }
}

pub fn overrides_dir_from_env() -> Option<PathBuf> {
    std::env::var_os(ENV_MANIFESTS_OVERRIDES)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

fn override_path(dir: &Path, pod_name: &str) -> PathBuf {
    dir.join(format!("{pod_name}.yaml"))
}

fn tools_image() -> String {
    std::env::var(ENV_TOOLS_IMAGE)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| DEFAULT_TOOLS_IMAGE.to_string())
}
