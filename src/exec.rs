//! Remote command execution inside pods.
//!
//! Tasks only see the [`RemoteExec`] trait. The production backend shells out
//! to `kubectl exec`; tests plug in a closure.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The cluster a pod lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterKind {
    Tenant,
    Infra,
}

impl ClusterKind {
    pub fn is_tenant(self) -> bool {
        self == ClusterKind::Tenant
    }

    pub fn from_tenant(tenant: bool) -> Self {
        if tenant {
            ClusterKind::Tenant
        } else {
            ClusterKind::Infra
        }
    }
}

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("no {0:?} cluster configured")]
    NoCluster(ClusterKind),

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Outcome of one remote command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecResult {
    pub out: String,
    pub err: String,
    pub returncode: i32,
}

impl ExecResult {
    pub fn new(out: impl Into<String>, err: impl Into<String>, returncode: i32) -> Self {
        Self {
            out: out.into(),
            err: err.into(),
            returncode,
        }
    }

    pub fn success(&self) -> bool {
        self.returncode == 0
    }

    /// One line summary for failure messages.
    pub fn debug_msg(&self) -> String {
        let mut msg = if self.success() {
            "success".to_string()
        } else {
            format!("failed (exit {})", self.returncode)
        };
        if !self.out.is_empty() {
            msg.push_str(&format!("; out={:?}", truncate(&self.out, 200)));
        }
        if !self.err.is_empty() {
            msg.push_str(&format!("; err={:?}", truncate(&self.err, 200)));
        }
        msg
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Runs a shell command inside a pod. Implementations never retry.
#[async_trait]
pub trait RemoteExec: Send + Sync {
    async fn run(
        &self,
        cluster: ClusterKind,
        namespace: &str,
        pod: &str,
        cmd: &str,
    ) -> Result<ExecResult, ExecError>;
}

/// Adapter turning a closure into a [`RemoteExec`]. Used by tests and dry runs.
pub struct FnExec<F>(pub F);

#[async_trait]
impl<F> RemoteExec for FnExec<F>
where
    F: Fn(ClusterKind, &str, &str, &str) -> ExecResult + Send + Sync,
{
    async fn run(
        &self,
        cluster: ClusterKind,
        namespace: &str,
        pod: &str,
        cmd: &str,
    ) -> Result<ExecResult, ExecError> {
        Ok((self.0)(cluster, namespace, pod, cmd))
    }
}

/// `kubectl exec` backend.
#[derive(Debug, Clone)]
pub struct KubectlExec {
    pub kubectl: String,
    pub kubeconfig_tenant: PathBuf,
    pub kubeconfig_infra: Option<PathBuf>,
}

impl KubectlExec {
    pub fn new(kubeconfig_tenant: PathBuf, kubeconfig_infra: Option<PathBuf>) -> Self {
        Self {
            kubectl: "kubectl".to_string(),
            kubeconfig_tenant,
            kubeconfig_infra,
        }
    }
}

#[async_trait]
impl RemoteExec for KubectlExec {
    async fn run(
        &self,
        cluster: ClusterKind,
        namespace: &str,
        pod: &str,
        cmd: &str,
    ) -> Result<ExecResult, ExecError> {
        let kubeconfig = match cluster {
            ClusterKind::Tenant => &self.kubeconfig_tenant,
            ClusterKind::Infra => self
                .kubeconfig_infra
                .as_ref()
                .ok_or(ExecError::NoCluster(cluster))?,
        };

        tracing::debug!(?cluster, %namespace, %pod, %cmd, "kubectl exec");

        let output = tokio::process::Command::new(&self.kubectl)
            .arg("--kubeconfig")
            .arg(kubeconfig)
            .args(["-n", namespace, "exec", pod, "--", "sh", "-c", cmd])
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| ExecError::Spawn {
                program: self.kubectl.clone(),
                source,
            })?;

        Ok(ExecResult {
            out: String::from_utf8_lossy(&output.stdout).into_owned(),
            err: String::from_utf8_lossy(&output.stderr).into_owned(),
            returncode: output.status.code().unwrap_or(-1),
        })
    }
}
