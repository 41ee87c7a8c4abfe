//! Task framework: one worker per server, client or plugin participant of a
//! test instance.
//!
//! A [`TaskKind`] supplies the role specific parts (setup, the async unit of
//! work, result classification). [`Task`] owns the shared lifecycle:
//! `Created -> Initialized -> Running -> Finished | Failed`, the start barrier
//! and setting the client's finished flag.

pub mod sync;

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::exec::{ClusterKind, ExecError, ExecResult, RemoteExec};
use crate::manifest::{self, PodManifest};
use crate::output::{FlowTestOutput, PluginOutput, PodInfo};
use crate::settings::TestSettings;
use crate::types::TaskRole;

pub use sync::{Event, TestSync};

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("duration expired")]
    DurationExpired,

    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error("{0}")]
    Setup(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Created,
    Initialized,
    Running,
    Finished,
    Failed,
}

/// Output of a server task. Not part of the result file.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerOutput {
    pub success: bool,
    pub msg: Option<String>,
    pub command: String,
    pub result: Option<ExecResult>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutput {
    Server(ServerOutput),
    Flow(FlowTestOutput),
    Plugin(PluginOutput),
}

impl TaskOutput {
    pub fn success(&self) -> bool {
        match self {
            TaskOutput::Server(o) => o.success,
            TaskOutput::Flow(o) => o.success,
            TaskOutput::Plugin(o) => o.success,
        }
    }

    pub fn msg(&self) -> Option<&str> {
        match self {
            TaskOutput::Server(o) => o.msg.as_deref(),
            TaskOutput::Flow(o) => o.msg.as_deref(),
            TaskOutput::Plugin(o) => o.msg.as_deref(),
        }
    }
}

pub type TaskOperation = BoxFuture<'static, TaskOutput>;

/// Everything a running task shares with its siblings.
#[derive(Clone)]
pub struct TaskContext {
    pub settings: Arc<TestSettings>,
    pub sync: Arc<TestSync>,
    pub exec: Arc<dyn RemoteExec>,
}

impl TaskContext {
    pub fn new(
        settings: Arc<TestSettings>,
        sync: Arc<TestSync>,
        exec: Arc<dyn RemoteExec>,
    ) -> Self {
        Self {
            settings,
            sync,
            exec,
        }
    }

    /// Run `cmd` in `pod`, bounded by the instance deadline. No call is
    /// started once the deadline passed.
    pub async fn run_in_pod(
        &self,
        cluster: ClusterKind,
        pod: &str,
        cmd: &str,
    ) -> Result<ExecResult, TaskError> {
        if self.sync.expired() {
            return Err(TaskError::DurationExpired);
        }
        let call = self.exec.run(cluster, &self.settings.namespace, pod, cmd);
        match tokio::time::timeout_at(self.sync.deadline, call).await {
            Err(_) => Err(TaskError::DurationExpired),
            Ok(r) => Ok(r?),
        }
    }
}

/// Role specific behavior of a task.
#[async_trait]
pub trait TaskKind: Send + Sync + 'static {
    fn role(&self) -> TaskRole;

    /// Short name for log lines, e.g. `iperf-client`.
    fn log_name(&self) -> String;

    fn pod(&self) -> &PodInfo;

    fn node_name(&self) -> &str;

    fn cluster(&self) -> ClusterKind {
        ClusterKind::from_tenant(self.pod().is_tenant)
    }

    /// Servers start before the barrier; everybody else meets there.
    fn waits_at_barrier(&self) -> bool {
        self.role() != TaskRole::Server
    }

    /// The pod this task runs in.
    fn manifest(&self, ts: &TestSettings) -> PodManifest;

    /// Role specific setup before the worker starts.
    async fn initialize(&mut self, _ctx: &TaskContext) -> Result<(), TaskError> {
        Ok(())
    }

    /// Wait until the task is able to serve its peers. Only meaningful for
    /// servers.
    async fn confirm_ready(&self, _ctx: &TaskContext) -> Result<(), TaskError> {
        Ok(())
    }

    /// The unit of work. Runs after the start barrier for barrier
    /// participants.
    fn create_operation(&self, ctx: TaskContext) -> TaskOperation;

    /// Output used when the task could not run its operation.
    fn failed_output(&self, ctx: &TaskContext, msg: String) -> TaskOutput;

    fn on_success(&self, _output: &TaskOutput) {}
}

/// A single use task and its lifecycle.
pub struct Task {
    kind: Box<dyn TaskKind>,
    state: TaskState,
    init_error: Option<TaskError>,
    manifest: Option<String>,
    ctx: Option<TaskContext>,
    handle: Option<JoinHandle<TaskOutput>>,
    output: Option<TaskOutput>,
}

impl Task {
    pub fn new(kind: impl TaskKind) -> Self {
        Self {
            kind: Box::new(kind),
            state: TaskState::Created,
            init_error: None,
            manifest: None,
            ctx: None,
            handle: None,
            output: None,
        }
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn role(&self) -> TaskRole {
        self.kind.role()
    }

    pub fn log_name(&self) -> String {
        self.kind.log_name()
    }

    pub fn pod(&self) -> &PodInfo {
        self.kind.pod()
    }

    pub fn waits_at_barrier(&self) -> bool {
        self.kind.waits_at_barrier()
    }

    /// The rendered pod manifest, available after [`Task::initialize`].
    pub fn manifest(&self) -> Option<&str> {
        self.manifest.as_deref()
    }

    pub fn output(&self) -> Option<&TaskOutput> {
        self.output.as_ref()
    }

    /// Render the pod manifest and run the role specific setup. A failure is
    /// remembered; the worker still takes part in the barrier and reports it.
    pub async fn initialize(&mut self, ctx: &TaskContext) {
        if self.state != TaskState::Created {
            return;
        }
        let overrides = manifest::overrides_dir_from_env();
        match self
            .kind
            .manifest(&ctx.settings)
            .render(overrides.as_deref())
        {
            Ok(m) => {
                debug!(task = %self.log_name(), pod = %self.pod().name, "rendered manifest");
                self.manifest = Some(m);
            }
            Err(e) => {
                self.init_error = Some(TaskError::Setup(format!(
                    "failed to render manifest for pod {}: {e}",
                    self.pod().name
                )));
            }
        }
        if self.init_error.is_none() {
            if let Err(e) = self.kind.initialize(ctx).await {
                self.init_error = Some(e);
            }
        }
        match &self.init_error {
            None => self.state = TaskState::Initialized,
            Some(e) => {
                warn!(task = %self.log_name(), error = %e, "task setup failed");
                self.state = TaskState::Failed;
            }
        }
    }

    pub async fn confirm_ready(&self, ctx: &TaskContext) -> Result<(), TaskError> {
        if self.init_error.is_some() {
            return Ok(());
        }
        self.kind.confirm_ready(ctx).await
    }

    /// Spawn the worker.
    pub fn start(&mut self, ctx: TaskContext) {
        if self.handle.is_some() {
            return;
        }
        let name = self.log_name();
        let operation: TaskOperation = match &self.init_error {
            None => self.kind.create_operation(ctx.clone()),
            Some(e) => {
                let out = self.kind.failed_output(&ctx, e.to_string());
                Box::pin(async move { out })
            }
        };
        let barrier_expired = self.kind.failed_output(
            &ctx,
            "duration expired while waiting for the other tasks to start".to_string(),
        );
        let waits = self.kind.waits_at_barrier();
        let role = self.kind.role();
        let sync = ctx.sync.clone();

        info!(task = %name, node = %self.kind.node_name(), pod = %self.pod().name, "starting task");
        if self.state == TaskState::Initialized {
            self.state = TaskState::Running;
        }
        self.ctx = Some(ctx);

        self.handle = Some(tokio::spawn(async move {
            let output = if waits && !sync.wait_barrier().await {
                barrier_expired
            } else {
                operation.await
            };
            if role == TaskRole::Client && sync.client_finished.set() {
                debug!(task = %name, "client finished");
            }
            output
        }));
    }

    /// Wait for the worker and return its output.
    pub async fn join(&mut self) -> Option<TaskOutput> {
        if let Some(handle) = self.handle.take() {
            let output = match handle.await {
                Ok(o) => o,
                Err(e) => {
                    let ctx = self.ctx.as_ref()?;
                    // A crashed client still has to release the looping probes.
                    if self.kind.role() == TaskRole::Client {
                        ctx.sync.client_finished.set();
                    }
                    self.kind.failed_output(ctx, format!("task aborted: {e}"))
                }
            };
            if output.success() && self.state != TaskState::Failed {
                self.state = TaskState::Finished;
                self.kind.on_success(&output);
            } else {
                self.state = TaskState::Failed;
                warn!(
                    task = %self.log_name(),
                    msg = output.msg().unwrap_or(""),
                    "task failed"
                );
            }
            self.output = Some(output);
        }
        self.output.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::FnExec;
    use crate::output::{PluginMetadata, PodInfo};
    use crate::settings::tests::{settings_for, CONFIG};
    use crate::types::PodType;
    use std::time::Duration;

    struct Sampler {
        pod: PodInfo,
        fail_init: bool,
    }

    #[async_trait]
    impl TaskKind for Sampler {
        fn role(&self) -> TaskRole {
            TaskRole::Plugin
        }

        fn log_name(&self) -> String {
            "sampler".to_string()
        }

        fn pod(&self) -> &PodInfo {
            &self.pod
        }

        fn node_name(&self) -> &str {
            "worker-0"
        }

        fn manifest(&self, ts: &TestSettings) -> PodManifest {
            PodManifest::build(ts, &self.pod, "worker-0", true, "default/default", vec![])
        }

        async fn initialize(&mut self, _ctx: &TaskContext) -> Result<(), TaskError> {
            if self.fail_init {
                return Err(TaskError::Setup("no pod".to_string()));
            }
            Ok(())
        }

        fn create_operation(&self, ctx: TaskContext) -> TaskOperation {
            let pod = self.pod.name.clone();
            let this = self.failed_output(&ctx, String::new());
            Box::pin(async move {
                let r = ctx.run_in_pod(ClusterKind::Tenant, &pod, "true").await;
                match (this, r) {
                    (TaskOutput::Plugin(mut o), Ok(r)) => {
                        o.success = r.success();
                        o.msg = None;
                        TaskOutput::Plugin(o)
                    }
                    (o, _) => o,
                }
            })
        }

        fn failed_output(&self, _ctx: &TaskContext, msg: String) -> TaskOutput {
            TaskOutput::Plugin(PluginOutput {
                success: false,
                msg: Some(msg),
                eval_success: false,
                eval_msg: None,
                plugin_metadata: PluginMetadata {
                    plugin_name: "sampler".to_string(),
                    node_name: "worker-0".to_string(),
                    pod_name: self.pod.name.clone(),
                    task_role: TaskRole::Plugin,
                    is_tenant: true,
                },
                command: "true".to_string(),
                result: Default::default(),
            })
        }
    }

    fn sampler(fail_init: bool) -> Task {
        Task::new(Sampler {
            pod: PodInfo {
                name: "tools-pod-worker-0".to_string(),
                pod_type: PodType::Hostbacked,
                is_tenant: true,
                index: 0,
            },
            fail_init,
        })
    }

    fn ctx(participants: usize) -> TaskContext {
        TaskContext::new(
            Arc::new(settings_for(CONFIG, 0)),
            Arc::new(TestSync::new(participants, Duration::from_secs(1))),
            Arc::new(FnExec(|_: ClusterKind, _: &str, _: &str, _: &str| {
                ExecResult::new("", "", 0)
            })),
        )
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let ctx = ctx(1);
        let mut task = sampler(false);
        assert_eq!(task.state(), TaskState::Created);
        task.initialize(&ctx).await;
        assert_eq!(task.state(), TaskState::Initialized);
        assert!(task.manifest().unwrap().contains("tools-pod-worker-0"));
        task.start(ctx.clone());
        assert_eq!(task.state(), TaskState::Running);
        let out = task.join().await.unwrap();
        assert!(out.success());
        assert_eq!(task.state(), TaskState::Finished);
    }

    #[tokio::test]
    async fn test_failed_setup_still_meets_barrier() {
        let ctx = ctx(2);
        let mut ok = sampler(false);
        let mut bad = sampler(true);
        ok.initialize(&ctx).await;
        bad.initialize(&ctx).await;
        assert_eq!(bad.state(), TaskState::Failed);

        ok.start(ctx.clone());
        bad.start(ctx.clone());
        assert!(ok.join().await.unwrap().success());
        let out = bad.join().await.unwrap();
        assert!(!out.success());
        assert_eq!(out.msg(), Some("no pod"));
        assert_eq!(bad.state(), TaskState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_barrier_deadline() {
        // Two participants expected, only one shows up.
        let ctx = ctx(2);
        let mut task = sampler(false);
        task.initialize(&ctx).await;
        task.start(ctx.clone());
        let out = task.join().await.unwrap();
        assert!(!out.success());
        assert!(out.msg().unwrap().contains("duration expired"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_in_pod_after_deadline() {
        let ctx = ctx(1);
        tokio::time::advance(Duration::from_secs(62)).await;
        let err = ctx
            .run_in_pod(ClusterKind::Tenant, "p", "true")
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::DurationExpired));
    }
}
