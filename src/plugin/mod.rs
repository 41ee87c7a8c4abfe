//! Measurement plugins that run next to a flow test.
//!
//! A plugin contributes ordinary [`Task`]s: one for the server side and one
//! for the client side, per selected cluster. Plugins are looked up from a
//! static table keyed by [`PluginKind`].

pub mod measure_cpu;
pub mod measure_power;

use std::fmt;
use std::sync::Arc;

use crate::config::PluginRef;
use crate::manifest::PodManifest;
use crate::output::{PluginMetadata, PodInfo};
use crate::settings::TestSettings;
use crate::task::Task;
use crate::types::{eval_binary_opt_in, ClusterMode, TaskRole};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginKind {
    MeasureCpu,
    MeasurePower,
}

impl PluginKind {
    pub const ALL: [PluginKind; 2] = [PluginKind::MeasureCpu, PluginKind::MeasurePower];

    pub fn name(self) -> &'static str {
        match self {
            PluginKind::MeasureCpu => "measure_cpu",
            PluginKind::MeasurePower => "measure_power",
        }
    }

    pub fn from_name(name: &str) -> Option<PluginKind> {
        Self::ALL.into_iter().find(|p| p.name() == name)
    }

    pub fn valid_names() -> Vec<&'static str> {
        Self::ALL.iter().map(|p| p.name()).collect()
    }

    pub fn plugin(self) -> &'static dyn Plugin {
        match self {
            PluginKind::MeasureCpu => &measure_cpu::PluginMeasureCpu,
            PluginKind::MeasurePower => &measure_power::PluginMeasurePower,
        }
    }
}

impl fmt::Display for PluginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub trait Plugin: Send + Sync {
    fn kind(&self) -> PluginKind;

    /// Tasks for one cluster: server side first, then client side.
    fn enable(&self, ts: &Arc<TestSettings>, tenant: bool) -> Vec<Task>;
}

/// All tasks of a configured plugin. The infra cluster only exists in DPU
/// mode.
pub fn plugin_tasks(ts: &Arc<TestSettings>, plugin_ref: &PluginRef) -> Vec<Task> {
    let (tenant, infra) = eval_binary_opt_in(plugin_ref.tenant, plugin_ref.infra);
    let plugin = plugin_ref.plugin.plugin();
    let mut tasks = Vec::new();
    if tenant {
        tasks.extend(plugin.enable(ts, true));
    }
    if infra && ts.cluster_mode == ClusterMode::Dpu {
        tasks.extend(plugin.enable(ts, false));
    }
    tasks
}

/// What every plugin task knows about itself.
#[derive(Debug, Clone)]
pub(crate) struct PluginTaskBase {
    pub kind: PluginKind,
    /// The flow side the task measures.
    pub side: TaskRole,
    pub node: String,
    pub pod: PodInfo,
}

impl PluginTaskBase {
    pub fn new(ts: &TestSettings, kind: PluginKind, side: TaskRole, tenant: bool) -> Self {
        let node = match side {
            TaskRole::Client => ts.client_node(),
            _ => ts.server_node(),
        }
        .to_string();
        let pod = ts.plugin_pod_info(&node, kind.name(), tenant);
        Self {
            kind,
            side,
            node,
            pod,
        }
    }

    pub fn log_name(&self) -> String {
        format!("{}-{}", self.kind, self.side)
    }

    pub fn metadata(&self) -> PluginMetadata {
        PluginMetadata {
            plugin_name: self.kind.name().to_string(),
            node_name: self.node.clone(),
            pod_name: self.pod.name.clone(),
            task_role: self.side,
            is_tenant: self.pod.is_tenant,
        }
    }

    /// Host-backed privileged tools pod idling until commands are exec'd.
    pub fn manifest(&self, ts: &TestSettings) -> PodManifest {
        PodManifest::build(
            ts,
            &self.pod,
            &self.node,
            true,
            crate::config::model::DEFAULT_NETWORK,
            vec!["sleep".to_string(), "infinity".to_string()],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::test_config_from_str;
    use crate::config::ConfigDescriptor;
    use crate::types::TaskRole;

    const CONFIG: &str = r#"
tft:
  - name: t1
    duration: 5
    test_cases: [2]
    connections:
      - name: c1
        server: [{name: worker-0}]
        client: [{name: worker-1}]
        plugins:
          - measure_cpu
          - {name: measure_power, infra: true}
"#;

    fn settings(mode: ClusterMode) -> Arc<TestSettings> {
        let tc = Arc::new(test_config_from_str(CONFIG));
        let d = ConfigDescriptor::with_indices(tc, 0, 0, 0).unwrap();
        Arc::new(TestSettings::new(d, 0, mode).unwrap())
    }

    #[test]
    fn test_registry() {
        assert_eq!(PluginKind::valid_names(), vec!["measure_cpu", "measure_power"]);
        assert_eq!(PluginKind::from_name("measure_cpu"), Some(PluginKind::MeasureCpu));
        assert_eq!(PluginKind::from_name("measure_gpu"), None);
        for kind in PluginKind::ALL {
            assert_eq!(kind.plugin().kind(), kind);
        }
    }

    #[test]
    fn test_plugin_tasks_per_cluster() {
        let ts = settings(ClusterMode::Single);
        let plugins = &ts.connection.plugins;

        let cpu = plugin_tasks(&ts, &plugins[0]);
        assert_eq!(cpu.len(), 2);
        assert_eq!(cpu[0].pod().name, "tools-pod-worker-0-measure-cpu");
        assert_eq!(cpu[1].pod().name, "tools-pod-worker-1-measure-cpu");
        assert!(cpu.iter().all(|t| t.role() == TaskRole::Plugin && t.waits_at_barrier()));

        // infra only, and there is no infra cluster.
        assert!(plugin_tasks(&ts, &plugins[1]).is_empty());

        let ts = settings(ClusterMode::Dpu);
        let power = plugin_tasks(&ts, &ts.connection.plugins[1]);
        assert_eq!(power.len(), 2);
        assert!(power.iter().all(|t| !t.pod().is_tenant));
    }

    #[test]
    fn test_metadata() {
        let ts = settings(ClusterMode::Single);
        let base = PluginTaskBase::new(&ts, PluginKind::MeasurePower, TaskRole::Client, true);
        let md = base.metadata();
        assert_eq!(md.plugin_name, "measure_power");
        assert_eq!(md.node_name, "worker-1");
        assert_eq!(md.pod_name, "tools-pod-worker-1-measure-power");
        assert_eq!(md.task_role, TaskRole::Client);
        assert_eq!(base.log_name(), "measure_power-client");
        assert!(base.manifest(&ts).spec.host_network);
    }
}
