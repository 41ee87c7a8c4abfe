//! `measure_power`: polls the node's BMC for the instantaneous power draw
//! until the client finished and reports the average.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, info};

use super::{Plugin, PluginKind, PluginTaskBase};
use crate::exec::ExecResult;
use crate::manifest::PodManifest;
use crate::output::{PluginOutput, PodInfo};
use crate::settings::TestSettings;
use crate::task::{Task, TaskContext, TaskError, TaskKind, TaskOperation, TaskOutput};
use crate::types::TaskRole;

const CMD: &str = "ipmitool dcmi power reading";

/// Pause between two readings.
pub const POLL_INTERVAL: Duration = Duration::from_millis(200);

pub struct PluginMeasurePower;

impl Plugin for PluginMeasurePower {
    fn kind(&self) -> PluginKind {
        PluginKind::MeasurePower
    }

    fn enable(&self, ts: &Arc<TestSettings>, tenant: bool) -> Vec<Task> {
        [TaskRole::Server, TaskRole::Client]
            .into_iter()
            .map(|side| {
                Task::new(TaskMeasurePower {
                    base: PluginTaskBase::new(ts, PluginKind::MeasurePower, side, tenant),
                })
            })
            .collect()
    }
}

struct TaskMeasurePower {
    base: PluginTaskBase,
}

#[async_trait]
impl TaskKind for TaskMeasurePower {
    fn role(&self) -> TaskRole {
        TaskRole::Plugin
    }

    fn log_name(&self) -> String {
        self.base.log_name()
    }

    fn pod(&self) -> &PodInfo {
        &self.base.pod
    }

    fn node_name(&self) -> &str {
        &self.base.node
    }

    fn manifest(&self, ts: &TestSettings) -> PodManifest {
        self.base.manifest(ts)
    }

    fn create_operation(&self, ctx: TaskContext) -> TaskOperation {
        let cluster = self.cluster();
        let pod = self.base.pod.name.clone();
        let metadata = self.base.metadata();
        Box::pin(async move {
            let mut readings = Readings::default();
            while !ctx.sync.client_finished.is_set() {
                let r = ctx.run_in_pod(cluster, &pod, CMD).await;
                if matches!(r, Err(TaskError::DurationExpired)) {
                    readings.fail("duration expired", None);
                    break;
                }
                readings.record(r);
                tokio::select! {
                    _ = tokio::time::sleep(POLL_INTERVAL) => {}
                    _ = ctx.sync.client_finished.wait() => {}
                }
            }
            debug!(%pod, iterations = readings.iterations, "power polling done");
            let (success, msg, result) = readings.finish();
            TaskOutput::Plugin(PluginOutput {
                success,
                msg,
                eval_success: false,
                eval_msg: None,
                plugin_metadata: metadata,
                command: CMD.to_string(),
                result,
            })
        })
    }

    fn failed_output(&self, _ctx: &TaskContext, msg: String) -> TaskOutput {
        TaskOutput::Plugin(PluginOutput {
            success: false,
            msg: Some(msg),
            eval_success: false,
            eval_msg: None,
            plugin_metadata: self.base.metadata(),
            command: CMD.to_string(),
            result: Map::new(),
        })
    }

    fn on_success(&self, output: &TaskOutput) {
        if let TaskOutput::Plugin(o) = output {
            info!(
                node = %self.base.node,
                watts = ?o.result.get("measure_power"),
                "average power"
            );
        }
    }
}

/// Accumulated state of the polling loop. Only the first failure is kept.
#[derive(Debug, Default)]
struct Readings {
    total_watts: u64,
    count: u64,
    iterations: u64,
    msg: Option<String>,
    failed_cmd: Option<Value>,
}

impl Readings {
    fn record(&mut self, r: Result<ExecResult, TaskError>) {
        self.iterations += 1;
        match r {
            Err(e) => self.fail(&e.to_string(), None),
            Ok(r) if !r.success() => self.fail("Failed running ipmitool command", Some(&r)),
            Ok(r) => match extract_power(&r.out) {
                Some(watts) => {
                    self.total_watts += watts;
                    self.count += 1;
                }
                None => self.fail("Failed to parse ipmitool output", Some(&r)),
            },
        }
    }

    fn fail(&mut self, msg: &str, r: Option<&ExecResult>) {
        if self.msg.is_some() {
            return;
        }
        self.msg = Some(msg.to_string());
        self.failed_cmd = r.and_then(|r| serde_json::to_value(r).ok());
    }

    fn finish(self) -> (bool, Option<String>, Map<String, Value>) {
        let mut result = Map::new();
        if let Some(v) = self.failed_cmd {
            result.insert("failed_cmd".to_string(), v);
        }
        let mut msg = self.msg;
        if self.count > 0 {
            let avg = self.total_watts as f64 / self.count as f64;
            result.insert("measure_power".to_string(), Value::from(avg));
        } else if msg.is_none() {
            msg = Some("no power reading taken".to_string());
        }
        (msg.is_none(), msg, result)
    }
}

/// Watts from a line like `Instantaneous power reading:   215 Watts`.
pub fn extract_power(out: &str) -> Option<u64> {
    out.lines().find_map(|line| {
        let rest = line.trim().strip_prefix("Instantaneous power reading:")?;
        let mut words = rest.split_whitespace();
        let watts = words.next()?.parse().ok()?;
        match (words.next(), words.next()) {
            (Some("Watts"), None) => Some(watts),
            _ => None,
        }
    })
}
