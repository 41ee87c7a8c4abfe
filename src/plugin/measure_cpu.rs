//! `measure_cpu`: CPU utilization of the server and client nodes over the
//! test duration, sampled with `mpstat`.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::info;

use super::{Plugin, PluginKind, PluginTaskBase};
use crate::exec::ExecResult;
use crate::manifest::PodManifest;
use crate::output::{PluginMetadata, PluginOutput, PodInfo};
use crate::settings::TestSettings;
use crate::task::{Task, TaskContext, TaskError, TaskKind, TaskOperation, TaskOutput};
use crate::types::TaskRole;

pub struct PluginMeasureCpu;

impl Plugin for PluginMeasureCpu {
    fn kind(&self) -> PluginKind {
        PluginKind::MeasureCpu
    }

    fn enable(&self, ts: &Arc<TestSettings>, tenant: bool) -> Vec<Task> {
        [TaskRole::Server, TaskRole::Client]
            .into_iter()
            .map(|side| {
                Task::new(TaskMeasureCpu {
                    base: PluginTaskBase::new(ts, PluginKind::MeasureCpu, side, tenant),
                })
            })
            .collect()
    }
}

struct TaskMeasureCpu {
    base: PluginTaskBase,
}

impl TaskMeasureCpu {
    fn command(ts: &TestSettings) -> String {
        format!("mpstat -P ALL {} 1", ts.duration)
    }
}

fn plugin_output(
    metadata: PluginMetadata,
    command: String,
    (success, msg, result): (bool, Option<String>, Map<String, Value>),
) -> TaskOutput {
    TaskOutput::Plugin(PluginOutput {
        success,
        msg,
        eval_success: false,
        eval_msg: None,
        plugin_metadata: metadata,
        command,
        result,
    })
}

#[async_trait]
impl TaskKind for TaskMeasureCpu {
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
        let cmd = Self::command(&ctx.settings);
        let cluster = self.cluster();
        let pod = self.base.pod.name.clone();
        let metadata = self.base.metadata();
        Box::pin(async move {
            info!(%pod, %cmd, "measuring cpu");
            let r = ctx.run_in_pod(cluster, &pod, &cmd).await;
            let classified = classify_result(&cmd, r);
            plugin_output(metadata, cmd, classified)
        })
    }

    fn failed_output(&self, ctx: &TaskContext, msg: String) -> TaskOutput {
        let cmd = Self::command(&ctx.settings);
        plugin_output(self.base.metadata(), cmd, (false, Some(msg), Map::new()))
    }

    fn on_success(&self, output: &TaskOutput) {
        if let TaskOutput::Plugin(o) = output {
            info!(
                node = %self.base.node,
                percent_idle = ?o.result.get("percent_idle"),
                "cpu idle"
            );
        }
    }
}

fn classify_result(
    cmd: &str,
    r: Result<ExecResult, TaskError>,
) -> (bool, Option<String>, Map<String, Value>) {
    let r = match r {
        Ok(r) => r,
        Err(e) => return (false, Some(e.to_string()), Map::new()),
    };
    let (success, msg, mut result) = if !r.success() {
        (false, Some(r.debug_msg()), Map::new())
    } else {
        match parse_mpstat(&r.out) {
            Some(map) => (true, None, map),
            None => (
                false,
                Some(format!("Output of {cmd:?} cannot be parsed: {}", r.debug_msg())),
                Map::new(),
            ),
        }
    };
    if let Ok(v) = serde_json::to_value(&r) {
        result.insert("cmd".to_string(), v);
    }
    (success, msg, result)
}

/// The `all` CPU row of `mpstat -P ALL` output, preferring the `Average:`
/// summary. Columns become keys like `percent_idle`. None unless the row has
/// an idle column.
pub fn parse_mpstat(out: &str) -> Option<Map<String, Value>> {
    let mut columns: Option<Vec<String>> = None;
    let mut found = None;
    for line in out.lines() {
        let words: Vec<&str> = line.split_whitespace().collect();
        if let Some(pos) = words.iter().position(|w| *w == "CPU") {
            columns = Some(words[pos + 1..].iter().map(|w| column_key(w)).collect());
            continue;
        }
        let Some(columns) = &columns else {
            continue;
        };
        let Some(pos) = words.iter().position(|w| *w == "all") else {
            continue;
        };
        let values = &words[pos + 1..];
        if values.len() != columns.len() {
            continue;
        }
        let mut row = Map::new();
        row.insert("cpu".to_string(), Value::from("all"));
        let parsed = columns.iter().zip(values).all(|(key, v)| match v.parse::<f64>() {
            Ok(n) => {
                row.insert(key.clone(), Value::from(n));
                true
            }
            Err(_) => false,
        });
        if parsed {
            found = Some(row);
        }
    }
    found.filter(|row| row.contains_key("percent_idle"))
}

fn column_key(column: &str) -> String {
    match column.strip_prefix('%') {
        Some(name) => format!("percent_{}", name.to_lowercase()),
        None => column.to_lowercase(),
    }
}
