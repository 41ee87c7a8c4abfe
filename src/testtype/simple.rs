//! SIMPLE: the TCP echo tool of this crate (`tft simple-echo`) run inside the
//! test pods. Proves connectivity only, so no bitrate is reported.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::info;

use super::{client_port, resolve_server_address, run_server, server_port, TestTypeHandler};
use crate::config::parse::shell_quote;
use crate::exec::ExecResult;
use crate::manifest::PodManifest;
use crate::output::{Bitrate, FlowTestOutput, PodInfo};
use crate::settings::TestSettings;
use crate::task::{ServerOutput, Task, TaskContext, TaskError, TaskKind, TaskOperation, TaskOutput};
use crate::types::{TaskRole, TestType};

/// Binary name of the echo tool inside the tools image.
const ECHO_TOOL: &str = "tft simple-echo";

#[derive(Debug)]
pub struct TestTypeHandlerSimple;

impl TestTypeHandler for TestTypeHandlerSimple {
    fn test_type(&self) -> TestType {
        TestType::Simple
    }

    fn can_run_reverse(&self) -> bool {
        false
    }

    fn create_server_client(&self, ts: &Arc<TestSettings>) -> (Task, Task) {
        let port = server_port(ts);
        let duration = ts.duration;
        let server_pod = ts.server_pod_info("simple");
        let server = SimpleServer {
            pod: server_pod.clone(),
            node: ts.server_node().to_string(),
            persistent: ts.conf_server().persistent,
            privileged: ts.server_privileged(),
            default_network: ts.conf_server().spec.default_network.clone(),
            cmd: echo_command(
                &format!("--server --addr 0.0.0.0 --port {port} --duration {duration}"),
                ts.conf_server().spec.args.as_deref(),
            ),
        };
        let client = SimpleClient {
            pod: ts.client_pod_info("simple"),
            node: ts.client_node().to_string(),
            privileged: ts.client_privileged(),
            default_network: ts.conf_client().spec.default_network.clone(),
            server_pod,
            server_node: ts.server_node().to_string(),
            port: client_port(ts),
            args: ts.conf_client().spec.args.clone(),
            target: None,
        };
        (Task::new(server), Task::new(client))
    }

    fn calculate_gbps(&self, _result: &Value) -> Bitrate {
        Bitrate::NA
    }
}

fn echo_command(options: &str, args: Option<&[String]>) -> String {
    let mut cmd = format!("{ECHO_TOOL} {options}");
    for a in args.unwrap_or_default() {
        cmd.push(' ');
        cmd.push_str(&shell_quote(a));
    }
    cmd
}

struct SimpleServer {
    pod: PodInfo,
    node: String,
    persistent: bool,
    privileged: bool,
    default_network: String,
    cmd: String,
}

#[async_trait]
impl TaskKind for SimpleServer {
    fn role(&self) -> TaskRole {
        TaskRole::Server
    }

    fn log_name(&self) -> String {
        "simple-server".to_string()
    }

    fn pod(&self) -> &PodInfo {
        &self.pod
    }

    fn node_name(&self) -> &str {
        &self.node
    }

    fn manifest(&self, ts: &TestSettings) -> PodManifest {
        let command = if self.persistent {
            vec!["sh".to_string(), "-c".to_string(), self.cmd.clone()]
        } else {
            vec!["sleep".to_string(), "infinity".to_string()]
        };
        PodManifest::build(ts, &self.pod, &self.node, self.privileged, &self.default_network, command)
    }

    fn create_operation(&self, ctx: TaskContext) -> TaskOperation {
        let persistent = self.persistent;
        let cluster = self.cluster();
        let pod = self.pod.name.clone();
        let cmd = self.cmd.clone();
        Box::pin(async move {
            if persistent {
                return TaskOutput::Server(ServerOutput {
                    success: true,
                    msg: Some("Server is persistent.".to_string()),
                    command: cmd,
                    result: None,
                });
            }
            info!(%pod, %cmd, "starting echo server");
            run_server(&ctx, cluster, &pod, &cmd, "pkill -f 'simple-echo --server'").await
        })
    }

    fn failed_output(&self, _ctx: &TaskContext, msg: String) -> TaskOutput {
        TaskOutput::Server(ServerOutput {
            success: false,
            msg: Some(msg),
            command: self.cmd.clone(),
            result: None,
        })
    }
}

struct SimpleClient {
    pod: PodInfo,
    node: String,
    privileged: bool,
    default_network: String,
    server_pod: PodInfo,
    server_node: String,
    port: u16,
    args: Option<Vec<String>>,
    target: Option<String>,
}

#[async_trait]
impl TaskKind for SimpleClient {
    fn role(&self) -> TaskRole {
        TaskRole::Client
    }

    fn log_name(&self) -> String {
        "simple-client".to_string()
    }

    fn pod(&self) -> &PodInfo {
        &self.pod
    }

    fn node_name(&self) -> &str {
        &self.node
    }

    fn manifest(&self, ts: &TestSettings) -> PodManifest {
        let command = vec!["sleep".to_string(), "infinity".to_string()];
        PodManifest::build(ts, &self.pod, &self.node, self.privileged, &self.default_network, command)
    }

    async fn initialize(&mut self, ctx: &TaskContext) -> Result<(), TaskError> {
        self.target = Some(resolve_server_address(ctx, &self.server_pod, &self.server_node).await?);
        Ok(())
    }

    fn create_operation(&self, ctx: TaskContext) -> TaskOperation {
        let ts = ctx.settings.clone();
        let cluster = self.cluster();
        let pod = self.pod.name.clone();
        let target = self.target.clone().unwrap_or_default();
        let cmd = echo_command(
            &format!(
                "--addr {} --port {} --duration {}",
                shell_quote(&target),
                self.port,
                ts.duration
            ),
            self.args.as_deref(),
        );
        let metadata = ts.get_test_metadata(&self.server_pod, &self.pod);
        Box::pin(async move {
            info!(%pod, %cmd, test = %ts.get_test_info(), "running echo client");
            let r = ctx.run_in_pod(cluster, &pod, &cmd).await;
            let (success, msg, result) = classify_client_result(&cmd, r);
            TaskOutput::Flow(FlowTestOutput {
                success,
                msg,
                eval_success: false,
                eval_msg: None,
                tft_metadata: metadata,
                command: cmd,
                result,
                bitrate_gbps: Bitrate::NA,
            })
        })
    }

    fn failed_output(&self, ctx: &TaskContext, msg: String) -> TaskOutput {
        TaskOutput::Flow(FlowTestOutput {
            success: false,
            msg: Some(msg),
            eval_success: false,
            eval_msg: None,
            tft_metadata: ctx.settings.get_test_metadata(&self.server_pod, &self.pod),
            command: String::new(),
            result: Map::new(),
            bitrate_gbps: Bitrate::NA,
        })
    }
}

fn classify_client_result(
    cmd: &str,
    r: Result<ExecResult, TaskError>,
) -> (bool, Option<String>, Map<String, Value>) {
    match r {
        Err(e) => (false, Some(e.to_string()), Map::new()),
        Ok(r) => {
            let success = r.success();
            let msg = (!success).then(|| format!("{cmd:?} {}", r.debug_msg()));
            let result = match serde_json::to_value(&r) {
                Ok(Value::Object(map)) => map,
                _ => Map::new(),
            };
            (success, msg, result)
        }
    }
}
