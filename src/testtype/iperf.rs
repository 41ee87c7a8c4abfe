//! iperf3 TCP/UDP throughput: server and client tasks plus JSON parsing.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, info};

use super::{client_port, resolve_server_address, run_server, server_port, TestTypeHandler};
use crate::exec::ExecResult;
use crate::manifest::PodManifest;
use crate::output::{Bitrate, FlowTestOutput, PodInfo};
use crate::settings::TestSettings;
use crate::task::{ServerOutput, Task, TaskContext, TaskError, TaskKind, TaskOperation, TaskOutput};
use crate::types::{TaskRole, TestType};

/// Parsed iperf3 JSON result (subset of fields we care about).
#[derive(Debug, Deserialize)]
pub struct Iperf3Result {
    pub end: Iperf3End,
}

#[derive(Debug, Deserialize)]
pub struct Iperf3End {
    /// TCP
    #[serde(default)]
    pub sum_sent: Option<Iperf3Sum>,
    #[serde(default)]
    pub sum_received: Option<Iperf3Sum>,
    /// UDP
    #[serde(default)]
    pub sum: Option<Iperf3Sum>,
}

#[derive(Debug, Deserialize)]
pub struct Iperf3Sum {
    pub bits_per_second: f64,
    #[serde(default)]
    pub bytes: Option<u64>,
    #[serde(default)]
    pub jitter_ms: Option<f64>,
    #[serde(default)]
    pub lost_percent: Option<f64>,
}

#[derive(Debug)]
pub struct TestTypeHandlerIperf {
    pub test_type: TestType,
}

impl TestTypeHandlerIperf {
    fn is_udp(&self) -> bool {
        self.test_type == TestType::IperfUdp
    }
}

impl TestTypeHandler for TestTypeHandlerIperf {
    fn test_type(&self) -> TestType {
        self.test_type
    }

    fn can_run_reverse(&self) -> bool {
        self.test_type == TestType::IperfTcp
    }

    fn create_server_client(&self, ts: &Arc<TestSettings>) -> (Task, Task) {
        let port = server_port(ts);
        let server = IperfServer {
            pod: ts.server_pod_info("iperf"),
            node: ts.server_node().to_string(),
            persistent: ts.conf_server().persistent,
            privileged: ts.server_privileged(),
            default_network: ts.conf_server().spec.default_network.clone(),
            cmd: format!("iperf3 -s -p {port} --one-off --json"),
            port,
        };
        let client = IperfClient {
            pod: ts.client_pod_info("iperf"),
            node: ts.client_node().to_string(),
            privileged: ts.client_privileged(),
            default_network: ts.conf_client().spec.default_network.clone(),
            server_pod: server.pod.clone(),
            server_node: server.node.clone(),
            port: client_port(ts),
            udp: self.is_udp(),
            reverse: ts.reverse(),
            target: None,
        };
        (Task::new(server), Task::new(client))
    }

    fn calculate_gbps(&self, result: &Value) -> Bitrate {
        if result.get("error").is_some() {
            return Bitrate::NA;
        }
        let parsed: Iperf3Result = match serde_json::from_value(result.clone()) {
            Ok(r) => r,
            Err(e) => {
                debug!(error = %e, "iperf3 result has unexpected structure");
                return Bitrate::NA;
            }
        };
        let end = parsed.end;
        if self.is_udp() {
            match end.sum {
                Some(sum) => {
                    Bitrate::from_bits_per_second(Some(sum.bits_per_second), Some(sum.bits_per_second))
                }
                None => Bitrate::NA,
            }
        } else {
            match (end.sum_sent, end.sum_received) {
                (Some(sent), Some(received)) => Bitrate::from_bits_per_second(
                    Some(sent.bits_per_second),
                    Some(received.bits_per_second),
                ),
                _ => Bitrate::NA,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

struct IperfServer {
    pod: PodInfo,
    node: String,
    persistent: bool,
    privileged: bool,
    default_network: String,
    cmd: String,
    port: u16,
}

#[async_trait]
impl TaskKind for IperfServer {
    fn role(&self) -> TaskRole {
        TaskRole::Server
    }

    fn log_name(&self) -> String {
        "iperf-server".to_string()
    }

    fn pod(&self) -> &PodInfo {
        &self.pod
    }

    fn node_name(&self) -> &str {
        &self.node
    }

    fn manifest(&self, ts: &TestSettings) -> PodManifest {
        let command = if self.persistent {
            vec!["iperf3".to_string(), "-s".to_string(), "-p".to_string(), self.port.to_string()]
        } else {
            vec!["sleep".to_string(), "infinity".to_string()]
        };
        PodManifest::build(ts, &self.pod, &self.node, self.privileged, &self.default_network, command)
    }

    async fn confirm_ready(&self, ctx: &TaskContext) -> Result<(), TaskError> {
        // The server command was just spawned; give it a moment to listen.
        for _ in 0..20 {
            let r = ctx.run_in_pod(self.cluster(), &self.pod.name, "pgrep -x iperf3").await?;
            if r.success() {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        Err(TaskError::Setup(format!(
            "iperf3 server in pod {} did not come up",
            self.pod.name
        )))
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
            info!(%pod, %cmd, "starting iperf3 server");
            run_server(&ctx, cluster, &pod, &cmd, "killall iperf3").await
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

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

struct IperfClient {
    pod: PodInfo,
    node: String,
    privileged: bool,
    default_network: String,
    server_pod: PodInfo,
    server_node: String,
    port: u16,
    udp: bool,
    reverse: bool,
    target: Option<String>,
}

impl IperfClient {
    fn command(&self, target: &str, duration: u64) -> String {
        let mut cmd = format!("iperf3 -c {target} -p {} --json -t {duration}", self.port);
        if self.udp {
            cmd.push_str(" -u -b 25G");
        }
        if self.reverse {
            cmd.push_str(" -R");
        }
        cmd
    }
}

#[async_trait]
impl TaskKind for IperfClient {
    fn role(&self) -> TaskRole {
        TaskRole::Client
    }

    fn log_name(&self) -> String {
        "iperf-client".to_string()
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
        let target = resolve_server_address(ctx, &self.server_pod, &self.server_node).await?;
        debug!(%target, "resolved iperf3 server address");
        self.target = Some(target);
        Ok(())
    }

    fn create_operation(&self, ctx: TaskContext) -> TaskOperation {
        let ts = ctx.settings.clone();
        let cluster = self.cluster();
        let pod = self.pod.name.clone();
        let target = self.target.clone().unwrap_or_default();
        let cmd = self.command(&target, ts.duration);
        let metadata = ts.get_test_metadata(&self.server_pod, &self.pod);
        let test_type = ts.test_type();
        Box::pin(async move {
            info!(%pod, %cmd, test = %ts.get_test_info(), "running iperf3 client");
            let r = ctx.run_in_pod(cluster, &pod, &cmd).await;
            let (success, msg, result, bitrate_gbps) = classify_client_result(test_type, &cmd, r);
            TaskOutput::Flow(FlowTestOutput {
                success,
                msg,
                eval_success: false,
                eval_msg: None,
                tft_metadata: metadata,
                command: cmd,
                result,
                bitrate_gbps,
            })
        })
    }

    fn failed_output(&self, ctx: &TaskContext, msg: String) -> TaskOutput {
        let ts = &ctx.settings;
        TaskOutput::Flow(FlowTestOutput {
            success: false,
            msg: Some(msg),
            eval_success: false,
            eval_msg: None,
            tft_metadata: ts.get_test_metadata(&self.server_pod, &self.pod),
            command: String::new(),
            result: Map::new(),
            bitrate_gbps: Bitrate::NA,
        })
    }

    fn on_success(&self, output: &TaskOutput) {
        if let TaskOutput::Flow(o) = output {
            info!(
                pod = %self.pod.name,
                tx_gbps = ?o.bitrate_gbps.tx,
                rx_gbps = ?o.bitrate_gbps.rx,
                "iperf3 client finished"
            );
        }
    }
}

/// Turn the outcome of the client command into
/// `(success, msg, result, bitrate)`.
fn classify_client_result(
    test_type: TestType,
    cmd: &str,
    r: Result<ExecResult, TaskError>,
) -> (bool, Option<String>, Map<String, Value>, Bitrate) {
    let r = match r {
        Ok(r) => r,
        Err(e) => return (false, Some(e.to_string()), Map::new(), Bitrate::NA),
    };
    let json: Value = match serde_json::from_str(&r.out) {
        Ok(v) => v,
        Err(e) => {
            return (
                false,
                Some(format!(
                    "Output of {cmd:?} cannot be parsed as JSON: {e} ({})",
                    r.debug_msg()
                )),
                Map::new(),
                Bitrate::NA,
            )
        }
    };
    let bitrate = super::lookup(test_type)
        .map(|h| h.calculate_gbps(&json))
        .unwrap_or(Bitrate::NA);
    let result = match json {
        Value::Object(map) => map,
        _ => {
            return (
                false,
                Some(format!("Output of {cmd:?} contains unexpected data")),
                Map::new(),
                Bitrate::NA,
            )
        }
    };
    if let Some(err) = result.get("error") {
        let err = err.as_str().map(str::to_string).unwrap_or_else(|| err.to_string());
        return (false, Some(format!("iperf3 error: {err}")), result, bitrate);
    }
    if !r.success() {
        return (false, Some(format!("{cmd:?} {}", r.debug_msg())), result, bitrate);
    }
    if bitrate.is_na() {
        return (
            false,
            Some(format!("Output of {cmd:?} contains unexpected data")),
            result,
            bitrate,
        );
    }
    (true, None, result, bitrate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tcp_output(sent_bps: f64, received_bps: f64) -> Value {
        json!({
            "start": {"test_start": {"protocol": "TCP", "num_streams": 1, "duration": 10}},
            "end": {
                "sum_sent": {"bits_per_second": sent_bps, "bytes": 1000},
                "sum_received": {"bits_per_second": received_bps, "bytes": 990},
            }
        })
    }

    const TCP: TestTypeHandlerIperf = TestTypeHandlerIperf {
        test_type: TestType::IperfTcp,
    };
    const UDP: TestTypeHandlerIperf = TestTypeHandlerIperf {
        test_type: TestType::IperfUdp,
    };

    #[test]
    fn test_calculate_gbps_tcp() {
        let b = TCP.calculate_gbps(&tcp_output(9_412_345_678.0, 9_398_765_432.1));
        assert_eq!(b.tx, Some(9.4123));
        assert_eq!(b.rx, Some(9.3988));
    }

    #[test]
    fn test_calculate_gbps_udp() {
        let out = json!({"end": {"sum": {"bits_per_second": 1_234_567_890.0, "jitter_ms": 0.01, "lost_percent": 0.0}}});
        let b = UDP.calculate_gbps(&out);
        assert_eq!(b.tx, Some(1.2346));
        assert_eq!(b.rx, Some(1.2346));
        // TCP fields do not count for UDP.
        assert!(UDP.calculate_gbps(&tcp_output(1e9, 1e9)).is_na());
    }

    #[test]
    fn test_calculate_gbps_na() {
        assert!(TCP.calculate_gbps(&json!({"error": "unable to connect"})).is_na());
        assert!(TCP.calculate_gbps(&json!({"end": {}})).is_na());
        assert!(TCP.calculate_gbps(&json!({"end": {"sum_sent": {"bits_per_second": "x"}}})).is_na());
        assert!(TCP.calculate_gbps(&json!([1, 2])).is_na());
    }

    #[test]
    fn test_client_command() {
        let mut c = IperfClient {
            pod: PodInfo {
                name: "iperf-client-0".into(),
                pod_type: crate::types::PodType::Normal,
                is_tenant: true,
                index: 0,
            },
            node: "worker-1".into(),
            privileged: false,
            default_network: "default/default".into(),
            server_pod: PodInfo {
                name: "iperf-server-0".into(),
                pod_type: crate::types::PodType::Normal,
                is_tenant: true,
                index: 0,
            },
            server_node: "worker-0".into(),
            port: 5201,
            udp: false,
            reverse: false,
            target: None,
        };
        assert_eq!(
            c.command("10.0.0.1", 30),
            "iperf3 -c 10.0.0.1 -p 5201 --json -t 30"
        );
        c.udp = true;
        c.reverse = true;
        assert_eq!(
            c.command("10.0.0.1", 30),
            "iperf3 -c 10.0.0.1 -p 5201 --json -t 30 -u -b 25G -R"
        );
    }

    #[test]
    fn test_classify_client_result() {
        let ok = ExecResult::new(tcp_output(1e10, 9e9).to_string(), "", 0);
        let (success, msg, result, b) = classify_client_result(TestType::IperfTcp, "iperf3 -c x", Ok(ok));
        assert!(success);
        assert_eq!(msg, None);
        assert!(result.contains_key("end"));
        assert_eq!(b.tx, Some(10.0));
        assert_eq!(b.rx, Some(9.0));

        let garbage = ExecResult::new("not json", "", 0);
        let (success, msg, _, b) = classify_client_result(TestType::IperfTcp, "iperf3 -c x", Ok(garbage));
        assert!(!success);
        assert!(msg.unwrap().contains("cannot be parsed"));
        assert!(b.is_na());

        let err = ExecResult::new(r#"{"error": "unable to connect to server"}"#, "", 1);
        let (success, msg, result, b) = classify_client_result(TestType::IperfTcp, "iperf3 -c x", Ok(err));
        assert!(!success);
        assert_eq!(msg.as_deref(), Some("iperf3 error: unable to connect to server"));
        assert!(result.contains_key("error"));
        assert!(b.is_na());

        let (success, msg, _, _) =
            classify_client_result(TestType::IperfTcp, "iperf3 -c x", Err(TaskError::DurationExpired));
        assert!(!success);
        assert_eq!(msg.as_deref(), Some("duration expired"));
    }

    #[test]
    fn test_classify_client_result_without_bitrate() {
        let cmd = "iperf3 -c x";
        for out in [r#"{"start": {}}"#, r#"{"end": {}}"#] {
            let r = ExecResult::new(out, "", 0);
            let (success, msg, result, b) = classify_client_result(TestType::IperfTcp, cmd, Ok(r));
            assert!(!success, "{out}");
            assert_eq!(
                msg.as_deref(),
                Some("Output of \"iperf3 -c x\" contains unexpected data")
            );
            assert!(!result.is_empty());
            assert!(b.is_na());
        }

        // TCP sums do not make a UDP result.
        let r = ExecResult::new(tcp_output(1e9, 1e9).to_string(), "", 0);
        let (success, _, _, b) = classify_client_result(TestType::IperfUdp, cmd, Ok(r));
        assert!(!success);
        assert!(b.is_na());
    }

    #[test]
    fn test_reverse_only_for_tcp() {
        assert!(TCP.can_run_reverse());
        assert!(!UDP.can_run_reverse());
    }
}
