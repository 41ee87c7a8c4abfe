//! Protocol handlers, looked up by [`TestType`] from a static table.

pub mod iperf;
pub mod simple;

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::warn;

use crate::exec::{ClusterKind, ExecResult};
use crate::output::{Bitrate, PodInfo};
use crate::settings::TestSettings;
use crate::task::{ServerOutput, Task, TaskContext, TaskError, TaskOutput};
use crate::types::{ConnectionMode, TestType};

/// Servers listen on `BASE_PORT + connection index`.
pub const BASE_PORT: u16 = 5201;
/// Node ports are allocated from `NODE_PORT_BASE + connection index`.
pub const NODE_PORT_BASE: u16 = 30000;

/// Builds the server/client pair for one test instance and interprets the
/// client's raw result.
pub trait TestTypeHandler: Send + Sync {
    fn test_type(&self) -> TestType;

    /// Whether `reverse: true` is accepted for this protocol.
    fn can_run_reverse(&self) -> bool;

    fn create_server_client(&self, ts: &Arc<TestSettings>) -> (Task, Task);

    /// Throughput from the tool's JSON output. NA when the output carries an
    /// error or is not shaped as expected.
    fn calculate_gbps(&self, result: &Value) -> Bitrate;
}

static HANDLER_IPERF_TCP: iperf::TestTypeHandlerIperf = iperf::TestTypeHandlerIperf {
    test_type: TestType::IperfTcp,
};
static HANDLER_IPERF_UDP: iperf::TestTypeHandlerIperf = iperf::TestTypeHandlerIperf {
    test_type: TestType::IperfUdp,
};
static HANDLER_SIMPLE: simple::TestTypeHandlerSimple = simple::TestTypeHandlerSimple;

static HANDLERS: [&(dyn TestTypeHandler); 3] =
    [&HANDLER_IPERF_TCP, &HANDLER_IPERF_UDP, &HANDLER_SIMPLE];

/// Handler for `test_type`, if the protocol is implemented.
pub fn lookup(test_type: TestType) -> Option<HandlerRef> {
    HANDLERS
        .iter()
        .find(|h| h.test_type() == test_type)
        .map(|h| HandlerRef(*h))
}

/// Test types with a handler.
pub fn implemented() -> impl Iterator<Item = TestType> {
    HANDLERS.iter().map(|h| h.test_type())
}

/// How long a non persistent server may outlive its client before it is
/// stopped.
const SERVER_LINGER: Duration = Duration::from_secs(10);

/// Run a one-shot server command. When the client finished and the server
/// has not exited after [`SERVER_LINGER`], `stop_cmd` kills it.
pub(crate) async fn run_server(
    ctx: &TaskContext,
    cluster: ClusterKind,
    pod: &str,
    cmd: &str,
    stop_cmd: &str,
) -> TaskOutput {
    let linger = async {
        ctx.sync.client_finished.wait().await;
        tokio::time::sleep(SERVER_LINGER).await;
    };
    tokio::select! {
        r = ctx.run_in_pod(cluster, pod, cmd) => server_output(cmd, r),
        _ = linger => {
            warn!(%pod, "server still running after the client finished, stopping it");
            let mut msg = "server did not exit after the client finished".to_string();
            match ctx.run_in_pod(cluster, pod, stop_cmd).await {
                Ok(r) if r.success() => {}
                Ok(r) => {
                    warn!(
                        %pod,
                        cmd = stop_cmd,
                        detail = %r.debug_msg(),
                        "stopping the server failed"
                    );
                    msg.push_str(&format!(" and {stop_cmd:?} failed"));
                }
                Err(e) => {
                    warn!(%pod, cmd = stop_cmd, error = %e, "stopping the server failed");
                    msg.push_str(&format!(" and {stop_cmd:?} failed: {e}"));
                }
            }
            TaskOutput::Server(ServerOutput {
                success: false,
                msg: Some(msg),
                command: cmd.to_string(),
                result: None,
            })
        }
    }
}

fn server_output(cmd: &str, r: Result<ExecResult, TaskError>) -> TaskOutput {
    let (success, msg, result) = match r {
        Err(e) => (false, Some(e.to_string()), None),
        Ok(r) if !r.success() => (false, Some(format!("{cmd:?} {}", r.debug_msg())), Some(r)),
        Ok(r) => (true, None, Some(r)),
    };
    TaskOutput::Server(ServerOutput {
        success,
        msg,
        command: cmd.to_string(),
        result,
    })
}

/// Port the server listens on.
pub fn server_port(ts: &TestSettings) -> u16 {
    BASE_PORT.saturating_add(port_offset(ts))
}

/// Port the client connects to. Differs from [`server_port`] for node port
/// test cases.
pub fn client_port(ts: &TestSettings) -> u16 {
    match ts.connection_mode() {
        ConnectionMode::NodePortIp => NODE_PORT_BASE.saturating_add(port_offset(ts)),
        _ => server_port(ts),
    }
}

fn port_offset(ts: &TestSettings) -> u16 {
    u16::try_from(ts.connection.yamlidx).unwrap_or(u16::MAX)
}

/// Address the client uses to reach the server, per connection mode.
pub async fn resolve_server_address(
    ctx: &TaskContext,
    server_pod: &PodInfo,
    server_node: &str,
) -> Result<String, TaskError> {
    let ts = &ctx.settings;
    let cluster = ClusterKind::from_tenant(server_pod.is_tenant);
    let (cmd, parse): (&str, fn(&str) -> Option<String>) = match ts.connection_mode() {
        ConnectionMode::PodIp => ("hostname -I", first_address),
        ConnectionMode::MultiNetwork => ("ip -o -4 addr show dev net1", inet_address),
        ConnectionMode::ClusterIp => {
            return Ok(format!(
                "{}-svc.{}.svc.cluster.local",
                server_pod.name, ts.namespace
            ))
        }
        ConnectionMode::NodePortIp | ConnectionMode::ExternalIp => {
            return Ok(server_node.to_string())
        }
    };
    let r = ctx.run_in_pod(cluster, &server_pod.name, cmd).await?;
    if !r.success() {
        return Err(TaskError::Setup(format!(
            "cannot get address of pod {}: {:?} {}",
            server_pod.name,
            cmd,
            r.debug_msg()
        )));
    }
    parse(&r.out).ok_or_else(|| {
        TaskError::Setup(format!(
            "cannot get address of pod {}: unexpected output {:?}",
            server_pod.name, r.out
        ))
    })
}

fn first_address(out: &str) -> Option<String> {
    out.split_whitespace().next().map(str::to_string)
}

/// Address from `ip -o -4 addr show` output (`... inet 10.1.2.3/24 ...`).
fn inet_address(out: &str) -> Option<String> {
    let mut words = out.split_whitespace();
    while let Some(w) = words.next() {
        if w == "inet" {
            let addr = words.next()?;
            let addr = addr.split('/').next()?;
            return (!addr.is_empty()).then(|| addr.to_string());
        }
    }
    None
}

/// A registered handler. Compares by test type.
#[derive(Clone, Copy)]
pub struct HandlerRef(&'static dyn TestTypeHandler);

impl Deref for HandlerRef {
    type Target = dyn TestTypeHandler;

    fn deref(&self) -> &Self::Target {
        self.0
    }
}

impl fmt::Debug for HandlerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("HandlerRef").field(&self.0.test_type()).finish()
    }
}

impl PartialEq for HandlerRef {
    fn eq(&self, other: &Self) -> bool {
        self.0.test_type() == other.0.test_type()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry() {
        let implemented: Vec<_> = implemented().collect();
        assert_eq!(
            implemented,
            vec![TestType::IperfTcp, TestType::IperfUdp, TestType::Simple]
        );
        for t in TestType::ALL {
            match lookup(t) {
                Some(h) => assert_eq!(h.test_type(), t),
                None => assert!(!implemented.contains(&t)),
            }
        }
        assert!(lookup(TestType::IperfTcp).unwrap().can_run_reverse());
        assert!(!lookup(TestType::IperfUdp).unwrap().can_run_reverse());
        assert!(!lookup(TestType::Simple).unwrap().can_run_reverse());
    }

    #[test]
    fn test_address_parsing() {
        assert_eq!(first_address("10.128.0.5 fd00::5 \n").as_deref(), Some("10.128.0.5"));
        assert_eq!(first_address("  \n"), None);
        let ip = "4: net1    inet 192.168.100.7/24 brd 192.168.100.255 scope global net1\\       valid_lft forever";
        assert_eq!(inet_address(ip).as_deref(), Some("192.168.100.7"));
        assert_eq!(inet_address("4: net1 inet6 fe80::1/64"), None);
    }

    /// Server command never returns, the stop command fails.
    struct StuckServer;

    #[async_trait::async_trait]
    impl crate::exec::RemoteExec for StuckServer {
        async fn run(
            &self,
            _cluster: ClusterKind,
            _namespace: &str,
            _pod: &str,
            cmd: &str,
        ) -> Result<ExecResult, crate::exec::ExecError> {
            if cmd.starts_with("iperf3 -s") {
                std::future::pending::<()>().await;
            }
            Ok(ExecResult::new("", "no process found", 1))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_server_reports_failed_stop() {
        use crate::settings::tests::{settings_for, CONFIG};
        use crate::task::TestSync;

        let ctx = TaskContext::new(
            Arc::new(settings_for(CONFIG, 0)),
            Arc::new(TestSync::new(1, Duration::from_secs(5))),
            Arc::new(StuckServer),
        );
        ctx.sync.client_finished.set();
        let out = run_server(
            &ctx,
            ClusterKind::Tenant,
            "iperf-server-0",
            "iperf3 -s -p 5201",
            "killall iperf3",
        )
        .await;
        assert!(!out.success());
        assert_eq!(
            out.msg(),
            Some("server did not exit after the client finished and \"killall iperf3\" failed")
        );
    }

    #[test]
    fn test_ports() {
        use crate::settings::tests::{settings_for, CONFIG};
        let ts = settings_for(CONFIG, 0);
        assert_eq!(server_port(&ts), 5201);
        assert_eq!(client_port(&ts), 5201);
    }
}
