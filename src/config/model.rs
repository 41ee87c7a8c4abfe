//! The frozen configuration tree.
//!
//! Nodes are only built by [`TestSuiteConfig::parse`]. A child does not point
//! at its parent; it records the parent's index path ([`ConnectionRef`]) and
//! upward lookups go through the root.

use std::path::PathBuf;

use serde::Serialize;
use serde_yaml::Value;

use super::parse::{shell_split, ConfigError, ConfigResult, ParseContext, StrDict};
use crate::plugin::PluginKind;
use crate::testtype::{self, HandlerRef};
use crate::types::{validate_dns_name, PodType, TestCaseType, TestType};

pub const DEFAULT_DURATION_SECS: u64 = 3600;
pub const DEFAULT_NAMESPACE: &str = "default";
pub const DEFAULT_LOGS: &str = "ft-logs";
pub const DEFAULT_NETWORK: &str = "default/default";
pub const DEFAULT_SECONDARY_NETWORK_NAD: &str = "tft-secondary";

/// Index path of a connection within the root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionRef {
    pub tft_idx: usize,
    pub connection_idx: usize,
}

// ---------------------------------------------------------------------------
// Root
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestSuiteConfig {
    pub tft: Vec<TestGroup>,
    pub kubeconfig: Option<String>,
    pub kubeconfig_infra: Option<String>,
}

impl TestSuiteConfig {
    pub fn parse(full_config: &Value) -> ConfigResult<Self> {
        let root = ParseContext::root(full_config);
        let mut varg = root.strdict()?;

        let tft = match varg.pop("tft") {
            None => return Err(varg.error("tft", "mandatory key")),
            Some(v) => v
                .list()?
                .iter()
                .map(TestGroup::parse)
                .collect::<ConfigResult<Vec<_>>>()?,
        };
        if tft.is_empty() {
            return Err(varg.error("tft", "expects a non-empty list"));
        }

        let kubeconfig = varg.pop_nonempty_str("kubeconfig")?;
        let kubeconfig_infra = varg.pop_nonempty_str("kubeconfig_infra")?;
        let yamlpath = varg.yamlpath().to_string();
        varg.finish()?;

        if kubeconfig_infra.is_some() && kubeconfig.is_none() {
            return Err(ConfigError::new(
                &yamlpath,
                Some("kubeconfig"),
                "missing parameter when kubeconfig_infra is given",
            ));
        }

        Ok(Self {
            tft,
            kubeconfig,
            kubeconfig_infra,
        })
    }

    /// Serialize into a YAML value that parses back into an equal tree.
    pub fn serialize(&self) -> Value {
        serde_yaml::to_value(self).unwrap_or(Value::Null)
    }

    pub fn serialize_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn test_group_of(&self, conn: &Connection) -> &TestGroup {
        &self.tft[conn.owner.tft_idx]
    }

    pub fn connection_of(&self, owner: ConnectionRef) -> &Connection {
        &self.tft[owner.tft_idx].connections[owner.connection_idx]
    }
}

// ---------------------------------------------------------------------------
// TestGroup
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestGroup {
    #[serde(skip)]
    pub yamlidx: usize,
    #[serde(skip)]
    pub yamlpath: String,
    pub name: String,
    pub namespace: String,
    pub test_cases: Vec<TestCaseType>,
    pub duration: u64,
    pub privileged_pod: bool,
    pub connections: Vec<Connection>,
    pub logs: PathBuf,
}

impl TestGroup {
    fn parse(pctx: &ParseContext<'_>) -> ConfigResult<Self> {
        let mut varg = pctx.strdict()?;

        let name = varg
            .pop_nonempty_str("name")?
            .unwrap_or_else(|| format!("Test {}", pctx.yamlidx + 1));

        let namespace = varg
            .pop_nonempty_str("namespace")?
            .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());

        let test_cases = match varg.pop("test_cases") {
            None => TestCaseType::all().collect(),
            Some(v) => parse_test_cases(&v)?,
        };

        let duration = match varg.pop_int("duration")? {
            None | Some(0) => DEFAULT_DURATION_SECS,
            Some(d) if d < 0 => {
                return Err(varg.error("duration", "expects a duration in seconds (>= 0)"))
            }
            Some(d) => d as u64,
        };

        let privileged_pod = varg.pop_bool("privileged_pod")?.unwrap_or(false);

        let connections = match varg.pop("connections") {
            None => Vec::new(),
            Some(v) => v
                .list()?
                .iter()
                .map(|c| {
                    let owner = ConnectionRef {
                        tft_idx: pctx.yamlidx,
                        connection_idx: c.yamlidx,
                    };
                    Connection::parse(c, owner, &name, &namespace)
                })
                .collect::<ConfigResult<Vec<_>>>()?,
        };
        if connections.is_empty() {
            return Err(varg.error("connections", "expects a non-empty list"));
        }

        let logs = PathBuf::from(
            varg.pop_nonempty_str("logs")?
                .unwrap_or_else(|| DEFAULT_LOGS.to_string()),
        );

        varg.finish()?;

        Ok(Self {
            yamlidx: pctx.yamlidx,
            yamlpath: pctx.yamlpath.clone(),
            name,
            namespace,
            test_cases,
            duration,
            privileged_pod,
            connections,
            logs,
        })
    }
}

/// `test_cases` is a list of numbers/names/ranges or one comma separated
/// string. Null and the empty string mean all test cases.
fn parse_test_cases(pctx: &ParseContext<'_>) -> ConfigResult<Vec<TestCaseType>> {
    let invalid = || pctx.error("value is not a valid list of test cases");
    match pctx.value {
        Value::String(s) if s.trim().is_empty() => Ok(TestCaseType::all().collect()),
        Value::String(s) => TestCaseType::parse_list(s).map_err(|_| invalid()),
        Value::Number(n) => {
            let n = n.as_u64().ok_or_else(invalid)?;
            TestCaseType::parse_list(&n.to_string()).map_err(|_| invalid())
        }
        Value::Sequence(items) => {
            let mut result = Vec::new();
            for item in items {
                let part = match item {
                    Value::String(s) => s.clone(),
                    Value::Number(n) => n.as_u64().ok_or_else(invalid)?.to_string(),
                    _ => return Err(invalid()),
                };
                result.extend(TestCaseType::parse_list(&part).map_err(|_| invalid())?);
            }
            Ok(result)
        }
        _ => Err(invalid()),
    }
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Connection {
    #[serde(skip)]
    pub yamlidx: usize,
    #[serde(skip)]
    pub yamlpath: String,
    #[serde(skip)]
    pub owner: ConnectionRef,
    pub name: String,
    #[serde(rename = "type")]
    pub test_type: TestType,
    #[serde(skip)]
    pub handler: HandlerRef,
    pub instances: u32,
    pub reverse: bool,
    pub server: Vec<ServerNode>,
    pub client: Vec<ClientNode>,
    pub plugins: Vec<PluginRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secondary_network_nad: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_name: Option<String>,
    /// Copied from the owning test group.
    #[serde(skip)]
    pub namespace: String,
}

impl Connection {
    fn parse(
        pctx: &ParseContext<'_>,
        owner: ConnectionRef,
        test_name: &str,
        namespace: &str,
    ) -> ConfigResult<Self> {
        let mut varg = pctx.strdict()?;

        let name = varg
            .pop_nonempty_str("name")?
            .unwrap_or_else(|| format!("Connection {}/{}", test_name, pctx.yamlidx + 1));

        let test_type = match varg.pop_str("type")? {
            None => TestType::IperfTcp,
            Some(s) => s
                .parse::<TestType>()
                .map_err(|_| varg.error("type", format!("unknown test type {s:?}")))?,
        };
        let handler = testtype::lookup(test_type).ok_or_else(|| {
            varg.error("type", format!("{:?} is not implemented", test_type.name()))
        })?;

        let instances = match varg.pop_int("instances")? {
            None => 1,
            Some(n) => match u32::try_from(n) {
                Ok(n) if n > 0 => n,
                _ => return Err(varg.error("instances", "expects a positive number")),
            },
        };

        let reverse = varg.pop_bool("reverse")?.unwrap_or(false);
        if reverse && !handler.can_run_reverse() {
            return Err(varg.error(
                "reverse",
                format!("not supported with test type {:?}", test_type.name()),
            ));
        }

        let server = parse_node_list(&mut varg, "server", owner, ServerNode::parse)?;
        let client = parse_node_list(&mut varg, "client", owner, ClientNode::parse)?;

        let plugins = match varg.pop("plugins") {
            None => Vec::new(),
            Some(v) => v
                .list()?
                .iter()
                .map(|p| PluginRef::parse(p, owner))
                .collect::<ConfigResult<Vec<_>>>()?,
        };

        let secondary_network_nad = varg.pop_nonempty_str("secondary_network_nad")?;
        let resource_name = varg.pop_nonempty_str("resource_name")?;

        varg.finish()?;

        for s in &server {
            s.spec.validate(test_type)?;
        }
        for c in &client {
            c.spec.validate(test_type)?;
        }

        Ok(Self {
            yamlidx: pctx.yamlidx,
            yamlpath: pctx.yamlpath.clone(),
            owner,
            name,
            test_type,
            handler,
            instances,
            reverse,
            server,
            client,
            plugins,
            secondary_network_nad,
            resource_name,
            namespace: namespace.to_string(),
        })
    }

    /// The secondary network attachment, always namespace qualified.
    pub fn effective_secondary_network_nad(&self) -> String {
        let nad = self
            .secondary_network_nad
            .as_deref()
            .unwrap_or(DEFAULT_SECONDARY_NETWORK_NAD);
        if nad.contains('/') {
            nad.to_string()
        } else {
            format!("{}/{}", self.namespace, nad)
        }
    }
}

/// Parse the `server`/`client` list. The list shape allows several entries,
/// but exactly one is supported for now.
fn parse_node_list<'a, T>(
    varg: &mut StrDict<'a>,
    key: &str,
    owner: ConnectionRef,
    construct: fn(&ParseContext<'a>, ConnectionRef) -> ConfigResult<T>,
) -> ConfigResult<Vec<T>> {
    let items = match varg.pop(key) {
        None => Vec::new(),
        Some(v) => v
            .list()?
            .iter()
            .map(|n| construct(n, owner))
            .collect::<ConfigResult<Vec<_>>>()?,
    };
    match items.len() {
        0 => Err(varg.error(key, format!("expects exactly one {key} entry"))),
        1 => Ok(items),
        _ => Err(varg.error(
            key,
            format!("currently only one {key} entry is supported"),
        )),
    }
}

// ---------------------------------------------------------------------------
// Nodes
// ---------------------------------------------------------------------------

/// Fields shared by server and client entries.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeSpec {
    #[serde(skip)]
    pub yamlidx: usize,
    #[serde(skip)]
    pub yamlpath: String,
    #[serde(skip)]
    pub owner: ConnectionRef,
    pub name: String,
    pub sriov: bool,
    #[serde(skip)]
    pub pod_type: PodType,
    pub default_network: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub privileged_pod: Option<bool>,
    /// Extra arguments for the tool. Their meaning depends on the test type.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,
}

impl NodeSpec {
    fn parse(
        pctx: &ParseContext<'_>,
        varg: &mut StrDict<'_>,
        owner: ConnectionRef,
    ) -> ConfigResult<Self> {
        let name = match varg.pop_str("name")? {
            None => return Err(varg.error("name", "mandatory key")),
            Some(n) if !validate_dns_name(&n) => {
                return Err(varg.error("name", "invalid string"))
            }
            Some(n) => n,
        };

        let sriov = varg.pop_bool("sriov")?.unwrap_or(false);

        let default_network = match varg.pop_any(&["default_network", "default-network"])? {
            None => DEFAULT_NETWORK.to_string(),
            Some((key, v)) => match v.value {
                Value::String(s) if !s.trim().is_empty() => s.clone(),
                _ => return Err(varg.error(&key, "invalid string")),
            },
        };

        let privileged_pod = varg.pop_bool("privileged_pod")?;

        let args = match varg.pop("args") {
            None => None,
            Some(v) => Some(parse_args(&v)?),
        };

        Ok(Self {
            yamlidx: pctx.yamlidx,
            yamlpath: pctx.yamlpath.clone(),
            owner,
            name,
            sriov,
            pod_type: if sriov { PodType::Sriov } else { PodType::Normal },
            default_network,
            privileged_pod,
            args,
        })
    }

    fn validate(&self, test_type: TestType) -> ConfigResult<()> {
        if self.args.is_some() && test_type != TestType::Simple {
            return Err(ConfigError::new(
                &self.yamlpath,
                Some("args"),
                format!("not supported with test type {:?}", test_type.name()),
            ));
        }
        Ok(())
    }
}

fn parse_args(pctx: &ParseContext<'_>) -> ConfigResult<Vec<String>> {
    match pctx.value {
        Value::String(s) => {
            shell_split(s).ok_or_else(|| pctx.error(format!("cannot parse command line {s:?}")))
        }
        Value::Sequence(items) => items
            .iter()
            .map(|i| match i {
                Value::String(s) => Ok(s.clone()),
                _ => Err(pctx.error("expects a list of strings")),
            })
            .collect(),
        _ => Err(pctx.error("expects a string or a list of strings")),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerNode {
    #[serde(flatten)]
    pub spec: NodeSpec,
    /// The server process is started with the pod and outlives the test.
    pub persistent: bool,
}

impl ServerNode {
    fn parse(pctx: &ParseContext<'_>, owner: ConnectionRef) -> ConfigResult<Self> {
        let mut varg = pctx.strdict()?;
        let spec = NodeSpec::parse(pctx, &mut varg, owner)?;
        let persistent = varg.pop_bool("persistent")?.unwrap_or(false);
        varg.finish()?;
        Ok(Self { spec, persistent })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientNode {
    #[serde(flatten)]
    pub spec: NodeSpec,
}

impl ClientNode {
    fn parse(pctx: &ParseContext<'_>, owner: ConnectionRef) -> ConfigResult<Self> {
        let mut varg = pctx.strdict()?;
        let spec = NodeSpec::parse(pctx, &mut varg, owner)?;
        varg.finish()?;
        Ok(Self { spec })
    }
}

// ---------------------------------------------------------------------------
// Plugins
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PluginRef {
    #[serde(skip)]
    pub yamlidx: usize,
    #[serde(skip)]
    pub yamlpath: String,
    #[serde(skip)]
    pub owner: ConnectionRef,
    pub name: String,
    #[serde(skip)]
    pub plugin: PluginKind,
    /// Run on the tenant cluster. See [`crate::types::eval_binary_opt_in`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant: Option<bool>,
    /// Run on the infra cluster (DPU mode only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub infra: Option<bool>,
}

impl PluginRef {
    fn parse(pctx: &ParseContext<'_>, owner: ConnectionRef) -> ConfigResult<Self> {
        let (name, tenant, infra, key) = match pctx.value {
            Value::String(name) => (name.clone(), None, None, None),
            _ => {
                let mut varg = pctx.strdict()?;
                let name = varg
                    .pop_nonempty_str("name")?
                    .ok_or_else(|| varg.error("name", "mandatory key"))?;
                let tenant = varg.pop_bool("tenant")?;
                let infra = varg.pop_bool("infra")?;
                varg.finish()?;
                (name, tenant, infra, Some("name"))
            }
        };

        let plugin = PluginKind::from_name(&name).ok_or_else(|| {
            ConfigError::new(
                &pctx.yamlpath,
                key,
                format!(
                    "unknown plugin {:?} (valid: {:?})",
                    name,
                    PluginKind::valid_names()
                ),
            )
        })?;

        Ok(Self {
            yamlidx: pctx.yamlidx,
            yamlpath: pctx.yamlpath.clone(),
            owner,
            name,
            plugin,
            tenant,
            infra,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG2: &str = r#"
tft:
  - name: "Test 1"
    namespace: "default"
    test_cases:
      - "1"
      - 2
      - HOST_TO_POD_DIFF_NODE
      - HOST_TO_CLUSTER_IP_TO_POD_SAME_NODE - HOST_TO_CLUSTER_IP_TO_HOST_SAME_NODE
    privileged_pod: True
    connections:
     - name: con1
       server:
         - name: worker-0
       client:
         - name: worker-1
       plugins:
         - name: measure_cpu
         - measure_power
     - name: con2
       type: simple
       client:
         - name: client1.example.com
           args: "foo '-x x'"
           privileged_pod: False
           default-network: default--n
       server:
         - name: s1
           args:
             - "hi x"
kubeconfig: /path/to/kubeconfig
kubeconfig_infra: /path/to/kubeconfig_infra
"#;

    fn parse(s: &str) -> ConfigResult<TestSuiteConfig> {
        let v: Value = serde_yaml::from_str(s).unwrap();
        TestSuiteConfig::parse(&v)
    }

    fn assert_round_trip(config: &TestSuiteConfig) {
        let data = config.serialize();
        let config2 = TestSuiteConfig::parse(&data).unwrap();
        assert_eq!(config, &config2);
        assert_eq!(data, config2.serialize());
        assert_eq!(config.serialize_json(), config2.serialize_json());
    }

    #[test]
    fn test_config2() {
        use TestCaseType::*;
        let config = parse(CONFIG2).unwrap();

        assert_eq!(config.kubeconfig.as_deref(), Some("/path/to/kubeconfig"));
        assert_eq!(
            config.kubeconfig_infra.as_deref(),
            Some("/path/to/kubeconfig_infra")
        );

        let group = &config.tft[0];
        assert_eq!(group.yamlpath, ".tft[0]");
        assert_eq!(
            group.test_cases,
            vec![
                PodToPodSameNode,
                PodToPodDiffNode,
                HostToPodDiffNode,
                HostToClusterIpToPodSameNode,
                HostToClusterIpToPodDiffNode,
                HostToClusterIpToHostSameNode,
            ]
        );
        assert!(group.privileged_pod);
        assert_eq!(group.duration, DEFAULT_DURATION_SECS);

        let con1 = &group.connections[0];
        assert_eq!(con1.yamlpath, ".tft[0].connections[0]");
        assert_eq!(con1.test_type, TestType::IperfTcp);
        assert_eq!(con1.plugins[0].name, "measure_cpu");
        assert_eq!(con1.plugins[0].plugin, PluginKind::MeasureCpu);
        assert_eq!(con1.plugins[1].plugin, PluginKind::MeasurePower);
        assert_eq!(con1.plugins[1].yamlpath, ".tft[0].connections[0].plugins[1]");
        assert_eq!(con1.server[0].spec.yamlpath, ".tft[0].connections[0].server[0]");

        let con2 = &group.connections[1];
        assert_eq!(con2.name, "con2");
        assert_eq!(con2.test_type, TestType::Simple);
        let client = &con2.client[0].spec;
        assert_eq!(client.name, "client1.example.com");
        assert_eq!(client.privileged_pod, Some(false));
        assert_eq!(
            client.args.as_deref(),
            Some(&["foo".to_string(), "-x x".to_string()][..])
        );
        assert_eq!(client.default_network, "default--n");
        let server = &con2.server[0];
        assert_eq!(server.spec.args.as_deref(), Some(&["hi x".to_string()][..]));
        assert_eq!(server.spec.privileged_pod, None);
        assert!(!server.persistent);

        assert_eq!(config.test_group_of(con2).name, "Test 1");
        assert_eq!(config.connection_of(client.owner).name, "con2");
        assert_eq!(config.connection_of(con1.plugins[0].owner).name, "con1");

        assert_round_trip(&config);
    }

    #[test]
    fn test_invalid_node_name() {
        let err = parse(&CONFIG2.replace("client1.example.com", "client1.example..com"))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "\".tft[0].connections[1].client[0].name\": invalid string"
        );
    }

    #[test]
    fn test_minimal_config() {
        let config = parse(
            "tft:\n  - connections:\n    - server: [{name: a}]\n      client: [{name: b}]\n",
        )
        .unwrap();
        let group = &config.tft[0];
        assert_eq!(group.name, "Test 1");
        assert_eq!(group.namespace, "default");
        assert_eq!(group.test_cases, TestCaseType::all().collect::<Vec<_>>());
        assert_eq!(group.logs, PathBuf::from("ft-logs"));
        let conn = &group.connections[0];
        assert_eq!(conn.name, "Connection Test 1/1");
        assert_eq!(conn.instances, 1);
        assert!(!conn.reverse);
        assert_eq!(conn.server[0].spec.default_network, "default/default");
        assert_eq!(conn.server[0].spec.pod_type, PodType::Normal);
        assert_eq!(conn.effective_secondary_network_nad(), "default/tft-secondary");
        assert_round_trip(&config);
    }

    #[test]
    fn test_duration() {
        let mk = |d: &str| {
            parse(&format!(
                "tft:\n  - duration: {d}\n    connections:\n    - server: [{{name: a}}]\n      client: [{{name: b}}]\n"
            ))
        };
        assert_eq!(mk("0").unwrap().tft[0].duration, 3600);
        assert_eq!(mk("30").unwrap().tft[0].duration, 30);
        let err = mk("-1").unwrap_err();
        assert_eq!(err.full_path(), ".tft[0].duration");
    }

    #[test]
    fn test_connection_errors() {
        let base = "tft:\n  - connections:\n    - ";
        let cases = [
            (
                "{instances: 4294967297, server: [{name: a}], client: [{name: b}]}",
                ".tft[0].connections[0].instances",
                "expects a positive number",
            ),
            (
                "{type: iperf-udp, reverse: true, server: [{name: a}], client: [{name: b}]}",
                ".tft[0].connections[0].reverse",
                "not supported with test type \"IPERF_UDP\"",
            ),
            (
                "{server: [{name: a}, {name: c}], client: [{name: b}]}",
                ".tft[0].connections[0].server",
                "currently only one server entry is supported",
            ),
            (
                "{server: [{name: a}], client: [{name: b}, {name: c}]}",
                ".tft[0].connections[0].client",
                "currently only one client entry is supported",
            ),
            (
                "{client: [{name: b}]}",
                ".tft[0].connections[0].server",
                "expects exactly one server entry",
            ),
            (
                "{type: http, server: [{name: a}], client: [{name: b}]}",
                ".tft[0].connections[0].type",
                "\"HTTP\" is not implemented",
            ),
            (
                "{type: ftp, server: [{name: a}], client: [{name: b}]}",
                ".tft[0].connections[0].type",
                "unknown test type \"ftp\"",
            ),
            (
                "{instances: 0, server: [{name: a}], client: [{name: b}]}",
                ".tft[0].connections[0].instances",
                "expects a positive number",
            ),
            (
                "{server: [{name: a, args: x}], client: [{name: b}]}",
                ".tft[0].connections[0].server[0].args",
                "not supported with test type \"IPERF_TCP\"",
            ),
            (
                "{type: simple, reverse: true, server: [{name: a}], client: [{name: b}]}",
                ".tft[0].connections[0].reverse",
                "not supported with test type \"SIMPLE\"",
            ),
            (
                "{server: [{name: a}], client: [{name: b}], bogus: 1}",
                ".tft[0].connections[0].bogus",
                "unknown key",
            ),
        ];
        for (conn, path, msg) in cases {
            let err = parse(&format!("{base}{conn}\n")).unwrap_err();
            assert_eq!(err.full_path(), path, "{conn}");
            assert_eq!(err.msg, msg, "{conn}");
        }
    }

    #[test]
    fn test_unknown_plugin() {
        let err = parse(
            "tft:\n  - connections:\n    - server: [{name: a}]\n      client: [{name: b}]\n      plugins: [measure_bogus]\n",
        )
        .unwrap_err();
        assert_eq!(err.full_path(), ".tft[0].connections[0].plugins[0]");
        assert!(err.msg.starts_with("unknown plugin \"measure_bogus\" (valid: ["));
        assert!(err.msg.contains("measure_cpu"));
    }

    #[test]
    fn test_plugin_placement_round_trips() {
        let config = parse(
            "tft:\n  - connections:\n    - server: [{name: a}]\n      client: [{name: b}]\n      plugins: [{name: measure_cpu, infra: true}]\n",
        )
        .unwrap();
        let p = &config.tft[0].connections[0].plugins[0];
        assert_eq!(p.tenant, None);
        assert_eq!(p.infra, Some(true));
        assert_round_trip(&config);
    }

    #[test]
    fn test_kubeconfig_infra_requires_kubeconfig() {
        let err = parse(
            "tft:\n  - connections:\n    - server: [{name: a}]\n      client: [{name: b}]\nkubeconfig_infra: /x\n",
        )
        .unwrap_err();
        assert_eq!(err.full_path(), ".kubeconfig");
    }

    #[test]
    fn test_secondary_network_nad() {
        let config = parse(
            "tft:\n  - namespace: ns1\n    connections:\n    - server: [{name: a}]\n      client: [{name: b}]\n      secondary_network_nad: mynad\n    - server: [{name: a}]\n      client: [{name: b}]\n      secondary_network_nad: other/nad\n",
        )
        .unwrap();
        let conns = &config.tft[0].connections;
        assert_eq!(conns[0].effective_secondary_network_nad(), "ns1/mynad");
        assert_eq!(conns[1].effective_secondary_network_nad(), "other/nad");
    }
}
