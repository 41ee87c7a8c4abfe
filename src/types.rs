//! Shared enums and lookup tables: test types, test cases, pod kinds, task roles.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A string could not be converted into one of the enums of this module.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot convert {value:?} to {kind}")]
pub struct EnumParseError {
    pub kind: &'static str,
    pub value: String,
}

impl EnumParseError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// TestType
// ---------------------------------------------------------------------------

/// The protocol / tool a connection exercises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TestType {
    IperfTcp,
    IperfUdp,
    Http,
    NetperfTcpStream,
    NetperfTcpRr,
    Simple,
}

impl TestType {
    pub const ALL: [TestType; 6] = [
        TestType::IperfTcp,
        TestType::IperfUdp,
        TestType::Http,
        TestType::NetperfTcpStream,
        TestType::NetperfTcpRr,
        TestType::Simple,
    ];

    pub fn name(self) -> &'static str {
        match self {
            TestType::IperfTcp => "IPERF_TCP",
            TestType::IperfUdp => "IPERF_UDP",
            TestType::Http => "HTTP",
            TestType::NetperfTcpStream => "NETPERF_TCP_STREAM",
            TestType::NetperfTcpRr => "NETPERF_TCP_RR",
            TestType::Simple => "SIMPLE",
        }
    }
}

impl FromStr for TestType {
    type Err = EnumParseError;

    /// Accepts `iperf-tcp`, `IPERF_TCP`, ` http ` and similar spellings.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        TestType::ALL
            .into_iter()
            .find(|t| t.name() == normalized)
            .ok_or_else(|| EnumParseError::new("TestType", s))
    }
}

impl fmt::Display for TestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// ConnectionMode / PodType / ClusterMode / TaskRole
// ---------------------------------------------------------------------------

/// How the client addresses the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionMode {
    PodIp,
    ClusterIp,
    NodePortIp,
    ExternalIp,
    MultiNetwork,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PodType {
    Normal,
    Sriov,
    Hostbacked,
}

/// SINGLE is one cluster; DPU has a separate infra cluster next to the tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClusterMode {
    Single,
    Dpu,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskRole {
    Server,
    Client,
    Plugin,
}

impl fmt::Display for TaskRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskRole::Server => f.write_str("server"),
            TaskRole::Client => f.write_str("client"),
            TaskRole::Plugin => f.write_str("plugin"),
        }
    }
}

// ---------------------------------------------------------------------------
// TestCaseType
// ---------------------------------------------------------------------------

/// Topology variants. Numbers 11-14 and 26 are retired and must not be reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TestCaseType {
    PodToPodSameNode = 1,
    PodToPodDiffNode = 2,
    PodToHostSameNode = 3,
    PodToHostDiffNode = 4,
    PodToClusterIpToPodSameNode = 5,
    PodToClusterIpToPodDiffNode = 6,
    PodToClusterIpToHostSameNode = 7,
    PodToClusterIpToHostDiffNode = 8,
    PodToNodePortToPodSameNode = 9,
    PodToNodePortToPodDiffNode = 10,
    HostToPodSameNode = 15,
    HostToPodDiffNode = 16,
    HostToClusterIpToPodSameNode = 17,
    HostToClusterIpToPodDiffNode = 18,
    HostToClusterIpToHostSameNode = 19,
    HostToClusterIpToHostDiffNode = 20,
    HostToNodePortToPodSameNode = 21,
    HostToNodePortToPodDiffNode = 22,
    HostToNodePortToHostSameNode = 23,
    HostToNodePortToHostDiffNode = 24,
    PodToExternal = 25,
    #[serde(rename = "POD_TO_POD_2ND_INTERFACE_SAME_NODE")]
    PodToPod2ndInterfaceSameNode = 27,
    #[serde(rename = "POD_TO_POD_2ND_INTERFACE_DIFF_NODE")]
    PodToPod2ndInterfaceDiffNode = 28,
    PodToPodMultiNetworkPolicy = 29,
}

/// Topology facts for one [`TestCaseType`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TestCaseTypeInfo {
    pub test_case_type: TestCaseType,
    pub connection_mode: ConnectionMode,
    pub is_same_node: bool,
    pub is_server_hostbacked: bool,
    pub is_client_hostbacked: bool,
    /// Set for entries that duplicate the topology of another entry. Only
    /// kept so that existing configurations keep working.
    pub deprecated_alias_of: Option<TestCaseType>,
}

impl TestCaseTypeInfo {
    /// The tuple that must be unique across all non-alias entries.
    pub fn topology(&self) -> (ConnectionMode, bool, bool, bool) {
        (
            self.connection_mode,
            self.is_same_node,
            self.is_server_hostbacked,
            self.is_client_hostbacked,
        )
    }
}

const fn info(
    test_case_type: TestCaseType,
    connection_mode: ConnectionMode,
    is_same_node: bool,
    is_server_hostbacked: bool,
    is_client_hostbacked: bool,
) -> TestCaseTypeInfo {
    TestCaseTypeInfo {
        test_case_type,
        connection_mode,
        is_same_node,
        is_server_hostbacked,
        is_client_hostbacked,
        deprecated_alias_of: None,
    }
}

/// One entry per [`TestCaseType`], in declaration order.
pub static TEST_CASE_INFOS: [TestCaseTypeInfo; 24] = {
    use ConnectionMode::*;
    use TestCaseType::*;
    [
        info(PodToPodSameNode, PodIp, true, false, false),
        info(PodToPodDiffNode, PodIp, false, false, false),
        info(PodToHostSameNode, PodIp, true, true, false),
        info(PodToHostDiffNode, PodIp, false, true, false),
        info(PodToClusterIpToPodSameNode, ClusterIp, true, false, false),
        info(PodToClusterIpToPodDiffNode, ClusterIp, false, false, false),
        info(PodToClusterIpToHostSameNode, ClusterIp, true, true, false),
        info(PodToClusterIpToHostDiffNode, ClusterIp, false, true, false),
        info(PodToNodePortToPodSameNode, NodePortIp, true, false, false),
        info(PodToNodePortToPodDiffNode, NodePortIp, false, false, false),
        info(HostToPodSameNode, PodIp, true, false, true),
        info(HostToPodDiffNode, PodIp, false, false, true),
        info(HostToClusterIpToPodSameNode, ClusterIp, true, false, true),
        info(HostToClusterIpToPodDiffNode, ClusterIp, false, false, true),
        info(HostToClusterIpToHostSameNode, ClusterIp, true, true, true),
        info(HostToClusterIpToHostDiffNode, ClusterIp, false, true, true),
        info(HostToNodePortToPodSameNode, NodePortIp, true, false, true),
        info(HostToNodePortToPodDiffNode, NodePortIp, false, false, true),
        info(HostToNodePortToHostSameNode, NodePortIp, true, true, true),
        info(HostToNodePortToHostDiffNode, NodePortIp, false, true, true),
        info(PodToExternal, ExternalIp, false, true, false),
        info(PodToPod2ndInterfaceSameNode, MultiNetwork, true, false, false),
        info(PodToPod2ndInterfaceDiffNode, MultiNetwork, false, false, false),
        // Same topology as the 2nd interface diff-node case; the policy is
        // part of the manifests, not of the topology.
        TestCaseTypeInfo {
            deprecated_alias_of: Some(PodToPod2ndInterfaceDiffNode),
            ..info(PodToPodMultiNetworkPolicy, MultiNetwork, false, false, false)
        },
    ]
};

impl TestCaseType {
    /// All values in declaration order.
    pub fn all() -> impl Iterator<Item = TestCaseType> {
        TEST_CASE_INFOS.iter().map(|i| i.test_case_type)
    }

    pub fn value(self) -> u32 {
        self as u32
    }

    pub fn from_value(value: u32) -> Option<TestCaseType> {
        TestCaseType::all().find(|t| t.value() == value)
    }

    /// Position in the declaration order (and in [`TEST_CASE_INFOS`]).
    const fn index(self) -> usize {
        use TestCaseType::*;
        match self {
            PodToPodSameNode => 0,
            PodToPodDiffNode => 1,
            PodToHostSameNode => 2,
            PodToHostDiffNode => 3,
            PodToClusterIpToPodSameNode => 4,
            PodToClusterIpToPodDiffNode => 5,
            PodToClusterIpToHostSameNode => 6,
            PodToClusterIpToHostDiffNode => 7,
            PodToNodePortToPodSameNode => 8,
            PodToNodePortToPodDiffNode => 9,
            HostToPodSameNode => 10,
            HostToPodDiffNode => 11,
            HostToClusterIpToPodSameNode => 12,
            HostToClusterIpToPodDiffNode => 13,
            HostToClusterIpToHostSameNode => 14,
            HostToClusterIpToHostDiffNode => 15,
            HostToNodePortToPodSameNode => 16,
            HostToNodePortToPodDiffNode => 17,
            HostToNodePortToHostSameNode => 18,
            HostToNodePortToHostDiffNode => 19,
            PodToExternal => 20,
            PodToPod2ndInterfaceSameNode => 21,
            PodToPod2ndInterfaceDiffNode => 22,
            PodToPodMultiNetworkPolicy => 23,
        }
    }

    pub fn info(self) -> &'static TestCaseTypeInfo {
        &TEST_CASE_INFOS[self.index()]
    }

    pub fn name(self) -> &'static str {
        use TestCaseType::*;
        match self {
            PodToPodSameNode => "POD_TO_POD_SAME_NODE",
            PodToPodDiffNode => "POD_TO_POD_DIFF_NODE",
            PodToHostSameNode => "POD_TO_HOST_SAME_NODE",
            PodToHostDiffNode => "POD_TO_HOST_DIFF_NODE",
            PodToClusterIpToPodSameNode => "POD_TO_CLUSTER_IP_TO_POD_SAME_NODE",
            PodToClusterIpToPodDiffNode => "POD_TO_CLUSTER_IP_TO_POD_DIFF_NODE",
            PodToClusterIpToHostSameNode => "POD_TO_CLUSTER_IP_TO_HOST_SAME_NODE",
            PodToClusterIpToHostDiffNode => "POD_TO_CLUSTER_IP_TO_HOST_DIFF_NODE",
            PodToNodePortToPodSameNode => "POD_TO_NODE_PORT_TO_POD_SAME_NODE",
            PodToNodePortToPodDiffNode => "POD_TO_NODE_PORT_TO_POD_DIFF_NODE",
            HostToPodSameNode => "HOST_TO_POD_SAME_NODE",
            HostToPodDiffNode => "HOST_TO_POD_DIFF_NODE",
            HostToClusterIpToPodSameNode => "HOST_TO_CLUSTER_IP_TO_POD_SAME_NODE",
            HostToClusterIpToPodDiffNode => "HOST_TO_CLUSTER_IP_TO_POD_DIFF_NODE",
            HostToClusterIpToHostSameNode => "HOST_TO_CLUSTER_IP_TO_HOST_SAME_NODE",
            HostToClusterIpToHostDiffNode => "HOST_TO_CLUSTER_IP_TO_HOST_DIFF_NODE",
            HostToNodePortToPodSameNode => "HOST_TO_NODE_PORT_TO_POD_SAME_NODE",
            HostToNodePortToPodDiffNode => "HOST_TO_NODE_PORT_TO_POD_DIFF_NODE",
            HostToNodePortToHostSameNode => "HOST_TO_NODE_PORT_TO_HOST_SAME_NODE",
            HostToNodePortToHostDiffNode => "HOST_TO_NODE_PORT_TO_HOST_DIFF_NODE",
            PodToExternal => "POD_TO_EXTERNAL",
            PodToPod2ndInterfaceSameNode => "POD_TO_POD_2ND_INTERFACE_SAME_NODE",
            PodToPod2ndInterfaceDiffNode => "POD_TO_POD_2ND_INTERFACE_DIFF_NODE",
            PodToPodMultiNetworkPolicy => "POD_TO_POD_MULTI_NETWORK_POLICY",
        }
    }

    /// Parse one element: a number or a (case-insensitive) name.
    fn parse_single(s: &str) -> Result<TestCaseType, EnumParseError> {
        let s = s.trim();
        if let Ok(n) = s.parse::<u32>() {
            return TestCaseType::from_value(n)
                .ok_or_else(|| EnumParseError::new("TestCaseType", s));
        }
        let upper = s.to_ascii_uppercase();
        TestCaseType::all()
            .find(|t| t.name() == upper)
            .ok_or_else(|| EnumParseError::new("TestCaseType", s))
    }

    /// Parse a comma separated list such as `"1,2,POD_TO_HOST_SAME_NODE"`,
    /// `"1-9,15-19"` or `"*"`. Order and duplicates are preserved.
    pub fn parse_list(input: &str) -> Result<Vec<TestCaseType>, EnumParseError> {
        let mut result = Vec::new();
        for part in input.split(',') {
            let part = part.trim();
            if part.is_empty() {
                return Err(EnumParseError::new("TestCaseType", input));
            }
            if part == "*" {
                result.extend(TestCaseType::all());
                continue;
            }
            match part.split_once('-') {
                Some((lo, hi)) => {
                    let lo = TestCaseType::parse_single(lo)?.value();
                    let hi = TestCaseType::parse_single(hi)?.value();
                    if lo > hi {
                        return Err(EnumParseError::new("TestCaseType", part));
                    }
                    result.extend(TestCaseType::all().filter(|t| (lo..=hi).contains(&t.value())));
                }
                None => result.push(TestCaseType::parse_single(part)?),
            }
        }
        Ok(result)
    }
}

impl FromStr for TestCaseType {
    type Err = EnumParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TestCaseType::parse_single(s)
    }
}

impl fmt::Display for TestCaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Resolve two optional opt-in flags.
///
/// Nothing set enables both. Setting only one flag decides that side and the
/// other side gets the opposite value. Setting both uses them as given.
pub fn eval_binary_opt_in(a: Option<bool>, b: Option<bool>) -> (bool, bool) {
    match (a, b) {
        (None, None) => (true, true),
        (Some(a), None) => (a, !a),
        (None, Some(b)) => (!b, b),
        (Some(a), Some(b)) => (a, b),
    }
}

/// Encode an arbitrary string so that it only contains `[A-Za-z0-9_]`.
///
/// `_` becomes `__`, `.` becomes `_o` and every other byte `_xx` (hex).
pub fn str_sanitize(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c);
        } else if c == '_' {
            out.push_str("__");
        } else if c == '.' {
            out.push_str("_o");
        } else {
            let mut buf = [0u8; 4];
            for b in c.encode_utf8(&mut buf).bytes() {
                out.push_str(&format!("_{:02x}", b));
            }
        }
    }
    out
}

/// RFC 1123 host name check used for node names.
pub fn validate_dns_name(name: &str) -> bool {
    if name.is_empty() || name.len() > 253 {
        return false;
    }
    name.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-')
    })
}
