//! Everything a task needs to know about the test instance it belongs to.

use std::time::Duration;

use uuid::Uuid;

use crate::config::{ClientNode, ConfigDescriptor, Connection, DescriptorError, ServerNode};
use crate::output::{PodInfo, TestMetadata};
use crate::types::{
    ClusterMode, ConnectionMode, PodType, TestCaseType, TestCaseTypeInfo, TestType,
};

/// Settings of one test instance: a leaf descriptor plus the repetition index.
#[derive(Debug, Clone)]
pub struct TestSettings {
    pub cfg_descr: ConfigDescriptor,
    pub instance_index: usize,
    pub cluster_mode: ClusterMode,
    pub run_id: Uuid,
    pub test_group_name: String,
    pub namespace: String,
    pub duration: u64,
    pub privileged_pod: bool,
    pub test_case_id: TestCaseType,
    pub connection: Connection,
}

impl TestSettings {
    pub fn new(
        cfg_descr: ConfigDescriptor,
        instance_index: usize,
        cluster_mode: ClusterMode,
    ) -> Result<Self, DescriptorError> {
        let group = cfg_descr.get_test_group()?;
        let test_case_id = cfg_descr.get_test_case()?;
        let connection = cfg_descr.get_connection()?.clone();
        // Both node lists are checked at parse time; fail early anyway.
        cfg_descr.get_server()?;
        cfg_descr.get_client()?;
        Ok(Self {
            instance_index,
            cluster_mode,
            run_id: Uuid::new_v4(),
            test_group_name: group.name.clone(),
            namespace: group.namespace.clone(),
            duration: group.duration,
            privileged_pod: group.privileged_pod,
            test_case_id,
            connection,
            cfg_descr,
        })
    }

    pub fn conf_server(&self) -> &ServerNode {
        &self.connection.server[0]
    }

    pub fn conf_client(&self) -> &ClientNode {
        &self.connection.client[0]
    }

    pub fn test_type(&self) -> TestType {
        self.connection.test_type
    }

    pub fn reverse(&self) -> bool {
        self.connection.reverse
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration)
    }

    pub fn info(&self) -> &'static TestCaseTypeInfo {
        self.test_case_id.info()
    }

    pub fn connection_mode(&self) -> ConnectionMode {
        self.info().connection_mode
    }

    pub fn server_node(&self) -> &str {
        &self.conf_server().spec.name
    }

    /// Same-node test cases place the client next to the server.
    pub fn client_node(&self) -> &str {
        if self.info().is_same_node {
            self.server_node()
        } else {
            &self.conf_client().spec.name
        }
    }

    pub fn server_pod_type(&self) -> PodType {
        if self.info().is_server_hostbacked {
            PodType::Hostbacked
        } else {
            self.conf_server().spec.pod_type
        }
    }

    pub fn client_pod_type(&self) -> PodType {
        if self.info().is_client_hostbacked {
            PodType::Hostbacked
        } else {
            self.conf_client().spec.pod_type
        }
    }

    /// Node level override, else the test group's setting. Host-backed pods
    /// are always privileged.
    pub fn server_privileged(&self) -> bool {
        self.server_pod_type() == PodType::Hostbacked
            || self
                .conf_server()
                .spec
                .privileged_pod
                .unwrap_or(self.privileged_pod)
    }

    pub fn client_privileged(&self) -> bool {
        self.client_pod_type() == PodType::Hostbacked
            || self
                .conf_client()
                .spec
                .privileged_pod
                .unwrap_or(self.privileged_pod)
    }

    /// Pod of the server side for a tool such as `iperf`.
    pub fn server_pod_info(&self, tool: &str) -> PodInfo {
        self.endpoint_pod_info(tool, "server", self.server_node(), self.server_pod_type())
    }

    pub fn client_pod_info(&self, tool: &str) -> PodInfo {
        self.endpoint_pod_info(tool, "client", self.client_node(), self.client_pod_type())
    }

    fn endpoint_pod_info(&self, tool: &str, side: &str, node: &str, pod_type: PodType) -> PodInfo {
        let index = self.connection.yamlidx;
        let name = match pod_type {
            PodType::Hostbacked => format!("tools-pod-{}", pod_name_part(node)),
            PodType::Sriov => format!("{tool}-{side}-sriov-{index}"),
            PodType::Normal => format!("{tool}-{side}-{index}"),
        };
        PodInfo {
            name,
            pod_type,
            is_tenant: true,
            index,
        }
    }

    /// Host-backed tools pod used by a measurement plugin on `node`.
    pub fn plugin_pod_info(&self, node: &str, plugin_name: &str, tenant: bool) -> PodInfo {
        PodInfo {
            name: format!(
                "tools-pod-{}-{}",
                pod_name_part(node),
                pod_name_part(plugin_name)
            ),
            pod_type: PodType::Hostbacked,
            is_tenant: tenant,
            index: self.connection.yamlidx,
        }
    }

    pub fn get_test_metadata(&self, server: &PodInfo, client: &PodInfo) -> TestMetadata {
        TestMetadata {
            tft_idx: self.cfg_descr.tft_idx().unwrap_or(0),
            test_cases_idx: self.cfg_descr.test_cases_idx().unwrap_or(0),
            connections_idx: self.cfg_descr.connections_idx().unwrap_or(0),
            instance_idx: self.instance_index,
            reverse: self.reverse(),
            test_case_id: self.test_case_id,
            test_type: self.test_type(),
            server: server.clone(),
            client: client.clone(),
        }
    }

    /// Human readable description for log lines.
    pub fn get_test_info(&self) -> String {
        format!(
            "{:?} / {:?} / {} / {} #{}{}",
            self.test_group_name,
            self.connection.name,
            self.test_case_id,
            self.test_type(),
            self.instance_index,
            if self.reverse() { " (reverse)" } else { "" }
        )
    }
}

/// Lower case and replace everything outside `[a-z0-9-]` with `-`.
pub fn pod_name_part(s: &str) -> String {
    s.chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_alphanumeric() || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::tests::test_config_from_str;
    use std::sync::Arc;

    pub(crate) const CONFIG: &str = r#"
tft:
  - name: t1
    duration: 5
    privileged_pod: false
    test_cases: "POD_TO_POD_SAME_NODE,HOST_TO_POD_DIFF_NODE,POD_TO_HOST_DIFF_NODE"
    connections:
      - name: c1
        server: [{name: worker-0.example.com, sriov: true}]
        client: [{name: worker-1, privileged_pod: true}]
"#;

    pub(crate) fn settings_for(config: &str, test_case_idx: i32) -> TestSettings {
        let tc = Arc::new(test_config_from_str(config));
        let d = ConfigDescriptor::with_indices(tc, 0, test_case_idx, 0).unwrap();
        TestSettings::new(d, 0, ClusterMode::Single).unwrap()
    }

    #[test]
    fn test_requires_leaf_descriptor() {
        let tc = Arc::new(test_config_from_str(CONFIG));
        let d = ConfigDescriptor::with_indices(tc, 0, -1, 0).unwrap();
        assert!(TestSettings::new(d, 0, ClusterMode::Single).is_err());
    }

    #[test]
    fn test_same_node_places_client_on_server_node() {
        let ts = settings_for(CONFIG, 0);
        assert_eq!(ts.client_node(), "worker-0.example.com");
        assert_eq!(ts.server_pod_type(), PodType::Sriov);
        assert_eq!(ts.server_pod_info("iperf").name, "iperf-server-sriov-0");
        assert_eq!(ts.client_pod_info("iperf").name, "iperf-client-0");
        assert!(!ts.server_privileged());
        assert!(ts.client_privileged());
        assert_eq!(ts.duration(), Duration::from_secs(5));
    }

    #[test]
    fn test_hostbacked_pods() {
        let ts = settings_for(CONFIG, 1);
        assert_eq!(ts.client_node(), "worker-1");
        assert_eq!(ts.client_pod_type(), PodType::Hostbacked);
        assert_eq!(ts.client_pod_info("iperf").name, "tools-pod-worker-1");

        let ts = settings_for(CONFIG, 2);
        assert_eq!(ts.server_pod_type(), PodType::Hostbacked);
        assert!(ts.server_privileged());
        assert_eq!(
            ts.server_pod_info("iperf").name,
            "tools-pod-worker-0-example-com"
        );
        assert_eq!(
            ts.plugin_pod_info("worker-1", "measure_cpu", true).name,
            "tools-pod-worker-1-measure-cpu"
        );
    }

    #[test]
    fn test_metadata() {
        let ts = settings_for(CONFIG, 2);
        let s = ts.server_pod_info("iperf");
        let c = ts.client_pod_info("iperf");
        let md = ts.get_test_metadata(&s, &c);
        assert_eq!(md.test_cases_idx, 2);
        assert_eq!(md.test_case_id, TestCaseType::PodToHostDiffNode);
        assert_eq!(md.test_type, TestType::IperfTcp);
        assert_eq!(md.server, s);
        assert!(ts.get_test_info().contains("POD_TO_HOST_DIFF_NODE"));
    }
}
