//! Result records: per task outputs, one TftResult per test instance and the
//! TftResults document written for each test group.

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::{PodType, TaskRole, TestCaseType, TestType};

/// Throughput in Gbit/s. `None` means not available (NA).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Bitrate {
    pub tx: Option<f64>,
    pub rx: Option<f64>,
}

impl Bitrate {
    pub const NA: Bitrate = Bitrate { tx: None, rx: None };

    /// Build from raw bits per second, converted to Gbit/s and rounded to
    /// five significant digits.
    pub fn from_bits_per_second(tx: Option<f64>, rx: Option<f64>) -> Self {
        let to_gbps = |bps: f64| round_significant(bps / 1e9, 5);
        Self {
            tx: tx.map(to_gbps),
            rx: rx.map(to_gbps),
        }
    }

    pub fn is_na(&self) -> bool {
        self.tx.is_none() && self.rx.is_none()
    }
}

impl fmt::Display for Bitrate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let show = |v: Option<f64>| match v {
            Some(v) => format!("{v}"),
            None => "NA".to_string(),
        };
        write!(f, "{{tx={} rx={}}}", show(self.tx), show(self.rx))
    }
}

/// Round to `digits` significant digits, like printf's `%.{digits}g`.
pub fn round_significant(value: f64, digits: usize) -> f64 {
    if !value.is_finite() || value == 0.0 || digits == 0 {
        return value;
    }
    format!("{:.*e}", digits - 1, value)
        .parse()
        .unwrap_or(value)
}

/// Identity of a pod taking part in a test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodInfo {
    pub name: String,
    pub pod_type: PodType,
    pub is_tenant: bool,
    pub index: usize,
}

/// Where a flow result comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestMetadata {
    pub tft_idx: usize,
    pub test_cases_idx: usize,
    pub connections_idx: usize,
    #[serde(default)]
    pub instance_idx: usize,
    pub reverse: bool,
    pub test_case_id: TestCaseType,
    pub test_type: TestType,
    pub server: PodInfo,
    pub client: PodInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginMetadata {
    pub plugin_name: String,
    pub node_name: String,
    pub pod_name: String,
    #[serde(default = "default_plugin_role")]
    pub task_role: TaskRole,
    #[serde(default = "default_true")]
    pub is_tenant: bool,
}

fn default_true() -> bool {
    true
}

fn default_plugin_role() -> TaskRole {
    TaskRole::Plugin
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginOutput {
    #[serde(default = "default_true")]
    pub success: bool,
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(default)]
    pub eval_success: bool,
    #[serde(default)]
    pub eval_msg: Option<String>,
    pub plugin_metadata: PluginMetadata,
    pub command: String,
    #[serde(default)]
    pub result: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowTestOutput {
    #[serde(default = "default_true")]
    pub success: bool,
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(default)]
    pub eval_success: bool,
    #[serde(default)]
    pub eval_msg: Option<String>,
    pub tft_metadata: TestMetadata,
    pub command: String,
    #[serde(default)]
    pub result: Map<String, Value>,
    pub bitrate_gbps: Bitrate,
}

/// All outputs of one test instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TftResult {
    pub flow_test: FlowTestOutput,
    #[serde(default)]
    pub plugins: Vec<PluginOutput>,
}

impl TftResult {
    /// True when the flow and every plugin output passed evaluation.
    pub fn eval_all_success(&self) -> bool {
        self.flow_test.eval_success && self.plugins.iter().all(|p| p.eval_success)
    }
}

/// The results of one test group, serialized as a plain JSON array.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TftResults {
    pub results: Vec<TftResult>,
    pub filename: Option<PathBuf>,
}

impl TftResults {
    pub fn new(results: Vec<TftResult>, filename: Option<PathBuf>) -> Self {
        Self { results, filename }
    }

    /// Short suffix naming the source file, used in log and print messages.
    pub fn log_detail(&self) -> String {
        match &self.filename {
            Some(f) => format!(" in {:?}", f.display().to_string()),
            None => String::new(),
        }
    }

    pub fn parse_from_str(data: &str, filename: Option<PathBuf>) -> Result<Self> {
        let results: Vec<TftResult> =
            serde_json::from_str(data).context("result file is not a list of test results")?;
        Ok(Self { results, filename })
    }

    pub fn parse_from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read result file {:?}", path.display()))?;
        Self::parse_from_str(&data, Some(path.to_path_buf()))
            .with_context(|| format!("failed to parse result file {:?}", path.display()))
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.results)?)
    }

    /// Write the results, creating parent directories. Remembers the file
    /// name.
    pub fn write_to_file(&mut self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {:?}", parent.display()))?;
            }
        }
        std::fs::write(path, self.to_json()? + "\n")
            .with_context(|| format!("failed to write {:?}", path.display()))?;
        self.filename = Some(path.to_path_buf());
        Ok(())
    }

    /// Split into (passing, failing), preserving order.
    pub fn group_by_success(&self) -> (TftResults, TftResults) {
        let (pass, fail): (Vec<_>, Vec<_>) = self
            .results
            .iter()
            .cloned()
            .partition(|r| r.eval_all_success());
        (
            TftResults::new(pass, self.filename.clone()),
            TftResults::new(fail, self.filename.clone()),
        )
    }
}
