//! Scoring of test outputs against per test case bitrate thresholds.
//!
//! The evaluator config is optional YAML keyed by test type:
//!
//! ```yaml
//! IPERF_TCP:
//!   - id: POD_TO_POD_SAME_NODE
//!     Normal:
//!       threshold: 5
//!     Reverse:
//!       threshold: 5
//! ```
//!
//! Thresholds are in Gbit/s. Missing entries pass.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::output::{FlowTestOutput, PluginOutput, TftResult};
use crate::types::{TestCaseType, TestType};

#[derive(Debug, Error)]
pub enum EvaluatorError {
    #[error("cannot read evaluator config {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("evaluator config {path:?} is not valid YAML: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("evaluator config {path:?}: {msg}")]
    Invalid { path: PathBuf, msg: String },
}

/// Outcome of evaluating one output.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub success: bool,
    pub msg: Option<String>,
}

impl Verdict {
    pub fn pass() -> Self {
        Self {
            success: true,
            msg: None,
        }
    }

    pub fn fail(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            msg: Some(msg.into()),
        }
    }
}

pub trait Evaluator: Send + Sync {
    fn eval_flow_test(&self, output: &FlowTestOutput) -> Verdict;

    fn eval_plugin(&self, output: &PluginOutput) -> Verdict;

    /// Fill in `eval_success` / `eval_msg` of the flow and every plugin.
    fn eval_tft_result(&self, result: &mut TftResult) {
        let v = self.eval_flow_test(&result.flow_test);
        result.flow_test.eval_success = v.success;
        result.flow_test.eval_msg = v.msg;
        for plugin in &mut result.plugins {
            let v = self.eval_plugin(plugin);
            plugin.eval_success = v.success;
            plugin.eval_msg = v.msg;
        }
    }
}

#[derive(Debug, Deserialize)]
struct ThresholdEntry {
    id: serde_yaml::Value,
    #[serde(rename = "Normal", default)]
    normal: Option<Threshold>,
    #[serde(rename = "Reverse", default)]
    reverse: Option<Threshold>,
}

#[derive(Debug, Deserialize)]
struct Threshold {
    threshold: f64,
}

type ThresholdKey = (TestType, TestCaseType, bool);

/// Evaluator backed by the threshold table.
#[derive(Debug, Default)]
pub struct ThresholdEvaluator {
    thresholds: HashMap<ThresholdKey, f64>,
}

impl ThresholdEvaluator {
    /// Load from `path`. No path, or an empty path, means no thresholds.
    pub fn load(path: Option<&Path>) -> Result<Self, EvaluatorError> {
        let path = match path {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => return Ok(Self::default()),
        };
        let data = std::fs::read_to_string(path).map_err(|source| EvaluatorError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let ev = Self::parse(&data, path)?;
        info!(path = %path.display(), thresholds = ev.thresholds.len(), "loaded evaluator config");
        Ok(ev)
    }

    /// Parse config text. `path` only names the source in errors.
    pub fn parse(data: &str, path: &Path) -> Result<Self, EvaluatorError> {
        let invalid = |msg: String| EvaluatorError::Invalid {
            path: path.to_path_buf(),
            msg,
        };
        if data.trim().is_empty() {
            return Ok(Self::default());
        }
        let raw: Option<BTreeMap<String, Option<Vec<ThresholdEntry>>>> =
            serde_yaml::from_str(data).map_err(|source| EvaluatorError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        let mut thresholds = HashMap::new();
        for (type_name, entries) in raw.unwrap_or_default() {
            let test_type: TestType = type_name.parse().map_err(|e| invalid(format!("{e}")))?;
            for entry in entries.unwrap_or_default() {
                let id = match &entry.id {
                    serde_yaml::Value::Number(n) => n.to_string(),
                    serde_yaml::Value::String(s) => s.clone(),
                    other => return Err(invalid(format!("invalid test case id {other:?}"))),
                };
                let test_case: TestCaseType = id.parse().map_err(|e| invalid(format!("{e}")))?;
                for (reverse, t) in [(false, &entry.normal), (true, &entry.reverse)] {
                    if let Some(t) = t {
                        thresholds.insert((test_type, test_case, reverse), t.threshold);
                    }
                }
            }
        }
        Ok(Self { thresholds })
    }

    pub fn threshold(&self, test_type: TestType, test_case: TestCaseType, reverse: bool) -> Option<f64> {
        self.thresholds.get(&(test_type, test_case, reverse)).copied()
    }
}

impl Evaluator for ThresholdEvaluator {
    fn eval_flow_test(&self, output: &FlowTestOutput) -> Verdict {
        if !output.success {
            return Verdict::fail(
                output
                    .msg
                    .clone()
                    .unwrap_or_else(|| "flow test failed".to_string()),
            );
        }
        let md = &output.tft_metadata;
        let Some(threshold) = self.threshold(md.test_type, md.test_case_id, md.reverse) else {
            return Verdict::pass();
        };
        // UDP reports the sender side, TCP what actually arrived.
        let (side, value) = match md.test_type {
            TestType::IperfUdp => ("tx", output.bitrate_gbps.tx),
            _ => ("rx", output.bitrate_gbps.rx),
        };
        debug!(test_case = %md.test_case_id, ?value, threshold, "evaluating bitrate");
        match value {
            None => Verdict::fail(format!(
                "{side} bitrate is not available but a threshold of {threshold} Gbps is set"
            )),
            Some(v) if v < threshold => Verdict::fail(format!(
                "{side} bitrate {v} Gbps is below the threshold of {threshold} Gbps"
            )),
            Some(_) => Verdict::pass(),
        }
    }

    fn eval_plugin(&self, output: &PluginOutput) -> Verdict {
        if output.success {
            Verdict::pass()
        } else {
            Verdict::fail(
                output
                    .msg
                    .clone()
                    .unwrap_or_else(|| "plugin failed".to_string()),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::tests::sample_flow;
    use crate::output::Bitrate;

    const EVAL_CONFIG: &str = r#"
IPERF_TCP:
  - id: POD_TO_POD_SAME_NODE
    Normal:
      threshold: 9.35
    Reverse:
      threshold: 1
  - id: 2
    Normal:
      threshold: 5
IPERF_UDP:
  - id: POD_TO_POD_SAME_NODE
    Normal:
      threshold: 1.0
"#;

    fn evaluator() -> ThresholdEvaluator {
        ThresholdEvaluator::parse(EVAL_CONFIG, Path::new("eval.yaml")).unwrap()
    }

    #[test]
    fn test_parse() {
        let ev = evaluator();
        assert_eq!(
            ev.threshold(TestType::IperfTcp, TestCaseType::PodToPodSameNode, false),
            Some(9.35)
        );
        assert_eq!(
            ev.threshold(TestType::IperfTcp, TestCaseType::PodToPodSameNode, true),
            Some(1.0)
        );
        assert_eq!(
            ev.threshold(TestType::IperfTcp, TestCaseType::PodToPodDiffNode, false),
            Some(5.0)
        );
        assert_eq!(
            ev.threshold(TestType::IperfTcp, TestCaseType::PodToPodDiffNode, true),
            None
        );
    }

    #[test]
    fn test_empty_configs() {
        for data in ["", "{}", "---\n", "IPERF_TCP:\n"] {
            let ev = ThresholdEvaluator::parse(data, Path::new("e.yaml")).unwrap();
            assert!(ev.thresholds.is_empty(), "{data:?}");
        }
        assert!(ThresholdEvaluator::load(None).unwrap().thresholds.is_empty());
        assert!(ThresholdEvaluator::load(Some(Path::new("")))
            .unwrap()
            .thresholds
            .is_empty());
    }

    #[test]
    fn test_invalid_configs() {
        let err = ThresholdEvaluator::parse("FTP:\n  - id: 1\n", Path::new("e.yaml")).unwrap_err();
        assert!(matches!(err, EvaluatorError::Invalid { .. }));
        let err =
            ThresholdEvaluator::parse("IPERF_TCP:\n  - id: 11\n", Path::new("e.yaml")).unwrap_err();
        assert!(err.to_string().contains("TestCaseType"));
        assert!(ThresholdEvaluator::load(Some(Path::new("/nonexistent/eval.yaml"))).is_err());
    }

    #[test]
    fn test_eval_flow_threshold() {
        let ev = evaluator();
        // sample: tx 9.4, rx 9.3, IPERF_TCP, POD_TO_POD_SAME_NODE
        let flow = sample_flow(false);
        let v = ev.eval_flow_test(&flow);
        assert!(!v.success);
        assert!(v.msg.unwrap().contains("rx bitrate 9.3 Gbps is below"));

        let mut reverse = sample_flow(false);
        reverse.tft_metadata.reverse = true;
        assert_eq!(ev.eval_flow_test(&reverse), Verdict::pass());
    }

    #[test]
    fn test_eval_flow_na_never_passes_threshold() {
        let ev = evaluator();
        let mut flow = sample_flow(false);
        flow.bitrate_gbps = Bitrate::NA;
        let v = ev.eval_flow_test(&flow);
        assert!(!v.success);
        assert!(v.msg.unwrap().contains("not available"));

        // Without a threshold only `success` counts. SIMPLE flows never
        // carry a bitrate, iperf flows without one are already failed.
        assert!(ThresholdEvaluator::default().eval_flow_test(&flow).success);
        flow.success = false;
        flow.msg = Some("Output of \"iperf3 -c x\" contains unexpected data".to_string());
        let v = ThresholdEvaluator::default().eval_flow_test(&flow);
        assert!(!v.success);
        assert_eq!(v.msg, flow.msg);
    }

    #[test]
    fn test_eval_udp_uses_tx() {
        let ev = evaluator();
        let mut flow = sample_flow(false);
        flow.tft_metadata.test_type = TestType::IperfUdp;
        flow.bitrate_gbps = Bitrate {
            tx: Some(1.5),
            rx: None,
        };
        assert!(ev.eval_flow_test(&flow).success);
    }

    #[test]
    fn test_eval_failed_flow() {
        let mut flow = sample_flow(true);
        flow.success = false;
        flow.msg = Some("iperf3 error: unable to connect".to_string());
        let v = ThresholdEvaluator::default().eval_flow_test(&flow);
        assert_eq!(v, Verdict::fail("iperf3 error: unable to connect"));
    }

    #[test]
    fn test_eval_tft_result() {
        let ev = ThresholdEvaluator::default();
        let mut result = TftResult {
            flow_test: sample_flow(false),
            plugins: vec![],
        };
        ev.eval_tft_result(&mut result);
        assert!(result.flow_test.eval_success);
        assert!(result.eval_all_success());
    }
}
