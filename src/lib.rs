//! tft -- traffic flow tests for Kubernetes clusters.
//!
//! This crate provides the configuration model, the task framework running
//! iperf3 / echo flows and measurement plugins inside cluster pods, and the
//! result and evaluation pipeline.

pub mod config;
pub mod echo;
pub mod evaluator;
pub mod exec;
pub mod manifest;
pub mod orchestrator;
pub mod output;
pub mod plugin;
pub mod report;
pub mod settings;
pub mod task;
pub mod testtype;
pub mod types;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::config::{TestConfig, TestConfigOptions};
use crate::evaluator::ThresholdEvaluator;
use crate::exec::{KubectlExec, RemoteExec};
use crate::orchestrator::TrafficFlowTests;
use crate::output::TftResults;

/// Load the configuration, run the preflight check, then run every test
/// group against the clusters using `kubectl exec`.
pub async fn run(opts: TestConfigOptions) -> Result<Vec<TftResults>> {
    let tc = TestConfig::from_file(opts).context("failed to load configuration")?;
    tc.system_check()?;
    tc.log_config();

    let kubeconfigs = tc.kubeconfigs()?;
    let exec: Arc<dyn RemoteExec> = Arc::new(KubectlExec::new(
        kubeconfigs.tenant.clone(),
        kubeconfigs.infra.clone(),
    ));
    run_with(Arc::new(tc), exec).await
}

/// Run every test group with the given remote exec backend.
pub async fn run_with(tc: Arc<TestConfig>, exec: Arc<dyn RemoteExec>) -> Result<Vec<TftResults>> {
    let evaluator = ThresholdEvaluator::load(tc.evaluator_config.as_deref())?;
    let tft = TrafficFlowTests::new(exec, Arc::new(evaluator));
    tft.run_all(&tc).await
}

/// Parse result files for printing.
pub fn load_results(files: &[PathBuf]) -> Result<Vec<TftResults>> {
    files.iter().map(|f| TftResults::parse_from_file(f)).collect()
}
