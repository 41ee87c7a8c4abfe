//! Runs the configured tests: every test group, test case, connection and
//! instance in turn, one TftResults file per test group.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tracing::{info, warn};

use crate::config::{ConfigDescriptor, TestConfig};
use crate::evaluator::Evaluator;
use crate::exec::RemoteExec;
use crate::output::{TftResult, TftResults};
use crate::plugin::plugin_tasks;
use crate::settings::TestSettings;
use crate::task::{Task, TaskContext, TaskOutput, TestSync};
use crate::types::ClusterMode;

pub struct TrafficFlowTests {
    exec: Arc<dyn RemoteExec>,
    evaluator: Arc<dyn Evaluator>,
}

impl TrafficFlowTests {
    pub fn new(exec: Arc<dyn RemoteExec>, evaluator: Arc<dyn Evaluator>) -> Self {
        Self { exec, evaluator }
    }

    /// Run every test group and write its results file.
    pub async fn run_all(&self, tc: &Arc<TestConfig>) -> Result<Vec<TftResults>> {
        let groups: Vec<ConfigDescriptor> = ConfigDescriptor::new(tc.clone())
            .describe_all_test_groups()
            .collect();
        let mut all = Vec::with_capacity(groups.len());
        for group in groups {
            all.push(self.test_run(&group).await?);
        }
        Ok(all)
    }

    /// Run one test group (`cfg_descr` must select a test group) and write
    /// its results to the configured output file.
    pub async fn test_run(&self, cfg_descr: &ConfigDescriptor) -> Result<TftResults> {
        let tc = cfg_descr.test_config().clone();
        let group = cfg_descr.get_test_group()?;
        let mode = tc.mode()?;
        let tft_idx = group.yamlidx;

        let leaves: Vec<ConfigDescriptor> = cfg_descr
            .describe_all_test_cases()
            .flat_map(|case| case.describe_all_connections().collect::<Vec<_>>())
            .collect();

        info!(group = %group.name, instances = leaves.len(), ?mode, "running test group");
        let mut results = Vec::new();
        for leaf in leaves {
            let instances = leaf.get_connection()?.instances;
            for instance in 0..instances as usize {
                results.push(self.run_test_instance(leaf.clone(), instance, mode).await?);
            }
        }

        let mut tft_results = TftResults::new(results, None);
        let path = tc.get_output_file(tft_idx);
        tft_results
            .write_to_file(&path)
            .with_context(|| format!("failed to write results of test group {:?}", group.name))?;
        info!(path = %path.display(), results = tft_results.results.len(), "results written");
        Ok(tft_results)
    }

    /// Run a single test instance: the server first, then client and plugins
    /// behind the start barrier.
    pub async fn run_test_instance(
        &self,
        cfg_descr: ConfigDescriptor,
        instance: usize,
        mode: ClusterMode,
    ) -> Result<TftResult> {
        let ts = Arc::new(TestSettings::new(cfg_descr, instance, mode)?);
        let (mut server, mut client) = ts.connection.handler.create_server_client(&ts);
        let mut plugins: Vec<Task> = ts
            .connection
            .plugins
            .iter()
            .flat_map(|p| plugin_tasks(&ts, p))
            .collect();

        let sync = Arc::new(TestSync::new(1 + plugins.len(), ts.duration()));
        let ctx = TaskContext::new(ts.clone(), sync, self.exec.clone());
        info!(test = %ts.get_test_info(), run_id = %ts.run_id, "starting test instance");

        server.initialize(&ctx).await;
        server.start(ctx.clone());
        if let Err(e) = server.confirm_ready(&ctx).await {
            warn!(error = %e, "server not confirmed ready, starting the client anyway");
        }

        client.initialize(&ctx).await;
        for p in &mut plugins {
            p.initialize(&ctx).await;
        }
        client.start(ctx.clone());
        for p in &mut plugins {
            p.start(ctx.clone());
        }

        let flow = match client.join().await {
            Some(TaskOutput::Flow(flow)) => flow,
            _ => return Err(anyhow!("client of {} produced no flow output", ts.get_test_info())),
        };
        let mut plugin_outputs = Vec::with_capacity(plugins.len());
        for p in &mut plugins {
            if let Some(TaskOutput::Plugin(o)) = p.join().await {
                plugin_outputs.push(o);
            }
        }
        if let Some(out) = server.join().await {
            if !out.success() {
                warn!(msg = out.msg().unwrap_or(""), "server task failed");
            }
        }

        let mut result = TftResult {
            flow_test: flow,
            plugins: plugin_outputs,
        };
        self.evaluator.eval_tft_result(&mut result);
        info!(
            test = %ts.get_test_info(),
            success = result.flow_test.success,
            eval_success = result.eval_all_success(),
            bitrate = %result.flow_test.bitrate_gbps,
            "test instance finished"
        );
        Ok(result)
    }
}
