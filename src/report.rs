//! Human readable summaries of result files (`tft print-results` and
//! `tft run --check`).

use std::io::{self, Write};

use crate::output::{FlowTestOutput, PluginOutput, TftResult, TftResults};

/// Exit code when results failed validation.
pub const EXIT_CODE_VALIDATION: u8 = 1;

fn yes_no(b: bool) -> &'static str {
    if b {
        "yes"
    } else {
        "no"
    }
}

fn show_gbps(v: Option<f64>) -> String {
    match v {
        Some(v) => format!("{v}"),
        None => "NA".to_string(),
    }
}

fn verdict(eval_success: bool, eval_msg: Option<&str>) -> String {
    if eval_success {
        "succeeded".to_string()
    } else {
        format!("failed: {}", eval_msg.unwrap_or("unknown reason"))
    }
}

pub fn print_flow_test_output<W: Write>(out: &mut W, flow: &FlowTestOutput) -> io::Result<()> {
    let md = &flow.tft_metadata;
    writeln!(
        out,
        "Test ID: {}, Test Type: {}, Reverse: {}, TX Bitrate: {} Gbps, RX Bitrate: {} Gbps, {}",
        md.test_case_id,
        md.test_type,
        yes_no(md.reverse),
        show_gbps(flow.bitrate_gbps.tx),
        show_gbps(flow.bitrate_gbps.rx),
        verdict(flow.eval_success, flow.eval_msg.as_deref()),
    )
}

pub fn print_plugin_output<W: Write>(out: &mut W, plugin: &PluginOutput) -> io::Result<()> {
    writeln!(
        out,
        "     plugin {}, {}",
        plugin.plugin_metadata.plugin_name,
        verdict(plugin.eval_success, plugin.eval_msg.as_deref()),
    )
}

pub fn print_tft_result<W: Write>(out: &mut W, result: &TftResult) -> io::Result<()> {
    print_flow_test_output(out, &result.flow_test)?;
    for p in &result.plugins {
        print_plugin_output(out, p)?;
    }
    Ok(())
}

pub fn print_tft_results<W: Write>(out: &mut W, results: &TftResults) -> io::Result<()> {
    for r in &results.results {
        print_tft_result(out, r)?;
    }
    Ok(())
}

/// Print passing and failing flows of one file. Returns true when nothing
/// failed.
pub fn process_results<W: Write>(out: &mut W, results: &TftResults) -> io::Result<bool> {
    let (pass, fail) = results.group_by_success();
    let detail = results.log_detail();
    for (group, what) in [(&pass, "passing"), (&fail, "failing")] {
        let n = group.results.len();
        let details = if n > 0 { " Details:" } else { "" };
        writeln!(out, "There are {n} {what} flows{detail}.{details}")?;
        print_tft_results(out, group)?;
    }
    writeln!(out)?;
    Ok(fail.results.is_empty())
}

/// [`process_results`] for every file, followed by an overall verdict.
pub fn process_results_all<'a, W, I>(out: &mut W, all: I) -> io::Result<bool>
where
    W: Write,
    I: IntoIterator<Item = &'a TftResults>,
{
    let mut failed_files = Vec::new();
    for results in all {
        if !process_results(out, results)? {
            failed_files.push(
                results
                    .filename
                    .as_ref()
                    .map(|f| f.display().to_string())
                    .unwrap_or_default(),
            );
        }
    }
    writeln!(out)?;
    if !failed_files.is_empty() {
        writeln!(out, "Failures detected in {failed_files:?}")?;
        return Ok(false);
    }
    writeln!(out, "No failures detected in results")?;
    Ok(true)
}
