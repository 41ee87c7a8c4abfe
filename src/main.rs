use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};

use tft::config::{KubeconfigArgs, TestConfigOptions};
use tft::echo::{self, EchoOptions, EchoOutcome};
use tft::report::{process_results_all, EXIT_CODE_VALIDATION};

#[derive(Parser)]
#[command(
    name = "tft",
    about = "Traffic flow tests: network performance tests for Kubernetes clusters",
    version,
    long_about = None
)]
struct Cli {
    /// Debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the traffic flow tests of a YAML configuration
    Run {
        /// YAML configuration file with tft test definitions
        config: PathBuf,

        /// YAML configuration file with bitrate thresholds
        evaluator_config: Option<PathBuf>,

        /// Base name for result files: "{base}NNN.json". A base ending in
        /// "/" writes "{base}result-NNN.json"
        #[arg(short = 'o', long)]
        output_base: Option<String>,

        /// Print the results and exit non-zero when a flow failed
        #[arg(short = 'c', long)]
        check: bool,

        /// Kubeconfig of the tenant cluster. Overrides $TFT_KUBECONFIG and
        /// the "kubeconfig" key of the configuration
        #[arg(long)]
        kubeconfig: Option<String>,

        /// Kubeconfig of the infra cluster (DPU mode). Requires --kubeconfig
        #[arg(long)]
        kubeconfig_infra: Option<String>,
    },

    /// Print the passing and failing flows of result files
    PrintResults {
        /// Result files written by "tft run"
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// TCP echo server and client used inside pods by the SIMPLE test type
    SimpleEcho {
        /// Run as server
        #[arg(short, long)]
        server: bool,

        /// Address to listen on (server) or connect to (client)
        #[arg(short, long, default_value = echo::DEFAULT_ADDR)]
        addr: String,

        #[arg(short, long, default_value_t = echo::DEFAULT_PORT)]
        port: u16,

        /// Seconds until both sides quit. 0 runs forever
        #[arg(short, long, default_value_t = 0.0)]
        duration: f64,

        /// Seconds to pause after each chunk
        #[arg(long, default_value_t = 0.001)]
        sleep: f64,

        /// Largest chunk size in bytes
        #[arg(long, default_value_t = echo::DEFAULT_BUFSIZE)]
        bufsize: usize,

        /// Clients the server accepts before quitting. 0 accepts forever
        #[arg(long, default_value_t = echo::DEFAULT_NUM_CLIENTS)]
        num_clients: usize,

        /// Send printable ASCII instead of random bytes
        #[arg(long)]
        echo_ascii: bool,
    },
}

fn seconds(what: &str, secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs).map_err(|_| anyhow!("invalid {what} {secs}"))
}

async fn run_simple_echo(server: bool, opts: EchoOptions) -> ExitCode {
    let side = if server { "server" } else { "client" };
    let outcome = if server {
        echo::run_server(&opts).await
    } else {
        echo::run_client(&opts).await
    };
    match outcome {
        Ok(EchoOutcome::DurationExpired) => {
            println!("{side}: duration expired. Quit");
            ExitCode::SUCCESS
        }
        Ok(EchoOutcome::Completed) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{side}: {e}");
            ExitCode::from(1)
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run {
            config,
            evaluator_config,
            output_base,
            check,
            kubeconfig,
            kubeconfig_infra,
        } => {
            tracing::info!(config = %config.display(), "Starting traffic flow tests");
            let opts = TestConfigOptions {
                config_path: Some(config),
                cwd: None,
                kubeconfigs_cli: KubeconfigArgs::new(kubeconfig.as_deref(), kubeconfig_infra.as_deref()),
                kubeconfigs_env: KubeconfigArgs::from_env(),
                evaluator_config: evaluator_config.filter(|p| !p.as_os_str().is_empty()),
                output_base,
            };
            let all = tft::run(opts).await?;
            if check {
                let mut stdout = std::io::stdout().lock();
                let ok = process_results_all(&mut stdout, &all)?;
                stdout.flush()?;
                if !ok {
                    return Ok(ExitCode::from(EXIT_CODE_VALIDATION));
                }
            }
        }
        Commands::PrintResults { files } => {
            let all = tft::load_results(&files)?;
            let mut stdout = std::io::stdout().lock();
            let ok = process_results_all(&mut stdout, &all)?;
            stdout.flush()?;
            if !ok {
                return Ok(ExitCode::from(EXIT_CODE_VALIDATION));
            }
        }
        Commands::SimpleEcho {
            server,
            addr,
            port,
            duration,
            sleep,
            bufsize,
            num_clients,
            echo_ascii,
        } => {
            let opts = EchoOptions {
                addr,
                port,
                duration: seconds("duration", duration)?,
                sleep: seconds("sleep", sleep)?,
                bufsize,
                num_clients,
                echo_ascii,
            };
            return Ok(run_simple_echo(server, opts).await);
        }
    }

    Ok(ExitCode::SUCCESS)
}
