//! Test configuration: the parsed YAML tree plus the runtime context around it
//! (paths, output location, cluster credentials).

pub mod descriptor;
pub mod model;
pub mod parse;

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use serde_yaml::Value;
use thiserror::Error;
use tracing::{debug, info};

pub use descriptor::{ConfigDescriptor, DescriptorError};
pub use model::{
    ClientNode, Connection, ConnectionRef, NodeSpec, PluginRef, ServerNode, TestGroup,
    TestSuiteConfig,
};
pub use parse::ConfigError;

use crate::types::ClusterMode;

pub const ENV_KUBECONFIG: &str = "TFT_KUBECONFIG";
pub const ENV_KUBECONFIG_INFRA: &str = "TFT_KUBECONFIG_INFRA";

pub const KUBECONFIG_SINGLE: &str = "/root/kubeconfig.nicmodecluster";
pub const KUBECONFIG_CX: &str = "/root/kubeconfig.smartniccluster";
pub const KUBECONFIG_TENANT: &str = "/root/kubeconfig.tenantcluster";
pub const KUBECONFIG_INFRA: &str = "/root/kubeconfig.infracluster";

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failure to read YAML configuration {path:?}: {reason}")]
    Read { path: PathBuf, reason: String },
    #[error("invalid configuration{}: {source}", path_suffix(.path))]
    Invalid {
        path: Option<PathBuf>,
        #[source]
        source: ConfigError,
    },
    #[error("kubeconfig_infra given without kubeconfig ({0})")]
    InfraWithoutTenant(KubeconfigSource),
}

/// The cluster credentials or the evaluator configuration are not usable.
#[derive(Debug, Error)]
pub enum PreflightError {
    #[error("configuration{} is invalid: {source_desc} fails because {reason}", path_suffix(.config_path))]
    Invalid {
        config_path: Option<PathBuf>,
        source_desc: String,
        reason: String,
    },
    #[error("kubeconfig not specified in configuration{} and {reason}", path_suffix(.config_path))]
    NotDetected {
        config_path: Option<PathBuf>,
        reason: String,
    },
}

fn path_suffix(path: &Option<PathBuf>) -> String {
    match path {
        Some(p) => format!(" {:?}", p.display().to_string()),
        None => String::new(),
    }
}

/// Where a kubeconfig pair came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KubeconfigSource {
    CommandLine,
    Environment,
    ConfigFile,
    Autodetected,
}

impl KubeconfigSource {
    fn describe(self, infra: bool) -> String {
        let (flag, env, key) = if infra {
            ("--kubeconfig-infra", ENV_KUBECONFIG_INFRA, "kubeconfig_infra")
        } else {
            ("--kubeconfig", ENV_KUBECONFIG, "kubeconfig")
        };
        match self {
            KubeconfigSource::CommandLine => format!("command line option {flag}"),
            KubeconfigSource::Environment => format!("environment variable ${env}"),
            KubeconfigSource::ConfigFile => format!("key \".{key}\""),
            KubeconfigSource::Autodetected => format!("autodetected {key}"),
        }
    }
}

impl std::fmt::Display for KubeconfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.describe(false))
    }
}

/// Resolved cluster credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Kubeconfigs {
    pub tenant: PathBuf,
    pub infra: Option<PathBuf>,
    pub source: KubeconfigSource,
}

impl Kubeconfigs {
    pub fn mode(&self) -> ClusterMode {
        if self.infra.is_some() {
            ClusterMode::Dpu
        } else {
            ClusterMode::Single
        }
    }
}

/// An optional (kubeconfig, kubeconfig_infra) pair as given by one source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KubeconfigArgs {
    pub kubeconfig: Option<String>,
    pub kubeconfig_infra: Option<String>,
}

impl KubeconfigArgs {
    pub fn new(kubeconfig: Option<&str>, kubeconfig_infra: Option<&str>) -> Self {
        let norm = |s: Option<&str>| s.filter(|s| !s.is_empty()).map(str::to_string);
        Self {
            kubeconfig: norm(kubeconfig),
            kubeconfig_infra: norm(kubeconfig_infra),
        }
    }

    pub fn from_env() -> Self {
        let kubeconfig = std::env::var(ENV_KUBECONFIG).ok();
        let kubeconfig_infra = std::env::var(ENV_KUBECONFIG_INFRA).ok();
        Self::new(kubeconfig.as_deref(), kubeconfig_infra.as_deref())
    }

    fn resolve(
        &self,
        source: KubeconfigSource,
        cwd: &Path,
    ) -> Result<Option<Kubeconfigs>, LoadError> {
        match (&self.kubeconfig, &self.kubeconfig_infra) {
            (None, None) => Ok(None),
            (None, Some(_)) => Err(LoadError::InfraWithoutTenant(source)),
            (Some(tenant), infra) => Ok(Some(Kubeconfigs {
                tenant: path_norm(tenant, cwd),
                infra: infra.as_deref().map(|i| path_norm(i, cwd)),
                source,
            })),
        }
    }
}

/// Inputs for [`TestConfig::new`] besides the YAML document.
#[derive(Debug, Clone, Default)]
pub struct TestConfigOptions {
    pub config_path: Option<PathBuf>,
    pub cwd: Option<PathBuf>,
    pub kubeconfigs_cli: KubeconfigArgs,
    pub kubeconfigs_env: KubeconfigArgs,
    pub evaluator_config: Option<PathBuf>,
    pub output_base: Option<String>,
}

/// The configuration of one `tft run`.
#[derive(Debug)]
pub struct TestConfig {
    pub full_config: Value,
    pub config: TestSuiteConfig,
    pub config_path: Option<PathBuf>,
    pub config_dir: PathBuf,
    pub cwd: PathBuf,
    pub evaluator_config: Option<PathBuf>,
    pub output_base: Option<String>,
    kubeconfigs: OnceLock<Kubeconfigs>,
}

impl TestConfig {
    /// Read and parse the YAML file at `opts.config_path`.
    pub fn from_file(opts: TestConfigOptions) -> Result<Self, LoadError> {
        let path = opts.config_path.clone().unwrap_or_default();
        let data = std::fs::read_to_string(&path).map_err(|e| LoadError::Read {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        let full_config: Value = serde_yaml::from_str(&data).map_err(|e| LoadError::Read {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        Self::new(full_config, opts)
    }

    pub fn new(full_config: Value, opts: TestConfigOptions) -> Result<Self, LoadError> {
        let cwd = match opts.cwd {
            Some(cwd) => cwd,
            None => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        };
        let config_path = opts.config_path.map(|p| path_norm(&p.to_string_lossy(), &cwd));
        let config_dir = config_path
            .as_deref()
            .and_then(Path::parent)
            .map(Path::to_path_buf)
            .unwrap_or_else(|| cwd.clone());

        let config = TestSuiteConfig::parse(&full_config).map_err(|source| LoadError::Invalid {
            path: config_path.clone(),
            source,
        })?;

        // Command line, environment, configuration file. Autodetection is
        // deferred until the credentials are needed.
        let from_config = KubeconfigArgs {
            kubeconfig: config.kubeconfig.clone(),
            kubeconfig_infra: config.kubeconfig_infra.clone(),
        };
        let mut resolved = opts
            .kubeconfigs_cli
            .resolve(KubeconfigSource::CommandLine, &cwd)?;
        if resolved.is_none() {
            resolved = opts
                .kubeconfigs_env
                .resolve(KubeconfigSource::Environment, &cwd)?;
        }
        if resolved.is_none() {
            resolved = from_config.resolve(KubeconfigSource::ConfigFile, &config_dir)?;
        }
        let kubeconfigs = OnceLock::new();
        if let Some(k) = resolved {
            let _ = kubeconfigs.set(k);
        }

        let output_base = opts.output_base.filter(|s| !s.is_empty());

        Ok(Self {
            full_config,
            config,
            config_path,
            config_dir,
            cwd,
            evaluator_config: opts.evaluator_config,
            output_base,
            kubeconfigs,
        })
    }

    /// The credentials to use, autodetecting them on first use if no source
    /// provided any.
    pub fn kubeconfigs(&self) -> Result<&Kubeconfigs, PreflightError> {
        if let Some(k) = self.kubeconfigs.get() {
            return Ok(k);
        }
        let detected = detect_kubeconfigs(self.config_path.as_deref(), Path::new("/"))?;
        Ok(self.kubeconfigs.get_or_init(|| detected))
    }

    pub fn mode(&self) -> Result<ClusterMode, PreflightError> {
        Ok(self.kubeconfigs()?.mode())
    }

    /// Verify the credentials and the evaluator configuration before any
    /// test runs.
    pub fn system_check(&self) -> Result<(), PreflightError> {
        let kubeconfigs = self.kubeconfigs()?;
        self.check_kubeconfig(&kubeconfigs.tenant, kubeconfigs.source, false)?;
        if let Some(infra) = &kubeconfigs.infra {
            self.check_kubeconfig(infra, kubeconfigs.source, true)?;
        }
        if let Some(eval) = &self.evaluator_config {
            if !eval.exists() {
                return Err(PreflightError::Invalid {
                    config_path: self.config_path.clone(),
                    source_desc: "evaluator config".to_string(),
                    reason: format!("file {:?} does not exist", eval.display().to_string()),
                });
            }
        }
        Ok(())
    }

    fn check_kubeconfig(
        &self,
        path: &Path,
        source: KubeconfigSource,
        infra: bool,
    ) -> Result<(), PreflightError> {
        let fail = |reason: String| PreflightError::Invalid {
            config_path: self.config_path.clone(),
            source_desc: source.describe(infra),
            reason,
        };
        let shown = path.display().to_string();
        let data = std::fs::read_to_string(path)
            .map_err(|_| fail(format!("file {shown:?} does not exist")))?;
        let valid = serde_yaml::from_str::<Value>(&data)
            .ok()
            .and_then(|v| v.get("clusters").and_then(Value::as_sequence).map(|c| !c.is_empty()))
            .unwrap_or(false);
        if !valid {
            return Err(fail(format!("file {shown:?} is not a valid KUBECONFIG")));
        }
        Ok(())
    }

    /// Where the results of test group `tft_idx` are written.
    ///
    /// With an output base `"/tmp/run-"` this is `/tmp/run-000.json`; a base
    /// ending in `/` uses the prefix `result-`. Without output base the file
    /// is named after the current time in the group's `logs` directory.
    pub fn get_output_file(&self, tft_idx: usize) -> PathBuf {
        match &self.output_base {
            None => {
                let logs = self
                    .config
                    .tft
                    .get(tft_idx)
                    .map(|g| g.logs.clone())
                    .unwrap_or_else(|| PathBuf::from(model::DEFAULT_LOGS));
                let timestamp = chrono::Local::now().format("%Y-%m-%d-%H-%M-%S");
                path_norm(&logs.to_string_lossy(), &self.cwd).join(format!("{timestamp}.json"))
            }
            Some(base) => {
                let (dir, prefix) = if base.ends_with('/') {
                    (base.as_str(), "result-")
                } else {
                    match base.rfind('/') {
                        Some(pos) => (&base[..=pos], &base[pos + 1..]),
                        None => ("", base.as_str()),
                    }
                };
                let dir = if dir.is_empty() {
                    self.cwd.clone()
                } else {
                    path_norm(dir, &self.cwd)
                };
                dir.join(format!("{prefix}{tft_idx:03}.json"))
            }
        }
    }

    pub fn log_config(&self) {
        match self.kubeconfigs.get() {
            Some(k) => {
                info!(kubeconfig = %k.tenant.display(), source = %k.source, "config: KUBECONFIG");
                if let Some(infra) = &k.infra {
                    info!(kubeconfig_infra = %infra.display(), "config: KUBECONFIG_INFRA");
                }
            }
            None => info!("config: KUBECONFIG is not specified and not (yet) detected"),
        }
        if let Some(eval) = &self.evaluator_config {
            info!(eval_config = %eval.display(), "config: EVAL_CONFIG");
        }
        let tft = self
            .full_config
            .get("tft")
            .and_then(|t| serde_json::to_string(t).ok())
            .unwrap_or_default();
        info!("config: {}", tft);
        debug!("config-full: {}", self.config.serialize_json());
    }
}

/// Look for the well known kubeconfig files below `root`.
pub fn detect_kubeconfigs(
    config_path: Option<&Path>,
    root: &Path,
) -> Result<Kubeconfigs, PreflightError> {
    let at = |p: &str| root.join(p.trim_start_matches('/'));
    let detected = |tenant: PathBuf, infra: Option<PathBuf>| Kubeconfigs {
        tenant,
        infra,
        source: KubeconfigSource::Autodetected,
    };

    if at(KUBECONFIG_SINGLE).exists() {
        return Ok(detected(at(KUBECONFIG_SINGLE), None));
    }
    if at(KUBECONFIG_CX).exists() {
        return Ok(detected(at(KUBECONFIG_CX), None));
    }
    let reason = if at(KUBECONFIG_TENANT).exists() {
        if at(KUBECONFIG_INFRA).exists() {
            return Ok(detected(at(KUBECONFIG_TENANT), Some(at(KUBECONFIG_INFRA))));
        }
        format!(
            "misses kubeconfig_infra file {KUBECONFIG_INFRA:?} while having a kubeconfig {KUBECONFIG_TENANT:?}"
        )
    } else {
        format!(
            "neither have any of the default kubeconfig files {:?}",
            [KUBECONFIG_SINGLE, KUBECONFIG_CX, KUBECONFIG_TENANT]
        )
    };
    Err(PreflightError::NotDetected {
        config_path: config_path.map(Path::to_path_buf),
        reason,
    })
}

/// Make `path` absolute relative to `cwd` and drop `.` components.
pub fn path_norm(path: &str, cwd: &Path) -> PathBuf {
    let p = Path::new(path);
    let joined = if p.is_absolute() {
        p.to_path_buf()
    } else {
        cwd.join(p)
    };
    let mut out = PathBuf::new();
    for comp in joined.components() {
        match comp {
            std::path::Component::CurDir => {}
            std::path::Component::ParentDir => {
                out.pop();
            }
            c => out.push(c.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn test_config_from_str(s: &str) -> TestConfig {
        let v: Value = serde_yaml::from_str(s).unwrap();
        TestConfig::new(
            v,
            TestConfigOptions {
                cwd: Some(PathBuf::from("/work")),
                kubeconfigs_cli: KubeconfigArgs::new(Some("/root/kubeconfig.x1"), None),
                ..Default::default()
            },
        )
        .unwrap()
    }

    const MINIMAL: &str = "tft:\n  - connections:\n    - server: [{name: a}]\n      client: [{name: b}]\n";

    fn opts(output_base: Option<&str>) -> TestConfigOptions {
        TestConfigOptions {
            cwd: Some(PathBuf::from("/work")),
            output_base: output_base.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn test_kubeconfig_priority() {
        let with_keys = format!("{MINIMAL}kubeconfig: k/tenant\nkubeconfig_infra: k/infra\n");
        let v: Value = serde_yaml::from_str(&with_keys).unwrap();

        let tc = TestConfig::new(
            v.clone(),
            TestConfigOptions {
                config_path: Some(PathBuf::from("conf/config.yaml")),
                ..opts(None)
            },
        )
        .unwrap();
        let k = tc.kubeconfigs().unwrap();
        assert_eq!(k.source, KubeconfigSource::ConfigFile);
        assert_eq!(k.tenant, PathBuf::from("/work/conf/k/tenant"));
        assert_eq!(k.infra, Some(PathBuf::from("/work/conf/k/infra")));
        assert_eq!(k.mode(), ClusterMode::Dpu);

        let tc = TestConfig::new(
            v.clone(),
            TestConfigOptions {
                kubeconfigs_env: KubeconfigArgs::new(Some("/env/kc"), None),
                ..opts(None)
            },
        )
        .unwrap();
        let k = tc.kubeconfigs().unwrap();
        assert_eq!(k.source, KubeconfigSource::Environment);
        assert_eq!(k.tenant, PathBuf::from("/env/kc"));
        assert_eq!(tc.mode().unwrap(), ClusterMode::Single);

        let tc = TestConfig::new(
            v,
            TestConfigOptions {
                kubeconfigs_cli: KubeconfigArgs::new(Some("cli/kc"), None),
                kubeconfigs_env: KubeconfigArgs::new(Some("/env/kc"), None),
                ..opts(None)
            },
        )
        .unwrap();
        let k = tc.kubeconfigs().unwrap();
        assert_eq!(k.source, KubeconfigSource::CommandLine);
        assert_eq!(k.tenant, PathBuf::from("/work/cli/kc"));
    }

    #[test]
    fn test_infra_without_tenant() {
        let v: Value = serde_yaml::from_str(MINIMAL).unwrap();
        let err = TestConfig::new(
            v,
            TestConfigOptions {
                kubeconfigs_cli: KubeconfigArgs::new(None, Some("/x")),
                ..opts(None)
            },
        )
        .unwrap_err();
        assert!(matches!(
            err,
            LoadError::InfraWithoutTenant(KubeconfigSource::CommandLine)
        ));
    }

    #[test]
    fn test_invalid_config_error_message() {
        let v: Value = serde_yaml::from_str("tft: []\n").unwrap();
        let err = TestConfig::new(
            v,
            TestConfigOptions {
                config_path: Some(PathBuf::from("/etc/tft.yaml")),
                ..opts(None)
            },
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid configuration \"/etc/tft.yaml\": \".tft\": expects a non-empty list"
        );
    }

    #[test]
    fn test_detect_kubeconfigs() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("root");
        std::fs::create_dir_all(&dir).unwrap();

        let err = detect_kubeconfigs(None, root.path()).unwrap_err();
        assert!(err
            .to_string()
            .contains("neither have any of the default kubeconfig files"));

        std::fs::write(dir.join("kubeconfig.tenantcluster"), "").unwrap();
        let err = detect_kubeconfigs(None, root.path()).unwrap_err();
        assert!(err.to_string().contains("misses kubeconfig_infra file"));

        std::fs::write(dir.join("kubeconfig.infracluster"), "").unwrap();
        let k = detect_kubeconfigs(None, root.path()).unwrap();
        assert_eq!(k.mode(), ClusterMode::Dpu);
        assert_eq!(k.source, KubeconfigSource::Autodetected);

        std::fs::write(dir.join("kubeconfig.nicmodecluster"), "").unwrap();
        let k = detect_kubeconfigs(None, root.path()).unwrap();
        assert_eq!(k.tenant, dir.join("kubeconfig.nicmodecluster"));
        assert_eq!(k.mode(), ClusterMode::Single);
    }

    #[test]
    fn test_system_check() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good");
        let bad = dir.path().join("bad");
        std::fs::write(&good, "apiVersion: v1\nclusters:\n  - name: c1\n").unwrap();
        std::fs::write(&bad, "apiVersion: v1\n").unwrap();

        let mk = |kc: &Path| {
            let v: Value = serde_yaml::from_str(MINIMAL).unwrap();
            TestConfig::new(
                v,
                TestConfigOptions {
                    kubeconfigs_cli: KubeconfigArgs::new(Some(&kc.to_string_lossy()), None),
                    ..opts(None)
                },
            )
            .unwrap()
        };

        mk(&good).system_check().unwrap();

        let err = mk(&bad).system_check().unwrap_err();
        assert!(err.to_string().contains("command line option --kubeconfig"));
        assert!(err.to_string().contains("is not a valid KUBECONFIG"));

        let err = mk(&dir.path().join("missing")).system_check().unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn test_output_file() {
        let v: Value = serde_yaml::from_str(MINIMAL).unwrap();
        let tc = TestConfig::new(v.clone(), opts(Some("/tmp/"))).unwrap();
        assert_eq!(tc.get_output_file(0), PathBuf::from("/tmp/result-000.json"));

        let tc = TestConfig::new(v.clone(), opts(Some("/tmp/result2-"))).unwrap();
        assert_eq!(tc.get_output_file(0), PathBuf::from("/tmp/result2-000.json"));
        assert_eq!(tc.get_output_file(12), PathBuf::from("/tmp/result2-012.json"));

        let tc = TestConfig::new(v.clone(), opts(Some("out"))).unwrap();
        assert_eq!(tc.get_output_file(1), PathBuf::from("/work/out001.json"));

        let tc = TestConfig::new(v, opts(None)).unwrap();
        let f = tc.get_output_file(0);
        assert!(f.starts_with("/work/ft-logs"));
        assert_eq!(f.extension().and_then(|e| e.to_str()), Some("json"));
    }

    #[test]
    fn test_path_norm() {
        assert_eq!(path_norm("a/./b/../c", Path::new("/x")), PathBuf::from("/x/a/c"));
        assert_eq!(path_norm("/abs", Path::new("/x")), PathBuf::from("/abs"));
    }
}
