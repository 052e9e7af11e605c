//! Configuration for `jdtls-probe`.
//!
//! Sources, lowest precedence first: built-in defaults, the TOML file, then
//! the `JDTLS_PATH` / `WORKSPACE_DIR` environment variables. Command-line
//! flags are applied by the binary on top of [`ResolvedConfig`].

use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs};

use probe_lsp::{ClientOptions, InitializationOptions, LaunchSpec, SessionTimeouts, StderrSink};
use serde::Deserialize;

pub const DEFAULT_JDTLS_PATH: &str = "/jdtls";
pub const DEFAULT_WORKSPACE_DIR: &str = "/workspace";
pub const JDTLS_PATH_ENV: &str = "JDTLS_PATH";
pub const WORKSPACE_DIR_ENV: &str = "WORKSPACE_DIR";

/// Bundle jar path relative to the JDT.LS install directory.
pub const BUNDLE_JAR: &str = "plugins/java-analyzer-bundle.core-1.0.0-SNAPSHOT.jar";

#[derive(Debug, Default, Deserialize)]
pub struct ProbeConfig {
    pub analyzer: Option<AnalyzerConfig>,
    pub timeouts: Option<TimeoutsConfig>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AnalyzerConfig {
    /// JDT.LS installation directory. `${VAR}` references are expanded.
    pub jdtls_path: Option<String>,
    /// Workspace / `-data` directory. Created before the analyzer starts.
    pub workspace_dir: Option<String>,
    /// Appended to the launcher command line.
    #[serde(default)]
    pub extra_args: Vec<String>,
    /// Bundle jars to load. Defaults to the analyzer bundle inside the install.
    pub bundles: Option<Vec<String>>,
    /// `"inherit"`, `"discard"`, or a log file path.
    pub stderr: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TimeoutsConfig {
    pub initialize_seconds: Option<u64>,
    pub request_seconds: Option<u64>,
    pub settle_seconds: Option<u64>,
    pub shutdown_seconds: Option<u64>,
    pub exit_grace_seconds: Option<u64>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

impl ConfigError {
    pub fn path(&self) -> &PathBuf {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => path,
        }
    }
}

/// Expand `${VAR}` references from the process environment. Unset variables
/// expand to the empty string; an unclosed `${` is kept verbatim.
pub fn expand_env_vars(value: &str) -> String {
    expand_with(value, |name| env::var(name).ok())
}

fn expand_with(value: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            break;
        };
        out.push_str(&rest[..start]);
        let var = &after[..end];
        if !var.is_empty() {
            out.push_str(&lookup(var).unwrap_or_default());
        }
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    out
}

impl ProbeConfig {
    /// Load `explicit` if given (it must exist), otherwise the default config
    /// file if present. `Ok(None)` means no file was found.
    pub fn load(explicit: Option<&Path>) -> Result<Option<Self>, ConfigError> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => match config_path() {
                Some(path) if path.exists() => path,
                _ => return Ok(None),
            },
        };
        Self::from_path(&path).map(Some)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!("Failed to read config at {:?}: {}", path, err);
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: err,
                });
            }
        };

        match toml::from_str(&content) {
            Ok(config) => {
                tracing::debug!("Loaded config from {:?}", path);
                Ok(config)
            }
            Err(err) => {
                tracing::warn!("Failed to parse config at {:?}: {}", path, err);
                Err(ConfigError::Parse {
                    path: path.to_path_buf(),
                    source: err,
                })
            }
        }
    }

    /// Apply defaults and the process environment.
    #[must_use]
    pub fn resolve(&self) -> ResolvedConfig {
        self.resolve_with(|name| env::var(name).ok())
    }

    /// Like [`resolve`](Self::resolve) with an explicit variable lookup.
    pub fn resolve_with(&self, lookup: impl Fn(&str) -> Option<String>) -> ResolvedConfig {
        let analyzer = self.analyzer.as_ref();
        let expand = |raw: &str| PathBuf::from(expand_with(raw, &lookup));

        let jdtls_path = lookup(JDTLS_PATH_ENV)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .or_else(|| analyzer.and_then(|a| a.jdtls_path.as_deref()).map(expand))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_JDTLS_PATH));

        let workspace_dir = lookup(WORKSPACE_DIR_ENV)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .or_else(|| analyzer.and_then(|a| a.workspace_dir.as_deref()).map(expand))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_WORKSPACE_DIR));

        let bundles = analyzer
            .and_then(|a| a.bundles.as_ref())
            .map(|bundles| bundles.iter().map(|b| expand_with(b, &lookup)).collect());

        let stderr = analyzer
            .and_then(|a| a.stderr.as_deref())
            .map_or(StderrSink::Inherit, |raw| parse_stderr(&expand_with(raw, &lookup)));

        ResolvedConfig {
            jdtls_path,
            workspace_dir,
            extra_args: analyzer.map(|a| a.extra_args.clone()).unwrap_or_default(),
            bundles,
            stderr,
            timeouts: self
                .timeouts
                .as_ref()
                .map_or_else(SessionTimeouts::default, TimeoutsConfig::apply),
        }
    }
}

impl TimeoutsConfig {
    fn apply(&self) -> SessionTimeouts {
        let base = SessionTimeouts::default();
        let secs = |value: Option<u64>, fallback: Duration| {
            value.map_or(fallback, Duration::from_secs)
        };
        SessionTimeouts {
            initialize: secs(self.initialize_seconds, base.initialize),
            request: secs(self.request_seconds, base.request),
            settle: secs(self.settle_seconds, base.settle),
            shutdown_request: secs(self.shutdown_seconds, base.shutdown_request),
            exit_grace: secs(self.exit_grace_seconds, base.exit_grace),
        }
    }
}

fn parse_stderr(raw: &str) -> StderrSink {
    match raw.trim() {
        "" | "inherit" => StderrSink::Inherit,
        "discard" | "null" => StderrSink::Discard,
        path => StderrSink::File(PathBuf::from(path)),
    }
}

/// Fully resolved settings, ready to hand to [`probe_lsp::AnalyzerClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    pub jdtls_path: PathBuf,
    pub workspace_dir: PathBuf,
    pub extra_args: Vec<String>,
    /// `None` means the bundle jar inside `jdtls_path`.
    pub bundles: Option<Vec<String>>,
    pub stderr: StderrSink,
    pub timeouts: SessionTimeouts,
}

impl ResolvedConfig {
    #[must_use]
    pub fn bundle_paths(&self) -> Vec<String> {
        match &self.bundles {
            Some(bundles) => bundles.clone(),
            None => vec![self.jdtls_path.join(BUNDLE_JAR).display().to_string()],
        }
    }

    #[must_use]
    pub fn launch_spec(&self) -> LaunchSpec {
        LaunchSpec::jdtls(&self.jdtls_path, &self.workspace_dir)
            .args(&self.extra_args)
            .stderr(self.stderr.clone())
    }

    #[must_use]
    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            workspace_root: self.workspace_dir.clone(),
            initialization: InitializationOptions {
                bundles: self.bundle_paths(),
                workspace_folders: Vec::new(),
            },
            timeouts: self.timeouts,
        }
    }
}

/// `<config dir>/jdtls-probe/config.toml`, e.g. `~/.config/jdtls-probe/config.toml`.
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("jdtls-probe").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    // expand_env_vars

    #[test]
    fn expand_no_vars() {
        assert_eq!(expand_with("hello world", no_env), "hello world");
    }

    #[test]
    fn expand_single_and_adjacent_vars() {
        let env = env_of(&[("A", "alpha"), ("B", "beta")]);
        assert_eq!(expand_with("pre ${A} post", &env), "pre alpha post");
        assert_eq!(expand_with("${A}${B}", &env), "alphabeta");
    }

    #[test]
    fn expand_missing_var_becomes_empty() {
        assert_eq!(expand_with("before ${NOPE} after", no_env), "before  after");
    }

    #[test]
    fn expand_unclosed_brace_preserved() {
        assert_eq!(expand_with("test ${UNCLOSED", no_env), "test ${UNCLOSED");
    }

    #[test]
    fn expand_empty_name_dropped() {
        assert_eq!(expand_with("test ${} more", no_env), "test  more");
    }

    #[test]
    fn expand_reads_process_env() {
        unsafe {
            std::env::set_var("PROBE_CONFIG_TEST_HOME", "/opt");
        }
        assert_eq!(expand_env_vars("${PROBE_CONFIG_TEST_HOME}/jdtls"), "/opt/jdtls");
        unsafe {
            std::env::remove_var("PROBE_CONFIG_TEST_HOME");
        }
    }

    // resolution

    #[test]
    fn defaults_without_file_or_env() {
        let resolved = ProbeConfig::default().resolve_with(no_env);
        assert_eq!(resolved.jdtls_path, PathBuf::from("/jdtls"));
        assert_eq!(resolved.workspace_dir, PathBuf::from("/workspace"));
        assert_eq!(resolved.stderr, StderrSink::Inherit);
        assert_eq!(resolved.timeouts, SessionTimeouts::default());
        assert_eq!(
            resolved.bundle_paths(),
            vec!["/jdtls/plugins/java-analyzer-bundle.core-1.0.0-SNAPSHOT.jar".to_string()]
        );
    }

    #[test]
    fn environment_overrides_file() {
        let config: ProbeConfig = toml::from_str(
            r#"
            [analyzer]
            jdtls_path = "/from/file"
            workspace_dir = "/ws/file"
            "#,
        )
        .unwrap();
        let resolved = config.resolve_with(env_of(&[("JDTLS_PATH", "/from/env")]));
        assert_eq!(resolved.jdtls_path, PathBuf::from("/from/env"));
        assert_eq!(resolved.workspace_dir, PathBuf::from("/ws/file"));
    }

    #[test]
    fn empty_env_value_is_ignored() {
        let resolved = ProbeConfig::default().resolve_with(env_of(&[("WORKSPACE_DIR", "")]));
        assert_eq!(resolved.workspace_dir, PathBuf::from("/workspace"));
    }

    #[test]
    fn file_paths_expand_variables() {
        let config: ProbeConfig = toml::from_str(
            r#"
            [analyzer]
            jdtls_path = "${TOOLS}/jdtls"
            bundles = ["${TOOLS}/bundle.jar"]
            stderr = "${TOOLS}/logs/jdtls.log"
            "#,
        )
        .unwrap();
        let resolved = config.resolve_with(env_of(&[("TOOLS", "/opt")]));
        assert_eq!(resolved.jdtls_path, PathBuf::from("/opt/jdtls"));
        assert_eq!(resolved.bundle_paths(), vec!["/opt/bundle.jar".to_string()]);
        assert_eq!(
            resolved.stderr,
            StderrSink::File(PathBuf::from("/opt/logs/jdtls.log"))
        );
    }

    #[test]
    fn stderr_keywords() {
        assert_eq!(parse_stderr("inherit"), StderrSink::Inherit);
        assert_eq!(parse_stderr("discard"), StderrSink::Discard);
        assert_eq!(parse_stderr(" null "), StderrSink::Discard);
    }

    #[test]
    fn partial_timeouts_keep_defaults() {
        let config: ProbeConfig = toml::from_str(
            r"
            [timeouts]
            settle_seconds = 0
            exit_grace_seconds = 10
            ",
        )
        .unwrap();
        let timeouts = config.resolve_with(no_env).timeouts;
        assert_eq!(timeouts.settle, Duration::ZERO);
        assert_eq!(timeouts.exit_grace, Duration::from_secs(10));
        assert_eq!(timeouts.shutdown_request, Duration::from_secs(3));
    }

    #[test]
    fn launch_spec_uses_install_layout() {
        let config: ProbeConfig = toml::from_str(
            r#"
            [analyzer]
            extra_args = ["--jvm-arg=-Xmx2G"]
            "#,
        )
        .unwrap();
        let resolved = config.resolve_with(no_env);
        let spec = resolved.launch_spec();
        assert_eq!(spec.program(), Path::new("/jdtls/bin/jdtls"));
        assert_eq!(spec.working_dir(), Some(Path::new("/workspace")));
        assert_eq!(
            spec.arguments().last().map(|a| a.to_string_lossy().into_owned()),
            Some("--jvm-arg=-Xmx2G".to_string())
        );
        let options = resolved.client_options();
        assert_eq!(options.workspace_root, PathBuf::from("/workspace"));
        assert_eq!(options.initialization.bundles.len(), 1);
    }

    // loading

    #[test]
    fn load_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("probe.toml");
        fs::write(&path, "[analyzer]\nworkspace_dir = \"/tmp/ws\"\n").unwrap();
        let config = ProbeConfig::load(Some(&path)).unwrap().unwrap();
        assert_eq!(
            config.analyzer.unwrap().workspace_dir.as_deref(),
            Some("/tmp/ws")
        );
    }

    #[test]
    fn missing_explicit_file_is_a_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let err = ProbeConfig::load(Some(&path)).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
        assert_eq!(err.path(), &path);
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "[analyzer\n").unwrap();
        let err = ProbeConfig::from_path(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("bad.toml"));
    }
}
