use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::paths::Paths;
use crate::sandbox::{ExecutionPolicy, build_policy};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Resolved XDG-compliant paths (not serialized)
    #[serde(skip)]
    pub paths: Paths,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub sandbox: SandboxConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_bind")]
    pub bind: String,

    /// Maximum request body size in bytes
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Interpreter used to run submissions (default: python3)
    #[serde(default = "default_interpreter")]
    pub interpreter: String,

    /// Fenced-block language tags routed to the sandbox
    #[serde(default = "default_languages")]
    pub languages: Vec<String>,

    /// Directory for ephemeral script files (default: runtime dir)
    #[serde(default)]
    pub scratch_dir: Option<String>,

    /// Outer deadline in seconds (default: 30)
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// In-process watchdog in seconds, must be below timeout_secs (default: 25)
    #[serde(default = "default_watchdog")]
    pub watchdog_secs: u64,

    /// Maximum submission length in characters (default: 10000)
    #[serde(default = "default_max_code_chars")]
    pub max_code_chars: usize,

    /// Maximum captured bytes per output stream (default: 1MB)
    #[serde(default = "default_max_output")]
    pub max_output_bytes: usize,

    /// Iterations allowed for rewritten `while True` loops (default: 10)
    #[serde(default = "default_loop_cap")]
    pub loop_cap: u32,

    /// Upper bound for sleep arguments in seconds (default: 0.01)
    #[serde(default = "default_delay_clamp")]
    pub delay_clamp_secs: f64,

    /// Rewrite hazardous code before running it (default: true)
    #[serde(default = "default_true")]
    pub rewrite: bool,

    /// Concurrent executions allowed, 0 = unlimited (default: 0)
    #[serde(default)]
    pub max_concurrent: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON log lines instead of human-readable text
    #[serde(default)]
    pub json: bool,
}

// Default value functions
fn default_port() -> u16 {
    31330
}
fn default_bind() -> String {
    "127.0.0.1".to_string()
}
fn default_max_body_bytes() -> usize {
    256 * 1024
}
fn default_interpreter() -> String {
    "python3".to_string()
}
fn default_languages() -> Vec<String> {
    vec!["python".to_string(), "py".to_string()]
}
fn default_timeout() -> u64 {
    30
}
fn default_watchdog() -> u64 {
    25
}
fn default_max_code_chars() -> usize {
    10_000
}
fn default_max_output() -> usize {
    1_048_576 // 1MB
}
fn default_loop_cap() -> u32 {
    10
}
fn default_delay_clamp() -> f64 {
    0.01
}
fn default_true() -> bool {
    true
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            interpreter: default_interpreter(),
            languages: default_languages(),
            scratch_dir: None,
            timeout_secs: default_timeout(),
            watchdog_secs: default_watchdog(),
            max_code_chars: default_max_code_chars(),
            max_output_bytes: default_max_output(),
            loop_cap: default_loop_cap(),
            delay_clamp_secs: default_delay_clamp(),
            rewrite: default_true(),
            max_concurrent: 0,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Config {
    /// Load from `path` if given, otherwise from the default location.
    pub fn load_with(path: Option<&str>) -> Result<Self> {
        match path {
            Some(p) => {
                let expanded = shellexpand::tilde(p).to_string();
                Self::load_from(Path::new(&expanded))
            }
            None => Self::load(),
        }
    }

    /// Load from the default location, writing a template on first run.
    pub fn load() -> Result<Self> {
        let paths = Paths::resolve()?;
        paths.ensure_dirs()?;
        let path = paths.config_file();

        if !path.exists() {
            let config = Config {
                paths,
                ..Config::default()
            };
            config.save_with_template()?;
            return Ok(config);
        }

        let mut config = Self::parse(&path)?;
        config.paths = paths;
        config.validate()?;
        Ok(config)
    }

    /// Load from an explicit file. The file must exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = Self::parse(path)?;
        config.paths = Paths::resolve()?.with_config_file(path);
        config.validate()?;
        Ok(config)
    }

    fn parse(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Reject settings that would break the execution invariants.
    pub fn validate(&self) -> Result<()> {
        let sandbox = &self.sandbox;

        if sandbox.watchdog_secs == 0 {
            anyhow::bail!("sandbox.watchdog_secs must be at least 1");
        }
        if sandbox.timeout_secs <= sandbox.watchdog_secs {
            anyhow::bail!(
                "sandbox.timeout_secs ({}) must exceed sandbox.watchdog_secs ({})",
                sandbox.timeout_secs,
                sandbox.watchdog_secs
            );
        }
        if sandbox.max_code_chars == 0 {
            anyhow::bail!("sandbox.max_code_chars must be positive");
        }
        if sandbox.max_output_bytes == 0 {
            anyhow::bail!("sandbox.max_output_bytes must be positive");
        }
        if sandbox.loop_cap == 0 {
            anyhow::bail!("sandbox.loop_cap must be positive");
        }
        if !(sandbox.delay_clamp_secs.is_finite() && sandbox.delay_clamp_secs >= 0.0) {
            anyhow::bail!("sandbox.delay_clamp_secs must be a non-negative number");
        }
        if sandbox.interpreter.trim().is_empty() {
            anyhow::bail!("sandbox.interpreter must not be empty");
        }

        Ok(())
    }

    pub fn save(&self) -> Result<()> {
        let path = self.paths.config_file();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(&path, content)?;

        Ok(())
    }

    /// Save config with a helpful template (for first-time setup)
    pub fn save_with_template(&self) -> Result<()> {
        let path = self.paths.config_file();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(&path, DEFAULT_CONFIG_TEMPLATE)?;
        eprintln!("Created default config at {}", path.display());

        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let paths = Paths::resolve()?;
        Ok(paths.config_file())
    }

    /// Scratch directory for artifacts: config override, else the resolved default.
    pub fn scratch_dir(&self) -> PathBuf {
        match self.sandbox.scratch_dir {
            Some(ref dir) if !dir.trim().is_empty() => {
                PathBuf::from(shellexpand::tilde(dir.trim()).to_string())
            }
            _ => self.paths.scratch_dir.clone(),
        }
    }

    /// Execution policy for the sandbox service.
    pub fn execution_policy(&self) -> ExecutionPolicy {
        build_policy(&self.sandbox, &self.scratch_dir())
    }

    pub fn get_value(&self, key: &str) -> Result<String> {
        let parts: Vec<&str> = key.split('.').collect();

        match parts.as_slice() {
            ["server", "port"] => Ok(self.server.port.to_string()),
            ["server", "bind"] => Ok(self.server.bind.clone()),
            ["server", "max_body_bytes"] => Ok(self.server.max_body_bytes.to_string()),
            ["sandbox", "interpreter"] => Ok(self.sandbox.interpreter.clone()),
            ["sandbox", "languages"] => Ok(self.sandbox.languages.join(",")),
            ["sandbox", "scratch_dir"] => Ok(self.scratch_dir().display().to_string()),
            ["sandbox", "timeout_secs"] => Ok(self.sandbox.timeout_secs.to_string()),
            ["sandbox", "watchdog_secs"] => Ok(self.sandbox.watchdog_secs.to_string()),
            ["sandbox", "max_code_chars"] => Ok(self.sandbox.max_code_chars.to_string()),
            ["sandbox", "max_output_bytes"] => Ok(self.sandbox.max_output_bytes.to_string()),
            ["sandbox", "loop_cap"] => Ok(self.sandbox.loop_cap.to_string()),
            ["sandbox", "delay_clamp_secs"] => Ok(self.sandbox.delay_clamp_secs.to_string()),
            ["sandbox", "rewrite"] => Ok(self.sandbox.rewrite.to_string()),
            ["sandbox", "max_concurrent"] => Ok(self.sandbox.max_concurrent.to_string()),
            ["logging", "level"] => Ok(self.logging.level.clone()),
            ["logging", "json"] => Ok(self.logging.json.to_string()),
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
    }

    pub fn set_value(&mut self, key: &str, value: &str) -> Result<()> {
        let parts: Vec<&str> = key.split('.').collect();

        match parts.as_slice() {
            ["server", "port"] => self.server.port = value.parse()?,
            ["server", "bind"] => self.server.bind = value.to_string(),
            ["server", "max_body_bytes"] => self.server.max_body_bytes = value.parse()?,
            ["sandbox", "interpreter"] => self.sandbox.interpreter = value.to_string(),
            ["sandbox", "languages"] => {
                self.sandbox.languages = value
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            }
            ["sandbox", "scratch_dir"] => self.sandbox.scratch_dir = Some(value.to_string()),
            ["sandbox", "timeout_secs"] => self.sandbox.timeout_secs = value.parse()?,
            ["sandbox", "watchdog_secs"] => self.sandbox.watchdog_secs = value.parse()?,
            ["sandbox", "max_code_chars"] => self.sandbox.max_code_chars = value.parse()?,
            ["sandbox", "max_output_bytes"] => self.sandbox.max_output_bytes = value.parse()?,
            ["sandbox", "loop_cap"] => self.sandbox.loop_cap = value.parse()?,
            ["sandbox", "delay_clamp_secs"] => self.sandbox.delay_clamp_secs = value.parse()?,
            ["sandbox", "rewrite"] => self.sandbox.rewrite = value.parse()?,
            ["sandbox", "max_concurrent"] => self.sandbox.max_concurrent = value.parse()?,
            ["logging", "level"] => self.logging.level = value.to_string(),
            ["logging", "json"] => self.logging.json = value.parse()?,
            _ => anyhow::bail!("Unknown config key: {}", key),
        }

        self.validate()
    }
}

/// Default config template with helpful comments (used for first-time setup)
pub const DEFAULT_CONFIG_TEMPLATE: &str = r#"# mdexec Configuration
# Auto-created on first run. Edit as needed.

[server]
port = 31330
bind = "127.0.0.1"
# max_body_bytes = 262144

[sandbox]
interpreter = "python3"
# Fenced code blocks with these language tags are runnable
languages = ["python", "py"]

# Where ephemeral script files are written.
# Default: $XDG_RUNTIME_DIR/mdexec/scratch (override with MDEXEC_SCRATCH_DIR)
# scratch_dir = "/tmp/mdexec"

# The host kills a script after timeout_secs. Rewritten scripts arm an
# in-process alarm after watchdog_secs, which must be lower.
timeout_secs = 30
watchdog_secs = 25

max_code_chars = 10000
# max_output_bytes = 1048576

# Rewrite `while True` loops and sleep() calls before running
rewrite = true
# loop_cap = 10
# delay_clamp_secs = 0.01

# Concurrent executions, 0 = unlimited
max_concurrent = 0

[logging]
level = "info"
# json = false
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_parses_to_defaults() {
        let config: Config = toml::from_str(DEFAULT_CONFIG_TEMPLATE).unwrap();
        assert_eq!(config.server.port, default_port());
        assert_eq!(config.sandbox.timeout_secs, 30);
        assert_eq!(config.sandbox.watchdog_secs, 25);
        assert_eq!(config.sandbox.max_code_chars, 10_000);
        assert_eq!(config.sandbox.languages, vec!["python", "py"]);
        assert!(config.sandbox.rewrite);
        config.validate().unwrap();
    }

    #[test]
    fn empty_file_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.sandbox.interpreter, "python3");
        assert_eq!(config.sandbox.max_concurrent, 0);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn watchdog_must_be_below_timeout() {
        let mut config = Config::default();
        config.sandbox.watchdog_secs = 30;
        assert!(config.validate().is_err());

        config.sandbox.watchdog_secs = 29;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_output_cap_is_rejected() {
        let mut config = Config::default();
        config.sandbox.max_output_bytes = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        assert!(config.set_value("sandbox.max_output_bytes", "0").is_err());
        assert!(config.set_value("sandbox.max_output_bytes", "4096").is_ok());
    }

    #[test]
    fn set_value_validates() {
        let mut config = Config::default();
        config.set_value("sandbox.timeout_secs", "60").unwrap();
        assert_eq!(config.get_value("sandbox.timeout_secs").unwrap(), "60");

        assert!(config.set_value("sandbox.timeout_secs", "10").is_err());
        assert!(config.set_value("sandbox.timeout_secs", "abc").is_err());
        assert!(config.set_value("nope.key", "1").is_err());
    }

    #[test]
    fn languages_roundtrip_through_get_set() {
        let mut config = Config::default();
        config.set_value("sandbox.languages", "python, python3,").unwrap();
        assert_eq!(config.sandbox.languages, vec!["python", "python3"]);
        assert_eq!(config.get_value("sandbox.languages").unwrap(), "python,python3");
    }

    #[test]
    fn scratch_dir_override_wins() {
        let mut config = Config::default();
        config.sandbox.scratch_dir = Some("/srv/scratch".to_string());
        assert_eq!(config.scratch_dir(), PathBuf::from("/srv/scratch"));

        config.sandbox.scratch_dir = Some("  ".to_string());
        assert_eq!(config.scratch_dir(), config.paths.scratch_dir);
    }

    #[test]
    fn load_from_reads_explicit_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("mdexec.toml");
        fs::write(
            &path,
            "[sandbox]\ntimeout_secs = 12\nwatchdog_secs = 10\nscratch_dir = \"/tmp/x\"\n",
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.paths.config_file(), path);

        let policy = config.execution_policy();
        assert_eq!(policy.deadlines.outer().as_secs(), 12);
        assert_eq!(policy.deadlines.watchdog().as_secs(), 10);
        assert_eq!(policy.scratch_dir, PathBuf::from("/tmp/x"));
    }

    #[test]
    fn load_from_rejects_inverted_deadlines() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("mdexec.toml");
        fs::write(&path, "[sandbox]\ntimeout_secs = 5\nwatchdog_secs = 10\n").unwrap();

        let err = Config::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("must exceed"));
    }

    #[test]
    fn load_from_missing_file_fails() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(Config::load_from(&tmp.path().join("absent.toml")).is_err());
    }
}
