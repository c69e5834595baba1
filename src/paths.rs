//! XDG Base Directory Specification compliant path resolution.
//!
//! Every directory is resolved through a three-level fallback:
//! 1. mdexec-specific env var (MDEXEC_CONFIG_DIR, etc.)
//! 2. XDG env var (XDG_CONFIG_HOME, etc.) via `etcetera`
//! 3. Platform default (~/.config, etc.)
//!
//! All paths are absolute. Relative paths from env vars are ignored per XDG spec.

use anyhow::{Context, Result};
#[cfg(unix)]
use libc::getuid;
use std::path::{Path, PathBuf};

/// Resolved directory paths for the entire application.
///
/// Created once at startup, threaded through Config.
#[derive(Debug, Clone)]
pub struct Paths {
    /// Config directory: config.toml lives here
    pub config_dir: PathBuf,

    /// State directory: logs
    pub state_dir: PathBuf,

    /// Runtime directory. None if no suitable runtime directory is available.
    pub runtime_dir: Option<PathBuf>,

    /// Default home for ephemeral script files.
    /// May be overridden independently via MDEXEC_SCRATCH_DIR.
    pub scratch_dir: PathBuf,

    /// Explicit config file given on the command line
    config_override: Option<PathBuf>,
}

impl Paths {
    /// Resolve all paths using real environment variables.
    pub fn resolve() -> Result<Self> {
        Self::resolve_with_env(|key| std::env::var(key))
    }

    /// Resolve paths with a custom env var lookup (for testing).
    pub fn resolve_with_env<F>(env_fn: F) -> Result<Self>
    where
        F: Fn(&str) -> std::result::Result<String, std::env::VarError>,
    {
        use etcetera::BaseStrategy;

        let strategy = etcetera::choose_base_strategy()
            .map_err(|e| anyhow::anyhow!("Failed to determine base directories: {}", e))?;

        let config_dir = env_or(&env_fn, "MDEXEC_CONFIG_DIR", || {
            strategy.config_dir().join("mdexec")
        });

        let state_dir = env_or(&env_fn, "MDEXEC_STATE_DIR", || {
            let base_state = strategy.state_dir().unwrap_or_else(|| strategy.data_dir());
            base_state.join("mdexec")
        });

        let runtime_dir = resolve_runtime_dir(&env_fn);
        let scratch_dir = resolve_scratch_dir(&env_fn, runtime_dir.as_deref(), &state_dir);

        Ok(Self {
            config_dir,
            state_dir,
            runtime_dir,
            scratch_dir,
            config_override: None,
        })
    }

    /// Point `config_file()` at an explicit file.
    pub fn with_config_file(mut self, path: &Path) -> Self {
        self.config_override = Some(path.to_path_buf());
        self
    }

    /// Config file: the explicit override, else config_dir/config.toml
    pub fn config_file(&self) -> PathBuf {
        self.config_override
            .clone()
            .unwrap_or_else(|| self.config_dir.join("config.toml"))
    }

    /// Logs directory
    pub fn logs_dir(&self) -> PathBuf {
        self.state_dir.join("logs")
    }

    /// Create all directories with appropriate permissions.
    ///
    /// The scratch dir is left alone; artifacts create it on demand.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [&self.config_dir, &self.state_dir] {
            create_dir_with_mode(dir)?;
        }

        if let Some(ref runtime) = self.runtime_dir {
            create_dir_with_mode(runtime)?;
        }

        Ok(())
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::resolve().unwrap_or_else(|_| {
            let home = etcetera::home_dir().unwrap_or_else(|_| PathBuf::from("."));
            let state_dir = home.join(".local").join("state").join("mdexec");
            Self {
                config_dir: home.join(".config").join("mdexec"),
                scratch_dir: std::env::temp_dir().join("mdexec-scratch"),
                state_dir,
                runtime_dir: None,
                config_override: None,
            }
        })
    }
}

/// Resolve an env var with fallback. Ignores empty and relative paths per XDG spec.
fn env_or<F>(env_fn: &F, var: &str, default: impl FnOnce() -> PathBuf) -> PathBuf
where
    F: Fn(&str) -> std::result::Result<String, std::env::VarError>,
{
    env_fn(var)
        .ok()
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .filter(|p| p.is_absolute()) // XDG spec: ignore relative paths
        .unwrap_or_else(default)
}

/// Resolve scratch directory with MDEXEC_SCRATCH_DIR, runtime dir, or state dir.
fn resolve_scratch_dir<F>(env_fn: &F, runtime_dir: Option<&Path>, state_dir: &Path) -> PathBuf
where
    F: Fn(&str) -> std::result::Result<String, std::env::VarError>,
{
    if let Ok(dir) = env_fn("MDEXEC_SCRATCH_DIR") {
        let trimmed = dir.trim();
        if !trimmed.is_empty() {
            let path = PathBuf::from(shellexpand::tilde(trimmed).to_string());
            if path.is_absolute() {
                return path;
            }
        }
    }

    runtime_dir.unwrap_or(state_dir).join("scratch")
}

/// Resolve runtime directory.
fn resolve_runtime_dir<F>(env_fn: &F) -> Option<PathBuf>
where
    F: Fn(&str) -> std::result::Result<String, std::env::VarError>,
{
    if let Ok(dir) = env_fn("XDG_RUNTIME_DIR")
        && !dir.is_empty()
    {
        let path = PathBuf::from(&dir);
        if path.is_absolute() {
            return Some(path.join("mdexec"));
        }
    }

    // Fallback: $TMPDIR/mdexec-$UID on Unix
    #[cfg(unix)]
    {
        let uid = unsafe { getuid() };
        let tmpdir = env_fn("TMPDIR").unwrap_or_else(|_| "/tmp".to_string());
        Some(PathBuf::from(tmpdir).join(format!("mdexec-{}", uid)))
    }

    #[cfg(not(unix))]
    {
        env_fn("TEMP").ok().map(|t| {
            let user = env_fn("USERNAME").unwrap_or_else(|_| "user".into());
            PathBuf::from(t).join(format!("mdexec-{}", user))
        })
    }
}

/// Create a directory with mode 0700 per XDG spec.
fn create_dir_with_mode(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path)
        .with_context(|| format!("Failed to create directory: {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
            .with_context(|| format!("Failed to set permissions on {}", path.display()))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn make_env(
        map: HashMap<&str, &str>,
    ) -> impl Fn(&str) -> std::result::Result<String, std::env::VarError> {
        move |key: &str| {
            map.get(key)
                .map(|v| v.to_string())
                .ok_or(std::env::VarError::NotPresent)
        }
    }

    #[test]
    fn default_paths_are_xdg_compliant() {
        let paths = Paths::resolve_with_env(make_env(HashMap::new())).unwrap();

        assert!(paths.config_dir.ends_with("mdexec"), "{:?}", paths.config_dir);
        assert!(paths.state_dir.ends_with("mdexec"), "{:?}", paths.state_dir);
        assert!(paths.scratch_dir.ends_with("scratch"));
        assert!(paths.config_file().ends_with("config.toml"));
    }

    #[test]
    fn env_vars_override_xdg() {
        let mut env: HashMap<&str, &str> = HashMap::new();
        env.insert("MDEXEC_CONFIG_DIR", "/custom/config");
        env.insert("MDEXEC_STATE_DIR", "/custom/state");

        let paths = Paths::resolve_with_env(make_env(env)).unwrap();
        assert_eq!(paths.config_dir, PathBuf::from("/custom/config"));
        assert_eq!(paths.state_dir, PathBuf::from("/custom/state"));
        assert_eq!(paths.logs_dir(), PathBuf::from("/custom/state/logs"));
    }

    #[test]
    fn relative_paths_are_ignored() {
        let mut env: HashMap<&str, &str> = HashMap::new();
        env.insert("MDEXEC_CONFIG_DIR", "relative/path");
        env.insert("MDEXEC_SCRATCH_DIR", "also/relative");

        let paths = Paths::resolve_with_env(make_env(env)).unwrap();
        assert!(paths.config_dir.is_absolute());
        assert!(paths.scratch_dir.is_absolute());
    }

    #[test]
    fn scratch_dir_prefers_runtime_dir() {
        let mut env: HashMap<&str, &str> = HashMap::new();
        env.insert("XDG_RUNTIME_DIR", "/run/user/1000");

        let paths = Paths::resolve_with_env(make_env(env)).unwrap();
        assert_eq!(paths.runtime_dir, Some(PathBuf::from("/run/user/1000/mdexec")));
        assert_eq!(paths.scratch_dir, PathBuf::from("/run/user/1000/mdexec/scratch"));
    }

    #[test]
    fn scratch_dir_override() {
        let mut env: HashMap<&str, &str> = HashMap::new();
        env.insert("XDG_RUNTIME_DIR", "/run/user/1000");
        env.insert("MDEXEC_SCRATCH_DIR", "/var/tmp/mdexec");

        let paths = Paths::resolve_with_env(make_env(env)).unwrap();
        assert_eq!(paths.scratch_dir, PathBuf::from("/var/tmp/mdexec"));
    }

    #[test]
    fn explicit_config_file() {
        let paths = Paths::resolve_with_env(make_env(HashMap::new()))
            .unwrap()
            .with_config_file(Path::new("/etc/mdexec.toml"));
        assert_eq!(paths.config_file(), PathBuf::from("/etc/mdexec.toml"));
    }

    #[test]
    fn empty_env_vars_ignored() {
        let mut env: HashMap<&str, &str> = HashMap::new();
        env.insert("MDEXEC_CONFIG_DIR", "");

        let paths = Paths::resolve_with_env(make_env(env)).unwrap();
        assert!(paths.config_dir.is_absolute());
        assert!(paths.config_dir.ends_with("mdexec"));
    }
}
