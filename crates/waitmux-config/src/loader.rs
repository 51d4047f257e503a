use crate::schema::WaitmuxConfig;
use anyhow::{anyhow, bail, Context, Result};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Jsonc,
    Json,
    Yaml,
}

impl ConfigFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?;

        match ext {
            "jsonc" => Some(Self::Jsonc),
            "json" => Some(Self::Json),
            "yml" | "yaml" => Some(Self::Yaml),
            _ => None,
        }
    }
}

/// A loaded configuration and where it came from. `path` is `None` when no
/// file was found and defaults are in effect.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub config: WaitmuxConfig,
    pub path: Option<PathBuf>,
    pub format: Option<ConfigFormat>,
}

pub fn load_config(config_path: Option<&Path>) -> Result<WaitmuxConfig> {
    resolve_config(config_path).map(|r| r.config)
}

/// Load from `config_path` if given (it must exist), otherwise from the first
/// candidate file found, otherwise defaults.
pub fn resolve_config(config_path: Option<&Path>) -> Result<ResolvedConfig> {
    if let Some(path) = config_path {
        if !path.exists() {
            bail!("Config file not found: {}", path.display());
        }
        return load_config_from_file(path);
    }

    match find_config_file() {
        Some(path) => load_config_from_file(&path),
        None => {
            let mut config = WaitmuxConfig::default();
            config.daemon.validate();
            Ok(ResolvedConfig {
                config,
                path: None,
                format: None,
            })
        }
    }
}

pub fn load_config_from_file(path: &Path) -> Result<ResolvedConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let format = ConfigFormat::from_path(path)
        .ok_or_else(|| anyhow!("Unknown config format for: {}", path.display()))?;

    let mut config = expand_env_vars(parse_config_content(&content, format)?);
    config.daemon.validate();

    Ok(ResolvedConfig {
        config,
        path: Some(path.to_path_buf()),
        format: Some(format),
    })
}

fn parse_config_content(content: &str, format: ConfigFormat) -> Result<WaitmuxConfig> {
    match format {
        ConfigFormat::Jsonc => json5::from_str(content).context("Failed to parse JSONC"),
        ConfigFormat::Json => serde_json::from_str(content).context("Failed to parse JSON"),
        ConfigFormat::Yaml => serde_yaml_ng::from_str(content).context("Failed to parse YAML"),
    }
}

const CONFIG_CANDIDATES: &[&str] = &[
    "waitmux.jsonc",
    "waitmux.json",
    "waitmux.yml",
    "waitmux.yaml",
    ".waitmux.jsonc",
    ".waitmux.json",
    ".waitmux.yml",
    ".waitmux.yaml",
];

fn candidate_dirs() -> Vec<PathBuf> {
    let mut dirs = vec![PathBuf::new()];
    if let Ok(home) = env::var("HOME") {
        dirs.push(PathBuf::from(home).join(".config").join("waitmux"));
    }
    dirs
}

pub fn find_config_file() -> Option<PathBuf> {
    candidate_dirs().into_iter().find_map(|dir| {
        CONFIG_CANDIDATES
            .iter()
            .map(|candidate| dir.join(candidate))
            .find(|path| path.exists())
    })
}

fn expand_env_vars(mut config: WaitmuxConfig) -> WaitmuxConfig {
    config.daemon.tmux_bin = expand_env_string(&config.daemon.tmux_bin);
    config.daemon.state_dir = config
        .daemon
        .state_dir
        .map(|dir| PathBuf::from(expand_env_string(&dir.to_string_lossy())));
    config
}

fn expand_env_string(s: &str) -> String {
    let mut result = String::new();
    let mut chars = s.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '$' {
            result.push(ch);
            continue;
        }

        if chars.peek() == Some(&'{') {
            chars.next();
            let var_name: String = chars.by_ref().take_while(|&c| c != '}').collect();
            match env::var(&var_name) {
                Ok(value) => result.push_str(&value),
                Err(_) => {
                    result.push_str("${");
                    result.push_str(&var_name);
                    result.push('}');
                }
            }
            continue;
        }

        let mut var_name = String::new();
        while let Some(&c) = chars.peek() {
            if c.is_alphanumeric() || c == '_' {
                var_name.push(c);
                chars.next();
            } else {
                break;
            }
        }
        match env::var(&var_name) {
            Ok(value) if !var_name.is_empty() => result.push_str(&value),
            _ => {
                result.push('$');
                result.push_str(&var_name);
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_expand_env_string_with_braces() {
        env::set_var("WAITMUX_TEST_DIR", "/srv/waitmux");
        let result = expand_env_string("${WAITMUX_TEST_DIR}/state");
        assert_eq!(result, "/srv/waitmux/state");
    }

    #[test]
    fn test_expand_env_string_without_braces() {
        env::set_var("WAITMUX_TEST_BIN", "/opt/tmux/bin");
        let result = expand_env_string("$WAITMUX_TEST_BIN/tmux");
        assert_eq!(result, "/opt/tmux/bin/tmux");
    }

    #[test]
    fn test_expand_env_string_missing_var() {
        let result = expand_env_string("${WAITMUX_NONEXISTENT}/x and $WAITMUX_ALSO_MISSING");
        assert_eq!(result, "${WAITMUX_NONEXISTENT}/x and $WAITMUX_ALSO_MISSING");
    }

    #[test]
    fn test_expand_env_string_lone_dollar() {
        assert_eq!(expand_env_string("cost $ 5"), "cost $ 5");
    }

    #[test]
    fn test_config_format_from_path() {
        assert_eq!(
            ConfigFormat::from_path(Path::new("waitmux.jsonc")),
            Some(ConfigFormat::Jsonc)
        );
        assert_eq!(
            ConfigFormat::from_path(Path::new("waitmux.json")),
            Some(ConfigFormat::Json)
        );
        assert_eq!(
            ConfigFormat::from_path(Path::new("waitmux.yaml")),
            Some(ConfigFormat::Yaml)
        );
        assert_eq!(ConfigFormat::from_path(Path::new("waitmux.toml")), None);
    }

    #[test]
    fn test_load_jsonc_with_comments() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("waitmux.jsonc");
        fs::write(
            &path,
            r#"{
  // poll faster while debugging
  "daemon": { "poll_interval_secs": 5, "resume_sequence": ["Enter"] }
}"#,
        )
        .unwrap();

        let resolved = load_config_from_file(&path).unwrap();
        assert_eq!(resolved.format, Some(ConfigFormat::Jsonc));
        assert_eq!(resolved.config.daemon.poll_interval_secs, 5);
        assert_eq!(resolved.config.daemon.resume_sequence, vec!["Enter"]);
    }

    #[test]
    fn test_load_yaml_validates_values() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("waitmux.yml");
        fs::write(
            &path,
            r#"
daemon:
  poll_interval_secs: 0
  max_panes: 2
telemetry:
  level: debug
"#,
        )
        .unwrap();

        let resolved = load_config_from_file(&path).unwrap();
        assert_eq!(resolved.config.daemon.poll_interval_secs, 1);
        assert_eq!(resolved.config.daemon.max_panes, 2);
        assert_eq!(resolved.config.telemetry.level, "debug");
    }

    #[test]
    fn test_state_dir_is_env_expanded() {
        env::set_var("WAITMUX_TEST_HOME", "/home/someone");
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("waitmux.json");
        fs::write(
            &path,
            r#"{"daemon": {"state_dir": "${WAITMUX_TEST_HOME}/.waitmux/state"}}"#,
        )
        .unwrap();

        let resolved = load_config_from_file(&path).unwrap();
        assert_eq!(
            resolved.config.daemon.state_dir,
            Some(PathBuf::from("/home/someone/.waitmux/state"))
        );
    }

    #[test]
    fn test_explicit_missing_path_is_an_error() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope.json");
        assert!(resolve_config(Some(&missing)).is_err());
    }

    #[test]
    fn test_invalid_json_reports_parse_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("waitmux.json");
        fs::write(&path, "{ not json").unwrap();

        let err = load_config_from_file(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse JSON"));
    }
}
