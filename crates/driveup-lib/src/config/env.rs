use std::path::PathBuf;
use std::sync::OnceLock;

/// Environment-derived settings, read once per process.
///
/// `DRIVEUP_CONFIG` is a comma-separated list of YAML files (defaults to
/// `config.yaml`); `DRIVEUP_SECRET` overrides the credential secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvConfig {
    pub config_files: Vec<PathBuf>,
    pub secret: Option<String>,
}

static ENV: OnceLock<EnvConfig> = OnceLock::new();

pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";

impl EnvConfig {
    pub fn get() -> &'static EnvConfig {
        ENV.get_or_init(|| {
            Self::parse(
                std::env::var("DRIVEUP_CONFIG").ok(),
                std::env::var("DRIVEUP_SECRET").ok(),
            )
        })
    }

    pub(crate) fn parse(config: Option<String>, secret: Option<String>) -> Self {
        let mut config_files: Vec<PathBuf> = config
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .collect();
        if config_files.is_empty() {
            config_files.push(PathBuf::from(DEFAULT_CONFIG_FILE));
        }
        Self {
            config_files,
            secret: secret.filter(|s| !s.is_empty()),
        }
    }

    /// Files to load: explicit CLI paths win over the environment list.
    pub fn config_files_or<'a>(&'a self, cli: &'a [PathBuf]) -> &'a [PathBuf] {
        if cli.is_empty() {
            &self.config_files
        } else {
            cli
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_defaults() {
        let env = EnvConfig::parse(None, None);
        assert_eq!(env.config_files, vec![PathBuf::from("config.yaml")]);
        assert_eq!(env.secret, None);
    }

    #[test]
    fn test_parse_comma_list() {
        let env = EnvConfig::parse(
            Some("base.yaml, local.yaml,,".into()),
            Some("s3cret".into()),
        );
        assert_eq!(
            env.config_files,
            vec![PathBuf::from("base.yaml"), PathBuf::from("local.yaml")]
        );
        assert_eq!(env.secret.as_deref(), Some("s3cret"));
    }

    #[test]
    fn test_empty_secret_ignored() {
        assert_eq!(EnvConfig::parse(None, Some(String::new())).secret, None);
    }

    #[test]
    fn test_cli_paths_take_precedence() {
        let env = EnvConfig::parse(Some("env.yaml".into()), None);
        let cli = vec![PathBuf::from("cli.yaml")];
        assert_eq!(env.config_files_or(&cli), cli.as_slice());
        assert_eq!(env.config_files_or(&[]), env.config_files.as_slice());
    }
}
