use std::path::PathBuf;

/// Creates the root clap Command with the global flags.
///
/// `--json` switches results on stdout to JSON; `--log-json` does the same
/// for the log stream on stderr.
pub fn create_root_command() -> clap::Command {
    clap::Command::new("driveup")
        .about("Upload files to Google Drive accounts with retention and quota management")
        .version(env!("CARGO_PKG_VERSION"))
        .arg(
            clap::Arg::new("verbose")
                .short('v')
                .long("verbose")
                .global(true)
                .action(clap::ArgAction::SetTrue)
                .help("Enable debug logging"),
        )
        .arg(
            clap::Arg::new("json")
                .long("json")
                .global(true)
                .action(clap::ArgAction::SetTrue)
                .help("Print results as JSON"),
        )
        .arg(
            clap::Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(clap::ArgAction::SetTrue)
                .help("Write logs as JSON lines"),
        )
        .arg(
            clap::Arg::new("config")
                .short('c')
                .long("config")
                .global(true)
                .value_name("FILE")
                .value_parser(clap::value_parser!(PathBuf))
                .action(clap::ArgAction::Append)
                .help("Config file; repeat to overlay later files on earlier ones"),
        )
}

/// Returns whether debug logging was requested.
pub fn is_verbose(matches: &clap::ArgMatches) -> bool {
    matches.get_flag("verbose")
}

pub fn is_json(matches: &clap::ArgMatches) -> bool {
    matches.get_flag("json")
}

pub fn is_log_json(matches: &clap::ArgMatches) -> bool {
    matches.get_flag("log-json")
}

/// Config files given with `-c`, in order.
pub fn config_paths(matches: &clap::ArgMatches) -> Vec<PathBuf> {
    matches
        .get_many::<PathBuf>("config")
        .map(|paths| paths.cloned().collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_command_flags() {
        let matches = create_root_command()
            .try_get_matches_from(["driveup", "--verbose", "--json", "--log-json"])
            .unwrap();
        assert!(is_verbose(&matches));
        assert!(is_json(&matches));
        assert!(is_log_json(&matches));
    }

    #[test]
    fn test_short_verbose_flag() {
        let matches = create_root_command()
            .try_get_matches_from(["driveup", "-v"])
            .unwrap();
        assert!(is_verbose(&matches));
        assert!(!is_json(&matches));
    }

    #[test]
    fn test_config_is_repeatable_and_ordered() {
        let matches = create_root_command()
            .try_get_matches_from(["driveup", "-c", "base.yaml", "--config", "local.yaml"])
            .unwrap();
        assert_eq!(
            config_paths(&matches),
            vec![PathBuf::from("base.yaml"), PathBuf::from("local.yaml")]
        );
    }

    #[test]
    fn test_no_flags() {
        let matches = create_root_command()
            .try_get_matches_from(["driveup"])
            .unwrap();
        assert!(!is_verbose(&matches));
        assert!(config_paths(&matches).is_empty());
    }
}
