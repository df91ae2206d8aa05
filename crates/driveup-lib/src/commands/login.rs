//! `login` CLI command: authorize accounts ahead of time.
//!
//! Building a registry runs the token flow for every selected account, so a
//! successful build means each token is cached on disk.

use clap::{Arg, ArgMatches, Command};
use serde::Serialize;

use crate::commands::services::Services;
use crate::errors::{DriveUpError, Result};
use crate::output;

pub fn login_command() -> Command {
    Command::new("login")
        .about("Authorize accounts and cache their tokens")
        .aliases(["auth"])
        .arg(
            Arg::new("account")
                .short('a')
                .long("account")
                .value_name("ID")
                .help("Only authorize this account"),
        )
}

#[derive(Debug, Serialize)]
struct LoginSummary {
    authorized: Vec<String>,
}

/// Handle the `login` command.
pub async fn handle_login(matches: &ArgMatches, services: &Services) -> Result<()> {
    let account = matches.get_one::<String>("account").map(String::as_str);
    let mut selected = services.select_accounts(account)?;
    if let Some(id) = account {
        if selected.iter().all(|a| !a.enable) {
            return Err(DriveUpError::Config(format!("account '{id}' is disabled")));
        }
    }
    selected.retain(|a| a.enable);

    let registry = services.build_registry(&selected).await?;
    let summary = LoginSummary {
        authorized: registry.handles().iter().map(|h| h.id().to_string()).collect(),
    };

    if services.json {
        return output::json(&summary);
    }
    for id in &summary.authorized {
        output::success(&format!("Authorized {id}"));
    }
    let skipped = selected.len() - summary.authorized.len();
    if skipped > 0 {
        output::warning(&format!("{skipped} account(s) could not be authorized"));
    }
    Ok(())
}
