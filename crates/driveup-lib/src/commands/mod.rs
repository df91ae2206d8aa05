pub mod accounts;
pub mod login;
pub mod quota;
pub mod services;
pub mod upload;

use clap::{ArgMatches, Command};

use crate::errors::{DriveUpError, Result};
pub use services::Services;

/// Attach every subcommand to `root`.
pub fn register_commands(root: Command) -> Command {
    root.subcommand(upload::upload_command())
        .subcommand(quota::quota_command())
        .subcommand(accounts::accounts_command())
        .subcommand(login::login_command())
}

/// Route a parsed subcommand to its handler.
pub async fn dispatch_command(name: &str, matches: &ArgMatches, services: &Services) -> Result<()> {
    match name {
        "upload" => upload::handle_upload(matches, services).await?,
        "quota" => quota::handle_quota(matches, services).await?,
        "accounts" => accounts::handle_accounts(matches, services)?,
        "login" => login::handle_login(matches, services).await?,
        other => return Err(DriveUpError::Config(format!("unknown command '{other}'"))),
    }
    Ok(())
}
