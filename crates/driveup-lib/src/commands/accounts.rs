//! `accounts` CLI command: list configured accounts without authenticating.

use clap::{ArgMatches, Command};
use serde::Serialize;

use crate::commands::services::Services;
use crate::config::AccountConfig;
use crate::errors::Result;
use crate::output;

pub fn accounts_command() -> Command {
    Command::new("accounts")
        .about("List configured accounts")
        .aliases(["ls", "list"])
}

#[derive(Debug, PartialEq, Eq, Serialize)]
struct AccountRow<'a> {
    id: &'a str,
    enabled: bool,
    default: bool,
    folder_id: Option<&'a str>,
    upload_copies_count: u32,
    credentials_file: String,
}

fn rows(accounts: &[AccountConfig]) -> Vec<AccountRow<'_>> {
    let default_id = accounts.iter().find(|a| a.enable).map(|a| a.id.as_str());
    accounts
        .iter()
        .map(|a| AccountRow {
            id: &a.id,
            enabled: a.enable,
            default: Some(a.id.as_str()) == default_id,
            folder_id: a.destination_folder(),
            upload_copies_count: a.upload_copies_count,
            credentials_file: a.credentials_file.display().to_string(),
        })
        .collect()
}

/// Handle the `accounts` command.
pub fn handle_accounts(_matches: &ArgMatches, services: &Services) -> Result<()> {
    let rows = rows(&services.settings.accounts);
    if services.json {
        return output::json(&rows);
    }
    if rows.is_empty() {
        output::warning("No accounts configured");
        return Ok(());
    }
    for row in &rows {
        let mut title = row.id.to_string();
        if row.default {
            title.push_str(" (default)");
        }
        if !row.enabled {
            title.push_str(" [disabled]");
        }
        output::info(&title);
        output::field("Folder", row.folder_id.unwrap_or("root"));
        output::field("Copies kept", &row.upload_copies_count.to_string());
        output::field("Credentials", &row.credentials_file);
    }
    Ok(())
}
