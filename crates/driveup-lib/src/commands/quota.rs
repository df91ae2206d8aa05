//! `quota` CLI command: show storage usage per account.

use clap::{Arg, ArgMatches, Command};
use serde::Serialize;

use crate::commands::services::Services;
use crate::errors::Result;
use crate::output;
use crate::signal::cancellable;
use crate::space::{self, StorageQuota};
use crate::utils::{format_bytes, percent};

pub fn quota_command() -> Command {
    Command::new("quota")
        .about("Show storage quota of the configured accounts")
        .aliases(["q", "space"])
        .arg(
            Arg::new("account")
                .short('a')
                .long("account")
                .value_name("ID")
                .help("Only show this account"),
        )
}

#[derive(Debug, Serialize)]
struct AccountQuota<'a> {
    account_id: &'a str,
    #[serde(flatten)]
    quota: StorageQuota,
}

/// Handle the `quota` command.
pub async fn handle_quota(matches: &ArgMatches, services: &Services) -> Result<()> {
    let registry = services.registry().await?;
    let selected = match matches.get_one::<String>("account") {
        Some(id) => vec![registry.resolve(Some(id))?],
        None => registry.handles().iter().collect(),
    };

    let mut rows = Vec::with_capacity(selected.len());
    for handle in selected {
        let quota = cancellable(&services.cancel, space::get_quota(handle)).await?;
        rows.push(AccountQuota {
            account_id: handle.id(),
            quota,
        });
    }

    if services.json {
        return output::json(&rows);
    }
    for row in &rows {
        print_quota(row);
    }
    Ok(())
}

fn print_quota(row: &AccountQuota<'_>) {
    let q = &row.quota;
    output::info(row.account_id);
    if q.is_unlimited() {
        output::field("Total", "unlimited");
        output::field("Used", &format_bytes(q.used_bytes));
    } else {
        output::field("Total", &format_bytes(q.total_bytes));
        output::field(
            "Used",
            &format!(
                "{} ({:.1}%)",
                format_bytes(q.used_bytes),
                percent(q.used_bytes, q.total_bytes)
            ),
        );
        output::field("Free", &format_bytes(q.free_bytes));
    }
    output::field("In trash", &format_bytes(q.used_in_trash_bytes));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_command_parses() {
        let matches = quota_command().try_get_matches_from(["quota"]).unwrap();
        assert!(matches.get_one::<String>("account").is_none());

        let matches = quota_command()
            .try_get_matches_from(["quota", "--account", "main"])
            .unwrap();
        assert_eq!(matches.get_one::<String>("account").unwrap(), "main");
    }

    #[test]
    fn test_account_quota_serializes_flat() {
        let row = AccountQuota {
            account_id: "main",
            quota: StorageQuota {
                total_bytes: 100,
                used_bytes: 40,
                free_bytes: 60,
                used_in_trash_bytes: 5,
            },
        };
        let value = serde_json::to_value(&row).unwrap();
        assert_eq!(value["account_id"], "main");
        assert_eq!(value["free_bytes"], 60);
    }
}
