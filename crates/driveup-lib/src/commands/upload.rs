//! `upload` CLI command: send one local file to a configured account.

use std::path::PathBuf;

use clap::{Arg, ArgMatches, Command};

use crate::commands::services::Services;
use crate::errors::{DriveUpError, Result};
use crate::output;
use crate::upload::{UploadResult, UploadTask, Uploader};
use crate::utils::format_bytes;

/// Build the `upload` clap command.
pub fn upload_command() -> Command {
    Command::new("upload")
        .about("Upload a file, pruning old copies and freeing trash when needed")
        .aliases(["up", "u"])
        .arg(
            Arg::new("file")
                .required(true)
                .value_name("FILE")
                .value_parser(clap::value_parser!(PathBuf))
                .help("Local file to upload"),
        )
        .arg(
            Arg::new("account")
                .short('a')
                .long("account")
                .value_name("ID")
                .help("Target account id (defaults to the first enabled account)"),
        )
}

/// Build the task described by parsed `upload` arguments.
pub fn task_from_matches(matches: &ArgMatches) -> Result<UploadTask> {
    let path = matches
        .get_one::<PathBuf>("file")
        .cloned()
        .ok_or_else(|| DriveUpError::Config("missing FILE argument".into()))?;
    let task = UploadTask::new(path);
    Ok(match matches.get_one::<String>("account") {
        Some(id) => task.to_account(id.clone()),
        None => task,
    })
}

/// Handle the `upload` command.
pub async fn handle_upload(matches: &ArgMatches, services: &Services) -> Result<()> {
    let task = task_from_matches(matches)?;
    let registry = services.registry().await?;

    let result = Uploader::new(registry)
        .with_progress_interval(services.settings.progress_interval())
        .upload(&task, &services.cancel)
        .await?;

    if services.json {
        output::json(&result)
    } else {
        print_result(&result);
        Ok(())
    }
}

fn print_result(result: &UploadResult) {
    output::success(&format!("Uploaded {}", result.name));
    output::field("Account", &result.account_id);
    output::field("File ID", &result.file_id);
    output::field("Size", &format_bytes(result.size));
    output::field("Location", &result.location_url);
}
