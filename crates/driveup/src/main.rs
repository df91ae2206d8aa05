use driveup_lib::cli::{config_paths, create_root_command, is_json, is_log_json, is_verbose};
use driveup_lib::commands::{dispatch_command, register_commands, Services};
use driveup_lib::config::{EnvConfig, Settings};
use driveup_lib::errors::handle_command_error;
use driveup_lib::signal::SignalHandler;

#[tokio::main]
async fn main() {
    // Step 1: Parse arguments
    let matches = register_commands(create_root_command()).get_matches();

    // Step 2: Initialize Logger
    driveup_lib::logger::init(is_verbose(&matches), is_log_json(&matches));

    let Some((name, sub_matches)) = matches.subcommand() else {
        // No subcommand, print help
        if let Err(e) = register_commands(create_root_command()).print_help() {
            driveup_lib::output::error(&format!("Failed to print help: {e}"));
            std::process::exit(1);
        }
        return;
    };

    // Step 3: Spawn SignalHandler
    let cancel = SignalHandler::install();

    // Step 4: Load settings (CLI paths win over DRIVEUP_CONFIG)
    let env = EnvConfig::get();
    let cli_paths = config_paths(&matches);
    let paths = env.config_files_or(&cli_paths);
    let services = Settings::load(paths).and_then(|settings| {
        Services::new(settings, env.secret.clone(), is_json(&matches), cancel)
    });
    let services = match services {
        Ok(services) => services,
        Err(e) => {
            handle_command_error(&e);
            std::process::exit(1);
        }
    };

    // Step 5: Dispatch to subcommand handler
    tracing::debug!(command = name, "Executing command");
    if let Err(e) = dispatch_command(name, sub_matches, &services).await {
        handle_command_error(&e);
        std::process::exit(1);
    }
}
