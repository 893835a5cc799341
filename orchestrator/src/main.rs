//! stackpilot - Entry Point
//!
//! Deploys a compose application stack to a cloud VM, an SSH host or this
//! machine, and runs its update, backup and status commands.

use std::env;
use std::process::ExitCode;

use anyhow::Context;
use colored::Colorize;
use tracing::{error, info};

use stackpilot::app::options::{split_args, AppOptions};
use stackpilot::app::run::run;
use stackpilot::console::spawn_presenter;
use stackpilot::events;
use stackpilot::filesys::file::File;
use stackpilot::logs::{init_logging, LogOptions};
use stackpilot::storage::layout::StorageLayout;
use stackpilot::storage::settings::Settings;
use stackpilot::utils::version_info;

const USAGE: &str = "usage: stackpilot <command> [--key=value ...]

commands:
  deploy --env=cloud|ssh|local
  update [--no-rollback]
  backup create|list|restore --id=<id>|delete --id=<id>
  status
  destroy
  shell

options:
  --config=<path>   settings file
  --verbose         show debug events
  --version         print version information";

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = env::args().skip(1).collect();
    let (_, flags) = split_args(&args);

    // Print version and exit
    if flags.contains_key("version") {
        match serde_json::to_string_pretty(&version_info()) {
            Ok(version) => println!("{}", version),
            Err(e) => eprintln!("{}", e),
        }
        return ExitCode::SUCCESS;
    }

    let options = match AppOptions::parse(&args) {
        Ok(options) => options,
        Err(e) => {
            eprintln!("{}\n\n{}", e, USAGE);
            return ExitCode::from(2);
        }
    };

    // Retrieve the settings file
    let layout = StorageLayout::default();
    if let Err(e) = layout.setup().await {
        eprintln!("Unable to create {}: {}", layout.base_dir.display(), e);
    }
    let settings_file = match &options.settings_file {
        Some(path) => File::new(path),
        None => layout.settings_file(),
    };
    let settings = match load_settings(&settings_file).await {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("{:#}", e);
            return ExitCode::FAILURE;
        }
    };

    // Initialize logging
    let log_options = LogOptions {
        log_level: settings.log_level,
        stderr: options.verbose,
        log_dir: Some(layout.logs_dir()),
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            None
        }
    };
    info!("Running {:?}", options.command);

    let (emitter, receiver) = events::channel(events::DEFAULT_CAPACITY);
    let presenter = spawn_presenter(receiver, options.verbose);

    let result = run(options, settings, layout, emitter).await;
    // `run` consumed the last emitter, so the presenter drains and exits
    if let Err(e) = presenter.await {
        error!("Presenter task failed: {}", e);
    }

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Command failed: {}", e);
            eprintln!("{} {}", "✗".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

/// Settings from `file`, or the defaults when it does not exist
async fn load_settings(file: &File) -> anyhow::Result<Settings> {
    if !file.exists().await {
        return Ok(Settings::default());
    }
    file.read_json::<Settings>()
        .await
        .with_context(|| format!("unable to read settings file {}", file.path().display()))
}
