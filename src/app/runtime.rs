use std::io::{self, IsTerminal};

use anyhow::{Context, Result};
use isofetch_core::filename::FALLBACK_FILENAME;
use isofetch_core::{DownloadEngine, file_name_from_url};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::ProcessExit;
use crate::app::{config_runtime, exit_handler, output, terminal};
use crate::app_config;
use crate::cli::Args;

pub(crate) async fn run_isofetch() -> Result<ProcessExit> {
    let (args, cli_sources) = config_runtime::parse_cli_with_sources();

    let loaded = app_config::load_default_file_config()?;
    let args = config_runtime::apply_config_defaults(args, &cli_sources, loaded.config.as_ref())?;

    let default_level = config_runtime::resolve_default_log_level(&args);
    terminal::init_tracing(default_level, terminal::no_color_env_requested());

    if let (Some(path), Some(config)) = (&loaded.path, &loaded.config) {
        debug!(
            path = %path.display(),
            verbosity = config.verbosity.map_or("unset", |v| v.as_str()),
            "Loaded config file"
        );
    }
    debug!(?args, "CLI arguments resolved");

    let show_progress = terminal::should_show_progress(
        io::stderr().is_terminal(),
        args.quiet,
        args.no_progress,
        terminal::is_dumb_terminal(),
    );
    let options = config_runtime::build_download_options(&args, show_progress);

    let cancel = CancellationToken::new();
    let engine = DownloadEngine::new(options)
        .context("Invalid download options")?
        .with_output_dir(args.output_dir.clone())
        .with_cancellation(cancel.clone());

    let file_name = resolve_file_name(&args);
    info!(url = %args.url, file = %file_name, "isofetch starting");

    let interrupt_listener = spawn_interrupt_listener(cancel);
    let result = engine.download(&args.url, &file_name).await;
    interrupt_listener.abort();
    engine.pool().shutdown();

    let exit = exit_handler::determine_exit_outcome(&result);
    match result {
        Ok(summary) => {
            if !args.quiet {
                for line in output::format_summary(&summary) {
                    println!("{line}");
                }
            }
        }
        Err(err) if err.is_cancelled() => {
            eprintln!("{}", exit_handler::INTERRUPTED_MESSAGE);
        }
        Err(err) => {
            error!(error = %err, "download failed");
            eprintln!("Error: {err}");
        }
    }
    Ok(exit)
}

fn resolve_file_name(args: &Args) -> String {
    if let Some(name) = &args.output {
        return name.clone();
    }
    Url::parse(&args.url).map_or_else(
        |_| FALLBACK_FILENAME.to_string(),
        |url| file_name_from_url(&url),
    )
}

fn spawn_interrupt_listener(cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("Interrupt received, saving progress");
                cancel.cancel();
            }
            Err(err) => debug!(error = %err, "Ctrl-C listener unavailable"),
        }
    })
}
