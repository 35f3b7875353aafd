use anyhow::{Result, bail};
use clap::{ArgMatches, CommandFactory, FromArgMatches, parser::ValueSource};
use isofetch_core::DownloadOptions;

use crate::app_config::{FileConfig, VerbositySetting};
use crate::cli::Args;

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct CliValueSources {
    pub(crate) output_dir: bool,
    pub(crate) connections: bool,
    pub(crate) chunk_size: bool,
    pub(crate) no_http2: bool,
    pub(crate) no_compression: bool,
    pub(crate) max_retries: bool,
    pub(crate) verbose: bool,
    pub(crate) quiet: bool,
}

pub(crate) fn parse_cli_with_sources() -> (Args, CliValueSources) {
    let command = Args::command();
    let matches = command.get_matches();
    let args = Args::from_arg_matches(&matches).unwrap_or_else(|err| err.exit());
    let sources = sources_from_matches(&matches);
    (args, sources)
}

fn sources_from_matches(matches: &ArgMatches) -> CliValueSources {
    CliValueSources {
        output_dir: is_commandline_value(matches, "output_dir"),
        connections: is_commandline_value(matches, "connections"),
        chunk_size: is_commandline_value(matches, "chunk_size"),
        no_http2: is_commandline_value(matches, "no_http2"),
        no_compression: is_commandline_value(matches, "no_compression"),
        max_retries: is_commandline_value(matches, "max_retries"),
        verbose: is_commandline_value(matches, "verbose"),
        quiet: is_commandline_value(matches, "quiet"),
    }
}

fn is_commandline_value(matches: &ArgMatches, id: &str) -> bool {
    matches.value_source(id) == Some(ValueSource::CommandLine)
}

/// Fills every value the user did not pass explicitly from the config file.
pub(crate) fn apply_config_defaults(
    mut args: Args,
    cli_sources: &CliValueSources,
    file_config: Option<&FileConfig>,
) -> Result<Args> {
    if let Some(file_config) = file_config {
        if !cli_sources.output_dir
            && let Some(output_dir) = &file_config.output_dir
        {
            args.output_dir = output_dir.clone();
        }

        if !cli_sources.connections
            && let Some(connections) = file_config.connections
        {
            args.connections = u16::try_from(connections).unwrap_or(u16::MAX);
        }

        if !cli_sources.chunk_size
            && let Some(chunk_size) = file_config.chunk_size
        {
            args.chunk_size = chunk_size;
        }

        if !cli_sources.no_http2
            && let Some(http2) = file_config.http2
        {
            args.no_http2 = !http2;
        }

        if !cli_sources.no_compression
            && let Some(compression) = file_config.compression
        {
            args.no_compression = !compression;
        }

        if !cli_sources.max_retries
            && let Some(max_retries) = file_config.max_retries
        {
            args.max_retries = max_retries;
        }

        if !cli_sources.verbose
            && !cli_sources.quiet
            && let Some(verbosity) = file_config.verbosity
        {
            apply_config_verbosity(&mut args, verbosity);
        }
    }

    if !(1..=64).contains(&args.connections) {
        bail!(
            "Invalid effective connections value: {}. Expected range: 1..=64",
            args.connections
        );
    }

    Ok(args)
}

fn apply_config_verbosity(args: &mut Args, verbosity: VerbositySetting) {
    match verbosity {
        VerbositySetting::Default => {
            args.quiet = false;
            args.verbose = 0;
        }
        VerbositySetting::Verbose => {
            args.quiet = false;
            args.verbose = 1;
        }
        VerbositySetting::Quiet => {
            args.quiet = true;
            args.verbose = 0;
        }
        VerbositySetting::Debug => {
            args.quiet = false;
            args.verbose = 2;
        }
    }
}

pub(crate) fn resolve_default_log_level(args: &Args) -> &'static str {
    if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}

/// Engine options for the merged CLI/config values.
pub(crate) fn build_download_options(args: &Args, show_progress: bool) -> DownloadOptions {
    DownloadOptions {
        connections: usize::from(args.connections),
        chunk_size_bytes: args.chunk_size,
        use_http2: !args.no_http2,
        use_compression: !args.no_compression,
        max_retries: args.max_retries,
        expected_sha256: args.sha256.clone(),
        show_progress,
        sync_on_checkpoint: args.sync,
        ..DownloadOptions::default()
    }
}
