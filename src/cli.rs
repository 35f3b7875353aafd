//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{ArgAction, Parser};
use isofetch_core::download::constants::MIN_CHUNK_SIZE_BYTES;

/// Resumable multi-connection downloader for large files
#[derive(Parser, Debug)]
#[command(name = "isofetch")]
#[command(author, version, about)]
#[command(
    long_about = "Downloads one large file over HTTP/2 or HTTP/1.1 using parallel byte-range \
requests. Interrupted downloads leave a .tmp file and a .crdownload sidecar and resume on the \
next run with the same URL and output."
)]
pub struct Args {
    /// URL to download (http or https)
    pub url: String,

    /// Output file name (default: last URL path segment)
    #[arg(short = 'o', long = "output")]
    pub output: Option<String>,

    /// Directory the file is written into
    #[arg(short = 'd', long = "output-dir", default_value = "downloads")]
    pub output_dir: PathBuf,

    /// Parallel connections for ranged downloads (1-64)
    #[arg(
        short = 'c',
        long = "connections",
        default_value_t = 8,
        value_parser = clap::value_parser!(u16).range(1..=64)
    )]
    pub connections: u16,

    /// Files smaller than this many bytes use a single stream
    #[arg(
        long = "chunk-size",
        default_value_t = 1_048_576,
        value_parser = clap::value_parser!(u64).range(MIN_CHUNK_SIZE_BYTES..)
    )]
    pub chunk_size: u64,

    /// Skip HTTP/2 and use HTTP/1.1 only
    #[arg(long = "no-http2")]
    pub no_http2: bool,

    /// Do not request gzip/deflate/br encodings for whole-body downloads
    #[arg(long = "no-compression")]
    pub no_compression: bool,

    /// Retries per chunk after the first attempt (0-10)
    #[arg(
        short = 'r',
        long = "max-retries",
        default_value_t = 3,
        value_parser = clap::value_parser!(u32).range(0..=10)
    )]
    pub max_retries: u32,

    /// Expected SHA-256 of the finished file (hex)
    #[arg(long = "sha256", value_parser = parse_sha256)]
    pub sha256: Option<String>,

    /// Disable the progress bar
    #[arg(long = "no-progress")]
    pub no_progress: bool,

    /// fsync the temp file at every checkpoint
    #[arg(long = "sync")]
    pub sync: bool,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, conflicts_with = "quiet")]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short = 'q', long = "quiet")]
    pub quiet: bool,
}

fn parse_sha256(raw: &str) -> Result<String, String> {
    let trimmed = raw.trim();
    if trimmed.len() == 64 && trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
        Ok(trimmed.to_ascii_lowercase())
    } else {
        Err("expected 64 hexadecimal characters".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    const URL: &str = "https://example.com/disk.iso";

    #[test]
    fn test_cli_defaults() {
        let args = Args::try_parse_from(["isofetch", URL]).unwrap();
        assert_eq!(args.url, URL);
        assert!(args.output.is_none());
        assert_eq!(args.output_dir, PathBuf::from("downloads"));
        assert_eq!(args.connections, 8);
        assert_eq!(args.chunk_size, 1_048_576);
        assert!(!args.no_http2);
        assert!(!args.no_compression);
        assert_eq!(args.max_retries, 3);
        assert!(args.sha256.is_none());
        assert!(!args.no_progress);
        assert!(!args.sync);
        assert_eq!(args.verbose, 0);
        assert!(!args.quiet);
    }

    #[test]
    fn test_cli_all_flags() {
        let args = Args::try_parse_from([
            "isofetch",
            URL,
            "-o",
            "out.iso",
            "-d",
            "/tmp/isos",
            "-c",
            "16",
            "--chunk-size",
            "4194304",
            "--no-http2",
            "--no-compression",
            "-r",
            "5",
            "--no-progress",
            "--sync",
            "-vv",
        ])
        .unwrap();
        assert_eq!(args.output.as_deref(), Some("out.iso"));
        assert_eq!(args.output_dir, PathBuf::from("/tmp/isos"));
        assert_eq!(args.connections, 16);
        assert_eq!(args.chunk_size, 4_194_304);
        assert!(args.no_http2);
        assert!(args.no_compression);
        assert_eq!(args.max_retries, 5);
        assert!(args.no_progress);
        assert!(args.sync);
        assert_eq!(args.verbose, 2);
    }

    #[test]
    fn test_cli_requires_url() {
        let err = Args::try_parse_from(["isofetch"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn test_cli_connections_out_of_range() {
        for value in ["0", "65"] {
            let err = Args::try_parse_from(["isofetch", URL, "-c", value]).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::ValueValidation, "{value}");
        }
    }

    #[test]
    fn test_cli_chunk_size_minimum() {
        let err = Args::try_parse_from(["isofetch", URL, "--chunk-size", "1024"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValueValidation);
    }

    #[test]
    fn test_cli_max_retries_bound() {
        let err = Args::try_parse_from(["isofetch", URL, "-r", "11"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValueValidation);
    }

    #[test]
    fn test_cli_sha256_is_normalized() {
        let hex = "BA7816BF8F01CFEA414140DE5DAE2223B00361A396177A9CB410FF61F20015AD";
        let args = Args::try_parse_from(["isofetch", URL, "--sha256", hex]).unwrap();
        assert_eq!(args.sha256.as_deref(), Some(hex.to_ascii_lowercase().as_str()));
    }

    #[test]
    fn test_cli_sha256_rejects_bad_hex() {
        let err = Args::try_parse_from(["isofetch", URL, "--sha256", "abc"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValueValidation);
    }

    #[test]
    fn test_cli_verbose_conflicts_with_quiet() {
        let err = Args::try_parse_from(["isofetch", URL, "-v", "-q"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ArgumentConflict);
    }

    #[test]
    fn test_cli_help_flag() {
        let err = Args::try_parse_from(["isofetch", "--help"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DisplayHelp);
    }

    #[test]
    fn test_cli_version_flag() {
        let err = Args::try_parse_from(["isofetch", "--version"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DisplayVersion);
    }

    #[test]
    fn test_cli_unknown_flag_rejected() {
        let err = Args::try_parse_from(["isofetch", URL, "--bogus"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownArgument);
    }
}
