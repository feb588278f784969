use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use history_imp_exp::download::{
    DownloadArgs, DownloadOutcome, Downloader, HttpFetcher, SourceFlags,
};
use history_imp_exp::error::ImpExpError;
use history_imp_exp::file_sources::FileSources;

#[derive(Parser)]
#[command(name = "upload-file-to-history")]
#[command(
    about = "Download a file from a url using token and token_key pair in the request headers"
)]
#[command(version)]
struct Cli {
    #[arg(short = 'U', long = "url", help = "Source is a URL.")]
    is_url: bool,

    #[arg(short = 'F', long = "file", help = "Source is a file.")]
    is_file: bool,

    #[arg(
        short = 'e',
        long = "encoded",
        help = "Source and destination dir values are base64 encoded."
    )]
    is_b64encoded: bool,

    #[arg(long = "file-sources", help = "file sources json")]
    file_sources: Option<PathBuf>,

    url_or_path: String,
    dest_dir: String,
    token_name: String,
    token_key: String,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<ImpExpError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &ImpExpError) -> u8 {
    match error {
        ImpExpError::MissingFileSources(_) | ImpExpError::InvalidEncoding(_) => 2,
        ImpExpError::Http(_) | ImpExpError::HttpStatus { .. } | ImpExpError::TooLarge { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Some(path) = &cli.file_sources {
        let file_sources = FileSources::load(path)?;
        debug!(count = file_sources.sources().len(), "file sources loaded");
    }

    let mut args = DownloadArgs {
        url_or_path: cli.url_or_path,
        dest_dir: cli.dest_dir,
        token_name: cli.token_name,
        token_key: cli.token_key,
    };
    if cli.is_b64encoded {
        args = args.decode_base64()?;
    }

    let downloader = Downloader::new(HttpFetcher::new()?);
    let outcome = downloader.run(
        &args,
        SourceFlags {
            is_url: cli.is_url,
            is_file: cli.is_file,
        },
    )?;
    if let DownloadOutcome::Placed(path) = &outcome {
        debug!(%path, "download complete");
    }
    Ok(())
}
