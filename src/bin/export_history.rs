use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use history_imp_exp::archive::package_export_store;

#[derive(Parser)]
#[command(name = "export-history")]
#[command(about = "Package a history export store directory into an archive")]
#[command(version)]
struct Cli {
    #[arg(short = 'G', long = "gzip", help = "Compress the archive with gzip.")]
    gzip: bool,

    store_dir: PathBuf,
    out_file: PathBuf,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    package_export_store(&cli.store_dir, &cli.out_file, cli.gzip)?;
    Ok(())
}
