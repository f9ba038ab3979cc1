use crate::commands::{UploadArgs, Wheelhouse};
use crate::error::{ErrorKind, Result};
use clap::{Parser, Subcommand};
use exn::ResultExt;
use std::path::PathBuf;
use tracing::warn;
use tracing_subscriber::EnvFilter;
use wheelhouse_config::Config;

mod commands;
mod error;

/// A PyPI-compatible package index.
#[derive(Debug, Parser)]
#[command(name = "wheelhouse", version, about)]
struct Cli {
    /// Configuration file (TOML, YAML or JSON).
    #[arg(long, short, global = true, env = "WHEELHOUSE_CONFIG")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List every package.
    Packages,
    /// List the files of a package, with their advertised digest.
    Files { package: String },
    /// Show package metadata and its releases.
    Show { package: String, version: Option<String> },
    /// Write a file's contents to stdout or to `--output`.
    Download {
        package: String,
        file: String,
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Upload an artifact and record its release.
    Upload(UploadArgs),
    /// Print the PEP 503 page for the index, or for one package.
    Simple { package: Option<String> },
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())
        .or_raise(|| ErrorKind::Config)
        .map_err(|err| miette::miette!("{err:?}"))?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)))
        .with_writer(std::io::stderr)
        .init();

    tokio::select! {
        result = run(cli.command, &config) => result,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted, cancelling");
            Err(exn::Exn::from(ErrorKind::Interrupted))
        },
    }
    .map_err(|err| miette::miette!("{err:?}"))
}

async fn run(command: Command, config: &Config) -> Result<()> {
    let wheelhouse = Wheelhouse::open(config).await?;
    let index = &wheelhouse.index;
    let result = match command {
        Command::Packages => commands::packages(index).await,
        Command::Files { package } => commands::files(index, &package).await,
        Command::Show { package, version } => commands::show(index, &package, version.as_deref()).await,
        Command::Download { package, file, output } => {
            commands::download(index, &package, &file, output.as_deref()).await
        },
        Command::Upload(args) => commands::upload(index, args).await,
        Command::Simple { package } => commands::simple(index, package.as_deref()).await,
    };
    wheelhouse.close().await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_upload_arguments() {
        let cli = Cli::parse_from([
            "wheelhouse",
            "upload",
            "dist/foo-1.0-py3-none-any.whl",
            "--name",
            "foo",
            "--version",
            "1.0",
            "--requires-dist",
            "requests",
            "--requires-dist",
            "click",
        ]);
        let Command::Upload(args) = cli.command else {
            panic!("expected upload");
        };
        assert_eq!(args.requires_dist, ["requests", "click"]);
        assert_eq!(args.metadata_version, "2.1");
        assert_eq!(args.filetype, None);
    }

    #[test]
    fn test_global_config_flag() {
        let cli = Cli::parse_from(["wheelhouse", "files", "foo", "--config", "wheelhouse.toml"]);
        assert_eq!(cli.config, Some(PathBuf::from("wheelhouse.toml")));
        assert!(matches!(cli.command, Command::Files { ref package } if package == "foo"));
    }
}
