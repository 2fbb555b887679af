use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use solc_host::{CompilerHost, HostConfig, HostConfigOptions};

#[derive(Parser)]
#[command(name = "solc-host", version, about = "Compile Solidity sources through an isolated compiler worker")]
struct Cli {
  /// Download missing solc releases into the SVM cache
  #[arg(long, global = true)]
  auto_install: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// List the compiler versions the host can load
  Versions,
  /// Compile Solidity files, resolving OpenZeppelin imports remotely
  Compile {
    #[arg(required = true)]
    files: Vec<PathBuf>,
    /// Compiler version to switch to before compiling
    #[arg(long)]
    solc: Option<String>,
    #[arg(long)]
    pretty: bool,
  },
}

fn load_config(cli: &Cli) -> Result<HostConfig> {
  let mut options = HostConfigOptions::from_env()?;
  if cli.auto_install {
    options.auto_install = Some(true);
  }
  Ok(HostConfig::from_options(Some(options))?)
}

fn read_sources(files: &[PathBuf]) -> Result<BTreeMap<String, String>> {
  let mut sources = BTreeMap::new();
  for path in files {
    let name = path
      .file_name()
      .map(|name| name.to_string_lossy().into_owned())
      .with_context(|| format!("{} is not a file", path.display()))?;
    let content =
      fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    sources.insert(name, content);
  }
  Ok(sources)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
  env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

  let cli = Cli::parse();
  let config = load_config(&cli)?;

  match cli.command {
    Command::Versions => {
      let host = CompilerHost::with_defaults(config)?;
      let versions = match host.list_available_versions().await {
        Ok(versions) => versions,
        Err(err) => {
          log::warn!("compiler worker unavailable ({err}); listing the configured registry");
          host.config().registry.versions()
        }
      };
      let default_version = host.config().default_version.clone();
      host.destroy();

      for version in versions {
        let marker = if version == default_version { " (default)" } else { "" };
        println!("{version}{marker}");
      }
      Ok(ExitCode::SUCCESS)
    }
    Command::Compile {
      files,
      solc,
      pretty,
    } => {
      let sources = read_sources(&files)?;
      let host = CompilerHost::with_defaults(config)?;

      if let Some(version) = solc {
        host.set_version(&version).await?;
      }
      log::info!(
        "compiling {} file(s) with solc {}",
        sources.len(),
        host.current_version()
      );
      let result = host.compile(sources).await;
      host.destroy();

      let json = if pretty {
        serde_json::to_string_pretty(&result)?
      } else {
        serde_json::to_string(&result)?
      };
      println!("{json}");

      Ok(if result.success {
        ExitCode::SUCCESS
      } else {
        ExitCode::FAILURE
      })
    }
  }
}
