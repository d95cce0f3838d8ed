use clap::Parser;
use tracing_subscriber::EnvFilter;

use rsyn::cli::{Cli, Config};
use rsyn::error::Result;
use rsyn::filelist::{build_file_list, format_file_list};
use rsyn::protocol::{AttrFlags, ListOptions};

fn init_tracing(config: &Config) {
    let default = if config.quiet {
        "rsyn=error"
    } else if config.verbose {
        "rsyn=debug"
    } else {
        "rsyn=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let argv: Vec<String> = std::env::args().skip(1).collect();

    let config = match Config::from_cli(cli) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("rsyn: {err}");
            std::process::exit(err.exit_code());
        }
    };
    init_tracing(&config);

    if let Err(err) = dispatch(config, argv).await {
        eprintln!("rsyn: {err}");
        std::process::exit(err.exit_code());
    }
}

async fn dispatch(config: Config, argv: Vec<String>) -> Result<()> {
    if config.list_only {
        return list_sources(&config);
    }
    if config.daemon {
        return rsyn::daemon::run_daemon(config).await;
    }
    if config.server {
        return rsyn::transfer::run_server(config).await;
    }
    rsyn::transfer::run_client(config, argv).await.map(|_| ())
}

fn list_sources(config: &Config) -> Result<()> {
    let opts = ListOptions {
        attrs: AttrFlags::FILE_SIZE.bits(),
        recursive: config.recursive,
        dirs: config.dirs,
    };
    let list = build_file_list(&config.sources, &opts)
        .map_err(|e| rsyn::SyncError::Path(format!("cannot list sources: {e}")))?;
    print!("{}", format_file_list(&list));
    Ok(())
}
