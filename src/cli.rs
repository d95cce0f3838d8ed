//! Command-line surface and option validation.
//!
//! Parsing produces a [`Config`] record consumed by the core; all implied
//! flags (`--archive`, `--force`, ...) are resolved here so the roles never
//! look at raw argv.

use clap::Parser;

use crate::error::{Result, SyncError};

#[derive(Debug, Parser, Clone)]
#[command(
    name = "rsyn",
    version,
    about = "rsync-compatible file-tree synchroniser",
    disable_help_flag = false
)]
pub struct Cli {
    /// Source paths, with the destination last (one lone path is listed)
    #[arg(value_name = "SOURCE... [DESTINATION]")]
    pub paths: Vec<String>,

    /// Increase verbosity
    #[arg(short, long)]
    pub verbose: bool,

    /// Suppress non-error messages
    #[arg(short, long)]
    pub quiet: bool,

    /// Archive mode; same as -rpt (no -H)
    #[arg(short, long)]
    pub archive: bool,

    /// Recurse into directories
    #[arg(short, long)]
    pub recursive: bool,

    /// Skip files that are newer on the receiver
    #[arg(short, long)]
    pub update: bool,

    /// Transfer directories without recursing
    #[arg(short, long)]
    pub dirs: bool,

    /// Preserve hard links
    #[arg(short = 'H', long)]
    pub hard_links: bool,

    /// Preserve permissions
    #[arg(short, long)]
    pub perms: bool,

    /// Preserve times
    #[arg(short, long)]
    pub times: bool,

    /// Compress file data
    #[arg(short = 'z', long)]
    pub compress: bool,

    /// Level of compression (1-9)
    #[arg(long)]
    pub compress_level: Option<u32>,

    /// Skip creating new files on receiver
    #[arg(long)]
    pub existing: bool,

    /// Skip updating files that exist on receiver
    #[arg(long)]
    pub ignore_existing: bool,

    /// Delete extraneous files from dest dirs
    #[arg(long)]
    pub delete: bool,

    /// Force deletion of dirs even if not empty
    #[arg(long)]
    pub force: bool,

    /// I/O timeout in seconds (0 means blocking I/O)
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Use blocking I/O for the remote shell
    #[arg(long)]
    pub blocking_io: bool,

    /// Don't skip files that match size and time
    #[arg(short = 'I', long)]
    pub ignore_times: bool,

    /// Skip files that match in size
    #[arg(long)]
    pub size_only: bool,

    /// Bind address for outgoing socket to daemon
    #[arg(long)]
    pub address: Option<String>,

    /// Alternate double-colon port number
    #[arg(long)]
    pub port: Option<u16>,

    /// List the files instead of copying them
    #[arg(long)]
    pub list_only: bool,

    /// Copy files whole (without dividing them into blocks)
    #[arg(long)]
    pub whole_file: bool,

    /// Skip based on checksum, not mod-time & size
    #[arg(long)]
    pub checksum: bool,

    /// Run as the server on a remote machine
    #[arg(long)]
    pub server: bool,

    /// Run as a daemon
    #[arg(long)]
    pub daemon: bool,

    /// Don't detach from the controlling terminal
    #[arg(long)]
    pub no_detach: bool,
}

/// Resolved configuration record consumed by the core.
#[derive(Debug, Clone)]
pub struct Config {
    pub sources: Vec<String>,
    pub destination: Option<String>,
    pub recursive: bool,
    pub dirs: bool,
    pub perms: bool,
    pub times: bool,
    pub hard_links: bool,
    pub compress: bool,
    pub compress_level: u32,
    pub checksum: bool,
    pub ignore_times: bool,
    pub size_only: bool,
    pub update: bool,
    pub ignore_existing: bool,
    pub existing: bool,
    pub delete: bool,
    pub force: bool,
    pub whole_file: bool,
    /// 0 means blocking I/O with no deadline.
    pub timeout: u64,
    pub address: String,
    pub port: u16,
    pub verbose: bool,
    pub quiet: bool,
    pub list_only: bool,
    pub server: bool,
    pub daemon: bool,
    pub no_detach: bool,
}

impl Config {
    /// Validate the parsed arguments and resolve implied options.
    pub fn from_cli(mut cli: Cli) -> Result<Config> {
        if cli.daemon {
            return Ok(Self::build(cli, Vec::new(), None));
        }

        // A lone positional path means "list it"; otherwise the final path
        // is the destination.
        if cli.paths.len() == 1 {
            cli.list_only = true;
        }
        let (sources, destination) = if cli.list_only {
            (cli.paths.clone(), None)
        } else {
            let dest = cli.paths.pop();
            (cli.paths.clone(), dest)
        };

        if sources.is_empty() {
            return Err(SyncError::Usage("missing source operand".into()));
        }

        let mut destination = destination;
        if let Some(dest) = &mut destination {
            if sources.iter().any(|s| s == dest) {
                return Err(SyncError::Path(
                    "source and destination are the same".into(),
                ));
            }
            // An existing directory destination behaves like `dest/`; the
            // trailing slash is what the layout rules key on.
            if !dest.ends_with('/')
                && std::fs::metadata(dest.as_str()).map(|m| m.is_dir()).unwrap_or(false)
            {
                dest.push('/');
            }
        }

        let level = cli.compress_level.unwrap_or(9);
        if !(1..=9).contains(&level) {
            return Err(SyncError::OptionConflict(format!(
                "invalid compression level {level}"
            )));
        }

        if cli.archive {
            cli.recursive = true;
            cli.perms = true;
            cli.times = true;
        }
        if cli.recursive {
            cli.dirs = true;
        }
        if cli.force {
            cli.delete = true;
        }
        if cli.delete && !cli.dirs && !cli.recursive {
            return Err(SyncError::OptionConflict(
                "--delete requires -r or -d".into(),
            ));
        }
        if cli.blocking_io {
            cli.timeout = Some(0);
        }
        if cli.list_only {
            cli.dirs = true;
        }

        cli.compress_level = Some(level);
        Ok(Self::build(cli, sources, destination))
    }

    fn build(cli: Cli, sources: Vec<String>, destination: Option<String>) -> Config {
        Config {
            sources,
            destination,
            recursive: cli.recursive,
            dirs: cli.dirs,
            perms: cli.perms,
            times: cli.times,
            hard_links: cli.hard_links,
            compress: cli.compress,
            compress_level: cli.compress_level.unwrap_or(9),
            checksum: cli.checksum,
            ignore_times: cli.ignore_times,
            size_only: cli.size_only,
            update: cli.update,
            ignore_existing: cli.ignore_existing,
            existing: cli.existing,
            delete: cli.delete,
            force: cli.force,
            whole_file: cli.whole_file,
            timeout: cli.timeout.unwrap_or(0),
            address: cli.address.unwrap_or_else(|| "127.0.0.1".to_string()),
            port: cli.port.unwrap_or(10873),
            verbose: cli.verbose,
            quiet: cli.quiet,
            list_only: cli.list_only,
            server: cli.server,
            daemon: cli.daemon,
            no_detach: cli.no_detach,
        }
    }
}
