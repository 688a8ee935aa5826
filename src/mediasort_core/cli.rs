use clap::{Parser, Subcommand};
use simplelog::LevelFilter;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about = "Sort photos and videos into Year/MM - Month folders by creation date")]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable file logging to mediasort.log
    #[arg(long = "log", global = true)]
    pub log: bool,

    /// Log level for file logging (debug, info, warn, error)
    #[arg(long, default_value_t = LevelFilter::Debug, global = true)]
    pub log_level: LevelFilter,

    /// JSON configuration file (defaults to ./mediasort.json when present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Sort media from a source directory into a destination directory.
    ///
    /// Files are copied unless --move is given. Every run writes an audit log
    /// named "{moved} - {source}.txt" to the log directory.
    Sort {
        /// Directory containing media to sort
        #[arg(required = true)]
        source: PathBuf,

        /// Directory receiving the Year/MM - Month tree (created if missing)
        #[arg(required = true)]
        destination: PathBuf,

        /// Only sort the subdirectory of SOURCE at this relative path
        #[arg(long)]
        prefix: Option<String>,

        /// Move files instead of copying (deletes originals after a successful copy)
        #[arg(long)]
        r#move: bool,

        /// Directory for the run log
        #[arg(long)]
        log_dir: Option<PathBuf>,

        /// Give up on reading or transferring a single file after this many seconds
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        timeout: Option<u64>,

        /// Number of metadata worker threads
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        workers: Option<u64>,

        /// Hide progress bars
        #[arg(long)]
        no_progress: bool,

        /// Treat SOURCE and DESTINATION as blob containers of the service in
        /// the config file's "blob" section; --log-dir is then container[/prefix]
        #[arg(long)]
        blob: bool,
    },

    /// Show the resolved creation date of files and where it came from
    Inspect {
        /// Files to inspect
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}
