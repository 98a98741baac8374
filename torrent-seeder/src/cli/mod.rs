use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args as ClapArgs, Parser, Subcommand};

use crate::file::DEFAULT_PIECE_LENGTH;
use crate::server::Config;

#[derive(Parser, Debug)]
#[command(version, about)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the tracker and seed everything in the data directory
    Serve(ServeArgs),
    /// Write a torrent file for a file or directory
    Generate(GenerateArgs),
}

#[derive(ClapArgs, Debug)]
pub struct ServeArgs {
    /// Upload rate in bytes per second
    #[arg(long, default_value_t = 256 * 1024)]
    pub upload_rate: u64,
    #[arg(long, default_value = "data")]
    pub data_dir: PathBuf,
    #[arg(long, default_value = "metadata")]
    pub metadata_dir: PathBuf,
    /// Announce URL for generated torrents [default: derived from host name]
    #[arg(long)]
    pub announce_url: Option<String>,
    #[arg(long, default_value_t = 7000)]
    pub tracker_port: u16,
    /// Seconds a data entry must stay unmodified before it is shared
    #[arg(long, default_value_t = 60)]
    pub directory_cooldown: u64,
    /// Seconds between data directory scans
    #[arg(long, default_value_t = 300)]
    pub directory_update_interval: u64,
    #[arg(long, default_value = ".torrent")]
    pub metadata_suffix: String,
    #[arg(long, default_value_t = 6881)]
    pub seeder_port_min: u16,
    #[arg(long, default_value_t = 6999)]
    pub seeder_port_max: u16,
    /// Announce interval handed to clients, in seconds
    #[arg(long, default_value_t = 90)]
    pub rerequest_interval: u64,
    /// Seconds after which silent peers are forgotten
    #[arg(long, default_value_t = 120)]
    pub purge_interval: u64,
    #[arg(long, default_value_t = 1000)]
    pub max_peers_per_torrent: usize,
    /// Address advertised for the local seeder [default: address the request arrived on]
    #[arg(long)]
    pub public_ip: Option<Ipv4Addr>,
}

impl From<ServeArgs> for Config {
    fn from(args: ServeArgs) -> Self {
        Config {
            upload_rate: args.upload_rate,
            data_dir: args.data_dir,
            metadata_dir: args.metadata_dir,
            announce_url: args.announce_url,
            tracker_port: args.tracker_port,
            directory_cooldown: Duration::from_secs(args.directory_cooldown),
            directory_update_interval: Duration::from_secs(args.directory_update_interval),
            metadata_suffix: args.metadata_suffix,
            seeder_port_min: args.seeder_port_min,
            seeder_port_max: args.seeder_port_max,
            rerequest_interval: Duration::from_secs(args.rerequest_interval),
            purge_interval: Duration::from_secs(args.purge_interval),
            max_peers_per_torrent: args.max_peers_per_torrent,
            public_ip: args.public_ip,
        }
    }
}

#[derive(ClapArgs, Debug)]
pub struct GenerateArgs {
    pub input: PathBuf,
    /// Output file, directory, or `-` for stdout
    #[arg(default_value = ".")]
    pub output: PathBuf,
    #[arg(long)]
    pub announce_url: Option<String>,
    #[arg(long, default_value_t = DEFAULT_PIECE_LENGTH)]
    pub piece_length: i64,
}
