use std::io::Write;
use std::process::ExitCode;
use std::thread;

use clap::Parser;
use log::{error, info};

use torrent_seeder::cli::{self, Command, GenerateArgs};
use torrent_seeder::file::{MetaInfo, TorrentError};
use torrent_seeder::scanner::TorrentDirectory;
use torrent_seeder::server::{Config, Server, ServerError};
use torrent_seeder::tracker;
use torrent_seeder::util;

fn serve(config: Config) -> Result<(), ServerError> {
    let (sender, receiver) = tracker::channel();
    let mut server = Server::bind(&config, receiver)?;

    let directory = TorrentDirectory::from_config(&config, sender);
    let interval = config.directory_update_interval;
    let cooldown = config.directory_cooldown;
    thread::Builder::new()
        .name("directory".to_string())
        .spawn(move || directory.run(interval, cooldown))?;

    info!("Serving {}", config.data_dir.display());
    server.run()
}

fn generate(args: GenerateArgs) -> Result<(), TorrentError> {
    let announce = args
        .announce_url
        .unwrap_or_else(|| util::announce_url(&util::host_name(), Config::default().tracker_port));
    let info = MetaInfo::generate(&args.input, &announce, args.piece_length)?;

    if args.output.as_os_str() == "-" {
        std::io::stdout().write_all(&info.to_vec())?;
        return Ok(());
    }
    let output = if args.output.is_dir() {
        args.output.join(format!("{}.torrent", info.name()))
    } else {
        args.output
    };
    info.to_path(&output)?;
    info!("Wrote {} ({})", output.display(), hex::encode(info.info_hash()));
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = cli::Args::parse();
    let result = match args.command {
        Command::Serve(serve_args) => serve(serve_args.into()).map_err(|e| e.to_string()),
        Command::Generate(generate_args) => generate(generate_args).map_err(|e| e.to_string()),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
