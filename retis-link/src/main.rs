use std::str::FromStr;

use anyhow::Result;
use clap::Parser;
use log::{debug, LevelFilter};

mod cli;
mod logger;

use cli::{Cli, Command};
use logger::Logger;
use retis_link::{features, LoadPinOptions, PinStore, PinStoreConfig};

fn main() -> Result<()> {
    let cli = Cli::parse();
    Logger::init(LevelFilter::from_str(&cli.log_level)?)?;

    let mut config = match &cli.config {
        Some(path) => PinStoreConfig::from_file(path)?,
        None => PinStoreConfig::default(),
    };
    if let Some(bpffs) = &cli.bpffs {
        config.bpffs = bpffs.clone();
    }
    debug!("Using pin store at {}", config.bpffs.display());
    let store = PinStore::new(&config);

    match cli.command {
        Command::Show {
            pin,
            expect,
            read_only,
        } => {
            let opts = LoadPinOptions {
                read_only,
                ..Default::default()
            };
            let link = store.load(&pin, expect.map(Into::into), &opts)?;
            let info = link.info()?;

            println!("path: {}", store.path(&pin)?.display());
            println!("variant: {}", link.variant());
            println!("pinnable: {}", link.is_pinnable());
            println!("id: {}", info.id);
            println!("program id: {}", info.program_id);
            match info.attach_type() {
                Some(attach_type) => println!("attach type: {attach_type:?}"),
                None => println!("attach type: n/a"),
            }
        }
        Command::Unpin { pin } => store.unpin(&pin)?,
        Command::Features => {
            let features = features()?;
            println!("kernel: {}", features.kernel);
            println!("link create (tracing): {}", features.link_create_tracing);
            println!("link create (freplace): {}", features.link_create_freplace);
            println!("tracing cookie: {}", features.tracing_cookie);
        }
    }

    Ok(())
}
