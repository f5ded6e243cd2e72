//! `mm-broker`: the Message Manager broker binary. See `SPEC_FULL.md` §6
//! for the CLI surface this implements.

use std::net::IpAddr;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;
use mm_broker::{Broker, BrokerConfig};
use mm_types::HeaderKind;
use tracing::{error, info};

/// Message Manager broker.
#[derive(Parser, Debug)]
#[command(name = "mm-broker")]
#[command(about = "Topic-based pub/sub message broker")]
struct Args {
    /// Address to bind the listen socket on.
    #[arg(long, default_value = "0.0.0.0")]
    addr: IpAddr,

    /// Port to bind the listen socket on.
    #[arg(long, default_value_t = mm_types::limits::DEFAULT_PORT)]
    port: u16,

    /// Use the 56-byte timecoded header instead of the 48-byte standard one.
    #[arg(long)]
    timecode: bool,

    /// Disable the periodic TIMING_MESSAGE broadcast.
    #[arg(long)]
    disable_timing_msg: bool,

    /// Set SO_REUSEADDR on the listen socket and raise log verbosity.
    #[arg(long)]
    debug: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(if args.debug { tracing::Level::DEBUG } else { tracing::Level::INFO })
        .init();

    let config = BrokerConfig {
        addr: args.addr,
        port: args.port,
        header_kind: if args.timecode { HeaderKind::Timecoded } else { HeaderKind::Standard },
        disable_timing_msg: args.disable_timing_msg,
        reuse_address: args.debug,
        ..BrokerConfig::default()
    };

    let mut broker = match Broker::bind(config) {
        Ok(broker) => broker,
        Err(err) => {
            error!(error = %err, "mm-broker: failed to bind listen socket");
            return ExitCode::FAILURE;
        }
    };

    let running = Arc::new(AtomicBool::new(true));
    let handler_flag = Arc::clone(&running);
    if let Err(err) = ctrlc::set_handler(move || {
        info!("mm-broker: shutdown requested");
        handler_flag.store(false, Ordering::SeqCst);
    }) {
        error!(error = %err, "mm-broker: failed to install signal handler");
        return ExitCode::FAILURE;
    }

    match broker.run(|| running.load(Ordering::SeqCst)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "mm-broker: event loop failed");
            ExitCode::FAILURE
        }
    }
}
