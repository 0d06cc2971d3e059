//! Demo CLI: connect to a reader, do one synchronous read, optionally keep
//! reading in the background until Ctrl-C.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use log::{info, warn};

use gen2reader::background::BackgroundMode;
use gen2reader::tag::Protocol;
use gen2reader::ReaderCore;

#[derive(clap::Parser, Debug)]
#[command(version, about = "Drive a UHF Gen2 reader from the command line")]
struct Opt {
    /// Reader URI, e.g. eapi:///dev/ttyUSB0 or tmr://192.168.1.5
    uri: String,

    /// How long to run the synchronous read, in milliseconds.
    #[arg(long, default_value = "250")]
    duration_ms: u64,

    /// After the synchronous read, keep reading in the background until
    /// Ctrl-C.
    #[arg(long)]
    background: bool,

    /// Use continuous-mode background reading instead of polled.
    #[arg(long)]
    continuous: bool,

    /// Antenna to read on.
    #[arg(long, default_value = "1")]
    antenna: u8,

    #[arg(short, default_value = "0")]
    verbose: usize,
}

fn main() -> Result<()> {
    let opt = Opt::parse();
    stderrlog::new()
        .module(module_path!())
        .module("gen2reader")
        .quiet(false)
        .verbosity(opt.verbose)
        .timestamp(stderrlog::Timestamp::Second)
        .init()?;

    let mut reader = ReaderCore::from_uri(&opt.uri)?;
    reader.connect()?;
    info!("connected to {}", reader.uri());

    let reads = reader.read_sync(Duration::from_millis(opt.duration_ms))?;
    println!("synchronous read: {} tag(s)", reads.len());
    for read in &reads {
        println!(
            "  epc={:02x?} antenna={} rssi={} count={}",
            read.tag.epc, read.antenna, read.rssi, read.read_count
        );
    }

    if opt.background {
        reader.add_read_listener(Box::new(|read| {
            println!("background read: epc={:02x?}", read.tag.epc);
        }))?;
        reader.add_exception_listener(Box::new(|err| {
            warn!("background exception: {err}");
        }))?;

        let mode = if opt.continuous {
            BackgroundMode::Continuous
        } else {
            BackgroundMode::Polled {
                async_on_time: Duration::from_millis(250),
                async_off_time: Duration::from_millis(0),
            }
        };
        reader.start_reading(mode, opt.antenna, Protocol::Gen2)?;

        let stop = Arc::new(AtomicBool::new(false));
        let handler_stop = stop.clone();
        ctrlc::set_handler(move || {
            warn!("Got Ctrl-C");
            handler_stop.store(true, Ordering::SeqCst);
        })
        .expect("failed to set Ctrl-C handler");

        info!("reading in the background, press Ctrl-C to stop");
        while !stop.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(100));
        }
        reader.stop_reading();
    }

    reader.destroy();
    Ok(())
}
