use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::mpsc::sync_channel;
use std::sync::Arc;
use std::thread;

use log::{error, info, LevelFilter};
use structopt::StructOpt;

#[cfg(test)]
#[macro_use]
extern crate pretty_assertions;

#[macro_use]
extern crate num_derive;

mod core;
mod error;
mod logger;
mod threads;

use crate::core::dispatcher::DispatcherConfig;
use crate::core::extension::ExtensionGroup;
use crate::core::stats::GlobalStats;

#[derive(Debug, StructOpt)]
struct Opts {
    /// Log level to use
    #[structopt(long = "--log", default_value = "Info")]
    log_level: LevelFilter,

    /// IP:port for the UDP listener
    #[structopt(short = "-l", long = "--listener", default_value = "0.0.0.0:9999")]
    listener: SocketAddr,

    /// IP:port for the Prometheus metrics endpoint
    #[structopt(short = "-e", long = "--exporter")]
    exporter: Option<SocketAddr>,

    /// Sampling rate applied when an exporter never announces one
    #[structopt(long = "--default-sampling", default_value = "1")]
    default_sampling: u64,

    /// Unconditional sampling-rate override; 0 disables it
    #[structopt(long = "--overwrite-sampling", default_value = "0")]
    overwrite_sampling: u64,

    /// File the reference sink appends transcoded Common Records to
    #[structopt(long = "--sink-path", default_value = "flows.out")]
    sink_path: PathBuf,

    /// Comma-separated list of enabled extension groups, or "all"
    #[structopt(long = "--extensions", use_delimiter = true, default_value = "all")]
    extensions: Vec<String>,
}

fn enabled_groups(names: &[String]) -> HashSet<ExtensionGroup> {
    if names.iter().any(|n| n.eq_ignore_ascii_case("all")) {
        return ExtensionGroup::ALL.iter().copied().collect();
    }
    names
        .iter()
        .filter_map(|name| match ExtensionGroup::from_name(name) {
            Some(group) => Some(group),
            None => {
                error!("unknown extension group {:?}, ignoring", name);
                None
            }
        })
        .collect()
}

fn main() {
    let opts = Opts::from_args();
    logger::init(opts.log_level);
    info!("starting IPFIX collector");

    let config = DispatcherConfig {
        default_sampling: opts.default_sampling,
        overwrite_sampling: opts.overwrite_sampling,
        enabled_groups: enabled_groups(&opts.extensions),
    };

    let stats = GlobalStats::shared();
    let (flush_tx, flush_rx) = sync_channel::<Vec<u8>>(64);

    let mut thread_list = vec![];

    let sink_path = opts.sink_path.clone();
    thread_list.push(thread::Builder::new().name("Writer".to_string()).spawn(move || {
        threads::writer::write(&sink_path, flush_rx);
    }));

    let listener_addr = opts.listener;
    let listener_stats = Arc::clone(&stats);
    thread_list.push(thread::Builder::new().name("Listener".to_string()).spawn(move || {
        threads::listener::listen(listener_addr, config, flush_tx, listener_stats);
    }));

    if let Some(metrics_addr) = opts.exporter {
        let metrics_stats = Arc::clone(&stats);
        thread_list.push(thread::Builder::new().name("Prometheus".to_string()).spawn(move || {
            threads::prometheus::listen(metrics_addr, metrics_stats);
        }));
    }

    for t in thread_list {
        t.unwrap().join().unwrap();
    }

    info!("closing app");
}
