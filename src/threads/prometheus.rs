//! The optional Prometheus metrics thread. Serves the process-wide
//! per-protocol counters as a single text-exposition response on every
//! connection; it does not attempt to implement keep-alive or any other
//! part of HTTP beyond what a scrape needs.

use std::io::prelude::*;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;

use log::{error, info};

use crate::core::stats::GlobalStats;

pub fn listen(addr: SocketAddr, stats: Arc<GlobalStats>) {
    let listener = TcpListener::bind(&addr).unwrap_or_else(|e| panic!("failed to bind metrics listener to {}: {}", addr, e));
    info!("serving Prometheus metrics on {}", &addr);

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => handle_connection(stream, &stats),
            Err(e) => error!("metrics connection failed: {}", e),
        }
    }
}

fn handle_connection(mut stream: TcpStream, stats: &GlobalStats) {
    let body = stats.render_prometheus();
    let response = format!("HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4\r\nContent-Length: {}\r\n\r\n{}", body.len(), body);

    if let Err(e) = stream.write_all(response.as_bytes()) {
        error!("failed to write metrics response: {}", e);
        return;
    }
    let _ = stream.flush();
}
