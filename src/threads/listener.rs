//! The listener thread: owns the UDP socket and every `ExporterState` the
//! process knows about. It is the only thread that ever calls into
//! [`Dispatcher::process_packet`] — no mutation of an exporter's state
//! crosses a thread boundary, because there is exactly one thread doing
//! any such mutation.

use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::sync::mpsc::SyncSender;
use std::sync::Arc;

use log::{error, info, trace};

use crate::core::dispatcher::{Dispatcher, DispatcherConfig};
use crate::core::sink::ChannelSink;
use crate::core::stats::GlobalStats;

/// Largest IPFIX message the listener accepts; a datagram bigger than
/// this would already have been dropped below UDP.
const MAX_PACKET_SIZE: usize = 65_535;

pub fn listen(addr: SocketAddr, config: DispatcherConfig, flush_tx: SyncSender<Vec<u8>>, stats: Arc<GlobalStats>) {
    let socket = UdpSocket::bind(&addr).unwrap_or_else(|e| panic!("failed to bind UDP socket to {}: {}", addr, e));
    info!("listening for IPFIX packets on {}", addr);

    let mut dispatcher = Dispatcher::new(config);
    let mut sink = ChannelSink::new(flush_tx, stats);
    let mut buf = [0u8; MAX_PACKET_SIZE];

    loop {
        trace!("waiting for a packet...");
        let (len, from) = match socket.recv_from(&mut buf) {
            Ok(v) => v,
            Err(e) => {
                error!("UDP recv failed: {}", e);
                continue;
            }
        };
        trace!("received {} bytes from {}", len, from);

        let source: IpAddr = from.ip();
        dispatcher.process_packet(source, &buf[..len], &mut sink);
    }
}
