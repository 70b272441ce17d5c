//! Process-wide per-protocol counters, shared between whichever thread is
//! driving the [`Dispatcher`](crate::core::dispatcher::Dispatcher) and the
//! optional Prometheus thread. Kept as plain atomics rather than behind a
//! `Mutex`: the dispatcher's own `ExporterStats` (per exporter, owned
//! exclusively by its processing thread) is the source of truth for
//! anything requiring consistency across fields; this is read-only
//! aggregate exposition, where a torn read across two counters is
//! harmless.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::core::sink::ProtoClass;

#[derive(Debug, Default)]
pub struct ProtoCounters {
    pub flows: AtomicU64,
    pub packets: AtomicU64,
    pub bytes: AtomicU64,
}

impl ProtoCounters {
    fn add(&self, flows: u64, packets: u64, bytes: u64) {
        self.flows.fetch_add(flows, Ordering::Relaxed);
        self.packets.fetch_add(packets, Ordering::Relaxed);
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    fn snapshot(&self) -> (u64, u64, u64) {
        (self.flows.load(Ordering::Relaxed), self.packets.load(Ordering::Relaxed), self.bytes.load(Ordering::Relaxed))
    }
}

/// Process-wide counters, one [`ProtoCounters`] per protocol class plus a
/// running count of output-buffer flushes, so the Prometheus thread can
/// show how often the sink blocked to drain its buffer.
#[derive(Debug, Default)]
pub struct GlobalStats {
    pub icmp: ProtoCounters,
    pub tcp: ProtoCounters,
    pub udp: ProtoCounters,
    pub other: ProtoCounters,
    pub buffer_flushes: AtomicU64,
}

impl GlobalStats {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record(&self, class: ProtoClass, flows: u64, packets: u64, bytes: u64) {
        match class {
            ProtoClass::Icmp => self.icmp.add(flows, packets, bytes),
            ProtoClass::Tcp => self.tcp.add(flows, packets, bytes),
            ProtoClass::Udp => self.udp.add(flows, packets, bytes),
            ProtoClass::Other => self.other.add(flows, packets, bytes),
        }
    }

    pub fn note_flush(&self) {
        self.buffer_flushes.fetch_add(1, Ordering::Relaxed);
    }

    /// Renders the counters as Prometheus text exposition format.
    pub fn render_prometheus(&self) -> String {
        let mut out = String::new();
        out.push_str("# HELP ipfix_flows_total Flows transcoded, by protocol class.\n");
        out.push_str("# TYPE ipfix_flows_total counter\n");
        for (name, counters) in [("icmp", &self.icmp), ("tcp", &self.tcp), ("udp", &self.udp), ("other", &self.other)] {
            let (flows, packets, bytes) = counters.snapshot();
            out.push_str(&format!("ipfix_flows_total{{proto=\"{}\"}} {}\n", name, flows));
            out.push_str(&format!("ipfix_packets_total{{proto=\"{}\"}} {}\n", name, packets));
            out.push_str(&format!("ipfix_bytes_total{{proto=\"{}\"}} {}\n", name, bytes));
        }
        out.push_str("# HELP ipfix_output_buffer_flushes_total Times the sink's output buffer was flushed downstream.\n");
        out.push_str("# TYPE ipfix_output_buffer_flushes_total counter\n");
        out.push_str(&format!("ipfix_output_buffer_flushes_total {}\n", self.buffer_flushes.load(Ordering::Relaxed)));
        out
    }
}
