//! The downstream sink: the opaque collaborator the core calls into for
//! everything persistence-shaped. Intentionally a thin reference
//! collaborator, not a production subsystem — `ChannelSink` below writes a
//! simple length-free record stream, not nfdump's on-disk `nffile` format.

use std::sync::mpsc::SyncSender;
use std::sync::Arc;

use crate::core::exporter::ExporterKey;
use crate::core::extension::ExtensionMap;
use crate::core::sampler::Sampler;
use crate::core::stats::GlobalStats;
use crate::error::{CoreError, Result};

/// Which per-protocol bucket a just-transcoded record's counters belong
/// to, mirroring `ExporterStats`'s four buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtoClass {
    Icmp,
    Tcp,
    Udp,
    Other,
}

impl ProtoClass {
    pub fn of(protocol: u8) -> Self {
        match protocol {
            1 | 58 => ProtoClass::Icmp,
            6 => ProtoClass::Tcp,
            17 => ProtoClass::Udp,
            _ => ProtoClass::Other,
        }
    }
}

/// The operations the core needs from a persistence layer, plus the raw
/// output buffer the VM transcodes directly into through unaligned byte
/// stores at a cursor-addressed offset the sink owns.
pub trait Sink: Send {
    fn flush_exporter_info(&mut self, exporter: ExporterKey, system_id: u32);
    fn flush_sampler_info(&mut self, exporter: ExporterKey, sampler: Sampler);
    /// Registers (or confirms) an extension map, returning the id the
    /// sink assigned it.
    fn register_extension_map(&mut self, map: &ExtensionMap) -> u32;
    fn remove_extension_map(&mut self, map_id: u32);

    /// Ensures at least `n` contiguous bytes are available from
    /// `current_output_cursor()` onward, flushing synchronously if
    /// needed. Fails only if the sink cannot make room at all.
    fn ensure_output_space(&mut self, n: usize) -> Result<()>;
    fn current_output_cursor(&self) -> usize;
    fn advance_cursor(&mut self, n: usize);
    /// The live output buffer; valid to index from
    /// `current_output_cursor()` up to whatever `ensure_output_space` most
    /// recently guaranteed.
    fn output_buffer(&mut self) -> &mut [u8];

    fn record_stat(&mut self, class: ProtoClass, flows: u64, packets: u64, bytes: u64);
}

/// A minimal reference `Sink`: accumulates output records into an
/// in-memory buffer and, when that buffer would overflow, hands the
/// filled portion to a writer thread over a bounded channel — the only
/// point where the listener thread can block. Exporter/sampler/extension-map
/// metadata is logged directly via `log::info!`; per-protocol counters are
/// folded into a process-wide [`GlobalStats`] the Prometheus thread reads
/// independently.
pub struct ChannelSink {
    buffer: Vec<u8>,
    cursor: usize,
    next_map_id: u32,
    registered: Vec<ExtensionMap>,
    flush_tx: SyncSender<Vec<u8>>,
    stats: Arc<GlobalStats>,
}

impl ChannelSink {
    const BUFFER_CAPACITY: usize = 64 * 1024;

    pub fn new(flush_tx: SyncSender<Vec<u8>>, stats: Arc<GlobalStats>) -> Self {
        ChannelSink { buffer: vec![0u8; Self::BUFFER_CAPACITY], cursor: 0, next_map_id: 1, registered: Vec::new(), flush_tx, stats }
    }
}

impl Sink for ChannelSink {
    fn flush_exporter_info(&mut self, exporter: ExporterKey, system_id: u32) {
        log::info!("new exporter {:?} assigned system_id {}", exporter, system_id);
    }

    fn flush_sampler_info(&mut self, exporter: ExporterKey, sampler: Sampler) {
        log::info!("exporter {:?} sampler {:?}", exporter, sampler);
    }

    fn register_extension_map(&mut self, map: &ExtensionMap) -> u32 {
        if let Some(existing) = self.registered.iter().find(|m| m.same_shape(map)) {
            return existing.map_id;
        }
        let id = self.next_map_id;
        self.next_map_id += 1;
        log::info!("registered extension map {}: {:?}", id, map.groups);
        self.registered.push(ExtensionMap::new(id, map.groups.clone()));
        id
    }

    fn remove_extension_map(&mut self, map_id: u32) {
        self.registered.retain(|m| m.map_id != map_id);
    }

    fn ensure_output_space(&mut self, n: usize) -> Result<()> {
        if n > self.buffer.len() {
            return Err(CoreError::OutputBufferFull);
        }
        if self.cursor + n > self.buffer.len() {
            if self.flush_tx.send(self.buffer[..self.cursor].to_vec()).is_err() {
                return Err(CoreError::OutputBufferFull);
            }
            self.stats.note_flush();
            self.cursor = 0;
        }
        Ok(())
    }

    fn current_output_cursor(&self) -> usize {
        self.cursor
    }

    fn advance_cursor(&mut self, n: usize) {
        self.cursor += n;
    }

    fn output_buffer(&mut self) -> &mut [u8] {
        &mut self.buffer
    }

    fn record_stat(&mut self, class: ProtoClass, flows: u64, packets: u64, bytes: u64) {
        self.stats.record(class, flows, packets, bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::sync_channel;

    #[test]
    fn flush_happens_once_buffer_would_overflow() {
        let (tx, rx) = sync_channel(4);
        let stats = GlobalStats::shared();
        let mut sink = ChannelSink::new(tx, stats);
        sink.buffer = vec![0u8; 16];
        sink.cursor = 10;
        sink.ensure_output_space(10).unwrap();
        let flushed = rx.try_recv().unwrap();
        assert_eq!(flushed.len(), 10);
        assert_eq!(sink.cursor, 0);
    }

    #[test]
    fn oversized_request_is_rejected() {
        let (tx, _rx) = sync_channel(4);
        let stats = GlobalStats::shared();
        let mut sink = ChannelSink::new(tx, stats);
        sink.buffer = vec![0u8; 16];
        assert!(matches!(sink.ensure_output_space(32), Err(CoreError::OutputBufferFull)));
    }
}
