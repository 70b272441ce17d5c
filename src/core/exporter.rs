//! Exporter state: everything the collector knows about one
//! (transport source address, Observation Domain) pair. Owned exclusively
//! by the thread processing that exporter's packets — nothing
//! here is behind a `Mutex`.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Instant;

use crate::core::sampler::{OptionTemplateDescriptor, Sampler};
use crate::core::template::Template;

/// Identifies one exporter: its transport source address plus the
/// Observation Domain ID it's exporting under. A single device can run
/// multiple Observation Domains, each with its own independent template
/// and sampler catalog, so the domain id is part of the key, not just
/// metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExporterKey {
    pub source: IpAddr,
    pub domain_id: u32,
}

/// Per-protocol-class flow/packet/byte counters, tracked both per exporter
/// and (by the sink) globally.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProtoCounters {
    pub flows: u64,
    pub packets: u64,
    pub bytes: u64,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ExporterStats {
    pub packets: u64,
    pub flows: u64,
    pub template_records: u64,
    pub data_records: u64,
    pub sequence_failures: u64,
    pub padding_errors: u64,
    pub icmp: ProtoCounters,
    pub tcp: ProtoCounters,
    pub udp: ProtoCounters,
    pub other: ProtoCounters,
}

impl ExporterStats {
    pub fn counters_for_mut(&mut self, protocol: u8) -> &mut ProtoCounters {
        match protocol {
            1 | 58 => &mut self.icmp, // ICMP, ICMPv6
            6 => &mut self.tcp,
            17 => &mut self.udp,
            _ => &mut self.other,
        }
    }
}

/// Everything the collector tracks about one exporter for the lifetime of
/// the process. Created on first packet from a new `(source,
/// domain)` pair.
#[derive(Debug)]
pub struct ExporterState {
    pub key: ExporterKey,
    pub system_id: u32,
    pub sequence: u32,
    pub sequence_seen: bool,
    pub sys_uptime_ms: u64,
    pub stats: ExporterStats,
    pub templates: HashMap<u16, Template>,
    pub option_tables: HashMap<u16, OptionTemplateDescriptor>,
    pub samplers: HashMap<i32, Sampler>,
    /// Single-slot memoization of the most recently used template id.
    pub mru_template: Option<u16>,
    pub created: Instant,
}

impl ExporterState {
    pub fn new(key: ExporterKey, system_id: u32) -> Self {
        ExporterState {
            key,
            system_id,
            sequence: 0,
            sequence_seen: false,
            sys_uptime_ms: 0,
            stats: ExporterStats::default(),
            templates: HashMap::new(),
            option_tables: HashMap::new(),
            samplers: HashMap::new(),
            mru_template: None,
            created: Instant::now(),
        }
    }

    /// Look up a template, preferring the single-slot MRU cache before
    /// falling back to the hash map. Returns an owned clone so
    /// callers can run the VM against it while also taking `&mut self`
    /// for stats/sampler bookkeeping.
    pub fn find_template(&mut self, id: u16) -> Option<Template> {
        if self.mru_template != Some(id) && self.templates.contains_key(&id) {
            self.mru_template = Some(id);
        }
        self.templates.get(&id).cloned()
    }

    /// Compare a message header's announced sequence number against this
    /// exporter's accumulated expected count (the running total of data
    /// records processed under a matched template, not the previous
    /// packet's own header value), and resync to the announced value
    /// either way. A mismatch before any data record has ever been
    /// processed isn't counted as a failure: an exporter's first packet
    /// is typically template-only, so there's nothing yet to have
    /// fallen out of sync with. Returns whether this was a counted
    /// failure.
    pub fn check_sequence(&mut self, announced: u32) -> bool {
        let mismatch = self.sequence_seen && announced != self.sequence;
        if mismatch {
            self.stats.sequence_failures += 1;
        }
        self.sequence = announced;
        !mismatch
    }

    /// Account for `count` data records just processed under a matched
    /// template: the expected sequence value this exporter is tracking
    /// advances by one per record. The first call ever made (for a
    /// nonzero count) marks the sequence gate live, per spec: resync
    /// silently on the first-ever data record.
    pub fn account_data_records(&mut self, count: u32) {
        if count > 0 {
            self.sequence_seen = true;
            self.sequence = self.sequence.wrapping_add(count);
        }
    }

    /// The active sampling rate for a record carrying no per-record
    /// sampler override: the exporter-wide "standard" sampler
    /// if present, else 1 (the "default sampling rate" and
    /// "overwrite sampling rate" config knobs are applied by the caller,
    /// which has access to configuration this type doesn't).
    pub fn standard_sampling_rate(&self) -> u64 {
        self.samplers.get(&Sampler::STANDARD_ID).map(|s| s.interval).filter(|&i| i > 0).unwrap_or(1)
    }

    /// Withdraw all templates for this exporter (reserved Template-Set id
    /// 2 withdraw). Returns the extension map ids
    /// that need unregistering from the sink.
    pub fn withdraw_all_templates(&mut self) -> Vec<u32> {
        self.mru_template = None;
        self.templates.drain().map(|(_, t)| t.extension_map.map_id).collect()
    }
}
