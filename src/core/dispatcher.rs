//! The Packet Dispatcher: parses the 16-byte IPFIX message
//! header, locates each flowset in turn, and routes it to the
//! template-add/withdraw, option-template, option-data, or data handler.
//! Owns every exporter's state: a single `HashMap` keyed by
//! `(source address, Observation Domain)`, mutated only from whichever
//! thread calls [`Dispatcher::process_packet`].

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::time::Instant;

use log::{debug, error, warn};

use crate::core::compiler;
use crate::core::exporter::{ExporterKey, ExporterState};
use crate::core::extension::{ExtensionGroup, ExtensionMap};
use crate::core::ie::FieldType;
use crate::core::parse_cache::TemplateParseCache;
use crate::core::sampler::{FieldSlot, OptionTemplateDescriptor, Sampler};
use crate::core::sink::{ProtoClass, Sink};
use crate::core::template::Template;
use crate::core::vm;
use crate::core::wire::{FieldSpec, MessageHeader, OptionTemplateRecordHeader, SetHeader, TemplateRecordHeader};

/// Deployment-wide configuration the dispatcher needs that isn't part of
/// the wire protocol itself.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub default_sampling: u64,
    pub overwrite_sampling: u64,
    pub enabled_groups: HashSet<ExtensionGroup>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        DispatcherConfig { default_sampling: 1, overwrite_sampling: 0, enabled_groups: ExtensionGroup::ALL.iter().copied().collect() }
    }
}

/// Owns every exporter seen since process start, for the lifetime of the
/// process. One `Dispatcher` is meant to be driven by exactly one thread,
/// so that no exporter's state is ever touched concurrently.
pub struct Dispatcher {
    config: DispatcherConfig,
    exporters: HashMap<ExporterKey, ExporterState>,
    next_system_id: u32,
}

impl Dispatcher {
    pub fn new(config: DispatcherConfig) -> Self {
        Dispatcher { config, exporters: HashMap::new(), next_system_id: 1 }
    }

    pub fn exporters(&self) -> &HashMap<ExporterKey, ExporterState> {
        &self.exporters
    }

    /// Process one received UDP datagram from `source`. A malformed
    /// header drops the whole packet; every other failure is
    /// local to its flowset or record and is logged rather than
    /// propagated.
    pub fn process_packet(&mut self, source: IpAddr, buf: &[u8], sink: &mut dyn Sink) {
        let header = match MessageHeader::read(buf) {
            Ok(h) => h,
            Err(e) => {
                error!("dropping packet from {}: {}", source, e);
                return;
            }
        };
        let declared_len = header.length as usize;
        if declared_len > buf.len() {
            error!("dropping packet from {}: header declares {} bytes, only {} received", source, declared_len, buf.len());
            return;
        }

        let key = ExporterKey { source, domain_id: header.domain_id };
        let is_new = !self.exporters.contains_key(&key);
        let system_id = if is_new {
            let id = self.next_system_id;
            self.next_system_id += 1;
            id
        } else {
            0
        };
        let exporter = self.exporters.entry(key).or_insert_with(|| ExporterState::new(key, system_id));
        if is_new {
            sink.flush_exporter_info(key, exporter.system_id);
        }

        exporter.stats.packets += 1;
        exporter.check_sequence(header.sequence);

        let exporter_is_ipv6 = matches!(source, IpAddr::V6(_));
        let mut offset = MessageHeader::SIZE;

        while offset + SetHeader::SIZE <= declared_len {
            let set = match SetHeader::read(&buf[offset..]) {
                Ok(s) => s,
                Err(e) => {
                    warn!("malformed flowset from {:?} at offset {}: {}", key, offset, e);
                    break;
                }
            };
            let end_of_set = offset + set.length as usize;
            if end_of_set > declared_len {
                warn!("flowset id {} from {:?} overruns packet, dropping remainder", set.id, key);
                break;
            }
            let content = &buf[offset + SetHeader::SIZE..end_of_set];

            match set.id {
                SetHeader::TEMPLATE_SET_ID => handle_template_set(content, exporter, &self.config, exporter_is_ipv6, sink),
                SetHeader::OPTION_TEMPLATE_SET_ID => handle_option_template_set(content, exporter),
                4..=255 => debug!("skipping reserved flowset id {} from {:?}", set.id, key),
                _ => handle_data_set(set.id, content, exporter, &self.config, source, header.export_time, sink),
            }

            offset = end_of_set;
        }
    }
}

fn handle_template_set(content: &[u8], exporter: &mut ExporterState, config: &DispatcherConfig, exporter_is_ipv6: bool, sink: &mut dyn Sink) {
    let mut pos = 0usize;

    while content.len().saturating_sub(pos) >= TemplateRecordHeader::SIZE {
        let rec_header = match TemplateRecordHeader::read(&content[pos..]) {
            Ok(h) => h,
            Err(e) => {
                warn!("truncated template record header from {:?}: {}", exporter.key, e);
                break;
            }
        };
        pos += TemplateRecordHeader::SIZE;

        if rec_header.field_count == 0 {
            if rec_header.id == TemplateRecordHeader::WITHDRAW_ALL_ID {
                for map_id in exporter.withdraw_all_templates() {
                    sink.remove_extension_map(map_id);
                }
                debug!("withdrew all templates for {:?}", exporter.key);
            } else if let Some(old) = exporter.templates.remove(&rec_header.id) {
                sink.remove_extension_map(old.extension_map.map_id);
                if exporter.mru_template == Some(rec_header.id) {
                    exporter.mru_template = None;
                }
                debug!("withdrew template {} for {:?}", rec_header.id, exporter.key);
            }
            continue;
        }

        let mut fields = Vec::with_capacity(rec_header.field_count as usize);
        let mut complete = true;
        for _ in 0..rec_header.field_count {
            match FieldSpec::read(&content[pos..]) {
                Ok((field, consumed)) => {
                    fields.push(field);
                    pos += consumed;
                }
                Err(e) => {
                    warn!("truncated template {} from {:?}: {}", rec_header.id, exporter.key, e);
                    complete = false;
                    break;
                }
            }
        }
        if !complete {
            break;
        }

        let cache = TemplateParseCache::build(&fields);
        match compiler::compile(&cache, &config.enabled_groups, exporter_is_ipv6) {
            Ok(compiled) => {
                let provisional_map = ExtensionMap::new(0, compiled.groups.clone());
                let changed = exporter.templates.get(&rec_header.id).map(|prior| !prior.extension_map.same_shape(&provisional_map)).unwrap_or(true);
                if changed {
                    if let Some(prior) = exporter.templates.get(&rec_header.id) {
                        sink.remove_extension_map(prior.extension_map.map_id);
                    }
                }
                let map_id = sink.register_extension_map(&provisional_map);
                let template = Template {
                    template_id: rec_header.id,
                    flags: compiled.flags,
                    output_record_size: compiled.output_record_size,
                    extension_map: ExtensionMap::new(map_id, compiled.groups),
                    sequencer: compiled.sequencer,
                    time_base: compiled.time_base,
                    router_ip_offset: compiled.router_ip_offset,
                    received_offset: compiled.received_offset,
                    wire_record_len: compiled.wire_record_len,
                    updated: Instant::now(),
                };
                debug!("compiled template {} for {:?}: {} bytes", rec_header.id, exporter.key, template.output_record_size);
                exporter.templates.insert(rec_header.id, template);
                exporter.stats.template_records += 1;
            }
            Err(e) => {
                warn!("dropping template {} from {:?}: {}", rec_header.id, exporter.key, e);
            }
        }
    }
}

fn handle_option_template_set(content: &[u8], exporter: &mut ExporterState) {
    let mut pos = 0usize;

    while content.len().saturating_sub(pos) >= OptionTemplateRecordHeader::SIZE {
        let rec_header = match OptionTemplateRecordHeader::read(&content[pos..]) {
            Ok(h) => h,
            Err(e) => {
                warn!("truncated option template record header from {:?}: {}", exporter.key, e);
                break;
            }
        };
        pos += OptionTemplateRecordHeader::SIZE;

        if rec_header.field_count == 0 {
            exporter.option_tables.remove(&rec_header.id);
            continue;
        }

        let mut fields = Vec::with_capacity(rec_header.field_count as usize);
        let mut complete = true;
        for _ in 0..rec_header.field_count {
            match FieldSpec::read(&content[pos..]) {
                Ok((field, consumed)) => {
                    fields.push(field);
                    pos += consumed;
                }
                Err(e) => {
                    warn!("truncated option template {} from {:?}: {}", rec_header.id, exporter.key, e);
                    complete = false;
                    break;
                }
            }
        }
        if !complete {
            break;
        }

        if rec_header.scope_field_count == 0 {
            warn!("dropping option template {} from {:?}: zero scope fields", rec_header.id, exporter.key);
            continue;
        }

        let descriptor = compile_option_descriptor(rec_header.id, &fields);
        exporter.option_tables.insert(rec_header.id, descriptor);
    }
}

/// Walks an option template's declared fields in wire order, recording the
/// byte offset of any field spec.md §4.5 names as a sampler or sysUpTime
/// carrier. Unrecognized fields still consume their declared width so
/// later offsets stay correct.
fn compile_option_descriptor(table_id: u16, fields: &[FieldSpec]) -> OptionTemplateDescriptor {
    let mut descriptor = OptionTemplateDescriptor::new(table_id);
    let mut offset = 0usize;

    for field in fields {
        let length = if field.is_variable_length() { 0 } else { field.length as usize };
        let slot = FieldSlot { offset, length };

        if length > 0 {
            let id = field.element_id;
            if id == FieldType::SamplerId as u16 || id == FieldType::SelectorId as u16 {
                descriptor.sampler_id = Some(slot);
            } else if id == FieldType::SamplerMode as u16 || id == FieldType::SelectorAlgorithm as u16 || id == FieldType::SamplingAlgorithm as u16 {
                descriptor.sampler_mode = Some(slot);
            } else if id == FieldType::SamplerRandomInterval as u16 || id == FieldType::SamplingPacketInterval as u16 || id == FieldType::SamplingInterval as u16 {
                descriptor.sampler_interval = Some(slot);
            } else if id == FieldType::SystemInitTimeMilliseconds as u16 {
                descriptor.sys_uptime = Some(slot);
            }
        }

        offset += length;
    }

    descriptor.record_length = offset;
    descriptor
}

fn handle_data_set(set_id: u16, content: &[u8], exporter: &mut ExporterState, config: &DispatcherConfig, source: IpAddr, export_time_sec: u32, sink: &mut dyn Sink) {
    if let Some(template) = exporter.find_template(set_id) {
        let sampling_rate = active_sampling_rate(exporter, config);
        let mut pos = 0usize;
        let mut processed = 0u32;
        while content.len().saturating_sub(pos) >= 4 {
            match vm::execute(&template, exporter.system_id, exporter.sys_uptime_ms, export_time_sec, source, sampling_rate, &content[pos..], sink) {
                Ok(outcome) => {
                    pos += outcome.consumed;
                    processed += 1;
                    exporter.stats.data_records += 1;
                    exporter.stats.flows += 1;
                    let counters = exporter.stats.counters_for_mut(outcome.protocol);
                    counters.flows += 1;
                    counters.packets += outcome.packets;
                    counters.bytes += outcome.bytes;
                    sink.record_stat(ProtoClass::of(outcome.protocol), 1, outcome.packets, outcome.bytes);
                }
                Err(e) => {
                    warn!("truncated data record for template {} from {:?}: {}", set_id, exporter.key, e);
                    break;
                }
            }
        }
        // The IPFIX header sequence is a cumulative count of Data Records
        // sent before a message, so this exporter's expected value only
        // advances once the records in this flowset are actually processed.
        exporter.account_data_records(processed);
        return;
    }

    if let Some(descriptor) = exporter.option_tables.get(&set_id).cloned() {
        if descriptor.record_length == 0 {
            return;
        }
        let mut pos = 0usize;
        while content.len().saturating_sub(pos) >= descriptor.record_length {
            let record = &content[pos..pos + descriptor.record_length];

            if descriptor.sampler_id.is_some() || descriptor.sampler_mode.is_some() || descriptor.sampler_interval.is_some() {
                let sampler_id = descriptor.sampler_id.map(|s| read_uint(record, s) as i32).unwrap_or(Sampler::STANDARD_ID);
                let mode = descriptor.sampler_mode.map(|s| read_uint(record, s) as u8).unwrap_or(0);
                let interval = descriptor.sampler_interval.map(|s| read_uint(record, s)).unwrap_or(0);
                let sampler = Sampler { sampler_id, mode, interval };
                // Keyed by the reserved standard slot regardless of the
                // announced id: data records never reference a sampler by
                // id here, so the most recently discovered sampler is
                // always the one applied to the exporter's data records.
                // Exporters re-announce their sampler options periodically;
                // only flush when something actually changed.
                if exporter.samplers.get(&Sampler::STANDARD_ID) != Some(&sampler) {
                    exporter.samplers.insert(Sampler::STANDARD_ID, sampler);
                    sink.flush_sampler_info(exporter.key, sampler);
                }
            }
            if let Some(slot) = descriptor.sys_uptime {
                exporter.sys_uptime_ms = read_uint(record, slot);
            }

            pos += descriptor.record_length;
        }
        return;
    }

    debug!("dropping data set {} from {:?}: no matching template", set_id, exporter.key);
}

fn read_uint(buf: &[u8], slot: FieldSlot) -> u64 {
    let mut v = 0u64;
    for &b in &buf[slot.offset..slot.offset + slot.length] {
        v = (v << 8) | b as u64;
    }
    v
}

/// Sampling-rate precedence: overwrite config, else the exporter's
/// anonymous "standard" sampler, else the configured default, else 1.
fn active_sampling_rate(exporter: &ExporterState, config: &DispatcherConfig) -> u64 {
    if config.overwrite_sampling > 0 {
        return config.overwrite_sampling;
    }
    if exporter.samplers.contains_key(&Sampler::STANDARD_ID) {
        return exporter.standard_sampling_rate();
    }
    if config.default_sampling > 0 {
        return config.default_sampling;
    }
    1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::layout;
    use std::convert::TryInto;
    use std::net::Ipv4Addr;

    struct TestSink {
        buf: Vec<u8>,
        cursor: usize,
        maps: Vec<ExtensionMap>,
        next_map_id: u32,
        sampler_flushes: Vec<Sampler>,
    }

    impl TestSink {
        fn new() -> Self {
            TestSink { buf: vec![0u8; 8192], cursor: 0, maps: Vec::new(), next_map_id: 1, sampler_flushes: Vec::new() }
        }

        fn record(&self, n: usize) -> &[u8] {
            &self.buf[n..n + layout::FIXED_HEADER_SIZE]
        }
    }

    impl Sink for TestSink {
        fn flush_exporter_info(&mut self, _: ExporterKey, _: u32) {}
        fn flush_sampler_info(&mut self, _: ExporterKey, sampler: Sampler) {
            self.sampler_flushes.push(sampler);
        }
        fn register_extension_map(&mut self, map: &ExtensionMap) -> u32 {
            if let Some(existing) = self.maps.iter().find(|m| m.same_shape(map)) {
                return existing.map_id;
            }
            let id = self.next_map_id;
            self.next_map_id += 1;
            self.maps.push(ExtensionMap::new(id, map.groups.clone()));
            id
        }
        fn remove_extension_map(&mut self, map_id: u32) {
            self.maps.retain(|m| m.map_id != map_id);
        }
        fn ensure_output_space(&mut self, _: usize) -> crate::error::Result<()> {
            Ok(())
        }
        fn current_output_cursor(&self) -> usize {
            self.cursor
        }
        fn advance_cursor(&mut self, n: usize) {
            self.cursor += n;
        }
        fn output_buffer(&mut self) -> &mut [u8] {
            &mut self.buf
        }
        fn record_stat(&mut self, _: ProtoClass, _: u64, _: u64, _: u64) {}
    }

    fn push_field_spec(buf: &mut Vec<u8>, element_id: u16, length: u16) {
        buf.extend_from_slice(&element_id.to_be_bytes());
        buf.extend_from_slice(&length.to_be_bytes());
    }

    fn push_set(buf: &mut Vec<u8>, id: u16, body: &[u8]) {
        buf.extend_from_slice(&id.to_be_bytes());
        buf.extend_from_slice(&((body.len() + SetHeader::SIZE) as u16).to_be_bytes());
        buf.extend_from_slice(body);
    }

    fn push_header(buf: &mut Vec<u8>, total_len: u16, export_time: u32, sequence: u32, domain_id: u32) {
        buf.extend_from_slice(&MessageHeader::IPFIX_VERSION.to_be_bytes());
        buf.extend_from_slice(&total_len.to_be_bytes());
        buf.extend_from_slice(&export_time.to_be_bytes());
        buf.extend_from_slice(&sequence.to_be_bytes());
        buf.extend_from_slice(&domain_id.to_be_bytes());
    }

    /// Template then data, IPv4, no sampling.
    #[test]
    fn template_then_data_ipv4_no_sampling() {
        let mut template_fields = Vec::new();
        push_field_spec(&mut template_fields, FieldType::ProtocolIdentifier as u16, 1);
        push_field_spec(&mut template_fields, FieldType::SourceIPv4Address as u16, 4);
        push_field_spec(&mut template_fields, FieldType::DestinationIPv4Address as u16, 4);
        push_field_spec(&mut template_fields, FieldType::OctetDeltaCount as u16, 4);
        push_field_spec(&mut template_fields, FieldType::PacketDeltaCount as u16, 4);
        push_field_spec(&mut template_fields, FieldType::FlowStartSeconds as u16, 4);
        push_field_spec(&mut template_fields, FieldType::FlowEndSeconds as u16, 4);

        let mut template_record = Vec::new();
        template_record.extend_from_slice(&256u16.to_be_bytes());
        template_record.extend_from_slice(&7u16.to_be_bytes()); // field count
        template_record.extend_from_slice(&template_fields);

        let mut data_record = Vec::new();
        data_record.push(6); // protocol = TCP
        data_record.extend_from_slice(&Ipv4Addr::new(10, 0, 0, 1).octets());
        data_record.extend_from_slice(&Ipv4Addr::new(10, 0, 0, 2).octets());
        data_record.extend_from_slice(&1000u32.to_be_bytes());
        data_record.extend_from_slice(&10u32.to_be_bytes());
        data_record.extend_from_slice(&1_700_000_000u32.to_be_bytes());
        data_record.extend_from_slice(&1_700_000_005u32.to_be_bytes());

        let mut packet = Vec::new();
        push_header(&mut packet, 0, 1_700_000_010, 0, 1);
        push_set(&mut packet, SetHeader::TEMPLATE_SET_ID, &template_record);
        push_set(&mut packet, 256, &data_record);
        let total_len = packet.len() as u16;
        packet[2..4].copy_from_slice(&total_len.to_be_bytes());

        let mut dispatcher = Dispatcher::new(DispatcherConfig::default());
        let mut sink = TestSink::new();
        let source = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1));
        dispatcher.process_packet(source, &packet, &mut sink);

        let key = ExporterKey { source, domain_id: 1 };
        let exporter = dispatcher.exporters.get(&key).unwrap();
        assert_eq!(exporter.stats.data_records, 1);
        assert_eq!(exporter.stats.tcp.flows, 1);
        assert_eq!(exporter.stats.tcp.bytes, 1000);
        assert_eq!(exporter.stats.tcp.packets, 10);

        let record = sink.record(0);
        assert_eq!(record[layout::PROTOCOL_OFFSET], 6);
        let sysid = u32::from_le_bytes(record[layout::EXPORTER_SYSID_OFFSET..layout::EXPORTER_SYSID_OFFSET + 4].try_into().unwrap());
        assert_eq!(sysid, exporter.system_id);
        let first_sec = u32::from_le_bytes(record[layout::FIRST_SEC_OFFSET..layout::FIRST_SEC_OFFSET + 4].try_into().unwrap());
        let last_sec = u32::from_le_bytes(record[layout::LAST_SEC_OFFSET..layout::LAST_SEC_OFFSET + 4].try_into().unwrap());
        assert_eq!(first_sec, 1_700_000_000);
        assert_eq!(last_sec, 1_700_000_005);
        let bytes = u64::from_le_bytes(record[layout::BYTES_OFFSET..layout::BYTES_OFFSET + 8].try_into().unwrap());
        assert_eq!(bytes, 1000);
    }

    /// Sampler discovery via an options template.
    #[test]
    fn sampler_discovery_scales_counters() {
        let mut option_fields = Vec::new();
        push_field_spec(&mut option_fields, FieldType::SelectorId as u16, 4);
        push_field_spec(&mut option_fields, FieldType::SelectorAlgorithm as u16, 2);
        push_field_spec(&mut option_fields, FieldType::SamplingPacketInterval as u16, 4);

        let mut option_template_record = Vec::new();
        option_template_record.extend_from_slice(&300u16.to_be_bytes()); // table id
        option_template_record.extend_from_slice(&3u16.to_be_bytes()); // field count
        option_template_record.extend_from_slice(&1u16.to_be_bytes()); // scope field count
        option_template_record.extend_from_slice(&option_fields);

        let mut option_data = Vec::new();
        option_data.extend_from_slice(&1u32.to_be_bytes()); // selector id
        option_data.extend_from_slice(&2u16.to_be_bytes()); // mode
        option_data.extend_from_slice(&100u32.to_be_bytes()); // interval

        let mut data_fields = Vec::new();
        push_field_spec(&mut data_fields, FieldType::OctetDeltaCount as u16, 4);
        let mut data_template_record = Vec::new();
        data_template_record.extend_from_slice(&257u16.to_be_bytes());
        data_template_record.extend_from_slice(&1u16.to_be_bytes());
        data_template_record.extend_from_slice(&data_fields);

        let mut data_record = Vec::new();
        data_record.extend_from_slice(&50u32.to_be_bytes());

        let mut packet = Vec::new();
        push_header(&mut packet, 0, 1_700_000_010, 0, 2);
        push_set(&mut packet, SetHeader::OPTION_TEMPLATE_SET_ID, &option_template_record);
        push_set(&mut packet, 300, &option_data);
        push_set(&mut packet, SetHeader::TEMPLATE_SET_ID, &data_template_record);
        push_set(&mut packet, 257, &data_record);
        let total_len = packet.len() as u16;
        packet[2..4].copy_from_slice(&total_len.to_be_bytes());

        let mut dispatcher = Dispatcher::new(DispatcherConfig::default());
        let mut sink = TestSink::new();
        let source = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 2));
        dispatcher.process_packet(source, &packet, &mut sink);

        assert_eq!(sink.sampler_flushes.len(), 1);
        assert_eq!(sink.sampler_flushes[0].interval, 100);

        let key = ExporterKey { source, domain_id: 2 };
        let exporter = dispatcher.exporters.get(&key).unwrap();
        assert_eq!(exporter.samplers.get(&Sampler::STANDARD_ID).unwrap().interval, 100);

        let record = sink.record(0);
        let bytes = u64::from_le_bytes(record[layout::BYTES_OFFSET..layout::BYTES_OFFSET + 8].try_into().unwrap());
        assert_eq!(bytes, 50 * 100);
        assert_ne!(record[layout::FLAGS_OFFSET] & crate::core::template::TemplateFlags::SAMPLED.bits() as u8, 0);
    }

    /// Template withdraw drops subsequent data.
    #[test]
    fn template_withdraw_drops_subsequent_data() {
        let mut fields = Vec::new();
        push_field_spec(&mut fields, FieldType::OctetDeltaCount as u16, 4);
        let mut add_record = Vec::new();
        add_record.extend_from_slice(&256u16.to_be_bytes());
        add_record.extend_from_slice(&1u16.to_be_bytes());
        add_record.extend_from_slice(&fields);

        let mut withdraw_record = Vec::new();
        withdraw_record.extend_from_slice(&256u16.to_be_bytes());
        withdraw_record.extend_from_slice(&0u16.to_be_bytes()); // field count 0 = withdraw

        let mut data_record = Vec::new();
        data_record.extend_from_slice(&50u32.to_be_bytes());

        let mut packet = Vec::new();
        push_header(&mut packet, 0, 1_700_000_010, 0, 3);
        push_set(&mut packet, SetHeader::TEMPLATE_SET_ID, &add_record);
        push_set(&mut packet, SetHeader::TEMPLATE_SET_ID, &withdraw_record);
        push_set(&mut packet, 256, &data_record);
        let total_len = packet.len() as u16;
        packet[2..4].copy_from_slice(&total_len.to_be_bytes());

        let mut dispatcher = Dispatcher::new(DispatcherConfig::default());
        let mut sink = TestSink::new();
        let source = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 3));
        dispatcher.process_packet(source, &packet, &mut sink);

        let key = ExporterKey { source, domain_id: 3 };
        let exporter = dispatcher.exporters.get(&key).unwrap();
        assert!(exporter.templates.is_empty());
        assert_eq!(exporter.stats.data_records, 0);
        assert!(sink.maps.is_empty());
    }

    /// Fields declared out of canonical order still
    /// land at their canonical output offsets.
    #[test]
    fn field_reorder_preserves_canonical_offsets() {
        let mut fields = Vec::new();
        push_field_spec(&mut fields, FieldType::DestinationIPv4Address as u16, 4);
        push_field_spec(&mut fields, FieldType::SourceIPv4Address as u16, 4);
        push_field_spec(&mut fields, FieldType::ProtocolIdentifier as u16, 1);
        push_field_spec(&mut fields, FieldType::OctetDeltaCount as u16, 4);
        push_field_spec(&mut fields, FieldType::PacketDeltaCount as u16, 4);

        let mut template_record = Vec::new();
        template_record.extend_from_slice(&256u16.to_be_bytes());
        template_record.extend_from_slice(&5u16.to_be_bytes());
        template_record.extend_from_slice(&fields);

        let mut data_record = Vec::new();
        data_record.extend_from_slice(&Ipv4Addr::new(10, 0, 0, 2).octets()); // dest, first on wire
        data_record.extend_from_slice(&Ipv4Addr::new(10, 0, 0, 1).octets()); // src, second on wire
        data_record.push(6);
        data_record.extend_from_slice(&1000u32.to_be_bytes());
        data_record.extend_from_slice(&10u32.to_be_bytes());

        let mut packet = Vec::new();
        push_header(&mut packet, 0, 1_700_000_010, 0, 4);
        push_set(&mut packet, SetHeader::TEMPLATE_SET_ID, &template_record);
        push_set(&mut packet, 256, &data_record);
        let total_len = packet.len() as u16;
        packet[2..4].copy_from_slice(&total_len.to_be_bytes());

        let mut dispatcher = Dispatcher::new(DispatcherConfig::default());
        let mut sink = TestSink::new();
        let source = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 4));
        dispatcher.process_packet(source, &packet, &mut sink);

        let record = sink.record(0);
        let src = &record[layout::SRC_ADDR_OFFSET..layout::SRC_ADDR_OFFSET + 4];
        let dst = &record[layout::DST_ADDR_OFFSET..layout::DST_ADDR_OFFSET + 4];
        assert_eq!(src, Ipv4Addr::new(10, 0, 0, 1).octets());
        assert_eq!(dst, Ipv4Addr::new(10, 0, 0, 2).octets());
    }

    /// An enterprise-29305 reverse element maps to
    /// the forward post-counter and lands in the out-counters extension.
    #[test]
    fn enterprise_reverse_element_maps_to_out_counters() {
        let mut fields = Vec::new();
        push_field_spec(&mut fields, FieldType::ProtocolIdentifier as u16, 1);
        // octetDeltaCount (1) flagged reverse, enterprise 29305
        fields.extend_from_slice(&[0x80, 0x01, 0x00, 0x04, 0x00, 0x00, 0x72, 0x79]);

        let mut template_record = Vec::new();
        template_record.extend_from_slice(&256u16.to_be_bytes());
        template_record.extend_from_slice(&2u16.to_be_bytes());
        template_record.extend_from_slice(&fields);

        let mut data_record = Vec::new();
        data_record.push(6);
        data_record.extend_from_slice(&2000u32.to_be_bytes());

        let mut packet = Vec::new();
        push_header(&mut packet, 0, 1_700_000_010, 0, 5);
        push_set(&mut packet, SetHeader::TEMPLATE_SET_ID, &template_record);
        push_set(&mut packet, 256, &data_record);
        let total_len = packet.len() as u16;
        packet[2..4].copy_from_slice(&total_len.to_be_bytes());

        let mut dispatcher = Dispatcher::new(DispatcherConfig::default());
        let mut sink = TestSink::new();
        let source = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 5));
        dispatcher.process_packet(source, &packet, &mut sink);

        let key = ExporterKey { source, domain_id: 5 };
        let exporter = dispatcher.exporters.get(&key).unwrap();
        let template = exporter.templates.get(&256).unwrap();
        assert!(template.extension_map.groups.contains(&ExtensionGroup::OutCounters));

        let out_counters_offset = layout::FIXED_HEADER_SIZE;
        let record = sink.record(0);
        let out_bytes = u64::from_le_bytes(record[out_counters_offset..out_counters_offset + 8].try_into().unwrap());
        assert_eq!(out_bytes, 2000);
    }

    /// An options template announces `systemInitTimeMilliseconds`; the
    /// sysUpTime it carries combines with sysUpTime-relative timestamps on
    /// a later data record to produce absolute output timestamps.
    #[test]
    fn sysuptime_time_base_combines_with_option_announced_baseline() {
        let mut option_fields = Vec::new();
        push_field_spec(&mut option_fields, FieldType::SystemInitTimeMilliseconds as u16, 8);
        let mut option_template_record = Vec::new();
        option_template_record.extend_from_slice(&400u16.to_be_bytes()); // table id
        option_template_record.extend_from_slice(&1u16.to_be_bytes()); // field count
        option_template_record.extend_from_slice(&0u16.to_be_bytes()); // scope field count
        option_template_record.extend_from_slice(&option_fields);

        let mut option_data = Vec::new();
        option_data.extend_from_slice(&1_700_000_000_000u64.to_be_bytes());

        let mut data_fields = Vec::new();
        push_field_spec(&mut data_fields, FieldType::FlowStartSysUpTime as u16, 4);
        push_field_spec(&mut data_fields, FieldType::FlowEndSysUpTime as u16, 4);
        let mut data_template_record = Vec::new();
        data_template_record.extend_from_slice(&258u16.to_be_bytes());
        data_template_record.extend_from_slice(&2u16.to_be_bytes());
        data_template_record.extend_from_slice(&data_fields);

        let mut data_record = Vec::new();
        data_record.extend_from_slice(&5000u32.to_be_bytes());
        data_record.extend_from_slice(&8000u32.to_be_bytes());

        let mut packet = Vec::new();
        push_header(&mut packet, 0, 1_700_000_010, 0, 6);
        push_set(&mut packet, SetHeader::OPTION_TEMPLATE_SET_ID, &option_template_record);
        push_set(&mut packet, 400, &option_data);
        push_set(&mut packet, SetHeader::TEMPLATE_SET_ID, &data_template_record);
        push_set(&mut packet, 258, &data_record);
        let total_len = packet.len() as u16;
        packet[2..4].copy_from_slice(&total_len.to_be_bytes());

        let mut dispatcher = Dispatcher::new(DispatcherConfig::default());
        let mut sink = TestSink::new();
        let source = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 6));
        dispatcher.process_packet(source, &packet, &mut sink);

        let key = ExporterKey { source, domain_id: 6 };
        let exporter = dispatcher.exporters.get(&key).unwrap();
        assert_eq!(exporter.sys_uptime_ms, 1_700_000_000_000);

        let record = sink.record(0);
        let first_sec = u32::from_le_bytes(record[layout::FIRST_SEC_OFFSET..layout::FIRST_SEC_OFFSET + 4].try_into().unwrap());
        let last_sec = u32::from_le_bytes(record[layout::LAST_SEC_OFFSET..layout::LAST_SEC_OFFSET + 4].try_into().unwrap());
        assert_eq!(first_sec, 1_700_000_005);
        assert_eq!(last_sec, 1_700_000_008);
    }

    /// A flowset of length exactly 4 (just the set header) carries no
    /// records and must be treated as empty padding, not an error.
    #[test]
    fn flowset_of_length_four_is_empty_padding() {
        let mut packet = Vec::new();
        push_header(&mut packet, 0, 1_700_000_010, 0, 7);
        push_set(&mut packet, 256, &[]); // set header only, no body
        let total_len = packet.len() as u16;
        packet[2..4].copy_from_slice(&total_len.to_be_bytes());

        let mut dispatcher = Dispatcher::new(DispatcherConfig::default());
        let mut sink = TestSink::new();
        let source = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 7));
        dispatcher.process_packet(source, &packet, &mut sink);

        let key = ExporterKey { source, domain_id: 7 };
        let exporter = dispatcher.exporters.get(&key).unwrap();
        assert_eq!(exporter.stats.data_records, 0);
        assert_eq!(exporter.stats.packets, 1);
    }

    /// A header declaring an IPFIX version other than 10 drops the whole
    /// packet without creating exporter state.
    #[test]
    fn malformed_header_drops_whole_packet() {
        let mut packet = vec![0u8; 16];
        packet[0..2].copy_from_slice(&9u16.to_be_bytes()); // wrong version
        packet[2..4].copy_from_slice(&16u16.to_be_bytes());

        let mut dispatcher = Dispatcher::new(DispatcherConfig::default());
        let mut sink = TestSink::new();
        let source = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 8));
        dispatcher.process_packet(source, &packet, &mut sink);

        assert!(dispatcher.exporters.is_empty());
    }

    /// ICMP (protocol 1) with a saved type/code overwrites dst-port;
    /// a non-ICMP protocol (TCP, protocol 6) leaves both ports alone.
    #[test]
    fn icmp_type_code_overwrites_dst_port_only_for_icmp() {
        let mut fields = Vec::new();
        push_field_spec(&mut fields, FieldType::ProtocolIdentifier as u16, 1);
        push_field_spec(&mut fields, FieldType::SourceTransportPort as u16, 2);
        push_field_spec(&mut fields, FieldType::DestinationTransportPort as u16, 2);
        push_field_spec(&mut fields, FieldType::IcmpTypeCodeIPv4 as u16, 2);

        let mut template_record = Vec::new();
        template_record.extend_from_slice(&256u16.to_be_bytes());
        template_record.extend_from_slice(&4u16.to_be_bytes());
        template_record.extend_from_slice(&fields);

        // protocol = ICMP(1), src port = 1234, dst port = 0 (unused by ICMP
        // on the wire), icmp type/code = 0x0803 (type 8, code 3)
        let mut data_record = Vec::new();
        data_record.push(1);
        data_record.extend_from_slice(&1234u16.to_be_bytes());
        data_record.extend_from_slice(&0u16.to_be_bytes());
        data_record.extend_from_slice(&0x0803u16.to_be_bytes());

        let mut packet = Vec::new();
        push_header(&mut packet, 0, 1_700_000_010, 0, 9);
        push_set(&mut packet, SetHeader::TEMPLATE_SET_ID, &template_record);
        push_set(&mut packet, 256, &data_record);
        let total_len = packet.len() as u16;
        packet[2..4].copy_from_slice(&total_len.to_be_bytes());

        let mut dispatcher = Dispatcher::new(DispatcherConfig::default());
        let mut sink = TestSink::new();
        let source = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 9));
        dispatcher.process_packet(source, &packet, &mut sink);

        let record = sink.record(0);
        let src_port = u16::from_le_bytes(record[layout::SRC_PORT_OFFSET..layout::SRC_PORT_OFFSET + 2].try_into().unwrap());
        let dst_port = u16::from_le_bytes(record[layout::DST_PORT_OFFSET..layout::DST_PORT_OFFSET + 2].try_into().unwrap());
        assert_eq!(src_port, 0);
        assert_eq!(dst_port, 0x0803);
    }

    /// Re-sending an identical template leaves the extension map
    /// unchanged (same map id, no unregister call); re-sending it with one
    /// element removed changes the map and shrinks the output record.
    #[test]
    fn template_refresh_idempotence_and_change_detection() {
        let mut fields = Vec::new();
        push_field_spec(&mut fields, FieldType::OctetDeltaCount as u16, 4);
        push_field_spec(&mut fields, FieldType::VlanId as u16, 2);

        let mut template_record = Vec::new();
        template_record.extend_from_slice(&256u16.to_be_bytes());
        template_record.extend_from_slice(&2u16.to_be_bytes());
        template_record.extend_from_slice(&fields);

        let mut packet = Vec::new();
        push_header(&mut packet, 0, 1_700_000_010, 0, 10);
        push_set(&mut packet, SetHeader::TEMPLATE_SET_ID, &template_record);
        let total_len = packet.len() as u16;
        packet[2..4].copy_from_slice(&total_len.to_be_bytes());

        let mut dispatcher = Dispatcher::new(DispatcherConfig::default());
        let mut sink = TestSink::new();
        let source = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 10));

        // first delivery
        dispatcher.process_packet(source, &packet, &mut sink);
        let key = ExporterKey { source, domain_id: 10 };
        let map_id_1 = dispatcher.exporters.get(&key).unwrap().templates.get(&256).unwrap().extension_map.map_id;
        let size_1 = dispatcher.exporters.get(&key).unwrap().templates.get(&256).unwrap().output_record_size;

        // identical re-send: map id and size are unchanged
        dispatcher.process_packet(source, &packet, &mut sink);
        let map_id_2 = dispatcher.exporters.get(&key).unwrap().templates.get(&256).unwrap().extension_map.map_id;
        let size_2 = dispatcher.exporters.get(&key).unwrap().templates.get(&256).unwrap().output_record_size;
        assert_eq!(map_id_1, map_id_2);
        assert_eq!(size_1, size_2);

        // re-send with the VLAN field removed: the extension map changes
        // and the output record shrinks.
        let mut smaller_fields = Vec::new();
        push_field_spec(&mut smaller_fields, FieldType::OctetDeltaCount as u16, 4);
        let mut smaller_template_record = Vec::new();
        smaller_template_record.extend_from_slice(&256u16.to_be_bytes());
        smaller_template_record.extend_from_slice(&1u16.to_be_bytes());
        smaller_template_record.extend_from_slice(&smaller_fields);
        let mut packet2 = Vec::new();
        push_header(&mut packet2, 0, 1_700_000_011, 1, 10);
        push_set(&mut packet2, SetHeader::TEMPLATE_SET_ID, &smaller_template_record);
        let total_len2 = packet2.len() as u16;
        packet2[2..4].copy_from_slice(&total_len2.to_be_bytes());

        dispatcher.process_packet(source, &packet2, &mut sink);
        let template3 = dispatcher.exporters.get(&key).unwrap().templates.get(&256).unwrap();
        assert_ne!(template3.extension_map.map_id, map_id_1);
        assert!(template3.output_record_size < size_1);
    }

    /// A healthy exporter sending several data records per packet must
    /// never trip a spurious sequence failure: the header sequence is the
    /// cumulative count of records sent before the message, not the
    /// previous packet's own announced value. An actual gap still counts
    /// exactly one failure.
    #[test]
    fn sequence_check_is_cumulative_across_records_not_per_packet() {
        let mut fields = Vec::new();
        push_field_spec(&mut fields, FieldType::OctetDeltaCount as u16, 4);
        let mut template_record = Vec::new();
        template_record.extend_from_slice(&256u16.to_be_bytes());
        template_record.extend_from_slice(&1u16.to_be_bytes());
        template_record.extend_from_slice(&fields);

        fn data_set(n_records: u32) -> Vec<u8> {
            let mut body = Vec::new();
            for i in 0..n_records {
                body.extend_from_slice(&(i + 1).to_be_bytes());
            }
            body
        }

        let mut dispatcher = Dispatcher::new(DispatcherConfig::default());
        let mut sink = TestSink::new();
        let source = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 11));
        let key = ExporterKey { source, domain_id: 11 };

        // packet 1: template plus 3 data records; this is the first packet
        // ever from this exporter, so nothing has fallen out of sync yet.
        let mut packet1 = Vec::new();
        push_header(&mut packet1, 0, 1_700_000_010, 0, 11);
        push_set(&mut packet1, SetHeader::TEMPLATE_SET_ID, &template_record);
        push_set(&mut packet1, 256, &data_set(3));
        let len1 = packet1.len() as u16;
        packet1[2..4].copy_from_slice(&len1.to_be_bytes());
        dispatcher.process_packet(source, &packet1, &mut sink);

        let exporter = dispatcher.exporters.get(&key).unwrap();
        assert_eq!(exporter.stats.sequence_failures, 0);
        assert_eq!(exporter.sequence, 3);

        // packet 2: announces the cumulative total (3) as its header
        // sequence, and carries 2 more records.
        let mut packet2 = Vec::new();
        push_header(&mut packet2, 0, 1_700_000_011, 3, 11);
        push_set(&mut packet2, 256, &data_set(2));
        let len2 = packet2.len() as u16;
        packet2[2..4].copy_from_slice(&len2.to_be_bytes());
        dispatcher.process_packet(source, &packet2, &mut sink);

        let exporter = dispatcher.exporters.get(&key).unwrap();
        assert_eq!(exporter.stats.sequence_failures, 0);
        assert_eq!(exporter.sequence, 5);

        // packet 3: a packet was lost in transit, so the announced
        // sequence jumps ahead of what this collector has accounted for.
        let mut packet3 = Vec::new();
        push_header(&mut packet3, 0, 1_700_000_012, 20, 11);
        push_set(&mut packet3, 256, &data_set(1));
        let len3 = packet3.len() as u16;
        packet3[2..4].copy_from_slice(&len3.to_be_bytes());
        dispatcher.process_packet(source, &packet3, &mut sink);

        let exporter = dispatcher.exporters.get(&key).unwrap();
        assert_eq!(exporter.stats.sequence_failures, 1);
        assert_eq!(exporter.sequence, 21);
    }
}
