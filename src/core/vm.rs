//! The Sequencer VM: executes one compiled [`Template`]
//! against one incoming data record, writing a Common Record into the
//! sink's output buffer.

use std::net::IpAddr;

use crate::core::layout;
use crate::core::registry::Opcode;
use crate::core::scratch::ScratchFrame;
use crate::core::sequencer::StackSlot;
use crate::core::sink::Sink;
use crate::core::template::{Template, TemplateFlags, TimeBase};
use crate::error::{CoreError, Result};

/// Epoch milliseconds for 1996-01-01T00:00:00Z, used as a sanity floor:
/// guards against exporters that emit unset times, or delta-microseconds
/// measured against a zero base.
const SANITY_EPOCH_MS: u64 = 820_454_400_000;

/// What the VM learned while transcoding one record, for the dispatcher
/// to fold into `ExporterState.stats` without the VM itself needing a
/// mutable borrow of the exporter (which is also lending it the template).
#[derive(Debug, Clone, Copy)]
pub struct VmOutcome {
    pub consumed: usize,
    pub protocol: u8,
    pub packets: u64,
    pub bytes: u64,
    pub out_packets: u64,
    pub out_bytes: u64,
}

/// Execute `template`'s sequencer program against `buf` (one data
/// record's worth of bytes — the rest of the flowset may follow and must
/// not be touched). `sys_uptime_ms` and `export_time_sec` come from the
/// exporter/packet context; `transport_source` is the UDP source address
/// used to synthesize the router-IP extension when the template enables
/// it.
pub fn execute(template: &Template, system_id: u32, sys_uptime_ms: u64, export_time_sec: u32, transport_source: IpAddr, sampling_rate: u64, buf: &[u8], sink: &mut dyn Sink) -> Result<VmOutcome> {
    sink.ensure_output_space(template.output_record_size)?;
    let cursor = sink.current_output_cursor();
    let out = sink.output_buffer();
    let rec = &mut out[cursor..cursor + template.output_record_size];
    for b in rec.iter_mut() {
        *b = 0;
    }

    write_u16(rec, layout::SIZE_OFFSET, template.output_record_size as u16);
    rec[layout::TYPE_OFFSET] = layout::RECORD_TYPE_COMMON;
    write_u32(rec, layout::EXT_MAP_ID_OFFSET, template.extension_map.map_id);
    write_u32(rec, layout::EXPORTER_SYSID_OFFSET, system_id);
    rec[layout::NFVERSION_OFFSET] = layout::NFVERSION;

    let mut scratch = ScratchFrame::reset(sys_uptime_ms);
    let mut input_offset = 0usize;

    for step in &template.sequencer {
        let size_left = buf.len().saturating_sub(input_offset);
        if (step.skip as usize) > size_left {
            return Err(CoreError::TruncatedRecord { offset: input_offset, needed: step.skip as usize, left: size_left });
        }
        input_offset += step.skip as usize;

        match step.opcode {
            Opcode::Nop => {}
            Opcode::DynSkip => {
                let left = buf.len().saturating_sub(input_offset);
                if left < 1 {
                    return Err(CoreError::TruncatedRecord { offset: input_offset, needed: 1, left });
                }
                let marker = buf[input_offset];
                input_offset += 1;
                if marker < 255 {
                    let left = buf.len().saturating_sub(input_offset);
                    if (marker as usize) > left {
                        return Err(CoreError::TruncatedRecord { offset: input_offset, needed: marker as usize, left });
                    }
                    input_offset += marker as usize;
                } else {
                    let left = buf.len().saturating_sub(input_offset);
                    if left < 2 {
                        return Err(CoreError::TruncatedRecord { offset: input_offset, needed: 2, left });
                    }
                    let extra = u16::from_be_bytes([buf[input_offset], buf[input_offset + 1]]) as usize;
                    input_offset += 2;
                    let left = buf.len().saturating_sub(input_offset);
                    if extra > left {
                        return Err(CoreError::TruncatedRecord { offset: input_offset, needed: extra, left });
                    }
                    input_offset += extra;
                }
            }
            _ => {
                let len = step.input_length as usize;
                let left = buf.len().saturating_sub(input_offset);
                if len > left {
                    return Err(CoreError::TruncatedRecord { offset: input_offset, needed: len, left });
                }
                let field = &buf[input_offset..input_offset + len];
                input_offset += len;
                exec_move(step.opcode, field, rec, step.output_offset as usize, step.stack_slot, &mut scratch, sampling_rate);
            }
        }
    }

    let protocol = rec[layout::PROTOCOL_OFFSET];
    if matches!(protocol, 1 | 58) {
        if let Some(icmp) = scratch.icmp_type_code {
            write_u16(rec, layout::SRC_PORT_OFFSET, 0);
            write_u16(rec, layout::DST_PORT_OFFSET, icmp);
        }
    }

    if let Some(offset) = template.received_offset {
        let now_ms = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0);
        write_u64(rec, offset, now_ms);
    }

    reconstruct_time(template.time_base, &scratch, export_time_sec, rec);

    if let Some(offset) = template.router_ip_offset {
        write_ip(rec, offset, transport_source);
    }

    let mut out_flags = template.flags.bits() as u8;
    if sampling_rate != 1 {
        out_flags |= TemplateFlags::SAMPLED.bits() as u8;
    }
    rec[layout::FLAGS_OFFSET] = out_flags;

    sink.advance_cursor(template.output_record_size);

    Ok(VmOutcome { consumed: input_offset, protocol, packets: scratch.packets, bytes: scratch.bytes, out_packets: scratch.out_packets, out_bytes: scratch.out_bytes })
}

fn exec_move(opcode: Opcode, field: &[u8], rec: &mut [u8], out_offset: usize, slot: StackSlot, scratch: &mut ScratchFrame, sampling_rate: u64) {
    match opcode {
        Opcode::Move8 => rec[out_offset] = field[0],
        Opcode::Move16 => write_u16(rec, out_offset, be_u64(field) as u16),
        Opcode::Move32 => write_u32(rec, out_offset, be_u64(field) as u32),
        Opcode::Move40 | Opcode::Move48 | Opcode::Move56 | Opcode::Move64 => write_u64(rec, out_offset, be_u64(field)),
        Opcode::Move128 => rec[out_offset..out_offset + 16].copy_from_slice(field),
        Opcode::Move32Sampled | Opcode::Move48Sampled | Opcode::Move64Sampled => {
            let value = be_u64(field).saturating_mul(sampling_rate.max(1));
            write_u64(rec, out_offset, value);
            store_scratch(scratch, slot, value);
        }
        Opcode::MoveMac => write_u64(rec, out_offset, be_u64(field)),
        Opcode::MoveMpls => write_u32(rec, out_offset, be_u64(field) as u32),
        Opcode::MoveFlags => rec[out_offset] = (be_u64(field) & 0xFF) as u8,
        Opcode::TimeUnix => store_scratch(scratch, slot, be_u64(field) * 1000),
        Opcode::TimeMilli => store_scratch(scratch, slot, be_u64(field)),
        Opcode::Time64Milli => store_scratch(scratch, slot, be_u64(field)),
        Opcode::Time64MilliDur => store_scratch(scratch, slot, be_u64(field)),
        Opcode::TimeDeltaMicro => store_scratch(scratch, slot, be_u64(field)),
        Opcode::SysInitTime => scratch.sys_uptime_ms = be_u64(field),
        Opcode::SaveIcmp => scratch.icmp_type_code = Some(be_u64(field) as u16),
        Opcode::Zero8 => rec[out_offset] = 0,
        Opcode::Zero16 => write_u16(rec, out_offset, 0),
        Opcode::Zero32 => write_u32(rec, out_offset, 0),
        Opcode::Zero64 => write_u64(rec, out_offset, 0),
        Opcode::Zero128 => rec[out_offset..out_offset + 16].iter_mut().for_each(|b| *b = 0),
        Opcode::Nop | Opcode::DynSkip => {}
    }
}

fn store_scratch(scratch: &mut ScratchFrame, slot: StackSlot, value: u64) {
    match slot {
        StackSlot::FlowStart => scratch.flow_start_ms = value,
        StackSlot::FlowEnd => scratch.flow_end_ms = value,
        StackSlot::Duration => scratch.duration_ms = value,
        StackSlot::SysInitTime => scratch.sys_uptime_ms = value,
        StackSlot::Icmp => scratch.icmp_type_code = Some(value as u16),
        StackSlot::Bytes => scratch.bytes = value,
        StackSlot::Packets => scratch.packets = value,
        StackSlot::OutBytes => scratch.out_bytes = value,
        StackSlot::OutPackets => scratch.out_packets = value,
        StackSlot::None => {}
    }
}

fn reconstruct_time(mode: TimeBase, scratch: &ScratchFrame, export_time_sec: u32, rec: &mut [u8]) {
    let export_ms = export_time_sec as u64 * 1000;
    let (mut start_ms, mut end_ms) = match mode {
        TimeBase::DeltaMicro => (export_ms.saturating_sub(scratch.flow_start_ms / 1000), export_ms.saturating_sub(scratch.flow_end_ms / 1000)),
        TimeBase::Milli | TimeBase::UnixSeconds => (scratch.flow_start_ms, scratch.flow_end_ms),
        TimeBase::SysUpTime => (scratch.flow_start_ms + scratch.sys_uptime_ms, scratch.flow_end_ms + scratch.sys_uptime_ms),
        TimeBase::None => (0, 0),
    };

    if start_ms > 0 && scratch.duration_ms > 0 && end_ms == 0 {
        end_ms = start_ms + scratch.duration_ms;
    }

    if start_ms < SANITY_EPOCH_MS || end_ms < SANITY_EPOCH_MS {
        start_ms = 0;
        end_ms = 0;
    }

    write_u32(rec, layout::FIRST_SEC_OFFSET, (start_ms / 1000) as u32);
    write_u16(rec, layout::FIRST_MSEC_OFFSET, (start_ms % 1000) as u16);
    write_u32(rec, layout::LAST_SEC_OFFSET, (end_ms / 1000) as u32);
    write_u16(rec, layout::LAST_MSEC_OFFSET, (end_ms % 1000) as u16);
}

fn write_ip(rec: &mut [u8], offset: usize, addr: IpAddr) {
    match addr {
        IpAddr::V4(v4) => rec[offset..offset + 4].copy_from_slice(&v4.octets()),
        IpAddr::V6(v6) => rec[offset..offset + 16].copy_from_slice(&v6.octets()),
    }
}

/// Big-endian read of up to 8 bytes, zero-extended — narrower wire
/// widths always zero-extend rather than sign-extend.
fn be_u64(field: &[u8]) -> u64 {
    let mut v: u64 = 0;
    for &b in field {
        v = (v << 8) | b as u64;
    }
    v
}

fn write_u16(rec: &mut [u8], offset: usize, v: u16) {
    rec[offset..offset + 2].copy_from_slice(&v.to_le_bytes());
}

fn write_u32(rec: &mut [u8], offset: usize, v: u32) {
    rec[offset..offset + 4].copy_from_slice(&v.to_le_bytes());
}

fn write_u64(rec: &mut [u8], offset: usize, v: u64) {
    rec[offset..offset + 8].copy_from_slice(&v.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::exporter::ExporterKey;
    use crate::core::extension::ExtensionMap;
    use crate::core::sampler::Sampler;
    use crate::core::sink::ProtoClass;
    use std::convert::TryInto;
    use std::net::Ipv4Addr;

    struct TestSink {
        buf: Vec<u8>,
        cursor: usize,
    }

    impl TestSink {
        fn new() -> Self {
            TestSink { buf: vec![0u8; 4096], cursor: 0 }
        }
    }

    impl Sink for TestSink {
        fn flush_exporter_info(&mut self, _: ExporterKey, _: u32) {}
        fn flush_sampler_info(&mut self, _: ExporterKey, _: Sampler) {}
        fn register_extension_map(&mut self, _: &ExtensionMap) -> u32 {
            1
        }
        fn remove_extension_map(&mut self, _: u32) {}
        fn ensure_output_space(&mut self, _: usize) -> Result<()> {
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

    fn sanity_ms() -> u64 {
        SANITY_EPOCH_MS + 10_000_000
    }

    #[test]
    fn sanity_gate_zeroes_unset_times() {
        let mut rec = vec![0u8; 40];
        let scratch = ScratchFrame { flow_start_ms: 100, flow_end_ms: 200, ..Default::default() };
        reconstruct_time(TimeBase::Milli, &scratch, 0, &mut rec);
        assert_eq!(u32::from_le_bytes(rec[layout::FIRST_SEC_OFFSET..layout::FIRST_SEC_OFFSET + 4].try_into().unwrap()), 0);
    }

    #[test]
    fn duration_fills_missing_end() {
        let mut rec = vec![0u8; 40];
        let start = sanity_ms();
        let scratch = ScratchFrame { flow_start_ms: start, duration_ms: 5000, ..Default::default() };
        reconstruct_time(TimeBase::Milli, &scratch, 0, &mut rec);
        let end_sec = u32::from_le_bytes(rec[layout::LAST_SEC_OFFSET..layout::LAST_SEC_OFFSET + 4].try_into().unwrap());
        assert_eq!(end_sec as u64, (start + 5000) / 1000);
    }

    #[test]
    fn truncated_record_aborts_cleanly() {
        let mut sink = TestSink::new();
        let template = Template {
            template_id: 256,
            flags: TemplateFlags::COUNTER64,
            output_record_size: layout::FIXED_HEADER_SIZE,
            extension_map: ExtensionMap::new(1, vec![]),
            sequencer: vec![crate::core::sequencer::SequencerStep::mv(Opcode::Move32, 4, layout::SRC_ADDR_OFFSET as u16)],
            time_base: TimeBase::None,
            router_ip_offset: None,
            received_offset: None,
            wire_record_len: Some(4),
            updated: std::time::Instant::now(),
        };
        let buf = [1u8, 2]; // too short
        let err = execute(&template, 1, 0, 0, IpAddr::V4(Ipv4Addr::new(1, 1, 1, 1)), 1, &buf, &mut sink).unwrap_err();
        assert!(matches!(err, CoreError::TruncatedRecord { .. }));
    }
}
