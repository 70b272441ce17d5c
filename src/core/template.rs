//! The `Template` data type: the compiled, persistent form of an
//! exporter-declared data template, kept alive for the lifetime of the
//! exporter and re-executed once per matching data record.

use std::time::Instant;

use bitflags::bitflags;

use crate::core::extension::ExtensionMap;
use crate::core::sequencer::SequencerStep;

bitflags! {
    /// Output-record feature bits. These mirror decisions the
    /// compiler made once, at compile time, so the VM and the sink can
    /// branch on them per record without re-inspecting the sequencer.
    #[derive(Default)]
    pub struct TemplateFlags: u16 {
        const IPV6_ADDR        = 0b0000_0001;
        const IPV6_NEXTHOP     = 0b0000_0010;
        const COUNTER64        = 0b0000_0100;
        const SAMPLED          = 0b0000_1000;
        const RECEIVED_TIME    = 0b0001_0000;
        const IPV6_EXPORTER    = 0b0010_0000;
    }
}

/// Time-base preference the compiler selected for this template. Drives
/// how the VM's post-program reconstruction combines
/// whatever the sequencer wrote into the scratch frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeBase {
    /// `flowStart/EndDeltaMicroseconds`: scratch holds a microsecond
    /// offset from the packet's export time.
    DeltaMicro,
    /// `flowStart/EndMilliseconds` (+ optional `flowDurationMilliseconds`):
    /// scratch holds absolute epoch milliseconds directly.
    Milli,
    /// `flowStart/EndSysUpTime` (+ `systemInitTimeMilliseconds`): scratch
    /// holds a sysUpTime-relative millisecond offset that must be added to
    /// the active `sys_uptime_ms` baseline.
    SysUpTime,
    /// `flowStart/EndSeconds`: scratch holds whole epoch seconds.
    UnixSeconds,
    /// No recognized time element in the template; timestamps are zero.
    None,
}

/// A compiled, exporter-owned template. Everything here is
/// produced once by the compiler (`core::compiler`) and re-read, never
/// mutated in place except by a full refresh/recompile.
#[derive(Debug, Clone)]
pub struct Template {
    pub template_id: u16,
    pub flags: TemplateFlags,
    pub output_record_size: usize,
    pub extension_map: ExtensionMap,
    pub sequencer: Vec<SequencerStep>,
    pub time_base: TimeBase,
    /// Byte offset, if any, of a synthesized router-IP slot the VM must
    /// fill from the exporter's transport source address.
    pub router_ip_offset: Option<usize>,
    /// Byte offset, if any, of a synthesized received-timestamp slot.
    pub received_offset: Option<usize>,
    /// Declared on-wire record length, for fixed-length templates (used
    /// by the "sequencer wire length == declared length" test property).
    /// `None` for templates containing a dynamic-length field.
    pub wire_record_len: Option<usize>,
    pub updated: Instant,
}

impl Template {
    /// Sum of `(input_length + skip)` across the whole program — the
    /// on-wire byte length this template's records are expected to have,
    /// when none of its fields are dynamically sized.
    pub fn sequencer_wire_len(&self) -> usize {
        self.sequencer.iter().map(|s| s.wire_len()).sum()
    }
}
