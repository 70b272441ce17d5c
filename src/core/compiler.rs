//! The Sequencer Compiler: turns a [`TemplateParseCache`] into
//! an `input_translation` — an output layout (extension map, record size,
//! feature flags) plus the ordered sequencer program that transcodes one
//! on-wire record of this shape into the canonical output layout.

use std::collections::{HashMap, HashSet};

use crate::core::extension::{ExtensionGroup, ExtensionMap};
use crate::core::ie::FieldType;
use crate::core::layout;
use crate::core::parse_cache::{CacheEntry, TemplateParseCache};
use crate::core::registry::Opcode;
use crate::core::sequencer::{SequencerStep, StackSlot};
use crate::core::template::{TemplateFlags, TimeBase};
use crate::error::{CoreError, Result};

/// Where a resolved wire element's decoded value goes: an output byte
/// offset (for `Move*`/`Zero*` opcodes) and/or a scratch-frame slot (for
/// `Time*`, `Save*`, `Move*_Sampled` opcodes). The opcode itself always
/// comes from the matched registry row (it already encodes the right
/// width for the field's announced length), so it isn't duplicated here.
#[derive(Debug, Clone, Copy)]
struct RoleTarget {
    output_offset: Option<u16>,
    stack_slot: StackSlot,
}

impl RoleTarget {
    fn out(offset: usize) -> Self {
        RoleTarget { output_offset: Some(offset as u16), stack_slot: StackSlot::None }
    }
    fn scratch(slot: StackSlot) -> Self {
        RoleTarget { output_offset: None, stack_slot: slot }
    }
}

/// The result of compiling one template: everything `Template` needs
/// except the final, sink-assigned extension-map id (that assignment
/// happens one layer up, once the compiler hands this back).
#[derive(Debug, Clone)]
pub struct CompiledTemplate {
    pub flags: TemplateFlags,
    pub output_record_size: usize,
    pub groups: Vec<ExtensionGroup>,
    pub sequencer: Vec<SequencerStep>,
    pub time_base: TimeBase,
    pub router_ip_offset: Option<usize>,
    pub received_offset: Option<usize>,
    /// `Some(len)` when no field in the template is dynamically sized —
    /// the declared on-wire record length the sequencer's program length
    /// is checked against.
    pub wire_record_len: Option<usize>,
}

/// Compile `cache` (the parsed, compacted declared fields of a template)
/// into a [`CompiledTemplate`]. `enabled_groups` is the configured set of
/// extension groups the deployment cares about (a configuration
/// input); `exporter_is_ipv6` decides whether the synthesized router-IP
/// extension gets the `IPV6_EXPORTER` flag.
pub fn compile(cache: &TemplateParseCache, enabled_groups: &HashSet<ExtensionGroup>, exporter_is_ipv6: bool) -> Result<CompiledTemplate> {
    if cache.all_skipped() {
        return Err(CoreError::UnsupportedTemplateShape("template has no recognized fields".into()));
    }

    let find = |id: u16| cache.entries.iter().find_map(|e| match e {
        CacheEntry::Resolved { element_id, .. } if *element_id == id => Some(()),
        _ => None,
    }).is_some();

    let mut flags = TemplateFlags::COUNTER64;
    let mut roles: HashMap<u16, RoleTarget> = HashMap::new();
    let mut cursor = layout::FIXED_HEADER_SIZE;
    let mut groups: Vec<ExtensionGroup> = Vec::new();

    // ---- step 2: time base ----
    let time_base = select_time_base(&find);
    bind_time_base(time_base, &find, &mut roles);

    // ---- step 3: mandatory common-record slots ----
    roles.insert(FieldType::ForwardingStatus as u16, RoleTarget::out(layout::FORWARDING_STATUS_OFFSET));
    roles.insert(FieldType::TcpControlBits as u16, RoleTarget::out(layout::TCP_FLAGS_OFFSET));
    roles.insert(FieldType::ProtocolIdentifier as u16, RoleTarget::out(layout::PROTOCOL_OFFSET));
    roles.insert(FieldType::IPClassOfService as u16, RoleTarget::out(layout::TOS_OFFSET));
    roles.insert(FieldType::SourceTransportPort as u16, RoleTarget::out(layout::SRC_PORT_OFFSET));
    roles.insert(FieldType::DestinationTransportPort as u16, RoleTarget::out(layout::DST_PORT_OFFSET));
    roles.insert(FieldType::BiflowDirection as u16, RoleTarget::out(layout::BIFLOW_DIRECTION_OFFSET));
    roles.insert(FieldType::FlowEndReason as u16, RoleTarget::out(layout::FLOW_END_REASON_OFFSET));
    roles.insert(FieldType::IcmpTypeCodeIPv4 as u16, RoleTarget::scratch(StackSlot::Icmp));
    roles.insert(FieldType::IcmpTypeCodeIPv6 as u16, RoleTarget::scratch(StackSlot::Icmp));

    // ---- step 4: address family ----
    if find(FieldType::SourceIPv4Address as u16) {
        roles.insert(FieldType::SourceIPv4Address as u16, RoleTarget::out(layout::SRC_ADDR_OFFSET));
        roles.insert(FieldType::DestinationIPv4Address as u16, RoleTarget::out(layout::DST_ADDR_OFFSET));
    } else if find(FieldType::SourceIPv6Address as u16) {
        roles.insert(FieldType::SourceIPv6Address as u16, RoleTarget::out(layout::SRC_ADDR_OFFSET));
        roles.insert(FieldType::DestinationIPv6Address as u16, RoleTarget::out(layout::DST_ADDR_OFFSET));
        flags |= TemplateFlags::IPV6_ADDR;
    }
    // else: both families absent, addresses stay zeroed.

    // ---- step 5: primary counters, preferring *TotalCount ----
    bind_preferred_counter(&find, FieldType::OctetTotalCount as u16, FieldType::OctetDeltaCount as u16, RoleTarget { output_offset: Some(layout::BYTES_OFFSET as u16), stack_slot: StackSlot::Bytes }, &mut roles);
    bind_preferred_counter(&find, FieldType::PacketTotalCount as u16, FieldType::PacketDeltaCount as u16, RoleTarget { output_offset: Some(layout::PACKETS_OFFSET as u16), stack_slot: StackSlot::Packets }, &mut roles);

    // ---- step 6: extension groups, canonical order ----
    for &group in ExtensionGroup::ALL.iter() {
        let synthesized = matches!(group, ExtensionGroup::RouterIp | ExtensionGroup::ReceivedTime);
        let wire_triggered = cache.groups.contains(&group);
        if !enabled_groups.contains(&group) || !(synthesized || wire_triggered) {
            continue;
        }
        let base = cursor;
        bind_group(group, base, &find, &mut roles);
        groups.push(group);
        cursor += group.byte_len();

        if matches!(group, ExtensionGroup::NextHopV6 | ExtensionGroup::BgpNextHopV6) {
            flags |= TemplateFlags::IPV6_NEXTHOP;
        }
    }

    let router_ip_offset = groups.iter().position(|g| *g == ExtensionGroup::RouterIp).map(|_| {
        if exporter_is_ipv6 {
            flags |= TemplateFlags::IPV6_EXPORTER;
        }
        group_base_offset(&groups, ExtensionGroup::RouterIp)
    });
    let received_offset = groups.iter().position(|g| *g == ExtensionGroup::ReceivedTime).map(|_| {
        flags |= TemplateFlags::RECEIVED_TIME;
        group_base_offset(&groups, ExtensionGroup::ReceivedTime)
    });

    let output_record_size = cursor;

    // ---- steps 8/9: emit the program in wire order ----
    let mut sequencer = Vec::with_capacity(cache.entries.len());
    let mut wire_len_known = true;
    let mut wire_len = 0usize;

    for entry in &cache.entries {
        match entry {
            CacheEntry::Resolved { row, element_id, input_length } => {
                wire_len += *input_length as usize;
                match roles.get(element_id) {
                    Some(target) => sequencer.push(SequencerStep {
                        opcode: row.move_op,
                        skip: 0,
                        input_length: *input_length,
                        output_offset: target.output_offset.unwrap_or(0),
                        stack_slot: target.stack_slot,
                    }),
                    // Known element, but not selected for any role this
                    // compilation (a losing Delta/Total counter variant,
                    // or a group the deployment disabled): skip its bytes.
                    None => sequencer.push(SequencerStep::skip(*input_length)),
                }
            }
            CacheEntry::Skip { length } => {
                wire_len += *length as usize;
                sequencer.push(SequencerStep::skip(*length));
            }
            CacheEntry::DynSkip => {
                wire_len_known = false;
                sequencer.push(SequencerStep::dyn_skip());
            }
        }
    }
    merge_adjacent_skips(&mut sequencer);

    Ok(CompiledTemplate {
        flags,
        output_record_size,
        groups,
        sequencer,
        time_base,
        router_ip_offset,
        received_offset,
        wire_record_len: if wire_len_known { Some(wire_len) } else { None },
    })
}

fn select_time_base(find: &impl Fn(u16) -> bool) -> TimeBase {
    if find(FieldType::FlowStartDeltaMicroseconds as u16) && find(FieldType::FlowEndDeltaMicroseconds as u16) {
        TimeBase::DeltaMicro
    } else if find(FieldType::FlowStartMilliseconds as u16) && find(FieldType::FlowEndMilliseconds as u16) {
        TimeBase::Milli
    } else if find(FieldType::FlowStartSysUpTime as u16) && find(FieldType::FlowEndSysUpTime as u16) {
        TimeBase::SysUpTime
    } else if find(FieldType::FlowStartSeconds as u16) && find(FieldType::FlowEndSeconds as u16) {
        TimeBase::UnixSeconds
    } else {
        TimeBase::None
    }
}

fn bind_time_base(mode: TimeBase, find: &impl Fn(u16) -> bool, roles: &mut HashMap<u16, RoleTarget>) {
    match mode {
        TimeBase::DeltaMicro => {
            roles.insert(FieldType::FlowStartDeltaMicroseconds as u16, RoleTarget::scratch(StackSlot::FlowStart));
            roles.insert(FieldType::FlowEndDeltaMicroseconds as u16, RoleTarget::scratch(StackSlot::FlowEnd));
        }
        TimeBase::Milli => {
            roles.insert(FieldType::FlowStartMilliseconds as u16, RoleTarget::scratch(StackSlot::FlowStart));
            roles.insert(FieldType::FlowEndMilliseconds as u16, RoleTarget::scratch(StackSlot::FlowEnd));
            if find(FieldType::FlowDurationMilliseconds as u16) {
                roles.insert(FieldType::FlowDurationMilliseconds as u16, RoleTarget::scratch(StackSlot::Duration));
            }
        }
        TimeBase::SysUpTime => {
            roles.insert(FieldType::FlowStartSysUpTime as u16, RoleTarget::scratch(StackSlot::FlowStart));
            roles.insert(FieldType::FlowEndSysUpTime as u16, RoleTarget::scratch(StackSlot::FlowEnd));
            if find(FieldType::SystemInitTimeMilliseconds as u16) {
                roles.insert(FieldType::SystemInitTimeMilliseconds as u16, RoleTarget::scratch(StackSlot::SysInitTime));
            }
        }
        TimeBase::UnixSeconds => {
            roles.insert(FieldType::FlowStartSeconds as u16, RoleTarget::scratch(StackSlot::FlowStart));
            roles.insert(FieldType::FlowEndSeconds as u16, RoleTarget::scratch(StackSlot::FlowEnd));
        }
        TimeBase::None => {}
    }
}

fn bind_preferred_counter(find: &impl Fn(u16) -> bool, total_id: u16, delta_id: u16, target: RoleTarget, roles: &mut HashMap<u16, RoleTarget>) {
    if find(total_id) {
        roles.insert(total_id, target);
    } else if find(delta_id) {
        roles.insert(delta_id, target);
    }
}

fn bind_group(group: ExtensionGroup, base: usize, find: &impl Fn(u16) -> bool, roles: &mut HashMap<u16, RoleTarget>) {
    use ExtensionGroup::*;
    match group {
        SnmpIf => {
            roles.insert(FieldType::IngressInterface as u16, RoleTarget::out(base));
            roles.insert(FieldType::EgressInterface as u16, RoleTarget::out(base + 4));
        }
        AsNumbers => {
            roles.insert(FieldType::BgpSourceAsNumber as u16, RoleTarget::out(base));
            roles.insert(FieldType::BgpDestinationAsNumber as u16, RoleTarget::out(base + 4));
        }
        PrefixTos => {
            roles.insert(FieldType::SourceIPv4PrefixLength as u16, RoleTarget::out(base));
            roles.insert(FieldType::DestinationIPv4PrefixLength as u16, RoleTarget::out(base + 1));
        }
        NextHopV4 => {
            roles.insert(FieldType::IpNextHopIPv4Address as u16, RoleTarget::out(base));
        }
        NextHopV6 => {
            roles.insert(FieldType::IpNextHopIPv6Address as u16, RoleTarget::out(base));
        }
        BgpNextHopV4 => {
            roles.insert(FieldType::BgpNextHopIPv4Address as u16, RoleTarget::out(base));
        }
        BgpNextHopV6 => {
            roles.insert(FieldType::BgpNextHopIPv6Address as u16, RoleTarget::out(base));
        }
        Vlan => {
            roles.insert(FieldType::VlanId as u16, RoleTarget::out(base));
            roles.insert(FieldType::PostVlanId as u16, RoleTarget::out(base + 2));
        }
        OutCounters => {
            bind_preferred_counter(find, FieldType::PostOctetTotalCount as u16, FieldType::PostOctetDeltaCount as u16, RoleTarget { output_offset: Some(base as u16), stack_slot: StackSlot::OutBytes }, roles);
            bind_preferred_counter(find, FieldType::PostPacketTotalCount as u16, FieldType::PostPacketDeltaCount as u16, RoleTarget { output_offset: Some((base + 8) as u16), stack_slot: StackSlot::OutPackets }, roles);
        }
        MacPair1 => {
            roles.insert(FieldType::SourceMacAddress as u16, RoleTarget::out(base));
            roles.insert(FieldType::DestinationMacAddress as u16, RoleTarget::out(base + 8));
        }
        MacPair2 => {
            roles.insert(FieldType::PostSourceMacAddress as u16, RoleTarget::out(base));
            roles.insert(FieldType::PostDestinationMacAddress as u16, RoleTarget::out(base + 8));
        }
        MplsLabels => {
            const MPLS_IDS: [FieldType; 10] = [
                FieldType::MplsTopLabelStackSection,
                FieldType::MplsLabelStackSection2,
                FieldType::MplsLabelStackSection3,
                FieldType::MplsLabelStackSection4,
                FieldType::MplsLabelStackSection5,
                FieldType::MplsLabelStackSection6,
                FieldType::MplsLabelStackSection7,
                FieldType::MplsLabelStackSection8,
                FieldType::MplsLabelStackSection9,
                FieldType::MplsLabelStackSection10,
            ];
            for (i, id) in MPLS_IDS.iter().enumerate() {
                roles.insert(*id as u16, RoleTarget::out(base + i * 4));
            }
        }
        NelNatVrf => {
            roles.insert(FieldType::NatEvent as u16, RoleTarget::out(base));
            roles.insert(FieldType::IngressVRFID as u16, RoleTarget::out(base + 4));
            roles.insert(FieldType::EgressVRFID as u16, RoleTarget::out(base + 8));
        }
        NselNat => {
            roles.insert(FieldType::PostNATSourceIPv4Address as u16, RoleTarget::out(base));
            roles.insert(FieldType::PostNATDestinationIPv4Address as u16, RoleTarget::out(base + 4));
            roles.insert(FieldType::PostNAPTSourceTransportPort as u16, RoleTarget::out(base + 8));
            roles.insert(FieldType::PostNAPTDestinationTransportPort as u16, RoleTarget::out(base + 10));
        }
        RouterIp | ReceivedTime => {
            // Synthesized post-transcode by the VM; no wire element feeds them.
        }
    }
}

fn group_base_offset(groups: &[ExtensionGroup], target: ExtensionGroup) -> usize {
    let mut offset = layout::FIXED_HEADER_SIZE;
    for &g in groups {
        if g == target {
            return offset;
        }
        offset += g.byte_len();
    }
    unreachable!("group_base_offset called with a group not in the map")
}

/// Merge consecutive `Nop`/skip-only steps produced by the wire-order
/// emission pass. `DYN_SKIP` steps are left untouched — merging one into a
/// run of fixed-width skips would lose the distinct variable-length handling
/// it needs at execution time.
fn merge_adjacent_skips(steps: &mut Vec<SequencerStep>) {
    let mut merged: Vec<SequencerStep> = Vec::with_capacity(steps.len());
    for step in steps.drain(..) {
        let is_pure_skip = step.opcode == Opcode::Nop && step.input_length == 0;
        if is_pure_skip {
            if let Some(last) = merged.last_mut() {
                if last.opcode == Opcode::Nop && last.input_length == 0 {
                    last.skip += step.skip;
                    continue;
                }
            }
        }
        merged.push(step);
    }
    *steps = merged;
}
