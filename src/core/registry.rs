//! The Element Registry: a static catalog mapping
//! `(element_id, input_length)` to a transcode opcode, a zero-fill opcode,
//! an output byte width, and (when applicable) the extension group the
//! element feeds.
//!
//! Multiple rows may share `element_id` to express width polymorphism — an
//! exporter may announce `octetDeltaCount` as 4, 6 or 8 bytes on the wire;
//! each width gets its own row with its own opcode. An `(element_id,
//! input_length)` pair with no matching row is an *unmapped* element: the
//! compiler counts it and the field is skipped on the wire, never an error.

use crate::core::extension::ExtensionGroup;
use crate::core::ie::FieldType;

/// The closed set of sequencer opcodes.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Opcode {
    Nop,
    DynSkip,
    Move8,
    Move16,
    Move32,
    Move40,
    Move48,
    Move56,
    Move64,
    Move128,
    Move32Sampled,
    Move48Sampled,
    Move64Sampled,
    MoveMac,
    MoveMpls,
    MoveFlags,
    Time64Milli,
    TimeDeltaMicro,
    TimeMilli,
    SysInitTime,
    TimeUnix,
    Time64MilliDur,
    SaveIcmp,
    Zero8,
    Zero16,
    Zero32,
    Zero64,
    Zero128,
}

/// One row of the Element Registry.
#[derive(Debug, Clone, Copy)]
pub struct ElementRow {
    pub element_id: u16,
    pub input_length: u16,
    pub output_length: u8,
    pub move_op: Opcode,
    pub zero_op: Opcode,
    pub group: Option<ExtensionGroup>,
}

const fn row(element_id: u16, input_length: u16, output_length: u8, move_op: Opcode, zero_op: Opcode, group: Option<ExtensionGroup>) -> ElementRow {
    ElementRow { element_id, input_length, output_length, move_op, zero_op, group }
}

use ExtensionGroup::*;
use Opcode::*;

/// The static catalog. Rows that share an `element_id` are kept contiguous
/// so a scan-for-id then match-on-length lookup is a simple linear scan.
pub static REGISTRY: &[ElementRow] = &[
    // ---- mandatory common-record fields (group = None) ----
    row(FieldType::ForwardingStatus as u16, 1, 1, Move8, Zero8, None),
    row(FieldType::TcpControlBits as u16, 1, 1, Move8, Zero8, None),
    row(FieldType::TcpControlBits as u16, 2, 1, MoveFlags, Zero8, None),
    row(FieldType::ProtocolIdentifier as u16, 1, 1, Move8, Zero8, None),
    row(FieldType::IPClassOfService as u16, 1, 1, Move8, Zero8, None),
    row(FieldType::SourceTransportPort as u16, 2, 2, Move16, Zero16, None),
    row(FieldType::DestinationTransportPort as u16, 2, 2, Move16, Zero16, None),
    row(FieldType::BiflowDirection as u16, 1, 1, Move8, Zero8, None),
    row(FieldType::FlowEndReason as u16, 1, 1, Move8, Zero8, None),
    row(FieldType::IcmpTypeCodeIPv4 as u16, 2, 0, SaveIcmp, Nop, None),
    row(FieldType::IcmpTypeCodeIPv6 as u16, 2, 0, SaveIcmp, Nop, None),
    // ---- address family (group = None, chosen by the compiler) ----
    row(FieldType::SourceIPv4Address as u16, 4, 4, Move32, Zero32, None),
    row(FieldType::DestinationIPv4Address as u16, 4, 4, Move32, Zero32, None),
    row(FieldType::SourceIPv6Address as u16, 16, 16, Move128, Zero128, None),
    row(FieldType::DestinationIPv6Address as u16, 16, 16, Move128, Zero128, None),
    // ---- primary byte/packet counters (group = None, 64-bit output always) ----
    row(FieldType::OctetDeltaCount as u16, 4, 8, Move32Sampled, Zero64, None),
    row(FieldType::OctetDeltaCount as u16, 6, 8, Move48Sampled, Zero64, None),
    row(FieldType::OctetDeltaCount as u16, 8, 8, Move64Sampled, Zero64, None),
    row(FieldType::PacketDeltaCount as u16, 4, 8, Move32Sampled, Zero64, None),
    row(FieldType::PacketDeltaCount as u16, 6, 8, Move48Sampled, Zero64, None),
    row(FieldType::PacketDeltaCount as u16, 8, 8, Move64Sampled, Zero64, None),
    row(FieldType::OctetTotalCount as u16, 4, 8, Move32Sampled, Zero64, None),
    row(FieldType::OctetTotalCount as u16, 6, 8, Move48Sampled, Zero64, None),
    row(FieldType::OctetTotalCount as u16, 8, 8, Move64Sampled, Zero64, None),
    row(FieldType::PacketTotalCount as u16, 4, 8, Move32Sampled, Zero64, None),
    row(FieldType::PacketTotalCount as u16, 6, 8, Move48Sampled, Zero64, None),
    row(FieldType::PacketTotalCount as u16, 8, 8, Move64Sampled, Zero64, None),
    // ---- time elements: written to scratch only (output_length = 0) ----
    row(FieldType::FlowStartSeconds as u16, 4, 0, TimeUnix, Nop, None),
    row(FieldType::FlowEndSeconds as u16, 4, 0, TimeUnix, Nop, None),
    row(FieldType::FlowStartMilliseconds as u16, 8, 0, TimeMilli, Nop, None),
    row(FieldType::FlowEndMilliseconds as u16, 8, 0, TimeMilli, Nop, None),
    row(FieldType::FlowDurationMilliseconds as u16, 4, 0, Time64MilliDur, Nop, None),
    row(FieldType::FlowStartDeltaMicroseconds as u16, 4, 0, TimeDeltaMicro, Nop, None),
    row(FieldType::FlowEndDeltaMicroseconds as u16, 4, 0, TimeDeltaMicro, Nop, None),
    row(FieldType::FlowStartSysUpTime as u16, 4, 0, Time64Milli, Nop, None),
    row(FieldType::FlowEndSysUpTime as u16, 4, 0, Time64Milli, Nop, None),
    row(FieldType::SystemInitTimeMilliseconds as u16, 8, 0, SysInitTime, Nop, None),
    // ---- SNMP interface extension ----
    row(FieldType::IngressInterface as u16, 2, 4, Move16, Zero32, Some(SnmpIf)),
    row(FieldType::IngressInterface as u16, 4, 4, Move32, Zero32, Some(SnmpIf)),
    row(FieldType::EgressInterface as u16, 2, 4, Move16, Zero32, Some(SnmpIf)),
    row(FieldType::EgressInterface as u16, 4, 4, Move32, Zero32, Some(SnmpIf)),
    // ---- AS number extension ----
    row(FieldType::BgpSourceAsNumber as u16, 2, 4, Move16, Zero32, Some(AsNumbers)),
    row(FieldType::BgpSourceAsNumber as u16, 4, 4, Move32, Zero32, Some(AsNumbers)),
    row(FieldType::BgpDestinationAsNumber as u16, 2, 4, Move16, Zero32, Some(AsNumbers)),
    row(FieldType::BgpDestinationAsNumber as u16, 4, 4, Move32, Zero32, Some(AsNumbers)),
    // ---- prefix length bundle ----
    row(FieldType::SourceIPv4PrefixLength as u16, 1, 1, Move8, Zero8, Some(PrefixTos)),
    row(FieldType::DestinationIPv4PrefixLength as u16, 1, 1, Move8, Zero8, Some(PrefixTos)),
    // ---- next hop ----
    row(FieldType::IpNextHopIPv4Address as u16, 4, 4, Move32, Zero32, Some(NextHopV4)),
    row(FieldType::IpNextHopIPv6Address as u16, 16, 16, Move128, Zero128, Some(NextHopV6)),
    row(FieldType::BgpNextHopIPv4Address as u16, 4, 4, Move32, Zero32, Some(BgpNextHopV4)),
    row(FieldType::BgpNextHopIPv6Address as u16, 16, 16, Move128, Zero128, Some(BgpNextHopV6)),
    // ---- VLAN ----
    row(FieldType::VlanId as u16, 2, 2, Move16, Zero16, Some(Vlan)),
    row(FieldType::PostVlanId as u16, 2, 2, Move16, Zero16, Some(Vlan)),
    // ---- reverse/out counters ----
    row(FieldType::PostOctetDeltaCount as u16, 4, 8, Move32Sampled, Zero64, Some(OutCounters)),
    row(FieldType::PostOctetDeltaCount as u16, 8, 8, Move64Sampled, Zero64, Some(OutCounters)),
    row(FieldType::PostPacketDeltaCount as u16, 4, 8, Move32Sampled, Zero64, Some(OutCounters)),
    row(FieldType::PostPacketDeltaCount as u16, 8, 8, Move64Sampled, Zero64, Some(OutCounters)),
    row(FieldType::PostOctetTotalCount as u16, 4, 8, Move32Sampled, Zero64, Some(OutCounters)),
    row(FieldType::PostOctetTotalCount as u16, 8, 8, Move64Sampled, Zero64, Some(OutCounters)),
    row(FieldType::PostPacketTotalCount as u16, 4, 8, Move32Sampled, Zero64, Some(OutCounters)),
    row(FieldType::PostPacketTotalCount as u16, 8, 8, Move64Sampled, Zero64, Some(OutCounters)),
    // ---- MAC pairs ----
    row(FieldType::SourceMacAddress as u16, 6, 8, MoveMac, Zero64, Some(MacPair1)),
    row(FieldType::DestinationMacAddress as u16, 6, 8, MoveMac, Zero64, Some(MacPair1)),
    row(FieldType::PostSourceMacAddress as u16, 6, 8, MoveMac, Zero64, Some(MacPair2)),
    row(FieldType::PostDestinationMacAddress as u16, 6, 8, MoveMac, Zero64, Some(MacPair2)),
    // ---- MPLS label stack (10 slots) ----
    row(FieldType::MplsTopLabelStackSection as u16, 3, 4, MoveMpls, Zero32, Some(MplsLabels)),
    row(FieldType::MplsLabelStackSection2 as u16, 3, 4, MoveMpls, Zero32, Some(MplsLabels)),
    row(FieldType::MplsLabelStackSection3 as u16, 3, 4, MoveMpls, Zero32, Some(MplsLabels)),
    row(FieldType::MplsLabelStackSection4 as u16, 3, 4, MoveMpls, Zero32, Some(MplsLabels)),
    row(FieldType::MplsLabelStackSection5 as u16, 3, 4, MoveMpls, Zero32, Some(MplsLabels)),
    row(FieldType::MplsLabelStackSection6 as u16, 3, 4, MoveMpls, Zero32, Some(MplsLabels)),
    row(FieldType::MplsLabelStackSection7 as u16, 3, 4, MoveMpls, Zero32, Some(MplsLabels)),
    row(FieldType::MplsLabelStackSection8 as u16, 3, 4, MoveMpls, Zero32, Some(MplsLabels)),
    row(FieldType::MplsLabelStackSection9 as u16, 3, 4, MoveMpls, Zero32, Some(MplsLabels)),
    row(FieldType::MplsLabelStackSection10 as u16, 3, 4, MoveMpls, Zero32, Some(MplsLabels)),
    // ---- NEL: NAT event + VRFs ----
    row(FieldType::NatEvent as u16, 1, 1, Move8, Zero8, Some(NelNatVrf)),
    row(FieldType::IngressVRFID as u16, 4, 4, Move32, Zero32, Some(NelNatVrf)),
    row(FieldType::EgressVRFID as u16, 4, 4, Move32, Zero32, Some(NelNatVrf)),
    // ---- NSEL: NAT translated addresses/ports ----
    row(FieldType::PostNATSourceIPv4Address as u16, 4, 4, Move32, Zero32, Some(NselNat)),
    row(FieldType::PostNATDestinationIPv4Address as u16, 4, 4, Move32, Zero32, Some(NselNat)),
    row(FieldType::PostNAPTSourceTransportPort as u16, 2, 2, Move16, Zero16, Some(NselNat)),
    row(FieldType::PostNAPTDestinationTransportPort as u16, 2, 2, Move16, Zero16, Some(NselNat)),
];

/// Scan the registry for a row matching `(element_id, input_length)`. Rows
/// sharing an id express width polymorphism; an id/length pair with no row
/// is an unmapped element (counted, then skipped on the wire).
pub fn lookup(element_id: u16, input_length: u16) -> Option<&'static ElementRow> {
    REGISTRY.iter().find(|r| r.element_id == element_id && r.input_length == input_length)
}

/// True if at least one row exists for this element id, regardless of
/// length (used to tell "unknown element" apart from "known element,
/// unexpected width" while compacting skip runs).
pub fn is_known_element(element_id: u16) -> bool {
    REGISTRY.iter().any(|r| r.element_id == element_id)
}
