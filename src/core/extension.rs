//! Extension groups and extension maps.
//!
//! An extension group is a named, fixed-size bundle of output fields that a
//! template may or may not populate (SNMP interface indices, AS numbers,
//! MPLS label stack, NAT translation fields, ...). An extension map is the
//! ordered list of groups a particular compiled template actually uses,
//! together with the numeric id the downstream sink assigns it so readers
//! can tell which extension blocks follow the common record header.

use std::fmt;

/// Canonical extension groups, in the order the compiler considers them.
/// Order here is the tie-breaker used to keep two compilations of the same
/// field set producing the same map.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash, PartialOrd, Ord)]
pub enum ExtensionGroup {
    SnmpIf,
    AsNumbers,
    PrefixTos,
    NextHopV4,
    NextHopV6,
    BgpNextHopV4,
    BgpNextHopV6,
    Vlan,
    OutCounters,
    MacPair1,
    MacPair2,
    MplsLabels,
    NelNatVrf,
    NselNat,
    RouterIp,
    ReceivedTime,
}

impl ExtensionGroup {
    /// All groups, in canonical compiler order.
    pub const ALL: [ExtensionGroup; 16] = [
        ExtensionGroup::SnmpIf,
        ExtensionGroup::AsNumbers,
        ExtensionGroup::PrefixTos,
        ExtensionGroup::NextHopV4,
        ExtensionGroup::NextHopV6,
        ExtensionGroup::BgpNextHopV4,
        ExtensionGroup::BgpNextHopV6,
        ExtensionGroup::Vlan,
        ExtensionGroup::OutCounters,
        ExtensionGroup::MacPair1,
        ExtensionGroup::MacPair2,
        ExtensionGroup::MplsLabels,
        ExtensionGroup::NelNatVrf,
        ExtensionGroup::NselNat,
        ExtensionGroup::RouterIp,
        ExtensionGroup::ReceivedTime,
    ];

    /// Byte width of the group's fields in the output record.
    pub fn byte_len(self) -> usize {
        match self {
            ExtensionGroup::SnmpIf => 8,        // ingress(u32) + egress(u32)
            ExtensionGroup::AsNumbers => 8,      // src AS(u32) + dst AS(u32)
            ExtensionGroup::PrefixTos => 4,      // src pfxlen, dst pfxlen, tos, direction
            ExtensionGroup::NextHopV4 => 4,
            ExtensionGroup::NextHopV6 => 16,
            ExtensionGroup::BgpNextHopV4 => 4,
            ExtensionGroup::BgpNextHopV6 => 16,
            ExtensionGroup::Vlan => 4,           // src vlan(u16) + dst vlan(u16)
            ExtensionGroup::OutCounters => 16,   // out-bytes(u64) + out-packets(u64)
            ExtensionGroup::MacPair1 => 16,      // in src mac + in dst mac, zero-extended to u64
            ExtensionGroup::MacPair2 => 16,      // out src mac + out dst mac
            ExtensionGroup::MplsLabels => 40,    // 10 x u32 label|exp|s
            ExtensionGroup::NelNatVrf => 12,     // nat event(u8)+pad3, ingress vrf(u32), egress vrf(u32)
            ExtensionGroup::NselNat => 12,       // post-nat src4, post-nat dst4, post-napt src port(u16), dst port(u16)
            ExtensionGroup::RouterIp => 16,      // v4 in low 4 bytes or full v6
            ExtensionGroup::ReceivedTime => 8,   // wall-clock ms
        }
    }

    /// Stable wire tag used to encode the extension map for the sink.
    pub fn tag(self) -> u16 {
        ExtensionGroup::ALL.iter().position(|g| *g == self).unwrap() as u16 + 1
    }

    /// Parses the snake_case name used on the `--extensions` CLI flag
    /// (e.g. `snmp_if`, `router_ip`). Unknown names return `None` so the
    /// caller can reject the whole flag with one clear error.
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "snmp_if" => ExtensionGroup::SnmpIf,
            "as_numbers" => ExtensionGroup::AsNumbers,
            "prefix_tos" => ExtensionGroup::PrefixTos,
            "next_hop_v4" => ExtensionGroup::NextHopV4,
            "next_hop_v6" => ExtensionGroup::NextHopV6,
            "bgp_next_hop_v4" => ExtensionGroup::BgpNextHopV4,
            "bgp_next_hop_v6" => ExtensionGroup::BgpNextHopV6,
            "vlan" => ExtensionGroup::Vlan,
            "out_counters" => ExtensionGroup::OutCounters,
            "mac_pair1" => ExtensionGroup::MacPair1,
            "mac_pair2" => ExtensionGroup::MacPair2,
            "mpls_labels" => ExtensionGroup::MplsLabels,
            "nel_nat_vrf" => ExtensionGroup::NelNatVrf,
            "nsel_nat" => ExtensionGroup::NselNat,
            "router_ip" => ExtensionGroup::RouterIp,
            "received_time" => ExtensionGroup::ReceivedTime,
            _ => return None,
        })
    }
}

/// The output-side descriptor listing which extension groups a compiled
/// template populates, in the order the compiler emitted them, plus the id
/// the downstream sink assigned (or confirmed) for this set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionMap {
    pub map_id: u32,
    pub groups: Vec<ExtensionGroup>,
}

impl ExtensionMap {
    pub fn new(map_id: u32, groups: Vec<ExtensionGroup>) -> Self {
        ExtensionMap { map_id, groups }
    }

    /// Sum of the group byte widths, with no rounding. This is the portion
    /// of `output_record_size` contributed by extensions.
    pub fn fields_byte_len(&self) -> usize {
        self.groups.iter().map(|g| g.byte_len()).sum()
    }

    /// The on-wire metadata encoding registered with the sink: map id,
    /// tag list, zero terminator, rounded up to a 4-byte multiple.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(4 + self.groups.len() * 2 + 2);
        buf.extend_from_slice(&self.map_id.to_be_bytes());
        for g in &self.groups {
            buf.extend_from_slice(&g.tag().to_be_bytes());
        }
        buf.extend_from_slice(&0u16.to_be_bytes()); // terminator
        while buf.len() % 4 != 0 {
            buf.push(0);
        }
        buf
    }

    /// Whether `self` and `other` describe the same set and order of
    /// extension groups (used to decide `extension_map_changed`).
    pub fn same_shape(&self, other: &ExtensionMap) -> bool {
        self.groups == other.groups
    }
}

impl fmt::Display for ExtensionMap {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "map#{} [", self.map_id)?;
        for (i, g) in self.groups.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{:?}", g)?;
        }
        write!(f, "]")
    }
}
