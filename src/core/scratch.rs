//! The scratch frame: per-data-record VM working state. It is
//! never persisted on the `Template` — it is built fresh by
//! `core::vm::execute` for every record and discarded once that record has
//! been written out.

/// Per-record scratch state written by sequencer steps and consumed by the
/// VM's post-program reconstruction pass (time base, ICMP dst-port
/// overwrite, router-IP / received-time synthesis).
#[derive(Debug, Default, Clone, Copy)]
pub struct ScratchFrame {
    pub flow_start_ms: u64,
    pub flow_end_ms: u64,
    pub duration_ms: u64,
    /// Active sysUpTime baseline for this record: seeded from the
    /// exporter's option-announced value, overwritten if the record
    /// itself carries `systemInitTimeMilliseconds`.
    pub sys_uptime_ms: u64,
    pub icmp_type_code: Option<u16>,
    pub packets: u64,
    pub bytes: u64,
    pub out_packets: u64,
    pub out_bytes: u64,
}

impl ScratchFrame {
    pub fn reset(sys_uptime_ms: u64) -> Self {
        ScratchFrame { sys_uptime_ms, ..Default::default() }
    }
}
