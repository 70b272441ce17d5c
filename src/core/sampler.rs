//! Samplers and option-template descriptors: the metadata an
//! exporter announces about itself rather than about a flow.

/// A configured packet-sampling mechanism. `sampler_id ==
/// -1` is the reserved "default/standard" sampler: the one an exporter
/// announces without a v9-style `samplerId`/IPFIX `selectorId` scope,
/// used whenever a record doesn't otherwise pick one by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sampler {
    pub sampler_id: i32,
    pub mode: u8,
    pub interval: u64,
}

impl Sampler {
    pub const STANDARD_ID: i32 = -1;

    pub fn standard(mode: u8, interval: u64) -> Self {
        Sampler { sampler_id: Self::STANDARD_ID, mode, interval }
    }
}

/// Byte offset + width of a recognized field within an option-data record,
/// as compiled from an Options Template Set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSlot {
    pub offset: usize,
    pub length: usize,
}

/// What an Options Template Set (set id 3) compiled down to: which byte
/// ranges of a matching option-data record carry sampler parameters or
/// the exporter's sysUpTime baseline. Any field the option template
/// doesn't recognize is simply not looked up — only samplerId/selectorId,
/// samplerMode/selectorAlgorithm, samplerRandomInterval/
/// samplingPacketInterval, samplingInterval, samplingAlgorithm and
/// systemInitTimeMilliseconds are ever extracted.
#[derive(Debug, Clone, Default)]
pub struct OptionTemplateDescriptor {
    pub table_id: u16,
    pub sampler_id: Option<FieldSlot>,
    pub sampler_mode: Option<FieldSlot>,
    pub sampler_interval: Option<FieldSlot>,
    pub sys_uptime: Option<FieldSlot>,
    /// Total byte length of one option-data record of this shape, so the
    /// dispatcher can step through consecutive records in an option-data
    /// set without needing a separate template lookup per record.
    pub record_length: usize,
}

impl OptionTemplateDescriptor {
    pub fn new(table_id: u16) -> Self {
        OptionTemplateDescriptor { table_id, ..Default::default() }
    }

    /// True if this descriptor recognizes nothing at all — a template made
    /// up entirely of option fields we don't care about. The dispatcher
    /// still keeps it (so option-data sets id-match something) but never
    /// extracts a sampler or sysUpTime from it.
    pub fn is_empty(&self) -> bool {
        self.sampler_id.is_none() && self.sampler_mode.is_none() && self.sampler_interval.is_none() && self.sys_uptime.is_none()
    }
}
