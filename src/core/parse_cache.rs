//! The Template Parse Cache: transient scratch state rebuilt
//! for every template record the dispatcher reads. It resolves each
//! declared field against the Element Registry, applies the
//! enterprise-29305 (reverse information element) forward mapping, and
//! compacts runs of unmapped fields into single skips before the compiler
//! ever sees them.

use crate::core::extension::ExtensionGroup;
use crate::core::ie::{reverse_to_forward, REVERSE_ENTERPRISE};
use crate::core::registry::{self, ElementRow};
use crate::core::wire::FieldSpec;

/// One compacted entry in a template's declared field order.
#[derive(Debug, Clone, Copy)]
pub enum CacheEntry {
    /// A field the Element Registry maps to a transcode opcode.
    Resolved { row: &'static ElementRow, element_id: u16, input_length: u16 },
    /// One or more consecutive unmapped fixed-length fields, coalesced
    /// into a single skip of their summed length.
    Skip { length: u16 },
    /// A variable-length field (on-wire length `0xFFFF`). Never coalesced
    /// with a neighboring skip — its length isn't known until the VM
    /// reads the record's own length-prefix byte(s).
    DynSkip,
}

impl CacheEntry {
    pub fn group(&self) -> Option<ExtensionGroup> {
        match self {
            CacheEntry::Resolved { row, .. } => row.group,
            _ => None,
        }
    }
}

/// Scratch state for one template record, reset at the start of every
/// parse.
#[derive(Debug, Default)]
pub struct TemplateParseCache {
    /// The template's declared fields, in on-wire order, after skip
    /// compaction.
    pub entries: Vec<CacheEntry>,
    /// The set of extension groups this template will populate, derived
    /// from `entries`.
    pub groups: Vec<ExtensionGroup>,
    /// Count of fields that had no Element Registry row at all (either
    /// truly unknown, or an enterprise number other than the recognized
    /// reverse-element one) — purely informational/for logging.
    pub unmapped_count: u32,
}

impl TemplateParseCache {
    /// Resolve and compact `fields` (the template's declared field
    /// specifiers, in wire order) into a parse cache.
    pub fn build(fields: &[FieldSpec]) -> Self {
        let mut raw: Vec<CacheEntry> = Vec::with_capacity(fields.len());
        let mut unmapped_count = 0u32;

        for field in fields {
            if field.is_variable_length() {
                raw.push(CacheEntry::DynSkip);
                continue;
            }

            let effective_id = match field.enterprise {
                None => Some(field.element_id),
                Some(ent) if ent == REVERSE_ENTERPRISE => reverse_to_forward(field.element_id),
                Some(_) => None, // any other enterprise number: always SKIP_ELEMENT
            };

            let resolved = effective_id.and_then(|id| registry::lookup(id, field.length));
            match resolved {
                Some(row) => raw.push(CacheEntry::Resolved { row, element_id: effective_id.unwrap(), input_length: field.length }),
                None => {
                    unmapped_count += 1;
                    if let Some(id) = effective_id {
                        if registry::is_known_element(id) {
                            log::trace!("element {} known but declared at an unsupported width ({} bytes), skipping", id, field.length);
                        }
                    }
                    raw.push(CacheEntry::Skip { length: field.length });
                }
            }
        }

        let entries = compact_skip_runs(raw);
        let mut groups: Vec<ExtensionGroup> = entries.iter().filter_map(CacheEntry::group).collect();
        groups.dedup();

        TemplateParseCache { entries, groups, unmapped_count }
    }

    /// True if compaction left nothing but skips — the template
    /// contributes no useful data and must be dropped.
    pub fn all_skipped(&self) -> bool {
        !self.entries.iter().any(|e| matches!(e, CacheEntry::Resolved { .. }))
    }
}

/// Merge consecutive fixed-length `Skip` entries into one, leaving
/// `Resolved` and `DynSkip` entries untouched and in place.
fn compact_skip_runs(raw: Vec<CacheEntry>) -> Vec<CacheEntry> {
    let mut out: Vec<CacheEntry> = Vec::with_capacity(raw.len());
    for entry in raw {
        match (out.last_mut(), entry) {
            (Some(CacheEntry::Skip { length: prev }), CacheEntry::Skip { length: next }) => {
                *prev += next;
            }
            (_, entry) => out.push(entry),
        }
    }
    out
}
