//! The compiled sequencer program: the ordered list of steps a [`Template`]
//! (see `core::template`) executes against one incoming data record.
//!
//! A step is `(opcode, skip, input_length, output_offset, stack_slot)`
//! exactly as spec'd: `skip` bytes of input are discarded *before* reading
//! `input_length` bytes, which are then transcoded by `opcode` either into
//! the output record at `output_offset` or into the scratch frame at
//! `stack_slot`.

use crate::core::registry::Opcode;

/// Which scratch-frame field (if any) a step's decoded value feeds.
/// `None` means the step only ever touches the output buffer (or input
/// cursor, for skips).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackSlot {
    None,
    FlowStart,
    FlowEnd,
    Duration,
    SysInitTime,
    Icmp,
    Bytes,
    Packets,
    OutBytes,
    OutPackets,
}

/// One compiled sequencer step.
#[derive(Debug, Clone, Copy)]
pub struct SequencerStep {
    pub opcode: Opcode,
    /// Bytes to discard from the input before this step's own read.
    pub skip: u16,
    /// Width of this step's own read, in on-wire bytes. Zero for a step
    /// that only skips (no opcode execution besides the skip itself).
    pub input_length: u16,
    /// Byte offset into the output record this step writes to. Unused
    /// (zero) for time/save/skip opcodes that never touch the output.
    pub output_offset: u16,
    pub stack_slot: StackSlot,
}

impl SequencerStep {
    pub fn mv(opcode: Opcode, input_length: u16, output_offset: u16) -> Self {
        SequencerStep { opcode, skip: 0, input_length, output_offset, stack_slot: StackSlot::None }
    }

    pub fn time(opcode: Opcode, input_length: u16, stack_slot: StackSlot) -> Self {
        SequencerStep { opcode, skip: 0, input_length, output_offset: 0, stack_slot }
    }

    pub fn save_icmp(input_length: u16) -> Self {
        SequencerStep { opcode: Opcode::SaveIcmp, skip: 0, input_length, output_offset: 0, stack_slot: StackSlot::Icmp }
    }

    pub fn skip(skip: u16) -> Self {
        SequencerStep { opcode: Opcode::Nop, skip, input_length: 0, output_offset: 0, stack_slot: StackSlot::None }
    }

    pub fn dyn_skip() -> Self {
        SequencerStep { opcode: Opcode::DynSkip, skip: 0, input_length: 0, output_offset: 0, stack_slot: StackSlot::None }
    }

    pub fn zero(opcode: Opcode, output_offset: u16) -> Self {
        SequencerStep { opcode, skip: 0, input_length: 0, output_offset, stack_slot: StackSlot::None }
    }

    /// Total on-wire bytes this step accounts for: the leading skip plus
    /// its own read. Summed across a program, this should equal the
    /// template's declared on-wire record length for fixed-width templates.
    pub fn wire_len(&self) -> usize {
        self.skip as usize + self.input_length as usize
    }
}
