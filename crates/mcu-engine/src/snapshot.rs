//! Engine state snapshots
//!
//! Turns the raw state block into the document sent to clients. Memory
//! regions become plain byte sequences, the window offsets are derived from
//! the layout constants, and members that only mean something inside the
//! engine's address space (program memory image, instruction descriptor,
//! exception handler) are left out.

use serde::{Deserialize, Serialize};

use crate::layout::{RawState, RegionOffsets};

/// Serialized engine state. Field order is the wire order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(rename = "SREG")]
    pub sreg: u8,
    #[serde(rename = "SR")]
    pub sr: u8,
    pub data_memory: Vec<u8>,
    #[serde(rename = "ROM")]
    pub rom: Vec<u8>,
    pub sp: u16,
    pub pc: u16,
    pub skip_next: bool,
    pub sleeping: bool,
    pub stopped: bool,
    pub handle_interrupt: bool,
    pub auto_execute: bool,
    pub interrupt_address: u16,
    pub cycles: u16,
    pub opcode: u32,
    pub data_memory_change: i16,
    #[serde(flatten)]
    pub regions: RegionOffsets,
}

/// Build the snapshot document for `raw`.
pub fn serialize(raw: &RawState) -> Snapshot {
    Snapshot {
        sreg: raw.sreg,
        sr: raw.sr,
        data_memory: raw.data_memory.to_vec(),
        rom: raw.rom.to_vec(),
        sp: raw.sp,
        pc: raw.pc,
        skip_next: raw.skip_next,
        sleeping: raw.sleeping,
        stopped: raw.stopped,
        handle_interrupt: raw.handle_interrupt,
        auto_execute: raw.auto_execute,
        interrupt_address: raw.interrupt_address,
        cycles: raw.cycles,
        opcode: raw.opcode,
        data_memory_change: raw.data_memory_change,
        regions: RegionOffsets::compute(),
    }
}
