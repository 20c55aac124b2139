//! Memory layout of the engine's state block.
//!
//! [`RawState`] mirrors the engine's C struct member for member so that
//! `mcu_get_copy` can write straight into it. The data memory is one flat
//! array; the register, I/O, extended I/O and RAM windows are sub-ranges of it
//! described by [`RegionOffsets`].

use serde::{Deserialize, Serialize};

pub const KB: usize = 1024;

/// General purpose registers R0..R31.
pub const REGISTER_COUNT: usize = 32;
pub const IO_REGISTER_COUNT: usize = 64;
pub const EXT_IO_REGISTER_COUNT: usize = 160;

/// Registers, I/O space and RAM share this address space.
pub const DATA_MEMORY_SIZE: usize = 0x0900;
pub const ROM_SIZE: usize = KB;
pub const PROGRAM_MEMORY_SIZE: usize = 32 * KB;

/// The boot section occupies the last 512 bytes of program memory.
pub const BOOTLOADER_SIZE: usize = KB / 2;

/// Byte-for-byte copy of the engine's state.
///
/// Members the engine stores as pointers (window pointers, the current
/// instruction descriptor, the exception handler) are kept as pointer-sized
/// integers. They only reserve space in the layout and are never read.
#[repr(C)]
#[derive(Clone)]
pub struct RawState {
    pub sreg: u8,
    pub sr: u8,
    pub data_memory: [u8; DATA_MEMORY_SIZE],
    pub rom: [u8; ROM_SIZE],
    pub program_memory: [u8; PROGRAM_MEMORY_SIZE],
    boot_section: usize,
    registers: usize,
    io: usize,
    ext_io: usize,
    ram: usize,
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
    instruction: usize,
    exception_handler: usize,
    pub data_memory_change: i16,
}

impl RawState {
    /// An all-zero state block, boxed because of its size.
    pub fn zeroed() -> Box<Self> {
        Box::new(Self {
            sreg: 0,
            sr: 0,
            data_memory: [0; DATA_MEMORY_SIZE],
            rom: [0; ROM_SIZE],
            program_memory: [0; PROGRAM_MEMORY_SIZE],
            boot_section: 0,
            registers: 0,
            io: 0,
            ext_io: 0,
            ram: 0,
            sp: 0,
            pc: 0,
            skip_next: false,
            sleeping: false,
            stopped: false,
            handle_interrupt: false,
            auto_execute: false,
            interrupt_address: 0,
            cycles: 0,
            opcode: 0,
            instruction: 0,
            exception_handler: 0,
            data_memory_change: 0,
        })
    }
}

impl std::fmt::Debug for RawState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawState")
            .field("sreg", &self.sreg)
            .field("sr", &self.sr)
            .field("sp", &self.sp)
            .field("pc", &self.pc)
            .field("cycles", &self.cycles)
            .field("opcode", &format_args!("{:#06x}", self.opcode))
            .field("stopped", &self.stopped)
            .finish_non_exhaustive()
    }
}

/// Start offsets of the memory windows.
///
/// `boot_section` indexes program memory, the others index data memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionOffsets {
    #[serde(rename = "boot_section")]
    pub boot_section: usize,
    #[serde(rename = "R")]
    pub registers: usize,
    #[serde(rename = "IO")]
    pub io: usize,
    #[serde(rename = "ext_IO")]
    pub ext_io: usize,
    #[serde(rename = "RAM")]
    pub ram: usize,
}

impl RegionOffsets {
    pub const fn compute() -> Self {
        let registers = 0;
        let io = registers + REGISTER_COUNT;
        let ext_io = io + IO_REGISTER_COUNT;
        let ram = ext_io + EXT_IO_REGISTER_COUNT;
        Self {
            boot_section: PROGRAM_MEMORY_SIZE - BOOTLOADER_SIZE,
            registers,
            io,
            ext_io,
            ram,
        }
    }
}
