//! uemu: a 64-bit RISC-V system emulator.
//!
//! Implements RV64IMAFDC with the Zicsr extension, M/S/U privilege modes
//! and Sv39 virtual memory, enough to boot supervisor-mode guests against
//! a small set of memory-mapped peripherals (CLINT, PLIC, NS16550 UART,
//! Goldfish RTC, SiFive test finisher).
//!
//! Execution is split over two threads: a CPU worker running the
//! fetch-decode-execute loop, and a driver ticking devices and exchanging
//! console bytes with the host.

pub mod console;
pub mod cpu;
pub mod devices;
pub mod elf;
pub mod emulator;
pub mod engine;
pub mod memory;

pub use emulator::{Emulator, EmulatorConfig};
pub use engine::{EngineControl, ExecutionEngine};

use thiserror::Error;

/// Emulator-level (non-ISA) failures. ISA-visible traps are handled inside
/// the execution loop and never surface here.
#[derive(Error, Debug)]
pub enum EmulatorError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ELF parse error: {0}")]
    ElfParse(#[from] goblin::error::Error),

    #[error("invalid ELF: {0}")]
    InvalidElf(String),

    #[error("DRAM access out of bounds: addr={addr:#x} len={len}")]
    DramRange { addr: u64, len: usize },

    #[error("device '{name}' overlaps '{other}'")]
    DeviceOverlap { name: String, other: String },

    #[error("symbol '{0}' not found in ELF")]
    MissingSymbol(String),

    #[error("execution engine failure: {0}")]
    Worker(String),
}
