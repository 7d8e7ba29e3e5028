//! Memory-mapped peripherals.
//!
//! Every device implements the bus contract from [`crate::memory::Device`]
//! and guards its own state with a mutex: MMIO arrives on the CPU worker
//! while `tick` and host I/O run on the driver thread. Devices that raise
//! external interrupts carry an `(id, level)` callback into the interrupt
//! controller.

pub mod clint;
pub mod plic;
pub mod rtc;
pub mod sifive_test;
pub mod uart;

pub use clint::Clint;
pub use plic::Plic;
pub use rtc::GoldfishRtc;
pub use sifive_test::{ShutdownStatus, SiFiveTest};
pub use uart::Ns16550;

use std::sync::Arc;

/// Raise (`level = true`) or lower an external interrupt line.
pub type IrqCallback = Arc<dyn Fn(u32, bool) + Send + Sync>;
