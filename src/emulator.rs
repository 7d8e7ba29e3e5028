//! Top-level machine assembly: hart, DRAM, bus, devices and the engine.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::console::Console;
use crate::cpu::csr::SharedCsrs;
use crate::cpu::mmu::Mmu;
use crate::cpu::Hart;
use crate::devices::{Clint, GoldfishRtc, Ns16550, Plic, ShutdownStatus, SiFiveTest};
use crate::elf;
use crate::engine::{EngineControl, ExecutionEngine};
use crate::memory::{Bus, Device, Dram};
use crate::EmulatorError;

pub struct EmulatorConfig {
    /// DRAM size in bytes.
    pub dram_size: usize,
    /// Attach the host terminal to the UART (raw mode when stdin is a TTY).
    pub interactive: bool,
    /// Optional wall-clock limit; the emulator halts when it expires.
    pub timeout: Option<Duration>,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        EmulatorConfig {
            dram_size: 512 * 1024 * 1024,
            interactive: false,
            timeout: None,
        }
    }
}

/// A complete single-hart RV64 machine.
pub struct Emulator {
    engine: ExecutionEngine,
}

impl Emulator {
    pub fn new(config: EmulatorConfig) -> Result<Self, EmulatorError> {
        let shared = Arc::new(SharedCsrs::default());
        let hart = Hart::new(shared.clone());
        let ctrl = Arc::new(EngineControl::new());

        let mut bus = Bus::new(Dram::new(config.dram_size));

        let shutdown_ctrl = ctrl.clone();
        let sifive_test = Arc::new(SiFiveTest::new(move |code, status| {
            shutdown_ctrl.request_shutdown_from_guest(code, status);
        }));

        let clint = Arc::new(Clint::new(shared.clone()));
        let plic = Arc::new(Plic::new(shared));

        let irq_plic = plic.clone();
        let uart = Arc::new(Ns16550::new(Arc::new(move |id, level| {
            irq_plic.set_source_level(id, level);
        })));

        let rtc = Arc::new(GoldfishRtc::new());

        let devices: Vec<Arc<dyn Device>> = vec![
            sifive_test,
            clint,
            plic,
            uart.clone(),
            rtc,
        ];
        for dev in &devices {
            bus.add_device(dev.clone())?;
        }

        let console = config.interactive.then(|| Console::new(true));

        let engine = ExecutionEngine::new(
            hart,
            Mmu::new(bus),
            devices,
            uart,
            console,
            ctrl,
            config.timeout,
        );

        Ok(Emulator { engine })
    }

    /// Load a guest ELF and point the hart at its entry.
    pub fn load_elf(&mut self, path: &Path) -> Result<(), EmulatorError> {
        let entry = elf::load(path, self.engine.mmu_mut().bus_mut().dram_mut())?;
        self.engine.hart_mut().pc = entry;
        Ok(())
    }

    /// Copy a raw host file into guest physical memory.
    pub fn load_file(&mut self, addr: u64, path: &Path) -> Result<(), EmulatorError> {
        let data = std::fs::read(path)?;
        self.engine
            .mmu_mut()
            .bus_mut()
            .dram_mut()
            .write_bytes(addr, &data)
    }

    /// Run until the guest or the host requests shutdown.
    pub fn run(&mut self) -> Result<(), EmulatorError> {
        self.engine.execute_until_halt()
    }

    pub fn shutdown_code(&self) -> u16 {
        self.engine.ctrl().shutdown_code()
    }

    pub fn shutdown_status(&self) -> Option<ShutdownStatus> {
        self.engine.ctrl().shutdown_status()
    }

    pub fn dump_signature(&self, elf_path: &Path, sig_path: &Path) -> Result<(), EmulatorError> {
        elf::dump_signature(elf_path, sig_path, self.engine.mmu().bus().dram())
    }

    /// Direct access to the machine for tests and tooling.
    pub fn engine_mut(&mut self) -> &mut ExecutionEngine {
        &mut self.engine
    }

    pub fn engine(&self) -> &ExecutionEngine {
        &self.engine
    }
}
