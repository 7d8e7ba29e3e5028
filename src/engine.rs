//! Execution engine: the fetch-decode-execute worker and the device
//! driver loop.
//!
//! The worker owns all architectural state and is its sole mutator. The
//! driver (the thread calling [`ExecutionEngine::execute_until_halt`])
//! ticks devices and pumps console input until the worker exits. The two
//! meet only through the devices' own locks and the shared CSR atomics.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::console::Console;
use crate::cpu::decode::Decoder;
use crate::cpu::mmu::Mmu;
use crate::cpu::trap::Trap;
use crate::cpu::Hart;
use crate::devices::{Ns16550, ShutdownStatus};
use crate::memory::Device;
use crate::EmulatorError;

/// Shutdown coordination between devices, host and the CPU worker.
///
/// Guest-requested shutdown is checked every cycle; the host flag is
/// polled every 65536 cycles to keep it off the hot path while still
/// bounding shutdown latency.
pub struct EngineControl {
    guest_shutdown: AtomicBool,
    host_halt: AtomicBool,
    shutdown_code: AtomicU32,
    shutdown_status: AtomicU32,
}

impl EngineControl {
    pub fn new() -> Self {
        EngineControl {
            guest_shutdown: AtomicBool::new(false),
            host_halt: AtomicBool::new(false),
            shutdown_code: AtomicU32::new(0),
            shutdown_status: AtomicU32::new(0),
        }
    }

    /// Orderly shutdown requested by the guest (SiFive test device write).
    pub fn request_shutdown_from_guest(&self, code: u16, status: ShutdownStatus) {
        self.shutdown_code.store(code as u32, Ordering::Relaxed);
        self.shutdown_status.store(status as u32, Ordering::Relaxed);
        self.guest_shutdown.store(true, Ordering::Release);
    }

    /// Host-side halt (signal, timeout). Idempotent and lock-free.
    pub fn request_shutdown_from_host(&self) {
        self.host_halt.store(true, Ordering::Release);
    }

    pub fn shutdown_code(&self) -> u16 {
        self.shutdown_code.load(Ordering::Relaxed) as u16
    }

    pub fn shutdown_status(&self) -> Option<ShutdownStatus> {
        match self.shutdown_status.load(Ordering::Relaxed) {
            0x3333 => Some(ShutdownStatus::Fail),
            0x5555 => Some(ShutdownStatus::Pass),
            0x7777 => Some(ShutdownStatus::Reset),
            _ => None,
        }
    }

    fn halted(&self) -> bool {
        self.guest_shutdown.load(Ordering::Acquire) || self.host_halt.load(Ordering::Acquire)
    }
}

impl Default for EngineControl {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ExecutionEngine {
    hart: Hart,
    mmu: Mmu,
    devices: Vec<Arc<dyn Device>>,
    uart: Arc<Ns16550>,
    console: Option<Console>,
    ctrl: Arc<EngineControl>,
    timeout: Option<Duration>,
}

impl ExecutionEngine {
    pub fn new(
        hart: Hart,
        mmu: Mmu,
        devices: Vec<Arc<dyn Device>>,
        uart: Arc<Ns16550>,
        console: Option<Console>,
        ctrl: Arc<EngineControl>,
        timeout: Option<Duration>,
    ) -> Self {
        ExecutionEngine {
            hart,
            mmu,
            devices,
            uart,
            console,
            ctrl,
            timeout,
        }
    }

    pub fn hart(&self) -> &Hart {
        &self.hart
    }

    pub fn hart_mut(&mut self) -> &mut Hart {
        &mut self.hart
    }

    pub fn mmu(&self) -> &Mmu {
        &self.mmu
    }

    pub fn mmu_mut(&mut self) -> &mut Mmu {
        &mut self.mmu
    }

    pub fn ctrl(&self) -> &Arc<EngineControl> {
        &self.ctrl
    }

    /// Run the guest until a shutdown request lands.
    ///
    /// The CPU worker runs on its own thread; the calling thread becomes
    /// the driver, ticking devices and feeding console input to the UART.
    /// A worker panic is surfaced here after the worker has been joined.
    pub fn execute_until_halt(&mut self) -> Result<(), EmulatorError> {
        let deadline = self.timeout.map(|t| Instant::now() + t);
        let ctrl = self.ctrl.clone();

        let hart = &mut self.hart;
        let mmu = &mut self.mmu;
        let devices = &self.devices;
        let uart = &self.uart;
        let console = &self.console;

        let result = std::thread::scope(|scope| {
            let worker = std::thread::Builder::new()
                .name("cpu".into())
                .spawn_scoped(scope, || cpu_loop(hart, mmu, &ctrl))
                .map_err(EmulatorError::Io)?;

            while !worker.is_finished() {
                for dev in devices {
                    dev.tick();
                }

                if let Some(console) = console {
                    let input = console.poll();
                    if !input.is_empty() {
                        uart.receive(&input);
                    }
                }

                if let Some(deadline) = deadline {
                    if Instant::now() >= deadline {
                        log::warn!("wall-clock timeout reached, halting");
                        ctrl.request_shutdown_from_host();
                    }
                }

                std::thread::sleep(Duration::from_millis(1));
            }

            worker
                .join()
                .map_err(|_| EmulatorError::Worker("CPU worker panicked".into()))
        });

        // One final tick so device output buffered by the last instructions
        // (e.g. UART TX) reaches the host.
        for dev in &self.devices {
            dev.tick();
        }

        result
    }
}

/// The fetch-decode-execute loop. Sole mutator of architectural state.
fn cpu_loop(hart: &mut Hart, mmu: &mut Mmu, ctrl: &EngineControl) {
    let mut host_poll: u16 = 0;

    loop {
        hart.csrs.advance_mcycle();

        if ctrl.guest_shutdown.load(Ordering::Acquire) {
            break;
        }
        host_poll = host_poll.wrapping_add(1);
        if host_poll == 0 && ctrl.host_halt.load(Ordering::Acquire) {
            break;
        }

        // Pending interrupts preempt the fetch of this cycle.
        if let Some(trap) = hart.pending_interrupt() {
            hart.handle_trap(&trap);
            continue;
        }

        match execute_once(hart, mmu) {
            Ok(()) => hart.csrs.advance_minstret(),
            Err(trap) => hart.handle_trap(&trap),
        }
    }
}

fn execute_once(hart: &mut Hart, mmu: &mut Mmu) -> Result<(), Trap> {
    let (insn, len) = mmu.fetch(hart)?;
    let decoded = Decoder::decode(insn, len, hart.pc);
    hart.pc = hart.pc.wrapping_add(len as u64);
    (decoded.exec)(hart, mmu, &decoded)
}
