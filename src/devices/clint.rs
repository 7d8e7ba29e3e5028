//! CLINT: machine-mode software and timer interrupts.
//!
//! `mtime` follows the host wall clock at a fixed frequency. Each tick
//! republishes `mtime` into the shared `time` CSR, compares it against
//! `mtimecmp` (MTIP) and, when `menvcfg.STCE` grants Sstc, against
//! `stimecmp` (STIP).

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::cpu::csr::{SharedCsrs, MIP_MSIP, MIP_MTIP, MIP_STIP};
use crate::memory::{read_little_endian, write_little_endian, Device};

const MSIP_OFFSET: u64 = 0x0;
const MTIMECMP_OFFSET: u64 = 0x4000;
const MTIME_OFFSET: u64 = 0xBFF8;

struct ClintState {
    mtime: u64,
    mtimecmp: u64,
    /// Host time corresponding to mtime == 0.
    epoch: Instant,
}

pub struct Clint {
    base: u64,
    freq_hz: u64,
    shared: Arc<SharedCsrs>,
    state: Mutex<ClintState>,
}

impl Clint {
    pub const DEFAULT_BASE: u64 = 0x200_0000;
    pub const SIZE: u64 = 0x1_0000;
    pub const DEFAULT_FREQ_HZ: u64 = 10_000_000;

    pub fn new(shared: Arc<SharedCsrs>) -> Self {
        Clint {
            base: Self::DEFAULT_BASE,
            freq_hz: Self::DEFAULT_FREQ_HZ,
            shared,
            state: Mutex::new(ClintState {
                mtime: 0,
                mtimecmp: u64::MAX,
                epoch: Instant::now(),
            }),
        }
    }

    fn sync(&self, state: &mut ClintState) {
        state.mtime =
            (state.epoch.elapsed().as_secs_f64() * self.freq_hz as f64) as u64;
        self.publish(state);
    }

    /// Mirror mtime into the time CSR and recompute timer interrupt lines.
    fn publish(&self, state: &ClintState) {
        self.shared.time.store(state.mtime, Ordering::Release);
        self.shared
            .set_interrupt_pending(MIP_MTIP, state.mtime >= state.mtimecmp);
        if self.shared.menvcfg_stce() {
            let stimecmp = self.shared.stimecmp.load(Ordering::Acquire);
            self.shared
                .set_interrupt_pending(MIP_STIP, state.mtime >= stimecmp);
        }
    }
}

impl Device for Clint {
    fn name(&self) -> &str {
        "clint"
    }

    fn start(&self) -> u64 {
        self.base
    }

    fn end(&self) -> u64 {
        self.base + Self::SIZE - 1
    }

    fn read(&self, addr: u64, size: usize) -> Option<u64> {
        if size > 8 {
            return None;
        }
        let offset = addr - self.base;
        let mut state = self.state.lock().unwrap();

        match offset {
            o if (MSIP_OFFSET..MSIP_OFFSET + 4).contains(&o) => {
                let msip = (self.shared.mip.load(Ordering::Acquire) & MIP_MSIP != 0) as u64;
                Some(read_little_endian(msip, o - MSIP_OFFSET, size))
            }
            o if (MTIMECMP_OFFSET..MTIMECMP_OFFSET + 8).contains(&o) => {
                Some(read_little_endian(state.mtimecmp, o - MTIMECMP_OFFSET, size))
            }
            o if (MTIME_OFFSET..MTIME_OFFSET + 8).contains(&o) => {
                self.sync(&mut state);
                Some(read_little_endian(state.mtime, o - MTIME_OFFSET, size))
            }
            _ => None,
        }
    }

    fn write(&self, addr: u64, size: usize, value: u64) -> bool {
        let offset = addr - self.base;
        let mut state = self.state.lock().unwrap();

        match offset {
            o if (MSIP_OFFSET..MSIP_OFFSET + 4).contains(&o) => {
                let msip = write_little_endian(0, o - MSIP_OFFSET, size, value);
                self.shared.set_interrupt_pending(MIP_MSIP, msip & 1 != 0);
                true
            }
            o if (MTIMECMP_OFFSET..MTIMECMP_OFFSET + 8).contains(&o) => {
                state.mtimecmp =
                    write_little_endian(state.mtimecmp, o - MTIMECMP_OFFSET, size, value);
                self.sync(&mut state);
                true
            }
            o if (MTIME_OFFSET..MTIME_OFFSET + 8).contains(&o) => {
                state.mtime = write_little_endian(state.mtime, o - MTIME_OFFSET, size, value);
                // Rebase the wall clock so mtime keeps advancing from the
                // written value.
                let elapsed =
                    std::time::Duration::from_secs_f64(state.mtime as f64 / self.freq_hz as f64);
                if let Some(epoch) = Instant::now().checked_sub(elapsed) {
                    state.epoch = epoch;
                }
                self.publish(&state);
                true
            }
            _ => false,
        }
    }

    fn tick(&self) {
        let mut state = self.state.lock().unwrap();
        self.sync(&mut state);
    }
}
