//! Platform-level interrupt controller.
//!
//! Two contexts are wired for the single hart: context 0 targets M-mode
//! (`mip.MEIP`), context 1 targets S-mode (`mip.SEIP`). Devices assert
//! their source lines through [`Plic::set_source_level`]; the guest claims
//! and completes through the context registers.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use crate::cpu::csr::{SharedCsrs, MIP_MEIP, MIP_SEIP};
use crate::memory::Device;

const PRIORITY_BASE: u64 = 0x0;
const PENDING_BASE: u64 = 0x1000;
const ENABLE_BASE: u64 = 0x2000;
const ENABLE_PER_CONTEXT: u64 = 0x80;
const CONTEXT_BASE: u64 = 0x20_0000;
const CONTEXT_PER_CONTEXT: u64 = 0x1000;

const NUM_SOURCES: usize = 32;
const NUM_CONTEXTS: usize = 2;

struct PlicState {
    priority: [u32; NUM_SOURCES],
    /// Source line levels as asserted by devices.
    level: u32,
    /// Pending bits, latched from the lines and cleared on claim.
    pending: u32,
    enable: [u32; NUM_CONTEXTS],
    threshold: [u32; NUM_CONTEXTS],
    claimed: [u32; NUM_CONTEXTS],
}

pub struct Plic {
    base: u64,
    shared: Arc<SharedCsrs>,
    state: Mutex<PlicState>,
}

impl Plic {
    pub const DEFAULT_BASE: u64 = 0xC00_0000;
    pub const SIZE: u64 = 0x100_0000;

    pub fn new(shared: Arc<SharedCsrs>) -> Self {
        Plic {
            base: Self::DEFAULT_BASE,
            shared,
            state: Mutex::new(PlicState {
                priority: [0; NUM_SOURCES],
                level: 0,
                pending: 0,
                enable: [0; NUM_CONTEXTS],
                threshold: [0; NUM_CONTEXTS],
                claimed: [0; NUM_CONTEXTS],
            }),
        }
    }

    /// Assert or deassert a source line. Safe from any thread; this is the
    /// target of the device `(id, level)` callbacks.
    pub fn set_source_level(&self, id: u32, level: bool) {
        if id == 0 || id >= NUM_SOURCES as u32 {
            return;
        }
        let mut state = self.state.lock().unwrap();
        let bit = 1u32 << id;
        if level {
            state.level |= bit;
            state.pending |= bit;
        } else {
            state.level &= !bit;
        }
        self.update_lines(&mut state);
    }

    /// Best pending, enabled, above-threshold source for a context.
    fn best_pending(state: &PlicState, context: usize) -> Option<u32> {
        let mut best = None;
        let mut best_priority = state.threshold[context];
        for id in 1..NUM_SOURCES as u32 {
            let bit = 1u32 << id;
            if state.pending & bit != 0
                && state.enable[context] & bit != 0
                && state.priority[id as usize] > best_priority
            {
                best_priority = state.priority[id as usize];
                best = Some(id);
            }
        }
        best
    }

    fn update_lines(&self, state: &mut PlicState) {
        self.shared
            .set_interrupt_pending(MIP_MEIP, Self::best_pending(state, 0).is_some());
        self.shared
            .set_interrupt_pending(MIP_SEIP, Self::best_pending(state, 1).is_some());
    }

    fn claim(&self, state: &mut PlicState, context: usize) -> u32 {
        match Self::best_pending(state, context) {
            Some(id) => {
                state.pending &= !(1 << id);
                state.claimed[context] = id;
                self.update_lines(state);
                id
            }
            None => 0,
        }
    }

    fn complete(&self, state: &mut PlicState, context: usize, id: u32) {
        if state.claimed[context] == id {
            state.claimed[context] = 0;
        }
        // Level-triggered: a still-asserted line re-pends on completion.
        if id > 0 && id < NUM_SOURCES as u32 && state.level & (1 << id) != 0 {
            state.pending |= 1 << id;
        }
        self.update_lines(state);
    }
}

impl Device for Plic {
    fn name(&self) -> &str {
        "plic"
    }

    fn start(&self) -> u64 {
        self.base
    }

    fn end(&self) -> u64 {
        self.base + Self::SIZE - 1
    }

    fn read(&self, addr: u64, size: usize) -> Option<u64> {
        if size != 4 {
            return None;
        }
        let offset = addr - self.base;
        let mut state = self.state.lock().unwrap();

        let value = match offset {
            o if o < PENDING_BASE => {
                let id = (o - PRIORITY_BASE) / 4;
                if (id as usize) < NUM_SOURCES {
                    state.priority[id as usize]
                } else {
                    0
                }
            }
            o if (PENDING_BASE..PENDING_BASE + 4).contains(&o) => state.pending,
            o if (ENABLE_BASE..ENABLE_BASE + ENABLE_PER_CONTEXT * NUM_CONTEXTS as u64)
                .contains(&o) =>
            {
                let context = ((o - ENABLE_BASE) / ENABLE_PER_CONTEXT) as usize;
                if (o - ENABLE_BASE) % ENABLE_PER_CONTEXT == 0 {
                    state.enable[context]
                } else {
                    0
                }
            }
            o if o >= CONTEXT_BASE => {
                let context = ((o - CONTEXT_BASE) / CONTEXT_PER_CONTEXT) as usize;
                if context >= NUM_CONTEXTS {
                    return None;
                }
                match (o - CONTEXT_BASE) % CONTEXT_PER_CONTEXT {
                    0 => state.threshold[context],
                    4 => self.claim(&mut state, context),
                    _ => 0,
                }
            }
            _ => 0,
        };
        Some(value as u64)
    }

    fn write(&self, addr: u64, size: usize, value: u64) -> bool {
        if size != 4 {
            return false;
        }
        let offset = addr - self.base;
        let value = value as u32;
        let mut state = self.state.lock().unwrap();

        match offset {
            o if o < PENDING_BASE => {
                let id = ((o - PRIORITY_BASE) / 4) as usize;
                if id > 0 && id < NUM_SOURCES {
                    state.priority[id] = value & 0x7;
                    self.update_lines(&mut state);
                }
            }
            o if (ENABLE_BASE..ENABLE_BASE + ENABLE_PER_CONTEXT * NUM_CONTEXTS as u64)
                .contains(&o) =>
            {
                let context = ((o - ENABLE_BASE) / ENABLE_PER_CONTEXT) as usize;
                if (o - ENABLE_BASE) % ENABLE_PER_CONTEXT == 0 {
                    state.enable[context] = value;
                    self.update_lines(&mut state);
                }
            }
            o if o >= CONTEXT_BASE => {
                let context = ((o - CONTEXT_BASE) / CONTEXT_PER_CONTEXT) as usize;
                if context >= NUM_CONTEXTS {
                    return false;
                }
                match (o - CONTEXT_BASE) % CONTEXT_PER_CONTEXT {
                    0 => {
                        state.threshold[context] = value & 0x7;
                        self.update_lines(&mut state);
                    }
                    4 => self.complete(&mut state, context, value),
                    _ => {}
                }
            }
            _ => {}
        }
        true
    }
}
