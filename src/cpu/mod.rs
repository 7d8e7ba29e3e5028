//! CPU core: hart state, privilege model, trap and interrupt dispatch.

pub mod csr;
pub mod decode;
pub mod execute;
pub mod execute_fp;
pub mod fpu;
pub mod mmu;
pub mod trap;

use std::sync::Arc;

use crate::cpu::csr::{CsrFile, SharedCsrs};
use crate::cpu::fpu::FpRegisterFile;
use crate::cpu::trap::{Cause, Trap};
use crate::memory::DRAM_BASE;

/// RISC-V privilege levels. The numeric encoding matches mstatus.MPP.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
#[repr(u8)]
pub enum PrivilegeLevel {
    User = 0,
    Supervisor = 1,
    Machine = 3,
}

impl From<u64> for PrivilegeLevel {
    fn from(val: u64) -> Self {
        match val & 3 {
            0 => PrivilegeLevel::User,
            1 => PrivilegeLevel::Supervisor,
            _ => PrivilegeLevel::Machine,
        }
    }
}

/// Integer register file. x0 reads as zero and ignores writes.
#[derive(Default)]
pub struct RegisterFile {
    gprs: [u64; 32],
}

impl RegisterFile {
    #[inline(always)]
    pub fn read(&self, idx: usize) -> u64 {
        if idx == 0 {
            0
        } else {
            self.gprs[idx & 0x1F]
        }
    }

    #[inline(always)]
    pub fn write(&mut self, idx: usize, value: u64) {
        if idx != 0 {
            self.gprs[idx & 0x1F] = value;
        }
    }
}

/// Hardware thread: the architectural execution context.
pub struct Hart {
    pub pc: u64,
    pub gprs: RegisterFile,
    pub fprs: FpRegisterFile,
    pub csrs: CsrFile,
    pub priv_level: PrivilegeLevel,
}

impl Hart {
    pub fn new(shared: Arc<SharedCsrs>) -> Self {
        Hart {
            pc: DRAM_BASE,
            gprs: RegisterFile::default(),
            fprs: FpRegisterFile::default(),
            csrs: CsrFile::new(shared),
            priv_level: PrivilegeLevel::Machine,
        }
    }

    /// Dispatch a trap into architectural state.
    ///
    /// Traps taken at or below S-mode whose cause is delegated through
    /// medeleg/mideleg land in S-mode; everything else lands in M-mode. The
    /// target's epc/cause/tval are written, xIE is stacked into xPIE, xPP
    /// records the interrupted privilege, and the PC moves to the trap
    /// vector (plus `4 * cause` for vectored interrupt mode).
    pub fn handle_trap(&mut self, trap: &Trap) {
        use csr::*;

        let cause = trap.cause.code();
        let code = trap.cause.exception_code();

        log::trace!(
            "trap at pc={:#x}: {:?} tval={:#x} priv={:?}",
            trap.pc,
            trap.cause,
            trap.tval,
            self.priv_level
        );

        let deleg = if trap.cause.is_interrupt() {
            self.csrs.mideleg()
        } else {
            self.csrs.medeleg()
        };
        let delegate_to_s = self.priv_level <= PrivilegeLevel::Supervisor
            && code < 64
            && deleg & (1 << code) != 0;

        if delegate_to_s {
            self.csrs.write_unchecked(SEPC, trap.pc);
            self.csrs.write_unchecked(SCAUSE, cause);
            self.csrs.write_unchecked(STVAL, trap.tval);

            let mut status = self.csrs.mstatus();
            if status & MSTATUS_SIE != 0 {
                status |= MSTATUS_SPIE;
            } else {
                status &= !MSTATUS_SPIE;
            }
            if self.priv_level == PrivilegeLevel::Supervisor {
                status |= MSTATUS_SPP;
            } else {
                status &= !MSTATUS_SPP;
            }
            status &= !MSTATUS_SIE;
            self.csrs.write_unchecked(MSTATUS, status);

            self.pc = Self::trap_vector(self.csrs.read_unchecked(STVEC), &trap.cause);
            self.priv_level = PrivilegeLevel::Supervisor;
        } else {
            self.csrs.write_unchecked(MEPC, trap.pc);
            self.csrs.write_unchecked(MCAUSE, cause);
            self.csrs.write_unchecked(MTVAL, trap.tval);

            let mut status = self.csrs.mstatus();
            if status & MSTATUS_MIE != 0 {
                status |= MSTATUS_MPIE;
            } else {
                status &= !MSTATUS_MPIE;
            }
            status = (status & !MSTATUS_MPP) | ((self.priv_level as u64) << MSTATUS_MPP_SHIFT);
            status &= !MSTATUS_MIE;
            self.csrs.write_unchecked(MSTATUS, status);

            self.pc = Self::trap_vector(self.csrs.read_unchecked(MTVEC), &trap.cause);
            self.priv_level = PrivilegeLevel::Machine;
        }
    }

    fn trap_vector(tvec: u64, cause: &Cause) -> u64 {
        let base = tvec & !3;
        if tvec & 3 == 1 && cause.is_interrupt() {
            base + 4 * cause.exception_code()
        } else {
            base
        }
    }

    /// Evaluate interrupt eligibility at the top of a cycle.
    ///
    /// Machine-level pending interrupts take precedence over
    /// supervisor-level ones; within each level the priority is
    /// external > software > timer.
    pub fn pending_interrupt(&self) -> Option<Trap> {
        use csr::*;

        let pending = self.csrs.mip() & self.csrs.mie();
        if pending == 0 {
            return None;
        }

        let status = self.csrs.mstatus();
        let m_enabled = self.priv_level < PrivilegeLevel::Machine
            || (self.priv_level == PrivilegeLevel::Machine && status & MSTATUS_MIE != 0);
        let s_enabled = self.priv_level < PrivilegeLevel::Supervisor
            || (self.priv_level == PrivilegeLevel::Supervisor && status & MSTATUS_SIE != 0);

        let m_pending = pending & !self.csrs.mideleg();
        if m_enabled && m_pending != 0 {
            let cause = if m_pending & MIP_MEIP != 0 {
                Cause::MachineExternalInterrupt
            } else if m_pending & MIP_MSIP != 0 {
                Cause::MachineSoftwareInterrupt
            } else if m_pending & MIP_MTIP != 0 {
                Cause::MachineTimerInterrupt
            } else if m_pending & MIP_SEIP != 0 {
                Cause::SupervisorExternalInterrupt
            } else if m_pending & MIP_SSIP != 0 {
                Cause::SupervisorSoftwareInterrupt
            } else {
                Cause::SupervisorTimerInterrupt
            };
            return Some(Trap::new(self.pc, cause, 0));
        }

        let s_pending = pending & self.csrs.mideleg();
        if s_enabled && s_pending != 0 {
            let cause = if s_pending & MIP_SEIP != 0 {
                Cause::SupervisorExternalInterrupt
            } else if s_pending & MIP_SSIP != 0 {
                Cause::SupervisorSoftwareInterrupt
            } else {
                Cause::SupervisorTimerInterrupt
            };
            return Some(Trap::new(self.pc, cause, 0));
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::csr::*;
    use super::*;

    fn hart() -> Hart {
        Hart::new(Arc::new(SharedCsrs::default()))
    }

    #[test]
    fn x0_hardwired_zero() {
        let mut h = hart();
        h.gprs.write(0, 0xDEAD_BEEF);
        assert_eq!(h.gprs.read(0), 0);
        h.gprs.write(5, 0x1234);
        assert_eq!(h.gprs.read(5), 0x1234);
    }

    #[test]
    fn trap_to_machine_mode() {
        let mut h = hart();
        h.csrs.write_unchecked(MTVEC, 0x8000_1000);
        h.pc = 0x8000_0004;
        let m = h.csrs.mstatus() | MSTATUS_MIE;
        h.csrs.write_unchecked(MSTATUS, m);

        h.handle_trap(&Trap::new(0x8000_0004, Cause::IllegalInstruction, 0x13));

        assert_eq!(h.pc, 0x8000_1000);
        assert_eq!(h.priv_level, PrivilegeLevel::Machine);
        assert_eq!(h.csrs.read_unchecked(MEPC), 0x8000_0004);
        assert_eq!(h.csrs.read_unchecked(MCAUSE), 2);
        assert_eq!(h.csrs.read_unchecked(MTVAL), 0x13);
        let status = h.csrs.mstatus();
        assert_eq!(status & MSTATUS_MIE, 0);
        assert_ne!(status & MSTATUS_MPIE, 0);
        assert_eq!(
            (status & MSTATUS_MPP) >> MSTATUS_MPP_SHIFT,
            PrivilegeLevel::Machine as u64
        );
    }

    #[test]
    fn delegated_ecall_lands_in_s_mode() {
        let mut h = hart();
        h.csrs.write_unchecked(MEDELEG, 1 << 8);
        h.csrs.write_unchecked(STVEC, 0x8000_2000);
        h.priv_level = PrivilegeLevel::User;
        h.pc = 0x8000_0010;

        h.handle_trap(&Trap::new(0x8000_0010, Cause::EnvironmentCallFromU, 0));

        assert_eq!(h.pc, 0x8000_2000);
        assert_eq!(h.priv_level, PrivilegeLevel::Supervisor);
        assert_eq!(h.csrs.read_unchecked(SCAUSE), 8);
        assert_eq!(h.csrs.read_unchecked(SEPC), 0x8000_0010);
        // SPP records User.
        assert_eq!(h.csrs.mstatus() & MSTATUS_SPP, 0);
    }

    #[test]
    fn delegation_does_not_apply_from_machine_mode() {
        let mut h = hart();
        h.csrs.write_unchecked(MEDELEG, 1 << 2);
        h.csrs.write_unchecked(MTVEC, 0x8000_1000);
        h.csrs.write_unchecked(STVEC, 0x8000_2000);
        h.priv_level = PrivilegeLevel::Machine;

        h.handle_trap(&Trap::new(0x8000_0000, Cause::IllegalInstruction, 0));

        assert_eq!(h.pc, 0x8000_1000);
        assert_eq!(h.priv_level, PrivilegeLevel::Machine);
    }

    #[test]
    fn vectored_interrupts_offset_by_cause() {
        let mut h = hart();
        h.csrs.write_unchecked(MTVEC, 0x8000_1001); // vectored
        h.handle_trap(&Trap::new(0x8000_0000, Cause::MachineTimerInterrupt, 0));
        assert_eq!(h.pc, 0x8000_1000 + 4 * 7);

        // Exceptions ignore vectoring.
        h.csrs.write_unchecked(MTVEC, 0x8000_1001);
        h.handle_trap(&Trap::new(0x8000_0000, Cause::Breakpoint, 0));
        assert_eq!(h.pc, 0x8000_1000);
    }

    #[test]
    fn interrupt_priority_and_enables() {
        let mut h = hart();
        h.csrs.write_unchecked(MIE, INTERRUPT_MASK);
        h.csrs
            .shared()
            .set_interrupt_pending(MIP_MTIP | MIP_MEIP, true);

        // M-mode with MIE clear: nothing is taken.
        assert!(h.pending_interrupt().is_none());

        let m = h.csrs.mstatus() | MSTATUS_MIE;
        h.csrs.write_unchecked(MSTATUS, m);
        let trap = h.pending_interrupt().unwrap();
        assert_eq!(trap.cause, Cause::MachineExternalInterrupt);

        h.csrs.shared().set_interrupt_pending(MIP_MEIP, false);
        let trap = h.pending_interrupt().unwrap();
        assert_eq!(trap.cause, Cause::MachineTimerInterrupt);
    }

    #[test]
    fn delegated_interrupt_respects_sie() {
        let mut h = hart();
        h.csrs.write_unchecked(MIE, INTERRUPT_MASK);
        h.csrs.write_unchecked(MIDELEG, MIP_STIP);
        h.csrs.shared().set_interrupt_pending(MIP_STIP, true);

        // S-mode with SIE clear: masked.
        h.priv_level = PrivilegeLevel::Supervisor;
        assert!(h.pending_interrupt().is_none());

        // U-mode: S interrupts always eligible.
        h.priv_level = PrivilegeLevel::User;
        let trap = h.pending_interrupt().unwrap();
        assert_eq!(trap.cause, Cause::SupervisorTimerInterrupt);
    }

    #[test]
    fn trap_then_mret_restores_status_fields() {
        let mut h = hart();
        h.csrs.write_unchecked(MTVEC, 0x8000_1000);
        let before = h.csrs.mstatus() | MSTATUS_MIE;
        h.csrs.write_unchecked(MSTATUS, before);
        let before = h.csrs.mstatus();

        h.pc = 0x8000_0100;
        h.handle_trap(&Trap::new(0x8000_0100, Cause::EnvironmentCallFromM, 0));
        trap::mret(&mut h);

        assert_eq!(h.pc, 0x8000_0100);
        let after = h.csrs.mstatus();
        assert_eq!(after & MSTATUS_MIE, before & MSTATUS_MIE);
        assert_eq!(h.priv_level, PrivilegeLevel::Machine);
    }
}
