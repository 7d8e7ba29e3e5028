//! Trap records, the exception/interrupt cause taxonomy, and the xRET
//! return paths.

use crate::cpu::csr::*;
use crate::cpu::{Hart, PrivilegeLevel};

pub const INTERRUPT_BIT: u64 = 1 << 63;

/// Cause tag written to `mcause`/`scause`. Interrupt variants carry bit 63.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cause {
    // Exceptions
    InstructionAddressMisaligned,
    InstructionAccessFault,
    IllegalInstruction,
    Breakpoint,
    LoadAddressMisaligned,
    LoadAccessFault,
    StoreAmoAddressMisaligned,
    StoreAmoAccessFault,
    EnvironmentCallFromU,
    EnvironmentCallFromS,
    EnvironmentCallFromM,
    InstructionPageFault,
    LoadPageFault,
    StoreAmoPageFault,

    // Interrupts
    SupervisorSoftwareInterrupt,
    MachineSoftwareInterrupt,
    SupervisorTimerInterrupt,
    MachineTimerInterrupt,
    SupervisorExternalInterrupt,
    MachineExternalInterrupt,
}

impl Cause {
    /// Encoded cause value: exception code, or interrupt code with bit 63.
    pub fn code(self) -> u64 {
        match self {
            Cause::InstructionAddressMisaligned => 0,
            Cause::InstructionAccessFault => 1,
            Cause::IllegalInstruction => 2,
            Cause::Breakpoint => 3,
            Cause::LoadAddressMisaligned => 4,
            Cause::LoadAccessFault => 5,
            Cause::StoreAmoAddressMisaligned => 6,
            Cause::StoreAmoAccessFault => 7,
            Cause::EnvironmentCallFromU => 8,
            Cause::EnvironmentCallFromS => 9,
            Cause::EnvironmentCallFromM => 11,
            Cause::InstructionPageFault => 12,
            Cause::LoadPageFault => 13,
            Cause::StoreAmoPageFault => 15,

            Cause::SupervisorSoftwareInterrupt => INTERRUPT_BIT | 1,
            Cause::MachineSoftwareInterrupt => INTERRUPT_BIT | 3,
            Cause::SupervisorTimerInterrupt => INTERRUPT_BIT | 5,
            Cause::MachineTimerInterrupt => INTERRUPT_BIT | 7,
            Cause::SupervisorExternalInterrupt => INTERRUPT_BIT | 9,
            Cause::MachineExternalInterrupt => INTERRUPT_BIT | 11,
        }
    }

    pub fn is_interrupt(self) -> bool {
        self.code() & INTERRUPT_BIT != 0
    }

    /// Cause code with the interrupt bit stripped.
    pub fn exception_code(self) -> u64 {
        self.code() & !INTERRUPT_BIT
    }

    /// Whether `value` is one of the cause encodings this implementation
    /// recognizes. `mcause` is WARL; anything else is dropped on write.
    pub fn is_valid_mcause(value: u64) -> bool {
        if value & INTERRUPT_BIT != 0 {
            matches!(value & !INTERRUPT_BIT, 1 | 3 | 5 | 7 | 9 | 11)
        } else {
            matches!(value, 0..=9 | 11 | 12 | 13 | 15)
        }
    }

    /// `scause` additionally rejects machine-only causes.
    pub fn is_valid_scause(value: u64) -> bool {
        if value & INTERRUPT_BIT != 0 {
            matches!(value & !INTERRUPT_BIT, 1 | 5 | 9)
        } else {
            matches!(value, 0..=9 | 12 | 13 | 15)
        }
    }
}

/// A raised trap: where it happened, why, and the fault-specific value
/// destined for `xtval`. Created at the point of failure and consumed by the
/// hart's trap dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trap {
    pub pc: u64,
    pub cause: Cause,
    pub tval: u64,
}

impl Trap {
    pub fn new(pc: u64, cause: Cause, tval: u64) -> Self {
        Trap { pc, cause, tval }
    }
}

/// Return from a machine-mode trap. The privilege check happens in the
/// executor; this applies the state transition.
pub fn mret(hart: &mut Hart) {
    let mut status = hart.csrs.mstatus();

    hart.pc = hart.csrs.read_unchecked(MEPC);
    hart.priv_level = PrivilegeLevel::from((status & MSTATUS_MPP) >> MSTATUS_MPP_SHIFT);

    if hart.priv_level != PrivilegeLevel::Machine {
        status &= !MSTATUS_MPRV;
    }

    if status & MSTATUS_MPIE != 0 {
        status |= MSTATUS_MIE;
    } else {
        status &= !MSTATUS_MIE;
    }
    status |= MSTATUS_MPIE;
    status &= !MSTATUS_MPP; // MPP <- U
    hart.csrs.write_unchecked(MSTATUS, status);
}

/// Return from a supervisor-mode trap.
pub fn sret(hart: &mut Hart) {
    let mut status = hart.csrs.mstatus();

    hart.pc = hart.csrs.read_unchecked(SEPC);
    hart.priv_level = if status & MSTATUS_SPP != 0 {
        PrivilegeLevel::Supervisor
    } else {
        PrivilegeLevel::User
    };

    if hart.priv_level != PrivilegeLevel::Machine {
        status &= !MSTATUS_MPRV;
    }

    if status & MSTATUS_SPIE != 0 {
        status |= MSTATUS_SIE;
    } else {
        status &= !MSTATUS_SIE;
    }
    status |= MSTATUS_SPIE;
    status &= !MSTATUS_SPP; // SPP <- U
    hart.csrs.write_unchecked(MSTATUS, status);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interrupt_codes_carry_bit_63() {
        assert_eq!(Cause::MachineTimerInterrupt.code(), (1 << 63) | 7);
        assert_eq!(Cause::SupervisorExternalInterrupt.code(), (1 << 63) | 9);
        assert!(Cause::MachineTimerInterrupt.is_interrupt());
        assert!(!Cause::IllegalInstruction.is_interrupt());
    }

    #[test]
    fn cause_validity() {
        assert!(Cause::is_valid_mcause(11));
        assert!(!Cause::is_valid_mcause(10));
        assert!(!Cause::is_valid_mcause(16));
        assert!(Cause::is_valid_mcause((1 << 63) | 7));
        assert!(!Cause::is_valid_mcause((1 << 63) | 2));

        // scause refuses machine-only causes.
        assert!(!Cause::is_valid_scause(11));
        assert!(!Cause::is_valid_scause((1 << 63) | 7));
        assert!(Cause::is_valid_scause((1 << 63) | 5));
        assert!(Cause::is_valid_scause(8));
    }
}
