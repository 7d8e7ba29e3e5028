//! Memory management unit: Bare/Sv39 address translation and typed guest
//! memory access.
//!
//! Translation faults carry the faulting virtual address in tval and the
//! PC of the access in the trap record. Bus misses surface as access
//! faults, page-table rejections as page faults of the access type.

use crate::cpu::csr::{
    MENVCFG_ADUE, MSTATUS_MPP, MSTATUS_MPP_SHIFT, MSTATUS_MPRV, MSTATUS_MXR, MSTATUS_SUM,
    SATP_MODE_BARE, SATP_MODE_SHIFT, SATP_PPN_MASK,
};
use crate::cpu::decode::InsnLen;
use crate::cpu::trap::{Cause, Trap};
use crate::cpu::{Hart, PrivilegeLevel};
use crate::memory::{Bus, MemValue};

/// What the access is for; selects permission bits and fault causes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessType {
    Fetch,
    Load,
    Store,
}

impl AccessType {
    fn page_fault(self) -> Cause {
        match self {
            AccessType::Fetch => Cause::InstructionPageFault,
            AccessType::Load => Cause::LoadPageFault,
            AccessType::Store => Cause::StoreAmoPageFault,
        }
    }

    fn access_fault(self) -> Cause {
        match self {
            AccessType::Fetch => Cause::InstructionAccessFault,
            AccessType::Load => Cause::LoadAccessFault,
            AccessType::Store => Cause::StoreAmoAccessFault,
        }
    }
}

// Sv39 parameters
const LEVELS: i32 = 3;
const PTE_SIZE: u64 = 8;
const PAGE_SHIFT: u32 = 12;

// PTE bits
const PTE_V: u64 = 1 << 0;
const PTE_R: u64 = 1 << 1;
const PTE_W: u64 = 1 << 2;
const PTE_X: u64 = 1 << 3;
const PTE_U: u64 = 1 << 4;
const PTE_A: u64 = 1 << 6;
const PTE_D: u64 = 1 << 7;
const PTE_PPN_SHIFT: u32 = 10;
const PTE_PPN_MASK: u64 = (1 << 44) - 1;
// PBMT, N and the reserved bits; must read as zero.
const PTE_RESERVED_MASK: u64 = !((1 << 54) - 1);

/// The MMU: owns the bus and the LR/SC reservation.
pub struct Mmu {
    bus: Bus,
    reservation_valid: bool,
    reservation_addr: u64,
}

impl Mmu {
    pub fn new(bus: Bus) -> Self {
        Mmu {
            bus,
            reservation_valid: false,
            reservation_addr: 0,
        }
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut Bus {
        &mut self.bus
    }

    /// Effective privilege of a data access: mstatus.MPRV redirects loads
    /// and stores to the privilege stored in MPP. Fetches always run at the
    /// hart's current privilege.
    fn effective_priv(hart: &Hart, access: AccessType) -> PrivilegeLevel {
        let status = hart.csrs.mstatus();
        if access != AccessType::Fetch && status & MSTATUS_MPRV != 0 {
            PrivilegeLevel::from((status & MSTATUS_MPP) >> MSTATUS_MPP_SHIFT)
        } else {
            hart.priv_level
        }
    }

    /// Translate a virtual address for the given access type.
    ///
    /// `pc` is the instruction the access belongs to and becomes the trap
    /// PC; the faulting virtual address becomes tval.
    pub fn translate(
        &mut self,
        hart: &Hart,
        pc: u64,
        vaddr: u64,
        access: AccessType,
    ) -> Result<u64, Trap> {
        let eff_priv = Self::effective_priv(hart, access);
        let satp = hart.csrs.satp();
        let mode = satp >> SATP_MODE_SHIFT;

        if eff_priv == PrivilegeLevel::Machine || mode == SATP_MODE_BARE {
            return Ok(vaddr);
        }

        // The CSR model rejects every mode other than Bare and Sv39.
        self.walk_sv39(hart, pc, vaddr, access, eff_priv, satp)
    }

    fn walk_sv39(
        &mut self,
        hart: &Hart,
        pc: u64,
        vaddr: u64,
        access: AccessType,
        eff_priv: PrivilegeLevel,
        satp: u64,
    ) -> Result<u64, Trap> {
        let page_fault = || Trap::new(pc, access.page_fault(), vaddr);
        let access_fault = || Trap::new(pc, access.access_fault(), vaddr);

        // Sv39 addresses are canonical: bits 63:39 replicate bit 38.
        if ((vaddr as i64) << 25 >> 25) as u64 != vaddr {
            return Err(page_fault());
        }

        let status = hart.csrs.mstatus();
        let mut table = (satp & SATP_PPN_MASK) << PAGE_SHIFT;
        let mut level = LEVELS - 1;

        loop {
            let vpn = (vaddr >> (PAGE_SHIFT + 9 * level as u32)) & 0x1FF;
            let pte_addr = table + vpn * PTE_SIZE;
            let pte: u64 = self.bus.read(pte_addr).ok_or_else(access_fault)?;

            if pte & PTE_V == 0
                || (pte & PTE_R == 0 && pte & PTE_W != 0)
                || pte & PTE_RESERVED_MASK != 0
            {
                return Err(page_fault());
            }

            let ppn = (pte >> PTE_PPN_SHIFT) & PTE_PPN_MASK;

            if pte & (PTE_R | PTE_X) == 0 {
                // Pointer to the next level; A/D/U must be clear.
                if pte & (PTE_A | PTE_D | PTE_U) != 0 {
                    return Err(page_fault());
                }
                level -= 1;
                if level < 0 {
                    return Err(page_fault());
                }
                table = ppn << PAGE_SHIFT;
                continue;
            }

            // Leaf. Superpages must be aligned to their size.
            if level > 0 && ppn & ((1 << (9 * level as u32)) - 1) != 0 {
                return Err(page_fault());
            }

            // User/supervisor page compatibility.
            if pte & PTE_U != 0 {
                if eff_priv == PrivilegeLevel::Supervisor
                    && (access == AccessType::Fetch || status & MSTATUS_SUM == 0)
                {
                    return Err(page_fault());
                }
            } else if eff_priv == PrivilegeLevel::User {
                return Err(page_fault());
            }

            // Permission bits.
            let allowed = match access {
                AccessType::Fetch => pte & PTE_X != 0,
                AccessType::Load => {
                    pte & PTE_R != 0 || (pte & PTE_X != 0 && status & MSTATUS_MXR != 0)
                }
                AccessType::Store => pte & PTE_W != 0,
            };
            if !allowed {
                return Err(page_fault());
            }

            // A/D update, gated by menvcfg.ADUE.
            let needs_a = pte & PTE_A == 0;
            let needs_d = access == AccessType::Store && pte & PTE_D == 0;
            if needs_a || needs_d {
                if hart.csrs.menvcfg() & MENVCFG_ADUE == 0 {
                    return Err(page_fault());
                }
                let mut updated = pte | PTE_A;
                if access == AccessType::Store {
                    updated |= PTE_D;
                }
                if !self.bus.write(pte_addr, updated) {
                    return Err(access_fault());
                }
            }

            // Physical address: leaf PPN with the low VPN levels and page
            // offset taken from the virtual address.
            let offset_bits = PAGE_SHIFT + 9 * level as u32;
            let pa = (ppn << PAGE_SHIFT) | (vaddr & ((1 << offset_bits) - 1));
            return Ok(pa);
        }
    }

    /// Typed load through translation. Misaligned accesses are legal and
    /// performed byte-by-byte with per-byte translation.
    pub fn read<T: MemValue>(&mut self, hart: &Hart, pc: u64, vaddr: u64) -> Result<T, Trap> {
        if vaddr & (T::SIZE as u64 - 1) == 0 {
            let pa = self.translate(hart, pc, vaddr, AccessType::Load)?;
            return self
                .bus
                .read(pa)
                .ok_or_else(|| Trap::new(pc, Cause::LoadAccessFault, vaddr));
        }

        // Pre-check every byte before performing any access.
        let mut pas = [0u64; 8];
        for (i, pa) in pas.iter_mut().enumerate().take(T::SIZE) {
            *pa = self.translate(hart, pc, vaddr + i as u64, AccessType::Load)?;
            if !self.bus.accessible(*pa) {
                return Err(Trap::new(pc, Cause::LoadAccessFault, vaddr));
            }
        }

        let mut value = 0u64;
        for (i, pa) in pas.iter().enumerate().take(T::SIZE) {
            let byte: u8 = self
                .bus
                .read(*pa)
                .ok_or_else(|| Trap::new(pc, Cause::LoadAccessFault, vaddr))?;
            value |= (byte as u64) << (8 * i);
        }
        Ok(T::from_u64(value))
    }

    /// Typed store through translation. Any store invalidates the LR/SC
    /// reservation.
    pub fn write<T: MemValue>(
        &mut self,
        hart: &Hart,
        pc: u64,
        vaddr: u64,
        value: T,
    ) -> Result<(), Trap> {
        self.reservation_valid = false;

        if vaddr & (T::SIZE as u64 - 1) == 0 {
            let pa = self.translate(hart, pc, vaddr, AccessType::Store)?;
            if !self.bus.write(pa, value) {
                return Err(Trap::new(pc, Cause::StoreAmoAccessFault, vaddr));
            }
            return Ok(());
        }

        let mut pas = [0u64; 8];
        for (i, pa) in pas.iter_mut().enumerate().take(T::SIZE) {
            *pa = self.translate(hart, pc, vaddr + i as u64, AccessType::Store)?;
            if !self.bus.accessible(*pa) {
                return Err(Trap::new(pc, Cause::StoreAmoAccessFault, vaddr));
            }
        }

        let raw = value.to_u64();
        for (i, pa) in pas.iter().enumerate().take(T::SIZE) {
            if !self.bus.write(*pa, (raw >> (8 * i)) as u8) {
                return Err(Trap::new(pc, Cause::StoreAmoAccessFault, vaddr));
            }
        }
        Ok(())
    }

    /// Fetch the instruction at the hart's PC.
    ///
    /// A PC in the final two bytes of a page is fetched as two halfwords so
    /// that the second halfword's page is only touched (and only faults)
    /// when the instruction is actually 4 bytes long.
    pub fn fetch(&mut self, hart: &Hart) -> Result<(u32, InsnLen), Trap> {
        let pc = hart.pc;

        if pc & 0xFFF == 0xFFE {
            let pa = self.translate(hart, pc, pc, AccessType::Fetch)?;
            let lo: u16 = self
                .bus
                .read(pa)
                .ok_or_else(|| Trap::new(pc, Cause::InstructionAccessFault, pc))?;
            if lo & 3 != 3 {
                return Ok((lo as u32, InsnLen::Compressed));
            }
            let pa2 = self.translate(hart, pc, pc + 2, AccessType::Fetch)?;
            let hi: u16 = self
                .bus
                .read(pa2)
                .ok_or_else(|| Trap::new(pc, Cause::InstructionAccessFault, pc + 2))?;
            return Ok(((hi as u32) << 16 | lo as u32, InsnLen::Normal));
        }

        let pa = self.translate(hart, pc, pc, AccessType::Fetch)?;
        let word: u32 = self
            .bus
            .read(pa)
            .ok_or_else(|| Trap::new(pc, Cause::InstructionAccessFault, pc))?;
        if word & 3 != 3 {
            Ok((word & 0xFFFF, InsnLen::Compressed))
        } else {
            Ok((word, InsnLen::Normal))
        }
    }

    pub fn set_reservation(&mut self, addr: u64) {
        self.reservation_valid = true;
        self.reservation_addr = addr;
    }

    pub fn check_reservation(&self, addr: u64) -> bool {
        self.reservation_valid && self.reservation_addr == addr
    }

    pub fn clear_reservation(&mut self) {
        self.reservation_valid = false;
    }
}
