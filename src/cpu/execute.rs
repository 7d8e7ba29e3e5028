//! Per-instruction semantic actions for the integer, M, A, Zicsr and
//! privileged instruction sets.
//!
//! Executors run after the engine has advanced the PC past the instruction;
//! control-flow instructions overwrite the PC relative to the decoded
//! record's own `pc`. Every executor surfaces faults as `Err(Trap)` and
//! leaves architectural state untouched on the failing path.

use crate::cpu::decode::DecodedInsn;
use crate::cpu::mmu::{AccessType, Mmu};
use crate::cpu::trap::{self, Cause, Trap};
use crate::cpu::{Hart, PrivilegeLevel};
use crate::cpu::csr::{MSTATUS_TSR, MSTATUS_TVM, MSTATUS_TW};

pub(crate) fn illegal(d: &DecodedInsn) -> Trap {
    Trap::new(d.pc, Cause::IllegalInstruction, d.insn as u64)
}

/// Branch/jump targets must be halfword-aligned (the compressed extension
/// makes bit 1 legal).
fn jump_target(d: &DecodedInsn, target: u64) -> Result<u64, Trap> {
    if target & 1 != 0 {
        Err(Trap::new(d.pc, Cause::InstructionAddressMisaligned, target))
    } else {
        Ok(target)
    }
}

fn link_value(d: &DecodedInsn) -> u64 {
    d.pc.wrapping_add(d.len as u64)
}

pub fn exec_inv(_hart: &mut Hart, _mmu: &mut Mmu, d: &DecodedInsn) -> Result<(), Trap> {
    Err(illegal(d))
}

// ---------------------------------------------------------------------------
// RV64I
// ---------------------------------------------------------------------------

pub fn exec_lui(hart: &mut Hart, _mmu: &mut Mmu, d: &DecodedInsn) -> Result<(), Trap> {
    hart.gprs.write(d.rd, d.imm as u64);
    Ok(())
}

pub fn exec_auipc(hart: &mut Hart, _mmu: &mut Mmu, d: &DecodedInsn) -> Result<(), Trap> {
    hart.gprs.write(d.rd, d.pc.wrapping_add(d.imm as u64));
    Ok(())
}

pub fn exec_jal(hart: &mut Hart, _mmu: &mut Mmu, d: &DecodedInsn) -> Result<(), Trap> {
    let target = jump_target(d, d.pc.wrapping_add(d.imm as u64))?;
    hart.gprs.write(d.rd, link_value(d));
    hart.pc = target;
    Ok(())
}

pub fn exec_jalr(hart: &mut Hart, _mmu: &mut Mmu, d: &DecodedInsn) -> Result<(), Trap> {
    let target = hart.gprs.read(d.rs1).wrapping_add(d.imm as u64) & !1;
    let target = jump_target(d, target)?;
    hart.gprs.write(d.rd, link_value(d));
    hart.pc = target;
    Ok(())
}

macro_rules! branch {
    ($name:ident, $a:ident, $b:ident, $cond:expr) => {
        pub fn $name(hart: &mut Hart, _mmu: &mut Mmu, d: &DecodedInsn) -> Result<(), Trap> {
            let $a = hart.gprs.read(d.rs1);
            let $b = hart.gprs.read(d.rs2);
            if $cond {
                hart.pc = jump_target(d, d.pc.wrapping_add(d.imm as u64))?;
            }
            Ok(())
        }
    };
}

branch!(exec_beq, a, b, a == b);
branch!(exec_bne, a, b, a != b);
branch!(exec_blt, a, b, (a as i64) < (b as i64));
branch!(exec_bge, a, b, (a as i64) >= (b as i64));
branch!(exec_bltu, a, b, a < b);
branch!(exec_bgeu, a, b, a >= b);

macro_rules! load {
    ($name:ident, $t:ty, $conv:expr) => {
        pub fn $name(hart: &mut Hart, mmu: &mut Mmu, d: &DecodedInsn) -> Result<(), Trap> {
            let vaddr = hart.gprs.read(d.rs1).wrapping_add(d.imm as u64);
            let v: $t = mmu.read(hart, d.pc, vaddr)?;
            hart.gprs.write(d.rd, $conv(v));
            Ok(())
        }
    };
}

load!(exec_lb, u8, |v: u8| v as i8 as i64 as u64);
load!(exec_lbu, u8, |v: u8| v as u64);
load!(exec_lh, u16, |v: u16| v as i16 as i64 as u64);
load!(exec_lhu, u16, |v: u16| v as u64);
load!(exec_lw, u32, |v: u32| v as i32 as i64 as u64);
load!(exec_lwu, u32, |v: u32| v as u64);
load!(exec_ld, u64, |v: u64| v);

macro_rules! store {
    ($name:ident, $t:ty) => {
        pub fn $name(hart: &mut Hart, mmu: &mut Mmu, d: &DecodedInsn) -> Result<(), Trap> {
            let vaddr = hart.gprs.read(d.rs1).wrapping_add(d.imm as u64);
            let value = hart.gprs.read(d.rs2) as $t;
            mmu.write(hart, d.pc, vaddr, value)
        }
    };
}

store!(exec_sb, u8);
store!(exec_sh, u16);
store!(exec_sw, u32);
store!(exec_sd, u64);

macro_rules! op_imm {
    ($name:ident, $rs1:ident, $imm:ident, $expr:expr) => {
        pub fn $name(hart: &mut Hart, _mmu: &mut Mmu, d: &DecodedInsn) -> Result<(), Trap> {
            let $rs1 = hart.gprs.read(d.rs1);
            let $imm = d.imm as u64;
            hart.gprs.write(d.rd, $expr);
            Ok(())
        }
    };
}

op_imm!(exec_addi, a, imm, a.wrapping_add(imm));
op_imm!(exec_slti, a, imm, ((a as i64) < (imm as i64)) as u64);
op_imm!(exec_sltiu, a, imm, (a < imm) as u64);
op_imm!(exec_xori, a, imm, a ^ imm);
op_imm!(exec_ori, a, imm, a | imm);
op_imm!(exec_andi, a, imm, a & imm);
op_imm!(exec_slli, a, imm, a << (imm & 0x3F));
op_imm!(exec_srli, a, imm, a >> (imm & 0x3F));
op_imm!(exec_srai, a, imm, ((a as i64) >> (imm & 0x3F)) as u64);
op_imm!(exec_addiw, a, imm, a.wrapping_add(imm) as i32 as i64 as u64);
op_imm!(exec_slliw, a, imm, ((a as u32) << (imm & 0x1F)) as i32 as i64 as u64);
op_imm!(exec_srliw, a, imm, ((a as u32) >> (imm & 0x1F)) as i32 as i64 as u64);
op_imm!(
    exec_sraiw,
    a,
    imm,
    ((a as u32 as i32) >> (imm & 0x1F)) as i64 as u64
);

macro_rules! op_rr {
    ($name:ident, $a:ident, $b:ident, $expr:expr) => {
        pub fn $name(hart: &mut Hart, _mmu: &mut Mmu, d: &DecodedInsn) -> Result<(), Trap> {
            let $a = hart.gprs.read(d.rs1);
            let $b = hart.gprs.read(d.rs2);
            hart.gprs.write(d.rd, $expr);
            Ok(())
        }
    };
}

op_rr!(exec_add, a, b, a.wrapping_add(b));
op_rr!(exec_sub, a, b, a.wrapping_sub(b));
op_rr!(exec_sll, a, b, a << (b & 0x3F));
op_rr!(exec_slt, a, b, ((a as i64) < (b as i64)) as u64);
op_rr!(exec_sltu, a, b, (a < b) as u64);
op_rr!(exec_xor, a, b, a ^ b);
op_rr!(exec_srl, a, b, a >> (b & 0x3F));
op_rr!(exec_sra, a, b, ((a as i64) >> (b & 0x3F)) as u64);
op_rr!(exec_or, a, b, a | b);
op_rr!(exec_and, a, b, a & b);
op_rr!(exec_addw, a, b, a.wrapping_add(b) as i32 as i64 as u64);
op_rr!(exec_subw, a, b, a.wrapping_sub(b) as i32 as i64 as u64);
op_rr!(exec_sllw, a, b, ((a as u32) << (b & 0x1F)) as i32 as i64 as u64);
op_rr!(exec_srlw, a, b, ((a as u32) >> (b & 0x1F)) as i32 as i64 as u64);
op_rr!(
    exec_sraw,
    a,
    b,
    ((a as u32 as i32) >> (b & 0x1F)) as i64 as u64
);

pub fn exec_fence(_hart: &mut Hart, _mmu: &mut Mmu, _d: &DecodedInsn) -> Result<(), Trap> {
    Ok(())
}

pub fn exec_fence_i(_hart: &mut Hart, _mmu: &mut Mmu, _d: &DecodedInsn) -> Result<(), Trap> {
    Ok(())
}

// ---------------------------------------------------------------------------
// RV64M
// ---------------------------------------------------------------------------

op_rr!(exec_mul, a, b, a.wrapping_mul(b));
op_rr!(
    exec_mulh,
    a,
    b,
    ((a as i64 as i128).wrapping_mul(b as i64 as i128) >> 64) as u64
);
op_rr!(
    exec_mulhsu,
    a,
    b,
    ((a as i64 as i128).wrapping_mul(b as u128 as i128) >> 64) as u64
);
op_rr!(
    exec_mulhu,
    a,
    b,
    ((a as u128).wrapping_mul(b as u128) >> 64) as u64
);
op_rr!(
    exec_mulw,
    a,
    b,
    (a as u32).wrapping_mul(b as u32) as i32 as i64 as u64
);

op_rr!(exec_div, a, b, {
    let (a, b) = (a as i64, b as i64);
    if b == 0 {
        u64::MAX
    } else if a == i64::MIN && b == -1 {
        a as u64
    } else {
        (a / b) as u64
    }
});
op_rr!(exec_divu, a, b, if b == 0 { u64::MAX } else { a / b });
op_rr!(exec_rem, a, b, {
    let (a, b) = (a as i64, b as i64);
    if b == 0 {
        a as u64
    } else if a == i64::MIN && b == -1 {
        0
    } else {
        (a % b) as u64
    }
});
op_rr!(exec_remu, a, b, if b == 0 { a } else { a % b });

op_rr!(exec_divw, a, b, {
    let (a, b) = (a as u32 as i32, b as u32 as i32);
    if b == 0 {
        u64::MAX
    } else if a == i32::MIN && b == -1 {
        a as i64 as u64
    } else {
        (a / b) as i64 as u64
    }
});
op_rr!(exec_divuw, a, b, {
    let (a, b) = (a as u32, b as u32);
    if b == 0 {
        u64::MAX
    } else {
        (a / b) as i32 as i64 as u64
    }
});
op_rr!(exec_remw, a, b, {
    let (a, b) = (a as u32 as i32, b as u32 as i32);
    if b == 0 {
        a as i64 as u64
    } else if a == i32::MIN && b == -1 {
        0
    } else {
        (a % b) as i64 as u64
    }
});
op_rr!(exec_remuw, a, b, {
    let (a, b) = (a as u32, b as u32);
    if b == 0 {
        a as i32 as i64 as u64
    } else {
        (a % b) as i32 as i64 as u64
    }
});

// ---------------------------------------------------------------------------
// RV64A
// ---------------------------------------------------------------------------

fn amo_addr(hart: &Hart, d: &DecodedInsn, align: u64, cause: Cause) -> Result<u64, Trap> {
    let vaddr = hart.gprs.read(d.rs1);
    if vaddr & (align - 1) != 0 {
        return Err(Trap::new(d.pc, cause, vaddr));
    }
    Ok(vaddr)
}

pub fn exec_lr_w(hart: &mut Hart, mmu: &mut Mmu, d: &DecodedInsn) -> Result<(), Trap> {
    let vaddr = amo_addr(hart, d, 4, Cause::LoadAddressMisaligned)?;
    let v: u32 = mmu.read(hart, d.pc, vaddr)?;
    mmu.set_reservation(vaddr);
    hart.gprs.write(d.rd, v as i32 as i64 as u64);
    Ok(())
}

pub fn exec_lr_d(hart: &mut Hart, mmu: &mut Mmu, d: &DecodedInsn) -> Result<(), Trap> {
    let vaddr = amo_addr(hart, d, 8, Cause::LoadAddressMisaligned)?;
    let v: u64 = mmu.read(hart, d.pc, vaddr)?;
    mmu.set_reservation(vaddr);
    hart.gprs.write(d.rd, v);
    Ok(())
}

pub fn exec_sc_w(hart: &mut Hart, mmu: &mut Mmu, d: &DecodedInsn) -> Result<(), Trap> {
    let vaddr = amo_addr(hart, d, 4, Cause::StoreAmoAddressMisaligned)?;
    if mmu.check_reservation(vaddr) {
        mmu.write(hart, d.pc, vaddr, hart.gprs.read(d.rs2) as u32)?;
        hart.gprs.write(d.rd, 0);
    } else {
        hart.gprs.write(d.rd, 1);
    }
    mmu.clear_reservation();
    Ok(())
}

pub fn exec_sc_d(hart: &mut Hart, mmu: &mut Mmu, d: &DecodedInsn) -> Result<(), Trap> {
    let vaddr = amo_addr(hart, d, 8, Cause::StoreAmoAddressMisaligned)?;
    if mmu.check_reservation(vaddr) {
        mmu.write(hart, d.pc, vaddr, hart.gprs.read(d.rs2))?;
        hart.gprs.write(d.rd, 0);
    } else {
        hart.gprs.write(d.rd, 1);
    }
    mmu.clear_reservation();
    Ok(())
}

/// Word-sized read-modify-write, atomic with respect to the single hart.
/// Translation uses the store access type, matching the required write
/// permission.
fn amo_w(
    hart: &mut Hart,
    mmu: &mut Mmu,
    d: &DecodedInsn,
    f: impl FnOnce(u32, u32) -> u32,
) -> Result<(), Trap> {
    let vaddr = amo_addr(hart, d, 4, Cause::StoreAmoAddressMisaligned)?;
    let pa = mmu.translate(hart, d.pc, vaddr, AccessType::Store)?;
    let old: u32 = mmu
        .bus()
        .read(pa)
        .ok_or_else(|| Trap::new(d.pc, Cause::StoreAmoAccessFault, vaddr))?;
    let new = f(old, hart.gprs.read(d.rs2) as u32);
    if !mmu.bus_mut().write(pa, new) {
        return Err(Trap::new(d.pc, Cause::StoreAmoAccessFault, vaddr));
    }
    mmu.clear_reservation();
    hart.gprs.write(d.rd, old as i32 as i64 as u64);
    Ok(())
}

fn amo_d(
    hart: &mut Hart,
    mmu: &mut Mmu,
    d: &DecodedInsn,
    f: impl FnOnce(u64, u64) -> u64,
) -> Result<(), Trap> {
    let vaddr = amo_addr(hart, d, 8, Cause::StoreAmoAddressMisaligned)?;
    let pa = mmu.translate(hart, d.pc, vaddr, AccessType::Store)?;
    let old: u64 = mmu
        .bus()
        .read(pa)
        .ok_or_else(|| Trap::new(d.pc, Cause::StoreAmoAccessFault, vaddr))?;
    let new = f(old, hart.gprs.read(d.rs2));
    if !mmu.bus_mut().write(pa, new) {
        return Err(Trap::new(d.pc, Cause::StoreAmoAccessFault, vaddr));
    }
    mmu.clear_reservation();
    hart.gprs.write(d.rd, old);
    Ok(())
}

macro_rules! amo {
    ($name_w:ident, $name_d:ident, $a:ident, $b:ident, $w:expr, $d_op:expr) => {
        pub fn $name_w(hart: &mut Hart, mmu: &mut Mmu, d: &DecodedInsn) -> Result<(), Trap> {
            amo_w(hart, mmu, d, |$a: u32, $b: u32| $w)
        }

        pub fn $name_d(hart: &mut Hart, mmu: &mut Mmu, d: &DecodedInsn) -> Result<(), Trap> {
            amo_d(hart, mmu, d, |$a: u64, $b: u64| $d_op)
        }
    };
}

amo!(exec_amoswap_w, exec_amoswap_d, _a, b, b, b);
amo!(exec_amoadd_w, exec_amoadd_d, a, b, a.wrapping_add(b), a.wrapping_add(b));
amo!(exec_amoxor_w, exec_amoxor_d, a, b, a ^ b, a ^ b);
amo!(exec_amoand_w, exec_amoand_d, a, b, a & b, a & b);
amo!(exec_amoor_w, exec_amoor_d, a, b, a | b, a | b);
amo!(
    exec_amomin_w,
    exec_amomin_d,
    a,
    b,
    (a as i32).min(b as i32) as u32,
    (a as i64).min(b as i64) as u64
);
amo!(
    exec_amomax_w,
    exec_amomax_d,
    a,
    b,
    (a as i32).max(b as i32) as u32,
    (a as i64).max(b as i64) as u64
);
amo!(exec_amominu_w, exec_amominu_d, a, b, a.min(b), a.min(b));
amo!(exec_amomaxu_w, exec_amomaxu_d, a, b, a.max(b), a.max(b));

// ---------------------------------------------------------------------------
// Zicsr
// ---------------------------------------------------------------------------

#[inline]
fn csr_addr(d: &DecodedInsn) -> u16 {
    ((d.insn >> 20) & 0xFFF) as u16
}

pub fn exec_csrrw(hart: &mut Hart, _mmu: &mut Mmu, d: &DecodedInsn) -> Result<(), Trap> {
    let csr = csr_addr(d);
    // rd=x0 skips the read and its side effects.
    let old = if d.rd != 0 {
        hart.csrs.read_checked(csr, d, hart.priv_level)?
    } else {
        0
    };
    let value = hart.gprs.read(d.rs1);
    hart.csrs.write_checked(csr, d, hart.priv_level, value)?;
    hart.gprs.write(d.rd, old);
    Ok(())
}

pub fn exec_csrrs(hart: &mut Hart, _mmu: &mut Mmu, d: &DecodedInsn) -> Result<(), Trap> {
    let csr = csr_addr(d);
    let old = hart.csrs.read_checked(csr, d, hart.priv_level)?;
    // rs1=x0 skips the write and its side effects, so reading a read-only
    // CSR with a zero mask does not trap.
    if d.rs1 != 0 {
        let value = old | hart.gprs.read(d.rs1);
        hart.csrs.write_checked(csr, d, hart.priv_level, value)?;
    }
    hart.gprs.write(d.rd, old);
    Ok(())
}

pub fn exec_csrrc(hart: &mut Hart, _mmu: &mut Mmu, d: &DecodedInsn) -> Result<(), Trap> {
    let csr = csr_addr(d);
    let old = hart.csrs.read_checked(csr, d, hart.priv_level)?;
    if d.rs1 != 0 {
        let value = old & !hart.gprs.read(d.rs1);
        hart.csrs.write_checked(csr, d, hart.priv_level, value)?;
    }
    hart.gprs.write(d.rd, old);
    Ok(())
}

pub fn exec_csrrwi(hart: &mut Hart, _mmu: &mut Mmu, d: &DecodedInsn) -> Result<(), Trap> {
    let csr = csr_addr(d);
    let old = if d.rd != 0 {
        hart.csrs.read_checked(csr, d, hart.priv_level)?
    } else {
        0
    };
    hart.csrs
        .write_checked(csr, d, hart.priv_level, d.rs1 as u64)?;
    hart.gprs.write(d.rd, old);
    Ok(())
}

pub fn exec_csrrsi(hart: &mut Hart, _mmu: &mut Mmu, d: &DecodedInsn) -> Result<(), Trap> {
    let csr = csr_addr(d);
    let old = hart.csrs.read_checked(csr, d, hart.priv_level)?;
    if d.rs1 != 0 {
        hart.csrs
            .write_checked(csr, d, hart.priv_level, old | d.rs1 as u64)?;
    }
    hart.gprs.write(d.rd, old);
    Ok(())
}

pub fn exec_csrrci(hart: &mut Hart, _mmu: &mut Mmu, d: &DecodedInsn) -> Result<(), Trap> {
    let csr = csr_addr(d);
    let old = hart.csrs.read_checked(csr, d, hart.priv_level)?;
    if d.rs1 != 0 {
        hart.csrs
            .write_checked(csr, d, hart.priv_level, old & !(d.rs1 as u64))?;
    }
    hart.gprs.write(d.rd, old);
    Ok(())
}

// ---------------------------------------------------------------------------
// Privileged
// ---------------------------------------------------------------------------

pub fn exec_ecall(hart: &mut Hart, _mmu: &mut Mmu, d: &DecodedInsn) -> Result<(), Trap> {
    let cause = match hart.priv_level {
        PrivilegeLevel::User => Cause::EnvironmentCallFromU,
        PrivilegeLevel::Supervisor => Cause::EnvironmentCallFromS,
        PrivilegeLevel::Machine => Cause::EnvironmentCallFromM,
    };
    Err(Trap::new(d.pc, cause, 0))
}

pub fn exec_ebreak(_hart: &mut Hart, _mmu: &mut Mmu, d: &DecodedInsn) -> Result<(), Trap> {
    Err(Trap::new(d.pc, Cause::Breakpoint, d.pc))
}

pub fn exec_mret(hart: &mut Hart, _mmu: &mut Mmu, d: &DecodedInsn) -> Result<(), Trap> {
    if hart.priv_level != PrivilegeLevel::Machine {
        return Err(illegal(d));
    }
    trap::mret(hart);
    Ok(())
}

pub fn exec_sret(hart: &mut Hart, _mmu: &mut Mmu, d: &DecodedInsn) -> Result<(), Trap> {
    match hart.priv_level {
        PrivilegeLevel::User => return Err(illegal(d)),
        PrivilegeLevel::Supervisor if hart.csrs.mstatus() & MSTATUS_TSR != 0 => {
            return Err(illegal(d));
        }
        _ => {}
    }
    trap::sret(hart);
    Ok(())
}

pub fn exec_wfi(hart: &mut Hart, _mmu: &mut Mmu, d: &DecodedInsn) -> Result<(), Trap> {
    match hart.priv_level {
        PrivilegeLevel::User => return Err(illegal(d)),
        PrivilegeLevel::Supervisor if hart.csrs.mstatus() & MSTATUS_TW != 0 => {
            return Err(illegal(d));
        }
        // Waiting is a legal implementation of WFI; so is not waiting.
        _ => Ok(()),
    }
}

pub fn exec_sfence_vma(hart: &mut Hart, mmu: &mut Mmu, d: &DecodedInsn) -> Result<(), Trap> {
    match hart.priv_level {
        PrivilegeLevel::User => return Err(illegal(d)),
        PrivilegeLevel::Supervisor if hart.csrs.mstatus() & MSTATUS_TVM != 0 => {
            return Err(illegal(d));
        }
        _ => {}
    }
    // No TLB to flush; the reservation does not survive a fence.
    mmu.clear_reservation();
    Ok(())
}
