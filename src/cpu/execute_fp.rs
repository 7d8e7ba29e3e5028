//! Executors for the F and D extensions.
//!
//! Every FP instruction is illegal while `mstatus.FS` is Off. Results that
//! land in an FP register dirty FS; raised exception flags accrue into
//! fflags (which also dirties FS). Rounding modes come from the
//! instruction's rm field, with `DYN` deferring to the frm CSR; reserved
//! encodings in either place are illegal.

use crate::cpu::csr::FS_OFF;
use crate::cpu::decode::DecodedInsn;
use crate::cpu::execute::illegal;
use crate::cpu::fpu::{self, RoundingMode, F32_SIGN, F64_SIGN};
use crate::cpu::mmu::Mmu;
use crate::cpu::trap::Trap;
use crate::cpu::Hart;

fn check_fs(hart: &Hart, d: &DecodedInsn) -> Result<(), Trap> {
    if hart.csrs.fs() == FS_OFF {
        return Err(illegal(d));
    }
    Ok(())
}

/// Resolve the instruction's rounding mode, honoring DYN indirection.
fn rounding_mode(hart: &Hart, d: &DecodedInsn) -> Result<RoundingMode, Trap> {
    let field = ((d.insn >> 12) & 7) as u64;
    let bits = if field == RoundingMode::DYN {
        hart.csrs.frm()
    } else {
        field
    };
    RoundingMode::from_bits(bits).ok_or_else(|| illegal(d))
}

// ---------------------------------------------------------------------------
// Loads and stores
// ---------------------------------------------------------------------------

pub fn exec_flw(hart: &mut Hart, mmu: &mut Mmu, d: &DecodedInsn) -> Result<(), Trap> {
    check_fs(hart, d)?;
    let vaddr = hart.gprs.read(d.rs1).wrapping_add(d.imm as u64);
    let v: u32 = mmu.read(hart, d.pc, vaddr)?;
    hart.fprs.write_f32(d.rd, v);
    hart.csrs.set_fs_dirty();
    Ok(())
}

pub fn exec_fld(hart: &mut Hart, mmu: &mut Mmu, d: &DecodedInsn) -> Result<(), Trap> {
    check_fs(hart, d)?;
    let vaddr = hart.gprs.read(d.rs1).wrapping_add(d.imm as u64);
    let v: u64 = mmu.read(hart, d.pc, vaddr)?;
    hart.fprs.write_f64(d.rd, v);
    hart.csrs.set_fs_dirty();
    Ok(())
}

pub fn exec_fsw(hart: &mut Hart, mmu: &mut Mmu, d: &DecodedInsn) -> Result<(), Trap> {
    check_fs(hart, d)?;
    let vaddr = hart.gprs.read(d.rs1).wrapping_add(d.imm as u64);
    // The raw low 32 bits are stored; NaN boxing is not inspected.
    let v = hart.fprs.read_f64(d.rs2) as u32;
    mmu.write(hart, d.pc, vaddr, v)
}

pub fn exec_fsd(hart: &mut Hart, mmu: &mut Mmu, d: &DecodedInsn) -> Result<(), Trap> {
    check_fs(hart, d)?;
    let vaddr = hart.gprs.read(d.rs1).wrapping_add(d.imm as u64);
    let v = hart.fprs.read_f64(d.rs2);
    mmu.write(hart, d.pc, vaddr, v)
}

// ---------------------------------------------------------------------------
// Arithmetic
// ---------------------------------------------------------------------------

macro_rules! fp_arith_s {
    ($name:ident, $kernel:path) => {
        pub fn $name(hart: &mut Hart, _mmu: &mut Mmu, d: &DecodedInsn) -> Result<(), Trap> {
            check_fs(hart, d)?;
            let rm = rounding_mode(hart, d)?;
            let a = hart.fprs.read_f32(d.rs1);
            let b = hart.fprs.read_f32(d.rs2);
            let (r, flags) = $kernel(a, b, rm);
            hart.fprs.write_f32(d.rd, r);
            hart.csrs.set_fs_dirty();
            hart.csrs.accrue_fflags(flags.bits());
            Ok(())
        }
    };
}

macro_rules! fp_arith_d {
    ($name:ident, $kernel:path) => {
        pub fn $name(hart: &mut Hart, _mmu: &mut Mmu, d: &DecodedInsn) -> Result<(), Trap> {
            check_fs(hart, d)?;
            let rm = rounding_mode(hart, d)?;
            let a = hart.fprs.read_f64(d.rs1);
            let b = hart.fprs.read_f64(d.rs2);
            let (r, flags) = $kernel(a, b, rm);
            hart.fprs.write_f64(d.rd, r);
            hart.csrs.set_fs_dirty();
            hart.csrs.accrue_fflags(flags.bits());
            Ok(())
        }
    };
}

fp_arith_s!(exec_fadd_s, fpu::f32_add);
fp_arith_s!(exec_fsub_s, fpu::f32_sub);
fp_arith_s!(exec_fmul_s, fpu::f32_mul);
fp_arith_s!(exec_fdiv_s, fpu::f32_div);
fp_arith_d!(exec_fadd_d, fpu::f64_add);
fp_arith_d!(exec_fsub_d, fpu::f64_sub);
fp_arith_d!(exec_fmul_d, fpu::f64_mul);
fp_arith_d!(exec_fdiv_d, fpu::f64_div);

pub fn exec_fsqrt_s(hart: &mut Hart, _mmu: &mut Mmu, d: &DecodedInsn) -> Result<(), Trap> {
    check_fs(hart, d)?;
    let rm = rounding_mode(hart, d)?;
    let (r, flags) = fpu::f32_sqrt(hart.fprs.read_f32(d.rs1), rm);
    hart.fprs.write_f32(d.rd, r);
    hart.csrs.set_fs_dirty();
    hart.csrs.accrue_fflags(flags.bits());
    Ok(())
}

pub fn exec_fsqrt_d(hart: &mut Hart, _mmu: &mut Mmu, d: &DecodedInsn) -> Result<(), Trap> {
    check_fs(hart, d)?;
    let rm = rounding_mode(hart, d)?;
    let (r, flags) = fpu::f64_sqrt(hart.fprs.read_f64(d.rs1), rm);
    hart.fprs.write_f64(d.rd, r);
    hart.csrs.set_fs_dirty();
    hart.csrs.accrue_fflags(flags.bits());
    Ok(())
}

// Fused multiply-add family, derived from one kernel by sign flips:
// fmadd = a*b+c, fmsub = a*b-c, fnmsub = -(a*b)+c, fnmadd = -(a*b)-c.
macro_rules! fp_fma_s {
    ($name:ident, $a_xor:expr, $c_xor:expr) => {
        pub fn $name(hart: &mut Hart, _mmu: &mut Mmu, d: &DecodedInsn) -> Result<(), Trap> {
            check_fs(hart, d)?;
            let rm = rounding_mode(hart, d)?;
            let a = hart.fprs.read_f32(d.rs1) ^ $a_xor;
            let b = hart.fprs.read_f32(d.rs2);
            let c = hart.fprs.read_f32(d.rs3) ^ $c_xor;
            let (r, flags) = fpu::f32_fma(a, b, c, rm);
            hart.fprs.write_f32(d.rd, r);
            hart.csrs.set_fs_dirty();
            hart.csrs.accrue_fflags(flags.bits());
            Ok(())
        }
    };
}

macro_rules! fp_fma_d {
    ($name:ident, $a_xor:expr, $c_xor:expr) => {
        pub fn $name(hart: &mut Hart, _mmu: &mut Mmu, d: &DecodedInsn) -> Result<(), Trap> {
            check_fs(hart, d)?;
            let rm = rounding_mode(hart, d)?;
            let a = hart.fprs.read_f64(d.rs1) ^ $a_xor;
            let b = hart.fprs.read_f64(d.rs2);
            let c = hart.fprs.read_f64(d.rs3) ^ $c_xor;
            let (r, flags) = fpu::f64_fma(a, b, c, rm);
            hart.fprs.write_f64(d.rd, r);
            hart.csrs.set_fs_dirty();
            hart.csrs.accrue_fflags(flags.bits());
            Ok(())
        }
    };
}

fp_fma_s!(exec_fmadd_s, 0, 0);
fp_fma_s!(exec_fmsub_s, 0, F32_SIGN);
fp_fma_s!(exec_fnmsub_s, F32_SIGN, 0);
fp_fma_s!(exec_fnmadd_s, F32_SIGN, F32_SIGN);
fp_fma_d!(exec_fmadd_d, 0, 0);
fp_fma_d!(exec_fmsub_d, 0, F64_SIGN);
fp_fma_d!(exec_fnmsub_d, F64_SIGN, 0);
fp_fma_d!(exec_fnmadd_d, F64_SIGN, F64_SIGN);

// ---------------------------------------------------------------------------
// Sign injection, min/max, compares, classify
// ---------------------------------------------------------------------------

macro_rules! fp_sgnj_s {
    ($name:ident, $a:ident, $b:ident, $sign:expr) => {
        pub fn $name(hart: &mut Hart, _mmu: &mut Mmu, d: &DecodedInsn) -> Result<(), Trap> {
            check_fs(hart, d)?;
            let $a = hart.fprs.read_f32(d.rs1);
            let $b = hart.fprs.read_f32(d.rs2);
            hart.fprs.write_f32(d.rd, ($a & !F32_SIGN) | ($sign & F32_SIGN));
            hart.csrs.set_fs_dirty();
            Ok(())
        }
    };
}

macro_rules! fp_sgnj_d {
    ($name:ident, $a:ident, $b:ident, $sign:expr) => {
        pub fn $name(hart: &mut Hart, _mmu: &mut Mmu, d: &DecodedInsn) -> Result<(), Trap> {
            check_fs(hart, d)?;
            let $a = hart.fprs.read_f64(d.rs1);
            let $b = hart.fprs.read_f64(d.rs2);
            hart.fprs.write_f64(d.rd, ($a & !F64_SIGN) | ($sign & F64_SIGN));
            hart.csrs.set_fs_dirty();
            Ok(())
        }
    };
}

fp_sgnj_s!(exec_fsgnj_s, a, b, b);
fp_sgnj_s!(exec_fsgnjn_s, a, b, !b);
fp_sgnj_s!(exec_fsgnjx_s, a, b, a ^ b);
fp_sgnj_d!(exec_fsgnj_d, a, b, b);
fp_sgnj_d!(exec_fsgnjn_d, a, b, !b);
fp_sgnj_d!(exec_fsgnjx_d, a, b, a ^ b);

macro_rules! fp_minmax_s {
    ($name:ident, $kernel:path) => {
        pub fn $name(hart: &mut Hart, _mmu: &mut Mmu, d: &DecodedInsn) -> Result<(), Trap> {
            check_fs(hart, d)?;
            let (r, flags) = $kernel(hart.fprs.read_f32(d.rs1), hart.fprs.read_f32(d.rs2));
            hart.fprs.write_f32(d.rd, r);
            hart.csrs.set_fs_dirty();
            hart.csrs.accrue_fflags(flags.bits());
            Ok(())
        }
    };
}

macro_rules! fp_minmax_d {
    ($name:ident, $kernel:path) => {
        pub fn $name(hart: &mut Hart, _mmu: &mut Mmu, d: &DecodedInsn) -> Result<(), Trap> {
            check_fs(hart, d)?;
            let (r, flags) = $kernel(hart.fprs.read_f64(d.rs1), hart.fprs.read_f64(d.rs2));
            hart.fprs.write_f64(d.rd, r);
            hart.csrs.set_fs_dirty();
            hart.csrs.accrue_fflags(flags.bits());
            Ok(())
        }
    };
}

fp_minmax_s!(exec_fmin_s, fpu::f32_min);
fp_minmax_s!(exec_fmax_s, fpu::f32_max);
fp_minmax_d!(exec_fmin_d, fpu::f64_min);
fp_minmax_d!(exec_fmax_d, fpu::f64_max);

macro_rules! fp_cmp_s {
    ($name:ident, $kernel:path) => {
        pub fn $name(hart: &mut Hart, _mmu: &mut Mmu, d: &DecodedInsn) -> Result<(), Trap> {
            check_fs(hart, d)?;
            let (r, flags) = $kernel(hart.fprs.read_f32(d.rs1), hart.fprs.read_f32(d.rs2));
            hart.gprs.write(d.rd, r as u64);
            hart.csrs.accrue_fflags(flags.bits());
            Ok(())
        }
    };
}

macro_rules! fp_cmp_d {
    ($name:ident, $kernel:path) => {
        pub fn $name(hart: &mut Hart, _mmu: &mut Mmu, d: &DecodedInsn) -> Result<(), Trap> {
            check_fs(hart, d)?;
            let (r, flags) = $kernel(hart.fprs.read_f64(d.rs1), hart.fprs.read_f64(d.rs2));
            hart.gprs.write(d.rd, r as u64);
            hart.csrs.accrue_fflags(flags.bits());
            Ok(())
        }
    };
}

fp_cmp_s!(exec_feq_s, fpu::f32_eq);
fp_cmp_s!(exec_flt_s, fpu::f32_lt);
fp_cmp_s!(exec_fle_s, fpu::f32_le);
fp_cmp_d!(exec_feq_d, fpu::f64_eq);
fp_cmp_d!(exec_flt_d, fpu::f64_lt);
fp_cmp_d!(exec_fle_d, fpu::f64_le);

pub fn exec_fclass_s(hart: &mut Hart, _mmu: &mut Mmu, d: &DecodedInsn) -> Result<(), Trap> {
    check_fs(hart, d)?;
    let class = fpu::f32_classify(hart.fprs.read_f32(d.rs1));
    hart.gprs.write(d.rd, class);
    Ok(())
}

pub fn exec_fclass_d(hart: &mut Hart, _mmu: &mut Mmu, d: &DecodedInsn) -> Result<(), Trap> {
    check_fs(hart, d)?;
    let class = fpu::f64_classify(hart.fprs.read_f64(d.rs1));
    hart.gprs.write(d.rd, class);
    Ok(())
}

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

// FP -> integer: result goes to a GPR (W forms sign-extend).
macro_rules! fp_to_int {
    ($name:ident, $read:ident, $kernel:path, $conv:expr) => {
        pub fn $name(hart: &mut Hart, _mmu: &mut Mmu, d: &DecodedInsn) -> Result<(), Trap> {
            check_fs(hart, d)?;
            let rm = rounding_mode(hart, d)?;
            let (r, flags) = $kernel(hart.fprs.$read(d.rs1), rm);
            hart.gprs.write(d.rd, $conv(r));
            hart.csrs.accrue_fflags(flags.bits());
            Ok(())
        }
    };
}

fp_to_int!(exec_fcvt_w_s, read_f32, fpu::f32_to_i32, |r: i32| r as i64 as u64);
fp_to_int!(exec_fcvt_wu_s, read_f32, fpu::f32_to_u32, |r: u32| r as i32 as i64 as u64);
fp_to_int!(exec_fcvt_l_s, read_f32, fpu::f32_to_i64, |r: i64| r as u64);
fp_to_int!(exec_fcvt_lu_s, read_f32, fpu::f32_to_u64, |r: u64| r);
fp_to_int!(exec_fcvt_w_d, read_f64, fpu::f64_to_i32, |r: i32| r as i64 as u64);
fp_to_int!(exec_fcvt_wu_d, read_f64, fpu::f64_to_u32, |r: u32| r as i32 as i64 as u64);
fp_to_int!(exec_fcvt_l_d, read_f64, fpu::f64_to_i64, |r: i64| r as u64);
fp_to_int!(exec_fcvt_lu_d, read_f64, fpu::f64_to_u64, |r: u64| r);

// Integer -> FP: operand comes from a GPR.
macro_rules! int_to_fp_s {
    ($name:ident, $kernel:path, $conv:expr) => {
        pub fn $name(hart: &mut Hart, _mmu: &mut Mmu, d: &DecodedInsn) -> Result<(), Trap> {
            check_fs(hart, d)?;
            let rm = rounding_mode(hart, d)?;
            let (r, flags) = $kernel($conv(hart.gprs.read(d.rs1)), rm);
            hart.fprs.write_f32(d.rd, r);
            hart.csrs.set_fs_dirty();
            hart.csrs.accrue_fflags(flags.bits());
            Ok(())
        }
    };
}

macro_rules! int_to_fp_d {
    ($name:ident, $kernel:path, $conv:expr) => {
        pub fn $name(hart: &mut Hart, _mmu: &mut Mmu, d: &DecodedInsn) -> Result<(), Trap> {
            check_fs(hart, d)?;
            let rm = rounding_mode(hart, d)?;
            let (r, flags) = $kernel($conv(hart.gprs.read(d.rs1)), rm);
            hart.fprs.write_f64(d.rd, r);
            hart.csrs.set_fs_dirty();
            hart.csrs.accrue_fflags(flags.bits());
            Ok(())
        }
    };
}

int_to_fp_s!(exec_fcvt_s_w, fpu::i32_to_f32, |v: u64| v as i32);
int_to_fp_s!(exec_fcvt_s_wu, fpu::u32_to_f32, |v: u64| v as u32);
int_to_fp_s!(exec_fcvt_s_l, fpu::i64_to_f32, |v: u64| v as i64);
int_to_fp_s!(exec_fcvt_s_lu, fpu::u64_to_f32, |v: u64| v);
int_to_fp_d!(exec_fcvt_d_w, fpu::i32_to_f64, |v: u64| v as i32);
int_to_fp_d!(exec_fcvt_d_wu, fpu::u32_to_f64, |v: u64| v as u32);
int_to_fp_d!(exec_fcvt_d_l, fpu::i64_to_f64, |v: u64| v as i64);
int_to_fp_d!(exec_fcvt_d_lu, fpu::u64_to_f64, |v: u64| v);

pub fn exec_fcvt_s_d(hart: &mut Hart, _mmu: &mut Mmu, d: &DecodedInsn) -> Result<(), Trap> {
    check_fs(hart, d)?;
    let rm = rounding_mode(hart, d)?;
    let (r, flags) = fpu::f64_to_f32(hart.fprs.read_f64(d.rs1), rm);
    hart.fprs.write_f32(d.rd, r);
    hart.csrs.set_fs_dirty();
    hart.csrs.accrue_fflags(flags.bits());
    Ok(())
}

pub fn exec_fcvt_d_s(hart: &mut Hart, _mmu: &mut Mmu, d: &DecodedInsn) -> Result<(), Trap> {
    check_fs(hart, d)?;
    let (r, flags) = fpu::f32_to_f64(hart.fprs.read_f32(d.rs1));
    hart.fprs.write_f64(d.rd, r);
    hart.csrs.set_fs_dirty();
    hart.csrs.accrue_fflags(flags.bits());
    Ok(())
}

// ---------------------------------------------------------------------------
// Bit moves
// ---------------------------------------------------------------------------

pub fn exec_fmv_x_w(hart: &mut Hart, _mmu: &mut Mmu, d: &DecodedInsn) -> Result<(), Trap> {
    check_fs(hart, d)?;
    // The raw low 32 bits, sign-extended; boxing is not inspected.
    let v = hart.fprs.read_f64(d.rs1) as u32;
    hart.gprs.write(d.rd, v as i32 as i64 as u64);
    Ok(())
}

pub fn exec_fmv_w_x(hart: &mut Hart, _mmu: &mut Mmu, d: &DecodedInsn) -> Result<(), Trap> {
    check_fs(hart, d)?;
    hart.fprs.write_f32(d.rd, hart.gprs.read(d.rs1) as u32);
    hart.csrs.set_fs_dirty();
    Ok(())
}

pub fn exec_fmv_x_d(hart: &mut Hart, _mmu: &mut Mmu, d: &DecodedInsn) -> Result<(), Trap> {
    check_fs(hart, d)?;
    hart.gprs.write(d.rd, hart.fprs.read_f64(d.rs1));
    Ok(())
}

pub fn exec_fmv_d_x(hart: &mut Hart, _mmu: &mut Mmu, d: &DecodedInsn) -> Result<(), Trap> {
    check_fs(hart, d)?;
    hart.fprs.write_f64(d.rd, hart.gprs.read(d.rs1));
    hart.csrs.set_fs_dirty();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::csr::{self, SharedCsrs, MSTATUS_FS, MSTATUS_SD};
    use crate::cpu::decode::{Decoder, InsnLen};
    use crate::cpu::trap::Cause;
    use crate::memory::{Bus, Dram, DRAM_BASE};
    use std::sync::Arc;

    fn machine() -> (Hart, Mmu) {
        let hart = Hart::new(Arc::new(SharedCsrs::default()));
        let mmu = Mmu::new(Bus::new(Dram::new(1024 * 1024)));
        (hart, mmu)
    }

    fn run(hart: &mut Hart, mmu: &mut Mmu, insn: u32) -> Result<(), Trap> {
        let d = Decoder::decode(insn, InsnLen::Normal, hart.pc);
        hart.pc = hart.pc.wrapping_add(4);
        (d.exec)(hart, mmu, &d)
    }

    const F32_SNAN: u32 = 0x7F80_0001;

    #[test]
    fn fp_illegal_when_fs_off() {
        let (mut hart, mut mmu) = machine();
        hart.pc = DRAM_BASE;
        let m = hart.csrs.mstatus() & !MSTATUS_FS;
        hart.csrs.write_unchecked(csr::MSTATUS, m);
        // fadd.s f1, f2, f3
        let trap = run(&mut hart, &mut mmu, 0x0031_00D3).unwrap_err();
        assert_eq!(trap.cause, Cause::IllegalInstruction);
    }

    #[test]
    fn fadd_and_dirty() {
        let (mut hart, mut mmu) = machine();
        hart.pc = DRAM_BASE;
        hart.fprs.write_f32(2, 1.5f32.to_bits());
        hart.fprs.write_f32(3, 2.25f32.to_bits());
        run(&mut hart, &mut mmu, 0x0031_00D3).unwrap(); // fadd.s f1, f2, f3
        assert_eq!(hart.fprs.read_f32(1), 3.75f32.to_bits());
        assert_ne!(hart.csrs.mstatus() & MSTATUS_SD, 0);
    }

    #[test]
    fn fmin_snan_sets_nv_and_dirty() {
        let (mut hart, mut mmu) = machine();
        hart.pc = DRAM_BASE;
        hart.fprs.write_f32(2, F32_SNAN);
        hart.fprs.write_f32(3, 1.0f32.to_bits());
        run(&mut hart, &mut mmu, 0x2831_00D3).unwrap(); // fmin.s f1, f2, f3
        assert_eq!(hart.fprs.read_f32(1), 1.0f32.to_bits());
        assert_ne!(hart.csrs.read_unchecked(csr::FFLAGS) & 0x10, 0); // NV
        assert_ne!(hart.csrs.mstatus() & MSTATUS_SD, 0);

        // Both NaN: canonical qNaN result.
        hart.fprs.write_f32(3, fpu::F32_CANONICAL_NAN);
        run(&mut hart, &mut mmu, 0x2831_00D3).unwrap();
        assert_eq!(hart.fprs.read_f32(1), fpu::F32_CANONICAL_NAN);
    }

    #[test]
    fn reserved_rm_is_illegal() {
        let (mut hart, mut mmu) = machine();
        hart.pc = DRAM_BASE;
        // fadd.s with rm=101 (reserved)
        let trap = run(&mut hart, &mut mmu, 0x0031_50D3).unwrap_err();
        assert_eq!(trap.cause, Cause::IllegalInstruction);
    }

    #[test]
    fn dyn_rm_uses_frm() {
        let (mut hart, mut mmu) = machine();
        hart.pc = DRAM_BASE;
        hart.csrs.write_unchecked(csr::FRM, 0b001); // RTZ
        hart.fprs.write_f64(2, 1.75f64.to_bits());
        // fcvt.w.d x1, f2, dyn
        run(&mut hart, &mut mmu, 0xC201_70D3).unwrap();
        assert_eq!(hart.gprs.read(1), 1);

        // An invalid frm makes a DYN instruction illegal.
        hart.csrs.write_unchecked(csr::FCSR, 0b101 << 5);
        assert_eq!(hart.csrs.read_unchecked(csr::FRM), 0b101);
        let trap = run(&mut hart, &mut mmu, 0xC201_70D3).unwrap_err();
        assert_eq!(trap.cause, Cause::IllegalInstruction);
    }

    #[test]
    fn flw_boxes_and_fsw_stores_raw() {
        let (mut hart, mut mmu) = machine();
        hart.pc = DRAM_BASE;
        let addr = DRAM_BASE + 0x100;
        hart.gprs.write(1, addr);
        mmu.bus_mut().write::<u32>(addr, 0x4048_F5C3); // 3.14f
        run(&mut hart, &mut mmu, 0x0000_A107).unwrap(); // flw f2, 0(x1)
        assert_eq!(hart.fprs.read_f64(2), 0xFFFF_FFFF_4048_F5C3);

        run(&mut hart, &mut mmu, 0x0020_A227).unwrap(); // fsw f2, 4(x1)
        assert_eq!(mmu.bus().read::<u32>(addr + 4), Some(0x4048_F5C3));
    }

    #[test]
    fn fmadd_negations() {
        let (mut hart, mut mmu) = machine();
        hart.pc = DRAM_BASE;
        hart.fprs.write_f64(1, 2.0f64.to_bits());
        hart.fprs.write_f64(2, 3.0f64.to_bits());
        hart.fprs.write_f64(3, 1.0f64.to_bits());
        // fmadd.d f0, f1, f2, f3 = 2*3+1
        run(&mut hart, &mut mmu, 0x1A20_F043).unwrap();
        assert_eq!(hart.fprs.read_f64(0), 7.0f64.to_bits());
        // fnmsub.d f0, f1, f2, f3 = -(2*3)+1
        run(&mut hart, &mut mmu, 0x1A20_F04B).unwrap();
        assert_eq!(hart.fprs.read_f64(0), (-5.0f64).to_bits());
    }

    #[test]
    fn fclass_reads_boxed_view() {
        let (mut hart, mut mmu) = machine();
        hart.pc = DRAM_BASE;
        // A raw double is not a boxed single: fclass.s sees the canonical
        // qNaN.
        hart.fprs.write_f64(1, 1.0f64.to_bits());
        run(&mut hart, &mut mmu, 0xE000_9153).unwrap(); // fclass.s x2, f1
        assert_eq!(hart.gprs.read(2), 1 << 9);
        // fclass.d on the same register sees a normal positive number.
        run(&mut hart, &mut mmu, 0xE200_9153).unwrap(); // fclass.d x2, f1
        assert_eq!(hart.gprs.read(2), 1 << 6);
    }

    #[test]
    fn fmv_round_trip() {
        let (mut hart, mut mmu) = machine();
        hart.pc = DRAM_BASE;
        hart.gprs.write(1, 0x8000_0000); // -0.0f bit pattern
        run(&mut hart, &mut mmu, 0xF000_8053).unwrap(); // fmv.w.x f0, x1
        assert_eq!(hart.fprs.read_f32(0), 0x8000_0000);
        run(&mut hart, &mut mmu, 0xE000_0153).unwrap(); // fmv.x.w x2, f0
        assert_eq!(hart.gprs.read(2), 0xFFFF_FFFF_8000_0000); // sign-extended
    }

    #[test]
    fn conversions() {
        let (mut hart, mut mmu) = machine();
        hart.pc = DRAM_BASE;
        hart.gprs.write(1, (-7i64) as u64);
        run(&mut hart, &mut mmu, 0xD220_F053).unwrap(); // fcvt.d.l f0, x1
        assert_eq!(hart.fprs.read_f64(0), (-7.0f64).to_bits());
        // fcvt.s.d f1, f0
        run(&mut hart, &mut mmu, 0x4010_00D3).unwrap();
        assert_eq!(hart.fprs.read_f32(1), (-7.0f32).to_bits());
        // fcvt.w.s x2, f1 (rtz)
        run(&mut hart, &mut mmu, 0xC000_9153).unwrap();
        assert_eq!(hart.gprs.read(2), (-7i64) as u64);
    }
}
