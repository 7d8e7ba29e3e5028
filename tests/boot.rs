//! End-to-end scenarios: guest programs assembled as raw instruction
//! words, run through the full engine (worker + driver threads) or the
//! bare hart/MMU, down to the shutdown device.

use std::sync::Arc;
use std::time::Duration;

use uemu::cpu::csr::{
    self, SharedCsrs, MIP_MTIP, MSTATUS_SPP, SATP_MODE_SHIFT, SATP_MODE_SV39,
};
use uemu::cpu::mmu::Mmu;
use uemu::cpu::{Hart, PrivilegeLevel};
use uemu::devices::{Clint, ShutdownStatus};
use uemu::memory::{Bus, Device, Dram, DRAM_BASE};
use uemu::{Emulator, EmulatorConfig};

const MB: usize = 1024 * 1024;

fn emulator_with_program(program: &[u32]) -> Emulator {
    let mut emulator = Emulator::new(EmulatorConfig {
        dram_size: 16 * MB,
        interactive: false,
        // Backstop so a broken guest cannot hang the test suite.
        timeout: Some(Duration::from_secs(10)),
    })
    .unwrap();

    let mut bytes = Vec::with_capacity(program.len() * 4);
    for insn in program {
        bytes.extend_from_slice(&insn.to_le_bytes());
    }
    emulator
        .engine_mut()
        .mmu_mut()
        .bus_mut()
        .dram_mut()
        .write_bytes(DRAM_BASE, &bytes)
        .unwrap();
    emulator.engine_mut().hart_mut().pc = DRAM_BASE;
    emulator
}

#[test]
fn boot_and_halt_with_pass() {
    let mut emulator = emulator_with_program(&[
        0x001002B7, // lui  x5, 0x100      ; sifive-test base
        0x00005337, // lui  x6, 0x5
        0x55530313, // addi x6, x6, 0x555  ; x6 = 0x5555 (PASS, code 0)
        0x0062A023, // sw   x6, 0(x5)
    ]);

    emulator.run().unwrap();
    assert_eq!(emulator.shutdown_status(), Some(ShutdownStatus::Pass));
    assert_eq!(emulator.shutdown_code(), 0);
}

#[test]
fn fail_status_carries_code() {
    let mut emulator = emulator_with_program(&[
        0x001002B7, // lui  x5, 0x100
        0x00073337, // lui  x6, 0x73
        0x33330313, // addi x6, x6, 0x333  ; x6 = 0x73333: FAIL, code 7
        0x0062A023, // sw   x6, 0(x5)
    ]);

    emulator.run().unwrap();
    assert_eq!(emulator.shutdown_status(), Some(ShutdownStatus::Fail));
    assert_eq!(emulator.shutdown_code(), 7);
}

#[test]
fn host_timeout_halts_engine() {
    let mut emulator = Emulator::new(EmulatorConfig {
        dram_size: 4 * MB,
        interactive: false,
        timeout: Some(Duration::from_millis(200)),
    })
    .unwrap();
    emulator
        .engine_mut()
        .mmu_mut()
        .bus_mut()
        .dram_mut()
        .write_bytes(DRAM_BASE, &0x0000_006Fu32.to_le_bytes()) // j .
        .unwrap();
    emulator.engine_mut().hart_mut().pc = DRAM_BASE;

    emulator.run().unwrap();
    assert_eq!(emulator.shutdown_status(), None);
}

#[test]
fn ecall_from_user_delegates_to_supervisor() {
    let mut emulator = emulator_with_program(&[
        0x10000093, // 0x00 addi x1, x0, 0x100   ; medeleg bit 8
        0x30209073, // 0x04 csrw medeleg, x1
        0x001002B7, // 0x08 lui  x5, 0x100
        0x00005337, // 0x0C lui  x6, 0x5
        0x55530313, // 0x10 addi x6, x6, 0x555
        0x00000117, // 0x14 auipc x2, 0
        0x02C10113, // 0x18 addi x2, x2, 0x2C    ; handler at 0x40
        0x10511073, // 0x1C csrw stvec, x2
        0x00000197, // 0x20 auipc x3, 0
        0x01C18193, // 0x24 addi x3, x3, 0x1C    ; user code at 0x3C
        0x34119073, // 0x28 csrw mepc, x3
        0x00002237, // 0x2C lui  x4, 0x2
        0x80020213, // 0x30 addi x4, x4, -2048   ; x4 = 0x1800 (MPP mask)
        0x30023073, // 0x34 csrc mstatus, x4     ; MPP <- U
        0x30200073, // 0x38 mret
        0x00000073, // 0x3C ecall                ; from U-mode
        0x0062A023, // 0x40 sw x6, 0(x5)         ; S-mode trap handler
    ]);

    emulator.run().unwrap();
    assert_eq!(emulator.shutdown_status(), Some(ShutdownStatus::Pass));

    let hart = emulator.engine().hart();
    assert_eq!(hart.csrs.read_unchecked(csr::SCAUSE), 8);
    assert_eq!(hart.csrs.read_unchecked(csr::SEPC), DRAM_BASE + 0x3C);
    // SPP recorded User; the handler ran in S-mode.
    assert_eq!(hart.csrs.mstatus() & MSTATUS_SPP, 0);
    assert_eq!(hart.priv_level, PrivilegeLevel::Supervisor);
}

#[test]
fn machine_timer_interrupt_delivery() {
    let mut emulator = emulator_with_program(&[
        0x001002B7, // 0x00 lui  x5, 0x100
        0x00005337, // 0x04 lui  x6, 0x5
        0x55530313, // 0x08 addi x6, x6, 0x555
        0x00000397, // 0x0C auipc x7, 0
        0x02438393, // 0x10 addi x7, x7, 0x24    ; handler at 0x30
        0x30539073, // 0x14 csrw mtvec, x7
        0x08000413, // 0x18 addi x8, x0, 0x80    ; mie.MTIE
        0x30441073, // 0x1C csrw mie, x8
        0x020044B7, // 0x20 lui  x9, 0x2004      ; CLINT mtimecmp
        0x0004B023, // 0x24 sd   x0, 0(x9)       ; mtimecmp = 0 (past)
        0x30046073, // 0x28 csrsi mstatus, 8     ; MIE on
        0x0000006F, // 0x2C j .
        0x0062A023, // 0x30 sw x6, 0(x5)         ; timer trap handler
    ]);

    emulator.run().unwrap();
    assert_eq!(emulator.shutdown_status(), Some(ShutdownStatus::Pass));

    let hart = emulator.engine().hart();
    assert_eq!(hart.csrs.read_unchecked(csr::MCAUSE), (1 << 63) | 7);
    // The interrupt preempted the spin loop.
    assert_eq!(hart.csrs.read_unchecked(csr::MEPC), DRAM_BASE + 0x2C);
}

// Sv39 PTE flag bits used by the page-table scenario below.
const V: u64 = 1 << 0;
const R: u64 = 1 << 1;
const W: u64 = 1 << 2;
const X: u64 = 1 << 3;
const A: u64 = 1 << 6;
const D: u64 = 1 << 7;

/// Identity-map the first 2 MB of DRAM as a megapage and map VA
/// 0xC000_0000 to PA 0x8010_0000 through a 4 KB page.
#[test]
fn sv39_identity_and_alias_mapping() {
    let shared = Arc::new(SharedCsrs::default());
    let mut hart = Hart::new(shared);
    let mut mmu = Mmu::new(Bus::new(Dram::new(8 * MB)));

    let root = DRAM_BASE + 0x30_0000;
    let l1_ident = root + 0x1000;
    let l1_alias = root + 0x2000;
    let l0_alias = root + 0x3000;

    let bus = mmu.bus_mut();
    // Root: VPN2=2 covers 0x8000_0000, VPN2=3 covers 0xC000_0000.
    bus.write::<u64>(root + 2 * 8, (l1_ident >> 12) << 10 | V);
    bus.write::<u64>(root + 3 * 8, (l1_alias >> 12) << 10 | V);
    // 2 MB identity megapage for DRAM_BASE.
    bus.write::<u64>(l1_ident, (DRAM_BASE >> 12) << 10 | V | R | W | X | A | D);
    // VA 0xC000_0000 -> 4 KB page at PA 0x8010_0000.
    bus.write::<u64>(l1_alias, (l0_alias >> 12) << 10 | V);
    bus.write::<u64>(l0_alias, ((DRAM_BASE + 0x10_0000) >> 12) << 10 | V | R | W | A | D);

    hart.csrs
        .write_unchecked(csr::SATP, (SATP_MODE_SV39 << SATP_MODE_SHIFT) | (root >> 12));
    hart.priv_level = PrivilegeLevel::Supervisor;

    // Store through the alias, read back through the identity mapping.
    mmu.write::<u64>(&hart, 0, 0xC000_0000, 0xCAFE_BABE_DEAD_C0DE)
        .unwrap();
    let via_identity: u64 = mmu.read(&hart, 0, DRAM_BASE + 0x10_0000).unwrap();
    assert_eq!(via_identity, 0xCAFE_BABE_DEAD_C0DE);

    // And the other direction.
    mmu.write::<u64>(&hart, 0, DRAM_BASE + 0x10_0008, 0x1234_5678_9ABC_DEF0)
        .unwrap();
    let via_alias: u64 = mmu.read(&hart, 0, 0xC000_0008).unwrap();
    assert_eq!(via_alias, 0x1234_5678_9ABC_DEF0);
}

#[test]
fn clint_mtip_tracks_mtimecmp() {
    let shared = Arc::new(SharedCsrs::default());
    let clint = Clint::new(shared.clone());

    // mtimecmp in the future: no MTIP.
    clint.write(Clint::DEFAULT_BASE + 0x4000, 8, u64::MAX);
    assert_eq!(
        shared.mip.load(std::sync::atomic::Ordering::Acquire) & MIP_MTIP,
        0
    );

    // mtime >= mtimecmp: MTIP raised on the next tick.
    clint.write(Clint::DEFAULT_BASE + 0x4000, 8, 1);
    clint.write(Clint::DEFAULT_BASE + 0xBFF8, 8, 1_000);
    clint.tick();
    assert_ne!(
        shared.mip.load(std::sync::atomic::Ordering::Acquire) & MIP_MTIP,
        0
    );
}
