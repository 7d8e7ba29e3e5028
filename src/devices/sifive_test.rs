//! SiFive test finisher: the guest's orderly-shutdown device.
//!
//! Writing `code << 16 | status` to offset 0 requests shutdown; status
//! 0x5555 is pass, 0x3333 fail, 0x7777 reset.

use crate::memory::Device;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ShutdownStatus {
    Fail = 0x3333,
    Pass = 0x5555,
    Reset = 0x7777,
}

impl ShutdownStatus {
    fn from_u16(v: u16) -> Option<Self> {
        match v {
            0x3333 => Some(ShutdownStatus::Fail),
            0x5555 => Some(ShutdownStatus::Pass),
            0x7777 => Some(ShutdownStatus::Reset),
            _ => None,
        }
    }
}

pub struct SiFiveTest {
    base: u64,
    on_shutdown: Box<dyn Fn(u16, ShutdownStatus) + Send + Sync>,
}

impl SiFiveTest {
    pub const DEFAULT_BASE: u64 = 0x10_0000;
    pub const SIZE: u64 = 0x1000;

    pub fn new(on_shutdown: impl Fn(u16, ShutdownStatus) + Send + Sync + 'static) -> Self {
        SiFiveTest {
            base: Self::DEFAULT_BASE,
            on_shutdown: Box::new(on_shutdown),
        }
    }
}

impl Device for SiFiveTest {
    fn name(&self) -> &str {
        "sifive-test"
    }

    fn start(&self) -> u64 {
        self.base
    }

    fn end(&self) -> u64 {
        self.base + Self::SIZE - 1
    }

    fn read(&self, _addr: u64, _size: usize) -> Option<u64> {
        Some(0)
    }

    fn write(&self, addr: u64, _size: usize, value: u64) -> bool {
        if addr - self.base == 0 {
            let status = (value & 0xFFFF) as u16;
            let code = (value >> 16) as u16;
            if let Some(status) = ShutdownStatus::from_u16(status) {
                log::info!("guest shutdown request: status={status:?} code={code:#x}");
                (self.on_shutdown)(code, status);
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn pass_write_triggers_callback() {
        let seen = Arc::new(AtomicU32::new(0));
        let seen2 = seen.clone();
        let dev = SiFiveTest::new(move |code, status| {
            assert_eq!(status, ShutdownStatus::Pass);
            seen2.store(code as u32 | 0x8000_0000, Ordering::SeqCst);
        });

        dev.write(SiFiveTest::DEFAULT_BASE, 4, (7 << 16) | 0x5555);
        assert_eq!(seen.load(Ordering::SeqCst), 0x8000_0007);
    }

    #[test]
    fn unknown_status_is_ignored() {
        let dev = SiFiveTest::new(|_, _| panic!("should not fire"));
        dev.write(SiFiveTest::DEFAULT_BASE, 4, 0x1234);
        assert_eq!(dev.read(SiFiveTest::DEFAULT_BASE, 4), Some(0));
    }
}
