//! Goldfish RTC: nanoseconds since the Unix epoch over a two-register
//! window. Reading TIME_LOW latches the matching high half so a
//! low-then-high read pair is consistent.
//!
//! Only the clock half of the device is modeled; the alarm registers and
//! their interrupt line are out of scope here.

use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::memory::Device;

const TIME_LOW: u64 = 0x00;
const TIME_HIGH: u64 = 0x04;

pub struct GoldfishRtc {
    base: u64,
    latched_high: Mutex<u32>,
}

impl GoldfishRtc {
    pub const DEFAULT_BASE: u64 = 0x1000_0100;
    pub const SIZE: u64 = 0x1000;

    pub fn new() -> Self {
        GoldfishRtc {
            base: Self::DEFAULT_BASE,
            latched_high: Mutex::new(0),
        }
    }

    fn now_ns() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0)
    }
}

impl Default for GoldfishRtc {
    fn default() -> Self {
        Self::new()
    }
}

impl Device for GoldfishRtc {
    fn name(&self) -> &str {
        "goldfish-rtc"
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
        match addr - self.base {
            TIME_LOW => {
                let now = Self::now_ns();
                *self.latched_high.lock().unwrap() = (now >> 32) as u32;
                Some(now & 0xFFFF_FFFF)
            }
            TIME_HIGH => Some(*self.latched_high.lock().unwrap() as u64),
            _ => None,
        }
    }

    fn write(&self, _addr: u64, size: usize, _value: u64) -> bool {
        // The clock is read-only in this machine; accept and drop stores.
        size == 4
    }
}
