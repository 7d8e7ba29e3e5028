//! NS16550-compatible UART.
//!
//! The RX FIFO is fed by the host console on the driver thread; TX bytes
//! are buffered under the device lock and drained to stdout on the next
//! tick. The interrupt line is recomputed after every state change and
//! driven through the `(id, level)` callback.

use std::collections::VecDeque;
use std::io::Write;
use std::sync::Mutex;

use crate::devices::IrqCallback;
use crate::memory::Device;

// Register offsets
const RBR: u64 = 0; // receive buffer (R) / transmit holding (W)
const IER: u64 = 1; // interrupt enable
const IIR: u64 = 2; // interrupt identification (R) / FIFO control (W)
const LCR: u64 = 3; // line control
const MCR: u64 = 4; // modem control
const LSR: u64 = 5; // line status
const MSR: u64 = 6; // modem status
const SCR: u64 = 7; // scratch

// IER bits
const IER_RDI: u8 = 0x01; // receive data available
const IER_THRI: u8 = 0x02; // transmitter holding register empty

// IIR values
const IIR_NO_INT: u8 = 0x01;
const IIR_THRI: u8 = 0x02;
const IIR_RDI: u8 = 0x04;
const IIR_FIFO_ENABLED: u8 = 0xC0;

// LSR bits
const LSR_DR: u8 = 0x01;
const LSR_THRE: u8 = 0x20;
const LSR_TEMT: u8 = 0x40;

// LCR bits
const LCR_DLAB: u8 = 0x80;

const RX_FIFO_DEPTH: usize = 64;

struct UartState {
    rx_fifo: VecDeque<u8>,
    tx_buffer: Vec<u8>,
    ier: u8,
    lcr: u8,
    mcr: u8,
    scr: u8,
    fifo_enabled: bool,
    divisor: u16,
    thre_pending: bool,
}

pub struct Ns16550 {
    base: u64,
    irq_id: u32,
    irq: IrqCallback,
    state: Mutex<UartState>,
}

impl Ns16550 {
    pub const DEFAULT_BASE: u64 = 0x1000_0000;
    pub const SIZE: u64 = 0x100;
    pub const DEFAULT_IRQ_ID: u32 = 10;

    pub fn new(irq: IrqCallback) -> Self {
        Ns16550 {
            base: Self::DEFAULT_BASE,
            irq_id: Self::DEFAULT_IRQ_ID,
            irq,
            state: Mutex::new(UartState {
                rx_fifo: VecDeque::new(),
                tx_buffer: Vec::new(),
                ier: 0,
                lcr: 0,
                mcr: 0,
                scr: 0,
                fifo_enabled: false,
                divisor: 0,
                thre_pending: false,
            }),
        }
    }

    /// Feed host input into the RX FIFO. Called from the driver thread.
    pub fn receive(&self, bytes: &[u8]) {
        let mut state = self.state.lock().unwrap();
        for &b in bytes {
            if state.rx_fifo.len() >= RX_FIFO_DEPTH {
                state.rx_fifo.pop_front();
            }
            state.rx_fifo.push_back(b);
        }
        self.update_irq(&state);
    }

    fn interrupt_pending(state: &UartState) -> bool {
        (state.ier & IER_RDI != 0 && !state.rx_fifo.is_empty())
            || (state.ier & IER_THRI != 0 && state.thre_pending)
    }

    fn update_irq(&self, state: &UartState) {
        (self.irq)(self.irq_id, Self::interrupt_pending(state));
    }

    fn iir(state: &mut UartState) -> u8 {
        let fifo = if state.fifo_enabled { IIR_FIFO_ENABLED } else { 0 };
        if state.ier & IER_RDI != 0 && !state.rx_fifo.is_empty() {
            fifo | IIR_RDI
        } else if state.ier & IER_THRI != 0 && state.thre_pending {
            // Reading IIR with THRI as the source clears it.
            state.thre_pending = false;
            fifo | IIR_THRI
        } else {
            fifo | IIR_NO_INT
        }
    }

    fn lsr(state: &UartState) -> u8 {
        let mut lsr = LSR_THRE | LSR_TEMT;
        if !state.rx_fifo.is_empty() {
            lsr |= LSR_DR;
        }
        lsr
    }
}

impl Device for Ns16550 {
    fn name(&self) -> &str {
        "ns16550"
    }

    fn start(&self) -> u64 {
        self.base
    }

    fn end(&self) -> u64 {
        self.base + Self::SIZE - 1
    }

    fn read(&self, addr: u64, size: usize) -> Option<u64> {
        if size != 1 {
            return None;
        }
        let mut state = self.state.lock().unwrap();

        let value = match addr - self.base {
            RBR => {
                if state.lcr & LCR_DLAB != 0 {
                    state.divisor as u8
                } else {
                    let b = state.rx_fifo.pop_front().unwrap_or(0);
                    self.update_irq(&state);
                    b
                }
            }
            IER => {
                if state.lcr & LCR_DLAB != 0 {
                    (state.divisor >> 8) as u8
                } else {
                    state.ier
                }
            }
            IIR => {
                let v = Self::iir(&mut state);
                self.update_irq(&state);
                v
            }
            LCR => state.lcr,
            MCR => state.mcr,
            LSR => Self::lsr(&state),
            MSR => 0,
            SCR => state.scr,
            _ => return None,
        };
        Some(value as u64)
    }

    fn write(&self, addr: u64, size: usize, value: u64) -> bool {
        if size != 1 {
            return false;
        }
        let value = value as u8;
        let mut state = self.state.lock().unwrap();

        match addr - self.base {
            RBR => {
                if state.lcr & LCR_DLAB != 0 {
                    state.divisor = (state.divisor & 0xFF00) | value as u16;
                } else {
                    state.tx_buffer.push(value);
                    // The byte is "sent" immediately, so THR is empty again.
                    state.thre_pending = true;
                    self.update_irq(&state);
                }
            }
            IER => {
                if state.lcr & LCR_DLAB != 0 {
                    state.divisor = (state.divisor & 0x00FF) | ((value as u16) << 8);
                } else {
                    state.ier = value & 0x0F;
                    self.update_irq(&state);
                }
            }
            IIR => {
                state.fifo_enabled = value & 0x01 != 0;
                if value & 0x02 != 0 {
                    state.rx_fifo.clear();
                }
                if value & 0x04 != 0 {
                    state.tx_buffer.clear();
                    state.thre_pending = false;
                }
                self.update_irq(&state);
            }
            LCR => state.lcr = value,
            MCR => state.mcr = value,
            SCR => state.scr = value,
            _ => return false,
        }
        true
    }

    fn tick(&self) {
        let pending = {
            let mut state = self.state.lock().unwrap();
            std::mem::take(&mut state.tx_buffer)
        };
        if !pending.is_empty() {
            let mut out = std::io::stdout();
            let _ = out.write_all(&pending);
            let _ = out.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    fn uart() -> (Arc<AtomicBool>, Ns16550) {
        let line = Arc::new(AtomicBool::new(false));
        let line2 = line.clone();
        let uart = Ns16550::new(Arc::new(move |id, level| {
            assert_eq!(id, Ns16550::DEFAULT_IRQ_ID);
            line2.store(level, Ordering::SeqCst);
        }));
        (line, uart)
    }

    #[test]
    fn rx_queue_and_interrupt() {
        let (line, uart) = uart();
        uart.write(Ns16550::DEFAULT_BASE + IER, 1, IER_RDI as u64);
        uart.receive(b"hi");
        assert!(line.load(Ordering::SeqCst));
        assert_eq!(
            uart.read(Ns16550::DEFAULT_BASE + LSR, 1).unwrap() as u8 & LSR_DR,
            LSR_DR
        );

        assert_eq!(uart.read(Ns16550::DEFAULT_BASE + RBR, 1), Some(b'h' as u64));
        assert_eq!(uart.read(Ns16550::DEFAULT_BASE + RBR, 1), Some(b'i' as u64));
        // FIFO drained: line drops.
        assert!(!line.load(Ordering::SeqCst));
    }

    #[test]
    fn rx_without_enable_keeps_line_low() {
        let (line, uart) = uart();
        uart.receive(b"x");
        assert!(!line.load(Ordering::SeqCst));
    }

    #[test]
    fn thre_interrupt_cleared_by_iir_read() {
        let (line, uart) = uart();
        uart.write(Ns16550::DEFAULT_BASE + IER, 1, IER_THRI as u64);
        uart.write(Ns16550::DEFAULT_BASE + RBR, 1, b'A' as u64);
        assert!(line.load(Ordering::SeqCst));

        let iir = uart.read(Ns16550::DEFAULT_BASE + IIR, 1).unwrap() as u8;
        assert_eq!(iir & 0x0F, IIR_THRI);
        assert!(!line.load(Ordering::SeqCst));

        let iir = uart.read(Ns16550::DEFAULT_BASE + IIR, 1).unwrap() as u8;
        assert_eq!(iir & 0x0F, IIR_NO_INT);
    }

    #[test]
    fn dlab_switches_to_divisor_latch() {
        let (_, uart) = uart();
        uart.write(Ns16550::DEFAULT_BASE + LCR, 1, LCR_DLAB as u64);
        uart.write(Ns16550::DEFAULT_BASE + RBR, 1, 0x34);
        uart.write(Ns16550::DEFAULT_BASE + IER, 1, 0x12);
        assert_eq!(uart.read(Ns16550::DEFAULT_BASE + RBR, 1), Some(0x34));
        assert_eq!(uart.read(Ns16550::DEFAULT_BASE + IER, 1), Some(0x12));

        // Clearing DLAB restores the normal registers.
        uart.write(Ns16550::DEFAULT_BASE + LCR, 1, 0);
        assert_eq!(uart.read(Ns16550::DEFAULT_BASE + IER, 1), Some(0));
    }

    #[test]
    fn wide_access_rejected() {
        let (_, uart) = uart();
        assert_eq!(uart.read(Ns16550::DEFAULT_BASE, 4), None);
        assert!(!uart.write(Ns16550::DEFAULT_BASE, 2, 0));
    }
}
