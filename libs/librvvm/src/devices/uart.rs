//! UART MMIO device.
//!
//! A three-register console UART mapped at [`UART_BASE`](crate::memory::UART_BASE):
//!
//! | Offset  | Register | Behaviour                                         |
//! |---------|----------|---------------------------------------------------|
//! | `+0x00` | STATUS   | bit 0 = RX-ready (input queue non-empty)          |
//! | `+0x04` | RX_DATA  | reading consumes one input byte (0 when empty)    |
//! | `+0x08` | TX_DATA  | writing appends one byte to the output buffer     |
//!
//! The input queue is fed by the host (or a test) via
//! [`Uart::push_input`]; the output buffer is drained by the kernel's
//! maintenance loop via [`Uart::take_output`]. Both sides are
//! mutex-protected so host threads, harts, and the maintenance loop can
//! touch the device concurrently.

use std::collections::VecDeque;
use std::sync::Mutex;

/// Register offsets within the UART MMIO window.
pub const UART_STATUS: u32 = 0x00;
pub const UART_RX_DATA: u32 = 0x04;
pub const UART_TX_DATA: u32 = 0x08;

/// STATUS bit 0: at least one byte is waiting in the RX queue.
pub const STATUS_RX_READY: u8 = 0x01;

/// The console UART.
#[derive(Debug, Default)]
pub struct Uart {
    rx: Mutex<VecDeque<u8>>,
    tx: Mutex<VecDeque<u8>>,
}

impl Uart {
    /// Create a UART with empty queues.
    pub fn new() -> Self {
        Uart::default()
    }

    /// Host side: inject input bytes for the guest to read.
    pub fn push_input(&self, bytes: &[u8]) {
        let mut rx = self.rx.lock().expect("uart queue poisoned");
        rx.extend(bytes.iter().copied());
    }

    /// True if the guest would see STATUS bit 0 set.
    pub fn rx_ready(&self) -> bool {
        !self.rx.lock().expect("uart queue poisoned").is_empty()
    }

    /// Guest-visible MMIO read at `offset` within the window.
    ///
    /// Reading RX_DATA consumes one byte; STATUS bit 0 clears by itself
    /// once the queue drains. Unmapped offsets read as zero.
    pub fn read(&self, offset: u32) -> u8 {
        match offset {
            UART_STATUS => {
                if self.rx_ready() {
                    STATUS_RX_READY
                } else {
                    0
                }
            }
            UART_RX_DATA => self.rx.lock().expect("uart queue poisoned").pop_front().unwrap_or(0),
            _ => 0,
        }
    }

    /// Guest-visible MMIO write at `offset` within the window.
    ///
    /// Only TX_DATA has write behaviour; other offsets ignore writes.
    pub fn write(&self, offset: u32, val: u8) {
        if offset == UART_TX_DATA {
            self.tx.lock().expect("uart queue poisoned").push_back(val);
        }
    }

    /// Host side: drain everything the guest has transmitted.
    pub fn take_output(&self) -> Vec<u8> {
        self.tx.lock().expect("uart queue poisoned").drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_tracks_rx_queue() {
        let uart = Uart::new();
        assert_eq!(uart.read(UART_STATUS), 0);
        uart.push_input(b"hi");
        assert_eq!(uart.read(UART_STATUS), STATUS_RX_READY);
        assert_eq!(uart.read(UART_RX_DATA), b'h');
        assert_eq!(uart.read(UART_STATUS), STATUS_RX_READY);
        assert_eq!(uart.read(UART_RX_DATA), b'i');
        // Queue drained — status bit clears.
        assert_eq!(uart.read(UART_STATUS), 0);
        assert_eq!(uart.read(UART_RX_DATA), 0);
    }

    #[test]
    fn tx_collects_output() {
        let uart = Uart::new();
        for b in b"ok" {
            uart.write(UART_TX_DATA, *b);
        }
        assert_eq!(uart.take_output(), b"ok");
        assert!(uart.take_output().is_empty());
    }

    #[test]
    fn unmapped_offsets_are_inert() {
        let uart = Uart::new();
        uart.write(0x0C, 0xFF);
        assert_eq!(uart.read(0x0C), 0);
        assert_eq!(uart.take_output(), Vec::<u8>::new());
    }
}
