//! Emulated hardware devices.

pub mod uart;

pub use uart::Uart;
