//! librvvm — user-space RV32IM CPU emulation library.
//!
//! Provides the machine half of a RISC-V system simulator:
//!
//! - **Decoder** (`decoder.rs`) — RV32IM instruction decoding
//! - **CPU** (`cpu.rs`) — the fetch-decode-execute step with latched
//!   ECALL/exception flags instead of host unwinding
//! - **Memory contract** (`memory.rs`) — the virtual-access trait a
//!   kernel's MMU implements for the CPU
//! - **RAM** (`ram.rs`) — the flat physical backing store
//! - **Devices** (`devices/`) — the UART console MMIO device
//!
//! The library knows nothing about tasks, address spaces, or scheduling;
//! a kernel layers those on top by implementing [`Memory`] and driving
//! [`Hart::step`].

pub mod cpu;
pub mod decoder;
pub mod devices;
pub mod error;
pub mod instruction;
pub mod memory;
pub mod ram;
pub mod registers;

pub use cpu::Hart;
pub use decoder::{decode, ECALL_WORD};
pub use devices::Uart;
pub use error::{Result, VmError};
pub use instruction::{Instr, InstrClass};
pub use memory::{is_uart_addr, Access, Memory, UART_BASE, UART_SIZE};
pub use ram::PhysMemory;
pub use registers::{reg, RegisterFile, ABI_NAMES};
