//! Error types for librvvm.
//!
//! `VmError` serves dual purpose: it is both the Rust error type returned
//! from fallible operations and the representation of RV32 guest traps.
//! The hart's step loop in `cpu.rs` catches these errors and latches them
//! into its pending-exception state, where the kernel dispatcher picks
//! them up after the step returns.

use crate::memory::Access;
use thiserror::Error;

/// Errors generated during guest execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum VmError {
    /// Undefined or unsupported instruction encoding.
    #[error("illegal instruction {word:#010x} at pc {pc:#010x}")]
    IllegalInstruction { word: u32, pc: u32 },

    /// Instruction fetch from a PC that is not 4-byte aligned.
    #[error("misaligned instruction fetch at pc {pc:#010x}")]
    MisalignedFetch { pc: u32 },

    /// Translation failed: unmapped address, base/limit violation, or
    /// out-of-bounds physical access.
    #[error("memory fault: {access} at {addr:#010x}")]
    MemFault { addr: u32, access: Access },

    /// Translation succeeded but the access violates the page's R/W/X
    /// permissions.
    #[error("protection fault: {access} at {addr:#010x}")]
    ProtectionFault { addr: u32, access: Access },

    /// The frame allocator is exhausted and no eligible victim exists.
    /// Raised by the demand pager in instruction context.
    #[error("out of physical frames at {addr:#010x}")]
    OutOfFrames { addr: u32 },
}

impl VmError {
    /// The faulting guest address, if this error carries one.
    pub fn fault_addr(&self) -> Option<u32> {
        match self {
            VmError::IllegalInstruction { pc, .. } => Some(*pc),
            VmError::MisalignedFetch { pc } => Some(*pc),
            VmError::MemFault { addr, .. } => Some(*addr),
            VmError::ProtectionFault { addr, .. } => Some(*addr),
            VmError::OutOfFrames { addr } => Some(*addr),
        }
    }
}

/// Convenience result alias for VM operations.
pub type Result<T> = core::result::Result<T, VmError>;
