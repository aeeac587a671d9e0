//! Kernel-side error taxonomy.
//!
//! Guest-visible failures become syscall return values (negative in a0)
//! long before they reach a host caller; `KernelError` covers the paths
//! where kernel code itself needs a `Result`: loading images, creating
//! address spaces, forking, booting.

use librvvm::VmError;
use thiserror::Error;

/// Errors returned by kernel operations.
#[derive(Debug, Error)]
pub enum KernelError {
    /// The frame allocator is empty and no eligible eviction victim
    /// exists.
    #[error("out of physical frames")]
    OutOfFrames,

    /// Contiguous allocation failed even after compaction.
    #[error("out of memory: no hole fits {size} bytes")]
    OutOfMemory { size: u32 },

    /// The ELF image failed validation.
    #[error("bad ELF image: {0}")]
    BadElf(&'static str),

    /// No task with this PID exists.
    #[error("no such task: pid {0}")]
    NoSuchTask(crate::task::Pid),

    /// No address space with this id exists.
    #[error("no such address space: {0}")]
    NoSuchSpace(crate::memory::AsId),

    /// A caller violated an interface contract.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// A guest memory fault surfaced through a kernel path.
    #[error(transparent)]
    Vm(#[from] VmError),

    /// Host I/O failure (reading an ELF from the host filesystem).
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
