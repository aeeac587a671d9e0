//! Syscall handlers, grouped the way the dispatch table reads:
//! process lifecycle, I/O, and system services.

pub mod io;
pub mod process;
pub mod system;

use crate::kernel::Kernel;
use crate::task::TaskInner;
use librvvm::{reg, ECALL_WORD};

/// Saved argument register `a<n>`.
#[inline]
pub(crate) fn arg(inner: &TaskInner, n: usize) -> u32 {
    inner.regs[reg::A0 as usize + n]
}

/// Write the syscall return value into the saved a0.
#[inline]
pub(crate) fn set_ret(inner: &mut TaskInner, val: u32) {
    inner.regs[reg::A0 as usize] = val;
}

/// Negative return value (−1) for error paths.
pub(crate) const RET_ERR: u32 = u32::MAX;

/// Rewind the saved PC onto the ECALL so the syscall re-executes after
/// wakeup, with its argument registers still in place.
pub(crate) fn rewind_to_retry(kernel: &Kernel, inner: &mut TaskInner) {
    inner.pc = inner.pc.wrapping_sub(4);
    // Nothing guarantees the word behind the trap PC is an ECALL if the
    // kernel misuses this path; make that loud in debug builds.
    if cfg!(debug_assertions) {
        if let Ok(word) = kernel.memory().fetch_u32(inner.asid, inner.pc) {
            debug_assert_eq!(word, ECALL_WORD, "pc rewind does not land on an ECALL");
        }
    }
}
