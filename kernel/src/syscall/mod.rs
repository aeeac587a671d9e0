//! System call interface — dispatch, number definitions, and the ABI.
//!
//! User programs trap with ECALL, the syscall number in a7 and up to six
//! arguments in a0–a5; the result lands in a0. Dispatch runs after the
//! hart's state has been saved into the task record, so handlers operate
//! on the *saved* registers — the task may migrate to another hart before
//! it resumes.
//!
//! A syscall that parks the task (READ with no input, WAIT with live
//! children, SLEEP) rewinds the saved PC by 4 so that the next dispatch
//! re-executes the ECALL with its argument registers intact.

pub mod handlers;
pub mod table;

use crate::kernel::Kernel;
use crate::task::Task;
use librvvm::reg;
use std::sync::Arc;

// =========================================================================
// Syscall numbers
// =========================================================================

pub const SYS_READ: u32 = 63;
pub const SYS_WRITE: u32 = 64;
pub const SYS_EXIT: u32 = 93;
pub const SYS_YIELD: u32 = 124;
pub const SYS_GETPID: u32 = 172;
pub const SYS_FORK: u32 = 220;
pub const SYS_EXEC: u32 = 221;
pub const SYS_WAIT: u32 = 260;
pub const SYS_DEBUG_PRINT: u32 = 1000;
pub const SYS_GET_TIME: u32 = 1001;
pub const SYS_SLEEP: u32 = 1002;

/// Route one trapped ECALL to its handler.
///
/// Called by the hart dispatcher with the task's state already saved and
/// no locks held.
pub fn dispatch(kernel: &Kernel, task: &Arc<Task>) {
    let mut inner = task.lock();
    let num = inner.regs[reg::A7 as usize];
    log::debug!("pid {}: syscall {} ({})", task.pid(), num, table::name(num));

    match num {
        SYS_EXIT => handlers::process::sys_exit(kernel, task, &mut inner),
        SYS_GETPID => handlers::process::sys_getpid(task, &mut inner),
        SYS_FORK => handlers::process::sys_fork(kernel, task, &mut inner),
        SYS_EXEC => handlers::process::sys_exec(kernel, task, &mut inner),
        SYS_WAIT => handlers::process::sys_wait(kernel, task, &mut inner),
        SYS_READ => handlers::io::sys_read(kernel, task, &mut inner),
        SYS_WRITE => handlers::io::sys_write(kernel, &mut inner),
        SYS_DEBUG_PRINT => handlers::io::sys_debug_print(kernel, task, &mut inner),
        SYS_YIELD => handlers::system::sys_yield(&mut inner),
        SYS_GET_TIME => handlers::system::sys_get_time(kernel, &mut inner),
        SYS_SLEEP => handlers::system::sys_sleep(kernel, task, &mut inner),
        _ => {
            log::warn!("pid {}: unknown syscall {}", task.pid(), num);
            inner.regs[reg::A0 as usize] = u32::MAX;
        }
    }
}
