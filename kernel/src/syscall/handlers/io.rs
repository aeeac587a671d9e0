//! I/O syscalls: read, write, debug_print.

use super::{arg, rewind_to_retry, set_ret, RET_ERR};
use crate::kernel::Kernel;
use crate::task::{Task, TaskInner, TaskState, WaitReason};
use librvvm::devices::uart::UART_RX_DATA;
use std::sync::Arc;

/// WRITE(fd, buf, n): copy up to `n` bytes from the caller (stopping at a
/// NUL) to the console. Only stdout and stderr exist.
pub fn sys_write(kernel: &Kernel, inner: &mut TaskInner) {
    let fd = arg(inner, 0);
    let buf = arg(inner, 1);
    let n = arg(inner, 2);
    if fd != 1 && fd != 2 {
        return set_ret(inner, RET_ERR);
    }

    let mut written = 0u32;
    for i in 0..n {
        match kernel.memory().read_u8(inner.asid, buf.wrapping_add(i)) {
            Ok(0) => break,
            Ok(b) => {
                kernel.console_write(b);
                written += 1;
            }
            Err(_) if written == 0 => return set_ret(inner, RET_ERR),
            Err(_) => break,
        }
    }
    set_ret(inner, written);
}

/// READ(fd, buf, n): read one byte from the UART, or park the task on
/// the I/O queue until input arrives. a0 is untouched while parked so
/// the retried ECALL keeps its arguments.
pub fn sys_read(kernel: &Kernel, task: &Arc<Task>, inner: &mut TaskInner) {
    let fd = arg(inner, 0);
    let buf = arg(inner, 1);
    let n = arg(inner, 2);
    if fd != 0 {
        return set_ret(inner, RET_ERR);
    }
    if n == 0 {
        return set_ret(inner, 0);
    }

    if !kernel.uart().rx_ready() {
        inner.state = TaskState::Waiting;
        inner.wait_reason = WaitReason::UartInput;
        rewind_to_retry(kernel, inner);
        return;
    }

    let byte = kernel.uart().read(UART_RX_DATA);
    if kernel.memory().write_u8(inner.asid, buf, byte).is_err() {
        log::warn!("pid {}: read buffer fault at {:#010x}", task.pid(), buf);
        return set_ret(inner, RET_ERR);
    }
    set_ret(inner, 1);
}

/// DEBUG_PRINT(ptr): log a guest string to the host, when enabled.
pub fn sys_debug_print(kernel: &Kernel, task: &Arc<Task>, inner: &mut TaskInner) {
    if !kernel.config().debug_print {
        log::warn!("pid {}: debug_print disabled by configuration", task.pid());
        return set_ret(inner, RET_ERR);
    }
    match kernel.memory().read_cstr(inner.asid, arg(inner, 0), 4096) {
        Ok(s) => {
            log::info!("pid {}: {}", task.pid(), String::from_utf8_lossy(&s));
            set_ret(inner, s.len() as u32);
        }
        Err(_) => set_ret(inner, RET_ERR),
    }
}
