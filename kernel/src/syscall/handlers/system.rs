//! System services: yield, get_time, sleep.

use super::{arg, rewind_to_retry, set_ret};
use crate::kernel::Kernel;
use crate::task::{Task, TaskInner, TaskState, WaitReason};
use std::sync::Arc;

/// YIELD: back of the ready queue.
pub fn sys_yield(inner: &mut TaskInner) {
    inner.state = TaskState::Ready;
    set_ret(inner, 0);
}

/// GET_TIME: low 32 bits of wall-clock milliseconds.
pub fn sys_get_time(kernel: &Kernel, inner: &mut TaskInner) {
    set_ret(inner, kernel.now_ms() as u32);
}

/// SLEEP(ms): park on the timer queue until the deadline.
///
/// The PC rewind means this ECALL runs again after wakeup; the armed
/// marker distinguishes that second pass (deadline reached → return)
/// from a fresh sleep (arm and park). A spurious early wakeup just parks
/// again without re-arming.
pub fn sys_sleep(kernel: &Kernel, task: &Arc<Task>, inner: &mut TaskInner) {
    let now = kernel.now_ms();
    if inner.sleep_armed {
        if now >= inner.wakeup_at_ms {
            inner.sleep_armed = false;
            set_ret(inner, 0);
        } else {
            inner.state = TaskState::Waiting;
            inner.wait_reason = WaitReason::Timer;
            rewind_to_retry(kernel, inner);
        }
        return;
    }

    let ms = arg(inner, 0) as u64;
    inner.wakeup_at_ms = now + ms;
    inner.sleep_armed = true;
    inner.state = TaskState::Waiting;
    inner.wait_reason = WaitReason::Timer;
    rewind_to_retry(kernel, inner);
    log::debug!("pid {} sleeping {} ms", task.pid(), ms);
}
