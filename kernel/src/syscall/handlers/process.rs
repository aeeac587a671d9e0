//! Process-lifecycle syscalls: exit, getpid, fork, exec, wait.

use super::{arg, rewind_to_retry, set_ret, RET_ERR};
use crate::kernel::Kernel;
use crate::task::{loader, Task, TaskInner, TaskState, WaitReason};
use librvvm::reg;
use std::sync::{Arc, Weak};

/// EXIT(code): the task becomes a zombie until its parent reaps it.
pub fn sys_exit(kernel: &Kernel, task: &Arc<Task>, inner: &mut TaskInner) {
    inner.exit_code = arg(inner, 0) as i32;
    inner.state = TaskState::Terminated;
    inner.wait_reason = WaitReason::None;

    // Children lose their parent now: zombies among them are reaped here
    // (nobody is left to wait for them), the rest are orphaned.
    for child in inner.children.drain(..) {
        let (state, asid) = {
            let ci = child.lock();
            (ci.state, ci.asid)
        };
        if state == TaskState::Terminated {
            kernel.tasks().remove(child.pid());
            kernel.memory().destroy_space(asid);
        } else {
            child.lock().parent = Weak::new();
        }
    }
    log::info!("pid {} exited with code {}", task.pid(), inner.exit_code);
}

/// GETPID: the caller's PID in a0.
pub fn sys_getpid(task: &Arc<Task>, inner: &mut TaskInner) {
    set_ret(inner, task.pid() as u32);
}

/// FORK: duplicate the caller. The child inherits a copy of the address
/// space (shared pages by reference) and the exact register file except
/// a0, where it reads 0; the parent reads the child's PID.
pub fn sys_fork(kernel: &Kernel, task: &Arc<Task>, inner: &mut TaskInner) {
    let child_pid = kernel.tasks().alloc_pid();
    let child_asid = match kernel.memory().fork_space(inner.asid, child_pid) {
        Ok(asid) => asid,
        Err(e) => {
            log::warn!("pid {}: fork failed: {}", task.pid(), e);
            set_ret(inner, RET_ERR);
            return;
        }
    };

    let child = Task::new(
        child_pid,
        child_pid, // fork creates a new process, never a thread
        task.name().to_string(),
        child_asid,
        inner.pc,
        inner.regs[reg::SP as usize],
        inner.stack_size,
        inner.priority,
        Arc::downgrade(task),
    );
    {
        let mut ci = child.lock();
        ci.regs = inner.regs;
        ci.regs[reg::A0 as usize] = 0;
        ci.pc = inner.pc; // both resume just past the ECALL
        ci.stack_base = inner.stack_base;
        ci.stack_size = inner.stack_size;
    }

    inner.children.push(child.clone());
    kernel.tasks().insert(child.clone());
    kernel.enqueue_ready(&child);
    set_ret(inner, child_pid as u32);
    log::info!("pid {} forked pid {}", task.pid(), child_pid);
}

/// EXEC(path, argv): replace the caller's program image.
///
/// Everything that can fail — reading the path and argv, loading the
/// file, building the new address space — happens before the old space
/// is touched, so a failed exec leaves the caller intact and returns −1.
pub fn sys_exec(kernel: &Kernel, task: &Arc<Task>, inner: &mut TaskInner) {
    let mem = kernel.memory();

    let path = match mem.read_cstr(inner.asid, arg(inner, 0), 4096) {
        Ok(p) => p,
        Err(_) => return set_ret(inner, RET_ERR),
    };
    let mut argv: Vec<Vec<u8>> = Vec::new();
    let argv_va = arg(inner, 1);
    if argv_va != 0 {
        for i in 0..64u32 {
            let p = match mem.read_u32_user(inner.asid, argv_va.wrapping_add(i * 4)) {
                Ok(p) => p,
                Err(_) => return set_ret(inner, RET_ERR),
            };
            if p == 0 {
                break;
            }
            match mem.read_cstr(inner.asid, p, 4096) {
                Ok(s) => argv.push(s),
                Err(_) => return set_ret(inner, RET_ERR),
            }
        }
    }

    let path_str = String::from_utf8_lossy(&path).into_owned();
    let data = match std::fs::read(&path_str) {
        Ok(d) => d,
        Err(e) => {
            log::warn!("pid {}: exec {:?}: {}", task.pid(), path_str, e);
            return set_ret(inner, RET_ERR);
        }
    };

    let new_asid = match mem.create_space(task.pid()) {
        Ok(a) => a,
        Err(e) => {
            log::warn!("pid {}: exec: {}", task.pid(), e);
            return set_ret(inner, RET_ERR);
        }
    };
    let img = match loader::build_user_program(mem, new_asid, &data, &argv) {
        Ok(img) => img,
        Err(e) => {
            mem.destroy_space(new_asid);
            log::warn!("pid {}: exec {:?}: {}", task.pid(), path_str, e);
            return set_ret(inner, RET_ERR);
        }
    };

    // Point of no return: swap the address space and reset the register
    // file for the new program.
    let old_asid = inner.asid;
    inner.asid = new_asid;
    inner.regs = [0; 32];
    inner.regs[reg::SP as usize] = img.sp;
    inner.regs[reg::A0 as usize] = img.argc;
    inner.regs[reg::A1 as usize] = img.argv_ptr;
    inner.pc = img.entry;
    inner.stack_base = img.stack_base;
    inner.stack_size = img.stack_size;
    mem.destroy_space(old_asid);

    log::info!("pid {} exec {:?} (argc {})", task.pid(), path_str, img.argc);
}

/// WAIT(statusPtr): reap one zombie child, or block until one appears.
///
/// Returns the reaped child's PID; −1 if the caller has no children.
/// While blocking, a0 is left untouched so the retried ECALL still sees
/// its status pointer.
pub fn sys_wait(kernel: &Kernel, task: &Arc<Task>, inner: &mut TaskInner) {
    let status_ptr = arg(inner, 0);

    if let Some(idx) = inner.children.iter().position(|c| c.state() == TaskState::Terminated) {
        let child = inner.children.remove(idx);
        let (code, child_asid) = {
            let ci = child.lock();
            (ci.exit_code, ci.asid)
        };
        let mut ret = child.pid() as u32;
        if status_ptr != 0
            && kernel.memory().write_u32_user(inner.asid, status_ptr, code as u32).is_err()
        {
            ret = RET_ERR;
        }
        kernel.tasks().remove(child.pid());
        kernel.memory().destroy_space(child_asid);
        log::debug!("pid {} reaped pid {} (code {})", task.pid(), child.pid(), code);
        set_ret(inner, ret);
    } else if !inner.children.is_empty() {
        inner.state = TaskState::Waiting;
        inner.wait_reason = WaitReason::ProcessExit;
        inner.wait_pid = -1;
        rewind_to_retry(kernel, inner);
    } else {
        set_ret(inner, RET_ERR);
    }
}
