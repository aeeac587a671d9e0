//! Thin launcher: positional arguments → SimConfig → boot → wait.
//!
//! The full-featured CLI is an external collaborator; this binary covers
//! the choices the core needs. Usage:
//!
//! ```text
//! rv32sim <init.elf> [args...]
//!     --ram <bytes>          default 16 MiB
//!     --harts <n>            default 1
//!     --mem contiguous:first | contiguous:best
//!           paged:demand:clock | paged:eager:lru | ...
//!     --sched rr:<slice> | prio:<slice> | coop
//!     --debug-print
//! ```

use rvsim_kernel::config::{MemoryMode, SchedulerKind, SimConfig};
use rvsim_kernel::memory::contiguous::FitStrategy;
use rvsim_kernel::memory::paged::FetchPolicy;
use rvsim_kernel::memory::policy::EvictKind;
use rvsim_kernel::Kernel;
use std::process::ExitCode;
use std::time::Duration;

fn parse_mem(spec: &str) -> Option<MemoryMode> {
    let parts: Vec<&str> = spec.split(':').collect();
    match parts.as_slice() {
        ["contiguous", "first"] => Some(MemoryMode::Contiguous { strategy: FitStrategy::FirstFit }),
        ["contiguous", "best"] => Some(MemoryMode::Contiguous { strategy: FitStrategy::BestFit }),
        ["paged", fetch, evict] => {
            let fetch = match *fetch {
                "demand" => FetchPolicy::Demand,
                "eager" => FetchPolicy::Eager,
                _ => return None,
            };
            let evict = match *evict {
                "clock" => EvictKind::Clock,
                "lru" => EvictKind::Lru,
                "random" => EvictKind::Random,
                _ => return None,
            };
            Some(MemoryMode::Paged { fetch, evict })
        }
        _ => None,
    }
}

fn parse_sched(spec: &str) -> Option<SchedulerKind> {
    match spec.split_once(':') {
        Some(("rr", slice)) => Some(SchedulerKind::RoundRobin { slice: slice.parse().ok()? }),
        Some(("prio", slice)) => Some(SchedulerKind::Priority { slice: slice.parse().ok()? }),
        None if spec == "coop" => Some(SchedulerKind::Cooperative),
        _ => None,
    }
}

fn usage() -> ExitCode {
    eprintln!("usage: rv32sim <init.elf> [args...] [--ram N] [--harts N] [--mem MODE] [--sched KIND] [--debug-print]");
    ExitCode::FAILURE
}

fn main() -> ExitCode {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let Some(init_path) = args.next() else {
        return usage();
    };
    let mut config = SimConfig::new(&init_path);

    let mut rest: Vec<String> = args.collect();
    let mut i = 0;
    while i < rest.len() {
        match rest[i].as_str() {
            "--ram" | "--harts" | "--mem" | "--sched" => {
                if i + 1 >= rest.len() {
                    return usage();
                }
                let value = rest.remove(i + 1);
                let flag = rest.remove(i);
                let ok = match flag.as_str() {
                    "--ram" => value.parse().map(|v| config.ram_size = v).is_ok(),
                    "--harts" => value.parse().map(|v| config.harts = v).is_ok(),
                    "--mem" => parse_mem(&value).map(|m| config.memory = m).is_some(),
                    "--sched" => parse_sched(&value).map(|s| config.scheduler = s).is_some(),
                    _ => unreachable!(),
                };
                if !ok {
                    return usage();
                }
            }
            "--debug-print" => {
                config.debug_print = true;
                rest.remove(i);
            }
            _ => i += 1,
        }
    }
    config.init_args = rest;

    let handle = match Kernel::boot(config) {
        Ok(h) => h,
        Err(e) => {
            eprintln!("rv32sim: boot failed: {}", e);
            return ExitCode::FAILURE;
        }
    };

    // Run until every task has exited, then report init's code.
    while handle.kernel().live_task_count() > 0 {
        std::thread::sleep(Duration::from_millis(10));
    }
    let code = handle
        .wait_for_exit(1, Duration::from_millis(100))
        .map(|c| (c & 0xFF) as u8)
        .unwrap_or(0);
    handle.shutdown();
    ExitCode::from(code)
}
