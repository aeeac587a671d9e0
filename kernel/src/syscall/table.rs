//! Syscall number-to-name mapping table.
//!
//! Static lookup used by debug logging and introspection.

use super::*;

/// Static table mapping syscall numbers to their human-readable names.
pub const SYSCALL_TABLE: &[(u32, &str)] = &[
    (SYS_READ, "read"),
    (SYS_WRITE, "write"),
    (SYS_EXIT, "exit"),
    (SYS_YIELD, "yield"),
    (SYS_GETPID, "getpid"),
    (SYS_FORK, "fork"),
    (SYS_EXEC, "exec"),
    (SYS_WAIT, "wait"),
    (SYS_DEBUG_PRINT, "debug_print"),
    (SYS_GET_TIME, "get_time"),
    (SYS_SLEEP, "sleep"),
];

/// Name of a syscall number, or `"?"` for unknown numbers.
pub fn name(num: u32) -> &'static str {
    SYSCALL_TABLE.iter().find(|(n, _)| *n == num).map(|(_, s)| *s).unwrap_or("?")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_and_unknown_names() {
        assert_eq!(name(SYS_EXIT), "exit");
        assert_eq!(name(SYS_FORK), "fork");
        assert_eq!(name(4242), "?");
    }
}
