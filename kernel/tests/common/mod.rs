//! Shared helpers for the end-to-end scenarios: a hand assembler for the
//! handful of RV32IM instructions the guest programs need, and a minimal
//! ELF32 synthesizer.

#![allow(dead_code)]

use rvsim_kernel::config::{MemoryMode, SimConfig};
use rvsim_kernel::memory::paged::FetchPolicy;
use rvsim_kernel::memory::policy::EvictKind;

/// Register names used by the test programs.
pub mod reg {
    pub const ZERO: u32 = 0;
    pub const RA: u32 = 1;
    pub const SP: u32 = 2;
    pub const T0: u32 = 5;
    pub const T1: u32 = 6;
    pub const T2: u32 = 7;
    pub const A0: u32 = 10;
    pub const A1: u32 = 11;
    pub const A2: u32 = 12;
    pub const A7: u32 = 17;
}

/// Instruction encoders.
pub mod rv {
    fn itype(opcode: u32, f3: u32, rd: u32, rs1: u32, imm: i32) -> u32 {
        ((imm as u32) & 0xfff) << 20 | rs1 << 15 | f3 << 12 | rd << 7 | opcode
    }

    fn stype(f3: u32, rs1: u32, rs2: u32, imm: i32) -> u32 {
        let imm = imm as u32;
        ((imm >> 5) & 0x7f) << 25 | rs2 << 20 | rs1 << 15 | f3 << 12 | (imm & 0x1f) << 7 | 0x23
    }

    fn btype(f3: u32, rs1: u32, rs2: u32, off: i32) -> u32 {
        let o = off as u32;
        ((o >> 12) & 1) << 31
            | ((o >> 5) & 0x3f) << 25
            | rs2 << 20
            | rs1 << 15
            | f3 << 12
            | ((o >> 1) & 0xf) << 8
            | ((o >> 11) & 1) << 7
            | 0x63
    }

    pub fn addi(rd: u32, rs1: u32, imm: i32) -> u32 {
        itype(0x13, 0, rd, rs1, imm)
    }

    pub fn slli(rd: u32, rs1: u32, sh: u32) -> u32 {
        itype(0x13, 1, rd, rs1, sh as i32)
    }

    pub fn or_(rd: u32, rs1: u32, rs2: u32) -> u32 {
        rs2 << 20 | rs1 << 15 | 6 << 12 | rd << 7 | 0x33
    }

    pub fn add(rd: u32, rs1: u32, rs2: u32) -> u32 {
        rs2 << 20 | rs1 << 15 | rd << 7 | 0x33
    }

    pub fn lui(rd: u32, imm20: u32) -> u32 {
        imm20 << 12 | rd << 7 | 0x37
    }

    pub fn jal(rd: u32, off: i32) -> u32 {
        let o = off as u32;
        ((o >> 20) & 1) << 31
            | ((o >> 1) & 0x3ff) << 21
            | ((o >> 11) & 1) << 20
            | ((o >> 12) & 0xff) << 12
            | rd << 7
            | 0x6f
    }

    pub fn beq(rs1: u32, rs2: u32, off: i32) -> u32 {
        btype(0, rs1, rs2, off)
    }

    pub fn bne(rs1: u32, rs2: u32, off: i32) -> u32 {
        btype(1, rs1, rs2, off)
    }

    pub fn lb(rd: u32, rs1: u32, off: i32) -> u32 {
        itype(0x03, 0, rd, rs1, off)
    }

    pub fn lw(rd: u32, rs1: u32, off: i32) -> u32 {
        itype(0x03, 2, rd, rs1, off)
    }

    pub fn sb(rs2: u32, rs1: u32, off: i32) -> u32 {
        stype(0, rs1, rs2, off)
    }

    pub fn sw(rs2: u32, rs1: u32, off: i32) -> u32 {
        stype(2, rs1, rs2, off)
    }

    pub fn ecall() -> u32 {
        0x0000_0073
    }
}

/// Program entry point used by every test image.
pub const ENTRY: u32 = 0x1000;

/// Wrap assembled words into a one-segment ELF32 EM_RISCV image
/// (read+exec code at [`ENTRY`]).
pub fn make_elf(words: &[u32]) -> Vec<u8> {
    make_elf_with_bss(words, 0)
}

/// Like [`make_elf`], with `bss` extra zero-initialised bytes after the
/// code (`p_memsz = code + bss`), to grow the image's memory footprint.
pub fn make_elf_with_bss(words: &[u32], bss: u32) -> Vec<u8> {
    let mut code = Vec::with_capacity(words.len() * 4);
    for w in words {
        code.extend_from_slice(&w.to_le_bytes());
    }

    let mut out = vec![0u8; 84];
    out[0..4].copy_from_slice(&[0x7F, b'E', b'L', b'F']);
    out[4] = 1; // ELFCLASS32
    out[5] = 1; // little-endian
    out[6] = 1; // EV_CURRENT
    out[16..18].copy_from_slice(&2u16.to_le_bytes()); // ET_EXEC
    out[18..20].copy_from_slice(&243u16.to_le_bytes()); // EM_RISCV
    out[24..28].copy_from_slice(&ENTRY.to_le_bytes());
    out[28..32].copy_from_slice(&52u32.to_le_bytes()); // phoff
    out[40..42].copy_from_slice(&52u16.to_le_bytes()); // ehsize
    out[42..44].copy_from_slice(&32u16.to_le_bytes()); // phentsize
    out[44..46].copy_from_slice(&1u16.to_le_bytes()); // phnum

    out[52..56].copy_from_slice(&1u32.to_le_bytes()); // PT_LOAD
    out[56..60].copy_from_slice(&84u32.to_le_bytes()); // file offset
    out[60..64].copy_from_slice(&ENTRY.to_le_bytes()); // vaddr
    out[68..72].copy_from_slice(&(code.len() as u32).to_le_bytes()); // filesz
    out[72..76].copy_from_slice(&(code.len() as u32 + bss).to_le_bytes()); // memsz
    out[76..80].copy_from_slice(&0x5u32.to_le_bytes()); // PF_R | PF_X

    out.extend_from_slice(&code);
    out
}

/// A small quiet machine for the scenarios: 4 MiB RAM, demand paging
/// with CLOCK, round-robin, console buffered for inspection.
pub fn test_config() -> SimConfig {
    let mut config = SimConfig::new("/nonexistent-used-via-boot_with_image");
    config.ram_size = 4 * 1024 * 1024;
    config.memory = MemoryMode::Paged { fetch: FetchPolicy::Demand, evict: EvictKind::Clock };
    config.console_stdout = false;
    config
}
