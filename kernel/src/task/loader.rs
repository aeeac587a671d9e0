//! User program loader: ELF32 parsing, segment mapping, and initial
//! stack construction.
//!
//! Accepts an in-memory ELF image (the kernel reads the file from the
//! host at task-creation/exec time), validates the header — 32-bit,
//! little-endian, `EM_RISCV` — and maps every `PT_LOAD` segment with
//! permissions derived from the program-header flags. Pages are
//! zero-filled on mapping; `p_filesz` bytes come from the image, the rest
//! of `p_memsz` stays zero (BSS).
//!
//! After the segments, the loader builds the initial user stack: argv
//! strings, then the argv pointer array, the stack pointer 16-byte
//! aligned at each stage.

use crate::error::KernelError;
use crate::memory::paged::PteFlags;
use crate::memory::{page_align_down, page_align_up, AsId, MemoryManager};

const ELF_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];
const ELFCLASS32: u8 = 1;
const ELFDATA2LSB: u8 = 1;
const EM_RISCV: u16 = 243;
const PT_LOAD: u32 = 1;

const PF_X: u32 = 0x1;
const PF_W: u32 = 0x2;
const PF_R: u32 = 0x4;

/// Segments ending above this address lose their execute permission.
/// Policy constant: it keeps the stack guard region non-executable even
/// for images that claim otherwise.
const EXEC_CLEAR_BOUNDARY: u32 = 0x7FFF_FFF0;

/// One PT_LOAD segment as the loader sees it.
#[derive(Debug, Clone, Copy)]
pub struct Segment {
    pub vaddr: u32,
    pub file_size: u32,
    pub mem_size: u32,
    pub flags: u32,
    pub file_offset: u32,
}

/// Result of loading an image and building its stack.
#[derive(Debug, Clone, Copy)]
pub struct ProgramImage {
    /// Entry point from the ELF header.
    pub entry: u32,
    /// Initial stack pointer (16-byte aligned).
    pub sp: u32,
    /// Stack the task was given: base and size.
    pub stack_base: u32,
    pub stack_size: u32,
    /// Number of argv entries.
    pub argc: u32,
    /// Guest address of the argv pointer array.
    pub argv_ptr: u32,
}

fn read_u16(data: &[u8], off: usize) -> Result<u16, KernelError> {
    let b = data.get(off..off + 2).ok_or(KernelError::BadElf("truncated header"))?;
    Ok(u16::from_le_bytes([b[0], b[1]]))
}

fn read_u32(data: &[u8], off: usize) -> Result<u32, KernelError> {
    let b = data.get(off..off + 4).ok_or(KernelError::BadElf("truncated header"))?;
    Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

/// Validate the ELF header and return the entry point.
pub fn entry_point(data: &[u8]) -> Result<u32, KernelError> {
    if data.len() < 52 {
        return Err(KernelError::BadElf("file shorter than an ELF32 header"));
    }
    if data[0..4] != ELF_MAGIC {
        return Err(KernelError::BadElf("bad magic"));
    }
    if data[4] != ELFCLASS32 {
        return Err(KernelError::BadElf("not a 32-bit image"));
    }
    if data[5] != ELFDATA2LSB {
        return Err(KernelError::BadElf("not little-endian"));
    }
    if read_u16(data, 18)? != EM_RISCV {
        return Err(KernelError::BadElf("not a RISC-V image"));
    }
    read_u32(data, 24)
}

/// Parse the PT_LOAD program headers.
pub fn segments(data: &[u8]) -> Result<Vec<Segment>, KernelError> {
    entry_point(data)?; // header validation
    let phoff = read_u32(data, 28)? as usize;
    let phentsize = read_u16(data, 42)? as usize;
    let phnum = read_u16(data, 44)? as usize;
    if phentsize < 32 {
        return Err(KernelError::BadElf("program header entry too small"));
    }

    let mut segs = Vec::new();
    for i in 0..phnum {
        let base = phoff + i * phentsize;
        if read_u32(data, base)? != PT_LOAD {
            continue;
        }
        let seg = Segment {
            file_offset: read_u32(data, base + 4)?,
            vaddr: read_u32(data, base + 8)?,
            file_size: read_u32(data, base + 16)?,
            mem_size: read_u32(data, base + 20)?,
            flags: read_u32(data, base + 24)?,
        };
        if seg.file_size > seg.mem_size {
            return Err(KernelError::BadElf("file size exceeds memory size"));
        }
        let file_end = seg
            .file_offset
            .checked_add(seg.file_size)
            .ok_or(KernelError::BadElf("segment file range overflows"))?;
        if file_end as usize > data.len() {
            return Err(KernelError::BadElf("segment reaches past end of file"));
        }
        let mem_end = seg
            .vaddr
            .checked_add(seg.mem_size)
            .ok_or(KernelError::BadElf("segment address range overflows"))?;
        if mem_end > 0xFFFF_F000 {
            return Err(KernelError::BadElf("segment ends above the addressable range"));
        }
        segs.push(seg);
    }
    Ok(segs)
}

fn pte_flags_for(seg: &Segment) -> PteFlags {
    let mut flags = PteFlags::empty();
    if seg.flags & PF_R != 0 {
        flags |= PteFlags::READ;
    }
    if seg.flags & PF_W != 0 {
        flags |= PteFlags::WRITE;
    }
    if seg.flags & PF_X != 0 && seg.vaddr.wrapping_add(seg.mem_size) <= EXEC_CLEAR_BOUNDARY {
        flags |= PteFlags::EXEC;
    }
    flags
}

/// Load `data` into `asid` and build the initial stack with `argv`.
///
/// The address space must be freshly created; on error the caller
/// destroys it (nothing else is rolled back here).
pub fn build_user_program(
    mgr: &MemoryManager,
    asid: AsId,
    data: &[u8],
    argv: &[Vec<u8>],
) -> Result<ProgramImage, KernelError> {
    let entry = entry_point(data)?;
    let segs = segments(data)?;

    let extent = segs
        .iter()
        .map(|s| page_align_up(s.vaddr + s.mem_size))
        .max()
        .unwrap_or(0);

    let stack_top = mgr.prepare_image(asid, extent)?;

    for seg in &segs {
        let start = page_align_down(seg.vaddr);
        let len = page_align_up(seg.vaddr + seg.mem_size) - start;
        mgr.map_region(asid, start, len, pte_flags_for(seg))?;
        let bytes = &data[seg.file_offset as usize..(seg.file_offset + seg.file_size) as usize];
        mgr.write_bytes_bypass(asid, seg.vaddr, bytes)?;
    }

    // argv strings first, highest address down, then the pointer array.
    let mut sp = stack_top & !15;
    let mut arg_addrs = Vec::with_capacity(argv.len());
    for arg in argv.iter().rev() {
        sp -= arg.len() as u32 + 1;
        mgr.write_bytes_bypass(asid, sp, arg)?;
        mgr.write_u8_bypass(asid, sp + arg.len() as u32, 0)?;
        arg_addrs.push(sp);
    }
    arg_addrs.reverse();
    sp &= !15;
    sp -= (argv.len() as u32 + 1) * 4;
    sp &= !15;
    let argv_ptr = sp;
    for (i, addr) in arg_addrs.iter().enumerate() {
        mgr.write_bytes_bypass(asid, argv_ptr + i as u32 * 4, &addr.to_le_bytes())?;
    }
    mgr.write_bytes_bypass(asid, argv_ptr + argv.len() as u32 * 4, &0u32.to_le_bytes())?;

    log::debug!(
        "loader: asid {} entry {:#010x} sp {:#010x} argc {}",
        asid,
        entry,
        sp,
        argv.len()
    );
    Ok(ProgramImage {
        entry,
        sp,
        stack_base: stack_top - crate::memory::USER_STACK_SIZE,
        stack_size: crate::memory::USER_STACK_SIZE,
        argc: argv.len() as u32,
        argv_ptr,
    })
}
