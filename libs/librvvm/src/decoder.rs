//! RV32IM instruction decoder.
//!
//! RV32 instructions are fixed 32-bit words, so decoding is a pure
//! function of the word: extract the opcode (bits [6:0]), then funct3 /
//! funct7 and the immediate in the format the opcode dictates. Unknown
//! encodings — including the whole CSR space, which this machine does not
//! model — come back as [`VmError::IllegalInstruction`].
//!
//! Immediate extraction helpers mirror the field scrambling of the RISC-V
//! base ISA: I/S/B/U/J formats, all sign-extended from bit 31.

use crate::error::{Result, VmError};
use crate::instruction::{AluOp, BranchOp, Instr, LoadOp, MulDivOp, StoreOp};

// -- opcode values (bits [6:0]) -----------------------------------------

const OP_LUI: u32 = 0b011_0111;
const OP_AUIPC: u32 = 0b001_0111;
const OP_JAL: u32 = 0b110_1111;
const OP_JALR: u32 = 0b110_0111;
const OP_BRANCH: u32 = 0b110_0011;
const OP_LOAD: u32 = 0b000_0011;
const OP_STORE: u32 = 0b010_0011;
const OP_ALU_IMM: u32 = 0b001_0011;
const OP_ALU_REG: u32 = 0b011_0011;
const OP_MISC_MEM: u32 = 0b000_1111;
const OP_SYSTEM: u32 = 0b111_0011;

/// funct7 value selecting the M extension on the OP opcode.
const F7_MULDIV: u32 = 0b000_0001;
/// funct7 value selecting SUB/SRA on the OP opcode and SRAI on OP-IMM.
const F7_ALT: u32 = 0b010_0000;

// -- field extraction ---------------------------------------------------

#[inline]
fn rd(word: u32) -> u8 {
    ((word >> 7) & 0x1f) as u8
}

#[inline]
fn rs1(word: u32) -> u8 {
    ((word >> 15) & 0x1f) as u8
}

#[inline]
fn rs2(word: u32) -> u8 {
    ((word >> 20) & 0x1f) as u8
}

#[inline]
fn funct3(word: u32) -> u32 {
    (word >> 12) & 0x7
}

#[inline]
fn funct7(word: u32) -> u32 {
    word >> 25
}

/// I-type immediate: bits [31:20], sign-extended.
#[inline]
fn imm_i(word: u32) -> i32 {
    (word as i32) >> 20
}

/// S-type immediate: bits [31:25] ++ [11:7], sign-extended.
#[inline]
fn imm_s(word: u32) -> i32 {
    ((word as i32) >> 25 << 5) | (((word >> 7) & 0x1f) as i32)
}

/// B-type immediate: bit 12 ++ bit 11 ++ bits [10:5] ++ bits [4:1] ++ 0.
#[inline]
fn imm_b(word: u32) -> i32 {
    ((word as i32) >> 31 << 12)
        | ((((word >> 7) & 0x1) as i32) << 11)
        | ((((word >> 25) & 0x3f) as i32) << 5)
        | ((((word >> 8) & 0xf) as i32) << 1)
}

/// U-type immediate: bits [31:12], already in position.
#[inline]
fn imm_u(word: u32) -> u32 {
    word & 0xffff_f000
}

/// J-type immediate: bit 20 ++ bits [19:12] ++ bit 11 ++ bits [10:1] ++ 0.
#[inline]
fn imm_j(word: u32) -> i32 {
    ((word as i32) >> 31 << 20)
        | (((word >> 12) & 0xff) as i32) << 12
        | ((((word >> 20) & 0x1) as i32) << 11)
        | ((((word >> 21) & 0x3ff) as i32) << 1)
}

/// Decode one RV32IM instruction word.
///
/// `pc` is only used to annotate decode errors.
pub fn decode(word: u32, pc: u32) -> Result<Instr> {
    let illegal = || VmError::IllegalInstruction { word, pc };

    match word & 0x7f {
        OP_LUI => Ok(Instr::Lui { rd: rd(word), imm: imm_u(word) }),
        OP_AUIPC => Ok(Instr::Auipc { rd: rd(word), imm: imm_u(word) }),
        OP_JAL => Ok(Instr::Jal { rd: rd(word), offset: imm_j(word) }),
        OP_JALR => {
            if funct3(word) != 0 {
                return Err(illegal());
            }
            Ok(Instr::Jalr { rd: rd(word), rs1: rs1(word), offset: imm_i(word) })
        }
        OP_BRANCH => {
            let op = match funct3(word) {
                0b000 => BranchOp::Beq,
                0b001 => BranchOp::Bne,
                0b100 => BranchOp::Blt,
                0b101 => BranchOp::Bge,
                0b110 => BranchOp::Bltu,
                0b111 => BranchOp::Bgeu,
                _ => return Err(illegal()),
            };
            Ok(Instr::Branch { op, rs1: rs1(word), rs2: rs2(word), offset: imm_b(word) })
        }
        OP_LOAD => {
            let op = match funct3(word) {
                0b000 => LoadOp::Lb,
                0b001 => LoadOp::Lh,
                0b010 => LoadOp::Lw,
                0b100 => LoadOp::Lbu,
                0b101 => LoadOp::Lhu,
                _ => return Err(illegal()),
            };
            Ok(Instr::Load { op, rd: rd(word), rs1: rs1(word), offset: imm_i(word) })
        }
        OP_STORE => {
            let op = match funct3(word) {
                0b000 => StoreOp::Sb,
                0b001 => StoreOp::Sh,
                0b010 => StoreOp::Sw,
                _ => return Err(illegal()),
            };
            Ok(Instr::Store { op, rs1: rs1(word), rs2: rs2(word), offset: imm_s(word) })
        }
        OP_ALU_IMM => {
            let (op, imm) = match funct3(word) {
                0b000 => (AluOp::Add, imm_i(word)),
                0b010 => (AluOp::Slt, imm_i(word)),
                0b011 => (AluOp::Sltu, imm_i(word)),
                0b100 => (AluOp::Xor, imm_i(word)),
                0b110 => (AluOp::Or, imm_i(word)),
                0b111 => (AluOp::And, imm_i(word)),
                // Shift-immediate forms encode the shift amount in the
                // rs2 field and discriminate on funct7.
                0b001 => {
                    if funct7(word) != 0 {
                        return Err(illegal());
                    }
                    (AluOp::Sll, rs2(word) as i32)
                }
                0b101 => match funct7(word) {
                    0 => (AluOp::Srl, rs2(word) as i32),
                    F7_ALT => (AluOp::Sra, rs2(word) as i32),
                    _ => return Err(illegal()),
                },
                _ => unreachable!(),
            };
            Ok(Instr::AluImm { op, rd: rd(word), rs1: rs1(word), imm })
        }
        OP_ALU_REG => {
            let f3 = funct3(word);
            match funct7(word) {
                F7_MULDIV => {
                    let op = match f3 {
                        0b000 => MulDivOp::Mul,
                        0b001 => MulDivOp::Mulh,
                        0b010 => MulDivOp::Mulhsu,
                        0b011 => MulDivOp::Mulhu,
                        0b100 => MulDivOp::Div,
                        0b101 => MulDivOp::Divu,
                        0b110 => MulDivOp::Rem,
                        0b111 => MulDivOp::Remu,
                        _ => unreachable!(),
                    };
                    Ok(Instr::MulDiv { op, rd: rd(word), rs1: rs1(word), rs2: rs2(word) })
                }
                F7_ALT => {
                    let op = match f3 {
                        0b000 => AluOp::Sub,
                        0b101 => AluOp::Sra,
                        _ => return Err(illegal()),
                    };
                    Ok(Instr::Alu { op, rd: rd(word), rs1: rs1(word), rs2: rs2(word) })
                }
                0 => {
                    let op = match f3 {
                        0b000 => AluOp::Add,
                        0b001 => AluOp::Sll,
                        0b010 => AluOp::Slt,
                        0b011 => AluOp::Sltu,
                        0b100 => AluOp::Xor,
                        0b101 => AluOp::Srl,
                        0b110 => AluOp::Or,
                        0b111 => AluOp::And,
                        _ => unreachable!(),
                    };
                    Ok(Instr::Alu { op, rd: rd(word), rs1: rs1(word), rs2: rs2(word) })
                }
                _ => Err(illegal()),
            }
        }
        // FENCE and FENCE.I are ordering hints; this simulator executes
        // each hart's instructions in program order already.
        OP_MISC_MEM => Ok(Instr::Fence),
        OP_SYSTEM => {
            if funct3(word) != 0 {
                // CSR instructions — privileged state is not modelled.
                return Err(illegal());
            }
            match word >> 20 {
                0 => Ok(Instr::Ecall),
                1 => Ok(Instr::Ebreak),
                _ => Err(illegal()),
            }
        }
        _ => Err(illegal()),
    }
}

/// The canonical ECALL encoding, used by debug assertions in the kernel's
/// PC-rewind path.
pub const ECALL_WORD: u32 = 0x0000_0073;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_addi() {
        // addi a0, zero, 42
        let i = decode(0x02a0_0513, 0).unwrap();
        assert_eq!(i, Instr::AluImm { op: AluOp::Add, rd: 10, rs1: 0, imm: 42 });
        // addi a7, zero, 93
        let i = decode(0x05d0_0893, 0).unwrap();
        assert_eq!(i, Instr::AluImm { op: AluOp::Add, rd: 17, rs1: 0, imm: 93 });
    }

    #[test]
    fn decodes_negative_immediates() {
        // addi a0, a0, -1
        let i = decode(0xfff5_0513, 0).unwrap();
        assert_eq!(i, Instr::AluImm { op: AluOp::Add, rd: 10, rs1: 10, imm: -1 });
    }

    #[test]
    fn decodes_lui_and_auipc() {
        // lui a0, 0x12345
        let i = decode(0x1234_5537, 0).unwrap();
        assert_eq!(i, Instr::Lui { rd: 10, imm: 0x1234_5000 });
        // auipc a1, 0x1
        let i = decode(0x0000_1597, 0).unwrap();
        assert_eq!(i, Instr::Auipc { rd: 11, imm: 0x1000 });
    }

    #[test]
    fn decodes_jumps() {
        // jal ra, +8
        let i = decode(0x0080_00ef, 0).unwrap();
        assert_eq!(i, Instr::Jal { rd: 1, offset: 8 });
        // jalr zero, 0(ra) — a plain `ret`
        let i = decode(0x0000_8067, 0).unwrap();
        assert_eq!(i, Instr::Jalr { rd: 0, rs1: 1, offset: 0 });
    }

    #[test]
    fn decodes_branches() {
        // beq a0, a1, +8
        let i = decode(0x00b5_0463, 0).unwrap();
        assert_eq!(i, Instr::Branch { op: BranchOp::Beq, rs1: 10, rs2: 11, offset: 8 });
        // bne a0, zero, -4
        let i = decode(0xfe05_1ee3, 0).unwrap();
        assert_eq!(i, Instr::Branch { op: BranchOp::Bne, rs1: 10, rs2: 0, offset: -4 });
    }

    #[test]
    fn decodes_loads_and_stores() {
        // lw a0, 0(sp)
        let i = decode(0x0001_2503, 0).unwrap();
        assert_eq!(i, Instr::Load { op: LoadOp::Lw, rd: 10, rs1: 2, offset: 0 });
        // sw a0, -4(sp)
        let i = decode(0xfea1_2e23, 0).unwrap();
        assert_eq!(i, Instr::Store { op: StoreOp::Sw, rs1: 2, rs2: 10, offset: -4 });
        // lbu t0, 3(a1)
        let i = decode(0x0035_c283, 0).unwrap();
        assert_eq!(i, Instr::Load { op: LoadOp::Lbu, rd: 5, rs1: 11, offset: 3 });
    }

    #[test]
    fn decodes_shift_immediates() {
        // slli a0, a0, 2
        let i = decode(0x0025_1513, 0).unwrap();
        assert_eq!(i, Instr::AluImm { op: AluOp::Sll, rd: 10, rs1: 10, imm: 2 });
        // srai a0, a0, 4
        let i = decode(0x4045_5513, 0).unwrap();
        assert_eq!(i, Instr::AluImm { op: AluOp::Sra, rd: 10, rs1: 10, imm: 4 });
        // srli with the SRAI funct7 plus a stray bit is illegal
        assert!(decode(0x2045_5513, 0).is_err());
    }

    #[test]
    fn decodes_mul_div() {
        // mul a0, a1, a2
        let i = decode(0x02c5_8533, 0).unwrap();
        assert_eq!(i, Instr::MulDiv { op: MulDivOp::Mul, rd: 10, rs1: 11, rs2: 12 });
        // divu a3, a4, a5
        let i = decode(0x02f7_56b3, 0).unwrap();
        assert_eq!(i, Instr::MulDiv { op: MulDivOp::Divu, rd: 13, rs1: 14, rs2: 15 });
    }

    #[test]
    fn decodes_system() {
        assert_eq!(decode(ECALL_WORD, 0).unwrap(), Instr::Ecall);
        assert_eq!(decode(0x0010_0073, 0).unwrap(), Instr::Ebreak);
        // CSRRW (funct3 != 0) is outside the modelled subset.
        assert!(decode(0x3000_9073, 0).is_err());
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            decode(0x0000_0000, 0x44),
            Err(VmError::IllegalInstruction { word: 0, pc: 0x44 })
        ));
        assert!(decode(0xffff_ffff, 0).is_err());
    }
}
