//! Instruction word classification.
//!
//! Decoding is a pure function of the 32-bit instruction word: encoding
//! class, register fields, immediates, packed/vector modes and the EX/MEM
//! operation selection. Register file reads and vector loop bookkeeping stay
//! in the run loop, which consumes the [`DecodedInstr`] produced here.
//!
//! Encoding classes, tested in order:
//!
//! 1. **B** (two-source with function field): `iword & 0xfc00007c == 0x7c`
//! 2. **A** (three-register): `iword & 0xfc000000 == 0` and not B
//! 3. **D** (immediate-21): `iword & 0xc0000000 == 0xc0000000`
//! 4. **C** (immediate-15): everything else

use crate::cpu::isa::{ExOp, MemOp, PackedMode, VectorMode};
use crate::cpu::SimError;

/// Instruction encoding class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodingClass {
    A,
    B,
    C,
    D,
}

/// Branch behavior of an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BranchOp {
    /// Not a branch.
    #[default]
    None,
    /// Conditional PC-relative branch over reg1.
    Cond(BranchCond),
    /// Unconditional register-indirect jump (J).
    Jump,
    /// Jump and link (JL): also writes PC + 4 to LR through the EX adder.
    JumpAndLink,
}

/// Condition evaluated over reg1 as a signed word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchCond {
    /// Zero.
    Z,
    /// Not zero.
    Nz,
    /// Set (all ones).
    S,
    /// Not set.
    Ns,
    /// Less than zero.
    Lt,
    /// Greater than or equal to zero.
    Ge,
    /// Less than or equal to zero.
    Le,
    /// Greater than zero.
    Gt,
}

impl BranchCond {
    /// Evaluate the condition against the reg1 value.
    pub fn taken(self, value: u32) -> bool {
        match self {
            BranchCond::Z => value == 0,
            BranchCond::Nz => value != 0,
            BranchCond::S => value == 0xffff_ffff,
            BranchCond::Ns => value != 0xffff_ffff,
            BranchCond::Lt => (value & 0x8000_0000) != 0,
            BranchCond::Ge => (value & 0x8000_0000) == 0,
            BranchCond::Le => (value & 0x8000_0000) != 0 || value == 0,
            BranchCond::Gt => (value & 0x8000_0000) == 0 && value != 0,
        }
    }
}

/// A fully classified instruction word.
#[derive(Debug, Clone, Copy)]
pub struct DecodedInstr {
    pub class: EncodingClass,

    /// Register fields (valid depending on the class).
    pub reg1: u32,
    pub reg2: u32,
    pub reg3: u32,

    /// Sign-extended 15-bit immediate (class C).
    pub imm15: u32,
    /// Sign-extended 21-bit immediate (class D).
    pub imm21: u32,

    pub packed_mode: PackedMode,
    pub vector_mode: VectorMode,

    pub ex_op: ExOp,
    pub mem_op: MemOp,
    pub branch: BranchOp,

    /// JL: forces `src_a = PC`, `src_b = 4`, `dst = LR`.
    pub is_subroutine_branch: bool,
    /// ADDPCHI forces `src_a = PC`.
    pub is_addpchi: bool,

    /// reg1 is a source operand (stores and branches).
    pub reg1_is_src: bool,
    /// reg2 is a source operand (classes A, B and C).
    pub reg2_is_src: bool,
    /// reg3 is a source operand (class A).
    pub reg3_is_src: bool,
    /// reg1 is the destination (whenever it is not a source).
    pub reg1_is_dst: bool,
}

impl DecodedInstr {
    pub fn is_vector_op(&self) -> bool {
        self.vector_mode.is_vector()
    }

    pub fn is_mem_op(&self) -> bool {
        self.mem_op != MemOp::None
    }

    pub fn is_branch(&self) -> bool {
        !matches!(self.branch, BranchOp::None)
    }
}

/// Classify one instruction word.
///
/// `pc` is only used for error reporting.
pub fn decode(iword: u32, pc: u32) -> Result<DecodedInstr, SimError> {
    // Detect the encoding class.
    let class_b = (iword & 0xfc00_007c) == 0x0000_007c;
    let class_a = (iword & 0xfc00_0000) == 0 && !class_b;
    let class_d = (iword & 0xc000_0000) == 0xc000_0000;
    let class = if class_b {
        EncodingClass::B
    } else if class_a {
        EncodingClass::A
    } else if class_d {
        EncodingClass::D
    } else {
        EncodingClass::C
    };

    // The vector mode bits are masked by class: class A uses both V bits,
    // B and C only the stride bit, D none.
    let vec_mask = match class {
        EncodingClass::A => 3,
        EncodingClass::B | EncodingClass::C => 2,
        EncodingClass::D => 0,
    };
    let vector_mode = VectorMode::from_bits((iword >> 14) & vec_mask);

    let packed_mode = match class {
        EncodingClass::A | EncodingClass::B => PackedMode::from_bits((iword >> 7) & 3),
        _ => PackedMode::None,
    };

    // Register fields and immediates. These may or may not be meaningful
    // depending on the instruction.
    let reg1 = (iword >> 21) & 31;
    let reg2 = (iword >> 16) & 31;
    let reg3 = (iword >> 9) & 31;
    let imm15 = (iword & 0x7fff) | if iword & 0x4000 != 0 { 0xffff_8000 } else { 0 };
    let imm21 = (iword & 0x001f_ffff) | if iword & 0x0010_0000 != 0 { 0xffe0_0000 } else { 0 };

    // Branch handling. All branches live in the class D opcode space.
    let is_bcc = (iword & 0xe000_0000) == 0xc000_0000;
    let is_j = (iword & 0xf800_0000) == 0xe000_0000;
    let is_subroutine_branch = (iword & 0xfc00_0000) == 0xe400_0000;
    let branch = if is_bcc {
        BranchOp::Cond(match (iword >> 26) & 0x3f {
            0x30 => BranchCond::Z,
            0x31 => BranchCond::Nz,
            0x32 => BranchCond::S,
            0x33 => BranchCond::Ns,
            0x34 => BranchCond::Lt,
            0x35 => BranchCond::Ge,
            0x36 => BranchCond::Le,
            _ => BranchCond::Gt,
        })
    } else if is_subroutine_branch {
        BranchOp::JumpAndLink
    } else if is_j {
        BranchOp::Jump
    } else {
        BranchOp::None
    };

    // Memory operation detection: register-indexed (class A opcode space)
    // and immediate-offset (class C opcode space) forms.
    let is_ldx = (iword & 0xfc00_0078) == 0 && (iword & 0x7) != 0;
    let is_ld = (iword & 0xe000_0000) == 0 && (iword & 0x1c00_0000) != 0;
    let is_stx = (iword & 0xfc00_0078) == 0x0000_0008;
    let is_st = (iword & 0xe000_0000) == 0x2000_0000;
    let is_mem_load = is_ldx || is_ld;
    let is_mem_store = is_stx || is_st;

    let mem_op = if is_mem_load || is_mem_store {
        let code = if is_ldx || is_stx { iword & 0x7f } else { iword >> 26 };
        let op = MemOp::from_code(code);
        if op == MemOp::None {
            return Err(SimError::UnimplementedOp { code, pc });
        }
        op
    } else {
        MemOp::None
    };

    let is_addpchi = (iword & 0xfc00_0000) == 0xf400_0000;

    // Source/destination register selection.
    let reg1_is_src = is_mem_store || is_bcc || is_j;
    let reg2_is_src = matches!(class, EncodingClass::A | EncodingClass::B | EncodingClass::C);
    let reg3_is_src = class == EncodingClass::A;
    let reg1_is_dst = !reg1_is_src;

    // EX operation selection. Memory operations use the EX stage as the
    // address generation unit, so their ex_op is never inspected.
    let ex_op = if mem_op != MemOp::None {
        ExOp::Cpuid
    } else if is_subroutine_branch {
        ExOp::Add
    } else {
        let raw = match class {
            EncodingClass::A if iword & 0x1f0 != 0 => Some(iword & 0x7f),
            EncodingClass::B => Some((iword & 0x3f00) | (iword & 0x7f)),
            EncodingClass::C if iword & 0xc000_0000 != 0 => Some(iword >> 26),
            EncodingClass::D if !is_bcc && !is_j => Some(match iword & 0xfc00_0000 {
                0xe800_0000 => ExOp::Or as u32,      // ldli
                0xec00_0000 => ExOp::Ldhi as u32,    // ldhi
                0xf000_0000 => ExOp::Ldhio as u32,   // ldhio
                0xf400_0000 => ExOp::Addpchi as u32, // addpchi
                _ => return Err(SimError::DecodeFault { iword, pc }),
            }),
            _ => None,
        };
        match raw {
            Some(code) => {
                ExOp::from_code(code).ok_or(SimError::UnimplementedOp { code, pc })?
            }
            None => ExOp::Cpuid,
        }
    };

    Ok(DecodedInstr {
        class,
        reg1,
        reg2,
        reg3,
        imm15,
        imm21,
        packed_mode,
        vector_mode,
        ex_op,
        mem_op,
        branch,
        is_subroutine_branch,
        is_addpchi,
        reg1_is_src,
        reg2_is_src,
        reg3_is_src,
        reg1_is_dst,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    // Instruction word builders matching the MRISC32 encodings.
    fn enc_a(op: u32, reg1: u32, reg2: u32, reg3: u32, vm: u32, t: u32) -> u32 {
        (reg1 << 21) | (reg2 << 16) | (vm << 14) | (reg3 << 9) | (t << 7) | op
    }

    fn enc_c(op: u32, reg1: u32, reg2: u32, imm15: u32) -> u32 {
        (op << 26) | (reg1 << 21) | (reg2 << 16) | (imm15 & 0x7fff)
    }

    fn enc_d(op: u32, reg1: u32, imm21: u32) -> u32 {
        (op << 26) | (reg1 << 21) | (imm21 & 0x001f_ffff)
    }

    #[test]
    fn test_class_detection() {
        // or s1, s2, s3
        assert_eq!(decode(enc_a(0x10, 1, 2, 3, 0, 0), 0).unwrap().class, EncodingClass::A);
        // or s1, s2, #imm
        assert_eq!(decode(enc_c(0x10, 1, 2, 42), 0).unwrap().class, EncodingClass::C);
        // ldli s1, #imm21
        assert_eq!(decode(enc_d(0x3a, 1, 42), 0).unwrap().class, EncodingClass::D);
    }

    #[test]
    fn test_register_fields_and_immediates() {
        let d = decode(enc_a(0x15, 5, 10, 17, 0, 0), 0).unwrap();
        assert_eq!((d.reg1, d.reg2, d.reg3), (5, 10, 17));
        assert_eq!(d.ex_op, ExOp::Add);
        assert!(d.reg2_is_src && d.reg3_is_src && d.reg1_is_dst && !d.reg1_is_src);

        // imm15 sign extension from bit 14.
        let d = decode(enc_c(0x15, 1, 2, 0x7fff), 0).unwrap();
        assert_eq!(d.imm15, 0xffff_ffff);
        let d = decode(enc_c(0x15, 1, 2, 0x3fff), 0).unwrap();
        assert_eq!(d.imm15, 0x3fff);

        // imm21 sign extension from bit 20.
        let d = decode(enc_d(0x3a, 1, 0x1f_ffff), 0).unwrap();
        assert_eq!(d.imm21, 0xffff_ffff);
    }

    #[test]
    fn test_packed_mode_extraction() {
        let d = decode(enc_a(0x15, 1, 2, 3, 0, 1), 0).unwrap();
        assert_eq!(d.packed_mode, PackedMode::Byte);
        let d = decode(enc_a(0x15, 1, 2, 3, 0, 2), 0).unwrap();
        assert_eq!(d.packed_mode, PackedMode::HalfWord);
        // Class C and D never have packed modes.
        let d = decode(enc_c(0x15, 1, 2, 0x0180), 0).unwrap();
        assert_eq!(d.packed_mode, PackedMode::None);
    }

    #[test]
    fn test_vector_mode_masking() {
        // Class A sees both V bits.
        let d = decode(enc_a(0x15, 1, 2, 3, 3, 0), 0).unwrap();
        assert_eq!(d.vector_mode, VectorMode::GatherScatter);
        let d = decode(enc_a(0x15, 1, 2, 3, 1, 0), 0).unwrap();
        assert_eq!(d.vector_mode, VectorMode::Folding);
        // Class C only the stride bit.
        let d = decode(enc_c(0x15, 1, 2, 0) | (1 << 15), 0).unwrap();
        assert_eq!(d.vector_mode, VectorMode::Stride);
        // Class D none: ldli with bit 15 set is just an immediate bit.
        let d = decode(enc_d(0x3a, 1, 1 << 15), 0).unwrap();
        assert_eq!(d.vector_mode, VectorMode::Scalar);
    }

    #[test]
    fn test_memory_op_decode() {
        // ldw s1, s2, #8 (class C opcode 0x03).
        let d = decode(enc_c(0x03, 1, 2, 8), 0).unwrap();
        assert_eq!(d.mem_op, MemOp::Load32);
        assert!(!d.reg1_is_src && d.reg1_is_dst);

        // stw s1, s2, #8 (class C opcode 0x0b).
        let d = decode(enc_c(0x0b, 1, 2, 8), 0).unwrap();
        assert_eq!(d.mem_op, MemOp::Store32);
        assert!(d.reg1_is_src && !d.reg1_is_dst);

        // Register-indexed forms (class A low opcodes).
        let d = decode(enc_a(0x01, 1, 2, 3, 0, 0), 0).unwrap();
        assert_eq!(d.mem_op, MemOp::Load8);
        let d = decode(enc_a(0x09, 1, 2, 3, 0, 0), 0).unwrap();
        assert_eq!(d.mem_op, MemOp::Store8);

        // ldea (class C opcode 0x07).
        let d = decode(enc_c(0x07, 1, 2, 8), 0).unwrap();
        assert_eq!(d.mem_op, MemOp::Ldea);

        // Unassigned load slot faults.
        assert!(matches!(
            decode(enc_c(0x04, 1, 2, 8), 0x200),
            Err(SimError::UnimplementedOp { code: 4, pc: 0x200 })
        ));
    }

    #[test]
    fn test_branch_decode() {
        // bz s5, #16
        let d = decode(enc_d(0x30, 5, 16), 0).unwrap();
        assert_eq!(d.branch, BranchOp::Cond(BranchCond::Z));
        assert!(d.reg1_is_src && !d.reg1_is_dst);

        // All eight conditions map.
        for (op, cond) in [
            (0x30, BranchCond::Z),
            (0x31, BranchCond::Nz),
            (0x32, BranchCond::S),
            (0x33, BranchCond::Ns),
            (0x34, BranchCond::Lt),
            (0x35, BranchCond::Ge),
            (0x36, BranchCond::Le),
            (0x37, BranchCond::Gt),
        ] {
            let d = decode(enc_d(op, 1, 0), 0).unwrap();
            assert_eq!(d.branch, BranchOp::Cond(cond));
        }

        // j s1, #0
        let d = decode(enc_d(0x38, 1, 0), 0).unwrap();
        assert_eq!(d.branch, BranchOp::Jump);
        assert!(!d.is_subroutine_branch);

        // jl s1, #0 writes the return address via the EX adder.
        let d = decode(enc_d(0x39, 1, 0), 0).unwrap();
        assert_eq!(d.branch, BranchOp::JumpAndLink);
        assert!(d.is_subroutine_branch);
        assert_eq!(d.ex_op, ExOp::Add);
    }

    #[test]
    fn test_branch_conditions() {
        assert!(BranchCond::Z.taken(0));
        assert!(!BranchCond::Z.taken(1));
        assert!(BranchCond::S.taken(0xffff_ffff));
        assert!(!BranchCond::S.taken(1));
        assert!(BranchCond::Lt.taken(0x8000_0000));
        assert!(BranchCond::Ge.taken(0));
        assert!(BranchCond::Le.taken(0));
        assert!(BranchCond::Le.taken(0xffff_ffff));
        assert!(BranchCond::Gt.taken(1));
        assert!(!BranchCond::Gt.taken(0));
    }

    #[test]
    fn test_class_d_literals() {
        // ldli decodes to OR with the Z source.
        let d = decode(enc_d(0x3a, 1, 42), 0).unwrap();
        assert_eq!(d.ex_op, ExOp::Or);
        assert!(!d.reg2_is_src);

        let d = decode(enc_d(0x3b, 1, 42), 0).unwrap();
        assert_eq!(d.ex_op, ExOp::Ldhi);
        let d = decode(enc_d(0x3c, 1, 42), 0).unwrap();
        assert_eq!(d.ex_op, ExOp::Ldhio);

        let d = decode(enc_d(0x3d, 1, 42), 0).unwrap();
        assert_eq!(d.ex_op, ExOp::Addpchi);
        assert!(d.is_addpchi);
    }

    #[test]
    fn test_decode_fault_on_vacant_class_d() {
        assert!(matches!(
            decode(enc_d(0x3e, 1, 0), 0x204),
            Err(SimError::DecodeFault { pc: 0x204, .. })
        ));
        assert!(matches!(
            decode(enc_d(0x3f, 1, 0), 0),
            Err(SimError::DecodeFault { .. })
        ));
    }

    #[test]
    fn test_unimplemented_ex_op() {
        // Vacant class A function slot.
        assert!(matches!(
            decode(enc_a(0x7b, 1, 2, 3, 0, 0), 0),
            Err(SimError::UnimplementedOp { code: 0x7b, .. })
        ));
        // Class B composite codes are outside the implemented set.
        assert!(matches!(
            decode(0x0000_007c, 0),
            Err(SimError::UnimplementedOp { .. })
        ));
    }

    #[test]
    fn test_nop_is_cpuid() {
        // The all-zero word is CPUID Z, Z, Z.
        let d = decode(0, 0).unwrap();
        assert_eq!(d.class, EncodingClass::A);
        assert_eq!(d.ex_op, ExOp::Cpuid);
        assert_eq!(d.mem_op, MemOp::None);
        assert_eq!(d.reg1, 0);
    }
}
