//! Instruction stream decoding and encoding.
//!
//! Branch and switch targets are stored as absolute code offsets, so
//! inserting code only needs a remap of targets; relative offsets and
//! switch padding are recomputed when the stream is encoded.

use super::bytes::{put_i32, put_u16, put_u8, Reader};
use super::opcode::*;
use crate::error::{ClassError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    /// Any single-byte instruction.
    Simple(u8),
    Bipush(i8),
    Sipush(i16),
    Ldc(u8),
    LdcW(u16),
    Ldc2W(u16),
    /// `xload` / `xstore` / `ret` with an explicit index. `wide` keeps the
    /// original encoding.
    Local { opcode: u8, index: u16, wide: bool },
    Iinc { index: u16, delta: i16, wide: bool },
    /// Instruction with a single 16-bit constant pool operand.
    Cp { opcode: u8, index: u16 },
    InvokeInterface { index: u16, count: u8 },
    InvokeDynamic { index: u16 },
    NewArray(u8),
    MultiANewArray { index: u16, dimensions: u8 },
    /// Conditional branches, `goto` and `jsr` with a 16-bit offset.
    Branch { opcode: u8, target: u32 },
    /// `goto_w` and `jsr_w`.
    BranchWide { opcode: u8, target: u32 },
    TableSwitch { default: u32, low: i32, high: i32, targets: Vec<u32> },
    LookupSwitch { default: u32, pairs: Vec<(i32, u32)> },
}

/// An instruction with its byte offset in the code array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstructionAt {
    pub offset: u32,
    pub instruction: Instruction,
}

impl Instruction {
    pub fn opcode(&self) -> u8 {
        match self {
            Instruction::Simple(op) => *op,
            Instruction::Bipush(_) => BIPUSH,
            Instruction::Sipush(_) => SIPUSH,
            Instruction::Ldc(_) => LDC,
            Instruction::LdcW(_) => LDC_W,
            Instruction::Ldc2W(_) => LDC2_W,
            Instruction::Local { opcode, .. } => *opcode,
            Instruction::Iinc { .. } => IINC,
            Instruction::Cp { opcode, .. } => *opcode,
            Instruction::InvokeInterface { .. } => INVOKEINTERFACE,
            Instruction::InvokeDynamic { .. } => INVOKEDYNAMIC,
            Instruction::NewArray(_) => NEWARRAY,
            Instruction::MultiANewArray { .. } => MULTIANEWARRAY,
            Instruction::Branch { opcode, .. } => *opcode,
            Instruction::BranchWide { opcode, .. } => *opcode,
            Instruction::TableSwitch { .. } => TABLESWITCH,
            Instruction::LookupSwitch { .. } => LOOKUPSWITCH,
        }
    }

    /// Encoded size when placed at `at`; only switches depend on the
    /// position.
    pub fn encoded_len(&self, at: u32) -> u32 {
        match self {
            Instruction::Simple(_) => 1,
            Instruction::Bipush(_) | Instruction::Ldc(_) | Instruction::NewArray(_) => 2,
            Instruction::Sipush(_) | Instruction::LdcW(_) | Instruction::Ldc2W(_) => 3,
            Instruction::Local { wide: false, .. } => 2,
            Instruction::Local { wide: true, .. } => 4,
            Instruction::Iinc { wide: false, .. } => 3,
            Instruction::Iinc { wide: true, .. } => 6,
            Instruction::Cp { .. } | Instruction::Branch { .. } => 3,
            Instruction::MultiANewArray { .. } => 4,
            Instruction::InvokeInterface { .. }
            | Instruction::InvokeDynamic { .. }
            | Instruction::BranchWide { .. } => 5,
            Instruction::TableSwitch { targets, .. } => {
                1 + switch_padding(at) + 12 + 4 * targets.len() as u32
            }
            Instruction::LookupSwitch { pairs, .. } => {
                1 + switch_padding(at) + 8 + 8 * pairs.len() as u32
            }
        }
    }

    /// Every branch target, in encoding order (default first for switches).
    pub fn targets(&self) -> Vec<u32> {
        match self {
            Instruction::Branch { target, .. } | Instruction::BranchWide { target, .. } => {
                vec![*target]
            }
            Instruction::TableSwitch { default, targets, .. } => {
                std::iter::once(*default).chain(targets.iter().copied()).collect()
            }
            Instruction::LookupSwitch { default, pairs } => std::iter::once(*default)
                .chain(pairs.iter().map(|(_, t)| *t))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Rewrite every branch target through `map`.
    pub fn map_targets(&mut self, map: &mut impl FnMut(u32) -> Result<u32>) -> Result<()> {
        match self {
            Instruction::Branch { target, .. } | Instruction::BranchWide { target, .. } => {
                *target = map(*target)?;
            }
            Instruction::TableSwitch { default, targets, .. } => {
                *default = map(*default)?;
                for t in targets.iter_mut() {
                    *t = map(*t)?;
                }
            }
            Instruction::LookupSwitch { default, pairs } => {
                *default = map(*default)?;
                for (_, t) in pairs.iter_mut() {
                    *t = map(*t)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Append the encoding of this instruction placed at `at`.
    pub fn encode(&self, at: u32, out: &mut Vec<u8>) -> Result<()> {
        let rel16 = |target: u32| -> Result<u16> {
            let delta = target as i64 - at as i64;
            i16::try_from(delta).map(|d| d as u16).map_err(|_| {
                ClassError::overflow(format!(
                    "branch at {at} to {target} does not fit a 16-bit offset"
                ))
            })
        };
        let rel32 = |target: u32| (target as i64 - at as i64) as i32;

        put_u8(out, self.opcode());
        match self {
            Instruction::Simple(_) => {}
            Instruction::Bipush(v) => put_u8(out, *v as u8),
            Instruction::Sipush(v) => put_u16(out, *v as u16),
            Instruction::Ldc(i) => put_u8(out, *i),
            Instruction::LdcW(i) | Instruction::Ldc2W(i) => put_u16(out, *i),
            Instruction::Local { opcode, index, wide } => {
                if *wide {
                    out.pop();
                    put_u8(out, WIDE);
                    put_u8(out, *opcode);
                    put_u16(out, *index);
                } else {
                    put_u8(out, narrow(*index)?);
                }
            }
            Instruction::Iinc { index, delta, wide } => {
                if *wide {
                    out.pop();
                    put_u8(out, WIDE);
                    put_u8(out, IINC);
                    put_u16(out, *index);
                    put_u16(out, *delta as u16);
                } else {
                    put_u8(out, narrow(*index)?);
                    let d = i8::try_from(*delta)
                        .map_err(|_| ClassError::overflow("iinc delta needs wide form"))?;
                    put_u8(out, d as u8);
                }
            }
            Instruction::Cp { index, .. } => put_u16(out, *index),
            Instruction::InvokeInterface { index, count } => {
                put_u16(out, *index);
                put_u8(out, *count);
                put_u8(out, 0);
            }
            Instruction::InvokeDynamic { index } => {
                put_u16(out, *index);
                put_u16(out, 0);
            }
            Instruction::NewArray(atype) => put_u8(out, *atype),
            Instruction::MultiANewArray { index, dimensions } => {
                put_u16(out, *index);
                put_u8(out, *dimensions);
            }
            Instruction::Branch { target, .. } => put_u16(out, rel16(*target)?),
            Instruction::BranchWide { target, .. } => put_i32(out, rel32(*target)),
            Instruction::TableSwitch { default, low, high, targets } => {
                out.extend(std::iter::repeat(0).take(switch_padding(at) as usize));
                put_i32(out, rel32(*default));
                put_i32(out, *low);
                put_i32(out, *high);
                for t in targets {
                    put_i32(out, rel32(*t));
                }
            }
            Instruction::LookupSwitch { default, pairs } => {
                out.extend(std::iter::repeat(0).take(switch_padding(at) as usize));
                put_i32(out, rel32(*default));
                put_i32(out, pairs.len() as i32);
                for (key, t) in pairs {
                    put_i32(out, *key);
                    put_i32(out, rel32(*t));
                }
            }
        }
        Ok(())
    }
}

fn narrow(index: u16) -> Result<u8> {
    u8::try_from(index).map_err(|_| ClassError::overflow(format!("local {index} needs wide form")))
}

/// Padding bytes after a switch opcode at `at`.
pub fn switch_padding(at: u32) -> u32 {
    (4 - (at + 1) % 4) % 4
}

fn target(at: u32, rel: i64, code_len: usize) -> Result<u32> {
    let t = at as i64 + rel;
    if t < 0 || t >= code_len as i64 {
        return Err(ClassError::malformed(format!(
            "branch at {at} targets {t} outside code of length {code_len}"
        )));
    }
    Ok(t as u32)
}

/// Decode a whole code array. Branch targets are checked to land on
/// instruction boundaries.
pub fn decode(code: &[u8]) -> Result<Vec<InstructionAt>> {
    let mut r = Reader::new(code);
    let mut out = Vec::new();
    while !r.is_empty() {
        let at = r.position() as u32;
        let op = r.u8()?;
        let instruction = match op {
            BIPUSH => Instruction::Bipush(r.i8()?),
            SIPUSH => Instruction::Sipush(r.i16()?),
            LDC => Instruction::Ldc(r.u8()?),
            LDC_W => Instruction::LdcW(r.u16()?),
            LDC2_W => Instruction::Ldc2W(r.u16()?),
            ILOAD..=ALOAD | ISTORE..=ASTORE | RET => Instruction::Local {
                opcode: op,
                index: r.u8()? as u16,
                wide: false,
            },
            IINC => Instruction::Iinc {
                index: r.u8()? as u16,
                delta: r.i8()? as i16,
                wide: false,
            },
            WIDE => {
                let inner = r.u8()?;
                match inner {
                    ILOAD..=ALOAD | ISTORE..=ASTORE | RET => Instruction::Local {
                        opcode: inner,
                        index: r.u16()?,
                        wide: true,
                    },
                    IINC => Instruction::Iinc {
                        index: r.u16()?,
                        delta: r.i16()?,
                        wide: true,
                    },
                    other => {
                        return Err(ClassError::malformed(format!(
                            "wide prefix on opcode {other:#04x} at {at}"
                        )))
                    }
                }
            }
            GETSTATIC..=INVOKESTATIC | NEW | ANEWARRAY | CHECKCAST | INSTANCEOF => {
                Instruction::Cp { opcode: op, index: r.u16()? }
            }
            INVOKEINTERFACE => {
                let index = r.u16()?;
                let count = r.u8()?;
                r.u8()?;
                Instruction::InvokeInterface { index, count }
            }
            INVOKEDYNAMIC => {
                let index = r.u16()?;
                r.u16()?;
                Instruction::InvokeDynamic { index }
            }
            NEWARRAY => Instruction::NewArray(r.u8()?),
            MULTIANEWARRAY => Instruction::MultiANewArray {
                index: r.u16()?,
                dimensions: r.u8()?,
            },
            IFEQ..=JSR | IFNULL | IFNONNULL => Instruction::Branch {
                opcode: op,
                target: target(at, r.i16()? as i64, code.len())?,
            },
            GOTO_W | JSR_W => Instruction::BranchWide {
                opcode: op,
                target: target(at, r.i32()? as i64, code.len())?,
            },
            TABLESWITCH => {
                r.align4()?;
                let default = target(at, r.i32()? as i64, code.len())?;
                let low = r.i32()?;
                let high = r.i32()?;
                if high < low {
                    return Err(ClassError::malformed(format!(
                        "tableswitch at {at} has high {high} < low {low}"
                    )));
                }
                let count = (high as i64 - low as i64 + 1) as usize;
                if count.saturating_mul(4) > r.remaining() {
                    return Err(ClassError::malformed(format!("tableswitch at {at} truncated")));
                }
                let mut targets = Vec::with_capacity(count);
                for _ in 0..count {
                    targets.push(target(at, r.i32()? as i64, code.len())?);
                }
                Instruction::TableSwitch { default, low, high, targets }
            }
            LOOKUPSWITCH => {
                r.align4()?;
                let default = target(at, r.i32()? as i64, code.len())?;
                let npairs = r.i32()?;
                if npairs < 0 || (npairs as usize).saturating_mul(8) > r.remaining() {
                    return Err(ClassError::malformed(format!(
                        "lookupswitch at {at} has bad pair count {npairs}"
                    )));
                }
                let mut pairs = Vec::with_capacity(npairs as usize);
                for _ in 0..npairs {
                    let key = r.i32()?;
                    pairs.push((key, target(at, r.i32()? as i64, code.len())?));
                }
                Instruction::LookupSwitch { default, pairs }
            }
            _ if fixed_stack_effect(op).is_some() => Instruction::Simple(op),
            _ => {
                return Err(ClassError::malformed(format!(
                    "invalid opcode {op:#04x} at offset {at}"
                )))
            }
        };
        out.push(InstructionAt { offset: at, instruction });
    }

    let boundaries: std::collections::HashSet<u32> = out.iter().map(|i| i.offset).collect();
    for insn in &out {
        for t in insn.instruction.targets() {
            if !boundaries.contains(&t) {
                return Err(ClassError::malformed(format!(
                    "branch at {} targets {t}, which is not an instruction boundary",
                    insn.offset
                )));
            }
        }
    }
    Ok(out)
}

/// Encode an instruction list whose offsets are already laid out.
pub fn encode(instructions: &[InstructionAt]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for insn in instructions {
        if out.len() as u32 != insn.offset {
            return Err(ClassError::malformed(format!(
                "instruction recorded at {} but laid out at {}",
                insn.offset,
                out.len()
            )));
        }
        insn.instruction.encode(insn.offset, &mut out)?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_encode_identity() {
        // iload_1; ifeq +9; iinc 1 1; goto -7; return
        let code = [0x1b, 0x99, 0x00, 0x09, 0x84, 0x01, 0x01, 0xa7, 0xff, 0xf9, 0xb1];
        let insns = decode(&code).unwrap();
        assert_eq!(insns.len(), 5);
        assert_eq!(
            insns[1].instruction,
            Instruction::Branch { opcode: IFEQ, target: 10 }
        );
        assert_eq!(
            insns[3].instruction,
            Instruction::Branch { opcode: GOTO, target: 0 }
        );
        assert_eq!(encode(&insns).unwrap(), code);
    }

    #[test]
    fn test_tableswitch_padding() {
        // iload_0 at 0, tableswitch at 1 (padding 2), low 0 high 0
        let mut code = vec![0x1a, TABLESWITCH, 0, 0];
        code.extend_from_slice(&19i32.to_be_bytes()); // default -> 20
        code.extend_from_slice(&0i32.to_be_bytes());
        code.extend_from_slice(&0i32.to_be_bytes());
        code.extend_from_slice(&19i32.to_be_bytes());
        code.push(RETURN);
        let insns = decode(&code).unwrap();
        assert_eq!(insns[1].instruction.encoded_len(1), 19);
        assert_eq!(insns[2].offset, 20);
        // Moving the switch by four keeps its padding.
        assert_eq!(insns[1].instruction.encoded_len(5), 19);
        assert_eq!(encode(&insns).unwrap(), code);
    }

    #[test]
    fn test_branch_into_middle_is_malformed() {
        // goto +1 lands inside the goto itself
        let code = [0xa7, 0x00, 0x01, 0xb1];
        assert!(matches!(decode(&code), Err(ClassError::MalformedUnit(_))));
    }

    #[test]
    fn test_invalid_opcode_is_malformed() {
        assert!(decode(&[0xcb]).is_err());
        assert!(decode(&[WIDE, NOP]).is_err());
    }

    #[test]
    fn test_wide_local_roundtrip() {
        let code = [WIDE, ILOAD, 0x01, 0x00, POP, RETURN];
        let insns = decode(&code).unwrap();
        assert_eq!(
            insns[0].instruction,
            Instruction::Local { opcode: ILOAD, index: 256, wide: true }
        );
        assert_eq!(encode(&insns).unwrap(), code);
    }

    #[test]
    fn test_short_branch_overflow() {
        let insn = Instruction::Branch { opcode: GOTO, target: 40_000 };
        let mut out = Vec::new();
        assert!(matches!(
            insn.encode(0, &mut out),
            Err(ClassError::EncodingOverflow(_))
        ));
    }
}
