//! Max stack and max locals computation.

use std::collections::HashMap;

use super::code::Code;
use super::constant_pool::ConstantPool;
use super::descriptor::{FieldType, MethodDescriptor};
use super::instruction::Instruction;
use super::opcode::*;
use crate::error::{ClassError, Result};

/// `(pop, push)` of one instruction in stack slots.
fn stack_effect(insn: &Instruction, pool: &ConstantPool) -> Result<(u16, u16)> {
    let invoke = |index: u16, receiver: u16| -> Result<(u16, u16)> {
        let m = pool.member_ref(index)?;
        let d = MethodDescriptor::parse(&m.descriptor)?;
        Ok((d.arg_slots() + receiver, d.ret_slots()))
    };
    let field = |index: u16| -> Result<u16> {
        let m = pool.member_ref(index)?;
        Ok(FieldType::parse(&m.descriptor)?.slots())
    };

    Ok(match insn {
        Instruction::Cp { opcode: GETSTATIC, index } => (0, field(*index)?),
        Instruction::Cp { opcode: PUTSTATIC, index } => (field(*index)?, 0),
        Instruction::Cp { opcode: GETFIELD, index } => (1, field(*index)?),
        Instruction::Cp { opcode: PUTFIELD, index } => (1 + field(*index)?, 0),
        Instruction::Cp { opcode: INVOKEVIRTUAL | INVOKESPECIAL, index } => invoke(*index, 1)?,
        Instruction::Cp { opcode: INVOKESTATIC, index } => invoke(*index, 0)?,
        Instruction::InvokeInterface { index, .. } => invoke(*index, 1)?,
        Instruction::InvokeDynamic { index } => {
            let d = MethodDescriptor::parse(&pool.dynamic_descriptor(*index)?)?;
            (d.arg_slots(), d.ret_slots())
        }
        Instruction::MultiANewArray { dimensions, .. } => (*dimensions as u16, 1),
        other => {
            let op = other.opcode();
            fixed_stack_effect(op)
                .ok_or_else(|| ClassError::malformed(format!("no stack effect for opcode {op:#04x}")))?
        }
    })
}

fn reach(idx: usize, d: u32, depth: &mut [Option<u32>], work: &mut Vec<usize>) {
    if depth[idx].is_none() {
        depth[idx] = Some(d);
        work.push(idx);
    }
}

/// Deepest operand stack any path through the method reaches.
///
/// Worklist over instruction indices; each instruction is visited with
/// the first depth that reaches it. Exception handlers start at depth 1.
pub fn max_stack(code: &Code, pool: &ConstantPool) -> Result<u16> {
    let insns = &code.instructions;
    if insns.is_empty() {
        return Ok(0);
    }
    let index_of: HashMap<u32, usize> =
        insns.iter().enumerate().map(|(i, insn)| (insn.offset, i)).collect();
    let lookup = |offset: u32| -> Result<usize> {
        index_of.get(&offset).copied().ok_or_else(|| {
            ClassError::malformed(format!("offset {offset} is not an instruction boundary"))
        })
    };

    let mut depth: Vec<Option<u32>> = vec![None; insns.len()];
    let mut work: Vec<usize> = Vec::new();
    let mut max = 0u32;

    reach(0, 0, &mut depth, &mut work);
    for h in &code.exception_table {
        reach(lookup(h.handler_pc)?, 1, &mut depth, &mut work);
    }

    while let Some(idx) = work.pop() {
        let before = depth[idx].unwrap_or(0);
        let insn = &insns[idx].instruction;
        let (pop, push) = stack_effect(insn, pool)?;
        let after = before.saturating_sub(pop as u32) + push as u32;
        max = max.max(before).max(after);

        let op = insn.opcode();
        match insn {
            Instruction::Branch { opcode: JSR, target }
            | Instruction::BranchWide { opcode: JSR_W, target } => {
                reach(lookup(*target)?, after, &mut depth, &mut work);
                if idx + 1 < insns.len() {
                    reach(idx + 1, before, &mut depth, &mut work);
                }
                continue;
            }
            _ => {
                for target in insn.targets() {
                    reach(lookup(target)?, after, &mut depth, &mut work);
                }
            }
        }
        if !is_terminal(op) && idx + 1 < insns.len() {
            reach(idx + 1, after, &mut depth, &mut work);
        }
    }

    u16::try_from(max).map_err(|_| ClassError::overflow(format!("max stack {max}")))
}

/// Local slots needed: `this`, the arguments, and every slot an
/// instruction reads or writes.
pub fn max_locals(code: &Code, descriptor: &MethodDescriptor, is_static: bool) -> u16 {
    let mut max = descriptor.arg_slots() as u32 + if is_static { 0 } else { 1 };
    for insn in &code.instructions {
        let touched = match &insn.instruction {
            Instruction::Local { opcode, index, .. } => Some(*index as u32 + local_width(*opcode) as u32),
            Instruction::Iinc { index, .. } => Some(*index as u32 + 1),
            Instruction::Simple(op) => implicit_local(*op).map(|(i, w)| (i + w) as u32),
            _ => None,
        };
        if let Some(end) = touched {
            max = max.max(end);
        }
    }
    max.min(u16::MAX as u32) as u16
}
