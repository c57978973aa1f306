//! Method prologue injection.
//!
//! Early-return shape:
//!
//! ```text
//! nop*                      ; pads the prologue to a multiple of 4
//! invokestatic gate.check()Z
//! ifne L
//! <exit>                    ; return, or a default value and xreturn
//! L: <original code>
//! ```
//!
//! Call-only shape: `nop*; invokestatic gate.check()Z; pop`.
//!
//! Because the prologue length is a multiple of four, switch padding in the
//! original body is unchanged and every original offset moves by exactly
//! the prologue length.

use jarlock_core::classfile::code::Code;
use jarlock_core::classfile::descriptor::{FieldType, MethodDescriptor};
use jarlock_core::classfile::instruction::Instruction;
use jarlock_core::classfile::opcode::*;
use jarlock_core::classfile::stackmap::{self, FrameState};
use jarlock_core::{ClassError, ClassFile, PrologueShape};
use tracing::trace;

use super::{GATE_CLASS, GATE_DESCRIPTOR, GATE_METHOD};

#[derive(Debug, thiserror::Error)]
pub enum InjectError {
    #[error("cannot exit early from a method returning {0}; approximate defaults are disabled")]
    UnsupportedReturnShape(String),

    #[error("method already calls the license gate")]
    AlreadyInjected,

    #[error("method has no code")]
    NoCode,

    #[error(transparent)]
    Class(#[from] ClassError),
}

impl InjectError {
    /// Per-target failures the patcher skips instead of aborting on.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, InjectError::UnsupportedReturnShape(_) | InjectError::AlreadyInjected)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrologueOptions {
    pub shape: PrologueShape,
    /// Allow early exits that return a zero value the caller may not expect.
    pub approximate_defaults: bool,
}

/// Instructions that leave a method returning `ret` with a default value.
pub fn exit_sequence(ret: Option<&FieldType>, approximate_defaults: bool) -> Result<Vec<Instruction>, InjectError> {
    use Instruction::Simple;
    let seq = match ret {
        None => vec![Simple(RETURN)],
        Some(FieldType::Boolean) => vec![Simple(ICONST_0), Simple(IRETURN)],
        Some(other) if !approximate_defaults => {
            return Err(InjectError::UnsupportedReturnShape(other.to_string()));
        }
        Some(FieldType::Long) => vec![Simple(LCONST_0), Simple(LRETURN)],
        Some(FieldType::Float) => vec![Simple(FCONST_0), Simple(FRETURN)],
        Some(FieldType::Double) => vec![Simple(DCONST_0), Simple(DRETURN)],
        Some(t) if t.is_reference() => vec![Simple(ACONST_NULL), Simple(ARETURN)],
        Some(_) => vec![Simple(ICONST_0), Simple(IRETURN)],
    };
    Ok(seq)
}

/// Whether `code` already starts (after any padding) with the gate call.
pub fn calls_gate_first(class: &ClassFile, code: &Code) -> bool {
    let first = code
        .instructions
        .iter()
        .find(|i| i.instruction != Instruction::Simple(NOP));
    match first.map(|i| &i.instruction) {
        Some(Instruction::Cp { opcode: INVOKESTATIC, index }) => class
            .constant_pool
            .member_ref(*index)
            .is_ok_and(|r| r.class == GATE_CLASS && r.name == GATE_METHOD && r.descriptor == GATE_DESCRIPTOR),
        _ => false,
    }
}

/// Prologue body for `shape`, padded to a multiple of four bytes. The
/// branch targets the first byte after the prologue.
pub fn build_prologue(gate_ref: u16, shape: PrologueShape, exit: Vec<Instruction>) -> Vec<Instruction> {
    let call = Instruction::Cp { opcode: INVOKESTATIC, index: gate_ref };
    let body_len = |tail: &[Instruction]| 3 + tail.iter().map(|i| i.encoded_len(0)).sum::<u32>();
    match shape {
        PrologueShape::CallOnly => {
            let tail = vec![Instruction::Simple(POP)];
            pad(call, tail.clone(), body_len(&tail))
        }
        PrologueShape::EarlyReturn => {
            let len = body_len(&exit) + 3;
            let padded = len + padding(len);
            let mut tail = vec![Instruction::Branch { opcode: IFNE, target: padded }];
            tail.extend(exit);
            pad(call, tail, len)
        }
    }
}

fn padding(len: u32) -> u32 {
    (4 - len % 4) % 4
}

fn pad(call: Instruction, tail: Vec<Instruction>, len: u32) -> Vec<Instruction> {
    let mut out: Vec<Instruction> = (0..padding(len)).map(|_| Instruction::Simple(NOP)).collect();
    out.push(call);
    out.extend(tail);
    out
}

/// Insert the gate prologue into method `method_index` of `class`.
/// Returns the number of bytes inserted.
pub fn inject(class: &mut ClassFile, method_index: usize, options: PrologueOptions) -> Result<u32, InjectError> {
    let method = &class.methods[method_index];
    let name = class.method_name(method)?;
    let descriptor = MethodDescriptor::parse(&class.method_descriptor(method)?)?;
    let is_static = method.is_static();
    let code = method.code().ok_or(InjectError::NoCode)?;
    if calls_gate_first(class, code) {
        return Err(InjectError::AlreadyInjected);
    }
    let exit = match options.shape {
        PrologueShape::EarlyReturn => exit_sequence(descriptor.ret.as_ref(), options.approximate_defaults)?,
        PrologueShape::CallOnly => Vec::new(),
    };
    let had_frames = code.stack_map().is_some();

    let class_name = class.name()?;
    let pool = &mut class.constant_pool;
    let gate_ref = pool.add_method_ref(GATE_CLASS, GATE_METHOD, GATE_DESCRIPTOR)?;
    let prologue = build_prologue(gate_ref, options.shape, exit);

    let frames_needed = class.major_version >= jarlock_core::classfile::STACK_MAP_MAJOR
        && (had_frames || options.shape == PrologueShape::EarlyReturn);
    let (initial, table_name) = if frames_needed {
        let initial = stackmap::initial_locals(pool, &class_name, is_static, &name, &descriptor)?;
        (initial, pool.add_utf8("StackMapTable")?)
    } else {
        (Vec::new(), 0)
    };

    let code = class.methods[method_index].code_mut().ok_or(InjectError::NoCode)?;
    let len = code.insert_at(0, prologue)?;
    if frames_needed {
        let old = code.stack_map().map(<[_]>::to_vec).unwrap_or_default();
        let live = match options.shape {
            PrologueShape::EarlyReturn => Some(FrameState::entry(initial.clone())),
            PrologueShape::CallOnly => None,
        };
        let frames = stackmap::splice_frames(&old, &initial, 0, len, live.as_ref())?;
        code.set_stack_map(table_name, frames);
    }
    trace!(class = %class_name, method = %name, len, "prologue inserted");
    Ok(len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jarlock_core::classfile::code::{CodeAttribute, CodeBuilder, ExceptionHandler};
    use jarlock_core::classfile::stackmap::{StackMapFrame, VerificationType};
    use jarlock_core::classfile::{ACC_PUBLIC, ACC_STATIC, ACC_SUPER};

    fn class_with(descriptor: &str, flags: u16, code: Code, major: u16) -> ClassFile {
        let mut class = ClassFile::new("p/L", "java/lang/Object", ACC_PUBLIC | ACC_SUPER, major).unwrap();
        class.add_method(ACC_PUBLIC | flags, "onEvent", descriptor, Some(code)).unwrap();
        class
    }

    fn early() -> PrologueOptions {
        PrologueOptions { shape: PrologueShape::EarlyReturn, approximate_defaults: false }
    }

    fn ops(code: &Code) -> Vec<(u32, u8)> {
        code.instructions.iter().map(|i| (i.offset, i.instruction.opcode())).collect()
    }

    #[test]
    fn test_void_prologue_layout() {
        let mut class = class_with("()V", 0, Code::from_instructions(vec![Instruction::Simple(RETURN)]), 52);
        let len = inject(&mut class, 0, early()).unwrap();
        assert_eq!(len, 8);
        let code = class.methods[0].code().unwrap();
        assert_eq!(
            ops(code),
            [(0, NOP), (1, INVOKESTATIC), (4, IFNE), (7, RETURN), (8, RETURN)]
        );
        assert_eq!(code.instructions[2].instruction, Instruction::Branch { opcode: IFNE, target: 8 });
        // One frame at the original first instruction with the entry locals.
        let frames = code.stack_map().unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].offset_delta(), 8);
        assert!(matches!(frames[0], StackMapFrame::Same { .. }));
    }

    #[test]
    fn test_boolean_exit() {
        let body = Code::from_instructions(vec![Instruction::Simple(ICONST_0), Instruction::Simple(IRETURN)]);
        let mut class = class_with("(Ljava/lang/String;)Z", ACC_STATIC, body, 52);
        let len = inject(&mut class, 0, early()).unwrap();
        // 3 + 3 + 2 bytes is already aligned.
        assert_eq!(len, 8);
        let code = class.methods[0].code().unwrap();
        let tail: Vec<u8> = code.instructions.iter().map(|i| i.instruction.opcode()).collect();
        assert_eq!(tail, [INVOKESTATIC, IFNE, ICONST_0, IRETURN, ICONST_0, IRETURN]);
        assert_eq!(code.instructions[1].instruction, Instruction::Branch { opcode: IFNE, target: 8 });
    }

    #[test]
    fn test_int_return_needs_approximate_defaults() {
        let body = Code::from_instructions(vec![Instruction::Simple(ICONST_0), Instruction::Simple(IRETURN)]);
        let mut class = class_with("()I", 0, body, 52);
        let before = class.clone();
        assert!(matches!(inject(&mut class, 0, early()), Err(InjectError::UnsupportedReturnShape(_))));
        assert_eq!(class, before);

        let options = PrologueOptions { approximate_defaults: true, ..early() };
        inject(&mut class, 0, options).unwrap();
        let code = class.methods[0].code().unwrap();
        assert!(code.instructions.iter().any(|i| i.instruction == Instruction::Simple(IRETURN)));
    }

    #[test]
    fn test_exit_sequences() {
        assert_eq!(
            exit_sequence(Some(&FieldType::Double), true).unwrap(),
            [Instruction::Simple(DCONST_0), Instruction::Simple(DRETURN)]
        );
        assert_eq!(
            exit_sequence(Some(&FieldType::Object("java/lang/String".into())), true).unwrap(),
            [Instruction::Simple(ACONST_NULL), Instruction::Simple(ARETURN)]
        );
        assert!(exit_sequence(Some(&FieldType::Long), false).is_err());
    }

    #[test]
    fn test_call_only_keeps_frames_untouched_without_table() {
        let mut class = class_with("()V", 0, Code::from_instructions(vec![Instruction::Simple(RETURN)]), 52);
        let options = PrologueOptions { shape: PrologueShape::CallOnly, approximate_defaults: false };
        let len = inject(&mut class, 0, options).unwrap();
        assert_eq!(len, 4);
        let code = class.methods[0].code().unwrap();
        assert_eq!(ops(code), [(0, INVOKESTATIC), (3, POP), (4, RETURN)]);
        assert!(code.stack_map().is_none());
    }

    #[test]
    fn test_branches_handlers_and_frames_shift() {
        // iload_1; ifeq L; return; L: return   with a handler over [0, 4)
        let mut b = CodeBuilder::new();
        let l = b.label();
        b.op(ILOAD_0 + 1).jump(IFEQ, l).op(RETURN).bind(l).op(RETURN);
        let (mut code, labels) = b.build().unwrap();
        code.exception_table.push(ExceptionHandler { start_pc: 0, end_pc: 4, handler_pc: 5, catch_type: 0 });
        let mut class = class_with("(I)V", 0, code, 52);
        let table = class.constant_pool.add_utf8("StackMapTable").unwrap();
        class.methods[0]
            .code_mut()
            .unwrap()
            .attributes
            .push(CodeAttribute::StackMapTable { name_index: table, frames: vec![StackMapFrame::Same { offset_delta: labels[0] as u16 }] });

        let len = inject(&mut class, 0, early()).unwrap();
        let code = class.methods[0].code().unwrap();
        assert_eq!(code.instructions[5].instruction, Instruction::Branch { opcode: IFEQ, target: labels[0] + len });
        assert_eq!(code.exception_table[0].start_pc, len);
        assert_eq!(code.exception_table[0].handler_pc, 5 + len);

        let this = class.constant_pool.find_class("p/L").unwrap();
        let initial = vec![VerificationType::Object(this), VerificationType::Integer];
        let states = stackmap::expand(code.stack_map().unwrap(), &initial).unwrap();
        let offsets: Vec<u32> = states.iter().map(|(o, _)| *o).collect();
        assert_eq!(offsets, [len, labels[0] + len]);
    }

    #[test]
    fn test_second_injection_is_refused() {
        let mut class = class_with("()V", 0, Code::from_instructions(vec![Instruction::Simple(RETURN)]), 52);
        inject(&mut class, 0, early()).unwrap();
        assert!(matches!(inject(&mut class, 0, early()), Err(InjectError::AlreadyInjected)));
    }

    #[test]
    fn test_old_classes_get_no_frames() {
        let mut class = class_with("()V", 0, Code::from_instructions(vec![Instruction::Simple(RETURN)]), 49);
        inject(&mut class, 0, early()).unwrap();
        assert!(class.methods[0].code().unwrap().stack_map().is_none());
    }
}
