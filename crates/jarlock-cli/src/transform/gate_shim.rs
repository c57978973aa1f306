//! The synthesized `LicenseGate` class.
//!
//! ```java
//! public final class LicenseGate {
//!     private static LicenseClient client;
//!     public static volatile boolean limited;
//!     private LicenseGate() {}
//!     public static synchronized boolean check() {
//!         if (client == null) {
//!             try { client = LicenseClient.fromResource("license.properties"); }
//!             catch (Throwable t) { return false; }  // enforcing modes
//!             // limited mode: catch (Throwable t) { limited = true; return true; }
//!         }
//!         return client.validate();            // enforcing modes
//!         // limited mode: limited = !client.validate(); return true;
//!     }
//! }
//! ```

use jarlock_core::classfile::code::{Code, CodeAttribute, CodeBuilder, ExceptionHandler};
use jarlock_core::classfile::instruction::Instruction;
use jarlock_core::classfile::opcode::*;
use jarlock_core::classfile::stackmap::{self, FrameState, VerificationType};
use jarlock_core::classfile::{
    ACC_FINAL, ACC_PRIVATE, ACC_PUBLIC, ACC_STATIC, ACC_SUPER, ACC_SYNCHRONIZED, ACC_VOLATILE,
};
use jarlock_core::policy::PROPERTIES_PATH;
use jarlock_core::{ClassError, ClassFile, FailureMode, PrologueShape};

use super::{CLIENT_CLASS, GATE_CLASS, GATE_DESCRIPTOR, GATE_METHOD};

/// Java 8; old enough for every plugin host still in use.
pub const GATE_MAJOR: u16 = 52;

const CLIENT_FIELD: &str = "client";
const LIMITED_FIELD: &str = "limited";

/// Build the gate class for `mode` and return its encoded bytes.
pub fn build(mode: FailureMode) -> Result<Vec<u8>, ClassError> {
    gate_class(mode)?.encode()
}

pub fn gate_class(mode: FailureMode) -> Result<ClassFile, ClassError> {
    let mut class = ClassFile::new(GATE_CLASS, "java/lang/Object", ACC_PUBLIC | ACC_FINAL | ACC_SUPER, GATE_MAJOR)?;
    let client_desc = format!("L{CLIENT_CLASS};");
    class.add_field(ACC_PRIVATE | ACC_STATIC, CLIENT_FIELD, &client_desc)?;
    class.add_field(ACC_PUBLIC | ACC_STATIC | ACC_VOLATILE, LIMITED_FIELD, "Z")?;

    let ctor = constructor(&mut class)?;
    class.add_method(ACC_PRIVATE, "<init>", "()V", Some(ctor))?;
    let check = check_body(&mut class, mode)?;
    class.add_method(
        ACC_PUBLIC | ACC_STATIC | ACC_SYNCHRONIZED,
        GATE_METHOD,
        GATE_DESCRIPTOR,
        Some(check),
    )?;
    Ok(class)
}

fn constructor(class: &mut ClassFile) -> Result<Code, ClassError> {
    let super_init = class.constant_pool.add_method_ref("java/lang/Object", "<init>", "()V")?;
    let mut b = CodeBuilder::new();
    b.op(ALOAD_0)
        .push(Instruction::Cp { opcode: INVOKESPECIAL, index: super_init })
        .op(RETURN);
    Ok(b.build()?.0)
}

fn ldc(index: u16) -> Instruction {
    match u8::try_from(index) {
        Ok(i) => Instruction::Ldc(i),
        Err(_) => Instruction::LdcW(index),
    }
}

fn check_body(class: &mut ClassFile, mode: FailureMode) -> Result<Code, ClassError> {
    let pool = &mut class.constant_pool;
    let client_desc = format!("L{CLIENT_CLASS};");
    let client = pool.add_field_ref(GATE_CLASS, CLIENT_FIELD, &client_desc)?;
    let limited = pool.add_field_ref(GATE_CLASS, LIMITED_FIELD, "Z")?;
    let resource = pool.add_string(PROPERTIES_PATH)?;
    let from_resource = pool.add_method_ref(
        CLIENT_CLASS,
        "fromResource",
        &format!("(Ljava/lang/String;){client_desc}"),
    )?;
    let validate = pool.add_method_ref(CLIENT_CLASS, "validate", "()Z")?;
    let throwable = pool.add_class("java/lang/Throwable")?;
    let table_name = pool.add_utf8("StackMapTable")?;

    let get_client = Instruction::Cp { opcode: GETSTATIC, index: client };
    let limited_mode = mode.shape() == PrologueShape::CallOnly;
    let mut b = CodeBuilder::new();
    let (try_start, try_end, handler, have) = (b.label(), b.label(), b.label(), b.label());
    b.push(get_client.clone())
        .jump(IFNONNULL, have)
        .bind(try_start)
        .push(ldc(resource))
        .push(Instruction::Cp { opcode: INVOKESTATIC, index: from_resource })
        .push(Instruction::Cp { opcode: PUTSTATIC, index: client })
        .bind(try_end)
        .jump(GOTO, have)
        .bind(handler)
        .op(POP);
    if limited_mode {
        // No client means no verdict; the plugin still runs, flagged.
        b.op(ICONST_0 + 1)
            .push(Instruction::Cp { opcode: PUTSTATIC, index: limited })
            .op(ICONST_0 + 1)
            .op(IRETURN);
    } else {
        b.op(ICONST_0).op(IRETURN);
    }
    b.bind(have)
        .push(get_client)
        .push(Instruction::Cp { opcode: INVOKEVIRTUAL, index: validate });

    if limited_mode {
        // limited = !valid; return true
        let (valid, store) = (b.label(), b.label());
        b.jump(IFNE, valid)
            .op(ICONST_0 + 1)
            .jump(GOTO, store)
            .bind(valid)
            .op(ICONST_0)
            .bind(store)
            .push(Instruction::Cp { opcode: PUTSTATIC, index: limited })
            .op(ICONST_0 + 1)
            .op(IRETURN);
    } else {
        b.op(IRETURN);
    }

    // Label offsets come back in creation order: try_start, try_end,
    // handler, have, then valid and store in limited mode.
    let (mut code, offsets) = b.build()?;
    code.exception_table.push(ExceptionHandler {
        start_pc: offsets[0],
        end_pc: offsets[1],
        handler_pc: offsets[2],
        catch_type: throwable,
    });

    let empty = FrameState::entry(Vec::new());
    let mut states = vec![
        (
            offsets[2],
            FrameState { locals: Vec::new(), stack: vec![VerificationType::Object(throwable)] },
        ),
        (offsets[3], empty.clone()),
    ];
    if limited_mode {
        states.push((offsets[4], empty));
        states.push((
            offsets[5],
            FrameState { locals: Vec::new(), stack: vec![VerificationType::Integer] },
        ));
    }
    let frames = stackmap::compress(&states, &[], &[])?;
    code.attributes.push(CodeAttribute::StackMapTable { name_index: table_name, frames });
    Ok(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jarlock_core::classfile::stackmap::StackMapFrame;

    fn check_code(class: &ClassFile) -> &Code {
        let m = class.find_method(GATE_METHOD, GATE_DESCRIPTOR).unwrap();
        class.methods[m].code().unwrap()
    }

    #[test]
    fn test_gate_shape() {
        let class = gate_class(FailureMode::DisableOnly).unwrap();
        assert_eq!(class.name().unwrap(), GATE_CLASS);
        assert_eq!(class.major_version, GATE_MAJOR);
        assert_eq!(class.fields.len(), 2);
        let m = class.find_method(GATE_METHOD, GATE_DESCRIPTOR).unwrap();
        assert_eq!(class.methods[m].access_flags, ACC_PUBLIC | ACC_STATIC | ACC_SYNCHRONIZED);
        assert!(class.find_method("<init>", "()V").is_some());
    }

    #[test]
    fn test_enforcing_gate_frames() {
        let class = gate_class(FailureMode::DenyOnError).unwrap();
        let code = check_code(&class);
        let h = &code.exception_table[0];
        assert_eq!((h.start_pc, h.end_pc, h.handler_pc), (6, 14, 17));
        let frames = code.stack_map().unwrap();
        assert!(matches!(frames[0], StackMapFrame::SameLocals1StackItem { offset_delta: 17, .. }));
        assert_eq!(frames[1], StackMapFrame::Same { offset_delta: 2 });
        assert_eq!(code.instructions.last().unwrap().instruction, Instruction::Simple(IRETURN));
    }

    #[test]
    fn test_limited_gate_records_verdict() {
        let class = gate_class(FailureMode::LimitedMode).unwrap();
        let code = check_code(&class);
        let limited = class.constant_pool.clone().add_field_ref(GATE_CLASS, LIMITED_FIELD, "Z").unwrap();
        assert!(code.instructions.iter().any(|i| matches!(
            i.instruction,
            Instruction::Cp { opcode: PUTSTATIC, index } if index == limited
        )));
        assert_eq!(code.stack_map().unwrap().len(), 4);
    }

    /// What `LicenseClient` does when the gate reaches it.
    #[derive(Clone, Copy)]
    enum Client {
        /// `fromResource` throws.
        Missing,
        /// `validate()` answers this.
        Answers(bool),
    }

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Value {
        Int(i32),
        Null,
        Client,
        Text,
        Throwable,
    }

    /// Run `check()` once from a cold gate. Returns its result and the
    /// `limited` flag afterwards.
    fn run_check(class: &ClassFile, client: Client) -> (bool, bool) {
        let code = check_code(class);
        let pool = &class.constant_pool;
        let mut client_field = Value::Null;
        let mut limited = false;
        let mut stack: Vec<Value> = Vec::new();
        let mut pc = 0u32;
        for _ in 0..64 {
            let insn = code.instructions.iter().find(|i| i.offset == pc).unwrap();
            let next = pc + insn.instruction.encoded_len(pc);
            match &insn.instruction {
                Instruction::Simple(POP) => {
                    stack.pop().unwrap();
                }
                Instruction::Simple(op @ ICONST_0..=ICONST_5) => stack.push(Value::Int(i32::from(op - ICONST_0))),
                Instruction::Simple(IRETURN) => {
                    assert_eq!(stack.len(), 1, "stack at return: {stack:?}");
                    return (stack[0] == Value::Int(1), limited);
                }
                Instruction::Ldc(_) | Instruction::LdcW(_) => stack.push(Value::Text),
                Instruction::Cp { opcode: GETSTATIC, index } => {
                    assert_eq!(pool.member_ref(*index).unwrap().name, CLIENT_FIELD);
                    stack.push(client_field);
                }
                Instruction::Cp { opcode: PUTSTATIC, index } => {
                    let value = stack.pop().unwrap();
                    match pool.member_ref(*index).unwrap().name.as_str() {
                        CLIENT_FIELD => client_field = value,
                        LIMITED_FIELD => limited = value == Value::Int(1),
                        other => panic!("store to {other}"),
                    }
                }
                Instruction::Cp { opcode: INVOKESTATIC, index } => {
                    assert_eq!(pool.member_ref(*index).unwrap().name, "fromResource");
                    assert_eq!(stack.pop(), Some(Value::Text));
                    match client {
                        Client::Missing => {
                            let h = code
                                .exception_table
                                .iter()
                                .find(|h| h.start_pc <= pc && pc < h.end_pc)
                                .unwrap();
                            stack = vec![Value::Throwable];
                            pc = h.handler_pc;
                            continue;
                        }
                        Client::Answers(_) => stack.push(Value::Client),
                    }
                }
                Instruction::Cp { opcode: INVOKEVIRTUAL, index } => {
                    assert_eq!(pool.member_ref(*index).unwrap().name, "validate");
                    assert_eq!(stack.pop(), Some(Value::Client));
                    let Client::Answers(valid) = client else { panic!("validate without a client") };
                    stack.push(Value::Int(i32::from(valid)));
                }
                Instruction::Branch { opcode, target } => {
                    let taken = match *opcode {
                        GOTO => true,
                        IFNONNULL => stack.pop().unwrap() != Value::Null,
                        IFNE => stack.pop().unwrap() != Value::Int(0),
                        other => panic!("branch opcode {other:#x}"),
                    };
                    if taken {
                        pc = *target;
                        continue;
                    }
                }
                other => panic!("unexpected instruction at {pc}: {other:?}"),
            }
            pc = next;
        }
        panic!("check() did not return");
    }

    #[test]
    fn test_check_behaviour_per_mode() {
        for mode in FailureMode::ALL {
            let class = gate_class(mode).unwrap();
            let limited_mode = mode == FailureMode::LimitedMode;
            let expect = |valid: bool| if limited_mode { (true, !valid) } else { (valid, false) };
            assert_eq!(run_check(&class, Client::Answers(true)), expect(true), "{mode} valid");
            assert_eq!(run_check(&class, Client::Answers(false)), expect(false), "{mode} invalid");
            assert_eq!(run_check(&class, Client::Missing), expect(false), "{mode} no client");
        }
    }

    #[test]
    fn test_limited_gate_handler_frame() {
        let class = gate_class(FailureMode::LimitedMode).unwrap();
        let code = check_code(&class);
        let h = &code.exception_table[0];
        assert_eq!((h.start_pc, h.end_pc, h.handler_pc), (6, 14, 17));
        let frames = code.stack_map().unwrap();
        assert!(matches!(frames[0], StackMapFrame::SameLocals1StackItem { offset_delta: 17, .. }));
        // pop, iconst_1, putstatic, iconst_1, ireturn
        assert_eq!(frames[1], StackMapFrame::Same { offset_delta: 6 });
    }

    #[test]
    fn test_gate_encodes_and_decodes() {
        for mode in FailureMode::ALL {
            let bytes = build(mode).unwrap();
            let back = ClassFile::decode(&bytes).unwrap();
            assert_eq!(back.encode().unwrap(), bytes);
        }
    }
}
