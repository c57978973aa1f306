//! Shared fixtures for the facade integration tests.
#![allow(dead_code)]

use jarlock::codec::classfile::code::{Code, CodeAttribute, ExceptionHandler};
use jarlock::codec::classfile::instruction::Instruction;
use jarlock::codec::classfile::opcode::*;
use jarlock::codec::classfile::stackmap::{StackMapFrame, VerificationType};
use jarlock::codec::classfile::{ACC_PUBLIC, ACC_SUPER};
use jarlock::codec::ClassFile;
use jarlock::patch::container::{self, Package};

pub const MAIN: &str = "com/example/Plugin";
pub const LISTENER: &str = "com/example/JoinListener";
pub const UTIL: &str = "com/example/Util";

pub const PLUGIN_YML: &str = "\
name: Example
version: '2.1'
main: com.example.Plugin
commands:
  example:
    description: does things
";

/// `onEnable` with a tableswitch, a handler and a frame table:
///
/// ```text
///  0: iconst_0
///  1: istore_1
///  2: iload_1
///  3: tableswitch 0..1 -> 24, 24, default 24
/// 24: return
/// 25: pop            // handler for [0, 24)
/// 26: return
/// ```
pub fn main_class() -> ClassFile {
    let mut class = ClassFile::new(MAIN, "org/bukkit/plugin/java/JavaPlugin", ACC_PUBLIC | ACC_SUPER, 52).unwrap();
    let throwable = class.constant_pool.add_class("java/lang/Throwable").unwrap();
    let this = class.constant_pool.add_class(MAIN).unwrap();
    let table = class.constant_pool.add_utf8("StackMapTable").unwrap();

    let mut code = Code::from_instructions(vec![
        Instruction::Simple(ICONST_0),
        Instruction::Simple(ISTORE_0 + 1),
        Instruction::Simple(ILOAD_0 + 1),
        Instruction::TableSwitch { default: 24, low: 0, high: 1, targets: vec![24, 24] },
        Instruction::Simple(RETURN),
        Instruction::Simple(POP),
        Instruction::Simple(RETURN),
    ]);
    code.max_stack = 1;
    code.max_locals = 2;
    code.exception_table.push(ExceptionHandler {
        start_pc: 0,
        end_pc: 24,
        handler_pc: 25,
        catch_type: throwable,
    });
    code.attributes.push(CodeAttribute::StackMapTable {
        name_index: table,
        frames: vec![
            StackMapFrame::Append { offset_delta: 24, locals: vec![VerificationType::Integer] },
            StackMapFrame::Full {
                offset_delta: 0,
                locals: vec![VerificationType::Object(this)],
                stack: vec![VerificationType::Object(throwable)],
            },
        ],
    });
    class.add_method(ACC_PUBLIC, "onEnable", "()V", Some(code)).unwrap();
    class.add_method(ACC_PUBLIC, "onDisable", "()V", Some(returning())).unwrap();
    class
}

/// `onJoin` branches on its argument; `onReady` returns a boolean and
/// `onCount` an int.
pub fn listener_class() -> ClassFile {
    let mut class = ClassFile::new(LISTENER, "java/lang/Object", ACC_PUBLIC | ACC_SUPER, 52).unwrap();
    let table = class.constant_pool.add_utf8("StackMapTable").unwrap();
    let mut join = Code::from_instructions(vec![
        Instruction::Simple(ALOAD_0 + 1),
        Instruction::Branch { opcode: IFNULL, target: 5 },
        Instruction::Simple(NOP),
        Instruction::Simple(RETURN),
    ]);
    join.max_stack = 1;
    join.max_locals = 2;
    join.attributes.push(CodeAttribute::StackMapTable {
        name_index: table,
        frames: vec![StackMapFrame::Same { offset_delta: 5 }],
    });
    class
        .add_method(ACC_PUBLIC, "onJoin", "(Lorg/bukkit/event/player/PlayerJoinEvent;)V", Some(join))
        .unwrap();

    let mut ready = Code::from_instructions(vec![Instruction::Simple(ICONST_0 + 1), Instruction::Simple(IRETURN)]);
    ready.max_stack = 1;
    ready.max_locals = 1;
    class.add_method(ACC_PUBLIC, "onReady", "()Z", Some(ready)).unwrap();

    let mut count = Code::from_instructions(vec![Instruction::Bipush(7), Instruction::Simple(IRETURN)]);
    count.max_stack = 1;
    count.max_locals = 1;
    class.add_method(ACC_PUBLIC, "onCount", "()I", Some(count)).unwrap();
    class
}

/// Not a listener or command holder; must never be touched.
pub fn util_class() -> ClassFile {
    let mut class = ClassFile::new(UTIL, "java/lang/Object", ACC_PUBLIC | ACC_SUPER, 52).unwrap();
    class.add_method(ACC_PUBLIC, "onLoad", "()V", Some(returning())).unwrap();
    class
}

fn returning() -> Code {
    let mut code = Code::from_instructions(vec![Instruction::Simple(RETURN)]);
    code.max_locals = 1;
    code
}

pub fn entry_name(internal: &str) -> String {
    format!("{internal}.class")
}

/// The example plugin with a signature, a manifest and a resource.
pub fn plugin_jar() -> Vec<u8> {
    let main = main_class().encode().unwrap();
    let listener = listener_class().encode().unwrap();
    let util = util_class().encode().unwrap();
    let jar = container::build([
        ("META-INF/MANIFEST.MF", b"Manifest-Version: 1.0\r\n\r\n".as_slice()),
        ("META-INF/EXAMPLE.SF", b"Signature-Version: 1.0\r\n".as_slice()),
        ("META-INF/EXAMPLE.RSA", [0x30u8, 0x82].as_slice()),
        ("plugin.yml", PLUGIN_YML.as_bytes()),
        ("config.yml", b"greeting: hello\n".as_slice()),
        (entry_name(MAIN).as_str(), main.as_slice()),
        (entry_name(LISTENER).as_str(), listener.as_slice()),
        (entry_name(UTIL).as_str(), util.as_slice()),
    ])
    .unwrap();
    jar
}

pub fn read_entry(jar: &[u8], path: &str) -> Vec<u8> {
    let mut package = Package::open(jar.to_vec()).unwrap();
    package.read(path).unwrap()
}

pub fn read_class(jar: &[u8], internal: &str) -> ClassFile {
    ClassFile::decode(&read_entry(jar, &entry_name(internal))).unwrap()
}

pub fn method_code<'a>(class: &'a ClassFile, name: &str, descriptor: &str) -> &'a Code {
    let index = class.find_method(name, descriptor).unwrap();
    class.methods[index].code().unwrap()
}

// ─── Prologue walker ─────────────────────────────────────────

/// Where control goes after the prologue when the gate answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Fell into the original body at `offset` with an empty stack.
    Entered { offset: u32 },
    /// Left the method with this return opcode.
    Exited { opcode: u8 },
}

/// Short-form `xload_n` / `xstore_n`.
fn is_local_access(op: u8) -> bool {
    (0x1a..=0x2d).contains(&op) || (0x3b..=0x4e).contains(&op)
}

/// Run `code` from offset 0 with the gate answering `gate`, stopping at
/// the first return or at `body_start`. Only the instructions a prologue
/// uses are understood; any load, store or `iinc` fails the run.
pub fn run_prologue(class: &ClassFile, code: &Code, body_start: u32, gate: bool) -> Outcome {
    let mut stack: Vec<i64> = Vec::new();
    let mut pc = 0u32;
    for _ in 0..64 {
        if pc >= body_start {
            assert!(stack.is_empty(), "stack not empty entering body: {stack:?}");
            return Outcome::Entered { offset: pc };
        }
        let insn = code
            .instructions
            .iter()
            .find(|i| i.offset == pc)
            .unwrap_or_else(|| panic!("no instruction at {pc}"));
        let next = pc + insn.instruction.encoded_len(pc);
        match &insn.instruction {
            Instruction::Simple(NOP) => {}
            Instruction::Simple(POP) => {
                stack.pop().unwrap();
            }
            Instruction::Simple(op) if (ICONST_0..=ICONST_0 + 5).contains(op) => {
                stack.push(i64::from(op - ICONST_0));
            }
            Instruction::Simple(ACONST_NULL | LCONST_0 | FCONST_0 | DCONST_0) => stack.push(0),
            Instruction::Simple(op @ (RETURN | IRETURN | LRETURN | FRETURN | DRETURN | ARETURN)) => {
                return Outcome::Exited { opcode: *op };
            }
            Instruction::Cp { opcode: INVOKESTATIC, index } => {
                let r = class.constant_pool.member_ref(*index).unwrap();
                assert_eq!(
                    (r.class.as_str(), r.name.as_str(), r.descriptor.as_str()),
                    ("jarlock/runtime/LicenseGate", "check", "()Z")
                );
                stack.push(i64::from(gate));
            }
            Instruction::Branch { opcode: IFNE, target } => {
                if stack.pop().unwrap() != 0 {
                    pc = *target;
                    continue;
                }
            }
            Instruction::Branch { opcode: IFEQ, target } => {
                if stack.pop().unwrap() == 0 {
                    pc = *target;
                    continue;
                }
            }
            Instruction::Local { .. } | Instruction::Iinc { .. } => {
                panic!("prologue touches locals at {pc}: {:?}", insn.instruction)
            }
            Instruction::Simple(op) if is_local_access(*op) => {
                panic!("prologue touches locals at {pc}: opcode {op:#x}")
            }
            other => panic!("unexpected prologue instruction at {pc}: {other:?}"),
        }
        pc = next;
    }
    panic!("prologue did not terminate");
}
