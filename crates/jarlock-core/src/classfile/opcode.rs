//! JVM opcode constants and fixed stack effects.

#![allow(missing_docs)]

pub const NOP: u8 = 0x00;
pub const ACONST_NULL: u8 = 0x01;
pub const ICONST_M1: u8 = 0x02;
pub const ICONST_0: u8 = 0x03;
pub const ICONST_5: u8 = 0x08;
pub const LCONST_0: u8 = 0x09;
pub const LCONST_1: u8 = 0x0a;
pub const FCONST_0: u8 = 0x0b;
pub const FCONST_2: u8 = 0x0d;
pub const DCONST_0: u8 = 0x0e;
pub const DCONST_1: u8 = 0x0f;
pub const BIPUSH: u8 = 0x10;
pub const SIPUSH: u8 = 0x11;
pub const LDC: u8 = 0x12;
pub const LDC_W: u8 = 0x13;
pub const LDC2_W: u8 = 0x14;
pub const ILOAD: u8 = 0x15;
pub const LLOAD: u8 = 0x16;
pub const FLOAD: u8 = 0x17;
pub const DLOAD: u8 = 0x18;
pub const ALOAD: u8 = 0x19;
pub const ILOAD_0: u8 = 0x1a;
pub const ALOAD_0: u8 = 0x2a;
pub const ALOAD_3: u8 = 0x2d;
pub const IALOAD: u8 = 0x2e;
pub const SALOAD: u8 = 0x35;
pub const ISTORE: u8 = 0x36;
pub const LSTORE: u8 = 0x37;
pub const FSTORE: u8 = 0x38;
pub const DSTORE: u8 = 0x39;
pub const ASTORE: u8 = 0x3a;
pub const ISTORE_0: u8 = 0x3b;
pub const ASTORE_3: u8 = 0x4e;
pub const IASTORE: u8 = 0x4f;
pub const SASTORE: u8 = 0x56;
pub const POP: u8 = 0x57;
pub const POP2: u8 = 0x58;
pub const DUP: u8 = 0x59;
pub const SWAP: u8 = 0x5f;
pub const IADD: u8 = 0x60;
pub const IINC: u8 = 0x84;
pub const LCMP: u8 = 0x94;
pub const IFEQ: u8 = 0x99;
pub const IFNE: u8 = 0x9a;
pub const IFLE: u8 = 0x9e;
pub const IF_ICMPEQ: u8 = 0x9f;
pub const IF_ACMPNE: u8 = 0xa6;
pub const GOTO: u8 = 0xa7;
pub const JSR: u8 = 0xa8;
pub const RET: u8 = 0xa9;
pub const TABLESWITCH: u8 = 0xaa;
pub const LOOKUPSWITCH: u8 = 0xab;
pub const IRETURN: u8 = 0xac;
pub const LRETURN: u8 = 0xad;
pub const FRETURN: u8 = 0xae;
pub const DRETURN: u8 = 0xaf;
pub const ARETURN: u8 = 0xb0;
pub const RETURN: u8 = 0xb1;
pub const GETSTATIC: u8 = 0xb2;
pub const PUTSTATIC: u8 = 0xb3;
pub const GETFIELD: u8 = 0xb4;
pub const PUTFIELD: u8 = 0xb5;
pub const INVOKEVIRTUAL: u8 = 0xb6;
pub const INVOKESPECIAL: u8 = 0xb7;
pub const INVOKESTATIC: u8 = 0xb8;
pub const INVOKEINTERFACE: u8 = 0xb9;
pub const INVOKEDYNAMIC: u8 = 0xba;
pub const NEW: u8 = 0xbb;
pub const NEWARRAY: u8 = 0xbc;
pub const ANEWARRAY: u8 = 0xbd;
pub const ARRAYLENGTH: u8 = 0xbe;
pub const ATHROW: u8 = 0xbf;
pub const CHECKCAST: u8 = 0xc0;
pub const INSTANCEOF: u8 = 0xc1;
pub const MONITORENTER: u8 = 0xc2;
pub const MONITOREXIT: u8 = 0xc3;
pub const WIDE: u8 = 0xc4;
pub const MULTIANEWARRAY: u8 = 0xc5;
pub const IFNULL: u8 = 0xc6;
pub const IFNONNULL: u8 = 0xc7;
pub const GOTO_W: u8 = 0xc8;
pub const JSR_W: u8 = 0xc9;

/// Control never falls through to the next instruction.
pub fn is_terminal(op: u8) -> bool {
    matches!(
        op,
        GOTO | GOTO_W | RET | TABLESWITCH | LOOKUPSWITCH | IRETURN..=RETURN | ATHROW
    )
}

/// `(pop, push)` in stack slots for opcodes whose effect does not depend on
/// the constant pool. Returns `None` for member access, invokes,
/// `multianewarray` and opcodes that do not exist.
pub fn fixed_stack_effect(op: u8) -> Option<(u16, u16)> {
    let effect = match op {
        0x00 => (0, 0),
        0x01..=0x08 => (0, 1),
        0x09..=0x0a => (0, 2),
        0x0b..=0x0d => (0, 1),
        0x0e..=0x0f => (0, 2),
        0x10..=0x13 => (0, 1),
        0x14 => (0, 2),
        // xload, xload_n
        0x15 | 0x17 | 0x19 => (0, 1),
        0x16 | 0x18 => (0, 2),
        0x1a..=0x1d => (0, 1),
        0x1e..=0x21 => (0, 2),
        0x22..=0x25 => (0, 1),
        0x26..=0x29 => (0, 2),
        0x2a..=0x2d => (0, 1),
        // array loads
        0x2e | 0x30 | 0x32..=0x35 => (2, 1),
        0x2f | 0x31 => (2, 2),
        // xstore, xstore_n
        0x36 | 0x38 | 0x3a => (1, 0),
        0x37 | 0x39 => (2, 0),
        0x3b..=0x3e => (1, 0),
        0x3f..=0x42 => (2, 0),
        0x43..=0x46 => (1, 0),
        0x47..=0x4a => (2, 0),
        0x4b..=0x4e => (1, 0),
        // array stores
        0x4f | 0x51 | 0x53..=0x56 => (3, 0),
        0x50 | 0x52 => (4, 0),
        // stack manipulation
        0x57 => (1, 0),
        0x58 => (2, 0),
        0x59 => (1, 2),
        0x5a => (2, 3),
        0x5b => (3, 4),
        0x5c => (2, 4),
        0x5d => (3, 5),
        0x5e => (4, 6),
        0x5f => (2, 2),
        // arithmetic: add sub mul div rem, ordered i l f d
        0x60..=0x73 => match (op - 0x60) % 4 {
            0 | 2 => (2, 1),
            _ => (4, 2),
        },
        0x74 | 0x76 => (1, 1),
        0x75 | 0x77 => (2, 2),
        // shifts
        0x78 | 0x7a | 0x7c => (2, 1),
        0x79 | 0x7b | 0x7d => (3, 2),
        // bitwise
        0x7e | 0x80 | 0x82 => (2, 1),
        0x7f | 0x81 | 0x83 => (4, 2),
        0x84 => (0, 0),
        // conversions
        0x85 => (1, 2),
        0x86 => (1, 1),
        0x87 => (1, 2),
        0x88 | 0x89 => (2, 1),
        0x8a => (2, 2),
        0x8b => (1, 1),
        0x8c | 0x8d => (1, 2),
        0x8e | 0x90 => (2, 1),
        0x8f => (2, 2),
        0x91..=0x93 => (1, 1),
        // comparisons
        0x94 => (4, 1),
        0x95 | 0x96 => (2, 1),
        0x97 | 0x98 => (4, 1),
        0x99..=0x9e => (1, 0),
        0x9f..=0xa6 => (2, 0),
        0xa7 => (0, 0),
        0xa8 => (0, 1),
        0xa9 => (0, 0),
        0xaa | 0xab => (1, 0),
        0xac | 0xae | 0xb0 => (1, 0),
        0xad | 0xaf => (2, 0),
        0xb1 => (0, 0),
        0xbb => (0, 1),
        0xbc..=0xbe => (1, 1),
        0xbf => (1, 0),
        0xc0 | 0xc1 => (1, 1),
        0xc2 | 0xc3 => (1, 0),
        0xc6 | 0xc7 => (1, 0),
        0xc8 => (0, 0),
        0xc9 => (0, 1),
        _ => return None,
    };
    Some(effect)
}

/// Local slot touched by the single-byte `xload_n` / `xstore_n` forms, with
/// its width in slots.
pub fn implicit_local(op: u8) -> Option<(u16, u16)> {
    match op {
        0x1a..=0x2d => {
            let rel = op - 0x1a;
            let width = if matches!(rel / 4, 1 | 3) { 2 } else { 1 };
            Some(((rel % 4) as u16, width))
        }
        0x3b..=0x4e => {
            let rel = op - 0x3b;
            let width = if matches!(rel / 4, 1 | 3) { 2 } else { 1 };
            Some(((rel % 4) as u16, width))
        }
        _ => None,
    }
}

/// Width of the local touched by an explicit-index load/store (`iload`,
/// `lstore`, `ret`, ...).
pub fn local_width(op: u8) -> u16 {
    match op {
        LLOAD | DLOAD | LSTORE | DSTORE => 2,
        _ => 1,
    }
}
