//! The `Code` attribute.
//!
//! Offsets are kept as `u32` in memory and narrowed on encode, so a rewrite
//! that pushes code past 64 KiB fails with `EncodingOverflow` instead of
//! wrapping.

use std::collections::{BTreeMap, HashSet};

use super::analysis;
use super::bytes::{len_u16, len_u32, put_attribute, put_u16, put_u32, Reader};
use super::constant_pool::{Constant, ConstantPool};
use super::descriptor::MethodDescriptor;
use super::instruction::{self, Instruction, InstructionAt};
use super::stackmap::{self, StackMapFrame};
use super::RawAttribute;
use crate::error::{ClassError, Result};

/// Largest legal `code_length`.
pub const MAX_CODE_LENGTH: u32 = 65_535;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionHandler {
    pub start_pc: u32,
    pub end_pc: u32,
    pub handler_pc: u32,
    /// Class entry of the caught type, or 0 for `finally`.
    pub catch_type: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineNumber {
    pub start_pc: u32,
    pub line: u16,
}

/// Entry of a `LocalVariableTable` or `LocalVariableTypeTable`. For the
/// type table `descriptor_index` points at the generic signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalVariable {
    pub start_pc: u32,
    pub length: u32,
    pub name_index: u16,
    pub descriptor_index: u16,
    pub index: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodeAttribute {
    StackMapTable { name_index: u16, frames: Vec<StackMapFrame> },
    LineNumberTable { name_index: u16, entries: Vec<LineNumber> },
    LocalVariableTable { name_index: u16, entries: Vec<LocalVariable> },
    LocalVariableTypeTable { name_index: u16, entries: Vec<LocalVariable> },
    Other(RawAttribute),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Code {
    /// Declared values; encode emits the larger of these and the computed
    /// ones.
    pub max_stack: u16,
    pub max_locals: u16,
    pub instructions: Vec<InstructionAt>,
    pub exception_table: Vec<ExceptionHandler>,
    pub attributes: Vec<CodeAttribute>,
}

impl Code {
    /// Code from a straight instruction list, laid out from offset 0.
    /// Branch targets must already be absolute offsets in that layout.
    pub fn from_instructions(instructions: Vec<Instruction>) -> Self {
        let mut at = 0u32;
        let instructions = instructions
            .into_iter()
            .map(|instruction| {
                let offset = at;
                at += instruction.encoded_len(at);
                InstructionAt { offset, instruction }
            })
            .collect();
        Self {
            max_stack: 0,
            max_locals: 0,
            instructions,
            exception_table: Vec::new(),
            attributes: Vec::new(),
        }
    }

    /// Length of the code array in the current layout.
    pub fn code_length(&self) -> u32 {
        self.instructions
            .last()
            .map_or(0, |i| i.offset + i.instruction.encoded_len(i.offset))
    }

    pub fn stack_map(&self) -> Option<&[StackMapFrame]> {
        self.attributes.iter().find_map(|a| match a {
            CodeAttribute::StackMapTable { frames, .. } => Some(frames.as_slice()),
            _ => None,
        })
    }

    /// Replace the frames, creating the attribute (named by `name_index`)
    /// if the method has none.
    pub fn set_stack_map(&mut self, name_index: u16, new_frames: Vec<StackMapFrame>) {
        for attr in &mut self.attributes {
            if let CodeAttribute::StackMapTable { frames, .. } = attr {
                *frames = new_frames;
                return;
            }
        }
        self.attributes.push(CodeAttribute::StackMapTable {
            name_index,
            frames: new_frames,
        });
    }

    // -----------------------------------------------------------------------
    // Offset rewriting
    // -----------------------------------------------------------------------

    /// Move every code offset through `map`: instruction offsets, branch
    /// targets, exception ranges, line numbers, local variable ranges and,
    /// when `frames` is set, the `StackMapTable`.
    fn remap(&mut self, mut map: impl FnMut(u32) -> Result<u32>, frames: bool) -> Result<()> {
        for insn in &mut self.instructions {
            insn.offset = map(insn.offset)?;
            insn.instruction.map_targets(&mut map)?;
        }
        for h in &mut self.exception_table {
            h.start_pc = map(h.start_pc)?;
            h.end_pc = map(h.end_pc)?;
            h.handler_pc = map(h.handler_pc)?;
        }
        for attr in &mut self.attributes {
            match attr {
                CodeAttribute::StackMapTable { frames: table, .. } if frames => {
                    *table = stackmap::renumber(table, &mut map)?;
                }
                CodeAttribute::LineNumberTable { entries, .. } => {
                    for e in entries {
                        e.start_pc = map(e.start_pc)?;
                    }
                }
                CodeAttribute::LocalVariableTable { entries, .. }
                | CodeAttribute::LocalVariableTypeTable { entries, .. } => {
                    for e in entries {
                        let end = map(e.start_pc + e.length)?;
                        e.start_pc = map(e.start_pc)?;
                        e.length = end - e.start_pc;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Insert `code` at offset `at`, moving every later offset by the
    /// inserted length. Returns that length.
    ///
    /// Offsets move by exactly the inserted length only when it is a
    /// multiple of four; otherwise later switches change padding and the
    /// encoder relays the method out. The `StackMapTable` is not touched;
    /// the caller rebuilds it with [`stackmap::splice_frames`].
    pub fn insert_at(&mut self, at: u32, code: Vec<Instruction>) -> Result<u32> {
        let mut len = 0u32;
        let mut placed = Vec::with_capacity(code.len());
        for instruction in code {
            let offset = at + len;
            len += instruction.encoded_len(offset);
            placed.push(InstructionAt { offset, instruction });
        }
        self.remap(|o| Ok(if o >= at { o + len } else { o }), false)?;
        let pos = self.instructions.partition_point(|i| i.offset < at);
        self.instructions.splice(pos..pos, placed);
        Ok(len)
    }

    /// Lay the instructions out again from offset 0 and remap everything
    /// that refers to an offset. A no-op when the layout already matches.
    pub fn relayout(&mut self) -> Result<()> {
        let mut moves = BTreeMap::new();
        let mut at = 0u32;
        let mut identity = true;
        for insn in &self.instructions {
            identity &= insn.offset == at;
            moves.insert(insn.offset, at);
            at += insn.instruction.encoded_len(at);
        }
        if identity {
            return Ok(());
        }
        let old_len = self.code_length();
        moves.insert(old_len, at);
        tracing::trace!(from = old_len, to = at, "relaying out method code");
        self.remap(
            |o| {
                moves.get(&o).copied().ok_or_else(|| {
                    ClassError::malformed(format!("offset {o} is not an instruction boundary"))
                })
            },
            true,
        )
    }

    // -----------------------------------------------------------------------
    // Decoding
    // -----------------------------------------------------------------------

    pub(crate) fn decode(body: &[u8], pool: &ConstantPool) -> Result<Self> {
        let mut r = Reader::new(body);
        let max_stack = r.u16()?;
        let max_locals = r.u16()?;
        let code_length = r.u32()?;
        if code_length == 0 || code_length > MAX_CODE_LENGTH {
            return Err(ClassError::malformed(format!("code_length {code_length}")));
        }
        let instructions = instruction::decode(r.bytes(code_length as usize)?)?;

        let boundaries: HashSet<u32> = instructions.iter().map(|i| i.offset).collect();
        let on_boundary = |o: u32| boundaries.contains(&o);
        let range_end = |o: u32| o == code_length || boundaries.contains(&o);

        let handlers = r.u16()?;
        let mut exception_table = Vec::with_capacity(handlers as usize);
        for _ in 0..handlers {
            let h = ExceptionHandler {
                start_pc: r.u16()? as u32,
                end_pc: r.u16()? as u32,
                handler_pc: r.u16()? as u32,
                catch_type: r.u16()?,
            };
            if !on_boundary(h.start_pc)
                || !range_end(h.end_pc)
                || h.start_pc >= h.end_pc
                || !on_boundary(h.handler_pc)
            {
                return Err(ClassError::malformed(format!(
                    "exception handler [{}, {}) -> {} is not on instruction boundaries",
                    h.start_pc, h.end_pc, h.handler_pc
                )));
            }
            if h.catch_type != 0 && !matches!(pool.get(h.catch_type)?, Constant::Class { .. }) {
                return Err(ClassError::malformed(format!(
                    "catch type {} is not a Class",
                    h.catch_type
                )));
            }
            exception_table.push(h);
        }

        let count = r.u16()?;
        let mut attributes = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let name_index = r.u16()?;
            let length = r.u32()? as usize;
            let info = r.bytes(length)?;
            let name = pool.utf8(name_index)?;
            let attr = match name.as_str() {
                "StackMapTable" => CodeAttribute::StackMapTable {
                    name_index,
                    frames: stackmap::decode_table(info)?,
                },
                "LineNumberTable" => {
                    let entries = decode_line_numbers(info)?;
                    if let Some(bad) = entries.iter().find(|e| !on_boundary(e.start_pc)) {
                        return Err(ClassError::malformed(format!(
                            "line number entry at {} is not an instruction boundary",
                            bad.start_pc
                        )));
                    }
                    CodeAttribute::LineNumberTable { name_index, entries }
                }
                "LocalVariableTable" | "LocalVariableTypeTable" => {
                    let entries = decode_local_variables(info)?;
                    if let Some(bad) = entries
                        .iter()
                        .find(|e| !on_boundary(e.start_pc) || !range_end(e.start_pc + e.length))
                    {
                        return Err(ClassError::malformed(format!(
                            "local variable range [{}, +{}) is not on instruction boundaries",
                            bad.start_pc, bad.length
                        )));
                    }
                    if name == "LocalVariableTable" {
                        CodeAttribute::LocalVariableTable { name_index, entries }
                    } else {
                        CodeAttribute::LocalVariableTypeTable { name_index, entries }
                    }
                }
                _ => CodeAttribute::Other(RawAttribute {
                    name_index,
                    info: info.to_vec(),
                }),
            };
            attributes.push(attr);
        }
        if !r.is_empty() {
            return Err(ClassError::malformed(format!(
                "Code attribute has {} bytes past its content",
                r.remaining()
            )));
        }

        Ok(Self {
            max_stack,
            max_locals,
            instructions,
            exception_table,
            attributes,
        })
    }

    // -----------------------------------------------------------------------
    // Encoding
    // -----------------------------------------------------------------------

    /// Encode the attribute body. `descriptor` and `is_static` describe the
    /// owning method and feed the max stack / max locals computation.
    pub(crate) fn encode(
        &self,
        pool: &ConstantPool,
        descriptor: &MethodDescriptor,
        is_static: bool,
    ) -> Result<Vec<u8>> {
        let relaid;
        let code = if self.is_laid_out() {
            self
        } else {
            let mut copy = self.clone();
            copy.relayout()?;
            relaid = copy;
            &relaid
        };

        let bytes = instruction::encode(&code.instructions)?;
        if bytes.len() as u32 > MAX_CODE_LENGTH {
            return Err(ClassError::overflow(format!(
                "code is {} bytes, limit is {MAX_CODE_LENGTH}",
                bytes.len()
            )));
        }
        let max_stack = code.max_stack.max(analysis::max_stack(code, pool)?);
        let max_locals = code
            .max_locals
            .max(analysis::max_locals(code, descriptor, is_static));

        let mut out = Vec::with_capacity(bytes.len() + 32);
        put_u16(&mut out, max_stack);
        put_u16(&mut out, max_locals);
        put_u32(&mut out, bytes.len() as u32);
        out.extend_from_slice(&bytes);

        put_u16(&mut out, len_u16(code.exception_table.len(), "exception table")?);
        for h in &code.exception_table {
            put_u16(&mut out, pc(h.start_pc)?);
            put_u16(&mut out, pc(h.end_pc)?);
            put_u16(&mut out, pc(h.handler_pc)?);
            put_u16(&mut out, h.catch_type);
        }

        put_u16(&mut out, len_u16(code.attributes.len(), "Code attributes")?);
        for attr in &code.attributes {
            match attr {
                CodeAttribute::StackMapTable { name_index, frames } => {
                    put_attribute(&mut out, *name_index, &stackmap::encode_table(frames)?)?;
                }
                CodeAttribute::LineNumberTable { name_index, entries } => {
                    let mut body = Vec::with_capacity(2 + entries.len() * 4);
                    put_u16(&mut body, len_u16(entries.len(), "LineNumberTable")?);
                    for e in entries {
                        put_u16(&mut body, pc(e.start_pc)?);
                        put_u16(&mut body, e.line);
                    }
                    put_attribute(&mut out, *name_index, &body)?;
                }
                CodeAttribute::LocalVariableTable { name_index, entries }
                | CodeAttribute::LocalVariableTypeTable { name_index, entries } => {
                    let mut body = Vec::with_capacity(2 + entries.len() * 10);
                    put_u16(&mut body, len_u16(entries.len(), "LocalVariableTable")?);
                    for e in entries {
                        put_u16(&mut body, pc(e.start_pc)?);
                        put_u16(&mut body, pc(e.length)?);
                        put_u16(&mut body, e.name_index);
                        put_u16(&mut body, e.descriptor_index);
                        put_u16(&mut body, e.index);
                    }
                    put_attribute(&mut out, *name_index, &body)?;
                }
                CodeAttribute::Other(raw) => put_attribute(&mut out, raw.name_index, &raw.info)?,
            }
        }
        len_u32(out.len(), "Code attribute")?;
        Ok(out)
    }

    fn is_laid_out(&self) -> bool {
        let mut at = 0u32;
        self.instructions.iter().all(|insn| {
            let ok = insn.offset == at;
            at += insn.instruction.encoded_len(at);
            ok
        })
    }
}

fn pc(offset: u32) -> Result<u16> {
    u16::try_from(offset)
        .map_err(|_| ClassError::overflow(format!("code offset {offset} exceeds 16 bits")))
}

fn decode_line_numbers(info: &[u8]) -> Result<Vec<LineNumber>> {
    let mut r = Reader::new(info);
    let count = r.u16()?;
    let entries = (0..count)
        .map(|_| {
            Ok(LineNumber {
                start_pc: r.u16()? as u32,
                line: r.u16()?,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    if !r.is_empty() {
        return Err(ClassError::malformed("LineNumberTable length disagrees with its entries"));
    }
    Ok(entries)
}

fn decode_local_variables(info: &[u8]) -> Result<Vec<LocalVariable>> {
    let mut r = Reader::new(info);
    let count = r.u16()?;
    let entries = (0..count)
        .map(|_| {
            Ok(LocalVariable {
                start_pc: r.u16()? as u32,
                length: r.u16()? as u32,
                name_index: r.u16()?,
                descriptor_index: r.u16()?,
                index: r.u16()?,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    if !r.is_empty() {
        return Err(ClassError::malformed(
            "LocalVariableTable length disagrees with its entries",
        ));
    }
    Ok(entries)
}

// ---------------------------------------------------------------------------
// Label-based builder
// ---------------------------------------------------------------------------

/// A branch target inside a [`CodeBuilder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(usize);

enum Item {
    Insn(Instruction),
    Jump { opcode: u8, label: Label },
    Bind(Label),
}

/// Small assembler for synthesized methods: branches name labels and are
/// resolved to absolute offsets by [`CodeBuilder::build`].
#[derive(Default)]
pub struct CodeBuilder {
    items: Vec<Item>,
    labels: usize,
}

impl CodeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn label(&mut self) -> Label {
        self.labels += 1;
        Label(self.labels - 1)
    }

    pub fn bind(&mut self, label: Label) -> &mut Self {
        self.items.push(Item::Bind(label));
        self
    }

    pub fn push(&mut self, insn: Instruction) -> &mut Self {
        self.items.push(Item::Insn(insn));
        self
    }

    pub fn op(&mut self, opcode: u8) -> &mut Self {
        self.push(Instruction::Simple(opcode))
    }

    /// A 16-bit branch (`ifeq`, `goto`, ...) to `label`.
    pub fn jump(&mut self, opcode: u8, label: Label) -> &mut Self {
        self.items.push(Item::Jump { opcode, label });
        self
    }

    /// Resolve labels. Returns the code and each label's offset.
    pub fn build(self) -> Result<(Code, Vec<u32>)> {
        let mut bound = vec![None; self.labels];
        let mut at = 0u32;
        for item in &self.items {
            match item {
                Item::Insn(insn) => at += insn.encoded_len(at),
                Item::Jump { .. } => at += 3,
                Item::Bind(Label(id)) => bound[*id] = Some(at),
            }
        }
        let offsets = bound
            .into_iter()
            .enumerate()
            .map(|(id, o)| o.ok_or_else(|| ClassError::malformed(format!("label {id} never bound"))))
            .collect::<Result<Vec<_>>>()?;
        let instructions = self
            .items
            .into_iter()
            .filter_map(|item| match item {
                Item::Insn(insn) => Some(insn),
                Item::Jump { opcode, label } => Some(Instruction::Branch {
                    opcode,
                    target: offsets[label.0],
                }),
                Item::Bind(_) => None,
            })
            .collect();
        Ok((Code::from_instructions(instructions), offsets))
    }
}
