//! `StackMapTable` frames.
//!
//! Frames are kept in their compressed on-disk form so an untouched method
//! re-encodes byte for byte.  [`expand`] turns them into absolute
//! [`FrameState`]s, [`compress`] goes back, and [`splice_frames`] is the
//! pure function the prologue injector uses to make room for new code.

use super::bytes::{len_u16, put_u16, put_u8, Reader};
use super::constant_pool::ConstantPool;
use super::descriptor::{FieldType, MethodDescriptor};
use crate::error::{ClassError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VerificationType {
    Top,
    Integer,
    Float,
    Double,
    Long,
    Null,
    UninitializedThis,
    /// Constant pool index of a `Class` entry.
    Object(u16),
    /// Code offset of the `new` instruction that created the value.
    Uninitialized(u16),
}

impl VerificationType {
    fn read(r: &mut Reader<'_>) -> Result<Self> {
        Ok(match r.u8()? {
            0 => VerificationType::Top,
            1 => VerificationType::Integer,
            2 => VerificationType::Float,
            3 => VerificationType::Double,
            4 => VerificationType::Long,
            5 => VerificationType::Null,
            6 => VerificationType::UninitializedThis,
            7 => VerificationType::Object(r.u16()?),
            8 => VerificationType::Uninitialized(r.u16()?),
            tag => {
                return Err(ClassError::malformed(format!(
                    "unknown verification type tag {tag}"
                )))
            }
        })
    }

    fn write(&self, out: &mut Vec<u8>) {
        match self {
            VerificationType::Top => put_u8(out, 0),
            VerificationType::Integer => put_u8(out, 1),
            VerificationType::Float => put_u8(out, 2),
            VerificationType::Double => put_u8(out, 3),
            VerificationType::Long => put_u8(out, 4),
            VerificationType::Null => put_u8(out, 5),
            VerificationType::UninitializedThis => put_u8(out, 6),
            VerificationType::Object(index) => {
                put_u8(out, 7);
                put_u16(out, *index);
            }
            VerificationType::Uninitialized(offset) => {
                put_u8(out, 8);
                put_u16(out, *offset);
            }
        }
    }

    /// The verifier's view of a value of `ty`.
    pub fn of(ty: &FieldType, pool: &mut ConstantPool) -> Result<Self> {
        Ok(match ty {
            FieldType::Float => VerificationType::Float,
            FieldType::Long => VerificationType::Long,
            FieldType::Double => VerificationType::Double,
            FieldType::Object(_) | FieldType::Array(_) => {
                let name = ty.class_entry_name().unwrap_or_default();
                VerificationType::Object(pool.add_class(&name)?)
            }
            _ => VerificationType::Integer,
        })
    }

    fn map_offset(&self, map: &mut impl FnMut(u32) -> Result<u32>) -> Result<Self> {
        match self {
            VerificationType::Uninitialized(offset) => {
                let moved = map(*offset as u32)?;
                let moved = u16::try_from(moved).map_err(|_| {
                    ClassError::overflow(format!("uninitialized offset {moved} exceeds u16"))
                })?;
                Ok(VerificationType::Uninitialized(moved))
            }
            other => Ok(other.clone()),
        }
    }
}

/// One compressed frame as stored in the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackMapFrame {
    Same { offset_delta: u16 },
    SameExtended { offset_delta: u16 },
    SameLocals1StackItem { offset_delta: u16, stack: VerificationType },
    SameLocals1StackItemExtended { offset_delta: u16, stack: VerificationType },
    Chop { offset_delta: u16, k: u8 },
    Append { offset_delta: u16, locals: Vec<VerificationType> },
    Full {
        offset_delta: u16,
        locals: Vec<VerificationType>,
        stack: Vec<VerificationType>,
    },
}

impl StackMapFrame {
    pub fn offset_delta(&self) -> u16 {
        match self {
            StackMapFrame::Same { offset_delta }
            | StackMapFrame::SameExtended { offset_delta }
            | StackMapFrame::SameLocals1StackItem { offset_delta, .. }
            | StackMapFrame::SameLocals1StackItemExtended { offset_delta, .. }
            | StackMapFrame::Chop { offset_delta, .. }
            | StackMapFrame::Append { offset_delta, .. }
            | StackMapFrame::Full { offset_delta, .. } => *offset_delta,
        }
    }

    /// Same frame kind with a new delta, switching to the extended form
    /// when the delta no longer fits the compact one.
    fn with_delta(&self, delta: u32) -> Result<Self> {
        let offset_delta = u16::try_from(delta)
            .map_err(|_| ClassError::overflow(format!("frame offset delta {delta}")))?;
        Ok(match self {
            StackMapFrame::Same { .. } if offset_delta <= 63 => StackMapFrame::Same { offset_delta },
            StackMapFrame::Same { .. } | StackMapFrame::SameExtended { .. } => {
                StackMapFrame::SameExtended { offset_delta }
            }
            StackMapFrame::SameLocals1StackItem { stack, .. } if offset_delta <= 63 => {
                StackMapFrame::SameLocals1StackItem { offset_delta, stack: stack.clone() }
            }
            StackMapFrame::SameLocals1StackItem { stack, .. }
            | StackMapFrame::SameLocals1StackItemExtended { stack, .. } => {
                StackMapFrame::SameLocals1StackItemExtended { offset_delta, stack: stack.clone() }
            }
            StackMapFrame::Chop { k, .. } => StackMapFrame::Chop { offset_delta, k: *k },
            StackMapFrame::Append { locals, .. } => StackMapFrame::Append {
                offset_delta,
                locals: locals.clone(),
            },
            StackMapFrame::Full { locals, stack, .. } => StackMapFrame::Full {
                offset_delta,
                locals: locals.clone(),
                stack: stack.clone(),
            },
        })
    }

    fn map_types(&self, map: &mut impl FnMut(u32) -> Result<u32>) -> Result<Self> {
        Ok(match self {
            StackMapFrame::SameLocals1StackItem { offset_delta, stack } => {
                StackMapFrame::SameLocals1StackItem {
                    offset_delta: *offset_delta,
                    stack: stack.map_offset(map)?,
                }
            }
            StackMapFrame::SameLocals1StackItemExtended { offset_delta, stack } => {
                StackMapFrame::SameLocals1StackItemExtended {
                    offset_delta: *offset_delta,
                    stack: stack.map_offset(map)?,
                }
            }
            StackMapFrame::Append { offset_delta, locals } => StackMapFrame::Append {
                offset_delta: *offset_delta,
                locals: shift_types(locals, map)?,
            },
            StackMapFrame::Full { offset_delta, locals, stack } => StackMapFrame::Full {
                offset_delta: *offset_delta,
                locals: shift_types(locals, map)?,
                stack: shift_types(stack, map)?,
            },
            other => other.clone(),
        })
    }

    fn read(r: &mut Reader<'_>) -> Result<Self> {
        let frame_type = r.u8()?;
        Ok(match frame_type {
            0..=63 => StackMapFrame::Same { offset_delta: frame_type as u16 },
            64..=127 => StackMapFrame::SameLocals1StackItem {
                offset_delta: (frame_type - 64) as u16,
                stack: VerificationType::read(r)?,
            },
            247 => StackMapFrame::SameLocals1StackItemExtended {
                offset_delta: r.u16()?,
                stack: VerificationType::read(r)?,
            },
            248..=250 => StackMapFrame::Chop {
                offset_delta: r.u16()?,
                k: 251 - frame_type,
            },
            251 => StackMapFrame::SameExtended { offset_delta: r.u16()? },
            252..=254 => {
                let offset_delta = r.u16()?;
                let locals = (0..frame_type - 251)
                    .map(|_| VerificationType::read(r))
                    .collect::<Result<Vec<_>>>()?;
                StackMapFrame::Append { offset_delta, locals }
            }
            255 => {
                let offset_delta = r.u16()?;
                let nlocals = r.u16()?;
                let locals = (0..nlocals)
                    .map(|_| VerificationType::read(r))
                    .collect::<Result<Vec<_>>>()?;
                let nstack = r.u16()?;
                let stack = (0..nstack)
                    .map(|_| VerificationType::read(r))
                    .collect::<Result<Vec<_>>>()?;
                StackMapFrame::Full { offset_delta, locals, stack }
            }
            other => {
                return Err(ClassError::malformed(format!("reserved frame type {other}")))
            }
        })
    }

    fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        match self {
            StackMapFrame::Same { offset_delta } => put_u8(out, *offset_delta as u8),
            StackMapFrame::SameLocals1StackItem { offset_delta, stack } => {
                put_u8(out, 64 + *offset_delta as u8);
                stack.write(out);
            }
            StackMapFrame::SameLocals1StackItemExtended { offset_delta, stack } => {
                put_u8(out, 247);
                put_u16(out, *offset_delta);
                stack.write(out);
            }
            StackMapFrame::Chop { offset_delta, k } => {
                put_u8(out, 251 - *k);
                put_u16(out, *offset_delta);
            }
            StackMapFrame::SameExtended { offset_delta } => {
                put_u8(out, 251);
                put_u16(out, *offset_delta);
            }
            StackMapFrame::Append { offset_delta, locals } => {
                put_u8(out, 251 + locals.len() as u8);
                put_u16(out, *offset_delta);
                for t in locals {
                    t.write(out);
                }
            }
            StackMapFrame::Full { offset_delta, locals, stack } => {
                put_u8(out, 255);
                put_u16(out, *offset_delta);
                put_u16(out, len_u16(locals.len(), "frame locals")?);
                for t in locals {
                    t.write(out);
                }
                put_u16(out, len_u16(stack.len(), "frame stack")?);
                for t in stack {
                    t.write(out);
                }
            }
        }
        Ok(())
    }

    /// Locals and stack this frame describes, given the previous frame's
    /// locals.
    fn apply(&self, prev: &[VerificationType]) -> Result<FrameState> {
        Ok(match self {
            StackMapFrame::Same { .. } | StackMapFrame::SameExtended { .. } => FrameState {
                locals: prev.to_vec(),
                stack: Vec::new(),
            },
            StackMapFrame::SameLocals1StackItem { stack, .. }
            | StackMapFrame::SameLocals1StackItemExtended { stack, .. } => FrameState {
                locals: prev.to_vec(),
                stack: vec![stack.clone()],
            },
            StackMapFrame::Chop { k, .. } => {
                let k = *k as usize;
                if k > prev.len() {
                    return Err(ClassError::malformed(format!(
                        "chop frame removes {k} locals from {}",
                        prev.len()
                    )));
                }
                FrameState {
                    locals: prev[..prev.len() - k].to_vec(),
                    stack: Vec::new(),
                }
            }
            StackMapFrame::Append { locals, .. } => FrameState {
                locals: prev.iter().chain(locals.iter()).cloned().collect(),
                stack: Vec::new(),
            },
            StackMapFrame::Full { locals, stack, .. } => FrameState {
                locals: locals.clone(),
                stack: stack.clone(),
            },
        })
    }
}

/// Decode a `StackMapTable` attribute body.
pub fn decode_table(body: &[u8]) -> Result<Vec<StackMapFrame>> {
    let mut r = Reader::new(body);
    let count = r.u16()?;
    let frames = (0..count)
        .map(|_| StackMapFrame::read(&mut r))
        .collect::<Result<Vec<_>>>()?;
    if !r.is_empty() {
        return Err(ClassError::malformed(format!(
            "StackMapTable has {} trailing bytes",
            r.remaining()
        )));
    }
    Ok(frames)
}

/// Encode a `StackMapTable` attribute body.
pub fn encode_table(frames: &[StackMapFrame]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    put_u16(&mut out, len_u16(frames.len(), "StackMapTable")?);
    for frame in frames {
        frame.write(&mut out)?;
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Expanded form
// ---------------------------------------------------------------------------

/// Full verifier state at one code offset. Locals use the table's entry
/// form: a `Long` or `Double` is one entry covering two slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameState {
    pub locals: Vec<VerificationType>,
    pub stack: Vec<VerificationType>,
}

impl FrameState {
    /// Method entry: the initial locals and an empty stack.
    pub fn entry(locals: Vec<VerificationType>) -> Self {
        Self { locals, stack: Vec::new() }
    }
}

fn absolute_offsets(frames: &[StackMapFrame]) -> Vec<u32> {
    let mut offsets = Vec::with_capacity(frames.len());
    let mut prev: Option<u32> = None;
    for frame in frames {
        let delta = frame.offset_delta() as u32;
        let abs = match prev {
            None => delta,
            Some(p) => p + delta + 1,
        };
        offsets.push(abs);
        prev = Some(abs);
    }
    offsets
}

fn delta_from(prev: Option<u32>, offset: u32) -> Result<u32> {
    match prev {
        None => Ok(offset),
        Some(p) if offset > p => Ok(offset - p - 1),
        Some(p) => Err(ClassError::malformed(format!(
            "frame at {offset} does not follow frame at {p}"
        ))),
    }
}

/// Expand compressed frames into `(offset, state)` pairs.
pub fn expand(
    frames: &[StackMapFrame],
    initial_locals: &[VerificationType],
) -> Result<Vec<(u32, FrameState)>> {
    let offsets = absolute_offsets(frames);
    let mut out: Vec<(u32, FrameState)> = Vec::with_capacity(frames.len());
    for (frame, offset) in frames.iter().zip(offsets) {
        let prev = out.last().map_or(initial_locals, |(_, s)| s.locals.as_slice());
        let state = frame.apply(prev)?;
        out.push((offset, state));
    }
    Ok(out)
}

/// Compress states back into frames.  Where `hints[i]` is the frame the
/// state came from and that frame still describes the state relative to
/// its new predecessor, its kind is kept; otherwise the smallest
/// encoding is chosen.
pub fn compress(
    states: &[(u32, FrameState)],
    initial_locals: &[VerificationType],
    hints: &[Option<StackMapFrame>],
) -> Result<Vec<StackMapFrame>> {
    let mut out = Vec::with_capacity(states.len());
    let mut prev_offset: Option<u32> = None;
    let mut prev_locals: &[VerificationType] = initial_locals;
    for (i, (offset, state)) in states.iter().enumerate() {
        let delta = delta_from(prev_offset, *offset)?;
        let hinted = match hints.get(i) {
            Some(Some(hint)) if hint.apply(prev_locals).ok().as_ref() == Some(state) => {
                Some(hint.with_delta(delta)?)
            }
            _ => None,
        };
        let frame = match hinted {
            Some(frame) => frame,
            None => minimal_frame(prev_locals, state, delta)?,
        };
        out.push(frame);
        prev_offset = Some(*offset);
        prev_locals = &state.locals;
    }
    Ok(out)
}

fn minimal_frame(prev: &[VerificationType], state: &FrameState, delta: u32) -> Result<StackMapFrame> {
    let locals = &state.locals;
    let frame = if state.stack.is_empty() && locals.as_slice() == prev {
        StackMapFrame::Same { offset_delta: 0 }
    } else if state.stack.len() == 1 && locals.as_slice() == prev {
        StackMapFrame::SameLocals1StackItem { offset_delta: 0, stack: state.stack[0].clone() }
    } else if state.stack.is_empty()
        && locals.len() < prev.len()
        && prev.len() - locals.len() <= 3
        && prev.starts_with(locals)
    {
        StackMapFrame::Chop { offset_delta: 0, k: (prev.len() - locals.len()) as u8 }
    } else if state.stack.is_empty()
        && locals.len() > prev.len()
        && locals.len() - prev.len() <= 3
        && locals.starts_with(prev)
    {
        StackMapFrame::Append { offset_delta: 0, locals: locals[prev.len()..].to_vec() }
    } else {
        StackMapFrame::Full {
            offset_delta: 0,
            locals: locals.clone(),
            stack: state.stack.clone(),
        }
    };
    frame.with_delta(delta)
}

/// Move every frame offset and `uninitialized(offset)` through `map`,
/// keeping each frame's kind (widened to the extended form if needed).
pub fn renumber(
    frames: &[StackMapFrame],
    mut map: impl FnMut(u32) -> Result<u32>,
) -> Result<Vec<StackMapFrame>> {
    let mut out = Vec::with_capacity(frames.len());
    let mut prev: Option<u32> = None;
    for (frame, offset) in frames.iter().zip(absolute_offsets(frames)) {
        let moved = map(offset)?;
        let delta = delta_from(prev, moved)?;
        out.push(frame.map_types(&mut map)?.with_delta(delta)?);
        prev = Some(moved);
    }
    Ok(out)
}

/// Rebuild the frames of a method after `len` bytes of code were inserted
/// at `at`.
///
/// Offsets at or after `at` move by `len`, including `uninitialized`
/// offsets.  When `live` is given, the inserted code branches to `at + len`
/// and a frame with that state is added there unless one already exists.
/// `live` must already be in post-insertion coordinates.
pub fn splice_frames(
    frames: &[StackMapFrame],
    initial_locals: &[VerificationType],
    at: u32,
    len: u32,
    live: Option<&FrameState>,
) -> Result<Vec<StackMapFrame>> {
    let mut shift = |o: u32| -> Result<u32> { Ok(if o >= at { o + len } else { o }) };

    let expanded = expand(frames, initial_locals)?;
    let mut states = Vec::with_capacity(expanded.len() + 1);
    let mut hints = Vec::with_capacity(expanded.len() + 1);
    for ((offset, state), frame) in expanded.into_iter().zip(frames) {
        let moved = FrameState {
            locals: shift_types(&state.locals, &mut shift)?,
            stack: shift_types(&state.stack, &mut shift)?,
        };
        states.push((shift(offset)?, moved));
        hints.push(Some(frame.map_types(&mut shift)?));
    }

    if let Some(live) = live {
        let target = at + len;
        if !states.iter().any(|(o, _)| *o == target) {
            let pos = states.partition_point(|(o, _)| *o < target);
            states.insert(pos, (target, live.clone()));
            hints.insert(pos, None);
        }
    }

    compress(&states, initial_locals, &hints)
}

fn shift_types(
    types: &[VerificationType],
    map: &mut impl FnMut(u32) -> Result<u32>,
) -> Result<Vec<VerificationType>> {
    types.iter().map(|t| t.map_offset(map)).collect()
}

/// Locals at method entry as the verifier computes them.
pub fn initial_locals(
    pool: &mut ConstantPool,
    class_name: &str,
    is_static: bool,
    method_name: &str,
    descriptor: &MethodDescriptor,
) -> Result<Vec<VerificationType>> {
    let mut locals = Vec::with_capacity(descriptor.params.len() + 1);
    if !is_static {
        if method_name == "<init>" && class_name != "java/lang/Object" {
            locals.push(VerificationType::UninitializedThis);
        } else {
            locals.push(VerificationType::Object(pool.add_class(class_name)?));
        }
    }
    for param in &descriptor.params {
        locals.push(VerificationType::of(param, pool)?);
    }
    Ok(locals)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    use VerificationType as V;

    fn same(d: u16) -> StackMapFrame {
        StackMapFrame::Same { offset_delta: d }
    }

    #[test]
    fn test_table_roundtrip_keeps_kinds() {
        let frames = vec![
            StackMapFrame::Append { offset_delta: 4, locals: vec![V::Integer, V::Long] },
            StackMapFrame::SameLocals1StackItemExtended { offset_delta: 3, stack: V::Null },
            StackMapFrame::Chop { offset_delta: 100, k: 1 },
            StackMapFrame::SameExtended { offset_delta: 2 },
            StackMapFrame::Full {
                offset_delta: 9,
                locals: vec![V::Object(3)],
                stack: vec![V::Uninitialized(12)],
            },
            same(0),
        ];
        let body = encode_table(&frames).unwrap();
        assert_eq!(decode_table(&body).unwrap(), frames);
    }

    #[test]
    fn test_expand_tracks_locals() {
        let frames = vec![
            StackMapFrame::Append { offset_delta: 2, locals: vec![V::Integer, V::Integer] },
            StackMapFrame::Chop { offset_delta: 5, k: 1 },
            same(0),
        ];
        let states = expand(&frames, &[V::Object(1)]).unwrap();
        assert_eq!(states[0].0, 2);
        assert_eq!(states[0].1.locals, vec![V::Object(1), V::Integer, V::Integer]);
        assert_eq!(states[1].0, 8);
        assert_eq!(states[1].1.locals, vec![V::Object(1), V::Integer]);
        assert_eq!(states[2].0, 9);
    }

    #[test]
    fn test_chop_past_start_is_malformed() {
        let frames = vec![StackMapFrame::Chop { offset_delta: 1, k: 2 }];
        assert!(expand(&frames, &[V::Integer]).is_err());
    }

    #[test]
    fn test_splice_inserts_entry_frame() {
        let initial = vec![V::Object(1), V::Object(2)];
        let frames = vec![same(10)];
        let live = FrameState::entry(initial.clone());
        let out = splice_frames(&frames, &initial, 0, 8, Some(&live)).unwrap();
        // New frame at 8, original frame moves from 10 to 18.
        assert_eq!(out, vec![same(8), same(9)]);
    }

    #[test]
    fn test_splice_reuses_existing_frame_at_target() {
        let initial = vec![V::Integer];
        let frames = vec![same(0), StackMapFrame::Append { offset_delta: 4, locals: vec![V::Float] }];
        let live = FrameState::entry(initial.clone());
        let out = splice_frames(&frames, &initial, 0, 4, Some(&live)).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], same(4));
        assert_eq!(out[1], StackMapFrame::Append { offset_delta: 4, locals: vec![V::Float] });
    }

    #[test]
    fn test_splice_shifts_uninitialized() {
        let initial = vec![];
        let frames = vec![StackMapFrame::SameLocals1StackItem {
            offset_delta: 3,
            stack: V::Uninitialized(0),
        }];
        let out = splice_frames(&frames, &initial, 0, 4, None).unwrap();
        assert_eq!(
            out,
            vec![StackMapFrame::SameLocals1StackItem { offset_delta: 7, stack: V::Uninitialized(4) }]
        );
    }

    #[test]
    fn test_splice_widens_same_frame() {
        let out = splice_frames(&[same(62)], &[], 0, 8, None).unwrap();
        assert_eq!(out, vec![StackMapFrame::SameExtended { offset_delta: 70 }]);
    }

    #[test]
    fn test_renumber_identity() {
        let frames = vec![same(3), StackMapFrame::SameExtended { offset_delta: 1 }];
        assert_eq!(renumber(&frames, Ok).unwrap(), frames);
    }

    #[test]
    fn test_initial_locals() {
        let mut pool = ConstantPool::new();
        let d = MethodDescriptor::parse("(IJLjava/lang/String;)V").unwrap();
        let locals = initial_locals(&mut pool, "p/Main", false, "run", &d).unwrap();
        assert_eq!(locals.len(), 4);
        assert_eq!(locals[1], V::Integer);
        assert_eq!(locals[2], V::Long);
        let ctor = initial_locals(&mut pool, "p/Main", false, "<init>", &d).unwrap();
        assert_eq!(ctor[0], V::UninitializedThis);
    }

    fn arb_type() -> impl Strategy<Value = VerificationType> {
        prop_oneof![
            Just(V::Integer),
            Just(V::Float),
            Just(V::Long),
            Just(V::Null),
            (1u16..50).prop_map(V::Object),
        ]
    }

    fn arb_frame() -> impl Strategy<Value = StackMapFrame> {
        prop_oneof![
            (0u16..64).prop_map(|d| StackMapFrame::Same { offset_delta: d }),
            (0u16..64, arb_type())
                .prop_map(|(d, t)| StackMapFrame::SameLocals1StackItem { offset_delta: d, stack: t }),
            (0u16..300, prop::collection::vec(arb_type(), 1..=3))
                .prop_map(|(d, l)| StackMapFrame::Append { offset_delta: d, locals: l }),
            (0u16..300, prop::collection::vec(arb_type(), 0..5), prop::collection::vec(arb_type(), 0..3))
                .prop_map(|(d, l, s)| StackMapFrame::Full { offset_delta: d, locals: l, stack: s }),
        ]
    }

    proptest! {
        #[test]
        fn prop_splice_preserves_states(
            frames in prop::collection::vec(arb_frame(), 0..12),
            quads in 1u32..16,
            insert_entry in any::<bool>(),
        ) {
            let initial = vec![V::Object(1)];
            let len = quads * 4;
            let live = FrameState::entry(initial.clone());
            let spliced = splice_frames(
                &frames,
                &initial,
                0,
                len,
                if insert_entry { Some(&live) } else { None },
            ).unwrap();

            let before = expand(&frames, &initial).unwrap();
            let after = expand(&spliced, &initial).unwrap();
            let after: Vec<_> = after
                .into_iter()
                .filter(|(o, _)| !(insert_entry && *o == len && !before.iter().any(|(b, _)| *b == 0)))
                .collect();
            prop_assert_eq!(after.len(), before.len());
            for ((bo, bs), (ao, as_)) in before.iter().zip(after.iter()) {
                prop_assert_eq!(*ao, *bo + len);
                prop_assert_eq!(bs, as_);
            }
        }
    }
}
