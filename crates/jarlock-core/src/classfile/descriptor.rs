//! Field and method descriptor parsing.

use std::fmt;

use crate::error::{ClassError, Result};

/// A parsed field type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    Byte,
    Char,
    Double,
    Float,
    Int,
    Long,
    Short,
    Boolean,
    /// Internal class name, e.g. `java/lang/String`.
    Object(String),
    Array(Box<FieldType>),
}

impl FieldType {
    /// Local-variable / operand-stack slots taken by a value of this type.
    pub fn slots(&self) -> u16 {
        match self {
            FieldType::Long | FieldType::Double => 2,
            _ => 1,
        }
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, FieldType::Object(_) | FieldType::Array(_))
    }

    /// Whether the verifier treats the type as `int`.
    pub fn is_int_like(&self) -> bool {
        matches!(
            self,
            FieldType::Byte | FieldType::Char | FieldType::Short | FieldType::Int | FieldType::Boolean
        )
    }

    /// The name a `CONSTANT_Class` entry uses for this type: the internal
    /// name for classes, the full descriptor for arrays.
    pub fn class_entry_name(&self) -> Option<String> {
        match self {
            FieldType::Object(name) => Some(name.clone()),
            FieldType::Array(_) => Some(self.to_string()),
            _ => None,
        }
    }

    pub fn parse(descriptor: &str) -> Result<Self> {
        let bytes = descriptor.as_bytes();
        let (ty, used) = parse_field(bytes, 0)?;
        if used != bytes.len() {
            return Err(bad(descriptor));
        }
        Ok(ty)
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Byte => f.write_str("B"),
            FieldType::Char => f.write_str("C"),
            FieldType::Double => f.write_str("D"),
            FieldType::Float => f.write_str("F"),
            FieldType::Int => f.write_str("I"),
            FieldType::Long => f.write_str("J"),
            FieldType::Short => f.write_str("S"),
            FieldType::Boolean => f.write_str("Z"),
            FieldType::Object(name) => write!(f, "L{name};"),
            FieldType::Array(inner) => write!(f, "[{inner}"),
        }
    }
}

/// A parsed method descriptor. `ret` is `None` for `void`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
    pub params: Vec<FieldType>,
    pub ret: Option<FieldType>,
}

impl MethodDescriptor {
    pub fn parse(descriptor: &str) -> Result<Self> {
        let bytes = descriptor.as_bytes();
        if bytes.first() != Some(&b'(') {
            return Err(bad(descriptor));
        }
        let mut pos = 1;
        let mut params = Vec::new();
        loop {
            match bytes.get(pos) {
                Some(b')') => {
                    pos += 1;
                    break;
                }
                Some(_) => {
                    let (ty, next) = parse_field(bytes, pos)?;
                    params.push(ty);
                    pos = next;
                }
                None => return Err(bad(descriptor)),
            }
        }
        let ret = match bytes.get(pos) {
            Some(b'V') if pos + 1 == bytes.len() => None,
            Some(_) => {
                let (ty, next) = parse_field(bytes, pos)?;
                if next != bytes.len() {
                    return Err(bad(descriptor));
                }
                Some(ty)
            }
            None => return Err(bad(descriptor)),
        };
        Ok(Self { params, ret })
    }

    /// Slots taken by the arguments, excluding `this`.
    pub fn arg_slots(&self) -> u16 {
        self.params.iter().map(FieldType::slots).sum()
    }

    /// Slots pushed by the return value.
    pub fn ret_slots(&self) -> u16 {
        self.ret.as_ref().map_or(0, FieldType::slots)
    }
}

fn bad(descriptor: &str) -> ClassError {
    ClassError::malformed(format!("invalid descriptor {descriptor:?}"))
}

fn parse_field(bytes: &[u8], pos: usize) -> Result<(FieldType, usize)> {
    let invalid = || bad(&String::from_utf8_lossy(bytes));
    let tag = *bytes.get(pos).ok_or_else(invalid)?;
    let ty = match tag {
        b'B' => FieldType::Byte,
        b'C' => FieldType::Char,
        b'D' => FieldType::Double,
        b'F' => FieldType::Float,
        b'I' => FieldType::Int,
        b'J' => FieldType::Long,
        b'S' => FieldType::Short,
        b'Z' => FieldType::Boolean,
        b'L' => {
            let rest = &bytes[pos + 1..];
            let end = rest.iter().position(|&b| b == b';').ok_or_else(invalid)?;
            if end == 0 {
                return Err(invalid());
            }
            let name = String::from_utf8_lossy(&rest[..end]).into_owned();
            return Ok((FieldType::Object(name), pos + 1 + end + 1));
        }
        b'[' => {
            let (inner, next) = parse_field(bytes, pos + 1)?;
            return Ok((FieldType::Array(Box::new(inner)), next));
        }
        _ => return Err(invalid()),
    };
    Ok((ty, pos + 1))
}
