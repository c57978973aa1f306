//! Constant pool model.
//!
//! The pool is 1-indexed; slot 0 is never valid and the slot after a `Long`
//! or `Double` is unusable.  Both are represented by [`Constant::Unusable`]
//! so that `entries[i]` is always the constant at index `i`.
//!
//! Utf8 entries keep their raw modified-UTF-8 bytes so that re-encoding is
//! byte-exact; [`ConstantPool::utf8`] decodes on demand.

use super::bytes::{put_u16, put_u32, put_u64, put_u8, Reader};
use crate::error::{ClassError, Result};

// ---------------------------------------------------------------------------
// Tags
// ---------------------------------------------------------------------------

pub const TAG_UTF8: u8 = 1;
pub const TAG_INTEGER: u8 = 3;
pub const TAG_FLOAT: u8 = 4;
pub const TAG_LONG: u8 = 5;
pub const TAG_DOUBLE: u8 = 6;
pub const TAG_CLASS: u8 = 7;
pub const TAG_STRING: u8 = 8;
pub const TAG_FIELDREF: u8 = 9;
pub const TAG_METHODREF: u8 = 10;
pub const TAG_INTERFACE_METHODREF: u8 = 11;
pub const TAG_NAME_AND_TYPE: u8 = 12;
pub const TAG_METHOD_HANDLE: u8 = 15;
pub const TAG_METHOD_TYPE: u8 = 16;
pub const TAG_DYNAMIC: u8 = 17;
pub const TAG_INVOKE_DYNAMIC: u8 = 18;
pub const TAG_MODULE: u8 = 19;
pub const TAG_PACKAGE: u8 = 20;

/// One constant pool entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constant {
    /// Index 0 and the second slot of a `Long`/`Double`.
    Unusable,
    Utf8(Vec<u8>),
    Integer(i32),
    /// Raw IEEE bits, so NaN payloads survive a round trip.
    Float(u32),
    Long(i64),
    Double(u64),
    Class { name: u16 },
    String { value: u16 },
    FieldRef { class: u16, name_and_type: u16 },
    MethodRef { class: u16, name_and_type: u16 },
    InterfaceMethodRef { class: u16, name_and_type: u16 },
    NameAndType { name: u16, descriptor: u16 },
    MethodHandle { kind: u8, reference: u16 },
    MethodType { descriptor: u16 },
    Dynamic { bootstrap: u16, name_and_type: u16 },
    InvokeDynamic { bootstrap: u16, name_and_type: u16 },
    Module { name: u16 },
    Package { name: u16 },
}

impl Constant {
    fn kind(&self) -> &'static str {
        match self {
            Constant::Unusable => "unusable",
            Constant::Utf8(_) => "Utf8",
            Constant::Integer(_) => "Integer",
            Constant::Float(_) => "Float",
            Constant::Long(_) => "Long",
            Constant::Double(_) => "Double",
            Constant::Class { .. } => "Class",
            Constant::String { .. } => "String",
            Constant::FieldRef { .. } => "Fieldref",
            Constant::MethodRef { .. } => "Methodref",
            Constant::InterfaceMethodRef { .. } => "InterfaceMethodref",
            Constant::NameAndType { .. } => "NameAndType",
            Constant::MethodHandle { .. } => "MethodHandle",
            Constant::MethodType { .. } => "MethodType",
            Constant::Dynamic { .. } => "Dynamic",
            Constant::InvokeDynamic { .. } => "InvokeDynamic",
            Constant::Module { .. } => "Module",
            Constant::Package { .. } => "Package",
        }
    }
}

/// A resolved field or method reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberRef {
    pub class: String,
    pub name: String,
    pub descriptor: String,
}

/// The constant pool of one class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstantPool {
    entries: Vec<Constant>,
}

impl Default for ConstantPool {
    fn default() -> Self {
        Self::new()
    }
}

impl ConstantPool {
    /// An empty pool (just the reserved slot 0).
    pub fn new() -> Self {
        Self {
            entries: vec![Constant::Unusable],
        }
    }

    /// `constant_pool_count` as written in the class file.
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> &[Constant] {
        &self.entries
    }

    // -----------------------------------------------------------------------
    // Decoding / encoding
    // -----------------------------------------------------------------------

    pub(crate) fn read(r: &mut Reader<'_>) -> Result<Self> {
        let count = r.u16()? as usize;
        if count == 0 {
            return Err(ClassError::malformed("constant_pool_count is zero"));
        }
        let mut entries = Vec::with_capacity(count);
        entries.push(Constant::Unusable);
        while entries.len() < count {
            let index = entries.len();
            let tag = r.u8()?;
            let constant = match tag {
                TAG_UTF8 => {
                    let len = r.u16()? as usize;
                    Constant::Utf8(r.bytes(len)?.to_vec())
                }
                TAG_INTEGER => Constant::Integer(r.i32()?),
                TAG_FLOAT => Constant::Float(r.u32()?),
                TAG_LONG => Constant::Long(r.u64()? as i64),
                TAG_DOUBLE => Constant::Double(r.u64()?),
                TAG_CLASS => Constant::Class { name: r.u16()? },
                TAG_STRING => Constant::String { value: r.u16()? },
                TAG_FIELDREF => Constant::FieldRef {
                    class: r.u16()?,
                    name_and_type: r.u16()?,
                },
                TAG_METHODREF => Constant::MethodRef {
                    class: r.u16()?,
                    name_and_type: r.u16()?,
                },
                TAG_INTERFACE_METHODREF => Constant::InterfaceMethodRef {
                    class: r.u16()?,
                    name_and_type: r.u16()?,
                },
                TAG_NAME_AND_TYPE => Constant::NameAndType {
                    name: r.u16()?,
                    descriptor: r.u16()?,
                },
                TAG_METHOD_HANDLE => Constant::MethodHandle {
                    kind: r.u8()?,
                    reference: r.u16()?,
                },
                TAG_METHOD_TYPE => Constant::MethodType { descriptor: r.u16()? },
                TAG_DYNAMIC => Constant::Dynamic {
                    bootstrap: r.u16()?,
                    name_and_type: r.u16()?,
                },
                TAG_INVOKE_DYNAMIC => Constant::InvokeDynamic {
                    bootstrap: r.u16()?,
                    name_and_type: r.u16()?,
                },
                TAG_MODULE => Constant::Module { name: r.u16()? },
                TAG_PACKAGE => Constant::Package { name: r.u16()? },
                other => {
                    return Err(ClassError::malformed(format!(
                        "unknown constant tag {other} at index {index}"
                    )))
                }
            };
            let wide = matches!(constant, Constant::Long(_) | Constant::Double(_));
            entries.push(constant);
            if wide {
                if entries.len() >= count {
                    return Err(ClassError::malformed(format!(
                        "8-byte constant at index {index} overruns the pool"
                    )));
                }
                entries.push(Constant::Unusable);
            }
        }
        let pool = Self { entries };
        pool.validate()?;
        Ok(pool)
    }

    pub(crate) fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        if self.entries.len() > u16::MAX as usize {
            return Err(ClassError::overflow(format!(
                "constant pool has {} slots",
                self.entries.len()
            )));
        }
        put_u16(out, self.entries.len() as u16);
        for constant in &self.entries[1..] {
            match constant {
                Constant::Unusable => {}
                Constant::Utf8(bytes) => {
                    put_u8(out, TAG_UTF8);
                    let len = u16::try_from(bytes.len()).map_err(|_| {
                        ClassError::overflow(format!("Utf8 constant of {} bytes", bytes.len()))
                    })?;
                    put_u16(out, len);
                    out.extend_from_slice(bytes);
                }
                Constant::Integer(v) => {
                    put_u8(out, TAG_INTEGER);
                    put_u32(out, *v as u32);
                }
                Constant::Float(bits) => {
                    put_u8(out, TAG_FLOAT);
                    put_u32(out, *bits);
                }
                Constant::Long(v) => {
                    put_u8(out, TAG_LONG);
                    put_u64(out, *v as u64);
                }
                Constant::Double(bits) => {
                    put_u8(out, TAG_DOUBLE);
                    put_u64(out, *bits);
                }
                Constant::Class { name } => {
                    put_u8(out, TAG_CLASS);
                    put_u16(out, *name);
                }
                Constant::String { value } => {
                    put_u8(out, TAG_STRING);
                    put_u16(out, *value);
                }
                Constant::FieldRef { class, name_and_type } => {
                    put_u8(out, TAG_FIELDREF);
                    put_u16(out, *class);
                    put_u16(out, *name_and_type);
                }
                Constant::MethodRef { class, name_and_type } => {
                    put_u8(out, TAG_METHODREF);
                    put_u16(out, *class);
                    put_u16(out, *name_and_type);
                }
                Constant::InterfaceMethodRef { class, name_and_type } => {
                    put_u8(out, TAG_INTERFACE_METHODREF);
                    put_u16(out, *class);
                    put_u16(out, *name_and_type);
                }
                Constant::NameAndType { name, descriptor } => {
                    put_u8(out, TAG_NAME_AND_TYPE);
                    put_u16(out, *name);
                    put_u16(out, *descriptor);
                }
                Constant::MethodHandle { kind, reference } => {
                    put_u8(out, TAG_METHOD_HANDLE);
                    put_u8(out, *kind);
                    put_u16(out, *reference);
                }
                Constant::MethodType { descriptor } => {
                    put_u8(out, TAG_METHOD_TYPE);
                    put_u16(out, *descriptor);
                }
                Constant::Dynamic { bootstrap, name_and_type } => {
                    put_u8(out, TAG_DYNAMIC);
                    put_u16(out, *bootstrap);
                    put_u16(out, *name_and_type);
                }
                Constant::InvokeDynamic { bootstrap, name_and_type } => {
                    put_u8(out, TAG_INVOKE_DYNAMIC);
                    put_u16(out, *bootstrap);
                    put_u16(out, *name_and_type);
                }
                Constant::Module { name } => {
                    put_u8(out, TAG_MODULE);
                    put_u16(out, *name);
                }
                Constant::Package { name } => {
                    put_u8(out, TAG_PACKAGE);
                    put_u16(out, *name);
                }
            }
        }
        Ok(())
    }

    /// Check every cross-reference inside the pool points at an entry of
    /// the right kind.
    fn validate(&self) -> Result<()> {
        for (index, constant) in self.entries.iter().enumerate() {
            let ctx = |what: &str| format!("{} at index {index}: {what}", constant.kind());
            match constant {
                Constant::Class { name }
                | Constant::Module { name }
                | Constant::Package { name } => {
                    self.expect_utf8(*name).map_err(|e| relabel(e, &ctx("name")))?;
                }
                Constant::String { value } => {
                    self.expect_utf8(*value).map_err(|e| relabel(e, &ctx("value")))?;
                }
                Constant::MethodType { descriptor } => {
                    self.expect_utf8(*descriptor)
                        .map_err(|e| relabel(e, &ctx("descriptor")))?;
                }
                Constant::FieldRef { class, name_and_type }
                | Constant::MethodRef { class, name_and_type }
                | Constant::InterfaceMethodRef { class, name_and_type } => {
                    match self.get(*class) {
                        Ok(Constant::Class { .. }) => {}
                        _ => return Err(ClassError::malformed(ctx("class is not a Class"))),
                    }
                    match self.get(*name_and_type) {
                        Ok(Constant::NameAndType { .. }) => {}
                        _ => {
                            return Err(ClassError::malformed(ctx(
                                "name_and_type is not a NameAndType",
                            )))
                        }
                    }
                }
                Constant::NameAndType { name, descriptor } => {
                    self.expect_utf8(*name).map_err(|e| relabel(e, &ctx("name")))?;
                    self.expect_utf8(*descriptor)
                        .map_err(|e| relabel(e, &ctx("descriptor")))?;
                }
                Constant::Dynamic { name_and_type, .. }
                | Constant::InvokeDynamic { name_and_type, .. } => {
                    match self.get(*name_and_type) {
                        Ok(Constant::NameAndType { .. }) => {}
                        _ => {
                            return Err(ClassError::malformed(ctx(
                                "name_and_type is not a NameAndType",
                            )))
                        }
                    }
                }
                Constant::MethodHandle { kind, reference } => {
                    if !(1..=9).contains(kind) {
                        return Err(ClassError::malformed(ctx("reference kind out of range")));
                    }
                    match self.get(*reference) {
                        Ok(Constant::FieldRef { .. })
                        | Ok(Constant::MethodRef { .. })
                        | Ok(Constant::InterfaceMethodRef { .. }) => {}
                        _ => return Err(ClassError::malformed(ctx("reference is not a member ref"))),
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn expect_utf8(&self, index: u16) -> Result<()> {
        match self.get(index)? {
            Constant::Utf8(_) => Ok(()),
            other => Err(ClassError::malformed(format!(
                "index {index} is {} not Utf8",
                other.kind()
            ))),
        }
    }

    // -----------------------------------------------------------------------
    // Lookups
    // -----------------------------------------------------------------------

    /// Entry at `index`; index 0, out-of-range indices and the unusable
    /// second slot of wide constants are rejected.
    pub fn get(&self, index: u16) -> Result<&Constant> {
        match self.entries.get(index as usize) {
            None => Err(ClassError::malformed(format!(
                "constant pool index {index} out of range (count {})",
                self.entries.len()
            ))),
            Some(Constant::Unusable) => Err(ClassError::malformed(format!(
                "constant pool index {index} is not usable"
            ))),
            Some(c) => Ok(c),
        }
    }

    /// Decoded Utf8 entry.
    pub fn utf8(&self, index: u16) -> Result<String> {
        match self.get(index)? {
            Constant::Utf8(bytes) => decode_modified_utf8(bytes),
            other => Err(ClassError::malformed(format!(
                "index {index} is {} not Utf8",
                other.kind()
            ))),
        }
    }

    /// Internal name (`java/lang/Object`) of the Class entry at `index`.
    pub fn class_name(&self, index: u16) -> Result<String> {
        match self.get(index)? {
            Constant::Class { name } => self.utf8(*name),
            other => Err(ClassError::malformed(format!(
                "index {index} is {} not Class",
                other.kind()
            ))),
        }
    }

    /// `(name, descriptor)` of a NameAndType entry.
    pub fn name_and_type(&self, index: u16) -> Result<(String, String)> {
        match self.get(index)? {
            Constant::NameAndType { name, descriptor } => {
                Ok((self.utf8(*name)?, self.utf8(*descriptor)?))
            }
            other => Err(ClassError::malformed(format!(
                "index {index} is {} not NameAndType",
                other.kind()
            ))),
        }
    }

    /// Resolve a Fieldref / Methodref / InterfaceMethodref.
    pub fn member_ref(&self, index: u16) -> Result<MemberRef> {
        match self.get(index)? {
            Constant::FieldRef { class, name_and_type }
            | Constant::MethodRef { class, name_and_type }
            | Constant::InterfaceMethodRef { class, name_and_type } => {
                let (name, descriptor) = self.name_and_type(*name_and_type)?;
                Ok(MemberRef {
                    class: self.class_name(*class)?,
                    name,
                    descriptor,
                })
            }
            other => Err(ClassError::malformed(format!(
                "index {index} is {} not a member reference",
                other.kind()
            ))),
        }
    }

    /// Descriptor of an InvokeDynamic or Dynamic entry.
    pub fn dynamic_descriptor(&self, index: u16) -> Result<String> {
        match self.get(index)? {
            Constant::InvokeDynamic { name_and_type, .. }
            | Constant::Dynamic { name_and_type, .. } => Ok(self.name_and_type(*name_and_type)?.1),
            other => Err(ClassError::malformed(format!(
                "index {index} is {} not a dynamic constant",
                other.kind()
            ))),
        }
    }

    // -----------------------------------------------------------------------
    // Additions (find-or-insert)
    // -----------------------------------------------------------------------

    fn push(&mut self, constant: Constant) -> Result<u16> {
        let index = self.entries.len();
        let slots = if matches!(constant, Constant::Long(_) | Constant::Double(_)) {
            2
        } else {
            1
        };
        if index + slots > u16::MAX as usize {
            return Err(ClassError::overflow("constant pool is full"));
        }
        self.entries.push(constant);
        if slots == 2 {
            self.entries.push(Constant::Unusable);
        }
        Ok(index as u16)
    }

    fn find_or_push(&mut self, constant: Constant) -> Result<u16> {
        match self.entries.iter().position(|c| *c == constant) {
            Some(i) if i > 0 => Ok(i as u16),
            _ => self.push(constant),
        }
    }

    pub fn add_utf8(&mut self, value: &str) -> Result<u16> {
        self.find_or_push(Constant::Utf8(encode_modified_utf8(value)))
    }

    pub fn add_class(&mut self, internal_name: &str) -> Result<u16> {
        let name = self.add_utf8(internal_name)?;
        self.find_or_push(Constant::Class { name })
    }

    pub fn add_string(&mut self, value: &str) -> Result<u16> {
        let value = self.add_utf8(value)?;
        self.find_or_push(Constant::String { value })
    }

    pub fn add_name_and_type(&mut self, name: &str, descriptor: &str) -> Result<u16> {
        let name = self.add_utf8(name)?;
        let descriptor = self.add_utf8(descriptor)?;
        self.find_or_push(Constant::NameAndType { name, descriptor })
    }

    pub fn add_field_ref(&mut self, class: &str, name: &str, descriptor: &str) -> Result<u16> {
        let class = self.add_class(class)?;
        let name_and_type = self.add_name_and_type(name, descriptor)?;
        self.find_or_push(Constant::FieldRef { class, name_and_type })
    }

    pub fn add_method_ref(&mut self, class: &str, name: &str, descriptor: &str) -> Result<u16> {
        let class = self.add_class(class)?;
        let name_and_type = self.add_name_and_type(name, descriptor)?;
        self.find_or_push(Constant::MethodRef { class, name_and_type })
    }

    /// Index of an existing Class entry naming `internal_name`, if any.
    pub fn find_class(&self, internal_name: &str) -> Option<u16> {
        let wanted = encode_modified_utf8(internal_name);
        self.entries.iter().enumerate().find_map(|(i, c)| match c {
            Constant::Class { name } => match self.entries.get(*name as usize) {
                Some(Constant::Utf8(bytes)) if *bytes == wanted => Some(i as u16),
                _ => None,
            },
            _ => None,
        })
    }
}

fn relabel(err: ClassError, ctx: &str) -> ClassError {
    match err {
        ClassError::MalformedUnit(msg) => ClassError::MalformedUnit(format!("{ctx}: {msg}")),
        other => other,
    }
}

// ---------------------------------------------------------------------------
// Modified UTF-8
// ---------------------------------------------------------------------------

/// Decode the JVM's modified UTF-8 (NUL as `C0 80`, supplementary
/// characters as surrogate pairs).
pub fn decode_modified_utf8(bytes: &[u8]) -> Result<String> {
    let mut units: Vec<u16> = Vec::with_capacity(bytes.len());
    let mut i = 0;
    let bad = |at: usize| ClassError::malformed(format!("invalid modified UTF-8 at byte {at}"));
    while i < bytes.len() {
        let b = bytes[i];
        if b & 0x80 == 0 {
            if b == 0 {
                return Err(bad(i));
            }
            units.push(b as u16);
            i += 1;
        } else if b & 0xE0 == 0xC0 {
            let b2 = *bytes.get(i + 1).ok_or_else(|| bad(i))?;
            if b2 & 0xC0 != 0x80 {
                return Err(bad(i));
            }
            units.push((((b & 0x1F) as u16) << 6) | (b2 & 0x3F) as u16);
            i += 2;
        } else if b & 0xF0 == 0xE0 {
            let b2 = *bytes.get(i + 1).ok_or_else(|| bad(i))?;
            let b3 = *bytes.get(i + 2).ok_or_else(|| bad(i))?;
            if b2 & 0xC0 != 0x80 || b3 & 0xC0 != 0x80 {
                return Err(bad(i));
            }
            units.push(
                (((b & 0x0F) as u16) << 12) | (((b2 & 0x3F) as u16) << 6) | (b3 & 0x3F) as u16,
            );
            i += 3;
        } else {
            return Err(bad(i));
        }
    }
    Ok(String::from_utf16_lossy(&units))
}

/// Encode a string as modified UTF-8.
pub fn encode_modified_utf8(value: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(value.len());
    for unit in value.encode_utf16() {
        match unit {
            0x0001..=0x007F => out.push(unit as u8),
            0x0000 | 0x0080..=0x07FF => {
                out.push(0xC0 | ((unit >> 6) & 0x1F) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
            _ => {
                out.push(0xE0 | ((unit >> 12) & 0x0F) as u8);
                out.push(0x80 | ((unit >> 6) & 0x3F) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(pool: &ConstantPool) -> ConstantPool {
        let mut out = Vec::new();
        pool.write(&mut out).unwrap();
        let mut r = Reader::new(&out);
        ConstantPool::read(&mut r).unwrap()
    }

    #[test]
    fn test_add_dedups_entries() {
        let mut pool = ConstantPool::new();
        let a = pool.add_method_ref("a/Gate", "check", "()Z").unwrap();
        let b = pool.add_method_ref("a/Gate", "check", "()Z").unwrap();
        assert_eq!(a, b);
        assert_eq!(pool.add_class("a/Gate").unwrap(), pool.find_class("a/Gate").unwrap());
    }

    #[test]
    fn test_member_ref_resolves() {
        let mut pool = ConstantPool::new();
        let idx = pool.add_field_ref("p/Main", "count", "I").unwrap();
        let m = pool.member_ref(idx).unwrap();
        assert_eq!(m.class, "p/Main");
        assert_eq!(m.name, "count");
        assert_eq!(m.descriptor, "I");
    }

    #[test]
    fn test_long_takes_two_slots() {
        let mut pool = ConstantPool::new();
        let l = pool.push(Constant::Long(7)).unwrap();
        let s = pool.add_utf8("after").unwrap();
        assert_eq!(s, l + 2);
        assert!(pool.get(l + 1).is_err());
        let back = roundtrip(&pool);
        assert_eq!(back, pool);
    }

    #[test]
    fn test_out_of_range_reference_is_malformed() {
        // count=2, one Class entry pointing at index 9
        let bytes = [0x00, 0x02, TAG_CLASS, 0x00, 0x09];
        let mut r = Reader::new(&bytes);
        let err = ConstantPool::read(&mut r).unwrap_err();
        assert!(matches!(err, ClassError::MalformedUnit(_)));
    }

    #[test]
    fn test_wrong_kind_reference_is_malformed() {
        // #1 Integer, #2 Class -> #1
        let bytes = [0x00, 0x03, TAG_INTEGER, 0, 0, 0, 1, TAG_CLASS, 0x00, 0x01];
        let mut r = Reader::new(&bytes);
        assert!(ConstantPool::read(&mut r).is_err());
    }

    #[test]
    fn test_modified_utf8_nul_and_supplementary() {
        let s = "a\u{0}b\u{1F600}é";
        let encoded = encode_modified_utf8(s);
        assert_eq!(&encoded[1..3], &[0xC0, 0x80]);
        assert!(!encoded.contains(&0));
        assert_eq!(decode_modified_utf8(&encoded).unwrap(), s);
    }
}
