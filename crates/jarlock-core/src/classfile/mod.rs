//! JVM class file codec.
//!
//! [`ClassFile::decode`] parses a class into an editable model and
//! [`ClassFile::encode`] writes it back. Decoding then encoding a class
//! nobody touched gives back the same bytes: Utf8 constants keep their raw
//! encoding, stack-map frames keep their kinds, and attributes the codec
//! does not model are carried as raw bytes.

pub mod analysis;
pub mod bytes;
pub mod code;
pub mod constant_pool;
pub mod descriptor;
pub mod instruction;
pub mod opcode;
pub mod stackmap;

use bytes::{len_u16, put_attribute, put_u16, put_u32, Reader};
use code::Code;
use constant_pool::{Constant, ConstantPool};
use descriptor::MethodDescriptor;

use crate::error::{ClassError, Result};

pub const MAGIC: u32 = 0xCAFE_BABE;

/// Newest major version understood (Java 25).
pub const MAX_MAJOR: u16 = 69;

/// First major version whose verifier requires `StackMapTable` (Java 6).
pub const STACK_MAP_MAJOR: u16 = 50;

// Access flags. Some bits mean different things on classes, fields and
// methods, hence the aliases.
pub const ACC_PUBLIC: u16 = 0x0001;
pub const ACC_PRIVATE: u16 = 0x0002;
pub const ACC_PROTECTED: u16 = 0x0004;
pub const ACC_STATIC: u16 = 0x0008;
pub const ACC_FINAL: u16 = 0x0010;
pub const ACC_SUPER: u16 = 0x0020;
pub const ACC_SYNCHRONIZED: u16 = 0x0020;
pub const ACC_VOLATILE: u16 = 0x0040;
pub const ACC_BRIDGE: u16 = 0x0040;
pub const ACC_NATIVE: u16 = 0x0100;
pub const ACC_INTERFACE: u16 = 0x0200;
pub const ACC_ABSTRACT: u16 = 0x0400;
pub const ACC_SYNTHETIC: u16 = 0x1000;
pub const ACC_ANNOTATION: u16 = 0x2000;
pub const ACC_ENUM: u16 = 0x4000;

/// An attribute kept as raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawAttribute {
    pub name_index: u16,
    pub info: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldInfo {
    pub access_flags: u16,
    pub name_index: u16,
    pub descriptor_index: u16,
    pub attributes: Vec<RawAttribute>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodAttribute {
    Code { name_index: u16, code: Code },
    Raw(RawAttribute),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodInfo {
    pub access_flags: u16,
    pub name_index: u16,
    pub descriptor_index: u16,
    pub attributes: Vec<MethodAttribute>,
}

impl MethodInfo {
    pub fn code(&self) -> Option<&Code> {
        self.attributes.iter().find_map(|a| match a {
            MethodAttribute::Code { code, .. } => Some(code),
            MethodAttribute::Raw(_) => None,
        })
    }

    pub fn code_mut(&mut self) -> Option<&mut Code> {
        self.attributes.iter_mut().find_map(|a| match a {
            MethodAttribute::Code { code, .. } => Some(code),
            MethodAttribute::Raw(_) => None,
        })
    }

    pub fn is_static(&self) -> bool {
        self.access_flags & ACC_STATIC != 0
    }
}

/// One decoded class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassFile {
    pub minor_version: u16,
    pub major_version: u16,
    pub constant_pool: ConstantPool,
    pub access_flags: u16,
    pub this_class: u16,
    /// 0 only for `java/lang/Object` and module-info.
    pub super_class: u16,
    pub interfaces: Vec<u16>,
    pub fields: Vec<FieldInfo>,
    pub methods: Vec<MethodInfo>,
    pub attributes: Vec<RawAttribute>,
}

impl ClassFile {
    // -----------------------------------------------------------------------
    // Construction
    // -----------------------------------------------------------------------

    /// An empty class with a fresh constant pool.
    pub fn new(name: &str, super_name: &str, access_flags: u16, major_version: u16) -> Result<Self> {
        let mut constant_pool = ConstantPool::new();
        let this_class = constant_pool.add_class(name)?;
        let super_class = constant_pool.add_class(super_name)?;
        Ok(Self {
            minor_version: 0,
            major_version,
            constant_pool,
            access_flags,
            this_class,
            super_class,
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            attributes: Vec::new(),
        })
    }

    /// Append a field; returns its index in the field table.
    pub fn add_field(&mut self, access_flags: u16, name: &str, descriptor: &str) -> Result<usize> {
        let name_index = self.constant_pool.add_utf8(name)?;
        let descriptor_index = self.constant_pool.add_utf8(descriptor)?;
        self.fields.push(FieldInfo {
            access_flags,
            name_index,
            descriptor_index,
            attributes: Vec::new(),
        });
        Ok(self.fields.len() - 1)
    }

    /// Append a method; returns its index in the method table.
    pub fn add_method(
        &mut self,
        access_flags: u16,
        name: &str,
        descriptor: &str,
        code: Option<Code>,
    ) -> Result<usize> {
        MethodDescriptor::parse(descriptor)?;
        let name_index = self.constant_pool.add_utf8(name)?;
        let descriptor_index = self.constant_pool.add_utf8(descriptor)?;
        let mut attributes = Vec::new();
        if let Some(code) = code {
            let code_name = self.constant_pool.add_utf8("Code")?;
            attributes.push(MethodAttribute::Code { name_index: code_name, code });
        }
        self.methods.push(MethodInfo {
            access_flags,
            name_index,
            descriptor_index,
            attributes,
        });
        Ok(self.methods.len() - 1)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Internal name, e.g. `com/example/Main`.
    pub fn name(&self) -> Result<String> {
        self.constant_pool.class_name(self.this_class)
    }

    pub fn super_name(&self) -> Result<Option<String>> {
        if self.super_class == 0 {
            return Ok(None);
        }
        self.constant_pool.class_name(self.super_class).map(Some)
    }

    pub fn is_interface(&self) -> bool {
        self.access_flags & ACC_INTERFACE != 0
    }

    pub fn is_annotation(&self) -> bool {
        self.access_flags & ACC_ANNOTATION != 0
    }

    pub fn method_name(&self, method: &MethodInfo) -> Result<String> {
        self.constant_pool.utf8(method.name_index)
    }

    pub fn method_descriptor(&self, method: &MethodInfo) -> Result<String> {
        self.constant_pool.utf8(method.descriptor_index)
    }

    /// Index of the method named `name` with `descriptor`.
    pub fn find_method(&self, name: &str, descriptor: &str) -> Option<usize> {
        self.methods.iter().position(|m| {
            self.method_name(m).ok().as_deref() == Some(name)
                && self.method_descriptor(m).ok().as_deref() == Some(descriptor)
        })
    }

    pub fn requires_stack_map(&self) -> bool {
        self.major_version >= STACK_MAP_MAJOR
    }

    // -----------------------------------------------------------------------
    // Decoding
    // -----------------------------------------------------------------------

    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut r = Reader::new(data);
        let magic = r.u32()?;
        if magic != MAGIC {
            return Err(ClassError::malformed(format!("bad magic {magic:#010x}")));
        }
        let minor_version = r.u16()?;
        let major_version = r.u16()?;
        if major_version > MAX_MAJOR {
            return Err(ClassError::UnsupportedFormatVersion {
                major: major_version,
                minor: minor_version,
                max: MAX_MAJOR,
            });
        }
        if major_version < 45 {
            return Err(ClassError::malformed(format!("major version {major_version}")));
        }

        let constant_pool = ConstantPool::read(&mut r)?;
        let access_flags = r.u16()?;
        let this_class = r.u16()?;
        let super_class = r.u16()?;
        constant_pool.class_name(this_class)?;
        if super_class != 0 {
            constant_pool.class_name(super_class)?;
        }

        let interfaces_count = r.u16()?;
        let mut interfaces = Vec::with_capacity(interfaces_count as usize);
        for _ in 0..interfaces_count {
            let index = r.u16()?;
            constant_pool.class_name(index)?;
            interfaces.push(index);
        }

        let fields_count = r.u16()?;
        let mut fields = Vec::with_capacity(fields_count as usize);
        for _ in 0..fields_count {
            let access_flags = r.u16()?;
            let name_index = r.u16()?;
            let descriptor_index = r.u16()?;
            constant_pool.utf8(name_index)?;
            constant_pool.utf8(descriptor_index)?;
            let attributes = read_raw_attributes(&mut r, &constant_pool)?;
            fields.push(FieldInfo {
                access_flags,
                name_index,
                descriptor_index,
                attributes,
            });
        }

        let methods_count = r.u16()?;
        let mut methods = Vec::with_capacity(methods_count as usize);
        for _ in 0..methods_count {
            let access_flags = r.u16()?;
            let name_index = r.u16()?;
            let descriptor_index = r.u16()?;
            constant_pool.utf8(name_index)?;
            MethodDescriptor::parse(&constant_pool.utf8(descriptor_index)?)?;
            let count = r.u16()?;
            let mut attributes = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let name_index = r.u16()?;
                let length = r.u32()? as usize;
                let info = r.bytes(length)?;
                if constant_pool.utf8(name_index)? == "Code" {
                    attributes.push(MethodAttribute::Code {
                        name_index,
                        code: Code::decode(info, &constant_pool)?,
                    });
                } else {
                    attributes.push(MethodAttribute::Raw(RawAttribute {
                        name_index,
                        info: info.to_vec(),
                    }));
                }
            }
            methods.push(MethodInfo {
                access_flags,
                name_index,
                descriptor_index,
                attributes,
            });
        }

        let attributes = read_raw_attributes(&mut r, &constant_pool)?;
        if !r.is_empty() {
            return Err(ClassError::malformed(format!(
                "{} trailing bytes after class attributes",
                r.remaining()
            )));
        }

        Ok(Self {
            minor_version,
            major_version,
            constant_pool,
            access_flags,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            attributes,
        })
    }

    // -----------------------------------------------------------------------
    // Encoding
    // -----------------------------------------------------------------------

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        put_u32(&mut out, MAGIC);
        put_u16(&mut out, self.minor_version);
        put_u16(&mut out, self.major_version);
        self.constant_pool.write(&mut out)?;
        put_u16(&mut out, self.access_flags);
        put_u16(&mut out, self.this_class);
        put_u16(&mut out, self.super_class);

        put_u16(&mut out, len_u16(self.interfaces.len(), "interfaces")?);
        for index in &self.interfaces {
            put_u16(&mut out, *index);
        }

        put_u16(&mut out, len_u16(self.fields.len(), "fields")?);
        for field in &self.fields {
            put_u16(&mut out, field.access_flags);
            put_u16(&mut out, field.name_index);
            put_u16(&mut out, field.descriptor_index);
            write_raw_attributes(&mut out, &field.attributes)?;
        }

        put_u16(&mut out, len_u16(self.methods.len(), "methods")?);
        for method in &self.methods {
            put_u16(&mut out, method.access_flags);
            put_u16(&mut out, method.name_index);
            put_u16(&mut out, method.descriptor_index);
            put_u16(&mut out, len_u16(method.attributes.len(), "method attributes")?);
            for attr in &method.attributes {
                match attr {
                    MethodAttribute::Code { name_index, code } => {
                        let descriptor = MethodDescriptor::parse(&self.method_descriptor(method)?)?;
                        let body = code.encode(&self.constant_pool, &descriptor, method.is_static())?;
                        put_attribute(&mut out, *name_index, &body)?;
                    }
                    MethodAttribute::Raw(raw) => put_attribute(&mut out, raw.name_index, &raw.info)?,
                }
            }
        }

        write_raw_attributes(&mut out, &self.attributes)?;
        Ok(out)
    }
}

fn read_raw_attributes(r: &mut Reader<'_>, pool: &ConstantPool) -> Result<Vec<RawAttribute>> {
    let count = r.u16()?;
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let name_index = r.u16()?;
        match pool.get(name_index)? {
            Constant::Utf8(_) => {}
            _ => {
                return Err(ClassError::malformed(format!(
                    "attribute name index {name_index} is not Utf8"
                )))
            }
        }
        let length = r.u32()? as usize;
        out.push(RawAttribute {
            name_index,
            info: r.bytes(length)?.to_vec(),
        });
    }
    Ok(out)
}

fn write_raw_attributes(out: &mut Vec<u8>, attributes: &[RawAttribute]) -> Result<()> {
    put_u16(out, len_u16(attributes.len(), "attributes")?);
    for attr in attributes {
        put_attribute(out, attr.name_index, &attr.info)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::code::{CodeAttribute, CodeBuilder, LineNumber};
    use super::instruction::Instruction;
    use super::opcode::*;
    use super::*;

    fn sample_class() -> ClassFile {
        let mut class = ClassFile::new("p/Main", "java/lang/Object", ACC_PUBLIC | ACC_SUPER, 52).unwrap();
        class.add_field(ACC_PRIVATE, "count", "I").unwrap();
        let field = class.constant_pool.add_field_ref("p/Main", "count", "I").unwrap();
        let mut b = CodeBuilder::new();
        let skip = b.label();
        b.op(ALOAD_0)
            .push(Instruction::Cp { opcode: GETFIELD, index: field })
            .jump(IFEQ, skip)
            .op(RETURN)
            .bind(skip)
            .op(RETURN);
        let (mut code, labels) = b.build().unwrap();
        let lnt = class.constant_pool.add_utf8("LineNumberTable").unwrap();
        code.attributes.push(CodeAttribute::LineNumberTable {
            name_index: lnt,
            entries: vec![LineNumber { start_pc: 0, line: 3 }],
        });
        let smt = class.constant_pool.add_utf8("StackMapTable").unwrap();
        code.set_stack_map(smt, vec![stackmap::StackMapFrame::Same { offset_delta: labels[0] as u16 }]);
        class.add_method(ACC_PUBLIC, "onEnable", "()V", Some(code)).unwrap();
        class
    }

    #[test]
    fn test_roundtrip_is_byte_identical() {
        let bytes = sample_class().encode().unwrap();
        let decoded = ClassFile::decode(&bytes).unwrap();
        assert_eq!(decoded.name().unwrap(), "p/Main");
        assert_eq!(decoded.super_name().unwrap().as_deref(), Some("java/lang/Object"));
        let again = decoded.encode().unwrap();
        assert_eq!(bytes, again);
    }

    #[test]
    fn test_encode_computes_max_values() {
        let bytes = sample_class().encode().unwrap();
        let decoded = ClassFile::decode(&bytes).unwrap();
        let idx = decoded.find_method("onEnable", "()V").unwrap();
        let code = decoded.methods[idx].code().unwrap();
        assert_eq!(code.max_stack, 1);
        assert_eq!(code.max_locals, 1);
    }

    #[test]
    fn test_rejects_newer_version() {
        let mut class = sample_class();
        class.major_version = MAX_MAJOR + 1;
        let bytes = class.encode().unwrap();
        assert_eq!(
            ClassFile::decode(&bytes).unwrap_err(),
            ClassError::UnsupportedFormatVersion { major: 70, minor: 0, max: 69 }
        );
    }

    #[test]
    fn test_rejects_bad_magic_and_truncation() {
        let bytes = sample_class().encode().unwrap();
        let mut bad = bytes.clone();
        bad[0] = 0;
        assert!(matches!(ClassFile::decode(&bad), Err(ClassError::MalformedUnit(_))));
        assert!(matches!(
            ClassFile::decode(&bytes[..bytes.len() - 3]),
            Err(ClassError::MalformedUnit(_))
        ));
    }

    #[test]
    fn test_trailing_bytes_are_malformed() {
        let bytes = sample_class().encode().unwrap();
        let mut longer = bytes.clone();
        longer.push(0);
        assert!(matches!(ClassFile::decode(&longer), Err(ClassError::MalformedUnit(_))));
    }

    #[test]
    fn test_code_overflow() {
        let mut class = ClassFile::new("p/Big", "java/lang/Object", ACC_PUBLIC, 52).unwrap();
        let mut insns = vec![Instruction::Simple(NOP); 70_000];
        insns.push(Instruction::Simple(RETURN));
        class
            .add_method(ACC_PUBLIC | ACC_STATIC, "big", "()V", Some(Code::from_instructions(insns)))
            .unwrap();
        assert!(matches!(class.encode(), Err(ClassError::EncodingOverflow(_))));
    }
}
