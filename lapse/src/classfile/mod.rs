//! # JVM Class-File Codec
//!
//! Just enough of JVMS chapter 4 to move a method body aside and add a
//! wrapper in front of it, or to splice hook calls into a body in place:
//!
//! ```text
//! ClassFile
//!   ├─ ConstantPool        every tag, Long/Double take two slots
//!   ├─ fields / methods    Member { flags, name, descriptor, raw attributes }
//!   └─ attributes          raw
//! ```
//!
//! Attributes stay opaque byte blobs except where the rewriter needs to look
//! inside (`Code`, `StackMapTable` and the pc tables of a spliced body). A parsed class that is written back
//! without changes is byte-identical to the input.

pub mod bytes;
pub mod code;
pub mod constant_pool;
pub mod descriptor;
pub mod instructions;
pub mod mutf8;
pub mod opcodes;

use crate::domain::ClassFormatError;
use bytes::{table_len, ByteReader, PutBe};

pub use code::{CodeAttribute, ExceptionEntry, StackMapFrame, VerificationType};
pub use constant_pool::{Constant, ConstantPool};
pub use descriptor::{BaseType, FieldType, MethodDescriptor, ValueKind};

pub const MAGIC: u32 = 0xCAFE_BABE;

/// First class-file version that carries `StackMapTable` frames (Java 6)
pub const STACK_MAP_MAJOR_VERSION: u16 = 50;

pub const ACC_PUBLIC: u16 = 0x0001;
pub const ACC_PRIVATE: u16 = 0x0002;
pub const ACC_PROTECTED: u16 = 0x0004;
pub const ACC_STATIC: u16 = 0x0008;
pub const ACC_FINAL: u16 = 0x0010;
pub const ACC_SYNCHRONIZED: u16 = 0x0020;
pub const ACC_BRIDGE: u16 = 0x0040;
pub const ACC_VARARGS: u16 = 0x0080;
pub const ACC_NATIVE: u16 = 0x0100;
pub const ACC_INTERFACE: u16 = 0x0200;
pub const ACC_ABSTRACT: u16 = 0x0400;
pub const ACC_STRICT: u16 = 0x0800;
pub const ACC_SYNTHETIC: u16 = 0x1000;

/// Java-style modifier list for method access flags, e.g. `public static synchronized`
pub fn method_modifiers(flags: u16) -> String {
    const NAMES: [(u16, &str); 11] = [
        (ACC_PUBLIC, "public"),
        (ACC_PRIVATE, "private"),
        (ACC_PROTECTED, "protected"),
        (ACC_STATIC, "static"),
        (ACC_FINAL, "final"),
        (ACC_SYNCHRONIZED, "synchronized"),
        (ACC_BRIDGE, "bridge"),
        (ACC_VARARGS, "varargs"),
        (ACC_NATIVE, "native"),
        (ACC_ABSTRACT, "abstract"),
        (ACC_SYNTHETIC, "synthetic"),
    ];
    NAMES
        .iter()
        .filter(|(flag, _)| flags & flag != 0)
        .map(|(_, name)| *name)
        .collect::<Vec<_>>()
        .join(" ")
}

pub const ATTR_CODE: &str = "Code";
pub const ATTR_STACK_MAP_TABLE: &str = "StackMapTable";
pub const ATTR_LINE_NUMBER_TABLE: &str = "LineNumberTable";
pub const ATTR_LOCAL_VARIABLE_TABLE: &str = "LocalVariableTable";
pub const ATTR_LOCAL_VARIABLE_TYPE_TABLE: &str = "LocalVariableTypeTable";

/// An attribute with its name index and undecoded body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name_index: u16,
    pub info: Vec<u8>,
}

impl Attribute {
    fn parse_table(r: &mut ByteReader<'_>) -> Result<Vec<Self>, ClassFormatError> {
        let count = r.u16()?;
        (0..count)
            .map(|_| {
                let name_index = r.u16()?;
                let len = r.u32()? as usize;
                Ok(Attribute { name_index, info: r.bytes(len)?.to_vec() })
            })
            .collect()
    }

    fn write_table(attributes: &[Self], out: &mut Vec<u8>) -> Result<(), ClassFormatError> {
        out.put_u16(table_len(attributes.len())?);
        for attribute in attributes {
            out.put_u16(attribute.name_index);
            let len = u32::try_from(attribute.info.len())
                .map_err(|_| ClassFormatError::CodeTooLarge(format!("attribute #{}", attribute.name_index)))?;
            out.put_u32(len);
            out.extend_from_slice(&attribute.info);
        }
        Ok(())
    }
}

/// A field or method
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub access_flags: u16,
    pub name_index: u16,
    pub descriptor_index: u16,
    pub attributes: Vec<Attribute>,
}

impl Member {
    fn parse(r: &mut ByteReader<'_>) -> Result<Self, ClassFormatError> {
        Ok(Self {
            access_flags: r.u16()?,
            name_index: r.u16()?,
            descriptor_index: r.u16()?,
            attributes: Attribute::parse_table(r)?,
        })
    }

    fn write(&self, out: &mut Vec<u8>) -> Result<(), ClassFormatError> {
        out.put_u16(self.access_flags);
        out.put_u16(self.name_index);
        out.put_u16(self.descriptor_index);
        Attribute::write_table(&self.attributes, out)
    }

    pub fn has_flag(&self, flag: u16) -> bool {
        self.access_flags & flag != 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassFile {
    pub minor_version: u16,
    pub major_version: u16,
    pub constant_pool: ConstantPool,
    pub access_flags: u16,
    pub this_class: u16,
    pub super_class: u16,
    pub interfaces: Vec<u16>,
    pub fields: Vec<Member>,
    pub methods: Vec<Member>,
    pub attributes: Vec<Attribute>,
}

impl ClassFile {
    /// # Errors
    ///
    /// Returns `ClassFormatError` if the bytes are not a well-formed class
    /// file: bad magic, truncation, unknown constant tags, or trailing bytes.
    pub fn parse(data: &[u8]) -> Result<Self, ClassFormatError> {
        let mut r = ByteReader::new(data);
        let magic = r.u32()?;
        if magic != MAGIC {
            return Err(ClassFormatError::BadMagic(magic));
        }
        let minor_version = r.u16()?;
        let major_version = r.u16()?;
        let constant_pool = ConstantPool::parse(&mut r)?;
        let access_flags = r.u16()?;
        let this_class = r.u16()?;
        let super_class = r.u16()?;
        let interface_count = r.u16()?;
        let interfaces = (0..interface_count).map(|_| r.u16()).collect::<Result<_, _>>()?;
        let field_count = r.u16()?;
        let fields = (0..field_count).map(|_| Member::parse(&mut r)).collect::<Result<_, _>>()?;
        let method_count = r.u16()?;
        let methods = (0..method_count).map(|_| Member::parse(&mut r)).collect::<Result<_, _>>()?;
        let attributes = Attribute::parse_table(&mut r)?;
        if r.remaining() > 0 {
            return Err(ClassFormatError::TrailingBytes(r.remaining()));
        }

        let class = Self {
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
        };
        // Fail early on a dangling this_class rather than mid-rewrite
        class.this_class_name()?;
        Ok(class)
    }

    /// # Errors
    ///
    /// Returns `ClassFormatError` if a table outgrew its `u16` length field.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ClassFormatError> {
        let mut out = Vec::new();
        out.put_u32(MAGIC);
        out.put_u16(self.minor_version);
        out.put_u16(self.major_version);
        self.constant_pool.write(&mut out)?;
        out.put_u16(self.access_flags);
        out.put_u16(self.this_class);
        out.put_u16(self.super_class);
        out.put_u16(table_len(self.interfaces.len())?);
        for interface in &self.interfaces {
            out.put_u16(*interface);
        }
        out.put_u16(table_len(self.fields.len())?);
        for field in &self.fields {
            field.write(&mut out)?;
        }
        out.put_u16(table_len(self.methods.len())?);
        for method in &self.methods {
            method.write(&mut out)?;
        }
        Attribute::write_table(&self.attributes, &mut out)?;
        Ok(out)
    }

    /// Internal name (`a/b/C`) of this class
    pub fn this_class_name(&self) -> Result<&str, ClassFormatError> {
        self.constant_pool.class_name(self.this_class)
    }

    pub fn is_interface(&self) -> bool {
        self.access_flags & ACC_INTERFACE != 0
    }

    pub fn member_name(&self, member: &Member) -> Result<&str, ClassFormatError> {
        self.constant_pool.utf8(member.name_index)
    }

    pub fn member_descriptor(&self, member: &Member) -> Result<&str, ClassFormatError> {
        self.constant_pool.utf8(member.descriptor_index)
    }

    /// True if a method with this exact name and descriptor is declared
    pub fn has_method(&self, name: &str, descriptor: &str) -> bool {
        self.methods.iter().any(|m| {
            self.member_name(m).is_ok_and(|n| n == name)
                && self.member_descriptor(m).is_ok_and(|d| d == descriptor)
        })
    }

    /// Name of an attribute, or `None` if its name index is invalid
    pub fn attribute_name(&self, attribute: &Attribute) -> Option<&str> {
        self.constant_pool.utf8(attribute.name_index).ok()
    }

    /// Decoded `Code` attribute of a method, if it has one
    pub fn code_of(&self, method: &Member) -> Result<Option<CodeAttribute>, ClassFormatError> {
        method
            .attributes
            .iter()
            .find(|a| self.attribute_name(a) == Some(ATTR_CODE))
            .map(|a| CodeAttribute::parse(&a.info))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// `public class Empty extends java.lang.Object {}` with one `void run()`
    fn minimal_class() -> Vec<u8> {
        let mut pool = ConstantPool::default();
        let this_class = pool.intern_class("demo/Empty").unwrap();
        let super_class = pool.intern_class("java/lang/Object").unwrap();
        let name = pool.intern_utf8("run").unwrap();
        let desc = pool.intern_utf8("()V").unwrap();
        let code_name = pool.intern_utf8(ATTR_CODE).unwrap();
        let code = CodeAttribute {
            max_stack: 0,
            max_locals: 1,
            code: vec![opcodes::RETURN],
            exception_table: vec![],
            attributes: vec![],
        };
        let class = ClassFile {
            minor_version: 0,
            major_version: 52,
            constant_pool: pool,
            access_flags: ACC_PUBLIC,
            this_class,
            super_class,
            interfaces: vec![],
            fields: vec![],
            methods: vec![Member {
                access_flags: ACC_PUBLIC,
                name_index: name,
                descriptor_index: desc,
                attributes: vec![Attribute { name_index: code_name, info: code.to_bytes().unwrap() }],
            }],
            attributes: vec![],
        };
        class.to_bytes().unwrap()
    }

    #[test]
    fn test_parse_serialize_is_identity() {
        let bytes = minimal_class();
        let class = ClassFile::parse(&bytes).unwrap();
        assert_eq!(class.to_bytes().unwrap(), bytes);
        assert_eq!(class.this_class_name().unwrap(), "demo/Empty");
        assert!(class.has_method("run", "()V"));
        assert!(!class.has_method("run", "(I)V"));
        let code = class.code_of(&class.methods[0]).unwrap().unwrap();
        assert_eq!(code.code, vec![opcodes::RETURN]);
    }

    #[test]
    fn test_method_modifiers() {
        assert_eq!(method_modifiers(ACC_PUBLIC | ACC_STATIC | ACC_SYNCHRONIZED), "public static synchronized");
        assert_eq!(method_modifiers(ACC_PRIVATE | ACC_SYNTHETIC), "private synthetic");
        assert_eq!(method_modifiers(0), "");
    }

    #[test]
    fn test_bad_magic() {
        let mut bytes = minimal_class();
        bytes[0] = 0x00;
        assert_eq!(ClassFile::parse(&bytes), Err(ClassFormatError::BadMagic(0x00FE_BABE)));
    }

    #[test]
    fn test_truncated_input() {
        let bytes = minimal_class();
        let truncated = &bytes[..bytes.len() - 3];
        assert!(matches!(ClassFile::parse(truncated), Err(ClassFormatError::UnexpectedEof(_))));
    }

    #[test]
    fn test_trailing_bytes() {
        let mut bytes = minimal_class();
        bytes.extend_from_slice(&[0, 0]);
        assert_eq!(ClassFile::parse(&bytes), Err(ClassFormatError::TrailingBytes(2)));
    }
}
