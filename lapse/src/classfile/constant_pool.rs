//! Constant pool parsing, lookup and interning
//!
//! Entries keep their on-disk order so an untouched pool serializes back
//! byte for byte. `CONSTANT_Utf8` keeps its raw bytes next to the decoded
//! text for the same reason. Long and Double take two slots; the second one
//! is stored as [`Constant::Unusable`].
//!
//! New entries are appended. Interning returns the index of an existing
//! equal entry when there is one.

use super::bytes::{ByteReader, PutBe};
use super::mutf8;
use crate::domain::ClassFormatError;
use std::collections::HashMap;

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

/// `CONSTANT_Utf8` payload
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Utf8Entry {
    raw: Vec<u8>,
    text: String,
}

impl Utf8Entry {
    pub fn new(text: &str) -> Self {
        Self { raw: mutf8::encode(text), text: text.to_string() }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }
}

/// One constant pool slot
///
/// Float and Double keep their bit patterns so NaN payloads survive.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Constant {
    Utf8(Utf8Entry),
    Integer(i32),
    Float(u32),
    Long(i64),
    Double(u64),
    Class { name_index: u16 },
    String { string_index: u16 },
    Fieldref { class_index: u16, name_and_type_index: u16 },
    Methodref { class_index: u16, name_and_type_index: u16 },
    InterfaceMethodref { class_index: u16, name_and_type_index: u16 },
    NameAndType { name_index: u16, descriptor_index: u16 },
    MethodHandle { reference_kind: u8, reference_index: u16 },
    MethodType { descriptor_index: u16 },
    Dynamic { bootstrap_method_attr_index: u16, name_and_type_index: u16 },
    InvokeDynamic { bootstrap_method_attr_index: u16, name_and_type_index: u16 },
    Module { name_index: u16 },
    Package { name_index: u16 },
    /// Index 0 and the slot after a Long or Double
    Unusable,
}

impl Constant {
    fn is_wide(&self) -> bool {
        matches!(self, Constant::Long(_) | Constant::Double(_))
    }

    fn tag_name(&self) -> &'static str {
        match self {
            Constant::Utf8(_) => "Utf8",
            Constant::Integer(_) => "Integer",
            Constant::Float(_) => "Float",
            Constant::Long(_) => "Long",
            Constant::Double(_) => "Double",
            Constant::Class { .. } => "Class",
            Constant::String { .. } => "String",
            Constant::Fieldref { .. } => "Fieldref",
            Constant::Methodref { .. } => "Methodref",
            Constant::InterfaceMethodref { .. } => "InterfaceMethodref",
            Constant::NameAndType { .. } => "NameAndType",
            Constant::MethodHandle { .. } => "MethodHandle",
            Constant::MethodType { .. } => "MethodType",
            Constant::Dynamic { .. } => "Dynamic",
            Constant::InvokeDynamic { .. } => "InvokeDynamic",
            Constant::Module { .. } => "Module",
            Constant::Package { .. } => "Package",
            Constant::Unusable => "Unusable",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstantPool {
    entries: Vec<Constant>,
    index: HashMap<Constant, u16>,
}

impl Default for ConstantPool {
    fn default() -> Self {
        Self { entries: vec![Constant::Unusable], index: HashMap::new() }
    }
}

impl ConstantPool {
    pub fn parse(reader: &mut ByteReader<'_>) -> Result<Self, ClassFormatError> {
        let count = reader.u16()?;
        let mut pool = Self::default();
        let mut i: u16 = 1;
        while i < count {
            let constant = read_constant(reader, i)?;
            let wide = constant.is_wide();
            pool.index.entry(constant.clone()).or_insert(i);
            pool.entries.push(constant);
            if wide {
                pool.entries.push(Constant::Unusable);
                i += 1;
            }
            i += 1;
        }
        // A wide constant in the last slot claims a slot past `count`
        if pool.entries.len() > usize::from(count) {
            return Err(ClassFormatError::InvalidConstantIndex(count));
        }
        Ok(pool)
    }

    pub fn write(&self, out: &mut Vec<u8>) -> Result<(), ClassFormatError> {
        let count =
            u16::try_from(self.entries.len()).map_err(|_| ClassFormatError::ConstantPoolOverflow)?;
        out.put_u16(count);
        for constant in &self.entries[1..] {
            write_constant(constant, out);
        }
        Ok(())
    }

    /// Value of the `constant_pool_count` field
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, index: u16) -> Result<&Constant, ClassFormatError> {
        match self.entries.get(usize::from(index)) {
            Some(Constant::Unusable) | None => Err(ClassFormatError::InvalidConstantIndex(index)),
            Some(constant) => Ok(constant),
        }
    }

    /// Text of a `CONSTANT_Utf8` entry
    pub fn utf8(&self, index: u16) -> Result<&str, ClassFormatError> {
        match self.get(index)? {
            Constant::Utf8(entry) => Ok(entry.as_str()),
            _ => Err(ClassFormatError::InvalidConstantIndex(index)),
        }
    }

    /// Internal name referenced by a `CONSTANT_Class` entry
    pub fn class_name(&self, index: u16) -> Result<&str, ClassFormatError> {
        match self.get(index)? {
            Constant::Class { name_index } => self.utf8(*name_index),
            _ => Err(ClassFormatError::InvalidConstantIndex(index)),
        }
    }

    /// Short human-readable rendering of an entry, for diagnostics
    pub fn describe(&self, index: u16) -> String {
        match self.get(index) {
            Ok(Constant::Utf8(entry)) => format!("Utf8 \"{}\"", entry.as_str()),
            Ok(Constant::Class { name_index }) => {
                format!("Class {}", self.utf8(*name_index).unwrap_or("?"))
            }
            Ok(
                Constant::Methodref { class_index, name_and_type_index }
                | Constant::InterfaceMethodref { class_index, name_and_type_index }
                | Constant::Fieldref { class_index, name_and_type_index },
            ) => {
                let owner = self.class_name(*class_index).unwrap_or("?");
                let (name, desc) = match self.get(*name_and_type_index) {
                    Ok(Constant::NameAndType { name_index, descriptor_index }) => (
                        self.utf8(*name_index).unwrap_or("?"),
                        self.utf8(*descriptor_index).unwrap_or("?"),
                    ),
                    _ => ("?", "?"),
                };
                format!("{} {owner}.{name}{desc}", self.entries[usize::from(index)].tag_name())
            }
            Ok(Constant::String { string_index }) => {
                format!("String \"{}\"", self.utf8(*string_index).unwrap_or("?"))
            }
            Ok(Constant::Integer(v)) => format!("Integer {v}"),
            Ok(other) => other.tag_name().to_string(),
            Err(_) => format!("<invalid #{index}>"),
        }
    }

    fn intern(&mut self, constant: Constant) -> Result<u16, ClassFormatError> {
        if let Some(&index) = self.index.get(&constant) {
            return Ok(index);
        }
        let index =
            u16::try_from(self.entries.len()).map_err(|_| ClassFormatError::ConstantPoolOverflow)?;
        if index == u16::MAX {
            return Err(ClassFormatError::ConstantPoolOverflow);
        }
        self.index.insert(constant.clone(), index);
        self.entries.push(constant);
        Ok(index)
    }

    /// Owner and name of a `Methodref` or `InterfaceMethodref`
    ///
    /// # Errors
    ///
    /// Returns `ClassFormatError::InvalidConstantIndex` if `index` is not a
    /// method reference or its entries are broken.
    pub fn method_ref(&self, index: u16) -> Result<(&str, &str), ClassFormatError> {
        let (Constant::Methodref { class_index, name_and_type_index }
        | Constant::InterfaceMethodref { class_index, name_and_type_index }) = self.get(index)?
        else {
            return Err(ClassFormatError::InvalidConstantIndex(index));
        };
        let Constant::NameAndType { name_index, .. } = self.get(*name_and_type_index)? else {
            return Err(ClassFormatError::InvalidConstantIndex(*name_and_type_index));
        };
        Ok((self.class_name(*class_index)?, self.utf8(*name_index)?))
    }

    /// # Errors
    ///
    /// Returns `ClassFormatError::Utf8TooLong` if the encoded text does not
    /// fit the entry's u16 length, or the pool is full.
    pub fn intern_utf8(&mut self, text: &str) -> Result<u16, ClassFormatError> {
        let entry = Utf8Entry::new(text);
        if entry.raw.len() > usize::from(u16::MAX) {
            return Err(ClassFormatError::Utf8TooLong(entry.raw.len()));
        }
        self.intern(Constant::Utf8(entry))
    }

    pub fn intern_class(&mut self, internal_name: &str) -> Result<u16, ClassFormatError> {
        let name_index = self.intern_utf8(internal_name)?;
        self.intern(Constant::Class { name_index })
    }

    pub fn intern_string(&mut self, text: &str) -> Result<u16, ClassFormatError> {
        let string_index = self.intern_utf8(text)?;
        self.intern(Constant::String { string_index })
    }

    pub fn intern_integer(&mut self, value: i32) -> Result<u16, ClassFormatError> {
        self.intern(Constant::Integer(value))
    }

    pub fn intern_name_and_type(&mut self, name: &str, descriptor: &str) -> Result<u16, ClassFormatError> {
        let name_index = self.intern_utf8(name)?;
        let descriptor_index = self.intern_utf8(descriptor)?;
        self.intern(Constant::NameAndType { name_index, descriptor_index })
    }

    /// `Methodref`, or `InterfaceMethodref` when the owner is an interface
    pub fn intern_method_ref(
        &mut self,
        owner: &str,
        name: &str,
        descriptor: &str,
        interface: bool,
    ) -> Result<u16, ClassFormatError> {
        let class_index = self.intern_class(owner)?;
        let name_and_type_index = self.intern_name_and_type(name, descriptor)?;
        if interface {
            self.intern(Constant::InterfaceMethodref { class_index, name_and_type_index })
        } else {
            self.intern(Constant::Methodref { class_index, name_and_type_index })
        }
    }
}

fn read_constant(reader: &mut ByteReader<'_>, index: u16) -> Result<Constant, ClassFormatError> {
    let tag = reader.u8()?;
    let constant = match tag {
        TAG_UTF8 => {
            let len = reader.u16()?;
            let raw = reader.bytes(usize::from(len))?.to_vec();
            let text = mutf8::decode(&raw).ok_or(ClassFormatError::InvalidUtf8(index))?;
            Constant::Utf8(Utf8Entry { raw, text })
        }
        TAG_INTEGER => Constant::Integer(i32::from_be_bytes(reader.u32()?.to_be_bytes())),
        TAG_FLOAT => Constant::Float(reader.u32()?),
        TAG_LONG => Constant::Long(i64::from_be_bytes(reader.u64()?.to_be_bytes())),
        TAG_DOUBLE => Constant::Double(reader.u64()?),
        TAG_CLASS => Constant::Class { name_index: reader.u16()? },
        TAG_STRING => Constant::String { string_index: reader.u16()? },
        TAG_FIELDREF => Constant::Fieldref {
            class_index: reader.u16()?,
            name_and_type_index: reader.u16()?,
        },
        TAG_METHODREF => Constant::Methodref {
            class_index: reader.u16()?,
            name_and_type_index: reader.u16()?,
        },
        TAG_INTERFACE_METHODREF => Constant::InterfaceMethodref {
            class_index: reader.u16()?,
            name_and_type_index: reader.u16()?,
        },
        TAG_NAME_AND_TYPE => Constant::NameAndType {
            name_index: reader.u16()?,
            descriptor_index: reader.u16()?,
        },
        TAG_METHOD_HANDLE => Constant::MethodHandle {
            reference_kind: reader.u8()?,
            reference_index: reader.u16()?,
        },
        TAG_METHOD_TYPE => Constant::MethodType { descriptor_index: reader.u16()? },
        TAG_DYNAMIC => Constant::Dynamic {
            bootstrap_method_attr_index: reader.u16()?,
            name_and_type_index: reader.u16()?,
        },
        TAG_INVOKE_DYNAMIC => Constant::InvokeDynamic {
            bootstrap_method_attr_index: reader.u16()?,
            name_and_type_index: reader.u16()?,
        },
        TAG_MODULE => Constant::Module { name_index: reader.u16()? },
        TAG_PACKAGE => Constant::Package { name_index: reader.u16()? },
        _ => return Err(ClassFormatError::InvalidConstantTag { tag, index }),
    };
    Ok(constant)
}

#[allow(clippy::cast_possible_truncation)]
fn write_constant(constant: &Constant, out: &mut Vec<u8>) {
    match constant {
        Constant::Utf8(entry) => {
            out.put_u8(TAG_UTF8);
            // Parsed entries came with a u16 length; intern_utf8 rejects longer text
            out.put_u16(entry.raw.len() as u16);
            out.extend_from_slice(&entry.raw);
        }
        Constant::Integer(v) => {
            out.put_u8(TAG_INTEGER);
            out.extend_from_slice(&v.to_be_bytes());
        }
        Constant::Float(bits) => {
            out.put_u8(TAG_FLOAT);
            out.put_u32(*bits);
        }
        Constant::Long(v) => {
            out.put_u8(TAG_LONG);
            out.extend_from_slice(&v.to_be_bytes());
        }
        Constant::Double(bits) => {
            out.put_u8(TAG_DOUBLE);
            out.extend_from_slice(&bits.to_be_bytes());
        }
        Constant::Class { name_index } => {
            out.put_u8(TAG_CLASS);
            out.put_u16(*name_index);
        }
        Constant::String { string_index } => {
            out.put_u8(TAG_STRING);
            out.put_u16(*string_index);
        }
        Constant::Fieldref { class_index, name_and_type_index } => {
            out.put_u8(TAG_FIELDREF);
            out.put_u16(*class_index);
            out.put_u16(*name_and_type_index);
        }
        Constant::Methodref { class_index, name_and_type_index } => {
            out.put_u8(TAG_METHODREF);
            out.put_u16(*class_index);
            out.put_u16(*name_and_type_index);
        }
        Constant::InterfaceMethodref { class_index, name_and_type_index } => {
            out.put_u8(TAG_INTERFACE_METHODREF);
            out.put_u16(*class_index);
            out.put_u16(*name_and_type_index);
        }
        Constant::NameAndType { name_index, descriptor_index } => {
            out.put_u8(TAG_NAME_AND_TYPE);
            out.put_u16(*name_index);
            out.put_u16(*descriptor_index);
        }
        Constant::MethodHandle { reference_kind, reference_index } => {
            out.put_u8(TAG_METHOD_HANDLE);
            out.put_u8(*reference_kind);
            out.put_u16(*reference_index);
        }
        Constant::MethodType { descriptor_index } => {
            out.put_u8(TAG_METHOD_TYPE);
            out.put_u16(*descriptor_index);
        }
        Constant::Dynamic { bootstrap_method_attr_index, name_and_type_index } => {
            out.put_u8(TAG_DYNAMIC);
            out.put_u16(*bootstrap_method_attr_index);
            out.put_u16(*name_and_type_index);
        }
        Constant::InvokeDynamic { bootstrap_method_attr_index, name_and_type_index } => {
            out.put_u8(TAG_INVOKE_DYNAMIC);
            out.put_u16(*bootstrap_method_attr_index);
            out.put_u16(*name_and_type_index);
        }
        Constant::Module { name_index } => {
            out.put_u8(TAG_MODULE);
            out.put_u16(*name_index);
        }
        Constant::Package { name_index } => {
            out.put_u8(TAG_PACKAGE);
            out.put_u16(*name_index);
        }
        Constant::Unusable => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interning_deduplicates() {
        let mut pool = ConstantPool::default();
        let a = pool.intern_class("java/lang/Object").unwrap();
        let b = pool.intern_class("java/lang/Object").unwrap();
        assert_eq!(a, b);
        // Utf8 + Class
        assert_eq!(pool.count(), 3);
        assert_eq!(pool.class_name(a).unwrap(), "java/lang/Object");
    }

    #[test]
    fn test_oversized_utf8_is_rejected() {
        let mut pool = ConstantPool::default();
        let longest = "x".repeat(usize::from(u16::MAX));
        assert!(pool.intern_utf8(&longest).is_ok());
        let count = pool.count();
        // U+0000 takes two bytes in modified UTF-8
        let doubled = "\0".repeat(40_000);
        assert_eq!(pool.intern_utf8(&doubled), Err(ClassFormatError::Utf8TooLong(80_000)));
        assert_eq!(pool.intern_string(&"y".repeat(70_000)), Err(ClassFormatError::Utf8TooLong(70_000)));
        assert_eq!(pool.count(), count);
    }

    #[test]
    fn test_method_ref_lookup() {
        let mut pool = ConstantPool::default();
        let m = pool.intern_method_ref("a/B", "<init>", "()V", false).unwrap();
        assert_eq!(pool.method_ref(m).unwrap(), ("a/B", "<init>"));
        let class = pool.intern_class("a/B").unwrap();
        assert_eq!(pool.method_ref(class), Err(ClassFormatError::InvalidConstantIndex(class)));
    }

    #[test]
    fn test_method_ref_kind_follows_owner() {
        let mut pool = ConstantPool::default();
        let m = pool.intern_method_ref("a/B", "run", "()V", false).unwrap();
        let i = pool.intern_method_ref("a/B", "run", "()V", true).unwrap();
        assert_ne!(m, i);
        assert!(matches!(pool.get(m).unwrap(), Constant::Methodref { .. }));
        assert!(matches!(pool.get(i).unwrap(), Constant::InterfaceMethodref { .. }));
        assert_eq!(pool.describe(i), "InterfaceMethodref a/B.run()V");
    }

    #[test]
    fn test_long_takes_two_slots() {
        // count=4: #1 Long, #2 unusable, #3 Utf8 "x"
        let bytes = [
            0x00, 0x04, TAG_LONG, 0, 0, 0, 0, 0, 0, 0, 7, TAG_UTF8, 0x00, 0x01, b'x',
        ];
        let mut reader = ByteReader::new(&bytes);
        let pool = ConstantPool::parse(&mut reader).unwrap();
        assert_eq!(pool.get(1).unwrap(), &Constant::Long(7));
        assert_eq!(pool.get(2), Err(ClassFormatError::InvalidConstantIndex(2)));
        assert_eq!(pool.utf8(3).unwrap(), "x");

        let mut out = Vec::new();
        pool.write(&mut out).unwrap();
        assert_eq!(out, bytes);
    }

    #[test]
    fn test_unknown_tag_rejected() {
        let bytes = [0x00, 0x02, 2, 0x00];
        let mut reader = ByteReader::new(&bytes);
        assert_eq!(
            ConstantPool::parse(&mut reader).unwrap_err(),
            ClassFormatError::InvalidConstantTag { tag: 2, index: 1 }
        );
    }
}
