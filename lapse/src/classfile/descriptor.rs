//! Field and method descriptors (JVMS 4.3)

use crate::domain::ClassFormatError;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseType {
    Byte,
    Char,
    Double,
    Float,
    Int,
    Long,
    Short,
    Boolean,
}

impl BaseType {
    fn from_char(c: char) -> Option<Self> {
        Some(match c {
            'B' => BaseType::Byte,
            'C' => BaseType::Char,
            'D' => BaseType::Double,
            'F' => BaseType::Float,
            'I' => BaseType::Int,
            'J' => BaseType::Long,
            'S' => BaseType::Short,
            'Z' => BaseType::Boolean,
            _ => return None,
        })
    }

    fn descriptor_char(self) -> char {
        match self {
            BaseType::Byte => 'B',
            BaseType::Char => 'C',
            BaseType::Double => 'D',
            BaseType::Float => 'F',
            BaseType::Int => 'I',
            BaseType::Long => 'J',
            BaseType::Short => 'S',
            BaseType::Boolean => 'Z',
        }
    }

    pub fn java_name(self) -> &'static str {
        match self {
            BaseType::Byte => "byte",
            BaseType::Char => "char",
            BaseType::Double => "double",
            BaseType::Float => "float",
            BaseType::Int => "int",
            BaseType::Long => "long",
            BaseType::Short => "short",
            BaseType::Boolean => "boolean",
        }
    }

    /// Wrapper class used for boxing (internal name)
    pub fn box_class(self) -> &'static str {
        match self {
            BaseType::Byte => "java/lang/Byte",
            BaseType::Char => "java/lang/Character",
            BaseType::Double => "java/lang/Double",
            BaseType::Float => "java/lang/Float",
            BaseType::Int => "java/lang/Integer",
            BaseType::Long => "java/lang/Long",
            BaseType::Short => "java/lang/Short",
            BaseType::Boolean => "java/lang/Boolean",
        }
    }

    /// Descriptor of the wrapper's static `valueOf`
    pub fn value_of_descriptor(self) -> String {
        format!("({})L{};", self.descriptor_char(), self.box_class())
    }
}

/// How a value lives on the operand stack and in locals
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Int,
    Long,
    Float,
    Double,
    Reference,
}

impl ValueKind {
    /// Local-variable and operand-stack slots taken by a value of this kind
    pub fn slots(self) -> u16 {
        match self {
            ValueKind::Long | ValueKind::Double => 2,
            _ => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    Base(BaseType),
    /// Internal class name, e.g. `java/lang/String`
    Object(String),
    Array(Box<FieldType>),
}

impl FieldType {
    /// Java source spelling: `int`, `java.lang.String`, `long[]`
    pub fn java_name(&self) -> String {
        match self {
            FieldType::Base(base) => base.java_name().to_string(),
            FieldType::Object(name) => name.replace('/', "."),
            FieldType::Array(component) => format!("{}[]", component.java_name()),
        }
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            FieldType::Base(BaseType::Long) => ValueKind::Long,
            FieldType::Base(BaseType::Double) => ValueKind::Double,
            FieldType::Base(BaseType::Float) => ValueKind::Float,
            FieldType::Base(_) => ValueKind::Int,
            FieldType::Object(_) | FieldType::Array(_) => ValueKind::Reference,
        }
    }

    /// Name to use in a `CONSTANT_Class` for this reference type
    ///
    /// Arrays are named by their descriptor (`[I`, `[Ljava/lang/String;`).
    pub fn class_entry_name(&self) -> Option<String> {
        match self {
            FieldType::Base(_) => None,
            FieldType::Object(name) => Some(name.clone()),
            FieldType::Array(_) => Some(self.to_string()),
        }
    }

    fn parse_from(chars: &mut std::iter::Peekable<std::str::Chars<'_>>, whole: &str) -> Result<Self, ClassFormatError> {
        let invalid = || ClassFormatError::InvalidDescriptor(whole.to_string());
        let c = chars.next().ok_or_else(invalid)?;
        if let Some(base) = BaseType::from_char(c) {
            return Ok(FieldType::Base(base));
        }
        match c {
            'L' => {
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some(';') if !name.is_empty() => return Ok(FieldType::Object(name)),
                        Some(';') | None => return Err(invalid()),
                        Some(ch) => name.push(ch),
                    }
                }
            }
            '[' => Ok(FieldType::Array(Box::new(Self::parse_from(chars, whole)?))),
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for FieldType {
    /// Descriptor form
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Base(base) => write!(f, "{}", base.descriptor_char()),
            FieldType::Object(name) => write!(f, "L{name};"),
            FieldType::Array(component) => write!(f, "[{component}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
    pub params: Vec<FieldType>,
    /// `None` for `void`
    pub return_type: Option<FieldType>,
}

impl MethodDescriptor {
    /// # Errors
    ///
    /// Returns `ClassFormatError::InvalidDescriptor` if `descriptor` is not a
    /// well-formed method descriptor.
    pub fn parse(descriptor: &str) -> Result<Self, ClassFormatError> {
        let invalid = || ClassFormatError::InvalidDescriptor(descriptor.to_string());
        let mut chars = descriptor.chars().peekable();
        if chars.next() != Some('(') {
            return Err(invalid());
        }
        let mut params = Vec::new();
        loop {
            match chars.peek() {
                Some(')') => {
                    chars.next();
                    break;
                }
                Some(_) => params.push(FieldType::parse_from(&mut chars, descriptor)?),
                None => return Err(invalid()),
            }
        }
        let return_type = if chars.peek() == Some(&'V') {
            chars.next();
            None
        } else {
            Some(FieldType::parse_from(&mut chars, descriptor)?)
        };
        if chars.next().is_some() {
            return Err(invalid());
        }
        Ok(Self { params, return_type })
    }

    /// Java spelling of every parameter type, in order
    pub fn param_type_names(&self) -> Vec<String> {
        self.params.iter().map(FieldType::java_name).collect()
    }

    /// Local slots taken by the parameters (excluding `this`)
    pub fn param_slots(&self) -> u16 {
        self.params.iter().map(|p| p.kind().slots()).sum()
    }
}
