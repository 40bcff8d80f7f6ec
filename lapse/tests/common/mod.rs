//! Shared fixtures: class files built with the crate's own codec, an
//! in-memory sink and a map-backed request header lookup.

#![allow(dead_code)]

use lapse::classfile::{
    code, opcodes, Attribute, ClassFile, CodeAttribute, ConstantPool, Member, StackMapFrame, ACC_ABSTRACT,
    ACC_INTERFACE, ACC_PUBLIC, ATTR_CODE, ATTR_STACK_MAP_TABLE,
};
use lapse::domain::{HostError, SinkError};
use lapse::hooks::{Arg, HeaderAccessor, HostRuntime, ObjectRef};
use lapse::report::MetricSink;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub const ACC_SUPER: u16 = 0x0020;

pub const HANDLER_DESC: &str = lapse_common::HANDLER_METHOD_DESC;

/// Builds a body against the class's pool, for code that refers to constants
type CodeFn = Box<dyn Fn(&mut ConstantPool) -> CodeAttribute>;

struct MethodDef {
    flags: u16,
    name: String,
    descriptor: String,
    code: Option<CodeFn>,
}

/// Builds a class file method by method
pub struct ClassBuilder {
    name: String,
    major: u16,
    flags: u16,
    methods: Vec<MethodDef>,
}

impl ClassBuilder {
    /// `public class <internal_name>`, version 52 (Java 8)
    pub fn new(internal_name: &str) -> Self {
        Self { name: internal_name.to_string(), major: 52, flags: ACC_PUBLIC | ACC_SUPER, methods: Vec::new() }
    }

    pub fn major(mut self, major: u16) -> Self {
        self.major = major;
        self
    }

    pub fn interface(mut self) -> Self {
        self.flags = ACC_PUBLIC | ACC_INTERFACE | ACC_ABSTRACT;
        self
    }

    /// Method with a body
    pub fn method(self, flags: u16, name: &str, descriptor: &str, code: Vec<u8>, max_stack: u16, max_locals: u16) -> Self {
        self.method_with(flags, name, descriptor, move |_| CodeAttribute {
            max_stack,
            max_locals,
            code: code.clone(),
            exception_table: vec![],
            attributes: vec![],
        })
    }

    /// Method whose body is built once the pool exists
    pub fn method_with(
        mut self,
        flags: u16,
        name: &str,
        descriptor: &str,
        code: impl Fn(&mut ConstantPool) -> CodeAttribute + 'static,
    ) -> Self {
        self.methods.push(MethodDef {
            flags,
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            code: Some(Box::new(code)),
        });
        self
    }

    /// `public <init>() { super(); }`
    pub fn constructor(self) -> Self {
        self.method_with(ACC_PUBLIC, "<init>", "()V", |pool| {
            let [hi, lo] = object_init(pool).to_be_bytes();
            CodeAttribute {
                max_stack: 1,
                max_locals: 1,
                code: vec![0x2a, opcodes::INVOKESPECIAL, hi, lo, opcodes::RETURN],
                exception_table: vec![],
                attributes: vec![],
            }
        })
    }

    /// `public void <name><descriptor> { return; }` (arguments ignored)
    pub fn void_method(self, name: &str, descriptor: &str) -> Self {
        self.method(ACC_PUBLIC, name, descriptor, vec![opcodes::RETURN], 0, 8)
    }

    pub fn abstract_method(mut self, name: &str, descriptor: &str) -> Self {
        self.methods.push(MethodDef {
            flags: ACC_PUBLIC | ACC_ABSTRACT,
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            code: None,
        });
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut pool = ConstantPool::default();
        let this_class = pool.intern_class(&self.name).unwrap();
        let super_class = pool.intern_class("java/lang/Object").unwrap();
        let code_name = pool.intern_utf8(ATTR_CODE).unwrap();
        let methods = self
            .methods
            .iter()
            .map(|m| {
                let name_index = pool.intern_utf8(&m.name).unwrap();
                let descriptor_index = pool.intern_utf8(&m.descriptor).unwrap();
                let attributes = m
                    .code
                    .iter()
                    .map(|build| Attribute { name_index: code_name, info: build(&mut pool).to_bytes().unwrap() })
                    .collect();
                Member { access_flags: m.flags, name_index, descriptor_index, attributes }
            })
            .collect();
        ClassFile {
            minor_version: 0,
            major_version: self.major,
            constant_pool: pool,
            access_flags: self.flags,
            this_class,
            super_class,
            interfaces: vec![],
            fields: vec![],
            methods,
            attributes: vec![],
        }
        .to_bytes()
        .unwrap()
    }
}

/// `java/lang/Object.<init>()V`
pub fn object_init(pool: &mut ConstantPool) -> u16 {
    pool.intern_method_ref("java/lang/Object", "<init>", "()V", false).unwrap()
}

/// `StackMapTable` attribute holding `frames`
pub fn stack_map(pool: &mut ConstantPool, frames: &[StackMapFrame]) -> Attribute {
    Attribute {
        name_index: pool.intern_utf8(ATTR_STACK_MAP_TABLE).unwrap(),
        info: code::write_stack_map_table(frames).unwrap(),
    }
}

/// Frames of a method body, in file order
pub fn frames_of(class: &ClassFile, member: &Member) -> Vec<StackMapFrame> {
    let body = class.code_of(member).unwrap().unwrap();
    body.attributes
        .iter()
        .find(|a| class.constant_pool.utf8(a.name_index).ok() == Some(ATTR_STACK_MAP_TABLE))
        .map(|table| code::parse_stack_map_table(&table.info).unwrap())
        .unwrap_or_default()
}

/// Find a method by name and descriptor
pub fn find_method<'a>(class: &'a ClassFile, name: &str, descriptor: &str) -> Option<&'a Member> {
    class.methods.iter().find(|m| {
        class.member_name(m).ok() == Some(name) && class.member_descriptor(m).ok() == Some(descriptor)
    })
}

/// Disassembly of a method body, instruction texts only
pub fn listing(class: &ClassFile, member: &Member) -> Vec<String> {
    let code = class.code_of(member).unwrap().unwrap();
    opcodes::disassemble(&code.code).into_iter().map(|(_, text)| text).collect()
}

/// `(owner, name, descriptor)` of every `invokestatic`/`invokespecial` in a body
pub fn invoked_methods(class: &ClassFile, member: &Member) -> Vec<String> {
    let code = class.code_of(member).unwrap().unwrap();
    opcodes::disassemble(&code.code)
        .into_iter()
        .filter_map(|(_, text)| {
            let index: u16 = text.strip_prefix("invokestatic #").or_else(|| text.strip_prefix("invokespecial #"))?.parse().ok()?;
            Some(class.constant_pool.describe(index))
        })
        .collect()
}

/// Sink that keeps lines in memory
#[derive(Default)]
pub struct MemorySink {
    lines: Mutex<Vec<String>>,
    open: Mutex<bool>,
}

impl MemorySink {
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }
}

impl MetricSink for MemorySink {
    fn open(&self) -> Result<(), SinkError> {
        *self.open.lock().unwrap() = true;
        Ok(())
    }

    fn write(&self, line: &str) -> Result<(), SinkError> {
        if !*self.open.lock().unwrap() {
            return Err(SinkError::NotOpen);
        }
        self.lines.lock().unwrap().push(line.to_string());
        Ok(())
    }

    fn close(&self) -> Result<(), SinkError> {
        *self.open.lock().unwrap() = false;
        Ok(())
    }
}

/// Request stand-in: a header map
pub type Headers = HashMap<String, String>;

pub fn request(headers: &[(&str, &str)]) -> Arg {
    let map: Headers = headers.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect();
    Some(ObjectRef::new(map))
}

/// Reads headers from [`Headers`] objects; anything else is a lookup error
pub struct MapHeaderAccessor;

impl HeaderAccessor for MapHeaderAccessor {
    fn header(&self, request: &ObjectRef, name: &str) -> Result<Option<String>, HostError> {
        let headers = request
            .downcast_ref::<Headers>()
            .ok_or_else(|| HostError::Lookup(format!("not a request object, cannot read {name}")))?;
        Ok(headers.get(name).cloned())
    }
}

/// Host with or without a servlet API
pub struct TestHost {
    pub with_headers: bool,
}

impl HostRuntime for TestHost {
    fn resolve_header_accessor(&self) -> Result<Arc<dyn HeaderAccessor>, HostError> {
        if self.with_headers {
            Ok(Arc::new(MapHeaderAccessor))
        } else {
            Err(HostError::Unavailable("no servlet API on the class path".to_string()))
        }
    }
}
