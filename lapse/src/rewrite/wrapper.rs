//! Wrapper method generation
//!
//! The wrapper keeps the original method's name and descriptor and calls the
//! moved body between the hook calls:
//!
//! ```text
//!   [args = new Object[] { box(p0), box(p1), ... }]
//!   [Hooks.enterPassThroughHook(this|null, args)]
//!   [Hooks.enterMeasuringHook(this|null, "id"[, args])]
//! try_start:
//!   result = this.m$lapse$impl(p0, p1, ...)
//! try_end:
//!   [Hooks.exitMeasuringHook(this|null, null, "id"[, args])]
//!   [Hooks.exitPassThroughHook()]
//!   return result
//! handler:                       catch any, frame: locals = [this, params, args], stack = [Throwable]
//!   astore t
//!   [Hooks.exitMeasuringHook(this|null, t, "id"[, args])]
//!   [Hooks.exitPassThroughHook()]
//!   aload t; athrow
//! ```
//!
//! The only jump target is the handler, so one full frame is all the
//! `StackMapTable` needs.

use super::calls::{verification_type, HookCalls, OBJECT_ARRAY_CLASS, THROWABLE_CLASS};
use super::emitter::CodeBuilder;
use crate::classfile::code::write_stack_map_table;
use crate::classfile::{
    Attribute, CodeAttribute, ConstantPool, ExceptionEntry, FieldType, MethodDescriptor, StackMapFrame, ValueKind,
    VerificationType, ATTR_STACK_MAP_TABLE,
};
use crate::domain::ClassFormatError;

/// Everything the generator needs to know about the method being wrapped
#[derive(Debug)]
pub struct WrapperSpec<'a> {
    /// `CONSTANT_Class` index of the declaring class
    pub this_class: u16,
    /// Internal name of the declaring class
    pub class_name: &'a str,
    pub is_interface: bool,
    pub is_static: bool,
    pub method_name: &'a str,
    pub impl_name: &'a str,
    pub descriptor: &'a str,
    pub parsed: &'a MethodDescriptor,
    pub pass_through: bool,
    /// Qualified identity when the method is measured
    pub identity: Option<&'a str>,
    /// Emit a `StackMapTable` (class version 50 and later)
    pub emit_frames: bool,
}

fn err(spec: &WrapperSpec<'_>) -> ClassFormatError {
    ClassFormatError::CodeTooLarge(format!("{}.{}", spec.class_name, spec.method_name))
}

/// Generate the wrapper's `Code` attribute, interning what it needs into `pool`
///
/// # Errors
///
/// Returns `ClassFormatError` if the constant pool overflows or the code
/// would exceed the JVM's method size limit.
pub fn build_wrapper_code(pool: &mut ConstantPool, spec: &WrapperSpec<'_>) -> Result<CodeAttribute, ClassFormatError> {
    let params = &spec.parsed.params;
    // Locals: [this] params [args] [result] [throwable]
    let first_free = u16::from(!spec.is_static) + spec.parsed.param_slots();
    let calls = HookCalls::new(pool, spec.is_static, params, spec.identity, spec.pass_through, first_free)?;
    let impl_ref = pool.intern_method_ref(spec.class_name, spec.impl_name, spec.descriptor, spec.is_interface)?;
    let mut next_slot = calls.next_free_slot(first_free);

    let mut b = CodeBuilder::new();
    calls.emit_enter(pool, &mut b)?;

    let try_start = b.offset();
    if !spec.is_static {
        b.load(ValueKind::Reference, 0);
    }
    let mut slot = u16::from(!spec.is_static);
    for param in params {
        b.load(param.kind(), slot);
        slot += param.kind().slots();
    }
    let return_kind = spec.parsed.return_type.as_ref().map(FieldType::kind);
    let return_slots = return_kind.map_or(0, ValueKind::slots);
    let arg_slots = spec.parsed.param_slots();
    if spec.is_static {
        b.invoke_static(impl_ref, arg_slots, return_slots);
    } else {
        b.invoke_special(impl_ref, arg_slots, return_slots);
    }
    let try_end = b.offset();

    let result_slot = return_kind.map(|kind| {
        let slot = next_slot;
        next_slot += kind.slots();
        slot
    });
    if let (Some(kind), Some(slot)) = (return_kind, result_slot) {
        b.store(kind, slot);
    }
    calls.emit_exit(&mut b, None);
    if let (Some(kind), Some(slot)) = (return_kind, result_slot) {
        b.load(kind, slot);
    }
    b.return_value(return_kind);

    let handler_pc = b.offset();
    b.begin_handler();
    let thrown_slot = next_slot;
    next_slot += 1;
    b.store(ValueKind::Reference, thrown_slot);
    calls.emit_exit(&mut b, Some(thrown_slot));
    b.load(ValueKind::Reference, thrown_slot);
    b.athrow();

    let (code, max_stack) = b.finish().ok_or_else(|| err(spec))?;
    let pc = |offset: usize| u16::try_from(offset).map_err(|_| err(spec));
    let exception_table = vec![ExceptionEntry {
        start_pc: pc(try_start)?,
        end_pc: pc(try_end)?,
        handler_pc: pc(handler_pc)?,
        catch_type: 0,
    }];

    let mut attributes = Vec::new();
    if spec.emit_frames {
        let mut locals = Vec::with_capacity(params.len() + 2);
        if !spec.is_static {
            locals.push(VerificationType::Object(spec.this_class));
        }
        for param in params {
            locals.push(verification_type(pool, param)?);
        }
        if calls.args_slot().is_some() {
            locals.push(VerificationType::Object(pool.intern_class(OBJECT_ARRAY_CLASS)?));
        }
        let stack = vec![VerificationType::Object(pool.intern_class(THROWABLE_CLASS)?)];
        let frames = [StackMapFrame::Full { offset_delta: pc(handler_pc)?, locals, stack }];
        attributes.push(Attribute {
            name_index: pool.intern_utf8(ATTR_STACK_MAP_TABLE)?,
            info: write_stack_map_table(&frames)?,
        });
    }

    Ok(CodeAttribute { max_stack, max_locals: next_slot, code, exception_table, attributes })
}
