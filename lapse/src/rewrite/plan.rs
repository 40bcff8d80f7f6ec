//! Per-method rewrite decisions
//!
//! Shared by the transformer and `lapse inspect`, so what the CLI reports is
//! exactly what a load-time rewrite would do.

use super::naming::{impl_name, qualified_identity};
use crate::classfile::instructions;
use crate::classfile::opcodes::INVOKESTATIC;
use crate::classfile::{ClassFile, CodeAttribute, Member, MethodDescriptor, ACC_ABSTRACT, ACC_NATIVE};
use crate::config::{EntryPointKind, UnitPlan};
use crate::domain::ClassFormatError;
use lapse_common::{FILTER_METHOD, HANDLER_METHOD, HANDLER_METHOD_DESC, HOOK_OWNER};
use std::fmt;

/// First class-file version that allows private interface methods (Java 9)
const PRIVATE_INTERFACE_METHOD_MAJOR_VERSION: u16 = 53;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Abstract or native
    NoCode,
    /// The class already carries the moved body, or the body already calls
    /// the hooks
    AlreadyInstrumented,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SkipReason::NoCode => "method has no code",
            SkipReason::AlreadyInstrumented => "already instrumented",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodAction {
    /// No rule and no entry-point role
    Untouched,
    Skip(SkipReason),
    /// Move the body behind a generated wrapper
    Wrap { pass_through: bool, measuring: bool },
    /// Splice the hooks into the body: initializers, and interfaces that
    /// cannot hold a private body
    Inline { pass_through: bool, measuring: bool },
}

#[derive(Debug, Clone)]
pub struct MethodPlan {
    /// Position in the class's method table
    pub index: usize,
    pub name: String,
    pub descriptor: String,
    pub parsed: MethodDescriptor,
    pub identity: String,
    pub action: MethodAction,
}

fn is_pass_through(entry_point: Option<EntryPointKind>, name: &str, descriptor: &str) -> bool {
    match entry_point {
        Some(EntryPointKind::Filter) => name == FILTER_METHOD,
        Some(EntryPointKind::Handler) => name == HANDLER_METHOD && descriptor == HANDLER_METHOD_DESC,
        None => false,
    }
}

const ABSTRACT_OR_NATIVE: u16 = ACC_ABSTRACT | ACC_NATIVE;

/// Whether `name` in `class` has to be instrumented in place
fn needs_inline(class: &ClassFile, name: &str) -> bool {
    name == "<init>"
        || name == "<clinit>"
        || (class.is_interface() && class.major_version < PRIVATE_INTERFACE_METHOD_MAJOR_VERSION)
}

/// Whether `code` already calls into the hook bridge
fn calls_hooks(class: &ClassFile, code: &CodeAttribute) -> Result<bool, ClassFormatError> {
    for insn in instructions::decode(&code.code)? {
        if insn.opcode == INVOKESTATIC {
            let index = u16::from_be_bytes([code.code[insn.pc + 1], code.code[insn.pc + 2]]);
            if class.constant_pool.method_ref(index)?.0 == HOOK_OWNER {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

fn selected_action(
    class: &ClassFile,
    method: &Member,
    name: &str,
    descriptor: &str,
    pass_through: bool,
    measuring: bool,
) -> Result<MethodAction, ClassFormatError> {
    let code = if method.has_flag(ABSTRACT_OR_NATIVE) { None } else { class.code_of(method)? };
    let Some(code) = code else {
        return Ok(MethodAction::Skip(SkipReason::NoCode));
    };
    Ok(if needs_inline(class, name) {
        if calls_hooks(class, &code)? {
            MethodAction::Skip(SkipReason::AlreadyInstrumented)
        } else {
            MethodAction::Inline { pass_through, measuring }
        }
    } else if class.has_method(&impl_name(name), descriptor) {
        MethodAction::Skip(SkipReason::AlreadyInstrumented)
    } else {
        MethodAction::Wrap { pass_through, measuring }
    })
}

/// Decide what to do with every method of `class`
///
/// # Errors
///
/// Returns `ClassFormatError` if a method's name or descriptor cannot be
/// read, or a selected method's code cannot be decoded.
pub fn plan_methods(class: &ClassFile, plan: &UnitPlan<'_>, dotted_class: &str) -> Result<Vec<MethodPlan>, ClassFormatError> {
    let mut plans = Vec::with_capacity(class.methods.len());
    for (index, method) in class.methods.iter().enumerate() {
        let name = class.member_name(method)?;
        let descriptor = class.member_descriptor(method)?;
        let parsed = MethodDescriptor::parse(descriptor)?;
        let param_type_names = parsed.param_type_names();
        let identity = qualified_identity(dotted_class, name, &param_type_names);

        let pass_through = is_pass_through(plan.entry_point, name, descriptor);
        let measuring = plan.rules_for(name).is_some_and(|rules| rules.matches(&param_type_names));

        let action = if !pass_through && !measuring {
            MethodAction::Untouched
        } else {
            selected_action(class, method, name, descriptor, pass_through, measuring)?
        };

        plans.push(MethodPlan {
            index,
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            parsed,
            identity,
            action,
        });
    }
    Ok(plans)
}
