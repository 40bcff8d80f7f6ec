//! Hook call sequences shared by the wrapper and in-place rewrites
//!
//! Entry builds the argument array once and keeps it in a local; every exit
//! path hands the same array back so the dispatcher can pair the calls.

use super::emitter::CodeBuilder;
use crate::classfile::{ConstantPool, FieldType, ValueKind, VerificationType};
use crate::domain::ClassFormatError;
use lapse_common::{
    ENTER_MEASURING_ARGS_DESC, ENTER_MEASURING_DESC, ENTER_MEASURING_HOOK, ENTER_PASS_THROUGH_DESC,
    ENTER_PASS_THROUGH_HOOK, EXIT_MEASURING_ARGS_DESC, EXIT_MEASURING_DESC, EXIT_MEASURING_HOOK,
    EXIT_PASS_THROUGH_DESC, EXIT_PASS_THROUGH_HOOK, HOOK_OWNER,
};

pub const OBJECT_CLASS: &str = "java/lang/Object";
pub const OBJECT_ARRAY_CLASS: &str = "[Ljava/lang/Object;";
pub const THROWABLE_CLASS: &str = "java/lang/Throwable";

/// Pool indexes for the measuring hook calls
#[derive(Clone, Copy)]
struct MeasuringRefs {
    identity: u16,
    enter: u16,
    exit: u16,
}

/// Pool indexes for the pass-through hook calls
#[derive(Clone, Copy)]
struct PassThroughRefs {
    enter: u16,
    exit: u16,
}

pub struct HookCalls<'a> {
    is_static: bool,
    params: &'a [FieldType],
    measuring: Option<MeasuringRefs>,
    pass_through: Option<PassThroughRefs>,
    args_slot: Option<u16>,
}

impl<'a> HookCalls<'a> {
    /// Intern the hook references; the argument array, if one is needed,
    /// goes to local `free_slot`
    ///
    /// An array is built for entry points, and for measured methods that
    /// take parameters.
    pub fn new(
        pool: &mut ConstantPool,
        is_static: bool,
        params: &'a [FieldType],
        identity: Option<&str>,
        pass_through: bool,
        free_slot: u16,
    ) -> Result<Self, ClassFormatError> {
        let has_args_array = pass_through || (identity.is_some() && !params.is_empty());
        let measuring = match identity {
            Some(id) => Some(MeasuringRefs {
                identity: pool.intern_string(id)?,
                enter: pool.intern_method_ref(
                    HOOK_OWNER,
                    ENTER_MEASURING_HOOK,
                    if has_args_array { ENTER_MEASURING_ARGS_DESC } else { ENTER_MEASURING_DESC },
                    false,
                )?,
                exit: pool.intern_method_ref(
                    HOOK_OWNER,
                    EXIT_MEASURING_HOOK,
                    if has_args_array { EXIT_MEASURING_ARGS_DESC } else { EXIT_MEASURING_DESC },
                    false,
                )?,
            }),
            None => None,
        };
        let pass_through = if pass_through {
            Some(PassThroughRefs {
                enter: pool.intern_method_ref(HOOK_OWNER, ENTER_PASS_THROUGH_HOOK, ENTER_PASS_THROUGH_DESC, false)?,
                exit: pool.intern_method_ref(HOOK_OWNER, EXIT_PASS_THROUGH_HOOK, EXIT_PASS_THROUGH_DESC, false)?,
            })
        } else {
            None
        };
        Ok(Self { is_static, params, measuring, pass_through, args_slot: has_args_array.then_some(free_slot) })
    }

    pub fn args_slot(&self) -> Option<u16> {
        self.args_slot
    }

    /// First local after the argument array
    pub fn next_free_slot(&self, free_slot: u16) -> u16 {
        self.args_slot.map_or(free_slot, |slot| slot + 1)
    }

    fn load_receiver(&self, b: &mut CodeBuilder) {
        if self.is_static {
            b.aconst_null();
        } else {
            b.load(ValueKind::Reference, 0);
        }
    }

    /// Build the argument array, then call the enter hooks (outer
    /// pass-through, inner measuring)
    pub fn emit_enter(&self, pool: &mut ConstantPool, b: &mut CodeBuilder) -> Result<(), ClassFormatError> {
        if let Some(args_slot) = self.args_slot {
            let count = u8::try_from(self.params.len())
                .map_err(|_| ClassFormatError::InvalidDescriptor(format!("{} parameters", self.params.len())))?;
            let object_class = pool.intern_class(OBJECT_CLASS)?;
            b.push_int(count);
            b.anewarray(object_class);
            let mut slot = u16::from(!self.is_static);
            for (i, param) in (0u8..).zip(self.params) {
                b.dup();
                b.push_int(i);
                b.load(param.kind(), slot);
                if let FieldType::Base(base) = param {
                    let value_of = pool.intern_method_ref(base.box_class(), "valueOf", &base.value_of_descriptor(), false)?;
                    b.invoke_static(value_of, param.kind().slots(), 1);
                }
                b.aastore();
                slot += param.kind().slots();
            }
            b.store(ValueKind::Reference, args_slot);
        }

        if let (Some(refs), Some(args_slot)) = (self.pass_through, self.args_slot) {
            self.load_receiver(b);
            b.load(ValueKind::Reference, args_slot);
            b.invoke_static(refs.enter, 2, 0);
        }
        if let Some(refs) = self.measuring {
            self.load_receiver(b);
            b.ldc(refs.identity);
            if let Some(args_slot) = self.args_slot {
                b.load(ValueKind::Reference, args_slot);
                b.invoke_static(refs.enter, 3, 0);
            } else {
                b.invoke_static(refs.enter, 2, 0);
            }
        }
        Ok(())
    }

    /// Exit hooks in reverse order; `thrown` is the local holding the throwable
    pub fn emit_exit(&self, b: &mut CodeBuilder, thrown: Option<u16>) {
        if let Some(refs) = self.measuring {
            self.load_receiver(b);
            match thrown {
                Some(slot) => b.load(ValueKind::Reference, slot),
                None => b.aconst_null(),
            }
            b.ldc(refs.identity);
            if let Some(args_slot) = self.args_slot {
                b.load(ValueKind::Reference, args_slot);
                b.invoke_static(refs.exit, 4, 0);
            } else {
                b.invoke_static(refs.exit, 3, 0);
            }
        }
        if let Some(refs) = self.pass_through {
            b.invoke_static(refs.exit, 0, 0);
        }
    }
}

/// Stack-map type of a declared parameter
pub fn verification_type(pool: &mut ConstantPool, ty: &FieldType) -> Result<VerificationType, ClassFormatError> {
    Ok(match ty.kind() {
        ValueKind::Int => VerificationType::Integer,
        ValueKind::Long => VerificationType::Long,
        ValueKind::Float => VerificationType::Float,
        ValueKind::Double => VerificationType::Double,
        ValueKind::Reference => {
            let name = ty
                .class_entry_name()
                .ok_or_else(|| ClassFormatError::InvalidDescriptor(ty.to_string()))?;
            VerificationType::Object(pool.intern_class(&name)?)
        }
    })
}
