//! # Class Rewriting
//!
//! Turns a selected method into a wrapper around its own body:
//!
//! ```text
//! before                          after
//! ──────                          ─────
//! public int m(String s) {        public int m(String s) {          // generated
//!   <body>                          enter hooks
//! }                                 try { return m$lapse$impl(s); }
//!                                   finally-like exit hooks
//!                                 }
//!                                 private synthetic int m$lapse$impl(String s) {
//!                                   <body>                          // byte-identical
//!                                 }
//! ```
//!
//! Moving the body instead of splicing into it means no branch offsets,
//! exception ranges or existing frames ever change. Only the new wrapper
//! needs computed `max_stack`, `max_locals` and one stack-map frame.
//!
//! Constructors, static initializers and methods of interfaces older than
//! class version 53 cannot give their body away. Those get the same hook
//! calls spliced into the body instead (see [`inline`]).

pub mod calls;
pub mod dump;
pub mod emitter;
pub mod inline;
pub mod naming;
pub mod plan;
pub mod wrapper;

use crate::classfile::{
    Attribute, ClassFile, CodeAttribute, Member, ACC_PRIVATE, ACC_STATIC, ACC_STRICT, ACC_SYNCHRONIZED,
    ACC_SYNTHETIC, ATTR_CODE, STACK_MAP_MAJOR_VERSION,
};
use crate::config::Config;
use crate::domain::{dotted_class_name, ClassFormatError, RewriteError};
use log::{debug, info};
use std::sync::Arc;

pub use dump::ClassDumper;
pub use plan::{MethodAction, MethodPlan, SkipReason};
use inline::{inline_hooks, InlineSpec};
use wrapper::{build_wrapper_code, WrapperSpec};

/// Flags carried over from the original method onto the moved body
const BODY_KEPT_FLAGS: u16 = ACC_STATIC | ACC_SYNCHRONIZED | ACC_STRICT;

/// What a rewrite would do to one class
#[derive(Debug, Clone)]
pub struct ClassReport {
    /// Dotted class name
    pub class_name: String,
    pub major_version: u16,
    pub methods: Vec<MethodPlan>,
}

/// Load-time class rewriter
pub struct Transformer {
    config: Arc<Config>,
    dumper: Option<ClassDumper>,
}

impl Transformer {
    pub fn new(config: Arc<Config>, dumper: Option<ClassDumper>) -> Self {
        Self { config, dumper }
    }

    /// Rewrite one class
    ///
    /// `class_name` is the internal name the class loader reports
    /// (`com/example/Foo`). Returns `Ok(None)` when nothing in the class is
    /// selected, without parsing it.
    ///
    /// # Errors
    ///
    /// Returns `RewriteError` if the class cannot be parsed or a selected
    /// method cannot be instrumented. The error concerns this class only.
    pub fn transform(&self, class_name: &str, bytes: &[u8]) -> Result<Option<Vec<u8>>, RewriteError> {
        let dotted = dotted_class_name(class_name);
        let plan = self.config.plan_for(&dotted);
        if plan.is_empty() {
            return Ok(None);
        }

        let mut class = ClassFile::parse(bytes).map_err(parse_error(&dotted))?;
        let methods = plan::plan_methods(&class, &plan, &dotted).map_err(parse_error(&dotted))?;

        let mut instrumented = 0usize;
        for method in &methods {
            let (pass_through, measuring, in_place) = match method.action {
                MethodAction::Untouched => continue,
                MethodAction::Skip(reason) => {
                    debug!("Skipping {}: {reason}", method.identity);
                    continue;
                }
                MethodAction::Wrap { pass_through, measuring } => (pass_through, measuring, false),
                MethodAction::Inline { pass_through, measuring } => (pass_through, measuring, true),
            };
            let result = if in_place {
                inline_method(&mut class, method, pass_through, measuring)
            } else {
                wrap_method(&mut class, method, pass_through, measuring)
            };
            result.map_err(|source| RewriteError::Emit { class: dotted.clone(), method: method.name.clone(), source })?;
            info!(
                "Instrumented {}{}{}{}",
                method.identity,
                if pass_through { " [entry point]" } else { "" },
                if measuring { " [measured]" } else { "" },
                if in_place { " [in place]" } else { "" },
            );
            instrumented += 1;
        }
        if instrumented == 0 {
            return Ok(None);
        }

        let out = class.to_bytes().map_err(|source| RewriteError::Emit {
            class: dotted.clone(),
            method: "<class>".to_string(),
            source,
        })?;
        info!("Transformed class {dotted}: {instrumented} method(s) instrumented");
        if let Some(dumper) = &self.dumper {
            dumper.dump(class_name, &out);
        }
        Ok(Some(out))
    }

    /// Report what [`Transformer::transform`] would do, without rewriting
    ///
    /// # Errors
    ///
    /// Returns `RewriteError::Parse` if the class cannot be parsed.
    pub fn inspect(&self, bytes: &[u8]) -> Result<ClassReport, RewriteError> {
        let class = ClassFile::parse(bytes).map_err(parse_error("<unknown>"))?;
        let dotted = dotted_class_name(class.this_class_name().map_err(parse_error("<unknown>"))?);
        let plan = self.config.plan_for(&dotted);
        let methods = plan::plan_methods(&class, &plan, &dotted).map_err(parse_error(&dotted))?;
        Ok(ClassReport { class_name: dotted, major_version: class.major_version, methods })
    }
}

fn parse_error(class: &str) -> impl FnOnce(ClassFormatError) -> RewriteError {
    let class = class.to_string();
    move |source| RewriteError::Parse { class, source }
}

/// Move the body of `plan`'s method to `<name>$lapse$impl` and install a wrapper
fn wrap_method(class: &mut ClassFile, plan: &MethodPlan, pass_through: bool, measuring: bool) -> Result<(), ClassFormatError> {
    let original = class.methods[plan.index].clone();
    let keep_attributes: Vec<Attribute> = original
        .attributes
        .iter()
        .filter(|a| class.attribute_name(a) != Some(ATTR_CODE))
        .cloned()
        .collect();
    let class_name = class.this_class_name()?.to_string();
    let impl_name = naming::impl_name(&plan.name);

    let spec = WrapperSpec {
        this_class: class.this_class,
        class_name: &class_name,
        is_interface: class.is_interface(),
        is_static: original.has_flag(ACC_STATIC),
        method_name: &plan.name,
        impl_name: &impl_name,
        descriptor: &plan.descriptor,
        parsed: &plan.parsed,
        pass_through,
        identity: measuring.then_some(plan.identity.as_str()),
        emit_frames: class.major_version >= STACK_MAP_MAJOR_VERSION,
    };
    let pool = &mut class.constant_pool;
    let code = build_wrapper_code(pool, &spec)?;
    let code_attribute = Attribute { name_index: pool.intern_utf8(ATTR_CODE)?, info: code.to_bytes()? };
    let impl_name_index = pool.intern_utf8(&impl_name)?;

    let mut wrapper_attributes = keep_attributes;
    wrapper_attributes.push(code_attribute);
    let wrapper = Member {
        access_flags: original.access_flags & !ACC_SYNCHRONIZED,
        name_index: original.name_index,
        descriptor_index: original.descriptor_index,
        attributes: wrapper_attributes,
    };
    let body = Member {
        access_flags: ACC_PRIVATE | ACC_SYNTHETIC | (original.access_flags & BODY_KEPT_FLAGS),
        name_index: impl_name_index,
        descriptor_index: original.descriptor_index,
        attributes: original.attributes,
    };
    class.methods[plan.index] = wrapper;
    class.methods.push(body);
    Ok(())
}

/// Splice the hooks into the body of `plan`'s method
fn inline_method(class: &mut ClassFile, plan: &MethodPlan, pass_through: bool, measuring: bool) -> Result<(), ClassFormatError> {
    let method = &class.methods[plan.index];
    let Some(position) = method.attributes.iter().position(|a| class.attribute_name(a) == Some(ATTR_CODE)) else {
        return Ok(());
    };
    let code = CodeAttribute::parse(&method.attributes[position].info)?;
    let is_static = method.has_flag(ACC_STATIC);
    let class_name = class.this_class_name()?.to_string();

    let spec = InlineSpec {
        this_class: class.this_class,
        class_name: &class_name,
        method_name: &plan.name,
        is_static,
        is_constructor: plan.name == "<init>" && class.super_class != 0,
        parsed: &plan.parsed,
        pass_through,
        identity: measuring.then_some(plan.identity.as_str()),
        emit_frames: class.major_version >= STACK_MAP_MAJOR_VERSION,
    };
    let rewritten = inline_hooks(&mut class.constant_pool, &code, &spec)?;
    class.methods[plan.index].attributes[position].info = rewritten.to_bytes()?;
    Ok(())
}
