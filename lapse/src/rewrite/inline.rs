//! In-place hook injection
//!
//! Some bodies cannot move behind a wrapper: a constructor has to make its
//! own `super(...)` call, and an interface older than class version 53
//! cannot hold the private body. Their hook calls are spliced into the
//! existing code instead:
//!
//! ```text
//!   <code before the super(...) call>        constructors only
//!   [args = new Object[] { ... }]
//!   enter hooks
//! try_start:
//!   <body>                                   every return preceded by exit hooks
//! handler:                                   catch any, frame: locals = [this, .., args], stack = [Throwable]
//!   astore t
//!   exit hooks(t)
//!   aload t; athrow
//! ```
//!
//! Splicing moves instructions, so every pc the method carries is remapped:
//! jump operands, switch padding, the exception table, stack-map frames, and
//! the line number and local variable tables. Any other `Code` attribute
//! is dropped. Frames are written back as full frames, and the ones after
//! the entry hooks gain the argument array local.

use super::calls::{verification_type, HookCalls, OBJECT_ARRAY_CLASS, THROWABLE_CLASS};
use super::emitter::CodeBuilder;
use crate::classfile::bytes::{ByteReader, PutBe};
use crate::classfile::code::{parse_stack_map_table, write_stack_map_table, MAX_CODE_LEN};
use crate::classfile::instructions::{self, switch_padding, Instruction, Jump, NEW};
use crate::classfile::opcodes::INVOKESPECIAL;
use crate::classfile::{
    Attribute, CodeAttribute, ConstantPool, ExceptionEntry, MethodDescriptor, StackMapFrame, ValueKind,
    VerificationType, ATTR_LINE_NUMBER_TABLE, ATTR_LOCAL_VARIABLE_TABLE, ATTR_LOCAL_VARIABLE_TYPE_TABLE,
    ATTR_STACK_MAP_TABLE,
};
use crate::domain::ClassFormatError;
use std::collections::HashMap;

/// Everything the splicer needs to know about the method
#[derive(Debug)]
pub struct InlineSpec<'a> {
    /// `CONSTANT_Class` index of the declaring class
    pub this_class: u16,
    /// Internal name of the declaring class
    pub class_name: &'a str,
    pub method_name: &'a str,
    pub is_static: bool,
    /// `<init>` of a class with a superclass: hooks go after the
    /// `super(...)`/`this(...)` call
    pub is_constructor: bool,
    pub parsed: &'a MethodDescriptor,
    pub pass_through: bool,
    /// Qualified identity when the method is measured
    pub identity: Option<&'a str>,
    /// Rewrite the `StackMapTable` (class version 50 and later)
    pub emit_frames: bool,
}

/// New positions of the original instructions
struct Layout {
    /// Where each instruction itself lands
    insn_at: Vec<usize>,
    /// Where jumps to each instruction land: past the entry hooks, onto the
    /// exit hooks in front of a return
    target_at: Vec<usize>,
    index_of: HashMap<usize, usize>,
    old_len: usize,
    body_end: usize,
}

impl Layout {
    fn new(insns: &[Instruction], entry: usize, prologue_len: usize, epilogue_len: usize, old_len: usize) -> Self {
        let mut insn_at = Vec::with_capacity(insns.len());
        let mut target_at = Vec::with_capacity(insns.len());
        let mut pos = 0;
        for (i, insn) in insns.iter().enumerate() {
            if i == entry {
                pos += prologue_len;
            }
            target_at.push(pos);
            if i >= entry && insn.is_return() {
                pos += epilogue_len;
            }
            insn_at.push(pos);
            pos += insn.len_at(pos);
        }
        let index_of = insns.iter().enumerate().map(|(i, insn)| (insn.pc, i)).collect();
        Self { insn_at, target_at, index_of, old_len, body_end: pos }
    }

    fn index(&self, old_pc: usize) -> Result<usize, ClassFormatError> {
        self.index_of.get(&old_pc).copied().ok_or(ClassFormatError::InvalidBytecode(old_pc))
    }

    /// New pc for a jump target or range bound; the old code length maps to
    /// the end of the body
    fn target(&self, old_pc: usize) -> Result<usize, ClassFormatError> {
        if old_pc == self.old_len {
            return Ok(self.body_end);
        }
        Ok(self.target_at[self.index(old_pc)?])
    }

    fn target_pc(&self, old_pc: u16) -> Result<u16, ClassFormatError> {
        let new = self.target(usize::from(old_pc))?;
        u16::try_from(new).map_err(|_| ClassFormatError::InvalidBytecode(usize::from(old_pc)))
    }

    /// New pc of the instruction itself, for `new` sites in frames
    fn insn_pc(&self, old_pc: u16) -> Result<u16, ClassFormatError> {
        let new = self.insn_at[self.index(usize::from(old_pc))?];
        u16::try_from(new).map_err(|_| ClassFormatError::InvalidBytecode(usize::from(old_pc)))
    }
}

fn relative(from: usize, to: usize) -> Option<i32> {
    if to >= from {
        i32::try_from(to - from).ok()
    } else {
        i32::try_from(from - to).ok().map(i32::wrapping_neg)
    }
}

/// Index of the instruction after the call that initializes `this`
///
/// Each `new` is paired with the next `invokespecial <init>`; the first
/// unpaired one is the `super(...)` or `this(...)` call.
fn constructor_entry(pool: &ConstantPool, code: &[u8], insns: &[Instruction]) -> Result<Option<usize>, ClassFormatError> {
    let mut pending_new = 0usize;
    for (i, insn) in insns.iter().enumerate() {
        match insn.opcode {
            NEW => pending_new += 1,
            INVOKESPECIAL => {
                let index = u16::from_be_bytes([code[insn.pc + 1], code[insn.pc + 2]]);
                if pool.method_ref(index)?.1 != "<init>" {
                    continue;
                }
                if pending_new == 0 {
                    return Ok(Some(i + 1).filter(|&next| next < insns.len()));
                }
                pending_new -= 1;
            }
            _ => {}
        }
    }
    Ok(None)
}

/// Copy `insn` to the end of `out`, pointing its jumps at the new layout
fn relocate(
    code: &[u8],
    insn: &Instruction,
    layout: &Layout,
    out: &mut Vec<u8>,
    too_large: &dyn Fn() -> ClassFormatError,
) -> Result<(), ClassFormatError> {
    let at = out.len();
    let offset = |rel: i32| -> Result<i32, ClassFormatError> {
        let old = insn.target(rel).ok_or(ClassFormatError::InvalidBytecode(insn.pc))?;
        relative(at, layout.target(old)?).ok_or_else(too_large)
    };
    match &insn.jump {
        Jump::None => out.extend_from_slice(&code[insn.pc..insn.pc + insn.len]),
        Jump::Short(rel) => {
            let rel = i16::try_from(offset(i32::from(*rel))?).map_err(|_| too_large())?;
            out.put_u8(insn.opcode);
            out.extend_from_slice(&rel.to_be_bytes());
        }
        Jump::Wide(rel) => {
            out.put_u8(insn.opcode);
            out.extend_from_slice(&offset(*rel)?.to_be_bytes());
        }
        Jump::Table { default, low, high, offsets } => {
            out.put_u8(insn.opcode);
            out.resize(out.len() + switch_padding(at), 0);
            out.extend_from_slice(&offset(*default)?.to_be_bytes());
            out.extend_from_slice(&low.to_be_bytes());
            out.extend_from_slice(&high.to_be_bytes());
            for rel in offsets {
                out.extend_from_slice(&offset(*rel)?.to_be_bytes());
            }
        }
        Jump::Lookup { default, pairs } => {
            out.put_u8(insn.opcode);
            out.resize(out.len() + switch_padding(at), 0);
            out.extend_from_slice(&offset(*default)?.to_be_bytes());
            let count = i32::try_from(pairs.len()).map_err(|_| too_large())?;
            out.extend_from_slice(&count.to_be_bytes());
            for (key, rel) in pairs {
                out.extend_from_slice(&key.to_be_bytes());
                out.extend_from_slice(&offset(*rel)?.to_be_bytes());
            }
        }
    }
    Ok(())
}

/// A frame with its absolute offset and uncompressed locals
struct ExpandedFrame {
    offset: usize,
    locals: Vec<VerificationType>,
    stack: Vec<VerificationType>,
}

fn expand_frames(initial: Vec<VerificationType>, frames: &[StackMapFrame]) -> Result<Vec<ExpandedFrame>, ClassFormatError> {
    let mut locals = initial;
    let mut previous: Option<usize> = None;
    let mut expanded = Vec::with_capacity(frames.len());
    for frame in frames {
        let delta = usize::from(frame.offset_delta());
        let offset = previous.map_or(delta, |p| p + delta + 1);
        previous = Some(offset);
        let stack = match frame {
            StackMapFrame::Same { .. } => Vec::new(),
            StackMapFrame::SameLocals1StackItem { stack, .. } => vec![*stack],
            StackMapFrame::Chop { chopped, .. } => {
                let keep = locals
                    .len()
                    .checked_sub(usize::from(*chopped))
                    .ok_or(ClassFormatError::InvalidFrame(offset))?;
                locals.truncate(keep);
                Vec::new()
            }
            StackMapFrame::Append { locals: added, .. } => {
                locals.extend_from_slice(added);
                Vec::new()
            }
            StackMapFrame::Full { locals: all, stack, .. } => {
                locals.clone_from(all);
                stack.clone()
            }
        };
        expanded.push(ExpandedFrame { offset, locals: locals.clone(), stack });
    }
    Ok(expanded)
}

/// Pad `locals` with `Top` up to `slot` and put `ty` there
fn put_local(locals: &mut Vec<VerificationType>, slot: u16, ty: VerificationType, offset: usize) -> Result<(), ClassFormatError> {
    let mut used: u16 = 0;
    for local in locals.iter() {
        used += if matches!(local, VerificationType::Long | VerificationType::Double) { 2 } else { 1 };
    }
    if used > slot {
        return Err(ClassFormatError::InvalidFrame(offset));
    }
    locals.extend(std::iter::repeat(VerificationType::Top).take(usize::from(slot - used)));
    locals.push(ty);
    Ok(())
}

fn remap_types(types: &mut [VerificationType], layout: &Layout) -> Result<(), ClassFormatError> {
    for ty in types {
        if let VerificationType::Uninitialized(site) = ty {
            *site = layout.insn_pc(*site)?;
        }
    }
    Ok(())
}

fn remap_line_numbers(info: &[u8], layout: &Layout) -> Result<Vec<u8>, ClassFormatError> {
    let mut r = ByteReader::new(info);
    let count = r.u16()?;
    let mut out = Vec::with_capacity(info.len());
    out.put_u16(count);
    for _ in 0..count {
        let start = r.u16()?;
        let line = r.u16()?;
        out.put_u16(layout.target_pc(start)?);
        out.put_u16(line);
    }
    Ok(out)
}

/// `LocalVariableTable` and `LocalVariableTypeTable` share one layout
fn remap_local_variables(info: &[u8], layout: &Layout) -> Result<Vec<u8>, ClassFormatError> {
    let mut r = ByteReader::new(info);
    let count = r.u16()?;
    let mut out = Vec::with_capacity(info.len());
    out.put_u16(count);
    for _ in 0..count {
        let start = r.u16()?;
        let length = r.u16()?;
        let end = start.checked_add(length).ok_or(ClassFormatError::InvalidBytecode(usize::from(start)))?;
        let new_start = layout.target_pc(start)?;
        let new_length = layout
            .target_pc(end)?
            .checked_sub(new_start)
            .ok_or(ClassFormatError::InvalidBytecode(usize::from(start)))?;
        out.put_u16(new_start);
        out.put_u16(new_length);
        // name, descriptor or signature, slot
        for _ in 0..3 {
            out.put_u16(r.u16()?);
        }
    }
    Ok(out)
}

/// Splice the hook calls into `code`, interning what they need into `pool`
///
/// # Errors
///
/// Returns `ClassFormatError` if the body cannot be decoded, a constructor
/// never initializes `this`, a jump no longer fits its operand, or the code
/// would exceed the JVM's method size limit.
#[allow(clippy::too_many_lines)]
pub fn inline_hooks(pool: &mut ConstantPool, code: &CodeAttribute, spec: &InlineSpec<'_>) -> Result<CodeAttribute, ClassFormatError> {
    let name = format!("{}.{}", spec.class_name, spec.method_name);
    let too_large = || ClassFormatError::CodeTooLarge(name.clone());

    let insns = instructions::decode(&code.code)?;
    let entry = if spec.is_constructor {
        constructor_entry(pool, &code.code, &insns)?.ok_or_else(|| ClassFormatError::MissingConstructorCall(name.clone()))?
    } else {
        0
    };
    let Some(entry_pc) = insns.get(entry).map(|insn| insn.pc) else {
        return Err(ClassFormatError::InvalidBytecode(0));
    };

    // Locals: original ones, then [args] [throwable]
    let params = &spec.parsed.params;
    let first_free = code.max_locals.max(u16::from(!spec.is_static) + spec.parsed.param_slots());
    if first_free > u16::MAX - 2 {
        return Err(too_large());
    }
    let calls = HookCalls::new(pool, spec.is_static, params, spec.identity, spec.pass_through, first_free)?;
    let thrown_slot = calls.next_free_slot(first_free);

    let mut b = CodeBuilder::new();
    calls.emit_enter(pool, &mut b)?;
    let (prologue, enter_stack) = b.finish().ok_or_else(too_large)?;
    let mut b = CodeBuilder::new();
    calls.emit_exit(&mut b, None);
    let (epilogue, exit_stack) = b.finish().ok_or_else(too_large)?;
    let mut b = CodeBuilder::new();
    b.begin_handler();
    b.store(ValueKind::Reference, thrown_slot);
    calls.emit_exit(&mut b, Some(thrown_slot));
    b.load(ValueKind::Reference, thrown_slot);
    b.athrow();
    let (handler, handler_stack) = b.finish().ok_or_else(too_large)?;

    let layout = Layout::new(&insns, entry, prologue.len(), epilogue.len(), code.code.len());
    let mut out = Vec::with_capacity(layout.body_end + handler.len());
    for (i, insn) in insns.iter().enumerate() {
        if i == entry {
            out.extend_from_slice(&prologue);
        }
        if i >= entry && insn.is_return() {
            out.extend_from_slice(&epilogue);
        }
        relocate(&code.code, insn, &layout, &mut out, &too_large)?;
    }
    let handler_pc = out.len();
    out.extend_from_slice(&handler);
    if out.len() > MAX_CODE_LEN {
        return Err(too_large());
    }
    let pc = |offset: usize| u16::try_from(offset).map_err(|_| too_large());

    let mut exception_table = code
        .exception_table
        .iter()
        .map(|e| {
            Ok(ExceptionEntry {
                start_pc: layout.target_pc(e.start_pc)?,
                end_pc: layout.target_pc(e.end_pc)?,
                handler_pc: layout.target_pc(e.handler_pc)?,
                catch_type: e.catch_type,
            })
        })
        .collect::<Result<Vec<_>, ClassFormatError>>()?;
    // Catch-all over the body, leaving out the exit hooks themselves
    let mut ranges = Vec::new();
    let mut start = layout.target_at[entry];
    for (i, insn) in insns.iter().enumerate().skip(entry) {
        if insn.is_return() {
            ranges.push((start, layout.target_at[i]));
            start = layout.insn_at[i];
        }
    }
    ranges.push((start, layout.body_end));
    for (start, end) in ranges.into_iter().filter(|(start, end)| start < end) {
        exception_table.push(ExceptionEntry {
            start_pc: pc(start)?,
            end_pc: pc(end)?,
            handler_pc: pc(handler_pc)?,
            catch_type: 0,
        });
    }

    let mut attributes = Vec::with_capacity(code.attributes.len() + 1);
    let mut frames = Vec::new();
    for attribute in &code.attributes {
        match pool.utf8(attribute.name_index).ok() {
            Some(ATTR_STACK_MAP_TABLE) => frames = parse_stack_map_table(&attribute.info)?,
            Some(ATTR_LINE_NUMBER_TABLE) => attributes.push(Attribute {
                name_index: attribute.name_index,
                info: remap_line_numbers(&attribute.info, &layout)?,
            }),
            Some(ATTR_LOCAL_VARIABLE_TABLE | ATTR_LOCAL_VARIABLE_TYPE_TABLE) => attributes.push(Attribute {
                name_index: attribute.name_index,
                info: remap_local_variables(&attribute.info, &layout)?,
            }),
            _ => {}
        }
    }

    if spec.emit_frames {
        let mut initial = Vec::with_capacity(params.len() + 1);
        if !spec.is_static {
            initial.push(if spec.is_constructor {
                VerificationType::UninitializedThis
            } else {
                VerificationType::Object(spec.this_class)
            });
        }
        for param in params {
            initial.push(verification_type(pool, param)?);
        }
        let args_type = match calls.args_slot() {
            Some(slot) => Some((slot, VerificationType::Object(pool.intern_class(OBJECT_ARRAY_CLASS)?))),
            None => None,
        };

        let mut placed = Vec::with_capacity(frames.len() + 1);
        for mut frame in expand_frames(initial, &frames)? {
            if frame.offset >= code.code.len() {
                return Err(ClassFormatError::InvalidFrame(frame.offset));
            }
            remap_types(&mut frame.locals, &layout)?;
            remap_types(&mut frame.stack, &layout)?;
            if let Some((slot, ty)) = args_type {
                if frame.offset >= entry_pc {
                    put_local(&mut frame.locals, slot, ty, frame.offset)?;
                }
            }
            placed.push((layout.target(frame.offset)?, frame.locals, frame.stack));
        }
        let mut locals = Vec::new();
        if !spec.is_static {
            locals.push(VerificationType::Object(spec.this_class));
        }
        if let Some((slot, ty)) = args_type {
            put_local(&mut locals, slot, ty, handler_pc)?;
        }
        let stack = vec![VerificationType::Object(pool.intern_class(THROWABLE_CLASS)?)];
        placed.push((handler_pc, locals, stack));

        let mut previous: Option<usize> = None;
        let mut encoded = Vec::with_capacity(placed.len());
        for (offset, locals, stack) in placed {
            let delta = match previous {
                None => offset,
                Some(p) => offset.checked_sub(p + 1).ok_or(ClassFormatError::InvalidFrame(offset))?,
            };
            previous = Some(offset);
            encoded.push(StackMapFrame::Full { offset_delta: pc(delta)?, locals, stack });
        }
        attributes.push(Attribute {
            name_index: pool.intern_utf8(ATTR_STACK_MAP_TABLE)?,
            info: write_stack_map_table(&encoded)?,
        });
    }

    let max_stack = code.max_stack.saturating_add(enter_stack.max(exit_stack).max(handler_stack));
    Ok(CodeAttribute { max_stack, max_locals: thrown_slot + 1, code: out, exception_table, attributes })
}
