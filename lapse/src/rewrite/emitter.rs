//! Bytecode builder with operand-stack accounting
//!
//! Every emit call records how many stack slots the instruction pops and
//! pushes, so `max_stack` falls out of the instruction sequence instead of
//! being guessed. The builder only knows straight-line code: after a
//! `return` or `athrow` the caller starts the next block explicitly with
//! [`CodeBuilder::begin_handler`].

use crate::classfile::code::MAX_CODE_LEN;
use crate::classfile::opcodes::{
    AASTORE, ACONST_NULL, ANEWARRAY, ARETURN, ATHROW, BIPUSH, DRETURN, DUP, FRETURN, ICONST_0, ILOAD,
    ILOAD_0, INVOKESPECIAL, INVOKESTATIC, IRETURN, ISTORE, ISTORE_0, LDC, LDC_W, LRETURN, RETURN, SIPUSH, WIDE,
};
use crate::classfile::ValueKind;

#[derive(Debug, Default)]
pub struct CodeBuilder {
    code: Vec<u8>,
    depth: u16,
    max_depth: u16,
}

fn kind_index(kind: ValueKind) -> u8 {
    match kind {
        ValueKind::Int => 0,
        ValueKind::Long => 1,
        ValueKind::Float => 2,
        ValueKind::Double => 3,
        ValueKind::Reference => 4,
    }
}

impl CodeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offset of the next instruction
    pub fn offset(&self) -> usize {
        self.code.len()
    }

    fn account(&mut self, pops: u16, pushes: u16) {
        self.depth = self.depth.saturating_sub(pops) + pushes;
        self.max_depth = self.max_depth.max(self.depth);
    }

    fn emit_u16(&mut self, v: u16) {
        self.code.extend_from_slice(&v.to_be_bytes());
    }

    pub fn aconst_null(&mut self) {
        self.code.push(ACONST_NULL);
        self.account(0, 1);
    }

    /// Push a small non-negative int constant with the shortest encoding
    pub fn push_int(&mut self, value: u8) {
        match value {
            0..=5 => self.code.push(ICONST_0 + value),
            6..=127 => {
                self.code.push(BIPUSH);
                self.code.push(value);
            }
            _ => {
                self.code.push(SIPUSH);
                self.emit_u16(u16::from(value));
            }
        }
        self.account(0, 1);
    }

    /// Load a single-slot constant (String, Integer) from the pool
    pub fn ldc(&mut self, index: u16) {
        match u8::try_from(index) {
            Ok(short) => {
                self.code.push(LDC);
                self.code.push(short);
            }
            Err(_) => {
                self.code.push(LDC_W);
                self.emit_u16(index);
            }
        }
        self.account(0, 1);
    }

    fn local_op(&mut self, base: u8, short_base: u8, kind: ValueKind, slot: u16) {
        let k = kind_index(kind);
        if slot <= 3 {
            // <x>load_<n> / <x>store_<n>: four opcodes per kind
            #[allow(clippy::cast_possible_truncation)]
            self.code.push(short_base + k * 4 + slot as u8);
        } else if let Ok(short) = u8::try_from(slot) {
            self.code.push(base + k);
            self.code.push(short);
        } else {
            self.code.push(WIDE);
            self.code.push(base + k);
            self.emit_u16(slot);
        }
    }

    pub fn load(&mut self, kind: ValueKind, slot: u16) {
        self.local_op(ILOAD, ILOAD_0, kind, slot);
        self.account(0, kind.slots());
    }

    pub fn store(&mut self, kind: ValueKind, slot: u16) {
        self.local_op(ISTORE, ISTORE_0, kind, slot);
        self.account(kind.slots(), 0);
    }

    pub fn anewarray(&mut self, class_index: u16) {
        self.code.push(ANEWARRAY);
        self.emit_u16(class_index);
        self.account(1, 1);
    }

    pub fn dup(&mut self) {
        self.code.push(DUP);
        self.account(1, 2);
    }

    pub fn aastore(&mut self) {
        self.code.push(AASTORE);
        self.account(3, 0);
    }

    /// `arg_slots` counts stack slots of the arguments; `return_slots` is 0 for void
    pub fn invoke_static(&mut self, method_ref: u16, arg_slots: u16, return_slots: u16) {
        self.code.push(INVOKESTATIC);
        self.emit_u16(method_ref);
        self.account(arg_slots, return_slots);
    }

    /// Like [`CodeBuilder::invoke_static`] plus the receiver slot
    pub fn invoke_special(&mut self, method_ref: u16, arg_slots: u16, return_slots: u16) {
        self.code.push(INVOKESPECIAL);
        self.emit_u16(method_ref);
        self.account(arg_slots + 1, return_slots);
    }

    pub fn athrow(&mut self) {
        self.code.push(ATHROW);
        self.account(1, 0);
    }

    /// `<x>return`, or plain `return` for `None`
    pub fn return_value(&mut self, kind: Option<ValueKind>) {
        let opcode = match kind {
            None => RETURN,
            Some(ValueKind::Int) => IRETURN,
            Some(ValueKind::Long) => LRETURN,
            Some(ValueKind::Float) => FRETURN,
            Some(ValueKind::Double) => DRETURN,
            Some(ValueKind::Reference) => ARETURN,
        };
        self.code.push(opcode);
        self.depth = 0;
    }

    /// Start an exception handler block: the stack holds just the throwable
    pub fn begin_handler(&mut self) {
        self.depth = 0;
        self.account(0, 1);
    }

    /// Finished code and its peak stack depth, or `None` if the code is too long
    pub fn finish(self) -> Option<(Vec<u8>, u16)> {
        (self.code.len() <= MAX_CODE_LEN).then_some((self.code, self.max_depth))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classfile::opcodes::disassemble;

    fn listing(code: &[u8]) -> Vec<String> {
        disassemble(code).into_iter().map(|(_, text)| text).collect()
    }

    #[test]
    fn test_push_int_encodings() {
        let mut b = CodeBuilder::new();
        b.push_int(3);
        b.push_int(100);
        b.push_int(200);
        let (code, max_stack) = b.finish().unwrap();
        assert_eq!(listing(&code), vec!["iconst_3", "bipush 100", "sipush 200"]);
        assert_eq!(max_stack, 3);
    }

    #[test]
    fn test_local_slot_encodings() {
        let mut b = CodeBuilder::new();
        b.load(ValueKind::Reference, 0);
        b.load(ValueKind::Long, 3);
        b.load(ValueKind::Int, 4);
        b.store(ValueKind::Double, 300);
        let (code, _) = b.finish().unwrap();
        assert_eq!(listing(&code), vec!["aload_0", "lload_3", "iload 4", "wide dstore 300"]);
    }

    #[test]
    fn test_stack_accounting() {
        let mut b = CodeBuilder::new();
        // new Object[1] { Long.valueOf(j) }
        b.push_int(1);
        b.anewarray(7);
        b.dup();
        b.push_int(0);
        b.load(ValueKind::Long, 1);
        assert_eq!(b.depth, 5);
        b.invoke_static(9, 2, 1);
        b.aastore();
        assert_eq!(b.depth, 1);
        b.store(ValueKind::Reference, 3);
        let (_, max_stack) = b.finish().unwrap();
        assert_eq!(max_stack, 5);
    }

    #[test]
    fn test_ldc_switches_to_wide_index() {
        let mut b = CodeBuilder::new();
        b.ldc(12);
        b.ldc(300);
        let (code, _) = b.finish().unwrap();
        assert_eq!(listing(&code), vec!["ldc #12", "ldc_w #300"]);
    }
}
