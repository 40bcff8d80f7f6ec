//! JVM opcodes emitted by the rewriter, plus a listing for method bodies

pub const ACONST_NULL: u8 = 0x01;
pub const ICONST_0: u8 = 0x03;
pub const BIPUSH: u8 = 0x10;
pub const SIPUSH: u8 = 0x11;
pub const LDC: u8 = 0x12;
pub const LDC_W: u8 = 0x13;

pub const ILOAD: u8 = 0x15;
pub const LLOAD: u8 = 0x16;
pub const FLOAD: u8 = 0x17;
pub const DLOAD: u8 = 0x18;
pub const ALOAD: u8 = 0x19;
/// `iload_0`; the `<x>load_<n>` forms follow in groups of four
pub const ILOAD_0: u8 = 0x1a;

pub const ISTORE: u8 = 0x36;
pub const LSTORE: u8 = 0x37;
pub const FSTORE: u8 = 0x38;
pub const DSTORE: u8 = 0x39;
pub const ASTORE: u8 = 0x3a;
/// `istore_0`; the `<x>store_<n>` forms follow in groups of four
pub const ISTORE_0: u8 = 0x3b;

pub const AASTORE: u8 = 0x53;
pub const DUP: u8 = 0x59;

pub const IRETURN: u8 = 0xac;
pub const LRETURN: u8 = 0xad;
pub const FRETURN: u8 = 0xae;
pub const DRETURN: u8 = 0xaf;
pub const ARETURN: u8 = 0xb0;
pub const RETURN: u8 = 0xb1;

pub const GOTO: u8 = 0xa7;

pub const INVOKESPECIAL: u8 = 0xb7;
pub const INVOKESTATIC: u8 = 0xb8;
pub const ANEWARRAY: u8 = 0xbd;
pub const ATHROW: u8 = 0xbf;
pub const WIDE: u8 = 0xc4;

use super::instructions::{instruction_len, NEW};

const KIND_PREFIX: [char; 5] = ['i', 'l', 'f', 'd', 'a'];

/// `ifeq` (0x99) through `jsr` (0xa8)
const BRANCH_NAMES: [&str; 16] = [
    "ifeq", "ifne", "iflt", "ifge", "ifgt", "ifle", "if_icmpeq", "if_icmpne", "if_icmplt", "if_icmpge",
    "if_icmpgt", "if_icmple", "if_acmpeq", "if_acmpne", "goto", "jsr",
];

fn u16_at(code: &[u8], at: usize) -> Option<u16> {
    Some(u16::from_be_bytes([*code.get(at)?, *code.get(at + 1)?]))
}

/// Decode one instruction at `pc`: its text and length
///
/// Names the instructions the rewriter emits and the branches; `None` for
/// everything else.
fn decode_one(code: &[u8], pc: usize) -> Option<(String, usize)> {
    let op = *code.get(pc)?;
    let operand_u8 = || code.get(pc + 1).copied();
    let operand_u16 = || u16_at(code, pc + 1);
    Some(match op {
        ACONST_NULL => ("aconst_null".to_string(), 1),
        0x02..=0x08 => (format!("iconst_{}", i16::from(op) - i16::from(ICONST_0)), 1),
        BIPUSH => (format!("bipush {}", i8::from_be_bytes([operand_u8()?])), 2),
        SIPUSH => (format!("sipush {}", i16::from_be_bytes(operand_u16()?.to_be_bytes())), 3),
        LDC => (format!("ldc #{}", operand_u8()?), 2),
        LDC_W => (format!("ldc_w #{}", operand_u16()?), 3),
        ILOAD..=ALOAD => {
            (format!("{}load {}", KIND_PREFIX[usize::from(op - ILOAD)], operand_u8()?), 2)
        }
        0x1a..=0x2d => {
            let n = op - ILOAD_0;
            (format!("{}load_{}", KIND_PREFIX[usize::from(n / 4)], n % 4), 1)
        }
        ISTORE..=ASTORE => {
            (format!("{}store {}", KIND_PREFIX[usize::from(op - ISTORE)], operand_u8()?), 2)
        }
        0x3b..=0x4e => {
            let n = op - ISTORE_0;
            (format!("{}store_{}", KIND_PREFIX[usize::from(n / 4)], n % 4), 1)
        }
        0x99..=0xa8 | 0xc6 | 0xc7 => {
            let offset = i16::from_be_bytes(operand_u16()?.to_be_bytes());
            let target = pc.checked_add_signed(isize::from(offset))?;
            let name = match op {
                0xc6 => "ifnull",
                0xc7 => "ifnonnull",
                _ => BRANCH_NAMES[usize::from(op - 0x99)],
            };
            (format!("{name} {target}"), 3)
        }
        NEW => (format!("new #{}", operand_u16()?), 3),
        AASTORE => ("aastore".to_string(), 1),
        DUP => ("dup".to_string(), 1),
        IRETURN..=ARETURN => (format!("{}return", KIND_PREFIX[usize::from(op - IRETURN)]), 1),
        RETURN => ("return".to_string(), 1),
        INVOKESPECIAL => (format!("invokespecial #{}", operand_u16()?), 3),
        INVOKESTATIC => (format!("invokestatic #{}", operand_u16()?), 3),
        ANEWARRAY => (format!("anewarray #{}", operand_u16()?), 3),
        ATHROW => ("athrow".to_string(), 1),
        WIDE => {
            let inner = operand_u8()?;
            let slot = u16_at(code, pc + 2)?;
            let text = match inner {
                ILOAD..=ALOAD => format!("{}load {slot}", KIND_PREFIX[usize::from(inner - ILOAD)]),
                ISTORE..=ASTORE => {
                    format!("{}store {slot}", KIND_PREFIX[usize::from(inner - ISTORE)])
                }
                _ => return None,
            };
            (format!("wide {text}"), 4)
        }
        _ => return None,
    })
}

/// List `code` as `(pc, text)` pairs
///
/// Valid instructions without a name are listed as their raw opcode byte.
/// Stops after the first invalid one.
pub fn disassemble(code: &[u8]) -> Vec<(usize, String)> {
    let mut listing = Vec::new();
    let mut pc = 0;
    while pc < code.len() {
        if let Some((text, len)) = decode_one(code, pc) {
            listing.push((pc, text));
            pc += len;
        } else {
            listing.push((pc, format!("<0x{:02x}>", code[pc])));
            match instruction_len(code, pc) {
                Some(len) => pc += len,
                None => break,
            }
        }
    }
    listing
}
