//! Instruction boundaries and jump operands of a method body
//!
//! Enough decoding to move instructions around: every opcode's length, and
//! the relative offsets of branches and switches. Switch operands are
//! aligned to the start of the code array, so their encoded length depends
//! on where they end up.

use super::opcodes::{IRETURN, RETURN};
use crate::domain::ClassFormatError;

pub const TABLESWITCH: u8 = 0xaa;
pub const LOOKUPSWITCH: u8 = 0xab;
pub const GOTO_W: u8 = 0xc8;
pub const JSR_W: u8 = 0xc9;
pub const NEW: u8 = 0xbb;
const IINC: u8 = 0x84;
const WIDE: u8 = 0xc4;

/// Relative jump operands, as offsets from the instruction's own pc
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Jump {
    None,
    /// `if<cond>`, `goto`, `jsr`, `ifnull`, `ifnonnull`
    Short(i16),
    /// `goto_w`, `jsr_w`
    Wide(i32),
    Table { default: i32, low: i32, high: i32, offsets: Vec<i32> },
    Lookup { default: i32, pairs: Vec<(i32, i32)> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub pc: usize,
    pub opcode: u8,
    pub len: usize,
    pub jump: Jump,
}

/// Zero bytes between a switch opcode at `pc` and its 4-aligned operands
pub fn switch_padding(pc: usize) -> usize {
    3 - pc % 4
}

fn fixed_len(opcode: u8) -> Option<usize> {
    Some(match opcode {
        0x00..=0x0f | 0x1a..=0x35 | 0x3b..=0x83 | 0x85..=0x98 | 0xac..=0xb1 | 0xbe | 0xbf | 0xc2 | 0xc3 => 1,
        0x10 | 0x12 | 0x15..=0x19 | 0x36..=0x3a | 0xa9 | 0xbc => 2,
        0x11 | 0x13 | 0x14 | IINC | 0x99..=0xa8 | 0xb2..=0xb8 | NEW | 0xbd | 0xc0 | 0xc1 | 0xc6 | 0xc7 => 3,
        0xc5 => 4,
        0xb9 | 0xba | GOTO_W | JSR_W => 5,
        _ => return None,
    })
}

fn i32_at(code: &[u8], at: usize) -> Option<i32> {
    let b = code.get(at..at + 4)?;
    Some(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
}

fn count(value: i32) -> Option<usize> {
    usize::try_from(value).ok()
}

/// Length of the instruction at `pc`, or `None` for an invalid or truncated one
pub fn instruction_len(code: &[u8], pc: usize) -> Option<usize> {
    decode_at(code, pc).map(|insn| insn.len)
}

fn decode_at(code: &[u8], pc: usize) -> Option<Instruction> {
    let opcode = *code.get(pc)?;
    let (len, jump) = match opcode {
        TABLESWITCH => {
            let at = pc + 1 + switch_padding(pc);
            let default = i32_at(code, at)?;
            let low = i32_at(code, at + 4)?;
            let high = i32_at(code, at + 8)?;
            let n = count(high.checked_sub(low)?.checked_add(1)?)?;
            let offsets = (0..n).map(|i| i32_at(code, at + 12 + 4 * i)).collect::<Option<Vec<_>>>()?;
            (at + 12 + 4 * n - pc, Jump::Table { default, low, high, offsets })
        }
        LOOKUPSWITCH => {
            let at = pc + 1 + switch_padding(pc);
            let default = i32_at(code, at)?;
            let n = count(i32_at(code, at + 4)?)?;
            let pairs = (0..n)
                .map(|i| Some((i32_at(code, at + 8 + 8 * i)?, i32_at(code, at + 12 + 8 * i)?)))
                .collect::<Option<Vec<_>>>()?;
            (at + 8 + 8 * n - pc, Jump::Lookup { default, pairs })
        }
        WIDE => (if *code.get(pc + 1)? == IINC { 6 } else { 4 }, Jump::None),
        0x99..=0xa8 | 0xc6 | 0xc7 => {
            let b = code.get(pc + 1..pc + 3)?;
            (3, Jump::Short(i16::from_be_bytes([b[0], b[1]])))
        }
        GOTO_W | JSR_W => (5, Jump::Wide(i32_at(code, pc + 1)?)),
        _ => (fixed_len(opcode)?, Jump::None),
    };
    (pc + len <= code.len()).then_some(Instruction { pc, opcode, len, jump })
}

/// Split a code array into instructions
///
/// # Errors
///
/// Returns `ClassFormatError::InvalidBytecode` at the first unknown opcode or
/// an instruction running past the end of the code.
pub fn decode(code: &[u8]) -> Result<Vec<Instruction>, ClassFormatError> {
    let mut instructions = Vec::new();
    let mut pc = 0;
    while pc < code.len() {
        let insn = decode_at(code, pc).ok_or(ClassFormatError::InvalidBytecode(pc))?;
        pc += insn.len;
        instructions.push(insn);
    }
    Ok(instructions)
}

impl Instruction {
    /// `<x>return` or `return`
    pub fn is_return(&self) -> bool {
        (IRETURN..=RETURN).contains(&self.opcode)
    }

    /// Encoded length when placed at `pc`
    pub fn len_at(&self, pc: usize) -> usize {
        match &self.jump {
            Jump::Table { offsets, .. } => 1 + switch_padding(pc) + 12 + 4 * offsets.len(),
            Jump::Lookup { pairs, .. } => 1 + switch_padding(pc) + 8 + 8 * pairs.len(),
            _ => self.len,
        }
    }

    /// Absolute pc of `offset` taken from this instruction
    pub fn target(&self, offset: i32) -> Option<usize> {
        self.pc.checked_add_signed(isize::try_from(offset).ok()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_lengths_and_branches() {
        let code = [
            0x1b, // iload_1
            0x9c, 0x00, 0x05, // ifge +5
            0x1b, // iload_1
            0x74, // ineg
            0xac, // ireturn
            0xc4, IINC, 0x01, 0x00, 0x00, 0x01, // wide iinc 256 1
            0x1b, 0xac,
        ];
        let insns = decode(&code).unwrap();
        let pcs: Vec<_> = insns.iter().map(|i| i.pc).collect();
        assert_eq!(pcs, [0, 1, 4, 5, 6, 7, 13, 14]);
        assert_eq!(insns[1].jump, Jump::Short(5));
        assert_eq!(insns[1].target(5), Some(6));
        assert!(insns[4].is_return());
        assert_eq!(insns[5].len, 6);
    }

    #[test]
    fn test_tableswitch_padding_follows_position() {
        // iload_1 at 0, tableswitch at 1: two padding bytes
        let mut code = vec![0x1b, TABLESWITCH, 0, 0];
        for v in [20i32, 0, 1, 16, 18] {
            code.extend_from_slice(&v.to_be_bytes());
        }
        code.push(0xb1);
        let insns = decode(&code).unwrap();
        let Jump::Table { default, low, high, ref offsets } = insns[1].jump else { panic!("not a tableswitch") };
        assert_eq!((default, low, high), (20, 0, 1));
        assert_eq!(offsets, &[16, 18]);
        assert_eq!(insns[1].len, 23);
        assert_eq!(insns[1].len_at(1), 23);
        assert_eq!(insns[1].len_at(3), 21);
        assert_eq!(insns[2].pc, 24);
    }

    #[test]
    fn test_invalid_and_truncated_code() {
        assert_eq!(decode(&[0x1b, 0xca]), Err(ClassFormatError::InvalidBytecode(1)));
        assert_eq!(decode(&[0xb8, 0x00]), Err(ClassFormatError::InvalidBytecode(0)));
        assert_eq!(instruction_len(&[0xb9, 0, 1, 1, 0], 0), Some(5));
    }
}
