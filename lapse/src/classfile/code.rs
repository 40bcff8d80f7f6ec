//! `Code` and `StackMapTable` attributes

use super::bytes::{table_len, ByteReader, PutBe};
use super::Attribute;
use crate::domain::ClassFormatError;

/// Largest method body the JVM accepts
pub const MAX_CODE_LEN: usize = 65535;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionEntry {
    pub start_pc: u16,
    pub end_pc: u16,
    pub handler_pc: u16,
    /// 0 catches everything
    pub catch_type: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeAttribute {
    pub max_stack: u16,
    pub max_locals: u16,
    pub code: Vec<u8>,
    pub exception_table: Vec<ExceptionEntry>,
    pub attributes: Vec<Attribute>,
}

impl CodeAttribute {
    pub fn parse(info: &[u8]) -> Result<Self, ClassFormatError> {
        let mut r = ByteReader::new(info);
        let max_stack = r.u16()?;
        let max_locals = r.u16()?;
        let code_len = r.u32()? as usize;
        let code = r.bytes(code_len)?.to_vec();
        let entries = r.u16()?;
        let mut exception_table = Vec::with_capacity(usize::from(entries));
        for _ in 0..entries {
            exception_table.push(ExceptionEntry {
                start_pc: r.u16()?,
                end_pc: r.u16()?,
                handler_pc: r.u16()?,
                catch_type: r.u16()?,
            });
        }
        let attributes = Attribute::parse_table(&mut r)?;
        if r.remaining() > 0 {
            return Err(ClassFormatError::TrailingBytes(r.remaining()));
        }
        Ok(Self { max_stack, max_locals, code, exception_table, attributes })
    }

    #[allow(clippy::cast_possible_truncation)]
    pub fn to_bytes(&self) -> Result<Vec<u8>, ClassFormatError> {
        let mut out = Vec::with_capacity(12 + self.code.len());
        out.put_u16(self.max_stack);
        out.put_u16(self.max_locals);
        // Callers bound code length by MAX_CODE_LEN
        out.put_u32(self.code.len() as u32);
        out.extend_from_slice(&self.code);
        out.put_u16(table_len(self.exception_table.len())?);
        for entry in &self.exception_table {
            out.put_u16(entry.start_pc);
            out.put_u16(entry.end_pc);
            out.put_u16(entry.handler_pc);
            out.put_u16(entry.catch_type);
        }
        Attribute::write_table(&self.attributes, &mut out)?;
        Ok(out)
    }
}

/// `verification_type_info` (JVMS 4.7.4)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationType {
    Top,
    Integer,
    Float,
    Double,
    Long,
    Null,
    UninitializedThis,
    /// `CONSTANT_Class` index
    Object(u16),
    /// Offset of the `new` instruction
    Uninitialized(u16),
}

impl VerificationType {
    fn parse(r: &mut ByteReader<'_>) -> Result<Self, ClassFormatError> {
        let tag = r.u8()?;
        Ok(match tag {
            0 => VerificationType::Top,
            1 => VerificationType::Integer,
            2 => VerificationType::Float,
            3 => VerificationType::Double,
            4 => VerificationType::Long,
            5 => VerificationType::Null,
            6 => VerificationType::UninitializedThis,
            7 => VerificationType::Object(r.u16()?),
            8 => VerificationType::Uninitialized(r.u16()?),
            _ => return Err(ClassFormatError::InvalidConstantTag { tag, index: 0 }),
        })
    }

    fn write(self, out: &mut Vec<u8>) {
        match self {
            VerificationType::Top => out.put_u8(0),
            VerificationType::Integer => out.put_u8(1),
            VerificationType::Float => out.put_u8(2),
            VerificationType::Double => out.put_u8(3),
            VerificationType::Long => out.put_u8(4),
            VerificationType::Null => out.put_u8(5),
            VerificationType::UninitializedThis => out.put_u8(6),
            VerificationType::Object(index) => {
                out.put_u8(7);
                out.put_u16(index);
            }
            VerificationType::Uninitialized(offset) => {
                out.put_u8(8);
                out.put_u16(offset);
            }
        }
    }
}

/// One `stack_map_frame`, with compressed forms kept as they appear on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackMapFrame {
    Same { offset_delta: u16 },
    SameLocals1StackItem { offset_delta: u16, stack: VerificationType },
    Chop { offset_delta: u16, chopped: u8 },
    Append { offset_delta: u16, locals: Vec<VerificationType> },
    Full { offset_delta: u16, locals: Vec<VerificationType>, stack: Vec<VerificationType> },
}

impl StackMapFrame {
    pub fn offset_delta(&self) -> u16 {
        match self {
            StackMapFrame::Same { offset_delta }
            | StackMapFrame::SameLocals1StackItem { offset_delta, .. }
            | StackMapFrame::Chop { offset_delta, .. }
            | StackMapFrame::Append { offset_delta, .. }
            | StackMapFrame::Full { offset_delta, .. } => *offset_delta,
        }
    }

    fn parse(r: &mut ByteReader<'_>) -> Result<Self, ClassFormatError> {
        let frame_type = r.u8()?;
        Ok(match frame_type {
            0..=63 => StackMapFrame::Same { offset_delta: u16::from(frame_type) },
            64..=127 => StackMapFrame::SameLocals1StackItem {
                offset_delta: u16::from(frame_type - 64),
                stack: VerificationType::parse(r)?,
            },
            247 => StackMapFrame::SameLocals1StackItem {
                offset_delta: r.u16()?,
                stack: VerificationType::parse(r)?,
            },
            248..=250 => StackMapFrame::Chop { offset_delta: r.u16()?, chopped: 251 - frame_type },
            251 => StackMapFrame::Same { offset_delta: r.u16()? },
            252..=254 => {
                let offset_delta = r.u16()?;
                let locals = (0..frame_type - 251)
                    .map(|_| VerificationType::parse(r))
                    .collect::<Result<_, _>>()?;
                StackMapFrame::Append { offset_delta, locals }
            }
            255 => {
                let offset_delta = r.u16()?;
                let n_locals = r.u16()?;
                let locals = (0..n_locals)
                    .map(|_| VerificationType::parse(r))
                    .collect::<Result<_, _>>()?;
                let n_stack = r.u16()?;
                let stack = (0..n_stack)
                    .map(|_| VerificationType::parse(r))
                    .collect::<Result<_, _>>()?;
                StackMapFrame::Full { offset_delta, locals, stack }
            }
            _ => return Err(ClassFormatError::InvalidConstantTag { tag: frame_type, index: 0 }),
        })
    }

    /// Writes the frame in its most compact legal form
    #[allow(clippy::cast_possible_truncation)]
    fn write(&self, out: &mut Vec<u8>) -> Result<(), ClassFormatError> {
        match self {
            StackMapFrame::Same { offset_delta } if *offset_delta <= 63 => {
                out.put_u8(*offset_delta as u8);
            }
            StackMapFrame::Same { offset_delta } => {
                out.put_u8(251);
                out.put_u16(*offset_delta);
            }
            StackMapFrame::SameLocals1StackItem { offset_delta, stack } => {
                if *offset_delta <= 63 {
                    out.put_u8(64 + *offset_delta as u8);
                } else {
                    out.put_u8(247);
                    out.put_u16(*offset_delta);
                }
                stack.write(out);
            }
            StackMapFrame::Chop { offset_delta, chopped } => {
                out.put_u8(251 - chopped);
                out.put_u16(*offset_delta);
            }
            StackMapFrame::Append { offset_delta, locals } => {
                out.put_u8(251 + locals.len() as u8);
                out.put_u16(*offset_delta);
                for local in locals {
                    local.write(out);
                }
            }
            StackMapFrame::Full { offset_delta, locals, stack } => {
                out.put_u8(255);
                out.put_u16(*offset_delta);
                out.put_u16(table_len(locals.len())?);
                for local in locals {
                    local.write(out);
                }
                out.put_u16(table_len(stack.len())?);
                for item in stack {
                    item.write(out);
                }
            }
        }
        Ok(())
    }
}

/// Parse the body of a `StackMapTable` attribute
pub fn parse_stack_map_table(info: &[u8]) -> Result<Vec<StackMapFrame>, ClassFormatError> {
    let mut r = ByteReader::new(info);
    let count = r.u16()?;
    let frames = (0..count)
        .map(|_| StackMapFrame::parse(&mut r))
        .collect::<Result<Vec<_>, _>>()?;
    if r.remaining() > 0 {
        return Err(ClassFormatError::TrailingBytes(r.remaining()));
    }
    Ok(frames)
}

/// Serialize frames into the body of a `StackMapTable` attribute
pub fn write_stack_map_table(frames: &[StackMapFrame]) -> Result<Vec<u8>, ClassFormatError> {
    let mut out = Vec::new();
    out.put_u16(table_len(frames.len())?);
    for frame in frames {
        frame.write(&mut out)?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_attribute_round_trip() {
        let code = CodeAttribute {
            max_stack: 2,
            max_locals: 3,
            code: vec![0x2a, 0xb1],
            exception_table: vec![ExceptionEntry { start_pc: 0, end_pc: 1, handler_pc: 1, catch_type: 0 }],
            attributes: vec![Attribute { name_index: 9, info: vec![1, 2, 3] }],
        };
        let bytes = code.to_bytes().unwrap();
        assert_eq!(CodeAttribute::parse(&bytes).unwrap(), code);
    }

    #[test]
    fn test_full_frame_encoding() {
        let frames = vec![StackMapFrame::Full {
            offset_delta: 40,
            locals: vec![VerificationType::Object(5), VerificationType::Long],
            stack: vec![VerificationType::Object(12)],
        }];
        let bytes = write_stack_map_table(&frames).unwrap();
        assert_eq!(
            bytes,
            vec![0, 1, 255, 0, 40, 0, 2, 7, 0, 5, 4, 0, 1, 7, 0, 12]
        );
        assert_eq!(parse_stack_map_table(&bytes).unwrap(), frames);
    }

    #[test]
    fn test_compact_frames_parse() {
        // same(3), same_locals_1_stack_item(5, int), chop 1 (delta 7), append [float] (delta 2)
        let bytes = [0, 4, 3, 69, 1, 250, 0, 7, 252, 0, 2, 2];
        let frames = parse_stack_map_table(&bytes).unwrap();
        assert_eq!(frames[0], StackMapFrame::Same { offset_delta: 3 });
        assert_eq!(
            frames[1],
            StackMapFrame::SameLocals1StackItem { offset_delta: 5, stack: VerificationType::Integer }
        );
        assert_eq!(frames[2], StackMapFrame::Chop { offset_delta: 7, chopped: 1 });
        assert_eq!(
            frames[3],
            StackMapFrame::Append { offset_delta: 2, locals: vec![VerificationType::Float] }
        );
        assert_eq!(write_stack_map_table(&frames).unwrap(), bytes);
    }
}
