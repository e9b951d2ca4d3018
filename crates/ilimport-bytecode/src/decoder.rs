use derive_more::{Display, Error};

use crate::instruction::{Instruction, Operand, Token};
use crate::opcode::{ESCAPE_PREFIX, OperandKind, Opcode};

/// Malformed bytecode.
#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
pub enum DecodeError {
    #[display("IL_{offset:04X}: unknown opcode 0x{encoding:04X}")]
    UnknownOpcode { offset: u32, encoding: u16 },

    #[display("IL_{offset:04X}: instruction runs past the end of the method body")]
    Truncated { offset: u32 },

    #[display("IL_{offset:04X}: branch target {target} is outside the method body")]
    BadTarget { offset: u32, target: i64 },
}

impl DecodeError {
    pub fn offset(&self) -> u32 {
        match *self {
            DecodeError::UnknownOpcode { offset, .. }
            | DecodeError::Truncated { offset }
            | DecodeError::BadTarget { offset, .. } => offset,
        }
    }
}

/// Decodes CIL instructions from a method body.
///
/// Unlike a VM's trusted decoder, input here is untrusted: every read is
/// bounds-checked and malformed bytes surface as [`DecodeError`].
#[derive(Clone)]
pub struct Decoder<'a> {
    code: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(code: &'a [u8]) -> Self {
        Self { code, pos: 0 }
    }

    /// Start decoding at `offset`.
    pub fn at(code: &'a [u8], offset: u32) -> Self {
        Self {
            code,
            pos: offset as usize,
        }
    }

    pub fn offset(&self) -> u32 {
        self.pos as u32
    }

    pub fn is_at_end(&self) -> bool {
        self.pos >= self.code.len()
    }

    /// Reposition the decoder.
    pub fn seek(&mut self, offset: u32) {
        self.pos = offset as usize;
    }

    /// Decode the next instruction without consuming it.
    pub fn peek(&self) -> Option<Result<Instruction, DecodeError>> {
        self.clone().decode_next()
    }

    /// Decode the instruction `n` positions ahead (0 = next) without
    /// consuming anything.
    pub fn peek_nth(&self, n: usize) -> Option<Result<Instruction, DecodeError>> {
        let mut ahead = self.clone();
        for _ in 0..n {
            match ahead.decode_next()? {
                Ok(_) => {}
                Err(e) => return Some(Err(e)),
            }
        }
        ahead.decode_next()
    }

    /// Decode the next instruction, or `None` at end of stream.
    pub fn decode_next(&mut self) -> Option<Result<Instruction, DecodeError>> {
        if self.is_at_end() {
            return None;
        }
        let start = self.pos;
        let result = self.decode();
        if result.is_err() {
            // Do not leave the decoder halfway through an instruction.
            self.pos = self.code.len();
        }
        debug_assert!(result.is_err() || self.pos > start);
        Some(result)
    }

    fn decode(&mut self) -> Result<Instruction, DecodeError> {
        let offset = self.offset();
        let first = self.read_u8(offset)?;
        let encoding = if first == ESCAPE_PREFIX {
            0xFE00 | u16::from(self.read_u8(offset)?)
        } else {
            u16::from(first)
        };
        let opcode =
            Opcode::from_encoding(encoding).ok_or(DecodeError::UnknownOpcode { offset, encoding })?;

        let operand = match opcode.operand_kind() {
            OperandKind::None => Operand::None,
            OperandKind::ShortI => Operand::Int(i32::from(self.read_u8(offset)? as i8)),
            OperandKind::Byte => Operand::Byte(self.read_u8(offset)?),
            OperandKind::Int32 => Operand::Int(self.read_i32(offset)?),
            OperandKind::Int64 => Operand::Long(i64::from_le_bytes(self.read_array(offset)?)),
            OperandKind::Float32 => Operand::Float(f32::from_le_bytes(self.read_array(offset)?)),
            OperandKind::Float64 => Operand::Double(f64::from_le_bytes(self.read_array(offset)?)),
            OperandKind::ShortVar => Operand::Var(u16::from(self.read_u8(offset)?)),
            OperandKind::Var => Operand::Var(u16::from_le_bytes(self.read_array(offset)?)),
            OperandKind::Token => Operand::Token(Token(self.read_i32(offset)? as u32)),
            OperandKind::ShortBranch => {
                let delta = i64::from(self.read_u8(offset)? as i8);
                Operand::Target(self.resolve_target(offset, self.pos as i64 + delta)?)
            }
            OperandKind::Branch => {
                let delta = i64::from(self.read_i32(offset)?);
                Operand::Target(self.resolve_target(offset, self.pos as i64 + delta)?)
            }
            OperandKind::Switch => {
                let count = self.read_i32(offset)? as u32 as usize;
                let table_end = self.pos as i64 + 4 * count as i64;
                if table_end > self.code.len() as i64 {
                    return Err(DecodeError::Truncated { offset });
                }
                let mut deltas = Vec::with_capacity(count);
                for _ in 0..count {
                    deltas.push(i64::from(self.read_i32(offset)?));
                }
                let base = self.pos as i64;
                let targets = deltas
                    .into_iter()
                    .map(|d| self.resolve_target(offset, base + d))
                    .collect::<Result<Vec<_>, _>>()?;
                Operand::Switch(targets)
            }
        };

        Ok(Instruction {
            offset,
            opcode,
            operand,
            size: self.pos as u32 - offset,
        })
    }

    fn resolve_target(&self, offset: u32, target: i64) -> Result<u32, DecodeError> {
        if target < 0 || target >= self.code.len() as i64 {
            return Err(DecodeError::BadTarget { offset, target });
        }
        Ok(target as u32)
    }

    fn read_u8(&mut self, offset: u32) -> Result<u8, DecodeError> {
        let b = *self
            .code
            .get(self.pos)
            .ok_or(DecodeError::Truncated { offset })?;
        self.pos += 1;
        Ok(b)
    }

    fn read_i32(&mut self, offset: u32) -> Result<i32, DecodeError> {
        Ok(i32::from_le_bytes(self.read_array(offset)?))
    }

    fn read_array<const N: usize>(&mut self, offset: u32) -> Result<[u8; N], DecodeError> {
        let end = self.pos + N;
        let bytes = self
            .code
            .get(self.pos..end)
            .ok_or(DecodeError::Truncated { offset })?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        self.pos = end;
        Ok(out)
    }
}

impl Iterator for Decoder<'_> {
    type Item = Result<Instruction, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.decode_next()
    }
}

/// Decode a single instruction at `offset`.
pub fn decode_at(code: &[u8], offset: u32) -> Result<Instruction, DecodeError> {
    Decoder::at(code, offset)
        .decode_next()
        .unwrap_or(Err(DecodeError::Truncated { offset }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(code: &[u8]) -> Vec<Instruction> {
        Decoder::new(code).collect::<Result<_, _>>().unwrap()
    }

    #[test]
    fn little_endian_immediates() {
        // ldc.i4 0x12345678; ldc.i8 -2; ret
        let mut code = vec![0x20, 0x78, 0x56, 0x34, 0x12, 0x21];
        code.extend_from_slice(&(-2i64).to_le_bytes());
        code.push(0x2A);
        let insns = decode_all(&code);
        assert_eq!(insns[0].operand, Operand::Int(0x1234_5678));
        assert_eq!(insns[0].size, 5);
        assert_eq!(insns[1].operand, Operand::Long(-2));
        assert_eq!(insns[1].offset, 5);
        assert_eq!(insns[2].opcode, Opcode::Ret);
    }

    #[test]
    fn escaped_opcodes_and_short_immediates() {
        // ldc.i4.s -1; ldc.i4.1; ceq; ldloc 0x0102
        let code = [0x1F, 0xFF, 0x17, 0xFE, 0x01, 0xFE, 0x0C, 0x02, 0x01];
        let insns = decode_all(&code);
        assert_eq!(insns[0].operand, Operand::Int(-1));
        assert_eq!(insns[2].opcode, Opcode::Ceq);
        assert_eq!(insns[2].size, 2);
        assert_eq!(insns[3].opcode, Opcode::Ldloc);
        assert_eq!(insns[3].var_index(), Some(0x0102));
    }

    #[test]
    fn branch_targets_are_absolute() {
        // 0: br.s +1 ; 2: nop ; 3: ret
        let code = [0x2B, 0x01, 0x00, 0x2A];
        let insns = decode_all(&code);
        assert_eq!(insns[0].target(), Some(3));
    }

    #[test]
    fn switch_targets_relative_to_table_end() {
        // 0: switch (2 targets) -> table ends at 13; deltas 0 and 1
        let mut code = vec![0x45];
        code.extend_from_slice(&2u32.to_le_bytes());
        code.extend_from_slice(&0i32.to_le_bytes());
        code.extend_from_slice(&1i32.to_le_bytes());
        code.push(0x00); // 13: nop
        code.push(0x2A); // 14: ret
        let insns = decode_all(&code);
        assert_eq!(insns[0].operand, Operand::Switch(vec![13, 14]));
        assert_eq!(insns[0].next_offset(), 13);
    }

    #[test]
    fn truncated_and_unknown() {
        assert_eq!(
            decode_at(&[0x20, 0x01], 0),
            Err(DecodeError::Truncated { offset: 0 })
        );
        assert_eq!(
            decode_at(&[0xFE, 0x10], 0),
            Err(DecodeError::UnknownOpcode {
                offset: 0,
                encoding: 0xFE10
            })
        );
        assert!(matches!(
            decode_at(&[0x2B, 0x7F], 0),
            Err(DecodeError::BadTarget { .. })
        ));
    }

    #[test]
    fn peek_does_not_consume() {
        let code = [0x00, 0x17, 0x2A];
        let mut dec = Decoder::new(&code);
        assert_eq!(dec.peek().unwrap().unwrap().opcode, Opcode::Nop);
        assert_eq!(dec.peek_nth(2).unwrap().unwrap().opcode, Opcode::Ret);
        assert_eq!(dec.decode_next().unwrap().unwrap().opcode, Opcode::Nop);
        assert_eq!(dec.offset(), 1);
    }
}
