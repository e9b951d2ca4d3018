use derive_more::{Display, Error};

use crate::instruction::Token;
use crate::opcode::{ESCAPE_PREFIX, OperandKind, Opcode};

/// A branch target whose offset may not be known yet.
///
/// Created by [`BytecodeBuilder::new_label`]; place it with
/// [`BytecodeBuilder::bind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(u32);

#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
pub enum BuildError {
    #[display("label {_0} was used but never bound")]
    UnboundLabel(#[error(not(source))] u32),

    #[display("short branch at IL_{offset:04X} cannot reach IL_{target:04X}")]
    ShortBranchOutOfRange { offset: u32, target: u32 },

    #[display("{opcode} expects a {expected:?} operand")]
    OperandMismatch {
        opcode: &'static str,
        expected: OperandKind,
    },
}

#[derive(Debug)]
struct Fixup {
    label: Label,
    /// Position of the displacement bytes.
    at: usize,
    /// Offset the displacement is relative to.
    base: usize,
    short: bool,
    /// Offset of the opcode, for diagnostics.
    insn: usize,
}

/// Assembles CIL bytes, resolving forward and backward branch labels.
#[derive(Debug, Default)]
pub struct BytecodeBuilder {
    buf: Vec<u8>,
    labels: Vec<Option<u32>>,
    fixups: Vec<Fixup>,
}

impl BytecodeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current byte offset in the stream.
    pub fn current_offset(&self) -> u32 {
        self.buf.len() as u32
    }

    pub fn new_label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() as u32 - 1)
    }

    /// Bind `label` to the current offset.
    pub fn bind(&mut self, label: Label) -> &mut Self {
        self.labels[label.0 as usize] = Some(self.current_offset());
        self
    }

    /// Offset a bound label resolved to.
    pub fn label_offset(&self, label: Label) -> Option<u32> {
        self.labels.get(label.0 as usize).copied().flatten()
    }

    // ── emit helpers ───────────────────────────────────────────────

    fn emit_opcode(&mut self, opcode: Opcode) {
        let enc = opcode.encoding();
        if opcode.is_escaped() {
            self.buf.push(ESCAPE_PREFIX);
        }
        self.buf.push(enc as u8);
    }

    fn emit_i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn check(&self, opcode: Opcode, expected: &[OperandKind]) -> Result<(), BuildError> {
        if expected.contains(&opcode.operand_kind()) {
            Ok(())
        } else {
            Err(BuildError::OperandMismatch {
                opcode: opcode.name(),
                expected: expected[0],
            })
        }
    }

    // ── instructions ───────────────────────────────────────────────

    /// Emit an opcode without an operand.
    pub fn op(&mut self, opcode: Opcode) -> Result<&mut Self, BuildError> {
        self.check(opcode, &[OperandKind::None])?;
        self.emit_opcode(opcode);
        Ok(self)
    }

    /// Emit an opcode taking an integer immediate: `ldc.i4`, `ldc.i4.s`,
    /// `unaligned.`, `no.`, or an argument/local index.
    pub fn op_int(&mut self, opcode: Opcode, value: i64) -> Result<&mut Self, BuildError> {
        self.check(
            opcode,
            &[
                OperandKind::Int32,
                OperandKind::ShortI,
                OperandKind::Byte,
                OperandKind::Int64,
                OperandKind::ShortVar,
                OperandKind::Var,
            ],
        )?;
        self.emit_opcode(opcode);
        match opcode.operand_kind() {
            OperandKind::ShortI | OperandKind::Byte | OperandKind::ShortVar => {
                self.buf.push(value as u8)
            }
            OperandKind::Var => self.buf.extend_from_slice(&(value as u16).to_le_bytes()),
            OperandKind::Int64 => self.buf.extend_from_slice(&value.to_le_bytes()),
            _ => self.emit_i32(value as i32),
        }
        Ok(self)
    }

    pub fn op_float(&mut self, opcode: Opcode, value: f64) -> Result<&mut Self, BuildError> {
        self.check(opcode, &[OperandKind::Float64, OperandKind::Float32])?;
        self.emit_opcode(opcode);
        if opcode.operand_kind() == OperandKind::Float32 {
            self.buf.extend_from_slice(&(value as f32).to_le_bytes());
        } else {
            self.buf.extend_from_slice(&value.to_le_bytes());
        }
        Ok(self)
    }

    pub fn op_token(&mut self, opcode: Opcode, token: Token) -> Result<&mut Self, BuildError> {
        self.check(opcode, &[OperandKind::Token])?;
        self.emit_opcode(opcode);
        self.emit_i32(token.raw() as i32);
        Ok(self)
    }

    /// Emit a branch (or `leave`) to `label`.
    pub fn branch(&mut self, opcode: Opcode, label: Label) -> Result<&mut Self, BuildError> {
        self.check(opcode, &[OperandKind::Branch, OperandKind::ShortBranch])?;
        let insn = self.buf.len();
        self.emit_opcode(opcode);
        let short = opcode.operand_kind() == OperandKind::ShortBranch;
        let at = self.buf.len();
        let width = if short { 1 } else { 4 };
        self.buf.extend(std::iter::repeat_n(0, width));
        self.fixups.push(Fixup {
            label,
            at,
            base: at + width,
            short,
            insn,
        });
        Ok(self)
    }

    pub fn switch(&mut self, labels: &[Label]) -> &mut Self {
        let insn = self.buf.len();
        self.emit_opcode(Opcode::Switch);
        self.emit_i32(labels.len() as i32);
        let base = self.buf.len() + 4 * labels.len();
        for &label in labels {
            let at = self.buf.len();
            self.emit_i32(0);
            self.fixups.push(Fixup {
                label,
                at,
                base,
                short: false,
                insn,
            });
        }
        self
    }

    // ── conveniences ───────────────────────────────────────────────

    /// Push an `int32` constant using the shortest encoding.
    pub fn ldc_i4(&mut self, value: i32) -> &mut Self {
        let short = match value {
            -1 => Some(Opcode::LdcI4M1),
            0 => Some(Opcode::LdcI40),
            1 => Some(Opcode::LdcI41),
            2 => Some(Opcode::LdcI42),
            3 => Some(Opcode::LdcI43),
            4 => Some(Opcode::LdcI44),
            5 => Some(Opcode::LdcI45),
            6 => Some(Opcode::LdcI46),
            7 => Some(Opcode::LdcI47),
            8 => Some(Opcode::LdcI48),
            _ => None,
        };
        if let Some(op) = short {
            self.emit_opcode(op);
        } else if i8::try_from(value).is_ok() {
            self.emit_opcode(Opcode::LdcI4S);
            self.buf.push(value as i8 as u8);
        } else {
            self.emit_opcode(Opcode::LdcI4);
            self.emit_i32(value);
        }
        self
    }

    pub fn ldarg(&mut self, index: u16) -> &mut Self {
        self.var_op(index, [Opcode::Ldarg0, Opcode::Ldarg1, Opcode::Ldarg2, Opcode::Ldarg3], Opcode::LdargS, Opcode::Ldarg)
    }

    pub fn ldloc(&mut self, index: u16) -> &mut Self {
        self.var_op(index, [Opcode::Ldloc0, Opcode::Ldloc1, Opcode::Ldloc2, Opcode::Ldloc3], Opcode::LdlocS, Opcode::Ldloc)
    }

    pub fn stloc(&mut self, index: u16) -> &mut Self {
        self.var_op(index, [Opcode::Stloc0, Opcode::Stloc1, Opcode::Stloc2, Opcode::Stloc3], Opcode::StlocS, Opcode::Stloc)
    }

    fn var_op(&mut self, index: u16, fixed: [Opcode; 4], short: Opcode, long: Opcode) -> &mut Self {
        if let Some(&op) = fixed.get(index as usize) {
            self.emit_opcode(op);
        } else if index <= u8::MAX as u16 {
            self.emit_opcode(short);
            self.buf.push(index as u8);
        } else {
            self.emit_opcode(long);
            self.buf.extend_from_slice(&index.to_le_bytes());
        }
        self
    }

    /// Resolve all labels and return the encoded bytes.
    pub fn finish(self) -> Result<Vec<u8>, BuildError> {
        let mut buf = self.buf;
        for fixup in &self.fixups {
            let target = self.labels[fixup.label.0 as usize]
                .ok_or(BuildError::UnboundLabel(fixup.label.0))?;
            let delta = target as i64 - fixup.base as i64;
            if fixup.short {
                let d = i8::try_from(delta).map_err(|_| BuildError::ShortBranchOutOfRange {
                    offset: fixup.insn as u32,
                    target,
                })?;
                buf[fixup.at] = d as u8;
            } else {
                buf[fixup.at..fixup.at + 4].copy_from_slice(&(delta as i32).to_le_bytes());
            }
        }
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::Decoder;
    use crate::instruction::Operand;

    #[test]
    fn forward_and_backward_labels() {
        let mut b = BytecodeBuilder::new();
        let top = b.new_label();
        let exit = b.new_label();
        b.bind(top);
        b.ldloc(0);
        b.branch(Opcode::BrfalseS, exit).unwrap();
        b.branch(Opcode::Br, top).unwrap();
        b.bind(exit);
        b.op(Opcode::Ret).unwrap();

        let code = b.finish().unwrap();
        let insns: Vec<_> = Decoder::new(&code).collect::<Result<_, _>>().unwrap();
        assert_eq!(insns[1].target(), Some(8));
        assert_eq!(insns[2].target(), Some(0));
        assert_eq!(insns[3].offset, 8);
    }

    #[test]
    fn shortest_constant_encodings() {
        let mut b = BytecodeBuilder::new();
        b.ldc_i4(3).ldc_i4(-100).ldc_i4(100_000);
        let code = b.finish().unwrap();
        let insns: Vec<_> = Decoder::new(&code).collect::<Result<_, _>>().unwrap();
        assert_eq!(insns[0].opcode, Opcode::LdcI43);
        assert_eq!(insns[1].opcode, Opcode::LdcI4S);
        assert_eq!(insns[1].operand, Operand::Int(-100));
        assert_eq!(insns[2].operand, Operand::Int(100_000));
    }

    #[test]
    fn unbound_label_is_an_error() {
        let mut b = BytecodeBuilder::new();
        let l = b.new_label();
        b.branch(Opcode::Br, l).unwrap();
        assert_eq!(b.finish(), Err(BuildError::UnboundLabel(0)));
    }

    #[test]
    fn operand_mismatch() {
        let mut b = BytecodeBuilder::new();
        assert!(b.op(Opcode::LdcI4).is_err());
        assert!(b.op_token(Opcode::Add, Token::new(1)).is_err());
    }
}
