use std::fmt;

use crate::opcode::Opcode;

/// A 4-byte metadata token. The high byte selects the metadata table.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Token(pub u32);

impl Token {
    pub const fn new(raw: u32) -> Self {
        Token(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Metadata table index (the top byte).
    pub const fn table(self) -> u8 {
        (self.0 >> 24) as u8
    }

    /// Row within the table (the low three bytes).
    pub const fn row(self) -> u32 {
        self.0 & 0x00FF_FFFF
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Decoded inline operand.
///
/// Branch operands are stored as absolute IL offsets, already resolved
/// against the end of the instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    None,
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Byte(u8),
    Var(u16),
    Token(Token),
    Target(u32),
    Switch(Vec<u32>),
}

/// One decoded instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    /// IL offset of the first opcode byte.
    pub offset: u32,
    pub opcode: Opcode,
    pub operand: Operand,
    /// Encoded size in bytes, opcode and operand included.
    pub size: u32,
}

impl Instruction {
    /// IL offset of the instruction that follows this one.
    pub fn next_offset(&self) -> u32 {
        self.offset + self.size
    }

    pub fn token(&self) -> Option<Token> {
        match self.operand {
            Operand::Token(tok) => Some(tok),
            _ => None,
        }
    }

    pub fn target(&self) -> Option<u32> {
        match self.operand {
            Operand::Target(t) => Some(t),
            _ => None,
        }
    }

    /// Argument/local index for `ldarg`/`stloc`-style opcodes, including the
    /// short forms with the index folded into the opcode.
    pub fn var_index(&self) -> Option<u16> {
        use Opcode::*;
        match self.opcode {
            Ldarg0 | Ldloc0 | Stloc0 => Some(0),
            Ldarg1 | Ldloc1 | Stloc1 => Some(1),
            Ldarg2 | Ldloc2 | Stloc2 => Some(2),
            Ldarg3 | Ldloc3 | Stloc3 => Some(3),
            _ => match self.operand {
                Operand::Var(v) => Some(v),
                _ => None,
            },
        }
    }

    /// Every branch target of this instruction (empty for non-branches).
    pub fn targets(&self) -> Vec<u32> {
        match &self.operand {
            Operand::Target(t) => vec![*t],
            Operand::Switch(ts) => ts.clone(),
            _ => Vec::new(),
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IL_{:04X}: {}", self.offset, self.opcode)?;
        match &self.operand {
            Operand::None => Ok(()),
            Operand::Int(v) => write!(f, " {v}"),
            Operand::Long(v) => write!(f, " {v}"),
            Operand::Float(v) => write!(f, " {v}"),
            Operand::Double(v) => write!(f, " {v}"),
            Operand::Byte(v) => write!(f, " {v}"),
            Operand::Var(v) => write!(f, " {v}"),
            Operand::Token(t) => write!(f, " {t}"),
            Operand::Target(t) => write!(f, " IL_{t:04X}"),
            Operand::Switch(ts) => {
                f.write_str(" (")?;
                for (i, t) in ts.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "IL_{t:04X}")?;
                }
                f.write_str(")")
            }
        }
    }
}
