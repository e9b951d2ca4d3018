//! CIL bytecode: opcode table, decoder, assembler and method body model.
//!
//! The encoding follows ECMA-335 Partition III bit for bit: single-byte
//! opcodes, a `0xFE` escape for the second opcode page, little-endian
//! immediates, and branch displacements relative to the next instruction.

mod builder;
mod decoder;
mod instruction;
mod method;
mod opcode;

pub use builder::{BuildError, BytecodeBuilder, Label};
pub use decoder::{DecodeError, Decoder, decode_at};
pub use instruction::{Instruction, Operand, Token};
pub use method::{EhClause, EhClauseKind, MethodBody};
pub use opcode::{ESCAPE_PREFIX, FlowKind, OperandKind, Opcode};
