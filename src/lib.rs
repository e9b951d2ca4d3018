//! Driver for the CIL importer: JSON module loading and disassembly.

pub mod disasm;
pub mod loader;

pub use disasm::disassemble;
pub use ilimport_importer::ImportConfig;
pub use loader::{LoadError, Module, ModuleDef};
