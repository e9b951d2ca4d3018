//! Entity references for the importer's arena IR.
//!
//! Each ref type is a thin `u32` wrapper providing type-safe indexing
//! into `PrimaryMap` storage in [`IrContext`](crate::IrContext).

use cranelift_entity::entity_impl;
use std::fmt;

/// Reference to an expression/statement node.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeRef(u32);
entity_impl!(NodeRef, "n");

/// Reference to a statement (a root node linked into a block).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StmtRef(u32);
entity_impl!(StmtRef, "stmt");

/// Reference to a basic block.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockRef(u32);
entity_impl!(BlockRef, "BB");

/// Reference to an argument, IL local or importer temp.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocalRef(u32);
entity_impl!(LocalRef, "V");

/// Reference to an exception region.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EhRef(u32);
entity_impl!(EhRef, "EH");

impl LocalRef {
    /// The local `n` slots after `self`. Spill-clique temps are allocated as
    /// consecutive runs, so `base.offset(level)` names the temp of a stack
    /// level.
    pub fn offset(self, n: usize) -> LocalRef {
        LocalRef(self.0 + n as u32)
    }
}

macro_rules! metadata_handle {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u32);

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "#{}"), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Debug::fmt(self, f)
            }
        }
    };
}

metadata_handle!(
    /// Resolved class handle, as handed out by the resolver.
    ClassHandle,
    "class"
);
metadata_handle!(
    /// Resolved method handle.
    MethodHandle,
    "method"
);
metadata_handle!(
    /// Resolved field handle.
    FieldHandle,
    "field"
);
