//! Arena IR produced by the importer.
//!
//! All entities (nodes, statements, blocks, locals, exception regions) are
//! stored in [`IrContext`] and addressed by `u32` entity refs. Statements of
//! a block form an explicit doubly-linked list; side-effect flags are
//! recombined bottom-up whenever a node is built.

mod block;
mod context;
mod effects;
mod local;
mod node;
pub mod printer;
mod refs;
mod types;
pub mod validation;

pub use block::{BlockData, BlockFlags, EhRegion, HandlerKind, JumpKind, StackEntry};
pub use context::{ContextMark, IrContext, StmtData};
pub use effects::SideEffects;
pub use local::{LocalDesc, LocalKind};
pub use node::{BinaryOp, CallTarget, CompareOp, Helper, NodeData, NodeKind, RuntimeHandle, UnaryOp};
pub use refs::{BlockRef, ClassHandle, EhRef, FieldHandle, LocalRef, MethodHandle, NodeRef, StmtRef};
pub use types::{PointerWidth, TargetInfo, TypeInfo, VarType};
