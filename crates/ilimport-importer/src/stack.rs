//! The evaluation stack.

use ilimport_ir::{IrContext, NodeRef, StackEntry, TypeInfo};

use crate::error::BadCode;

/// Typed operand stack of the abstract interpreter.
///
/// Level 0 is the bottom of the stack.
#[derive(Clone, Debug, Default)]
pub struct EvalStack {
    entries: Vec<StackEntry>,
    limit: usize,
    uses_long: bool,
    uses_float: bool,
}

impl EvalStack {
    pub fn new(limit: usize) -> Self {
        Self {
            entries: Vec::with_capacity(limit),
            limit,
            uses_long: false,
            uses_float: false,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn depth(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn push(&mut self, node: NodeRef, info: TypeInfo) -> Result<(), BadCode> {
        if self.entries.len() >= self.limit {
            return Err(BadCode::StackOverflow { max: self.limit });
        }
        match info {
            TypeInfo::Int64 => self.uses_long = true,
            TypeInfo::Float | TypeInfo::Double => self.uses_float = true,
            _ => {}
        }
        self.entries.push(StackEntry { node, info });
        Ok(())
    }

    /// Whether an `int64` value was ever pushed.
    pub fn uses_long(&self) -> bool {
        self.uses_long
    }

    /// Whether a floating-point value was ever pushed.
    pub fn uses_float(&self) -> bool {
        self.uses_float
    }

    pub fn pop(&mut self) -> Result<StackEntry, BadCode> {
        self.entries.pop().ok_or(BadCode::StackUnderflow)
    }

    /// Pop `n` entries, returned bottom-most first.
    pub fn pop_n(&mut self, n: usize) -> Result<Vec<StackEntry>, BadCode> {
        if n > self.entries.len() {
            return Err(BadCode::StackUnderflow);
        }
        let at = self.entries.len() - n;
        Ok(self.entries.split_off(at))
    }

    /// The entry `n` below the top (`0` is the top).
    pub fn peek(&self, n: usize) -> Option<&StackEntry> {
        self.entries.iter().rev().nth(n)
    }

    pub fn entries(&self) -> &[StackEntry] {
        &self.entries
    }

    pub fn get(&self, level: usize) -> StackEntry {
        self.entries[level]
    }

    pub fn set(&mut self, level: usize, entry: StackEntry) {
        self.entries[level] = entry;
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn snapshot(&self) -> Vec<StackEntry> {
        self.entries.clone()
    }

    /// Replace the contents with fresh copies of `state`.
    ///
    /// Snapshot entries are leaf trees (local reads, constants, the catch
    /// argument), so every restore gets nodes of its own.
    pub fn restore(&mut self, ctx: &mut IrContext, state: &[StackEntry]) {
        self.entries.clear();
        for entry in state {
            debug_assert!(ctx.is_cloneable(entry.node) || ctx.node(entry.node).operands.is_empty());
            let node = ctx.clone_tree(entry.node);
            self.entries.push(StackEntry {
                node,
                info: entry.info,
            });
        }
    }
}
