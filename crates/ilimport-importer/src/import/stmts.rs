//! Statement building.
//!
//! Appending a statement evaluates its root "now", ahead of every value
//! still pending on the evaluation stack. Before linking, the stack entries
//! the root could interfere with are spilled, so that evaluation order is
//! the one the IL specifies.

use derive_more::Display;
use ilimport_ir::{IrContext, LocalRef, NodeKind, NodeRef, SideEffects, StackEntry, StmtRef};

use super::Importer;

/// A pending stack entry that a statement root would be reordered with.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum Interference {
    /// The root calls out while the entry touches global state.
    #[display("call appended over stack level {level} with global effects")]
    CallOverGlobalEffect { level: usize },
    /// The root stores to a local the entry reads.
    #[display("store to {local} appended over stack level {level} that reads it")]
    LocalStoreOverRead { level: usize, local: LocalRef },
    /// The root stores to an address-exposed local while the entry has
    /// side effects.
    #[display("store to exposed {local} appended over stack level {level} with side effects")]
    ExposedStoreOverSideEffect { level: usize, local: LocalRef },
    /// The root writes memory the entry may read.
    #[display("memory store appended over stack level {level} with global references")]
    MemoryStoreOverGlobalRef { level: usize },
}

/// Check whether appending `root` would reorder it with one of `entries`.
pub fn check_interference(
    ctx: &IrContext,
    entries: &[StackEntry],
    root: NodeRef,
) -> Option<Interference> {
    let effects = ctx.effects(root);
    for (level, entry) in entries.iter().enumerate() {
        let entry_effects = ctx.effects(entry.node);
        if effects.contains(SideEffects::CALL) && entry_effects.has_global_effects() {
            return Some(Interference::CallOverGlobalEffect { level });
        }
        match *ctx.kind(root) {
            NodeKind::StoreLcl(local) => {
                if ctx.references_local(entry.node, local) {
                    return Some(Interference::LocalStoreOverRead { level, local });
                }
                if ctx.local(local).address_exposed && entry_effects.has_side_effects() {
                    return Some(Interference::ExposedStoreOverSideEffect { level, local });
                }
            }
            NodeKind::StoreInd { .. }
            | NodeKind::StoreBlk(_)
            | NodeKind::CopyBlk
            | NodeKind::InitBlk => {
                if entry_effects.contains(SideEffects::GLOB_REF) {
                    return Some(Interference::MemoryStoreOverGlobalRef { level });
                }
            }
            _ => {}
        }
    }
    None
}

impl Importer<'_> {
    /// Append `root` to the current block, first spilling the stack entries
    /// below `check_level` that it would otherwise be reordered with.
    pub(super) fn append_stmt(&mut self, root: NodeRef, check_level: usize) -> StmtRef {
        self.spill_special_side_effects();
        let check_level = check_level.min(self.stack.depth());
        if check_level > 0 {
            self.spill_for_root(root, check_level);
        }
        debug_assert!(
            check_interference(self.ctx, &self.stack.entries()[..check_level], root).is_none(),
            "{:?}",
            check_interference(self.ctx, &self.stack.entries()[..check_level], root)
        );
        self.link_stmt(root)
    }

    /// Append `root` without any spilling.
    pub(super) fn link_stmt(&mut self, root: NodeRef) -> StmtRef {
        self.ctx.append_stmt(self.block, root, Some(self.cur_offset))
    }

    /// Link `root` right before the current block's last statement.
    pub(super) fn link_stmt_before_last(&mut self, root: NodeRef) -> StmtRef {
        match self.ctx.block(self.block).last_stmt {
            Some(last) => self.ctx.insert_stmt_before(last, root, Some(self.cur_offset)),
            None => self.link_stmt(root),
        }
    }

    fn spill_for_root(&mut self, root: NodeRef, check_level: usize) {
        let (value_effects, store_to) = match *self.ctx.kind(root) {
            NodeKind::StoreLcl(local) => {
                let value = self.ctx.node(root).operand(0);
                (self.ctx.effects(value), Some(local))
            }
            _ => (self.ctx.effects(root), None),
        };
        if let Some(local) = store_to {
            self.spill_local_refs(local, check_level);
            if self.ctx.local(local).address_exposed {
                self.spill_side_effects(true, check_level);
                return;
            }
        }
        let memory_store = matches!(
            self.ctx.kind(root),
            NodeKind::StoreInd { .. } | NodeKind::StoreBlk(_) | NodeKind::CopyBlk | NodeKind::InitBlk
        );
        if memory_store || value_effects.contains(SideEffects::CALL) {
            self.spill_side_effects(true, check_level);
        } else if value_effects.has_side_effects() {
            self.spill_side_effects(false, check_level);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ilimport_ir::{CallTarget, LocalDesc, LocalKind, MethodHandle, TargetInfo, TypeInfo, VarType};

    fn entry(node: NodeRef) -> StackEntry {
        StackEntry {
            node,
            info: TypeInfo::Int32,
        }
    }

    #[test]
    fn call_over_field_load_interferes() {
        let mut ctx = IrContext::new(TargetInfo::X64);
        let addr = ctx.int_con(0x1000, VarType::Long);
        let load = ctx.new_node(NodeKind::Indir { volatile: false }, VarType::Int, [addr]);
        let call = ctx.new_node(
            NodeKind::Call {
                target: CallTarget::Method(MethodHandle(0)),
                tail: false,
            },
            VarType::Void,
            [],
        );
        assert_eq!(
            check_interference(&ctx, &[entry(load)], call),
            Some(Interference::CallOverGlobalEffect { level: 0 })
        );
        let constant = ctx.int_con(1, VarType::Int);
        assert_eq!(check_interference(&ctx, &[entry(constant)], call), None);
    }

    #[test]
    fn local_store_over_its_read_interferes() {
        let mut ctx = IrContext::new(TargetInfo::X64);
        let l = ctx.new_local(LocalDesc::new(LocalKind::Il(0), VarType::Int));
        let read = ctx.lcl_var(l);
        let one = ctx.int_con(1, VarType::Int);
        let store = ctx.store_lcl(l, one);
        assert_eq!(
            check_interference(&ctx, &[entry(one), entry(read)], store),
            Some(Interference::LocalStoreOverRead { level: 1, local: l })
        );
    }

    #[test]
    fn memory_store_over_exposed_read_interferes() {
        let mut ctx = IrContext::new(TargetInfo::X64);
        let mut desc = LocalDesc::new(LocalKind::Il(0), VarType::Int);
        desc.address_exposed = true;
        let l = ctx.new_local(desc);
        let read = ctx.lcl_var(l);
        let addr = ctx.lcl_addr(l);
        let value = ctx.int_con(3, VarType::Int);
        let store = ctx.new_node(
            NodeKind::StoreInd {
                ty: VarType::Int,
                volatile: false,
            },
            VarType::Void,
            [addr, value],
        );
        let found = check_interference(&ctx, &[entry(read)], store);
        assert_eq!(found, Some(Interference::MemoryStoreOverGlobalRef { level: 0 }));
        insta::assert_snapshot!(found.unwrap(), @"memory store appended over stack level 0 with global references");
    }
}
