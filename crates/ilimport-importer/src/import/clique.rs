//! Spill cliques: the stack temps shared by the blocks joined at a
//! non-empty stack.
//!
//! Every block that exits into a join with live stack values writes them to
//! the same run of temps, and every block entered from such a join reads
//! them back. When a block exits with a type that widens a temp, the blocks
//! already imported against the narrower type are imported again.

use cranelift_entity::EntityRef;
use ilimport_ir::{
    BlockFlags, BlockRef, JumpKind, LocalRef, NodeKind, StackEntry, TargetInfo, TypeInfo, VarType,
};

use super::Importer;
use crate::error::{BadCode, ImportResult};

/// Least upper bound of two stack types meeting at a join.
pub(super) fn merge_info(old: TypeInfo, new: TypeInfo, target: &TargetInfo) -> Option<TypeInfo> {
    use TypeInfo::*;
    if old == new {
        return Some(old);
    }
    Some(match (old, new) {
        (Int32, NativeInt) | (NativeInt, Int32) => NativeInt,
        (Int64, NativeInt) | (NativeInt, Int64) if target.is_64bit() => NativeInt,
        (Int32 | NativeInt, Byref) | (Byref, Int32 | NativeInt) => Byref,
        (Float, Double) | (Double, Float) => Double,
        (Method(_), Method(_) | NativeInt) | (NativeInt, Method(_)) => NativeInt,
        (Ref(a), Ref(b)) => Ref(if a == b { a } else { None }),
        (Null, Ref(c)) | (Ref(c), Null) => Ref(c),
        _ => return None,
    })
}

fn in_clique(local: LocalRef, base: LocalRef, depth: usize) -> bool {
    local
        .index()
        .checked_sub(base.index())
        .is_some_and(|k| k < depth)
}

impl Importer<'_> {
    /// Entry stack of a block that reads clique temps from `base`.
    pub(super) fn clique_entry_state(&mut self, base: LocalRef, depth: usize) -> Vec<StackEntry> {
        (0..depth)
            .map(|level| {
                let temp = base.offset(level);
                let node = self.ctx.lcl_var(temp);
                let info = self.local_info(temp);
                StackEntry { node, info }
            })
            .collect()
    }

    /// Store the live stack of `block` into its clique temps and replace
    /// the entries with reads of them. Returns whether `block` itself has
    /// to be imported again because its entry temps were retyped.
    pub(super) fn spill_clique(&mut self, block: BlockRef, succs: &[BlockRef]) -> ImportResult<bool> {
        let target = self.config.target;
        let depth = self.stack.depth();
        let base = self.clique_base(block, succs, depth);

        // All levels are merged before anything is rewritten, so a type
        // conflict leaves the IR untouched.
        let mut merged = Vec::with_capacity(depth);
        let mut retyped = false;
        let mut refined = false;
        for level in 0..depth {
            let temp = base.offset(level);
            let incoming = self.stack.get(level).info;
            let info = match self.local_infos[temp] {
                Some(old) => {
                    let info = merge_info(old, incoming, &target).ok_or(BadCode::JoinTypeMismatch {
                        first: old,
                        second: incoming,
                    })?;
                    refined |= info != old;
                    info
                }
                None => incoming,
            };
            let old_ty = self.ctx.local(temp).ty;
            let new_ty = info.var_type(&target);
            if old_ty != VarType::Undef && old_ty != new_ty {
                retyped = true;
            }
            merged.push(info);
        }

        let branches = matches!(
            self.ctx.block(block).jump,
            JumpKind::Cond { .. } | JumpKind::Switch { .. }
        );
        let has_terminator = branches
            && self
                .ctx
                .last_root(block)
                .is_some_and(|root| matches!(self.ctx.kind(root), NodeKind::JTrue | NodeKind::Switch));
        if has_terminator && let Some(root) = self.ctx.last_root(block) {
            let condition = self.ctx.node(root).operand(0);
            let reads_clique = self
                .ctx
                .contains(condition, &|k| matches!(k, NodeKind::LclVar(l) if in_clique(*l, base, depth)));
            if reads_clique {
                let ty = self.ctx.ty(condition);
                let temp = self.ctx.grab_temp("branch condition", ty);
                let store = self.ctx.store_lcl(temp, condition);
                self.ctx.local_mut(temp).record_def();
                self.link_stmt_before_last(store);
                let read = self.ctx.lcl_var(temp);
                self.ctx.set_operand(root, 0, read);
            }
        }
        let terminator = if has_terminator {
            self.ctx.extract_last(block)
        } else {
            None
        };

        // An entry reading a clique temp other than its own would see the
        // temp already overwritten.
        for level in 0..depth {
            let node = self.stack.get(level).node;
            let own = base.offset(level);
            let is_own = matches!(self.ctx.kind(node), NodeKind::LclVar(l) if *l == own);
            let reads_other = self
                .ctx
                .contains(node, &|k| matches!(k, NodeKind::LclVar(l) | NodeKind::LclAddr(l) if in_clique(*l, base, depth)));
            if !is_own && reads_other {
                self.force_spill(level, None, "clique pre-copy");
            }
        }

        for (level, &info) in merged.iter().enumerate() {
            let temp = base.offset(level);
            let desc = self.ctx.local_mut(temp);
            desc.ty = info.var_type(&target);
            desc.class = info.class();
            self.local_infos[temp] = Some(info);
        }

        for (level, &info) in merged.iter().enumerate() {
            let temp = base.offset(level);
            let entry = self.stack.get(level);
            if !matches!(self.ctx.kind(entry.node), NodeKind::LclVar(l) if *l == temp) {
                let ty = self.ctx.local(temp).ty;
                let value = self.widen_operand(entry, ty, false);
                let store = self.ctx.store_lcl(temp, value);
                self.ctx.local_mut(temp).record_def();
                self.link_stmt(store);
            }
            let read = self.ctx.lcl_var(temp);
            self.stack.set(level, StackEntry { node: read, info });
        }

        if let Some((root, il)) = terminator {
            self.ctx.append_stmt(block, root, il);
        }
        self.ctx.block_mut(block).stack_temps_out = Some(base);

        if !(retyped || refined) {
            return Ok(false);
        }
        tracing::debug!(block = %block, base = %base, retyped, "spill clique types widened");
        let mut reimport_self = false;
        for member in self.ctx.layout().to_vec() {
            let data = self.ctx.block(member);
            let consumer = data.stack_temps_in == Some(base);
            let producer = data.stack_temps_out == Some(base);
            if !(consumer || producer) {
                continue;
            }
            if member == block {
                reimport_self |= consumer;
                continue;
            }
            if data.flags.contains(BlockFlags::INTERNAL) || !data.is_imported() {
                continue;
            }
            if consumer || (retyped && producer) {
                self.mark_for_reimport(member);
            }
        }
        Ok(reimport_self)
    }

    /// Find or allocate the temps of the clique `block` exits into, and
    /// mark every block joined through it.
    fn clique_base(&mut self, block: BlockRef, succs: &[BlockRef], depth: usize) -> LocalRef {
        let existing = self.ctx.block(block).stack_temps_out.or_else(|| {
            succs
                .iter()
                .find_map(|&succ| self.ctx.block(succ).stack_temps_in)
        });
        let base = match existing {
            Some(base) => base,
            None => {
                let base = self.ctx.grab_temps("spill clique", depth);
                tracing::debug!(block = %block, base = %base, depth, "new spill clique");
                base
            }
        };

        let mut producers = vec![block];
        let mut consumers = Vec::new();
        while !producers.is_empty() || !consumers.is_empty() {
            while let Some(p) = producers.pop() {
                self.ctx.block_mut(p).stack_temps_out.get_or_insert(base);
                for succ in self.ctx.block(p).jump.stack_successors() {
                    let data = self.ctx.block_mut(succ);
                    if data.stack_temps_in.is_none() {
                        data.stack_temps_in = Some(base);
                        consumers.push(succ);
                    }
                }
            }
            while let Some(s) = consumers.pop() {
                for p in self.ctx.block(s).preds.clone() {
                    let data = self.ctx.block(p);
                    if data.stack_temps_out.is_none() && data.jump.stack_successors().contains(&s) {
                        self.ctx.block_mut(p).stack_temps_out = Some(base);
                        producers.push(p);
                    }
                }
            }
        }
        base
    }
}
