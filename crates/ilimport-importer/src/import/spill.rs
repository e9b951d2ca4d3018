//! Spilling evaluation stack entries into temps.

use ilimport_ir::{LocalRef, NodeKind, SideEffects, StackEntry, VarType};

use super::Importer;

impl Importer<'_> {
    /// Evaluate the entry at `level` into a temp (`temp`, or a fresh one)
    /// and replace it with a read of that temp.
    ///
    /// An entry that already is a plain read of a non-exposed local is left
    /// alone unless it reads some other local than `temp`.
    pub(super) fn spill_entry(&mut self, level: usize, temp: Option<LocalRef>, reason: &'static str) {
        let entry = self.stack.get(level);
        if let NodeKind::LclVar(l) = *self.ctx.kind(entry.node)
            && !self.ctx.local(l).address_exposed
            && temp.is_none_or(|t| t == l)
        {
            return;
        }
        self.force_spill(level, temp, reason);
    }

    /// Like [`Self::spill_entry`], but always copies.
    pub(super) fn force_spill(&mut self, level: usize, temp: Option<LocalRef>, reason: &'static str) {
        let entry = self.stack.get(level);
        let temp = temp.unwrap_or_else(|| self.ctx.grab_temp(reason, VarType::Undef));
        self.type_temp(temp, entry);
        let store = self.ctx.store_lcl(temp, entry.node);
        self.ctx.local_mut(temp).record_def();
        self.link_stmt(store);
        let read = self.ctx.lcl_var(temp);
        self.stack.set(
            level,
            StackEntry {
                node: read,
                info: entry.info,
            },
        );
        tracing::trace!(level, temp = %temp, reason, "spilled stack entry");
    }

    /// Give an untyped temp the type of the value about to be stored in it.
    pub(super) fn type_temp(&mut self, temp: LocalRef, entry: StackEntry) {
        if self.ctx.local(temp).ty == VarType::Undef {
            let ty = entry.info.var_type(&self.config.target);
            let class = entry.info.class().or(self.ctx.node(entry.node).class);
            let desc = self.ctx.local_mut(temp);
            desc.ty = ty;
            desc.class = class;
            self.local_infos[temp] = Some(entry.info);
        }
    }

    /// Spill every entry below `limit` that reads or addresses `local`.
    pub(super) fn spill_local_refs(&mut self, local: LocalRef, limit: usize) {
        for level in 0..limit.min(self.stack.depth()) {
            if self.ctx.references_local(self.stack.get(level).node, local) {
                self.force_spill(level, None, "local ref spill");
            }
        }
    }

    /// Spill the entries below `limit` with side effects. With
    /// `include_global`, entries touching global state (memory reads and
    /// exposed locals) are spilled too.
    pub(super) fn spill_side_effects(&mut self, include_global: bool, limit: usize) {
        for level in 0..limit.min(self.stack.depth()) {
            let node = self.stack.get(level).node;
            let effects = self.ctx.effects(node);
            let spill = if include_global {
                effects.has_global_effects() || self.ctx.references_exposed_local(node)
            } else {
                effects.has_side_effects()
            };
            if spill {
                self.spill_entry(level, None, "side effect spill");
            }
        }
    }

    /// Spill entries that must be evaluated exactly where they are, such as
    /// the catch argument.
    pub(super) fn spill_special_side_effects(&mut self) {
        for level in 0..self.stack.depth() {
            if self
                .ctx
                .effects(self.stack.get(level).node)
                .contains(SideEffects::ORDER_SIDEEFF)
            {
                self.force_spill(level, None, "special side effect spill");
            }
        }
    }

    /// Evaluate what is left on the stack for its effects and clear it.
    pub(super) fn discard_stack(&mut self) {
        for entry in self.stack.snapshot() {
            if self.ctx.effects(entry.node).has_side_effects() {
                self.link_stmt(entry.node);
            }
        }
        self.stack.clear();
    }
}

#[cfg(test)]
mod tests {
    use ilimport_ir::{IrContext, TargetInfo, TypeInfo};

    use super::*;
    use crate::config::ImportConfig;
    use crate::import::testing::single_method;
    use crate::resolver::SigType;

    #[test]
    fn bare_local_reads_are_not_copied() {
        let (table, method) = single_method(vec![SigType::I4]);
        let config = ImportConfig::default();
        let mut ctx = IrContext::new(TargetInfo::X64);
        let mut importer = Importer::new(&table, &config, &mut ctx, method).expect("session");
        let arg = importer.args[0];
        let read = importer.ctx.lcl_var(arg);
        importer.stack.push(read, TypeInfo::Int32).unwrap();
        let constant = importer.ctx.int_con(7, VarType::Int);
        importer.stack.push(constant, TypeInfo::Int32).unwrap();
        let locals = importer.ctx.num_locals();

        importer.spill_entry(0, None, "test");
        importer.spill_entry(0, Some(arg), "test");
        assert_eq!(importer.stack.get(0).node, read);
        assert_eq!(importer.ctx.num_locals(), locals);
        assert!(importer.ctx.block_roots(importer.block).is_empty());

        // The constant is copied once; its temp read is then left alone.
        importer.spill_entry(1, None, "test");
        let copied = importer.stack.get(1).node;
        importer.spill_entry(1, None, "test");
        assert_eq!(importer.stack.get(1).node, copied);
        assert_eq!(importer.ctx.num_locals(), locals + 1);
        assert_eq!(importer.ctx.block_roots(importer.block).len(), 1);

        // A read of an exposed local may change under a store through an
        // alias, so it is copied.
        importer.ctx.local_mut(arg).address_exposed = true;
        importer.spill_entry(0, None, "test");
        assert_ne!(importer.stack.get(0).node, read);
        assert_eq!(importer.ctx.num_locals(), locals + 2);
    }
}
