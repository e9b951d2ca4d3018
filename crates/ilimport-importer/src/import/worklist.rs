//! The pending-block queue and block completion.

use ilimport_ir::{BlockFlags, BlockRef, JumpKind, StackEntry};

use super::Importer;
use crate::error::{BadCode, ImportResult};

/// A block waiting to be imported, with the stack it is entered with.
pub(super) struct PendingEntry {
    block: BlockRef,
    state: Vec<StackEntry>,
}

impl Importer<'_> {
    /// Queue `block` for import with entry stack `state`. The first state a
    /// block is queued with becomes its recorded entry state.
    pub(super) fn enqueue(&mut self, block: BlockRef, state: Vec<StackEntry>) {
        let data = self.ctx.block_mut(block);
        if data.entry_state.is_none() {
            data.entry_state = Some(state.clone());
        }
        if data.is_imported() || data.flags.contains(BlockFlags::PENDING) {
            return;
        }
        data.flags |= BlockFlags::PENDING;
        tracing::trace!(block = %block, depth = state.len(), "queued block");
        self.pending.push_back(PendingEntry { block, state });
    }

    /// Queue an already imported block to be imported again.
    pub(super) fn mark_for_reimport(&mut self, block: BlockRef) {
        let data = self.ctx.block_mut(block);
        data.flags.remove(BlockFlags::IMPORTED);
        let state = data.entry_state.clone().unwrap_or_default();
        tracing::debug!(block = %block, "scheduling reimport");
        self.enqueue(block, state);
    }

    pub(super) fn drain_worklist(&mut self) -> ImportResult<()> {
        while let Some(PendingEntry { block, state }) = self.pending.pop_front() {
            let data = self.ctx.block_mut(block);
            data.flags.remove(BlockFlags::PENDING);
            if data.is_imported() {
                continue;
            }
            self.import_block(block, state)?;
        }
        Ok(())
    }

    /// Check the exit stack against the successors, assign the spill
    /// clique and queue the successors.
    pub(super) fn finish_block(&mut self, block: BlockRef) -> ImportResult<()> {
        let jump = self.ctx.block(block).jump.clone();
        if jump == JumpKind::FallOff {
            return Err(BadCode::FallOffEnd.into());
        }
        let succs = jump.stack_successors();
        let depth = self.stack.depth();
        for &succ in &succs {
            let data = self.ctx.block(succ);
            if let Some(expected) = data.entry_depth()
                && expected != depth
            {
                return Err(BadCode::JoinDepthMismatch {
                    expected,
                    found: depth,
                }
                .into());
            }
            if depth > 0 && data.flags.contains(BlockFlags::TRY_BEGIN) {
                return Err(BadCode::NonEmptyStackAtTry.into());
            }
        }

        let reimport_self = if depth > 0 {
            self.spill_clique(block, &succs)?
        } else {
            false
        };

        let data = self.ctx.block_mut(block);
        data.exit_depth = Some(depth);
        data.flags |= BlockFlags::IMPORTED;
        tracing::debug!(block = %block, exit_depth = depth, jump = jump.name(), "imported block");

        let state = self.stack.snapshot();
        for succ in succs {
            self.enqueue(succ, state.clone());
        }
        self.stack.clear();
        if reimport_self {
            self.mark_for_reimport(block);
        }
        Ok(())
    }
}
