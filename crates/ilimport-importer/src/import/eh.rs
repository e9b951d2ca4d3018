//! Exception handling: handler entry states, `leave` chains and the
//! handler-exit instructions.

use std::ops::Range;

use ilimport_bytecode::Opcode;
use ilimport_ir::{
    BlockData, BlockFlags, BlockRef, ClassHandle, EhRef, HandlerKind, JumpKind, NodeKind, StackEntry,
    TypeInfo, VarType,
};

use super::Importer;
use crate::error::{BadCode, ImportResult};
use crate::resolver::WellKnownClass;

/// One region boundary crossed by a `leave`, innermost first.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LeaveStep {
    /// Leaving the try of a finally region runs the finally.
    CallFinally(EhRef),
    /// Leaving a catch handler ends the catch.
    CatchRet(EhRef),
}

fn contains(outer: &Range<u32>, inner: &Range<u32>) -> bool {
    outer.start <= inner.start && inner.end <= outer.end
}

impl Importer<'_> {
    // ========================================================================
    // Handler entry
    // ========================================================================

    /// Queue the handlers protecting `block` with their entry stacks.
    pub(super) fn enqueue_handlers(&mut self, block: BlockRef) -> ImportResult<()> {
        let start = self.ctx.block(block).il_range.start;
        for r in self.flow.regions.clone() {
            let region = self.ctx.region(r);
            if !region.in_try(start) {
                continue;
            }
            let (kind, handler_entry, filter_entry) = (region.kind, region.handler_entry, region.filter_entry);
            if let Some(filter) = filter_entry {
                let object = self.well_known(WellKnownClass::Object)?;
                self.enqueue_catch_entry(r, filter, object)?;
            }
            match kind {
                HandlerKind::Catch(token) => {
                    let class = self.resolve_class(token)?;
                    self.enqueue_catch_entry(r, handler_entry, class)?;
                }
                HandlerKind::Filter => {
                    let object = self.well_known(WellKnownClass::Object)?;
                    self.enqueue_catch_entry(r, handler_entry, object)?;
                }
                HandlerKind::Finally | HandlerKind::Fault => self.enqueue(handler_entry, Vec::new()),
            }
        }
        Ok(())
    }

    /// Queue a handler entered with the caught exception on the stack.
    ///
    /// A handler entry that is also reached by branches gets an internal
    /// block in front of it that stores the exception to a temp, so the
    /// exception is fetched once and every way in reads the temp.
    fn enqueue_catch_entry(&mut self, r: EhRef, entry: BlockRef, class: ClassHandle) -> ImportResult<()> {
        if self.ctx.block(entry).entry_state.is_some() {
            return Ok(());
        }
        let info = TypeInfo::Ref(Some(class));
        let catch_arg = self.node(NodeKind::CatchArg, VarType::Ref, []);
        self.ctx.set_class(catch_arg, Some(class));

        if self.ctx.block(entry).preds.is_empty() {
            self.enqueue(entry, vec![StackEntry { node: catch_arg, info }]);
            return Ok(());
        }

        let temp = self.ctx.grab_temp("catch arg", VarType::Ref);
        self.ctx.local_mut(temp).class = Some(class);
        self.local_infos[temp] = Some(info);

        let template = self.ctx.block(entry).clone();
        let is_filter = template.flags.contains(BlockFlags::FILTER_ENTRY);
        let spill = self
            .ctx
            .insert_block_before(entry, BlockData::internal(&template, JumpKind::FallOff));
        self.ctx.set_jump(spill, JumpKind::Next(entry));
        let store = self.ctx.store_lcl(temp, catch_arg);
        self.ctx.local_mut(temp).record_def();
        self.ctx.append_stmt(spill, store, Some(template.il_range.start));

        let entry_flag = if is_filter {
            BlockFlags::FILTER_ENTRY
        } else {
            BlockFlags::HANDLER_ENTRY
        };
        let data = self.ctx.block_mut(spill);
        data.flags |= BlockFlags::CATCH_ARG_SPILL | entry_flag;
        data.entry_state = Some(Vec::new());
        data.exit_depth = Some(1);
        data.stack_temps_out = Some(temp);

        let data = self.ctx.block_mut(entry);
        data.flags.remove(entry_flag);
        data.stack_temps_in = Some(temp);

        let region = self.ctx.region_mut(r);
        if is_filter {
            region.filter_entry = Some(spill);
        } else {
            region.handler_entry = spill;
        }
        region.catch_arg_temp = Some(temp);
        tracing::debug!(region = %r, handler = %entry, spill = %spill, temp = %temp, "spilled catch argument");

        let read = self.ctx.lcl_var(temp);
        self.enqueue(entry, vec![StackEntry { node: read, info }]);
        Ok(())
    }

    // ========================================================================
    // leave
    // ========================================================================

    pub(super) fn import_leave(&mut self, target_offset: u32) -> ImportResult<()> {
        let target = self.flow.block_at(target_offset).ok_or(BadCode::BadBranchTarget(target_offset))?;
        let block = self.block;
        let data = self.ctx.block(block);
        let in_finally = data
            .handler_index
            .is_some_and(|r| self.ctx.region(r).is_finally_like());
        if data.in_filter || in_finally {
            return Err(BadCode::LeaveFromHandler.into());
        }
        if let Some(depth) = self.ctx.block(target).entry_depth()
            && depth != 0
        {
            return Err(BadCode::JoinDepthMismatch {
                expected: depth,
                found: 0,
            }
            .into());
        }
        self.discard_stack();

        let steps = self.leave_steps(self.cur_offset, target_offset);
        let Some(&first) = steps.first() else {
            self.ctx.set_jump(block, JumpKind::Always(target));
            self.enqueue(target, Vec::new());
            return Ok(());
        };
        let first_region = match first {
            LeaveStep::CallFinally(r) | LeaveStep::CatchRet(r) => r,
        };
        if let Some(jump) = self.leave_chains.get(&(first_region, target)).cloned() {
            tracing::trace!(block = %block, "reusing leave chain");
            self.ctx.set_jump(block, jump);
            return Ok(());
        }

        let mut from = block;
        let mut ending_catch = false;
        for step in steps {
            match step {
                LeaveStep::CatchRet(_) => ending_catch = true,
                LeaveStep::CallFinally(r) => {
                    let region = self.ctx.region(r);
                    let finally = region.handler_entry;
                    let exited = region.try_range.clone();
                    let template = self.placement_outside(&exited);
                    let call = self.new_chain_block(from, &template);
                    let cont = self.new_chain_block(call, &template);
                    let jump = if ending_catch {
                        JumpKind::CatchRet(call)
                    } else {
                        JumpKind::Always(call)
                    };
                    ending_catch = false;
                    self.ctx.set_jump(from, jump);
                    self.ctx.set_jump(
                        call,
                        JumpKind::CallFinally {
                            finally,
                            continuation: cont,
                        },
                    );
                    tracing::debug!(region = %r, call = %call, continuation = %cont, "leave through finally");
                    from = cont;
                }
            }
        }
        let jump = if ending_catch {
            JumpKind::CatchRet(target)
        } else {
            JumpKind::Always(target)
        };
        self.ctx.set_jump(from, jump);

        let jump = self.ctx.block(block).jump.clone();
        self.leave_chains.insert((first_region, target), jump);
        self.enqueue(target, Vec::new());
        Ok(())
    }

    /// Region boundaries crossed going from `from` to `to`.
    fn leave_steps(&self, from: u32, to: u32) -> Vec<LeaveStep> {
        let mut steps: Vec<(u32, LeaveStep)> = Vec::new();
        for &r in &self.flow.regions {
            let region = self.ctx.region(r);
            if region.in_try(from) && !region.in_try(to) && region.kind == HandlerKind::Finally {
                let range = &region.try_range;
                steps.push((range.end - range.start, LeaveStep::CallFinally(r)));
            }
            if region.in_handler(from) && !region.in_handler(to) && region.has_catch_arg() {
                let range = &region.handler_range;
                steps.push((range.end - range.start, LeaveStep::CatchRet(r)));
            }
        }
        steps.sort_by_key(|&(len, _)| len);
        steps.into_iter().map(|(_, step)| step).collect()
    }

    /// EH placement of code just outside `exited`: the innermost try and
    /// handler strictly enclosing it.
    fn placement_outside(&self, exited: &Range<u32>) -> BlockData {
        let mut data = BlockData::new(exited.start..exited.start, JumpKind::FallOff);
        data.try_index = self.flow.regions.iter().copied().find(|&r| {
            let range = &self.ctx.region(r).try_range;
            contains(range, exited) && range != exited
        });
        data.handler_index = self.flow.regions.iter().copied().find(|&r| {
            let region = self.ctx.region(r);
            contains(&region.handler_range, exited)
                || region.filter_range.as_ref().is_some_and(|f| contains(f, exited))
        });
        data
    }

    fn new_chain_block(&mut self, after: BlockRef, placement: &BlockData) -> BlockRef {
        let mut data = BlockData::internal(placement, JumpKind::FallOff);
        data.entry_state = Some(Vec::new());
        data.exit_depth = Some(0);
        self.ctx.insert_block_after(after, data)
    }

    // ========================================================================
    // Handler exits
    // ========================================================================

    pub(super) fn import_endfinally(&mut self) -> ImportResult<()> {
        let data = self.ctx.block(self.block);
        let in_finally = !data.in_filter
            && data
                .handler_index
                .is_some_and(|r| self.ctx.region(r).is_finally_like());
        if !in_finally {
            return Err(BadCode::EndFinallyOutsideHandler.into());
        }
        if !self.stack.is_empty() {
            return Err(BadCode::EndFinallyStackNotEmpty.into());
        }
        Ok(())
    }

    pub(super) fn import_endfilter(&mut self) -> ImportResult<()> {
        if !self.ctx.block(self.block).in_filter {
            return Err(BadCode::EndFilterOutsideFilter.into());
        }
        let depth = self.stack.depth();
        if depth != 1 {
            return Err(BadCode::EndFilterStackDepth(depth).into());
        }
        let value = self.pop()?;
        if value.info != TypeInfo::Int32 {
            return Err(BadCode::type_mismatch(Opcode::Endfilter, value.info).into());
        }
        let ret = self.node(NodeKind::ReturnFilter, VarType::Void, [value.node]);
        self.append_stmt(ret, 0);
        Ok(())
    }
}
