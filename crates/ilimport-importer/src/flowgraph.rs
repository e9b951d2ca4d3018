//! Basic-block boundary finder.
//!
//! Builds the skeleton the importer fills in: one block per maximal
//! straight-line instruction run, jump kinds derived from each block's last
//! instruction, predecessor lists, and the exception region table built
//! from the clause list (innermost region first).

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;

use ilimport_bytecode::{
    DecodeError, Decoder, EhClause, EhClauseKind, FlowKind, Instruction, MethodBody, Opcode,
};
use ilimport_ir::{BlockData, BlockFlags, BlockRef, EhRef, EhRegion, HandlerKind, IrContext, JumpKind};

use crate::error::{BadCode, ImportResult};

/// Facts gathered by a linear pass over the whole body, before any block
/// is imported.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IlScan {
    /// Arguments written by `starg`.
    pub stored_args: BTreeSet<u16>,
    /// Arguments whose address is taken by `ldarga`.
    pub addressed_args: BTreeSet<u16>,
    /// IL locals whose address is taken by `ldloca`.
    pub addressed_locals: BTreeSet<u16>,
    pub has_arglist: bool,
    pub has_localloc: bool,
    pub has_leave: bool,
    pub has_jmp: bool,
    pub has_tail_prefix: bool,
}

impl IlScan {
    fn record(&mut self, insn: &Instruction) {
        use Opcode::*;
        let index = insn.var_index();
        match insn.opcode {
            Starg | StargS => self.stored_args.extend(index),
            Ldarga | LdargaS => self.addressed_args.extend(index),
            Ldloca | LdlocaS => self.addressed_locals.extend(index),
            Arglist => self.has_arglist = true,
            Localloc => self.has_localloc = true,
            Leave | LeaveS => self.has_leave = true,
            Jmp => self.has_jmp = true,
            Tail => self.has_tail_prefix = true,
            _ => {}
        }
    }

    /// Whether the callee may re-alias argument `index`.
    pub fn arg_is_aliased(&self, index: u16) -> bool {
        self.stored_args.contains(&index) || self.addressed_args.contains(&index)
    }
}

/// The block skeleton of one method body.
#[derive(Clone, Debug)]
pub struct FlowGraph {
    pub entry: BlockRef,
    blocks: BTreeMap<u32, BlockRef>,
    /// Exception regions, innermost first.
    pub regions: Vec<EhRef>,
    pub scan: IlScan,
}

impl FlowGraph {
    /// Find block boundaries in `body` and create the blocks in `ctx`.
    ///
    /// Detached blocks are used for inlinee bodies, which must not appear in
    /// the caller's layout.
    pub fn build(ctx: &mut IrContext, body: &MethodBody, detached: bool) -> ImportResult<FlowGraph> {
        FlowGraphBuilder::new(body).build(ctx, detached)
    }

    /// The block starting at `offset`.
    pub fn block_at(&self, offset: u32) -> Option<BlockRef> {
        self.blocks.get(&offset).copied()
    }

    /// Blocks in IL order.
    pub fn blocks(&self) -> impl Iterator<Item = BlockRef> + '_ {
        self.blocks.values().copied()
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }
}

struct FlowGraphBuilder<'a> {
    body: &'a MethodBody,
    insns: Vec<Instruction>,
    /// Where linear decoding stopped, if it did.
    decode_error: Option<DecodeError>,
    scan: IlScan,
}

impl<'a> FlowGraphBuilder<'a> {
    fn new(body: &'a MethodBody) -> Self {
        let mut insns = Vec::new();
        let mut decode_error = None;
        let mut scan = IlScan::default();
        let mut decoder = Decoder::new(&body.code);
        while let Some(result) = decoder.decode_next() {
            match result {
                Ok(insn) => {
                    scan.record(&insn);
                    insns.push(insn);
                }
                Err(err) => {
                    decode_error = Some(err);
                    break;
                }
            }
        }
        Self {
            body,
            insns,
            decode_error,
            scan,
        }
    }

    fn code_end(&self) -> u32 {
        self.body.code_size()
    }

    fn build(self, ctx: &mut IrContext, detached: bool) -> ImportResult<FlowGraph> {
        let starts = self.block_starts()?;
        let end = self.code_end();

        let mut blocks = BTreeMap::new();
        let bounds: Vec<u32> = starts.iter().copied().chain([end]).collect();
        for pair in bounds.windows(2) {
            let data = BlockData::new(pair[0]..pair[1], JumpKind::FallOff);
            let b = if detached {
                ctx.new_detached_block(data)
            } else {
                ctx.new_block(data)
            };
            blocks.insert(pair[0], b);
        }
        if blocks.is_empty() {
            // An empty body still gets one block, which falls off the end.
            let data = BlockData::new(0..0, JumpKind::FallOff);
            let b = if detached {
                ctx.new_detached_block(data)
            } else {
                ctx.new_block(data)
            };
            blocks.insert(0, b);
        }

        for (&start, &b) in &blocks {
            let range = ctx.block(b).il_range.clone();
            let jump = self.jump_for(start, range, &blocks);
            ctx.set_jump(b, jump);
        }

        let regions = self.build_regions(ctx, &blocks)?;
        let entry = blocks[&0];
        Ok(FlowGraph {
            entry,
            blocks,
            regions,
            scan: self.scan,
        })
    }

    fn block_starts(&self) -> ImportResult<BTreeSet<u32>> {
        let end = self.code_end();
        let boundaries: BTreeSet<u32> = self.insns.iter().map(|i| i.offset).collect();
        let mut starts = BTreeSet::new();
        if end > 0 {
            starts.insert(0);
        }
        for insn in &self.insns {
            for target in insn.targets() {
                if !boundaries.contains(&target) {
                    return Err(BadCode::BadBranchTarget(target).into());
                }
                starts.insert(target);
            }
            if insn.opcode.ends_block() && insn.next_offset() < end {
                starts.insert(insn.next_offset());
            }
        }
        if let Some(err) = &self.decode_error {
            starts.insert(err.offset());
        }
        for clause in &self.body.eh_clauses {
            let mut edges = vec![
                clause.try_offset,
                clause.try_end(),
                clause.handler_offset,
                clause.handler_end(),
            ];
            edges.extend(clause.filter_offset());
            for offset in edges {
                if offset == end {
                    continue;
                }
                if offset > end || !boundaries.contains(&offset) {
                    return Err(BadCode::BadEhNesting("clause boundary is not an instruction").into());
                }
                starts.insert(offset);
            }
        }
        Ok(starts)
    }

    /// Jump kind of the block covering `range`, from its last instruction.
    fn jump_for(&self, start: u32, range: Range<u32>, blocks: &BTreeMap<u32, BlockRef>) -> JumpKind {
        let end = self.code_end();
        let fallthrough = |offset: u32| blocks.get(&offset).copied();
        if self
            .decode_error
            .as_ref()
            .is_some_and(|e| e.offset() == start)
        {
            return JumpKind::FallOff;
        }
        let Some(last) = self
            .insns
            .iter()
            .rev()
            .find(|i| i.offset >= range.start && i.offset < range.end)
        else {
            return JumpKind::FallOff;
        };
        let at = |offset: u32| blocks[&offset];
        match last.opcode {
            Opcode::Ret | Opcode::Jmp => JumpKind::Return,
            Opcode::Throw | Opcode::Rethrow => JumpKind::Throw,
            Opcode::Endfinally => JumpKind::EndFinally,
            Opcode::Endfilter => JumpKind::EndFilter,
            Opcode::Leave | Opcode::LeaveS => last.target().map_or(JumpKind::FallOff, |t| JumpKind::Leave(at(t))),
            Opcode::Br | Opcode::BrS => last.target().map_or(JumpKind::FallOff, |t| JumpKind::Always(at(t))),
            Opcode::Switch => match fallthrough(last.next_offset()) {
                Some(default) => JumpKind::Switch {
                    targets: last.targets().into_iter().map(at).collect(),
                    default,
                },
                None => JumpKind::FallOff,
            },
            op if op.flow() == FlowKind::CondBranch => {
                match (last.target(), fallthrough(last.next_offset())) {
                    (Some(t), Some(next)) => JumpKind::Cond { taken: at(t), next },
                    _ => JumpKind::FallOff,
                }
            }
            _ if range.end >= end => JumpKind::FallOff,
            _ => JumpKind::Next(at(range.end)),
        }
    }

    fn build_regions(
        &self,
        ctx: &mut IrContext,
        blocks: &BTreeMap<u32, BlockRef>,
    ) -> ImportResult<Vec<EhRef>> {
        let end = self.code_end();
        let mut clauses: Vec<&EhClause> = self.body.eh_clauses.iter().collect();
        for clause in &clauses {
            if clause.try_length == 0 || clause.handler_length == 0 {
                return Err(BadCode::BadEhNesting("empty try or handler").into());
            }
            if clause.try_end() > end || clause.handler_end() > end {
                return Err(BadCode::BadEhNesting("clause extends past the method body").into());
            }
            let handler = handler_extent(clause);
            if overlaps(&handler, &(clause.try_offset..clause.try_end())) {
                return Err(BadCode::BadEhNesting("handler overlaps its own try").into());
            }
            if let Some(filter) = clause.filter_offset()
                && filter >= clause.handler_offset
            {
                return Err(BadCode::BadEhNesting("filter does not precede its handler").into());
            }
        }
        for (i, a) in clauses.iter().enumerate() {
            for b in &clauses[i + 1..] {
                let (ta, tb) = (a.try_offset..a.try_end(), b.try_offset..b.try_end());
                if overlaps(&ta, &tb) && !nested(&ta, &tb) && !nested(&tb, &ta) {
                    return Err(BadCode::BadEhNesting("try regions overlap").into());
                }
            }
        }
        clauses.sort_by_key(|c| c.try_length);

        let mut regions = Vec::with_capacity(clauses.len());
        for clause in &clauses {
            let kind = match clause.kind {
                EhClauseKind::Catch(token) => HandlerKind::Catch(token),
                EhClauseKind::Filter { .. } => HandlerKind::Filter,
                EhClauseKind::Finally => HandlerKind::Finally,
                EhClauseKind::Fault => HandlerKind::Fault,
            };
            let try_entry = blocks[&clause.try_offset];
            let handler_entry = blocks[&clause.handler_offset];
            let filter_entry = clause.filter_offset().map(|f| blocks[&f]);
            ctx.block_mut(try_entry).flags |= BlockFlags::TRY_BEGIN;
            ctx.block_mut(handler_entry).flags |= BlockFlags::HANDLER_ENTRY;
            if let Some(f) = filter_entry {
                ctx.block_mut(f).flags |= BlockFlags::FILTER_ENTRY;
            }
            regions.push(ctx.new_region(EhRegion {
                kind,
                try_range: clause.try_offset..clause.try_end(),
                handler_range: clause.handler_offset..clause.handler_end(),
                filter_range: clause.filter_offset().map(|f| f..clause.handler_offset),
                try_entry,
                handler_entry,
                filter_entry,
                enclosing_try: None,
                catch_arg_temp: None,
            }));
        }

        for (i, &r) in regions.iter().enumerate() {
            let inner = ctx.region(r).try_range.clone();
            let enclosing = regions[i + 1..].iter().copied().find(|&o| {
                let outer = &ctx.region(o).try_range;
                nested(&inner, outer) && inner != *outer
            });
            ctx.region_mut(r).enclosing_try = enclosing;
        }

        for (&start, &b) in blocks {
            let try_index = regions
                .iter()
                .copied()
                .find(|&r| ctx.region(r).in_try(start));
            let handler_index = regions
                .iter()
                .copied()
                .filter(|&r| {
                    let region = ctx.region(r);
                    region.in_handler(start) || region.in_filter(start)
                })
                .min_by_key(|&r| {
                    let region = ctx.region(r);
                    if region.in_filter(start) {
                        region.filter_range.as_ref().map_or(0, |f| f.end - f.start)
                    } else {
                        region.handler_range.end - region.handler_range.start
                    }
                });
            let in_filter = handler_index.is_some_and(|r| ctx.region(r).in_filter(start));
            let data = ctx.block_mut(b);
            data.try_index = try_index;
            data.handler_index = handler_index;
            data.in_filter = in_filter;
        }
        Ok(regions)
    }
}

fn handler_extent(clause: &EhClause) -> Range<u32> {
    clause.filter_offset().unwrap_or(clause.handler_offset)..clause.handler_end()
}

fn overlaps(a: &Range<u32>, b: &Range<u32>) -> bool {
    a.start < b.end && b.start < a.end
}

/// Whether `inner` lies within `outer`.
fn nested(inner: &Range<u32>, outer: &Range<u32>) -> bool {
    outer.start <= inner.start && inner.end <= outer.end
}

#[cfg(test)]
mod tests {
    use super::*;
    use ilimport_bytecode::{BytecodeBuilder, Token};
    use ilimport_ir::TargetInfo;

    fn diamond() -> MethodBody {
        let mut b = BytecodeBuilder::new();
        let (else_, join) = (b.new_label(), b.new_label());
        b.ldarg(0);
        b.branch(Opcode::BrfalseS, else_).unwrap();
        b.ldc_i4(1);
        b.branch(Opcode::BrS, join).unwrap();
        b.bind(else_).ldc_i4(2);
        b.bind(join).op(Opcode::Ret).unwrap();
        MethodBody::new(b.finish().unwrap(), 1)
    }

    #[test]
    fn splits_at_targets_and_terminators() {
        let mut ctx = IrContext::new(TargetInfo::X64);
        let flow = FlowGraph::build(&mut ctx, &diamond(), false).unwrap();
        assert_eq!(flow.num_blocks(), 4);
        let blocks: Vec<BlockRef> = flow.blocks().collect();
        assert_eq!(
            ctx.block(blocks[0]).jump,
            JumpKind::Cond {
                taken: blocks[2],
                next: blocks[1]
            }
        );
        assert_eq!(ctx.block(blocks[1]).jump, JumpKind::Always(blocks[3]));
        assert_eq!(ctx.block(blocks[2]).jump, JumpKind::Next(blocks[3]));
        assert_eq!(ctx.block(blocks[3]).jump, JumpKind::Return);
        assert_eq!(ctx.block(blocks[3]).preds.len(), 2);
    }

    #[test]
    fn branch_into_an_instruction_is_rejected() {
        // br.s +1 lands inside the ldc.i4 operand.
        let body = MethodBody::new(vec![0x2B, 0x01, 0x20, 0, 0, 0, 0, 0x2A], 1);
        let mut ctx = IrContext::new(TargetInfo::X64);
        let err = FlowGraph::build(&mut ctx, &body, false).unwrap_err();
        assert_eq!(err.bad_code(), Some(&BadCode::BadBranchTarget(3)));
    }

    #[test]
    fn decode_error_starts_a_falloff_block() {
        // ldc.i4.0; pop; <unknown 0xA6>
        let body = MethodBody::new(vec![0x16, 0x26, 0xA6], 1);
        let mut ctx = IrContext::new(TargetInfo::X64);
        let flow = FlowGraph::build(&mut ctx, &body, false).unwrap();
        assert_eq!(flow.num_blocks(), 2);
        let bad = flow.block_at(2).unwrap();
        assert_eq!(ctx.block(bad).jump, JumpKind::FallOff);
        assert_eq!(ctx.block(flow.entry).jump, JumpKind::Next(bad));
    }

    #[test]
    fn regions_are_placed_innermost_first() {
        // try { nop; leave.s END } catch { pop; leave.s END } END: ret
        let code = vec![0x00, 0xDE, 0x03, 0x26, 0xDE, 0x00, 0x2A];
        let body = MethodBody::new(code, 1).with_clause(EhClause {
            kind: EhClauseKind::Catch(Token(0x0100_0001)),
            try_offset: 0,
            try_length: 3,
            handler_offset: 3,
            handler_length: 3,
        });
        let mut ctx = IrContext::new(TargetInfo::X64);
        let flow = FlowGraph::build(&mut ctx, &body, false).unwrap();
        assert_eq!(flow.regions.len(), 1);
        let r = flow.regions[0];
        let try_block = flow.block_at(0).unwrap();
        let handler = flow.block_at(3).unwrap();
        let after = flow.block_at(6).unwrap();
        assert!(ctx.has_flag(try_block, BlockFlags::TRY_BEGIN));
        assert!(ctx.has_flag(handler, BlockFlags::HANDLER_ENTRY));
        assert_eq!(ctx.block(try_block).try_index, Some(r));
        assert_eq!(ctx.block(handler).handler_index, Some(r));
        assert_eq!(ctx.block(after).try_index, None);
        assert_eq!(ctx.block(try_block).jump, JumpKind::Leave(after));
        assert!(flow.scan.has_leave);
    }

    #[test]
    fn overlapping_try_regions_are_rejected() {
        let code = vec![0x00; 8];
        let clause = |try_offset, try_length| EhClause {
            kind: EhClauseKind::Finally,
            try_offset,
            try_length,
            handler_offset: 6,
            handler_length: 2,
        };
        let body = MethodBody::new(code, 1)
            .with_clause(clause(0, 3))
            .with_clause(clause(2, 3));
        let mut ctx = IrContext::new(TargetInfo::X64);
        let err = FlowGraph::build(&mut ctx, &body, false).unwrap_err();
        assert!(matches!(err.bad_code(), Some(BadCode::BadEhNesting(_))));
    }

    #[test]
    fn scan_records_aliasing_opcodes() {
        let mut b = BytecodeBuilder::new();
        b.op_int(Opcode::LdargaS, 1).unwrap();
        b.op(Opcode::Pop).unwrap();
        b.op_int(Opcode::StargS, 0).unwrap();
        b.op(Opcode::Ret).unwrap();
        let body = MethodBody::new(b.finish().unwrap(), 1);
        let mut ctx = IrContext::new(TargetInfo::X64);
        let flow = FlowGraph::build(&mut ctx, &body, true).unwrap();
        assert!(flow.scan.arg_is_aliased(0));
        assert!(flow.scan.arg_is_aliased(1));
        assert!(!flow.scan.arg_is_aliased(2));
        assert!(ctx.layout().is_empty());
    }
}
