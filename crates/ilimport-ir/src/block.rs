//! Basic blocks, jump kinds and exception regions.

use std::ops::Range;

use bitflags::bitflags;
use ilimport_bytecode::Token;
use smallvec::SmallVec;

use crate::refs::{BlockRef, EhRef, LocalRef, NodeRef, StmtRef};
use crate::types::TypeInfo;

/// How control leaves a block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JumpKind {
    /// Falls through into the next block in IL order.
    Next(BlockRef),
    /// Unconditional jump.
    Always(BlockRef),
    /// Two-way branch on the block's final `jtrue`.
    Cond { taken: BlockRef, next: BlockRef },
    /// Multi-way branch on the block's final `switch`; `default` is the
    /// fallthrough block.
    Switch {
        targets: Vec<BlockRef>,
        default: BlockRef,
    },
    Return,
    Throw,
    /// `leave` not yet lowered.
    Leave(BlockRef),
    /// Invokes a finally handler, then resumes at `continuation`.
    CallFinally {
        finally: BlockRef,
        continuation: BlockRef,
    },
    /// Exits a catch handler, resuming at the target.
    CatchRet(BlockRef),
    EndFinally,
    EndFilter,
    /// The last instruction of the method falls off the end.
    FallOff,
}

impl JumpKind {
    pub fn successors(&self) -> SmallVec<[BlockRef; 2]> {
        match self {
            JumpKind::Next(b) | JumpKind::Always(b) | JumpKind::Leave(b) | JumpKind::CatchRet(b) => {
                smallvec::smallvec![*b]
            }
            JumpKind::Cond { taken, next } => smallvec::smallvec![*taken, *next],
            JumpKind::Switch { targets, default } => {
                let mut succs: SmallVec<[BlockRef; 2]> = targets.iter().copied().collect();
                succs.push(*default);
                succs
            }
            JumpKind::CallFinally {
                finally,
                continuation,
            } => smallvec::smallvec![*finally, *continuation],
            JumpKind::Return
            | JumpKind::Throw
            | JumpKind::EndFinally
            | JumpKind::EndFilter
            | JumpKind::FallOff => SmallVec::new(),
        }
    }

    /// Successors reached with the operand stack carried over. `leave`,
    /// call-finally and catch-return edges always carry an empty stack.
    pub fn stack_successors(&self) -> SmallVec<[BlockRef; 2]> {
        match self {
            JumpKind::Leave(_) | JumpKind::CallFinally { .. } | JumpKind::CatchRet(_) => {
                SmallVec::new()
            }
            other => other.successors(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            JumpKind::Next(_) => "next",
            JumpKind::Always(_) => "always",
            JumpKind::Cond { .. } => "cond",
            JumpKind::Switch { .. } => "switch",
            JumpKind::Return => "return",
            JumpKind::Throw => "throw",
            JumpKind::Leave(_) => "leave",
            JumpKind::CallFinally { .. } => "callfinally",
            JumpKind::CatchRet(_) => "catchret",
            JumpKind::EndFinally => "endfinally",
            JumpKind::EndFilter => "endfilter",
            JumpKind::FallOff => "falloff",
        }
    }

    /// Replace every occurrence of `from` among the successors with `to`.
    pub fn retarget(&mut self, from: BlockRef, to: BlockRef) {
        let swap = |b: &mut BlockRef| {
            if *b == from {
                *b = to;
            }
        };
        match self {
            JumpKind::Next(b) | JumpKind::Always(b) | JumpKind::Leave(b) | JumpKind::CatchRet(b) => {
                swap(b)
            }
            JumpKind::Cond { taken, next } => {
                swap(taken);
                swap(next);
            }
            JumpKind::Switch { targets, default } => {
                targets.iter_mut().for_each(swap);
                swap(default);
            }
            JumpKind::CallFinally {
                finally,
                continuation,
            } => {
                swap(finally);
                swap(continuation);
            }
            _ => {}
        }
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct BlockFlags: u16 {
        /// Statement list is final for the current clique typing.
        const IMPORTED = 1 << 0;
        /// Created by the importer rather than found in the IL.
        const INTERNAL = 1 << 1;
        const TRY_BEGIN = 1 << 2;
        const HANDLER_ENTRY = 1 << 3;
        const FILTER_ENTRY = 1 << 4;
        /// Replaced by a verification-failure throw.
        const VERIFY_THROW = 1 << 5;
        /// Holds the catch-argument spill store of a handler.
        const CATCH_ARG_SPILL = 1 << 6;
        /// Queued for import and not yet processed.
        const PENDING = 1 << 7;
    }
}

/// One evaluation stack slot: the value tree and its verification type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StackEntry {
    pub node: NodeRef,
    pub info: TypeInfo,
}

#[derive(Clone, Debug, PartialEq)]
pub struct BlockData {
    /// IL range covered; empty for internal blocks.
    pub il_range: Range<u32>,
    pub jump: JumpKind,
    /// Predecessors, one entry per incoming edge.
    pub preds: SmallVec<[BlockRef; 4]>,
    pub first_stmt: Option<StmtRef>,
    pub last_stmt: Option<StmtRef>,
    pub flags: BlockFlags,
    /// Innermost try region containing the block.
    pub try_index: Option<EhRef>,
    /// Innermost handler (or filter) region containing the block.
    pub handler_index: Option<EhRef>,
    /// The block lies in the filter part of `handler_index`.
    pub in_filter: bool,
    /// Entry stack, once some predecessor has been imported.
    pub entry_state: Option<Vec<StackEntry>>,
    /// Stack depth at the end of the last import.
    pub exit_depth: Option<usize>,
    /// First clique temp read on entry.
    pub stack_temps_in: Option<LocalRef>,
    /// First clique temp written on exit.
    pub stack_temps_out: Option<LocalRef>,
    pub import_count: u32,
}

impl BlockData {
    pub fn new(il_range: Range<u32>, jump: JumpKind) -> Self {
        Self {
            il_range,
            jump,
            preds: SmallVec::new(),
            first_stmt: None,
            last_stmt: None,
            flags: BlockFlags::empty(),
            try_index: None,
            handler_index: None,
            in_filter: false,
            entry_state: None,
            exit_depth: None,
            stack_temps_in: None,
            stack_temps_out: None,
            import_count: 0,
        }
    }

    /// An importer-created block sharing `region`'s EH placement.
    pub fn internal(region: &BlockData, jump: JumpKind) -> Self {
        let mut block = Self::new(region.il_range.start..region.il_range.start, jump);
        block.flags = BlockFlags::INTERNAL | BlockFlags::IMPORTED;
        block.try_index = region.try_index;
        block.handler_index = region.handler_index;
        block.in_filter = region.in_filter;
        block
    }

    pub fn is_imported(&self) -> bool {
        self.flags.contains(BlockFlags::IMPORTED)
    }

    pub fn entry_depth(&self) -> Option<usize> {
        self.entry_state.as_ref().map(Vec::len)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandlerKind {
    /// Catch of the class named by the token.
    Catch(Token),
    Filter,
    Finally,
    Fault,
}

impl HandlerKind {
    pub fn name(&self) -> &'static str {
        match self {
            HandlerKind::Catch(_) => "catch",
            HandlerKind::Filter => "filter",
            HandlerKind::Finally => "finally",
            HandlerKind::Fault => "fault",
        }
    }
}

/// One exception region: a protected range plus its handler.
///
/// Regions are stored innermost first, so scanning in order finds the
/// innermost region containing an offset.
#[derive(Clone, Debug, PartialEq)]
pub struct EhRegion {
    pub kind: HandlerKind,
    pub try_range: Range<u32>,
    pub handler_range: Range<u32>,
    /// Filter code, from the filter offset up to the handler start.
    pub filter_range: Option<Range<u32>>,
    pub try_entry: BlockRef,
    pub handler_entry: BlockRef,
    pub filter_entry: Option<BlockRef>,
    /// Innermost region whose try range strictly encloses this try range.
    pub enclosing_try: Option<EhRef>,
    /// Temp holding the caught exception when the handler entry had to
    /// spill it.
    pub catch_arg_temp: Option<LocalRef>,
}

impl EhRegion {
    pub fn in_try(&self, offset: u32) -> bool {
        self.try_range.contains(&offset)
    }

    pub fn in_handler(&self, offset: u32) -> bool {
        self.handler_range.contains(&offset)
    }

    pub fn in_filter(&self, offset: u32) -> bool {
        self.filter_range
            .as_ref()
            .is_some_and(|r| r.contains(&offset))
    }

    /// Whether the handler receives an exception object on entry.
    pub fn has_catch_arg(&self) -> bool {
        matches!(self.kind, HandlerKind::Catch(_) | HandlerKind::Filter)
    }

    pub fn is_finally_like(&self) -> bool {
        matches!(self.kind, HandlerKind::Finally | HandlerKind::Fault)
    }
}
