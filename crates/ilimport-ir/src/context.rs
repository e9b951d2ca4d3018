//! IrContext: arena storage for one compilation.
//!
//! Nodes, statements, blocks, locals and exception regions live in
//! `PrimaryMap`s owned by `IrContext` and are addressed by entity refs.
//! Nothing is freed individually; a discarded statement list simply leaves
//! its nodes unreachable.

use cranelift_entity::{EntityRef, PrimaryMap};
use smallvec::SmallVec;

use crate::block::{BlockData, BlockFlags, EhRegion, JumpKind};
use crate::effects::SideEffects;
use crate::local::{LocalDesc, LocalKind};
use crate::node::{NodeData, NodeKind};
use crate::refs::*;
use crate::types::{TargetInfo, VarType};

// ============================================================================
// Statements
// ============================================================================

/// One statement: a root node linked into its block's statement list.
#[derive(Clone, Debug, PartialEq)]
pub struct StmtData {
    pub root: NodeRef,
    /// IL offset of the instruction that produced the statement.
    pub il_offset: Option<u32>,
    pub block: BlockRef,
    pub prev: Option<StmtRef>,
    pub next: Option<StmtRef>,
}

// ============================================================================
// IrContext
// ============================================================================

/// Arena sizes recorded by [`IrContext::mark`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ContextMark {
    locals: usize,
    blocks: usize,
}

#[derive(Debug)]
pub struct IrContext {
    nodes: PrimaryMap<NodeRef, NodeData>,
    stmts: PrimaryMap<StmtRef, StmtData>,
    blocks: PrimaryMap<BlockRef, BlockData>,
    locals: PrimaryMap<LocalRef, LocalDesc>,
    regions: PrimaryMap<EhRef, EhRegion>,

    /// Block layout order. Detached blocks (inlinee bodies) are not listed.
    layout: Vec<BlockRef>,

    pub target: TargetInfo,
}

impl IrContext {
    pub fn new(target: TargetInfo) -> Self {
        Self {
            nodes: PrimaryMap::new(),
            stmts: PrimaryMap::new(),
            blocks: PrimaryMap::new(),
            locals: PrimaryMap::new(),
            regions: PrimaryMap::new(),
            layout: Vec::new(),
            target,
        }
    }

    // ========================================================================
    // Nodes
    // ========================================================================

    /// Create a node, computing its aggregate side effects from its own
    /// kind and its operands.
    pub fn new_node(
        &mut self,
        kind: NodeKind,
        ty: VarType,
        operands: impl IntoIterator<Item = NodeRef>,
    ) -> NodeRef {
        let operands: SmallVec<[NodeRef; 2]> = operands.into_iter().collect();
        let effects = self.compute_effects(&kind, ty, &operands);
        self.nodes.push(NodeData {
            kind,
            ty,
            class: None,
            operands,
            effects,
        })
    }

    pub fn node(&self, n: NodeRef) -> &NodeData {
        &self.nodes[n]
    }

    pub fn kind(&self, n: NodeRef) -> &NodeKind {
        &self.nodes[n].kind
    }

    pub fn ty(&self, n: NodeRef) -> VarType {
        self.nodes[n].ty
    }

    pub fn effects(&self, n: NodeRef) -> SideEffects {
        self.nodes[n].effects
    }

    pub fn set_class(&mut self, n: NodeRef, class: Option<ClassHandle>) {
        self.nodes[n].class = class;
    }

    /// Change a node's static type in place. Only used for retyping leaf
    /// reads (a local read substituted for an inlinee argument).
    pub fn retype(&mut self, n: NodeRef, ty: VarType) {
        self.nodes[n].ty = ty;
    }

    /// Replace one operand and recompute the node's effects.
    pub fn set_operand(&mut self, n: NodeRef, index: usize, operand: NodeRef) {
        self.nodes[n].operands[index] = operand;
        self.recompute_effects(n);
    }

    /// Recompute the effects of `n` from its kind and current operands.
    pub fn recompute_effects(&mut self, n: NodeRef) {
        let data = &self.nodes[n];
        let effects = self.compute_effects(&data.kind, data.ty, &data.operands);
        self.nodes[n].effects = effects;
    }

    fn compute_effects(&self, kind: &NodeKind, ty: VarType, operands: &[NodeRef]) -> SideEffects {
        let mut effects = kind.own_effects(ty);
        match kind {
            NodeKind::LclVar(l) | NodeKind::StoreLcl(l) if self.locals[*l].address_exposed => {
                effects |= SideEffects::GLOB_REF;
            }
            NodeKind::Binary { op, overflow: false, .. } if op.is_division() => {
                // A literal divisor other than 0 and -1 cannot fault.
                if let Some(&divisor) = operands.get(1)
                    && let Some(v) = self.nodes[divisor].kind.int_value()
                    && v != 0
                    && v != -1
                {
                    effects.remove(SideEffects::EXCEPT);
                }
            }
            _ => {}
        }
        for &op in operands {
            effects |= self.nodes[op].effects;
        }
        effects
    }

    // ------------------------------------------------------------------------
    // Node construction shorthands
    // ------------------------------------------------------------------------

    pub fn int_con(&mut self, value: i64, ty: VarType) -> NodeRef {
        self.new_node(NodeKind::IntCon(value), ty, [])
    }

    pub fn dbl_con(&mut self, value: f64, ty: VarType) -> NodeRef {
        self.new_node(NodeKind::DblCon(value), ty, [])
    }

    pub fn null(&mut self) -> NodeRef {
        self.new_node(NodeKind::IntCon(0), VarType::Ref, [])
    }

    /// Read of a local at its stack type.
    pub fn lcl_var(&mut self, local: LocalRef) -> NodeRef {
        let desc = &self.locals[local];
        let (ty, class) = (desc.ty.actual(), desc.class);
        let n = self.new_node(NodeKind::LclVar(local), ty, []);
        self.set_class(n, class);
        n
    }

    pub fn lcl_addr(&mut self, local: LocalRef) -> NodeRef {
        self.new_node(NodeKind::LclAddr(local), VarType::Byref, [])
    }

    pub fn store_lcl(&mut self, local: LocalRef, value: NodeRef) -> NodeRef {
        let ty = self.locals[local].ty;
        self.new_node(NodeKind::StoreLcl(local), ty, [value])
    }

    pub fn is_null_constant(&self, n: NodeRef) -> bool {
        let node = &self.nodes[n];
        node.ty == VarType::Ref && node.kind == NodeKind::IntCon(0)
    }

    // ------------------------------------------------------------------------
    // Tree queries
    // ------------------------------------------------------------------------

    /// Deep-copy a tree into fresh nodes.
    pub fn clone_tree(&mut self, n: NodeRef) -> NodeRef {
        let data = self.nodes[n].clone();
        let operands: SmallVec<[NodeRef; 2]> =
            data.operands.iter().map(|&op| self.clone_tree(op)).collect();
        let copy = self.new_node(data.kind, data.ty, operands);
        self.nodes[copy].class = data.class;
        copy
    }

    /// Whether a tree can be evaluated again (duplicated) without changing
    /// behavior: constants, local reads and local addresses.
    pub fn is_cloneable(&self, n: NodeRef) -> bool {
        matches!(
            self.nodes[n].kind,
            NodeKind::IntCon(_)
                | NodeKind::DblCon(_)
                | NodeKind::StrCon(_)
                | NodeKind::Handle(_)
                | NodeKind::LclVar(_)
                | NodeKind::LclAddr(_)
                | NodeKind::StaticAddr(_)
        )
    }

    /// Whether the tree reads or takes the address of `local`.
    pub fn references_local(&self, n: NodeRef, local: LocalRef) -> bool {
        let node = &self.nodes[n];
        match node.kind {
            NodeKind::LclVar(l) | NodeKind::LclAddr(l) if l == local => true,
            _ => node
                .operands
                .iter()
                .any(|&op| self.references_local(op, local)),
        }
    }

    /// Whether the tree reads an address-exposed local.
    pub fn references_exposed_local(&self, n: NodeRef) -> bool {
        let node = &self.nodes[n];
        match node.kind {
            NodeKind::LclVar(l) | NodeKind::LclAddr(l) if self.locals[l].address_exposed => true,
            _ => node
                .operands
                .iter()
                .any(|&op| self.references_exposed_local(op)),
        }
    }

    /// Whether the tree contains a node of the given kind predicate.
    pub fn contains(&self, n: NodeRef, pred: &impl Fn(&NodeKind) -> bool) -> bool {
        let node = &self.nodes[n];
        pred(&node.kind) || node.operands.iter().any(|&op| self.contains(op, pred))
    }

    // ========================================================================
    // Locals
    // ========================================================================

    pub fn new_local(&mut self, desc: LocalDesc) -> LocalRef {
        self.locals.push(desc)
    }

    pub fn local(&self, l: LocalRef) -> &LocalDesc {
        &self.locals[l]
    }

    pub fn local_mut(&mut self, l: LocalRef) -> &mut LocalDesc {
        &mut self.locals[l]
    }

    pub fn locals(&self) -> impl Iterator<Item = (LocalRef, &LocalDesc)> {
        self.locals.iter()
    }

    pub fn num_locals(&self) -> usize {
        self.locals.len()
    }

    /// Allocate a fresh temp of the given type.
    pub fn grab_temp(&mut self, reason: &'static str, ty: VarType) -> LocalRef {
        self.locals.push(LocalDesc::new(LocalKind::Temp(reason), ty))
    }

    /// Allocate `count` consecutive temps of undetermined type and return
    /// the first one.
    pub fn grab_temps(&mut self, reason: &'static str, count: usize) -> LocalRef {
        let first = self.grab_temp(reason, VarType::Undef);
        for _ in 1..count {
            self.grab_temp(reason, VarType::Undef);
        }
        first
    }

    // ========================================================================
    // Rollback
    // ========================================================================

    /// Record the current number of locals and blocks.
    pub fn mark(&self) -> ContextMark {
        ContextMark {
            locals: self.locals.len(),
            blocks: self.blocks.len(),
        }
    }

    /// Drop every local and block created since `mark`. Nodes and
    /// statements are left in place but must no longer refer to them.
    pub fn rollback(&mut self, mark: ContextMark) {
        if self.locals.len() > mark.locals {
            let locals = std::mem::take(&mut self.locals);
            self.locals = locals.into_iter().take(mark.locals).map(|(_, desc)| desc).collect();
        }
        if self.blocks.len() > mark.blocks {
            let blocks = std::mem::take(&mut self.blocks);
            self.blocks = blocks.into_iter().take(mark.blocks).map(|(_, data)| data).collect();
            self.layout.retain(|b| b.index() < mark.blocks);
        }
    }

    // ========================================================================
    // Blocks
    // ========================================================================

    /// Create a block and append it to the layout.
    pub fn new_block(&mut self, data: BlockData) -> BlockRef {
        let b = self.blocks.push(data);
        self.layout.push(b);
        b
    }

    /// Create a block placed right after `after` in the layout.
    pub fn insert_block_after(&mut self, after: BlockRef, data: BlockData) -> BlockRef {
        let b = self.blocks.push(data);
        let pos = self
            .layout
            .iter()
            .position(|&x| x == after)
            .map_or(self.layout.len(), |p| p + 1);
        self.layout.insert(pos, b);
        b
    }

    /// Create a block placed right before `before` in the layout.
    pub fn insert_block_before(&mut self, before: BlockRef, data: BlockData) -> BlockRef {
        let b = self.blocks.push(data);
        let pos = self
            .layout
            .iter()
            .position(|&x| x == before)
            .unwrap_or(self.layout.len());
        self.layout.insert(pos, b);
        b
    }

    /// Create a block that is not part of the layout.
    pub fn new_detached_block(&mut self, data: BlockData) -> BlockRef {
        self.blocks.push(data)
    }

    pub fn block(&self, b: BlockRef) -> &BlockData {
        &self.blocks[b]
    }

    pub fn block_mut(&mut self, b: BlockRef) -> &mut BlockData {
        &mut self.blocks[b]
    }

    pub fn layout(&self) -> &[BlockRef] {
        &self.layout
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn successors(&self, b: BlockRef) -> SmallVec<[BlockRef; 2]> {
        self.blocks[b].jump.successors()
    }

    pub fn add_pred(&mut self, b: BlockRef, pred: BlockRef) {
        self.blocks[b].preds.push(pred);
    }

    /// Remove one edge `pred -> b` from `b`'s predecessor list.
    pub fn remove_pred(&mut self, b: BlockRef, pred: BlockRef) {
        let preds = &mut self.blocks[b].preds;
        if let Some(pos) = preds.iter().position(|&p| p == pred) {
            preds.remove(pos);
        }
    }

    /// Set a block's jump, keeping predecessor lists of old and new
    /// successors in sync.
    pub fn set_jump(&mut self, b: BlockRef, jump: JumpKind) {
        for succ in self.blocks[b].jump.successors() {
            self.remove_pred(succ, b);
        }
        for succ in jump.successors() {
            self.add_pred(succ, b);
        }
        self.blocks[b].jump = jump;
    }

    pub fn has_flag(&self, b: BlockRef, flag: BlockFlags) -> bool {
        self.blocks[b].flags.contains(flag)
    }

    // ========================================================================
    // Statements
    // ========================================================================

    pub fn stmt(&self, s: StmtRef) -> &StmtData {
        &self.stmts[s]
    }

    /// Link a new statement at the end of `block`.
    pub fn append_stmt(&mut self, block: BlockRef, root: NodeRef, il_offset: Option<u32>) -> StmtRef {
        let prev = self.blocks[block].last_stmt;
        let s = self.stmts.push(StmtData {
            root,
            il_offset,
            block,
            prev,
            next: None,
        });
        match prev {
            Some(p) => self.stmts[p].next = Some(s),
            None => self.blocks[block].first_stmt = Some(s),
        }
        self.blocks[block].last_stmt = Some(s);
        s
    }

    /// Link a new statement right before `before`.
    pub fn insert_stmt_before(
        &mut self,
        before: StmtRef,
        root: NodeRef,
        il_offset: Option<u32>,
    ) -> StmtRef {
        let block = self.stmts[before].block;
        let prev = self.stmts[before].prev;
        let s = self.stmts.push(StmtData {
            root,
            il_offset,
            block,
            prev,
            next: Some(before),
        });
        self.stmts[before].prev = Some(s);
        match prev {
            Some(p) => self.stmts[p].next = Some(s),
            None => self.blocks[block].first_stmt = Some(s),
        }
        s
    }

    /// Unlink the last statement of `block` and return its root and offset.
    pub fn extract_last(&mut self, block: BlockRef) -> Option<(NodeRef, Option<u32>)> {
        let last = self.blocks[block].last_stmt?;
        let StmtData {
            root,
            il_offset,
            prev,
            ..
        } = self.stmts[last];
        match prev {
            Some(p) => self.stmts[p].next = None,
            None => self.blocks[block].first_stmt = None,
        }
        self.blocks[block].last_stmt = prev;
        self.stmts[last].prev = None;
        Some((root, il_offset))
    }

    /// Drop the whole statement list of `block`.
    pub fn clear_stmts(&mut self, block: BlockRef) {
        let data = &mut self.blocks[block];
        data.first_stmt = None;
        data.last_stmt = None;
    }

    /// Statements of `block` in order.
    pub fn block_stmts(&self, block: BlockRef) -> Vec<StmtRef> {
        let mut out = Vec::new();
        let mut cur = self.blocks[block].first_stmt;
        while let Some(s) = cur {
            out.push(s);
            cur = self.stmts[s].next;
        }
        out
    }

    /// Root nodes of `block`'s statements in order.
    pub fn block_roots(&self, block: BlockRef) -> Vec<NodeRef> {
        self.block_stmts(block)
            .into_iter()
            .map(|s| self.stmts[s].root)
            .collect()
    }

    pub fn last_root(&self, block: BlockRef) -> Option<NodeRef> {
        self.blocks[block].last_stmt.map(|s| self.stmts[s].root)
    }

    // ========================================================================
    // Exception regions
    // ========================================================================

    pub fn new_region(&mut self, region: EhRegion) -> EhRef {
        self.regions.push(region)
    }

    pub fn region(&self, r: EhRef) -> &EhRegion {
        &self.regions[r]
    }

    pub fn region_mut(&mut self, r: EhRef) -> &mut EhRegion {
        &mut self.regions[r]
    }

    pub fn regions(&self) -> impl Iterator<Item = (EhRef, &EhRegion)> {
        self.regions.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::BinaryOp;

    fn ctx() -> IrContext {
        IrContext::new(TargetInfo::X64)
    }

    #[test]
    fn effects_propagate_bottom_up() {
        let mut ctx = ctx();
        let a = ctx.int_con(1, VarType::Int);
        let b = ctx.int_con(0, VarType::Int);
        let div = ctx.new_node(
            NodeKind::Binary {
                op: BinaryOp::Div,
                overflow: false,
                unsigned: false,
            },
            VarType::Int,
            [a, b],
        );
        assert!(ctx.effects(div).contains(SideEffects::EXCEPT));

        let t = ctx.grab_temp("test", VarType::Int);
        let store = ctx.store_lcl(t, div);
        assert!(ctx.effects(store).contains(SideEffects::ASG | SideEffects::EXCEPT));
    }

    #[test]
    fn safe_divisor_does_not_throw() {
        let mut ctx = ctx();
        let t = ctx.grab_temp("test", VarType::Int);
        let a = ctx.lcl_var(t);
        let b = ctx.int_con(4, VarType::Int);
        let div = ctx.new_node(
            NodeKind::Binary {
                op: BinaryOp::Rem,
                overflow: false,
                unsigned: false,
            },
            VarType::Int,
            [a, b],
        );
        assert_eq!(ctx.effects(div), SideEffects::empty());
    }

    #[test]
    fn exposed_local_reads_are_global() {
        let mut ctx = ctx();
        let t = ctx.grab_temp("test", VarType::Int);
        ctx.local_mut(t).address_exposed = true;
        let read = ctx.lcl_var(t);
        assert_eq!(ctx.effects(read), SideEffects::GLOB_REF);
        assert!(ctx.references_exposed_local(read));
    }

    #[test]
    fn statement_list_links() {
        let mut ctx = ctx();
        let b = ctx.new_block(BlockData::new(0..4, JumpKind::Return));
        let n1 = ctx.new_node(NodeKind::Nop, VarType::Void, []);
        let n2 = ctx.new_node(NodeKind::Nop, VarType::Void, []);
        let n3 = ctx.new_node(NodeKind::Nop, VarType::Void, []);
        let s1 = ctx.append_stmt(b, n1, Some(0));
        let s3 = ctx.append_stmt(b, n3, Some(2));
        ctx.insert_stmt_before(s3, n2, Some(1));
        assert_eq!(ctx.block_roots(b), vec![n1, n2, n3]);

        assert_eq!(ctx.extract_last(b), Some((n3, Some(2))));
        assert_eq!(ctx.block_roots(b), vec![n1, n2]);

        ctx.insert_stmt_before(s1, n3, None);
        assert_eq!(ctx.block_roots(b), vec![n3, n1, n2]);

        ctx.clear_stmts(b);
        assert!(ctx.block_roots(b).is_empty());
    }

    #[test]
    fn rollback_drops_later_locals_and_blocks() {
        let mut ctx = ctx();
        let kept_local = ctx.grab_temp("kept", VarType::Int);
        let kept_block = ctx.new_block(BlockData::new(0..1, JumpKind::Return));
        let mark = ctx.mark();

        ctx.grab_temps("dropped", 2);
        ctx.new_block(BlockData::new(1..2, JumpKind::Return));
        ctx.new_detached_block(BlockData::new(0..1, JumpKind::Return));
        ctx.rollback(mark);

        assert_eq!(ctx.num_locals(), 1);
        assert_eq!(ctx.local(kept_local).ty, VarType::Int);
        assert_eq!(ctx.num_blocks(), 1);
        assert_eq!(ctx.layout(), &[kept_block]);
        assert_eq!(ctx.mark(), mark);

        // New entities reuse the released indices.
        assert_eq!(ctx.grab_temp("again", VarType::Long).index(), 1);
    }

    #[test]
    fn set_jump_maintains_preds() {
        let mut ctx = ctx();
        let a = ctx.new_block(BlockData::new(0..1, JumpKind::Return));
        let b = ctx.new_block(BlockData::new(1..2, JumpKind::Return));
        let c = ctx.new_block(BlockData::new(2..3, JumpKind::Return));
        ctx.set_jump(a, JumpKind::Cond { taken: c, next: b });
        assert_eq!(ctx.block(b).preds.as_slice(), &[a]);
        assert_eq!(ctx.block(c).preds.as_slice(), &[a]);
        ctx.set_jump(a, JumpKind::Always(c));
        assert!(ctx.block(b).preds.is_empty());
        assert_eq!(ctx.block(c).preds.as_slice(), &[a]);
    }

    #[test]
    fn consecutive_temps() {
        let mut ctx = ctx();
        ctx.grab_temp("other", VarType::Int);
        let base = ctx.grab_temps("spill clique", 3);
        assert_eq!(ctx.num_locals(), 4);
        assert_eq!(ctx.local(base.offset(2)).kind, LocalKind::Temp("spill clique"));
    }
}
