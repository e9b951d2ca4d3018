//! Text format printer for imported IR.
//!
//! Statements print as s-expressions, blocks as a header followed by their
//! statements:
//!
//! ```text
//! BB0 [IL_0000..IL_0006) -> return
//!   (return (const int 8))
//! ```

use std::fmt;

use crate::block::{BlockFlags, JumpKind};
use crate::context::IrContext;
use crate::local::LocalKind;
use crate::node::{CallTarget, NodeKind, RuntimeHandle};
use crate::refs::{BlockRef, NodeRef};

/// Displays one node tree.
pub struct NodeDisplay<'a> {
    ctx: &'a IrContext,
    node: NodeRef,
}

impl<'a> NodeDisplay<'a> {
    pub fn new(ctx: &'a IrContext, node: NodeRef) -> Self {
        Self { ctx, node }
    }

    fn child(&self, node: NodeRef) -> NodeDisplay<'a> {
        NodeDisplay {
            ctx: self.ctx,
            node,
        }
    }
}

impl fmt::Display for NodeDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = self.ctx.node(self.node);
        match &data.kind {
            NodeKind::IntCon(0) if data.ty == crate::VarType::Ref => return f.write_str("null"),
            NodeKind::IntCon(v) => return write!(f, "(const {} {v})", data.ty),
            NodeKind::DblCon(v) => return write!(f, "(const {} {v:?})", data.ty),
            NodeKind::LclVar(l) => return write!(f, "{l}"),
            NodeKind::CatchArg => return f.write_str("(catch.arg)"),
            _ => {}
        }

        f.write_str("(")?;
        f.write_str(data.kind.name())?;
        match &data.kind {
            NodeKind::Binary { op, overflow, unsigned } => {
                if *overflow {
                    f.write_str(".ovf")?;
                }
                if *unsigned && !matches!(op, crate::BinaryOp::ShrUn) {
                    f.write_str(".un")?;
                }
                write!(f, " {}", data.ty)?;
            }
            NodeKind::Compare { unsigned, .. } => {
                if *unsigned {
                    f.write_str(".un")?;
                }
            }
            NodeKind::Cast { to, from_unsigned, .. } => {
                if *from_unsigned {
                    f.write_str(".un")?;
                }
                write!(f, " {to}")?;
            }
            NodeKind::Unary(_) | NodeKind::Indir { .. } => write!(f, " {}", data.ty)?,
            NodeKind::StoreInd { ty, .. } => write!(f, " {ty}")?,
            NodeKind::ArrElemAddr { elem, .. } => write!(f, " {elem}")?,
            NodeKind::StrCon(token) => write!(f, " {token}")?,
            NodeKind::Handle(RuntimeHandle::Class(c)) => write!(f, " {c}")?,
            NodeKind::Handle(RuntimeHandle::Method(m)) => write!(f, " {m}")?,
            NodeKind::Handle(RuntimeHandle::Field(fh)) => write!(f, " {fh}")?,
            NodeKind::LclAddr(l) | NodeKind::StoreLcl(l) => write!(f, " {l}")?,
            NodeKind::StaticAddr(fh) | NodeKind::FieldAddr(fh) => write!(f, " {fh}")?,
            NodeKind::FtnAddr { method, .. } | NodeKind::Jmp(method) => write!(f, " {method}")?,
            NodeKind::Obj(c)
            | NodeKind::StoreBlk(c)
            | NodeKind::MkRefAny(c)
            | NodeKind::RefAnyVal(c) => write!(f, " {c}")?,
            NodeKind::Call { target, tail } => {
                if *tail {
                    f.write_str(".tail")?;
                }
                match target {
                    CallTarget::Method(m) => write!(f, " {m}")?,
                    CallTarget::Virtual(m) => write!(f, " virt {m}")?,
                    CallTarget::Indirect => f.write_str(" indirect")?,
                    CallTarget::Helper(h) => write!(f, " helper {}", h.name())?,
                }
            }
            _ => {}
        }
        for &op in &data.operands {
            write!(f, " {}", self.child(op))?;
        }
        f.write_str(")")
    }
}

/// Print one node tree.
pub fn print_node(ctx: &IrContext, node: NodeRef) -> String {
    NodeDisplay::new(ctx, node).to_string()
}

fn print_jump(jump: &JumpKind) -> String {
    match jump {
        JumpKind::Next(b) => format!("next {b}"),
        JumpKind::Always(b) => format!("always {b}"),
        JumpKind::Leave(b) => format!("leave {b}"),
        JumpKind::CatchRet(b) => format!("catchret {b}"),
        JumpKind::Cond { taken, next } => format!("cond {taken} else {next}"),
        JumpKind::Switch { targets, default } => {
            let targets: Vec<String> = targets.iter().map(ToString::to_string).collect();
            format!("switch [{}] else {default}", targets.join(", "))
        }
        JumpKind::CallFinally {
            finally,
            continuation,
        } => format!("callfinally {finally} then {continuation}"),
        other => other.name().to_string(),
    }
}

/// Print a block header and its statements.
pub fn print_block(ctx: &IrContext, block: BlockRef) -> String {
    let data = ctx.block(block);
    let mut out = format!("{block}");
    if data.flags.contains(BlockFlags::INTERNAL) {
        out.push_str(" [internal]");
    } else {
        out.push_str(&format!(
            " [IL_{:04X}..IL_{:04X})",
            data.il_range.start, data.il_range.end
        ));
    }
    if let Some(r) = data.try_index {
        out.push_str(&format!(" try {r}"));
    }
    if let Some(r) = data.handler_index {
        let part = if data.in_filter { "filter" } else { "handler" };
        out.push_str(&format!(" {part} {r}"));
    }
    out.push_str(" -> ");
    out.push_str(&print_jump(&data.jump));
    out.push('\n');
    for root in ctx.block_roots(block) {
        out.push_str("  ");
        out.push_str(&print_node(ctx, root));
        out.push('\n');
    }
    out
}

/// Print every block in layout order.
pub fn print_method(ctx: &IrContext) -> String {
    ctx.layout()
        .iter()
        .map(|&b| print_block(ctx, b))
        .collect::<Vec<_>>()
        .join("")
}

/// Print the local table, one line per local.
pub fn print_locals(ctx: &IrContext) -> String {
    let mut out = String::new();
    for (l, desc) in ctx.locals() {
        let origin = match desc.kind {
            LocalKind::Arg(i) => format!("arg{i}"),
            LocalKind::Il(i) => format!("loc{i}"),
            LocalKind::Temp(reason) => format!("tmp \"{reason}\""),
        };
        out.push_str(&format!("{l}: {} {origin}", desc.ty));
        if let Some(class) = desc.class {
            out.push_str(&format!(" {class}"));
        }
        if desc.address_exposed {
            out.push_str(" addr-exposed");
        }
        if desc.single_def {
            out.push_str(" single-def");
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockData;
    use crate::node::BinaryOp;
    use crate::types::{TargetInfo, VarType};
    use insta::assert_snapshot;

    #[test]
    fn prints_block_with_statements() {
        let mut ctx = IrContext::new(TargetInfo::X64);
        let b = ctx.new_block(BlockData::new(0..6, JumpKind::Return));
        let t = ctx.grab_temp("test", VarType::Int);
        let lhs = ctx.lcl_var(t);
        let rhs = ctx.int_con(3, VarType::Int);
        let add = ctx.new_node(
            NodeKind::Binary {
                op: BinaryOp::Add,
                overflow: true,
                unsigned: false,
            },
            VarType::Int,
            [lhs, rhs],
        );
        let ret = ctx.new_node(NodeKind::Return, VarType::Int, [add]);
        ctx.append_stmt(b, ret, Some(0));
        assert_snapshot!(print_method(&ctx), @r"
        BB0 [IL_0000..IL_0006) -> return
          (return (add.ovf int V0 (const int 3)))
        ");
    }

    #[test]
    fn prints_null_and_stores() {
        let mut ctx = IrContext::new(TargetInfo::X64);
        let t = ctx.grab_temp("test", VarType::Ref);
        let null = ctx.null();
        let store = ctx.store_lcl(t, null);
        assert_eq!(print_node(&ctx, store), "(store V0 null)");
        assert_snapshot!(print_locals(&ctx), @r#"V0: ref tmp "test""#);
    }
}
