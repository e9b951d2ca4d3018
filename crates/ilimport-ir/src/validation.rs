//! Structural validation of imported IR.
//!
//! Checks the invariants later phases rely on:
//!
//! 1. **Statement links**: every block's statement list is a consistent
//!    doubly-linked chain owned by that block.
//! 2. **Edges**: every successor edge has a matching predecessor entry and
//!    vice versa.
//! 3. **Join depths**: along every stack-carrying edge out of an imported
//!    block, the exit depth matches the successor's entry depth, and the
//!    clique temp bases agree.

use std::fmt;

use crate::context::IrContext;
use crate::refs::BlockRef;

// ============================================================================
// Error types
// ============================================================================

pub enum ValidationError {
    BrokenLink { block: BlockRef, message: String },
    MissingPred { from: BlockRef, to: BlockRef },
    StalePred { block: BlockRef, pred: BlockRef },
    DepthMismatch {
        from: BlockRef,
        to: BlockRef,
        exit: usize,
        entry: usize,
    },
    CliqueMismatch { from: BlockRef, to: BlockRef },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::BrokenLink { block, message } => {
                write!(f, "{block}: broken statement list: {message}")
            }
            ValidationError::MissingPred { from, to } => {
                write!(f, "edge {from} -> {to} missing from predecessor list")
            }
            ValidationError::StalePred { block, pred } => {
                write!(f, "{block} lists {pred} as predecessor without an edge")
            }
            ValidationError::DepthMismatch {
                from,
                to,
                exit,
                entry,
            } => write!(
                f,
                "edge {from} -> {to}: exit depth {exit} but entry depth {entry}"
            ),
            ValidationError::CliqueMismatch { from, to } => {
                write!(f, "edge {from} -> {to}: spill temps disagree")
            }
        }
    }
}

impl fmt::Debug for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Result of validation.
#[derive(Default)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
}

impl ValidationResult {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

impl fmt::Display for ValidationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_ok() {
            return write!(f, "IR is valid");
        }
        writeln!(f, "{} validation error(s):", self.errors.len())?;
        for err in &self.errors {
            writeln!(f, "  - {err}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for ValidationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

// ============================================================================
// Checks
// ============================================================================

fn check_links(ctx: &IrContext, block: BlockRef, errors: &mut Vec<ValidationError>) {
    let data = ctx.block(block);
    let mut prev = None;
    let mut cur = data.first_stmt;
    while let Some(s) = cur {
        let stmt = ctx.stmt(s);
        if stmt.block != block {
            errors.push(ValidationError::BrokenLink {
                block,
                message: format!("{s} belongs to {}", stmt.block),
            });
            return;
        }
        if stmt.prev != prev {
            errors.push(ValidationError::BrokenLink {
                block,
                message: format!("{s} has a stale back link"),
            });
            return;
        }
        prev = Some(s);
        cur = stmt.next;
    }
    if prev != data.last_stmt {
        errors.push(ValidationError::BrokenLink {
            block,
            message: "last statement does not end the chain".to_string(),
        });
    }
}

fn check_edges(ctx: &IrContext, block: BlockRef, errors: &mut Vec<ValidationError>) {
    let succs = ctx.successors(block);
    for &succ in &succs {
        let edges = succs.iter().filter(|&&s| s == succ).count();
        let listed = ctx.block(succ).preds.iter().filter(|&&p| p == block).count();
        if listed < edges {
            errors.push(ValidationError::MissingPred {
                from: block,
                to: succ,
            });
        }
    }
    for &pred in &ctx.block(block).preds {
        if !ctx.successors(pred).contains(&block) {
            errors.push(ValidationError::StalePred { block, pred });
        }
    }
}

fn check_joins(ctx: &IrContext, block: BlockRef, errors: &mut Vec<ValidationError>) {
    let data = ctx.block(block);
    let Some(exit) = data.exit_depth else {
        return;
    };
    if !data.is_imported() {
        return;
    }
    for succ in data.jump.stack_successors() {
        let succ_data = ctx.block(succ);
        if let Some(entry) = succ_data.entry_depth()
            && entry != exit
        {
            errors.push(ValidationError::DepthMismatch {
                from: block,
                to: succ,
                exit,
                entry,
            });
        }
        if exit > 0 && data.stack_temps_out != succ_data.stack_temps_in {
            errors.push(ValidationError::CliqueMismatch {
                from: block,
                to: succ,
            });
        }
    }
}

/// Validate every block in the layout.
pub fn validate(ctx: &IrContext) -> ValidationResult {
    let mut errors = Vec::new();
    for &block in ctx.layout() {
        check_links(ctx, block, &mut errors);
        check_edges(ctx, block, &mut errors);
        check_joins(ctx, block, &mut errors);
    }
    ValidationResult { errors }
}

/// Assert that the IR is valid (debug builds only).
#[track_caller]
pub fn debug_assert_valid(ctx: &IrContext, phase: &str) {
    if cfg!(debug_assertions) {
        let result = validate(ctx);
        assert!(result.is_ok(), "IR invalid after {phase}:\n{result}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{BlockData, BlockFlags, JumpKind};
    use crate::types::TargetInfo;

    #[test]
    fn detects_missing_pred() {
        let mut ctx = IrContext::new(TargetInfo::X64);
        let b1 = ctx.new_block(BlockData::new(2..3, JumpKind::Return));
        let b0 = ctx.new_block(BlockData::new(0..2, JumpKind::Next(b1)));
        let result = validate(&ctx);
        assert!(!result.is_ok());
        assert_eq!(
            result.errors[0].to_string(),
            format!("edge {b0} -> {b1} missing from predecessor list")
        );

        ctx.add_pred(b1, b0);
        assert!(validate(&ctx).is_ok());
    }

    #[test]
    fn detects_depth_mismatch() {
        let mut ctx = IrContext::new(TargetInfo::X64);
        let b1 = ctx.new_block(BlockData::new(2..3, JumpKind::Return));
        let b0 = ctx.new_block(BlockData::new(0..2, JumpKind::Return));
        ctx.set_jump(b0, JumpKind::Next(b1));
        ctx.block_mut(b0).flags |= BlockFlags::IMPORTED;
        ctx.block_mut(b0).exit_depth = Some(0);
        ctx.block_mut(b1).entry_state = Some(Vec::new());
        assert!(validate(&ctx).is_ok());

        ctx.block_mut(b0).exit_depth = Some(1);
        let result = validate(&ctx);
        assert_eq!(result.errors.len(), 1);
        assert!(matches!(
            result.errors[0],
            ValidationError::DepthMismatch { exit: 1, entry: 0, .. }
        ));
    }
}
