//! Short instruction sequences starting at a `box` that fold without ever
//! allocating the box.

use ilimport_bytecode::{Instruction, Opcode};
use ilimport_ir::{ClassHandle, TypeInfo, VarType};

use super::{Importer, token};
use crate::error::ImportResult;
use crate::resolver::TypeCompareState;

fn is_truth_branch(opcode: Opcode) -> bool {
    matches!(
        opcode,
        Opcode::Brtrue | Opcode::BrtrueS | Opcode::Brfalse | Opcode::BrfalseS
    )
}

fn is_brtrue(opcode: Opcode) -> bool {
    matches!(opcode, Opcode::Brtrue | Opcode::BrtrueS)
}

impl Importer<'_> {
    /// Try the box patterns at `insns[i]`, a `box` of the value type
    /// `class`. Returns how many instructions were consumed, or `None` when
    /// the box has to be imported normally.
    pub(super) fn match_box_pattern(
        &mut self,
        insns: &[Instruction],
        i: usize,
        class: ClassHandle,
    ) -> ImportResult<Option<usize>> {
        let Some(next) = insns.get(i + 1) else {
            return Ok(None);
        };
        // Only a value that the box would accept as is.
        let expected = self.class_sig(class)?.type_info();
        if self.stack.peek(0).map(|top| top.info) != expected {
            return Ok(None);
        }
        let after = insns.get(i + 2);
        match next.opcode {
            // box; unbox.any of the same type
            Opcode::UnboxAny => {
                let to = self.resolve_class(token(next)?)?;
                if self.resolver.compare_types_for_equality(class, to) == TypeCompareState::Must {
                    tracing::debug!(%class, "removed box; unbox.any");
                    return Ok(Some(2));
                }
            }
            Opcode::Isinst => {
                let to = self.resolve_class(token(next)?)?;
                let cast = self.resolver.compare_types_for_cast(class, to);
                match (cast, after) {
                    // box; isinst; br{true,false}
                    (TypeCompareState::Must, Some(branch)) if is_truth_branch(branch.opcode) => {
                        self.discard_boxed_value()?;
                        self.fold_branch(is_brtrue(branch.opcode));
                        tracing::debug!(%class, "folded box; isinst; branch");
                        return Ok(Some(3));
                    }
                    // box; isinst; unbox.any
                    (TypeCompareState::Must, Some(unbox)) if unbox.opcode == Opcode::UnboxAny => {
                        let back = self.resolve_class(token(unbox)?)?;
                        if self.resolver.compare_types_for_equality(class, back) == TypeCompareState::Must {
                            tracing::debug!(%class, "removed box; isinst; unbox.any");
                            return Ok(Some(3));
                        }
                    }
                    (TypeCompareState::MustNot, Some(branch)) if is_truth_branch(branch.opcode) => {
                        self.discard_boxed_value()?;
                        let zero = self.ctx.int_con(0, VarType::Int);
                        self.push(zero, TypeInfo::Int32)?;
                        tracing::debug!(%class, "folded box; isinst to false");
                        return Ok(Some(2));
                    }
                    _ => {}
                }
            }
            // A box is never null.
            Opcode::Ldnull if after.is_some_and(|a| a.opcode == Opcode::CgtUn) => {
                self.discard_boxed_value()?;
                let one = self.ctx.int_con(1, VarType::Int);
                self.push(one, TypeInfo::Int32)?;
                tracing::debug!(%class, "folded box; ldnull; cgt.un");
                return Ok(Some(3));
            }
            op if is_truth_branch(op) => {
                self.discard_boxed_value()?;
                let one = self.ctx.int_con(1, VarType::Int);
                self.push(one, TypeInfo::Int32)?;
                return Ok(Some(1));
            }
            _ => {}
        }
        Ok(None)
    }

    /// Drop the value that would have been boxed, keeping its side effects.
    fn discard_boxed_value(&mut self) -> ImportResult<()> {
        let value = self.pop()?;
        if self.ctx.effects(value.node).has_side_effects() {
            let depth = self.stack.depth();
            self.append_stmt(value.node, depth);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truth_branches() {
        assert!(is_truth_branch(Opcode::BrfalseS));
        assert!(is_brtrue(Opcode::Brtrue));
        assert!(!is_brtrue(Opcode::Brfalse));
        assert!(!is_truth_branch(Opcode::Beq));
    }
}
