//! Instruction prefixes and where they may appear.

use ilimport_bytecode::{Instruction, Opcode, Operand, Token};

use crate::error::BadCode;

/// Prefixes seen since the last real instruction.
#[derive(Clone, Copy, Debug, Default)]
pub(super) struct Prefixes {
    pub(super) volatile: bool,
    pub(super) unaligned: Option<u8>,
    pub(super) tail: bool,
    pub(super) constrained: Option<Token>,
    pub(super) readonly: bool,
    pub(super) no: Option<u8>,
    last: Option<Opcode>,
}

fn is_call(opcode: Opcode) -> bool {
    matches!(opcode, Opcode::Call | Opcode::Callvirt | Opcode::Calli)
}

fn is_indirection(opcode: Opcode) -> bool {
    use Opcode::*;
    matches!(
        opcode,
        LdindI1
            | LdindU1
            | LdindI2
            | LdindU2
            | LdindI4
            | LdindU4
            | LdindI8
            | LdindI
            | LdindR4
            | LdindR8
            | LdindRef
            | StindRef
            | StindI1
            | StindI2
            | StindI4
            | StindI8
            | StindR4
            | StindR8
            | StindI
    )
}

/// Instructions an `unaligned.` prefix may precede.
fn accepts_unaligned(opcode: Opcode) -> bool {
    use Opcode::*;
    is_indirection(opcode) || matches!(opcode, Ldfld | Stfld | Ldobj | Stobj | Cpblk | Initblk)
}

/// Instructions a `volatile.` prefix may precede.
fn accepts_volatile(opcode: Opcode) -> bool {
    accepts_unaligned(opcode) || matches!(opcode, Opcode::Ldsfld | Opcode::Stsfld)
}

fn is_element_load(opcode: Opcode) -> bool {
    use Opcode::*;
    matches!(
        opcode,
        LdelemI1
            | LdelemU1
            | LdelemI2
            | LdelemU2
            | LdelemI4
            | LdelemU4
            | LdelemI8
            | LdelemI
            | LdelemR4
            | LdelemR8
            | LdelemRef
            | Ldelem
    )
}

fn is_element_store(opcode: Opcode) -> bool {
    use Opcode::*;
    matches!(
        opcode,
        StelemI | StelemI1 | StelemI2 | StelemI4 | StelemI8 | StelemR4 | StelemR8 | StelemRef | Stelem
    )
}

fn is_element_access(opcode: Opcode) -> bool {
    opcode == Opcode::Ldelema || is_element_load(opcode) || is_element_store(opcode)
}

const NO_TYPECHECK: u8 = 0x01;
const NO_RANGECHECK: u8 = 0x02;
const NO_NULLCHECK: u8 = 0x04;

/// Whether `opcode` performs every check named in a `no.` operand.
fn accepts_no(checks: u8, opcode: Opcode) -> bool {
    use Opcode::*;
    if checks & !(NO_TYPECHECK | NO_RANGECHECK | NO_NULLCHECK) != 0 {
        return false;
    }
    let typecheck = matches!(opcode, Castclass | Unbox | Ldelema) || is_element_store(opcode);
    let rangecheck = is_element_access(opcode);
    let nullcheck = is_element_access(opcode) || matches!(opcode, Ldfld | Stfld | Callvirt | Ldvirtftn);
    (checks & NO_TYPECHECK == 0 || typecheck)
        && (checks & NO_RANGECHECK == 0 || rangecheck)
        && (checks & NO_NULLCHECK == 0 || nullcheck)
}

impl Prefixes {
    pub(super) fn add(&mut self, insn: &Instruction) {
        match (insn.opcode, &insn.operand) {
            (Opcode::Volatile, _) => self.volatile = true,
            (Opcode::Unaligned, &Operand::Byte(align)) => self.unaligned = Some(align),
            (Opcode::Tail, _) => self.tail = true,
            (Opcode::Constrained, &Operand::Token(token)) => self.constrained = Some(token),
            (Opcode::Readonly, _) => self.readonly = true,
            (Opcode::No, &Operand::Byte(checks)) => self.no = Some(checks),
            _ => {}
        }
        self.last = Some(insn.opcode);
    }

    /// The most recent prefix, if any is pending.
    pub(super) fn last(&self) -> Option<Opcode> {
        self.last
    }

    /// Check the pending prefixes against the instruction they apply to.
    pub(super) fn validate(&self, opcode: Opcode, next: Option<&Instruction>) -> Result<(), BadCode> {
        let invalid = |prefix| BadCode::InvalidPrefix { prefix, opcode };
        if self.readonly && opcode != Opcode::Ldelema && !is_call(opcode) {
            return Err(invalid(Opcode::Readonly));
        }
        if self.tail && !(is_call(opcode) && next.is_some_and(|n| n.opcode == Opcode::Ret)) {
            return Err(invalid(Opcode::Tail));
        }
        if self.volatile && !accepts_volatile(opcode) {
            return Err(invalid(Opcode::Volatile));
        }
        if self.unaligned.is_some() && !accepts_unaligned(opcode) {
            return Err(invalid(Opcode::Unaligned));
        }
        if let Some(checks) = self.no
            && !accepts_no(checks, opcode)
        {
            return Err(invalid(Opcode::No));
        }
        if self.constrained.is_some() && opcode != Opcode::Callvirt {
            return Err(invalid(Opcode::Constrained));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn insn(opcode: Opcode, operand: Operand) -> Instruction {
        Instruction {
            offset: 0,
            opcode,
            operand,
            size: 1,
        }
    }

    #[test]
    fn volatile_requires_memory_access() {
        let mut prefixes = Prefixes::default();
        prefixes.add(&insn(Opcode::Volatile, Operand::None));
        assert!(prefixes.validate(Opcode::LdindI4, None).is_ok());
        assert_eq!(
            prefixes.validate(Opcode::Add, None),
            Err(BadCode::InvalidPrefix {
                prefix: Opcode::Volatile,
                opcode: Opcode::Add,
            })
        );
    }

    #[test]
    fn volatile_and_unaligned_have_distinct_targets() {
        let mut volatile = Prefixes::default();
        volatile.add(&insn(Opcode::Volatile, Operand::None));
        assert!(volatile.validate(Opcode::Ldsfld, None).is_ok());
        assert!(volatile.validate(Opcode::Cpblk, None).is_ok());
        assert!(volatile.validate(Opcode::Initobj, None).is_err());
        assert!(volatile.validate(Opcode::Ldflda, None).is_err());

        let mut unaligned = Prefixes::default();
        unaligned.add(&insn(Opcode::Unaligned, Operand::Byte(1)));
        assert!(unaligned.validate(Opcode::StindI8, None).is_ok());
        assert!(unaligned.validate(Opcode::Ldsfld, None).is_err());
    }

    #[test]
    fn no_prefix_matches_the_skipped_checks() {
        let no = |checks| {
            let mut prefixes = Prefixes::default();
            prefixes.add(&insn(Opcode::No, Operand::Byte(checks)));
            prefixes
        };
        assert!(no(NO_TYPECHECK).validate(Opcode::Castclass, None).is_ok());
        assert!(no(NO_TYPECHECK).validate(Opcode::StelemRef, None).is_ok());
        assert!(no(NO_TYPECHECK).validate(Opcode::LdelemI4, None).is_err());
        assert!(no(NO_RANGECHECK).validate(Opcode::LdelemI4, None).is_ok());
        assert!(no(NO_RANGECHECK).validate(Opcode::Ldfld, None).is_err());
        assert!(no(NO_NULLCHECK).validate(Opcode::Callvirt, None).is_ok());
        assert!(no(NO_NULLCHECK | NO_RANGECHECK).validate(Opcode::Ldelema, None).is_ok());
        assert!(no(NO_NULLCHECK | NO_RANGECHECK).validate(Opcode::Ldfld, None).is_err());
        assert_eq!(
            no(0x08).validate(Opcode::Callvirt, None),
            Err(BadCode::InvalidPrefix {
                prefix: Opcode::No,
                opcode: Opcode::Callvirt,
            })
        );
        assert!(no(NO_NULLCHECK).validate(Opcode::Add, None).is_err());
    }

    #[test]
    fn tail_requires_call_before_ret() {
        let mut prefixes = Prefixes::default();
        prefixes.add(&insn(Opcode::Tail, Operand::None));
        let ret = insn(Opcode::Ret, Operand::None);
        let pop = insn(Opcode::Pop, Operand::None);
        assert!(prefixes.validate(Opcode::Call, Some(&ret)).is_ok());
        assert!(prefixes.validate(Opcode::Call, Some(&pop)).is_err());
        assert!(prefixes.validate(Opcode::Newobj, Some(&ret)).is_err());
    }

    #[test]
    fn constrained_only_before_callvirt() {
        let mut prefixes = Prefixes::default();
        prefixes.add(&insn(Opcode::Constrained, Operand::Token(Token(0x0200_0001))));
        assert_eq!(prefixes.constrained, Some(Token(0x0200_0001)));
        assert_eq!(prefixes.last(), Some(Opcode::Constrained));
        assert!(prefixes.validate(Opcode::Callvirt, None).is_ok());
        assert!(prefixes.validate(Opcode::Call, None).is_err());
    }
}
