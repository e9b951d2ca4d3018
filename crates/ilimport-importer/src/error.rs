//! Error types for the importer

use derive_more::{Display, From};
use ilimport_bytecode::{DecodeError, Opcode, Token};
use ilimport_ir::{MethodHandle, TypeInfo};

pub type ImportResult<T> = Result<T, ImportError>;

#[derive(Display, Debug, From)]
#[display("{kind}")]
pub struct ImportError {
    #[from]
    kind: Box<ImportErrorKind>,
}

impl<E> From<E> for ImportError
where
    ImportErrorKind: From<E>,
{
    fn from(error: E) -> Self {
        ImportError {
            kind: Box::new(ImportErrorKind::from(error)),
        }
    }
}

impl std::error::Error for ImportError {}

impl ImportError {
    pub fn kind(&self) -> &ImportErrorKind {
        &self.kind
    }

    pub fn bad_code(&self) -> Option<&BadCode> {
        match &*self.kind {
            ImportErrorKind::BadCode(bad) => Some(bad),
            _ => None,
        }
    }

    pub fn inline_rejection(&self) -> Option<InlineRejection> {
        match &*self.kind {
            ImportErrorKind::InlineRejected(reason) => Some(*reason),
            _ => None,
        }
    }

    pub(crate) fn internal(msg: impl std::fmt::Display) -> Self {
        ImportErrorKind::Internal(msg.to_string()).into()
    }
}

#[derive(Display, Debug, From)]
pub enum ImportErrorKind {
    /// Malformed input: converts the current block into a verification
    /// throw, or fails the method when no block is being imported.
    #[display("bad code: {_0}")]
    BadCode(BadCode),

    /// The current inline attempt must be abandoned.
    #[display("inline rejected: {_0}")]
    InlineRejected(InlineRejection),

    #[display("{_0} has no IL body")]
    #[from(ignore)]
    MissingBody(MethodHandle),

    #[display("{_0} is unknown to the resolver")]
    #[from(ignore)]
    UnknownMethod(MethodHandle),

    #[display("internal error: {_0}")]
    Internal(String),
}

impl From<DecodeError> for ImportErrorKind {
    fn from(error: DecodeError) -> Self {
        ImportErrorKind::BadCode(BadCode::Decode(error))
    }
}

/// Reasons an instruction stream is rejected as malformed.
#[derive(Display, Debug, Clone, PartialEq)]
pub enum BadCode {
    #[display("{_0}")]
    Decode(DecodeError),

    #[display("evaluation stack underflow")]
    StackUnderflow,

    #[display("evaluation stack overflow (max {max})")]
    StackOverflow { max: usize },

    #[display("stack depth {found} at join, expected {expected}")]
    JoinDepthMismatch { expected: usize, found: usize },

    #[display("incompatible stack types {first} and {second} at join")]
    JoinTypeMismatch { first: TypeInfo, second: TypeInfo },

    #[display("non-empty stack on entry to a try region")]
    NonEmptyStackAtTry,

    #[display("prefix {prefix} cannot precede {opcode}")]
    InvalidPrefix { prefix: Opcode, opcode: Opcode },

    #[display("prefix {_0} is not followed by an instruction")]
    DanglingPrefix(Opcode),

    #[display("token {_0} does not resolve")]
    UnresolvedToken(Token),

    #[display("token {token} is not a {expected}")]
    UnexpectedToken { token: Token, expected: &'static str },

    #[display("well-known class {_0} is unavailable")]
    MissingWellKnown(&'static str),

    #[display("argument {_0} out of range")]
    InvalidArg(u16),

    #[display("local {_0} out of range")]
    InvalidLocal(u16),

    #[display("{opcode} cannot operate on {found}")]
    TypeMismatch { opcode: Opcode, found: TypeInfo },

    #[display("{opcode} cannot combine {lhs} and {rhs}")]
    OperandMismatch {
        opcode: Opcode,
        lhs: TypeInfo,
        rhs: TypeInfo,
    },

    #[display("stack not empty after ret")]
    ReturnStackNotEmpty,

    #[display("control falls off the end of the method")]
    FallOffEnd,

    #[display("branch target IL_{_0:04X} is not an instruction boundary")]
    BadBranchTarget(u32),

    #[display("malformed exception clauses: {_0}")]
    BadEhNesting(&'static str),

    #[display("endfinally outside a finally or fault handler")]
    EndFinallyOutsideHandler,

    #[display("endfinally with a non-empty stack")]
    EndFinallyStackNotEmpty,

    #[display("endfilter outside a filter")]
    EndFilterOutsideFilter,

    #[display("endfilter with stack depth {_0}, expected 1")]
    EndFilterStackDepth(usize),

    #[display("leave out of a finally, fault or filter region")]
    LeaveFromHandler,

    #[display("rethrow outside a catch handler")]
    RethrowOutsideCatch,

    #[display("{_0} is not allowed inside a protected region or handler")]
    IllegalInRegion(Opcode),

    #[display("localloc requires an otherwise empty stack")]
    LocallocStackNotEmpty,

    #[display("jmp with a non-empty stack")]
    JmpStackNotEmpty,

    #[display("arglist in a method without varargs")]
    ArglistNotVarargs,
}

impl BadCode {
    pub(crate) fn type_mismatch(opcode: Opcode, found: TypeInfo) -> Self {
        BadCode::TypeMismatch { opcode, found }
    }
}

/// Why an inline candidate was not inlined.
#[derive(Display, Debug, Clone, Copy, PartialEq, Eq)]
pub enum InlineRejection {
    #[display("inline depth limit reached")]
    DepthLimit,
    #[display("recursive inline")]
    Recursive,
    #[display("virtual callee")]
    Virtual,
    #[display("callee has no IL body")]
    NoBody,
    #[display("callee has exception clauses")]
    HasEh,
    #[display("callee IL is {_0} bytes")]
    TooLarge(u32),
    #[display("too many arguments")]
    TooManyArgs,
    #[display("too many locals")]
    TooManyLocals,
    #[display("callee uses arglist")]
    ArgList,
    #[display("callee uses leave")]
    Leave,
    #[display("callee uses localloc")]
    LocAlloc,
    #[display("callee uses jmp")]
    Jmp,
    #[display("callee makes explicit tail calls")]
    ExplicitTailCall,
    #[display("callee has more than one basic block")]
    MultipleBlocks,
    #[display("callee does not return normally")]
    NoReturn,
    #[display("callee IL is malformed")]
    MalformedIl,
    #[display("statically null this")]
    NullThis,
    #[display("mkrefany argument")]
    RefAnyArg,
    #[display("address of a local passed to a re-aliased parameter")]
    AliasedAddress,
    #[display("inlinee stack growth over the limit")]
    StackGrowth,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_code_round_trips_through_error() {
        let err: ImportError = BadCode::EndFilterStackDepth(2).into();
        assert_eq!(err.bad_code(), Some(&BadCode::EndFilterStackDepth(2)));
        assert_eq!(
            err.to_string(),
            "bad code: endfilter with stack depth 2, expected 1"
        );
    }

    #[test]
    fn decode_errors_are_bad_code() {
        let err: ImportError = DecodeError::Truncated { offset: 3 }.into();
        assert!(matches!(err.bad_code(), Some(BadCode::Decode(_))));
    }

    #[test]
    fn inline_rejection_is_distinguishable() {
        let err: ImportError = InlineRejection::Recursive.into();
        assert_eq!(err.inline_rejection(), Some(InlineRejection::Recursive));
        assert!(err.bad_code().is_none());
    }
}
