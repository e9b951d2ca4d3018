use crate::instruction::Token;

/// What kind of handler an exception clause installs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EhClauseKind {
    /// Typed catch; the token names the caught class.
    Catch(Token),
    /// Filter handler; the filter code starts at `filter_offset` and runs up
    /// to the handler start.
    Filter { filter_offset: u32 },
    Finally,
    Fault,
}

/// One entry of a method's exception clause table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EhClause {
    pub kind: EhClauseKind,
    pub try_offset: u32,
    pub try_length: u32,
    pub handler_offset: u32,
    pub handler_length: u32,
}

impl EhClause {
    pub fn try_end(&self) -> u32 {
        self.try_offset + self.try_length
    }

    pub fn handler_end(&self) -> u32 {
        self.handler_offset + self.handler_length
    }

    /// Start of the filter region, if this is a filter clause.
    pub fn filter_offset(&self) -> Option<u32> {
        match self.kind {
            EhClauseKind::Filter { filter_offset } => Some(filter_offset),
            _ => None,
        }
    }
}

/// Raw method body as handed over by the metadata layer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MethodBody {
    pub code: Vec<u8>,
    pub max_stack: u16,
    pub init_locals: bool,
    pub eh_clauses: Vec<EhClause>,
}

impl MethodBody {
    pub fn new(code: Vec<u8>, max_stack: u16) -> Self {
        Self {
            code,
            max_stack,
            init_locals: true,
            eh_clauses: Vec::new(),
        }
    }

    pub fn with_clause(mut self, clause: EhClause) -> Self {
        self.eh_clauses.push(clause);
        self
    }

    pub fn code_size(&self) -> u32 {
        self.code.len() as u32
    }
}
