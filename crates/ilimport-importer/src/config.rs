use ilimport_ir::TargetInfo;

/// Limits for the inliner.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InlineConfig {
    pub enabled: bool,
    /// Maximum nesting of inline sessions.
    pub max_depth: u32,
    /// Size of the argument binding table.
    pub max_args: usize,
    /// Size of the inlinee local table.
    pub max_locals: usize,
    /// Largest inlinee body, in IL bytes.
    pub max_il_size: u32,
    /// How far the caller's current depth plus the inlinee's declared
    /// maximum may exceed the caller's own maximum.
    pub max_stack_growth: usize,
}

impl Default for InlineConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_depth: 5,
            max_args: 16,
            max_locals: 32,
            max_il_size: 100,
            max_stack_growth: 16,
        }
    }
}

/// Configuration for importing one method.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImportConfig {
    pub target: TargetInfo,
    pub inline: InlineConfig,
    /// Fold `box`/`isinst`/`unbox.any` idioms.
    pub box_patterns: bool,
    /// Fold operations on literal operands.
    pub fold_constants: bool,
    /// Upper bound on imports of a single block; exceeding it is an
    /// internal error.
    pub max_reimports: u32,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            target: TargetInfo::default(),
            inline: InlineConfig::default(),
            box_patterns: true,
            fold_constants: true,
            max_reimports: 64,
        }
    }
}

impl ImportConfig {
    pub fn with_target(mut self, target: TargetInfo) -> Self {
        self.target = target;
        self
    }

    pub fn without_inlining(mut self) -> Self {
        self.inline.enabled = false;
        self
    }
}
