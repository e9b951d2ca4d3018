//! CIL bytecode-to-IR importer.
//!
//! [`import_method`] runs the abstract stack interpreter over one method:
//! it builds the flow graph, imports every reachable block (reimporting
//! where spill cliques widen), lowers exception-handling control flow and
//! expands small direct calls inline. The result is an [`IrContext`]
//! holding ordered statement lists per block.

pub mod config;
pub mod error;
pub mod flowgraph;
mod import;
pub mod resolver;
pub mod stack;
pub mod table;

use ilimport_ir::{BlockRef, IrContext, MethodHandle, validation};

pub use config::{ImportConfig, InlineConfig};
pub use error::{BadCode, ImportError, ImportErrorKind, ImportResult, InlineRejection};
pub use flowgraph::{FlowGraph, IlScan};
pub use import::{ImportStats, Interference, check_interference};
pub use resolver::{
    ClassInfo, FieldInfo, MethodIl, MethodInfo, MethodSig, ResolvedToken, Resolver, SigType,
    TypeCompareState, WellKnownClass,
};
pub use stack::EvalStack;
pub use table::MetadataTable;

use import::Importer;

/// The IR of one imported method.
#[derive(Debug)]
pub struct ImportedMethod {
    pub ctx: IrContext,
    pub method: MethodHandle,
    pub entry: BlockRef,
    pub stats: ImportStats,
}

impl ImportedMethod {
    /// The method's blocks and statements as text.
    pub fn print(&self) -> String {
        ilimport_ir::printer::print_method(&self.ctx)
    }
}

/// Import `method`'s IL into a fresh IR context.
pub fn import_method(
    resolver: &dyn Resolver,
    method: MethodHandle,
    config: &ImportConfig,
) -> ImportResult<ImportedMethod> {
    let mut ctx = IrContext::new(config.target);
    let (entry, stats) = Importer::new(resolver, config, &mut ctx, method)?.run()?;
    validation::debug_assert_valid(&ctx, "import");
    tracing::debug!(
        %method,
        blocks = ctx.num_blocks(),
        reimports = stats.reimports,
        inlined = stats.inlined_calls,
        "imported method"
    );
    Ok(ImportedMethod {
        ctx,
        method,
        entry,
        stats,
    })
}
