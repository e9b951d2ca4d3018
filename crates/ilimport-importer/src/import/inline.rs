//! Inline expansion of small direct calls.
//!
//! A candidate is imported by a nested [`Importer`] sharing the caller's
//! IR context. Its arguments are bound to the caller's actual argument
//! trees where that is safe, and to temps otherwise. On success the
//! inlinee's statements are spliced in front of the call site and its
//! return value takes the call's place on the stack. A rejected candidate
//! leaves the caller's stack, statements, locals and blocks as they were.

use std::collections::{HashMap, VecDeque};

use cranelift_entity::SecondaryMap;
use ilimport_ir::{
    BlockRef, IrContext, JumpKind, LocalKind, LocalRef, MethodHandle, NodeKind, NodeRef, StackEntry,
    TypeInfo, UnaryOp, VarType,
};

use super::{ImportStats, Importer};
use crate::config::ImportConfig;
use crate::error::{BadCode, ImportError, ImportResult, InlineRejection};
use crate::flowgraph::{FlowGraph, IlScan};
use crate::resolver::{MethodIl, MethodInfo, Resolver, SigType};
use crate::stack::EvalStack;

/// How an inlinee argument is supplied.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum ArgBinding {
    /// An invariant tree, cloned at every use.
    Constant(NodeRef),
    /// A caller local read in place of the argument.
    Local(LocalRef),
    /// The address of a caller struct local.
    LocalAddr(LocalRef),
    /// Evaluated into a temp, created on first use.
    Temp(Option<LocalRef>),
}

#[derive(Clone, Debug)]
pub(super) struct InlineArg {
    /// The caller's argument tree, already coerced to the formal type.
    pub(super) actual: StackEntry,
    /// Stack type of the argument as the inlinee sees it.
    pub(super) info: TypeInfo,
    pub(super) binding: ArgBinding,
}

/// State shared between a caller and the nested session importing one
/// inline candidate.
#[derive(Clone, Debug, Default)]
pub(super) struct InlineFrame {
    pub(super) args: Vec<InlineArg>,
    /// Value left by the inlinee's `ret`.
    pub(super) ret: Option<StackEntry>,
}

/// Stack type the inlinee sees for an argument: the formal's, made more
/// precise by what the caller knows about the actual.
fn argument_info(formal: SigType, actual: TypeInfo) -> TypeInfo {
    match (formal.type_info(), actual) {
        (Some(TypeInfo::Ref(_)), TypeInfo::Ref(Some(class))) => TypeInfo::Ref(Some(class)),
        (Some(TypeInfo::Byref), TypeInfo::Ref(class)) => TypeInfo::Ref(class),
        (Some(info), _) => info,
        (None, _) => actual,
    }
}

impl<'a> Importer<'a> {
    #[allow(clippy::too_many_arguments)]
    fn inline_session(
        resolver: &'a dyn Resolver,
        config: &'a ImportConfig,
        ctx: &'a mut IrContext,
        method: MethodHandle,
        info: &'a MethodInfo,
        il: &'a MethodIl,
        flow: FlowGraph,
        frame: InlineFrame,
        inline_chain: Vec<MethodHandle>,
    ) -> ImportResult<Self> {
        let entry = flow.entry;
        let mut session = Self {
            resolver,
            config,
            ctx,
            method,
            info,
            il,
            flow,
            args: Vec::new(),
            il_locals: Vec::new(),
            local_infos: SecondaryMap::new(),
            stack: EvalStack::new(usize::from(il.body.max_stack)),
            pending: VecDeque::new(),
            block: entry,
            cur_offset: 0,
            leave_chains: HashMap::new(),
            inline: Some(frame),
            inline_chain,
            stats: ImportStats::default(),
        };
        session.declare_il_locals(|_| LocalKind::Temp("inlinee local"))?;
        Ok(session)
    }

    /// Import the inlinee's single block.
    fn run_inline(mut self) -> ImportResult<(InlineFrame, BlockRef, ImportStats)> {
        let entry = self.flow.entry;
        if self.flow.num_blocks() != 1 {
            return Err(InlineRejection::MultipleBlocks.into());
        }
        if self.ctx.block(entry).jump != JumpKind::Return {
            return Err(InlineRejection::NoReturn.into());
        }
        self.import_block(entry, Vec::new())?;
        let frame = self
            .inline
            .take()
            .ok_or_else(|| ImportError::internal("inline frame lost"))?;
        self.stats.uses_long |= self.stack.uses_long();
        self.stats.uses_float |= self.stack.uses_float();
        Ok((frame, entry, self.stats))
    }

    /// Try to expand a call in place. Returns `false` when the candidate
    /// was rejected and a call must be emitted instead.
    pub(super) fn try_inline(
        &mut self,
        callee: MethodHandle,
        info: &'a MethodInfo,
        args: &[StackEntry],
        direct: bool,
        is_callvirt: bool,
    ) -> ImportResult<bool> {
        let mark = self.ctx.mark();
        match self.inline_call(callee, info, args, direct, is_callvirt) {
            Ok(()) => {
                self.stats.inlined_calls += 1;
                tracing::debug!(caller = %self.method, %callee, "inlined call");
                Ok(true)
            }
            Err(err) => match err.inline_rejection() {
                Some(reason) => {
                    self.ctx.rollback(mark);
                    self.stats.inline_rejections += 1;
                    tracing::debug!(caller = %self.method, %callee, %reason, "inline rejected");
                    Ok(false)
                }
                None => Err(err),
            },
        }
    }

    fn inline_call(
        &mut self,
        callee: MethodHandle,
        info: &'a MethodInfo,
        args: &[StackEntry],
        direct: bool,
        is_callvirt: bool,
    ) -> ImportResult<()> {
        let config = self.config;
        let limits = &config.inline;
        if self.inline_chain.len() + 1 > limits.max_depth as usize {
            return Err(InlineRejection::DepthLimit.into());
        }
        if callee == self.method || self.inline_chain.contains(&callee) {
            return Err(InlineRejection::Recursive.into());
        }
        if !direct {
            return Err(InlineRejection::Virtual.into());
        }
        let resolver = self.resolver;
        let il = resolver.method_il(callee).ok_or(InlineRejection::NoBody)?;
        if !il.body.eh_clauses.is_empty() {
            return Err(InlineRejection::HasEh.into());
        }
        let size = il.body.code_size();
        if size > limits.max_il_size {
            return Err(InlineRejection::TooLarge(size).into());
        }
        if args.len() > limits.max_args {
            return Err(InlineRejection::TooManyArgs.into());
        }
        if il.locals.len() > limits.max_locals {
            return Err(InlineRejection::TooManyLocals.into());
        }
        if self.stack.depth() + usize::from(il.body.max_stack) > self.stack.limit() + limits.max_stack_growth {
            return Err(InlineRejection::StackGrowth.into());
        }

        let flow = FlowGraph::build(self.ctx, &il.body, true).map_err(malformed)?;
        let scan = &flow.scan;
        let rejection = if scan.has_arglist {
            Some(InlineRejection::ArgList)
        } else if scan.has_localloc {
            Some(InlineRejection::LocAlloc)
        } else if scan.has_leave {
            Some(InlineRejection::Leave)
        } else if scan.has_jmp {
            Some(InlineRejection::Jmp)
        } else if scan.has_tail_prefix {
            Some(InlineRejection::ExplicitTailCall)
        } else {
            None
        };
        if let Some(reason) = rejection {
            return Err(reason.into());
        }

        let frame = InlineFrame {
            args: self.bind_args(info, args, &flow.scan)?,
            ret: None,
        };
        let mut chain = self.inline_chain.clone();
        chain.push(self.method);
        let session = Importer::inline_session(resolver, config, &mut *self.ctx, callee, info, il, flow, frame, chain)?;
        let (frame, body, stats) = session.run_inline().map_err(malformed)?;
        self.stats.inlined_calls += stats.inlined_calls;
        self.stats.inline_rejections += stats.inline_rejections;
        self.stats.uses_long |= stats.uses_long;
        self.stats.uses_float |= stats.uses_float;
        self.splice_inlinee(frame, body, is_callvirt)
    }

    /// Classify each actual argument.
    fn bind_args(&mut self, info: &MethodInfo, args: &[StackEntry], scan: &IlScan) -> ImportResult<Vec<InlineArg>> {
        let mut formals = Vec::with_capacity(args.len());
        if info.sig.has_this {
            formals.push(self.this_type(info.owner)?);
        }
        formals.extend(info.sig.params.iter().copied());

        let mut bound = Vec::with_capacity(args.len());
        for (index, (&actual, formal)) in args.iter().zip(formals).enumerate() {
            let aliased = scan.arg_is_aliased(index as u16);
            let node = actual.node;
            let is_this = index == 0 && info.sig.has_this;
            let binding = match *self.ctx.kind(node) {
                _ if is_this && self.ctx.is_null_constant(node) => {
                    return Err(InlineRejection::NullThis.into());
                }
                NodeKind::MkRefAny(_) => return Err(InlineRejection::RefAnyArg.into()),
                NodeKind::LclAddr(_) if aliased => return Err(InlineRejection::AliasedAddress.into()),
                NodeKind::LclAddr(local) if self.ctx.local(local).ty == VarType::Struct => {
                    ArgBinding::LocalAddr(local)
                }
                _ if aliased => ArgBinding::Temp(None),
                NodeKind::IntCon(_) | NodeKind::DblCon(_) | NodeKind::StrCon(_) | NodeKind::Handle(_) => {
                    ArgBinding::Constant(node)
                }
                NodeKind::LclVar(local) if self.can_substitute(local, formal) => ArgBinding::Local(local),
                _ => ArgBinding::Temp(None),
            };
            bound.push(InlineArg {
                actual,
                info: argument_info(formal, actual.info),
                binding,
            });
        }
        Ok(bound)
    }

    /// Whether reads of an argument may be replaced by reads of `local`.
    fn can_substitute(&self, local: LocalRef, formal: SigType) -> bool {
        let desc = self.ctx.local(local);
        let formal_ty = formal.var_type(&self.config.target);
        !desc.address_exposed
            && desc.def_count <= 1
            && desc.ty.actual() == formal_ty.actual()
            && (desc.ty != VarType::Struct || desc.class == formal.class())
    }

    /// The temp backing an inlinee argument, created on first use.
    pub(super) fn inline_arg_local(&mut self, index: u16) -> ImportResult<LocalRef> {
        let target = self.config.target;
        let frame = self
            .inline
            .as_mut()
            .ok_or_else(|| ImportError::internal("not an inline session"))?;
        let arg = frame
            .args
            .get_mut(usize::from(index))
            .ok_or(BadCode::InvalidArg(index))?;
        match arg.binding {
            ArgBinding::Local(local) | ArgBinding::Temp(Some(local)) => Ok(local),
            ArgBinding::Constant(_) | ArgBinding::LocalAddr(_) | ArgBinding::Temp(None) => {
                let temp = self.ctx.grab_temp("inline arg", arg.info.var_type(&target));
                self.ctx.local_mut(temp).class = arg.info.class();
                self.local_infos[temp] = Some(arg.info);
                arg.binding = ArgBinding::Temp(Some(temp));
                Ok(temp)
            }
        }
    }

    /// Append the argument prologue and the inlinee body to the current
    /// block and push the inlinee's result.
    fn splice_inlinee(&mut self, frame: InlineFrame, body: BlockRef, is_callvirt: bool) -> ImportResult<()> {
        let depth = self.stack.depth();
        self.spill_side_effects(true, depth);
        for (index, arg) in frame.args.iter().enumerate() {
            let null_check = index == 0 && is_callvirt;
            let checked = match arg.binding {
                ArgBinding::Temp(Some(temp)) => {
                    let store = self.ctx.store_lcl(temp, arg.actual.node);
                    self.ctx.local_mut(temp).record_def();
                    self.link_stmt(store);
                    null_check.then(|| self.ctx.lcl_var(temp))
                }
                ArgBinding::Temp(None) if null_check => Some(arg.actual.node),
                ArgBinding::Temp(None) => {
                    if self.ctx.effects(arg.actual.node).has_side_effects() {
                        self.link_stmt(arg.actual.node);
                    }
                    None
                }
                ArgBinding::Local(local) if null_check => Some(self.ctx.lcl_var(local)),
                ArgBinding::Local(_) | ArgBinding::Constant(_) | ArgBinding::LocalAddr(_) => None,
            };
            if let Some(object) = checked {
                let check = self.node(NodeKind::Unary(UnaryOp::NullCheck), VarType::Void, [object]);
                self.link_stmt(check);
            }
        }
        for root in self.ctx.block_roots(body) {
            self.link_stmt(root);
        }
        if let Some(ret) = frame.ret {
            self.push(ret.node, ret.info)?;
        }
        Ok(())
    }
}

/// Bad code inside an inline candidate only rejects the candidate.
fn malformed(err: ImportError) -> ImportError {
    if err.bad_code().is_some() {
        tracing::debug!(error = %err, "inlinee is malformed");
        InlineRejection::MalformedIl.into()
    } else {
        err
    }
}

#[cfg(test)]
mod tests {
    use ilimport_ir::ClassHandle;

    use super::*;

    #[test]
    fn argument_info_keeps_precise_classes() {
        let derived = ClassHandle(7);
        assert_eq!(
            argument_info(SigType::Ref(None), TypeInfo::Ref(Some(derived))),
            TypeInfo::Ref(Some(derived))
        );
        assert_eq!(argument_info(SigType::I4, TypeInfo::Int32), TypeInfo::Int32);
        assert_eq!(argument_info(SigType::I8, TypeInfo::Int32), TypeInfo::Int64);
        assert_eq!(argument_info(SigType::Byref, TypeInfo::Ref(None)), TypeInfo::Ref(None));
    }
}
