//! The importer session.
//!
//! One [`Importer`] imports one method body (or, nested, one inline
//! candidate). It owns the evaluation stack and the pending-block queue and
//! threads them through the opcode handlers, which live in the submodules
//! grouped by concern.

mod arith;
mod calls;
mod clique;
mod coerce;
mod control;
mod eh;
pub(crate) mod fold;
mod inline;
mod locals;
mod memory;
mod objects;
mod patterns;
mod prefix;
mod spill;
mod stmts;
mod worklist;

use std::collections::{HashMap, VecDeque};

use cranelift_entity::SecondaryMap;
use ilimport_bytecode::{DecodeError, Decoder, Instruction, Opcode, Token};
use ilimport_ir::{
    BlockFlags, BlockRef, CallTarget, ClassHandle, EhRef, FieldHandle, Helper, IrContext,
    JumpKind, LocalDesc, LocalKind, LocalRef, MethodHandle, NodeKind, NodeRef, StackEntry,
    TypeInfo, VarType,
};

use crate::config::ImportConfig;
use crate::error::{BadCode, ImportError, ImportErrorKind, ImportResult};
use crate::flowgraph::FlowGraph;
use crate::resolver::{
    ClassInfo, FieldInfo, MethodIl, MethodInfo, ResolvedToken, Resolver, SigType, WellKnownClass,
};
use crate::stack::EvalStack;

pub use stmts::{Interference, check_interference};

use inline::InlineFrame;
use prefix::Prefixes;
use worklist::PendingEntry;

/// Counters collected while importing a method.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ImportStats {
    /// Block imports, reimports included.
    pub block_imports: u32,
    pub reimports: u32,
    pub verify_throws: u32,
    pub inlined_calls: u32,
    pub inline_rejections: u32,
    /// The method (inlinees included) pushes `int64` values.
    pub uses_long: bool,
    pub uses_float: bool,
}

pub(crate) struct Importer<'a> {
    resolver: &'a dyn Resolver,
    config: &'a ImportConfig,
    ctx: &'a mut IrContext,

    method: MethodHandle,
    info: &'a MethodInfo,
    il: &'a MethodIl,
    flow: FlowGraph,

    /// Argument locals, `this` first. Empty in an inline session, where
    /// arguments are bound through the inline frame.
    args: Vec<LocalRef>,
    il_locals: Vec<LocalRef>,
    /// Stack type of each local when read, where it differs from what the
    /// local's `VarType` alone says (native int, classes, function pointers).
    local_infos: SecondaryMap<LocalRef, Option<TypeInfo>>,

    stack: EvalStack,
    pending: VecDeque<PendingEntry>,
    /// Block being imported.
    block: BlockRef,
    /// IL offset of the instruction being imported.
    cur_offset: u32,
    /// Jump of a block leaving `region` for `target`, once its chain exists.
    leave_chains: HashMap<(EhRef, BlockRef), JumpKind>,

    inline: Option<InlineFrame>,
    /// Methods being imported around this session, outermost first.
    inline_chain: Vec<MethodHandle>,
    stats: ImportStats,
}

impl<'a> Importer<'a> {
    /// Set up a session for the root method of a compilation.
    pub(crate) fn new(
        resolver: &'a dyn Resolver,
        config: &'a ImportConfig,
        ctx: &'a mut IrContext,
        method: MethodHandle,
    ) -> ImportResult<Self> {
        let info = resolver
            .method_info(method)
            .ok_or(ImportErrorKind::UnknownMethod(method))?;
        let il = resolver
            .method_il(method)
            .ok_or(ImportErrorKind::MissingBody(method))?;
        let flow = FlowGraph::build(ctx, &il.body, false)?;
        let entry = flow.entry;
        let mut importer = Self {
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
            inline: None,
            inline_chain: Vec::new(),
            stats: ImportStats::default(),
        };
        importer.declare_args()?;
        importer.declare_il_locals(|index| LocalKind::Il(index))?;
        Ok(importer)
    }

    /// Import every reachable block.
    pub(crate) fn run(mut self) -> ImportResult<(BlockRef, ImportStats)> {
        let entry = self.flow.entry;
        self.enqueue(entry, Vec::new());
        self.drain_worklist()?;
        self.stats.uses_long |= self.stack.uses_long();
        self.stats.uses_float |= self.stack.uses_float();
        Ok((entry, self.stats))
    }

    // ========================================================================
    // Locals
    // ========================================================================

    fn declare_args(&mut self) -> ImportResult<()> {
        let mut types = Vec::with_capacity(self.info.sig.arg_count());
        if self.info.sig.has_this {
            types.push(self.this_type(self.info.owner)?);
        }
        types.extend(self.info.sig.params.iter().copied());
        for (index, ty) in types.into_iter().enumerate() {
            let index = index as u16;
            let l = self.new_typed_local(LocalKind::Arg(index), ty);
            if self.flow.scan.addressed_args.contains(&index) {
                self.ctx.local_mut(l).address_exposed = true;
            }
            self.args.push(l);
        }
        Ok(())
    }

    fn declare_il_locals(&mut self, kind: impl Fn(u16) -> LocalKind) -> ImportResult<()> {
        let il = self.il;
        for (index, &ty) in il.locals.iter().enumerate() {
            let index = index as u16;
            let l = self.new_typed_local(kind(index), ty);
            if self.flow.scan.addressed_locals.contains(&index) {
                self.ctx.local_mut(l).address_exposed = true;
            }
            self.il_locals.push(l);
        }
        Ok(())
    }

    fn new_typed_local(&mut self, kind: LocalKind, ty: SigType) -> LocalRef {
        let var_type = ty.var_type(&self.config.target);
        let l = self
            .ctx
            .new_local(LocalDesc::new(kind, var_type).with_class(ty.class()));
        self.local_infos[l] = ty.type_info();
        l
    }

    /// Signature type of `this` for a method of `owner`.
    fn this_type(&self, owner: ClassHandle) -> ImportResult<SigType> {
        Ok(if self.class_info(owner)?.is_value_type {
            SigType::Byref
        } else {
            SigType::Ref(Some(owner))
        })
    }

    /// Stack type of a read of `local`.
    fn local_info(&self, local: LocalRef) -> TypeInfo {
        self.local_infos[local].unwrap_or_else(|| {
            let desc = self.ctx.local(local);
            match (desc.ty, desc.class) {
                (VarType::Struct, Some(class)) => TypeInfo::Struct(class),
                (VarType::Ref, class) => TypeInfo::Ref(class),
                (ty, _) => TypeInfo::from_var_type(ty),
            }
        })
    }

    // ========================================================================
    // Stack helpers
    // ========================================================================

    fn push(&mut self, node: NodeRef, info: TypeInfo) -> ImportResult<()> {
        self.stack.push(node, info)?;
        Ok(())
    }

    fn pop(&mut self) -> ImportResult<StackEntry> {
        Ok(self.stack.pop()?)
    }

    fn pop_n(&mut self, n: usize) -> ImportResult<Vec<StackEntry>> {
        Ok(self.stack.pop_n(n)?)
    }

    fn node(&mut self, kind: NodeKind, ty: VarType, operands: impl IntoIterator<Item = NodeRef>) -> NodeRef {
        self.ctx.new_node(kind, ty, operands)
    }

    fn native_int(&self) -> VarType {
        self.config.target.native_int()
    }

    // ========================================================================
    // Resolver helpers
    // ========================================================================

    fn resolve(&self, token: Token) -> ImportResult<ResolvedToken> {
        self.resolver
            .resolve_token(self.method, token)
            .ok_or_else(|| BadCode::UnresolvedToken(token).into())
    }

    fn resolve_class(&self, token: Token) -> ImportResult<ClassHandle> {
        match self.resolve(token)? {
            ResolvedToken::Class(c) => Ok(c),
            _ => Err(BadCode::UnexpectedToken {
                token,
                expected: "class",
            }
            .into()),
        }
    }

    fn resolve_method(&self, token: Token) -> ImportResult<MethodHandle> {
        match self.resolve(token)? {
            ResolvedToken::Method(m) => Ok(m),
            _ => Err(BadCode::UnexpectedToken {
                token,
                expected: "method",
            }
            .into()),
        }
    }

    fn resolve_field(&self, token: Token) -> ImportResult<FieldHandle> {
        match self.resolve(token)? {
            ResolvedToken::Field(f) => Ok(f),
            _ => Err(BadCode::UnexpectedToken {
                token,
                expected: "field",
            }
            .into()),
        }
    }

    fn class_info(&self, class: ClassHandle) -> ImportResult<&'a ClassInfo> {
        let resolver = self.resolver;
        resolver
            .class_info(class)
            .ok_or_else(|| ImportError::internal(format!("{class} is unknown to the resolver")))
    }

    fn field_info(&self, field: FieldHandle) -> ImportResult<&'a FieldInfo> {
        let resolver = self.resolver;
        resolver
            .field_info(field)
            .ok_or_else(|| ImportError::internal(format!("{field} is unknown to the resolver")))
    }

    fn method_info(&self, method: MethodHandle) -> ImportResult<&'a MethodInfo> {
        let resolver = self.resolver;
        resolver
            .method_info(method)
            .ok_or_else(|| ImportErrorKind::UnknownMethod(method).into())
    }

    fn well_known(&self, which: WellKnownClass) -> ImportResult<ClassHandle> {
        self.resolver
            .well_known_class(which)
            .ok_or_else(|| BadCode::MissingWellKnown(which.name()).into())
    }

    /// Signature type of a value of `class`.
    fn class_sig(&self, class: ClassHandle) -> ImportResult<SigType> {
        Ok(self.class_info(class)?.sig_type(class))
    }

    // ========================================================================
    // Block import
    // ========================================================================

    /// Import one block from its entry state.
    fn import_block(&mut self, block: BlockRef, state: Vec<StackEntry>) -> ImportResult<()> {
        let count = {
            let data = self.ctx.block_mut(block);
            data.import_count += 1;
            data.import_count
        };
        if count > self.config.max_reimports {
            return Err(ImportError::internal(format!(
                "{block} imported {count} times without converging"
            )));
        }
        self.stats.block_imports += 1;
        if count > 1 {
            self.stats.reimports += 1;
        }
        tracing::debug!(block = %block, depth = state.len(), count, "importing block");

        self.block = block;
        self.cur_offset = self.ctx.block(block).il_range.start;
        self.ctx.clear_stmts(block);
        let state = match self.ctx.block(block).stack_temps_in {
            Some(base) => self.clique_entry_state(base, state.len()),
            None => state,
        };
        self.stack.restore(self.ctx, &state);

        match self.import_block_code(block) {
            Err(err) if err.bad_code().is_some() && self.inline.is_none() => {
                self.convert_to_throw(block, &err);
                Ok(())
            }
            other => other,
        }
    }

    fn import_block_code(&mut self, block: BlockRef) -> ImportResult<()> {
        if self.ctx.block(block).try_index.is_some() {
            self.enqueue_handlers(block)?;
        }
        // The caught exception is fetched exactly once, first thing.
        self.spill_special_side_effects();
        self.import_block_body(block)?;
        self.finish_block(block)
    }

    fn import_block_body(&mut self, block: BlockRef) -> ImportResult<()> {
        let range = self.ctx.block(block).il_range.clone();
        let (insns, decode_error) = decode_range(&self.il.body.code, range.start, range.end);
        let mut prefixes = Prefixes::default();
        let mut i = 0;
        while i < insns.len() {
            let insn = &insns[i];
            self.cur_offset = insn.offset;
            if insn.opcode.is_prefix() {
                prefixes.add(insn);
                i += 1;
                continue;
            }
            prefixes.validate(insn.opcode, insns.get(i + 1))?;
            let consumed = self.import_instruction(&insns, i, std::mem::take(&mut prefixes))?;
            i += consumed;
        }
        if let Some(prefix) = prefixes.last() {
            return Err(BadCode::DanglingPrefix(prefix).into());
        }
        if let Some(err) = decode_error {
            self.cur_offset = err.offset();
            return Err(err.into());
        }
        Ok(())
    }

    /// Replace a block that failed with bad code by a verification throw.
    fn convert_to_throw(&mut self, block: BlockRef, err: &ImportError) {
        tracing::warn!(block = %block, offset = self.cur_offset, error = %err, "converting block to verification throw");
        self.stats.verify_throws += 1;
        self.stack.clear();
        self.ctx.clear_stmts(block);
        let call = self.call_helper(Helper::VerificationFailure, VarType::Void, []);
        self.ctx.append_stmt(block, call, Some(self.cur_offset));
        self.ctx.set_jump(block, JumpKind::Throw);
        let data = self.ctx.block_mut(block);
        data.flags |= BlockFlags::IMPORTED | BlockFlags::VERIFY_THROW;
        data.exit_depth = None;
        data.stack_temps_out = None;
    }

    fn call_helper(
        &mut self,
        helper: Helper,
        ty: VarType,
        args: impl IntoIterator<Item = NodeRef>,
    ) -> NodeRef {
        self.node(
            NodeKind::Call {
                target: CallTarget::Helper(helper),
                tail: false,
            },
            ty,
            args,
        )
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    /// Import the instruction at `insns[i]` and return how many
    /// instructions were consumed (more than one when a pattern matched).
    fn import_instruction(
        &mut self,
        insns: &[Instruction],
        i: usize,
        prefixes: Prefixes,
    ) -> ImportResult<usize> {
        use Opcode::*;
        let insn = &insns[i];
        match insn.opcode {
            Nop => {}
            Break => self.import_break(),

            Ldarg0 | Ldarg1 | Ldarg2 | Ldarg3 | LdargS | Ldarg => self.import_ldarg(var_index(insn)?)?,
            LdargaS | Ldarga => self.import_ldarga(var_index(insn)?)?,
            StargS | Starg => self.import_starg(var_index(insn)?)?,
            Ldloc0 | Ldloc1 | Ldloc2 | Ldloc3 | LdlocS | Ldloc => self.import_ldloc(var_index(insn)?)?,
            LdlocaS | Ldloca => self.import_ldloca(var_index(insn)?)?,
            Stloc0 | Stloc1 | Stloc2 | Stloc3 | StlocS | Stloc => self.import_stloc(var_index(insn)?)?,

            Ldnull | LdcI4M1 | LdcI40 | LdcI41 | LdcI42 | LdcI43 | LdcI44 | LdcI45 | LdcI46
            | LdcI47 | LdcI48 | LdcI4S | LdcI4 | LdcI8 | LdcR4 | LdcR8 => self.import_constant(insn)?,
            Ldstr => self.import_ldstr(token(insn)?)?,
            Dup => self.import_dup()?,
            Pop => self.import_pop()?,

            Jmp => self.import_jmp(token(insn)?)?,
            Call | Callvirt => self.import_call(insn.opcode, token(insn)?, &prefixes)?,
            Calli => self.import_calli(token(insn)?, &prefixes)?,
            Newobj => self.import_newobj(token(insn)?)?,
            Ldftn => self.import_ldftn(token(insn)?, false)?,
            Ldvirtftn => self.import_ldftn(token(insn)?, true)?,
            Ret => self.import_ret()?,

            Br | BrS => {}
            Leave | LeaveS => self.import_leave(target(insn)?)?,
            BrfalseS | BrtrueS | BeqS | BgeS | BgtS | BleS | BltS | BneUnS | BgeUnS | BgtUnS
            | BleUnS | BltUnS | Brfalse | Brtrue | Beq | Bge | Bgt | Ble | Blt | BneUn | BgeUn
            | BgtUn | BleUn | BltUn => self.import_cond_branch(insn.opcode)?,
            Switch => self.import_switch()?,
            Throw => self.import_throw()?,
            Rethrow => self.import_rethrow()?,
            Endfinally => self.import_endfinally()?,
            Endfilter => self.import_endfilter()?,

            LdindI1 | LdindU1 | LdindI2 | LdindU2 | LdindI4 | LdindU4 | LdindI8 | LdindI
            | LdindR4 | LdindR8 | LdindRef => {
                self.import_ldind(insn.opcode, &prefixes)?
            }
            StindRef | StindI1 | StindI2 | StindI4 | StindI8 | StindR4 | StindR8 | StindI => {
                self.import_stind(insn.opcode, &prefixes)?
            }

            Add | Sub | Mul | Div | DivUn | Rem | RemUn | And | Or | Xor | Shl | Shr | ShrUn
            | AddOvf | AddOvfUn | MulOvf | MulOvfUn | SubOvf | SubOvfUn => {
                self.import_binary(insn.opcode)?
            }
            Neg | Not => self.import_unary(insn.opcode)?,
            Ckfinite => self.import_ckfinite()?,
            ConvI1 | ConvI2 | ConvI4 | ConvI8 | ConvR4 | ConvR8 | ConvU4 | ConvU8 | ConvRUn
            | ConvOvfI1Un | ConvOvfI2Un | ConvOvfI4Un | ConvOvfI8Un | ConvOvfU1Un | ConvOvfU2Un
            | ConvOvfU4Un | ConvOvfU8Un | ConvOvfIUn | ConvOvfUUn | ConvOvfI1 | ConvOvfU1
            | ConvOvfI2 | ConvOvfU2 | ConvOvfI4 | ConvOvfU4 | ConvOvfI8 | ConvOvfU8 | ConvU2
            | ConvU1 | ConvI | ConvOvfI | ConvOvfU | ConvU => self.import_conv(insn.opcode)?,
            Ceq | Cgt | CgtUn | Clt | CltUn => self.import_compare(insn.opcode)?,

            Ldfld | Ldflda => self.import_ldfld(token(insn)?, insn.opcode == Ldflda, &prefixes)?,
            Stfld => self.import_stfld(token(insn)?, &prefixes)?,
            Ldsfld | Ldsflda => self.import_ldsfld(token(insn)?, insn.opcode == Ldsflda, &prefixes)?,
            Stsfld => self.import_stsfld(token(insn)?, &prefixes)?,
            Ldobj => self.import_ldobj(token(insn)?, &prefixes)?,
            Stobj => self.import_stobj(token(insn)?, &prefixes)?,
            Cpobj => self.import_cpobj(token(insn)?)?,
            Initobj => self.import_initobj(token(insn)?)?,
            Cpblk => self.import_cpblk()?,
            Initblk => self.import_initblk()?,
            Localloc => self.import_localloc()?,
            Sizeof => self.import_sizeof(token(insn)?)?,

            Newarr => self.import_newarr(token(insn)?)?,
            Ldlen => self.import_ldlen()?,
            Ldelema => self.import_ldelema(token(insn)?)?,
            LdelemI1 | LdelemU1 | LdelemI2 | LdelemU2 | LdelemI4 | LdelemU4 | LdelemI8
            | LdelemI | LdelemR4 | LdelemR8 | LdelemRef => {
                self.import_ldelem(memory::element_type(insn.opcode))?
            }
            Ldelem => {
                let elem = self.class_sig(self.resolve_class(token(insn)?)?)?;
                self.import_ldelem(elem)?
            }
            StelemI | StelemI1 | StelemI2 | StelemI4 | StelemI8 | StelemR4 | StelemR8
            | StelemRef => self.import_stelem(memory::element_type(insn.opcode))?,
            Stelem => {
                let elem = self.class_sig(self.resolve_class(token(insn)?)?)?;
                self.import_stelem(elem)?
            }

            Box => return self.import_box(insns, i, token(insn)?),
            Unbox => self.import_unbox(token(insn)?)?,
            UnboxAny => self.import_unbox_any(token(insn)?)?,
            Castclass | Isinst => self.import_cast(insn.opcode, token(insn)?)?,
            Ldtoken => self.import_ldtoken(token(insn)?)?,
            Mkrefany => self.import_mkrefany(token(insn)?)?,
            Refanyval => self.import_refanyval(token(insn)?)?,
            Refanytype => self.import_refanytype()?,
            Arglist => self.import_arglist()?,

            Unaligned | Volatile | Tail | Constrained | No | Readonly => {
                return Err(ImportError::internal("prefix reached dispatch"));
            }
        }
        Ok(1)
    }

    fn import_break(&mut self) {
        let call = self.call_helper(Helper::Breakpoint, VarType::Void, []);
        let depth = self.stack.depth();
        self.append_stmt(call, depth);
    }
}

// ============================================================================
// Operand accessors
// ============================================================================

fn token(insn: &Instruction) -> ImportResult<Token> {
    insn.token()
        .ok_or_else(|| ImportError::internal(format!("{insn} has no token operand")))
}

fn target(insn: &Instruction) -> ImportResult<u32> {
    insn.target()
        .ok_or_else(|| ImportError::internal(format!("{insn} has no branch target")))
}

fn var_index(insn: &Instruction) -> ImportResult<u16> {
    insn.var_index()
        .ok_or_else(|| ImportError::internal(format!("{insn} has no variable index")))
}

/// Decode the instructions in `start..end`, stopping at the first
/// malformed one.
fn decode_range(code: &[u8], start: u32, end: u32) -> (Vec<Instruction>, Option<DecodeError>) {
    let mut decoder = Decoder::at(code, start);
    let mut insns = Vec::new();
    while decoder.offset() < end {
        match decoder.decode_next() {
            Some(Ok(insn)) => insns.push(insn),
            Some(Err(err)) => return (insns, Some(err)),
            None => break,
        }
    }
    (insns, None)
}

#[cfg(test)]
mod testing {
    use ilimport_bytecode::MethodBody;

    use super::*;
    use crate::resolver::MethodSig;
    use crate::table::MetadataTable;

    /// A table with one static `void Test(params)` whose body is `ret`.
    pub(super) fn single_method(params: Vec<SigType>) -> (MetadataTable, MethodHandle) {
        let mut table = MetadataTable::new();
        let object = table.object_class();
        let owner = table.add_class(ClassInfo {
            parent: Some(object),
            ..ClassInfo::reference("Program")
        });
        let method = table.add_method(MethodInfo {
            name: "Test".to_string(),
            owner,
            sig: MethodSig {
                has_this: false,
                params,
                ret: SigType::Void,
                is_varargs: false,
            },
            is_virtual: false,
            is_final: false,
            is_ctor: false,
        });
        let ret = Opcode::Ret.encoding() as u8;
        table.set_body(
            method,
            MethodIl {
                body: MethodBody::new(vec![ret], 4),
                locals: Vec::new(),
            },
        );
        (table, method)
    }
}
