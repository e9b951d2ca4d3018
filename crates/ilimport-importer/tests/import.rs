//! End-to-end importer tests: bytecode in, printed IR and block facts out.

mod common;

use common::{Fixture, block_at, body, roots};
use ilimport_bytecode::{EhClause, EhClauseKind, Opcode};
use ilimport_importer::{ClassInfo, ResolvedToken, SigType};
use ilimport_ir::printer::{print_block, print_locals, print_node};
use ilimport_ir::{BlockFlags, JumpKind, LocalKind, NodeKind, SideEffects, TargetInfo, TypeInfo, validation};
use insta::assert_snapshot;

#[test]
fn literal_arithmetic_folds_into_the_return() {
    let mut f = Fixture::new();
    let code = body(2, |b| {
        b.ldc_i4(5).ldc_i4(3).op(Opcode::Add)?.op(Opcode::Ret)?;
        Ok(())
    });
    let m = f.method("Eight", vec![], SigType::I4, code);
    let imported = f.import(m);
    assert_snapshot!(imported.print(), @r"
    BB0 [IL_0000..IL_0004) -> return
      (return (const int 8))
    ");
    assert_eq!(imported.stats.block_imports, 1);
    assert!(!imported.stats.uses_long);
    assert!(!imported.stats.uses_float);
}

#[test]
fn join_widens_to_native_int_and_reimports_the_narrow_side() {
    let mut f = Fixture::new();
    let code = body(1, |b| {
        let narrow = b.new_label();
        let join = b.new_label();
        b.ldarg(0).branch(Opcode::BrtrueS, narrow)?;
        b.ldarg(2).branch(Opcode::BrS, join)?;
        b.bind(narrow).ldarg(1);
        b.bind(join).op(Opcode::Ret)?;
        Ok(())
    });
    let m = f.method("Pick", vec![SigType::Bool, SigType::I4, SigType::I], SigType::I, code);
    let imported = f.import(m);
    let ctx = &imported.ctx;

    let (wide, narrow, join) = (block_at(&imported, 3), block_at(&imported, 6), block_at(&imported, 7));
    let temp = ctx.block(wide).stack_temps_out.expect("wide side spills");
    assert_eq!(ctx.block(narrow).stack_temps_out, Some(temp));
    assert_eq!(ctx.block(join).stack_temps_in, Some(temp));
    assert_eq!(ctx.local(temp).ty, TargetInfo::X64.native_int());

    assert_eq!(ctx.block(narrow).import_count, 2);
    assert_eq!(ctx.block(wide).import_count, 1);
    assert_eq!(ctx.block(join).import_count, 1);
    assert_eq!(imported.stats.reimports, 1);
    assert!(validation::validate(ctx).is_ok());
}

#[test]
fn unchanged_clique_value_is_not_stored_again() {
    let mut f = Fixture::new();
    let code = body(2, |b| {
        let top = b.new_label();
        b.ldarg(0);
        b.bind(top).ldarg(1).branch(Opcode::BrtrueS, top)?;
        b.op(Opcode::Ret)?;
        Ok(())
    });
    let m = f.method("Spin", vec![SigType::I4, SigType::Bool], SigType::I4, code);
    let imported = f.import(m);
    let ctx = &imported.ctx;

    let (entry, looped) = (block_at(&imported, 0), block_at(&imported, 1));
    let temp = ctx.block(entry).stack_temps_out.expect("entry spills");
    assert_eq!(ctx.block(looped).stack_temps_in, Some(temp));
    let loop_roots = roots(&imported, looped);
    assert_eq!(loop_roots.len(), 1);
    assert_eq!(*ctx.kind(loop_roots[0]), NodeKind::JTrue);
    assert_eq!(ctx.local(temp).def_count, 1);
    assert_eq!(imported.stats.reimports, 0);
}

#[test]
fn mismatched_join_depth_becomes_a_verification_throw() {
    let mut f = Fixture::new();
    let code = body(1, |b| {
        let join = b.new_label();
        b.ldarg(0).branch(Opcode::BrtrueS, join)?;
        b.ldc_i4(1);
        b.bind(join).op(Opcode::Ret)?;
        Ok(())
    });
    let m = f.method("Uneven", vec![SigType::Bool], SigType::Void, code);
    let imported = f.import(m);
    let ctx = &imported.ctx;

    let bad = block_at(&imported, 3);
    assert!(ctx.block(bad).flags.contains(BlockFlags::VERIFY_THROW));
    assert_eq!(ctx.block(bad).jump, JumpKind::Throw);
    assert_eq!(imported.stats.verify_throws, 1);
    assert!(!ctx.block(block_at(&imported, 4)).flags.contains(BlockFlags::VERIFY_THROW));
}

#[test]
fn box_then_unbox_any_of_the_same_type_disappears() {
    let mut f = Fixture::new();
    let int32 = f.int32_class();
    let tok = f.class_token(int32);
    let code = body(1, |b| {
        b.ldarg(0)
            .op_token(Opcode::Box, tok)?
            .op_token(Opcode::UnboxAny, tok)?
            .op(Opcode::Ret)?;
        Ok(())
    });
    let m = f.method("Identity", vec![SigType::I4], SigType::I4, code);
    let imported = f.import(m);
    assert_snapshot!(imported.print(), @r"
    BB0 [IL_0000..IL_000C) -> return
      (return V0)
    ");
}

#[test]
fn box_isinst_branch_folds_by_cast_answer() {
    let mut f = Fixture::new();
    let int32 = f.int32_class();
    let object = f.table.object_class();
    let unrelated = f.class("Unrelated");
    let int_tok = f.class_token(int32);
    let object_tok = f.class_token(object);
    let unrelated_tok = f.class_token(unrelated);
    let test = |to| {
        body(1, move |b| {
            let yes = b.new_label();
            b.ldarg(0)
                .op_token(Opcode::Box, int_tok)?
                .op_token(Opcode::Isinst, to)?
                .branch(Opcode::BrtrueS, yes)?;
            b.ldc_i4(0).op(Opcode::Ret)?;
            b.bind(yes).ldc_i4(1).op(Opcode::Ret)?;
            Ok(())
        })
    };

    let always = f.method("IsObject", vec![SigType::I4], SigType::I4, test(object_tok));
    assert_snapshot!(f.import(always).print(), @r"
    BB0 [IL_0000..IL_000D) -> always BB2
    BB1 [IL_000D..IL_000F) -> return
    BB2 [IL_000F..IL_0011) -> return
      (return (const int 1))
    ");

    let never = f.method("IsUnrelated", vec![SigType::I4], SigType::I4, test(unrelated_tok));
    assert_snapshot!(f.import(never).print(), @r"
    BB0 [IL_0000..IL_000D) -> next BB1
    BB1 [IL_000D..IL_000F) -> return
      (return (const int 0))
    BB2 [IL_000F..IL_0011) -> return
    ");
}

#[test]
fn box_isinst_unbox_any_round_trip_disappears() {
    let mut f = Fixture::new();
    let int32 = f.int32_class();
    let object = f.table.object_class();
    let int_tok = f.class_token(int32);
    let object_tok = f.class_token(object);
    let code = body(1, |b| {
        b.ldarg(0)
            .op_token(Opcode::Box, int_tok)?
            .op_token(Opcode::Isinst, object_tok)?
            .op_token(Opcode::UnboxAny, int_tok)?
            .op(Opcode::Ret)?;
        Ok(())
    });
    let m = f.method("Roundabout", vec![SigType::I4], SigType::I4, code);
    assert_snapshot!(f.import(m).print(), @r"
    BB0 [IL_0000..IL_0011) -> return
      (return V0)
    ");
}

#[test]
fn boxed_value_compared_to_null_is_true() {
    let mut f = Fixture::new();
    let int32 = f.int32_class();
    let tok = f.class_token(int32);
    let code = body(2, |b| {
        b.ldarg(0)
            .op_token(Opcode::Box, tok)?
            .op(Opcode::Ldnull)?
            .op(Opcode::CgtUn)?
            .op(Opcode::Ret)?;
        Ok(())
    });
    let m = f.method("NotNull", vec![SigType::I4], SigType::I4, code);
    assert_snapshot!(f.import(m).print(), @r"
    BB0 [IL_0000..IL_000A) -> return
      (return (const int 1))
    ");
}

#[test]
fn box_patterns_can_be_disabled() {
    let mut f = Fixture::new();
    let int32 = f.int32_class();
    let tok = f.class_token(int32);
    let code = body(1, |b| {
        b.ldarg(0)
            .op_token(Opcode::Box, tok)?
            .op_token(Opcode::UnboxAny, tok)?
            .op(Opcode::Ret)?;
        Ok(())
    });
    let m = f.method("Identity", vec![SigType::I4], SigType::I4, code);
    let mut config = common::config();
    config.box_patterns = false;
    let imported = f.import_with(m, &config);
    assert!(imported.print().contains("helper new_object"));
}

fn leave_through_catch_and_finally(f: &mut Fixture) -> ilimport_ir::MethodHandle {
    let exception = f.class("MyException");
    let tok = f.class_token(exception);
    let code = body(1, |b| {
        let end = b.new_label();
        b.branch(Opcode::LeaveS, end)?;
        b.op(Opcode::Pop)?.branch(Opcode::LeaveS, end)?;
        b.op(Opcode::Endfinally)?;
        b.bind(end).op(Opcode::Ret)?;
        Ok(())
    })
    .with_clause(EhClause {
        kind: EhClauseKind::Catch(tok),
        try_offset: 0,
        try_length: 2,
        handler_offset: 2,
        handler_length: 3,
    })
    .with_clause(EhClause {
        kind: EhClauseKind::Finally,
        try_offset: 0,
        try_length: 5,
        handler_offset: 5,
        handler_length: 1,
    });
    f.method("Guarded", vec![], SigType::Void, code)
}

#[test]
fn leave_runs_the_finally_through_a_call_chain() {
    let mut f = Fixture::new();
    let m = leave_through_catch_and_finally(&mut f);
    let imported = f.import(m);
    let ctx = &imported.ctx;
    let (try_block, catch, finally, end) = (
        block_at(&imported, 0),
        block_at(&imported, 2),
        block_at(&imported, 5),
        block_at(&imported, 6),
    );

    let JumpKind::Always(call) = ctx.block(try_block).jump else {
        panic!("try block should jump to its call-finally block");
    };
    let JumpKind::CallFinally { finally: f1, continuation } = ctx.block(call).jump else {
        panic!("expected a call-finally block");
    };
    assert_eq!(f1, finally);
    assert!(ctx.block(call).flags.contains(BlockFlags::INTERNAL));
    assert_eq!(ctx.block(continuation).jump, JumpKind::Always(end));

    // The catch exits through its own chain, ending the catch first.
    let JumpKind::CatchRet(call) = ctx.block(catch).jump else {
        panic!("catch should end with a catch return");
    };
    let JumpKind::CallFinally { finally: f2, continuation } = ctx.block(call).jump else {
        panic!("expected a call-finally block");
    };
    assert_eq!(f2, finally);
    assert_eq!(ctx.block(continuation).jump, JumpKind::Always(end));
    assert_eq!(ctx.block(finally).jump, JumpKind::EndFinally);
}

#[test]
fn catch_handler_receives_a_typed_exception() {
    let mut f = Fixture::new();
    let m = leave_through_catch_and_finally(&mut f);
    let exception = f.table.class_by_name("MyException").unwrap();
    let imported = f.import(m);
    let ctx = &imported.ctx;
    let catch = block_at(&imported, 2);

    let state = ctx.block(catch).entry_state.as_ref().unwrap();
    assert_eq!(state.len(), 1);
    assert_eq!(state[0].info, TypeInfo::Ref(Some(exception)));
    let arg = ctx.node(state[0].node);
    assert_eq!(arg.kind, NodeKind::CatchArg);
    assert_eq!(arg.class, Some(exception));

    let stmts = roots(&imported, catch);
    assert_eq!(print_node(ctx, stmts[0]), "(store V0 (catch.arg))");
}

#[test]
fn endfilter_with_extra_values_is_bad_code() {
    let mut f = Fixture::new();
    let code = body(3, |b| {
        let end = b.new_label();
        b.branch(Opcode::LeaveS, end)?;
        b.op(Opcode::Pop)?;
        b.ldc_i4(1).ldc_i4(1).op(Opcode::Endfilter)?;
        b.op(Opcode::Pop)?.branch(Opcode::LeaveS, end)?;
        b.bind(end).op(Opcode::Ret)?;
        Ok(())
    })
    .with_clause(EhClause {
        kind: EhClauseKind::Filter { filter_offset: 2 },
        try_offset: 0,
        try_length: 2,
        handler_offset: 7,
        handler_length: 3,
    });
    let m = f.method("Filtered", vec![], SigType::Void, code);
    let imported = f.import(m);
    let ctx = &imported.ctx;

    let filter = block_at(&imported, 2);
    assert!(ctx.block(filter).flags.contains(BlockFlags::VERIFY_THROW));
    assert_eq!(ctx.block(filter).jump, JumpKind::Throw);
    assert_eq!(imported.stats.verify_throws, 1);
    // The handler itself is unaffected.
    let handler = block_at(&imported, 7);
    assert_eq!(ctx.block(handler).jump, JumpKind::CatchRet(block_at(&imported, 10)));
}

#[test]
fn endfinally_with_a_value_on_the_stack_is_bad_code() {
    let mut f = Fixture::new();
    let code = body(1, |b| {
        let end = b.new_label();
        b.branch(Opcode::LeaveS, end)?;
        b.ldc_i4(1).op(Opcode::Endfinally)?;
        b.bind(end).op(Opcode::Ret)?;
        Ok(())
    })
    .with_clause(EhClause {
        kind: EhClauseKind::Finally,
        try_offset: 0,
        try_length: 2,
        handler_offset: 2,
        handler_length: 2,
    });
    let m = f.method("LeakyFinally", vec![], SigType::Void, code);
    let imported = f.import(m);
    let finally = block_at(&imported, 2);
    assert!(imported.ctx.block(finally).flags.contains(BlockFlags::VERIFY_THROW));
    assert_eq!(imported.stats.verify_throws, 1);
}

#[test]
fn handler_entered_by_a_branch_reads_a_spilled_exception() {
    let mut f = Fixture::new();
    let exception = f.class("MyException");
    let tok = f.class_token(exception);
    let code = body(1, |b| {
        let handler = b.new_label();
        let done = b.new_label();
        let end = b.new_label();
        b.branch(Opcode::LeaveS, end)?;
        b.bind(handler).op(Opcode::Pop)?;
        b.ldarg(0).branch(Opcode::BrfalseS, done)?;
        b.op(Opcode::Ldnull)?.branch(Opcode::BrS, handler)?;
        b.bind(done).branch(Opcode::LeaveS, end)?;
        b.bind(end).op(Opcode::Ret)?;
        Ok(())
    })
    .with_clause(EhClause {
        kind: EhClauseKind::Catch(tok),
        try_offset: 0,
        try_length: 2,
        handler_offset: 2,
        handler_length: 9,
    });
    let m = f.method("Retry", vec![SigType::Bool], SigType::Void, code);
    let imported = f.import(m);
    let ctx = &imported.ctx;

    let handler = block_at(&imported, 2);
    let spill = ctx
        .layout()
        .iter()
        .copied()
        .find(|&b| ctx.block(b).flags.contains(BlockFlags::CATCH_ARG_SPILL))
        .expect("catch argument spill block");
    assert_eq!(ctx.block(spill).jump, JumpKind::Next(handler));
    assert!(ctx.block(spill).flags.contains(BlockFlags::HANDLER_ENTRY));
    assert!(!ctx.block(handler).flags.contains(BlockFlags::HANDLER_ENTRY));

    let temp = ctx.block(handler).stack_temps_in.expect("handler reads a temp");
    assert_eq!(ctx.block(spill).stack_temps_out, Some(temp));
    assert_eq!(ctx.local(temp).class, Some(exception));
    let stmts = roots(&imported, spill);
    assert_eq!(stmts.len(), 1);
    assert_eq!(print_node(ctx, stmts[0]), format!("(store {temp} (catch.arg))"));
}

#[test]
fn leaves_to_the_same_target_share_one_finally_chain() {
    let mut f = Fixture::new();
    let code = body(1, |b| {
        let other = b.new_label();
        let end = b.new_label();
        b.ldarg(0).branch(Opcode::BrfalseS, other)?;
        b.branch(Opcode::LeaveS, end)?;
        b.bind(other).branch(Opcode::LeaveS, end)?;
        b.op(Opcode::Endfinally)?;
        b.bind(end).op(Opcode::Ret)?;
        Ok(())
    })
    .with_clause(EhClause {
        kind: EhClauseKind::Finally,
        try_offset: 0,
        try_length: 7,
        handler_offset: 7,
        handler_length: 1,
    });
    let m = f.method("TwoExits", vec![SigType::Bool], SigType::Void, code);
    let imported = f.import(m);
    let ctx = &imported.ctx;

    let (first, second) = (block_at(&imported, 3), block_at(&imported, 5));
    let JumpKind::Always(call) = ctx.block(first).jump else {
        panic!("leave should jump to its call-finally block");
    };
    assert_eq!(ctx.block(second).jump, JumpKind::Always(call));
    assert!(matches!(ctx.block(call).jump, JumpKind::CallFinally { .. }));
    assert_eq!(ctx.block(call).preds.len(), 2);
    let chains = ctx
        .layout()
        .iter()
        .filter(|&&b| matches!(ctx.block(b).jump, JumpKind::CallFinally { .. }))
        .count();
    assert_eq!(chains, 1);
}

#[test]
fn values_carried_into_a_try_are_bad_code() {
    let mut f = Fixture::new();
    let code = body(1, |b| {
        let end = b.new_label();
        b.ldc_i4(1);
        b.op(Opcode::Pop)?.branch(Opcode::LeaveS, end)?;
        b.op(Opcode::Endfinally)?;
        b.bind(end).op(Opcode::Ret)?;
        Ok(())
    })
    .with_clause(EhClause {
        kind: EhClauseKind::Finally,
        try_offset: 1,
        try_length: 3,
        handler_offset: 4,
        handler_length: 1,
    });
    let m = f.method("Carried", vec![], SigType::Void, code);
    let imported = f.import(m);
    let ctx = &imported.ctx;

    let before = block_at(&imported, 0);
    assert!(ctx.block(before).flags.contains(BlockFlags::VERIFY_THROW));
    assert_eq!(ctx.block(before).jump, JumpKind::Throw);
    assert_eq!(imported.stats.verify_throws, 1);
}

#[test]
fn struct_field_read_exposes_the_local() {
    let mut f = Fixture::new();
    let object = f.table.object_class();
    let pair = f.table.add_class(ClassInfo {
        parent: Some(object),
        ..ClassInfo::value_type("Pair", 8)
    });
    let (_, first) = f.field(pair, "First", SigType::I4);
    let m = f.declare("ReadFirst", vec![], SigType::I4);
    let code = body(1, |b| {
        b.ldloc(0).op_token(Opcode::Ldfld, first)?.op(Opcode::Ret)?;
        Ok(())
    });
    f.set_body(m, code, vec![SigType::ValueType(pair)]);
    let mut imported = f.import(m);

    let local = imported
        .ctx
        .locals()
        .find(|(_, desc)| desc.kind == LocalKind::Il(0))
        .map(|(l, _)| l)
        .expect("IL local");
    assert!(imported.ctx.local(local).address_exposed);
    let read = imported.ctx.lcl_var(local);
    assert!(imported.ctx.effects(read).contains(SideEffects::GLOB_REF));
}

#[test]
fn small_static_call_is_inlined_with_constant_arguments() {
    let mut f = Fixture::new();
    let add = f.method(
        "Add",
        vec![SigType::I4, SigType::I4],
        SigType::I4,
        body(2, |b| {
            b.ldarg(0).ldarg(1).op(Opcode::Add)?.op(Opcode::Ret)?;
            Ok(())
        }),
    );
    let tok = f.method_token(add);
    let caller = f.method(
        "Five",
        vec![],
        SigType::I4,
        body(2, |b| {
            b.ldc_i4(2).ldc_i4(3).op_token(Opcode::Call, tok)?.op(Opcode::Ret)?;
            Ok(())
        }),
    );
    let imported = f.import(caller);
    assert_snapshot!(imported.print(), @r"
    BB0 [IL_0000..IL_0008) -> return
      (return (const int 5))
    ");
    assert_eq!(imported.stats.inlined_calls, 1);
    assert_eq!(imported.stats.inline_rejections, 0);

    let plain = f.import_with(caller, &common::config().without_inlining());
    assert!(print_block(&plain.ctx, plain.entry).contains("(call "));
    assert_eq!(plain.stats.inlined_calls, 0);
}

#[test]
fn recursive_call_is_not_inlined() {
    let mut f = Fixture::new();
    let m = f.declare("Loop", vec![SigType::I4], SigType::I4);
    let tok = f.token(ResolvedToken::Method(m));
    f.set_body(
        m,
        body(1, |b| {
            b.ldarg(0).op_token(Opcode::Call, tok)?.op(Opcode::Ret)?;
            Ok(())
        }),
        vec![],
    );
    let imported = f.import(m);
    assert_eq!(imported.stats.inline_rejections, 1);
    assert_eq!(imported.stats.inlined_calls, 0);
    assert!(imported.print().contains("(return (call "));
}

#[test]
fn rejected_inline_leaves_no_locals_or_blocks_behind() {
    let mut f = Fixture::new();
    let pick = f.declare("Pick", vec![SigType::Bool], SigType::I4);
    f.set_body(
        pick,
        body(1, |b| {
            let one = b.new_label();
            b.ldarg(0).branch(Opcode::BrtrueS, one)?;
            b.ldc_i4(0).op(Opcode::Ret)?;
            b.bind(one).ldc_i4(1).op(Opcode::Ret)?;
            Ok(())
        }),
        vec![SigType::I4],
    );
    let broken = f.method(
        "Broken",
        vec![SigType::I4],
        SigType::I4,
        body(2, |b| {
            b.ldarg(0).op(Opcode::Ldnull)?.op(Opcode::Add)?.op(Opcode::Ret)?;
            Ok(())
        }),
    );
    let (pick_tok, broken_tok) = (f.method_token(pick), f.method_token(broken));

    // Rejected after its blocks and local were created.
    let branchy = f.method(
        "CallsPick",
        vec![SigType::Bool],
        SigType::I4,
        body(1, |b| {
            b.ldarg(0).op_token(Opcode::Call, pick_tok)?.op(Opcode::Ret)?;
            Ok(())
        }),
    );
    // Rejected after its argument temp was created.
    let malformed = f.method(
        "CallsBroken",
        vec![SigType::I4, SigType::I4],
        SigType::I4,
        body(2, |b| {
            b.ldarg(0)
                .ldarg(1)
                .op(Opcode::Add)?
                .op_token(Opcode::Call, broken_tok)?
                .op(Opcode::Ret)?;
            Ok(())
        }),
    );

    for caller in [branchy, malformed] {
        let tried = f.import(caller);
        let plain = f.import_with(caller, &common::config().without_inlining());
        assert_eq!(tried.stats.inline_rejections, 1);
        assert_eq!(tried.stats.inlined_calls, 0);
        assert_eq!(print_locals(&tried.ctx), print_locals(&plain.ctx));
        assert_eq!(tried.ctx.num_blocks(), plain.ctx.num_blocks());
        assert_eq!(tried.print(), plain.print());
    }
}

#[test]
fn local_arguments_are_read_in_place() {
    let mut f = Fixture::new();
    let twice = f.method(
        "Twice",
        vec![SigType::I4],
        SigType::I4,
        body(2, |b| {
            b.ldarg(0).ldarg(0).op(Opcode::Add)?.op(Opcode::Ret)?;
            Ok(())
        }),
    );
    let tok = f.method_token(twice);
    let caller = f.method(
        "Double",
        vec![SigType::I4],
        SigType::I4,
        body(1, |b| {
            b.ldarg(0).op_token(Opcode::Call, tok)?.op(Opcode::Ret)?;
            Ok(())
        }),
    );
    let imported = f.import(caller);
    assert_eq!(imported.stats.inlined_calls, 1);
    assert_eq!(imported.ctx.num_locals(), 1);
    assert!(imported.print().contains(" V0 V0)"));
}

#[test]
fn struct_address_arguments_are_substituted() {
    let mut f = Fixture::new();
    let object = f.table.object_class();
    let pair = f.table.add_class(ClassInfo {
        parent: Some(object),
        ..ClassInfo::value_type("Pair", 8)
    });
    let (_, first) = f.field(pair, "First", SigType::I4);
    let get = f.method(
        "GetFirst",
        vec![SigType::Byref],
        SigType::I4,
        body(1, |b| {
            b.ldarg(0).op_token(Opcode::Ldfld, first)?.op(Opcode::Ret)?;
            Ok(())
        }),
    );
    let tok = f.method_token(get);
    let caller = f.declare("ReadPair", vec![], SigType::I4);
    let code = body(1, |b| {
        b.op_int(Opcode::LdlocaS, 0)?.op_token(Opcode::Call, tok)?.op(Opcode::Ret)?;
        Ok(())
    });
    f.set_body(caller, code, vec![SigType::ValueType(pair)]);
    let imported = f.import(caller);
    assert_eq!(imported.stats.inlined_calls, 1);
    // No temp stands in for the argument.
    assert_eq!(imported.ctx.num_locals(), 1);
    assert!(!imported.print().contains("(call "));
}

#[test]
fn null_this_blocks_inlining() {
    let mut f = Fixture::new();
    let get = f.instance(
        "Get",
        vec![],
        SigType::I4,
        body(1, |b| {
            b.ldc_i4(1).op(Opcode::Ret)?;
            Ok(())
        }),
    );
    let tok = f.method_token(get);
    let on_null = f.method(
        "OnNull",
        vec![],
        SigType::I4,
        body(1, |b| {
            b.op(Opcode::Ldnull)?.op_token(Opcode::Call, tok)?.op(Opcode::Ret)?;
            Ok(())
        }),
    );
    let imported = f.import(on_null);
    assert_eq!(imported.stats.inline_rejections, 1);
    assert!(imported.print().contains("(call "));

    let program = f.program;
    let on_arg = f.method(
        "OnArg",
        vec![SigType::Ref(Some(program))],
        SigType::I4,
        body(1, |b| {
            b.ldarg(0).op_token(Opcode::Call, tok)?.op(Opcode::Ret)?;
            Ok(())
        }),
    );
    assert_eq!(f.import(on_arg).stats.inlined_calls, 1);
}

#[test]
fn typed_reference_arguments_block_inlining() {
    let mut f = Fixture::new();
    let int32 = f.int32_class();
    let int_tok = f.class_token(int32);
    let typed_ref = f.table.class_by_name("System.TypedReference").unwrap();
    let take = f.method(
        "Take",
        vec![SigType::ValueType(typed_ref)],
        SigType::I4,
        body(1, |b| {
            b.ldc_i4(0).op(Opcode::Ret)?;
            Ok(())
        }),
    );
    let tok = f.method_token(take);
    let caller = f.declare("PassRef", vec![], SigType::I4);
    let code = body(1, |b| {
        b.op_int(Opcode::LdlocaS, 0)?
            .op_token(Opcode::Mkrefany, int_tok)?
            .op_token(Opcode::Call, tok)?
            .op(Opcode::Ret)?;
        Ok(())
    });
    f.set_body(caller, code, vec![SigType::I4]);
    let imported = f.import(caller);
    assert_eq!(imported.stats.inline_rejections, 1);
    assert!(imported.print().contains("(call "));
}

#[test]
fn address_of_an_aliased_argument_blocks_inlining() {
    let mut f = Fixture::new();
    let poke = f.method(
        "Poke",
        vec![SigType::Byref],
        SigType::Void,
        body(1, |b| {
            b.op_int(Opcode::LdargaS, 0)?.op(Opcode::Pop)?.op(Opcode::Ret)?;
            Ok(())
        }),
    );
    let peek = f.method(
        "Peek",
        vec![SigType::Byref],
        SigType::Void,
        body(1, |b| {
            b.ldarg(0).op(Opcode::Pop)?.op(Opcode::Ret)?;
            Ok(())
        }),
    );
    let caller = |f: &mut Fixture, name: &str, callee| {
        let tok = f.method_token(callee);
        let m = f.declare(name, vec![], SigType::Void);
        let code = body(1, |b| {
            b.op_int(Opcode::LdlocaS, 0)?.op_token(Opcode::Call, tok)?.op(Opcode::Ret)?;
            Ok(())
        });
        f.set_body(m, code, vec![SigType::I4]);
        m
    };

    let aliased = caller(&mut f, "CallsPoke", poke);
    let imported = f.import(aliased);
    assert_eq!(imported.stats.inline_rejections, 1);
    assert!(imported.print().contains("(call "));

    let plain = caller(&mut f, "CallsPeek", peek);
    assert_eq!(f.import(plain).stats.inlined_calls, 1);
}
