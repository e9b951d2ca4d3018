//! JSON modules loaded from disk and imported end to end.

use ilimport::{LoadError, Module, disassemble};
use ilimport_importer::{ImportConfig, ImportedMethod, Resolver, import_method};
use ilimport_ir::{BlockFlags, BlockRef, JumpKind, TargetInfo};
use insta::assert_snapshot;

fn load(json: &str) -> Module {
    Module::from_json(json).expect("module failed to load")
}

fn config() -> ImportConfig {
    ImportConfig::default().with_target(TargetInfo::X64)
}

fn import(module: &Module, name: &str, config: &ImportConfig) -> ImportedMethod {
    let method = module.method(name).expect("no such method");
    import_method(&module.table, method, config).expect("import failed")
}

fn block_at(imported: &ImportedMethod, offset: u32) -> BlockRef {
    imported
        .ctx
        .layout()
        .iter()
        .copied()
        .find(|&b| {
            let data = imported.ctx.block(b);
            data.il_range.start == offset && !data.il_range.is_empty()
        })
        .unwrap_or_else(|| panic!("no block at IL_{offset:04X}"))
}

#[test]
fn methods_with_bodies_keep_file_order() {
    let module = load(include_str!("../modules/arith.json"));
    let names: Vec<&str> = module
        .methods_with_bodies()
        .map(|m| module.method_name(m))
        .collect();
    assert_eq!(names, ["Add", "Five", "Seven"]);
    assert_eq!(module.methods.len(), 4);
}

#[test]
fn mnemonic_call_is_assembled_and_inlined() {
    let module = load(include_str!("../modules/arith.json"));
    let five = module.method("Five").unwrap();
    let il = module.table.method_il(five).unwrap();
    assert_snapshot!(disassemble(&il.body).unwrap(), @r"
    IL_0000: ldc.i4.2
    IL_0001: ldc.i4.3
    IL_0002: call 0x06000001
    IL_0007: ret
    ");

    let imported = import(&module, "Five", &config());
    assert_snapshot!(imported.print(), @r"
    BB0 [IL_0000..IL_0008) -> return
      (return (const int 5))
    ");
    assert_eq!(imported.stats.inlined_calls, 1);

    let plain = import(&module, "Five", &config().without_inlining());
    assert!(plain.print().contains("(call "));
}

#[test]
fn hex_body_imports() {
    let module = load(include_str!("../modules/arith.json"));
    let imported = import(&module, "Seven", &config());
    assert_snapshot!(imported.print(), @r"
    BB0 [IL_0000..IL_0003) -> return
      (return (const int 7))
    ");
}

#[test]
fn labelled_clauses_lower_leave_through_finally() {
    let module = load(include_str!("../modules/guarded.json"));
    let guarded = module.method("Guarded").unwrap();
    let clauses = &module.table.method_il(guarded).unwrap().body.eh_clauses;
    assert_eq!(clauses.len(), 2);
    assert_eq!((clauses[0].try_offset, clauses[0].try_length), (0, 2));
    assert_eq!((clauses[1].handler_offset, clauses[1].handler_length), (5, 1));

    let imported = import(&module, "Guarded", &config());
    let ctx = &imported.ctx;
    let (try_block, finally, end) = (
        block_at(&imported, 0),
        block_at(&imported, 5),
        block_at(&imported, 6),
    );
    let JumpKind::Always(call) = ctx.block(try_block).jump else {
        panic!("try block should jump to its call-finally block");
    };
    let JumpKind::CallFinally { finally: target, continuation } = ctx.block(call).jump else {
        panic!("expected a call-finally block");
    };
    assert_eq!(target, finally);
    assert!(ctx.block(call).flags.contains(BlockFlags::INTERNAL));
    assert_eq!(ctx.block(continuation).jump, JumpKind::Always(end));
    assert_eq!(imported.stats.verify_throws, 0);
}

#[test]
fn unknown_clause_label_is_reported() {
    let err = Module::from_json(
        r#"{
            "classes": [{ "name": "Program" }],
            "methods": [{
                "name": "M", "owner": "Program",
                "code": [{ "op": "ret" }],
                "eh": [{ "kind": "fault", "try_start": 0, "try_end": "nowhere",
                         "handler_start": 0, "handler_end": 1 }]
            }]
        }"#,
    )
    .unwrap_err();
    assert!(matches!(err, LoadError::UnknownLabel { ref name } if name == "nowhere"));
}

#[test]
fn malformed_json_is_a_load_error() {
    let err = Module::from_json(r#"{ "classes": [{ "nom": "Program" }] }"#).unwrap_err();
    assert!(matches!(err, LoadError::Json(_)));
}
