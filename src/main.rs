//! CIL importer CLI entry point.

mod cli;

use std::error::Error;
use std::path::Path;
use std::str::FromStr;

use clap::Parser;
use cli::{Cli, Command, ImportOptions, PointerWidthArg};
use ilimport::{ImportConfig, Module, disassemble};
use ilimport_importer::import_method;
use ilimport_ir::{MethodHandle, TargetInfo, printer};
use tracing_subscriber::EnvFilter;

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.log.as_deref());

    let result = match cli.command {
        Command::Import {
            file,
            method,
            locals,
            stats,
            options,
        } => import_file(&file, method.as_deref(), locals, stats, &options),
        Command::Disasm { file, method } => disasm_file(&file, method.as_deref()),
    };
    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn init_tracing(filter: Option<&str>) {
    let filter = match filter {
        Some(directives) => EnvFilter::new(directives),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn import_config(options: &ImportOptions) -> Result<ImportConfig, Box<dyn Error>> {
    let target = match (&options.target, options.pointer_width) {
        (Some(triple), _) => {
            let triple = target_lexicon::Triple::from_str(triple)?;
            TargetInfo::from_triple(&triple)
                .ok_or_else(|| format!("unsupported pointer width for `{triple}`"))?
        }
        (None, Some(PointerWidthArg::W32)) => TargetInfo::X86,
        (None, Some(PointerWidthArg::W64)) => TargetInfo::X64,
        (None, None) => TargetInfo::default(),
    };
    let mut config = ImportConfig::default().with_target(target);
    config.inline.enabled = !options.no_inline;
    config.fold_constants = !options.no_fold;
    config.box_patterns = !options.no_box_patterns;
    Ok(config)
}

/// The methods selected by `--method`, or every method with IL.
fn selected_methods(module: &Module, name: Option<&str>) -> Result<Vec<MethodHandle>, Box<dyn Error>> {
    match name {
        Some(name) => {
            let method = module
                .method(name)
                .ok_or_else(|| format!("no method named `{name}`"))?;
            Ok(vec![method])
        }
        None => Ok(module.methods_with_bodies().collect()),
    }
}

fn import_file(
    path: &Path,
    method: Option<&str>,
    locals: bool,
    stats: bool,
    options: &ImportOptions,
) -> Result<(), Box<dyn Error>> {
    let config = import_config(options)?;
    let module = Module::from_file(path)?;
    let mut failures = 0;
    for handle in selected_methods(&module, method)? {
        let name = module.method_name(handle);
        println!("=== {name} ({handle}) ===");
        match import_method(&module.table, handle, &config) {
            Ok(imported) => {
                print!("{}", imported.print());
                if locals {
                    println!("--- locals ---");
                    print!("{}", printer::print_locals(&imported.ctx));
                }
                if stats {
                    let s = imported.stats;
                    println!(
                        "--- stats: {} block imports, {} reimports, {} verification throws, {} inlined, {} inline rejections",
                        s.block_imports, s.reimports, s.verify_throws, s.inlined_calls, s.inline_rejections
                    );
                    println!("--- uses int64: {}, uses floating point: {}", s.uses_long, s.uses_float);
                }
            }
            Err(e) => {
                eprintln!("error: {name}: {e}");
                failures += 1;
            }
        }
        println!();
    }
    if failures > 0 {
        return Err(format!("{failures} method(s) failed to import").into());
    }
    Ok(())
}

fn disasm_file(path: &Path, method: Option<&str>) -> Result<(), Box<dyn Error>> {
    let module = Module::from_file(path)?;
    for handle in selected_methods(&module, method)? {
        let Some(il) = ilimport_importer::Resolver::method_il(&module.table, handle) else {
            return Err(format!("`{}` has no IL", module.method_name(handle)).into());
        };
        println!(
            "=== {} (maxstack {}, {} locals) ===",
            module.method_name(handle),
            il.body.max_stack,
            il.locals.len()
        );
        print!("{}", disassemble(&il.body)?);
        println!();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    fn options(cli: Cli) -> ImportOptions {
        match cli.command {
            Command::Import { options, .. } => options,
            Command::Disasm { .. } => panic!("expected import"),
        }
    }

    #[test]
    fn flags_map_onto_config() {
        let cli = parse(&["ilimport", "import", "m.json", "--no-inline", "--no-fold", "--pointer-width", "32"]);
        let config = import_config(&options(cli)).unwrap();
        assert!(!config.inline.enabled);
        assert!(!config.fold_constants);
        assert!(config.box_patterns);
        assert_eq!(config.target, TargetInfo::X86);
    }

    #[test]
    fn target_triple_sets_pointer_width() {
        let cli = parse(&["ilimport", "import", "m.json", "--target", "i686-unknown-linux-gnu"]);
        assert_eq!(import_config(&options(cli)).unwrap().target, TargetInfo::X86);

        let cli = parse(&["ilimport", "import", "m.json", "--target", "x86_64-unknown-linux-gnu"]);
        assert_eq!(import_config(&options(cli)).unwrap().target, TargetInfo::X64);
    }

    #[test]
    fn pointer_width_conflicts_with_target() {
        let args = ["ilimport", "import", "m.json", "--target", "x86_64-unknown-linux-gnu", "--pointer-width", "64"];
        assert!(Cli::try_parse_from(args).is_err());
    }

    #[test]
    fn log_filter_is_global() {
        let cli = parse(&["ilimport", "disasm", "m.json", "--log", "debug"]);
        assert_eq!(cli.log.as_deref(), Some("debug"));
    }
}
