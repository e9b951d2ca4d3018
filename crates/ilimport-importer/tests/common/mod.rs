//! Shared fixtures for importer integration tests.

use ilimport_bytecode::{BuildError, BytecodeBuilder, MethodBody, Token};
use ilimport_importer::{
    ClassInfo, FieldInfo, ImportConfig, ImportedMethod, MetadataTable, MethodIl, MethodInfo, MethodSig,
    ResolvedToken, SigType, import_method,
};
use ilimport_ir::{BlockRef, ClassHandle, FieldHandle, MethodHandle, NodeRef, TargetInfo};

/// A metadata table with a `Program` class to hang test methods on.
pub struct Fixture {
    pub table: MetadataTable,
    pub program: ClassHandle,
    next_token: u32,
}

#[allow(dead_code)]
impl Fixture {
    pub fn new() -> Self {
        let mut table = MetadataTable::new();
        let object = table.object_class();
        let program = table.add_class(ClassInfo {
            parent: Some(object),
            ..ClassInfo::reference("Program")
        });
        Self {
            table,
            program,
            next_token: 0x0A00_0001,
        }
    }

    /// A reference class deriving from `System.Object`.
    pub fn class(&mut self, name: &str) -> ClassHandle {
        let object = self.table.object_class();
        self.table.add_class(ClassInfo {
            parent: Some(object),
            ..ClassInfo::reference(name)
        })
    }

    /// The boxed form of `int32`.
    pub fn int32_class(&mut self) -> ClassHandle {
        let object = self.table.object_class();
        self.table.add_class(ClassInfo {
            primitive: Some(SigType::I4),
            parent: Some(object),
            ..ClassInfo::value_type("System.Int32", 4)
        })
    }

    /// Bind a fresh token to `target`.
    pub fn token(&mut self, target: ResolvedToken) -> Token {
        let token = Token(self.next_token);
        self.next_token += 1;
        self.table.bind(token, target);
        token
    }

    pub fn class_token(&mut self, class: ClassHandle) -> Token {
        self.token(ResolvedToken::Class(class))
    }

    pub fn method_token(&mut self, method: MethodHandle) -> Token {
        self.token(ResolvedToken::Method(method))
    }

    /// Declare a static method of `Program` without a body.
    pub fn declare(&mut self, name: &str, params: Vec<SigType>, ret: SigType) -> MethodHandle {
        self.table.add_method(MethodInfo {
            name: name.to_string(),
            owner: self.program,
            sig: MethodSig {
                has_this: false,
                params,
                ret,
                is_varargs: false,
            },
            is_virtual: false,
            is_final: false,
            is_ctor: false,
        })
    }

    /// Declare a non-virtual instance method of `Program` and give it `body`.
    pub fn instance(&mut self, name: &str, params: Vec<SigType>, ret: SigType, body: MethodBody) -> MethodHandle {
        let method = self.table.add_method(MethodInfo {
            name: name.to_string(),
            owner: self.program,
            sig: MethodSig {
                has_this: true,
                params,
                ret,
                is_varargs: false,
            },
            is_virtual: false,
            is_final: false,
            is_ctor: false,
        });
        self.set_body(method, body, Vec::new());
        method
    }

    /// An instance field of `owner` and a token naming it.
    pub fn field(&mut self, owner: ClassHandle, name: &str, ty: SigType) -> (FieldHandle, Token) {
        let field = self.table.add_field(FieldInfo {
            name: name.to_string(),
            owner,
            ty,
            is_static: false,
        });
        (field, self.token(ResolvedToken::Field(field)))
    }

    pub fn set_body(&mut self, method: MethodHandle, body: MethodBody, locals: Vec<SigType>) {
        self.table.set_body(method, MethodIl { body, locals });
    }

    /// Declare a static method and give it `body`.
    pub fn method(&mut self, name: &str, params: Vec<SigType>, ret: SigType, body: MethodBody) -> MethodHandle {
        let method = self.declare(name, params, ret);
        self.set_body(method, body, Vec::new());
        method
    }

    pub fn import(&self, method: MethodHandle) -> ImportedMethod {
        self.import_with(method, &config())
    }

    pub fn import_with(&self, method: MethodHandle, config: &ImportConfig) -> ImportedMethod {
        import_method(&self.table, method, config).expect("import failed")
    }
}

pub fn config() -> ImportConfig {
    ImportConfig::default().with_target(TargetInfo::X64)
}

/// Assemble a method body with `max_stack` slots.
pub fn body(max_stack: u16, build: impl FnOnce(&mut BytecodeBuilder) -> Result<(), BuildError>) -> MethodBody {
    let mut b = BytecodeBuilder::new();
    build(&mut b).expect("assembly failed");
    MethodBody::new(b.finish().expect("unbound label"), max_stack)
}

/// The block starting at IL `offset`.
#[allow(dead_code)]
pub fn block_at(imported: &ImportedMethod, offset: u32) -> BlockRef {
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

#[allow(dead_code)]
pub fn roots(imported: &ImportedMethod, block: BlockRef) -> Vec<NodeRef> {
    imported.ctx.block_roots(block)
}
