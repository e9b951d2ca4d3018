//! JSON description of a metadata module and its method bodies.
//!
//! A module file lists classes, fields and methods by name. Method bodies
//! are either raw bytes in hex or a list of mnemonics:
//!
//! ```json
//! { "op": "ldc.i4", "arg": 5 }
//! { "label": "loop" }
//! { "op": "br", "arg": "loop" }
//! { "op": "call", "arg": "method:Helper" }
//! ```
//!
//! Token operands name their target as `class:NAME`, `method:NAME`,
//! `field:NAME` or `string`; the loader allocates and binds the tokens.
//! Hex bodies use the module's explicit `tokens` map instead.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use derive_more::{Display, Error, From};
use ilimport_bytecode::{
    BuildError, BytecodeBuilder, EhClause, EhClauseKind, Label, MethodBody, OperandKind, Opcode,
    Token,
};
use ilimport_importer::{
    ClassInfo, FieldInfo, MetadataTable, MethodIl, MethodInfo, MethodSig, ResolvedToken, Resolver,
    SigType,
};
use ilimport_ir::{ClassHandle, MethodHandle};
use serde::Deserialize;

#[derive(Debug, Display, Error, From)]
pub enum LoadError {
    #[display("cannot read module: {_0}")]
    Io(std::io::Error),

    #[display("invalid module JSON: {_0}")]
    Json(serde_json::Error),

    #[display("cannot assemble `{method}`: {source}")]
    #[from(ignore)]
    Build { method: String, source: BuildError },

    #[display("unknown class `{name}`")]
    #[from(ignore)]
    UnknownClass { name: String },

    #[display("unknown method `{name}`")]
    #[from(ignore)]
    UnknownMethod { name: String },

    #[display("unknown field `{name}`")]
    #[from(ignore)]
    UnknownField { name: String },

    #[display("`{name}` is declared twice")]
    #[from(ignore)]
    Duplicate { name: String },

    #[display("unknown type `{name}`")]
    #[from(ignore)]
    BadType { name: String },

    #[display("bad token `{text}`")]
    #[from(ignore)]
    BadToken { text: String },

    #[display("unknown opcode `{name}`")]
    #[from(ignore)]
    UnknownOpcode { name: String },

    #[display("`{op}` expects an operand of kind {expected:?}")]
    #[from(ignore)]
    BadOperand { op: String, expected: OperandKind },

    #[display("unknown label `{name}`")]
    #[from(ignore)]
    UnknownLabel { name: String },

    #[display("invalid hex in body of `{method}`")]
    #[from(ignore)]
    BadHex { method: String },

    #[display("{clause} clause in `{method}` needs `{field}`")]
    #[from(ignore)]
    MissingClauseField {
        method: String,
        clause: &'static str,
        field: &'static str,
    },
}

// ============================================================================
// JSON schema
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModuleDef {
    #[serde(default)]
    pub classes: Vec<ClassDef>,
    #[serde(default)]
    pub fields: Vec<FieldDef>,
    #[serde(default)]
    pub methods: Vec<MethodDef>,
    /// Token bindings for hex bodies, e.g. `"0x0A000001": "method:Foo"`.
    #[serde(default)]
    pub tokens: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClassDef {
    pub name: String,
    /// Defaults to `System.Object`.
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub value_type: bool,
    #[serde(default)]
    pub size: u32,
    #[serde(default)]
    pub sealed: bool,
    #[serde(default)]
    pub primitive: Option<String>,
    #[serde(default)]
    pub nullable_of: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldDef {
    pub name: String,
    pub owner: String,
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(default, rename = "static")]
    pub is_static: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MethodDef {
    pub name: String,
    pub owner: String,
    #[serde(default)]
    pub params: Vec<String>,
    #[serde(default = "void")]
    pub ret: String,
    #[serde(default)]
    pub has_this: bool,
    #[serde(default, rename = "virtual")]
    pub is_virtual: bool,
    #[serde(default, rename = "final")]
    pub is_final: bool,
    #[serde(default, rename = "ctor")]
    pub is_ctor: bool,
    #[serde(default)]
    pub varargs: bool,
    #[serde(default)]
    pub locals: Vec<String>,
    #[serde(default = "default_max_stack")]
    pub max_stack: u16,
    #[serde(default = "yes")]
    pub init_locals: bool,
    /// Absent for methods without IL.
    #[serde(default)]
    pub code: Option<CodeDef>,
    #[serde(default)]
    pub eh: Vec<EhDef>,
}

fn void() -> String {
    "void".to_string()
}

fn default_max_stack() -> u16 {
    8
}

fn yes() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum CodeDef {
    Hex(String),
    Ops(Vec<CodeItem>),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum CodeItem {
    Label { label: String },
    Op {
        op: String,
        #[serde(default)]
        arg: Option<OperandDef>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum OperandDef {
    Int(i64),
    Float(f64),
    Name(String),
    Labels(Vec<String>),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EhDef {
    pub kind: EhKindDef,
    /// Caught class of a `catch` clause.
    #[serde(default)]
    pub class: Option<String>,
    pub try_start: OffsetDef,
    pub try_end: OffsetDef,
    pub handler_start: OffsetDef,
    pub handler_end: OffsetDef,
    #[serde(default)]
    pub filter_start: Option<OffsetDef>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EhKindDef {
    Catch,
    Filter,
    Finally,
    Fault,
}

/// An IL offset, given directly or as a label of a mnemonic body.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum OffsetDef {
    At(u32),
    Label(String),
}

// ============================================================================
// Loading
// ============================================================================

/// A loaded module: the metadata table plus its methods in file order.
#[derive(Debug)]
pub struct Module {
    pub table: MetadataTable,
    pub methods: Vec<MethodHandle>,
}

impl Module {
    pub fn from_file(path: &Path) -> Result<Self, LoadError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, LoadError> {
        let def: ModuleDef = serde_json::from_str(text)?;
        def.build()
    }

    pub fn method(&self, name: &str) -> Option<MethodHandle> {
        self.table.method_by_name(name)
    }

    pub fn method_name(&self, method: MethodHandle) -> &str {
        self.table
            .method_info(method)
            .map_or("<unknown>", |info| info.name.as_str())
    }

    /// Methods that carry IL, in file order.
    pub fn methods_with_bodies(&self) -> impl Iterator<Item = MethodHandle> + '_ {
        self.methods
            .iter()
            .copied()
            .filter(|&m| self.table.method_il(m).is_some())
    }
}

impl ModuleDef {
    pub fn build(self) -> Result<Module, LoadError> {
        let mut loader = Loader {
            table: MetadataTable::new(),
            allocated: HashMap::new(),
            used: HashSet::new(),
        };
        for class in &self.classes {
            loader.add_class(class)?;
        }
        for field in &self.fields {
            loader.add_field(field)?;
        }
        let mut methods = Vec::with_capacity(self.methods.len());
        for method in &self.methods {
            methods.push(loader.declare_method(method)?);
        }
        for (literal, target) in &self.tokens {
            let token = parse_token_literal(literal)?;
            let target = loader.token_target(target)?;
            loader.used.insert(token);
            loader.table.bind(token, target);
        }
        for (def, &handle) in self.methods.iter().zip(&methods) {
            if let Some(code) = &def.code {
                let il = loader.method_il(def, code)?;
                loader.table.set_body(handle, il);
            }
        }
        tracing::debug!(
            classes = self.classes.len(),
            methods = methods.len(),
            "loaded module"
        );
        Ok(Module {
            table: loader.table,
            methods,
        })
    }
}

struct Loader {
    table: MetadataTable,
    allocated: HashMap<ResolvedToken, Token>,
    used: HashSet<Token>,
}

impl Loader {
    fn class(&self, name: &str) -> Result<ClassHandle, LoadError> {
        self.table
            .class_by_name(name)
            .ok_or_else(|| LoadError::UnknownClass {
                name: name.to_string(),
            })
    }

    fn add_class(&mut self, def: &ClassDef) -> Result<(), LoadError> {
        if self.table.class_by_name(&def.name).is_some() {
            return Err(LoadError::Duplicate {
                name: def.name.clone(),
            });
        }
        let parent = match &def.parent {
            Some(name) => self.class(name)?,
            None => self.table.object_class(),
        };
        let primitive = def.primitive.as_deref().map(|p| self.sig_type(p)).transpose()?;
        let nullable_of = def.nullable_of.as_deref().map(|n| self.class(n)).transpose()?;
        let base = if def.value_type {
            ClassInfo::value_type(def.name.as_str(), def.size)
        } else {
            ClassInfo {
                size: def.size,
                ..ClassInfo::reference(def.name.as_str())
            }
        };
        self.table.add_class(ClassInfo {
            parent: Some(parent),
            primitive,
            nullable_of,
            is_sealed: base.is_sealed || def.sealed,
            ..base
        });
        Ok(())
    }

    fn add_field(&mut self, def: &FieldDef) -> Result<(), LoadError> {
        if self.table.field_by_name(&def.name).is_some() {
            return Err(LoadError::Duplicate {
                name: def.name.clone(),
            });
        }
        let owner = self.class(&def.owner)?;
        let ty = self.sig_type(&def.ty)?;
        self.table.add_field(FieldInfo {
            name: def.name.clone(),
            owner,
            ty,
            is_static: def.is_static,
        });
        Ok(())
    }

    fn declare_method(&mut self, def: &MethodDef) -> Result<MethodHandle, LoadError> {
        if self.table.method_by_name(&def.name).is_some() {
            return Err(LoadError::Duplicate {
                name: def.name.clone(),
            });
        }
        let owner = self.class(&def.owner)?;
        let params = def
            .params
            .iter()
            .map(|p| self.sig_type(p))
            .collect::<Result<Vec<_>, _>>()?;
        let ret = self.sig_type(&def.ret)?;
        Ok(self.table.add_method(MethodInfo {
            name: def.name.clone(),
            owner,
            sig: MethodSig {
                has_this: def.has_this,
                params,
                ret,
                is_varargs: def.varargs,
            },
            is_virtual: def.is_virtual,
            is_final: def.is_final,
            is_ctor: def.is_ctor,
        }))
    }

    /// Parse a type name: a primitive, `object`, `string`, `ref`,
    /// `ref:CLASS` or `valuetype:CLASS`.
    fn sig_type(&self, name: &str) -> Result<SigType, LoadError> {
        Ok(match name {
            "void" => SigType::Void,
            "bool" => SigType::Bool,
            "char" => SigType::Char,
            "i1" => SigType::I1,
            "u1" => SigType::U1,
            "i2" => SigType::I2,
            "u2" => SigType::U2,
            "i4" => SigType::I4,
            "u4" => SigType::U4,
            "i8" => SigType::I8,
            "u8" => SigType::U8,
            "i" => SigType::I,
            "u" => SigType::U,
            "r4" => SigType::R4,
            "r8" => SigType::R8,
            "ptr" => SigType::Ptr,
            "byref" => SigType::Byref,
            "ref" => SigType::Ref(None),
            "object" => SigType::Ref(Some(self.table.object_class())),
            "string" => SigType::Ref(Some(self.class("System.String")?)),
            _ => {
                if let Some(class) = name.strip_prefix("ref:") {
                    SigType::Ref(Some(self.class(class)?))
                } else if let Some(class) = name.strip_prefix("valuetype:") {
                    let handle = self.class(class)?;
                    match self.table.class_info(handle) {
                        Some(info) if info.is_value_type => info.sig_type(handle),
                        _ => {
                            return Err(LoadError::BadType {
                                name: name.to_string(),
                            });
                        }
                    }
                } else {
                    return Err(LoadError::BadType {
                        name: name.to_string(),
                    });
                }
            }
        })
    }

    /// Parse `class:NAME`, `method:NAME`, `field:NAME` or `string`.
    fn token_target(&self, text: &str) -> Result<ResolvedToken, LoadError> {
        if text == "string" {
            return Ok(ResolvedToken::String);
        }
        let bad = || LoadError::BadToken {
            text: text.to_string(),
        };
        let (kind, name) = text.split_once(':').ok_or_else(bad)?;
        match kind {
            "class" => Ok(ResolvedToken::Class(self.class(name)?)),
            "method" => self
                .table
                .method_by_name(name)
                .map(ResolvedToken::Method)
                .ok_or_else(|| LoadError::UnknownMethod {
                    name: name.to_string(),
                }),
            "field" => self
                .table
                .field_by_name(name)
                .map(ResolvedToken::Field)
                .ok_or_else(|| LoadError::UnknownField {
                    name: name.to_string(),
                }),
            _ => Err(bad()),
        }
    }

    /// The token bound to `target`, allocating one in the matching metadata
    /// table on first use.
    fn token_for(&mut self, target: ResolvedToken) -> Token {
        if let Some(&token) = self.allocated.get(&target) {
            return token;
        }
        let table: u32 = match target {
            ResolvedToken::Class(_) => 0x02,
            ResolvedToken::Field(_) => 0x04,
            ResolvedToken::Method(_) => 0x06,
            ResolvedToken::String => 0x70,
        };
        let mut token = Token::new((table << 24) | 1);
        while self.used.contains(&token) {
            token = Token::new(token.raw() + 1);
        }
        self.used.insert(token);
        self.allocated.insert(target, token);
        self.table.bind(token, target);
        token
    }

    fn method_il(&mut self, def: &MethodDef, code: &CodeDef) -> Result<MethodIl, LoadError> {
        let (bytes, labels) = match code {
            CodeDef::Hex(text) => (
                parse_hex(text).ok_or_else(|| LoadError::BadHex {
                    method: def.name.clone(),
                })?,
                HashMap::new(),
            ),
            CodeDef::Ops(items) => self.assemble(&def.name, items)?,
        };
        let offset = |at: &OffsetDef| match at {
            OffsetDef::At(offset) => Ok(*offset),
            OffsetDef::Label(name) => {
                labels
                    .get(name)
                    .copied()
                    .ok_or_else(|| LoadError::UnknownLabel { name: name.clone() })
            }
        };

        let mut body = MethodBody::new(bytes, def.max_stack);
        body.init_locals = def.init_locals;
        for eh in &def.eh {
            let kind = match eh.kind {
                EhKindDef::Catch => {
                    let name = eh.class.as_deref().ok_or_else(|| LoadError::MissingClauseField {
                        method: def.name.clone(),
                        clause: "catch",
                        field: "class",
                    })?;
                    let class = self.class(name)?;
                    EhClauseKind::Catch(self.token_for(ResolvedToken::Class(class)))
                }
                EhKindDef::Filter => {
                    let start = eh.filter_start.as_ref().ok_or_else(|| LoadError::MissingClauseField {
                        method: def.name.clone(),
                        clause: "filter",
                        field: "filter_start",
                    })?;
                    EhClauseKind::Filter {
                        filter_offset: offset(start)?,
                    }
                }
                EhKindDef::Finally => EhClauseKind::Finally,
                EhKindDef::Fault => EhClauseKind::Fault,
            };
            let try_offset = offset(&eh.try_start)?;
            let handler_offset = offset(&eh.handler_start)?;
            body = body.with_clause(EhClause {
                kind,
                try_offset,
                try_length: offset(&eh.try_end)?.saturating_sub(try_offset),
                handler_offset,
                handler_length: offset(&eh.handler_end)?.saturating_sub(handler_offset),
            });
        }

        let locals = def
            .locals
            .iter()
            .map(|l| self.sig_type(l))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(MethodIl { body, locals })
    }

    /// Assemble mnemonics, returning the bytes and every bound label's
    /// offset.
    fn assemble(
        &mut self,
        method: &str,
        items: &[CodeItem],
    ) -> Result<(Vec<u8>, HashMap<String, u32>), LoadError> {
        let build = |source| LoadError::Build {
            method: method.to_string(),
            source,
        };
        let mut b = BytecodeBuilder::new();
        let mut labels: HashMap<String, Label> = HashMap::new();
        for item in items {
            let (op, arg) = match item {
                CodeItem::Label { label } => {
                    let label = label_for(&mut b, &mut labels, label);
                    b.bind(label);
                    continue;
                }
                CodeItem::Op { op, arg } => (op, arg.as_ref()),
            };
            let opcode = Opcode::from_name(op).ok_or_else(|| LoadError::UnknownOpcode {
                name: op.clone(),
            })?;
            let kind = opcode.operand_kind();
            match (kind, arg) {
                (OperandKind::None, None) => {
                    b.op(opcode).map_err(build)?;
                }
                (
                    OperandKind::ShortI
                    | OperandKind::Byte
                    | OperandKind::Int32
                    | OperandKind::Int64
                    | OperandKind::ShortVar
                    | OperandKind::Var,
                    Some(OperandDef::Int(value)),
                ) => {
                    b.op_int(opcode, *value).map_err(build)?;
                }
                (OperandKind::Float32 | OperandKind::Float64, Some(OperandDef::Float(value))) => {
                    b.op_float(opcode, *value).map_err(build)?;
                }
                (OperandKind::Float32 | OperandKind::Float64, Some(OperandDef::Int(value))) => {
                    b.op_float(opcode, *value as f64).map_err(build)?;
                }
                (OperandKind::Token, Some(OperandDef::Name(text))) => {
                    let target = self.token_target(text)?;
                    let token = self.token_for(target);
                    b.op_token(opcode, token).map_err(build)?;
                }
                (OperandKind::Branch | OperandKind::ShortBranch, Some(OperandDef::Name(name))) => {
                    let label = label_for(&mut b, &mut labels, name);
                    b.branch(opcode, label).map_err(build)?;
                }
                (OperandKind::Switch, Some(OperandDef::Labels(names))) => {
                    let targets: Vec<Label> = names
                        .iter()
                        .map(|name| label_for(&mut b, &mut labels, name))
                        .collect();
                    b.switch(&targets);
                }
                (expected, _) => {
                    return Err(LoadError::BadOperand {
                        op: op.clone(),
                        expected,
                    });
                }
            }
        }
        let offsets = labels
            .iter()
            .filter_map(|(name, &label)| b.label_offset(label).map(|at| (name.clone(), at)))
            .collect();
        let bytes = b.finish().map_err(build)?;
        Ok((bytes, offsets))
    }
}

fn label_for(b: &mut BytecodeBuilder, labels: &mut HashMap<String, Label>, name: &str) -> Label {
    *labels
        .entry(name.to_string())
        .or_insert_with(|| b.new_label())
}

fn parse_hex(text: &str) -> Option<Vec<u8>> {
    let digits: Vec<u8> = text.bytes().filter(|c| !c.is_ascii_whitespace()).collect();
    if digits.len() % 2 != 0 {
        return None;
    }
    digits
        .chunks(2)
        .map(|pair| {
            let pair = std::str::from_utf8(pair).ok()?;
            u8::from_str_radix(pair, 16).ok()
        })
        .collect()
}

fn parse_token_literal(text: &str) -> Result<Token, LoadError> {
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    u32::from_str_radix(digits, 16)
        .map(Token::new)
        .map_err(|_| LoadError::BadToken {
            text: text.to_string(),
        })
}
