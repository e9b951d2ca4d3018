//! The metadata resolver the importer consumes.
//!
//! The importer never interprets metadata itself: every token is resolved
//! through [`Resolver`], and class, field and method facts come back as the
//! small descriptor structs below.

use ilimport_bytecode::{MethodBody, Token};
use ilimport_ir::{ClassHandle, FieldHandle, MethodHandle, TargetInfo, TypeInfo, VarType};

/// Three-valued answer to a static type question.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TypeCompareState {
    Must,
    MustNot,
    May,
}

/// What a token refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResolvedToken {
    Class(ClassHandle),
    Method(MethodHandle),
    Field(FieldHandle),
    /// A user string (`ldstr`).
    String,
}

/// Classes the importer needs to type certain results.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WellKnownClass {
    Object,
    String,
    TypedReference,
    RuntimeTypeHandle,
    RuntimeMethodHandle,
    RuntimeFieldHandle,
    RuntimeArgumentHandle,
}

impl WellKnownClass {
    pub const ALL: [WellKnownClass; 7] = [
        WellKnownClass::Object,
        WellKnownClass::String,
        WellKnownClass::TypedReference,
        WellKnownClass::RuntimeTypeHandle,
        WellKnownClass::RuntimeMethodHandle,
        WellKnownClass::RuntimeFieldHandle,
        WellKnownClass::RuntimeArgumentHandle,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            WellKnownClass::Object => "System.Object",
            WellKnownClass::String => "System.String",
            WellKnownClass::TypedReference => "System.TypedReference",
            WellKnownClass::RuntimeTypeHandle => "System.RuntimeTypeHandle",
            WellKnownClass::RuntimeMethodHandle => "System.RuntimeMethodHandle",
            WellKnownClass::RuntimeFieldHandle => "System.RuntimeFieldHandle",
            WellKnownClass::RuntimeArgumentHandle => "System.RuntimeArgumentHandle",
        }
    }
}

/// Element type of a signature: argument, local, field or return type.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SigType {
    #[default]
    Void,
    Bool,
    Char,
    I1,
    U1,
    I2,
    U2,
    I4,
    U4,
    I8,
    U8,
    /// Native int.
    I,
    /// Native unsigned int.
    U,
    R4,
    R8,
    /// Unmanaged pointer.
    Ptr,
    Byref,
    /// Object reference, with its class when known.
    Ref(Option<ClassHandle>),
    ValueType(ClassHandle),
}

impl SigType {
    pub fn var_type(&self, target: &TargetInfo) -> VarType {
        match self {
            SigType::Void => VarType::Void,
            SigType::Bool => VarType::Bool,
            SigType::Char | SigType::U2 => VarType::UShort,
            SigType::I1 => VarType::Byte,
            SigType::U1 => VarType::UByte,
            SigType::I2 => VarType::Short,
            SigType::I4 => VarType::Int,
            SigType::U4 => VarType::UInt,
            SigType::I8 => VarType::Long,
            SigType::U8 => VarType::ULong,
            SigType::I | SigType::U | SigType::Ptr => target.native_int(),
            SigType::R4 => VarType::Float,
            SigType::R8 => VarType::Double,
            SigType::Byref => VarType::Byref,
            SigType::Ref(_) => VarType::Ref,
            SigType::ValueType(_) => VarType::Struct,
        }
    }

    /// Verification type of a value of this type on the stack; `None` for
    /// `Void`.
    pub fn type_info(&self) -> Option<TypeInfo> {
        Some(match *self {
            SigType::Void => return None,
            SigType::Bool
            | SigType::Char
            | SigType::I1
            | SigType::U1
            | SigType::I2
            | SigType::U2
            | SigType::I4
            | SigType::U4 => TypeInfo::Int32,
            SigType::I8 | SigType::U8 => TypeInfo::Int64,
            SigType::I | SigType::U | SigType::Ptr => TypeInfo::NativeInt,
            SigType::R4 => TypeInfo::Float,
            SigType::R8 => TypeInfo::Double,
            SigType::Byref => TypeInfo::Byref,
            SigType::Ref(class) => TypeInfo::Ref(class),
            SigType::ValueType(class) => TypeInfo::Struct(class),
        })
    }

    pub fn class(&self) -> Option<ClassHandle> {
        match *self {
            SigType::Ref(class) => class,
            SigType::ValueType(class) => Some(class),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClassInfo {
    pub name: String,
    pub is_value_type: bool,
    /// For primitive value types (`System.Int32` and friends), the
    /// primitive they wrap.
    pub primitive: Option<SigType>,
    /// Instance size in bytes (value types) or object size (classes).
    pub size: u32,
    pub is_sealed: bool,
    pub parent: Option<ClassHandle>,
    /// For `Nullable<T>`, the class of `T`.
    pub nullable_of: Option<ClassHandle>,
}

impl ClassInfo {
    pub fn reference(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_value_type: false,
            primitive: None,
            size: 0,
            is_sealed: false,
            parent: None,
            nullable_of: None,
        }
    }

    pub fn value_type(name: impl Into<String>, size: u32) -> Self {
        Self {
            is_value_type: true,
            size,
            is_sealed: true,
            ..Self::reference(name)
        }
    }

    pub fn is_nullable(&self) -> bool {
        self.nullable_of.is_some()
    }

    /// Signature type of a value of this class.
    pub fn sig_type(&self, handle: ClassHandle) -> SigType {
        match (self.is_value_type, self.primitive) {
            (true, Some(prim)) => prim,
            (true, None) => SigType::ValueType(handle),
            (false, _) => SigType::Ref(Some(handle)),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldInfo {
    pub name: String,
    pub owner: ClassHandle,
    pub ty: SigType,
    pub is_static: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MethodSig {
    pub has_this: bool,
    pub params: Vec<SigType>,
    pub ret: SigType,
    pub is_varargs: bool,
}

impl MethodSig {
    /// Number of IL arguments, `this` included.
    pub fn arg_count(&self) -> usize {
        self.params.len() + usize::from(self.has_this)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodInfo {
    pub name: String,
    pub owner: ClassHandle,
    pub sig: MethodSig,
    pub is_virtual: bool,
    pub is_final: bool,
    pub is_ctor: bool,
}

impl MethodInfo {
    /// Whether a `callvirt` of this method may be dispatched directly.
    pub fn is_devirtualizable(&self) -> bool {
        !self.is_virtual || self.is_final
    }
}

/// IL body plus local signature, as needed to import a method.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MethodIl {
    pub body: MethodBody,
    pub locals: Vec<SigType>,
}

/// Metadata queries the importer performs.
pub trait Resolver {
    /// Resolve a token appearing in `scope`'s IL.
    fn resolve_token(&self, scope: MethodHandle, token: Token) -> Option<ResolvedToken>;

    fn class_info(&self, class: ClassHandle) -> Option<&ClassInfo>;

    fn field_info(&self, field: FieldHandle) -> Option<&FieldInfo>;

    fn method_info(&self, method: MethodHandle) -> Option<&MethodInfo>;

    /// IL of a method, used for the root method and inline candidates.
    fn method_il(&self, method: MethodHandle) -> Option<&MethodIl>;

    fn well_known_class(&self, which: WellKnownClass) -> Option<ClassHandle>;

    /// Can an object whose static class is `from` be cast to `to`?
    fn compare_types_for_cast(&self, from: ClassHandle, to: ClassHandle) -> TypeCompareState;

    /// Do `a` and `b` denote the same runtime type?
    fn compare_types_for_equality(&self, a: ClassHandle, b: ClassHandle) -> TypeCompareState;
}
