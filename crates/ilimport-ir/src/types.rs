//! IR types, verification types and the target description.

use std::fmt;

use crate::refs::{ClassHandle, MethodHandle};

// ============================================================================
// VarType
// ============================================================================

/// Static type of an IR node or local.
///
/// Native int has no variant of its own: it is [`TargetInfo::native_int`],
/// which is `Int` or `Long` depending on the configured pointer width.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VarType {
    Undef,
    Void,
    Bool,
    Byte,
    UByte,
    Short,
    UShort,
    Int,
    UInt,
    Long,
    ULong,
    Float,
    Double,
    Ref,
    Byref,
    Struct,
}

impl VarType {
    pub const fn is_small_int(self) -> bool {
        matches!(
            self,
            VarType::Bool | VarType::Byte | VarType::UByte | VarType::Short | VarType::UShort
        )
    }

    pub const fn is_integral(self) -> bool {
        self.is_small_int()
            || matches!(
                self,
                VarType::Int | VarType::UInt | VarType::Long | VarType::ULong
            )
    }

    pub const fn is_floating(self) -> bool {
        matches!(self, VarType::Float | VarType::Double)
    }

    pub const fn is_gc(self) -> bool {
        matches!(self, VarType::Ref | VarType::Byref)
    }

    pub const fn is_unsigned(self) -> bool {
        matches!(
            self,
            VarType::Bool | VarType::UByte | VarType::UShort | VarType::UInt | VarType::ULong
        )
    }

    pub const fn is_long(self) -> bool {
        matches!(self, VarType::Long | VarType::ULong)
    }

    /// The type a value of this type has once loaded onto the evaluation
    /// stack: small ints widen to `Int`, unsigned variants lose their sign.
    pub const fn actual(self) -> VarType {
        match self {
            VarType::Bool
            | VarType::Byte
            | VarType::UByte
            | VarType::Short
            | VarType::UShort
            | VarType::Int
            | VarType::UInt => VarType::Int,
            VarType::Long | VarType::ULong => VarType::Long,
            other => other,
        }
    }

    /// Size in bytes; `None` for `Struct`, `Void` and `Undef`.
    pub fn size(self, target: &TargetInfo) -> Option<u32> {
        Some(match self {
            VarType::Bool | VarType::Byte | VarType::UByte => 1,
            VarType::Short | VarType::UShort => 2,
            VarType::Int | VarType::UInt | VarType::Float => 4,
            VarType::Long | VarType::ULong | VarType::Double => 8,
            VarType::Ref | VarType::Byref => target.pointer_size(),
            VarType::Struct | VarType::Void | VarType::Undef => return None,
        })
    }

    pub const fn name(self) -> &'static str {
        match self {
            VarType::Undef => "undef",
            VarType::Void => "void",
            VarType::Bool => "bool",
            VarType::Byte => "byte",
            VarType::UByte => "ubyte",
            VarType::Short => "short",
            VarType::UShort => "ushort",
            VarType::Int => "int",
            VarType::UInt => "uint",
            VarType::Long => "long",
            VarType::ULong => "ulong",
            VarType::Float => "float",
            VarType::Double => "double",
            VarType::Ref => "ref",
            VarType::Byref => "byref",
            VarType::Struct => "struct",
        }
    }
}

impl fmt::Display for VarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// TargetInfo
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PointerWidth {
    U32,
    U64,
}

/// The slice of the target description the importer depends on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TargetInfo {
    pub pointer_width: PointerWidth,
}

impl TargetInfo {
    pub const X64: TargetInfo = TargetInfo {
        pointer_width: PointerWidth::U64,
    };
    pub const X86: TargetInfo = TargetInfo {
        pointer_width: PointerWidth::U32,
    };

    /// Derive the target from a triple. Returns `None` for targets whose
    /// pointer width the importer does not support.
    pub fn from_triple(triple: &target_lexicon::Triple) -> Option<Self> {
        let pointer_width = match triple.pointer_width().ok()? {
            target_lexicon::PointerWidth::U32 => PointerWidth::U32,
            target_lexicon::PointerWidth::U64 => PointerWidth::U64,
            target_lexicon::PointerWidth::U16 => return None,
        };
        Some(TargetInfo { pointer_width })
    }

    pub const fn pointer_size(&self) -> u32 {
        match self.pointer_width {
            PointerWidth::U32 => 4,
            PointerWidth::U64 => 8,
        }
    }

    /// The `VarType` used for native-sized integers.
    pub const fn native_int(&self) -> VarType {
        match self.pointer_width {
            PointerWidth::U32 => VarType::Int,
            PointerWidth::U64 => VarType::Long,
        }
    }

    pub const fn is_64bit(&self) -> bool {
        matches!(self.pointer_width, PointerWidth::U64)
    }
}

impl Default for TargetInfo {
    fn default() -> Self {
        TargetInfo::X64
    }
}

// ============================================================================
// TypeInfo
// ============================================================================

/// Verification type of an evaluation stack entry.
///
/// Unlike [`VarType`] this keeps native int apart from `int64` and carries
/// class information for object references and value types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TypeInfo {
    Int32,
    Int64,
    NativeInt,
    Float,
    Double,
    /// The `ldnull` literal; compatible with every reference type.
    Null,
    Ref(Option<ClassHandle>),
    Byref,
    Struct(ClassHandle),
    /// Function pointer produced by `ldftn`/`ldvirtftn`.
    Method(MethodHandle),
}

impl TypeInfo {
    /// Classify a primitive `VarType` pushed onto the stack.
    pub fn from_var_type(ty: VarType) -> TypeInfo {
        match ty.actual() {
            VarType::Int => TypeInfo::Int32,
            VarType::Long => TypeInfo::Int64,
            VarType::Float => TypeInfo::Float,
            VarType::Double => TypeInfo::Double,
            VarType::Byref => TypeInfo::Byref,
            _ => TypeInfo::Ref(None),
        }
    }

    /// The IR type of a stack value with this verification type.
    pub fn var_type(&self, target: &TargetInfo) -> VarType {
        match self {
            TypeInfo::Int32 => VarType::Int,
            TypeInfo::Int64 => VarType::Long,
            TypeInfo::NativeInt | TypeInfo::Method(_) => target.native_int(),
            TypeInfo::Float => VarType::Float,
            TypeInfo::Double => VarType::Double,
            TypeInfo::Null | TypeInfo::Ref(_) => VarType::Ref,
            TypeInfo::Byref => VarType::Byref,
            TypeInfo::Struct(_) => VarType::Struct,
        }
    }

    pub fn class(&self) -> Option<ClassHandle> {
        match *self {
            TypeInfo::Ref(c) => c,
            TypeInfo::Struct(c) => Some(c),
            _ => None,
        }
    }

    pub fn is_object(&self) -> bool {
        matches!(self, TypeInfo::Ref(_) | TypeInfo::Null)
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            TypeInfo::Int32 | TypeInfo::Int64 | TypeInfo::NativeInt
        )
    }

    pub fn is_floating(&self) -> bool {
        matches!(self, TypeInfo::Float | TypeInfo::Double)
    }
}

impl fmt::Display for TypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeInfo::Int32 => f.write_str("int32"),
            TypeInfo::Int64 => f.write_str("int64"),
            TypeInfo::NativeInt => f.write_str("native int"),
            TypeInfo::Float => f.write_str("float32"),
            TypeInfo::Double => f.write_str("float64"),
            TypeInfo::Null => f.write_str("null"),
            TypeInfo::Ref(None) => f.write_str("ref"),
            TypeInfo::Ref(Some(c)) => write!(f, "ref {c}"),
            TypeInfo::Byref => f.write_str("byref"),
            TypeInfo::Struct(c) => write!(f, "struct {c}"),
            TypeInfo::Method(m) => write!(f, "fnptr {m}"),
        }
    }
}
