//! The CIL opcode table.
//!
//! Single-byte opcodes occupy `0x00..=0xE0`. Two-byte opcodes are encoded as
//! the escape byte [`ESCAPE_PREFIX`] followed by a second byte; their
//! [`Opcode::encoding`] is `0xFE00 | second`.

/// First byte of every two-byte opcode.
pub const ESCAPE_PREFIX: u8 = 0xFE;

/// Shape of the inline operand that follows an opcode in the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    None,
    /// Signed 8-bit immediate (`ldc.i4.s`).
    ShortI,
    /// Unsigned 8-bit immediate (`unaligned.`, `no.`).
    Byte,
    Int32,
    Int64,
    Float32,
    Float64,
    /// Signed 8-bit branch displacement.
    ShortBranch,
    /// Signed 32-bit branch displacement.
    Branch,
    /// `u32` count followed by that many `i32` displacements.
    Switch,
    /// 4-byte metadata token.
    Token,
    /// Unsigned 8-bit argument/local index.
    ShortVar,
    /// Unsigned 16-bit argument/local index.
    Var,
}

impl OperandKind {
    /// Fixed operand size in bytes. `Switch` reports only its count prefix.
    pub const fn size(self) -> u32 {
        match self {
            OperandKind::None => 0,
            OperandKind::ShortI
            | OperandKind::Byte
            | OperandKind::ShortBranch
            | OperandKind::ShortVar => 1,
            OperandKind::Var => 2,
            OperandKind::Int32
            | OperandKind::Float32
            | OperandKind::Branch
            | OperandKind::Switch
            | OperandKind::Token => 4,
            OperandKind::Int64 | OperandKind::Float64 => 8,
        }
    }
}

/// How an opcode affects control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowKind {
    Next,
    Break,
    Call,
    Return,
    Branch,
    CondBranch,
    Throw,
    /// Prefix opcodes; they modify the instruction that follows.
    Meta,
}

macro_rules! opcodes {
    ($( $variant:ident = $enc:literal, $name:literal, $operand:ident, $flow:ident; )*) => {
        /// A CIL opcode.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Opcode {
            $( $variant, )*
        }

        impl Opcode {
            /// Every opcode, in encoding order.
            pub const ALL: &'static [Opcode] = &[ $( Opcode::$variant, )* ];

            /// The assembler mnemonic, e.g. `"ldc.i4.s"`.
            pub const fn name(self) -> &'static str {
                match self {
                    $( Opcode::$variant => $name, )*
                }
            }

            /// The raw encoding: `0x00XX` for single-byte opcodes, `0xFEXX`
            /// for escaped ones.
            pub const fn encoding(self) -> u16 {
                match self {
                    $( Opcode::$variant => $enc, )*
                }
            }

            pub const fn operand_kind(self) -> OperandKind {
                match self {
                    $( Opcode::$variant => OperandKind::$operand, )*
                }
            }

            pub const fn flow(self) -> FlowKind {
                match self {
                    $( Opcode::$variant => FlowKind::$flow, )*
                }
            }

            /// Look up an opcode by its raw encoding.
            pub const fn from_encoding(enc: u16) -> Option<Opcode> {
                match enc {
                    $( $enc => Some(Opcode::$variant), )*
                    _ => None,
                }
            }
        }
    };
}

opcodes! {
    Nop = 0x0000, "nop", None, Next;
    Break = 0x0001, "break", None, Break;
    Ldarg0 = 0x0002, "ldarg.0", None, Next;
    Ldarg1 = 0x0003, "ldarg.1", None, Next;
    Ldarg2 = 0x0004, "ldarg.2", None, Next;
    Ldarg3 = 0x0005, "ldarg.3", None, Next;
    Ldloc0 = 0x0006, "ldloc.0", None, Next;
    Ldloc1 = 0x0007, "ldloc.1", None, Next;
    Ldloc2 = 0x0008, "ldloc.2", None, Next;
    Ldloc3 = 0x0009, "ldloc.3", None, Next;
    Stloc0 = 0x000A, "stloc.0", None, Next;
    Stloc1 = 0x000B, "stloc.1", None, Next;
    Stloc2 = 0x000C, "stloc.2", None, Next;
    Stloc3 = 0x000D, "stloc.3", None, Next;
    LdargS = 0x000E, "ldarg.s", ShortVar, Next;
    LdargaS = 0x000F, "ldarga.s", ShortVar, Next;
    StargS = 0x0010, "starg.s", ShortVar, Next;
    LdlocS = 0x0011, "ldloc.s", ShortVar, Next;
    LdlocaS = 0x0012, "ldloca.s", ShortVar, Next;
    StlocS = 0x0013, "stloc.s", ShortVar, Next;
    Ldnull = 0x0014, "ldnull", None, Next;
    LdcI4M1 = 0x0015, "ldc.i4.m1", None, Next;
    LdcI40 = 0x0016, "ldc.i4.0", None, Next;
    LdcI41 = 0x0017, "ldc.i4.1", None, Next;
    LdcI42 = 0x0018, "ldc.i4.2", None, Next;
    LdcI43 = 0x0019, "ldc.i4.3", None, Next;
    LdcI44 = 0x001A, "ldc.i4.4", None, Next;
    LdcI45 = 0x001B, "ldc.i4.5", None, Next;
    LdcI46 = 0x001C, "ldc.i4.6", None, Next;
    LdcI47 = 0x001D, "ldc.i4.7", None, Next;
    LdcI48 = 0x001E, "ldc.i4.8", None, Next;
    LdcI4S = 0x001F, "ldc.i4.s", ShortI, Next;
    LdcI4 = 0x0020, "ldc.i4", Int32, Next;
    LdcI8 = 0x0021, "ldc.i8", Int64, Next;
    LdcR4 = 0x0022, "ldc.r4", Float32, Next;
    LdcR8 = 0x0023, "ldc.r8", Float64, Next;
    Dup = 0x0025, "dup", None, Next;
    Pop = 0x0026, "pop", None, Next;
    Jmp = 0x0027, "jmp", Token, Call;
    Call = 0x0028, "call", Token, Call;
    Calli = 0x0029, "calli", Token, Call;
    Ret = 0x002A, "ret", None, Return;
    BrS = 0x002B, "br.s", ShortBranch, Branch;
    BrfalseS = 0x002C, "brfalse.s", ShortBranch, CondBranch;
    BrtrueS = 0x002D, "brtrue.s", ShortBranch, CondBranch;
    BeqS = 0x002E, "beq.s", ShortBranch, CondBranch;
    BgeS = 0x002F, "bge.s", ShortBranch, CondBranch;
    BgtS = 0x0030, "bgt.s", ShortBranch, CondBranch;
    BleS = 0x0031, "ble.s", ShortBranch, CondBranch;
    BltS = 0x0032, "blt.s", ShortBranch, CondBranch;
    BneUnS = 0x0033, "bne.un.s", ShortBranch, CondBranch;
    BgeUnS = 0x0034, "bge.un.s", ShortBranch, CondBranch;
    BgtUnS = 0x0035, "bgt.un.s", ShortBranch, CondBranch;
    BleUnS = 0x0036, "ble.un.s", ShortBranch, CondBranch;
    BltUnS = 0x0037, "blt.un.s", ShortBranch, CondBranch;
    Br = 0x0038, "br", Branch, Branch;
    Brfalse = 0x0039, "brfalse", Branch, CondBranch;
    Brtrue = 0x003A, "brtrue", Branch, CondBranch;
    Beq = 0x003B, "beq", Branch, CondBranch;
    Bge = 0x003C, "bge", Branch, CondBranch;
    Bgt = 0x003D, "bgt", Branch, CondBranch;
    Ble = 0x003E, "ble", Branch, CondBranch;
    Blt = 0x003F, "blt", Branch, CondBranch;
    BneUn = 0x0040, "bne.un", Branch, CondBranch;
    BgeUn = 0x0041, "bge.un", Branch, CondBranch;
    BgtUn = 0x0042, "bgt.un", Branch, CondBranch;
    BleUn = 0x0043, "ble.un", Branch, CondBranch;
    BltUn = 0x0044, "blt.un", Branch, CondBranch;
    Switch = 0x0045, "switch", Switch, CondBranch;
    LdindI1 = 0x0046, "ldind.i1", None, Next;
    LdindU1 = 0x0047, "ldind.u1", None, Next;
    LdindI2 = 0x0048, "ldind.i2", None, Next;
    LdindU2 = 0x0049, "ldind.u2", None, Next;
    LdindI4 = 0x004A, "ldind.i4", None, Next;
    LdindU4 = 0x004B, "ldind.u4", None, Next;
    LdindI8 = 0x004C, "ldind.i8", None, Next;
    LdindI = 0x004D, "ldind.i", None, Next;
    LdindR4 = 0x004E, "ldind.r4", None, Next;
    LdindR8 = 0x004F, "ldind.r8", None, Next;
    LdindRef = 0x0050, "ldind.ref", None, Next;
    StindRef = 0x0051, "stind.ref", None, Next;
    StindI1 = 0x0052, "stind.i1", None, Next;
    StindI2 = 0x0053, "stind.i2", None, Next;
    StindI4 = 0x0054, "stind.i4", None, Next;
    StindI8 = 0x0055, "stind.i8", None, Next;
    StindR4 = 0x0056, "stind.r4", None, Next;
    StindR8 = 0x0057, "stind.r8", None, Next;
    Add = 0x0058, "add", None, Next;
    Sub = 0x0059, "sub", None, Next;
    Mul = 0x005A, "mul", None, Next;
    Div = 0x005B, "div", None, Next;
    DivUn = 0x005C, "div.un", None, Next;
    Rem = 0x005D, "rem", None, Next;
    RemUn = 0x005E, "rem.un", None, Next;
    And = 0x005F, "and", None, Next;
    Or = 0x0060, "or", None, Next;
    Xor = 0x0061, "xor", None, Next;
    Shl = 0x0062, "shl", None, Next;
    Shr = 0x0063, "shr", None, Next;
    ShrUn = 0x0064, "shr.un", None, Next;
    Neg = 0x0065, "neg", None, Next;
    Not = 0x0066, "not", None, Next;
    ConvI1 = 0x0067, "conv.i1", None, Next;
    ConvI2 = 0x0068, "conv.i2", None, Next;
    ConvI4 = 0x0069, "conv.i4", None, Next;
    ConvI8 = 0x006A, "conv.i8", None, Next;
    ConvR4 = 0x006B, "conv.r4", None, Next;
    ConvR8 = 0x006C, "conv.r8", None, Next;
    ConvU4 = 0x006D, "conv.u4", None, Next;
    ConvU8 = 0x006E, "conv.u8", None, Next;
    Callvirt = 0x006F, "callvirt", Token, Call;
    Cpobj = 0x0070, "cpobj", Token, Next;
    Ldobj = 0x0071, "ldobj", Token, Next;
    Ldstr = 0x0072, "ldstr", Token, Next;
    Newobj = 0x0073, "newobj", Token, Call;
    Castclass = 0x0074, "castclass", Token, Next;
    Isinst = 0x0075, "isinst", Token, Next;
    ConvRUn = 0x0076, "conv.r.un", None, Next;
    Unbox = 0x0079, "unbox", Token, Next;
    Throw = 0x007A, "throw", None, Throw;
    Ldfld = 0x007B, "ldfld", Token, Next;
    Ldflda = 0x007C, "ldflda", Token, Next;
    Stfld = 0x007D, "stfld", Token, Next;
    Ldsfld = 0x007E, "ldsfld", Token, Next;
    Ldsflda = 0x007F, "ldsflda", Token, Next;
    Stsfld = 0x0080, "stsfld", Token, Next;
    Stobj = 0x0081, "stobj", Token, Next;
    ConvOvfI1Un = 0x0082, "conv.ovf.i1.un", None, Next;
    ConvOvfI2Un = 0x0083, "conv.ovf.i2.un", None, Next;
    ConvOvfI4Un = 0x0084, "conv.ovf.i4.un", None, Next;
    ConvOvfI8Un = 0x0085, "conv.ovf.i8.un", None, Next;
    ConvOvfU1Un = 0x0086, "conv.ovf.u1.un", None, Next;
    ConvOvfU2Un = 0x0087, "conv.ovf.u2.un", None, Next;
    ConvOvfU4Un = 0x0088, "conv.ovf.u4.un", None, Next;
    ConvOvfU8Un = 0x0089, "conv.ovf.u8.un", None, Next;
    ConvOvfIUn = 0x008A, "conv.ovf.i.un", None, Next;
    ConvOvfUUn = 0x008B, "conv.ovf.u.un", None, Next;
    Box = 0x008C, "box", Token, Next;
    Newarr = 0x008D, "newarr", Token, Next;
    Ldlen = 0x008E, "ldlen", None, Next;
    Ldelema = 0x008F, "ldelema", Token, Next;
    LdelemI1 = 0x0090, "ldelem.i1", None, Next;
    LdelemU1 = 0x0091, "ldelem.u1", None, Next;
    LdelemI2 = 0x0092, "ldelem.i2", None, Next;
    LdelemU2 = 0x0093, "ldelem.u2", None, Next;
    LdelemI4 = 0x0094, "ldelem.i4", None, Next;
    LdelemU4 = 0x0095, "ldelem.u4", None, Next;
    LdelemI8 = 0x0096, "ldelem.i8", None, Next;
    LdelemI = 0x0097, "ldelem.i", None, Next;
    LdelemR4 = 0x0098, "ldelem.r4", None, Next;
    LdelemR8 = 0x0099, "ldelem.r8", None, Next;
    LdelemRef = 0x009A, "ldelem.ref", None, Next;
    StelemI = 0x009B, "stelem.i", None, Next;
    StelemI1 = 0x009C, "stelem.i1", None, Next;
    StelemI2 = 0x009D, "stelem.i2", None, Next;
    StelemI4 = 0x009E, "stelem.i4", None, Next;
    StelemI8 = 0x009F, "stelem.i8", None, Next;
    StelemR4 = 0x00A0, "stelem.r4", None, Next;
    StelemR8 = 0x00A1, "stelem.r8", None, Next;
    StelemRef = 0x00A2, "stelem.ref", None, Next;
    Ldelem = 0x00A3, "ldelem", Token, Next;
    Stelem = 0x00A4, "stelem", Token, Next;
    UnboxAny = 0x00A5, "unbox.any", Token, Next;
    ConvOvfI1 = 0x00B3, "conv.ovf.i1", None, Next;
    ConvOvfU1 = 0x00B4, "conv.ovf.u1", None, Next;
    ConvOvfI2 = 0x00B5, "conv.ovf.i2", None, Next;
    ConvOvfU2 = 0x00B6, "conv.ovf.u2", None, Next;
    ConvOvfI4 = 0x00B7, "conv.ovf.i4", None, Next;
    ConvOvfU4 = 0x00B8, "conv.ovf.u4", None, Next;
    ConvOvfI8 = 0x00B9, "conv.ovf.i8", None, Next;
    ConvOvfU8 = 0x00BA, "conv.ovf.u8", None, Next;
    Refanyval = 0x00C2, "refanyval", Token, Next;
    Ckfinite = 0x00C3, "ckfinite", None, Next;
    Mkrefany = 0x00C6, "mkrefany", Token, Next;
    Ldtoken = 0x00D0, "ldtoken", Token, Next;
    ConvU2 = 0x00D1, "conv.u2", None, Next;
    ConvU1 = 0x00D2, "conv.u1", None, Next;
    ConvI = 0x00D3, "conv.i", None, Next;
    ConvOvfI = 0x00D4, "conv.ovf.i", None, Next;
    ConvOvfU = 0x00D5, "conv.ovf.u", None, Next;
    AddOvf = 0x00D6, "add.ovf", None, Next;
    AddOvfUn = 0x00D7, "add.ovf.un", None, Next;
    MulOvf = 0x00D8, "mul.ovf", None, Next;
    MulOvfUn = 0x00D9, "mul.ovf.un", None, Next;
    SubOvf = 0x00DA, "sub.ovf", None, Next;
    SubOvfUn = 0x00DB, "sub.ovf.un", None, Next;
    Endfinally = 0x00DC, "endfinally", None, Return;
    Leave = 0x00DD, "leave", Branch, Branch;
    LeaveS = 0x00DE, "leave.s", ShortBranch, Branch;
    StindI = 0x00DF, "stind.i", None, Next;
    ConvU = 0x00E0, "conv.u", None, Next;
    Arglist = 0xFE00, "arglist", None, Next;
    Ceq = 0xFE01, "ceq", None, Next;
    Cgt = 0xFE02, "cgt", None, Next;
    CgtUn = 0xFE03, "cgt.un", None, Next;
    Clt = 0xFE04, "clt", None, Next;
    CltUn = 0xFE05, "clt.un", None, Next;
    Ldftn = 0xFE06, "ldftn", Token, Next;
    Ldvirtftn = 0xFE07, "ldvirtftn", Token, Next;
    Ldarg = 0xFE09, "ldarg", Var, Next;
    Ldarga = 0xFE0A, "ldarga", Var, Next;
    Starg = 0xFE0B, "starg", Var, Next;
    Ldloc = 0xFE0C, "ldloc", Var, Next;
    Ldloca = 0xFE0D, "ldloca", Var, Next;
    Stloc = 0xFE0E, "stloc", Var, Next;
    Localloc = 0xFE0F, "localloc", None, Next;
    Endfilter = 0xFE11, "endfilter", None, Return;
    Unaligned = 0xFE12, "unaligned.", Byte, Meta;
    Volatile = 0xFE13, "volatile.", None, Meta;
    Tail = 0xFE14, "tail.", None, Meta;
    Initobj = 0xFE15, "initobj", Token, Next;
    Constrained = 0xFE16, "constrained.", Token, Meta;
    Cpblk = 0xFE17, "cpblk", None, Next;
    Initblk = 0xFE18, "initblk", None, Next;
    No = 0xFE19, "no.", Byte, Meta;
    Rethrow = 0xFE1A, "rethrow", None, Throw;
    Sizeof = 0xFE1C, "sizeof", Token, Next;
    Refanytype = 0xFE1D, "refanytype", None, Next;
    Readonly = 0xFE1E, "readonly.", None, Meta;
}

impl Opcode {
    /// Look up an opcode by mnemonic. Case-insensitive.
    pub fn from_name(name: &str) -> Option<Opcode> {
        Opcode::ALL
            .iter()
            .copied()
            .find(|op| op.name().eq_ignore_ascii_case(name))
    }

    /// Whether the opcode is encoded with the escape prefix.
    pub const fn is_escaped(self) -> bool {
        self.encoding() > 0xFF
    }

    /// Total encoded size of the opcode bytes (not counting operands).
    pub const fn opcode_size(self) -> u32 {
        if self.is_escaped() { 2 } else { 1 }
    }

    pub const fn is_prefix(self) -> bool {
        matches!(self.flow(), FlowKind::Meta)
    }

    /// Whether the instruction ends a basic block.
    pub const fn ends_block(self) -> bool {
        matches!(
            self.flow(),
            FlowKind::Branch | FlowKind::CondBranch | FlowKind::Return | FlowKind::Throw
        ) || matches!(self, Opcode::Jmp)
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodings_are_unique_and_reversible() {
        for &op in Opcode::ALL {
            assert_eq!(Opcode::from_encoding(op.encoding()), Some(op), "{op}");
        }
    }

    #[test]
    fn escape_prefix_is_not_an_opcode() {
        assert_eq!(Opcode::from_encoding(ESCAPE_PREFIX as u16), None);
        assert!(Opcode::Ceq.is_escaped());
        assert_eq!(Opcode::Ceq.opcode_size(), 2);
        assert!(!Opcode::Add.is_escaped());
    }

    #[test]
    fn lookup_by_name() {
        assert_eq!(Opcode::from_name("ldc.i4.s"), Some(Opcode::LdcI4S));
        assert_eq!(Opcode::from_name("UNBOX.ANY"), Some(Opcode::UnboxAny));
        assert_eq!(Opcode::from_name("constrained."), Some(Opcode::Constrained));
        assert_eq!(Opcode::from_name("bogus"), None);
    }

    #[test]
    fn block_terminators() {
        assert!(Opcode::Ret.ends_block());
        assert!(Opcode::LeaveS.ends_block());
        assert!(Opcode::Switch.ends_block());
        assert!(Opcode::Jmp.ends_block());
        assert!(!Opcode::Call.ends_block());
        assert!(Opcode::Tail.is_prefix());
    }
}
