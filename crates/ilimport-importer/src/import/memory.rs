//! Indirections, fields, block operations and arrays.

use ilimport_bytecode::{Opcode, Token};
use ilimport_ir::{
    ClassHandle, FieldHandle, Helper, NodeKind, NodeRef, RuntimeHandle, StackEntry, TypeInfo, VarType,
};

use super::Importer;
use super::prefix::Prefixes;
use crate::error::{BadCode, ImportResult};
use crate::resolver::SigType;

/// Type accessed by an `ldind.*` or `stind.*`.
pub(super) fn indirect_type(opcode: Opcode) -> SigType {
    use Opcode::*;
    match opcode {
        LdindI1 | StindI1 => SigType::I1,
        LdindU1 => SigType::U1,
        LdindI2 | StindI2 => SigType::I2,
        LdindU2 => SigType::U2,
        LdindI4 | StindI4 => SigType::I4,
        LdindU4 => SigType::U4,
        LdindI8 | StindI8 => SigType::I8,
        LdindI | StindI => SigType::I,
        LdindR4 | StindR4 => SigType::R4,
        LdindR8 | StindR8 => SigType::R8,
        LdindRef | StindRef => SigType::Ref(None),
        _ => SigType::Void,
    }
}

/// Element type of a typed `ldelem.*` or `stelem.*`.
pub(super) fn element_type(opcode: Opcode) -> SigType {
    use Opcode::*;
    match opcode {
        LdelemI1 | StelemI1 => SigType::I1,
        LdelemU1 => SigType::U1,
        LdelemI2 | StelemI2 => SigType::I2,
        LdelemU2 => SigType::U2,
        LdelemI4 | StelemI4 => SigType::I4,
        LdelemU4 => SigType::U4,
        LdelemI8 | StelemI8 => SigType::I8,
        LdelemI | StelemI => SigType::I,
        LdelemR4 | StelemR4 => SigType::R4,
        LdelemR8 | StelemR8 => SigType::R8,
        LdelemRef | StelemRef => SigType::Ref(None),
        _ => SigType::Void,
    }
}

impl Importer<'_> {
    /// Check that `entry` can be dereferenced.
    fn address(&self, entry: StackEntry, opcode: Opcode) -> ImportResult<NodeRef> {
        match entry.info {
            TypeInfo::Byref | TypeInfo::NativeInt => Ok(entry.node),
            other => Err(BadCode::type_mismatch(opcode, other).into()),
        }
    }

    fn index(&self, entry: StackEntry, opcode: Opcode) -> ImportResult<NodeRef> {
        match entry.info {
            TypeInfo::Int32 | TypeInfo::NativeInt => Ok(entry.node),
            other => Err(BadCode::type_mismatch(opcode, other).into()),
        }
    }

    /// Load a value of type `ty` from `addr`.
    pub(super) fn load_from(&mut self, addr: NodeRef, ty: SigType, volatile: bool) -> StackEntry {
        if let SigType::ValueType(class) = ty {
            let node = self.node(NodeKind::Obj(class), VarType::Struct, [addr]);
            self.ctx.set_class(node, Some(class));
            return StackEntry {
                node,
                info: TypeInfo::Struct(class),
            };
        }
        let var_type = ty.var_type(&self.config.target);
        let node = self.node(NodeKind::Indir { volatile }, var_type, [addr]);
        self.ctx.set_class(node, ty.class());
        let info = ty
            .type_info()
            .unwrap_or_else(|| TypeInfo::from_var_type(var_type));
        StackEntry { node, info }
    }

    /// A store of `value` through `addr` into a location of type `ty`.
    pub(super) fn store_to(
        &mut self,
        addr: NodeRef,
        value: StackEntry,
        ty: SigType,
        volatile: bool,
        opcode: Opcode,
    ) -> ImportResult<NodeRef> {
        let dest = ty.var_type(&self.config.target);
        let value = self.coerce_for_store(value, dest, ty.class(), opcode)?;
        Ok(match ty {
            SigType::ValueType(class) => self.node(NodeKind::StoreBlk(class), VarType::Void, [addr, value]),
            _ => self.node(NodeKind::StoreInd { ty: dest, volatile }, VarType::Void, [addr, value]),
        })
    }

    fn append_store(&mut self, store: NodeRef) {
        let depth = self.stack.depth();
        self.append_stmt(store, depth);
    }

    // ========================================================================
    // Indirections
    // ========================================================================

    pub(super) fn import_ldind(&mut self, opcode: Opcode, prefixes: &Prefixes) -> ImportResult<()> {
        let entry = self.pop()?;
        let addr = self.address(entry, opcode)?;
        let loaded = self.load_from(addr, indirect_type(opcode), prefixes.volatile);
        self.push(loaded.node, loaded.info)
    }

    pub(super) fn import_stind(&mut self, opcode: Opcode, prefixes: &Prefixes) -> ImportResult<()> {
        let operands = self.pop_n(2)?;
        let addr = self.address(operands[0], opcode)?;
        let store = self.store_to(addr, operands[1], indirect_type(opcode), prefixes.volatile, opcode)?;
        self.append_store(store);
        Ok(())
    }

    pub(super) fn import_ldobj(&mut self, token: Token, prefixes: &Prefixes) -> ImportResult<()> {
        let ty = self.class_sig(self.resolve_class(token)?)?;
        let entry = self.pop()?;
        let addr = self.address(entry, Opcode::Ldobj)?;
        let loaded = self.load_from(addr, ty, prefixes.volatile);
        self.push(loaded.node, loaded.info)
    }

    pub(super) fn import_stobj(&mut self, token: Token, prefixes: &Prefixes) -> ImportResult<()> {
        let ty = self.class_sig(self.resolve_class(token)?)?;
        let operands = self.pop_n(2)?;
        let addr = self.address(operands[0], Opcode::Stobj)?;
        let store = self.store_to(addr, operands[1], ty, prefixes.volatile, Opcode::Stobj)?;
        self.append_store(store);
        Ok(())
    }

    pub(super) fn import_cpobj(&mut self, token: Token) -> ImportResult<()> {
        let ty = self.class_sig(self.resolve_class(token)?)?;
        let operands = self.pop_n(2)?;
        let dest = self.address(operands[0], Opcode::Cpobj)?;
        let src = self.address(operands[1], Opcode::Cpobj)?;
        let value = self.load_from(src, ty, false);
        let store = self.store_to(dest, value, ty, false, Opcode::Cpobj)?;
        self.append_store(store);
        Ok(())
    }

    pub(super) fn import_initobj(&mut self, token: Token) -> ImportResult<()> {
        let class = self.resolve_class(token)?;
        let ty = self.class_sig(class)?;
        let entry = self.pop()?;
        let addr = self.address(entry, Opcode::Initobj)?;
        let store = match ty {
            SigType::ValueType(_) => {
                let size = self.class_info(class)?.size;
                let zero = self.ctx.int_con(0, VarType::Int);
                let size = self.ctx.int_con(i64::from(size), VarType::Int);
                self.node(NodeKind::InitBlk, VarType::Void, [addr, zero, size])
            }
            _ => {
                let dest = ty.var_type(&self.config.target);
                let zero = match dest {
                    VarType::Ref => self.ctx.null(),
                    VarType::Float | VarType::Double => self.ctx.dbl_con(0.0, dest),
                    other => self.ctx.int_con(0, other.actual()),
                };
                self.node(
                    NodeKind::StoreInd {
                        ty: dest,
                        volatile: false,
                    },
                    VarType::Void,
                    [addr, zero],
                )
            }
        };
        self.append_store(store);
        Ok(())
    }

    pub(super) fn import_cpblk(&mut self) -> ImportResult<()> {
        let operands = self.pop_n(3)?;
        let dest = self.address(operands[0], Opcode::Cpblk)?;
        let src = self.address(operands[1], Opcode::Cpblk)?;
        let size = self.index(operands[2], Opcode::Cpblk)?;
        let copy = self.node(NodeKind::CopyBlk, VarType::Void, [dest, src, size]);
        self.append_store(copy);
        Ok(())
    }

    pub(super) fn import_initblk(&mut self) -> ImportResult<()> {
        let operands = self.pop_n(3)?;
        let dest = self.address(operands[0], Opcode::Initblk)?;
        let value = self.index(operands[1], Opcode::Initblk)?;
        let size = self.index(operands[2], Opcode::Initblk)?;
        let init = self.node(NodeKind::InitBlk, VarType::Void, [dest, value, size]);
        self.append_store(init);
        Ok(())
    }

    pub(super) fn import_localloc(&mut self) -> ImportResult<()> {
        let entry = self.pop()?;
        let size = self.index(entry, Opcode::Localloc)?;
        if self.ctx.block(self.block).handler_index.is_some() {
            return Err(BadCode::IllegalInRegion(Opcode::Localloc).into());
        }
        if !self.stack.is_empty() {
            return Err(BadCode::LocallocStackNotEmpty.into());
        }
        let native = self.native_int();
        let node = self.node(NodeKind::LocAlloc, native, [size]);
        self.push(node, TypeInfo::NativeInt)
    }

    pub(super) fn import_sizeof(&mut self, token: Token) -> ImportResult<()> {
        let class = self.resolve_class(token)?;
        let info = self.class_info(class)?;
        let size = if info.is_value_type {
            info.size
        } else {
            self.config.target.pointer_size()
        };
        let node = self.ctx.int_con(i64::from(size), VarType::Int);
        self.push(node, TypeInfo::Int32)
    }

    // ========================================================================
    // Fields
    // ========================================================================

    /// Address of an instance field of the object (or value) in `object`.
    fn field_address(
        &mut self,
        field: FieldHandle,
        object: StackEntry,
        opcode: Opcode,
    ) -> ImportResult<NodeRef> {
        let base = match object.info {
            TypeInfo::Ref(_) | TypeInfo::Null | TypeInfo::Byref | TypeInfo::NativeInt => object.node,
            TypeInfo::Struct(class) => match *self.ctx.kind(object.node) {
                NodeKind::LclVar(local) => {
                    self.ctx.local_mut(local).address_exposed = true;
                    self.ctx.lcl_addr(local)
                }
                _ => {
                    let temp = self.ctx.grab_temp("struct field access", VarType::Struct);
                    self.ctx.local_mut(temp).class = Some(class);
                    self.local_infos[temp] = Some(object.info);
                    let store = self.ctx.store_lcl(temp, object.node);
                    self.ctx.local_mut(temp).record_def();
                    let depth = self.stack.depth();
                    self.append_stmt(store, depth);
                    self.ctx.lcl_addr(temp)
                }
            },
            other => return Err(BadCode::type_mismatch(opcode, other).into()),
        };
        let addr = self.node(NodeKind::FieldAddr(field), VarType::Byref, [base]);
        Ok(addr)
    }

    /// Evaluate the unused object operand of a static field access.
    fn discard_object(&mut self, object: StackEntry) {
        if self.ctx.effects(object.node).has_side_effects() {
            let depth = self.stack.depth();
            self.append_stmt(object.node, depth);
        }
    }

    pub(super) fn import_ldfld(&mut self, token: Token, is_addr: bool, prefixes: &Prefixes) -> ImportResult<()> {
        let field = self.resolve_field(token)?;
        let info = self.field_info(field)?;
        let object = self.pop()?;
        if info.is_static {
            self.discard_object(object);
            return self.import_ldsfld(token, is_addr, prefixes);
        }
        let opcode = if is_addr { Opcode::Ldflda } else { Opcode::Ldfld };
        let addr = self.field_address(field, object, opcode)?;
        if is_addr {
            return self.push(addr, TypeInfo::Byref);
        }
        let loaded = self.load_from(addr, info.ty, prefixes.volatile);
        self.push(loaded.node, loaded.info)
    }

    pub(super) fn import_stfld(&mut self, token: Token, prefixes: &Prefixes) -> ImportResult<()> {
        let field = self.resolve_field(token)?;
        let info = self.field_info(field)?;
        let operands = self.pop_n(2)?;
        let (object, value) = (operands[0], operands[1]);
        let addr = if info.is_static {
            self.discard_object(object);
            self.node(NodeKind::StaticAddr(field), VarType::Byref, [])
        } else {
            if matches!(object.info, TypeInfo::Struct(_)) {
                return Err(BadCode::type_mismatch(Opcode::Stfld, object.info).into());
            }
            self.field_address(field, object, Opcode::Stfld)?
        };
        let store = self.store_to(addr, value, info.ty, prefixes.volatile, Opcode::Stfld)?;
        self.append_store(store);
        Ok(())
    }

    pub(super) fn import_ldsfld(&mut self, token: Token, is_addr: bool, prefixes: &Prefixes) -> ImportResult<()> {
        let field = self.resolve_field(token)?;
        let info = self.field_info(field)?;
        let addr = self.node(NodeKind::StaticAddr(field), VarType::Byref, []);
        if is_addr {
            return self.push(addr, TypeInfo::Byref);
        }
        let loaded = self.load_from(addr, info.ty, prefixes.volatile);
        self.push(loaded.node, loaded.info)
    }

    pub(super) fn import_stsfld(&mut self, token: Token, prefixes: &Prefixes) -> ImportResult<()> {
        let field = self.resolve_field(token)?;
        let info = self.field_info(field)?;
        let value = self.pop()?;
        let addr = self.node(NodeKind::StaticAddr(field), VarType::Byref, []);
        let store = self.store_to(addr, value, info.ty, prefixes.volatile, Opcode::Stsfld)?;
        self.append_store(store);
        Ok(())
    }

    // ========================================================================
    // Arrays
    // ========================================================================

    fn element_size(&self, ty: SigType) -> ImportResult<u32> {
        let target = &self.config.target;
        Ok(match ty {
            SigType::ValueType(class) => self.class_info(class)?.size,
            other => other
                .var_type(target)
                .size(target)
                .unwrap_or_else(|| target.pointer_size()),
        })
    }

    fn element_address(
        &mut self,
        array: StackEntry,
        index: StackEntry,
        ty: SigType,
        opcode: Opcode,
    ) -> ImportResult<NodeRef> {
        if !array.info.is_object() {
            return Err(BadCode::type_mismatch(opcode, array.info).into());
        }
        let index = self.index(index, opcode)?;
        let elem = ty.var_type(&self.config.target);
        let elem_size = self.element_size(ty)?;
        Ok(self.node(NodeKind::ArrElemAddr { elem, elem_size }, VarType::Byref, [array.node, index]))
    }

    pub(super) fn import_newarr(&mut self, token: Token) -> ImportResult<()> {
        let class = self.resolve_class(token)?;
        let entry = self.pop()?;
        let length = self.index(entry, Opcode::Newarr)?;
        let handle = self.class_handle(class);
        let node = self.call_helper(Helper::NewArray, VarType::Ref, [handle, length]);
        self.push(node, TypeInfo::Ref(None))
    }

    pub(super) fn import_ldlen(&mut self) -> ImportResult<()> {
        let array = self.pop()?;
        if !array.info.is_object() {
            return Err(BadCode::type_mismatch(Opcode::Ldlen, array.info).into());
        }
        let native = self.native_int();
        let node = self.node(NodeKind::ArrLen, native, [array.node]);
        self.push(node, TypeInfo::NativeInt)
    }

    pub(super) fn import_ldelema(&mut self, token: Token) -> ImportResult<()> {
        let ty = self.class_sig(self.resolve_class(token)?)?;
        let operands = self.pop_n(2)?;
        let addr = self.element_address(operands[0], operands[1], ty, Opcode::Ldelema)?;
        self.push(addr, TypeInfo::Byref)
    }

    pub(super) fn import_ldelem(&mut self, ty: SigType) -> ImportResult<()> {
        let operands = self.pop_n(2)?;
        let addr = self.element_address(operands[0], operands[1], ty, Opcode::Ldelem)?;
        let loaded = self.load_from(addr, ty, false);
        self.push(loaded.node, loaded.info)
    }

    pub(super) fn import_stelem(&mut self, ty: SigType) -> ImportResult<()> {
        let operands = self.pop_n(3)?;
        let (array, index, value) = (operands[0], operands[1], operands[2]);
        if let SigType::Ref(_) = ty {
            // Storing a reference needs the covariance check.
            if !array.info.is_object() {
                return Err(BadCode::type_mismatch(Opcode::StelemRef, array.info).into());
            }
            let index = self.index(index, Opcode::StelemRef)?;
            let value = self.coerce_for_store(value, VarType::Ref, None, Opcode::StelemRef)?;
            let call = self.call_helper(Helper::ArrayStoreCheck, VarType::Void, [array.node, index, value]);
            self.append_store(call);
            return Ok(());
        }
        let addr = self.element_address(array, index, ty, Opcode::Stelem)?;
        let store = self.store_to(addr, value, ty, false, Opcode::Stelem)?;
        self.append_store(store);
        Ok(())
    }

    /// Runtime handle of `class` as a helper argument.
    pub(super) fn class_handle(&mut self, class: ClassHandle) -> NodeRef {
        let native = self.native_int();
        self.node(NodeKind::Handle(RuntimeHandle::Class(class)), native, [])
    }
}

#[cfg(test)]
mod tests {
    use ilimport_ir::{IrContext, TargetInfo};

    use super::*;
    use crate::config::ImportConfig;
    use crate::import::testing::single_method;

    #[test]
    fn indirection_errors_name_the_instruction() {
        let (table, method) = single_method(Vec::new());
        let config = ImportConfig::default();
        let mut ctx = IrContext::new(TargetInfo::X64);
        let mut importer = Importer::new(&table, &config, &mut ctx, method).expect("session");
        let prefixes = Prefixes::default();

        let not_an_address = importer.ctx.int_con(8, VarType::Int);
        importer.stack.push(not_an_address, TypeInfo::Int32).unwrap();
        let err = importer.import_ldind(Opcode::LdindU2, &prefixes).unwrap_err();
        assert_eq!(
            err.bad_code(),
            Some(&BadCode::type_mismatch(Opcode::LdindU2, TypeInfo::Int32))
        );

        let value = importer.ctx.dbl_con(1.5, VarType::Double);
        importer.stack.push(not_an_address, TypeInfo::Int32).unwrap();
        importer.stack.push(value, TypeInfo::Double).unwrap();
        let err = importer.import_stind(Opcode::StindR8, &prefixes).unwrap_err();
        assert_eq!(
            err.bad_code(),
            Some(&BadCode::type_mismatch(Opcode::StindR8, TypeInfo::Int32))
        );
    }

    #[test]
    fn typed_access_opcodes() {
        assert_eq!(indirect_type(Opcode::LdindU2), SigType::U2);
        assert_eq!(indirect_type(Opcode::StindRef), SigType::Ref(None));
        assert_eq!(element_type(Opcode::LdelemR8), SigType::R8);
        assert_eq!(element_type(Opcode::StelemI), SigType::I);
        assert_eq!(element_type(Opcode::Add), SigType::Void);
    }
}
