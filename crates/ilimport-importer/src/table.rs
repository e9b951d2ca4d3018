//! In-memory metadata table implementing [`Resolver`].
//!
//! Classes form a single-inheritance tree, which is enough to answer the
//! three-valued cast questions exactly: an object whose static class is `A`
//! can be a `B` for sure when `B` is an ancestor of `A`, possibly when `B`
//! derives from `A`, and never otherwise.

use std::collections::HashMap;

use ilimport_bytecode::Token;
use ilimport_ir::{ClassHandle, FieldHandle, MethodHandle};

use crate::resolver::{
    ClassInfo, FieldInfo, MethodIl, MethodInfo, ResolvedToken, Resolver, TypeCompareState,
    WellKnownClass,
};

#[derive(Debug)]
pub struct MetadataTable {
    classes: Vec<ClassInfo>,
    fields: Vec<FieldInfo>,
    methods: Vec<MethodInfo>,
    bodies: HashMap<MethodHandle, MethodIl>,
    tokens: HashMap<Token, ResolvedToken>,
    well_known: HashMap<WellKnownClass, ClassHandle>,
}

impl Default for MetadataTable {
    fn default() -> Self {
        Self::new()
    }
}

impl MetadataTable {
    /// Create a table pre-populated with the well-known classes.
    pub fn new() -> Self {
        let mut table = Self {
            classes: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            bodies: HashMap::new(),
            tokens: HashMap::new(),
            well_known: HashMap::new(),
        };
        let object = table.add_class(ClassInfo::reference(WellKnownClass::Object.name()));
        table.well_known.insert(WellKnownClass::Object, object);
        for which in WellKnownClass::ALL {
            let info = match which {
                WellKnownClass::Object => continue,
                WellKnownClass::String => ClassInfo {
                    is_sealed: true,
                    parent: Some(object),
                    ..ClassInfo::reference(which.name())
                },
                WellKnownClass::TypedReference => ClassInfo::value_type(which.name(), 16),
                _ => ClassInfo::value_type(which.name(), 8),
            };
            let handle = table.add_class(info);
            table.well_known.insert(which, handle);
        }
        table
    }

    pub fn add_class(&mut self, info: ClassInfo) -> ClassHandle {
        self.classes.push(info);
        ClassHandle(self.classes.len() as u32 - 1)
    }

    pub fn add_field(&mut self, info: FieldInfo) -> FieldHandle {
        self.fields.push(info);
        FieldHandle(self.fields.len() as u32 - 1)
    }

    pub fn add_method(&mut self, info: MethodInfo) -> MethodHandle {
        self.methods.push(info);
        MethodHandle(self.methods.len() as u32 - 1)
    }

    pub fn set_body(&mut self, method: MethodHandle, il: MethodIl) {
        self.bodies.insert(method, il);
    }

    /// Make `token` resolve to `target` in every scope.
    pub fn bind(&mut self, token: Token, target: ResolvedToken) {
        self.tokens.insert(token, target);
    }

    pub fn object_class(&self) -> ClassHandle {
        self.well_known[&WellKnownClass::Object]
    }

    pub fn class_by_name(&self, name: &str) -> Option<ClassHandle> {
        self.classes
            .iter()
            .position(|c| c.name == name)
            .map(|i| ClassHandle(i as u32))
    }

    pub fn method_by_name(&self, name: &str) -> Option<MethodHandle> {
        self.methods
            .iter()
            .position(|m| m.name == name)
            .map(|i| MethodHandle(i as u32))
    }

    pub fn field_by_name(&self, name: &str) -> Option<FieldHandle> {
        self.fields
            .iter()
            .position(|f| f.name == name)
            .map(|i| FieldHandle(i as u32))
    }

    /// Methods that have an IL body, in handle order.
    pub fn methods_with_bodies(&self) -> Vec<MethodHandle> {
        let mut handles: Vec<MethodHandle> = self.bodies.keys().copied().collect();
        handles.sort();
        handles
    }

    /// Whether `ancestor` is `class` or one of its base classes.
    fn derives_from(&self, class: ClassHandle, ancestor: ClassHandle) -> bool {
        let mut cur = Some(class);
        while let Some(c) = cur {
            if c == ancestor {
                return true;
            }
            cur = self.class_info(c).and_then(|info| info.parent);
        }
        false
    }
}

impl Resolver for MetadataTable {
    fn resolve_token(&self, _scope: MethodHandle, token: Token) -> Option<ResolvedToken> {
        self.tokens.get(&token).copied()
    }

    fn class_info(&self, class: ClassHandle) -> Option<&ClassInfo> {
        self.classes.get(class.0 as usize)
    }

    fn field_info(&self, field: FieldHandle) -> Option<&FieldInfo> {
        self.fields.get(field.0 as usize)
    }

    fn method_info(&self, method: MethodHandle) -> Option<&MethodInfo> {
        self.methods.get(method.0 as usize)
    }

    fn method_il(&self, method: MethodHandle) -> Option<&MethodIl> {
        self.bodies.get(&method)
    }

    fn well_known_class(&self, which: WellKnownClass) -> Option<ClassHandle> {
        self.well_known.get(&which).copied()
    }

    fn compare_types_for_cast(&self, from: ClassHandle, to: ClassHandle) -> TypeCompareState {
        if self.derives_from(from, to) {
            TypeCompareState::Must
        } else if self.derives_from(to, from) {
            match self.class_info(from) {
                Some(info) if info.is_sealed || info.is_value_type => TypeCompareState::MustNot,
                _ => TypeCompareState::May,
            }
        } else {
            TypeCompareState::MustNot
        }
    }

    fn compare_types_for_equality(&self, a: ClassHandle, b: ClassHandle) -> TypeCompareState {
        if a == b {
            TypeCompareState::Must
        } else {
            TypeCompareState::MustNot
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hierarchy() -> (MetadataTable, ClassHandle, ClassHandle, ClassHandle) {
        let mut table = MetadataTable::new();
        let object = table.object_class();
        let animal = table.add_class(ClassInfo {
            parent: Some(object),
            ..ClassInfo::reference("Animal")
        });
        let dog = table.add_class(ClassInfo {
            parent: Some(animal),
            ..ClassInfo::reference("Dog")
        });
        let point = table.add_class(ClassInfo {
            parent: Some(object),
            ..ClassInfo::value_type("Point", 8)
        });
        (table, animal, dog, point)
    }

    #[test]
    fn cast_answers_follow_the_hierarchy() {
        let (table, animal, dog, point) = hierarchy();
        assert_eq!(table.compare_types_for_cast(dog, animal), TypeCompareState::Must);
        assert_eq!(table.compare_types_for_cast(animal, dog), TypeCompareState::May);
        assert_eq!(table.compare_types_for_cast(point, animal), TypeCompareState::MustNot);
        assert_eq!(
            table.compare_types_for_cast(point, table.object_class()),
            TypeCompareState::Must
        );
    }

    #[test]
    fn well_known_classes_are_registered() {
        let table = MetadataTable::new();
        let string = table.well_known_class(WellKnownClass::String).unwrap();
        assert_eq!(table.class_info(string).unwrap().name, "System.String");
        assert!(
            table
                .class_info(table.well_known_class(WellKnownClass::TypedReference).unwrap())
                .unwrap()
                .is_value_type
        );
    }

    #[test]
    fn tokens_resolve_in_any_scope() {
        let (mut table, animal, ..) = hierarchy();
        table.bind(Token(0x0200_0002), ResolvedToken::Class(animal));
        assert_eq!(
            table.resolve_token(MethodHandle(7), Token(0x0200_0002)),
            Some(ResolvedToken::Class(animal))
        );
        assert_eq!(table.resolve_token(MethodHandle(7), Token(0x0200_0009)), None);
    }
}
