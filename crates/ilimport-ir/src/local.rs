use crate::refs::ClassHandle;
use crate::types::VarType;

/// Where a local came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LocalKind {
    /// Method argument by index (`this` is argument 0).
    Arg(u16),
    /// IL local by index.
    Il(u16),
    /// Importer-created temp, tagged with the reason it was grabbed.
    Temp(&'static str),
}

/// Descriptor of an argument, IL local or temp.
#[derive(Clone, Debug, PartialEq)]
pub struct LocalDesc {
    pub kind: LocalKind,
    pub ty: VarType,
    pub class: Option<ClassHandle>,
    /// Whether `class` is the exact runtime class.
    pub class_exact: bool,
    /// Address taken somewhere in the method (`ldloca`/`ldarga`).
    pub address_exposed: bool,
    pub pinned: bool,
    /// Assigned at most once so far.
    pub single_def: bool,
    pub def_count: u32,
}

impl LocalDesc {
    pub fn new(kind: LocalKind, ty: VarType) -> Self {
        Self {
            kind,
            ty,
            class: None,
            class_exact: false,
            address_exposed: false,
            pinned: false,
            single_def: false,
            def_count: 0,
        }
    }

    pub fn with_class(mut self, class: Option<ClassHandle>) -> Self {
        self.class = class;
        self
    }

    pub fn is_temp(&self) -> bool {
        matches!(self.kind, LocalKind::Temp(_))
    }

    /// Record one more definition; `single_def` holds while there has been
    /// at most one.
    pub fn record_def(&mut self) {
        self.def_count += 1;
        self.single_def = self.def_count == 1;
    }
}
