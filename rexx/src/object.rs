use std::fmt;
use std::sync::Arc;

use crate::Value;
use crate::code::{Code, PackageDefinition};
use crate::hashtable::HashCollection;
use crate::native::{NativeFn, NativeSignature};
use crate::visitor::{Visitable, Visitor, VisitorMut};

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct HeaderFlags: u8 {
        const MARK = 1 << 0;
        const PIN = 1 << 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Nil,
    String,
    Array,
    Directory,
    StringTable,
    Relation,
    IdentityTable,
    Stem,
    Variable,
    Variables,
    Routine,
    Method,
    NativeRoutine,
    Package,
    Pointer,
    Class,
}

/// Collection classes reachable from the environment (`.ARRAY`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClassKind {
    Array,
    Directory,
    StringTable,
    Relation,
    IdentityTable,
    Stem,
}

impl ClassKind {
    pub const ALL: [ClassKind; 6] = [
        ClassKind::Array,
        ClassKind::Directory,
        ClassKind::StringTable,
        ClassKind::Relation,
        ClassKind::IdentityTable,
        ClassKind::Stem,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ClassKind::Array => "Array",
            ClassKind::Directory => "Directory",
            ClassKind::StringTable => "StringTable",
            ClassKind::Relation => "Relation",
            ClassKind::IdentityTable => "IdentityTable",
            ClassKind::Stem => "Stem",
        }
    }
}

/// Upper bound on the slots of one array.
pub const MAX_ARRAY_SIZE: usize = 1 << 24;

#[derive(Debug, Clone, Default)]
pub struct ArrayBody {
    pub items: Vec<Value>,
    /// Empty for a growable single-dimension array.
    pub dimensions: Vec<usize>,
}

impl ArrayBody {
    pub fn of(items: Vec<Value>) -> Self {
        Self {
            dimensions: vec![items.len()],
            items,
        }
    }

    /// Empty fixed-dimension array; `None` when the slot count would
    /// exceed [`MAX_ARRAY_SIZE`].
    pub fn with_dimensions(dimensions: Vec<usize>) -> Option<Self> {
        let size = if dimensions.is_empty() {
            0
        } else {
            dimensions.iter().try_fold(1usize, |size, &d| size.checked_mul(d))?
        };
        if size > MAX_ARRAY_SIZE {
            return None;
        }
        Some(Self {
            items: vec![Value::NULL; size],
            dimensions,
        })
    }

    pub fn dimension_count(&self) -> usize {
        self.dimensions.len().max(1)
    }

    /// Number of non-empty slots.
    pub fn item_count(&self) -> usize {
        self.items.iter().filter(|v| !v.is_null()).count()
    }

    /// Maps a 1-based index vector onto a slot in `items`.
    pub fn slot(&self, index: &[usize]) -> Option<usize> {
        if index.is_empty() || index.iter().any(|&i| i == 0) {
            return None;
        }
        if index.len() == 1 && self.dimensions.len() <= 1 {
            return Some(index[0] - 1);
        }
        if index.len() != self.dimensions.len() {
            return None;
        }
        let mut slot: usize = 0;
        for (&i, &dim) in index.iter().zip(&self.dimensions) {
            if i > dim {
                return None;
            }
            slot = slot.checked_mul(dim)?.checked_add(i - 1)?;
        }
        Some(slot)
    }

    pub fn put(&mut self, value: Value, index: &[usize]) -> bool {
        let Some(slot) = self.slot(index) else {
            return false;
        };
        if slot >= self.items.len() {
            if self.dimensions.len() > 1 || slot >= MAX_ARRAY_SIZE {
                return false;
            }
            self.items.resize(slot + 1, Value::NULL);
            if let Some(size) = self.dimensions.first_mut() {
                *size = self.items.len();
            }
        }
        self.items[slot] = value;
        true
    }

    pub fn at(&self, index: &[usize]) -> Value {
        self.slot(index)
            .and_then(|slot| self.items.get(slot).copied())
            .unwrap_or(Value::NULL)
    }
}

#[derive(Debug, Clone, Default)]
pub struct DirectoryBody {
    pub entries: HashCollection<String>,
    /// Methods attached per key with SETMETHOD.
    pub methods: HashCollection<String>,
    pub unknown: Value,
}

#[derive(Debug, Clone)]
pub struct StemBody {
    pub name: String,
    /// Value given to every tail by `stem. = value`; NULL when unset.
    pub default: Value,
    pub tails: HashCollection<String>,
}

#[derive(Debug, Clone)]
pub struct VariableBody {
    pub name: String,
    /// NULL while the variable is dropped.
    pub value: Value,
}

#[derive(Debug, Clone)]
pub struct CodeBody {
    pub name: String,
    pub code: Arc<Code>,
    pub package: Value,
}

/// Resolved native entry point. Never persisted.
#[derive(Clone, Copy)]
pub struct NativeEntry(pub NativeFn);

impl fmt::Debug for NativeEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeEntry({:p})", self.0 as *const ())
    }
}

#[derive(Debug, Clone)]
pub struct NativeRoutineBody {
    pub name: String,
    pub library: String,
    pub signature: NativeSignature,
    pub entry: Option<NativeEntry>,
    pub package: Value,
}

#[derive(Debug, Clone)]
pub struct PackageBody {
    pub name: String,
    pub definition: Arc<PackageDefinition>,
    pub install_pending: bool,
    pub routines: HashCollection<String>,
    pub public_routines: HashCollection<String>,
    pub merged_public: HashCollection<String>,
    /// Directory of floating methods, exposed as `.METHODS`.
    pub methods: Value,
    pub required: Vec<Value>,
    pub unresolved_requires: Vec<String>,
    pub security_manager: Value,
}

#[derive(Debug, Clone)]
pub enum ObjectBody {
    Nil,
    String(String),
    Array(ArrayBody),
    Directory(DirectoryBody),
    StringTable(HashCollection<String>),
    Relation(HashCollection<String>),
    IdentityTable(HashCollection<Value>),
    Stem(StemBody),
    Variable(VariableBody),
    Variables(HashCollection<String>),
    Routine(CodeBody),
    Method(CodeBody),
    NativeRoutine(NativeRoutineBody),
    Package(PackageBody),
    Pointer(usize),
    Class(ClassKind),
}

impl ObjectBody {
    pub fn kind(&self) -> ObjectKind {
        match self {
            ObjectBody::Nil => ObjectKind::Nil,
            ObjectBody::String(_) => ObjectKind::String,
            ObjectBody::Array(_) => ObjectKind::Array,
            ObjectBody::Directory(_) => ObjectKind::Directory,
            ObjectBody::StringTable(_) => ObjectKind::StringTable,
            ObjectBody::Relation(_) => ObjectKind::Relation,
            ObjectBody::IdentityTable(_) => ObjectKind::IdentityTable,
            ObjectBody::Stem(_) => ObjectKind::Stem,
            ObjectBody::Variable(_) => ObjectKind::Variable,
            ObjectBody::Variables(_) => ObjectKind::Variables,
            ObjectBody::Routine(_) => ObjectKind::Routine,
            ObjectBody::Method(_) => ObjectKind::Method,
            ObjectBody::NativeRoutine(_) => ObjectKind::NativeRoutine,
            ObjectBody::Package(_) => ObjectKind::Package,
            ObjectBody::Pointer(_) => ObjectKind::Pointer,
            ObjectBody::Class(_) => ObjectKind::Class,
        }
    }

    /// Default string form ("an Array") used when an object has no
    /// string value of its own.
    pub fn default_name(&self) -> String {
        match self {
            ObjectBody::Nil => "The NIL object".to_string(),
            ObjectBody::String(s) => s.clone(),
            ObjectBody::Routine(r) => format!("a Routine {}", r.name),
            ObjectBody::Method(m) => format!("a Method {}", m.name),
            ObjectBody::NativeRoutine(r) => format!("a Routine {}", r.name),
            ObjectBody::Package(p) => format!("a Package {}", p.name),
            ObjectBody::Class(c) => format!("The {} class", c.name()),
            other => {
                let name = format!("{:?}", other.kind());
                let article = if name.starts_with(['A', 'E', 'I', 'O', 'U']) {
                    "an"
                } else {
                    "a"
                };
                format!("{article} {name}")
            }
        }
    }
}

/// One slot of the heap arena.
#[derive(Debug, Clone)]
pub struct HeapObject {
    pub header: HeaderFlags,
    /// Attribute storage (a Variables dictionary), NULL until first EXPOSE.
    pub object_variables: Value,
    pub body: ObjectBody,
}

impl HeapObject {
    pub fn new(body: ObjectBody) -> Self {
        Self {
            header: HeaderFlags::empty(),
            object_variables: Value::NULL,
            body,
        }
    }

    #[inline]
    pub fn kind(&self) -> ObjectKind {
        self.body.kind()
    }

    #[inline]
    pub fn is_marked(&self) -> bool {
        self.header.contains(HeaderFlags::MARK)
    }

    #[inline]
    pub fn is_pinned(&self) -> bool {
        self.header.contains(HeaderFlags::PIN)
    }
}

impl Visitable for HeapObject {
    fn visit_edges(&self, visitor: &mut impl Visitor) {
        self.object_variables.visit_edges(visitor);
        match &self.body {
            ObjectBody::Nil
            | ObjectBody::String(_)
            | ObjectBody::Pointer(_)
            | ObjectBody::Class(_) => {}
            ObjectBody::Array(array) => array.items.visit_edges(visitor),
            ObjectBody::Directory(dir) => {
                dir.entries.visit_edges(visitor);
                dir.methods.visit_edges(visitor);
                dir.unknown.visit_edges(visitor);
            }
            ObjectBody::StringTable(table)
            | ObjectBody::Relation(table)
            | ObjectBody::Variables(table) => table.visit_edges(visitor),
            ObjectBody::IdentityTable(table) => table.visit_edges(visitor),
            ObjectBody::Stem(stem) => {
                stem.default.visit_edges(visitor);
                stem.tails.visit_edges(visitor);
            }
            ObjectBody::Variable(var) => var.value.visit_edges(visitor),
            ObjectBody::Routine(code) | ObjectBody::Method(code) => {
                code.package.visit_edges(visitor)
            }
            ObjectBody::NativeRoutine(native) => native.package.visit_edges(visitor),
            ObjectBody::Package(package) => {
                package.routines.visit_edges(visitor);
                package.public_routines.visit_edges(visitor);
                package.merged_public.visit_edges(visitor);
                package.methods.visit_edges(visitor);
                package.required.visit_edges(visitor);
                package.security_manager.visit_edges(visitor);
            }
        }
    }

    fn visit_edges_mut(&mut self, visitor: &mut impl VisitorMut) {
        self.object_variables.visit_edges_mut(visitor);
        match &mut self.body {
            ObjectBody::Nil
            | ObjectBody::String(_)
            | ObjectBody::Pointer(_)
            | ObjectBody::Class(_) => {}
            ObjectBody::Array(array) => array.items.visit_edges_mut(visitor),
            ObjectBody::Directory(dir) => {
                dir.entries.visit_edges_mut(visitor);
                dir.methods.visit_edges_mut(visitor);
                dir.unknown.visit_edges_mut(visitor);
            }
            ObjectBody::StringTable(table)
            | ObjectBody::Relation(table)
            | ObjectBody::Variables(table) => table.visit_edges_mut(visitor),
            ObjectBody::IdentityTable(table) => table.visit_edges_mut(visitor),
            ObjectBody::Stem(stem) => {
                stem.default.visit_edges_mut(visitor);
                stem.tails.visit_edges_mut(visitor);
            }
            ObjectBody::Variable(var) => var.value.visit_edges_mut(visitor),
            ObjectBody::Routine(code) | ObjectBody::Method(code) => {
                code.package.visit_edges_mut(visitor)
            }
            ObjectBody::NativeRoutine(native) => native.package.visit_edges_mut(visitor),
            ObjectBody::Package(package) => {
                package.routines.visit_edges_mut(visitor);
                package.public_routines.visit_edges_mut(visitor);
                package.merged_public.visit_edges_mut(visitor);
                package.methods.visit_edges_mut(visitor);
                package.required.visit_edges_mut(visitor);
                package.security_manager.visit_edges_mut(visitor);
            }
        }
    }

    fn visit_edges_general(&mut self, visitor: &mut impl Visitor) {
        if let ObjectBody::NativeRoutine(native) = &mut self.body {
            native.entry = None;
        }
        self.visit_edges(visitor);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn array_slots_single_and_multi() {
        let mut array = ArrayBody::default();
        assert!(array.put(Value::from_index(4), &[3]));
        assert_eq!(array.items.len(), 3);
        assert_eq!(array.at(&[3]), Value::from_index(4));
        assert!(array.at(&[1]).is_null());
        assert_eq!(array.dimension_count(), 1);

        let mut grid = ArrayBody {
            items: vec![Value::NULL; 6],
            dimensions: vec![2, 3],
        };
        assert_eq!(grid.dimension_count(), 2);
        assert!(grid.put(Value::from_index(9), &[2, 3]));
        assert_eq!(grid.items[5], Value::from_index(9));
        assert!(!grid.put(Value::from_index(9), &[3, 1]), "out of bounds");
        assert!(grid.at(&[1]).is_null(), "wrong arity");
    }

    #[test]
    fn array_growth_is_bounded() {
        let mut array = ArrayBody::default();
        assert!(!array.put(Value::from_index(1), &[999_999_999_999_999_999]));
        assert!(!array.put(Value::from_index(1), &[MAX_ARRAY_SIZE + 1]));
        assert!(array.items.is_empty());
        assert!(array.at(&[usize::MAX]).is_null());

        assert!(ArrayBody::with_dimensions(vec![usize::MAX, 2]).is_none(), "product overflows");
        assert!(ArrayBody::with_dimensions(vec![1 << 20, 1 << 20]).is_none());
        let grid = ArrayBody::with_dimensions(vec![2, 3]);
        assert_eq!(grid.map(|g| g.items.len()), Some(6));

        let wide = ArrayBody {
            items: Vec::new(),
            dimensions: vec![usize::MAX, usize::MAX],
        };
        assert_eq!(wide.slot(&[usize::MAX, usize::MAX]), None);
    }

    #[test]
    fn general_visit_clears_native_entry() {
        fn entry(
            _ctx: &mut crate::native::NativeContext<'_, '_>,
            _args: &[crate::native::NativeArgument],
        ) -> Result<Value, crate::condition::Unwind> {
            Ok(Value::NULL)
        }
        let mut object = HeapObject::new(ObjectBody::NativeRoutine(NativeRoutineBody {
            name: "F".into(),
            library: "LIB".into(),
            signature: NativeSignature::default(),
            entry: Some(NativeEntry(entry)),
            package: Value::from_index(2),
        }));
        let mut edges = Vec::new();
        object.visit_edges(&mut |v: Value| edges.push(v));
        assert_eq!(edges, vec![Value::from_index(2)]);
        let ObjectBody::NativeRoutine(native) = &object.body else {
            unreachable!()
        };
        assert!(native.entry.is_some(), "normal marking keeps the entry");

        object.visit_edges_general(&mut |_: Value| {});
        let ObjectBody::NativeRoutine(native) = &object.body else {
            unreachable!()
        };
        assert!(native.entry.is_none());
    }

    #[test]
    fn default_names_use_articles() {
        assert_eq!(ObjectBody::Array(ArrayBody::default()).default_name(), "an Array");
        assert_eq!(
            ObjectBody::Directory(DirectoryBody::default()).default_name(),
            "a Directory"
        );
    }
}
