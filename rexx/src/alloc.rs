use crate::Value;
use crate::hashtable::HashCollection;
use crate::heap::Heap;
use crate::object::{ArrayBody, DirectoryBody, ObjectBody, StemBody, VariableBody};

/// Allocate a String object.
pub fn alloc_string(heap: &mut Heap, text: impl Into<String>) -> Value {
    heap.allocate(ObjectBody::String(text.into()))
}

/// Allocate a single-dimension Array holding `items`.
pub fn alloc_array(heap: &mut Heap, items: Vec<Value>) -> Value {
    heap.allocate(ObjectBody::Array(ArrayBody::of(items)))
}

/// Allocate an empty Array with fixed dimensions (`.array~new(2, 3)`).
/// `None` when the dimensions ask for more than the largest array.
pub fn alloc_array_dimensions(heap: &mut Heap, dimensions: Vec<usize>) -> Option<Value> {
    let body = ArrayBody::with_dimensions(dimensions)?;
    Some(heap.allocate(ObjectBody::Array(body)))
}

/// Allocate an Array of strings.
pub fn alloc_string_array<S: AsRef<str>>(heap: &mut Heap, items: &[S]) -> Value {
    let values = items
        .iter()
        .map(|s| alloc_string(heap, s.as_ref()))
        .collect();
    alloc_array(heap, values)
}

pub fn alloc_directory(heap: &mut Heap) -> Value {
    heap.allocate(ObjectBody::Directory(DirectoryBody::default()))
}

pub fn alloc_string_table(heap: &mut Heap) -> Value {
    heap.allocate(ObjectBody::StringTable(HashCollection::new()))
}

pub fn alloc_relation(heap: &mut Heap) -> Value {
    heap.allocate(ObjectBody::Relation(HashCollection::new()))
}

pub fn alloc_identity_table(heap: &mut Heap) -> Value {
    heap.allocate(ObjectBody::IdentityTable(HashCollection::new()))
}

pub fn alloc_stem(heap: &mut Heap, name: &str, default: Value) -> Value {
    heap.allocate(ObjectBody::Stem(StemBody {
        name: name.to_string(),
        default,
        tails: HashCollection::new(),
    }))
}

pub fn alloc_variable(heap: &mut Heap, name: &str, value: Value) -> Value {
    heap.allocate(ObjectBody::Variable(VariableBody {
        name: name.to_string(),
        value,
    }))
}

/// Allocate an empty variable dictionary.
pub fn alloc_variables(heap: &mut Heap) -> Value {
    heap.allocate(ObjectBody::Variables(HashCollection::new()))
}
