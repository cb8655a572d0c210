//! Keyed-collection helpers shared by the interpreter and the built-in
//! methods. String keys are folded to upper case before they reach the
//! hash table.

use crate::Value;
use crate::hashtable::HashCollection;
use crate::heap::Heap;
use crate::object::ObjectBody;

#[inline]
pub fn canonical_key(key: &str) -> String {
    key.to_ascii_uppercase()
}

/// The string-keyed table of a Directory, StringTable, Relation or
/// variable dictionary.
pub fn string_table(heap: &Heap, collection: Value) -> Option<&HashCollection<String>> {
    if collection.is_null() {
        return None;
    }
    match heap.body(collection) {
        ObjectBody::Directory(dir) => Some(&dir.entries),
        ObjectBody::StringTable(table)
        | ObjectBody::Relation(table)
        | ObjectBody::Variables(table) => Some(table),
        _ => None,
    }
}

pub fn string_table_mut(
    heap: &mut Heap,
    collection: Value,
) -> Option<&mut HashCollection<String>> {
    if collection.is_null() {
        return None;
    }
    match heap.body_mut(collection) {
        ObjectBody::Directory(dir) => Some(&mut dir.entries),
        ObjectBody::StringTable(table)
        | ObjectBody::Relation(table)
        | ObjectBody::Variables(table) => Some(table),
        _ => None,
    }
}

pub fn directory_put(heap: &mut Heap, directory: Value, key: &str, value: Value) {
    if let Some(table) = string_table_mut(heap, directory) {
        table.put(value, canonical_key(key));
    }
}

/// Entry lookup without method or UNKNOWN fallback. NULL when absent.
pub fn directory_at(heap: &Heap, directory: Value, key: &str) -> Value {
    string_table(heap, directory).map_or(Value::NULL, |t| t.get(&canonical_key(key)))
}

pub fn directory_remove(heap: &mut Heap, directory: Value, key: &str) -> Value {
    string_table_mut(heap, directory).map_or(Value::NULL, |t| t.remove(&canonical_key(key)))
}

/// Shallow copy of a directory's entries into a fresh Directory.
pub fn directory_copy(heap: &mut Heap, directory: Value) -> Value {
    let body = heap.body(directory).clone();
    heap.allocate(body)
}

pub fn string_value(heap: &Heap, value: Value) -> Option<&str> {
    match heap.try_get(value).map(|o| &o.body) {
        Some(ObjectBody::String(s)) => Some(s.as_str()),
        _ => None,
    }
}

pub fn array_items(heap: &Heap, array: Value) -> Option<&[Value]> {
    if array.is_null() {
        return None;
    }
    match heap.body(array) {
        ObjectBody::Array(a) => Some(&a.items),
        _ => None,
    }
}
