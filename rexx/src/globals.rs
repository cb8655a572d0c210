//! Process-wide objects: the special objects, the environment, kernel and
//! system directories, the program registry and the literal intern table.
//!
//! Globals come into being exactly one of two ways: [`Globals::create`]
//! bootstraps a fresh heap, [`Globals::restore`] reads them back from the
//! root array of a saved image.

use crate::Value;
use crate::alloc::{alloc_array, alloc_directory, alloc_string, alloc_string_table};
use crate::collections::{array_items, directory_put};
use crate::errors::ImageError;
use crate::heap::{Heap, RootProvider};
use crate::object::{ClassKind, ObjectBody, ObjectKind};

#[derive(Debug, Clone, Copy)]
pub struct SpecialObjects {
    pub nil: Value,
    pub true_: Value,
    pub false_: Value,
    pub empty: Value,
}

#[derive(Debug, Clone)]
pub struct Globals {
    pub special: SpecialObjects,
    /// `.ENVIRONMENT`, the directory behind `.NAME` lookups.
    pub environment: Value,
    pub kernel: Value,
    pub system: Value,
    /// Registered packages by upper-case name.
    pub programs: Value,
    /// Program literals, shared by text.
    pub interned: Value,
}

const CLASSES: [ClassKind; 6] = [
    ClassKind::Array,
    ClassKind::Directory,
    ClassKind::StringTable,
    ClassKind::Relation,
    ClassKind::IdentityTable,
    ClassKind::Stem,
];

/// Slots of the saved root array, in order.
const ROOT_SLOTS: usize = 9;

impl Globals {
    pub fn create(heap: &mut Heap) -> Self {
        let nil = heap.allocate(ObjectBody::Nil);
        let true_ = alloc_string(heap, "1");
        let false_ = alloc_string(heap, "0");
        let empty = alloc_string(heap, "");
        for special in [nil, true_, false_, empty] {
            heap.pin(special);
        }

        let environment = alloc_directory(heap);
        let kernel = alloc_directory(heap);
        let system = alloc_directory(heap);
        let programs = alloc_directory(heap);
        let interned = alloc_string_table(heap);

        directory_put(heap, environment, "NIL", nil);
        directory_put(heap, environment, "TRUE", true_);
        directory_put(heap, environment, "FALSE", false_);
        directory_put(heap, environment, "ENVIRONMENT", environment);
        directory_put(heap, environment, "KERNEL", kernel);
        directory_put(heap, environment, "SYSTEM", system);
        for class in CLASSES {
            let object = heap.allocate(ObjectBody::Class(class));
            directory_put(heap, environment, class.name(), object);
            directory_put(heap, kernel, class.name(), object);
        }
        log::debug!("globals created, {} objects", heap.live_count());

        Self {
            special: SpecialObjects {
                nil,
                true_,
                false_,
                empty,
            },
            environment,
            kernel,
            system,
            programs,
            interned,
        }
    }

    pub fn boolean(&self, value: bool) -> Value {
        if value {
            self.special.true_
        } else {
            self.special.false_
        }
    }

    /// The shared String for `text`, allocated on first request.
    pub fn intern(&self, heap: &mut Heap, text: &str) -> Value {
        if text.is_empty() {
            return self.special.empty;
        }
        let key = text.to_string();
        if let ObjectBody::StringTable(table) = heap.body(self.interned) {
            let existing = table.get(&key);
            if !existing.is_null() {
                return existing;
            }
        }
        let value = alloc_string(heap, text);
        if let ObjectBody::StringTable(table) = heap.body_mut(self.interned) {
            table.put(value, key);
        }
        value
    }

    fn slots(&self) -> [Value; ROOT_SLOTS] {
        [
            self.special.nil,
            self.special.true_,
            self.special.false_,
            self.special.empty,
            self.environment,
            self.kernel,
            self.system,
            self.programs,
            self.interned,
        ]
    }

    /// Root array handed to the image writer.
    pub fn save(&self, heap: &mut Heap) -> Value {
        alloc_array(heap, self.slots().to_vec())
    }

    /// Reads the globals back from the root array of a restored image.
    pub fn restore(heap: &mut Heap, root: Value) -> Result<Self, ImageError> {
        let items = array_items(heap, root).ok_or(ImageError::MalformedRoots)?;
        let items: [Value; ROOT_SLOTS] = items.try_into().map_err(|_| ImageError::MalformedRoots)?;
        let kind = |v: Value| heap.try_get(v).map(|o| o.kind());
        let expected = [
            ObjectKind::Nil,
            ObjectKind::String,
            ObjectKind::String,
            ObjectKind::String,
            ObjectKind::Directory,
            ObjectKind::Directory,
            ObjectKind::Directory,
            ObjectKind::Directory,
            ObjectKind::StringTable,
        ];
        if items.iter().zip(expected).any(|(&v, k)| kind(v) != Some(k)) {
            return Err(ImageError::MalformedRoots);
        }
        let [nil, true_, false_, empty, environment, kernel, system, programs, interned] = items;
        for special in [nil, true_, false_, empty] {
            heap.pin(special);
        }
        log::debug!("globals restored, {} objects", heap.live_count());
        Ok(Self {
            special: SpecialObjects {
                nil,
                true_,
                false_,
                empty,
            },
            environment,
            kernel,
            system,
            programs,
            interned,
        })
    }
}

impl RootProvider for Globals {
    fn visit_roots(&mut self, visitor: &mut dyn FnMut(&mut Value)) {
        let SpecialObjects {
            nil,
            true_,
            false_,
            empty,
        } = &mut self.special;
        for root in [
            nil,
            true_,
            false_,
            empty,
            &mut self.environment,
            &mut self.kernel,
            &mut self.system,
            &mut self.programs,
            &mut self.interned,
        ] {
            visitor(root);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collections::directory_at;
    use crate::heap::HeapSettings;

    #[test]
    fn environment_holds_specials_and_classes() {
        let mut heap = Heap::new(HeapSettings::default());
        let globals = Globals::create(&mut heap);
        assert_eq!(directory_at(&heap, globals.environment, "NIL"), globals.special.nil);
        assert_eq!(directory_at(&heap, globals.environment, "TRUE"), globals.boolean(true));
        let array = directory_at(&heap, globals.environment, "ARRAY");
        assert!(matches!(heap.body(array), ObjectBody::Class(ClassKind::Array)));
    }

    #[test]
    fn interned_literals_are_shared() {
        let mut heap = Heap::new(HeapSettings::default());
        let globals = Globals::create(&mut heap);
        let a = globals.intern(&mut heap, "hello");
        let b = globals.intern(&mut heap, "hello");
        assert_eq!(a, b);
        assert_ne!(a, globals.intern(&mut heap, "other"));
        assert_eq!(globals.intern(&mut heap, ""), globals.special.empty);
    }

    #[test]
    fn save_and_restore_round_trip_the_roots() {
        let mut heap = Heap::new(HeapSettings::default());
        let globals = Globals::create(&mut heap);
        let root = globals.save(&mut heap);
        let restored = Globals::restore(&mut heap, root).unwrap();
        assert_eq!(restored.slots(), globals.slots());

        let bogus = alloc_array(&mut heap, vec![globals.special.nil]);
        assert_eq!(
            Globals::restore(&mut heap, bogus).unwrap_err(),
            ImageError::MalformedRoots
        );
    }
}
