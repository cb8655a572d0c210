//! In-memory images.
//!
//! Saving runs the general mark from the global roots, copies every
//! reachable object into a dense vector in discovery order and rewrites
//! the handles to match. Native entry points are dropped on the way, so a
//! restored image resolves them again on first call.

use ahash::AHashMap;

use crate::Value;
use crate::errors::ImageError;
use crate::globals::Globals;
use crate::heap::{Heap, HeapSettings, RootSet};
use crate::object::{HeaderFlags, HeapObject, ObjectBody};
use crate::visitor::Visitable;

#[derive(Debug, Clone)]
pub struct Image {
    objects: Vec<HeapObject>,
    /// Globals root array, relative to `objects`.
    root: Value,
}

impl Image {
    pub fn capture(heap: &mut Heap, globals: &Globals) -> Result<Self, ImageError> {
        let root = globals.save(heap);
        let order = heap.mark_general(&mut RootSet { roots: vec![root] });
        let remap: AHashMap<Value, Value> = order
            .iter()
            .enumerate()
            .map(|(i, &old)| (old, Value::from_index(i)))
            .collect();

        let mut missing = None;
        let mut objects = Vec::with_capacity(order.len());
        for &old in &order {
            let mut object = heap.get(old).clone();
            object.header.remove(HeaderFlags::MARK);
            object.visit_edges_mut(&mut |edge: &mut Value| {
                if edge.is_null() {
                    return;
                }
                match remap.get(edge) {
                    Some(&new) => *edge = new,
                    None => missing = Some(edge.raw()),
                }
            });
            if let ObjectBody::IdentityTable(table) = &mut object.body {
                table.rehash();
            }
            objects.push(object);
        }
        if let Some(raw) = missing {
            return Err(ImageError::DanglingReference(raw));
        }
        let root = remap.get(&root).copied().ok_or(ImageError::MalformedRoots)?;
        log::info!("image saved: {} objects", objects.len());
        Ok(Self { objects, root })
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    fn validate(&self) -> Result<(), ImageError> {
        let limit = self.objects.len();
        let in_range = |v: Value| v.is_null() || v.index() < limit;
        if self.root.is_null() || !in_range(self.root) {
            return Err(ImageError::MalformedRoots);
        }
        for object in &self.objects {
            let mut bad = None;
            object.visit_edges(&mut |edge: Value| {
                if !in_range(edge) {
                    bad = Some(edge.raw());
                }
            });
            if let Some(raw) = bad {
                return Err(ImageError::DanglingReference(raw));
            }
        }
        Ok(())
    }

    /// Fresh heap holding the image's objects, plus its globals.
    pub fn restore(self, settings: HeapSettings) -> Result<(Heap, Globals), ImageError> {
        self.validate()?;
        let root = self.root;
        let mut heap = Heap::from_objects(settings, self.objects);
        let globals = Globals::restore(&mut heap, root)?;
        log::info!("image restored: {} objects", heap.live_count());
        Ok((heap, globals))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::{alloc_identity_table, alloc_string};
    use crate::collections::{directory_at, directory_put};

    #[test]
    fn capture_drops_garbage_and_keeps_reachable_graph() {
        let mut heap = Heap::new(HeapSettings::default());
        let globals = Globals::create(&mut heap);
        let kept = alloc_string(&mut heap, "kept");
        directory_put(&mut heap, globals.system, "KEPT", kept);
        alloc_string(&mut heap, "garbage");

        let image = Image::capture(&mut heap, &globals).unwrap();
        assert!(image.object_count() < heap.live_count());

        let (restored, globals) = image.restore(HeapSettings::default()).unwrap();
        let kept = directory_at(&restored, globals.system, "KEPT");
        assert!(matches!(restored.body(kept), ObjectBody::String(s) if s == "kept"));
        assert_eq!(directory_at(&restored, globals.environment, "SYSTEM"), globals.system);
    }

    #[test]
    fn identity_tables_survive_relocation() {
        let mut heap = Heap::new(HeapSettings::default());
        // Shift every handle so relocation actually moves the keys.
        for _ in 0..16 {
            alloc_string(&mut heap, "padding");
        }
        let globals = Globals::create(&mut heap);
        let table = alloc_identity_table(&mut heap);
        let key = alloc_string(&mut heap, "key");
        let value = alloc_string(&mut heap, "value");
        if let ObjectBody::IdentityTable(t) = heap.body_mut(table) {
            t.put(value, key);
        }
        directory_put(&mut heap, globals.system, "TABLE", table);
        directory_put(&mut heap, globals.system, "KEY", key);

        let (restored, globals) = Image::capture(&mut heap, &globals)
            .unwrap()
            .restore(HeapSettings::default())
            .unwrap();
        let table = directory_at(&restored, globals.system, "TABLE");
        let key = directory_at(&restored, globals.system, "KEY");
        let ObjectBody::IdentityTable(t) = restored.body(table) else {
            panic!("expected an identity table");
        };
        assert!(matches!(restored.body(t.get(&key)), ObjectBody::String(s) if s == "value"));
    }

    #[test]
    fn malformed_images_are_rejected() {
        let image = Image {
            objects: vec![HeapObject::new(ObjectBody::Nil)],
            root: Value::from_index(5),
        };
        assert_eq!(
            image.restore(HeapSettings::default()).err(),
            Some(ImageError::MalformedRoots)
        );
    }
}
