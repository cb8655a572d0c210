//! Precise mark/sweep heap.
//!
//! Objects live in an arena of slots addressed by [`Value`] handles.
//! Allocation never collects by itself; it only raises a request that the
//! interpreter honours at its next safe point (a clause boundary), where
//! every live handle is reachable from a [`RootProvider`].

use crate::Value;
use crate::object::{HeaderFlags, HeapObject, ObjectBody};
use crate::visitor::Visitable;

/// Consumers implement this to provide GC roots.
///
/// The visitor receives `&mut Value` so the same walk can be used to
/// relocate roots when an image is restored.
pub trait RootProvider {
    fn visit_roots(&mut self, visitor: &mut dyn FnMut(&mut Value));
}

/// Root provider over a plain list of handles.
#[derive(Debug, Default)]
pub struct RootSet {
    pub roots: Vec<Value>,
}

#[cfg(test)]
impl RootSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, value: Value) {
        self.roots.push(value);
    }
}

impl RootProvider for RootSet {
    fn visit_roots(&mut self, visitor: &mut dyn FnMut(&mut Value)) {
        for root in &mut self.roots {
            visitor(root);
        }
    }
}

// ── Heap settings ─────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct HeapSettings {
    /// Slots reserved up front.
    pub initial_capacity: usize,
    /// Allocations between two requested collections.
    pub allocations_before_gc: usize,
    /// Collect at every safe point and never reuse a freed slot, so a
    /// missing mark turns into a dangling-handle panic.
    pub stress: bool,
}

impl Default for HeapSettings {
    fn default() -> Self {
        Self {
            initial_capacity: 1024,
            allocations_before_gc: 10_000,
            stress: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcStats {
    pub collections: usize,
    pub marked: usize,
    pub swept: usize,
    pub live: usize,
}

pub struct Heap {
    slots: Vec<Option<HeapObject>>,
    free: Vec<usize>,
    live: usize,
    allocated_since_gc: usize,
    settings: HeapSettings,
    stats: GcStats,
}

impl Heap {
    pub fn new(settings: HeapSettings) -> Self {
        Self {
            slots: Vec::with_capacity(settings.initial_capacity),
            free: Vec::new(),
            live: 0,
            allocated_since_gc: 0,
            settings,
            stats: GcStats::default(),
        }
    }

    /// Rebuilds a heap from image slots; every slot is live.
    pub(crate) fn from_objects(settings: HeapSettings, objects: Vec<HeapObject>) -> Self {
        let live = objects.len();
        Self {
            slots: objects.into_iter().map(Some).collect(),
            free: Vec::new(),
            live,
            allocated_since_gc: 0,
            settings,
            stats: GcStats {
                live,
                ..GcStats::default()
            },
        }
    }

    pub fn settings(&self) -> &HeapSettings {
        &self.settings
    }

    pub fn stats(&self) -> GcStats {
        self.stats
    }

    pub fn live_count(&self) -> usize {
        self.live
    }

    pub fn allocate(&mut self, body: ObjectBody) -> Value {
        let object = HeapObject::new(body);
        self.allocated_since_gc += 1;
        self.live += 1;
        if !self.settings.stress {
            if let Some(index) = self.free.pop() {
                self.slots[index] = Some(object);
                return Value::from_index(index);
            }
        }
        self.slots.push(Some(object));
        Value::from_index(self.slots.len() - 1)
    }

    /// Whether the next safe point should collect.
    #[inline]
    pub fn should_collect(&self) -> bool {
        self.settings.stress || self.allocated_since_gc >= self.settings.allocations_before_gc
    }

    #[inline]
    pub fn is_live(&self, value: Value) -> bool {
        !value.is_null() && matches!(self.slots.get(value.index()), Some(Some(_)))
    }

    #[inline]
    pub fn try_get(&self, value: Value) -> Option<&HeapObject> {
        if value.is_null() {
            return None;
        }
        self.slots.get(value.index()).and_then(|s| s.as_ref())
    }

    #[inline]
    pub fn get(&self, value: Value) -> &HeapObject {
        match self.try_get(value) {
            Some(object) => object,
            None => panic!("dangling heap reference {value:?}"),
        }
    }

    #[inline]
    pub fn get_mut(&mut self, value: Value) -> &mut HeapObject {
        let slot = if value.is_null() {
            None
        } else {
            self.slots.get_mut(value.index()).and_then(|s| s.as_mut())
        };
        match slot {
            Some(object) => object,
            None => panic!("dangling heap reference {value:?}"),
        }
    }

    #[inline]
    pub fn body(&self, value: Value) -> &ObjectBody {
        &self.get(value).body
    }

    #[inline]
    pub fn body_mut(&mut self, value: Value) -> &mut ObjectBody {
        &mut self.get_mut(value).body
    }

    pub fn pin(&mut self, value: Value) {
        self.get_mut(value).header.insert(HeaderFlags::PIN);
    }

    // ── Collection ────────────────────────────────────────────────────

    fn mark_from(&mut self, mut worklist: Vec<Value>, general: bool) -> Vec<Value> {
        let mut discovered = Vec::new();
        while let Some(value) = worklist.pop() {
            let Some(Some(object)) = self.slots.get_mut(value.index()) else {
                panic!("root or edge refers to freed object {value:?}");
            };
            if object.is_marked() {
                continue;
            }
            object.header.insert(HeaderFlags::MARK);
            discovered.push(value);
            let mut push = |edge: Value| worklist.push(edge);
            if general {
                object.visit_edges_general(&mut push);
            } else {
                object.visit_edges(&mut push);
            }
        }
        discovered
    }

    fn initial_worklist(&self, roots: &mut dyn RootProvider) -> Vec<Value> {
        let mut worklist = Vec::new();
        roots.visit_roots(&mut |root: &mut Value| {
            if !root.is_null() {
                worklist.push(*root);
            }
        });
        for (index, slot) in self.slots.iter().enumerate() {
            if slot.as_ref().is_some_and(|o| o.is_pinned()) {
                worklist.push(Value::from_index(index));
            }
        }
        worklist
    }

    fn clear_marks(&mut self) {
        for object in self.slots.iter_mut().flatten() {
            object.header.remove(HeaderFlags::MARK);
        }
    }

    /// Full mark and sweep. Everything not reachable from `roots` (or
    /// pinned) is freed.
    pub fn collect(&mut self, roots: &mut dyn RootProvider) -> GcStats {
        let worklist = self.initial_worklist(roots);
        let marked = self.mark_from(worklist, false).len();

        let mut swept = 0;
        for (index, slot) in self.slots.iter_mut().enumerate() {
            let keep = match slot {
                Some(object) if object.is_marked() => {
                    object.header.remove(HeaderFlags::MARK);
                    true
                }
                Some(_) => false,
                None => true,
            };
            if !keep {
                *slot = None;
                swept += 1;
                if !self.settings.stress {
                    self.free.push(index);
                }
            }
        }
        self.live -= swept;
        self.allocated_since_gc = 0;
        self.stats.collections += 1;
        self.stats.marked = marked;
        self.stats.swept = swept;
        self.stats.live = self.live;
        log::debug!(
            "gc #{}: marked {marked}, swept {swept}, live {}",
            self.stats.collections,
            self.live
        );
        self.stats
    }

    /// Whole-heap traversal for image persistence. Returns every object
    /// reachable from `roots` in discovery order; pinned objects are not
    /// implicitly included and native entry points are cleared on the way.
    /// Nothing is freed.
    pub fn mark_general(&mut self, roots: &mut dyn RootProvider) -> Vec<Value> {
        let mut worklist = Vec::new();
        roots.visit_roots(&mut |root: &mut Value| {
            if !root.is_null() {
                worklist.push(*root);
            }
        });
        worklist.reverse();
        let discovered = self.mark_from(worklist, true);
        self.clear_marks();
        discovered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{ArrayBody, VariableBody};

    fn stress_heap() -> Heap {
        Heap::new(HeapSettings {
            stress: true,
            ..HeapSettings::default()
        })
    }

    fn string(heap: &mut Heap, s: &str) -> Value {
        heap.allocate(ObjectBody::String(s.to_string()))
    }

    fn array(heap: &mut Heap, items: Vec<Value>) -> Value {
        heap.allocate(ObjectBody::Array(ArrayBody::of(items)))
    }

    #[test]
    fn unreachable_objects_are_swept() {
        let mut heap = stress_heap();
        let kept = string(&mut heap, "kept");
        let dropped = string(&mut heap, "dropped");
        let mut roots = RootSet::new();
        roots.push(kept);

        let stats = heap.collect(&mut roots);
        assert_eq!(stats.swept, 1);
        assert!(heap.is_live(kept));
        assert!(!heap.is_live(dropped));
        assert_eq!(heap.live_count(), 1);
    }

    #[test]
    fn collection_between_every_allocation_keeps_root_graph() {
        let mut heap = stress_heap();
        let mut roots = RootSet::new();
        let outer = array(&mut heap, Vec::new());
        roots.push(outer);

        for i in 0..50 {
            let leaf = string(&mut heap, &i.to_string());
            let cell = heap.allocate(ObjectBody::Variable(VariableBody {
                name: format!("V{i}"),
                value: leaf,
            }));
            if let ObjectBody::Array(a) = heap.body_mut(outer) {
                a.items.push(cell);
            }
            string(&mut heap, "garbage");
            heap.collect(&mut roots);
        }

        let ObjectBody::Array(a) = heap.body(outer) else {
            panic!("outer array changed kind");
        };
        assert_eq!(a.items.len(), 50);
        for (i, &cell) in a.items.iter().enumerate() {
            let ObjectBody::Variable(var) = heap.body(cell) else {
                panic!("cell {i} is not a variable");
            };
            assert!(matches!(heap.body(var.value), ObjectBody::String(s) if *s == i.to_string()));
        }
        assert_eq!(heap.live_count(), 1 + 50 * 2);
    }

    #[test]
    fn dropping_the_only_path_reclaims_subgraph() {
        let mut heap = stress_heap();
        let a = string(&mut heap, "a");
        let b = string(&mut heap, "b");
        let holder = array(&mut heap, vec![a, b]);
        let mut roots = RootSet::new();
        roots.push(holder);
        heap.collect(&mut roots);
        assert!(heap.is_live(a) && heap.is_live(b));

        if let ObjectBody::Array(arr) = heap.body_mut(holder) {
            arr.items[1] = Value::NULL;
        }
        heap.collect(&mut roots);
        assert!(heap.is_live(a));
        assert!(!heap.is_live(b));

        roots.roots.clear();
        heap.collect(&mut roots);
        assert_eq!(heap.live_count(), 0);
    }

    #[test]
    fn cycles_are_collected() {
        let mut heap = stress_heap();
        let first = array(&mut heap, Vec::new());
        let second = array(&mut heap, vec![first]);
        if let ObjectBody::Array(arr) = heap.body_mut(first) {
            arr.items.push(second);
        }
        heap.collect(&mut RootSet::new());
        assert!(!heap.is_live(first));
        assert!(!heap.is_live(second));
    }

    #[test]
    fn pinned_objects_survive_without_roots() {
        let mut heap = stress_heap();
        let pinned = string(&mut heap, "nil");
        heap.pin(pinned);
        heap.collect(&mut RootSet::new());
        assert!(heap.is_live(pinned));
    }

    #[test]
    fn freed_slots_are_reused_outside_stress_mode() {
        let mut heap = Heap::new(HeapSettings::default());
        let gone = string(&mut heap, "x");
        heap.collect(&mut RootSet::new());
        let again = string(&mut heap, "y");
        assert_eq!(gone, again);
    }

    #[test]
    #[should_panic(expected = "dangling heap reference")]
    fn stale_handle_panics_in_stress_mode() {
        let mut heap = stress_heap();
        let gone = string(&mut heap, "x");
        heap.collect(&mut RootSet::new());
        string(&mut heap, "y");
        let _ = heap.body(gone);
    }

    #[test]
    fn general_mark_reports_reachable_in_discovery_order() {
        let mut heap = stress_heap();
        let leaf = string(&mut heap, "leaf");
        let unrelated = string(&mut heap, "other");
        let root = array(&mut heap, vec![leaf]);
        let mut roots = RootSet::new();
        roots.push(root);
        let found = heap.mark_general(&mut roots);
        assert_eq!(found, vec![root, leaf]);
        assert!(heap.is_live(unrelated), "general mark never frees");
        assert!(!heap.get(root).is_marked());
    }

    #[test]
    fn allocation_pressure_requests_collection() {
        let mut heap = Heap::new(HeapSettings {
            allocations_before_gc: 3,
            ..HeapSettings::default()
        });
        string(&mut heap, "1");
        string(&mut heap, "2");
        assert!(!heap.should_collect());
        string(&mut heap, "3");
        assert!(heap.should_collect());
        heap.collect(&mut RootSet::new());
        assert!(!heap.should_collect());
    }
}
