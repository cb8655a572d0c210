use crate::Value;

/// Receives the outgoing edges of an object during a read-only traversal.
pub trait Visitor {
    fn visit(&mut self, value: Value);
}

/// Receives the outgoing edges of an object and may rewrite them in place
/// (used when an image is relocated).
pub trait VisitorMut {
    fn visit_mut(&mut self, value: &mut Value);
}

impl<F: FnMut(Value)> Visitor for F {
    #[inline]
    fn visit(&mut self, value: Value) {
        self(value)
    }
}

impl<F: FnMut(&mut Value)> VisitorMut for F {
    #[inline]
    fn visit_mut(&mut self, value: &mut Value) {
        self(value)
    }
}

/// Live-marking contract implemented by everything that owns heap references.
///
/// `visit_edges` is the normal marking pass. `visit_edges_general` is the
/// whole-heap traversal used when persisting an image: it reports the same
/// edges but also drops state that is not valid across that boundary
/// (native entry points).
pub trait Visitable {
    fn visit_edges(&self, visitor: &mut impl Visitor);
    fn visit_edges_mut(&mut self, visitor: &mut impl VisitorMut);

    fn visit_edges_general(&mut self, visitor: &mut impl Visitor) {
        self.visit_edges(visitor);
    }
}

impl Visitable for Value {
    #[inline]
    fn visit_edges(&self, visitor: &mut impl Visitor) {
        if !self.is_null() {
            visitor.visit(*self);
        }
    }

    #[inline]
    fn visit_edges_mut(&mut self, visitor: &mut impl VisitorMut) {
        if !self.is_null() {
            visitor.visit_mut(self);
        }
    }
}

impl Visitable for Vec<Value> {
    fn visit_edges(&self, visitor: &mut impl Visitor) {
        for v in self {
            v.visit_edges(visitor);
        }
    }

    fn visit_edges_mut(&mut self, visitor: &mut impl VisitorMut) {
        for v in self.iter_mut() {
            v.visit_edges_mut(visitor);
        }
    }
}
