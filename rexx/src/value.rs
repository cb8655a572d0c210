use std::fmt;

/// Handle to a heap object.
///
/// Handles are plain indices into the heap arena and compare by identity.
/// `Value::NULL` is the internal "no value" marker. It must never reach
/// interpreted code; lookups that produce it are translated to `.nil`
/// before crossing the language boundary.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Value(u32);

impl Value {
    pub const NULL: Value = Value(0);

    #[inline]
    pub(crate) fn from_index(index: usize) -> Value {
        Value(index as u32 + 1)
    }

    /// Arena index of a non-null handle.
    #[inline]
    pub(crate) fn index(self) -> usize {
        debug_assert!(!self.is_null(), "index of NULL value");
        (self.0 - 1) as usize
    }

    #[inline]
    pub fn raw(self) -> u32 {
        self.0
    }

    #[inline]
    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Returns `self`, or `other` when `self` is the null reference.
    #[inline]
    pub fn or(self, other: Value) -> Value {
        if self.is_null() { other } else { self }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "Value(NULL)")
        } else {
            write!(f, "Value(#{})", self.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_is_default_and_distinct() {
        assert_eq!(Value::default(), Value::NULL);
        assert!(Value::NULL.is_null());
        let v = Value::from_index(0);
        assert!(!v.is_null());
        assert_eq!(v.index(), 0);
        assert_ne!(v, Value::NULL);
    }

    #[test]
    fn or_replaces_only_null() {
        let a = Value::from_index(3);
        let b = Value::from_index(7);
        assert_eq!(Value::NULL.or(b), b);
        assert_eq!(a.or(b), a);
    }
}
