//! Per-activation condition traps.
//!
//! Each activation holds at most one handler per condition name. A handler
//! is either ON or DELAYED; DELAYED only while its CALL ON body runs, with
//! the triggering condition object attached until it is restored to ON.

use ahash::AHashMap;

use crate::Value;
use crate::visitor::{Visitable, Visitor};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapKind {
    Call,
    Signal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapState {
    On,
    Delayed,
}

/// Conditions that CALL ON ANY does not catch.
const NOT_CALLABLE_BY_ANY: [&str; 5] = ["SYNTAX", "NOVALUE", "LOSTDIGITS", "NOMETHOD", "NOSTRING"];

/// Whether an ANY trap of `kind` accepts `condition`.
pub fn any_accepts(kind: TrapKind, condition: &str) -> bool {
    kind == TrapKind::Signal || !NOT_CALLABLE_BY_ANY.contains(&condition)
}

#[derive(Debug, Clone)]
pub struct TrapHandler {
    /// Registered name, possibly `ANY`.
    pub condition: String,
    pub kind: TrapKind,
    pub label: String,
    pub target: Option<usize>,
    pub state: TrapState,
    /// Condition being handled while DELAYED, NULL otherwise.
    pub condition_object: Value,
}

#[derive(Debug, Clone, Default)]
pub struct TrapTable {
    handlers: AHashMap<String, TrapHandler>,
}

impl TrapTable {
    /// Registers (or replaces) the handler for `condition`; it starts ON.
    pub fn trap_on(&mut self, condition: &str, kind: TrapKind, label: &str, target: Option<usize>) {
        self.handlers.insert(
            condition.to_string(),
            TrapHandler {
                condition: condition.to_string(),
                kind,
                label: label.to_string(),
                target,
                state: TrapState::On,
                condition_object: Value::NULL,
            },
        );
    }

    pub fn trap_off(&mut self, condition: &str) -> Option<TrapHandler> {
        self.handlers.remove(condition)
    }

    #[cfg(test)]
    pub fn get(&self, condition: &str) -> Option<&TrapHandler> {
        self.handlers.get(condition)
    }

    /// Handler that would catch `condition`: the specific name first, then
    /// an eligible ANY.
    pub fn find(&self, condition: &str) -> Option<&TrapHandler> {
        if let Some(handler) = self.handlers.get(condition) {
            return Some(handler);
        }
        self.handlers
            .get("ANY")
            .filter(|handler| any_accepts(handler.kind, condition))
    }

    /// ON → DELAYED while a CALL ON body runs.
    pub fn delay(&mut self, condition: &str, condition_object: Value) {
        if let Some(handler) = self.handlers.get_mut(condition) {
            handler.state = TrapState::Delayed;
            handler.condition_object = condition_object;
        }
    }

    /// DELAYED → ON after the handler body completes. A handler that was
    /// switched off or re-registered meanwhile is left alone.
    pub fn restore(&mut self, condition: &str) {
        if let Some(handler) = self.handlers.get_mut(condition) {
            if handler.state == TrapState::Delayed {
                handler.state = TrapState::On;
                handler.condition_object = Value::NULL;
            }
        }
    }
}

impl Visitable for TrapTable {
    fn visit_edges(&self, visitor: &mut impl Visitor) {
        for handler in self.handlers.values() {
            handler.condition_object.visit_edges(visitor);
        }
    }

    fn visit_edges_mut(&mut self, visitor: &mut impl crate::visitor::VisitorMut) {
        for handler in self.handlers.values_mut() {
            handler.condition_object.visit_edges_mut(visitor);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_replaces_and_removes() {
        let mut traps = TrapTable::default();
        traps.trap_on("ERROR", TrapKind::Call, "E1", Some(3));
        traps.trap_on("ERROR", TrapKind::Signal, "E2", Some(7));
        let handler = traps.get("ERROR").unwrap();
        assert_eq!(handler.kind, TrapKind::Signal);
        assert_eq!(handler.label, "E2");
        assert_eq!(handler.state, TrapState::On);
        assert!(traps.trap_off("ERROR").is_some());
        assert!(traps.get("ERROR").is_none());
    }

    #[test]
    fn delayed_round_trip_clears_condition() {
        let mut traps = TrapTable::default();
        traps.trap_on("SYNTAX", TrapKind::Call, "H", Some(1));
        let cond = Value::from_index(5);
        traps.delay("SYNTAX", cond);
        let handler = traps.get("SYNTAX").unwrap();
        assert_eq!(handler.state, TrapState::Delayed);
        assert_eq!(handler.condition_object, cond);

        let mut edges = Vec::new();
        traps.visit_edges(&mut |v: Value| edges.push(v));
        assert_eq!(edges, vec![cond], "attached condition is a GC edge");

        traps.restore("SYNTAX");
        let handler = traps.get("SYNTAX").unwrap();
        assert_eq!(handler.state, TrapState::On);
        assert!(handler.condition_object.is_null());
    }

    #[test]
    fn restore_respects_reregistration() {
        let mut traps = TrapTable::default();
        traps.trap_on("ERROR", TrapKind::Call, "OLD", None);
        traps.delay("ERROR", Value::from_index(1));
        traps.trap_on("ERROR", TrapKind::Call, "NEW", None);
        traps.restore("ERROR");
        assert_eq!(traps.get("ERROR").unwrap().label, "NEW");
    }

    #[test]
    fn any_eligibility_depends_on_kind() {
        let mut traps = TrapTable::default();
        traps.trap_on("ANY", TrapKind::Call, "H", None);
        assert!(traps.find("ERROR").is_some());
        assert!(traps.find("FOO").is_some());
        assert!(traps.find("SYNTAX").is_none());
        assert!(traps.find("NOVALUE").is_none());

        traps.trap_on("ANY", TrapKind::Signal, "H", None);
        assert!(traps.find("SYNTAX").is_some());

        traps.trap_on("SYNTAX", TrapKind::Call, "S", None);
        assert_eq!(traps.find("SYNTAX").unwrap().label, "S", "specific name wins");
    }
}
