//! Variable dictionaries, stems and compound variables.
//!
//! A dictionary maps names to Variable objects rather than to values, so
//! PROCEDURE EXPOSE and method EXPOSE can share one Variable between two
//! dictionaries. A dropped variable keeps its Variable with a NULL value.
//! A stem variable always holds a Stem object whose tails are Variables
//! too; a tail Variable with a NULL value was dropped explicitly and does
//! not fall back to the stem default.

use crate::Value;
use crate::alloc::{alloc_stem, alloc_string, alloc_variable, alloc_variables};
use crate::code::{TailPart, VariableRef};
use crate::collections::string_table;
use crate::condition::Unwind;
use crate::heap::Heap;
use crate::interpreter::Interpreter;
use crate::object::ObjectBody;

/// Variable object bound to `name`, NULL when the name was never used.
pub fn variable_slot(heap: &Heap, variables: Value, name: &str) -> Value {
    string_table(heap, variables).map_or(Value::NULL, |t| t.get(&name.to_string()))
}

/// Variable object bound to `name`, created unset when missing.
pub fn ensure_variable(heap: &mut Heap, variables: Value, name: &str) -> Value {
    let slot = variable_slot(heap, variables, name);
    if !slot.is_null() {
        return slot;
    }
    let variable = alloc_variable(heap, name, Value::NULL);
    bind_variable(heap, variables, name, variable);
    variable
}

/// Makes `name` in `variables` refer to an existing Variable object.
pub fn bind_variable(heap: &mut Heap, variables: Value, name: &str, variable: Value) {
    if let ObjectBody::Variables(table) = heap.body_mut(variables) {
        table.put(variable, name.to_string());
    }
}

pub fn variable_value(heap: &Heap, variable: Value) -> Value {
    match heap.try_get(variable).map(|o| &o.body) {
        Some(ObjectBody::Variable(var)) => var.value,
        _ => Value::NULL,
    }
}

fn store(heap: &mut Heap, variable: Value, value: Value) {
    if let ObjectBody::Variable(var) = heap.body_mut(variable) {
        var.value = value;
    }
}

pub fn get_variable(heap: &Heap, variables: Value, name: &str) -> Value {
    variable_value(heap, variable_slot(heap, variables, name))
}

pub fn set_variable(heap: &mut Heap, variables: Value, name: &str, value: Value) {
    let variable = ensure_variable(heap, variables, name);
    store(heap, variable, value);
}

pub fn drop_variable(heap: &mut Heap, variables: Value, name: &str) {
    let variable = variable_slot(heap, variables, name);
    if !variable.is_null() {
        store(heap, variable, Value::NULL);
    }
}

// ── Stems ─────────────────────────────────────────────────────────────

/// The Stem held by stem variable `stem_name` (`"A."`), created empty
/// when the variable is unset.
pub fn stem_object(heap: &mut Heap, variables: Value, stem_name: &str) -> Value {
    let variable = ensure_variable(heap, variables, stem_name);
    let current = variable_value(heap, variable);
    if matches!(heap.try_get(current).map(|o| &o.body), Some(ObjectBody::Stem(_))) {
        return current;
    }
    let stem = alloc_stem(heap, stem_name, Value::NULL);
    store(heap, variable, stem);
    stem
}

/// `stem. = value`: a Stem object is aliased, anything else becomes the
/// default of a fresh, empty stem.
pub fn assign_stem(heap: &mut Heap, variables: Value, stem_name: &str, value: Value) {
    let stem = if matches!(heap.try_get(value).map(|o| &o.body), Some(ObjectBody::Stem(_))) {
        value
    } else {
        alloc_stem(heap, stem_name, value)
    };
    set_variable(heap, variables, stem_name, stem);
}

/// `DROP stem.` leaves an empty stem without a default.
pub fn drop_stem(heap: &mut Heap, variables: Value, stem_name: &str) {
    let stem = alloc_stem(heap, stem_name, Value::NULL);
    set_variable(heap, variables, stem_name, stem);
}

pub fn stem_default(heap: &Heap, stem: Value) -> Value {
    match heap.body(stem) {
        ObjectBody::Stem(body) => body.default,
        _ => Value::NULL,
    }
}

fn tail_slot(heap: &Heap, stem: Value, tail: &str) -> Value {
    match heap.body(stem) {
        ObjectBody::Stem(body) => body.tails.get(&tail.to_string()),
        _ => Value::NULL,
    }
}

/// Value of `stem.tail`: the tail's own value, else the stem default.
/// NULL when neither is set.
pub fn get_compound(heap: &Heap, stem: Value, tail: &str) -> Value {
    let slot = tail_slot(heap, stem, tail);
    if slot.is_null() {
        stem_default(heap, stem)
    } else {
        variable_value(heap, slot)
    }
}

pub fn set_compound(heap: &mut Heap, stem: Value, tail: &str, value: Value) {
    let slot = tail_slot(heap, stem, tail);
    if !slot.is_null() {
        store(heap, slot, value);
        return;
    }
    let variable = alloc_variable(heap, tail, value);
    if let ObjectBody::Stem(body) = heap.body_mut(stem) {
        body.tails.put(variable, tail.to_string());
    }
}

pub fn drop_compound(heap: &mut Heap, stem: Value, tail: &str) {
    if stem_default(heap, stem).is_null() {
        if let ObjectBody::Stem(body) = heap.body_mut(stem) {
            body.tails.remove(&tail.to_string());
        }
    } else {
        set_compound(heap, stem, tail, Value::NULL);
    }
}

// ── Symbols ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Bad,
    /// Constant symbol such as `12` or `.5`.
    Constant,
    Variable,
}

pub fn classify_symbol(name: &str) -> SymbolKind {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '!' | '?' | '_'));
    if !valid {
        SymbolKind::Bad
    } else if name.starts_with(|c: char| c.is_ascii_digit() || c == '.') {
        SymbolKind::Constant
    } else {
        SymbolKind::Variable
    }
}

// ── Activation-level access ───────────────────────────────────────────

impl Interpreter<'_> {
    fn variables_of(&self, idx: usize) -> Value {
        self.act(idx).variables
    }

    /// Value of simple or stem variable `name` in frame `idx`, NULL when
    /// unset. No NOVALUE is raised.
    pub(crate) fn get_context_variable(&self, idx: usize, name: &str) -> Value {
        get_variable(&self.memory.heap, self.variables_of(idx), &name.to_ascii_uppercase())
    }

    pub(crate) fn set_context_variable(&mut self, idx: usize, name: &str, value: Value) {
        let variables = self.variables_of(idx);
        let name = name.to_ascii_uppercase();
        if name.ends_with('.') {
            assign_stem(&mut self.memory.heap, variables, &name, value);
        } else {
            set_variable(&mut self.memory.heap, variables, &name, value);
        }
    }

    pub(crate) fn drop_context_variable(&mut self, idx: usize, name: &str) {
        let variables = self.variables_of(idx);
        let name = name.to_ascii_uppercase();
        if name.ends_with('.') {
            drop_stem(&mut self.memory.heap, variables, &name);
        } else {
            drop_variable(&mut self.memory.heap, variables, &name);
        }
    }

    pub(crate) fn set_variable_value(&mut self, idx: usize, name: &str, value: Value) {
        let variables = self.variables_of(idx);
        set_variable(&mut self.memory.heap, variables, name, value);
    }

    /// Sets one of the special variables RC, RESULT or SIGL to a string.
    pub(crate) fn set_special(&mut self, idx: usize, name: &str, text: &str) {
        let value = alloc_string(&mut self.memory.heap, text);
        self.set_variable_value(idx, name, value);
    }

    /// The Stem object behind `stem_name` in frame `idx`.
    pub(crate) fn resolve_stem_variable(&mut self, idx: usize, stem_name: &str) -> Value {
        let variables = self.variables_of(idx);
        stem_object(&mut self.memory.heap, variables, stem_name)
    }

    /// Derived tail: each variable part is replaced by its value (or its
    /// own name when unset).
    pub(crate) fn compound_tail(&self, idx: usize, tails: &[TailPart]) -> String {
        let parts: Vec<String> = tails
            .iter()
            .map(|part| match part {
                TailPart::Constant(text) => text.clone(),
                TailPart::Variable(name) => {
                    let value = self.get_context_variable(idx, name);
                    if value.is_null() {
                        name.clone()
                    } else {
                        self.plain_string(value)
                    }
                }
            })
            .collect();
        parts.join(".")
    }

    /// Current value of `var`, NULL when unset. No NOVALUE is raised.
    pub(crate) fn peek_variable(&mut self, idx: usize, var: &VariableRef) -> Value {
        match var {
            VariableRef::Simple(name) => self.get_context_variable(idx, name),
            VariableRef::Stem(name) => self.resolve_stem_variable(idx, name),
            VariableRef::Compound { stem, tails } => {
                let tail = self.compound_tail(idx, tails);
                let stem = self.resolve_stem_variable(idx, stem);
                get_compound(&self.memory.heap, stem, &tail)
            }
        }
    }

    /// Value of `var` for expression evaluation. An unset variable raises
    /// NOVALUE and then evaluates to its own name.
    pub(crate) fn fetch_variable(&mut self, idx: usize, var: &VariableRef) -> Result<Value, Unwind> {
        let value = self.peek_variable(idx, var);
        if !value.is_null() {
            return Ok(value);
        }
        let name = match var {
            VariableRef::Compound { stem, tails } => {
                format!("{stem}{}", self.compound_tail(idx, tails))
            }
            other => other.name(),
        };
        if self.trap_available(idx, "NOVALUE") {
            let condition = self.new_condition("NOVALUE", &name);
            self.raise_condition(idx, condition)?;
        }
        Ok(alloc_string(&mut self.memory.heap, name))
    }

    pub(crate) fn assign_variable(&mut self, idx: usize, var: &VariableRef, value: Value) {
        match var {
            VariableRef::Simple(name) => self.set_variable_value(idx, name, value),
            VariableRef::Stem(name) => {
                let variables = self.variables_of(idx);
                assign_stem(&mut self.memory.heap, variables, name, value);
            }
            VariableRef::Compound { stem, tails } => {
                let tail = self.compound_tail(idx, tails);
                let stem = self.resolve_stem_variable(idx, stem);
                set_compound(&mut self.memory.heap, stem, &tail, value);
            }
        }
    }

    pub(crate) fn drop_variable_ref(&mut self, idx: usize, var: &VariableRef) {
        match var {
            VariableRef::Simple(name) | VariableRef::Stem(name) => {
                self.drop_context_variable(idx, name)
            }
            VariableRef::Compound { stem, tails } => {
                let tail = self.compound_tail(idx, tails);
                let stem = self.resolve_stem_variable(idx, stem);
                drop_compound(&mut self.memory.heap, stem, &tail);
            }
        }
    }

    /// Links `name` (simple or stem) of dictionary `from` into `to`, so
    /// both refer to the same Variable object.
    pub(crate) fn expose_variable(&mut self, from: Value, to: Value, name: &str) {
        let heap = &mut self.memory.heap;
        let variable = ensure_variable(heap, from, name);
        bind_variable(heap, to, name, variable);
    }

    /// Fresh dictionary for PROCEDURE; the exposed names stay shared.
    pub(crate) fn new_scope(&mut self, idx: usize, expose: &[String]) -> Value {
        let old = self.variables_of(idx);
        let scope = alloc_variables(&mut self.memory.heap);
        for name in expose {
            self.expose_variable(old, scope, name);
        }
        scope
    }
}
