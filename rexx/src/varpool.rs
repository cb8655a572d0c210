//! Shared variable pool: the block-structured request interface native
//! code uses to read and write the variables of the Rexx activation that
//! called it.
//!
//! Requests never raise. Every problem is reported through the status
//! bits of the request block, and a disabled pool answers with
//! [`PoolReturn::NotAvailable`].

use crate::Value;
use crate::activation::{Frame, VariablePoolCursor};
use crate::alloc::alloc_string;
use crate::code::VariableRef;
use crate::interpreter::Interpreter;
use crate::object::ObjectBody;
use crate::variables::{
    SymbolKind, assign_stem, classify_symbol, drop_compound, drop_stem, drop_variable,
    get_compound, get_variable, set_compound, set_variable, stem_object, variable_slot,
    variable_value,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShvCode {
    Set,
    Fetch,
    Drop,
    SymSet,
    SymFetch,
    SymDrop,
    NextV,
    Private,
}

impl ShvCode {
    fn symbolic(self) -> bool {
        matches!(self, ShvCode::SymSet | ShvCode::SymFetch | ShvCode::SymDrop)
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ShvStatus: u8 {
        /// Variable did not exist.
        const NEWV = 0x01;
        /// NEXTV walked past the last variable.
        const LVAR = 0x02;
        const TRUNC = 0x04;
        /// Invalid variable name.
        const BADN = 0x08;
        const MEMFL = 0x10;
        /// Invalid request code or missing value.
        const BADF = 0x80;
    }
}

/// One request. `name` and `value` are filled in by FETCH, NEXTV and
/// PRIVATE requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShvBlock {
    pub code: ShvCode,
    pub name: String,
    pub value: Option<String>,
    pub status: ShvStatus,
}

impl ShvBlock {
    fn new(code: ShvCode, name: &str, value: Option<&str>) -> Self {
        Self {
            code,
            name: name.to_string(),
            value: value.map(str::to_string),
            status: ShvStatus::empty(),
        }
    }

    pub fn set(name: &str, value: &str) -> Self {
        Self::new(ShvCode::Set, name, Some(value))
    }

    pub fn fetch(name: &str) -> Self {
        Self::new(ShvCode::Fetch, name, None)
    }

    pub fn drop(name: &str) -> Self {
        Self::new(ShvCode::Drop, name, None)
    }

    pub fn sym_set(name: &str, value: &str) -> Self {
        Self::new(ShvCode::SymSet, name, Some(value))
    }

    pub fn sym_fetch(name: &str) -> Self {
        Self::new(ShvCode::SymFetch, name, None)
    }

    pub fn sym_drop(name: &str) -> Self {
        Self::new(ShvCode::SymDrop, name, None)
    }

    pub fn next() -> Self {
        Self::new(ShvCode::NextV, "", None)
    }

    pub fn private(name: &str) -> Self {
        Self::new(ShvCode::Private, name, None)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolReturn {
    /// Union of the status bits of every processed block.
    Ok(ShvStatus),
    /// Variable access is disabled for this native activation.
    NotAvailable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PoolName {
    Simple(String),
    Stem(String),
    Compound { stem: String, tail: String },
}

/// Direct names are taken as given: the stem part must already be upper
/// case and the tail is used literally.
fn direct_name(name: &str) -> Option<PoolName> {
    let (stem, tail) = match name.find('.') {
        Some(pos) => (&name[..=pos], Some(&name[pos + 1..])),
        None => (name, None),
    };
    if stem.chars().any(|c| c.is_ascii_lowercase())
        || classify_symbol(stem) != SymbolKind::Variable
    {
        return None;
    }
    Some(match tail {
        None => PoolName::Simple(stem.to_string()),
        Some("") => PoolName::Stem(stem.to_string()),
        Some(tail) => PoolName::Compound {
            stem: stem.to_string(),
            tail: tail.to_string(),
        },
    })
}

impl Interpreter<'_> {
    /// Processes `requests` for native frame `frame` against the
    /// variables of its calling Rexx activation.
    pub(crate) fn variable_pool(&mut self, frame: usize, requests: &mut [ShvBlock]) -> PoolReturn {
        let Frame::Native(native) = &self.activity.frames[frame] else {
            return PoolReturn::NotAvailable;
        };
        if !native.variable_pool_enabled {
            return PoolReturn::NotAvailable;
        }
        let Some(caller) = native.parent.and_then(|p| self.nearest_rexx(p)) else {
            return PoolReturn::NotAvailable;
        };
        let mut combined = ShvStatus::empty();
        for request in requests.iter_mut() {
            if request.code != ShvCode::NextV {
                self.act_mut(caller).pool_cursor = VariablePoolCursor::default();
            }
            request.status = self.pool_request(caller, request);
            combined |= request.status;
        }
        PoolReturn::Ok(combined)
    }

    fn pool_request(&mut self, caller: usize, request: &mut ShvBlock) -> ShvStatus {
        match request.code {
            ShvCode::NextV => return self.pool_next(caller, request),
            ShvCode::Private => return self.pool_private(caller, request),
            _ => {}
        }
        let name = if request.code.symbolic() {
            self.symbolic_name(caller, &request.name)
        } else {
            direct_name(&request.name)
        };
        let Some(name) = name else {
            return ShvStatus::BADN;
        };
        match request.code {
            ShvCode::Set | ShvCode::SymSet => match request.value.clone() {
                Some(text) => self.pool_set(caller, &name, &text),
                None => ShvStatus::BADF,
            },
            ShvCode::Fetch | ShvCode::SymFetch => {
                let value = self.pool_value(caller, &name);
                if value.is_null() {
                    request.value = Some(pool_display_name(&name));
                    ShvStatus::NEWV
                } else {
                    request.value = Some(self.plain_string(value));
                    ShvStatus::empty()
                }
            }
            _ => self.pool_drop(caller, &name),
        }
    }

    /// Symbolic names follow the rules of program text: upper-cased, with
    /// tail symbols replaced by their values.
    fn symbolic_name(&self, caller: usize, name: &str) -> Option<PoolName> {
        if classify_symbol(name) != SymbolKind::Variable {
            return None;
        }
        Some(match VariableRef::symbol(name) {
            VariableRef::Simple(name) => PoolName::Simple(name),
            VariableRef::Stem(name) => PoolName::Stem(name),
            VariableRef::Compound { stem, tails } => PoolName::Compound {
                tail: self.compound_tail(caller, &tails),
                stem,
            },
        })
    }

    /// Stem object held by `stem`, NULL when the stem was never used.
    fn existing_stem(&self, caller: usize, stem: &str) -> Value {
        let heap = &self.memory.heap;
        let value = variable_value(heap, variable_slot(heap, self.act(caller).variables, stem));
        match heap.try_get(value).map(|o| &o.body) {
            Some(ObjectBody::Stem(_)) => value,
            _ => Value::NULL,
        }
    }

    fn pool_value(&self, caller: usize, name: &PoolName) -> Value {
        let heap = &self.memory.heap;
        match name {
            PoolName::Simple(name) => get_variable(heap, self.act(caller).variables, name),
            PoolName::Stem(stem) => {
                let stem = self.existing_stem(caller, stem);
                match heap.try_get(stem).map(|o| &o.body) {
                    Some(ObjectBody::Stem(body)) => body.default,
                    _ => Value::NULL,
                }
            }
            PoolName::Compound { stem, tail } => {
                let stem = self.existing_stem(caller, stem);
                if stem.is_null() {
                    Value::NULL
                } else {
                    get_compound(heap, stem, tail)
                }
            }
        }
    }

    fn pool_set(&mut self, caller: usize, name: &PoolName, text: &str) -> ShvStatus {
        let status = if self.pool_value(caller, name).is_null() {
            ShvStatus::NEWV
        } else {
            ShvStatus::empty()
        };
        let variables = self.act(caller).variables;
        let heap = &mut self.memory.heap;
        let value = alloc_string(heap, text);
        match name {
            PoolName::Simple(name) => set_variable(heap, variables, name, value),
            PoolName::Stem(stem) => assign_stem(heap, variables, stem, value),
            PoolName::Compound { stem, tail } => {
                let stem = stem_object(heap, variables, stem);
                set_compound(heap, stem, tail, value);
            }
        }
        status
    }

    fn pool_drop(&mut self, caller: usize, name: &PoolName) -> ShvStatus {
        let status = if self.pool_value(caller, name).is_null() {
            ShvStatus::NEWV
        } else {
            ShvStatus::empty()
        };
        let variables = self.act(caller).variables;
        match name {
            PoolName::Simple(name) => drop_variable(&mut self.memory.heap, variables, name),
            PoolName::Stem(stem) => drop_stem(&mut self.memory.heap, variables, stem),
            PoolName::Compound { stem, tail } => {
                let stem = self.existing_stem(caller, stem);
                if !stem.is_null() {
                    drop_compound(&mut self.memory.heap, stem, tail);
                }
            }
        }
        status
    }

    /// Next variable of the caller. Simple variables come first in table
    /// order; a stem yields its default (when it has one) and then each of
    /// its set tails.
    fn pool_next(&mut self, caller: usize, request: &mut ShvBlock) -> ShvStatus {
        let variables = self.act(caller).variables;
        let mut cursor = std::mem::take(&mut self.act_mut(caller).pool_cursor);
        if !cursor.active {
            cursor = VariablePoolCursor {
                active: true,
                ..VariablePoolCursor::default()
            };
        }
        let found = self.advance_cursor(variables, &mut cursor);
        match found {
            Some((name, value)) => {
                request.name = name;
                request.value = Some(self.plain_string(value));
                self.act_mut(caller).pool_cursor = cursor;
                ShvStatus::empty()
            }
            None => ShvStatus::LVAR,
        }
    }

    fn advance_cursor(
        &self,
        variables: Value,
        cursor: &mut VariablePoolCursor,
    ) -> Option<(String, Value)> {
        let heap = &self.memory.heap;
        let ObjectBody::Variables(table) = heap.body(variables) else {
            return None;
        };
        loop {
            if let Some(ObjectBody::Stem(stem)) = heap.try_get(cursor.stem).map(|o| &o.body) {
                let link = cursor.compound.unwrap_or_else(|| stem.tails.first());
                if stem.tails.available(link) {
                    cursor.compound = Some(stem.tails.next(link));
                    let value = variable_value(heap, stem.tails.value(link));
                    if value.is_null() {
                        continue;
                    }
                    let tail = stem.tails.index(link).cloned().unwrap_or_default();
                    return Some((format!("{}{tail}", stem.name), value));
                }
                cursor.stem = Value::NULL;
                cursor.compound = None;
            }

            let link = cursor.variable.unwrap_or_else(|| table.first());
            if !table.available(link) {
                return None;
            }
            cursor.variable = Some(table.next(link));
            let name = table.index(link).cloned().unwrap_or_default();
            let value = variable_value(heap, table.value(link));
            if value.is_null() {
                continue;
            }
            if name.ends_with('.') {
                let Some(ObjectBody::Stem(stem)) = heap.try_get(value).map(|o| &o.body) else {
                    continue;
                };
                cursor.stem = value;
                cursor.compound = None;
                if !stem.default.is_null() {
                    return Some((name, stem.default));
                }
                continue;
            }
            return Some((name, value));
        }
    }

    /// Interpreter information: VERSION, SOURCE, PARM and PARM.n.
    fn pool_private(&mut self, caller: usize, request: &mut ShvBlock) -> ShvStatus {
        let act = self.act(caller);
        let key = request.name.to_ascii_uppercase();
        let value = match key.as_str() {
            "VERSION" => format!("REXX-rexx {}", env!("CARGO_PKG_VERSION")),
            "SOURCE" => {
                let kind = match act.kind {
                    crate::activation::ActivationKind::Program => "COMMAND",
                    crate::activation::ActivationKind::Method => "METHOD",
                    _ => "SUBROUTINE",
                };
                format!("{} {kind} {}", std::env::consts::OS.to_ascii_uppercase(), act.code.name)
            }
            "PARM" => act.arguments.len().to_string(),
            _ => match key.strip_prefix("PARM.").and_then(|n| n.parse::<usize>().ok()) {
                Some(n) if n >= 1 => {
                    let arg = act.arguments.get(n - 1).copied().unwrap_or(Value::NULL);
                    self.plain_string(arg)
                }
                _ => return ShvStatus::BADN,
            },
        };
        request.value = Some(value);
        ShvStatus::empty()
    }
}

fn pool_display_name(name: &PoolName) -> String {
    match name {
        PoolName::Simple(name) | PoolName::Stem(name) => name.clone(),
        PoolName::Compound { stem, tail } => format!("{stem}{tail}"),
    }
}
