//! Built-in function table.
//!
//! Each function has a fixed numeric id. The id is what a translated
//! program refers to, so ids are never reused or renumbered; new functions
//! get new ids.

use crate::Value;
use crate::code::VariableRef;
use crate::collections::{directory_at, directory_put};
use crate::condition::{
    ADDITIONAL, CONDITION, DESCRIPTION, INSTRUCTION, RESULT, Unwind,
};
use crate::errors::ErrorCode;
use crate::interpreter::Interpreter;
use crate::numeric::RexxNumber;
use crate::trap::TrapState;
use crate::variables::{SymbolKind, classify_symbol};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum BuiltinFunction {
    Address = 1,
    Arg = 2,
    Condition = 3,
    Datatype = 4,
    Digits = 5,
    Form = 6,
    Fuzz = 7,
    Length = 8,
    Symbol = 9,
    Trace = 10,
    Value = 11,
}

pub type BuiltinFn = fn(&mut Interpreter<'_>, usize, &[Value]) -> Result<Value, Unwind>;

pub struct BuiltinDesc {
    pub name: &'static str,
    pub min_args: usize,
    pub max_args: usize,
    pub entry: BuiltinFn,
}

impl BuiltinFunction {
    pub const ALL: [BuiltinFunction; 11] = [
        BuiltinFunction::Address,
        BuiltinFunction::Arg,
        BuiltinFunction::Condition,
        BuiltinFunction::Datatype,
        BuiltinFunction::Digits,
        BuiltinFunction::Form,
        BuiltinFunction::Fuzz,
        BuiltinFunction::Length,
        BuiltinFunction::Symbol,
        BuiltinFunction::Trace,
        BuiltinFunction::Value,
    ];

    pub fn id(self) -> u16 {
        self as u16
    }

    pub fn from_id(id: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.id() == id)
    }

    pub fn lookup(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|f| f.name().eq_ignore_ascii_case(name))
    }

    pub fn name(self) -> &'static str {
        self.desc().name
    }

    pub fn desc(self) -> BuiltinDesc {
        let (name, min_args, max_args, entry): (_, _, _, BuiltinFn) = match self {
            BuiltinFunction::Address => ("ADDRESS", 0, 0, bif_address),
            BuiltinFunction::Arg => ("ARG", 0, 2, bif_arg),
            BuiltinFunction::Condition => ("CONDITION", 0, 1, bif_condition),
            BuiltinFunction::Datatype => ("DATATYPE", 1, 2, bif_datatype),
            BuiltinFunction::Digits => ("DIGITS", 0, 0, bif_digits),
            BuiltinFunction::Form => ("FORM", 0, 0, bif_form),
            BuiltinFunction::Fuzz => ("FUZZ", 0, 0, bif_fuzz),
            BuiltinFunction::Length => ("LENGTH", 1, 1, bif_length),
            BuiltinFunction::Symbol => ("SYMBOL", 1, 1, bif_symbol),
            BuiltinFunction::Trace => ("TRACE", 0, 1, bif_trace),
            BuiltinFunction::Value => ("VALUE", 1, 3, bif_value),
        };
        BuiltinDesc {
            name,
            min_args,
            max_args,
            entry,
        }
    }
}

/// Calls `function` with the top `argc` stack entries as arguments
/// (NULL for an omitted one).
pub(crate) fn call_builtin(
    interp: &mut Interpreter<'_>,
    idx: usize,
    function: BuiltinFunction,
    argc: usize,
) -> Result<Value, Unwind> {
    let desc = function.desc();
    let args = interp.stack_args(idx, argc);
    let supplied = args.iter().rposition(|v| !v.is_null()).map_or(0, |p| p + 1);
    if supplied > desc.max_args {
        let max = desc.max_args.to_string();
        return Err(interp.syntax_error(idx, ErrorCode::TOO_MANY_ARGUMENTS, &[desc.name, &max]));
    }
    if (0..desc.min_args).any(|i| args.get(i).is_none_or(|v| v.is_null())) {
        let min = desc.min_args.to_string();
        return Err(interp.syntax_error(idx, ErrorCode::NOT_ENOUGH_ARGUMENTS, &[desc.name, &min]));
    }
    (desc.entry)(interp, idx, &args)
}

fn arg(args: &[Value], n: usize) -> Option<Value> {
    args.get(n).copied().filter(|v| !v.is_null())
}

/// First letter of an option argument, upper-cased.
fn option(
    interp: &mut Interpreter<'_>,
    idx: usize,
    function: &str,
    position: usize,
    value: Value,
    allowed: &str,
) -> Result<char, Unwind> {
    let text = interp.string_of(idx, value)?;
    match text.trim().chars().next().map(|c| c.to_ascii_uppercase()) {
        Some(c) if allowed.contains(c) => Ok(c),
        _ => {
            let position = position.to_string();
            let allowed = format!("\"{allowed}\"");
            Err(interp.syntax_error(
                idx,
                ErrorCode::INVALID_OPTION,
                &[function, &position, &allowed, &text],
            ))
        }
    }
}

fn bif_address(interp: &mut Interpreter<'_>, idx: usize, _args: &[Value]) -> Result<Value, Unwind> {
    let address = interp.act(idx).settings.address.clone();
    Ok(interp.string(address))
}

fn bif_arg(interp: &mut Interpreter<'_>, idx: usize, args: &[Value]) -> Result<Value, Unwind> {
    let arguments = interp.act(idx).arguments.clone();
    let Some(n) = arg(args, 0) else {
        let count = arguments.iter().rposition(|v| !v.is_null()).map_or(0, |p| p + 1);
        return Ok(interp.string(count.to_string()));
    };
    let text = interp.string_of(idx, n)?;
    let n = interp.whole_number(idx, &text)?;
    if n < 1 {
        return Err(interp.syntax_error(
            idx,
            ErrorCode::INVALID_OPTION,
            &["ARG", "1", "a positive whole number", &text],
        ));
    }
    let value = arguments.get(n as usize - 1).copied().unwrap_or(Value::NULL);
    match arg(args, 1) {
        None => Ok(if value.is_null() {
            interp.literal("")
        } else {
            value
        }),
        Some(selector) => {
            let exists = match option(interp, idx, "ARG", 2, selector, "EO")? {
                'E' => !value.is_null(),
                _ => value.is_null(),
            };
            Ok(interp.boolean(exists))
        }
    }
}

/// CONDITION([option]) on the condition currently being handled.
fn bif_condition(interp: &mut Interpreter<'_>, idx: usize, args: &[Value]) -> Result<Value, Unwind> {
    let selector = match arg(args, 0) {
        Some(value) => option(interp, idx, "CONDITION", 1, value, "ACDIORS")?,
        None => 'I',
    };
    let condition = interp.act(idx).condition;
    if condition.is_null() {
        return Ok(match selector {
            'A' | 'O' | 'R' => interp.nil(),
            _ => interp.literal(""),
        });
    }
    let heap = &interp.memory.heap;
    let entry = |key: &str| directory_at(heap, condition, key);
    Ok(match selector {
        'C' => entry(CONDITION),
        'D' => {
            let description = entry(DESCRIPTION);
            if description.is_null() {
                interp.literal("")
            } else {
                description
            }
        }
        'I' => entry(INSTRUCTION),
        'A' => {
            let additional = entry(ADDITIONAL);
            if additional.is_null() {
                interp.nil()
            } else {
                crate::collections::directory_copy(&mut interp.memory.heap, additional)
            }
        }
        'R' => entry(RESULT).or(interp.nil()),
        'O' => interp.copy_condition(condition),
        _ => {
            let name = interp.condition_name(condition);
            let state = match interp.act(idx).traps.find(&name) {
                Some(handler) if handler.state == TrapState::Delayed => "DELAYED",
                Some(_) => "ON",
                None => "OFF",
            };
            interp.literal(state)
        }
    }
    .or(interp.literal("")))
}

fn bif_datatype(interp: &mut Interpreter<'_>, idx: usize, args: &[Value]) -> Result<Value, Unwind> {
    let text = interp.string_of(idx, args[0])?;
    let digits = interp.act(idx).settings.numeric.digits;
    let Some(kind) = arg(args, 1) else {
        let numeric = RexxNumber::parse(&text, digits).is_some();
        return Ok(interp.literal(if numeric { "NUM" } else { "CHAR" }));
    };
    let kind = option(interp, idx, "DATATYPE", 2, kind, "ABLMNSUVWX")?;
    let nonempty = !text.is_empty();
    let result = match kind {
        'A' => nonempty && text.chars().all(|c| c.is_ascii_alphanumeric()),
        'B' => {
            let bits: String = text.chars().filter(|c| *c != ' ').collect();
            bits.chars().all(|c| c == '0' || c == '1')
        }
        'L' => nonempty && text.chars().all(|c| c.is_ascii_lowercase()),
        'U' => nonempty && text.chars().all(|c| c.is_ascii_uppercase()),
        'M' => nonempty && text.chars().all(|c| c.is_ascii_alphabetic()),
        'N' => RexxNumber::parse(&text, digits).is_some(),
        'S' => classify_symbol(&text) != SymbolKind::Bad,
        'V' => classify_symbol(&text) == SymbolKind::Variable,
        'W' => RexxNumber::parse(&text, digits).is_some_and(|p| p.number.to_i64().is_some()),
        _ => text.chars().filter(|c| *c != ' ').all(|c| c.is_ascii_hexdigit()),
    };
    Ok(interp.boolean(result))
}

fn bif_digits(interp: &mut Interpreter<'_>, idx: usize, _args: &[Value]) -> Result<Value, Unwind> {
    let digits = interp.act(idx).settings.numeric.digits;
    Ok(interp.string(digits.to_string()))
}

fn bif_form(interp: &mut Interpreter<'_>, idx: usize, _args: &[Value]) -> Result<Value, Unwind> {
    let form = interp.act(idx).settings.numeric.form;
    Ok(interp.literal(form.name()))
}

fn bif_fuzz(interp: &mut Interpreter<'_>, idx: usize, _args: &[Value]) -> Result<Value, Unwind> {
    let fuzz = interp.act(idx).settings.numeric.fuzz;
    Ok(interp.string(fuzz.to_string()))
}

fn bif_length(interp: &mut Interpreter<'_>, idx: usize, args: &[Value]) -> Result<Value, Unwind> {
    let text = interp.string_of(idx, args[0])?;
    Ok(interp.string(text.chars().count().to_string()))
}

fn bif_symbol(interp: &mut Interpreter<'_>, idx: usize, args: &[Value]) -> Result<Value, Unwind> {
    let name = interp.string_of(idx, args[0])?.to_ascii_uppercase();
    let result = match classify_symbol(&name) {
        SymbolKind::Bad => "BAD",
        SymbolKind::Constant => "LIT",
        SymbolKind::Variable => {
            let var = VariableRef::symbol(&name);
            if interp.peek_variable(idx, &var).is_null() {
                "LIT"
            } else {
                "VAR"
            }
        }
    };
    Ok(interp.literal(result))
}

fn bif_trace(interp: &mut Interpreter<'_>, idx: usize, args: &[Value]) -> Result<Value, Unwind> {
    let settings = &interp.act(idx).settings;
    let previous = format!(
        "{}{}",
        if settings.interactive { "?" } else { "" },
        settings.trace.letter()
    );
    if let Some(setting) = arg(args, 0) {
        let text = interp.string_of(idx, setting)?;
        interp.apply_trace(idx, &text)?;
    }
    Ok(interp.string(previous))
}

/// VALUE(name [, newvalue [, selector]]). The only selector is
/// ENVIRONMENT, which reads and writes the environment directory.
fn bif_value(interp: &mut Interpreter<'_>, idx: usize, args: &[Value]) -> Result<Value, Unwind> {
    let name = interp.string_of(idx, args[0])?.trim().to_ascii_uppercase();
    let new_value = arg(args, 1);
    if let Some(selector) = arg(args, 2) {
        let selector = interp.string_of(idx, selector)?;
        if !selector.trim().eq_ignore_ascii_case("ENVIRONMENT") {
            return Err(interp.syntax_error(
                idx,
                ErrorCode::INVALID_OPTION,
                &["VALUE", "3", "\"ENVIRONMENT\"", &selector],
            ));
        }
        let environment = interp.memory.globals.environment;
        let name = name.trim_start_matches('.');
        let old = directory_at(&interp.memory.heap, environment, name);
        if let Some(value) = new_value {
            directory_put(&mut interp.memory.heap, environment, name, value);
        }
        return Ok(old.or(interp.nil()));
    }
    if classify_symbol(&name) != SymbolKind::Variable {
        return Err(interp.syntax_error(
            idx,
            ErrorCode::INVALID_OPTION,
            &["VALUE", "1", "a variable symbol", &name],
        ));
    }
    let var = VariableRef::symbol(&name);
    let old = interp.peek_variable(idx, &var);
    let old = if old.is_null() {
        interp.string(name)
    } else {
        old
    };
    if let Some(value) = new_value {
        interp.push(idx, old);
        interp.assign_variable(idx, &var, value);
        interp.pop(idx);
    }
    Ok(old)
}
