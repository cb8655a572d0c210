//! Native routines: libraries of Rust functions callable from interpreted
//! code, argument marshalling against a declared signature, and the
//! context handed to the function while it runs.
//!
//! Entry points are resolved lazily by (library, routine) on first call
//! and cached on the routine object. The cache is cleared whenever an
//! image is saved, so a restored image resolves again.

use std::sync::atomic::{AtomicUsize, Ordering};

use ahash::AHashMap;

use crate::Value;
use crate::activation::{Frame, NativeActivation};
use crate::alloc::alloc_string;
use crate::condition::Unwind;
use crate::errors::ErrorCode;
use crate::interpreter::Interpreter;
use crate::numeric::{MAX_DIGITS, RexxNumber};
use crate::object::{NativeEntry, ObjectBody};
use crate::varpool::{PoolReturn, ShvBlock};

pub type NativeFn = fn(&mut NativeContext<'_, '_>, &[NativeArgument]) -> Result<Value, Unwind>;

/// Parameter kinds a native routine can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    Object,
    String,
    Int32,
    Int64,
    UInt64,
    Double,
    Pointer,
    CString,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NativeSignature {
    pub params: Vec<ArgKind>,
    /// Leading parameters that must be supplied.
    pub required: usize,
}

impl NativeSignature {
    pub fn new(params: &[ArgKind], required: usize) -> Self {
        Self {
            params: params.to_vec(),
            required,
        }
    }
}

/// A marshalled argument.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeArgument {
    Omitted,
    Object(Value),
    String(String),
    Int32(i32),
    Int64(i64),
    UInt64(u64),
    Double(f64),
    Pointer(usize),
    CString(String),
}

// ── Libraries ─────────────────────────────────────────────────────────

pub struct NativeLibrary {
    name: String,
    entries: AHashMap<String, NativeFn>,
}

impl NativeLibrary {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_ascii_uppercase(),
            entries: AHashMap::new(),
        }
    }

    pub fn entry(mut self, name: &str, function: NativeFn) -> Self {
        self.entries.insert(name.to_ascii_uppercase(), function);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Registered libraries, keyed by upper-case name.
#[derive(Default)]
pub struct LibraryManager {
    libraries: AHashMap<String, NativeLibrary>,
    resolutions: AtomicUsize,
}

impl LibraryManager {
    pub fn register(&mut self, library: NativeLibrary) {
        self.libraries.insert(library.name.clone(), library);
    }

    pub fn resolve(&self, library: &str, entry: &str) -> Option<NativeFn> {
        let function = self
            .libraries
            .get(&library.to_ascii_uppercase())?
            .entries
            .get(&entry.to_ascii_uppercase())
            .copied()?;
        self.resolutions.fetch_add(1, Ordering::Relaxed);
        Some(function)
    }

    /// Successful lookups so far.
    pub fn resolutions(&self) -> usize {
        self.resolutions.load(Ordering::Relaxed)
    }
}

// ── Whole-number parsing ──────────────────────────────────────────────

enum Whole {
    Value(i128),
    TooLarge,
    NotWhole,
    NotNumber,
}

fn parse_whole(text: &str) -> Whole {
    let trimmed = text.trim();
    if let Ok(n) = trimmed.parse::<i128>() {
        return Whole::Value(n);
    }
    let Some(parsed) = RexxNumber::parse(trimmed, MAX_DIGITS) else {
        return Whole::NotNumber;
    };
    let number = parsed.number;
    let magnitude = if number.exponent < 0 {
        let scale = u32::try_from(-number.exponent).ok().and_then(|e| 10u128.checked_pow(e));
        match scale {
            Some(scale) if number.coefficient % scale == 0 => number.coefficient / scale,
            None if number.coefficient == 0 => 0,
            _ => return Whole::NotWhole,
        }
    } else {
        let scaled = u32::try_from(number.exponent)
            .ok()
            .and_then(|e| 10u128.checked_pow(e))
            .and_then(|scale| number.coefficient.checked_mul(scale));
        match scaled {
            Some(n) => n,
            None => return Whole::TooLarge,
        }
    };
    match i128::try_from(magnitude) {
        Ok(n) if number.negative => Whole::Value(-n),
        Ok(n) => Whole::Value(n),
        Err(_) => Whole::TooLarge,
    }
}

// ── Calling ───────────────────────────────────────────────────────────

impl Interpreter<'_> {
    /// Runs native routine `routine` with the top `argc` stack entries of
    /// frame `idx` as arguments.
    pub(crate) fn call_native(
        &mut self,
        idx: usize,
        routine: Value,
        argc: usize,
    ) -> Result<Value, Unwind> {
        let ObjectBody::NativeRoutine(body) = self.memory.heap.body(routine) else {
            return Ok(Value::NULL);
        };
        let name = body.name.clone();
        let library = body.library.clone();
        let signature = body.signature.clone();
        let entry = match body.entry {
            Some(NativeEntry(function)) => function,
            None => {
                let Some(function) = self.kernel.resolve_native(&library, &name) else {
                    return Err(self.syntax_error(
                        idx,
                        ErrorCode::UNRESOLVED_NATIVE,
                        &[&library, &name],
                    ));
                };
                log::debug!("resolved native routine {library}:{name}");
                if let ObjectBody::NativeRoutine(body) = self.memory.heap.body_mut(routine) {
                    body.entry = Some(NativeEntry(function));
                }
                function
            }
        };

        let base = self.activity.frames.len();
        if base >= self.activity.settings.max_depth {
            return Err(Unwind::Fatal(crate::errors::FatalError::ControlStackFull {
                depth: base,
            }));
        }
        let arguments = self.stack_args(idx, argc);
        self.activity.frames.push(Frame::Native(NativeActivation {
            routine,
            name: name.clone(),
            arguments: arguments.clone(),
            result: Value::NULL,
            variable_pool_enabled: true,
            protected: Vec::new(),
            parent: Some(idx),
        }));
        let result = self.run_native(base, entry, &name, &signature, &arguments);
        self.activity.frames.truncate(base);
        result
    }

    fn run_native(
        &mut self,
        frame: usize,
        entry: NativeFn,
        name: &str,
        signature: &NativeSignature,
        arguments: &[Value],
    ) -> Result<Value, Unwind> {
        let args = self.marshal_arguments(frame, name, signature, arguments)?;
        let mut context = NativeContext { interp: self, frame };
        entry(&mut context, &args)
    }

    fn marshal_arguments(
        &mut self,
        frame: usize,
        name: &str,
        signature: &NativeSignature,
        arguments: &[Value],
    ) -> Result<Vec<NativeArgument>, Unwind> {
        let supplied = arguments.iter().rposition(|v| !v.is_null()).map_or(0, |p| p + 1);
        if supplied > signature.params.len() {
            let max = signature.params.len().to_string();
            return Err(self.syntax_error(
                frame,
                ErrorCode::TOO_MANY_METHOD_ARGUMENTS,
                &[name, &max],
            ));
        }
        let mut marshalled = Vec::with_capacity(signature.params.len());
        for (i, &kind) in signature.params.iter().enumerate() {
            let value = arguments.get(i).copied().unwrap_or(Value::NULL);
            if value.is_null() {
                if i < signature.required {
                    let position = (i + 1).to_string();
                    return Err(self.syntax_error(
                        frame,
                        ErrorCode::MISSING_METHOD_ARGUMENT,
                        &[name, &position],
                    ));
                }
                marshalled.push(NativeArgument::Omitted);
                continue;
            }
            marshalled.push(self.convert_argument(frame, i + 1, kind, value)?);
        }
        Ok(marshalled)
    }

    fn convert_argument(
        &mut self,
        frame: usize,
        position: usize,
        kind: ArgKind,
        value: Value,
    ) -> Result<NativeArgument, Unwind> {
        if kind == ArgKind::Object {
            return Ok(NativeArgument::Object(value));
        }
        if kind == ArgKind::Pointer {
            if let ObjectBody::Pointer(address) = self.memory.heap.body(value) {
                return Ok(NativeArgument::Pointer(*address));
            }
            let text = self.plain_string(value);
            let position = position.to_string();
            return Err(self.syntax_error(frame, ErrorCode::NATIVE_POINTER, &[&position, &text]));
        }
        let text = self.string_of(frame, value)?;
        let pos = position.to_string();
        match kind {
            ArgKind::String => Ok(NativeArgument::String(text)),
            ArgKind::CString if text.contains('\0') => {
                Err(self.syntax_error(frame, ErrorCode::NATIVE_NULL_CHARACTER, &[&pos]))
            }
            ArgKind::CString => Ok(NativeArgument::CString(text)),
            ArgKind::Double => match RexxNumber::parse(&text, MAX_DIGITS) {
                Some(parsed) => Ok(NativeArgument::Double(parsed.number.to_f64())),
                None => match text.trim().parse::<f64>() {
                    Ok(n) => Ok(NativeArgument::Double(n)),
                    Err(_) => Err(self.syntax_error(frame, ErrorCode::NATIVE_NUMBER, &[&pos, &text])),
                },
            },
            _ => self.convert_integer(frame, &pos, kind, text),
        }
    }

    fn convert_integer(
        &mut self,
        frame: usize,
        pos: &str,
        kind: ArgKind,
        text: String,
    ) -> Result<NativeArgument, Unwind> {
        let (min, max) = match kind {
            ArgKind::Int32 => (i32::MIN as i128, i32::MAX as i128),
            ArgKind::Int64 => (i64::MIN as i128, i64::MAX as i128),
            _ => (0, u64::MAX as i128),
        };
        let n = match parse_whole(&text) {
            Whole::Value(n) => Some(n),
            Whole::TooLarge => None,
            Whole::NotWhole | Whole::NotNumber => {
                return Err(self.syntax_error(frame, ErrorCode::NATIVE_WHOLE_NUMBER, &[pos, &text]));
            }
        };
        match n {
            Some(n) if kind == ArgKind::UInt64 && n < 0 => {
                Err(self.syntax_error(frame, ErrorCode::NATIVE_NON_NEGATIVE, &[pos, &text]))
            }
            Some(n) if (min..=max).contains(&n) => Ok(match kind {
                ArgKind::Int32 => NativeArgument::Int32(n as i32),
                ArgKind::Int64 => NativeArgument::Int64(n as i64),
                _ => NativeArgument::UInt64(n as u64),
            }),
            _ => {
                let (min, max) = (min.to_string(), max.to_string());
                Err(self.syntax_error(frame, ErrorCode::NATIVE_RANGE, &[pos, &min, &max, &text]))
            }
        }
    }
}

// ── Context ───────────────────────────────────────────────────────────

/// What a native routine sees of the interpreter while it runs. Variable
/// access goes to the calling activation.
pub struct NativeContext<'i, 'a> {
    pub(crate) interp: &'i mut Interpreter<'a>,
    pub(crate) frame: usize,
}

impl NativeContext<'_, '_> {
    fn native(&self) -> &NativeActivation {
        match &self.interp.activity.frames[self.frame] {
            Frame::Native(native) => native,
            Frame::Rexx(_) => panic!("native context bound to a Rexx frame"),
        }
    }

    fn native_mut(&mut self) -> &mut NativeActivation {
        match &mut self.interp.activity.frames[self.frame] {
            Frame::Native(native) => native,
            Frame::Rexx(_) => panic!("native context bound to a Rexx frame"),
        }
    }

    /// The Rexx activation that made the call.
    fn caller(&self) -> usize {
        self.native()
            .parent
            .and_then(|p| self.interp.nearest_rexx(p))
            .unwrap_or(0)
    }

    pub fn name(&self) -> &str {
        &self.native().name
    }

    pub fn argument_count(&self) -> usize {
        self.native().arguments.len()
    }

    /// Keeps `value` alive until the routine returns.
    pub fn protect(&mut self, value: Value) -> Value {
        self.native_mut().protected.push(value);
        value
    }

    pub fn string(&mut self, text: &str) -> Value {
        let value = alloc_string(&mut self.interp.memory.heap, text);
        self.protect(value)
    }

    pub fn pointer(&mut self, address: usize) -> Value {
        let value = self.interp.memory.heap.allocate(ObjectBody::Pointer(address));
        self.protect(value)
    }

    pub fn string_value(&self, value: Value) -> String {
        self.interp.plain_string(value)
    }

    pub fn nil(&self) -> Value {
        self.interp.nil()
    }

    pub fn say(&mut self, text: &str) {
        self.interp.activity.output.say(text);
    }

    pub fn get_context_variable(&self, name: &str) -> Option<Value> {
        let value = self.interp.get_context_variable(self.caller(), name);
        (!value.is_null()).then_some(value)
    }

    pub fn set_context_variable(&mut self, name: &str, value: Value) {
        let caller = self.caller();
        self.interp.set_context_variable(caller, name, value);
    }

    pub fn drop_context_variable(&mut self, name: &str) {
        let caller = self.caller();
        self.interp.drop_context_variable(caller, name);
    }

    pub fn set_variable_pool_enabled(&mut self, enabled: bool) {
        self.native_mut().variable_pool_enabled = enabled;
    }

    /// Processes shared-variable-pool requests against the caller's
    /// variables.
    pub fn variable_pool(&mut self, requests: &mut [ShvBlock]) -> PoolReturn {
        self.interp.variable_pool(self.frame, requests)
    }

    /// SYNTAX `code` raised on behalf of the routine; return it as `Err`.
    pub fn raise_error(&mut self, code: ErrorCode, substitutions: &[&str]) -> Unwind {
        self.interp.syntax_error(self.frame, code, substitutions)
    }

    /// Raises a non-SYNTAX condition in the caller.
    pub fn raise_condition(&mut self, name: &str, description: &str) -> Result<(), Unwind> {
        let condition = self.interp.new_condition(name, description);
        self.interp.raise_condition(self.frame, condition)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_ctx: &mut NativeContext<'_, '_>, _args: &[NativeArgument]) -> Result<Value, Unwind> {
        Ok(Value::NULL)
    }

    #[test]
    fn library_lookup_counts_resolutions() {
        let mut manager = LibraryManager::default();
        manager.register(NativeLibrary::new("math").entry("noop", noop));
        assert!(manager.resolve("MATH", "NOOP").is_some());
        assert!(manager.resolve("math", "noop").is_some());
        assert!(manager.resolve("math", "missing").is_none());
        assert!(manager.resolve("other", "noop").is_none());
        assert_eq!(manager.resolutions(), 2);
    }

    #[test]
    fn whole_numbers_parse_in_rexx_forms() {
        assert!(matches!(parse_whole(" 42 "), Whole::Value(42)));
        assert!(matches!(parse_whole("-7"), Whole::Value(-7)));
        assert!(matches!(parse_whole("1E3"), Whole::Value(1000)));
        assert!(matches!(parse_whole("2.000"), Whole::Value(2)));
        assert!(matches!(parse_whole("2.5"), Whole::NotWhole));
        assert!(matches!(parse_whole("abc"), Whole::NotNumber));
        assert!(matches!(parse_whole("1E60"), Whole::TooLarge));
    }
}
