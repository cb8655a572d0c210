//! Message dispatch.
//!
//! `receiver~message(args)` looks for, in order: a method attached to a
//! Directory entry with SETMETHOD, the built-in behaviour of the
//! receiver's kind, the Directory entry-name fallback (with the UNKNOWN
//! method), and finally raises NOMETHOD.

use crate::Value;
use crate::alloc::{
    alloc_array, alloc_array_dimensions, alloc_directory, alloc_identity_table, alloc_relation,
    alloc_stem, alloc_string_table,
};
use crate::collections::{canonical_key, directory_copy, string_table, string_table_mut};
use crate::condition::{OBJECT, Unwind};
use crate::errors::ErrorCode;
use crate::interpreter::Interpreter;
use crate::object::{ClassKind, MAX_ARRAY_SIZE, ObjectBody, ObjectKind};
use crate::package;
use crate::variables::{drop_compound, get_compound, set_compound};

impl Interpreter<'_> {
    /// Sends `message` to the receiver sitting below the top `argc` stack
    /// entries. Receiver and arguments are popped before returning. NULL
    /// means the method returned nothing.
    pub(crate) fn send_message(
        &mut self,
        idx: usize,
        message: &str,
        argc: usize,
    ) -> Result<Value, Unwind> {
        let base = self.act(idx).stack.len() - argc - 1;
        let result = self.dispatch(idx, base, &message.to_ascii_uppercase(), argc);
        self.act_mut(idx).stack.truncate(base);
        result
    }

    fn dispatch(
        &mut self,
        idx: usize,
        base: usize,
        message: &str,
        argc: usize,
    ) -> Result<Value, Unwind> {
        let receiver = self.act(idx).stack[base];
        let attached = match self.memory.heap.try_get(receiver).map(|o| &o.body) {
            Some(ObjectBody::Directory(dir)) => dir.methods.get(&message.to_string()),
            _ => Value::NULL,
        };
        if !attached.is_null() {
            return self.run_method(idx, attached, receiver, argc);
        }
        let args = self.stack_args(idx, argc);
        if let Some(result) = self.builtin_method(idx, receiver, message, &args)? {
            return Ok(result);
        }
        if self.kind_of(receiver) == Some(ObjectKind::Directory) {
            if let Some(result) = self.directory_fallback(idx, receiver, message, &args)? {
                return Ok(result);
            }
        }
        self.no_method(idx, receiver, message)
    }

    fn no_method(&mut self, idx: usize, receiver: Value, message: &str) -> Result<Value, Unwind> {
        let condition = self.new_condition("NOMETHOD", message);
        crate::collections::directory_put(&mut self.memory.heap, condition, OBJECT, receiver);
        self.raise_condition(idx, condition)?;
        Ok(Value::NULL)
    }

    fn kind_of(&self, value: Value) -> Option<ObjectKind> {
        self.memory.heap.try_get(value).map(|o| o.kind())
    }

    // ── Argument helpers ──────────────────────────────────────────────

    fn check_arity(
        &mut self,
        idx: usize,
        message: &str,
        args: &[Value],
        required: usize,
        max: usize,
    ) -> Result<(), Unwind> {
        if args.len() > max {
            let max = max.to_string();
            return Err(self.syntax_error(idx, ErrorCode::TOO_MANY_METHOD_ARGUMENTS, &[message, &max]));
        }
        if let Some(missing) = (0..required).find(|&i| args.get(i).is_none_or(|v| v.is_null())) {
            let position = (missing + 1).to_string();
            return Err(self.syntax_error(
                idx,
                ErrorCode::MISSING_METHOD_ARGUMENT,
                &[message, &position],
            ));
        }
        Ok(())
    }

    fn positive_index(&mut self, idx: usize, value: Value) -> Result<usize, Unwind> {
        let text = self.string_of(idx, value)?;
        let n = self.whole_number(idx, &text)?;
        if n < 1 {
            let message = format!("Index must be a positive whole number; found \"{text}\"");
            return Err(self.syntax_error(idx, ErrorCode::INCORRECT_ARGUMENT, &[&message]));
        }
        Ok(n as usize)
    }

    fn indexes(&mut self, idx: usize, values: &[Value]) -> Result<Vec<usize>, Unwind> {
        values.iter().map(|&v| self.positive_index(idx, v)).collect()
    }

    fn array_too_large(&mut self, idx: usize) -> Unwind {
        let message = format!("Array size exceeds the maximum of {MAX_ARRAY_SIZE} items");
        self.syntax_error(idx, ErrorCode::INCORRECT_ARGUMENT, &[&message])
    }

    fn count(&mut self, n: usize) -> Value {
        self.string(n.to_string())
    }

    fn or_nil(&self, value: Value) -> Value {
        value.or(self.nil())
    }

    // ── Built-in behaviour ────────────────────────────────────────────

    fn builtin_method(
        &mut self,
        idx: usize,
        receiver: Value,
        message: &str,
        args: &[Value],
    ) -> Result<Option<Value>, Unwind> {
        let Some(kind) = self.kind_of(receiver) else {
            return Ok(None);
        };
        let specific = match kind {
            ObjectKind::String => self.string_method(idx, receiver, message, args)?,
            ObjectKind::Array => self.array_method(idx, receiver, message, args)?,
            ObjectKind::Directory
            | ObjectKind::StringTable
            | ObjectKind::Relation => self.table_method(idx, receiver, kind, message, args)?,
            ObjectKind::IdentityTable => self.identity_method(idx, receiver, message, args)?,
            ObjectKind::Stem => self.stem_method(idx, receiver, message, args)?,
            ObjectKind::Routine | ObjectKind::NativeRoutine => {
                self.routine_method(idx, receiver, message, args)?
            }
            ObjectKind::Package => self.package_method(idx, receiver, message, args)?,
            ObjectKind::Class => self.class_method(idx, receiver, message, args)?,
            _ => None,
        };
        if specific.is_some() {
            return Ok(specific);
        }
        Ok(match message {
            "STRING" if kind == ObjectKind::String => Some(receiver),
            "STRING" | "OBJECTNAME" => {
                let text = self.plain_string(receiver);
                Some(self.string(text))
            }
            "ISNIL" => Some(self.boolean(kind == ObjectKind::Nil)),
            "COPY" if !matches!(kind, ObjectKind::Nil | ObjectKind::Class) => {
                Some(directory_copy(&mut self.memory.heap, receiver))
            }
            "NAME" => match self.memory.heap.body(receiver) {
                ObjectBody::Method(body) => {
                    let name = body.name.clone();
                    Some(self.string(name))
                }
                _ => None,
            },
            _ => None,
        })
    }

    fn string_method(
        &mut self,
        idx: usize,
        receiver: Value,
        message: &str,
        args: &[Value],
    ) -> Result<Option<Value>, Unwind> {
        let text = self.plain_string(receiver);
        let result = match message {
            "LENGTH" => text.chars().count().to_string(),
            "UPPER" => text.to_uppercase(),
            "LOWER" => text.to_lowercase(),
            "REVERSE" => text.chars().rev().collect(),
            _ => return Ok(None),
        };
        self.check_arity(idx, message, args, 0, 0)?;
        Ok(Some(self.string(result)))
    }

    fn array_method(
        &mut self,
        idx: usize,
        receiver: Value,
        message: &str,
        args: &[Value],
    ) -> Result<Option<Value>, Unwind> {
        let array = |interp: &Self| match interp.memory.heap.body(receiver) {
            ObjectBody::Array(array) => array.clone(),
            _ => Default::default(),
        };
        let result = match message {
            "SIZE" => {
                let n = array(self).items.len();
                self.count(n)
            }
            "ITEMS" => {
                let n = array(self).item_count();
                self.count(n)
            }
            "DIMENSION" => {
                let n = array(self).dimension_count();
                self.count(n)
            }
            "AT" | "[]" => {
                self.check_arity(idx, message, args, 1, usize::MAX)?;
                let index = self.indexes(idx, args)?;
                let value = array(self).at(&index);
                self.or_nil(value)
            }
            "HASINDEX" => {
                self.check_arity(idx, message, args, 1, usize::MAX)?;
                let index = self.indexes(idx, args)?;
                let present = !array(self).at(&index).is_null();
                self.boolean(present)
            }
            "PUT" | "[]=" => {
                self.check_arity(idx, message, args, 2, usize::MAX)?;
                let index = self.indexes(idx, &args[1..])?;
                let stored = match self.memory.heap.body_mut(receiver) {
                    ObjectBody::Array(array) => array.put(args[0], &index),
                    _ => false,
                };
                if !stored {
                    let fits = index.len() > 1 || index[0] <= MAX_ARRAY_SIZE;
                    if !fits {
                        return Err(self.array_too_large(idx));
                    }
                    return Err(self.syntax_error(
                        idx,
                        ErrorCode::INCORRECT_ARGUMENT,
                        &["Array index is out of bounds"],
                    ));
                }
                Value::NULL
            }
            "APPEND" => {
                self.check_arity(idx, message, args, 1, 1)?;
                let position = match self.memory.heap.body_mut(receiver) {
                    ObjectBody::Array(array) if array.dimensions.len() <= 1 => {
                        let position = array.items.len() + 1;
                        if !array.put(args[0], &[position]) {
                            return Err(self.array_too_large(idx));
                        }
                        position
                    }
                    _ => {
                        return Err(self.syntax_error(
                            idx,
                            ErrorCode::INCORRECT_ARGUMENT,
                            &["APPEND requires a single-dimension array"],
                        ));
                    }
                };
                self.count(position)
            }
            "REMOVE" => {
                self.check_arity(idx, message, args, 1, usize::MAX)?;
                let index = self.indexes(idx, args)?;
                let removed = match self.memory.heap.body_mut(receiver) {
                    ObjectBody::Array(array) => match array.slot(&index) {
                        Some(slot) if slot < array.items.len() => {
                            std::mem::take(&mut array.items[slot])
                        }
                        _ => Value::NULL,
                    },
                    _ => Value::NULL,
                };
                self.or_nil(removed)
            }
            "FIRST" | "LAST" => {
                let items = array(self).items;
                let mut positions = items.iter().enumerate().filter(|(_, v)| !v.is_null());
                let found = if message == "FIRST" {
                    positions.next()
                } else {
                    positions.next_back()
                };
                match found {
                    Some((i, _)) => self.count(i + 1),
                    None => self.nil(),
                }
            }
            "MAKEARRAY" | "ALLITEMS" => {
                let items: Vec<Value> =
                    array(self).items.into_iter().filter(|v| !v.is_null()).collect();
                alloc_array(&mut self.memory.heap, items)
            }
            "INDEX" | "HASITEM" => {
                self.check_arity(idx, message, args, 1, 1)?;
                let position = array(self).items.iter().position(|&v| v == args[0]);
                match (message, position) {
                    ("HASITEM", found) => self.boolean(found.is_some()),
                    (_, Some(i)) => self.count(i + 1),
                    (_, None) => self.nil(),
                }
            }
            _ => return Ok(None),
        };
        Ok(Some(result))
    }

    fn table_method(
        &mut self,
        idx: usize,
        receiver: Value,
        kind: ObjectKind,
        message: &str,
        args: &[Value],
    ) -> Result<Option<Value>, Unwind> {
        let relation = kind == ObjectKind::Relation;
        let directory = kind == ObjectKind::Directory;
        let result = match message {
            "AT" | "[]" | "ENTRY" if message != "ENTRY" || directory => {
                self.check_arity(idx, message, args, 1, 1)?;
                let key = canonical_key(&self.string_of(idx, args[0])?);
                let value = self.table(receiver).map_or(Value::NULL, |t| t.get(&key));
                if value.is_null() && directory {
                    return self.directory_miss(idx, receiver, &key).map(Some);
                }
                self.or_nil(value)
            }
            "PUT" | "[]=" => {
                self.check_arity(idx, message, args, 2, 2)?;
                let key = canonical_key(&self.string_of(idx, args[1])?);
                if let Some(table) = string_table_mut(&mut self.memory.heap, receiver) {
                    if relation {
                        table.add(args[0], key);
                    } else {
                        table.put(args[0], key);
                    }
                }
                Value::NULL
            }
            "SETENTRY" if directory => {
                self.check_arity(idx, message, args, 1, 2)?;
                let key = canonical_key(&self.string_of(idx, args[0])?);
                let value = args.get(1).copied().unwrap_or(Value::NULL);
                if let Some(table) = string_table_mut(&mut self.memory.heap, receiver) {
                    if value.is_null() {
                        table.remove(&key);
                    } else {
                        table.put(value, key);
                    }
                }
                Value::NULL
            }
            "REMOVE" => {
                self.check_arity(idx, message, args, 1, 1)?;
                let key = canonical_key(&self.string_of(idx, args[0])?);
                let removed = string_table_mut(&mut self.memory.heap, receiver)
                    .map_or(Value::NULL, |t| t.remove(&key));
                self.or_nil(removed)
            }
            "HASINDEX" | "HASENTRY" => {
                self.check_arity(idx, message, args, 1, 1)?;
                let key = canonical_key(&self.string_of(idx, args[0])?);
                let present = self.table(receiver).is_some_and(|t| t.has_index(&key));
                self.boolean(present)
            }
            "ITEMS" | "SIZE" => {
                let n = self.table(receiver).map_or(0, |t| t.len());
                self.count(n)
            }
            "INDEX" => {
                self.check_arity(idx, message, args, 1, 1)?;
                let key = self.table(receiver).and_then(|t| t.index_of(args[0]).cloned());
                match key {
                    Some(key) => self.string(key),
                    None => self.nil(),
                }
            }
            "HASITEM" => {
                self.check_arity(idx, message, args, 1, if relation { 2 } else { 1 })?;
                let found = match args.get(1) {
                    Some(&index) if relation => {
                        let key = canonical_key(&self.string_of(idx, index)?);
                        self.table(receiver).is_some_and(|t| t.has_item_at(args[0], &key))
                    }
                    _ => self.table(receiver).is_some_and(|t| t.has_item(args[0])),
                };
                self.boolean(found)
            }
            "REMOVEITEM" => {
                self.check_arity(idx, message, args, 1, if relation { 2 } else { 1 })?;
                let key = match args.get(1) {
                    Some(&index) if relation => Some(canonical_key(&self.string_of(idx, index)?)),
                    _ => None,
                };
                let removed = string_table_mut(&mut self.memory.heap, receiver).map_or(
                    Value::NULL,
                    |t| match &key {
                        Some(key) => t.remove_item_at(args[0], key),
                        None => t.remove_item(args[0]),
                    },
                );
                self.or_nil(removed)
            }
            "ALLAT" if relation => {
                self.check_arity(idx, message, args, 1, 1)?;
                let key = canonical_key(&self.string_of(idx, args[0])?);
                let items = self.table(receiver).map_or_else(Vec::new, |t| t.get_all(&key));
                alloc_array(&mut self.memory.heap, items)
            }
            "ALLITEMS" => {
                let items: Vec<Value> =
                    self.table(receiver).map_or_else(Vec::new, |t| t.values().collect());
                alloc_array(&mut self.memory.heap, items)
            }
            "MAKEARRAY" | "ALLINDEXES" => {
                let keys: Vec<String> = self
                    .table(receiver)
                    .map_or_else(Vec::new, |t| t.keys().cloned().collect());
                crate::alloc::alloc_string_array(&mut self.memory.heap, &keys)
            }
            "EMPTY" => {
                if let Some(table) = string_table_mut(&mut self.memory.heap, receiver) {
                    table.clear();
                }
                Value::NULL
            }
            "SETMETHOD" | "UNSETMETHOD" if directory => {
                self.check_arity(idx, message, args, 1, 2)?;
                let name = canonical_key(&self.string_of(idx, args[0])?);
                let method = if message == "SETMETHOD" {
                    args.get(1).copied().unwrap_or(Value::NULL)
                } else {
                    Value::NULL
                };
                if !method.is_null() && self.kind_of(method) != Some(ObjectKind::Method) {
                    return Err(self.syntax_error(
                        idx,
                        ErrorCode::INCORRECT_ARGUMENT,
                        &["SETMETHOD requires a Method object"],
                    ));
                }
                if let ObjectBody::Directory(dir) = self.memory.heap.body_mut(receiver) {
                    match (name.as_str(), method.is_null()) {
                        ("UNKNOWN", _) => dir.unknown = method,
                        (_, true) => {
                            dir.methods.remove(&name);
                        }
                        (_, false) => {
                            dir.methods.put(method, name);
                        }
                    }
                }
                Value::NULL
            }
            _ => return Ok(None),
        };
        Ok(Some(result))
    }

    fn table(&self, collection: Value) -> Option<&crate::hashtable::HashCollection<String>> {
        string_table(&self.memory.heap, collection)
    }

    /// A Directory lookup that found nothing: the UNKNOWN method if one is
    /// set, else `.nil`.
    fn directory_miss(&mut self, idx: usize, directory: Value, key: &str) -> Result<Value, Unwind> {
        let unknown = match self.memory.heap.body(directory) {
            ObjectBody::Directory(dir) => dir.unknown,
            _ => Value::NULL,
        };
        if unknown.is_null() {
            return Ok(self.nil());
        }
        let name = self.string(key);
        self.push(idx, name);
        let result = self.run_method(idx, unknown, directory, 1);
        self.pop(idx);
        Ok(self.or_nil(result?))
    }

    /// `dir~name` reads entry NAME and `dir~name=(v)` sets it.
    fn directory_fallback(
        &mut self,
        idx: usize,
        directory: Value,
        message: &str,
        args: &[Value],
    ) -> Result<Option<Value>, Unwind> {
        if let Some(name) = message.strip_suffix('=') {
            if args.len() == 1 && !name.is_empty() {
                crate::collections::directory_put(&mut self.memory.heap, directory, name, args[0]);
                return Ok(Some(Value::NULL));
            }
            return Ok(None);
        }
        if !args.is_empty() {
            return Ok(None);
        }
        let value = crate::collections::directory_at(&self.memory.heap, directory, message);
        if !value.is_null() {
            return Ok(Some(value));
        }
        self.directory_miss(idx, directory, message).map(Some)
    }

    fn identity_method(
        &mut self,
        idx: usize,
        receiver: Value,
        message: &str,
        args: &[Value],
    ) -> Result<Option<Value>, Unwind> {
        let ObjectBody::IdentityTable(table) = self.memory.heap.body_mut(receiver) else {
            return Ok(None);
        };
        let result = match (message, args) {
            ("PUT" | "[]=", &[value, key]) if !value.is_null() && !key.is_null() => {
                table.put(value, key);
                Value::NULL
            }
            ("AT" | "[]", &[key]) => table.get(&key),
            ("REMOVE", &[key]) => table.remove(&key),
            ("HASINDEX", &[key]) => {
                let present = table.has_index(&key);
                return Ok(Some(self.boolean(present)));
            }
            ("HASITEM", &[value]) => {
                let present = table.has_item(value);
                return Ok(Some(self.boolean(present)));
            }
            ("INDEX", &[value]) => table.index_of(value).copied().unwrap_or(Value::NULL),
            ("REMOVEITEM", &[value]) => table.remove_item(value),
            ("ITEMS" | "SIZE", &[]) => {
                let n = table.len();
                return Ok(Some(self.count(n)));
            }
            ("PUT" | "[]=" | "AT" | "[]" | "REMOVE" | "HASINDEX" | "HASITEM" | "INDEX"
            | "REMOVEITEM", _) => {
                let max = if matches!(message, "PUT" | "[]=") { 2 } else { 1 };
                self.check_arity(idx, message, args, max, max)?;
                return Ok(None);
            }
            _ => return Ok(None),
        };
        Ok(Some(self.or_nil(result)))
    }

    fn stem_method(
        &mut self,
        idx: usize,
        receiver: Value,
        message: &str,
        args: &[Value],
    ) -> Result<Option<Value>, Unwind> {
        let result = match message {
            "AT" | "[]" => {
                self.check_arity(idx, message, args, 1, 1)?;
                let tail = self.string_of(idx, args[0])?;
                let value = get_compound(&self.memory.heap, receiver, &tail);
                if value.is_null() {
                    let name = match self.memory.heap.body(receiver) {
                        ObjectBody::Stem(stem) => format!("{}{tail}", stem.name),
                        _ => tail,
                    };
                    self.string(name)
                } else {
                    value
                }
            }
            "PUT" | "[]=" => {
                self.check_arity(idx, message, args, 2, 2)?;
                let tail = self.string_of(idx, args[1])?;
                set_compound(&mut self.memory.heap, receiver, &tail, args[0]);
                Value::NULL
            }
            "REMOVE" => {
                self.check_arity(idx, message, args, 1, 1)?;
                let tail = self.string_of(idx, args[0])?;
                let old = get_compound(&self.memory.heap, receiver, &tail);
                drop_compound(&mut self.memory.heap, receiver, &tail);
                self.or_nil(old)
            }
            "HASINDEX" => {
                self.check_arity(idx, message, args, 1, 1)?;
                let tail = self.string_of(idx, args[0])?;
                let present = match self.memory.heap.body(receiver) {
                    ObjectBody::Stem(stem) => !stem.tails.get(&tail).is_null(),
                    _ => false,
                };
                self.boolean(present)
            }
            "ITEMS" => {
                let heap = &self.memory.heap;
                let n = match heap.body(receiver) {
                    ObjectBody::Stem(stem) => stem
                        .tails
                        .values()
                        .filter(|&v| !crate::variables::variable_value(heap, v).is_null())
                        .count(),
                    _ => 0,
                };
                self.count(n)
            }
            _ => return Ok(None),
        };
        Ok(Some(result))
    }

    fn routine_method(
        &mut self,
        idx: usize,
        receiver: Value,
        message: &str,
        args: &[Value],
    ) -> Result<Option<Value>, Unwind> {
        Ok(Some(match message {
            "CALL" => return self.call_routine_object(idx, receiver, args.len()).map(Some),
            "NAME" => {
                let name = match self.memory.heap.body(receiver) {
                    ObjectBody::Routine(body) => body.name.clone(),
                    ObjectBody::NativeRoutine(body) => body.name.clone(),
                    _ => String::new(),
                };
                self.string(name)
            }
            "PACKAGE" => {
                let package = match self.memory.heap.body(receiver) {
                    ObjectBody::Routine(body) => body.package,
                    ObjectBody::NativeRoutine(body) => body.package,
                    _ => Value::NULL,
                };
                self.or_nil(package)
            }
            _ => return Ok(None),
        }))
    }

    fn package_method(
        &mut self,
        idx: usize,
        receiver: Value,
        message: &str,
        args: &[Value],
    ) -> Result<Option<Value>, Unwind> {
        Ok(Some(match message {
            "NAME" => {
                let name = match self.memory.heap.body(receiver) {
                    ObjectBody::Package(body) => body.name.clone(),
                    _ => String::new(),
                };
                self.string(name)
            }
            "SETSECURITYMANAGER" => {
                self.check_arity(idx, message, args, 0, 1)?;
                let manager = args.first().copied().unwrap_or(Value::NULL);
                let manager = if self.kind_of(manager) == Some(ObjectKind::Nil) {
                    Value::NULL
                } else {
                    manager
                };
                if let ObjectBody::Package(body) = self.memory.heap.body_mut(receiver) {
                    body.security_manager = manager;
                }
                Value::NULL
            }
            "FINDROUTINE" => {
                self.check_arity(idx, message, args, 1, 1)?;
                let name = canonical_key(&self.string_of(idx, args[0])?);
                let memory = &mut *self.memory;
                let routine =
                    package::find_routine(&mut memory.heap, &memory.globals, receiver, &name);
                self.or_nil(routine)
            }
            _ => return Ok(None),
        }))
    }

    fn class_method(
        &mut self,
        idx: usize,
        receiver: Value,
        message: &str,
        args: &[Value],
    ) -> Result<Option<Value>, Unwind> {
        let ObjectBody::Class(class) = *self.memory.heap.body(receiver) else {
            return Ok(None);
        };
        let heap = &mut self.memory.heap;
        let result = match (class, message) {
            (ClassKind::Array, "NEW") => {
                let dimensions = self.indexes(idx, args)?;
                if dimensions.len() <= 1 {
                    alloc_array(&mut self.memory.heap, Vec::new())
                } else {
                    match alloc_array_dimensions(&mut self.memory.heap, dimensions) {
                        Some(array) => array,
                        None => return Err(self.array_too_large(idx)),
                    }
                }
            }
            (ClassKind::Array, "OF") => alloc_array(heap, args.to_vec()),
            (ClassKind::Directory, "NEW") => alloc_directory(heap),
            (ClassKind::StringTable, "NEW") => alloc_string_table(heap),
            (ClassKind::Relation, "NEW") => alloc_relation(heap),
            (ClassKind::IdentityTable, "NEW") => alloc_identity_table(heap),
            (ClassKind::Stem, "NEW") => {
                let name = match args.first() {
                    Some(&name) if !name.is_null() => self.string_of(idx, name)?,
                    _ => "STEM.".to_string(),
                };
                alloc_stem(&mut self.memory.heap, &name.to_ascii_uppercase(), Value::NULL)
            }
            _ => return Ok(None),
        };
        Ok(Some(result))
    }
}
