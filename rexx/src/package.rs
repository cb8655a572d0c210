//! Packages: a main program plus its directives.
//!
//! Registering a package only records its definition. The routine and
//! method objects are built on first use, and `::REQUIRES` packages are
//! merged into the public routine table the first time a lookup needs
//! them.

use std::sync::Arc;

use crate::Value;
use crate::alloc::alloc_directory;
use crate::code::{Code, PackageDefinition, RoutineSource};
use crate::collections::{canonical_key, directory_at, directory_put};
use crate::errors::KernelError;
use crate::globals::Globals;
use crate::hashtable::HashCollection;
use crate::heap::Heap;
use crate::object::{CodeBody, NativeRoutineBody, ObjectBody, PackageBody};

/// Adds `definition` to the program directory.
pub fn register_package(
    heap: &mut Heap,
    globals: &Globals,
    definition: PackageDefinition,
) -> Result<Value, KernelError> {
    let name = canonical_key(&definition.name);
    if !directory_at(heap, globals.programs, &name).is_null() {
        return Err(KernelError::DuplicatePackage(name));
    }
    let package = heap.allocate(ObjectBody::Package(PackageBody {
        name: name.clone(),
        definition: Arc::new(definition),
        install_pending: true,
        routines: HashCollection::new(),
        public_routines: HashCollection::new(),
        merged_public: HashCollection::new(),
        methods: Value::NULL,
        required: Vec::new(),
        unresolved_requires: Vec::new(),
        security_manager: Value::NULL,
    }));
    directory_put(heap, globals.programs, &name, package);
    log::debug!("registered package {name}");
    Ok(package)
}

fn package_body(heap: &Heap, package: Value) -> Option<&PackageBody> {
    match heap.try_get(package).map(|o| &o.body) {
        Some(ObjectBody::Package(body)) => Some(body),
        _ => None,
    }
}

fn package_body_mut(heap: &mut Heap, package: Value) -> Option<&mut PackageBody> {
    if package.is_null() {
        return None;
    }
    match heap.body_mut(package) {
        ObjectBody::Package(body) => Some(body),
        _ => None,
    }
}

/// Creates the routine and method objects of `package` once.
pub fn ensure_installed(heap: &mut Heap, _globals: &Globals, package: Value) {
    let Some(body) = package_body_mut(heap, package) else {
        return;
    };
    if !body.install_pending {
        return;
    }
    body.install_pending = false;
    let definition = body.definition.clone();

    let mut routines = HashCollection::new();
    let mut public = HashCollection::new();
    for routine in &definition.routines {
        let object = match &routine.source {
            RoutineSource::Rexx(code) => heap.allocate(ObjectBody::Routine(CodeBody {
                name: routine.name.clone(),
                code: code.clone(),
                package,
            })),
            RoutineSource::Native {
                library,
                entry,
                signature,
            } => heap.allocate(ObjectBody::NativeRoutine(NativeRoutineBody {
                name: entry.clone(),
                library: library.clone(),
                signature: signature.clone(),
                entry: None,
                package,
            })),
        };
        routines.put(object, routine.name.clone());
        if routine.public {
            public.put(object, routine.name.clone());
        }
    }

    let methods = alloc_directory(heap);
    for (name, code) in &definition.methods {
        let method = heap.allocate(ObjectBody::Method(CodeBody {
            name: name.clone(),
            code: code.clone(),
            package,
        }));
        directory_put(heap, methods, name, method);
    }

    if let Some(body) = package_body_mut(heap, package) {
        log::debug!(
            "installed package {}: {} routines, {} methods",
            body.name,
            routines.len(),
            definition.methods.len()
        );
        body.routines = routines;
        body.public_routines = public;
        body.methods = methods;
        body.unresolved_requires = definition.requires.clone();
    }
}

pub fn main_code(heap: &Heap, package: Value) -> Option<Arc<Code>> {
    package_body(heap, package).map(|body| body.definition.main.clone())
}

/// Merges the public routines of every required package (and of the
/// packages they require) into `package`'s merged table. The first
/// definition of a name wins.
fn resolve_requires(heap: &mut Heap, globals: &Globals, package: Value, visiting: &mut Vec<Value>) {
    if visiting.contains(&package) {
        return;
    }
    visiting.push(package);
    ensure_installed(heap, globals, package);
    let pending = match package_body_mut(heap, package) {
        Some(body) => std::mem::take(&mut body.unresolved_requires),
        None => return,
    };
    for name in pending {
        let required = directory_at(heap, globals.programs, &name);
        if required.is_null() {
            log::warn!("required package {name} is not registered");
            continue;
        }
        resolve_requires(heap, globals, required, visiting);
        let Some(source) = package_body(heap, required) else {
            continue;
        };
        let exported: Vec<(String, Value)> = source
            .public_routines
            .iter()
            .chain(source.merged_public.iter())
            .map(|(name, routine)| (name.clone(), routine))
            .collect();
        if let Some(body) = package_body_mut(heap, package) {
            body.required.push(required);
            for (name, routine) in exported {
                if !body.merged_public.has_index(&name) {
                    body.merged_public.put(routine, name);
                }
            }
        }
    }
}

/// External routine lookup from `package`: its own routines, then the
/// public routines of required packages, then registered programs.
/// NULL when nothing matches.
pub fn find_routine(heap: &mut Heap, globals: &Globals, package: Value, name: &str) -> Value {
    let name = canonical_key(name);
    ensure_installed(heap, globals, package);
    if let Some(body) = package_body(heap, package) {
        let local = body.routines.get(&name);
        if !local.is_null() {
            return local;
        }
        if !body.unresolved_requires.is_empty() {
            resolve_requires(heap, globals, package, &mut Vec::new());
        }
    }
    if let Some(body) = package_body(heap, package) {
        let merged = body.merged_public.get(&name);
        if !merged.is_null() {
            return merged;
        }
    }
    directory_at(heap, globals.programs, &name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::code::CodeBuilder;
    use crate::heap::HeapSettings;
    use crate::native::NativeSignature;

    fn code(name: &str) -> Code {
        let mut b = CodeBuilder::new(name);
        b.nop();
        b.build().unwrap()
    }

    fn setup() -> (Heap, Globals) {
        let mut heap = Heap::new(HeapSettings::default());
        let globals = Globals::create(&mut heap);
        (heap, globals)
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let (mut heap, globals) = setup();
        register_package(&mut heap, &globals, PackageDefinition::new("a", code("a"))).unwrap();
        let err = register_package(&mut heap, &globals, PackageDefinition::new("A", code("a")))
            .unwrap_err();
        assert_eq!(err, KernelError::DuplicatePackage("A".into()));
    }

    #[test]
    fn install_builds_routines_once() {
        let (mut heap, globals) = setup();
        let definition = PackageDefinition::new("main", code("main"))
            .routine("local", false, code("local"))
            .native_routine("ext", true, "lib", "ext", NativeSignature::default())
            .method("greet", code("greet"));
        let package = register_package(&mut heap, &globals, definition).unwrap();
        ensure_installed(&mut heap, &globals, package);
        let body = package_body(&heap, package).unwrap();
        assert_eq!(body.routines.len(), 2);
        assert_eq!(body.public_routines.len(), 1);
        let local = body.routines.get(&"LOCAL".to_string());
        let methods = body.methods;
        assert!(!directory_at(&heap, methods, "GREET").is_null());

        ensure_installed(&mut heap, &globals, package);
        let body = package_body(&heap, package).unwrap();
        assert_eq!(body.routines.get(&"LOCAL".to_string()), local, "second install is a no-op");
    }

    #[test]
    fn lookup_order_is_local_then_required_then_programs() {
        let (mut heap, globals) = setup();
        let lib = PackageDefinition::new("lib", code("lib"))
            .routine("shared", true, code("lib shared"))
            .routine("hidden", false, code("lib hidden"))
            .requires("base");
        let base = PackageDefinition::new("base", code("base")).routine("deep", true, code("deep"));
        let main = PackageDefinition::new("main", code("main"))
            .routine("shared", false, code("main shared"))
            .requires("lib");
        let lib = register_package(&mut heap, &globals, lib).unwrap();
        register_package(&mut heap, &globals, base).unwrap();
        let main = register_package(&mut heap, &globals, main).unwrap();

        let shared = find_routine(&mut heap, &globals, main, "shared");
        let ObjectBody::Routine(body) = heap.body(shared) else {
            panic!("expected a routine");
        };
        assert_eq!(body.package, main, "local routine wins");

        assert!(find_routine(&mut heap, &globals, main, "hidden").is_null());
        let deep = find_routine(&mut heap, &globals, main, "deep");
        assert!(!deep.is_null(), "requires are merged transitively");
        assert_eq!(find_routine(&mut heap, &globals, main, "lib"), lib);
        assert!(find_routine(&mut heap, &globals, main, "nothing").is_null());
    }

    #[test]
    fn cyclic_requires_terminate() {
        let (mut heap, globals) = setup();
        let a = PackageDefinition::new("a", code("a"))
            .routine("fa", true, code("fa"))
            .requires("b");
        let b = PackageDefinition::new("b", code("b"))
            .routine("fb", true, code("fb"))
            .requires("a");
        let a = register_package(&mut heap, &globals, a).unwrap();
        register_package(&mut heap, &globals, b).unwrap();
        assert!(!find_routine(&mut heap, &globals, a, "fb").is_null());
    }
}
