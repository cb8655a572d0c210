//! The kernel: one heap, one set of globals, and the registries every
//! activity shares.
//!
//! `Memory` sits behind a single `parking_lot::Mutex`. An activity holds
//! the guard for as long as it interprets and gives it up only at a
//! clause boundary or around a host command, after publishing its roots.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle, ThreadId};

use ahash::AHashMap;
use parking_lot::{Mutex, MutexGuard, RwLock};

use crate::Value;
use crate::activity::{Activity, ActivityControl, ActivitySettings, ActivityState};
use crate::code::PackageDefinition;
use crate::commands::CommandHandler;
use crate::errors::{DefaultCatalog, ImageError, KernelError, MessageCatalog};
use crate::globals::Globals;
use crate::heap::{GcStats, Heap, HeapSettings, RootProvider};
use crate::image::Image;
use crate::native::{LibraryManager, NativeFn, NativeLibrary};
use crate::package;

/// Stack size of activity threads; deep Rexx recursion recurses in Rust.
const ACTIVITY_STACK_SIZE: usize = 32 * 1024 * 1024;

pub struct Memory {
    pub heap: Heap,
    pub globals: Globals,
    /// Root snapshots of activities that released the lock mid-run.
    pub parked: AHashMap<u64, Vec<Value>>,
}

struct MemoryRoots<'m> {
    globals: &'m mut Globals,
    parked: &'m mut AHashMap<u64, Vec<Value>>,
}

impl RootProvider for MemoryRoots<'_> {
    fn visit_roots(&mut self, visitor: &mut dyn FnMut(&mut Value)) {
        self.globals.visit_roots(visitor);
        for roots in self.parked.values_mut() {
            roots.iter_mut().for_each(&mut *visitor);
        }
    }
}

struct KernelShared {
    memory: Mutex<Memory>,
    activities: RwLock<AHashMap<u64, (ThreadId, Arc<ActivityControl>)>>,
    libraries: RwLock<LibraryManager>,
    commands: RwLock<AHashMap<String, Arc<dyn CommandHandler>>>,
    catalog: Arc<dyn MessageCatalog>,
    heap_settings: HeapSettings,
    activity_settings: ActivitySettings,
    next_activity: AtomicU64,
}

#[derive(Clone)]
pub struct Kernel(Arc<KernelShared>);

pub struct KernelCreateInfo {
    pub heap: HeapSettings,
    pub activity: ActivitySettings,
    /// Start from a saved image instead of fresh globals.
    pub image: Option<Image>,
    pub catalog: Option<Arc<dyn MessageCatalog>>,
}

impl Default for KernelCreateInfo {
    fn default() -> Self {
        Self {
            heap: HeapSettings::default(),
            activity: ActivitySettings::default(),
            image: None,
            catalog: None,
        }
    }
}

impl Kernel {
    pub fn new(info: KernelCreateInfo) -> Result<Self, KernelError> {
        let (heap, globals) = match info.image {
            Some(image) => image.restore(info.heap.clone())?,
            None => {
                let mut heap = Heap::new(info.heap.clone());
                let globals = Globals::create(&mut heap);
                (heap, globals)
            }
        };
        log::info!(
            "kernel created: {} objects, stress gc {}",
            heap.live_count(),
            info.heap.stress
        );
        let catalog = info
            .catalog
            .unwrap_or_else(|| Arc::new(DefaultCatalog) as Arc<dyn MessageCatalog>);
        Ok(Self(Arc::new(KernelShared {
            memory: Mutex::new(Memory {
                heap,
                globals,
                parked: AHashMap::new(),
            }),
            activities: RwLock::new(AHashMap::new()),
            libraries: RwLock::new(LibraryManager::default()),
            commands: RwLock::new(AHashMap::new()),
            catalog,
            heap_settings: info.heap,
            activity_settings: info.activity,
            next_activity: AtomicU64::new(1),
        })))
    }

    pub(crate) fn lock_memory(&self) -> MutexGuard<'_, Memory> {
        self.0.memory.lock()
    }

    pub fn register_package(&self, definition: PackageDefinition) -> Result<(), KernelError> {
        let mut memory = self.lock_memory();
        let memory = &mut *memory;
        package::register_package(&mut memory.heap, &memory.globals, definition)?;
        Ok(())
    }

    pub fn register_library(&self, library: NativeLibrary) {
        log::debug!("registered native library {}", library.name());
        self.0.libraries.write().register(library);
    }

    pub fn register_command_handler(&self, environment: &str, handler: impl CommandHandler + 'static) {
        self.0
            .commands
            .write()
            .insert(environment.to_ascii_uppercase(), Arc::new(handler));
    }

    pub(crate) fn command_handler(&self, environment: &str) -> Option<Arc<dyn CommandHandler>> {
        self.0.commands.read().get(environment).cloned()
    }

    pub(crate) fn resolve_native(&self, library: &str, entry: &str) -> Option<NativeFn> {
        self.0.libraries.read().resolve(library, entry)
    }

    /// Native entry points resolved so far.
    pub fn native_resolutions(&self) -> usize {
        self.0.libraries.read().resolutions()
    }

    pub(crate) fn catalog(&self) -> &dyn MessageCatalog {
        &*self.0.catalog
    }

    /// New activity bound to the calling thread.
    pub fn create_activity(&self) -> Activity {
        let id = self.0.next_activity.fetch_add(1, Ordering::Relaxed);
        let control = Arc::new(ActivityControl::default());
        self.0
            .activities
            .write()
            .insert(id, (thread::current().id(), control.clone()));
        log::debug!("activity {id} created");
        let state = ActivityState::new(id, self.0.activity_settings.clone(), control);
        Activity::new(self.clone(), state)
    }

    pub(crate) fn unregister_activity(&self, id: u64) {
        self.0.activities.write().remove(&id);
        log::debug!("activity {id} finished");
    }

    /// Runs `f` with a fresh activity on a new OS thread.
    pub fn spawn_activity<F, R>(&self, f: F) -> std::io::Result<JoinHandle<R>>
    where
        F: FnOnce(&mut Activity) -> R + Send + 'static,
        R: Send + 'static,
    {
        let kernel = self.clone();
        thread::Builder::new()
            .name("rexx-activity".into())
            .stack_size(ACTIVITY_STACK_SIZE)
            .spawn(move || {
                let mut activity = kernel.create_activity();
                f(&mut activity)
            })
    }

    /// Posts a HALT to activity `id`. False when there is no such
    /// activity.
    pub fn halt(&self, id: u64, description: &str) -> bool {
        match self.0.activities.read().get(&id) {
            Some((_, control)) => {
                log::info!("halt requested for activity {id}");
                control.request_halt(description);
                true
            }
            None => false,
        }
    }

    /// Posts a HALT to every activity running on `thread`.
    pub fn halt_thread(&self, thread: ThreadId, description: &str) -> bool {
        let activities = self.0.activities.read();
        let mut found = false;
        for (id, (owner, control)) in activities.iter() {
            if *owner == thread {
                log::info!("halt requested for activity {id}");
                control.request_halt(description);
                found = true;
            }
        }
        found
    }

    /// Switches interactive tracing of activity `id` on or off.
    pub fn set_trace(&self, id: u64, on: bool) -> bool {
        match self.0.activities.read().get(&id) {
            Some((_, control)) => {
                control.request_trace(on);
                true
            }
            None => false,
        }
    }

    /// Collects with only the globals and parked activities as roots.
    /// Call it while no activity is interpreting on this thread.
    pub fn collect_garbage(&self) -> GcStats {
        let mut memory = self.lock_memory();
        let memory = &mut *memory;
        let mut roots = MemoryRoots {
            globals: &mut memory.globals,
            parked: &mut memory.parked,
        };
        memory.heap.collect(&mut roots)
    }

    pub fn save_image(&self) -> Result<Image, ImageError> {
        let mut memory = self.lock_memory();
        let memory = &mut *memory;
        Image::capture(&mut memory.heap, &memory.globals)
    }

    pub fn live_objects(&self) -> usize {
        self.lock_memory().heap.live_count()
    }

    pub fn heap_settings(&self) -> &HeapSettings {
        &self.0.heap_settings
    }
}
