//! Engine loaded from a shared library

use std::ffi::{c_char, CStr};
use std::path::{Path, PathBuf};

use libloading::Library;
use tracing::info;

use crate::engine::Engine;
use crate::error::EngineError;
use crate::layout::RawState;

type VoidFn = unsafe extern "C" fn();
type LoadFn = unsafe extern "C" fn(*const c_char) -> bool;
type CycleFn = unsafe extern "C" fn() -> bool;
type CopyFn = unsafe extern "C" fn(*mut RawState);

/// The emulator as exported by its C library.
pub struct LibraryEngine {
    path: PathBuf,
    init: VoidFn,
    load_asm: LoadFn,
    load_c: LoadFn,
    execute_cycle: CycleFn,
    resume: VoidFn,
    get_copy: CopyFn,
    // Keeps the function pointers above valid.
    _library: Library,
}

impl LibraryEngine {
    /// Load the library at `path` and resolve every engine entry point.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();
        // SAFETY: loading runs the library's initialisers. The engine library
        // is a trusted part of the deployment.
        let library = unsafe { Library::new(path) }.map_err(|source| EngineError::Load {
            path: path.to_path_buf(),
            source,
        })?;

        let engine = Self {
            path: path.to_path_buf(),
            init: symbol(&library, "mcu_init")?,
            load_asm: symbol(&library, "mcu_load_asm")?,
            load_c: symbol(&library, "mcu_load_c")?,
            execute_cycle: symbol(&library, "mcu_execute_cycle")?,
            resume: symbol(&library, "mcu_resume")?,
            get_copy: symbol(&library, "mcu_get_copy")?,
            _library: library,
        };
        info!("Engine library loaded from {}", engine.path.display());
        Ok(engine)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn symbol<T: Copy>(library: &Library, name: &'static str) -> Result<T, EngineError> {
    // SAFETY: `T` is the exact signature the engine exports under `name`.
    unsafe { library.get::<T>(name.as_bytes()) }
        .map(|symbol| *symbol)
        .map_err(|source| EngineError::MissingSymbol { name, source })
}

impl std::fmt::Debug for LibraryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LibraryEngine")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

// SAFETY (all calls below): the pointers were resolved from the library held
// in `_library`, which outlives them. Callers serialise access, the engine is
// not reentrant.
impl Engine for LibraryEngine {
    fn init(&mut self) {
        unsafe { (self.init)() }
    }

    fn load_asm(&mut self, source: &CStr) -> bool {
        unsafe { (self.load_asm)(source.as_ptr()) }
    }

    fn load_c(&mut self, source: &CStr) -> bool {
        unsafe { (self.load_c)(source.as_ptr()) }
    }

    fn execute_cycle(&mut self) -> bool {
        unsafe { (self.execute_cycle)() }
    }

    fn resume(&mut self) {
        unsafe { (self.resume)() }
    }

    fn state_copy(&mut self, out: &mut RawState) {
        unsafe { (self.get_copy)(out as *mut RawState) }
    }
}
