// Wasm Module Runtime
//
// Loads one code module into a private engine, lists its entry points and
// invokes one of them through the linear-memory ABI.
//
// ## Export naming
// - `name` with `() -> ()` / `() -> i32`: zero-parameter entry
// - `name` with `(i32, i32) -> ()` / `(i32, i32) -> i32`: text entry
// - `name$element`, `name$document`, `name$text` with the `(i32, i32)`
//   signature: element, document and text entries
//
// ## One-parameter ABI
// The module exports `memory` and `allocate(i32) -> i32`. Input bytes are
// written at the returned pointer and passed as `(ptr, len)`. An exported
// `deallocate(i32, i32)` is called afterwards. A non-zero `i32` result is a
// failure status.
//
// ## Instance entries
// A module exporting `_initialize` keeps state that must be constructed
// first. `_initialize` has to be `() -> ()`; otherwise none of the module's
// entries are callable.

use conveyor_core::domain::{EntryPoint, ParamShape, Receiver};
use conveyor_core::port::ExecutionError;
use std::path::Path;
use tracing::{debug, warn};
use wasmtime::*;

/// Guest constructor export
pub const CONSTRUCTOR_EXPORT: &str = "_initialize";

const MEMORY_EXPORT: &str = "memory";
const ALLOCATE_EXPORT: &str = "allocate";
const DEALLOCATE_EXPORT: &str = "deallocate";
const SHAPE_SEPARATOR: char = '$';

/// A compiled module bound to the engine that will run it
pub struct WasmModuleRuntime {
    engine: Engine,
    module: Module,
}

impl WasmModuleRuntime {
    /// Engine for a single invocation
    ///
    /// Epoch interruption is on so a timeout or cancellation can stop a
    /// running guest with [`Engine::increment_epoch`].
    pub fn create_engine() -> Result<Engine, ExecutionError> {
        let mut config = Config::new();
        config.wasm_threads(false);
        config.epoch_interruption(true);

        Engine::new(&config).map_err(|e| failed("engine setup", e))
    }

    /// Compile the module file at `path`
    pub fn load(engine: &Engine, path: &Path) -> Result<Self, ExecutionError> {
        let module = Module::from_file(engine, path).map_err(|e| failed("module load", e))?;
        Ok(Self {
            engine: engine.clone(),
            module,
        })
    }

    /// Every entry point the module exposes
    pub fn entry_points(&self) -> Vec<EntryPoint> {
        let receiver = self.receiver();

        self.module
            .exports()
            .filter_map(|export| {
                let ExternType::Func(ty) = export.ty() else {
                    return None;
                };
                let (name, shape) = classify_export(export.name(), &ty)?;
                Some(EntryPoint {
                    export: export.name().to_string(),
                    name: name.to_string(),
                    shape,
                    receiver,
                })
            })
            .collect()
    }

    fn receiver(&self) -> Receiver {
        let constructor = self
            .module
            .exports()
            .find(|e| e.name() == CONSTRUCTOR_EXPORT);

        match constructor.map(|e| e.ty()) {
            None => Receiver::Static,
            Some(ExternType::Func(ty)) => Receiver::Instance {
                constructible: ty.params().len() == 0 && ty.results().len() == 0,
            },
            Some(_) => Receiver::Instance {
                constructible: false,
            },
        }
    }

    /// Instantiate the module and run `entry` with `input`
    ///
    /// Blocks the calling thread until the guest returns or traps.
    pub fn invoke(&self, entry: &EntryPoint, input: Option<&[u8]>) -> Result<(), ExecutionError> {
        let mut store = Store::new(&self.engine, ());
        // Trap at the first epoch bump
        store.set_epoch_deadline(1);

        let instance =
            Instance::new(&mut store, &self.module, &[]).map_err(|e| failed("instantiate", e))?;

        if let Receiver::Instance { .. } = entry.receiver {
            let constructor = instance
                .get_typed_func::<(), ()>(&mut store, CONSTRUCTOR_EXPORT)
                .map_err(|e| failed("constructor lookup", e))?;
            constructor
                .call(&mut store, ())
                .map_err(|e| failed("constructor", e))?;
        }

        let func = instance.get_func(&mut store, &entry.export).ok_or_else(|| {
            ExecutionError::Failed(format!("export '{}' disappeared", entry.export))
        })?;

        let mut results = vec![Val::I32(0); func.ty(&store).results().len()];
        match (entry.shape, input) {
            (ParamShape::None, _) => {
                func.call(&mut store, &[], &mut results)
                    .map_err(|e| failed(&entry.export, e))?;
            }
            (_, Some(bytes)) => {
                call_with_bytes(&mut store, &instance, &func, bytes, &mut results, &entry.export)?;
            }
            (shape, None) => {
                return Err(ExecutionError::Failed(format!(
                    "{} entry '{}' needs a payload",
                    shape, entry.export
                )));
            }
        }

        match results.first() {
            Some(Val::I32(0)) | None => Ok(()),
            Some(Val::I32(status)) => Err(ExecutionError::Failed(format!(
                "'{}' returned status {}",
                entry.export, status
            ))),
            Some(other) => Err(ExecutionError::Failed(format!(
                "'{}' returned unexpected value {:?}",
                entry.export, other
            ))),
        }
    }
}

/// Write `bytes` into guest memory and call `func(ptr, len)`
fn call_with_bytes(
    store: &mut Store<()>,
    instance: &Instance,
    func: &Func,
    bytes: &[u8],
    results: &mut [Val],
    export: &str,
) -> Result<(), ExecutionError> {
    let memory = instance
        .get_memory(&mut *store, MEMORY_EXPORT)
        .ok_or_else(|| ExecutionError::Failed("module must export 'memory'".to_string()))?;
    let allocate = instance
        .get_typed_func::<i32, i32>(&mut *store, ALLOCATE_EXPORT)
        .map_err(|_| {
            ExecutionError::Failed(
                "module must export 'allocate' with signature (i32) -> i32".to_string(),
            )
        })?;

    let len = i32::try_from(bytes.len())
        .map_err(|_| ExecutionError::Failed(format!("input of {} bytes is too large", bytes.len())))?;
    let ptr = allocate
        .call(&mut *store, len)
        .map_err(|e| failed(ALLOCATE_EXPORT, e))?;
    if ptr == 0 && len > 0 {
        return Err(ExecutionError::Failed("guest allocation failed".to_string()));
    }

    memory
        .write(&mut *store, ptr as u32 as usize, bytes)
        .map_err(|e| failed("memory write", e))?;

    let outcome = func
        .call(&mut *store, &[Val::I32(ptr), Val::I32(len)], results)
        .map_err(|e| failed(export, e));

    // Optional: releasing guest memory is best effort
    if let Ok(deallocate) = instance.get_typed_func::<(i32, i32), ()>(&mut *store, DEALLOCATE_EXPORT) {
        if let Err(e) = deallocate.call(&mut *store, (ptr, len)) {
            debug!(error = %e, "Guest deallocate failed");
        }
    }

    outcome
}

/// Map an export to `(name, shape)` if it follows the naming convention
fn classify_export<'a>(export: &'a str, ty: &FuncType) -> Option<(&'a str, ParamShape)> {
    let results_ok = match ty.results().len() {
        0 => true,
        1 => ty.results().all(|r| matches!(r, ValType::I32)),
        _ => false,
    };
    if !results_ok || export == CONSTRUCTOR_EXPORT {
        return None;
    }

    let params = ty.params().len();
    let pointer_pair = params == 2 && ty.params().all(|p| matches!(p, ValType::I32));

    match export.split_once(SHAPE_SEPARATOR) {
        Some((name, suffix)) => {
            let shape = match suffix {
                "element" => ParamShape::Element,
                "document" => ParamShape::Document,
                "text" => ParamShape::Text,
                _ => {
                    warn!(export = %export, "Unknown entry point suffix, ignoring export");
                    return None;
                }
            };
            (pointer_pair && !name.is_empty()).then_some((name, shape))
        }
        None if params == 0 => Some((export, ParamShape::None)),
        None if pointer_pair => Some((export, ParamShape::Text)),
        None => None,
    }
}

fn failed(stage: &str, error: impl std::fmt::Display) -> ExecutionError {
    ExecutionError::Failed(format!("{}: {}", stage, error))
}
