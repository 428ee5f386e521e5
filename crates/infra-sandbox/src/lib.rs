// Conveyor Infrastructure - Wasm Sandbox Adapter
// Implements: FunctionExecutor

mod executor;
mod runtime;

pub use executor::{SandboxConfig, SandboxExecutor};
pub use runtime::{WasmModuleRuntime, CONSTRUCTOR_EXPORT};
