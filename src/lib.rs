//! tinyrb
//!
//! A small-footprint Ruby bytecode VM for memory-constrained targets: a
//! fixed-size arena allocator, a reference-counted object heap, a register
//! based interpreter and a priority scheduler with round-robin timeslicing.
//!
//! # Example
//!
//! ```no_run
//! use tinyrb::{RuntimeConfig, Vm};
//!
//! fn main() -> tinyrb::Result<()> {
//!     let mut vm = Vm::new(RuntimeConfig::default())?;
//!     let unit = vm.compile("puts 1 + 2")?;
//!     vm.create_task(&unit.irep, 128)?;
//!     vm.run_until_idle()?;
//!     Ok(())
//! }
//! ```

#![doc(html_root_url = "https://docs.rs/tinyrb")]
#![warn(rust_2018_idioms)]

// Public modules
pub mod frontend;
pub mod peripheral;
pub mod runtime;
pub mod sandbox;
pub mod vm;

// Utility modules
pub mod util;

// Re-exports
pub use anyhow::{Context, Result};
pub use frontend::{CompileError, Compiler, RubyCompiler};
pub use peripheral::{LoopbackGpio, Peripheral, PeripheralError};
pub use runtime::scheduler::{TaskHandle, TaskOptions, TaskState};
pub use runtime::value::Value;
pub use sandbox::Sandbox;
pub use util::config::{RuntimeConfig, TickMode};
pub use vm::{LoadedIrep, RawIrep, RunOutcome, TaskExit, Vm, VmError};

use std::fs;
use std::path::Path;
use tracing::{debug, warn};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Display name
pub const NAME: &str = "tinyrb";

/// What a batch of tasks left behind
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    /// `ClassName: message` for every task that ended with an exception
    pub errors: Vec<(String, String)>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Run `source` as a single task on a fresh VM
pub fn run(
    source: &str,
    config: RuntimeConfig,
) -> Result<RunReport> {
    let mut vm = Vm::new(config)?;
    let unit = vm.compile(source)?;
    run_units(&mut vm, vec![("main".to_string(), unit)])
}

/// Compile every file and run each in its own task
pub fn run_files(
    paths: &[impl AsRef<Path>],
    config: RuntimeConfig,
) -> Result<RunReport> {
    let mut vm = Vm::new(config)?;
    let mut units = Vec::with_capacity(paths.len());
    for path in paths {
        let path = path.as_ref();
        debug!("Reading source file: {}", path.display());
        let source = fs::read_to_string(path)
            .with_context(|| format!("Failed to read file: {}", path.display()))?;
        let unit = vm
            .compile(&source)
            .with_context(|| format!("Failed to compile: {}", path.display()))?;
        units.push((path.display().to_string(), unit));
    }
    run_units(&mut vm, units)
}

/// Load irep blobs and run each in its own task
pub fn exec_files(
    paths: &[impl AsRef<Path>],
    config: RuntimeConfig,
) -> Result<RunReport> {
    let mut vm = Vm::new(config)?;
    let mut units = Vec::with_capacity(paths.len());
    for path in paths {
        let path = path.as_ref();
        let bytes =
            fs::read(path).with_context(|| format!("Failed to read file: {}", path.display()))?;
        let unit = vm
            .load_irep(&bytes)
            .with_context(|| format!("Failed to load irep: {}", path.display()))?;
        units.push((path.display().to_string(), unit));
    }
    run_units(&mut vm, units)
}

/// One task per unit at the default priority, then run to idle
fn run_units(
    vm: &mut Vm,
    units: Vec<(String, LoadedIrep)>,
) -> Result<RunReport> {
    let priority = vm.config().default_priority;
    let mut tasks = Vec::with_capacity(units.len());
    for (name, unit) in &units {
        let options = TaskOptions {
            name: Some(name.clone()),
            ..TaskOptions::with_priority(priority)
        };
        tasks.push((name.clone(), vm.create_task_with(&unit.irep, options)?));
    }

    if matches!(vm.config().tick_mode, TickMode::External) {
        vm.start_timer();
    }
    let outcome = vm.run_until_idle();
    vm.stop_timer();
    outcome?;

    let mut report = RunReport::default();
    for (name, task) in tasks {
        if let Some(err) = vm.task_error(task) {
            let message = vm.describe_exception(err);
            warn!(task = %name, "{}", message);
            report.errors.push((name, message));
        }
    }
    for (_, unit) in units {
        vm.release_irep(unit);
    }
    Ok(report)
}

/// Compile a source file into an irep blob; returns the blob size
pub fn compile_file(
    source_path: &Path,
    output_path: &Path,
) -> Result<usize> {
    let source = fs::read_to_string(source_path)
        .with_context(|| format!("Failed to read source: {}", source_path.display()))?;
    let raw = RubyCompiler::new()
        .compile(&source)
        .with_context(|| format!("Failed to compile: {}", source_path.display()))?;
    let bytes = raw.to_bytes();
    debug!("Writing irep to: {}", output_path.display());
    fs::write(output_path, &bytes)
        .with_context(|| format!("Failed to write irep: {}", output_path.display()))?;
    Ok(bytes.len())
}

/// Disassembly of a source file, for debugging
pub fn dump_file(path: &Path) -> Result<String> {
    let source = fs::read_to_string(path)
        .with_context(|| format!("Failed to read file: {}", path.display()))?;
    let raw = RubyCompiler::new().compile(&source)?;
    Ok(raw.disassemble())
}
