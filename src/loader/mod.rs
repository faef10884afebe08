//! Code unit loading and phase resolution
//!
//! A code unit is a named namespace of entry points. Loading resolves the unit,
//! binds the capability bundle to it, and builds the table of every `{mode}_{phase}`
//! symbol. Missing entry points are replaced by a no-op stub. Only the entry points
//! of the bound mode are reported, with a single warning each at load time; phase
//! lookup afterwards is a table read.

pub mod registry;

use crate::capability::CapabilityBundle;
use crate::config::types::{
    phase_symbol, ExecutionMode, HarnessError, Phase, Result, UnitResult,
};
use log::{info, warn};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

pub use registry::{UnitFactory, UnitRegistry};

/// Signature of a unit entry point
pub type PhaseFn = dyn Fn(&CapabilityBundle) -> UnitResult + Send + Sync;

/// Resolved entry point for one `(mode, phase)`
#[derive(Clone)]
pub struct PhaseFunction {
    symbol: String,
    func: Arc<PhaseFn>,
    stub: bool,
}

impl fmt::Debug for PhaseFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhaseFunction")
            .field("symbol", &self.symbol)
            .field("stub", &self.stub)
            .finish()
    }
}

impl PhaseFunction {
    fn resolved(symbol: String, func: Arc<PhaseFn>) -> Self {
        Self {
            symbol,
            func,
            stub: false,
        }
    }

    fn stub(symbol: String) -> Self {
        Self {
            symbol,
            func: Arc::new(|_: &CapabilityBundle| -> UnitResult { Ok(()) }),
            stub: true,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn is_stub(&self) -> bool {
        self.stub
    }

    pub fn call(&self, capabilities: &CapabilityBundle) -> UnitResult {
        (self.func)(capabilities)
    }
}

/// Untrusted code unit before loading
#[derive(Clone, Default)]
pub struct CodeUnit {
    name: String,
    symbols: HashMap<String, Arc<PhaseFn>>,
}

impl fmt::Debug for CodeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut symbols: Vec<&str> = self.symbols.keys().map(String::as_str).collect();
        symbols.sort_unstable();
        f.debug_struct("CodeUnit")
            .field("name", &self.name)
            .field("symbols", &symbols)
            .finish()
    }
}

impl CodeUnit {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            symbols: HashMap::new(),
        }
    }

    /// Export `f` under an arbitrary symbol name
    pub fn with_symbol<F>(mut self, symbol: &str, f: F) -> Self
    where
        F: Fn(&CapabilityBundle) -> UnitResult + Send + Sync + 'static,
    {
        self.symbols.insert(symbol.to_string(), Arc::new(f));
        self
    }

    /// Export `f` as the entry point for `(mode, phase)`
    pub fn with_phase<F>(self, mode: ExecutionMode, phase: Phase, f: F) -> Self
    where
        F: Fn(&CapabilityBundle) -> UnitResult + Send + Sync + 'static,
    {
        let symbol = phase_symbol(mode, phase);
        self.with_symbol(&symbol, f)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn lookup(&self, symbol: &str) -> Option<Arc<PhaseFn>> {
        self.symbols.get(symbol).cloned()
    }
}

/// Source of code units by identifier
pub trait UnitResolver: Send + Sync {
    fn resolve(&self, identifier: &str) -> std::result::Result<CodeUnit, String>;
}

/// Unit bound to its capabilities, with the phase table built at load time
pub struct LoadedUnit {
    identifier: String,
    capabilities: CapabilityBundle,
    table: HashMap<(ExecutionMode, Phase), PhaseFunction>,
    reported_modes: Vec<ExecutionMode>,
    diagnostics: Vec<String>,
}

impl fmt::Debug for LoadedUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedUnit")
            .field("identifier", &self.identifier)
            .field("diagnostics", &self.diagnostics)
            .finish_non_exhaustive()
    }
}

impl LoadedUnit {
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn capabilities(&self) -> &CapabilityBundle {
        &self.capabilities
    }

    /// Warnings recorded while probing entry points
    pub fn diagnostics(&self) -> &[String] {
        &self.diagnostics
    }

    /// Stubbed symbols of the reported modes, sorted
    pub fn stubbed_symbols(&self) -> Vec<String> {
        let mut stubs: Vec<String> = self
            .table
            .iter()
            .filter(|((mode, _), f)| f.is_stub() && self.reported_modes.contains(mode))
            .map(|(_, f)| f.symbol().to_string())
            .collect();
        stubs.sort();
        stubs
    }
}

/// Loads code units through a resolver
pub struct ModuleLoader<'r> {
    resolver: &'r dyn UnitResolver,
}

impl<'r> ModuleLoader<'r> {
    pub fn new(resolver: &'r dyn UnitResolver) -> Self {
        Self { resolver }
    }

    /// Resolve `identifier` and bind `capabilities` to it.
    /// No fallback: a unit that cannot be resolved is fatal.
    pub fn load(&self, identifier: &str, capabilities: CapabilityBundle) -> Result<LoadedUnit> {
        if identifier.trim().is_empty() {
            return Err(HarnessError::ModuleLoad {
                identifier: identifier.to_string(),
                reason: "empty code identifier".to_string(),
            });
        }

        let unit = self
            .resolver
            .resolve(identifier)
            .map_err(|reason| HarnessError::ModuleLoad {
                identifier: identifier.to_string(),
                reason,
            })?;

        // An unbound bundle has no running mode, so every mode is reported
        let reported_modes = match capabilities.mode() {
            Some(mode) => vec![mode],
            None => ExecutionMode::ALL.to_vec(),
        };

        let mut table = HashMap::new();
        let mut diagnostics = Vec::new();
        for mode in ExecutionMode::ALL {
            for phase in Phase::ALL {
                let symbol = phase_symbol(mode, phase);
                let function = match unit.lookup(&symbol) {
                    Some(func) => PhaseFunction::resolved(symbol, func),
                    None => {
                        if reported_modes.contains(&mode) {
                            let message =
                                format!("Unable to find function {}, using stub", symbol);
                            warn!("{}: {}", identifier, message);
                            diagnostics.push(message);
                        }
                        PhaseFunction::stub(symbol)
                    }
                };
                table.insert((mode, phase), function);
            }
        }

        let present = table.values().filter(|f| !f.is_stub()).count();
        info!(
            "Loaded code unit '{}' ({} of {} entry points present)",
            identifier,
            present,
            table.len()
        );

        Ok(LoadedUnit {
            identifier: identifier.to_string(),
            capabilities,
            table,
            reported_modes,
            diagnostics,
        })
    }

    /// Entry point for `(mode, phase)`. Never fails; absent symbols are stubs.
    pub fn resolve_phase(
        unit: &LoadedUnit,
        mode: ExecutionMode,
        phase: Phase,
    ) -> PhaseFunction {
        unit.table
            .get(&(mode, phase))
            .cloned()
            .unwrap_or_else(|| PhaseFunction::stub(phase_symbol(mode, phase)))
    }
}
