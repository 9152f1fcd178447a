//! Addon code units.
//!
//! An addon's code is a Lua entry file (`init.lua` unless the descriptor
//! names another `main`). Sibling files are reachable through `require`.
//! Reloading re-executes the entry and every unit it pulled in, so edited
//! sources take effect without restarting the process.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Component, Path, PathBuf};

use mlua::{Function, Lua, Table, Value};
use tracing::{debug, info, warn};

use crate::error::{AddonError, AddonResult};

/// Entry file used when the descriptor names none.
pub const DEFAULT_ENTRY: &str = "init.lua";

/// Resolves a path to a dotted unit identifier.
///
/// The path is taken relative to `base`; a path outside `base` is identified
/// by its final component alone.
pub fn module_identifier(path: &Path, base: &Path) -> AddonResult<String> {
    let relative = match path.strip_prefix(base) {
        Ok(rel) => rel.to_path_buf(),
        Err(_) => path.file_name().map(PathBuf::from).unwrap_or_default(),
    };

    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => {
                let part = part.to_str().ok_or_else(|| {
                    AddonError::ModuleLoad(format!(
                        "Path is not valid UTF-8: {}",
                        path.display()
                    ))
                })?;
                parts.push(part);
            }
            Component::CurDir => {}
            _ => {
                return Err(AddonError::ModuleLoad(format!(
                    "Cannot derive a module identifier from {}",
                    path.display()
                )));
            }
        }
    }

    if parts.is_empty() {
        return Err(AddonError::ModuleLoad(format!(
            "Cannot derive a module identifier from {}",
            path.display()
        )));
    }

    Ok(parts.join("."))
}

/// What a handle needs to know to execute an addon's code.
#[derive(Debug, Clone)]
pub struct ModuleSpec {
    /// Addon directory.
    pub dir: PathBuf,
    /// Addon name, exposed to Lua.
    pub name: String,
    /// Addon version, exposed to Lua.
    pub version: String,
    /// Entry file relative to `dir`.
    pub entry: String,
}

impl ModuleSpec {
    /// Absolute entry path.
    #[must_use]
    pub fn entry_path(&self) -> PathBuf {
        self.dir.join(&self.entry)
    }
}

/// A code unit that has been executed at least once.
pub struct LoadedModule {
    /// Value returned by the entry chunk.
    exports: Value,
    /// Units the entry pulled into `package.loaded`.
    dependencies: Vec<String>,
    /// Identifier under which the entry is registered.
    identifier: String,
    /// Number of times the entry has run.
    executions: u32,
    /// Runtime owning every value above.
    lua: Lua,
}

impl LoadedModule {
    fn start(spec: &ModuleSpec, identifier: String) -> AddonResult<Self> {
        let lua = Lua::new();
        prepare_runtime(&lua, spec).map_err(|e| {
            AddonError::ModuleLoad(format!("Failed to prepare runtime for {}: {}", identifier, e))
        })?;

        let mut module = Self {
            exports: Value::Nil,
            dependencies: Vec::new(),
            identifier,
            executions: 0,
            lua,
        };
        module.execute(spec)?;
        Ok(module)
    }

    /// Runs the entry chunk and records what it pulled in.
    fn execute(&mut self, spec: &ModuleSpec) -> AddonResult<()> {
        let path = spec.entry_path();
        let source = fs::read_to_string(&path).map_err(|e| {
            AddonError::ModuleLoad(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let lua_err = |e: mlua::Error| AddonError::ModuleLoad(format!("{}: {}", self.identifier, e));

        let loaded = package_loaded(&self.lua).map_err(lua_err)?;
        let before = loaded_names(&loaded).map_err(lua_err)?;

        let run = || -> AddonResult<Value> {
            let exports: Value = self
                .lua
                .load(&source)
                .set_name(format!("@{}", path.display()))
                .eval()
                .map_err(lua_err)?;

            let marker = if exports.is_nil() {
                Value::Boolean(true)
            } else {
                exports.clone()
            };
            loaded
                .set(self.identifier.as_str(), marker)
                .map_err(lua_err)?;
            self.call_hook("on_load")?;
            Ok(exports)
        };

        let exports = match run() {
            Ok(exports) => exports,
            Err(e) => {
                // Units pulled in by a failed run must not survive into the next one.
                if let Err(cleanup) = discard_new_units(&loaded, &before) {
                    warn!("Failed to reset units after {}: {}", self.identifier, cleanup);
                }
                return Err(e);
            }
        };

        let after = loaded_names(&loaded).map_err(lua_err)?;
        let dependencies = after
            .difference(&before)
            .filter(|name| **name != self.identifier)
            .cloned()
            .collect();

        self.exports = exports;
        self.dependencies = dependencies;
        self.executions += 1;
        Ok(())
    }

    /// Forgets every unit from the previous run, then runs the entry again.
    fn reexecute(&mut self, spec: &ModuleSpec) -> AddonResult<()> {
        let lua_err = |e: mlua::Error| AddonError::ModuleLoad(format!("{}: {}", self.identifier, e));

        let loaded = package_loaded(&self.lua).map_err(lua_err)?;
        for name in self.dependencies.iter().chain(std::iter::once(&self.identifier)) {
            loaded.set(name.as_str(), Value::Nil).map_err(lua_err)?;
        }

        debug!(
            "Re-executing {} and {} dependent unit(s)",
            self.identifier,
            self.dependencies.len()
        );
        self.execute(spec)
    }

    fn call_hook(&self, hook: &str) -> AddonResult<()> {
        if let Ok(func) = self.lua.globals().get::<Function>(hook) {
            func.call::<()>(()).map_err(|e| {
                AddonError::ModuleLoad(format!("{} error in {}: {}", hook, self.identifier, e))
            })?;
        }
        Ok(())
    }

    /// Value returned by the entry chunk.
    #[must_use]
    pub fn exports(&self) -> &Value {
        &self.exports
    }

    /// Units pulled in by the last execution, sorted.
    #[must_use]
    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    /// Identifier of the entry unit.
    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Number of times the entry has executed.
    #[must_use]
    pub fn executions(&self) -> u32 {
        self.executions
    }

    /// The runtime hosting this unit.
    #[must_use]
    pub fn lua(&self) -> &Lua {
        &self.lua
    }
}

impl Drop for LoadedModule {
    fn drop(&mut self) {
        if let Err(e) = self.call_hook("on_unload") {
            warn!("{}", e);
        }
    }
}

impl std::fmt::Debug for LoadedModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedModule")
            .field("identifier", &self.identifier)
            .field("dependencies", &self.dependencies)
            .field("executions", &self.executions)
            .finish()
    }
}

/// Load state of a handle.
#[derive(Debug, Default)]
pub enum ModuleState {
    /// Nothing executed yet.
    #[default]
    NotLoaded,
    /// Entry executed; runtime alive.
    Loaded(Box<LoadedModule>),
}

/// Owns the code unit of one addon.
#[derive(Debug)]
pub struct AddonModuleHandle {
    spec: ModuleSpec,
    identifier: String,
    state: ModuleState,
}

impl AddonModuleHandle {
    /// Creates an unloaded handle with the identifier resolved against the
    /// working directory.
    pub fn new(spec: ModuleSpec) -> AddonResult<Self> {
        let base = std::env::current_dir().map_err(|e| {
            AddonError::ModuleLoad(format!(
                "Cannot resolve working directory for {}: {}",
                spec.dir.display(),
                e
            ))
        })?;
        Self::with_base(spec, &base)
    }

    /// Creates an unloaded handle with the identifier resolved against `base`.
    pub fn with_base(spec: ModuleSpec, base: &Path) -> AddonResult<Self> {
        let identifier = module_identifier(&spec.dir, base)?;
        Ok(Self {
            spec,
            identifier,
            state: ModuleState::NotLoaded,
        })
    }

    /// Identifier of the addon's entry unit.
    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Returns true once the entry has executed.
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        matches!(self.state, ModuleState::Loaded(_))
    }

    /// Returns the loaded unit, if any.
    #[must_use]
    pub fn loaded(&self) -> Option<&LoadedModule> {
        match &self.state {
            ModuleState::Loaded(module) => Some(module),
            ModuleState::NotLoaded => None,
        }
    }

    /// Executes the entry unless already loaded.
    pub fn load(&mut self) -> AddonResult<&LoadedModule> {
        if let ModuleState::NotLoaded = self.state {
            let module = LoadedModule::start(&self.spec, self.identifier.clone())?;
            info!("Loaded addon module {}", self.identifier);
            self.state = ModuleState::Loaded(Box::new(module));
        }
        self.loaded().ok_or_else(|| self.not_loaded())
    }

    /// Re-executes the entry and everything it pulled in.
    ///
    /// On an unloaded handle this loads first and then re-executes. If the
    /// re-execution fails the previous exports stay in place.
    pub fn reload(&mut self) -> AddonResult<&LoadedModule> {
        self.load()?;
        if let ModuleState::Loaded(module) = &mut self.state {
            module.reexecute(&self.spec)?;
            info!(
                "Reloaded addon module {} (execution #{})",
                module.identifier,
                module.executions
            );
        }
        self.loaded().ok_or_else(|| self.not_loaded())
    }

    fn not_loaded(&self) -> AddonError {
        AddonError::ModuleLoad(format!("{} is not loaded", self.identifier))
    }
}

/// Exposes the `addon` table and makes sibling units requirable.
fn prepare_runtime(lua: &Lua, spec: &ModuleSpec) -> mlua::Result<()> {
    let api = lua.create_table()?;
    api.set("name", spec.name.clone())?;
    api.set("version", spec.version.clone())?;
    api.set("path", spec.dir.display().to_string())?;

    // addon.log(message)
    let name = spec.name.clone();
    let log = lua.create_function(move |_, message: String| {
        info!(addon = %name, "{}", message);
        Ok(())
    })?;
    api.set("log", log)?;

    lua.globals().set("addon", api)?;

    let package: Table = lua.globals().get("package")?;
    let existing: String = package.get("path")?;
    let dir = spec.dir.display();
    package.set("path", format!("{dir}/?.lua;{dir}/?/init.lua;{existing}"))?;

    Ok(())
}

fn package_loaded(lua: &Lua) -> mlua::Result<Table> {
    let package: Table = lua.globals().get("package")?;
    package.get("loaded")
}

fn discard_new_units(loaded: &Table, before: &BTreeSet<String>) -> mlua::Result<()> {
    for name in loaded_names(loaded)?.difference(before) {
        loaded.set(name.as_str(), Value::Nil)?;
    }
    Ok(())
}

fn loaded_names(loaded: &Table) -> mlua::Result<BTreeSet<String>> {
    let mut names = BTreeSet::new();
    for pair in loaded.pairs::<Value, Value>() {
        let (key, _) = pair?;
        if let Value::String(s) = key {
            names.insert(s.to_str()?.to_string());
        }
    }
    Ok(names)
}
