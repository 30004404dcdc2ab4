use crate::language::ast::{CompilationUnit, Import};
use crate::linker::wrapper::{ModuleWrapper, WrapperId, WrapperKind};
use crate::project::{
    manifest::LinkerConfig,
    repository::{kind_label, Repository, RepositoryError},
};
use crate::runtime::{
    environment::Environment,
    error::{InterpreterFault, Location, RuntimeError, RuntimeResult},
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Everything one `eval_component` call builds: the wrappers, the linker
/// table mapping API names to their implementations, and the discovery
/// order of the import closure.
pub struct LinkSession<'r> {
    repository: &'r dyn Repository,
    pub(crate) config: LinkerConfig,
    pub(crate) wrappers: Vec<ModuleWrapper>,
    pub(crate) table: HashMap<String, WrapperId>,
    pub(crate) apis: HashMap<String, WrapperId>,
    pending: Vec<WrapperId>,
    pub(crate) discovery: Vec<WrapperId>,
    root: WrapperId,
    pub(crate) desugar_passes: usize,
}

impl<'r> LinkSession<'r> {
    /// Wraps `component` and every module reachable from it.
    pub fn link(
        repository: &'r dyn Repository,
        component: &str,
        config: LinkerConfig,
    ) -> RuntimeResult<Self> {
        let unit = repository
            .get_component(component)
            .map_err(|error| unresolved(error, component))?;
        let mut session = Self {
            repository,
            config,
            wrappers: Vec::new(),
            table: HashMap::new(),
            apis: HashMap::new(),
            pending: Vec::new(),
            discovery: Vec::new(),
            root: WrapperId(0),
            desugar_passes: 0,
        };
        let root = session.add_wrapper(WrapperKind::Component, unit);
        session.root = root;
        session.table.insert(component.to_string(), root);
        session.touch_exports(root, false)?;
        session.pending.push(root);

        for library in session.config.implicit_libraries.clone() {
            if library != component {
                session.ensure_api_implemented(&library, root)?;
            }
        }
        session.close_imports()?;
        Ok(session)
    }

    fn add_wrapper(&mut self, kind: WrapperKind, unit: Arc<CompilationUnit>) -> WrapperId {
        let id = WrapperId(self.wrappers.len());
        self.wrappers.push(ModuleWrapper::new(id, kind, unit));
        id
    }

    /// Drains the pending stack, wrapping whatever each popped wrapper (and
    /// the APIs it exports) imports.
    fn close_imports(&mut self) -> RuntimeResult<()> {
        while let Some(id) = self.pending.pop() {
            self.discovery.push(id);
            let wrapper = &self.wrappers[id.0];
            trace!(module = wrapper.name(), "discovering imports");
            let mut units = vec![wrapper.unit.clone()];
            units.extend(
                wrapper
                    .exports
                    .iter()
                    .map(|api| self.wrappers[api.0].unit.clone()),
            );
            for unit in units {
                for import in &unit.imports {
                    if let Import::Apis { span, .. } = import {
                        return Err(InterpreterFault::bug(format!(
                            "NYI: `import api` form in {} at {}",
                            unit.name, span
                        )));
                    }
                    for api in import.api_names() {
                        self.ensure_api_implemented(api, id)?;
                    }
                }
            }
        }
        debug!(
            components = self.table.len(),
            apis = self.apis.len(),
            "import closure complete"
        );
        Ok(())
    }

    fn ensure_api(&mut self, name: &str, requester: WrapperId) -> RuntimeResult<WrapperId> {
        if let Some(&id) = self.apis.get(name) {
            return Ok(id);
        }
        let unit = self
            .repository
            .get_api(name)
            .map_err(|error| unresolved(error, self.wrappers[requester.0].name()))?;
        if unit.native {
            let id = self.add_wrapper(WrapperKind::Foreign, unit);
            self.apis.insert(name.to_string(), id);
            self.table.insert(name.to_string(), id);
            self.pending.push(id);
            debug!(api = name, "wrapped native API");
            Ok(id)
        } else {
            let id = self.add_wrapper(WrapperKind::Api, unit);
            self.apis.insert(name.to_string(), id);
            trace!(api = name, "wrapped API");
            Ok(id)
        }
    }

    /// Returns the wrapper implementing API `name`, loading and wrapping the
    /// same-named component on first use.
    pub fn ensure_api_implemented(&mut self, name: &str, requester: WrapperId) -> RuntimeResult<WrapperId> {
        let api = self.ensure_api(name, requester)?;
        if self.wrappers[api.0].kind == WrapperKind::Foreign {
            return Ok(api);
        }
        if let Some(&id) = self.table.get(name) {
            if !self.wrappers[id.0].exports.contains(&api) {
                return Err(not_exported(name, self.wrappers[requester.0].name()));
            }
            return Ok(id);
        }
        let unit = self
            .repository
            .get_component(name)
            .map_err(|error| unresolved(error, self.wrappers[requester.0].name()))?;
        let id = self.add_wrapper(WrapperKind::Component, unit);
        self.table.insert(name.to_string(), id);
        self.touch_exports(id, true)?;
        if !self.wrappers[id.0].exports.contains(&api) {
            return Err(not_exported(name, self.wrappers[requester.0].name()));
        }
        self.pending.push(id);
        debug!(component = name, "wrapped component");
        Ok(id)
    }

    /// Wraps every API the component exports. Unresolvable exports are fatal
    /// when `required`, otherwise logged and skipped.
    pub fn touch_exports(&mut self, id: WrapperId, required: bool) -> RuntimeResult<()> {
        let unit = self.wrappers[id.0].unit.clone();
        for name in unit.exported_api_names() {
            let result = self.ensure_api(&name, id).and_then(|api| {
                if self.wrappers[api.0].kind == WrapperKind::Foreign {
                    Err(InterpreterFault::program(
                        Location::unit(unit.name.clone()),
                        RuntimeError::UnresolvedModule {
                            kind: "API".into(),
                            name: name.clone(),
                            reason: "native APIs cannot be exported by a component".into(),
                        },
                    ))
                } else {
                    Ok(api)
                }
            });
            match result {
                Ok(api) => {
                    let wrapper = &mut self.wrappers[id.0];
                    if !wrapper.exports.contains(&api) {
                        wrapper.exports.push(api);
                    }
                }
                Err(fault) if !required && !fault.is_bug() => {
                    warn!(component = %unit.name, api = %name, error = %fault, "skipping unresolved export");
                }
                Err(fault) => return Err(fault),
            }
        }
        self.wrappers[id.0].mark_exports_touched();
        Ok(())
    }

    pub fn root(&self) -> WrapperId {
        self.root
    }

    pub fn root_wrapper(&self) -> &ModuleWrapper {
        &self.wrappers[self.root.0]
    }

    pub fn root_env(&self) -> Arc<Environment> {
        self.root_wrapper().env.clone()
    }

    pub fn wrapper(&self, id: WrapperId) -> &ModuleWrapper {
        &self.wrappers[id.0]
    }

    pub fn wrappers(&self) -> &[ModuleWrapper] {
        &self.wrappers
    }

    /// Linker table lookup: the component or native API behind `name`.
    pub fn lookup_component(&self, name: &str) -> Option<WrapperId> {
        self.table.get(name).copied()
    }

    pub fn api_wrapper(&self, name: &str) -> Option<&ModuleWrapper> {
        self.apis.get(name).map(|id| &self.wrappers[id.0])
    }

    pub fn table_len(&self) -> usize {
        self.table.len()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Module names in the order the closure loop popped them.
    pub fn discovery_order(&self) -> Vec<&str> {
        self.discovery
            .iter()
            .map(|id| self.wrappers[id.0].name())
            .collect()
    }

    pub fn desugar_passes(&self) -> usize {
        self.desugar_passes
    }

    pub fn is_implicit_library(&self, name: &str) -> bool {
        self.config.implicit_libraries.iter().any(|lib| lib == name)
    }
}

fn not_exported(name: &str, requester: &str) -> InterpreterFault {
    InterpreterFault::program(
        Location::unit(requester),
        RuntimeError::UnresolvedModule {
            kind: "API".into(),
            name: name.to_string(),
            reason: format!("component `{name}` does not export it"),
        },
    )
}

/// Turns a repository failure into the program error the linker reports.
pub fn unresolved(error: RepositoryError, requester: &str) -> InterpreterFault {
    let location = Location::unit(requester);
    let error = match error {
        RepositoryError::Syntax {
            name,
            path,
            text,
            errors,
        } => RuntimeError::Syntax {
            unit: name,
            path,
            text,
            errors,
        },
        RepositoryError::NotFound { kind, name } => RuntimeError::UnresolvedModule {
            kind: kind_label(&kind).into(),
            name,
            reason: "not found on the search path".into(),
        },
        RepositoryError::KindMismatch {
            ref name, expected, ..
        } => RuntimeError::UnresolvedModule {
            kind: kind_label(&expected).into(),
            name: name.clone(),
            reason: error.to_string(),
        },
        RepositoryError::Io { ref path, .. } => RuntimeError::UnresolvedModule {
            kind: "unit".into(),
            name: path.display().to_string(),
            reason: error.to_string(),
        },
    };
    InterpreterFault::program(location, error)
}
