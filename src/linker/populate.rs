use crate::language::ast::{Decl, FunctionDecl, Import};
use crate::linker::{
    desugar::{desugar_method, unit_rewrites, RewriteInfo, TopLevelRewrites},
    session::LinkSession,
    wrapper::{api_exported_names, declared_names, VisitState, WrapperId, WrapperKind},
};
use crate::runtime::{
    environment::{Binding, Environment, Slot, TypeSlot},
    error::{InterpreterFault, Location, RuntimeError, RuntimeResult},
    interpreter::Evaluator,
    natives,
    value::{Closure, FType, FunctionalSet, MethodDef, ObjectType, ObjectValue, TypeCore, Value},
};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use tracing::{debug, trace};

impl<'r> LinkSession<'r> {
    /// Runs every population phase over the whole wrapper set, in order,
    /// and returns the root component's environment.
    pub fn populate(&mut self) -> RuntimeResult<Arc<Environment>> {
        let components = self.ids_of(WrapperKind::Component);
        let foreigns = self.ids_of(WrapperKind::Foreign);
        let apis = self.ids_of(WrapperKind::Api);

        for &id in components.iter().chain(&foreigns).chain(&apis) {
            self.preload_top_level(id)?;
        }
        self.run_desugaring()?;
        for &id in &foreigns {
            self.populate_foreign(id)?;
        }
        for &id in components.iter().rev() {
            self.populate_one(id)?;
        }
        for &id in &components {
            self.init_types(id)?;
        }
        for &id in &components {
            self.scan_all_functional_methods(id)?;
        }
        for &id in &components {
            self.init_funcs(id)?;
        }
        for &id in &components {
            self.finish_all_functional_methods(id)?;
        }
        for &id in &components {
            self.reset(id)?;
        }
        for &id in &components {
            self.init_vars(id)?;
        }
        debug!(
            root = self.root_wrapper().name(),
            components = components.len(),
            "population complete"
        );
        let root = self.root_env();
        for wrapper in &self.wrappers {
            root.retain(wrapper.env.clone());
        }
        Ok(root)
    }

    /// Wrappers of one kind in discovery order; APIs in creation order.
    fn ids_of(&self, kind: WrapperKind) -> Vec<WrapperId> {
        let ordered: Vec<WrapperId> = if kind == WrapperKind::Api {
            self.wrappers.iter().map(|w| w.id).collect()
        } else {
            self.discovery.clone()
        };
        ordered
            .into_iter()
            .filter(|id| self.wrappers[id.0].kind == kind)
            .collect()
    }

    /// Records the unit's own names and its initial rewrite table.
    pub fn preload_top_level(&mut self, id: WrapperId) -> RuntimeResult<()> {
        let wrapper = &mut self.wrappers[id.0];
        wrapper.advance("preloadTopLevel", VisitState::Unvisited, VisitState::Imported)?;
        let unit = wrapper.unit.clone();
        let mut seen = HashSet::new();
        for decl in &unit.decls {
            if !seen.insert(decl.name()) {
                return Err(InterpreterFault::program(
                    Location::at(unit.name.clone(), decl.span()),
                    RuntimeError::DuplicateBinding {
                        name: decl.name().to_string(),
                    },
                ));
            }
        }
        wrapper.set_own_names(declared_names(&unit));
        wrapper.rewrites = unit_rewrites(&unit);
        trace!(module = %unit.name, names = wrapper.own_names().len(), "preloaded top level");
        Ok(())
    }

    /// Binds the interpreter's implementations of a native API.
    pub fn populate_foreign(&mut self, id: WrapperId) -> RuntimeResult<()> {
        let wrapper = &mut self.wrappers[id.0];
        wrapper.advance("populateOne", VisitState::Imported, VisitState::Populating)?;
        let unit = wrapper.unit.clone();
        for decl in &unit.decls {
            let origin = Location::at(unit.name.clone(), decl.span());
            let native = match decl {
                Decl::Function(function) => natives::lookup(&unit.name, &function.name),
                _ => None,
            };
            let Some(native) = native else {
                return Err(InterpreterFault::program(
                    origin,
                    RuntimeError::MissingNative {
                        api: unit.name.clone(),
                        name: decl.name().to_string(),
                    },
                ));
            };
            let cell = Slot::ready(decl.name(), origin, Value::Native(Arc::new(native)));
            wrapper.env.bind_function_slot(decl.name(), Arc::new(cell))?;
        }
        wrapper.advance("populateOne", VisitState::Populating, VisitState::Populated)?;
        trace!(api = %unit.name, "bound native API");
        Ok(())
    }

    /// Creates a component's slots, hands them to the APIs it exports, then
    /// imports names from the APIs it uses, populating their implementations
    /// first.
    pub fn populate_one(&mut self, id: WrapperId) -> RuntimeResult<()> {
        match self.wrappers[id.0].state {
            VisitState::Imported => {}
            VisitState::Populating => return Ok(()),
            state if state >= VisitState::Populated => return Ok(()),
            state => {
                return Err(InterpreterFault::bug(format!(
                    "phase `populateOne` called on {} in state {state}",
                    self.wrappers[id.0].name()
                )))
            }
        }
        self.wrappers[id.0].advance("populateOne", VisitState::Imported, VisitState::Populating)?;
        trace!(module = self.wrappers[id.0].name(), "populating");

        self.create_own_slots(id)?;
        self.fill_exported_apis(id)?;
        let unit = self.wrappers[id.0].unit.clone();
        for import in &unit.imports {
            self.import_names(id, import)?;
        }
        self.import_implicit_libraries(id)?;

        self.wrappers[id.0].advance("populateOne", VisitState::Populating, VisitState::Populated)
    }

    fn create_own_slots(&mut self, id: WrapperId) -> RuntimeResult<()> {
        let wrapper = &self.wrappers[id.0];
        let unit = wrapper.unit.clone();
        let env = wrapper.env.clone();
        let rewrites = &wrapper.rewrites;
        let plain: HashSet<&str> = plain_function_names(&unit.decls);

        for decl in &unit.decls {
            let origin = Location::at(unit.name.clone(), decl.span());
            match decl {
                Decl::Let(value) | Decl::Var(value) => {
                    let mutable = matches!(decl, Decl::Var(_));
                    let cell = Arc::new(Slot::empty(&value.name, origin.clone()));
                    match &value.init {
                        Some(init) => {
                            let expr = init.clone();
                            let scope = Arc::downgrade(&env);
                            let name = value.name.clone();
                            cell.defer(move || {
                                let scope = scope.upgrade().ok_or_else(|| {
                                    InterpreterFault::bug(format!("environment of `{name}` was released"))
                                })?;
                                Evaluator::new().eval(&expr, &scope)
                            })?;
                        }
                        None if mutable => {}
                        None => {
                            return Err(InterpreterFault::program(
                                origin,
                                RuntimeError::Uninitialized {
                                    name: value.name.clone(),
                                },
                            ))
                        }
                    }
                    env.bind_value_slot(&value.name, Binding { cell, mutable })
                        .map_err(|fault| fault.located(&unit.name, decl.span()))?;
                }
                Decl::Function(function) | Decl::Test(function) => {
                    let cell = Arc::new(Slot::empty(&function.name, origin));
                    env.bind_function_slot(&function.name, cell)
                        .map_err(|fault| fault.located(&unit.name, decl.span()))?;
                }
                Decl::Trait(decl) => {
                    let methods = desugar_methods(&decl.methods, members_of(rewrites, &decl.name));
                    let core = TypeCore::new(&decl.name, &env, decl.extends.clone(), methods, decl.span);
                    let ty = Arc::new(FType::Trait(core));
                    env.bind_type_slot(&decl.name, Arc::new(TypeSlot::ready(&decl.name, origin.clone(), ty)))?;
                    reserve_functional_slots(&env, &decl.methods, &plain, &origin)?;
                }
                Decl::Object(decl) => {
                    let methods = desugar_methods(&decl.methods, members_of(rewrites, &decl.name));
                    let core = TypeCore::new(&decl.name, &env, decl.extends.clone(), methods, decl.span);
                    let ty = Arc::new(FType::Object(ObjectType {
                        core,
                        params: decl.params.clone(),
                    }));
                    env.bind_type_slot(&decl.name, Arc::new(TypeSlot::ready(&decl.name, origin.clone(), ty)))?;
                    env.bind_function_slot(&decl.name, Arc::new(Slot::empty(&decl.name, origin.clone())))?;
                    reserve_functional_slots(&env, &decl.methods, &plain, &origin)?;
                }
            }
        }
        Ok(())
    }

    /// Shares the component's cells with every API it exports.
    fn fill_exported_apis(&mut self, id: WrapperId) -> RuntimeResult<()> {
        let wrapper = &self.wrappers[id.0];
        let env = wrapper.env.clone();
        let component = wrapper.name().to_string();
        let exports = wrapper.exported_apis()?.to_vec();
        for api_id in exports {
            let api = &self.wrappers[api_id.0];
            let api_env = api.env.clone();
            let api_name = api.name().to_string();
            for name in api_exported_names(&api.unit) {
                if !share_cells(&env, &name, &api_env, &name)? {
                    return Err(InterpreterFault::program(
                        Location::unit(component.clone()),
                        RuntimeError::MissingExport {
                            component: component.clone(),
                            api: api_name.clone(),
                            name,
                        },
                    ));
                }
            }
            self.wrappers[api_id.0].advance("populateOne", VisitState::Imported, VisitState::Populated)?;
        }
        Ok(())
    }

    fn import_names(&mut self, id: WrapperId, import: &Import) -> RuntimeResult<()> {
        let unit_name = self.wrappers[id.0].name().to_string();
        match import {
            Import::Apis { span, .. } => Err(InterpreterFault::bug(format!(
                "NYI: `import api` form in {unit_name} at {span}"
            ))),
            Import::Names { api, names, span } => {
                let (source, exported) = self.import_source(id, api)?;
                for name in names {
                    if !exported.contains(&name.name) {
                        return Err(InterpreterFault::program(
                            Location::at(unit_name.clone(), *span),
                            RuntimeError::UnknownImport {
                                api: api.clone(),
                                name: name.name.clone(),
                            },
                        ));
                    }
                    self.bind_import(id, name.visible_name(), &name.name, &source)
                        .map_err(|fault| fault.located(&unit_name, *span))?;
                }
                Ok(())
            }
            Import::Star { api, except, span } => {
                let (source, exported) = self.import_source(id, api)?;
                for name in exported.iter().filter(|name| !except.contains(name)) {
                    self.bind_import(id, name, name, &source)
                        .map_err(|fault| fault.located(&unit_name, *span))?;
                }
                Ok(())
            }
        }
    }

    /// The environment of API `api`, after populating its implementation.
    fn import_source(
        &mut self,
        id: WrapperId,
        api: &str,
    ) -> RuntimeResult<(Arc<Environment>, BTreeSet<String>)> {
        let Some(&implementer) = self.table.get(api) else {
            return Err(InterpreterFault::bug(format!(
                "API `{api}` imported by {} was never linked",
                self.wrappers[id.0].name()
            )));
        };
        if self.wrappers[implementer.0].is_component() {
            self.populate_one(implementer)?;
        }
        let Some(source) = self.api_wrapper(api) else {
            return Err(InterpreterFault::bug(format!("API `{api}` has no wrapper")));
        };
        Ok((source.env.clone(), api_exported_names(&source.unit)))
    }

    fn bind_import(
        &mut self,
        id: WrapperId,
        alias: &str,
        name: &str,
        source: &Arc<Environment>,
    ) -> RuntimeResult<()> {
        let wrapper = &mut self.wrappers[id.0];
        if wrapper.is_own_name(alias) {
            trace!(module = wrapper.name(), name = alias, "own declaration shadows import");
            wrapper.excluded_import_names.insert(alias.to_string());
            return Ok(());
        }
        let env = wrapper.env.clone();
        if share_cells(source, name, &env, alias)? {
            Ok(())
        } else {
            Err(InterpreterFault::program(
                Location::unit(source.unit()),
                RuntimeError::UnknownImport {
                    api: source.unit().to_string(),
                    name: name.to_string(),
                },
            ))
        }
    }

    /// Library names become visible unless the component already binds them.
    fn import_implicit_libraries(&mut self, id: WrapperId) -> RuntimeResult<()> {
        let own = self.wrappers[id.0].name().to_string();
        for library in self.config.implicit_libraries.clone() {
            if library == own || !self.table.contains_key(&library) {
                continue;
            }
            let (source, exported) = self.import_source(id, &library)?;
            let env = self.wrappers[id.0].env.clone();
            for name in exported {
                if env.is_bound_locally(&name) {
                    continue;
                }
                share_cells(&source, &name, &env, &name)?;
            }
        }
        Ok(())
    }

    /// Resolves each trait and object's `extends` list.
    pub fn init_types(&mut self, id: WrapperId) -> RuntimeResult<()> {
        let wrapper = &mut self.wrappers[id.0];
        wrapper.advance("initTypes", VisitState::Populated, VisitState::Typed)?;
        let env = wrapper.env.clone();
        let unit = wrapper.unit.clone();
        for decl in &unit.decls {
            if !matches!(decl, Decl::Trait(_) | Decl::Object(_)) {
                continue;
            }
            let located = |fault: InterpreterFault| fault.located(&unit.name, decl.span());
            let ty = env.lookup_type(decl.name()).map_err(located)?;
            let Some(core) = ty.core() else {
                continue;
            };
            let supertypes = core
                .extends_names
                .iter()
                .map(|name| env.lookup_type(name))
                .collect::<RuntimeResult<Vec<_>>>()
                .map_err(located)?;
            ty.resolve_extends(supertypes)?;
        }
        Ok(())
    }

    /// Seeds a local functional set for every functional method of every
    /// type visible here, including those inherited from supertypes.
    pub fn scan_all_functional_methods(&mut self, id: WrapperId) -> RuntimeResult<()> {
        let wrapper = &mut self.wrappers[id.0];
        wrapper.advance("scanAllFunctionalMethods", VisitState::Typed, VisitState::Scanned)?;
        let env = wrapper.env.clone();
        let unit = wrapper.unit.clone();
        let plain = plain_function_names(&unit.decls);
        let mut sets: BTreeMap<String, Arc<FunctionalSet>> = BTreeMap::new();
        for (_, cell) in env.local_types() {
            let ty = cell.force()?;
            let chain = std::iter::once(ty.clone()).chain(ty.proper_transitive_extends());
            for owner in chain {
                let Some(core) = owner.core() else {
                    continue;
                };
                for method in core.methods.values().filter(|m| m.functional) {
                    if plain.contains(method.name.as_str()) {
                        continue;
                    }
                    let set = match sets.get(&method.name) {
                        Some(set) => set.clone(),
                        None => {
                            let set = local_functional_set(&env, &method.name)?;
                            sets.insert(method.name.clone(), set.clone());
                            set
                        }
                    };
                    set.register(&owner, method)?;
                }
            }
        }
        trace!(module = %unit.name, sets = sets.len(), "scanned functional methods");
        wrapper.functional_sets = sets.into_values().collect();
        Ok(())
    }

    /// Fills function, test, constructor and singleton cells.
    pub fn init_funcs(&mut self, id: WrapperId) -> RuntimeResult<()> {
        let wrapper = &mut self.wrappers[id.0];
        wrapper.advance("initFuncs", VisitState::Scanned, VisitState::Functioned)?;
        let env = wrapper.env.clone();
        let unit = wrapper.unit.clone();
        for decl in &unit.decls {
            let value = match decl {
                Decl::Function(function) | Decl::Test(function) => match &function.body {
                    Some(body) => Value::Closure(Arc::new(Closure {
                        name: function.name.clone(),
                        params: function.params.clone(),
                        body: body.clone(),
                        env: Arc::downgrade(&env),
                    })),
                    None => continue,
                },
                Decl::Object(object) => {
                    let ty = env.lookup_type(&object.name)?;
                    if object.params.is_some() {
                        Value::Constructor(ty)
                    } else {
                        Value::Object(Arc::new(ObjectValue {
                            ty,
                            fields: BTreeMap::new(),
                        }))
                    }
                }
                _ => continue,
            };
            let Some(cell) = env.local_function(decl.name()) else {
                return Err(InterpreterFault::bug(format!(
                    "no slot for `{}` in {}",
                    decl.name(),
                    unit.name
                )));
            };
            cell.fill(value)?;
        }
        Ok(())
    }

    pub fn finish_all_functional_methods(&mut self, id: WrapperId) -> RuntimeResult<()> {
        let wrapper = &mut self.wrappers[id.0];
        wrapper.advance("finishAllFunctionalMethods", VisitState::Functioned, VisitState::Finished)?;
        for set in &wrapper.functional_sets {
            set.finish()?;
        }
        Ok(())
    }

    /// Drops population scratch state; the wrapper stays `Finished`.
    pub fn reset(&mut self, id: WrapperId) -> RuntimeResult<()> {
        let wrapper = &mut self.wrappers[id.0];
        if wrapper.state != VisitState::Finished {
            return Err(InterpreterFault::bug(format!(
                "phase `reset` called on {} in state {}",
                wrapper.name(),
                wrapper.state
            )));
        }
        wrapper.functional_sets.clear();
        wrapper.rewrites.clear();
        Ok(())
    }

    /// Forces top-level initializers in declaration order.
    pub fn init_vars(&mut self, id: WrapperId) -> RuntimeResult<()> {
        let wrapper = &mut self.wrappers[id.0];
        wrapper.advance("initVars", VisitState::Finished, VisitState::Initialized)?;
        let env = wrapper.env.clone();
        let unit = wrapper.unit.clone();
        for decl in &unit.decls {
            if let Decl::Let(value) | Decl::Var(value) = decl {
                if value.init.is_none() {
                    continue;
                }
                if let Some(binding) = env.local_value(&value.name) {
                    binding.cell.force()?;
                }
            }
        }
        trace!(module = %unit.name, "initialized variables");
        Ok(())
    }
}

fn plain_function_names(decls: &[Decl]) -> HashSet<&str> {
    decls
        .iter()
        .filter(|decl| !matches!(decl, Decl::Trait(_) | Decl::Object(_)))
        .map(Decl::name)
        .collect()
}

fn members_of<'a>(rewrites: &'a TopLevelRewrites, name: &str) -> Option<&'a BTreeSet<String>> {
    rewrites.get(name).and_then(RewriteInfo::members)
}

fn desugar_methods(
    methods: &[FunctionDecl],
    members: Option<&BTreeSet<String>>,
) -> BTreeMap<String, MethodDef> {
    let empty = BTreeSet::new();
    let members = members.unwrap_or(&empty);
    methods
        .iter()
        .map(|method| (method.name.clone(), desugar_method(method, members)))
        .collect()
}

/// Reserves a slot for each functional method name so exported APIs can
/// share it before the set exists. Plain functions of the same name win.
fn reserve_functional_slots(
    env: &Arc<Environment>,
    methods: &[FunctionDecl],
    plain: &HashSet<&str>,
    origin: &Location,
) -> RuntimeResult<()> {
    for method in methods.iter().filter(|m| m.is_functional()) {
        if plain.contains(method.name.as_str()) || env.local_function(&method.name).is_some() {
            continue;
        }
        env.bind_function_slot(&method.name, Arc::new(Slot::empty(&method.name, origin.clone())))?;
    }
    Ok(())
}

/// The set behind `name` owned by this environment, replacing any cell
/// that was imported from elsewhere.
fn local_functional_set(env: &Arc<Environment>, name: &str) -> RuntimeResult<Arc<FunctionalSet>> {
    if let Some(cell) = env.local_function(name) {
        if cell.origin().unit == env.unit() {
            if cell.is_empty() {
                let set = Arc::new(FunctionalSet::new(name, env.unit()));
                cell.fill(Value::Functional(set.clone()))?;
                return Ok(set);
            }
            if let Some(Value::Functional(set)) = cell.peek() {
                return Ok(set);
            }
        }
    }
    let set = Arc::new(FunctionalSet::new(name, env.unit()));
    let cell = Slot::ready(name, env.location(), Value::Functional(set.clone()));
    env.replace_function_slot(name, Arc::new(cell));
    Ok(set)
}

/// Binds whatever `from` holds under `name` into `to` as `alias`, sharing
/// the cells. Rebinding the same cell is a no-op; a different one is a
/// duplicate. Returns whether anything was found.
fn share_cells(
    from: &Arc<Environment>,
    name: &str,
    to: &Arc<Environment>,
    alias: &str,
) -> RuntimeResult<bool> {
    let duplicate = || {
        InterpreterFault::program(
            to.location(),
            RuntimeError::DuplicateBinding {
                name: alias.to_string(),
            },
        )
    };
    let mut found = false;
    if let Some(binding) = from.local_value(name) {
        found = true;
        match to.local_value(alias) {
            Some(existing) if Arc::ptr_eq(&existing.cell, &binding.cell) => {}
            Some(_) => return Err(duplicate()),
            None => to.bind_value_slot(alias, binding)?,
        }
    }
    if let Some(cell) = from.local_function(name) {
        found = true;
        match to.local_function(alias) {
            Some(existing) if Arc::ptr_eq(&existing, &cell) => {}
            Some(_) => return Err(duplicate()),
            None => to.bind_function_slot(alias, cell)?,
        }
    }
    if let Some(cell) = from.local_type(name) {
        found = true;
        match to.local_type(alias) {
            Some(existing) if Arc::ptr_eq(&existing, &cell) => {}
            Some(_) => return Err(duplicate()),
            None => to.bind_type_slot(alias, cell)?,
        }
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::{manifest::LinkerConfig, repository::MemoryRepository};

    fn session<'r>(repo: &'r MemoryRepository, root: &str) -> LinkSession<'r> {
        LinkSession::link(repo, root, LinkerConfig::without_implicit_libraries()).expect("link")
    }

    fn repo(sources: &[&str]) -> MemoryRepository {
        let repo = MemoryRepository::new();
        for source in sources {
            repo.add(source).expect("add");
        }
        repo
    }

    #[test]
    fn every_component_ends_initialized() {
        let repo = repo(&[
            "component A\nimport B.{y};\nlet x = y + 1;\nend",
            "api B\nlet y;\nend",
            "component B\nexport B;\nlet y = 41;\nend",
        ]);
        let mut session = session(&repo, "A");
        let env = session.populate().expect("populate");
        assert!(matches!(env.lookup("x"), Ok(Value::Int(42))));
        for wrapper in session.wrappers().iter().filter(|w| w.is_component()) {
            assert_eq!(wrapper.state, VisitState::Initialized);
            assert!(wrapper.rewrites.is_empty());
        }
    }

    #[test]
    fn populating_twice_is_a_bug() {
        let repo = repo(&["component A\nend"]);
        let mut session = session(&repo, "A");
        session.populate().expect("populate");
        assert!(session.populate().expect_err("second run").is_bug());
    }

    #[test]
    fn exported_names_must_be_implemented() {
        let repo = repo(&[
            "component A\nimport B.{y};\nend",
            "api B\nlet y;\nfn missing();\nend",
            "component B\nexport B;\nlet y = 1;\nend",
        ]);
        let fault = session(&repo, "A").populate().expect_err("missing export");
        assert!(matches!(
            fault.program_error(),
            Some(RuntimeError::MissingExport { name, .. }) if name == "missing"
        ));
    }

    #[test]
    fn undeclared_imports_are_rejected() {
        let repo = repo(&[
            "component A\nimport B.{secret};\nend",
            "api B\nlet y;\nend",
            "component B\nexport B;\nlet y = 1;\nlet secret = 2;\nend",
        ]);
        let fault = session(&repo, "A").populate().expect_err("unknown import");
        assert!(matches!(
            fault.program_error(),
            Some(RuntimeError::UnknownImport { name, .. }) if name == "secret"
        ));
    }

    #[test]
    fn duplicate_top_level_names_are_rejected() {
        let repo = repo(&["component A\nlet x = 1;\nfn x() = 2;\nend"]);
        let fault = session(&repo, "A").populate().expect_err("duplicate");
        assert!(matches!(
            fault.program_error(),
            Some(RuntimeError::DuplicateBinding { name }) if name == "x"
        ));
    }

    #[test]
    fn cyclic_imports_share_cells() {
        let repo = repo(&[
            "component Even\nimport Odd.{isOdd};\nexport Even;\nfn isEven(n) = if n == 0 { true } else { isOdd(n - 1) };\nend",
            "api Even\nfn isEven(n);\nend",
            "api Odd\nfn isOdd(n);\nend",
            "component Odd\nimport Even.{isEven};\nexport Odd;\nfn isOdd(n) = if n == 0 { false } else { isEven(n - 1) };\nend",
        ]);
        let mut session = session(&repo, "Even");
        let env = session.populate().expect("populate");
        let is_even = env.lookup("isEven").expect("isEven");
        let result = Evaluator::new()
            .call_value(&is_even, vec![Value::Int(7)], &Location::unit("Even"))
            .expect("call");
        assert!(matches!(result, Value::Bool(false)));
    }

    #[test]
    fn aliased_imports_bind_under_the_alias() {
        let repo = repo(&[
            "component A\nimport B.{y as why};\nlet z = why * 2;\nend",
            "api B\nlet y;\nend",
            "component B\nexport B;\nlet y = 4;\nend",
        ]);
        let env = session(&repo, "A").populate().expect("populate");
        assert!(matches!(env.lookup("z"), Ok(Value::Int(8))));
        assert!(env.lookup("y").is_err());
    }

    #[test]
    fn star_imports_honor_except() {
        let repo = repo(&[
            "component A\nimport B.{...} except {b};\nend",
            "api B\nlet a;\nlet b;\nend",
            "component B\nexport B;\nlet a = 1;\nlet b = 2;\nend",
        ]);
        let env = session(&repo, "A").populate().expect("populate");
        assert!(env.lookup("a").is_ok());
        assert!(env.lookup("b").is_err());
    }
}
