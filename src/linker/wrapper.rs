use crate::language::ast::{CompilationUnit, Decl};
use crate::linker::desugar::TopLevelRewrites;
use crate::runtime::{
    environment::Environment,
    error::{InterpreterFault, RuntimeResult},
    value::FunctionalSet,
};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// Index of a wrapper in its link session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WrapperId(pub usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WrapperKind {
    Component,
    Api,
    /// A `native api`, implemented by the interpreter instead of a component.
    Foreign,
}

/// Progress of a wrapper through linking and population.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum VisitState {
    Unvisited,
    Imported,
    Populating,
    Populated,
    Typed,
    Scanned,
    Functioned,
    Finished,
    Initialized,
}

impl fmt::Display for VisitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            VisitState::Unvisited => "unvisited",
            VisitState::Imported => "imported",
            VisitState::Populating => "populating",
            VisitState::Populated => "populated",
            VisitState::Typed => "typed",
            VisitState::Scanned => "scanned",
            VisitState::Functioned => "functioned",
            VisitState::Finished => "finished",
            VisitState::Initialized => "initialized",
        };
        f.write_str(label)
    }
}

/// One compilation unit together with the environment being built for it.
pub struct ModuleWrapper {
    pub id: WrapperId,
    pub kind: WrapperKind,
    pub unit: Arc<CompilationUnit>,
    pub env: Arc<Environment>,
    pub state: VisitState,
    /// API wrappers this component implements, filled by `touch_exports`.
    pub exports: Vec<WrapperId>,
    pub excluded_import_names: BTreeSet<String>,
    pub rewrites: TopLevelRewrites,
    pub(crate) functional_sets: Vec<Arc<FunctionalSet>>,
    own_names: BTreeSet<String>,
    exports_touched: bool,
}

impl ModuleWrapper {
    pub fn new(id: WrapperId, kind: WrapperKind, unit: Arc<CompilationUnit>) -> Self {
        let env = Environment::new(&unit.name);
        Self {
            id,
            kind,
            env,
            unit,
            state: VisitState::Unvisited,
            exports: Vec::new(),
            excluded_import_names: BTreeSet::new(),
            rewrites: TopLevelRewrites::new(),
            functional_sets: Vec::new(),
            own_names: BTreeSet::new(),
            exports_touched: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.unit.name
    }

    pub fn is_component(&self) -> bool {
        self.kind == WrapperKind::Component
    }

    pub fn is_own_name(&self, name: &str) -> bool {
        self.own_names.contains(name)
    }

    pub fn own_names(&self) -> &BTreeSet<String> {
        &self.own_names
    }

    pub fn set_own_names(&mut self, names: BTreeSet<String>) {
        self.own_names = names;
    }

    pub fn exports_touched(&self) -> bool {
        self.exports_touched
    }

    pub(crate) fn mark_exports_touched(&mut self) {
        self.exports_touched = true;
    }

    /// Reads the exported API set; only valid once `touch_exports` ran.
    pub fn exported_apis(&self) -> RuntimeResult<&[WrapperId]> {
        if !self.exports_touched && self.is_component() {
            return Err(InterpreterFault::bug(format!(
                "exports of `{}` read before they were touched",
                self.name()
            )));
        }
        Ok(&self.exports)
    }

    /// Moves the wrapper from `from` to `to`, rejecting out-of-order phases.
    pub fn advance(&mut self, phase: &str, from: VisitState, to: VisitState) -> RuntimeResult<()> {
        if self.state != from {
            return Err(InterpreterFault::bug(format!(
                "phase `{phase}` called on {} in state {}",
                self.name(),
                self.state
            )));
        }
        self.state = to;
        Ok(())
    }
}

impl fmt::Debug for ModuleWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleWrapper")
            .field("id", &self.id)
            .field("name", &self.unit.name)
            .field("kind", &self.kind)
            .field("state", &self.state)
            .finish()
    }
}

/// Names an API makes visible to importers: its declarations plus the
/// functional methods of the traits and objects it declares.
pub fn api_exported_names(unit: &CompilationUnit) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    for decl in &unit.decls {
        names.insert(decl.name().to_string());
        for method in type_methods(decl) {
            if method.is_functional() {
                names.insert(method.name.clone());
            }
        }
    }
    names
}

/// Top-level names a unit declares itself, including functional methods of
/// its own types.
pub fn declared_names(unit: &CompilationUnit) -> BTreeSet<String> {
    let mut names = api_exported_names(unit);
    for decl in &unit.decls {
        if let Decl::Test(test) = decl {
            names.insert(test.name.clone());
        }
    }
    names
}

pub(crate) fn type_methods(decl: &Decl) -> &[crate::language::ast::FunctionDecl] {
    match decl {
        Decl::Trait(decl) => &decl.methods,
        Decl::Object(decl) => &decl.methods,
        _ => &[],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::parser::parse_unit;

    fn wrapper(source: &str) -> ModuleWrapper {
        let unit = parse_unit(None, source).expect("parse");
        ModuleWrapper::new(WrapperId(0), WrapperKind::Component, Arc::new(unit))
    }

    #[test]
    fn exported_names_include_functional_methods() {
        let unit = parse_unit(
            None,
            "api Shapes\ntrait Shape\n  fn area(self);\n  fn describe();\nend\nfn unit();\nend",
        )
        .expect("parse");
        let names: Vec<_> = api_exported_names(&unit).into_iter().collect();
        assert_eq!(names, vec!["Shape", "area", "unit"]);
    }

    #[test]
    fn phases_must_run_in_order() {
        let mut wrapper = wrapper("component Main\nend");
        wrapper
            .advance("preloadTopLevel", VisitState::Unvisited, VisitState::Imported)
            .expect("preload");
        let fault = wrapper
            .advance("initFuncs", VisitState::Scanned, VisitState::Functioned)
            .expect_err("out of order");
        assert!(fault.is_bug());
        assert_eq!(
            fault.to_string(),
            "Interpreter bug: phase `initFuncs` called on Main in state imported"
        );
    }

    #[test]
    fn exports_are_unreadable_until_touched() {
        let mut wrapper = wrapper("component Main\nexport Main;\nend");
        assert!(wrapper.exported_apis().is_err());
        wrapper.mark_exports_touched();
        assert!(wrapper.exported_apis().expect("touched").is_empty());
    }
}
