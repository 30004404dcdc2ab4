use crate::language::ast::{CompilationUnit, Decl, Expr, ExprKind, FunctionDecl, Import, Stmt};
use crate::linker::{
    session::LinkSession,
    wrapper::{api_exported_names, WrapperId, WrapperKind},
};
use crate::runtime::{error::RuntimeResult, value::MethodDef};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, trace};

/// Members visible inside a trait or object body: its own dotted methods and
/// fields, then everything inherited through `extends`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TypeMembers {
    pub extends: Vec<String>,
    pub own: BTreeSet<String>,
    pub members: BTreeSet<String>,
}

impl TypeMembers {
    fn new(extends: &[String], own: BTreeSet<String>) -> Self {
        Self {
            extends: extends.to_vec(),
            members: own.clone(),
            own,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RewriteInfo {
    Trait(TypeMembers),
    Object(TypeMembers),
    Function,
    Variable,
    /// A functional method surfaced as a top-level name.
    Functional,
}

impl RewriteInfo {
    pub fn members(&self) -> Option<&BTreeSet<String>> {
        match self {
            RewriteInfo::Trait(info) | RewriteInfo::Object(info) => Some(&info.members),
            _ => None,
        }
    }

    fn type_members(&self) -> Option<&TypeMembers> {
        match self {
            RewriteInfo::Trait(info) | RewriteInfo::Object(info) => Some(info),
            _ => None,
        }
    }

    fn members_mut(&mut self) -> Option<&mut TypeMembers> {
        match self {
            RewriteInfo::Trait(info) | RewriteInfo::Object(info) => Some(info),
            _ => None,
        }
    }
}

pub type TopLevelRewrites = BTreeMap<String, RewriteInfo>;

/// Initial rewrite table of a unit: one entry per top-level declaration.
pub fn unit_rewrites(unit: &CompilationUnit) -> TopLevelRewrites {
    let mut table = TopLevelRewrites::new();
    for decl in &unit.decls {
        match decl {
            Decl::Let(value) | Decl::Var(value) => {
                table.insert(value.name.clone(), RewriteInfo::Variable);
            }
            Decl::Function(function) => {
                table.insert(function.name.clone(), RewriteInfo::Function);
            }
            Decl::Test(_) => {}
            Decl::Trait(decl) => {
                let own = dotted_method_names(&decl.methods);
                table.insert(
                    decl.name.clone(),
                    RewriteInfo::Trait(TypeMembers::new(&decl.extends, own)),
                );
                insert_functionals(&mut table, &decl.methods);
            }
            Decl::Object(decl) => {
                let mut own = dotted_method_names(&decl.methods);
                own.extend(decl.params.iter().flatten().cloned());
                table.insert(
                    decl.name.clone(),
                    RewriteInfo::Object(TypeMembers::new(&decl.extends, own)),
                );
                insert_functionals(&mut table, &decl.methods);
            }
        }
    }
    table
}

fn dotted_method_names(methods: &[FunctionDecl]) -> BTreeSet<String> {
    methods
        .iter()
        .filter(|m| !m.is_functional())
        .map(|m| m.name.clone())
        .collect()
}

fn insert_functionals(table: &mut TopLevelRewrites, methods: &[FunctionDecl]) {
    for method in methods.iter().filter(|m| m.is_functional()) {
        table
            .entry(method.name.clone())
            .or_insert(RewriteInfo::Functional);
    }
}

/// Copies `info` into `table` under `alias` unless the name is declared
/// locally or excluded. Returns whether the table changed.
pub fn inject_at_top_level(
    table: &mut TopLevelRewrites,
    alias: &str,
    info: &RewriteInfo,
    own_names: &BTreeSet<String>,
    excluded: &BTreeSet<String>,
) -> bool {
    if own_names.contains(alias) || excluded.contains(alias) {
        return false;
    }
    match table.get_mut(alias) {
        None => {
            table.insert(alias.to_string(), info.clone());
            true
        }
        Some(existing) => match (existing.members_mut(), info.members()) {
            (Some(current), Some(incoming)) if !incoming.is_subset(&current.members) => {
                current.members.extend(incoming.iter().cloned());
                true
            }
            _ => false,
        },
    }
}

/// Recomputes the flattened member sets of `types` from their supertypes'
/// current entries. Returns whether any set grew.
pub fn refresh_type_members(table: &mut TopLevelRewrites, types: &[String]) -> bool {
    let mut changed = false;
    for name in types {
        let Some(entry) = table.get(name).and_then(RewriteInfo::type_members) else {
            continue;
        };
        let mut members = entry.members.clone();
        for parent in &entry.extends {
            if let Some(inherited) = table.get(parent).and_then(RewriteInfo::members) {
                members.extend(inherited.iter().cloned());
            }
        }
        if let Some(info) = table.get_mut(name).and_then(RewriteInfo::members_mut) {
            if members.len() > info.members.len() {
                info.members = members;
                changed = true;
            }
        }
    }
    changed
}

/// Builds the runtime form of a trait or object method. Inside dotted
/// methods, bare references to members become `self.member`.
pub fn desugar_method(decl: &FunctionDecl, members: &BTreeSet<String>) -> MethodDef {
    let functional = decl.is_functional();
    let body = decl.body.as_ref().map(|body| {
        if functional || members.is_empty() {
            body.clone()
        } else {
            let mut scope = decl.params.clone();
            Arc::new(rewrite_members(body, members, &mut scope))
        }
    });
    MethodDef {
        name: decl.name.clone(),
        params: decl.params.clone(),
        body,
        functional,
        span: decl.span,
    }
}

fn self_ref(expr: &Expr) -> Box<Expr> {
    Box::new(Expr::new(ExprKind::SelfRef, expr.span))
}

fn rewrite_members(expr: &Expr, members: &BTreeSet<String>, scope: &mut Vec<String>) -> Expr {
    let is_member = |name: &String, scope: &[String]| members.contains(name) && !scope.contains(name);
    let walk = |e: &Expr, scope: &mut Vec<String>| Box::new(rewrite_members(e, members, scope));
    let kind = match &expr.kind {
        ExprKind::Ident(name) if is_member(name, scope) => ExprKind::Field {
            target: self_ref(expr),
            name: name.clone(),
        },
        ExprKind::Call { callee, args } => {
            let args = args
                .iter()
                .map(|arg| rewrite_members(arg, members, scope))
                .collect();
            match &callee.kind {
                ExprKind::Ident(name) if is_member(name, scope) => ExprKind::MethodCall {
                    receiver: self_ref(callee),
                    method: name.clone(),
                    args,
                },
                _ => ExprKind::Call {
                    callee: walk(callee, scope),
                    args,
                },
            }
        }
        ExprKind::Tuple(items) => ExprKind::Tuple(
            items
                .iter()
                .map(|item| rewrite_members(item, members, scope))
                .collect(),
        ),
        ExprKind::Unary { op, operand } => ExprKind::Unary {
            op: *op,
            operand: walk(operand, scope),
        },
        ExprKind::Binary { op, left, right } => ExprKind::Binary {
            op: *op,
            left: walk(left, scope),
            right: walk(right, scope),
        },
        ExprKind::MethodCall {
            receiver,
            method,
            args,
        } => ExprKind::MethodCall {
            receiver: walk(receiver, scope),
            method: method.clone(),
            args: args
                .iter()
                .map(|arg| rewrite_members(arg, members, scope))
                .collect(),
        },
        ExprKind::Field { target, name } => ExprKind::Field {
            target: walk(target, scope),
            name: name.clone(),
        },
        ExprKind::Assign { name, value } => ExprKind::Assign {
            name: name.clone(),
            value: walk(value, scope),
        },
        ExprKind::If {
            cond,
            then_branch,
            else_branch,
        } => ExprKind::If {
            cond: walk(cond, scope),
            then_branch: walk(then_branch, scope),
            else_branch: else_branch.as_ref().map(|branch| walk(branch, scope)),
        },
        ExprKind::While { cond, body } => ExprKind::While {
            cond: walk(cond, scope),
            body: walk(body, scope),
        },
        ExprKind::Block { stmts, result } => {
            let depth = scope.len();
            let stmts = stmts
                .iter()
                .map(|stmt| match stmt {
                    Stmt::Let {
                        name,
                        mutable,
                        value,
                        span,
                    } => {
                        let value = rewrite_members(value, members, scope);
                        scope.push(name.clone());
                        Stmt::Let {
                            name: name.clone(),
                            mutable: *mutable,
                            value,
                            span: *span,
                        }
                    }
                    Stmt::Expr(expr) => Stmt::Expr(rewrite_members(expr, members, scope)),
                })
                .collect();
            let result = result.as_ref().map(|result| walk(result, scope));
            scope.truncate(depth);
            ExprKind::Block { stmts, result }
        }
        ExprKind::Spawn(body) => ExprKind::Spawn(Arc::new(rewrite_members(body, members, scope))),
        ExprKind::Throw(value) => ExprKind::Throw(walk(value, scope)),
        ExprKind::Try {
            body,
            binder,
            handler,
        } => {
            let body = walk(body, scope);
            scope.push(binder.clone());
            let handler = walk(handler, scope);
            scope.pop();
            ExprKind::Try {
                body,
                binder: binder.clone(),
                handler,
            }
        }
        other => other.clone(),
    };
    Expr::new(kind, expr.span)
}

impl<'r> LinkSession<'r> {
    /// Pulls the rewrite entries of every API `id` imports into its table.
    pub fn inject_trait_members_for_desugaring(&mut self, id: WrapperId) -> RuntimeResult<bool> {
        let unit = self.wrappers[id.0].unit.clone();
        let mut incoming = Vec::new();
        for import in &unit.imports {
            match import {
                Import::Names { api, names, .. } => {
                    let Some(source) = self.api_wrapper(api) else {
                        continue;
                    };
                    for name in names {
                        if let Some(info) = source.rewrites.get(&name.name) {
                            incoming.push((name.visible_name().to_string(), info.clone()));
                        }
                    }
                }
                Import::Star { api, except, .. } => {
                    let Some(source) = self.api_wrapper(api) else {
                        continue;
                    };
                    incoming.extend(exported_rewrites(&source.unit, &source.rewrites, except));
                }
                Import::Apis { .. } => {}
            }
        }
        Ok(self.apply_rewrites(id, incoming))
    }

    /// Makes the implicit libraries' entries visible to a component.
    pub fn inject_library_traits(&mut self, id: WrapperId) -> RuntimeResult<bool> {
        let mut incoming = Vec::new();
        let own = self.wrappers[id.0].name().to_string();
        for library in self.config.implicit_libraries.clone() {
            if library == own {
                continue;
            }
            if let Some(source) = self.api_wrapper(&library) {
                incoming.extend(exported_rewrites(&source.unit, &source.rewrites, &[]));
            }
        }
        Ok(self.apply_rewrites(id, incoming))
    }

    fn apply_rewrites(&mut self, id: WrapperId, incoming: Vec<(String, RewriteInfo)>) -> bool {
        let wrapper = &mut self.wrappers[id.0];
        let own = wrapper.own_names().clone();
        let excluded = wrapper.excluded_import_names.clone();
        let mut changed = false;
        for (alias, info) in incoming {
            changed |= inject_at_top_level(&mut wrapper.rewrites, &alias, &info, &own, &excluded);
        }
        let own_types: Vec<String> = wrapper
            .unit
            .decls
            .iter()
            .filter(|decl| matches!(decl, Decl::Trait(_) | Decl::Object(_)))
            .map(|decl| decl.name().to_string())
            .collect();
        changed |= refresh_type_members(&mut wrapper.rewrites, &own_types);
        changed
    }

    /// Repeats injection over every component and API until a full pass
    /// changes nothing. Returns the number of passes.
    pub fn run_desugaring(&mut self) -> RuntimeResult<usize> {
        let ids: Vec<WrapperId> = self
            .wrappers
            .iter()
            .filter(|w| matches!(w.kind, WrapperKind::Component | WrapperKind::Api))
            .map(|w| w.id)
            .collect();
        let mut passes = 0;
        loop {
            passes += 1;
            let mut changed = false;
            for &id in &ids {
                changed |= self.inject_trait_members_for_desugaring(id)?;
                let wrapper = &self.wrappers[id.0];
                if wrapper.is_component() && !self.is_implicit_library(wrapper.name()) {
                    changed |= self.inject_library_traits(id)?;
                }
            }
            trace!(pass = passes, changed, "trait desugaring pass");
            if !changed {
                break;
            }
        }
        debug!(passes, wrappers = ids.len(), "trait desugaring reached a fixed point");
        self.desugar_passes = passes;
        Ok(passes)
    }
}

fn exported_rewrites(
    unit: &CompilationUnit,
    table: &TopLevelRewrites,
    except: &[String],
) -> Vec<(String, RewriteInfo)> {
    let exported = api_exported_names(unit);
    table
        .iter()
        .filter(|(name, _)| exported.contains(*name) && !except.contains(name))
        .map(|(name, info)| (name.clone(), info.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::parser::{parse_expression, parse_unit};

    fn members(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn unit_table_records_members_and_functionals() {
        let unit = parse_unit(
            None,
            "component Shapes\ntrait Shape\n  fn area(self);\n  fn name() = \"shape\";\nend\nobject Sq(side) extends {Shape}\n  fn area(self) = self.side * self.side;\nend\nvar count = 0;\nend",
        )
        .expect("parse");
        let table = unit_rewrites(&unit);
        assert_eq!(table.get("Shape").and_then(RewriteInfo::members), Some(&members(&["name"])));
        assert_eq!(table.get("Sq").and_then(RewriteInfo::members), Some(&members(&["side"])));
        assert_eq!(table.get("area"), Some(&RewriteInfo::Functional));
        assert_eq!(table.get("count"), Some(&RewriteInfo::Variable));
    }

    #[test]
    fn injection_skips_own_and_excluded_names() {
        let mut table = TopLevelRewrites::new();
        let own = members(&["mine"]);
        let excluded = members(&["hidden"]);
        let info = RewriteInfo::Function;
        assert!(!inject_at_top_level(&mut table, "mine", &info, &own, &excluded));
        assert!(!inject_at_top_level(&mut table, "hidden", &info, &own, &excluded));
        assert!(inject_at_top_level(&mut table, "other", &info, &own, &excluded));
        assert!(!inject_at_top_level(&mut table, "other", &info, &own, &excluded));
    }

    #[test]
    fn injection_reports_growing_member_sets() {
        let mut table = TopLevelRewrites::new();
        let none = BTreeSet::new();
        let small = RewriteInfo::Trait(TypeMembers::new(&[], members(&["a"])));
        let mut larger = TypeMembers::new(&[], members(&["a"]));
        larger.members.insert("b".into());
        let larger = RewriteInfo::Trait(larger);
        assert!(inject_at_top_level(&mut table, "T", &small, &none, &none));
        assert!(inject_at_top_level(&mut table, "T", &larger, &none, &none));
        assert!(!inject_at_top_level(&mut table, "T", &small, &none, &none));
        assert_eq!(table.get("T").and_then(RewriteInfo::members), Some(&members(&["a", "b"])));
    }

    #[test]
    fn members_flow_through_extends_chains() {
        let mut table = TopLevelRewrites::new();
        table.insert("A".into(), RewriteInfo::Trait(TypeMembers::new(&[], members(&["a"]))));
        table.insert(
            "B".into(),
            RewriteInfo::Trait(TypeMembers::new(&["A".into()], members(&["b"]))),
        );
        table.insert(
            "C".into(),
            RewriteInfo::Object(TypeMembers::new(&["B".into()], members(&["c"]))),
        );
        let types = vec!["C".to_string(), "B".to_string()];
        assert!(refresh_type_members(&mut table, &types));
        assert!(refresh_type_members(&mut table, &types));
        assert!(!refresh_type_members(&mut table, &types));
        assert_eq!(
            table.get("C").and_then(RewriteInfo::members),
            Some(&members(&["a", "b", "c"]))
        );
    }

    #[test]
    fn dotted_method_bodies_gain_explicit_self() {
        let body = parse_expression("first + second + size(first)").expect("parse");
        let decl = FunctionDecl {
            name: "sum".into(),
            params: vec!["first".into()],
            body: Some(Arc::new(body)),
            span: Default::default(),
        };
        let method = desugar_method(&decl, &members(&["first", "second", "size"]));
        let rendered = format!("{:?}", method.body.expect("body").kind);
        assert!(rendered.contains("Field { target: Expr { kind: SelfRef"));
        assert!(rendered.contains("name: \"second\""));
        assert!(rendered.contains("MethodCall { receiver: Expr { kind: SelfRef"));
        assert!(rendered.contains("method: \"size\""));
        assert!(rendered.contains("Ident(\"first\")"));
        assert!(!rendered.contains("name: \"first\""));
    }

    #[test]
    fn functional_methods_keep_their_bodies() {
        let body = Arc::new(parse_expression("side").expect("parse"));
        let decl = FunctionDecl {
            name: "area".into(),
            params: vec!["self".into()],
            body: Some(body.clone()),
            span: Default::default(),
        };
        let method = desugar_method(&decl, &members(&["side"]));
        assert!(method.functional);
        assert!(Arc::ptr_eq(&method.body.expect("body"), &body));
    }
}
