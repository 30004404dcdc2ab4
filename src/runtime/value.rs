use crate::language::{ast::Expr, span::Span};
use crate::runtime::{
    environment::Environment,
    error::{InterpreterFault, RuntimeError, RuntimeResult},
    tasks::ThreadHandle,
};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};

pub type NativeFn = fn(&[Value]) -> Result<Value, RuntimeError>;

#[derive(Clone)]
pub enum Value {
    Unit,
    Int(i64),
    Bool(bool),
    Str(String),
    Tuple(Vec<Value>),
    Closure(Arc<Closure>),
    Native(Arc<NativeFunction>),
    Constructor(Arc<FType>),
    Object(Arc<ObjectValue>),
    Functional(Arc<FunctionalSet>),
    Thread(Arc<ThreadHandle>),
}

impl Value {
    pub fn type_name(&self) -> String {
        match self {
            Value::Unit => "unit".into(),
            Value::Int(_) => "int".into(),
            Value::Bool(_) => "bool".into(),
            Value::Str(_) => "string".into(),
            Value::Tuple(_) => "tuple".into(),
            Value::Closure(_) | Value::Native(_) | Value::Functional(_) => "function".into(),
            Value::Constructor(ty) => format!("constructor {}", ty.name()),
            Value::Object(object) => object.ty.name().to_string(),
            Value::Thread(_) => "thread".into(),
        }
    }

    /// Structural equality on data, identity on code and handles.
    pub fn equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Unit, Value::Unit) => true,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Tuple(a), Value::Tuple(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.equals(y))
            }
            (Value::Object(a), Value::Object(b)) => {
                Arc::ptr_eq(a, b)
                    || (a.ty.same_type(&b.ty)
                        && a.fields.len() == b.fields.len()
                        && a
                            .fields
                            .iter()
                            .zip(&b.fields)
                            .all(|((ka, va), (kb, vb))| ka == kb && va.equals(vb)))
            }
            (Value::Closure(a), Value::Closure(b)) => Arc::ptr_eq(a, b),
            (Value::Native(a), Value::Native(b)) => Arc::ptr_eq(a, b),
            (Value::Constructor(a), Value::Constructor(b)) => a.same_type(b),
            (Value::Functional(a), Value::Functional(b)) => Arc::ptr_eq(a, b),
            (Value::Thread(a), Value::Thread(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Unit => write!(f, "()"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Str(v) => write!(f, "{v}"),
            Value::Tuple(values) => {
                write!(f, "(")?;
                for (idx, value) in values.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{value}")?;
                }
                write!(f, ")")
            }
            Value::Closure(closure) => write!(f, "<fn {}>", closure.name),
            Value::Native(native) => write!(f, "<native {}>", native.name),
            Value::Constructor(ty) => write!(f, "<constructor {}>", ty.name()),
            Value::Object(object) => write!(f, "{object}"),
            Value::Functional(set) => write!(f, "<functional {}>", set.name),
            Value::Thread(_) => write!(f, "<thread>"),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(v) => write!(f, "{v:?}"),
            other => write!(f, "{other}"),
        }
    }
}

pub struct Closure {
    pub name: String,
    pub params: Vec<String>,
    pub body: Arc<Expr>,
    pub env: Weak<Environment>,
}

impl Closure {
    /// The defining scope, which outlives every closure of a linked program.
    pub fn scope(&self) -> RuntimeResult<Arc<Environment>> {
        upgrade_scope(&self.env, &self.name)
    }
}

fn upgrade_scope(env: &Weak<Environment>, owner: &str) -> RuntimeResult<Arc<Environment>> {
    env.upgrade()
        .ok_or_else(|| InterpreterFault::bug(format!("environment of `{owner}` was released")))
}

pub struct NativeFunction {
    pub name: String,
    pub arity: Option<usize>,
    pub func: NativeFn,
}

pub struct ObjectValue {
    pub ty: Arc<FType>,
    pub fields: BTreeMap<String, Value>,
}

impl fmt::Display for ObjectValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.ty.name())?;
        if self.fields.is_empty() {
            return Ok(());
        }
        write!(f, "(")?;
        for (idx, (name, value)) in self.fields.iter().enumerate() {
            if idx > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{name}={value:?}")?;
        }
        write!(f, ")")
    }
}

/// A method as stored on its declaring type, with any implicit `self`
/// references already made explicit.
#[derive(Clone, Debug)]
pub struct MethodDef {
    pub name: String,
    pub params: Vec<String>,
    pub body: Option<Arc<Expr>>,
    pub functional: bool,
    pub span: Span,
}

impl MethodDef {
    pub fn is_abstract(&self) -> bool {
        self.body.is_none()
    }

    /// Parameters after the dispatch position for functional methods.
    pub fn explicit_params(&self) -> &[String] {
        if self.functional {
            &self.params[1..]
        } else {
            &self.params
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BuiltinType {
    Unit,
    Int,
    Bool,
    String,
    Tuple,
    Thread,
}

impl BuiltinType {
    pub const ALL: [BuiltinType; 6] = [
        BuiltinType::Unit,
        BuiltinType::Int,
        BuiltinType::Bool,
        BuiltinType::String,
        BuiltinType::Tuple,
        BuiltinType::Thread,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            BuiltinType::Unit => "Unit",
            BuiltinType::Int => "Int",
            BuiltinType::Bool => "Bool",
            BuiltinType::String => "String",
            BuiltinType::Tuple => "Tuple",
            BuiltinType::Thread => "Thread",
        }
    }
}

pub struct TypeCore {
    pub name: String,
    pub unit: String,
    pub extends_names: Vec<String>,
    extends: OnceLock<Vec<Arc<FType>>>,
    pub methods: BTreeMap<String, MethodDef>,
    env: Weak<Environment>,
    pub span: Span,
}

impl TypeCore {
    pub fn new(
        name: &str,
        env: &Arc<Environment>,
        extends_names: Vec<String>,
        methods: BTreeMap<String, MethodDef>,
        span: Span,
    ) -> Self {
        Self {
            name: name.to_string(),
            unit: env.unit().to_string(),
            extends_names,
            extends: OnceLock::new(),
            methods,
            env: Arc::downgrade(env),
            span,
        }
    }

    pub fn scope(&self) -> RuntimeResult<Arc<Environment>> {
        upgrade_scope(&self.env, &self.name)
    }
}

pub struct ObjectType {
    pub core: TypeCore,
    /// `None` for singleton objects.
    pub params: Option<Vec<String>>,
}

pub enum FType {
    Builtin(BuiltinType),
    Trait(TypeCore),
    Object(ObjectType),
}

/// A method found on a type or one of its supertypes.
#[derive(Clone)]
pub struct ResolvedMethod {
    pub owner: Arc<FType>,
    pub method: MethodDef,
}

impl FType {
    pub fn name(&self) -> &str {
        match self {
            FType::Builtin(builtin) => builtin.name(),
            FType::Trait(core) => &core.name,
            FType::Object(object) => &object.core.name,
        }
    }

    pub fn core(&self) -> Option<&TypeCore> {
        match self {
            FType::Builtin(_) => None,
            FType::Trait(core) => Some(core),
            FType::Object(object) => Some(&object.core),
        }
    }

    pub fn same_type(&self, other: &FType) -> bool {
        match (self.core(), other.core()) {
            (Some(a), Some(b)) => a.name == b.name && a.unit == b.unit,
            (None, None) => self.name() == other.name(),
            _ => false,
        }
    }

    pub fn is_extends_resolved(&self) -> bool {
        self.core()
            .map(|core| core.extends.get().is_some())
            .unwrap_or(true)
    }

    pub fn resolve_extends(&self, supertypes: Vec<Arc<FType>>) -> RuntimeResult<()> {
        let Some(core) = self.core() else {
            return Ok(());
        };
        core.extends.set(supertypes).map_err(|_| {
            InterpreterFault::bug(format!("supertypes of `{}` initialized twice", core.name))
        })
    }

    pub fn extends(&self) -> &[Arc<FType>] {
        self.core()
            .and_then(|core| core.extends.get())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Every supertype reachable through `extends`, nearest first, without
    /// `self` and without repeats.
    pub fn proper_transitive_extends(&self) -> Vec<Arc<FType>> {
        let mut seen = HashSet::new();
        let mut ordered = Vec::new();
        let mut queue: VecDeque<Arc<FType>> = self.extends().iter().cloned().collect();
        while let Some(ty) = queue.pop_front() {
            if ty.same_type(self) || !seen.insert(ty.qualified_name()) {
                continue;
            }
            queue.extend(ty.extends().iter().cloned());
            ordered.push(ty);
        }
        ordered
    }

    pub fn qualified_name(&self) -> String {
        match self.core() {
            Some(core) => format!("{}.{}", core.unit, core.name),
            None => self.name().to_string(),
        }
    }

    pub fn is_subtype_of(&self, other: &FType) -> bool {
        self.same_type(other)
            || self
                .proper_transitive_extends()
                .iter()
                .any(|ty| ty.same_type(other))
    }

    /// Number of proper supertypes; deeper types are more specific.
    pub fn depth(&self) -> usize {
        self.proper_transitive_extends().len()
    }

    pub fn own_method(&self, name: &str) -> Option<&MethodDef> {
        self.core().and_then(|core| core.methods.get(name))
    }

    /// Looks a method up on this type, then on its supertypes. A concrete
    /// method anywhere in the chain beats an abstract declaration.
    pub fn find_method(self: &Arc<Self>, name: &str) -> Option<ResolvedMethod> {
        let mut fallback = None;
        let chain = std::iter::once(self.clone()).chain(self.proper_transitive_extends());
        for owner in chain {
            if let Some(method) = owner.own_method(name) {
                if !method.is_abstract() {
                    return Some(ResolvedMethod {
                        method: method.clone(),
                        owner,
                    });
                }
                if fallback.is_none() {
                    fallback = Some(ResolvedMethod {
                        method: method.clone(),
                        owner: owner.clone(),
                    });
                }
            }
        }
        fallback
    }

    pub fn functional_method_names(&self) -> Vec<String> {
        self.core()
            .map(|core| {
                core.methods
                    .values()
                    .filter(|m| m.functional)
                    .map(|m| m.name.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl fmt::Debug for FType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.qualified_name())
    }
}

#[derive(Clone, Debug)]
pub struct FunctionalEntry {
    pub owner: Arc<FType>,
    pub method: MethodDef,
}

/// The overload set behind a functional method name in one environment.
/// Entries are registered while scanning types, then frozen by `finish`.
pub struct FunctionalSet {
    pub name: String,
    pub unit: String,
    entries: RwLock<Vec<FunctionalEntry>>,
    finished: AtomicBool,
}

impl FunctionalSet {
    pub fn new(name: &str, unit: &str) -> Self {
        Self {
            name: name.to_string(),
            unit: unit.to_string(),
            entries: RwLock::new(Vec::new()),
            finished: AtomicBool::new(false),
        }
    }

    /// Returns `true` when the entry was not already present.
    pub fn register(&self, owner: &Arc<FType>, method: &MethodDef) -> RuntimeResult<bool> {
        if self.is_finished() {
            return Err(InterpreterFault::bug(format!(
                "functional method `{}` extended after it was finished",
                self.name
            )));
        }
        let mut entries = self.entries.write();
        if entries.iter().any(|entry| entry.owner.same_type(owner)) {
            return Ok(false);
        }
        entries.push(FunctionalEntry {
            owner: owner.clone(),
            method: method.clone(),
        });
        Ok(true)
    }

    pub fn finish(&self) -> RuntimeResult<()> {
        if self.finished.swap(true, Ordering::SeqCst) {
            return Err(InterpreterFault::bug(format!(
                "functional method `{}` finished twice",
                self.name
            )));
        }
        let mut entries = self.entries.write();
        entries.sort_by_key(|entry| std::cmp::Reverse(entry.owner.depth()));
        Ok(())
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The most specific concrete entry applicable to `receiver`.
    pub fn select(&self, receiver: &Value) -> RuntimeResult<Option<FunctionalEntry>> {
        if !self.is_finished() {
            return Err(InterpreterFault::bug(format!(
                "functional method `{}` called before it was finished",
                self.name
            )));
        }
        let Value::Object(object) = receiver else {
            return Ok(None);
        };
        Ok(self
            .entries
            .read()
            .iter()
            .find(|entry| !entry.method.is_abstract() && object.ty.is_subtype_of(&entry.owner))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trait_type(env: &Arc<Environment>, name: &str, methods: Vec<MethodDef>) -> Arc<FType> {
        let methods = methods.into_iter().map(|m| (m.name.clone(), m)).collect();
        Arc::new(FType::Trait(TypeCore::new(
            name,
            env,
            Vec::new(),
            methods,
            Span::default(),
        )))
    }

    fn abstract_method(name: &str, functional: bool) -> MethodDef {
        MethodDef {
            name: name.into(),
            params: if functional { vec!["self".into()] } else { Vec::new() },
            body: None,
            functional,
            span: Span::default(),
        }
    }

    #[test]
    fn transitive_extends_skip_repeats_and_self() {
        let env = Environment::new("Shapes");
        let base = trait_type(&env, "Base", Vec::new());
        let left = trait_type(&env, "Left", Vec::new());
        let right = trait_type(&env, "Right", Vec::new());
        let leaf = trait_type(&env, "Leaf", Vec::new());
        base.resolve_extends(Vec::new()).expect("base");
        left.resolve_extends(vec![base.clone()]).expect("left");
        right.resolve_extends(vec![base.clone()]).expect("right");
        leaf.resolve_extends(vec![left.clone(), right.clone()])
            .expect("leaf");

        let names: Vec<_> = leaf
            .proper_transitive_extends()
            .iter()
            .map(|ty| ty.name().to_string())
            .collect();
        assert_eq!(names, vec!["Left", "Right", "Base"]);
        assert!(leaf.is_subtype_of(&base));
        assert!(!base.is_subtype_of(&leaf));
        assert_eq!(leaf.depth(), 3);
    }

    #[test]
    fn resolving_supertypes_twice_is_a_bug() {
        let env = Environment::new("Shapes");
        let ty = trait_type(&env, "Shape", Vec::new());
        ty.resolve_extends(Vec::new()).expect("first");
        assert!(ty.resolve_extends(Vec::new()).expect_err("second").is_bug());
    }

    #[test]
    fn unfinished_functional_sets_refuse_dispatch() {
        let env = Environment::new("Shapes");
        let ty = trait_type(&env, "Shape", vec![abstract_method("area", true)]);
        let set = FunctionalSet::new("area", "Shapes");
        let method = ty.own_method("area").cloned().expect("method");
        assert!(set.register(&ty, &method).expect("register"));
        assert!(!set.register(&ty, &method).expect("register again"));
        assert!(set.select(&Value::Unit).expect_err("unfinished").is_bug());
        set.finish().expect("finish");
        assert!(set.select(&Value::Unit).expect("select").is_none());
        assert!(set.register(&ty, &method).is_err());
    }

    #[test]
    fn find_method_prefers_concrete_over_abstract() {
        let env = Environment::new("Shapes");
        let concrete = MethodDef {
            body: Some(Arc::new(Expr::new(
                crate::language::ast::ExprKind::Int(1),
                Span::default(),
            ))),
            ..abstract_method("size", false)
        };
        let parent = trait_type(&env, "Sized", vec![concrete]);
        let child = trait_type(&env, "Box", vec![abstract_method("size", false)]);
        parent.resolve_extends(Vec::new()).expect("parent");
        child.resolve_extends(vec![parent.clone()]).expect("child");
        let found = child.find_method("size").expect("found");
        assert_eq!(found.owner.name(), "Sized");
        assert!(!found.method.is_abstract());
    }
}
