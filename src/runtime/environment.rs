use crate::runtime::{
    error::{InterpreterFault, Location, RuntimeError, RuntimeResult},
    value::{FType, Value},
};
use parking_lot::{Condvar, Mutex, RwLock};
use std::cell::Cell;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::thread::{self, ThreadId};

thread_local! {
    static FORCING: Cell<usize> = const { Cell::new(0) };
}

/// True while this thread is evaluating a deferred initializer.
pub fn forcing_on_this_thread() -> bool {
    FORCING.with(|forcing| forcing.get() > 0)
}

struct ForcingGuard;

impl ForcingGuard {
    fn enter() -> Self {
        FORCING.with(|forcing| forcing.set(forcing.get() + 1));
        ForcingGuard
    }
}

impl Drop for ForcingGuard {
    fn drop(&mut self) {
        FORCING.with(|forcing| forcing.set(forcing.get().saturating_sub(1)));
    }
}

type Deferred<T> = Box<dyn FnOnce() -> RuntimeResult<T> + Send>;

enum ThunkState<T> {
    Empty,
    Deferred(Deferred<T>),
    Forcing(ThreadId),
    Done(RuntimeResult<T>),
}

/// A slot whose value may be computed on first read and memoized in place.
///
/// Forcing is guarded by a per-slot lock: the first forcer evaluates, other
/// threads wait for the outcome, and a forcer reaching its own slot again
/// gets a circular-initialization error instead of deadlocking.
pub struct Thunk<T> {
    name: String,
    origin: Location,
    state: Mutex<ThunkState<T>>,
    settled: Condvar,
}

pub type Slot = Thunk<Value>;
pub type TypeSlot = Thunk<Arc<FType>>;

impl<T: Clone> Thunk<T> {
    pub fn empty(name: impl Into<String>, origin: Location) -> Self {
        Self {
            name: name.into(),
            origin,
            state: Mutex::new(ThunkState::Empty),
            settled: Condvar::new(),
        }
    }

    pub fn ready(name: impl Into<String>, origin: Location, value: T) -> Self {
        let thunk = Self::empty(name, origin);
        *thunk.state.lock() = ThunkState::Done(Ok(value));
        thunk
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn origin(&self) -> &Location {
        &self.origin
    }

    /// Installs the deferred computation for an empty slot.
    pub fn defer(&self, compute: impl FnOnce() -> RuntimeResult<T> + Send + 'static) -> RuntimeResult<()> {
        let mut state = self.state.lock();
        match &*state {
            ThunkState::Empty => {
                *state = ThunkState::Deferred(Box::new(compute));
                Ok(())
            }
            _ => Err(self.duplicate_init()),
        }
    }

    /// Stores the value of a slot that has not been initialized yet.
    pub fn fill(&self, value: T) -> RuntimeResult<()> {
        let mut state = self.state.lock();
        match &*state {
            ThunkState::Empty | ThunkState::Deferred(_) => {
                *state = ThunkState::Done(Ok(value));
                self.settled.notify_all();
                Ok(())
            }
            _ => Err(self.duplicate_init()),
        }
    }

    /// Overwrites the slot; used for assignment to mutable variables.
    pub fn set(&self, value: T) {
        let mut state = self.state.lock();
        *state = ThunkState::Done(Ok(value));
        self.settled.notify_all();
    }

    pub fn force(&self) -> RuntimeResult<T> {
        let me = thread::current().id();
        let mut state = self.state.lock();
        loop {
            let waiting = match &*state {
                ThunkState::Done(result) => return result.clone(),
                ThunkState::Empty => {
                    return Err(self.program_error(RuntimeError::Uninitialized {
                        name: self.name.clone(),
                    }))
                }
                ThunkState::Forcing(owner) if *owner == me => {
                    return Err(self.program_error(RuntimeError::CircularInitialization {
                        name: self.name.clone(),
                    }))
                }
                ThunkState::Forcing(_) => true,
                ThunkState::Deferred(_) => false,
            };
            if !waiting {
                break;
            }
            self.settled.wait(&mut state);
        }

        let compute = match std::mem::replace(&mut *state, ThunkState::Forcing(me)) {
            ThunkState::Deferred(compute) => compute,
            _ => return Err(InterpreterFault::bug("thunk state changed while locked")),
        };
        drop(state);

        let result = {
            let _forcing = ForcingGuard::enter();
            compute()
        };

        let mut state = self.state.lock();
        if matches!(&*state, ThunkState::Forcing(_)) {
            *state = ThunkState::Done(result.clone());
        }
        self.settled.notify_all();
        result
    }

    pub fn is_empty(&self) -> bool {
        matches!(&*self.state.lock(), ThunkState::Empty)
    }

    /// The memoized value, without forcing.
    pub fn peek(&self) -> Option<T> {
        match &*self.state.lock() {
            ThunkState::Done(Ok(value)) => Some(value.clone()),
            _ => None,
        }
    }

    fn duplicate_init(&self) -> InterpreterFault {
        InterpreterFault::bug(format!(
            "duplicate initialization of `{}` from {}",
            self.name, self.origin
        ))
    }

    fn program_error(&self, error: RuntimeError) -> InterpreterFault {
        InterpreterFault::program(self.origin.clone(), error)
    }
}

impl<T> fmt::Debug for Thunk<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thunk")
            .field("name", &self.name)
            .field("origin", &self.origin)
            .finish()
    }
}

#[derive(Clone, Debug)]
pub struct Binding {
    pub cell: Arc<Slot>,
    pub mutable: bool,
}

#[derive(Default)]
struct Tables {
    values: HashMap<String, Binding>,
    functions: HashMap<String, Arc<Slot>>,
    types: HashMap<String, Arc<TypeSlot>>,
}

/// A node in a parent-linked scope chain with separate value, function and
/// type tables.
///
/// Closures and types refer back to their defining scope weakly. A linked
/// component's root scope keeps the other scopes of its session alive
/// through `retain`.
pub struct Environment {
    unit: Arc<str>,
    parent: Option<Arc<Environment>>,
    tables: RwLock<Tables>,
    retained: Mutex<Vec<Arc<Environment>>>,
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("unit", &self.unit)
            .field("depth", &self.depth())
            .finish()
    }
}

impl Environment {
    pub fn new(unit: &str) -> Arc<Self> {
        Arc::new(Self {
            unit: Arc::from(unit),
            parent: None,
            tables: RwLock::new(Tables::default()),
            retained: Mutex::new(Vec::new()),
        })
    }

    pub fn extend(self: &Arc<Self>) -> Arc<Self> {
        Arc::new(Self {
            unit: self.unit.clone(),
            parent: Some(self.clone()),
            tables: RwLock::new(Tables::default()),
            retained: Mutex::new(Vec::new()),
        })
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn parent(&self) -> Option<&Arc<Environment>> {
        self.parent.as_ref()
    }

    /// Keeps `other` alive for as long as this scope is.
    pub fn retain(&self, other: Arc<Environment>) {
        if !std::ptr::eq(self, Arc::as_ptr(&other)) {
            self.retained.lock().push(other);
        }
    }

    fn depth(&self) -> usize {
        self.parent.as_ref().map(|p| p.depth() + 1).unwrap_or(0)
    }

    pub fn location(&self) -> Location {
        Location::unit(self.unit.to_string())
    }

    fn error(&self, error: RuntimeError) -> InterpreterFault {
        InterpreterFault::program(self.location(), error)
    }

    /// Binds a fresh, already-evaluated value in this scope.
    pub fn bind(&self, name: &str, value: Value, mutable: bool) -> RuntimeResult<()> {
        let cell = Arc::new(Slot::ready(name, self.location(), value));
        self.bind_value_slot(name, Binding { cell, mutable })
    }

    pub fn bind_value_slot(&self, name: &str, binding: Binding) -> RuntimeResult<()> {
        let mut tables = self.tables.write();
        if tables.values.contains_key(name) {
            return Err(self.error(RuntimeError::DuplicateBinding {
                name: name.to_string(),
            }));
        }
        tables.values.insert(name.to_string(), binding);
        Ok(())
    }

    pub fn bind_function_slot(&self, name: &str, cell: Arc<Slot>) -> RuntimeResult<()> {
        let mut tables = self.tables.write();
        if tables.functions.contains_key(name) {
            return Err(self.error(RuntimeError::DuplicateBinding {
                name: name.to_string(),
            }));
        }
        tables.functions.insert(name.to_string(), cell);
        Ok(())
    }

    pub fn bind_type_slot(&self, name: &str, cell: Arc<TypeSlot>) -> RuntimeResult<()> {
        let mut tables = self.tables.write();
        if tables.types.contains_key(name) {
            return Err(self.error(RuntimeError::DuplicateBinding {
                name: name.to_string(),
            }));
        }
        tables.types.insert(name.to_string(), cell);
        Ok(())
    }

    /// Replaces a function slot during population. Returns the previous cell.
    pub fn replace_function_slot(&self, name: &str, cell: Arc<Slot>) -> Option<Arc<Slot>> {
        self.tables.write().functions.insert(name.to_string(), cell)
    }

    pub fn local_value(&self, name: &str) -> Option<Binding> {
        self.tables.read().values.get(name).cloned()
    }

    pub fn local_function(&self, name: &str) -> Option<Arc<Slot>> {
        self.tables.read().functions.get(name).cloned()
    }

    pub fn local_type(&self, name: &str) -> Option<Arc<TypeSlot>> {
        self.tables.read().types.get(name).cloned()
    }

    pub fn is_bound_locally(&self, name: &str) -> bool {
        let tables = self.tables.read();
        tables.values.contains_key(name)
            || tables.functions.contains_key(name)
            || tables.types.contains_key(name)
    }

    pub fn local_types(&self) -> Vec<(String, Arc<TypeSlot>)> {
        let tables = self.tables.read();
        let mut types: Vec<_> = tables
            .types
            .iter()
            .map(|(name, cell)| (name.clone(), cell.clone()))
            .collect();
        types.sort_by(|a, b| a.0.cmp(&b.0));
        types
    }

    pub fn find_value(&self, name: &str) -> Option<Binding> {
        if let Some(binding) = self.local_value(name) {
            return Some(binding);
        }
        self.parent.as_ref().and_then(|p| p.find_value(name))
    }

    pub fn find_function(&self, name: &str) -> Option<Arc<Slot>> {
        if let Some(cell) = self.local_function(name) {
            return Some(cell);
        }
        self.parent.as_ref().and_then(|p| p.find_function(name))
    }

    pub fn find_type(&self, name: &str) -> Option<Arc<TypeSlot>> {
        if let Some(cell) = self.local_type(name) {
            return Some(cell);
        }
        self.parent.as_ref().and_then(|p| p.find_type(name))
    }

    /// Resolves a name to a value, forcing any deferred initializer.
    /// Values shadow functions at the same depth; inner scopes shadow outer.
    pub fn lookup(&self, name: &str) -> RuntimeResult<Value> {
        let (value, function) = {
            let tables = self.tables.read();
            (
                tables.values.get(name).map(|b| b.cell.clone()),
                tables.functions.get(name).cloned(),
            )
        };
        if let Some(cell) = value.or(function) {
            return cell.force();
        }
        match &self.parent {
            Some(parent) => parent.lookup(name),
            None => Err(self.error(RuntimeError::UnknownSymbol {
                name: name.to_string(),
            })),
        }
    }

    pub fn lookup_function(&self, name: &str) -> RuntimeResult<Value> {
        match self.find_function(name) {
            Some(cell) => cell.force(),
            None => Err(self.error(RuntimeError::UnknownSymbol {
                name: name.to_string(),
            })),
        }
    }

    pub fn lookup_type(&self, name: &str) -> RuntimeResult<Arc<FType>> {
        match self.find_type(name) {
            Some(cell) => cell.force(),
            None => Err(self.error(RuntimeError::UnknownType {
                name: name.to_string(),
            })),
        }
    }

    pub fn assign(&self, name: &str, value: Value) -> RuntimeResult<()> {
        match self.find_value(name) {
            Some(binding) if binding.mutable => {
                binding.cell.set(value);
                Ok(())
            }
            Some(_) => Err(self.error(RuntimeError::ImmutableBinding {
                name: name.to_string(),
            })),
            None => Err(self.error(RuntimeError::UnknownSymbol {
                name: name.to_string(),
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn origin() -> Location {
        Location::unit("Test")
    }

    #[test]
    fn child_scopes_shadow_without_touching_parent() {
        let root = Environment::new("Test");
        root.bind("x", Value::Int(1), false).expect("bind");
        let child = root.extend();
        child.bind("x", Value::Int(2), false).expect("bind");
        assert!(matches!(child.lookup("x"), Ok(Value::Int(2))));
        assert!(matches!(root.lookup("x"), Ok(Value::Int(1))));
        assert!(root.extend().lookup("missing").is_err());
    }

    #[test]
    fn duplicate_local_binding_is_rejected() {
        let env = Environment::new("Test");
        env.bind("x", Value::Int(1), false).expect("bind");
        let err = env.bind("x", Value::Int(2), false).expect_err("duplicate");
        assert!(matches!(
            err.program_error(),
            Some(RuntimeError::DuplicateBinding { .. })
        ));
    }

    #[test]
    fn deferred_slots_compute_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let slot = Slot::empty("answer", origin());
        let counter = calls.clone();
        slot.defer(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Value::Int(42))
        })
        .expect("defer");
        assert!(matches!(slot.force(), Ok(Value::Int(42))));
        assert!(matches!(slot.force(), Ok(Value::Int(42))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn forcing_is_visible_only_inside_the_initializer() {
        let slot = Slot::empty("flag", origin());
        slot.defer(|| Ok(Value::Bool(forcing_on_this_thread())))
            .expect("defer");
        assert!(!forcing_on_this_thread());
        assert!(matches!(slot.force(), Ok(Value::Bool(true))));
        assert!(!forcing_on_this_thread());
    }

    #[test]
    fn retained_scopes_live_as_long_as_their_holder() {
        let holder = Environment::new("Main");
        let other = Environment::new("Util");
        let weak = Arc::downgrade(&other);
        holder.retain(other);
        holder.retain(holder.clone());
        assert!(weak.upgrade().is_some());
        drop(holder);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn concurrent_forcers_share_one_evaluation() {
        let calls = Arc::new(AtomicUsize::new(0));
        let slot = Arc::new(Slot::empty("slow", origin()));
        let counter = calls.clone();
        slot.defer(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(20));
            Ok(Value::Int(7))
        })
        .expect("defer");
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let slot = slot.clone();
                std::thread::spawn(move || slot.force())
            })
            .collect();
        for handle in handles {
            assert!(matches!(handle.join().expect("join"), Ok(Value::Int(7))));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn self_referential_slot_reports_circularity() {
        let slot = Arc::new(Slot::empty("loop", origin()));
        let inner = slot.clone();
        slot.defer(move || inner.force()).expect("defer");
        let err = slot.force().expect_err("circular");
        assert!(matches!(
            err.program_error(),
            Some(RuntimeError::CircularInitialization { .. })
        ));
    }

    #[test]
    fn filling_twice_is_an_interpreter_bug() {
        let slot = Slot::empty("x", origin());
        slot.fill(Value::Unit).expect("fill");
        assert!(slot.fill(Value::Unit).expect_err("twice").is_bug());
        assert!(Slot::empty("y", origin()).force().is_err());
    }

    #[test]
    fn assignment_requires_mutable_binding() {
        let env = Environment::new("Test");
        env.bind("fixed", Value::Int(1), false).expect("bind");
        env.bind("counter", Value::Int(1), true).expect("bind");
        let inner = env.extend();
        inner.assign("counter", Value::Int(5)).expect("assign");
        assert!(matches!(env.lookup("counter"), Ok(Value::Int(5))));
        assert!(inner.assign("fixed", Value::Int(2)).is_err());
    }
}
