use crate::linker::LinkSession;
use crate::project::{manifest::FortressConfig, repository::Repository};
use crate::runtime::{
    environment::Environment,
    error::{InterpreterFault, Location, RuntimeError, RuntimeResult},
    interpreter::Evaluator,
    tasks::{CancelToken, Task, TaskGroup},
    value::Value,
};
use parking_lot::Mutex;
use std::io::{self, Write};
use std::sync::Arc;
use tracing::info;

pub const ENTRY_POINT: &str = "run";

/// Progress callbacks for a test run.
pub trait TestObserver {
    fn starting(&mut self, _name: &str) {}
    fn finished(&mut self, _name: &str, _outcome: &RuntimeResult<Value>) {}
}

/// Writes `starting <name>...` and `finishing <name>` lines when verbose.
pub struct VerboseTrace<'w> {
    verbose: bool,
    out: &'w mut dyn Write,
}

impl<'w> VerboseTrace<'w> {
    pub fn new(verbose: bool, out: &'w mut dyn Write) -> Self {
        Self { verbose, out }
    }

    pub fn out(&mut self) -> &mut dyn Write {
        &mut *self.out
    }
}

impl TestObserver for VerboseTrace<'_> {
    fn starting(&mut self, name: &str) {
        if self.verbose {
            writeln!(self.out, "starting {name}...").ok();
        }
    }

    fn finished(&mut self, name: &str, outcome: &RuntimeResult<Value>) {
        if self.verbose && outcome.is_ok() {
            writeln!(self.out, "finishing {name}").ok();
        }
    }
}

/// Entry points for evaluating, running and testing a component. Each call
/// links a fresh session; only the worker group is kept between calls.
pub struct Driver {
    config: FortressConfig,
    group: Mutex<Option<Arc<TaskGroup>>>,
}

impl Driver {
    pub fn new(config: FortressConfig) -> Self {
        Self {
            config,
            group: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &FortressConfig {
        &self.config
    }

    /// The run group, created on first use from the runtime configuration.
    pub fn group(&self) -> RuntimeResult<Arc<TaskGroup>> {
        let mut slot = self.group.lock();
        if let Some(group) = slot.as_ref() {
            return Ok(group.clone());
        }
        let group = Arc::new(TaskGroup::from_config(&self.config.runtime)?);
        *slot = Some(group.clone());
        Ok(group)
    }

    /// Links `component` without populating it.
    pub fn link<'r>(&self, component: &str, repository: &'r dyn Repository) -> RuntimeResult<LinkSession<'r>> {
        LinkSession::link(repository, component, self.config.linker.clone())
    }

    /// Links and populates `component` on a worker, so initializers get a
    /// worker's stack.
    pub fn eval_component(&self, component: &str, repository: &dyn Repository) -> RuntimeResult<Arc<Environment>> {
        info!(component, "evaluating component");
        self.group()?.install(|| self.link(component, repository)?.populate())
    }

    /// Calls the component's `run` on the worker group and returns its value.
    /// `run` takes no parameters, or one bound to the argument strings.
    pub fn run_program(
        &self,
        repository: &dyn Repository,
        component: &str,
        args: &[String],
    ) -> RuntimeResult<Value> {
        let env = self.eval_component(component, repository)?;
        info!(component, args = args.len(), "running program");
        let entry = env.lookup_function(ENTRY_POINT)?;
        let params = match &entry {
            Value::Closure(closure) => closure.params.len(),
            other => {
                return Err(InterpreterFault::program(
                    Location::unit(component),
                    RuntimeError::NotCallable {
                        found: other.type_name(),
                    },
                ))
            }
        };
        let call_args = match params {
            0 => Vec::new(),
            1 => vec![Value::Tuple(
                args.iter().map(|arg| Value::Str(arg.clone())).collect(),
            )],
            received => {
                return Err(InterpreterFault::program(
                    Location::unit(component),
                    RuntimeError::ArityMismatch {
                        name: ENTRY_POINT.into(),
                        expected: 1,
                        received,
                    },
                ))
            }
        };
        self.invoke(ENTRY_POINT, env.unit(), entry, call_args)
    }

    /// Runs one test of an already populated component.
    pub fn run_test(&self, env: &Arc<Environment>, name: &str) -> RuntimeResult<Value> {
        let test = env.lookup_function(name)?;
        self.invoke(name, env.unit(), test, Vec::new())
    }

    pub fn run_tests(&self, repository: &dyn Repository, component: &str, verbose: bool) -> RuntimeResult<Vec<String>> {
        self.run_tests_with(repository, component, verbose, &mut io::stdout())
    }

    pub fn run_tests_with(
        &self,
        repository: &dyn Repository,
        component: &str,
        verbose: bool,
        out: &mut dyn Write,
    ) -> RuntimeResult<Vec<String>> {
        self.run_tests_observed(repository, component, &mut VerboseTrace::new(verbose, out))
    }

    /// Runs the component's tests in declaration order, stopping at the
    /// first failure. Returns the names of the tests that passed.
    pub fn run_tests_observed(
        &self,
        repository: &dyn Repository,
        component: &str,
        observer: &mut dyn TestObserver,
    ) -> RuntimeResult<Vec<String>> {
        let (env, tests) = self.prepare_tests(repository, component)?;
        info!(component, tests = tests.len(), "running tests");
        let mut passed = Vec::new();
        for name in tests {
            observer.starting(&name);
            let outcome = self.run_test(&env, &name);
            observer.finished(&name, &outcome);
            outcome?;
            passed.push(name);
        }
        Ok(passed)
    }

    /// Populates `component` on a worker and lists its tests.
    pub fn prepare_tests(
        &self,
        repository: &dyn Repository,
        component: &str,
    ) -> RuntimeResult<(Arc<Environment>, Vec<String>)> {
        info!(component, "evaluating component");
        self.group()?.install(|| {
            let mut session = self.link(component, repository)?;
            let env = session.populate()?;
            Ok((env, session.root_wrapper().unit.tests()))
        })
    }

    /// Submits one call as a task and waits for it. A captured failure is
    /// returned as the error; the value is only read after that check.
    fn invoke(&self, name: &str, unit: &str, callee: Value, args: Vec<Value>) -> RuntimeResult<Value> {
        let group = self.group()?;
        let task = Task::new(name);
        let running = task.clone();
        let site = Location::unit(unit);
        group.invoke(
            &task,
            Box::new(move |_: &CancelToken| Evaluator::for_task(&running).call_value(&callee, args, &site)),
        );
        if task.caused_exception() {
            return Err(task
                .task_exception()
                .unwrap_or_else(|| InterpreterFault::bug(format!("task `{name}` failed without an exception"))));
        }
        task.result()
            .ok_or_else(|| InterpreterFault::bug(format!("task `{name}` settled without a result")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::{manifest::RuntimeConfig, repository::MemoryRepository};

    fn driver() -> Driver {
        Driver::new(FortressConfig {
            runtime: RuntimeConfig { threads: Some(2) },
            ..FortressConfig::default()
        })
    }

    #[test]
    fn run_receives_arguments_as_a_tuple() {
        let repo = MemoryRepository::new();
        repo.add("component Echo\nfn run(args) = len(args);\nend")
            .expect("add");
        let value = driver()
            .run_program(&repo, "Echo", &["a".into(), "b".into(), "c".into()])
            .expect("run");
        assert!(matches!(value, Value::Int(3)));
    }

    #[test]
    fn run_with_two_parameters_is_rejected() {
        let repo = MemoryRepository::new();
        repo.add("component Bad\nfn run(a, b) = a;\nend").expect("add");
        let fault = driver().run_program(&repo, "Bad", &[]).expect_err("arity");
        assert!(matches!(
            fault.program_error(),
            Some(RuntimeError::ArityMismatch { received: 2, .. })
        ));
    }

    #[test]
    fn verbose_runs_trace_both_ends_of_each_test() {
        let repo = MemoryRepository::new();
        repo.add("component T\ntest one() = assert(true);\ntest two() = assertEq(2, 2);\nend")
            .expect("add");
        let mut out = Vec::new();
        let passed = driver()
            .run_tests_with(&repo, "T", true, &mut out)
            .expect("tests");
        assert_eq!(passed.len(), 2);
        assert_eq!(
            String::from_utf8(out).expect("utf8"),
            "starting one...\nfinishing one\nstarting two...\nfinishing two\n"
        );
    }

    #[test]
    fn run_tests_reports_the_passed_names() {
        let repo = MemoryRepository::new();
        repo.add("component Quiet\ntest only() = assert(true);\nend")
            .expect("add");
        let passed = driver().run_tests(&repo, "Quiet", false).expect("tests");
        assert_eq!(passed, vec!["only".to_string()]);
    }

    #[test]
    fn deep_initializers_get_a_worker_stack() {
        let repo = MemoryRepository::new();
        repo.add("component Deep\nfn down(n) = if n == 0 { 0 } else { 1 + down(n - 1) };\nlet depth = down(400);\nend")
            .expect("add");
        let env = driver().eval_component("Deep", &repo).expect("eval");
        assert!(matches!(env.lookup("depth"), Ok(Value::Int(400))));
    }

    #[test]
    fn runaway_recursion_is_an_error_not_an_abort() {
        let repo = MemoryRepository::new();
        repo.add("component Deep\nfn down(n) = if n == 0 { 0 } else { 1 + down(n - 1) };\nlet early = down(10000000);\nend")
            .expect("add");
        let driver = driver();
        let fault = driver.eval_component("Deep", &repo).expect_err("initializer overflow");
        assert!(matches!(
            fault.program_error(),
            Some(RuntimeError::StackOverflow { .. })
        ));

        let repo = MemoryRepository::new();
        repo.add("component Deep\nfn down(n) = if n == 0 { 0 } else { 1 + down(n - 1) };\nfn run() = down(10000000);\nend")
            .expect("add");
        let fault = driver.run_program(&repo, "Deep", &[]).expect_err("overflow");
        assert!(matches!(
            fault.program_error(),
            Some(RuntimeError::StackOverflow { .. })
        ));
    }

    #[test]
    fn the_group_is_created_once() {
        let driver = driver();
        let first = driver.group().expect("group");
        let second = driver.group().expect("group again");
        assert!(Arc::ptr_eq(&first, &second));
    }
}
