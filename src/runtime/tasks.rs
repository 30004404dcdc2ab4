use crate::project::manifest::{ConfigError, RuntimeConfig};
use crate::runtime::{
    error::{InterpreterFault, Location, RuntimeError, RuntimeResult},
    value::Value,
};
use parking_lot::{Condvar, Mutex};
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::any::Any;
use std::num::NonZeroUsize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

pub const THREADS_ENV: &str = "FORTRESS_THREADS";

/// Stack reserved for every worker. Evaluation depth is bounded against it.
pub const WORKER_STACK_SIZE: usize = 256 * 1024 * 1024;

pub type TaskBody = Box<dyn FnOnce(&CancelToken) -> RuntimeResult<Value> + Send>;

/// Shared cancellation signal polled by evaluators at calls and loop heads.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

#[derive(Clone, Debug)]
pub enum TaskState {
    Pending,
    Running,
    Completed(Value),
    Failed(InterpreterFault),
    Cancelled,
}

impl TaskState {
    fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed(_) | TaskState::Failed(_) | TaskState::Cancelled
        )
    }
}

/// One schedulable unit of work. The outcome stays on the task; nothing is
/// rethrown on the worker thread.
pub struct Task {
    name: String,
    state: Mutex<TaskState>,
    settled: Condvar,
    cancel: CancelToken,
}

impl Task {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            state: Mutex::new(TaskState::Pending),
            settled: Condvar::new(),
            cancel: CancelToken::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> TaskState {
        self.state.lock().clone()
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn is_done(&self) -> bool {
        self.state.lock().is_terminal()
    }

    pub fn caused_exception(&self) -> bool {
        matches!(
            &*self.state.lock(),
            TaskState::Failed(_) | TaskState::Cancelled
        )
    }

    /// The value of a completed task; `None` while running or after failure.
    pub fn result(&self) -> Option<Value> {
        match &*self.state.lock() {
            TaskState::Completed(value) => Some(value.clone()),
            _ => None,
        }
    }

    pub fn task_exception(&self) -> Option<InterpreterFault> {
        match &*self.state.lock() {
            TaskState::Failed(fault) => Some(fault.clone()),
            TaskState::Cancelled => Some(self.cancelled_fault()),
            _ => None,
        }
    }

    pub fn wait(&self) {
        let mut state = self.state.lock();
        while !state.is_terminal() {
            self.settled.wait(&mut state);
        }
    }

    pub fn wait_for_result(&self) -> RuntimeResult<Value> {
        self.wait();
        match &*self.state.lock() {
            TaskState::Completed(value) => Ok(value.clone()),
            TaskState::Failed(fault) => Err(fault.clone()),
            _ => Err(self.cancelled_fault()),
        }
    }

    /// Requests cancellation. A task that has not started yet settles as
    /// cancelled immediately; a running one observes the token.
    pub fn cancel(&self) {
        self.cancel.cancel();
        let mut state = self.state.lock();
        if matches!(*state, TaskState::Pending) {
            *state = TaskState::Cancelled;
            self.settled.notify_all();
        }
    }

    fn run(&self, body: TaskBody) {
        {
            let mut state = self.state.lock();
            if !matches!(*state, TaskState::Pending) {
                return;
            }
            *state = TaskState::Running;
        }
        debug!(task = %self.name, "task started");

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| body(&self.cancel)));
        let terminal = match outcome {
            Ok(Ok(value)) => TaskState::Completed(value),
            Ok(Err(fault)) if fault.is_cancellation() => TaskState::Cancelled,
            Ok(Err(fault)) => TaskState::Failed(fault),
            Err(payload) => TaskState::Failed(InterpreterFault::bug(format!(
                "task `{}` panicked: {}",
                self.name,
                panic_message(payload.as_ref())
            ))),
        };
        debug!(
            task = %self.name,
            failed = matches!(terminal, TaskState::Failed(_)),
            "task finished"
        );

        let mut state = self.state.lock();
        *state = terminal;
        self.settled.notify_all();
    }

    fn cancelled_fault(&self) -> InterpreterFault {
        InterpreterFault::program(
            Location::unit(self.name.clone()),
            RuntimeError::Cancelled {
                task: self.name.clone(),
            },
        )
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// A fixed-size worker pool. Sized once at construction.
pub struct TaskGroup {
    pool: ThreadPool,
    threads: usize,
    shutdown: Arc<AtomicBool>,
    submitted: Mutex<Vec<Weak<Task>>>,
}

impl TaskGroup {
    pub fn new(threads: usize) -> RuntimeResult<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|index| format!("fortress-worker-{index}"))
            .stack_size(WORKER_STACK_SIZE)
            .build()
            .map_err(|err| {
                InterpreterFault::program(
                    Location::unit("<runtime>"),
                    RuntimeError::Configuration {
                        message: format!("could not start {threads} worker thread(s): {err}"),
                    },
                )
            })?;
        debug!(threads, "task group started");
        Ok(Self {
            pool,
            threads,
            shutdown: Arc::new(AtomicBool::new(false)),
            submitted: Mutex::new(Vec::new()),
        })
    }

    pub fn from_config(config: &RuntimeConfig) -> RuntimeResult<Self> {
        let threads = thread_count(config).map_err(|err| {
            InterpreterFault::program(
                Location::unit("<runtime>"),
                RuntimeError::Configuration {
                    message: err.to_string(),
                },
            )
        })?;
        Self::new(threads)
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    pub fn pool_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Runs `task` on the pool and blocks until it settles.
    pub fn invoke(&self, task: &Arc<Task>, body: TaskBody) {
        if self.is_shutdown() {
            task.cancel();
            return;
        }
        self.track(task);
        let running = task.clone();
        self.pool.install(move || running.run(body));
    }

    /// Runs `op` on a worker and returns its output, for work that is not a
    /// task but still needs a worker's stack.
    pub fn install<R, F>(&self, op: F) -> R
    where
        F: FnOnce() -> R + Send,
        R: Send,
    {
        self.pool.install(op)
    }

    /// Queues `task` and returns immediately.
    pub fn execute(&self, task: &Arc<Task>, body: TaskBody) {
        if self.is_shutdown() {
            task.cancel();
            return;
        }
        self.track(task);
        let queued = task.clone();
        let shutdown = self.shutdown.clone();
        self.pool.spawn(move || {
            if shutdown.load(Ordering::Acquire) {
                queued.cancel();
            } else {
                queued.run(body);
            }
        });
    }

    /// Best-effort cancellation of queued and running tasks. Results of
    /// tasks that already settled stay readable.
    pub fn shutdown_now(&self) {
        self.shutdown.store(true, Ordering::Release);
        let submitted = std::mem::take(&mut *self.submitted.lock());
        let mut cancelled = 0usize;
        for task in submitted.iter().filter_map(Weak::upgrade) {
            if !task.is_done() {
                task.cancel();
                cancelled += 1;
            }
        }
        debug!(cancelled, "task group shut down");
    }

    fn track(&self, task: &Arc<Task>) {
        let mut submitted = self.submitted.lock();
        submitted.retain(|weak| weak.strong_count() > 0);
        submitted.push(Arc::downgrade(task));
    }
}

/// The handle a `spawn` expression evaluates to.
pub struct ThreadHandle {
    pub task: Arc<Task>,
    pub group: Arc<TaskGroup>,
}

impl ThreadHandle {
    pub fn spawn(name: &str, body: TaskBody) -> RuntimeResult<Arc<Self>> {
        let group = Arc::new(TaskGroup::new(1)?);
        let task = Task::new(name);
        group.execute(&task, body);
        Ok(Arc::new(Self { task, group }))
    }

    pub fn stop(&self) {
        self.group.shutdown_now();
    }
}

pub fn available_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}

/// Two or fewer cores are used in full; beyond that, half (rounded down).
pub fn hardware_thread_count(available: usize) -> usize {
    if available <= 2 {
        available.max(1)
    } else {
        available / 2
    }
}

pub fn thread_count_from(
    env_value: Option<&str>,
    configured: Option<usize>,
    available: usize,
) -> Result<usize, ConfigError> {
    if let Some(raw) = env_value {
        return match raw.trim().parse::<usize>() {
            Ok(count) if count > 0 => Ok(count),
            _ => Err(ConfigError::InvalidThreadCount {
                value: raw.to_string(),
                source_name: THREADS_ENV.to_string(),
            }),
        };
    }
    match configured {
        Some(0) => Err(ConfigError::InvalidThreadCount {
            value: "0".into(),
            source_name: "runtime.threads".into(),
        }),
        Some(count) => Ok(count),
        None => Ok(hardware_thread_count(available)),
    }
}

pub fn thread_count(config: &RuntimeConfig) -> Result<usize, ConfigError> {
    let env_value = std::env::var(THREADS_ENV).ok();
    thread_count_from(env_value.as_deref(), config.threads, available_parallelism())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::{mpsc, OnceLock};

    fn with_threads_env<F: FnOnce() -> R, R>(value: &str, f: F) -> R {
        static ENV_LOCK: OnceLock<std::sync::Mutex<()>> = OnceLock::new();
        let guard = ENV_LOCK
            .get_or_init(|| std::sync::Mutex::new(()))
            .lock()
            .unwrap();
        let prior = env::var(THREADS_ENV).ok();
        env::set_var(THREADS_ENV, value);
        let result = f();
        if let Some(val) = prior {
            env::set_var(THREADS_ENV, val);
        } else {
            env::remove_var(THREADS_ENV);
        }
        drop(guard);
        result
    }

    fn thrown(message: &str) -> InterpreterFault {
        InterpreterFault::program(
            Location::unit("Test"),
            RuntimeError::Thrown {
                message: message.into(),
            },
        )
    }

    #[test]
    fn hardware_rule_uses_all_small_machines_and_half_of_large_ones() {
        assert_eq!(hardware_thread_count(1), 1);
        assert_eq!(hardware_thread_count(2), 2);
        assert_eq!(hardware_thread_count(3), 1);
        assert_eq!(hardware_thread_count(8), 4);
        assert_eq!(hardware_thread_count(0), 1);
    }

    #[test]
    fn environment_overrides_configuration() {
        assert_eq!(thread_count_from(Some("3"), Some(8), 16).unwrap(), 3);
        assert_eq!(thread_count_from(None, Some(8), 16).unwrap(), 8);
        assert_eq!(thread_count_from(None, None, 16).unwrap(), 8);
    }

    #[test]
    fn invalid_thread_counts_are_rejected() {
        assert!(thread_count_from(Some("zero"), None, 4).is_err());
        assert!(thread_count_from(Some("0"), None, 4).is_err());
        assert!(thread_count_from(None, Some(0), 4).is_err());
    }

    #[test]
    fn env_var_sizes_the_group_exactly() {
        let config = RuntimeConfig { threads: Some(7) };
        let group = with_threads_env("3", || TaskGroup::from_config(&config)).expect("group");
        assert_eq!(group.threads(), 3);
        assert_eq!(group.pool_threads(), 3);
    }

    #[test]
    fn invoke_blocks_and_records_result() {
        let group = TaskGroup::new(2).expect("group");
        let task = Task::new("answer");
        group.invoke(&task, Box::new(|_| Ok(Value::Int(42))));
        assert!(task.is_done());
        assert!(!task.caused_exception());
        assert!(matches!(task.result(), Some(Value::Int(42))));
        assert!(task.task_exception().is_none());
    }

    #[test]
    fn failures_are_captured_not_rethrown() {
        let group = TaskGroup::new(1).expect("group");
        let task = Task::new("boom");
        group.invoke(&task, Box::new(|_| Err(thrown("boom"))));
        assert!(task.caused_exception());
        assert!(task.result().is_none());
        assert_eq!(task.task_exception().expect("fault").message(), "boom");

        let next = Task::new("after");
        group.invoke(&next, Box::new(|_| Ok(Value::Unit)));
        assert!(!next.caused_exception());
    }

    #[test]
    fn panics_become_interpreter_bugs() {
        let group = TaskGroup::new(1).expect("group");
        let task = Task::new("panics");
        group.invoke(&task, Box::new(|_| panic!("worker exploded")));
        let fault = task.task_exception().expect("fault");
        assert!(fault.is_bug());
        assert!(fault.to_string().contains("worker exploded"));
    }

    #[test]
    fn install_runs_on_a_named_worker() {
        let group = TaskGroup::new(1).expect("group");
        let name = group.install(|| std::thread::current().name().map(str::to_string));
        assert_eq!(name.as_deref(), Some("fortress-worker-0"));
    }

    #[test]
    fn execute_returns_before_completion() {
        let group = TaskGroup::new(1).expect("group");
        let (release, gate) = mpsc::channel::<()>();
        let task = Task::new("gated");
        group.execute(
            &task,
            Box::new(move |_| {
                gate.recv().ok();
                Ok(Value::Int(1))
            }),
        );
        assert!(!task.is_done());
        release.send(()).expect("release");
        assert!(matches!(task.wait_for_result(), Ok(Value::Int(1))));
    }

    #[test]
    fn shutdown_cancels_queued_work_and_keeps_finished_results() {
        let group = TaskGroup::new(1).expect("group");
        let done = Task::new("done");
        group.invoke(&done, Box::new(|_| Ok(Value::Int(5))));

        let (release, gate) = mpsc::channel::<()>();
        let blocker = Task::new("blocker");
        group.execute(
            &blocker,
            Box::new(move |_| {
                gate.recv().ok();
                Ok(Value::Unit)
            }),
        );
        let queued = Task::new("queued");
        group.execute(&queued, Box::new(|_| Ok(Value::Int(9))));

        group.shutdown_now();
        release.send(()).ok();
        blocker.wait();
        queued.wait();

        assert!(matches!(queued.state(), TaskState::Cancelled));
        assert!(queued.task_exception().expect("fault").is_cancellation());
        assert!(matches!(done.result(), Some(Value::Int(5))));
    }

    #[test]
    fn running_tasks_observe_the_cancel_token() {
        let group = TaskGroup::new(1).expect("group");
        let (started_tx, started_rx) = mpsc::channel::<()>();
        let task = Task::new("spinner");
        group.execute(
            &task,
            Box::new(move |token| {
                started_tx.send(()).ok();
                while !token.is_cancelled() {
                    std::thread::yield_now();
                }
                Err(InterpreterFault::program(
                    Location::unit("Test"),
                    RuntimeError::Cancelled {
                        task: "spinner".into(),
                    },
                ))
            }),
        );
        started_rx.recv().expect("started");
        group.shutdown_now();
        task.wait();
        assert!(task.caused_exception());
        assert!(matches!(task.state(), TaskState::Cancelled));
    }
}
