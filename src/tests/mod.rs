use crate::{
    driver::Driver,
    linker::{LinkSession, VisitState},
    project::{
        manifest::{FortressConfig, LinkerConfig, RuntimeConfig},
        repository::{FileRepository, MemoryRepository},
    },
    runtime::{
        environment::Environment,
        error::{Location, RuntimeError},
        interpreter::Evaluator,
        value::Value,
    },
};
use std::fs;
use std::sync::{Arc, Weak};
use tempfile::tempdir;

fn driver() -> Driver {
    Driver::new(FortressConfig {
        runtime: RuntimeConfig { threads: Some(2) },
        ..FortressConfig::default()
    })
}

fn repo(sources: &[&str]) -> MemoryRepository {
    let repo = MemoryRepository::new();
    for source in sources {
        repo.add(source).expect("add");
    }
    repo
}

#[test]
fn two_component_closure_leaves_nothing_pending() {
    let repo = repo(&[
        "component A\nimport B.{b};\nlet a = b;\nend",
        "api B\nlet b;\nend",
        "component B\nexport B;\nlet b = 1;\nend",
    ]);
    let session =
        LinkSession::link(&repo, "A", LinkerConfig::without_implicit_libraries()).expect("link");
    assert_eq!(session.table_len(), 2);
    assert_eq!(session.pending_len(), 0);
    assert_eq!(session.discovery_order(), vec!["A", "B"]);
}

#[test]
fn own_declarations_shadow_star_imports() {
    let repo = repo(&[
        "component A\nimport B.{...};\nlet x = 1;\nlet sum = x + y;\nend",
        "api B\nlet x;\nlet y;\nend",
        "component B\nexport B;\nlet x = 100;\nlet y = 10;\nend",
    ]);
    let env = driver().eval_component("A", &repo).expect("eval");
    assert!(matches!(env.lookup("x"), Ok(Value::Int(1))));
    assert!(matches!(env.lookup("sum"), Ok(Value::Int(11))));
}

#[test]
fn variable_initializers_see_later_functions() {
    let repo = repo(&["component Order\nvar scaled = triple(4);\nfn triple(n) = n * 3;\nend"]);
    let env = driver().eval_component("Order", &repo).expect("eval");
    assert!(matches!(env.lookup("scaled"), Ok(Value::Int(12))));
}

#[test]
fn mutually_dependent_initializers_are_circular() {
    let repo = repo(&["component Cycle\nlet a = b + 1;\nlet b = a + 1;\nend"]);
    let fault = driver().eval_component("Cycle", &repo).expect_err("cycle");
    assert!(matches!(
        fault.program_error(),
        Some(RuntimeError::CircularInitialization { .. })
    ));
}

#[test]
fn run_program_returns_the_entry_point_value() {
    let repo = repo(&[
        "component Main\nimport Util.{double};\nfn run() = double(21);\nend",
        "api Util\nfn double(n);\nend",
        "component Util\nexport Util;\nfn double(n) = n * 2;\nend",
    ]);
    let value = driver().run_program(&repo, "Main", &[]).expect("run");
    assert!(matches!(value, Value::Int(42)));
}

#[test]
fn a_failing_program_surfaces_its_exception() {
    let repo = repo(&["component Main\nfn run() = throw \"stopped\";\nend"]);
    let fault = driver().run_program(&repo, "Main", &[]).expect_err("throws");
    assert_eq!(fault.message(), "stopped");
    assert!(!fault.is_bug());
}

#[test]
fn a_missing_entry_point_is_reported() {
    let repo = repo(&["component Main\nlet x = 1;\nend"]);
    let fault = driver().run_program(&repo, "Main", &[]).expect_err("no run");
    assert!(matches!(
        fault.program_error(),
        Some(RuntimeError::UnknownSymbol { name }) if name == "run"
    ));
}

#[test]
fn tests_stop_at_the_first_failure() {
    let repo = repo(&[
        "component Checks\ntest first() = fail(\"first broke\");\ntest second() = assert(true);\nend",
    ]);
    let mut out = Vec::new();
    let fault = driver()
        .run_tests_with(&repo, "Checks", true, &mut out)
        .expect_err("first test fails");
    let text = String::from_utf8(out).expect("utf8");
    assert_eq!(fault.message(), "first broke");
    assert!(text.contains("starting first..."));
    assert!(!text.contains("finishing first"));
    assert!(!text.contains("second"));
}

#[test]
fn passing_tests_run_in_declaration_order() {
    let repo = repo(&[
        "component Checks\nvar hits = 0;\ntest one() = { hits := hits + 1; assertEq(hits, 1) };\ntest two() = { hits := hits + 1; assertEq(hits, 2) };\nend",
    ]);
    let mut out = Vec::new();
    let passed = driver()
        .run_tests_with(&repo, "Checks", false, &mut out)
        .expect("tests");
    assert_eq!(passed, vec!["one".to_string(), "two".to_string()]);
    assert!(out.is_empty());
}

#[test]
fn functional_methods_dispatch_on_their_receiver() {
    let repo = repo(&[
        "component Shapes\nobject Sq(side)\n  fn area(self) = self.side * self.side;\nend\nobject Rect(w, h)\n  fn area(self) = self.w * self.h;\nend\nlet total = area(Sq(3)) + area(Rect(2, 5));\nend",
    ]);
    let env = driver().eval_component("Shapes", &repo).expect("eval");
    assert!(matches!(env.lookup("total"), Ok(Value::Int(19))));
}

#[test]
fn library_traits_supply_inherited_methods() {
    let repo = repo(&[
        "component Points\nobject P(x) extends {Comparable}\n  fn compare(other) = x - other.x;\nend\nlet less = P(1).lessThan(P(2));\nlet greater = P(1).greaterThan(P(2));\nlet biggest = max(3, 7);\nend",
    ]);
    let env = driver().eval_component("Points", &repo).expect("eval");
    assert!(matches!(env.lookup("less"), Ok(Value::Bool(true))));
    assert!(matches!(env.lookup("greater"), Ok(Value::Bool(false))));
    assert!(matches!(env.lookup("biggest"), Ok(Value::Int(7))));
}

#[test]
fn imported_traits_reach_the_desugaring_fixed_point() {
    let repo = repo(&[
        "component Main\nimport Base.{Named};\nobject Dog(label) extends {Named}\n  fn describe() = greet() + \" \" + label;\nend\nlet line = Dog(\"rex\").describe();\nend",
        "api Base\ntrait Named\n  fn greet();\nend\nend",
        "component Base\nexport Base;\ntrait Named\n  fn greet() = \"hi\";\nend\nend",
    ]);
    let mut session =
        LinkSession::link(&repo, "Main", LinkerConfig::without_implicit_libraries()).expect("link");
    let env = session.populate().expect("populate");
    let passes = session.desugar_passes();
    assert!(passes >= 2 && passes <= session.wrappers().len() + 1);
    assert!(session
        .wrappers()
        .iter()
        .filter(|w| w.is_component())
        .all(|w| w.state == VisitState::Initialized));
    assert!(matches!(env.lookup("line"), Ok(Value::Str(text)) if text == "hi rex"));
}

#[test]
fn spawned_work_runs_on_its_own_thread() {
    let repo = repo(&[
        "component Main\nfn run() = {\n  let t = spawn { 6 * 7 };\n  t.wait();\n  t.val()\n};\nend",
    ]);
    assert!(matches!(
        driver().run_program(&repo, "Main", &[]),
        Ok(Value::Int(42))
    ));
}

#[test]
fn stopping_a_spawned_loop_cancels_its_value() {
    let repo = repo(&[
        "component Main\nfn run() = {\n  let t = spawn { while true { 0 } };\n  t.stop();\n  t.val()\n};\nend",
    ]);
    let fault = driver()
        .run_program(&repo, "Main", &[])
        .expect_err("stopped thread");
    assert!(fault.is_cancellation());
}

#[test]
fn linked_scopes_are_released_with_the_root_environment() {
    let repo = repo(&[
        "component Main\nimport Util.{double};\nobject Holder(v)\n  fn get() = v;\nend\nvar held = Holder(double(2));\nfn run() = held.get();\nend",
        "api Util\nfn double(n);\nend",
        "component Util\nexport Util;\nfn double(n) = n * 2;\nend",
    ]);
    let mut session =
        LinkSession::link(&repo, "Main", LinkerConfig::without_implicit_libraries()).expect("link");
    let root = session.populate().expect("populate");
    let scopes: Vec<Weak<Environment>> = session
        .wrappers()
        .iter()
        .map(|wrapper| Arc::downgrade(&wrapper.env))
        .collect();
    drop(session);

    let run = root.lookup_function("run").expect("run");
    let value = Evaluator::new()
        .call_value(&run, Vec::new(), &Location::unit("Main"))
        .expect("call after the session is gone");
    assert!(matches!(value, Value::Int(4)));

    drop(run);
    drop(root);
    assert!(scopes.iter().all(|scope| scope.upgrade().is_none()));
}

#[test]
fn evaluated_components_do_not_outlive_their_environment() {
    let repo = repo(&[
        "component Loop\nfn f(n) = g(n);\nfn g(n) = n;\nlet x = f(1);\nend",
    ]);
    let env = driver().eval_component("Loop", &repo).expect("eval");
    assert!(matches!(env.lookup("x"), Ok(Value::Int(1))));
    let scope = Arc::downgrade(&env);
    drop(env);
    assert!(scope.upgrade().is_none());
}

#[test]
fn file_repository_drives_a_whole_program() {
    let dir = tempdir().expect("tempdir");
    fs::write(
        dir.path().join("fortress.toml"),
        "[project]\nname = \"demo\"\npath = [\"src\"]\n\n[runtime]\nthreads = 1\n",
    )
    .expect("write manifest");
    let src = dir.path().join("src");
    fs::create_dir_all(&src).expect("mkdir");
    fs::write(src.join("Greeter.fsi"), "api Greeter\nfn greet(name);\nend\n").expect("write api");
    fs::write(
        src.join("Greeter.fss"),
        "component Greeter\nexport Greeter;\nfn greet(name) = \"hello \" + name;\nend\n",
    )
    .expect("write component");
    fs::write(
        src.join("Hello.fss"),
        "component Hello\nimport Greeter.{greet};\nfn run(args) = greet(args._0);\nend\n",
    )
    .expect("write main");

    let config = FortressConfig::discover(dir.path()).expect("config");
    assert_eq!(config.runtime.threads, Some(1));
    let repository = FileRepository::from_config(&config);
    let driver = Driver::new(config);
    let value = driver
        .run_program(&repository, "Hello", &["world".into()])
        .expect("run");
    assert!(matches!(value, Value::Str(text) if text == "hello world"));
}
