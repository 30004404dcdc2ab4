use crate::{
    driver::{Driver, TestObserver, VerboseTrace},
    project::repository::Repository,
    runtime::{error::RuntimeResult, value::Value},
    tools::diagnostics::report_fault,
};
use std::io::Write;

/// Outcome of one `fortress test` invocation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TestSummary {
    pub passed: Vec<String>,
    pub failed: Option<String>,
}

impl TestSummary {
    pub fn is_ok(&self) -> bool {
        self.failed.is_none()
    }
}

/// Adds a `test <name> ... ok` line per test to the driver's verbose trace.
struct TestLines<'w> {
    trace: VerboseTrace<'w>,
    summary: TestSummary,
    started: usize,
}

impl TestObserver for TestLines<'_> {
    fn starting(&mut self, name: &str) {
        self.started += 1;
        self.trace.starting(name);
    }

    fn finished(&mut self, name: &str, outcome: &RuntimeResult<Value>) {
        self.trace.finished(name, outcome);
        match outcome {
            Ok(_) => {
                writeln!(self.trace.out(), "test {name} ... ok").ok();
                self.summary.passed.push(name.to_string());
            }
            Err(fault) => {
                writeln!(self.trace.out(), "test {name} ... FAILED").ok();
                report_fault(fault);
                self.summary.failed = Some(name.to_string());
            }
        }
    }
}

/// Runs every test of `component`, printing one line per test. The first
/// failing test ends the run; later tests are not started.
pub fn run_component_tests(
    driver: &Driver,
    repository: &dyn Repository,
    component: &str,
    verbose: bool,
    out: &mut dyn Write,
) -> Result<TestSummary, String> {
    let mut lines = TestLines {
        trace: VerboseTrace::new(verbose, out),
        summary: TestSummary::default(),
        started: 0,
    };
    if let Err(fault) = driver.run_tests_observed(repository, component, &mut lines) {
        if lines.started == 0 {
            report_fault(&fault);
            return Err(format!("could not evaluate `{component}`"));
        }
    }
    if lines.started == 0 {
        return Err(format!("No tests found in `{component}`"));
    }

    let TestLines {
        mut trace, summary, ..
    } = lines;
    if summary.is_ok() {
        writeln!(trace.out(), "test result: ok. {} passed", summary.passed.len()).ok();
    } else {
        writeln!(
            trace.out(),
            "test result: FAILED. {} passed; 1 failed",
            summary.passed.len()
        )
        .ok();
    }
    Ok(summary)
}
