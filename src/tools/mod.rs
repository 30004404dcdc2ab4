pub mod diagnostics;
pub mod tester;
