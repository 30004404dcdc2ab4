pub mod environment;
pub mod error;
pub mod interpreter;
pub mod natives;
pub mod tasks;
pub mod value;

pub use environment::Environment;
pub use error::{InterpreterBug, InterpreterFault, Location, RuntimeError, RuntimeResult};
pub use interpreter::Evaluator;
pub use value::Value;
