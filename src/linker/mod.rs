//! Import closure, trait desugaring and phased population of the module
//! graph rooted at one component.

pub mod desugar;
pub mod populate;
pub mod session;
pub mod wrapper;

pub use session::LinkSession;
pub use wrapper::{ModuleWrapper, VisitState, WrapperId, WrapperKind};
