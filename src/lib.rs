#![allow(clippy::collapsible_if)]

pub mod driver;
pub mod language;
pub mod linker;
pub mod project;
pub mod runtime;
pub mod tools;

#[cfg(test)]
mod tests;
