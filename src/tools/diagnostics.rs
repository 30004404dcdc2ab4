use crate::{
    language::errors::SyntaxError,
    project::manifest::ManifestError,
    runtime::error::{InterpreterFault, RuntimeError},
};
use miette::{Diagnostic, NamedSource, Report, SourceSpan};
use thiserror::Error;

#[derive(Debug, Error, Diagnostic, Clone)]
#[error("{message}")]
pub struct SyntaxDiagnostic {
    #[source_code]
    src: NamedSource<String>,
    #[label("{label}")]
    span: SourceSpan,
    #[help]
    help: Option<String>,
    message: String,
    label: String,
}

impl SyntaxDiagnostic {
    pub fn from_error(src: NamedSource<String>, err: &SyntaxError) -> Self {
        Self {
            src,
            span: err.to_source_span(),
            help: err.help.clone(),
            message: err.message.clone(),
            label: err.label.clone(),
        }
    }
}

/// One diagnostic per syntax error carried by `fault`; empty for any other fault.
pub fn syntax_diagnostics(fault: &InterpreterFault) -> Vec<SyntaxDiagnostic> {
    let Some(RuntimeError::Syntax {
        unit,
        path,
        text,
        errors,
    }) = fault.program_error()
    else {
        return Vec::new();
    };
    let name = path
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| unit.clone());
    let src = NamedSource::new(name, text.to_string());
    errors
        .iter()
        .map(|err| SyntaxDiagnostic::from_error(src.clone(), err))
        .collect()
}

pub fn report_fault(fault: &InterpreterFault) {
    let diagnostics = syntax_diagnostics(fault);
    if diagnostics.is_empty() {
        match fault {
            InterpreterFault::Bug(bug) => eprintln!("{bug}"),
            InterpreterFault::Program { .. } => eprintln!("Runtime error: {fault}"),
        }
        return;
    }
    for diagnostic in diagnostics {
        eprintln!("{:?}", Report::new(diagnostic));
    }
}

pub fn report_manifest_error(error: &ManifestError) {
    eprintln!("Failed to load configuration: {error}");
}
