use crate::language::compiler::{DiagKind, Diagnostic};
use miette::{NamedSource, Report, SourceSpan};
use thiserror::Error;

/// miette-facing view of a checker diagnostic, rendered with the source
/// excerpt and label attached.
#[derive(Debug, Error, miette::Diagnostic, Clone)]
#[error("{message}")]
pub struct CheckDiagnostic {
    #[source_code]
    src: NamedSource<String>,
    #[label("{label}")]
    span: SourceSpan,
    #[help]
    help: Option<String>,
    message: String,
    label: String,
}

impl CheckDiagnostic {
    pub fn from_record(diag: &Diagnostic) -> Option<Self> {
        let file = diag.origin.file.as_ref()?;
        if diag.origin.line == 0 {
            return None;
        }
        let offset = line_col_offset(&file.text, diag.origin.line, diag.origin.column)?;
        let len = diag.origin.width.max(1) as usize;
        let label = match diag.kind {
            DiagKind::Error => diag.message.clone(),
            DiagKind::Warning => format!("warning: {}", diag.message),
            DiagKind::Help => format!("help: {}", diag.message),
        };
        Some(CheckDiagnostic {
            src: NamedSource::new(file.name.clone(), file.text.to_string()),
            span: (offset, len).into(),
            help: None,
            message: diag.message.clone(),
            label,
        })
    }
}

/// Prints diagnostics to stderr, using miette reports where a source
/// location is available and the prebuilt context line otherwise.
pub fn emit_diagnostics(diagnostics: &[Diagnostic]) {
    for diag in diagnostics {
        match CheckDiagnostic::from_record(diag) {
            Some(rendered) => eprintln!("{:?}", Report::new(rendered)),
            None => eprintln!("{}", diag.context),
        }
    }
}

fn line_col_offset(text: &str, line: u32, col: u32) -> Option<usize> {
    let mut offset = 0usize;
    for (i, l) in text.split('\n').enumerate() {
        if i as u32 + 1 == line {
            let col = col.max(1) as usize - 1;
            return Some(offset + col.min(l.len()));
        }
        offset += l.len() + 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::compiler::Compiler;
    use crate::language::span::Loc;
    use crate::target::BuildTarget;

    #[test]
    fn record_converts_to_labeled_source() {
        let mut c = Compiler::new(BuildTarget::host());
        let id = c.sources.add_file("m.kl", "fun f() int {\n  return true\n}\n");
        let origin = c.sources.origin(Loc::new(id, 2, 3, 11));
        c.report(
            crate::language::compiler::DiagKind::Error,
            origin,
            "invalid function result type: bool".into(),
        );
        let rendered = CheckDiagnostic::from_record(&c.diagnostics()[0]).unwrap();
        assert_eq!(rendered.message, "invalid function result type: bool");
        // line 2 starts after "fun f() int {\n" (14 bytes); column 3 is +2
        assert_eq!(rendered.span.offset(), 16);
    }

    #[test]
    fn unknown_origin_falls_back_to_context() {
        let mut c = Compiler::new(BuildTarget::host());
        c.report(
            crate::language::compiler::DiagKind::Error,
            Default::default(),
            "out of memory".into(),
        );
        assert!(CheckDiagnostic::from_record(&c.diagnostics()[0]).is_none());
        assert_eq!(c.diagnostics()[0].context, "<input>: error: out of memory");
    }
}
