use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::language::span::{Origin, SourceMap};
use crate::target::BuildTarget;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiagKind {
    Error,
    Warning,
    Help,
}

impl DiagKind {
    pub fn label(self) -> &'static str {
        match self {
            DiagKind::Error => "error",
            DiagKind::Warning => "warning",
            DiagKind::Help => "help",
        }
    }
}

/// One diagnostic record as produced by the checker.
#[derive(Clone, Debug)]
pub struct Diagnostic {
    pub kind: DiagKind,
    pub origin: Origin,
    /// Short descriptive message without source location.
    pub message: String,
    /// Descriptive message including a "srcname:line:col: kind:" prefix.
    pub context: String,
    /// A rendering of the affected source line; may be empty.
    pub excerpt: String,
}

/// Called for each diagnostic as it is produced.
pub type DiagHandler = Box<dyn FnMut(&Diagnostic) + Send>;

/// Shared per-compilation state consumed by the checking pass: the compile
/// target, the source map, and the diagnostic sink. Multiple checker
/// instances (one per package) may share the source map; each holds its own
/// `Compiler`.
pub struct Compiler {
    pub target: BuildTarget,
    pub sources: Arc<SourceMap>,
    diagnostics: Vec<Diagnostic>,
    handler: Option<DiagHandler>,
    errcount: AtomicU32,
}

impl Compiler {
    pub fn new(target: BuildTarget) -> Compiler {
        Compiler {
            target,
            sources: Arc::new(SourceMap::new()),
            diagnostics: Vec::new(),
            handler: None,
            errcount: AtomicU32::new(0),
        }
    }

    pub fn with_sources(mut self, sources: Arc<SourceMap>) -> Compiler {
        self.sources = sources;
        self
    }

    pub fn on_diagnostic(mut self, handler: DiagHandler) -> Compiler {
        self.handler = Some(handler);
        self
    }

    /// Number of error diagnostics reported so far.
    pub fn errcount(&self) -> u32 {
        self.errcount.load(Ordering::Acquire)
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn report(&mut self, kind: DiagKind, origin: Origin, message: String) {
        if kind == DiagKind::Error {
            self.errcount.fetch_add(1, Ordering::AcqRel);
        }
        let prefix = match (&origin.file, origin.line) {
            (Some(file), line) if line > 0 => {
                format!("{}:{}:{}", file.name, line, origin.column)
            }
            (Some(file), _) => file.name.clone(),
            (None, _) => "<input>".to_string(),
        };
        let context = format!("{}: {}: {}", prefix, kind.label(), message);
        let excerpt = render_excerpt(&origin);
        let diag = Diagnostic {
            kind,
            origin,
            message,
            context,
            excerpt,
        };
        if let Some(handler) = self.handler.as_mut() {
            handler(&diag);
        }
        self.diagnostics.push(diag);
    }
}

fn render_excerpt(origin: &Origin) -> String {
    let Some(file) = &origin.file else {
        return String::new();
    };
    if origin.line == 0 {
        return String::new();
    }
    let Some(line_text) = file.text.lines().nth(origin.line as usize - 1) else {
        return String::new();
    };
    let mut out = format!("{:>4} | {}", origin.line, line_text);
    if origin.column > 0 {
        let pad = " ".repeat(origin.column as usize - 1);
        let marker = "~".repeat(origin.width.max(1) as usize);
        out.push_str(&format!("\n     | {}{}", pad, marker));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::span::Loc;

    #[test]
    fn report_counts_errors_and_formats_context() {
        let mut c = Compiler::new(BuildTarget::host());
        let id = c.sources.add_file("lib.kl", "let x i8 = 999\n");
        let origin = c.sources.origin(Loc::new(id, 1, 12, 3));
        c.report(
            DiagKind::Error,
            origin.clone(),
            "integer constant overflows i8".into(),
        );
        c.report(DiagKind::Help, origin, "use a wider type".into());

        assert_eq!(c.errcount(), 1);
        let diags = c.diagnostics();
        assert_eq!(diags.len(), 2);
        assert_eq!(
            diags[0].context,
            "lib.kl:1:12: error: integer constant overflows i8"
        );
        assert!(diags[0].excerpt.contains("let x i8 = 999"));
        assert!(diags[0].excerpt.contains("~~~"));
    }

    #[test]
    fn handler_sees_each_diagnostic() {
        use std::sync::{Arc, Mutex};
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let mut c = Compiler::new(BuildTarget::host()).on_diagnostic(Box::new(move |d| {
            sink.lock().unwrap().push(d.message.clone());
        }));
        c.report(DiagKind::Warning, Origin::default(), "unused var x".into());
        assert_eq!(seen.lock().unwrap().as_slice(), ["unused var x"]);
    }
}
