use std::fmt;
use std::sync::{Arc, RwLock};

// Bit layout of a packed location. Limits: 1048575 files, 1048575 lines,
// 4095 columns, 4095 width. A location of 0 is "unknown".
const WIDTH_BITS: u64 = 12;
const COL_BITS: u64 = 12;
const LINE_BITS: u64 = 20;

const WIDTH_MAX: u64 = (1 << WIDTH_BITS) - 1;
const COL_MAX: u64 = (1 << COL_BITS) - 1;
const LINE_MAX: u64 = (1 << LINE_BITS) - 1;
const SRCFILE_MAX: u64 = (1 << (64 - LINE_BITS - COL_BITS - WIDTH_BITS)) - 1;

const COL_SHIFT: u64 = WIDTH_BITS;
const LINE_SHIFT: u64 = COL_BITS + WIDTH_BITS;
const SRCFILE_SHIFT: u64 = LINE_BITS + COL_BITS + WIDTH_BITS;

/// Compact source location: file, line, column and width packed into 64
/// bits. Inspired by the Go compiler's xpos & lico.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Loc(u64);

impl Loc {
    pub const UNKNOWN: Loc = Loc(0);

    pub fn new(srcfile: u32, line: u32, col: u32, width: u32) -> Loc {
        Loc(((srcfile as u64).min(SRCFILE_MAX) << SRCFILE_SHIFT)
            | ((line as u64).min(LINE_MAX) << LINE_SHIFT)
            | ((col as u64).min(COL_MAX) << COL_SHIFT)
            | (width as u64).min(WIDTH_MAX))
    }

    pub fn srcfile(self) -> u32 {
        (self.0 >> SRCFILE_SHIFT) as u32
    }

    pub fn line(self) -> u32 {
        ((self.0 >> LINE_SHIFT) & LINE_MAX) as u32
    }

    pub fn col(self) -> u32 {
        ((self.0 >> COL_SHIFT) & COL_MAX) as u32
    }

    pub fn width(self) -> u32 {
        (self.0 & WIDTH_MAX) as u32
    }

    pub fn is_known(self) -> bool {
        self.srcfile() != 0 || self.line() != 0
    }

    pub fn with_width(self, width: u32) -> Loc {
        Loc::new(self.srcfile(), self.line(), self.col(), width)
    }

    pub fn with_col(self, col: u32) -> Loc {
        Loc::new(self.srcfile(), self.line(), col, self.width())
    }

    /// Prefers a known location over `Loc::UNKNOWN`.
    pub fn min(self, other: Loc) -> Loc {
        // wrapping_sub(1) turns 0 into u64::MAX, so unknown loses
        if other.0.wrapping_sub(1) < self.0.wrapping_sub(1) {
            other
        } else {
            self
        }
    }

    pub fn max(self, other: Loc) -> Loc {
        if other.0 > self.0 { other } else { self }
    }

    /// Covers the column extent of both locations. Locations on different
    /// lines keep the earlier one.
    pub fn union(self, other: Loc) -> Loc {
        if !other.is_known() {
            return self;
        }
        if !self.is_known() {
            return other;
        }
        if self.line() != other.line() {
            return if other.line() < self.line() {
                other
            } else {
                self
            };
        }
        let start = self.col().min(other.col());
        let end = (self.col() + self.width()).max(other.col() + other.width());
        Loc::new(self.srcfile(), self.line(), start, end - start)
    }
}

impl fmt::Debug for Loc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Loc({}:{}:{}+{})",
            self.srcfile(),
            self.line(),
            self.col(),
            self.width()
        )
    }
}

/// A registered source file. `text` is kept around for diagnostic excerpts.
#[derive(Clone, Debug)]
pub struct SrcFile {
    pub name: String,
    pub text: Arc<str>,
}

/// Resolved origin of a diagnostic, derived from a `Loc`.
#[derive(Clone, Debug, Default)]
pub struct Origin {
    pub file: Option<SrcFile>,
    /// 0 if unknown, in which case the fields below are invalid.
    pub line: u32,
    pub column: u32,
    pub width: u32,
    /// If > 0, marks an important column on `line`.
    pub focus_col: u32,
}

impl Origin {
    pub fn union(self, other: Origin) -> Origin {
        if other.line == 0 {
            return self;
        }
        if self.line == 0 {
            return other;
        }
        if self.line != other.line {
            // keep the earlier line; a multi-line origin renders as its start
            return if other.line < self.line { other } else { self };
        }
        let start = self.column.min(other.column);
        let end = (self.column + self.width).max(other.column + other.width);
        Origin {
            column: start,
            width: end - start,
            ..self
        }
    }
}

/// Maps srcfile ids to file records. Slot 0 is reserved for "unknown".
/// All operations are thread safe; the map is shared between scanners and
/// checker instances.
#[derive(Default)]
pub struct SourceMap {
    files: RwLock<Vec<SrcFile>>,
}

impl SourceMap {
    pub fn new() -> SourceMap {
        SourceMap::default()
    }

    /// Registers a source file and returns its id (>= 1).
    pub fn add_file(&self, name: impl Into<String>, text: impl Into<Arc<str>>) -> u32 {
        let mut files = self.files.write().unwrap();
        files.push(SrcFile {
            name: name.into(),
            text: text.into(),
        });
        files.len() as u32
    }

    pub fn get(&self, srcfile: u32) -> Option<SrcFile> {
        if srcfile == 0 {
            return None;
        }
        let files = self.files.read().unwrap();
        files.get(srcfile as usize - 1).cloned()
    }

    pub fn origin(&self, loc: Loc) -> Origin {
        Origin {
            file: self.get(loc.srcfile()),
            line: loc.line(),
            column: loc.col(),
            width: loc.width(),
            focus_col: 0,
        }
    }

    /// Formats `loc` as "file:line:col". Unknown parts are elided.
    pub fn fmt_loc(&self, loc: Loc) -> String {
        let name = self
            .get(loc.srcfile())
            .map(|f| f.name)
            .unwrap_or_else(|| "<input>".to_string());
        if loc.line() == 0 {
            name
        } else {
            format!("{}:{}:{}", name, loc.line(), loc.col())
        }
    }
}
