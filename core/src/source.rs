//! Source positions and the source-file set.
//!
//! Positions flow from the parser (an external collaborator) through the
//! AST into the compiler, which records them per emitted instruction. The
//! VM and the error types translate a [`Pos`] back into `file:line:column`
//! through the [`SourceFileSet`] stored in the bytecode container.

use core::cell::RefCell;
use core::fmt;
use std::rc::Rc;

/// A compact source position: a 1-based byte offset into the file set.
///
/// `NO_POS` (zero) means "no position information".
pub type Pos = u32;

/// The zero position.
pub const NO_POS: Pos = 0;

/// A resolved source position.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FilePos {
    /// File name, may be empty.
    pub name: String,
    /// Byte offset within the file, starting at 0.
    pub offset: u32,
    /// Line number, starting at 1. Zero means unknown.
    pub line: u32,
    /// Column number, starting at 1 (byte count).
    pub column: u32,
}

impl FilePos {
    pub fn is_valid(&self) -> bool {
        self.line > 0
    }
}

impl fmt::Display for FilePos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.name.is_empty() {
            f.write_str(&self.name)?;
            if self.is_valid() {
                write!(f, ":{}:{}", self.line, self.column)?;
            }
            Ok(())
        } else if self.is_valid() {
            write!(f, "{}:{}", self.line, self.column)
        } else {
            f.write_str("-")
        }
    }
}

/// A single source file registered in a [`SourceFileSet`].
///
/// `lines` holds the byte offset of the first character of each line; the
/// first entry is always 0. The parser fills it in while scanning; a file
/// with only the initial entry maps every position to line 1.
#[derive(Debug)]
pub struct SourceFile {
    /// File name as provided to `add_file`.
    pub name: String,
    /// Base position offset of this file within the set.
    pub base: u32,
    /// File size in bytes.
    pub size: u32,
    lines: RefCell<Vec<u32>>,
}

impl PartialEq for SourceFile {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.base == other.base
            && self.size == other.size
            && *self.lines.borrow() == *other.lines.borrow()
    }
}

impl SourceFile {
    /// Number of recorded lines.
    pub fn line_count(&self) -> usize {
        self.lines.borrow().len()
    }

    /// Record the start offset of a new line. Offsets must be added in
    /// increasing order and stay within the file.
    pub fn add_line(&self, offset: u32) {
        let mut lines = self.lines.borrow_mut();
        let ok = match lines.last() {
            Some(&last) => last < offset,
            None => true,
        };
        if ok && offset < self.size {
            lines.push(offset);
        }
    }

    /// Replace the line table wholesale. Returns false (and leaves the
    /// table untouched) if the offsets are not strictly increasing or fall
    /// outside the file.
    pub fn set_lines(&self, lines: Vec<u32>) -> bool {
        for (i, &offset) in lines.iter().enumerate() {
            if (i > 0 && offset <= lines[i - 1]) || self.size <= offset {
                return false;
            }
        }
        *self.lines.borrow_mut() = lines;
        true
    }

    pub(crate) fn lines(&self) -> Vec<u32> {
        self.lines.borrow().clone()
    }

    /// The position of the byte at `offset` within this file.
    pub fn pos(&self, offset: u32) -> Pos {
        self.base + offset.min(self.size)
    }

    /// The file-local byte offset of `p`.
    pub fn offset(&self, p: Pos) -> u32 {
        p.clamp(self.base, self.base + self.size) - self.base
    }

    /// Resolve `p` into a `FilePos` within this file.
    pub fn position(&self, p: Pos) -> FilePos {
        if p == NO_POS {
            return FilePos::default();
        }
        let offset = self.offset(p);
        let lines = self.lines.borrow();
        let (line, column) = match lines.partition_point(|&start| start <= offset) {
            0 => (0, 0),
            n => (n as u32, offset - lines[n - 1] + 1),
        };
        FilePos {
            name: self.name.clone(),
            offset,
            line,
            column,
        }
    }
}

/// The set of source files a compiled program was built from.
///
/// Files occupy disjoint `[base, base+size]` ranges of the position space,
/// so a bare `Pos` identifies both the file and the offset within it.
#[derive(Debug)]
pub struct SourceFileSet {
    base: u32,
    files: Vec<Rc<SourceFile>>,
    last: RefCell<Option<Rc<SourceFile>>>,
}

impl Default for SourceFileSet {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for SourceFileSet {
    fn eq(&self, other: &Self) -> bool {
        // `last` is a lookup cache, not part of the value.
        self.base == other.base
            && self.files.len() == other.files.len()
            && self
                .files
                .iter()
                .zip(other.files.iter())
                .all(|(a, b)| a == b)
    }
}

impl Clone for SourceFileSet {
    fn clone(&self) -> Self {
        SourceFileSet {
            base: self.base,
            files: self.files.clone(),
            last: RefCell::new(self.last.borrow().clone()),
        }
    }
}

impl SourceFileSet {
    pub fn new() -> Self {
        SourceFileSet {
            base: 1, // 0 is reserved for NO_POS
            files: Vec::new(),
            last: RefCell::new(None),
        }
    }

    /// The base for the next file to be added.
    pub fn base(&self) -> u32 {
        self.base
    }

    /// The registered files, in registration order.
    pub fn files(&self) -> &[Rc<SourceFile>] {
        &self.files
    }

    /// Register a file of `size` bytes. `base` defaults to the next free
    /// base; passing an explicit base below it is a caller error and is
    /// clamped up.
    pub fn add_file(&mut self, name: &str, base: Option<u32>, size: u32) -> Rc<SourceFile> {
        let base = base.unwrap_or(self.base).max(self.base);
        let file = Rc::new(SourceFile {
            name: name.to_string(),
            base,
            size,
            lines: RefCell::new(vec![0]),
        });
        // +1 so that end-of-file positions remain addressable
        self.base = base + size + 1;
        self.files.push(file.clone());
        *self.last.borrow_mut() = Some(file.clone());
        file
    }

    /// The file containing `p`, if any.
    pub fn file(&self, p: Pos) -> Option<Rc<SourceFile>> {
        if p == NO_POS {
            return None;
        }
        if let Some(last) = &*self.last.borrow() {
            if last.base <= p && p <= last.base + last.size {
                return Some(last.clone());
            }
        }
        let i = self.files.partition_point(|f| f.base <= p);
        if i == 0 {
            return None;
        }
        let file = &self.files[i - 1];
        if p <= file.base + file.size {
            *self.last.borrow_mut() = Some(file.clone());
            Some(file.clone())
        } else {
            None
        }
    }

    /// Resolve `p` into a `FilePos`, or the default position when the file
    /// set does not cover it.
    pub fn position(&self, p: Pos) -> FilePos {
        match self.file(p) {
            Some(file) => file.position(p),
            None => FilePos::default(),
        }
    }

    pub(crate) fn set_from_parts(base: u32, files: Vec<Rc<SourceFile>>) -> Self {
        SourceFileSet {
            base,
            files,
            last: RefCell::new(None),
        }
    }

    pub(crate) fn make_file(name: String, base: u32, size: u32, lines: Vec<u32>) -> Rc<SourceFile> {
        Rc::new(SourceFile {
            name,
            base,
            size,
            lines: RefCell::new(lines),
        })
    }
}

#[cfg(test)]
mod source_test {
    use super::*;

    #[test]
    fn add_file_assigns_disjoint_bases() {
        let mut set = SourceFileSet::new();
        let f1 = set.add_file("file1", None, 100);
        let f2 = set.add_file("file2", None, 200);
        assert_eq!(f1.base, 1);
        assert_eq!(f2.base, 102);
        assert_eq!(set.base(), 303);
    }

    #[test]
    fn position_resolves_lines() {
        let mut set = SourceFileSet::new();
        let file = set.add_file("test", None, 30);
        assert!(file.set_lines(vec![0, 10, 20]));

        let p = file.pos(12);
        let fp = set.position(p);
        assert_eq!(fp.name, "test");
        assert_eq!(fp.line, 2);
        assert_eq!(fp.column, 3);
        assert_eq!(format!("{}", fp), "test:2:3");
    }

    #[test]
    fn position_of_no_pos_is_unknown() {
        let set = SourceFileSet::new();
        let fp = set.position(NO_POS);
        assert!(!fp.is_valid());
        assert_eq!(format!("{}", fp), "-");
    }

    #[test]
    fn file_lookup_spans_multiple_files() {
        let mut set = SourceFileSet::new();
        let f1 = set.add_file("a", None, 10);
        let f2 = set.add_file("b", None, 10);
        assert_eq!(set.file(f1.pos(5)).unwrap().name, "a");
        assert_eq!(set.file(f2.pos(5)).unwrap().name, "b");
        assert!(set.file(500).is_none());
    }

    #[test]
    fn set_lines_rejects_unsorted_offsets() {
        let mut set = SourceFileSet::new();
        let file = set.add_file("test", None, 10);
        assert!(!file.set_lines(vec![0, 5, 3]));
        assert!(!file.set_lines(vec![0, 99]));
        assert_eq!(file.line_count(), 1);
    }
}
