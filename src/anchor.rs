//! Stable (file, line) references into host-owned text buffers.
//!
//! A mark is created lazily (most anchors never outlive the statement
//! they describe, so eagerly creating a host mark for every one of
//! them would be wasteful) and, once observed, tracks edits to its
//! buffer. The anchor never *owns* its buffer: it holds a weak
//! back-reference so the buffer's lifetime stays with its actual
//! owner (the GUI shell).

use std::cell::RefCell;
use std::fmt;
use std::path::{Path, PathBuf};
use std::rc::{Rc, Weak};

/// A host-provided stable position inside a text buffer. Implementors
/// track insertions/deletions the way a GTK `TextMark` or similar
/// widget-toolkit primitive does; this crate never constructs one
/// itself, only consumes it through `SourceBuffer::mark_at`.
pub trait Mark: fmt::Debug {
    /// Current 0-based line number of this mark.
    fn line(&self) -> usize;
    /// Current byte offset of this mark within its buffer.
    fn iter(&self) -> usize;
}

/// The host-provided buffer a `SourceAnchor` is ultimately backed by.
/// `config::SourceProvider::open_by_path` is the only place the core
/// acquires one.
pub trait SourceBuffer {
    /// Create a mark at the given 0-based line. Called lazily, the
    /// first time an anchor's position is actually observed.
    fn mark_at(&self, line: usize) -> Box<dyn Mark>;
    fn path(&self) -> &Path;
}

#[derive(Debug)]
enum AnchorState {
    /// Not yet observed: just remembers the line it was created at.
    Pending(usize),
    /// Observed at least once: now tracked via a host mark.
    Marked(Box<dyn Mark>),
}

/// A stable reference to a source location that survives edits to its
/// buffer, as long as the buffer (and thus the mark) is still alive.
/// If the buffer has since been dropped, the anchor degrades
/// gracefully to the line it last knew about.
pub struct SourceAnchor {
    file: Rc<PathBuf>,
    buffer: Weak<dyn SourceBuffer>,
    state: RefCell<AnchorState>,
}

impl SourceAnchor {
    /// Create an anchor for `line` (0-based) in `buffer`, without yet
    /// creating a host mark.
    pub fn new(file: Rc<PathBuf>, buffer: &Rc<dyn SourceBuffer>, line: usize) -> Self {
        SourceAnchor {
            file,
            buffer: Rc::downgrade(buffer),
            state: RefCell::new(AnchorState::Pending(line)),
        }
    }

    /// An anchor with no backing buffer at all, for synthetic
    /// instructions (e.g. flash padding) that have no source line.
    pub fn synthetic(file: Rc<PathBuf>) -> Self {
        SourceAnchor {
            file,
            buffer: Weak::new(),
            state: RefCell::new(AnchorState::Pending(0)),
        }
    }

    /// Current 0-based line, tracking edits if a mark has been (or
    /// can now be) created.
    pub fn line(&self) -> usize {
        self.ensure_marked();
        match &*self.state.borrow() {
            AnchorState::Pending(line) => *line,
            AnchorState::Marked(mark) => mark.line(),
        }
    }

    /// Current byte offset, 0 if the anchor has no live mark.
    pub fn iter(&self) -> usize {
        self.ensure_marked();
        match &*self.state.borrow() {
            AnchorState::Pending(_) => 0,
            AnchorState::Marked(mark) => mark.iter(),
        }
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    fn ensure_marked(&self) {
        let needs_mark = matches!(&*self.state.borrow(), AnchorState::Pending(_));
        if !needs_mark {
            return;
        }
        let Some(buffer) = self.buffer.upgrade() else {
            return;
        };
        let line = match &*self.state.borrow() {
            AnchorState::Pending(line) => *line,
            AnchorState::Marked(_) => unreachable!(),
        };
        *self.state.borrow_mut() = AnchorState::Marked(buffer.mark_at(line));
    }
}

impl Clone for SourceAnchor {
    fn clone(&self) -> Self {
        // Cloning re-reads the current line rather than sharing the
        // host mark: two anchors pointing at "the same" statement
        // (e.g. a resolved-label copy) are independent observers.
        SourceAnchor {
            file: Rc::clone(&self.file),
            buffer: self.buffer.clone(),
            state: RefCell::new(AnchorState::Pending(self.line())),
        }
    }
}

impl fmt::Debug for SourceAnchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceAnchor")
            .field("file", &self.file)
            .field("line", &self.line())
            .finish()
    }
}

impl fmt::Display for SourceAnchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file.display(), self.line() + 1)
    }
}

impl PartialEq for SourceAnchor {
    fn eq(&self, other: &Self) -> bool {
        self.file == other.file && self.line() == other.line()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[derive(Debug)]
    struct FakeMark {
        line: Rc<Cell<usize>>,
    }
    impl Mark for FakeMark {
        fn line(&self) -> usize {
            self.line.get()
        }
        fn iter(&self) -> usize {
            0
        }
    }

    struct FakeBuffer {
        path: PathBuf,
        line: Rc<Cell<usize>>,
    }
    impl SourceBuffer for FakeBuffer {
        fn mark_at(&self, line: usize) -> Box<dyn Mark> {
            self.line.set(line);
            Box::new(FakeMark {
                line: Rc::clone(&self.line),
            })
        }
        fn path(&self) -> &Path {
            &self.path
        }
    }

    #[test]
    fn anchor_tracks_mark_after_observation() {
        let line = Rc::new(Cell::new(3));
        let buffer: Rc<dyn SourceBuffer> = Rc::new(FakeBuffer {
            path: PathBuf::from("prog.mot"),
            line: Rc::clone(&line),
        });
        let anchor = SourceAnchor::new(Rc::new(PathBuf::from("prog.mot")), &buffer, 3);
        assert_eq!(anchor.line(), 3);
        // Simulate an edit moving the mark.
        line.set(7);
        assert_eq!(anchor.line(), 7);
    }

    #[test]
    fn synthetic_anchor_has_no_mark() {
        let anchor = SourceAnchor::synthetic(Rc::new(PathBuf::from("<flash padding>")));
        assert_eq!(anchor.line(), 0);
    }

    #[test]
    fn display_is_one_based() {
        let line = Rc::new(Cell::new(0));
        let buffer: Rc<dyn SourceBuffer> = Rc::new(FakeBuffer {
            path: PathBuf::from("a.mot"),
            line: Rc::clone(&line),
        });
        let anchor = SourceAnchor::new(Rc::new(PathBuf::from("a.mot")), &buffer, 0);
        assert_eq!(format!("{}", anchor), "a.mot:1");
    }
}
