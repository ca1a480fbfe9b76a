//! Call stacks attributed to allocations.

use std::fmt;
use std::sync::Arc;

/// Filename used for frames whose source location could not be determined.
pub const UNKNOWN_FILENAME: &str = "<unknown>";

/// A single source location in a call stack.
///
/// A line number of zero means the line is not known or not relevant (e.g. when
/// allocations are grouped by file) and is omitted from the display form.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Frame {
    filename: Arc<str>,
    lineno: u32,
}

impl Frame {
    /// Creates a frame pointing at the given source location.
    #[must_use]
    pub fn new(filename: impl Into<Arc<str>>, lineno: u32) -> Self {
        Self {
            filename: filename.into(),
            lineno,
        }
    }

    /// A frame whose source location is unknown.
    #[must_use]
    pub fn unknown() -> Self {
        Self::new(UNKNOWN_FILENAME, 0)
    }

    /// The source file of the frame.
    #[must_use]
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// The line number within the source file, zero if unknown.
    #[must_use]
    pub fn lineno(&self) -> u32 {
        self.lineno
    }

    /// The same file without any line information.
    pub(crate) fn without_line(&self) -> Self {
        Self {
            filename: Arc::clone(&self.filename),
            lineno: 0,
        }
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.lineno == 0 {
            write!(f, "{}", self.filename)
        } else {
            write!(f, "{}:{}", self.filename, self.lineno)
        }
    }
}

/// The call stack that led to an allocation, most recent call first.
///
/// Cloning is cheap, the frames are shared.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Traceback {
    frames: Arc<[Frame]>,
}

impl Traceback {
    /// Creates a traceback from frames ordered most recent call first.
    #[must_use]
    pub fn new(frames: impl Into<Arc<[Frame]>>) -> Self {
        Self {
            frames: frames.into(),
        }
    }

    /// The frames, most recent call first.
    #[must_use]
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// The most recent frame, i.e. the allocation site.
    #[must_use]
    pub fn most_recent(&self) -> Option<&Frame> {
        self.frames.first()
    }

    /// Formats the traceback one line per frame, oldest call first.
    ///
    /// # Examples
    ///
    /// ```
    /// use memory_tracer::{Frame, Traceback};
    ///
    /// let traceback = Traceback::new(vec![Frame::new("src/cache.rs", 40), Frame::new("src/main.rs", 7)]);
    ///
    /// assert_eq!(
    ///     traceback.format(),
    ///     vec![
    ///         r#"  File "src/main.rs", line 7"#.to_string(),
    ///         r#"  File "src/cache.rs", line 40"#.to_string(),
    ///     ]
    /// );
    /// ```
    #[must_use]
    pub fn format(&self) -> Vec<String> {
        self.frames
            .iter()
            .rev()
            .map(|frame| format!("  File \"{}\", line {}", frame.filename, frame.lineno))
            .collect()
    }

    /// Keeps only the most recent frame.
    pub(crate) fn to_most_recent(&self) -> Self {
        Self::new(vec![self.most_recent().cloned().unwrap_or_else(Frame::unknown)])
    }

    /// Keeps only the file of the most recent frame.
    pub(crate) fn to_most_recent_file(&self) -> Self {
        let frame = self
            .most_recent()
            .map_or_else(Frame::unknown, Frame::without_line);
        Self::new(vec![frame])
    }
}

impl fmt::Display for Traceback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.most_recent() {
            Some(frame) => write!(f, "{frame}"),
            None => write!(f, "{UNKNOWN_FILENAME}"),
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn frame_display_omits_zero_line() {
        assert_eq!(Frame::new("src/lib.rs", 12).to_string(), "src/lib.rs:12");
        assert_eq!(Frame::new("src/lib.rs", 0).to_string(), "src/lib.rs");
    }

    #[test]
    fn traceback_displays_most_recent_frame() {
        let traceback = Traceback::new(vec![Frame::new("a.rs", 1), Frame::new("b.rs", 2)]);
        assert_eq!(traceback.to_string(), "a.rs:1");
    }

    #[test]
    fn empty_traceback_is_unknown() {
        let traceback = Traceback::new(Vec::new());

        assert_eq!(traceback.to_string(), "<unknown>");
        assert_eq!(traceback.to_most_recent_file().frames(), &[Frame::unknown()]);
    }

    #[test]
    fn grouping_keys_drop_detail() {
        let traceback = Traceback::new(vec![Frame::new("a.rs", 1), Frame::new("b.rs", 2)]);

        assert_eq!(traceback.to_most_recent().frames(), &[Frame::new("a.rs", 1)]);
        assert_eq!(
            traceback.to_most_recent_file().frames(),
            &[Frame::new("a.rs", 0)]
        );
    }

    #[test]
    fn tracebacks_order_by_filename_then_line() {
        let a10 = Traceback::new(vec![Frame::new("a.rs", 10)]);
        let a2 = Traceback::new(vec![Frame::new("a.rs", 2)]);
        let b1 = Traceback::new(vec![Frame::new("b.rs", 1)]);

        let mut sorted = vec![b1.clone(), a10.clone(), a2.clone()];
        sorted.sort();

        assert_eq!(sorted, vec![a2, a10, b1]);
    }

    static_assertions::assert_impl_all!(Traceback: Send, Sync);
}
