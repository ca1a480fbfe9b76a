//! Reports produced at each tracer checkpoint.

use std::collections::HashMap;
use std::{fmt, fs};

use crate::format::kibibytes;
use crate::{Statistic, StatisticDiff, Traceback};

/// A titled, ranked list of statistics, largest first.
///
/// The display form is the title followed by one ranked row per line:
///
/// ```text
/// Top current stats:
///  1: src/cache.rs: size=1032 KiB, count=1001, average=1056 B
///  2: src/main.rs: size=240 B, count=3, average=80 B
/// ```
#[derive(Clone, Debug)]
pub struct ComparisonReport<Row> {
    title: &'static str,
    rows: Vec<Row>,
}

impl<Row> ComparisonReport<Row> {
    /// Creates a report keeping at most `limit` of the given rows.
    pub(crate) fn new(title: &'static str, mut rows: Vec<Row>, limit: usize) -> Self {
        rows.truncate(limit);
        Self { title, rows }
    }

    /// Describes what the report compares.
    #[must_use]
    pub fn title(&self) -> &'static str {
        self.title
    }

    /// The rows of the report, largest first.
    #[must_use]
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Whether the report has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl<Row: fmt::Display> fmt::Display for ComparisonReport<Row> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.title)?;

        for (rank, row) in self.rows.iter().enumerate() {
            write!(f, "\n{:>2}: {row}", rank.saturating_add(1))?;
        }

        Ok(())
    }
}

/// The detailed report of one of the largest call stacks.
///
/// Each frame is followed by its line of source code, if the source file can be read.
#[derive(Clone, Debug)]
pub struct TracebackReport {
    statistic: Statistic,
    lines: Vec<String>,
}

impl TracebackReport {
    pub(crate) fn new(statistic: Statistic) -> Self {
        let lines = format_with_source(statistic.traceback());
        Self { statistic, lines }
    }

    /// The live allocations made from the call stack.
    #[must_use]
    pub fn statistic(&self) -> &Statistic {
        &self.statistic
    }
}

impl fmt::Display for TracebackReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "memory_blocks={} size_KiB={:.1}",
            self.statistic.count(),
            kibibytes(self.statistic.size())
        )?;

        for line in &self.lines {
            write!(f, "\n{line}")?;
        }

        Ok(())
    }
}

/// Formats the traceback oldest call first, adding the source line below each frame.
fn format_with_source(traceback: &Traceback) -> Vec<String> {
    let mut sources: HashMap<&str, Option<String>> = HashMap::new();
    let mut lines = Vec::new();

    for (frame, text) in traceback.frames().iter().rev().zip(traceback.format()) {
        lines.push(text);

        let source = sources
            .entry(frame.filename())
            .or_insert_with(|| fs::read_to_string(frame.filename()).ok());

        let code = source.as_deref().and_then(|source| {
            let index = usize::try_from(frame.lineno()).ok()?.checked_sub(1)?;
            source.lines().nth(index)
        });

        if let Some(code) = code.map(str::trim).filter(|code| !code.is_empty()) {
            lines.push(format!("    {code}"));
        }
    }

    lines
}

/// Everything reported by one [`MemoryTracer::update()`][crate::MemoryTracer::update].
#[derive(Clone, Debug)]
pub struct Checkpoint {
    pub(crate) cumulative: ComparisonReport<StatisticDiff>,
    pub(crate) incremental: ComparisonReport<StatisticDiff>,
    pub(crate) current: ComparisonReport<Statistic>,
    pub(crate) tracebacks: Vec<TracebackReport>,
}

impl Checkpoint {
    /// Growth since the tracer started, by file.
    #[must_use]
    pub fn cumulative(&self) -> &ComparisonReport<StatisticDiff> {
        &self.cumulative
    }

    /// Growth since the previous checkpoint, by file and line.
    #[must_use]
    pub fn incremental(&self) -> &ComparisonReport<StatisticDiff> {
        &self.incremental
    }

    /// Live allocations right now, by file.
    #[must_use]
    pub fn current(&self) -> &ComparisonReport<Statistic> {
        &self.current
    }

    /// The largest call stacks right now.
    #[must_use]
    pub fn tracebacks(&self) -> &[TracebackReport] {
        &self.tracebacks
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::{Frame, GroupBy, Snapshot, Trace, Traceback};

    fn statistics() -> Vec<Statistic> {
        let cache = Traceback::new(vec![
            Frame::new("src/cache.rs", 40),
            Frame::new("src/main.rs", 7),
        ]);
        let main = Traceback::new(vec![Frame::new("src/main.rs", 3)]);

        Snapshot::new(
            vec![
                Trace::new(2048, cache.clone()),
                Trace::new(1024, cache),
                Trace::new(100, main),
            ],
            2,
        )
        .statistics(GroupBy::Traceback)
    }

    #[test]
    fn report_ranks_rows() {
        let report = ComparisonReport::new("Top current stats", statistics(), 10);

        assert_eq!(
            report.to_string(),
            "Top current stats:\n \
             1: src/cache.rs:40: size=3072 B, count=2, average=1536 B\n \
             2: src/main.rs:3: size=100 B, count=1, average=100 B"
        );
    }

    #[test]
    fn report_truncates_rows() {
        let report = ComparisonReport::new("Top current stats", statistics(), 1);

        assert_eq!(report.rows().len(), 1);
        assert_eq!(report.title(), "Top current stats");
    }

    #[test]
    fn empty_report_is_just_title() {
        let report = ComparisonReport::<Statistic>::new("Top current stats", Vec::new(), 5);

        assert!(report.is_empty());
        assert_eq!(report.to_string(), "Top current stats:");
    }

    #[test]
    fn ranks_are_right_aligned() {
        let traceback = Traceback::new(vec![Frame::new("a.rs", 1)]);
        let traces: Vec<Trace> = (1..=10_u32)
            .map(|line| {
                Trace::new(
                    u64::from(line),
                    Traceback::new(vec![Frame::new("a.rs", line)]),
                )
            })
            .chain([Trace::new(1, traceback)])
            .collect();
        let rows = Snapshot::new(traces, 1).statistics(GroupBy::Line);

        let text = ComparisonReport::new("Top", rows, 10).to_string();

        assert!(text.contains("\n 9: "));
        assert!(text.contains("\n10: "));
    }

    #[test]
    fn traceback_report_shows_readable_source_lines() {
        let manifest = concat!(env!("CARGO_MANIFEST_DIR"), "/Cargo.toml");
        let traceback = Traceback::new(vec![
            Frame::new(manifest, 2),
            Frame::new(manifest, 0),
            Frame::new(manifest, 100_000),
        ]);
        let largest = Snapshot::new(vec![Trace::new(1024, traceback)], 3)
            .statistics(GroupBy::Traceback)
            .remove(0);

        let report = TracebackReport::new(largest);

        assert_eq!(
            report.to_string(),
            format!(
                "memory_blocks=1 size_KiB=1.0\n  \
                 File \"{manifest}\", line 100000\n  \
                 File \"{manifest}\", line 0\n  \
                 File \"{manifest}\", line 2\n    \
                 name = \"memory_tracer\""
            )
        );
    }

    #[test]
    fn traceback_report_lists_frames_oldest_first() {
        let largest = statistics().remove(0);

        let report = TracebackReport::new(largest);

        assert_eq!(
            report.to_string(),
            "memory_blocks=2 size_KiB=3.0\n  \
             File \"src/main.rs\", line 7\n  \
             File \"src/cache.rs\", line 40"
        );
    }
}
