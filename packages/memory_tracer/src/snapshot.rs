//! Point-in-time captures of live allocations and the statistics derived from them.

use std::cmp::Reverse;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::Traceback;
use crate::format::Size;

/// How allocations are grouped when computing statistics.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum GroupBy {
    /// Group by the file of the allocation site.
    File,

    /// Group by the file and line of the allocation site.
    Line,

    /// Group by the full call stack.
    Traceback,
}

impl GroupBy {
    fn key(self, traceback: &Traceback) -> Traceback {
        match self {
            Self::File => traceback.to_most_recent_file(),
            Self::Line => traceback.to_most_recent(),
            Self::Traceback => traceback.clone(),
        }
    }
}

/// One live allocation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Trace {
    size: u64,
    traceback: Traceback,
}

impl Trace {
    /// Creates a record of a live allocation of `size` bytes made from `traceback`.
    #[must_use]
    pub fn new(size: u64, traceback: Traceback) -> Self {
        Self { size, traceback }
    }

    /// Size of the allocation in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// The call stack that made the allocation.
    #[must_use]
    pub fn traceback(&self) -> &Traceback {
        &self.traceback
    }
}

/// An immutable capture of all allocations that were live at one instant.
///
/// Cloning is cheap, the traces are shared.
///
/// # Examples
///
/// ```
/// use memory_tracer::{Frame, GroupBy, Snapshot, Trace, Traceback};
///
/// let site = Traceback::new(vec![Frame::new("src/cache.rs", 40)]);
///
/// let before = Snapshot::new(vec![Trace::new(100, site.clone())], 1);
/// let after = Snapshot::new(
///     vec![Trace::new(100, site.clone()), Trace::new(400, site)],
///     1,
/// );
///
/// let diff = after.compare_to(&before, GroupBy::Line);
/// assert_eq!(diff[0].size_diff(), 400);
/// assert_eq!(diff[0].count_diff(), 1);
/// ```
#[derive(Clone, Debug)]
pub struct Snapshot {
    traces: Arc<[Trace]>,
    frame_depth: usize,
}

impl Snapshot {
    /// Creates a snapshot from the live allocations captured by a facility that recorded at
    /// most `frame_depth` frames per allocation.
    #[must_use]
    pub fn new(traces: impl Into<Arc<[Trace]>>, frame_depth: usize) -> Self {
        Self {
            traces: traces.into(),
            frame_depth,
        }
    }

    /// The live allocations.
    #[must_use]
    pub fn traces(&self) -> &[Trace] {
        &self.traces
    }

    /// Number of live allocations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.traces.len()
    }

    /// Whether no allocations were live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.traces.is_empty()
    }

    /// Total size of all live allocations in bytes.
    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.traces
            .iter()
            .fold(0_u64, |total, trace| total.saturating_add(trace.size))
    }

    /// Maximum number of frames recorded per allocation.
    #[must_use]
    pub fn frame_depth(&self) -> usize {
        self.frame_depth
    }

    /// Statistics of the live allocations, largest first.
    ///
    /// Groups with equal size are ordered by count (descending) and then by traceback
    /// (ascending by filename and line), so the order is stable between calls.
    #[must_use]
    pub fn statistics(&self, group_by: GroupBy) -> Vec<Statistic> {
        let mut statistics: Vec<Statistic> = self
            .group(group_by)
            .into_iter()
            .map(|(traceback, totals)| Statistic {
                traceback,
                size: totals.size,
                count: totals.count,
            })
            .collect();

        statistics.sort_by(|a, b| {
            (Reverse(a.size), Reverse(a.count), &a.traceback).cmp(&(
                Reverse(b.size),
                Reverse(b.count),
                &b.traceback,
            ))
        });

        statistics
    }

    /// Differences between this snapshot and an older one, largest growth first.
    ///
    /// Groups that only exist in `old` are included with a size and count of zero.
    /// Groups with equal growth are ordered by size (descending), count growth (descending)
    /// and then by traceback (ascending by filename and line).
    #[must_use]
    pub fn compare_to(&self, old: &Self, group_by: GroupBy) -> Vec<StatisticDiff> {
        let mut old_groups = old.group(group_by);

        let mut diffs: Vec<StatisticDiff> = self
            .group(group_by)
            .into_iter()
            .map(|(traceback, new)| {
                let old = old_groups.remove(&traceback).unwrap_or_default();
                StatisticDiff::between(traceback, new, old)
            })
            .collect();

        diffs.extend(
            old_groups
                .into_iter()
                .map(|(traceback, old)| StatisticDiff::between(traceback, Totals::default(), old)),
        );

        diffs.sort_by(|a, b| {
            (
                Reverse(a.size_diff),
                Reverse(a.size),
                Reverse(a.count_diff),
                &a.traceback,
            )
                .cmp(&(
                    Reverse(b.size_diff),
                    Reverse(b.size),
                    Reverse(b.count_diff),
                    &b.traceback,
                ))
        });

        diffs
    }

    fn group(&self, group_by: GroupBy) -> HashMap<Traceback, Totals> {
        let mut groups: HashMap<Traceback, Totals> = HashMap::new();

        for trace in self.traces.iter() {
            let totals = groups.entry(group_by.key(&trace.traceback)).or_default();
            totals.size = totals.size.saturating_add(trace.size);
            totals.count = totals.count.saturating_add(1);
        }

        groups
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct Totals {
    size: u64,
    count: u64,
}

fn signed_delta(new: u64, old: u64) -> i64 {
    let new = i128::from(new);
    let old = i128::from(old);

    i64::try_from(new.saturating_sub(old)).unwrap_or(if new > old { i64::MAX } else { i64::MIN })
}

/// Live allocations of one group in a snapshot.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Statistic {
    traceback: Traceback,
    size: u64,
    count: u64,
}

impl Statistic {
    /// The group the statistic describes.
    #[must_use]
    pub fn traceback(&self) -> &Traceback {
        &self.traceback
    }

    /// Total size of the live allocations in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Number of live allocations.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.count
    }
}

impl fmt::Display for Statistic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: size={}, count={}",
            self.traceback,
            Size::unsigned(self.size),
            self.count
        )?;

        if let Some(average) = Size::average(self.size, self.count) {
            write!(f, ", average={average}")?;
        }

        Ok(())
    }
}

/// The change in live allocations of one group between two snapshots.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StatisticDiff {
    traceback: Traceback,
    size: u64,
    size_diff: i64,
    count: u64,
    count_diff: i64,
}

impl StatisticDiff {
    fn between(traceback: Traceback, new: Totals, old: Totals) -> Self {
        Self {
            traceback,
            size: new.size,
            size_diff: signed_delta(new.size, old.size),
            count: new.count,
            count_diff: signed_delta(new.count, old.count),
        }
    }

    /// The group the difference describes.
    #[must_use]
    pub fn traceback(&self) -> &Traceback {
        &self.traceback
    }

    /// Total size of the live allocations in the newer snapshot, in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Growth in bytes since the older snapshot. Negative if memory was released.
    #[must_use]
    pub fn size_diff(&self) -> i64 {
        self.size_diff
    }

    /// Number of live allocations in the newer snapshot.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Growth in number of live allocations since the older snapshot.
    #[must_use]
    pub fn count_diff(&self) -> i64 {
        self.count_diff
    }
}

impl fmt::Display for StatisticDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: size={} ({}), count={} ({:+})",
            self.traceback,
            Size::unsigned(self.size),
            Size::signed(self.size_diff),
            self.count,
            self.count_diff
        )?;

        if let Some(average) = Size::average(self.size, self.count) {
            write!(f, ", average={average}")?;
        }

        Ok(())
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
#[allow(clippy::indexing_slicing, reason = "panic is fine in tests")]
mod tests {
    use super::*;
    use crate::Frame;

    fn site(filename: &str, lineno: u32) -> Traceback {
        Traceback::new(vec![Frame::new(filename, lineno), Frame::new("src/main.rs", 1)])
    }

    fn snapshot(traces: &[(u64, Traceback)]) -> Snapshot {
        Snapshot::new(
            traces
                .iter()
                .map(|(size, traceback)| Trace::new(*size, traceback.clone()))
                .collect::<Vec<_>>(),
            2,
        )
    }

    #[test]
    fn statistics_by_file_merge_lines() {
        let snapshot = snapshot(&[
            (100, site("a.rs", 1)),
            (50, site("a.rs", 2)),
            (120, site("b.rs", 9)),
        ]);

        let stats = snapshot.statistics(GroupBy::File);

        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].traceback().to_string(), "a.rs");
        assert_eq!(stats[0].size(), 150);
        assert_eq!(stats[0].count(), 2);
        assert_eq!(stats[1].traceback().to_string(), "b.rs");
        assert_eq!(stats[1].size(), 120);
    }

    #[test]
    fn statistics_by_line_keep_lines_apart() {
        let snapshot = snapshot(&[(100, site("a.rs", 1)), (50, site("a.rs", 2))]);

        let stats = snapshot.statistics(GroupBy::Line);

        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].traceback().to_string(), "a.rs:1");
        assert_eq!(stats[1].traceback().to_string(), "a.rs:2");
    }

    #[test]
    fn statistics_by_traceback_keep_callers_apart() {
        let via_main = site("a.rs", 1);
        let via_worker =
            Traceback::new(vec![Frame::new("a.rs", 1), Frame::new("src/worker.rs", 3)]);
        let snapshot = snapshot(&[(10, via_main.clone()), (30, via_worker.clone())]);

        let by_line = snapshot.statistics(GroupBy::Line);
        let by_traceback = snapshot.statistics(GroupBy::Traceback);

        assert_eq!(by_line.len(), 1);
        assert_eq!(by_traceback.len(), 2);
        assert_eq!(by_traceback[0].traceback(), &via_worker);
        assert_eq!(by_traceback[1].traceback(), &via_main);
    }

    #[test]
    fn statistics_tie_break_is_stable() {
        let snapshot = snapshot(&[
            (64, site("c.rs", 1)),
            (64, site("a.rs", 1)),
            (64, site("b.rs", 1)),
        ]);

        let order: Vec<String> = snapshot
            .statistics(GroupBy::File)
            .iter()
            .map(|stat| stat.traceback().to_string())
            .collect();

        assert_eq!(order, vec!["a.rs", "b.rs", "c.rs"]);
    }

    #[test]
    fn compare_orders_by_growth() {
        let old = snapshot(&[(100, site("a.rs", 1)), (100, site("b.rs", 1))]);
        let new = snapshot(&[
            (100, site("a.rs", 1)),
            (100, site("b.rs", 1)),
            (500, site("b.rs", 1)),
        ]);

        let diffs = new.compare_to(&old, GroupBy::File);

        assert_eq!(diffs.len(), 2);
        assert_eq!(diffs[0].traceback().to_string(), "b.rs");
        assert_eq!(diffs[0].size(), 600);
        assert_eq!(diffs[0].size_diff(), 500);
        assert_eq!(diffs[0].count(), 2);
        assert_eq!(diffs[0].count_diff(), 1);
        assert_eq!(diffs[1].size_diff(), 0);
    }

    #[test]
    fn compare_includes_released_groups() {
        let old = snapshot(&[(100, site("a.rs", 1)), (300, site("gone.rs", 4))]);
        let new = snapshot(&[(100, site("a.rs", 1))]);

        let diffs = new.compare_to(&old, GroupBy::Line);

        assert_eq!(diffs.len(), 2);
        let released = diffs.last().expect("two rows");
        assert_eq!(released.traceback().to_string(), "gone.rs:4");
        assert_eq!(released.size(), 0);
        assert_eq!(released.size_diff(), -300);
        assert_eq!(released.count(), 0);
        assert_eq!(released.count_diff(), -1);
    }

    #[test]
    fn compare_with_itself_is_flat() {
        let snapshot = snapshot(&[(100, site("a.rs", 1)), (300, site("b.rs", 4))]);

        let diffs = snapshot.compare_to(&snapshot, GroupBy::Line);

        assert!(diffs.iter().all(|diff| diff.size_diff() == 0 && diff.count_diff() == 0));
        // With no growth anywhere the larger group comes first.
        assert_eq!(diffs[0].traceback().to_string(), "b.rs:4");
    }

    #[test]
    fn statistic_display() {
        let snapshot = snapshot(&[(1000, site("a.rs", 7)), (1048, site("a.rs", 7))]);

        let stats = snapshot.statistics(GroupBy::Line);

        assert_eq!(
            stats[0].to_string(),
            "a.rs:7: size=2048 B, count=2, average=1024 B"
        );
    }

    #[test]
    fn average_keeps_fraction() {
        let snapshot = snapshot(&[(1, site("a.rs", 7)), (2, site("a.rs", 7))]);

        let stats = snapshot.statistics(GroupBy::Line);

        assert_eq!(stats[0].to_string(), "a.rs:7: size=3 B, count=2, average=2 B");
    }

    #[test]
    fn statistic_diff_display() {
        let old = snapshot(&[(20 * 1024, site("a.rs", 7))]);
        let new = snapshot(&[(20 * 1024, site("a.rs", 7)), (20 * 1024, site("a.rs", 7))]);

        let diffs = new.compare_to(&old, GroupBy::Line);

        assert_eq!(
            diffs[0].to_string(),
            "a.rs:7: size=40.0 KiB (+20.0 KiB), count=2 (+1), average=20.0 KiB"
        );
    }

    #[test]
    fn released_diff_display_has_no_average() {
        let old = snapshot(&[(300, site("a.rs", 7))]);
        let new = snapshot(&[]);

        let diffs = new.compare_to(&old, GroupBy::Line);

        assert_eq!(diffs[0].to_string(), "a.rs:7: size=0 B (-300 B), count=0 (-1)");
    }

    #[test]
    fn totals() {
        let snapshot = snapshot(&[(100, site("a.rs", 1)), (300, site("b.rs", 4))]);

        assert_eq!(snapshot.len(), 2);
        assert!(!snapshot.is_empty());
        assert_eq!(snapshot.total_size(), 400);
        assert_eq!(snapshot.frame_depth(), 2);
    }

    #[test]
    fn signed_delta_saturates() {
        assert_eq!(signed_delta(u64::MAX, 0), i64::MAX);
        assert_eq!(signed_delta(0, u64::MAX), i64::MIN);
        assert_eq!(signed_delta(5, 8), -3);
    }

    static_assertions::assert_impl_all!(Snapshot: Send, Sync);
}
