//! Human-readable rendering of byte quantities.

use std::fmt;

const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];

/// A byte quantity rendered with a binary unit suffix, e.g. `12.3 KiB`.
///
/// Quantities below 100 in a unit larger than bytes get one decimal, anything else is
/// rendered without decimals. A unit is used as long as the quantity is below 10 240 of it.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Size {
    bytes: f64,
    signed: bool,
}

impl Size {
    #[expect(
        clippy::cast_precision_loss,
        reason = "the rendered value is rounded to at most one decimal anyway"
    )]
    pub(crate) fn unsigned(bytes: u64) -> Self {
        Self {
            bytes: bytes as f64,
            signed: false,
        }
    }

    /// The mean size of `count` blocks totalling `size` bytes, if there are any blocks.
    #[expect(
        clippy::cast_precision_loss,
        reason = "the rendered value is rounded to at most one decimal anyway"
    )]
    pub(crate) fn average(size: u64, count: u64) -> Option<Self> {
        (count != 0).then(|| Self {
            bytes: size as f64 / count as f64,
            signed: false,
        })
    }

    /// Renders the quantity with an explicit sign, for deltas.
    #[expect(
        clippy::cast_precision_loss,
        reason = "the rendered value is rounded to at most one decimal anyway"
    )]
    pub(crate) fn signed(bytes: i64) -> Self {
        Self {
            bytes: bytes as f64,
            signed: true,
        }
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut value = self.bytes;

        for (index, unit) in UNITS.iter().enumerate() {
            let is_bytes = index == 0;
            let is_last = index == UNITS.len().saturating_sub(1);

            if value.abs() < 100.0 && !is_bytes {
                return if self.signed {
                    write!(f, "{value:+.1} {unit}")
                } else {
                    write!(f, "{value:.1} {unit}")
                };
            }

            if value.abs() < 10.0 * 1024.0 || is_last {
                return if self.signed {
                    write!(f, "{value:+.0} {unit}")
                } else {
                    write!(f, "{value:.0} {unit}")
                };
            }

            value /= 1024.0;
        }

        unreachable!("the last unit always terminates the loop")
    }
}

/// Size in kibibytes, for the detailed traceback reports.
#[expect(
    clippy::cast_precision_loss,
    reason = "the value is rendered with a single decimal"
)]
pub(crate) fn kibibytes(bytes: u64) -> f64 {
    bytes as f64 / 1024.0
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn small_sizes_are_bytes() {
        assert_eq!(Size::unsigned(0).to_string(), "0 B");
        assert_eq!(Size::unsigned(512).to_string(), "512 B");
        assert_eq!(Size::unsigned(10_239).to_string(), "10239 B");
    }

    #[test]
    fn larger_sizes_switch_units() {
        assert_eq!(Size::unsigned(10_240).to_string(), "10.0 KiB");
        assert_eq!(Size::unsigned(150 * 1024).to_string(), "150 KiB");
        assert_eq!(Size::unsigned(3 * 1024 * 1024 * 1024).to_string(), "3072 MiB");
        assert_eq!(Size::unsigned(20 * 1024 * 1024 * 1024).to_string(), "20.0 GiB");
    }

    #[test]
    fn signed_sizes_carry_sign() {
        assert_eq!(Size::signed(0).to_string(), "+0 B");
        assert_eq!(Size::signed(-300).to_string(), "-300 B");
        assert_eq!(Size::signed(64 * 1024).to_string(), "+64.0 KiB");
        assert_eq!(Size::signed(-64 * 1024).to_string(), "-64.0 KiB");
    }

    #[test]
    fn huge_sizes_stay_in_largest_unit() {
        let bytes = 50_000_u64 * 1024 * 1024 * 1024 * 1024;
        assert_eq!(Size::unsigned(bytes).to_string(), "50000 TiB");
    }

    #[test]
    fn average_is_not_truncated() {
        assert_eq!(Size::average(3, 2).unwrap().to_string(), "2 B");
        assert_eq!(Size::average(1000, 3).unwrap().to_string(), "333 B");
        assert_eq!(Size::average(15 * 1024, 2).unwrap().to_string(), "7680 B");
        assert_eq!(Size::average(41 * 1024, 2).unwrap().to_string(), "20.5 KiB");
    }

    #[test]
    fn average_of_nothing_is_none() {
        assert!(Size::average(0, 0).is_none());
        assert!(Size::average(100, 0).is_none());
    }

    #[test]
    fn kibibytes_divides() {
        assert_eq!(format!("{:.1}", kibibytes(1536)), "1.5");
    }
}
