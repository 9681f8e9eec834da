use std::fmt;

/// Rows written versus rows expected for one table load.
///
/// `total_rows` comes from a raw line-count pre-scan, so it can be off when quoted fields contain
/// newlines; the percentage may then exceed 100. The counter only ever moves forward.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressCounter {
    rows_written: u64,
    total_rows: u64,
}

impl ProgressCounter {
    pub fn new(total_rows: u64) -> Self {
        Self {
            rows_written: 0,
            total_rows,
        }
    }

    pub fn with_total(rows_written: u64, total_rows: u64) -> Self {
        Self {
            rows_written,
            total_rows,
        }
    }

    pub fn advance(&mut self, rows: u64) {
        self.rows_written = self.rows_written.saturating_add(rows);
    }

    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    pub fn total_rows(&self) -> u64 {
        self.total_rows
    }

    /// Percent complete. An empty source counts as complete.
    pub fn percent(&self) -> f64 {
        if self.total_rows == 0 {
            return 100.0;
        }
        self.rows_written as f64 * 100.0 / self.total_rows as f64
    }
}

impl fmt::Display for ProgressCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} / {} ({:.2}%)",
            self.rows_written,
            self.total_rows,
            self.percent()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_two_decimals() {
        let mut p = ProgressCounter::new(12_345);
        p.advance(5_000);
        assert_eq!(p.to_string(), "5000 / 12345 (40.50%)");
        p.advance(5_000);
        assert_eq!(p.to_string(), "10000 / 12345 (81.00%)");
        p.advance(2_345);
        assert_eq!(p.to_string(), "12345 / 12345 (100.00%)");
    }

    #[test]
    fn undercounted_total_exceeds_hundred_percent() {
        let p = ProgressCounter::with_total(11, 10);
        assert_eq!(format!("{:.2}", p.percent()), "110.00");
    }

    #[test]
    fn empty_source_is_complete() {
        assert_eq!(ProgressCounter::new(0).percent(), 100.0);
    }
}
