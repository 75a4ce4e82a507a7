use crate::error::ForwarderError;

const MAX_DURATION_SECONDS: i64 = 366 * 24 * 60 * 60;

/// A half-open time interval `[from, to)` in unix seconds, describing a
/// contiguous range of `created_at` values being synced.
///
/// Windows are value types: they are created anew on each advance, never
/// mutated in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub from: i64,
    pub to: i64,
}

impl Window {
    /// Builds a window of duration `d` seconds starting at `t`.
    pub fn from_start(t: i64, d: i64) -> Result<Self, ForwarderError> {
        let w = Window { from: t, to: t + d };
        w.validate()?;
        Ok(w)
    }

    /// Builds a window of duration `d` seconds, with `from` aligned down to
    /// the nearest multiple of `d` relative to `now`.
    pub fn aligned(now: i64, d: i64) -> Result<Self, ForwarderError> {
        if d <= 0 {
            return Err(ForwarderError::ConfigInvalid(
                "window duration must be positive".into(),
            ));
        }
        let from = (now / d) * d;
        Window::from_start(from, d)
    }

    /// The next contiguous window of the same duration.
    pub fn next(&self, d: i64) -> Result<Self, ForwarderError> {
        Window::from_start(self.to, d)
    }

    pub fn duration(&self) -> i64 {
        self.to - self.from
    }

    pub fn validate(&self) -> Result<(), ForwarderError> {
        if self.from == 0 || self.to == 0 {
            return Err(ForwarderError::ConfigInvalid(
                "window endpoints must be non-zero".into(),
            ));
        }
        if self.from >= self.to {
            return Err(ForwarderError::ConfigInvalid(
                "window.from must be < window.to".into(),
            ));
        }
        let dur = self.duration();
        if dur < 1 {
            return Err(ForwarderError::ConfigInvalid(
                "window duration must be at least 1 second".into(),
            ));
        }
        if dur > MAX_DURATION_SECONDS {
            return Err(ForwarderError::ConfigInvalid(
                "window duration must be at most 1 year".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_is_contiguous_and_same_duration() {
        let w = Window::from_start(1_700_000_000, 5).unwrap();
        let n = w.next(5).unwrap();
        assert_eq!(n.from, w.to);
        assert_eq!(n.duration(), w.duration());
    }

    #[test]
    fn rejects_zero_duration() {
        let w = Window { from: 100, to: 100 };
        assert!(w.validate().is_err());
    }

    #[test]
    fn rejects_zero_endpoint() {
        let w = Window { from: 0, to: 10 };
        assert!(w.validate().is_err());
    }

    #[test]
    fn rejects_too_long_duration() {
        let w = Window {
            from: 1,
            to: 1 + MAX_DURATION_SECONDS + 1,
        };
        assert!(w.validate().is_err());
    }

    #[test]
    fn aligned_floors_to_multiple_of_d() {
        let w = Window::aligned(1_700_000_007, 5).unwrap();
        assert_eq!(w.from, 1_700_000_005);
        assert_eq!(w.to, 1_700_000_010);
    }
}
