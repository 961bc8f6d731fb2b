//! Rep scheme parsing.
//!
//! Schemes are free-form strings entered by the user. Accepted shapes:
//! `3x10`, `3 x 8-12`, `4×30s`, `3x45 sec`, `3 sets of 12`, `12`, `30s`.
//! Anything unrecognised parses to an empty scheme.

/// Parsed form of a rep scheme
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RepScheme {
    pub sets: Option<u32>,
    /// Reps per set, or seconds when `timed`
    pub reps: Option<u32>,
    pub timed: bool,
}

impl RepScheme {
    pub fn parse(raw: &str) -> Self {
        let lowered = raw.trim().to_lowercase();
        if lowered.is_empty() {
            return Self::default();
        }

        let timed = is_timed_suffix(&lowered);

        // "3x10", "3 × 10", "3 sets of 10"
        let split = lowered
            .split_once('x')
            .or_else(|| lowered.split_once('×'))
            .or_else(|| lowered.split_once("sets of"))
            .or_else(|| lowered.split_once("set of"));

        match split {
            Some((left, right)) => {
                let sets = leading_number(left.trim()).filter(|n| *n > 0);
                let reps = leading_number(right.trim());
                if sets.is_none() && reps.is_none() {
                    tracing::debug!("Unrecognised rep scheme '{}'", raw);
                }
                Self { sets, reps, timed }
            }
            None => Self {
                sets: None,
                reps: leading_number(&lowered),
                timed,
            },
        }
    }

    /// Duration in seconds, only for timed schemes
    pub fn duration(&self) -> Option<u32> {
        if self.timed {
            self.reps.filter(|r| *r > 0)
        } else {
            None
        }
    }
}

fn is_timed_suffix(s: &str) -> bool {
    let trimmed = s.trim_end();
    ["s", "sec", "secs", "second", "seconds"]
        .iter()
        .any(|suffix| {
            trimmed
                .strip_suffix(suffix)
                .and_then(|rest| rest.trim_end().chars().last())
                .is_some_and(|c| c.is_ascii_digit())
        })
}

/// Parse the first run of ASCII digits, e.g. `8` from `8-12`
fn leading_number(s: &str) -> Option<u32> {
    let digits: String = s
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sets_by_reps() {
        let scheme = RepScheme::parse("3x10");
        assert_eq!(scheme.sets, Some(3));
        assert_eq!(scheme.reps, Some(10));
        assert!(!scheme.timed);
        assert_eq!(scheme.duration(), None);
    }

    #[test]
    fn test_spacing_and_ranges() {
        let scheme = RepScheme::parse(" 4 X 8-12 ");
        assert_eq!(scheme.sets, Some(4));
        assert_eq!(scheme.reps, Some(8));

        let scheme = RepScheme::parse("3 sets of 12");
        assert_eq!(scheme.sets, Some(3));
        assert_eq!(scheme.reps, Some(12));
    }

    #[test]
    fn test_timed_schemes() {
        let scheme = RepScheme::parse("4x30s");
        assert_eq!(scheme.sets, Some(4));
        assert_eq!(scheme.duration(), Some(30));

        let scheme = RepScheme::parse("3×45 sec");
        assert_eq!(scheme.sets, Some(3));
        assert_eq!(scheme.duration(), Some(45));

        let scheme = RepScheme::parse("60 seconds");
        assert_eq!(scheme.sets, None);
        assert_eq!(scheme.duration(), Some(60));
    }

    #[test]
    fn test_reps_only_and_garbage() {
        let scheme = RepScheme::parse("12");
        assert_eq!(scheme.sets, None);
        assert_eq!(scheme.reps, Some(12));

        assert_eq!(RepScheme::parse("AMRAP"), RepScheme::default());
        assert_eq!(RepScheme::parse(""), RepScheme::default());
        assert_eq!(RepScheme::parse("0x10").sets, None);
    }
}
