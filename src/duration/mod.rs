//! Human-readable duration strings: `"1h30m"`, `"2d"`, `"1 week 3 days"`.
//!
//! A duration string is scanned left to right for `<integer><unit>` pairs.
//! Whitespace may separate the number from its unit, unit tokens are
//! case-insensitive, and every unit accepts several aliases:
//!
//! | Unit   | Aliases                                   | Length          |
//! |--------|-------------------------------------------|-----------------|
//! | second | `s`, `sec`, `secs`, `second`, `seconds`   | 1 000 ms        |
//! | minute | `m`, `min`, `mins`, `minute`, `minutes`   | 60 s            |
//! | hour   | `h`, `hr`, `hrs`, `hour`, `hours`         | 3 600 s         |
//! | day    | `d`, `day`, `days`                        | 86 400 s        |
//! | week   | `w`, `wk`, `wks`, `week`, `weeks`         | 7 d             |
//! | month  | `mo`, `mon`, `month`, `months`            | 30 d (fixed)    |
//!
//! Parsing never fails. Anything that is not a recognized pair (separators,
//! unknown units, numbers without a unit) contributes nothing, so a string
//! with no recognized pair is the empty duration: [`parse`] yields
//! [`Duration::ZERO`] and [`render`] yields `""`.
//!
//! # Examples
//!
//! ```
//! use std::time::Duration;
//! use rttp_cache::duration;
//!
//! assert_eq!(duration::parse("1h30m"), Duration::from_secs(5_400));
//! assert_eq!(duration::render("1h30m"), "1 hour 30 minutes");
//! assert_eq!(duration::parse("5x"), Duration::ZERO);
//! ```

use std::fmt;
use std::time::Duration;

/// A calendar-agnostic unit of time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Unit {
    Second,
    Minute,
    Hour,
    Day,
    Week,
    /// Always 30 days.
    Month,
}

impl Unit {
    /// Maps a unit token (any case) to its unit, or `None` for unknown tokens.
    pub fn from_token(token: &str) -> Option<Self> {
        let unit = match token.to_ascii_lowercase().as_str() {
            "s" | "sec" | "secs" | "second" | "seconds" => Self::Second,
            "m" | "min" | "mins" | "minute" | "minutes" => Self::Minute,
            "h" | "hr" | "hrs" | "hour" | "hours" => Self::Hour,
            "d" | "day" | "days" => Self::Day,
            "w" | "wk" | "wks" | "week" | "weeks" => Self::Week,
            "mo" | "mon" | "month" | "months" => Self::Month,
            _ => return None,
        };
        Some(unit)
    }

    /// Length of one unit in milliseconds.
    pub fn millis(self) -> u64 {
        const SECOND: u64 = 1_000;
        const DAY: u64 = 86_400 * SECOND;
        match self {
            Self::Second => SECOND,
            Self::Minute => 60 * SECOND,
            Self::Hour => 3_600 * SECOND,
            Self::Day => DAY,
            Self::Week => 7 * DAY,
            Self::Month => 30 * DAY,
        }
    }

    /// Singular label used when rendering.
    pub fn label(self) -> &'static str {
        match self {
            Self::Second => "second",
            Self::Minute => "minute",
            Self::Hour => "hour",
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
        }
    }
}

/// The ordered `(quantity, unit)` pairs found in a duration string.
///
/// Units may repeat (`"1h 1h"` is two hours). A `DurationSpec` is a plain
/// value: parse it again whenever the source string is needed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DurationSpec {
    parts: Vec<(u64, Unit)>,
}

impl DurationSpec {
    /// Scans `input` for `<integer><unit>` pairs.
    ///
    /// Digit runs that overflow `u64` or are not followed by a known unit
    /// token are skipped.
    pub fn parse(input: &str) -> Self {
        let bytes = input.as_bytes();
        let mut parts = Vec::new();
        let mut pos = 0;

        while pos < bytes.len() {
            if !bytes[pos].is_ascii_digit() {
                pos += 1;
                continue;
            }

            let digits_start = pos;
            while pos < bytes.len() && bytes[pos].is_ascii_digit() {
                pos += 1;
            }
            let quantity = input[digits_start..pos].parse::<u64>().ok();

            let mut token_start = pos;
            while token_start < bytes.len() && bytes[token_start].is_ascii_whitespace() {
                token_start += 1;
            }
            let mut token_end = token_start;
            while token_end < bytes.len() && bytes[token_end].is_ascii_alphabetic() {
                token_end += 1;
            }

            // An unknown token is still consumed; it can never start a pair.
            if token_end > token_start {
                if let (Some(quantity), Some(unit)) =
                    (quantity, Unit::from_token(&input[token_start..token_end]))
                {
                    parts.push((quantity, unit));
                }
                pos = token_end;
            }
        }

        Self { parts }
    }

    /// The pairs in source order.
    pub fn parts(&self) -> &[(u64, Unit)] {
        &self.parts
    }

    /// Returns `true` if no recognized pair was found.
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Sum of all pairs. Saturates instead of overflowing.
    pub fn total(&self) -> Duration {
        let millis = self.parts.iter().fold(0u64, |acc, &(quantity, unit)| {
            acc.saturating_add(quantity.saturating_mul(unit.millis()))
        });
        Duration::from_millis(millis)
    }
}

impl fmt::Display for DurationSpec {
    /// Writes `"<n> <label>"` segments separated by single spaces,
    /// pluralizing the label when `n != 1`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (quantity, unit)) in self.parts.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            let plural = if *quantity == 1 { "" } else { "s" };
            write!(f, "{quantity} {}{plural}", unit.label())?;
        }
        Ok(())
    }
}

/// Total duration described by `input`. Never fails.
pub fn parse(input: &str) -> Duration {
    DurationSpec::parse(input).total()
}

/// Human-readable form of `input`, e.g. `"2d 1h"` → `"2 days 1 hour"`.
pub fn render(input: &str) -> String {
    DurationSpec::parse(input).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR_MS: u128 = 3_600_000;
    const DAY_MS: u128 = 86_400_000;

    #[test]
    fn empty_and_garbage_are_zero() {
        assert_eq!(parse(""), Duration::ZERO);
        assert_eq!(parse("garbage"), Duration::ZERO);
        assert_eq!(parse("5x"), Duration::ZERO);
        assert_eq!(parse("42"), Duration::ZERO);
    }

    #[test]
    fn single_units() {
        assert_eq!(parse("1s").as_millis(), 1_000);
        assert_eq!(parse("1h").as_millis(), HOUR_MS);
        assert_eq!(parse("2d").as_millis(), 2 * DAY_MS);
        assert_eq!(parse("1month").as_millis(), 30 * DAY_MS);
        assert_eq!(parse("1w").as_millis(), 7 * DAY_MS);
    }

    #[test]
    fn compound_units_are_summed() {
        assert_eq!(parse("1w2d3h").as_millis(), 9 * DAY_MS + 3 * HOUR_MS);
        assert_eq!(parse("1h30m").as_millis(), HOUR_MS + 30 * 60_000);
    }

    #[test]
    fn repeated_units_accumulate() {
        assert_eq!(parse("1h 1h").as_millis(), 2 * HOUR_MS);
    }

    #[test]
    fn aliases_and_case() {
        for token in ["s", "sec", "SECS", "Second", "seconds"] {
            assert_eq!(parse(&format!("3{token}")), Duration::from_secs(3), "{token}");
        }
        assert_eq!(parse("2 HOURS"), Duration::from_secs(7_200));
        assert_eq!(parse("1mo"), parse("30d"));
        assert_eq!(parse("1 min"), Duration::from_secs(60));
    }

    #[test]
    fn separators_are_skipped() {
        assert_eq!(parse("1h, 30m; 15s"), Duration::from_secs(3_600 + 1_800 + 15));
    }

    #[test]
    fn unknown_units_do_not_swallow_neighbours() {
        assert_eq!(parse("5x 2m"), Duration::from_secs(120));
        assert_eq!(parse("1h5parsecs"), Duration::from_secs(3_600));
    }

    #[test]
    fn concatenation_is_additive() {
        let cases = [("1h", "30m"), ("2d", "1w"), ("1month", "12s"), ("", "4h")];
        for (a, b) in cases {
            assert_eq!(parse(&format!("{a}{b}")), parse(a) + parse(b), "{a} + {b}");
        }
    }

    #[test]
    fn overflow_saturates() {
        let huge = format!("{}w", u64::MAX);
        assert_eq!(parse(&huge), Duration::from_millis(u64::MAX));
    }

    #[test]
    fn render_pluralizes_in_source_order() {
        assert_eq!(render("1h30m"), "1 hour 30 minutes");
        assert_eq!(render("30m1h"), "30 minutes 1 hour");
        assert_eq!(render("1d"), "1 day");
        assert_eq!(render("2weeks 1 month"), "2 weeks 1 month");
        assert_eq!(render("0s"), "0 seconds");
    }

    #[test]
    fn render_drops_unrecognized_pairs() {
        assert_eq!(render("5x 1h"), "1 hour");
        assert_eq!(render("garbage"), "");
    }

    #[test]
    fn rendered_output_parses_back() {
        let input = "2d4h10m";
        assert_eq!(parse(&render(input)), parse(input));
    }

    #[test]
    fn spec_exposes_parts() {
        let spec = DurationSpec::parse("1h 2d");
        assert_eq!(spec.parts(), &[(1, Unit::Hour), (2, Unit::Day)]);
        assert!(!spec.is_empty());
        assert!(DurationSpec::parse("soon").is_empty());
    }
}
