//! Keystroke filtering and parsing for the panel's numeric fields.
//!
//! Characters that cannot belong to the field are dropped as they are typed, so
//! the field never holds text that is not a (possibly partial) number.

use anyhow::{anyhow, Context, Result};

/// Keep ASCII digits and the first '.'; drop everything else.
pub fn filter_decimal(text: &str) -> String {
    let mut seen_separator = false;
    text.chars()
        .filter(|&c| {
            if c == '.' && !seen_separator {
                seen_separator = true;
                true
            } else {
                c.is_ascii_digit()
            }
        })
        .collect()
}

/// Keep ASCII digits only.
pub fn filter_integer(text: &str) -> String {
    text.chars().filter(|c| c.is_ascii_digit()).collect()
}

pub fn parse_integer(label: &str, text: &str) -> Result<u64> {
    if text.is_empty() {
        return Err(anyhow!("{label} is empty"));
    }
    text.parse::<u64>()
        .with_context(|| format!("{label} is not a valid integer: {text:?}"))
}

pub fn parse_bounded(label: &str, text: &str, min: u32, max: u32) -> Result<u32> {
    let v = parse_integer(label, text)?;
    let out_of_range = || anyhow!("{label} must be between {min} and {max} (got {v})");
    let v = u32::try_from(v).map_err(|_| out_of_range())?;
    if !(min..=max).contains(&v) {
        return Err(out_of_range());
    }
    Ok(v)
}

pub fn parse_decimal(label: &str, text: &str) -> Result<f64> {
    if text.is_empty() || text == "." {
        return Err(anyhow!("{label} is empty"));
    }
    text.parse::<f64>()
        .with_context(|| format!("{label} is not a valid number: {text:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decimal_keeps_only_first_separator() {
        assert_eq!(filter_decimal("1.2.3"), "1.23");
        assert_eq!(filter_decimal("0.032"), "0.032");
        assert_eq!(filter_decimal("a1,5e-3"), "153");
        assert_eq!(filter_decimal("..5"), ".5");
    }

    #[test]
    fn filtering_is_idempotent() {
        for input in ["1.2.3", "abc", "0.0", "12x.4.", "", "..."] {
            let once = filter_decimal(input);
            assert_eq!(filter_decimal(&once), once);
            let once = filter_integer(input);
            assert_eq!(filter_integer(&once), once);
        }
    }

    #[test]
    fn integer_drops_separators_and_signs() {
        assert_eq!(filter_integer("-12.5"), "125");
    }

    #[test]
    fn parse_reports_empty_and_range_errors() {
        assert!(parse_decimal("Energy transfer", "").is_err());
        assert!(parse_decimal("Energy transfer", ".").is_err());
        assert_eq!(parse_decimal("Energy transfer", ".5").unwrap(), 0.5);
        assert_eq!(parse_decimal("Energy transfer", "3.").unwrap(), 3.0);

        assert_eq!(parse_bounded("Map size", "125", 50, 10_000).unwrap(), 125);
        let err = parse_bounded("Map size", "10", 50, 10_000).unwrap_err();
        assert!(err.to_string().contains("between 50 and 10000"));
        assert!(parse_bounded("Map size", "99999999999", 50, 10_000).is_err());
        assert!(parse_integer("Seed", "").is_err());

        assert_eq!(
            parse_bounded("Flower width", "4294967295", 0, u32::MAX).unwrap(),
            u32::MAX
        );
        let err = parse_bounded("Flower width", "4294967296", 0, u32::MAX).unwrap_err();
        assert!(err.to_string().starts_with("Flower width must be between"));
    }
}
