//! Expiry inputs for signed tokens.

use chrono::{DateTime, Utc};

use common::{CryptoError, Result};

/// When a signed token stops being valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpireTime {
    At(DateTime<Utc>),
    /// Milliseconds since the Unix epoch.
    EpochMillis(i64),
    /// One or more `[+|-]N unit` terms, e.g. `"+2 seconds"` or `"1 day -30 min"`.
    Relative(String),
}

impl ExpireTime {
    /// Normalise to epoch milliseconds, resolving relative input against `now`.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidArgument`] for an unparseable relative
    /// string or an offset that overflows.
    pub fn to_epoch_millis(&self, now: DateTime<Utc>) -> Result<i64> {
        match self {
            ExpireTime::At(at) => Ok(at.timestamp_millis()),
            ExpireTime::EpochMillis(ms) => Ok(*ms),
            ExpireTime::Relative(text) => {
                let offset = parse_relative_millis(text)?;
                now.timestamp_millis()
                    .checked_add(offset)
                    .ok_or_else(|| CryptoError::InvalidArgument(format!("expiry `{text}` overflows")))
            }
        }
    }
}

impl From<DateTime<Utc>> for ExpireTime {
    fn from(at: DateTime<Utc>) -> Self {
        ExpireTime::At(at)
    }
}

impl From<&str> for ExpireTime {
    fn from(text: &str) -> Self {
        ExpireTime::Relative(text.to_owned())
    }
}

/// Parse a relative duration into signed milliseconds.
pub fn parse_relative_millis(input: &str) -> Result<i64> {
    let invalid = || CryptoError::InvalidArgument(format!("invalid relative time `{input}`"));

    let mut tokens = input.split_whitespace();
    let mut total: i64 = 0;
    let mut terms = 0;

    while let Some(token) = tokens.next() {
        let split = token
            .char_indices()
            .find(|&(i, c)| !(c.is_ascii_digit() || (i == 0 && (c == '+' || c == '-'))))
            .map_or(token.len(), |(i, _)| i);
        let (amount, inline_unit) = token.split_at(split);
        let unit = if inline_unit.is_empty() {
            tokens.next().ok_or_else(invalid)?
        } else {
            inline_unit
        };

        let amount: i64 = amount.parse().map_err(|_| invalid())?;
        let step = amount.checked_mul(unit_millis(unit).ok_or_else(invalid)?).ok_or_else(invalid)?;
        total = total.checked_add(step).ok_or_else(invalid)?;
        terms += 1;
    }

    if terms == 0 {
        return Err(invalid());
    }
    Ok(total)
}

fn unit_millis(unit: &str) -> Option<i64> {
    let ms = match unit.to_ascii_lowercase().as_str() {
        "ms" | "msec" | "millisecond" | "milliseconds" => 1,
        "s" | "sec" | "secs" | "second" | "seconds" => 1_000,
        "min" | "mins" | "minute" | "minutes" => 60_000,
        "h" | "hour" | "hours" => 3_600_000,
        "day" | "days" => 86_400_000,
        "week" | "weeks" => 604_800_000,
        _ => return None,
    };
    Some(ms)
}

pub(crate) fn now() -> DateTime<Utc> {
    Utc::now()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn relative_terms() {
        assert_eq!(parse_relative_millis("+2 seconds").unwrap(), 2_000);
        assert_eq!(parse_relative_millis("1 day -30 min").unwrap(), 86_400_000 - 1_800_000);
        assert_eq!(parse_relative_millis("-500ms").unwrap(), -500);
        assert_eq!(parse_relative_millis("3 WEEKS").unwrap(), 3 * 604_800_000);
    }

    #[test]
    fn bad_relative_input() {
        for bad in ["", "soon", "+2", "2 fortnights", "++2 sec", "9223372036854775807 weeks"] {
            let err = parse_relative_millis(bad).unwrap_err();
            assert!(matches!(err, CryptoError::InvalidArgument(_)), "{bad:?}");
        }
    }

    #[test]
    fn all_forms_normalise_to_millis() {
        let now = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
        assert_eq!(ExpireTime::from(now).to_epoch_millis(now).unwrap(), 1_700_000_000_000);
        assert_eq!(ExpireTime::EpochMillis(5).to_epoch_millis(now).unwrap(), 5);
        assert_eq!(
            ExpireTime::from("+1 hour").to_epoch_millis(now).unwrap(),
            1_700_000_000_000 + 3_600_000
        );
    }
}
