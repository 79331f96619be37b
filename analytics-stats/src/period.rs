use std::str::FromStr;

use chrono::Duration;

/// Time window for a stats query. Dashboard
/// endpoints accept `{7d, 30d, 90d}`; the short windows exist for an
/// internal "all" view and are not advertised on public endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Period {
    OneHour,
    SixHours,
    TwelveHours,
    TwentyFourHours,
    SevenDays,
    ThirtyDays,
    NinetyDays,
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParsePeriodError(pub String);

impl FromStr for Period {
    type Err = ParsePeriodError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1h" => Ok(Period::OneHour),
            "6h" => Ok(Period::SixHours),
            "12h" => Ok(Period::TwelveHours),
            "24h" => Ok(Period::TwentyFourHours),
            "7d" => Ok(Period::SevenDays),
            "30d" => Ok(Period::ThirtyDays),
            "90d" => Ok(Period::NinetyDays),
            other => Err(ParsePeriodError(other.to_string())),
        }
    }
}

impl Period {
    pub const DEFAULT: Period = Period::ThirtyDays;

    pub fn as_token(&self) -> &'static str {
        match self {
            Period::OneHour => "1h",
            Period::SixHours => "6h",
            Period::TwelveHours => "12h",
            Period::TwentyFourHours => "24h",
            Period::SevenDays => "7d",
            Period::ThirtyDays => "30d",
            Period::NinetyDays => "90d",
        }
    }

    pub fn duration(&self) -> Duration {
        match self {
            Period::OneHour => Duration::hours(1),
            Period::SixHours => Duration::hours(6),
            Period::TwelveHours => Duration::hours(12),
            Period::TwentyFourHours => Duration::hours(24),
            Period::SevenDays => Duration::days(7),
            Period::ThirtyDays => Duration::days(30),
            Period::NinetyDays => Duration::days(90),
        }
    }
}

impl Default for Period {
    fn default() -> Self {
        Period::DEFAULT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_tokens() {
        assert_eq!("7d".parse(), Ok(Period::SevenDays));
        assert_eq!("30d".parse(), Ok(Period::ThirtyDays));
        assert_eq!("90d".parse(), Ok(Period::NinetyDays));
        assert_eq!("24h".parse(), Ok(Period::TwentyFourHours));
    }

    #[test]
    fn rejects_unknown_token() {
        assert!("3w".parse::<Period>().is_err());
    }

    #[test]
    fn default_is_thirty_days() {
        assert_eq!(Period::default(), Period::ThirtyDays);
    }
}
