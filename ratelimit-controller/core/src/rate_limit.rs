use std::fmt;

/// The window over which `requests_per_unit` is counted.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Unit {
    #[default]
    Unknown,
    Second,
    Minute,
    Hour,
    Day,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct RateLimit {
    pub requests_per_unit: u32,
    pub unit: Unit,
}

// === impl Unit ===

impl Unit {
    /// Parses a unit name, ignoring case.
    ///
    /// Unrecognized names are never rejected: they are logged and map to
    /// [`Unit::Unknown`] so that a single malformed policy does not block the
    /// rest of the configuration.
    pub fn parse(name: &str) -> Self {
        match name.to_ascii_uppercase().as_str() {
            "SECOND" => Self::Second,
            "MINUTE" => Self::Minute,
            "HOUR" => Self::Hour,
            "DAY" => Self::Day,
            _ => {
                tracing::error!(unit = %name, "Unknown rate limit unit, defaulting to UNKNOWN");
                Self::Unknown
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "UNKNOWN",
            Self::Second => "SECOND",
            Self::Minute => "MINUTE",
            Self::Hour => "HOUR",
            Self::Day => "DAY",
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// === impl RateLimit ===

impl RateLimit {
    pub fn new(requests_per_unit: u32, unit: Unit) -> Self {
        Self {
            requests_per_unit,
            unit,
        }
    }

    /// Builds a rate limit from an unvalidated unit name. See [`Unit::parse`].
    pub fn parse(requests_per_unit: u32, unit: &str) -> Self {
        Self::new(requests_per_unit, Unit::parse(unit))
    }
}

impl fmt::Display for RateLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.requests_per_unit, self.unit)
    }
}
