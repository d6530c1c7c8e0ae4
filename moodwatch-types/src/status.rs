//! Directional status and the change classifier.

use core::fmt;
use core::str::FromStr;

/// Direction of a sample relative to the previously accepted value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Status {
    Up,
    Down,
    Same,
}

impl Status {
    /// The lowercase name used on the wire and in the store.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Status::Up => "up",
            Status::Down => "down",
            Status::Same => "same",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string is not one of `up`, `down` or `same`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStatus(pub String);

impl fmt::Display for UnknownStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown status '{}'", self.0)
    }
}

impl std::error::Error for UnknownStatus {}

impl FromStr for Status {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "up" => Ok(Status::Up),
            "down" => Ok(Status::Down),
            "same" => Ok(Status::Same),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// Classify `current` against the previous reference value.
///
/// With no reference the status is always [`Status::Same`].
pub fn classify(previous: Option<f64>, current: f64) -> Status {
    match previous {
        Some(prev) if current > prev => Status::Up,
        Some(prev) if current < prev => Status::Down,
        _ => Status::Same,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_reference_is_same() {
        for x in [0.0, 50.0, -3.5, 1e9] {
            assert_eq!(classify(None, x), Status::Same);
        }
    }

    #[test]
    fn equal_is_same() {
        assert_eq!(classify(Some(52.4), 52.4), Status::Same);
    }

    #[test]
    fn direction() {
        assert_eq!(classify(Some(50.0), 55.0), Status::Up);
        assert_eq!(classify(Some(50.0), 49.99), Status::Down);
    }

    #[test]
    fn test_status_parse() {
        assert_eq!("up".parse::<Status>().unwrap(), Status::Up);
        assert_eq!("down".parse::<Status>().unwrap(), Status::Down);
        assert_eq!("same".parse::<Status>().unwrap(), Status::Same);
        assert!("UP".parse::<Status>().is_err());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Status::Down).unwrap(), "\"down\"");
    }
}
