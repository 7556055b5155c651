//! Thermostat values and conversions.

use core::fmt;
use core::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{ParseError, ParseResult};

/// Operating mode of the thermostat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Mode {
    /// Actual temperature is below the setpoint.
    Heat,
    /// Actual temperature is above the setpoint.
    Cool,
    /// Actual temperature equals the setpoint.
    #[default]
    Idle,
}

impl Mode {
    /// Derive the mode from the actual temperature and the setpoint.
    ///
    /// ```
    /// use telelink_types::Mode;
    ///
    /// assert_eq!(Mode::select(75, 70), Mode::Cool);
    /// assert_eq!(Mode::select(65, 70), Mode::Heat);
    /// assert_eq!(Mode::select(70, 70), Mode::Idle);
    /// ```
    #[must_use]
    pub fn select(actual: i32, setpoint: i32) -> Self {
        match actual.cmp(&setpoint) {
            core::cmp::Ordering::Greater => Mode::Cool,
            core::cmp::Ordering::Less => Mode::Heat,
            core::cmp::Ordering::Equal => Mode::Idle,
        }
    }

    /// Short uppercase label used on the display and as a publish payload.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Heat => "HEAT",
            Mode::Cool => "COOL",
            Mode::Idle => "IDLE",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "heat" => Ok(Mode::Heat),
            "cool" => Ok(Mode::Cool),
            "idle" => Ok(Mode::Idle),
            other => Err(ParseError::UnknownMode(other.to_string())),
        }
    }
}

/// Convert a Celsius reading to whole degrees Fahrenheit, rounding half up.
///
/// ```
/// use telelink_types::fahrenheit_from_celsius;
///
/// assert_eq!(fahrenheit_from_celsius(20.0).unwrap(), 68);
/// assert_eq!(fahrenheit_from_celsius(21.1).unwrap(), 70);
/// assert!(fahrenheit_from_celsius(f32::NAN).is_err());
/// ```
pub fn fahrenheit_from_celsius(celsius: f32) -> ParseResult<i32> {
    if !celsius.is_finite() {
        return Err(ParseError::InvalidTemperature(celsius.to_string()));
    }
    let fahrenheit = (f64::from(celsius) * 9.0 / 5.0 + 32.0 + 0.5).floor();
    if fahrenheit < f64::from(i32::MIN) || fahrenheit > f64::from(i32::MAX) {
        return Err(ParseError::InvalidTemperature(celsius.to_string()));
    }
    Ok(fahrenheit as i32)
}

/// Parse a setpoint payload: a whole number of degrees Fahrenheit as text.
///
/// Surrounding whitespace is ignored.
pub fn parse_setpoint(payload: &[u8]) -> ParseResult<i32> {
    let text = core::str::from_utf8(payload).map_err(|_| ParseError::NotUtf8)?;
    let text = text.trim();
    text.parse::<i32>()
        .map_err(|_| ParseError::InvalidValue(format!("'{}' is not a whole number", text)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_mode_select() {
        assert_eq!(Mode::select(71, 70), Mode::Cool);
        assert_eq!(Mode::select(69, 70), Mode::Heat);
        assert_eq!(Mode::select(70, 70), Mode::Idle);
    }

    #[test]
    fn test_mode_display_and_parse() {
        for mode in [Mode::Heat, Mode::Cool, Mode::Idle] {
            assert_eq!(mode.to_string().parse::<Mode>().unwrap(), mode);
        }
        assert_eq!(" cool ".parse::<Mode>().unwrap(), Mode::Cool);
        assert!(matches!(
            "auto".parse::<Mode>(),
            Err(ParseError::UnknownMode(_))
        ));
    }

    #[test]
    fn test_mode_serde() {
        let json = serde_json::to_string(&Mode::Heat).unwrap();
        assert_eq!(json, "\"heat\"");
        let mode: Mode = serde_json::from_str("\"idle\"").unwrap();
        assert_eq!(mode, Mode::Idle);
    }

    #[test]
    fn test_fahrenheit_rounding() {
        assert_eq!(fahrenheit_from_celsius(0.0).unwrap(), 32);
        assert_eq!(fahrenheit_from_celsius(100.0).unwrap(), 212);
        // 20.28C = 68.504F -> 69
        assert_eq!(fahrenheit_from_celsius(20.28).unwrap(), 69);
        // -40 is the same in both scales
        assert_eq!(fahrenheit_from_celsius(-40.0).unwrap(), -40);
    }

    #[test]
    fn test_fahrenheit_rejects_non_finite() {
        assert!(fahrenheit_from_celsius(f32::INFINITY).is_err());
        assert!(fahrenheit_from_celsius(f32::NEG_INFINITY).is_err());
        assert!(fahrenheit_from_celsius(f32::NAN).is_err());
    }

    #[test]
    fn test_parse_setpoint() {
        assert_eq!(parse_setpoint(b"72").unwrap(), 72);
        assert_eq!(parse_setpoint(b"  65\n").unwrap(), 65);
        assert_eq!(parse_setpoint(b"-3").unwrap(), -3);
        assert!(matches!(
            parse_setpoint(b"warm"),
            Err(ParseError::InvalidValue(_))
        ));
        assert_eq!(parse_setpoint(&[0xff, 0xfe]), Err(ParseError::NotUtf8));
    }

    proptest! {
        #[test]
        fn prop_fahrenheit_within_half_degree(c in -100.0f32..150.0) {
            let f = fahrenheit_from_celsius(c).unwrap();
            let exact = f64::from(c) * 9.0 / 5.0 + 32.0;
            prop_assert!((f as f64 - exact).abs() <= 0.5 + 1e-6);
        }

        #[test]
        fn prop_mode_matches_ordering(actual in -50i32..150, setpoint in -50i32..150) {
            let mode = Mode::select(actual, setpoint);
            prop_assert_eq!(mode == Mode::Idle, actual == setpoint);
            prop_assert_eq!(mode == Mode::Cool, actual > setpoint);
        }
    }
}
