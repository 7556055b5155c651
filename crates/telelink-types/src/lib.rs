//! Platform-agnostic thermostat values for telelink.
//!
//! This crate holds the small domain values shared by the connectivity core
//! (telelink-core) and the host service (telelink-service): the thermostat
//! [`Mode`], temperature unit conversion and setpoint payload parsing.
//!
//! # Example
//!
//! ```
//! use telelink_types::{Mode, fahrenheit_from_celsius};
//!
//! let actual = fahrenheit_from_celsius(21.1).unwrap();
//! assert_eq!(actual, 70);
//! assert_eq!(Mode::select(actual, 72), Mode::Heat);
//! ```

pub mod error;
pub mod types;

pub use error::{ParseError, ParseResult};
pub use types::{Mode, fahrenheit_from_celsius, parse_setpoint};
