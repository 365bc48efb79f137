//! Serde adapters encoding [`Duration`] values as integer milliseconds.
//!
//! Used with `#[serde(with = "...")]` on configuration and stats structs so
//! JSON documents stay human-editable (`"delay_ms": 500`).

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serializer};

/// `Duration` <-> `u64` milliseconds.
pub mod millis {
    use super::{Deserialize, Deserializer, Duration, Serializer};

    /// Serialize a duration as whole milliseconds.
    ///
    /// # Errors
    ///
    /// Propagates serializer errors.
    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    /// Deserialize whole milliseconds into a duration.
    ///
    /// # Errors
    ///
    /// Propagates deserializer errors.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// `Option<Duration>` <-> optional `u64` milliseconds.
pub mod millis_opt {
    use super::{Deserialize, Deserializer, Duration, Serializer};

    /// Serialize an optional duration as whole milliseconds or `null`.
    ///
    /// # Errors
    ///
    /// Propagates serializer errors.
    #[allow(clippy::ref_option)]
    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
            None => serializer.serialize_none(),
        }
    }

    /// Deserialize optional whole milliseconds.
    ///
    /// # Errors
    ///
    /// Propagates deserializer errors.
    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(deserializer).map(|v| v.map(Duration::from_millis))
    }
}
