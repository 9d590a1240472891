//! Serde helpers shared by the configuration types

/// Duration stored as seconds.
///
/// Whole durations are written as integers; fractional seconds are
/// accepted on input (`heartbeat_timeout = 0.5`) and written back as floats.
///
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct Config {
///     #[serde(with = "ax_core::config::serde_utils::duration_secs")]
///     timeout: Duration,
/// }
/// ```
pub mod duration_secs {
    use serde::{self, de::Error, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_nanos() == 0 {
            serializer.serialize_u64(duration.as_secs())
        } else {
            serializer.serialize_f64(duration.as_secs_f64())
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Timeouts {
        #[serde(with = "duration_secs")]
        timeout: Duration,
    }

    #[test]
    fn test_whole_seconds_stay_integers() {
        let json = serde_json::to_string(&Timeouts {
            timeout: Duration::from_secs(30),
        })
        .unwrap();
        assert_eq!(json, r#"{"timeout":30}"#);
    }

    #[test]
    fn test_fractional_seconds() {
        let parsed: Timeouts = serde_json::from_str(r#"{"timeout":0.25}"#).unwrap();
        assert_eq!(parsed.timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_negative_rejected() {
        assert!(serde_json::from_str::<Timeouts>(r#"{"timeout":-1}"#).is_err());
    }
}
