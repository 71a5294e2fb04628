use crate::types::Subdevices;
use std::time::Duration;

/// Library context settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Upper bound on each event loop poll. Also bounds how long shutdown
    /// waits for the loop to notice the stop flag.
    pub poll_timeout: Duration,
    /// Sub-devices claimed when a device is opened.
    pub subdevices: Subdevices,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_millis(10),
            subdevices: Subdevices::MOTOR | Subdevices::CAMERA,
        }
    }
}

impl Config {
    /// Defaults overridden by `FREENECT_POLL_TIMEOUT_MS` and
    /// `FREENECT_SUBDEVICES` (comma separated: `motor,camera,audio`).
    /// Unparseable values fall back to the default.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let poll_ms = read_env_u64(
            "FREENECT_POLL_TIMEOUT_MS",
            defaults.poll_timeout.as_millis() as u64,
        );
        let subdevices = read_env_string("FREENECT_SUBDEVICES")
            .and_then(|v| parse_subdevices(&v))
            .unwrap_or(defaults.subdevices);

        log::debug!(
            "Config from environment: poll_timeout={}ms subdevices={:?}",
            poll_ms,
            subdevices
        );

        Self {
            poll_timeout: Duration::from_millis(poll_ms),
            subdevices,
        }
    }
}

fn parse_subdevices(list: &str) -> Option<Subdevices> {
    let mut set = Subdevices::empty();
    for name in list.split(',').map(str::trim).filter(|n| !n.is_empty()) {
        set |= match name {
            "motor" => Subdevices::MOTOR,
            "camera" => Subdevices::CAMERA,
            "audio" => Subdevices::AUDIO,
            "all" => Subdevices::all(),
            other => {
                log::warn!(
                    "Unknown subdevice '{}' in FREENECT_SUBDEVICES (supported: motor|camera|audio|all)",
                    other
                );
                return None;
            }
        };
    }
    Some(set)
}

fn read_env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_ascii_lowercase())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_subdevices() {
        assert_eq!(
            parse_subdevices("motor, camera"),
            Some(Subdevices::MOTOR | Subdevices::CAMERA)
        );
        assert_eq!(parse_subdevices("all"), Some(Subdevices::all()));
        assert_eq!(parse_subdevices(""), Some(Subdevices::empty()));
        assert_eq!(parse_subdevices("motor,speaker"), None);
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.poll_timeout, Duration::from_millis(10));
        assert!(config.subdevices.contains(Subdevices::MOTOR));
        assert!(!config.subdevices.contains(Subdevices::AUDIO));
    }
}
