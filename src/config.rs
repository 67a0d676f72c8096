use std::path::PathBuf;
use std::str::FromStr;

pub const DEFAULT_BIND: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 5433;
pub const DEFAULT_DATA_DIR: &str = "./data";
pub const DEFAULT_MAX_CONNECTIONS: usize = 256;
pub const DEFAULT_COMPACT_THRESHOLD: u64 = 1000;

/// Server settings, read once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var}: cannot parse {value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any variable source; `from_env` passes the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let max_connections =
            parse_var(&lookup, "ADSPACE_MAX_CONNECTIONS")?.unwrap_or(DEFAULT_MAX_CONNECTIONS);
        if max_connections == 0 {
            return Err(ConfigError::Zero("ADSPACE_MAX_CONNECTIONS"));
        }

        Ok(Self {
            bind: lookup("ADSPACE_BIND").unwrap_or_else(|| DEFAULT_BIND.into()),
            port: parse_var(&lookup, "ADSPACE_PORT")?.unwrap_or(DEFAULT_PORT),
            data_dir: lookup("ADSPACE_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR)),
            max_connections,
            compact_threshold: parse_var(&lookup, "ADSPACE_COMPACT_THRESHOLD")?
                .unwrap_or(DEFAULT_COMPACT_THRESHOLD),
            metrics_port: parse_var(&lookup, "ADSPACE_METRICS_PORT")?,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("adspace.wal")
    }
}

fn parse_var<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::Invalid {
                var,
                reason: e.to_string(),
                value,
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|var| map.get(var).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.bind, "0.0.0.0");
        assert_eq!(config.port, 5433);
        assert_eq!(config.data_dir, PathBuf::from("./data"));
        assert_eq!(config.max_connections, 256);
        assert_eq!(config.compact_threshold, 1000);
        assert_eq!(config.metrics_port, None);
        assert_eq!(config.addr(), "0.0.0.0:5433");
        assert_eq!(config.wal_path(), PathBuf::from("./data/adspace.wal"));
    }

    #[test]
    fn overrides_apply() {
        let config = config_from(&[
            ("ADSPACE_BIND", "127.0.0.1"),
            ("ADSPACE_PORT", "6000"),
            ("ADSPACE_DATA_DIR", "/var/lib/adspace"),
            ("ADSPACE_MAX_CONNECTIONS", "8"),
            ("ADSPACE_COMPACT_THRESHOLD", "50"),
            ("ADSPACE_METRICS_PORT", "9100"),
        ])
        .unwrap();
        assert_eq!(config.addr(), "127.0.0.1:6000");
        assert_eq!(config.max_connections, 8);
        assert_eq!(config.compact_threshold, 50);
        assert_eq!(config.metrics_port, Some(9100));
        assert_eq!(config.wal_path(), PathBuf::from("/var/lib/adspace/adspace.wal"));
    }

    #[test]
    fn unparseable_number_is_an_error() {
        let err = config_from(&[("ADSPACE_PORT", "fifty")]).unwrap_err();
        match err {
            ConfigError::Invalid { var, value, .. } => {
                assert_eq!(var, "ADSPACE_PORT");
                assert_eq!(value, "fifty");
            }
            other => panic!("expected Invalid, got {other:?}"),
        }
        assert!(config_from(&[("ADSPACE_METRICS_PORT", "70000")]).is_err());
    }

    #[test]
    fn zero_connections_rejected() {
        assert!(matches!(
            config_from(&[("ADSPACE_MAX_CONNECTIONS", "0")]),
            Err(ConfigError::Zero(_))
        ));
    }
}
