//! The flat `.env` document the boot-time installer sources.
//!
//! The key set is fixed. Optional config fields that are absent fall back to
//! their documented default, so generation never fails for missing values.
use crate::config::InstallerConfig;
use std::fmt;

pub const ENV_FILE_NAME: &str = ".env";

pub const DEFAULT_TIMEZONE: &str = "UTC";
pub const DEFAULT_LOCALE: &str = "en_US.UTF-8";
pub const DEFAULT_KEYMAP: &str = "us";

/// Every key the document contains, in output order.
pub const ENV_KEYS: [&str; 7] = [
    "ROOT_PASSWORD",
    "TIMEZONE",
    "LOCALE",
    "KEYMAP",
    "PREFER_WIFI_CONNECTION",
    "WIFI_SSID",
    "WIFI_PASSWORD",
];

/// `KEY=value` pairs, rendered one per line without quoting.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnvDocument {
    entries: Vec<(&'static str, String)>,
}

impl EnvDocument {
    pub fn from_config(config: &InstallerConfig) -> Self {
        let system = &config.system;
        let network = &system.network;
        let or = |value: &Option<String>, default: &str| {
            value.clone().unwrap_or_else(|| default.to_string())
        };

        let values = [
            or(&system.root_password, ""),
            or(&system.timezone, DEFAULT_TIMEZONE),
            or(&system.locale, DEFAULT_LOCALE),
            or(&system.keyboard_layout, DEFAULT_KEYMAP),
            network.prefer_wifi.unwrap_or(false).to_string(),
            or(&network.wifi_ssid, ""),
            or(&network.wifi_password, ""),
        ];

        Self {
            entries: ENV_KEYS.into_iter().zip(values).collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn keys(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.iter().map(|(k, _)| *k)
    }

    /// The file contents, newline-terminated.
    pub fn render(&self) -> String {
        format!("{self}\n")
    }
}

impl fmt::Display for EnvDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, (key, value)) in self.entries.iter().enumerate() {
            if index > 0 {
                writeln!(f)?;
            }
            write!(f, "{key}={value}")?;
        }
        Ok(())
    }
}
