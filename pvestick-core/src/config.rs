//! The operator's `config.yml`: typed view and structural validation.
//!
//! Validation walks a static schema over the raw YAML tree so it can report
//! every problem at once, with its dotted path, instead of stopping at the
//! first field serde would choke on.
use crate::error::{Error, Result};
use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use std::fs;
use std::path::Path;

pub const DEFAULT_CONFIG_FILE: &str = "config.yml";
pub const EXAMPLE_CONFIG_FILE: &str = "config.yml.example";

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct InstallerConfig {
    pub system: SystemConfig,
    pub services: Vec<ServiceConfig>,
    pub backup: Option<BackupConfig>,
    pub installer: InstallerSection,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    pub root_password: Option<String>,
    pub admin_user: Option<String>,
    pub admin_password: Option<String>,
    pub timezone: Option<String>,
    pub locale: Option<String>,
    pub keyboard_layout: Option<String>,
    pub ssh_authorized_keys: Vec<String>,
    pub network: NetworkConfig,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub hostname: Option<String>,
    pub prefer_wifi: Option<bool>,
    pub wifi_ssid: Option<String>,
    pub wifi_password: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub playbook: String,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub allocations: Option<Mapping>,
    #[serde(default)]
    pub variables: Option<Mapping>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    pub connections: Vec<Value>,
}

/// Settings for building the stick itself.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct InstallerSection {
    /// Download this image instead of scraping the Proxmox site.
    pub iso_url: Option<String>,
    /// Expected SHA-256 of the image, checked before flashing.
    pub image_sha256: Option<String>,
}

/// Reads the raw YAML tree. An empty file is an empty mapping.
fn read_yaml(path: &Path) -> Result<Value> {
    let text = fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Error reading '{}': {e}", path.display()))
    })?;
    let value: Value = serde_yaml::from_str(&text)
        .map_err(|e| Error::Config(format!("Error parsing '{}': {e}", path.display())))?;
    Ok(match value {
        Value::Null => Value::Mapping(Mapping::new()),
        other => other,
    })
}

impl InstallerConfig {
    /// Loads and deserializes a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let value = read_yaml(path)?;
        serde_yaml::from_value(value)
            .map_err(|e| Error::Config(format!("Error in '{}': {e}", path.display())))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Kind {
    Str,
    Bool,
    List,
    Map,
}

impl Kind {
    fn matches(self, value: &Value) -> bool {
        match self {
            Kind::Str => value.is_string(),
            Kind::Bool => value.is_bool(),
            Kind::List => value.is_sequence(),
            Kind::Map => value.is_mapping(),
        }
    }

    fn name(self) -> &'static str {
        match self {
            Kind::Str => "string",
            Kind::Bool => "boolean",
            Kind::List => "list",
            Kind::Map => "mapping",
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Sequence(_) => "list",
        Value::Mapping(_) => "mapping",
        Value::Tagged(_) => "tagged value",
    }
}

struct Field {
    key: &'static str,
    required: bool,
    kind: Kind,
    /// Schema of a nested mapping.
    children: &'static [Field],
    /// Schema of each mapping inside a list.
    items: &'static [Field],
    /// Kind of each scalar inside a list.
    item_kind: Option<Kind>,
}

const fn field(key: &'static str, required: bool, kind: Kind) -> Field {
    Field {
        key,
        required,
        kind,
        children: &[],
        items: &[],
        item_kind: None,
    }
}

const NETWORK: &[Field] = &[
    field("hostname", false, Kind::Str),
    field("prefer_wifi", false, Kind::Bool),
    field("wifi_ssid", false, Kind::Str),
    field("wifi_password", false, Kind::Str),
];

const SYSTEM: &[Field] = &[
    field("root_password", true, Kind::Str),
    field("admin_user", false, Kind::Str),
    field("admin_password", false, Kind::Str),
    field("timezone", false, Kind::Str),
    field("locale", false, Kind::Str),
    field("keyboard_layout", false, Kind::Str),
    Field {
        item_kind: Some(Kind::Str),
        ..field("ssh_authorized_keys", false, Kind::List)
    },
    Field {
        children: NETWORK,
        ..field("network", true, Kind::Map)
    },
];

const SERVICE: &[Field] = &[
    field("name", true, Kind::Str),
    field("playbook", true, Kind::Str),
    field("hostname", false, Kind::Str),
    field("enabled", false, Kind::Bool),
    field("allocations", false, Kind::Map),
    field("variables", false, Kind::Map),
];

const BACKUP: &[Field] = &[field("connections", false, Kind::List)];

const INSTALLER: &[Field] = &[
    field("iso_url", false, Kind::Str),
    field("image_sha256", false, Kind::Str),
];

const SCHEMA: &[Field] = &[
    Field {
        children: SYSTEM,
        ..field("system", true, Kind::Map)
    },
    Field {
        items: SERVICE,
        ..field("services", true, Kind::List)
    },
    Field {
        children: BACKUP,
        ..field("backup", false, Kind::Map)
    },
    Field {
        children: INSTALLER,
        ..field("installer", false, Kind::Map)
    },
];

fn validate_fields(data: &Mapping, fields: &[Field], parent: &str, errors: &mut Vec<String>) {
    for rule in fields {
        let path = if parent.is_empty() {
            rule.key.to_string()
        } else {
            format!("{parent}.{}", rule.key)
        };

        let Some(value) = data.get(rule.key) else {
            if rule.required {
                errors.push(format!("Missing required key: '{path}'"));
            }
            continue;
        };

        if !rule.kind.matches(value) {
            errors.push(format!(
                "Invalid type for '{path}': Expected {}, got {}",
                rule.kind.name(),
                type_name(value)
            ));
            continue;
        }

        if let Value::Mapping(map) = value {
            validate_fields(map, rule.children, &path, errors);
        }

        if let (Value::Sequence(items), Some(kind)) = (value, rule.item_kind) {
            for (index, item) in items.iter().enumerate() {
                if !kind.matches(item) {
                    errors.push(format!(
                        "Invalid type for '{path}[{index}]': Expected {}, got {}",
                        kind.name(),
                        type_name(item)
                    ));
                }
            }
        }

        if let (Value::Sequence(items), false) = (value, rule.items.is_empty()) {
            for (index, item) in items.iter().enumerate() {
                let item_path = format!("{path}[{index}]");
                match item {
                    Value::Mapping(map) => validate_fields(map, rule.items, &item_path, errors),
                    _ => errors.push(format!("Item at {item_path} must be a mapping")),
                }
            }
        }
    }
}

/// Checks a parsed config tree and returns every problem found. Empty means valid.
pub fn validate(value: &Value) -> Vec<String> {
    let mut errors = Vec::new();
    match value {
        Value::Mapping(map) => validate_fields(map, SCHEMA, "", &mut errors),
        other => errors.push(format!(
            "Top level must be a mapping, got {}",
            type_name(other)
        )),
    }
    errors
}

/// Loads and validates a config file.
///
/// # Errors
///
/// Returns the human-readable list of problems, including a missing or
/// unparsable file.
pub fn validate_file(path: &Path) -> std::result::Result<InstallerConfig, Vec<String>> {
    if !path.exists() {
        return Err(vec![format!(
            "Configuration file '{}' not found. Copy '{EXAMPLE_CONFIG_FILE}' to '{}'.",
            path.display(),
            path.display()
        )]);
    }

    let value = read_yaml(path).map_err(|e| vec![e.to_string()])?;
    let errors = validate(&value);
    if !errors.is_empty() {
        return Err(errors);
    }

    serde_yaml::from_value(value).map_err(|e| vec![format!("Error in '{}': {e}", path.display())])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn yaml(text: &str) -> Value {
        serde_yaml::from_str(text).unwrap()
    }

    const VALID: &str = r#"
system:
  root_password: "secret"
  timezone: Europe/Berlin
  ssh_authorized_keys:
    - ssh-ed25519 AAAA test
  network:
    hostname: pve
    prefer_wifi: true
    wifi_ssid: homelab
services:
  - name: homeassistant
    playbook: services/102-homeassistant/playbook.yml
    enabled: true
    allocations:
      cores: 2
"#;

    #[test]
    fn accepts_a_complete_config() {
        assert!(validate(&yaml(VALID)).is_empty());
    }

    #[test]
    fn reports_missing_required_keys_with_paths() {
        let errors = validate(&yaml("system:\n  network: {}\n"));
        assert_eq!(
            errors,
            vec![
                "Missing required key: 'system.root_password'".to_string(),
                "Missing required key: 'services'".to_string(),
            ]
        );
    }

    #[test]
    fn reports_type_mismatches() {
        let errors = validate(&yaml(
            "system:\n  root_password: 1234\n  network:\n    prefer_wifi: \"yes\"\nservices: []\n",
        ));
        assert_eq!(
            errors,
            vec![
                "Invalid type for 'system.root_password': Expected string, got number".to_string(),
                "Invalid type for 'system.network.prefer_wifi': Expected boolean, got string"
                    .to_string(),
            ]
        );
    }

    #[test]
    fn checks_every_service_entry() {
        let errors = validate(&yaml(
            "system:\n  root_password: x\n  network: {}\nservices:\n  - name: a\n  - just-a-string\n",
        ));
        assert_eq!(
            errors,
            vec![
                "Missing required key: 'services[0].playbook'".to_string(),
                "Item at services[1] must be a mapping".to_string(),
            ]
        );
    }

    #[test]
    fn checks_authorized_keys_are_strings() {
        let errors = validate(&yaml(
            "system:\n  root_password: x\n  ssh_authorized_keys: [ssh-ed25519 AAAA, 1234]\n  \
             network: {}\nservices: []\n",
        ));
        assert_eq!(
            errors,
            vec![
                "Invalid type for 'system.ssh_authorized_keys[1]': Expected string, got number"
                    .to_string()
            ]
        );
    }

    #[test]
    fn anything_validate_accepts_also_loads() {
        let text = "system:\n  root_password: x\n  ssh_authorized_keys: []\n  network:\n    \
                    hostname: pve\nservices:\n  - name: a\n    playbook: a.yml\n    \
                    allocations: {cores: 2}\nbackup:\n  connections: [{host: nas}, 3]\n\
                    installer:\n  iso_url: https://example.invalid/pve.iso\n";
        assert!(validate(&yaml(text)).is_empty());

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(text.as_bytes()).unwrap();
        let config = validate_file(file.path()).unwrap();
        assert_eq!(config.backup.unwrap().connections.len(), 2);
    }

    #[test]
    fn rejects_non_mapping_documents() {
        assert_eq!(validate(&yaml("- a\n- b\n")).len(), 1);
    }

    #[test]
    fn validate_file_loads_typed_config() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(VALID.as_bytes()).unwrap();

        let config = validate_file(file.path()).unwrap();
        assert_eq!(config.system.root_password.as_deref(), Some("secret"));
        assert_eq!(config.system.network.prefer_wifi, Some(true));
        assert_eq!(config.services.len(), 1);
        assert_eq!(config.services[0].name, "homeassistant");
    }

    #[test]
    fn missing_file_points_at_the_example() {
        let errors = validate_file(Path::new("/nonexistent/config.yml")).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains(EXAMPLE_CONFIG_FILE));
    }

    #[test]
    fn empty_file_loads_as_defaults() {
        let file = NamedTempFile::new().unwrap();
        let config = InstallerConfig::load(file.path()).unwrap();
        assert!(config.system.root_password.is_none());
        assert!(config.services.is_empty());
    }
}
