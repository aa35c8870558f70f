//! Drive discovery and operator selection.
//!
//! Listing never fails as a whole: a record that cannot be parsed is skipped
//! and reported as a [`Warning`], and a listing command that fails yields an
//! empty catalog.
use crate::device::BlockDevice;
use crate::error::{Outcome, Warning};
use crate::platform::Platform;
use crate::process::CommandRunner;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Enumerates the removable drives currently attached. Not cached.
pub fn list_removable_drives(
    platform: &dyn Platform,
    runner: &dyn CommandRunner,
) -> Outcome<Vec<BlockDevice>> {
    let outcome = platform.list_drives(runner);
    log::info!(
        "found {} candidate drive(s) on {}",
        outcome.value.len(),
        platform.name()
    );
    outcome
}

#[derive(Debug, Deserialize)]
struct LsblkRecord {
    name: String,
    #[serde(default)]
    size: Option<String>,
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    tran: Option<String>,
    #[serde(default)]
    model: Option<String>,
}

/// Parses `lsblk -J -o NAME,SIZE,TYPE,TRAN,MODEL` output.
///
/// Keeps USB devices and plain disks, minus `exclude` (the system disk).
pub fn parse_lsblk_json(json: &str, exclude: Option<&Path>) -> Outcome<Vec<BlockDevice>> {
    let mut outcome = Outcome::new(Vec::new());

    let document: serde_json::Value = match serde_json::from_str(json) {
        Ok(value) => value,
        Err(e) => {
            outcome.warn(Warning::new("parse lsblk output", e));
            return outcome;
        }
    };

    let Some(records) = document.get("blockdevices").and_then(|v| v.as_array()) else {
        outcome.warn(Warning::new(
            "parse lsblk output",
            "missing `blockdevices` array",
        ));
        return outcome;
    };

    for (index, raw) in records.iter().enumerate() {
        let record: LsblkRecord = match serde_json::from_value(raw.clone()) {
            Ok(record) => record,
            Err(e) => {
                outcome.warn(Warning::new(format!("lsblk record {index}"), e));
                continue;
            }
        };

        let is_usb = record.tran.as_deref() == Some("usb");
        let is_disk = record.kind.as_deref() == Some("disk");
        if !is_usb && !is_disk {
            continue;
        }

        let path = PathBuf::from("/dev").join(&record.name);
        if exclude == Some(path.as_path()) {
            continue;
        }

        let size = record.size.as_deref().unwrap_or("?");
        let model = record
            .model
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or("Unknown");
        let label = match record.tran.as_deref() {
            Some(tran) => format!("({size}) {model} [{tran}]"),
            None => format!("({size}) {model}"),
        };

        outcome.value.push(BlockDevice::new(path, label));
    }

    outcome
}

/// Parses `diskutil list external physical` output.
///
/// Every line starting with `/dev/disk` opens a disk record; the rest of the
/// line becomes its label.
pub fn parse_diskutil_list(text: &str) -> Outcome<Vec<BlockDevice>> {
    let mut outcome = Outcome::new(Vec::new());

    for line in text.lines().filter(|l| l.starts_with("/dev/disk")) {
        let (identifier, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let identifier = identifier.trim_end_matches(':');
        let number = &identifier["/dev/disk".len()..];

        if number.is_empty() || !number.chars().all(|c| c.is_ascii_digit()) {
            outcome.warn(Warning::new(
                "parse diskutil output",
                format!("unexpected disk identifier in `{line}`"),
            ));
            continue;
        }

        let label = rest.trim().trim_end_matches(':');
        outcome
            .value
            .push(BlockDevice::new(identifier, label.to_string()));
    }

    outcome
}

/// The operator's answer to the drive menu.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Selection {
    /// Zero-based index into the listed drives.
    Chosen(usize),
    /// `q`: leave the program. Nothing has been touched yet.
    Quit,
    /// Out of range or not a number. Ask again or give up.
    Invalid,
}

/// Interprets a 1-based menu choice for a list of `count` drives.
pub fn parse_selection(input: &str, count: usize) -> Selection {
    let input = input.trim();
    if input.eq_ignore_ascii_case("q") {
        return Selection::Quit;
    }
    match input.parse::<usize>() {
        Ok(n) if (1..=count).contains(&n) => Selection::Chosen(n - 1),
        _ => Selection::Invalid,
    }
}

/// Resolves a menu choice against `drives`, `None` for anything but a valid pick.
pub fn select<'a>(drives: &'a [BlockDevice], input: &str) -> Option<&'a BlockDevice> {
    match parse_selection(input, drives.len()) {
        Selection::Chosen(index) => drives.get(index),
        Selection::Quit | Selection::Invalid => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LSBLK: &str = r#"{
       "blockdevices": [
          {"name":"nvme0n1", "size":"476.9G", "type":"disk", "tran":"nvme", "model":"Samsung SSD 980"},
          {"name":"sdb", "size":"14.9G", "type":"disk", "tran":"usb", "model":"Cruzer Blade    "},
          {"name":"sr0", "size":"1024M", "type":"rom", "tran":"sata", "model":"DVD-RW"},
          {"name":"loop0", "size":"55M", "type":"loop", "tran":null, "model":null}
       ]
    }"#;

    #[test]
    fn keeps_usb_and_disk_records() {
        let outcome = parse_lsblk_json(LSBLK, None);
        assert!(outcome.is_clean());
        let paths: Vec<_> = outcome.value.iter().map(|d| d.path.clone()).collect();
        assert_eq!(
            paths,
            vec![PathBuf::from("/dev/nvme0n1"), PathBuf::from("/dev/sdb")]
        );
        assert_eq!(outcome.value[1].label, "(14.9G) Cruzer Blade [usb]");
    }

    #[test]
    fn excludes_the_system_disk() {
        let outcome = parse_lsblk_json(LSBLK, Some(Path::new("/dev/nvme0n1")));
        assert_eq!(outcome.value.len(), 1);
        assert_eq!(outcome.value[0].path, PathBuf::from("/dev/sdb"));
    }

    #[test]
    fn skips_malformed_lsblk_records() {
        let json = r#"{"blockdevices": [
            {"size":"8G", "type":"disk"},
            {"name": 42, "type":"disk"},
            {"name":"sdc", "size":"29.3G", "type":"disk", "tran":"usb", "model":null}
        ]}"#;
        let outcome = parse_lsblk_json(json, None);
        assert_eq!(outcome.warnings.len(), 2);
        assert_eq!(outcome.value.len(), 1);
        assert_eq!(outcome.value[0].label, "(29.3G) Unknown [usb]");
    }

    #[test]
    fn garbage_lsblk_output_is_an_empty_catalog() {
        let outcome = parse_lsblk_json("lsblk: unknown column", None);
        assert!(outcome.value.is_empty());
        assert_eq!(outcome.warnings.len(), 1);

        let outcome = parse_lsblk_json(r#"{"devices": []}"#, None);
        assert!(outcome.value.is_empty());
        assert_eq!(outcome.warnings.len(), 1);
    }

    #[test]
    fn parses_diskutil_disks_and_skips_bad_identifiers() {
        let text = "\
/dev/disk4 (external, physical):
   #:                       TYPE NAME                    SIZE       IDENTIFIER
   0:     FDisk_partition_scheme                        *15.5 GB    disk4
/dev/diskX (external, physical):
/dev/disk5 (external, physical):
";
        let outcome = parse_diskutil_list(text);
        assert_eq!(outcome.warnings.len(), 1);
        assert_eq!(
            outcome.value,
            vec![
                BlockDevice::new("/dev/disk4", "(external, physical)"),
                BlockDevice::new("/dev/disk5", "(external, physical)"),
            ]
        );
    }

    #[test]
    fn selection_accepts_only_listed_numbers() {
        assert_eq!(parse_selection("1", 2), Selection::Chosen(0));
        assert_eq!(parse_selection(" 2\n", 2), Selection::Chosen(1));
        for input in ["0", "3", "-1", "abc", "", "1.5"] {
            assert_eq!(parse_selection(input, 2), Selection::Invalid, "{input:?}");
        }
        assert_eq!(parse_selection("q", 2), Selection::Quit);
        assert_eq!(parse_selection("Q", 0), Selection::Quit);
    }

    #[test]
    fn select_returns_none_outside_range() {
        let drives = vec![BlockDevice::new("/dev/sdb", "(14.9G) Cruzer")];
        assert_eq!(select(&drives, "1"), Some(&drives[0]));
        assert_eq!(select(&drives, "2"), None);
        assert_eq!(select(&drives, "q"), None);
        assert_eq!(select(&[], "1"), None);
    }
}
