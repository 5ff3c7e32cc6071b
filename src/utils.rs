use std::{fs::Metadata, sync::OnceLock};

use chrono::{DateTime, Local, Utc};
use regex::Regex;

const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Local time stamp used in backup file names.
pub fn backup_timestamp(now: DateTime<Local>) -> String {
    now.format(TIMESTAMP_FORMAT).to_string()
}

/// Modification time of a file as UTC; the creation time of a backup.
pub fn modified_at(meta: &Metadata) -> DateTime<Utc> {
    meta.modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| DateTime::<Utc>::UNIX_EPOCH)
}

/// Parts of a config backup name: `<stem>_backup_<timestamp>[_<n>].<ext>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupName {
    pub stem: String,
    pub timestamp: String,
    pub extension: String,
}

impl BackupName {
    pub fn parse(file_name: &str) -> Option<Self> {
        static RE: OnceLock<Regex> = OnceLock::new();
        let re = RE.get_or_init(|| {
            Regex::new(r"^(?P<stem>.+)_backup_(?P<ts>\d{8}_\d{6})(?:_\d+)?\.(?P<ext>[A-Za-z0-9]+)$")
                .expect("backup name pattern is valid")
        });

        let caps = re.captures(file_name)?;
        Some(Self {
            stem: caps["stem"].to_string(),
            timestamp: caps["ts"].to_string(),
            extension: caps["ext"].to_string(),
        })
    }

    /// The file the backup was taken from.
    pub fn original_file_name(&self) -> String {
        format!("{}.{}", self.stem, self.extension)
    }

    /// Candidate file name; `seq > 0` disambiguates backups taken within the same second.
    pub fn file_name(&self, seq: u32) -> String {
        if seq == 0 {
            format!("{}_backup_{}.{}", self.stem, self.timestamp, self.extension)
        } else {
            format!(
                "{}_backup_{}_{}.{}",
                self.stem, self.timestamp, seq, self.extension
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn timestamp_is_sortable_digits() {
        let t = Local.with_ymd_and_hms(2026, 10, 19, 9, 5, 3).single().unwrap();
        assert_eq!(backup_timestamp(t), "20261019_090503");
    }

    #[test]
    fn original_name_recovered_from_backup_name() {
        let name = BackupName::parse("server_backup_20261019_090503.properties").unwrap();
        assert_eq!(name.original_file_name(), "server.properties");

        let name = BackupName::parse("allow_list_backup_20261019_090503_2.json").unwrap();
        assert_eq!(name.original_file_name(), "allow_list.json");
        assert_eq!(name.file_name(2), "allow_list_backup_20261019_090503_2.json");

        assert!(BackupName::parse("server.properties").is_none());
        assert!(BackupName::parse("world_backup_2026.json").is_none());
    }
}
