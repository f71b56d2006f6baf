//! Append-only record of submitted and confirmed steps.
//!
//! A deploy or configure step is journaled before its transaction is
//! awaited, so a re-run after a crash can tell "never sent" apart from
//! "sent, outcome unknown". The state directory is held under an exclusive
//! lock for the lifetime of a [`Journal`].

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::errors::JournalError;
use crate::types::{ClassHash, ContractAddress, TxHash};

const JOURNAL_FILE: &str = "journal.jsonl";
const LOCK_FILE: &str = "lock";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JournalEntry {
    Submitted {
        step: String,
        tx: TxHash,
        /// Class a deploy step instantiates.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        class_hash: Option<ClassHash>,
        at: DateTime<Utc>,
    },
    Confirmed {
        step: String,
        tx: TxHash,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        address: Option<ContractAddress>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        class_hash: Option<ClassHash>,
        at: DateTime<Utc>,
    },
}

impl JournalEntry {
    pub fn step(&self) -> &str {
        match self {
            JournalEntry::Submitted { step, .. } | JournalEntry::Confirmed { step, .. } => step,
        }
    }
}

/// Latest known state of a journaled step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepRecord {
    Submitted {
        tx: TxHash,
        class_hash: Option<ClassHash>,
    },
    Confirmed {
        tx: TxHash,
        address: Option<ContractAddress>,
        class_hash: Option<ClassHash>,
    },
}

impl StepRecord {
    pub fn tx(&self) -> TxHash {
        match self {
            StepRecord::Submitted { tx, .. } | StepRecord::Confirmed { tx, .. } => *tx,
        }
    }

    pub fn class_hash(&self) -> Option<ClassHash> {
        match self {
            StepRecord::Submitted { class_hash, .. } | StepRecord::Confirmed { class_hash, .. } => {
                *class_hash
            }
        }
    }
}

impl From<&JournalEntry> for StepRecord {
    fn from(entry: &JournalEntry) -> Self {
        match entry {
            JournalEntry::Submitted { tx, class_hash, .. } => StepRecord::Submitted {
                tx: *tx,
                class_hash: *class_hash,
            },
            JournalEntry::Confirmed {
                tx,
                address,
                class_hash,
                ..
            } => StepRecord::Confirmed {
                tx: *tx,
                address: *address,
                class_hash: *class_hash,
            },
        }
    }
}

pub struct Journal {
    path: PathBuf,
    steps: HashMap<String, StepRecord>,
    _lock: File,
}

impl Journal {
    /// Open (or create) the journal in `state_dir` and take the run lock.
    pub fn open(state_dir: &Path) -> Result<Self, JournalError> {
        fs::create_dir_all(state_dir).map_err(|source| JournalError::Io {
            path: state_dir.to_path_buf(),
            source,
        })?;

        let lock_path = state_dir.join(LOCK_FILE);
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(|source| JournalError::Io {
                path: lock_path.clone(),
                source,
            })?;
        lock.try_lock_exclusive()
            .map_err(|_| JournalError::Locked { path: lock_path })?;

        let path = state_dir.join(JOURNAL_FILE);
        let steps = Self::replay(&path)?;
        if !steps.is_empty() {
            tracing::info!(path = %path.display(), steps = steps.len(), "resuming from journal");
        }
        Ok(Self {
            path,
            steps,
            _lock: lock,
        })
    }

    /// Rebuild step states from the file.
    ///
    /// A crash mid-append leaves a torn last line. That line is dropped and
    /// cut from the file; an unreadable line anywhere else is corruption.
    fn replay(path: &Path) -> Result<HashMap<String, StepRecord>, JournalError> {
        let mut steps = HashMap::new();
        if !path.exists() {
            return Ok(steps);
        }
        let io_err = |source| JournalError::Io {
            path: path.to_path_buf(),
            source,
        };
        let content = fs::read_to_string(path).map_err(io_err)?;
        let lines: Vec<&str> = content.split_inclusive('\n').collect();

        let mut offset = 0u64;
        for (idx, raw) in lines.iter().enumerate() {
            let line = raw.trim();
            if !line.is_empty() {
                match serde_json::from_str::<JournalEntry>(line) {
                    Ok(entry) => {
                        steps.insert(entry.step().to_string(), StepRecord::from(&entry));
                    }
                    Err(source) if idx + 1 == lines.len() => {
                        tracing::warn!(path = %path.display(), line = idx + 1, error = %source, "dropping torn last journal line");
                        let file = OpenOptions::new().write(true).open(path).map_err(io_err)?;
                        file.set_len(offset).map_err(io_err)?;
                        return Ok(steps);
                    }
                    Err(source) => {
                        return Err(JournalError::Corrupt {
                            path: path.to_path_buf(),
                            line: idx + 1,
                            source,
                        });
                    }
                }
            }
            offset += raw.len() as u64;
        }

        // complete entry without its newline; terminate it before appending more
        if !content.is_empty() && !content.ends_with('\n') {
            let mut file = OpenOptions::new().append(true).open(path).map_err(io_err)?;
            file.write_all(b"\n").map_err(io_err)?;
        }
        Ok(steps)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lookup(&self, step: &str) -> Option<StepRecord> {
        self.steps.get(step).copied()
    }

    pub fn record_submitted(
        &mut self,
        step: &str,
        tx: TxHash,
        class_hash: Option<ClassHash>,
    ) -> Result<(), JournalError> {
        let entry = JournalEntry::Submitted {
            step: step.to_string(),
            tx,
            class_hash,
            at: Utc::now(),
        };
        self.append(&entry)?;
        self.steps.insert(step.to_string(), StepRecord::from(&entry));
        Ok(())
    }

    pub fn record_confirmed(
        &mut self,
        step: &str,
        tx: TxHash,
        address: Option<ContractAddress>,
        class_hash: Option<ClassHash>,
    ) -> Result<(), JournalError> {
        let entry = JournalEntry::Confirmed {
            step: step.to_string(),
            tx,
            address,
            class_hash,
            at: Utc::now(),
        };
        self.append(&entry)?;
        self.steps.insert(step.to_string(), StepRecord::from(&entry));
        Ok(())
    }

    /// Forget a step so the next attempt submits afresh.
    pub fn forget(&mut self, step: &str) {
        self.steps.remove(step);
    }

    /// Drop all entries once the run has produced its manifest.
    pub fn clear(&mut self) -> Result<(), JournalError> {
        self.steps.clear();
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(JournalError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }

    fn append(&self, entry: &JournalEntry) -> Result<(), JournalError> {
        let io_err = |source| JournalError::Io {
            path: self.path.clone(),
            source,
        };
        let mut line = serde_json::to_string(entry).map_err(|source| JournalError::Corrupt {
            path: self.path.clone(),
            line: 0,
            source,
        })?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(io_err)?;
        file.write_all(line.as_bytes()).map_err(io_err)?;
        file.sync_data().map_err(io_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Felt;
    use tempfile::TempDir;

    fn tx(n: u128) -> TxHash {
        TxHash(Felt::from_u128(n))
    }

    fn class(n: u128) -> Option<ClassHash> {
        Some(ClassHash(Felt::from_u128(n)))
    }

    const SUBMITTED_LINE: &str = "{\"event\":\"submitted\",\"step\":\"configure\",\"tx\":\"0x1\",\"at\":\"2026-01-01T00:00:00Z\"}\n";

    #[test]
    fn entries_survive_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let mut journal = Journal::open(dir.path()).unwrap();
            journal
                .record_submitted("deploy:BTCVault", tx(1), class(7))
                .unwrap();
            journal
                .record_confirmed(
                    "deploy:BTCVault",
                    tx(1),
                    Some(ContractAddress(Felt::from_u128(0xaa))),
                    class(7),
                )
                .unwrap();
            journal.record_submitted("deploy:Router", tx(2), class(8)).unwrap();
        }

        let journal = Journal::open(dir.path()).unwrap();
        assert_eq!(
            journal.lookup("deploy:BTCVault"),
            Some(StepRecord::Confirmed {
                tx: tx(1),
                address: Some(ContractAddress(Felt::from_u128(0xaa))),
                class_hash: class(7),
            })
        );
        let router = journal.lookup("deploy:Router").unwrap();
        assert_eq!(router.tx(), tx(2));
        assert_eq!(router.class_hash(), class(8));
        assert_eq!(journal.lookup("configure"), None);
    }

    #[test]
    fn entries_without_class_hash_still_parse() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(JOURNAL_FILE), SUBMITTED_LINE).unwrap();
        let journal = Journal::open(dir.path()).unwrap();
        assert_eq!(
            journal.lookup("configure"),
            Some(StepRecord::Submitted {
                tx: tx(1),
                class_hash: None,
            })
        );
    }

    #[test]
    fn second_open_is_locked_out() {
        let dir = TempDir::new().unwrap();
        let _first = Journal::open(dir.path()).unwrap();
        match Journal::open(dir.path()) {
            Err(JournalError::Locked { .. }) => {}
            Err(other) => panic!("Expected Locked, got {other}"),
            Ok(_) => panic!("Expected Locked, got a second journal"),
        }
    }

    #[test]
    fn clear_removes_the_file() {
        let dir = TempDir::new().unwrap();
        let mut journal = Journal::open(dir.path()).unwrap();
        journal.record_submitted("configure", tx(3), None).unwrap();
        assert!(journal.path().exists());

        journal.clear().unwrap();
        assert!(!journal.path().exists());
        assert_eq!(journal.lookup("configure"), None);
        journal.clear().unwrap();
    }

    #[test]
    fn corrupt_line_in_the_middle_is_reported_with_its_number() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join(JOURNAL_FILE),
            format!("{SUBMITTED_LINE}not json\n{SUBMITTED_LINE}"),
        )
        .unwrap();
        match Journal::open(dir.path()) {
            Err(JournalError::Corrupt { line, .. }) => assert_eq!(line, 2),
            Err(other) => panic!("Expected Corrupt, got {other}"),
            Ok(_) => panic!("Expected Corrupt"),
        }
    }

    #[test]
    fn torn_last_line_is_dropped_and_appends_keep_working() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(JOURNAL_FILE);
        fs::write(
            &path,
            format!("{SUBMITTED_LINE}{{\"event\":\"submitted\",\"step\":\"deploy:Ro"),
        )
        .unwrap();

        {
            let mut journal = Journal::open(dir.path()).unwrap();
            assert_eq!(journal.lookup("configure").map(|r| r.tx()), Some(tx(1)));
            assert_eq!(journal.lookup("deploy:Router"), None);
            assert_eq!(fs::read_to_string(&path).unwrap(), SUBMITTED_LINE);
            journal.record_submitted("deploy:Router", tx(2), class(9)).unwrap();
        }

        let journal = Journal::open(dir.path()).unwrap();
        assert_eq!(journal.lookup("deploy:Router").map(|r| r.tx()), Some(tx(2)));
    }

    #[test]
    fn complete_last_line_without_newline_is_terminated() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(JOURNAL_FILE);
        fs::write(&path, SUBMITTED_LINE.trim_end()).unwrap();

        {
            let mut journal = Journal::open(dir.path()).unwrap();
            journal.record_submitted("deploy:A", tx(4), class(1)).unwrap();
        }

        let journal = Journal::open(dir.path()).unwrap();
        assert!(journal.lookup("configure").is_some());
        assert!(journal.lookup("deploy:A").is_some());
    }

    #[test]
    fn forget_only_affects_memory() {
        let dir = TempDir::new().unwrap();
        let mut journal = Journal::open(dir.path()).unwrap();
        journal.record_submitted("deploy:A", tx(4), None).unwrap();
        journal.forget("deploy:A");
        assert_eq!(journal.lookup("deploy:A"), None);
    }
}
