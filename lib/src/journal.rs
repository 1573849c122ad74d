// Copyright 2022 The Keel Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![expect(missing_docs)]

//! The journal: a forest of logs owned by a single identity.
//!
//! Local writes and merged foreign logs both land here. The whole forest
//! persists to a single file, encrypted under a key derived from the
//! owner's private key and replaced atomically under an advisory lock.

use std::fs;
use std::io;
use std::path::Path;

use ed25519_dalek::SigningKey;

use crate::codec;
use crate::encryption;
use crate::error::Error;
use crate::error::Result;
use crate::file_util;
use crate::file_util::PathError;
use crate::identity::Author;
use crate::lock::FileLock;
use crate::log::Log;
use crate::log::LogId;

/// A collection of top-level logs owned by one identity.
#[derive(Debug)]
pub struct Journal {
    owner: Author,
    logs: Vec<Log>,
    /// Id of the owner's own author log; empty before initialization.
    active_id: LogId,
}

impl Journal {
    /// Creates an empty journal for `owner`.
    pub fn new(owner: Author) -> Self {
        Self {
            owner,
            logs: vec![],
            active_id: LogId::new(""),
        }
    }

    pub fn owner(&self) -> &Author {
        &self.owner
    }

    pub fn logs(&self) -> &[Log] {
        &self.logs
    }

    /// The journal's "active" top-level log id: the owner's author log.
    pub fn active_id(&self) -> &LogId {
        &self.active_id
    }

    /// Points the journal at its owner's author log. The log must already
    /// be present at top level.
    pub fn set_active_id(&mut self, id: &LogId) -> Result<()> {
        if !self.logs.iter().any(|log| log.id() == *id) {
            return Err(Error::not_found(format!("top-level log {id}")));
        }
        self.active_id = id.clone();
        Ok(())
    }

    /// The owner's author log.
    pub fn active_log(&self) -> Result<&Log> {
        if self.active_id.is_empty() {
            return Err(Error::not_found("active author log"));
        }
        self.logs
            .iter()
            .find(|log| log.id() == self.active_id)
            .ok_or_else(|| Error::not_found(format!("top-level log {}", self.active_id)))
    }

    pub(crate) fn active_log_mut(&mut self) -> Result<&mut Log> {
        if self.active_id.is_empty() {
            return Err(Error::not_found("active author log"));
        }
        let id = self.active_id.clone();
        self.logs
            .iter_mut()
            .find(|log| log.id() == id)
            .ok_or_else(|| Error::not_found(format!("top-level log {id}")))
    }

    /// Adds a log at top level, or merges it into the top-level log that
    /// shares its init op. No two top-level logs ever share an init op.
    pub fn append_log(&mut self, log: Log) -> Result<()> {
        match self
            .logs
            .iter_mut()
            .find(|existing| existing.ops()[0] == log.ops()[0])
        {
            Some(existing) => existing.merge(log),
            None => {
                self.logs.push(log);
                Ok(())
            }
        }
    }

    /// Merges a foreign log tree into the forest, walking top-down by
    /// init-op identity. Unknown trees are appended whole.
    pub fn merge_log(&mut self, incoming: Log) -> Result<()> {
        self.append_log(incoming)
    }

    /// Finds a log anywhere in the forest by id, removed logs included.
    pub fn get(&self, id: &LogId) -> Option<&Log> {
        self.logs.iter().find_map(|log| log.find(id))
    }

    /// Resolves a name path starting from a top-level log. Removed logs are
    /// hidden from this lookup.
    pub fn head_ref(&self, names: &[&str]) -> Result<&Log> {
        let (first, rest) = names
            .split_first()
            .ok_or_else(|| Error::BadRequest("empty log path".to_string()))?;
        let top = self
            .logs
            .iter()
            .find(|log| !log.removed() && log.name() == *first)
            .ok_or_else(|| Error::not_found(format!("log {first}")))?;
        top.descend(rest)
    }

    pub(crate) fn head_ref_mut(&mut self, names: &[&str]) -> Result<&mut Log> {
        let (first, rest) = names
            .split_first()
            .ok_or_else(|| Error::BadRequest("empty log path".to_string()))?;
        let top = self
            .logs
            .iter_mut()
            .find(|log| !log.removed() && log.name() == *first)
            .ok_or_else(|| Error::not_found(format!("log {first}")))?;
        top.descend_mut(rest)
    }

    /// Detaches and returns the log at the given name path. This removes
    /// the subtree from the forest structurally; appending a remove *op*
    /// (which archives in place) is the lifecycle layer's job.
    pub fn remove_log(&mut self, names: &[&str]) -> Result<Log> {
        let (first, rest) = names
            .split_first()
            .ok_or_else(|| Error::BadRequest("empty log path".to_string()))?;
        if rest.is_empty() {
            let index = self
                .logs
                .iter()
                .position(|log| !log.removed() && log.name() == *first)
                .ok_or_else(|| Error::not_found(format!("log {first}")))?;
            return Ok(self.logs.remove(index));
        }
        let top = self
            .logs
            .iter_mut()
            .find(|log| !log.removed() && log.name() == *first)
            .ok_or_else(|| Error::not_found(format!("log {first}")))?;
        top.detach_descendant(rest)
    }

    /// Persists the journal: proto-encoded, sealed under the owner's
    /// private key, written atomically next to a `<file>.lock`.
    pub fn save(&self, path: &Path, key: &SigningKey) -> Result<()> {
        let plaintext = codec::encode_journal(&self.logs, &self.active_id);
        let sealed = encryption::seal(key, &plaintext)?;
        let _lock = FileLock::lock(lock_path(path))?;
        file_util::write_file_atomic(path, &sealed)?;
        tracing::debug!(
            path = %path.display(),
            logs = self.logs.len(),
            "saved journal"
        );
        Ok(())
    }

    /// Loads a journal previously written by [`Journal::save`].
    pub fn load(path: &Path, owner: Author, key: &SigningKey) -> Result<Self> {
        let sealed = {
            let _lock = FileLock::lock(lock_path(path))?;
            fs::read(path).map_err(|err| match err.kind() {
                io::ErrorKind::NotFound => Error::not_found(format!("journal at {}", path.display())),
                _ => PathError {
                    path: path.to_path_buf(),
                    source: err,
                }
                .into(),
            })?
        };
        let plaintext = encryption::open(key, &sealed)?;
        let (logs, active_id) = codec::decode_journal(&plaintext)?;
        let mut journal = Self::new(owner);
        for log in logs {
            journal.append_log(log)?;
        }
        if !active_id.is_empty() {
            journal.set_active_id(&active_id)?;
        }
        tracing::debug!(
            path = %path.display(),
            logs = journal.logs.len(),
            "loaded journal"
        );
        Ok(journal)
    }
}

fn lock_path(path: &Path) -> std::path::PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".lock");
    name.into()
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::keys::generate_signing_key;
    use crate::op::Op;
    use crate::op::OpType;

    fn test_owner() -> (Author, SigningKey) {
        let key = generate_signing_key();
        (Author::new("test", key.verifying_key()), key)
    }

    fn named_log(model: u32, name: &str) -> Log {
        Log::init(Op {
            op_type: OpType::Init,
            model,
            name: name.to_string(),
            ..Op::default()
        })
        .unwrap()
    }

    #[test]
    fn test_append_log_merges_matching_init_op() {
        let (owner, _) = test_owner();
        let mut journal = Journal::new(owner);
        let mut replica = named_log(1, "a");
        journal.append_log(replica.clone()).unwrap();
        replica.append(Op {
            op_type: OpType::Amend,
            model: 1,
            name: "b".to_string(),
            ..Op::default()
        });
        journal.append_log(replica).unwrap();
        // Still a single top-level log, now renamed.
        assert_eq!(journal.logs().len(), 1);
        assert_eq!(journal.logs()[0].name(), "b");
    }

    #[test]
    fn test_set_active_id_requires_existing_log() {
        let (owner, _) = test_owner();
        let mut journal = Journal::new(owner);
        let log = named_log(1, "a");
        let id = log.id();
        assert_matches!(journal.set_active_id(&id), Err(Error::NotFound(_)));
        journal.append_log(log).unwrap();
        journal.set_active_id(&id).unwrap();
        assert_eq!(journal.active_id(), &id);
    }

    #[test]
    fn test_remove_log_top_level_and_nested() {
        let (owner, _) = test_owner();
        let mut journal = Journal::new(owner);
        let mut top = named_log(1, "user");
        top.add_child(named_log(2, "dataset")).unwrap();
        journal.append_log(top).unwrap();

        let removed = journal.remove_log(&["user", "dataset"]).unwrap();
        assert_eq!(removed.name(), "dataset");
        assert_matches!(journal.remove_log(&["user", "dataset"]), Err(Error::NotFound(_)));

        let removed = journal.remove_log(&["user"]).unwrap();
        assert_eq!(removed.name(), "user");
        assert!(journal.logs().is_empty());
    }

    #[test]
    fn test_save_load_round_trip() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("journal.keel");
        let (owner, key) = test_owner();
        let mut journal = Journal::new(owner.clone());
        let log = named_log(1, "user");
        let id = log.id();
        journal.append_log(log).unwrap();
        journal.set_active_id(&id).unwrap();
        journal.save(&path, &key).unwrap();

        let loaded = Journal::load(&path, owner, &key).unwrap();
        assert_eq!(loaded.logs(), journal.logs());
        assert_eq!(loaded.active_id(), &id);
    }

    #[test]
    fn test_load_with_wrong_key_is_invalid_cipher() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("journal.keel");
        let (owner, key) = test_owner();
        let journal = Journal::new(owner.clone());
        journal.save(&path, &key).unwrap();

        let intruder = generate_signing_key();
        assert_matches!(
            Journal::load(&path, owner, &intruder),
            Err(Error::InvalidCipher)
        );
    }

    #[test]
    fn test_load_corrupt_file_is_invalid_cipher() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("journal.keel");
        let (owner, key) = test_owner();
        std::fs::write(&path, b"not a sealed journal").unwrap();
        assert_matches!(Journal::load(&path, owner, &key), Err(Error::InvalidCipher));
    }
}
