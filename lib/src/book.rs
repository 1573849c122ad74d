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

//! The book: dataset lifecycle events written into the journal.
//!
//! The journal stores opaque logs; the book knows what they mean. It lays
//! datasets out as author log → dataset logs → branch logs, appends the
//! lifecycle ops (create, rename, commit, delete, publish, push, pull),
//! and persists the encrypted journal after every write.
//!
//! Log hierarchy written by this layer:
//!
//! ```text
//! author log (AUTHOR_MODEL, name = username)
//! └── dataset log (DATASET_MODEL, name = dataset name)
//!     └── branch log (BRANCH_MODEL, name = "main")
//!         ops: branch init + COMMIT/PUSH/PULL annotation ops
//! ```

use std::fmt;
use std::fmt::Debug;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::RwLock;
use std::sync::RwLockReadGuard;

use ed25519_dalek::SigningKey;

use crate::clock::Clock;
use crate::dataset_ref;
use crate::dataset_ref::DatasetRef;
use crate::error::Error;
use crate::error::Result;
use crate::identity::Author;
use crate::journal::Journal;
use crate::log::Log;
use crate::log::LogId;
use crate::op::Op;
use crate::op::OpType;

/// Model tag of author logs.
pub const AUTHOR_MODEL: u32 = 0x0001;
/// Model tag of dataset logs.
pub const DATASET_MODEL: u32 = 0x0002;
/// Model tag of branch logs.
pub const BRANCH_MODEL: u32 = 0x0003;
/// Model tag of version commit ops, appended to branch logs.
pub const COMMIT_MODEL: u32 = 0x0004;
/// Model tag of publish/push marker ops, appended to branch logs.
pub const PUSH_MODEL: u32 = 0x0005;
/// Model tag of pull marker ops, appended to branch logs.
pub const PULL_MODEL: u32 = 0x0006;

/// Name of the branch every dataset starts with.
pub const DEFAULT_BRANCH: &str = "main";

/// One entry in a dataset's version listing.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct VersionInfo {
    /// Content id of this version.
    pub ref_id: String,
    /// Content id of the previous version, empty for the first.
    pub prev: String,
    /// Nanoseconds since the unix epoch.
    pub timestamp: i64,
    /// Version size in bytes.
    pub size: i64,
    /// Commit title.
    pub note: String,
}

/// Undo handle for an eagerly written push/pull marker op.
///
/// Dropping the guard keeps the marker; calling [`MarkerRollback::rollback`]
/// truncates the branch log back to its pre-marker length.
#[must_use]
pub struct MarkerRollback<'a> {
    book: &'a Book,
    dsref: DatasetRef,
    watermark: usize,
}

impl MarkerRollback<'_> {
    /// Removes the marker op written when this guard was created.
    pub fn rollback(self) -> Result<()> {
        self.book.mutate(|journal| {
            let branch = branch_log_mut(journal, &self.dsref)?;
            branch.truncate_ops(self.watermark);
            Ok(())
        })
    }
}

/// A journal plus the meaning of its logs, owned by one local identity.
pub struct Book {
    journal: RwLock<Journal>,
    path: PathBuf,
    key: SigningKey,
    clock: Arc<dyn Clock>,
}

impl Book {
    /// Opens the book at `path`, creating and initializing the journal
    /// (owner's author log included) on first use.
    pub fn open(
        path: PathBuf,
        username: &str,
        key: SigningKey,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        if !dataset_ref::valid_component(username) {
            return Err(Error::BadRequest(format!("invalid username {username:?}")));
        }
        let owner = Author::new(username, key.verifying_key());
        let journal = if path.exists() {
            Journal::load(&path, owner, &key)?
        } else {
            let mut journal = Journal::new(owner.clone());
            let author_log = Log::init(Op {
                op_type: OpType::Init,
                model: AUTHOR_MODEL,
                name: username.to_string(),
                author_id: owner.id().to_string(),
                timestamp: clock.now_nanos(),
                ..Op::default()
            })?;
            let id = author_log.id();
            journal.append_log(author_log)?;
            journal.set_active_id(&id)?;
            journal.save(&path, &key)?;
            tracing::info!(%username, journal = %path.display(), "initialized journal");
            journal
        };
        Ok(Self {
            journal: RwLock::new(journal),
            path,
            key,
            clock,
        })
    }

    /// The owning identity.
    pub fn owner(&self) -> Author {
        self.journal().owner().clone()
    }

    /// Read access to the underlying journal.
    pub fn journal(&self) -> RwLockReadGuard<'_, Journal> {
        self.journal.read().unwrap()
    }

    /// Signs `log` with the owner's private key.
    pub fn sign_log(&self, log: &mut Log) {
        log.sign(&self.key);
    }

    /// Runs a mutation under the write lock, persisting the journal after.
    fn mutate<T>(&self, f: impl FnOnce(&mut Journal) -> Result<T>) -> Result<T> {
        let mut journal = self.journal.write().unwrap();
        let value = f(&mut journal)?;
        journal.save(&self.path, &self.key)?;
        Ok(value)
    }

    fn now(&self) -> i64 {
        self.clock.now_nanos()
    }

    fn owner_id(&self) -> String {
        self.journal().owner().id().to_string()
    }

    /// Only the identity that authors a log may append to it.
    fn ensure_owned(&self, log: &Log, owner_id: &str) -> Result<()> {
        if log.author() != owner_id {
            return Err(Error::Denied(format!(
                "log {} is authored by another identity",
                log.name()
            )));
        }
        Ok(())
    }

    /// Creates a dataset log (with its `main` branch) under the owner's
    /// author log, returning the dataset's stable init id.
    pub fn init_dataset(&self, name: &str) -> Result<LogId> {
        if !dataset_ref::valid_component(name) {
            return Err(Error::BadRequest(format!("invalid dataset name {name:?}")));
        }
        let author_id = self.owner_id();
        let now = self.now();
        self.mutate(|journal| {
            let author_log = journal.active_log_mut()?;
            if author_log
                .children()
                .iter()
                .any(|child| !child.removed() && child.name() == name)
            {
                return Err(Error::BadRequest(format!("dataset {name:?} already exists")));
            }
            let mut dataset_log = Log::init(Op {
                op_type: OpType::Init,
                model: DATASET_MODEL,
                name: name.to_string(),
                author_id: author_id.clone(),
                timestamp: now,
                ..Op::default()
            })?;
            let branch_log = Log::init(Op {
                op_type: OpType::Init,
                model: BRANCH_MODEL,
                name: DEFAULT_BRANCH.to_string(),
                author_id: author_id.clone(),
                timestamp: now,
                ..Op::default()
            })?;
            dataset_log.add_child(branch_log)?;
            let id = dataset_log.id();
            author_log.add_child(dataset_log)?;
            tracing::info!(dataset = name, id = %id, "initialized dataset");
            Ok(id)
        })
    }

    /// Renames a dataset in place; history stays under the new name.
    pub fn rename_dataset(&self, dsref: &DatasetRef, new_name: &str) -> Result<()> {
        if !dataset_ref::valid_component(new_name) {
            return Err(Error::BadRequest(format!(
                "invalid dataset name {new_name:?}"
            )));
        }
        let author_id = self.owner_id();
        let now = self.now();
        self.mutate(|journal| {
            let taken = journal
                .head_ref(&[&dsref.username, new_name])
                .is_ok();
            if taken {
                return Err(Error::BadRequest(format!(
                    "dataset {new_name:?} already exists"
                )));
            }
            let dataset_log = journal.head_ref_mut(&[&dsref.username, &dsref.name])?;
            self.ensure_owned(dataset_log, &author_id)?;
            dataset_log.append(Op {
                op_type: OpType::Amend,
                model: DATASET_MODEL,
                name: new_name.to_string(),
                author_id: author_id.clone(),
                timestamp: now,
                ..Op::default()
            });
            Ok(())
        })
    }

    /// Marks a dataset removed. The subtree stays readable for archival but
    /// disappears from name lookup and listings.
    pub fn delete_dataset(&self, dsref: &DatasetRef) -> Result<()> {
        let author_id = self.owner_id();
        let now = self.now();
        self.mutate(|journal| {
            let dataset_log = journal.head_ref_mut(&[&dsref.username, &dsref.name])?;
            self.ensure_owned(dataset_log, &author_id)?;
            dataset_log.append(Op {
                op_type: OpType::Remove,
                model: DATASET_MODEL,
                author_id: author_id.clone(),
                timestamp: now,
                ..Op::default()
            });
            Ok(())
        })
    }

    /// Records a new version of a dataset: a commit op on the branch log
    /// with `prev` chaining to the previous version.
    pub fn commit_version(
        &self,
        dsref: &DatasetRef,
        version_id: &str,
        size: i64,
        note: &str,
    ) -> Result<()> {
        let author_id = self.owner_id();
        let now = self.now();
        self.mutate(|journal| {
            let branch = branch_log_mut(journal, dsref)?;
            self.ensure_owned(branch, &author_id)?;
            let prev = items_from_branch(branch)
                .last()
                .map_or(String::new(), |item| item.ref_id.clone());
            branch.append(Op {
                op_type: OpType::Init,
                model: COMMIT_MODEL,
                ref_id: version_id.to_string(),
                prev,
                author_id: author_id.clone(),
                timestamp: now,
                size,
                note: note.to_string(),
                ..Op::default()
            });
            Ok(())
        })
    }

    /// Replaces the latest version with a re-save, keeping its place in the
    /// chain.
    pub fn amend_version(
        &self,
        dsref: &DatasetRef,
        version_id: &str,
        size: i64,
        note: &str,
    ) -> Result<()> {
        let author_id = self.owner_id();
        let now = self.now();
        self.mutate(|journal| {
            let branch = branch_log_mut(journal, dsref)?;
            self.ensure_owned(branch, &author_id)?;
            let prev = items_from_branch(branch)
                .last()
                .map(|item| item.prev.clone())
                .ok_or_else(|| Error::BadRequest("no version to amend".to_string()))?;
            branch.append(Op {
                op_type: OpType::Amend,
                model: COMMIT_MODEL,
                ref_id: version_id.to_string(),
                prev,
                author_id: author_id.clone(),
                timestamp: now,
                size,
                note: note.to_string(),
                ..Op::default()
            });
            Ok(())
        })
    }

    /// Drops the latest `revisions` versions from the listing.
    pub fn delete_versions(&self, dsref: &DatasetRef, revisions: i64) -> Result<()> {
        if revisions < 1 {
            return Err(Error::BadRequest(
                "must delete at least one revision".to_string(),
            ));
        }
        let author_id = self.owner_id();
        let now = self.now();
        self.mutate(|journal| {
            let branch = branch_log_mut(journal, dsref)?;
            self.ensure_owned(branch, &author_id)?;
            let have = items_from_branch(branch).len() as i64;
            if revisions > have {
                return Err(Error::BadRequest(format!(
                    "cannot delete {revisions} of {have} revisions"
                )));
            }
            branch.append(Op {
                op_type: OpType::Remove,
                model: COMMIT_MODEL,
                author_id: author_id.clone(),
                timestamp: now,
                size: revisions,
                ..Op::default()
            });
            Ok(())
        })
    }

    /// Records that this dataset is published at `remote_addr`.
    pub fn publish(&self, dsref: &DatasetRef, remote_addr: &str) -> Result<()> {
        self.append_marker(dsref, PUSH_MODEL, OpType::Init, remote_addr)
            .map(|_| ())
    }

    /// Retracts a publication record.
    pub fn unpublish(&self, dsref: &DatasetRef, remote_addr: &str) -> Result<()> {
        self.append_marker(dsref, PUSH_MODEL, OpType::Remove, remote_addr)
            .map(|_| ())
    }

    /// Eagerly records a push to `remote_addr`, returning the subtree to
    /// send and a rollback handle for the marker op. The marker is written
    /// *before* the transfer; the caller rolls it back if the transfer
    /// fails.
    pub fn write_remote_push(
        &self,
        dsref: &DatasetRef,
        remote_addr: &str,
    ) -> Result<(Log, MarkerRollback<'_>)> {
        let watermark = self.append_marker(dsref, PUSH_MODEL, OpType::Init, remote_addr)?;
        let log = self.user_dataset_branches_log(dsref)?;
        Ok((
            log,
            MarkerRollback {
                book: self,
                dsref: dsref.clone(),
                watermark,
            },
        ))
    }

    /// Records a completed pull from `remote_addr` on a branch this
    /// identity authors.
    pub fn write_remote_pull(&self, dsref: &DatasetRef, remote_addr: &str) -> Result<()> {
        self.append_marker(dsref, PULL_MODEL, OpType::Init, remote_addr)
            .map(|_| ())
    }

    /// Appends a marker op to the branch log, returning the branch's
    /// pre-append op count.
    fn append_marker(
        &self,
        dsref: &DatasetRef,
        model: u32,
        op_type: OpType,
        remote_addr: &str,
    ) -> Result<usize> {
        let author_id = self.owner_id();
        let now = self.now();
        self.mutate(|journal| {
            let branch = branch_log_mut(journal, dsref)?;
            self.ensure_owned(branch, &author_id)?;
            let watermark = branch.ops().len();
            branch.append(Op {
                op_type,
                model,
                relations: vec![remote_addr.to_string()],
                author_id: author_id.clone(),
                timestamp: now,
                ..Op::default()
            });
            Ok(watermark)
        })
    }

    /// The version listing of a dataset, replayed from its commit ops.
    pub fn items(&self, dsref: &DatasetRef) -> Result<Vec<VersionInfo>> {
        let journal = self.journal();
        let branch = branch_log(&journal, dsref)?;
        Ok(items_from_branch(branch))
    }

    /// All live datasets in the journal, own and merged-foreign alike.
    pub fn datasets(&self) -> Vec<DatasetRef> {
        let journal = self.journal();
        let mut refs = vec![];
        for author_log in journal.logs() {
            if author_log.model() != AUTHOR_MODEL || author_log.removed() {
                continue;
            }
            for dataset_log in author_log.children() {
                if dataset_log.model() == DATASET_MODEL && !dataset_log.removed() {
                    refs.push(DatasetRef::new(author_log.name(), dataset_log.name()));
                }
            }
        }
        refs
    }

    /// Fills in a ref's annotations: the author's profile id and the latest
    /// version path.
    pub fn resolve_ref(&self, dsref: &DatasetRef) -> Result<DatasetRef> {
        let journal = self.journal();
        let dataset_log = journal.head_ref(&[&dsref.username, &dsref.name])?;
        let mut resolved = DatasetRef::new(&dsref.username, &dsref.name);
        resolved.profile_id = dataset_log.author().to_string();
        if let Ok(branch) = dataset_log.descend(&[DEFAULT_BRANCH]) {
            if let Some(latest) = items_from_branch(branch).last() {
                resolved.path = latest.ref_id.clone();
            }
        }
        Ok(resolved)
    }

    /// The stable init id of a dataset log.
    pub fn init_id(&self, dsref: &DatasetRef) -> Result<LogId> {
        let journal = self.journal();
        Ok(journal.head_ref(&[&dsref.username, &dsref.name])?.id())
    }

    /// A pruned author log containing exactly one dataset subtree: the unit
    /// that travels over logsync.
    pub fn user_dataset_branches_log(&self, dsref: &DatasetRef) -> Result<Log> {
        let journal = self.journal();
        let author_log = journal
            .logs()
            .iter()
            .find(|log| !log.removed() && log.name() == dsref.username)
            .ok_or_else(|| Error::not_found(format!("author log {}", dsref.username)))?;
        let dataset_log = author_log.descend(&[&dsref.name])?;
        Log::from_parts(
            author_log.ops().to_vec(),
            vec![dataset_log.clone()],
            author_log.signature().to_vec(),
        )
    }

    /// Merges a foreign log tree and persists.
    pub fn merge_and_save(&self, incoming: Log) -> Result<()> {
        self.mutate(|journal| journal.merge_log(incoming))
    }

    /// Structurally removes a dataset subtree from the journal and
    /// persists, returning the removed log for archival handling.
    pub fn remove_dataset(&self, dsref: &DatasetRef) -> Result<Log> {
        self.mutate(|journal| journal.remove_log(&[&dsref.username, &dsref.name]))
    }
}

impl Debug for Book {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Book")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

fn branch_log<'a>(journal: &'a Journal, dsref: &DatasetRef) -> Result<&'a Log> {
    journal.head_ref(&[&dsref.username, &dsref.name, DEFAULT_BRANCH])
}

fn branch_log_mut<'a>(journal: &'a mut Journal, dsref: &DatasetRef) -> Result<&'a mut Log> {
    journal.head_ref_mut(&[&dsref.username, &dsref.name, DEFAULT_BRANCH])
}

/// Replays a branch log's commit ops into a version listing.
pub fn items_from_branch(branch: &Log) -> Vec<VersionInfo> {
    let mut items: Vec<VersionInfo> = vec![];
    for op in branch.ops() {
        if op.model != COMMIT_MODEL {
            continue;
        }
        match op.op_type {
            OpType::Init => items.push(version_info(op)),
            OpType::Amend => {
                items.pop();
                items.push(version_info(op));
            }
            OpType::Remove => {
                let drop = usize::try_from(op.size.max(1)).unwrap_or(1);
                items.truncate(items.len().saturating_sub(drop));
            }
        }
    }
    items
}

fn version_info(op: &Op) -> VersionInfo {
    VersionInfo {
        ref_id: op.ref_id.clone(),
        prev: op.prev.clone(),
        timestamp: op.timestamp,
        size: op.size,
        note: op.note.clone(),
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::clock::SystemClock;
    use crate::keys::generate_signing_key;

    fn open_book(temp_dir: &tempfile::TempDir, username: &str) -> Book {
        Book::open(
            temp_dir.path().join(format!("{username}.keel")),
            username,
            generate_signing_key(),
            Arc::new(SystemClock),
        )
        .unwrap()
    }

    #[test]
    fn test_open_initializes_author_log() {
        let temp_dir = tempfile::tempdir().unwrap();
        let book = open_book(&temp_dir, "b5");
        let journal = book.journal();
        let author_log = journal.active_log().unwrap();
        assert_eq!(author_log.model(), AUTHOR_MODEL);
        assert_eq!(author_log.name(), "b5");
        assert_eq!(author_log.author(), book.owner().id().as_str());
    }

    #[test]
    fn test_init_dataset_creates_branch() {
        let temp_dir = tempfile::tempdir().unwrap();
        let book = open_book(&temp_dir, "b5");
        let id = book.init_dataset("population").unwrap();
        let journal = book.journal();
        let dataset_log = journal.head_ref(&["b5", "population"]).unwrap();
        assert_eq!(dataset_log.id(), id);
        assert_eq!(dataset_log.model(), DATASET_MODEL);
        let branch = journal.head_ref(&["b5", "population", "main"]).unwrap();
        assert_eq!(branch.model(), BRANCH_MODEL);
    }

    #[test]
    fn test_init_dataset_rejects_duplicate_name() {
        let temp_dir = tempfile::tempdir().unwrap();
        let book = open_book(&temp_dir, "b5");
        book.init_dataset("population").unwrap();
        assert_matches!(book.init_dataset("population"), Err(Error::BadRequest(_)));
    }

    #[test]
    fn test_rename_then_delete_dataset() {
        let temp_dir = tempfile::tempdir().unwrap();
        let book = open_book(&temp_dir, "b5");
        book.init_dataset("population").unwrap();
        let dsref = DatasetRef::new("b5", "population");
        book.rename_dataset(&dsref, "pop").unwrap();
        let renamed = DatasetRef::new("b5", "pop");
        assert!(book.journal().head_ref(&["b5", "population"]).is_err());
        assert!(book.journal().head_ref(&["b5", "pop"]).is_ok());

        book.delete_dataset(&renamed).unwrap();
        assert!(book.journal().head_ref(&["b5", "pop"]).is_err());
        assert_eq!(book.datasets(), vec![]);
    }

    #[test]
    fn test_version_listing_replay() {
        let temp_dir = tempfile::tempdir().unwrap();
        let book = open_book(&temp_dir, "b5");
        book.init_dataset("pop").unwrap();
        let dsref = DatasetRef::new("b5", "pop");

        book.commit_version(&dsref, "QmOne", 10, "first").unwrap();
        book.commit_version(&dsref, "QmTwo", 20, "second").unwrap();
        let items = book.items(&dsref).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].ref_id, "QmOne");
        assert_eq!(items[1].prev, "QmOne");

        book.amend_version(&dsref, "QmTwoFixed", 21, "second, fixed")
            .unwrap();
        let items = book.items(&dsref).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].ref_id, "QmTwoFixed");
        assert_eq!(items[1].prev, "QmOne");

        book.delete_versions(&dsref, 1).unwrap();
        let items = book.items(&dsref).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].ref_id, "QmOne");

        assert_matches!(book.delete_versions(&dsref, 5), Err(Error::BadRequest(_)));
    }

    #[test]
    fn test_push_marker_rollback() {
        let temp_dir = tempfile::tempdir().unwrap();
        let book = open_book(&temp_dir, "b5");
        book.init_dataset("pop").unwrap();
        let dsref = DatasetRef::new("b5", "pop");
        book.commit_version(&dsref, "QmOne", 10, "first").unwrap();

        let ops_before = {
            let journal = book.journal();
            journal.head_ref(&["b5", "pop", "main"]).unwrap().ops().len()
        };
        let (log, rollback) = book.write_remote_push(&dsref, "https://peer.example").unwrap();
        // The marker op travels with the pushed subtree.
        let branch = log.descend(&["pop", "main"]).unwrap();
        assert_eq!(branch.ops().len(), ops_before + 1);
        assert_eq!(branch.head().model, PUSH_MODEL);

        rollback.rollback().unwrap();
        let journal = book.journal();
        let branch = journal.head_ref(&["b5", "pop", "main"]).unwrap();
        assert_eq!(branch.ops().len(), ops_before);
    }

    #[test]
    fn test_pushed_subtree_is_pruned_to_one_dataset() {
        let temp_dir = tempfile::tempdir().unwrap();
        let book = open_book(&temp_dir, "b5");
        book.init_dataset("one").unwrap();
        book.init_dataset("two").unwrap();
        let log = book
            .user_dataset_branches_log(&DatasetRef::new("b5", "one"))
            .unwrap();
        assert_eq!(log.name(), "b5");
        assert_eq!(log.children().len(), 1);
        assert_eq!(log.children()[0].name(), "one");
    }

    #[test]
    fn test_writes_to_foreign_logs_are_denied() {
        let temp_dir = tempfile::tempdir().unwrap();
        let alice = open_book(&temp_dir, "alice");
        alice.init_dataset("pop").unwrap();
        let dsref = DatasetRef::new("alice", "pop");
        let foreign = alice.user_dataset_branches_log(&dsref).unwrap();

        let bob = open_book(&temp_dir, "bob");
        bob.merge_and_save(foreign).unwrap();
        assert_matches!(
            bob.commit_version(&dsref, "QmEvil", 1, "hijack"),
            Err(Error::Denied(_))
        );
    }

    #[test]
    fn test_publication_markers() {
        let temp_dir = tempfile::tempdir().unwrap();
        let book = open_book(&temp_dir, "b5");
        book.init_dataset("pop").unwrap();
        let dsref = DatasetRef::new("b5", "pop");
        book.publish(&dsref, "https://peer.example").unwrap();
        {
            let journal = book.journal();
            let branch = journal.head_ref(&["b5", "pop", "main"]).unwrap();
            let head = branch.head();
            assert_eq!(head.model, PUSH_MODEL);
            assert_eq!(head.op_type, OpType::Init);
            assert_eq!(head.relations, vec!["https://peer.example".to_string()]);
        }

        book.unpublish(&dsref, "https://peer.example").unwrap();
        let journal = book.journal();
        let branch = journal.head_ref(&["b5", "pop", "main"]).unwrap();
        let head = branch.head();
        assert_eq!(head.model, PUSH_MODEL);
        assert_eq!(head.op_type, OpType::Remove);
        // Publication markers never mark the branch itself removed.
        assert!(!branch.removed());
    }

    #[test]
    fn test_resolve_ref_fills_annotations() {
        let temp_dir = tempfile::tempdir().unwrap();
        let book = open_book(&temp_dir, "b5");
        book.init_dataset("pop").unwrap();
        let dsref = DatasetRef::new("b5", "pop");
        book.commit_version(&dsref, "QmLatest", 10, "first").unwrap();

        let resolved = book.resolve_ref(&dsref).unwrap();
        assert_eq!(resolved.username, "b5");
        assert_eq!(resolved.name, "pop");
        assert_eq!(resolved.profile_id, book.owner().id().as_str());
        assert_eq!(resolved.path, "QmLatest");
    }
}
