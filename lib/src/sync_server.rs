// Copyright 2023 The Keel Authors
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

//! The sync server: logsync plus policy, size limits, block pinning,
//! publication state, and domain events.
//!
//! `SyncServer` owns a [`Logsync`] whose hooks it wires to its own checks,
//! in order: size limit, policy, then the embedding application's hooks.
//! Policy denials happen before any state-changing work. After a push
//! completes the dataset is marked published, its version blocks are
//! pinned, and a [`Event::DatasetPushed`] goes out to subscribers.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fmt::Debug;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::RwLock;
use std::sync::mpsc;

use crate::block_store::BlockStore;
use crate::book::Book;
use crate::book::COMMIT_MODEL;
use crate::book::VersionInfo;
use crate::dataset_ref::DatasetRef;
use crate::error::Error;
use crate::error::Result;
use crate::identity::Author;
use crate::keystore::KeyStore;
use crate::log::Log;
use crate::logsync::Hook;
use crate::logsync::HookError;
use crate::logsync::Logsync;
use crate::op::OpType;

type HookResult = std::result::Result<(), HookError>;

pub const ACTION_PUSH: &str = "remote:push";
pub const ACTION_PULL: &str = "remote:pull";
pub const ACTION_REMOVE: &str = "remote:remove";

/// An opaque access-control evaluator. Any error denies.
pub trait Policy: Send + Sync + Debug {
    fn enforce(&self, subject: &str, resource: &str, action: &str) -> Result<()>;
}

/// The resource string policies see for a dataset.
pub fn dataset_resource(dsref: &DatasetRef) -> String {
    format!("dataset:{}:{}", dsref.username, dsref.name)
}

/// Domain events emitted as sync operations complete.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    DatasetPushed { sender: String, dsref: DatasetRef },
    DatasetPulled { sender: String, dsref: DatasetRef },
    DatasetRemoved { sender: String, dsref: DatasetRef },
}

/// Construction parameters for [`SyncServer`]. The hooks here are the
/// embedding application's; they run after the server's own checks.
pub struct SyncServerOptions {
    /// Maximum cumulative size in bytes of the versions a push may carry.
    /// `-1` means no limit; `0` rejects all pushes.
    pub max_push_bytes: i64,
    pub policy: Option<Arc<dyn Policy>>,
    pub push_precheck: Option<Hook>,
    pub push_final_check: Option<Hook>,
    pub pull_precheck: Option<Hook>,
    pub remove_precheck: Option<Hook>,
}

impl Default for SyncServerOptions {
    fn default() -> Self {
        Self {
            max_push_bytes: -1,
            policy: None,
            push_precheck: None,
            push_final_check: None,
            pull_precheck: None,
            remove_precheck: None,
        }
    }
}

struct ServerState {
    block_store: Arc<dyn BlockStore>,
    policy: Option<Arc<dyn Policy>>,
    max_push_bytes: i64,
    published: RwLock<BTreeSet<String>>,
    subscribers: Mutex<Vec<mpsc::Sender<Event>>>,
    user_push_precheck: Option<Hook>,
    user_push_final_check: Option<Hook>,
    user_pull_precheck: Option<Hook>,
    user_remove_precheck: Option<Hook>,
}

impl ServerState {
    fn enforce(&self, sender: &Author, dsref: &DatasetRef, action: &str) -> Result<()> {
        if let Some(policy) = &self.policy {
            policy.enforce(sender.id().as_str(), &dataset_resource(dsref), action)?;
        }
        Ok(())
    }

    fn emit(&self, event: Event) {
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|sender| sender.send(event.clone()).is_ok());
    }

    fn push_precheck(&self, sender: &Author, dsref: &DatasetRef) -> HookResult {
        if self.max_push_bytes == 0 {
            return Err("pushes are disabled on this node".into());
        }
        self.enforce(sender, dsref, ACTION_PUSH)
            .map_err(|err| HookError::from(err.to_string()))?;
        if let Some(hook) = &self.user_push_precheck {
            hook(sender, dsref, None)?;
        }
        Ok(())
    }

    fn push_final_check(&self, sender: &Author, dsref: &DatasetRef, log: &Log) -> HookResult {
        if self.max_push_bytes >= 0 {
            let total = cumulative_version_bytes(log);
            if total > self.max_push_bytes {
                return Err(format!(
                    "push of {total} bytes exceeds this node's limit of {} bytes",
                    self.max_push_bytes
                )
                .into());
            }
        }
        if let Some(hook) = &self.user_push_final_check {
            hook(sender, dsref, Some(log))?;
        }
        Ok(())
    }

    fn pushed(&self, sender: &Author, dsref: &DatasetRef, log: &Log) {
        for ref_id in live_version_refs(log) {
            if let Err(err) = self.block_store.pin(&ref_id) {
                tracing::warn!(?err, %ref_id, "failed to pin pushed version");
            }
        }
        self.published.write().unwrap().insert(dsref.alias());
        self.emit(Event::DatasetPushed {
            sender: sender.id().to_string(),
            dsref: DatasetRef::new(&dsref.username, &dsref.name),
        });
    }

    fn removed(&self, sender: &Author, dsref: &DatasetRef, log: Option<&Log>) {
        if let Some(log) = log {
            for ref_id in live_version_refs(log) {
                if let Err(err) = self.block_store.unpin(&ref_id) {
                    tracing::warn!(?err, %ref_id, "failed to unpin removed version");
                }
            }
        }
        self.published.write().unwrap().remove(&dsref.alias());
        self.emit(Event::DatasetRemoved {
            sender: sender.id().to_string(),
            dsref: DatasetRef::new(&dsref.username, &dsref.name),
        });
    }
}

/// Sums the declared sizes of every live version a subtree carries.
fn cumulative_version_bytes(log: &Log) -> i64 {
    let own: i64 = log
        .ops()
        .iter()
        .filter(|op| op.model == COMMIT_MODEL && op.op_type != OpType::Remove)
        .map(|op| op.size.max(0))
        .sum();
    own + log.children().iter().map(cumulative_version_bytes).sum::<i64>()
}

/// Content ids of every live version a subtree carries.
fn live_version_refs(log: &Log) -> Vec<String> {
    let mut refs: Vec<String> = log
        .ops()
        .iter()
        .filter(|op| {
            op.model == COMMIT_MODEL && op.op_type != OpType::Remove && !op.ref_id.is_empty()
        })
        .map(|op| op.ref_id.clone())
        .collect();
    for child in log.children() {
        refs.extend(live_version_refs(child));
    }
    refs
}

/// Logsync plus block transfer bookkeeping for a node that serves peers.
pub struct SyncServer {
    logsync: Logsync,
    state: Arc<ServerState>,
}

impl SyncServer {
    pub fn new(
        book: Arc<Book>,
        key_book: Arc<dyn KeyStore>,
        block_store: Arc<dyn BlockStore>,
        options: SyncServerOptions,
    ) -> Arc<Self> {
        let state = Arc::new(ServerState {
            block_store,
            policy: options.policy,
            max_push_bytes: options.max_push_bytes,
            published: RwLock::new(BTreeSet::new()),
            subscribers: Mutex::new(vec![]),
            user_push_precheck: options.push_precheck,
            user_push_final_check: options.push_final_check,
            user_pull_precheck: options.pull_precheck,
            user_remove_precheck: options.remove_precheck,
        });
        let logsync = Logsync::new(book)
            .with_key_book(key_book)
            .with_push_precheck({
                let state = state.clone();
                Box::new(move |sender, dsref, _log| state.push_precheck(sender, dsref))
            })
            .with_push_final_check({
                let state = state.clone();
                Box::new(move |sender, dsref, log| {
                    let log = log.ok_or("push final check ran without a log")?;
                    state.push_final_check(sender, dsref, log)
                })
            })
            .with_pushed({
                let state = state.clone();
                Box::new(move |sender, dsref, log| {
                    if let Some(log) = log {
                        state.pushed(sender, dsref, log);
                    }
                    Ok(())
                })
            })
            .with_pull_precheck({
                let state = state.clone();
                Box::new(move |sender, dsref, _log| {
                    state
                        .enforce(sender, dsref, ACTION_PULL)
                        .map_err(|err| HookError::from(err.to_string()))?;
                    if let Some(hook) = &state.user_pull_precheck {
                        hook(sender, dsref, None)?;
                    }
                    Ok(())
                })
            })
            .with_pulled({
                let state = state.clone();
                Box::new(move |sender, dsref, _log| {
                    state.emit(Event::DatasetPulled {
                        sender: sender.id().to_string(),
                        dsref: DatasetRef::new(&dsref.username, &dsref.name),
                    });
                    Ok(())
                })
            })
            .with_remove_precheck({
                let state = state.clone();
                Box::new(move |sender, dsref, _log| {
                    state
                        .enforce(sender, dsref, ACTION_REMOVE)
                        .map_err(|err| HookError::from(err.to_string()))?;
                    if let Some(hook) = &state.user_remove_precheck {
                        hook(sender, dsref, None)?;
                    }
                    Ok(())
                })
            })
            .with_removed({
                let state = state.clone();
                Box::new(move |sender, dsref, log| {
                    state.removed(sender, dsref, log);
                    Ok(())
                })
            });
        Arc::new(Self { logsync, state })
    }

    pub fn logsync(&self) -> &Logsync {
        &self.logsync
    }

    pub fn book(&self) -> &Arc<Book> {
        self.logsync.book()
    }

    /// Receives every future [`Event`] this server emits.
    pub fn subscribe(&self) -> mpsc::Receiver<Event> {
        let (sender, receiver) = mpsc::channel();
        self.state.subscribers.lock().unwrap().push(sender);
        receiver
    }

    /// Whether a dataset has been pushed to (and is served by) this node.
    pub fn published(&self, dsref: &DatasetRef) -> bool {
        self.state.published.read().unwrap().contains(&dsref.alias())
    }

    /// The read-only discovery listing: feed name to published datasets.
    pub fn feeds(&self) -> BTreeMap<String, Vec<DatasetRef>> {
        let published = self.state.published.read().unwrap();
        let datasets = self
            .book()
            .datasets()
            .into_iter()
            .filter(|dsref| published.contains(&dsref.alias()))
            .collect();
        BTreeMap::from([("datasets".to_string(), datasets)])
    }

    /// Version listing of one published dataset.
    pub fn feed(&self, dsref: &DatasetRef) -> Result<Vec<VersionInfo>> {
        if !self.published(dsref) {
            return Err(Error::not_found(format!("feed {}", dsref.alias())));
        }
        self.book().items(dsref)
    }
}

impl Debug for SyncServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncServer")
            .field("logsync", &self.logsync)
            .field("max_push_bytes", &self.state.max_push_bytes)
            .finish_non_exhaustive()
    }
}
