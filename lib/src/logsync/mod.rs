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

//! Log subtree synchronization between peers.
//!
//! A `Logsync` wraps a [`Book`] and speaks three verbs — push, pull,
//! remove — over any [`Remote`] transport. Seven optional lifecycle hooks
//! let a layer above (see [`crate::sync_server`]) gate and observe each
//! verb: precheck hooks veto with [`Error::Denied`], post-operation hooks
//! only log their failures since the operation already happened.
//!
//! Whoever transmits log bytes signs the top-level log with their own key;
//! whoever receives them verifies against the transmitted `pub_key`
//! identity header. Signatures of nested logs ride along untouched.

use std::fmt;
use std::fmt::Debug;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::book::Book;
use crate::cancel::CancellationToken;
use crate::codec;
use crate::dataset_ref::DatasetRef;
use crate::error::Error;
use crate::error::Result;
use crate::identity::Author;
use crate::keystore::KeyStore;
use crate::log::Log;

pub mod http;
pub mod p2p;

/// Error type hooks may fail with.
pub type HookError = Box<dyn std::error::Error + Send + Sync>;

/// A lifecycle hook: `(sender, ref, log)`. The log argument is present
/// where the hook's table entry says it is.
pub type Hook =
    Box<dyn Fn(&Author, &DatasetRef, Option<&Log>) -> std::result::Result<(), HookError> + Send + Sync>;

/// A connection to one peer, able to carry the three sync verbs.
pub trait Remote: Send + Sync {
    /// Address string for markers and logging, e.g. a base URL.
    fn addr(&self) -> String;

    /// Delivers a signed log subtree to the peer.
    fn put(&self, dsref: &DatasetRef, data: &[u8], cancel: &CancellationToken) -> Result<()>;

    /// Fetches a signed log subtree; returns the responding identity and
    /// the log bytes.
    fn get(&self, dsref: &DatasetRef, cancel: &CancellationToken) -> Result<(Author, Vec<u8>)>;

    /// Asks the peer to drop a log subtree.
    fn del(&self, dsref: &DatasetRef, cancel: &CancellationToken) -> Result<()>;
}

/// The parsed envelope of one incoming sync request.
#[derive(Clone, Debug)]
pub struct SyncInput {
    pub sender: Author,
    pub dsref: DatasetRef,
}

/// Push, pull, and remove of log subtrees, with lifecycle hooks.
pub struct Logsync {
    book: Arc<Book>,
    /// Cache of peer public keys, filled as verified pushes arrive.
    key_book: Option<Arc<dyn KeyStore>>,
    push_precheck: Option<Hook>,
    push_final_check: Option<Hook>,
    pushed: Option<Hook>,
    pull_precheck: Option<Hook>,
    pulled: Option<Hook>,
    remove_precheck: Option<Hook>,
    removed: Option<Hook>,
}

impl Logsync {
    pub fn new(book: Arc<Book>) -> Self {
        Self {
            book,
            key_book: None,
            push_precheck: None,
            push_final_check: None,
            pushed: None,
            pull_precheck: None,
            pulled: None,
            remove_precheck: None,
            removed: None,
        }
    }

    pub fn with_key_book(mut self, key_book: Arc<dyn KeyStore>) -> Self {
        self.key_book = Some(key_book);
        self
    }

    pub fn with_push_precheck(mut self, hook: Hook) -> Self {
        self.push_precheck = Some(hook);
        self
    }

    pub fn with_push_final_check(mut self, hook: Hook) -> Self {
        self.push_final_check = Some(hook);
        self
    }

    pub fn with_pushed(mut self, hook: Hook) -> Self {
        self.pushed = Some(hook);
        self
    }

    pub fn with_pull_precheck(mut self, hook: Hook) -> Self {
        self.pull_precheck = Some(hook);
        self
    }

    pub fn with_pulled(mut self, hook: Hook) -> Self {
        self.pulled = Some(hook);
        self
    }

    pub fn with_remove_precheck(mut self, hook: Hook) -> Self {
        self.remove_precheck = Some(hook);
        self
    }

    pub fn with_removed(mut self, hook: Hook) -> Self {
        self.removed = Some(hook);
        self
    }

    pub fn book(&self) -> &Arc<Book> {
        &self.book
    }

    /// Pushes one dataset's log subtree to a peer.
    ///
    /// A push marker op lands on the local branch log *before* any bytes
    /// move; any failure afterwards (cancellation included) rolls the
    /// marker back.
    pub fn push(
        &self,
        remote: &dyn Remote,
        dsref: &DatasetRef,
        cancel: &CancellationToken,
    ) -> Result<()> {
        cancel.check()?;
        let (mut log, rollback) = self.book.write_remote_push(dsref, &remote.addr())?;
        self.book.sign_log(&mut log);
        let data = codec::encode_log(&log);
        match with_retry(cancel, || remote.put(dsref, &data, cancel)) {
            Ok(()) => {
                tracing::info!(dsref = %dsref, remote = %remote.addr(), "pushed log");
                Ok(())
            }
            Err(err) => {
                if let Err(rollback_err) = rollback.rollback() {
                    tracing::warn!(?rollback_err, dsref = %dsref, "push rollback failed");
                }
                Err(err)
            }
        }
    }

    /// Pulls one dataset's log subtree from a peer and merges it.
    pub fn pull(
        &self,
        remote: &dyn Remote,
        dsref: &DatasetRef,
        cancel: &CancellationToken,
    ) -> Result<Log> {
        cancel.check()?;
        let (responder, data) = with_retry(cancel, || remote.get(dsref, cancel))?;
        let log = codec::decode_log(&data)?;
        log.verify(responder.pub_key())?;
        let alias = alias_of(&log)?;
        if !alias.same_dataset(dsref) {
            return Err(Error::IdMismatch(format!(
                "pulled log describes {} but {} was requested",
                alias.alias(),
                dsref.alias()
            )));
        }
        cancel.check()?;
        self.book.merge_and_save(log.clone())?;
        if log.author() == self.book.owner().id().as_str() {
            // Pulling one of our own datasets back; record the provenance.
            if let Err(err) = self.book.write_remote_pull(dsref, &remote.addr()) {
                tracing::warn!(?err, dsref = %dsref, "failed to write pull marker");
            }
        }
        tracing::info!(dsref = %dsref, remote = %remote.addr(), "pulled log");
        Ok(log)
    }

    /// Asks a peer to drop one dataset's log subtree.
    pub fn remove(
        &self,
        remote: &dyn Remote,
        dsref: &DatasetRef,
        cancel: &CancellationToken,
    ) -> Result<()> {
        cancel.check()?;
        with_retry(cancel, || remote.del(dsref, cancel))
    }

    /// Receiver side of a push: hook gates, signature and alias checks,
    /// merge, post hook.
    pub fn receive_put(
        &self,
        input: &SyncInput,
        data: &[u8],
        cancel: &CancellationToken,
    ) -> Result<()> {
        cancel.check()?;
        run_precheck(&self.push_precheck, &input.sender, &input.dsref, None)?;
        let log = codec::decode_log(data)?;
        log.verify(input.sender.pub_key())?;
        let alias = alias_of(&log)?;
        if !alias.same_dataset(&input.dsref) {
            return Err(Error::IdMismatch(format!(
                "pushed log describes {} but the request names {}",
                alias.alias(),
                input.dsref.alias()
            )));
        }
        run_precheck(&self.push_final_check, &input.sender, &input.dsref, Some(&log))?;
        cancel.check()?;
        self.book.merge_and_save(log.clone())?;
        if let Some(key_book) = &self.key_book {
            if let Err(err) = key_book.put_pub_key(input.sender.id(), *input.sender.pub_key()) {
                tracing::warn!(?err, sender = %input.sender.id(), "failed to cache peer key");
            }
        }
        run_post_hook("pushed", &self.pushed, &input.sender, &input.dsref, Some(&log));
        tracing::info!(sender = %input.sender.id(), dsref = %input.dsref, "merged pushed log");
        Ok(())
    }

    /// Receiver side of a pull: hook gates, then serves the subtree signed
    /// by this node.
    pub fn receive_get(&self, input: &SyncInput, cancel: &CancellationToken) -> Result<Vec<u8>> {
        cancel.check()?;
        run_precheck(&self.pull_precheck, &input.sender, &input.dsref, None)?;
        let mut log = self.book.user_dataset_branches_log(&input.dsref)?;
        self.book.sign_log(&mut log);
        let data = codec::encode_log(&log);
        run_post_hook("pulled", &self.pulled, &input.sender, &input.dsref, Some(&log));
        Ok(data)
    }

    /// Receiver side of a remove: hook gates, then detaches the subtree.
    pub fn receive_del(&self, input: &SyncInput, cancel: &CancellationToken) -> Result<()> {
        cancel.check()?;
        run_precheck(&self.remove_precheck, &input.sender, &input.dsref, None)?;
        let removed = self.book.remove_dataset(&input.dsref)?;
        run_post_hook(
            "removed",
            &self.removed,
            &input.sender,
            &input.dsref,
            Some(&removed),
        );
        tracing::info!(sender = %input.sender.id(), dsref = %input.dsref, "removed log");
        Ok(())
    }
}

impl Debug for Logsync {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logsync")
            .field("book", &self.book)
            .finish_non_exhaustive()
    }
}

/// The alias a pushed or pulled subtree canonically describes: the author
/// log's name over its single dataset child's name.
pub fn alias_of(log: &Log) -> Result<DatasetRef> {
    match log.children() {
        [dataset] => Ok(DatasetRef::new(log.name(), dataset.name())),
        _ => Err(Error::BadRequest(
            "log must contain exactly one dataset subtree".to_string(),
        )),
    }
}

fn run_precheck(
    hook: &Option<Hook>,
    sender: &Author,
    dsref: &DatasetRef,
    log: Option<&Log>,
) -> Result<()> {
    if let Some(hook) = hook {
        hook(sender, dsref, log).map_err(|err| Error::Denied(err.to_string()))?;
    }
    Ok(())
}

fn run_post_hook(
    name: &str,
    hook: &Option<Hook>,
    sender: &Author,
    dsref: &DatasetRef,
    log: Option<&Log>,
) {
    if let Some(hook) = hook {
        if let Err(err) = hook(sender, dsref, log) {
            tracing::warn!(hook = name, ?err, dsref = %dsref, "post-operation hook failed");
        }
    }
}

const MAX_ATTEMPTS: u32 = 3;
const INITIAL_BACKOFF: Duration = Duration::from_millis(100);

/// Retries `f` on [`Error::Transport`] with bounded exponential backoff.
/// No other error kind is retried; cancellation is checked between
/// attempts and never retried.
fn with_retry<T>(cancel: &CancellationToken, mut f: impl FnMut() -> Result<T>) -> Result<T> {
    let mut backoff = INITIAL_BACKOFF;
    let mut attempt = 1;
    loop {
        cancel.check()?;
        match f() {
            Ok(value) => return Ok(value),
            Err(err @ Error::Transport(_)) if attempt < MAX_ATTEMPTS => {
                tracing::warn!(?err, attempt, "transport failure, backing off");
                thread::sleep(backoff);
                backoff *= 2;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Maps an error kind onto the shared status vocabulary (HTTP codes, also
/// used verbatim by the framed transport).
pub fn status_code(err: &Error) -> u16 {
    match err {
        Error::BadRequest(_) | Error::Codec(_) => 400,
        Error::Signature | Error::IdMismatch(_) => 401,
        Error::Denied(_) => 403,
        Error::NotFound(_) => 404,
        Error::Transport(_) => 502,
        _ => 500,
    }
}

/// Reverses [`status_code`] on the client side of a transport.
pub fn error_from_status(status: u16, message: &str) -> Error {
    match status {
        400 => Error::BadRequest(message.to_string()),
        401 => Error::Signature,
        403 => Error::Denied(message.to_string()),
        404 => Error::NotFound(message.to_string()),
        _ => Error::transport(format!("peer responded with status {status}: {message}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op::Op;
    use crate::op::OpType;

    fn log_with_children(name: &str, children: Vec<&str>) -> Log {
        let mut log = Log::init(Op {
            op_type: OpType::Init,
            model: 1,
            name: name.to_string(),
            ..Op::default()
        })
        .unwrap();
        for child in children {
            log.add_child(
                Log::init(Op {
                    op_type: OpType::Init,
                    model: 2,
                    name: child.to_string(),
                    ..Op::default()
                })
                .unwrap(),
            )
            .unwrap();
        }
        log
    }

    #[test]
    fn test_alias_of_single_dataset_subtree() {
        let log = log_with_children("b5", vec!["pop"]);
        assert_eq!(alias_of(&log).unwrap(), DatasetRef::new("b5", "pop"));
        assert!(alias_of(&log_with_children("b5", vec![])).is_err());
        assert!(alias_of(&log_with_children("b5", vec!["a", "b"])).is_err());
    }

    #[test]
    fn test_status_codes_round_trip_semantics() {
        let denied = Error::Denied("no".to_string());
        assert_eq!(status_code(&denied), 403);
        assert!(matches!(error_from_status(403, "no"), Error::Denied(_)));
        assert_eq!(status_code(&Error::not_found("x")), 404);
        assert!(matches!(error_from_status(404, "x"), Error::NotFound(_)));
        assert_eq!(status_code(&Error::Signature), 401);
        assert!(matches!(error_from_status(401, ""), Error::Signature));
        assert!(matches!(error_from_status(500, "boom"), Error::Transport(_)));
    }
}
