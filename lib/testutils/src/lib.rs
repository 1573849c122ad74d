// Copyright 2021 The Keel Authors
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

#![allow(missing_docs)]

//! Shared fixtures for keel-lib tests: deterministic keys and clocks,
//! scratch books, recording hooks, and an in-process [`Remote`].

use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicI64;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;

use ed25519_dalek::SigningKey;
use keel_lib::book::Book;
use keel_lib::cancel::CancellationToken;
use keel_lib::clock::Clock;
use keel_lib::dataset_ref::DatasetRef;
use keel_lib::error::Error;
use keel_lib::error::Result;
use keel_lib::identity::Author;
use keel_lib::logsync::Hook;
use keel_lib::logsync::Remote;
use keel_lib::logsync::SyncInput;
use keel_lib::sync_server::SyncServer;
use tempfile::TempDir;

pub fn new_temp_dir() -> TempDir {
    tempfile::Builder::new()
        .prefix("keel-test-")
        .tempdir()
        .unwrap()
}

/// A key pair generated deterministically from a one-byte seed.
pub fn test_signing_key(seed: u8) -> SigningKey {
    SigningKey::from_bytes(&[seed; 32])
}

pub fn test_author(username: &str, seed: u8) -> Author {
    Author::new(username, test_signing_key(seed).verifying_key())
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct FakeClock {
    nanos: AtomicI64,
}

impl FakeClock {
    pub fn at_secs(secs: i64) -> Arc<Self> {
        Arc::new(Self {
            nanos: AtomicI64::new(secs * 1_000_000_000),
        })
    }

    pub fn advance_secs(&self, secs: i64) {
        self.nanos.fetch_add(secs * 1_000_000_000, Ordering::SeqCst);
    }
}

impl Clock for FakeClock {
    fn now_nanos(&self) -> i64 {
        self.nanos.load(Ordering::SeqCst)
    }
}

/// Opens a book in `dir` for `username`, keyed by `seed`.
pub fn open_test_book(dir: &Path, username: &str, seed: u8) -> Arc<Book> {
    let clock = FakeClock::at_secs(1_700_000_000);
    Arc::new(
        Book::open(
            dir.join(format!("{username}.journal")),
            username,
            test_signing_key(seed),
            clock,
        )
        .unwrap(),
    )
}

/// Records each hook firing as `"label:username/name"` and optionally
/// rejects.
#[derive(Clone, Debug, Default)]
pub struct HookRecorder {
    calls: Arc<Mutex<Vec<String>>>,
}

impl HookRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn hook(&self, label: &'static str) -> Hook {
        let calls = self.calls.clone();
        Box::new(move |_sender, dsref, _log| {
            calls.lock().unwrap().push(format!("{label}:{}", dsref.alias()));
            Ok(())
        })
    }

    pub fn failing_hook(&self, label: &'static str) -> Hook {
        let calls = self.calls.clone();
        Box::new(move |_sender, dsref, _log| {
            calls.lock().unwrap().push(format!("{label}:{}", dsref.alias()));
            Err("rejected by test hook".into())
        })
    }
}

/// An in-process [`Remote`] that talks straight to a server's receive
/// handlers, skipping transport framing.
pub struct PipeRemote {
    server: Arc<SyncServer>,
    sender: Author,
}

impl PipeRemote {
    pub fn new(server: Arc<SyncServer>, sender: Author) -> Self {
        Self { server, sender }
    }

    fn input(&self, dsref: &DatasetRef) -> SyncInput {
        SyncInput {
            sender: self.sender.clone(),
            dsref: dsref.clone(),
        }
    }
}

impl Remote for PipeRemote {
    fn addr(&self) -> String {
        "pipe://test".to_string()
    }

    fn put(&self, dsref: &DatasetRef, data: &[u8], cancel: &CancellationToken) -> Result<()> {
        self.server
            .logsync()
            .receive_put(&self.input(dsref), data, cancel)
    }

    fn get(&self, dsref: &DatasetRef, cancel: &CancellationToken) -> Result<(Author, Vec<u8>)> {
        let data = self
            .server
            .logsync()
            .receive_get(&self.input(dsref), cancel)?;
        Ok((self.server.book().owner(), data))
    }

    fn del(&self, dsref: &DatasetRef, cancel: &CancellationToken) -> Result<()> {
        self.server.logsync().receive_del(&self.input(dsref), cancel)
    }
}

/// Wraps a [`Remote`], failing the first `failures` calls with a transport
/// error to exercise retry paths.
pub struct FlakyRemote<R> {
    inner: R,
    remaining_failures: AtomicU32,
}

impl<R: Remote> FlakyRemote<R> {
    pub fn new(inner: R, failures: u32) -> Self {
        Self {
            inner,
            remaining_failures: AtomicU32::new(failures),
        }
    }

    fn maybe_fail(&self) -> Result<()> {
        let remaining = self.remaining_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.remaining_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(Error::transport("injected transport failure"));
        }
        Ok(())
    }
}

impl<R: Remote> Remote for FlakyRemote<R> {
    fn addr(&self) -> String {
        self.inner.addr()
    }

    fn put(&self, dsref: &DatasetRef, data: &[u8], cancel: &CancellationToken) -> Result<()> {
        self.maybe_fail()?;
        self.inner.put(dsref, data, cancel)
    }

    fn get(&self, dsref: &DatasetRef, cancel: &CancellationToken) -> Result<(Author, Vec<u8>)> {
        self.maybe_fail()?;
        self.inner.get(dsref, cancel)
    }

    fn del(&self, dsref: &DatasetRef, cancel: &CancellationToken) -> Result<()> {
        self.maybe_fail()?;
        self.inner.del(dsref, cancel)
    }
}
