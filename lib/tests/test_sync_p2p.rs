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

use std::net::TcpListener;
use std::sync::Arc;
use std::thread;

use assert_matches::assert_matches;
use keel_lib::block_store::MemBlockStore;
use keel_lib::cancel::CancellationToken;
use keel_lib::dataset_ref::DatasetRef;
use keel_lib::error::Error;
use keel_lib::keystore::MemKeyStore;
use keel_lib::logsync::Logsync;
use keel_lib::logsync::p2p;
use keel_lib::sync_server::SyncServer;
use keel_lib::sync_server::SyncServerOptions;
use testutils::new_temp_dir;
use testutils::open_test_book;

struct RunningServer {
    addr: String,
    cancel: CancellationToken,
    thread: Option<thread::JoinHandle<()>>,
}

impl RunningServer {
    fn start(server: Arc<SyncServer>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let cancel = CancellationToken::new();
        let serve_cancel = cancel.clone();
        let thread = thread::spawn(move || {
            p2p::serve(listener, server, serve_cancel).unwrap();
        });
        Self {
            addr,
            cancel,
            thread: Some(thread),
        }
    }
}

impl Drop for RunningServer {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(thread) = self.thread.take() {
            thread.join().unwrap();
        }
    }
}

#[test]
fn test_framed_push_and_pull_over_tcp() {
    let temp_dir = new_temp_dir();
    let alice = open_test_book(temp_dir.path(), "alice", 1);
    alice.init_dataset("pop").unwrap();
    let dsref = DatasetRef::new("alice", "pop");
    alice.commit_version(&dsref, "QmVersionOne", 100, "first").unwrap();

    let bob = open_test_book(temp_dir.path(), "bob", 2);
    let server = SyncServer::new(
        bob,
        Arc::new(MemKeyStore::new()),
        Arc::new(MemBlockStore::new()),
        SyncServerOptions::default(),
    );
    let running = RunningServer::start(server.clone());
    let cancel = CancellationToken::new();

    let alice_sync = Logsync::new(alice.clone());
    let remote = p2p::FramedRemote::new(running.addr.clone(), alice.owner());
    alice_sync.push(&remote, &dsref, &cancel).unwrap();
    assert_eq!(
        server.book().items(&dsref).unwrap(),
        alice.items(&dsref).unwrap()
    );

    let carol = open_test_book(temp_dir.path(), "carol", 3);
    let carol_sync = Logsync::new(carol.clone());
    let remote = p2p::FramedRemote::new(running.addr.clone(), carol.owner());
    carol_sync.pull(&remote, &dsref, &cancel).unwrap();
    assert_eq!(carol.items(&dsref).unwrap(), alice.items(&dsref).unwrap());
}

#[test]
fn test_framed_errors_carry_status() {
    let temp_dir = new_temp_dir();
    let bob = open_test_book(temp_dir.path(), "bob", 2);
    let server = SyncServer::new(
        bob,
        Arc::new(MemKeyStore::new()),
        Arc::new(MemBlockStore::new()),
        SyncServerOptions::default(),
    );
    let running = RunningServer::start(server);
    let carol = open_test_book(temp_dir.path(), "carol", 3);
    let carol_sync = Logsync::new(carol.clone());
    let remote = p2p::FramedRemote::new(running.addr.clone(), carol.owner());

    assert_matches!(
        carol_sync.pull(
            &remote,
            &DatasetRef::new("alice", "missing"),
            &CancellationToken::new()
        ),
        Err(Error::NotFound(_))
    );
}

#[test]
fn test_framed_connection_to_dead_server_is_transport_error() {
    let temp_dir = new_temp_dir();
    let carol = open_test_book(temp_dir.path(), "carol", 3);
    let carol_sync = Logsync::new(carol.clone());
    // A listener that is bound and immediately dropped: nothing serves.
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().to_string()
    };
    let remote = p2p::FramedRemote::new(addr, carol.owner());
    assert_matches!(
        carol_sync.pull(
            &remote,
            &DatasetRef::new("alice", "pop"),
            &CancellationToken::new()
        ),
        Err(Error::Transport(_))
    );
}
