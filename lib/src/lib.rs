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

#![warn(missing_docs)]
#![deny(unused_must_use)]

//! Library for Keel, a distributed dataset versioning system.
//!
//! The heart of the crate is the operation-log journal: an append-only
//! forest of signed, single-author [logs](log::Log) recording dataset
//! lifecycle events, collected in a per-identity [journal](journal::Journal)
//! that is encrypted at rest. Logs with a common initialization op merge as
//! a CRDT — two peers that exchange and merge their logs converge on the
//! same history.
//!
//! Around the journal sit the [book](book::Book), which writes the dataset
//! lifecycle (create, rename, commit, delete, publish, push, pull) into
//! journal ops; [logsync](logsync::Logsync), which moves log subtrees
//! between peers over HTTP or framed TCP; and the
//! [sync server](sync_server::SyncServer), which couples log transfer with
//! policy enforcement and block pinning.

pub mod block_store;
pub mod book;
pub mod cancel;
pub mod clock;
pub mod codec;
pub mod dataset_ref;
pub mod encryption;
pub mod error;
pub mod file_util;
pub mod identity;
pub mod journal;
pub mod keys;
pub mod keystore;
pub mod lock;
pub mod log;
pub mod logsync;
pub mod op;
pub mod protos;
pub mod sync_server;
