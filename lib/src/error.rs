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

//! Semantic error kinds shared across the journal and the sync protocol.
//!
//! Transports map these onto their own status vocabularies; see
//! [`crate::logsync::status_code`]. Precheck hooks surface their error as
//! [`Error::Denied`], post-operation hooks log and suppress.

use thiserror::Error;

use crate::file_util::PathError;

/// Any error produced by the journal core or the sync protocol.
#[derive(Debug, Error)]
pub enum Error {
    /// A log, ref, key, or journal id does not exist.
    #[error("{0}: not found")]
    NotFound(String),
    /// Malformed input, missing required fields, unparseable ref or header.
    #[error("bad request: {0}")]
    BadRequest(String),
    /// A policy or hook rejected the operation. Distinct from `NotFound`.
    #[error("access denied: {0}")]
    Denied(String),
    /// A key disagrees with its derived id, or a pushed log disagrees with
    /// the declared ref.
    #[error("id mismatch: {0}")]
    IdMismatch(String),
    /// Signature verification failed, or a required signature was empty.
    #[error("signature invalid")]
    Signature,
    /// Decryption failed: wrong key or corrupt bytes.
    #[error("unable to decipher journal data")]
    InvalidCipher,
    /// Structural conflict during merge that cannot be resolved. Only
    /// reachable through a corrupted store.
    #[error("log conflict: {0}")]
    Conflict(String),
    /// The cancellation signal fired mid-operation.
    #[error("operation cancelled")]
    Cancelled,
    /// Underlying network I/O failure. The only kind eligible for retry.
    #[error("transport failure")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),
    /// Local disk failure.
    #[error(transparent)]
    Io(#[from] PathError),
    /// Undecodable binary data.
    #[error("invalid binary encoding")]
    Codec(#[from] prost::DecodeError),
}

impl Error {
    /// Shorthand for a [`Error::NotFound`] naming the missing entity.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Wraps an arbitrary I/O-ish failure as [`Error::Transport`].
    pub fn transport(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Transport(source.into())
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;
