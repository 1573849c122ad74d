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

//! Peer identity as it travels over sync transports, and request signing.
//!
//! Every sync request carries the sender's identity as three headers
//! ([`ID_HEADER`], [`USERNAME_HEADER`], [`PUB_KEY_HEADER`]) and, over HTTP,
//! a signature over `"{timestamp}.{pid}.{path}"` proving possession of the
//! private key ([`TIMESTAMP_HEADER`], [`PID_HEADER`], [`SIGNATURE_HEADER`]).

use std::fmt;
use std::fmt::Debug;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use ed25519_dalek::SigningKey;
use ed25519_dalek::VerifyingKey;

use crate::clock::Clock;
use crate::error::Error;
use crate::error::Result;
use crate::keys;
use crate::keys::KeyId;

pub const ID_HEADER: &str = "id";
pub const USERNAME_HEADER: &str = "username";
pub const PUB_KEY_HEADER: &str = "pub_key";
pub const TIMESTAMP_HEADER: &str = "timestamp";
pub const PID_HEADER: &str = "pid";
pub const SIGNATURE_HEADER: &str = "signature";

/// Maximum tolerated distance between a request's `timestamp` header and
/// the receiver's clock, in seconds.
const MAX_TIMESTAMP_SKEW_SECS: i64 = 30 * 60;

/// A keyed identity: username, public key, and the id derived from it.
#[derive(Clone, PartialEq, Eq)]
pub struct Author {
    id: KeyId,
    username: String,
    pub_key: VerifyingKey,
}

impl Author {
    /// Builds an identity from a username and public key, deriving the id.
    pub fn new(username: impl Into<String>, pub_key: VerifyingKey) -> Self {
        Self {
            id: KeyId::derive(&pub_key),
            username: username.into(),
            pub_key,
        }
    }

    /// Rebuilds an identity from transported parts, checking that the
    /// declared id is in fact derived from the public key.
    pub fn from_parts(id: KeyId, username: String, pub_key: VerifyingKey) -> Result<Self> {
        if id != KeyId::derive(&pub_key) {
            return Err(Error::IdMismatch(format!(
                "declared id {id} is not derived from the declared public key"
            )));
        }
        Ok(Self {
            id,
            username,
            pub_key,
        })
    }

    pub fn id(&self) -> &KeyId {
        &self.id
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn pub_key(&self) -> &VerifyingKey {
        &self.pub_key
    }

    /// The identity headers this author presents on sync requests.
    pub fn to_headers(&self) -> Vec<(&'static str, String)> {
        vec![
            (ID_HEADER, self.id.to_string()),
            (USERNAME_HEADER, self.username.clone()),
            (PUB_KEY_HEADER, BASE64.encode(self.pub_key.as_bytes())),
        ]
    }

    /// Parses identity headers through `get`, which looks a header value up
    /// by name. Missing or malformed headers are [`Error::BadRequest`]; a
    /// declared id the public key does not derive to is
    /// [`Error::IdMismatch`].
    pub fn from_headers(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let require = |name: &str| {
            get(name).ok_or_else(|| Error::BadRequest(format!("missing {name} header")))
        };
        let id = KeyId::new(require(ID_HEADER)?);
        let username = require(USERNAME_HEADER)?;
        let pub_key_encoded = require(PUB_KEY_HEADER)?;
        let pub_key_bytes = BASE64
            .decode(&pub_key_encoded)
            .map_err(|err| Error::BadRequest(format!("malformed {PUB_KEY_HEADER} header: {err}")))?;
        let pub_key = keys::verifying_key_from_bytes(&pub_key_bytes)?;
        Self::from_parts(id, username, pub_key)
    }
}

impl Debug for Author {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Author")
            .field("id", &self.id)
            .field("username", &self.username)
            .finish()
    }
}

/// The signature headers attached to one signed request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestSignature {
    pub timestamp: i64,
    pub pid: KeyId,
    /// base64 of the detached signature over the signing string.
    pub signature: String,
}

impl RequestSignature {
    pub fn to_headers(&self) -> Vec<(&'static str, String)> {
        vec![
            (TIMESTAMP_HEADER, self.timestamp.to_string()),
            (PID_HEADER, self.pid.to_string()),
            (SIGNATURE_HEADER, self.signature.clone()),
        ]
    }

    pub fn from_headers(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let require = |name: &str| {
            get(name).ok_or_else(|| Error::BadRequest(format!("missing {name} header")))
        };
        let timestamp = require(TIMESTAMP_HEADER)?
            .parse()
            .map_err(|_| Error::BadRequest(format!("malformed {TIMESTAMP_HEADER} header")))?;
        let pid = KeyId::new(require(PID_HEADER)?);
        let signature = require(SIGNATURE_HEADER)?;
        Ok(Self {
            timestamp,
            pid,
            signature,
        })
    }
}

fn signing_string(timestamp: i64, pid: &KeyId, path: &str) -> String {
    format!("{timestamp}.{pid}.{path}")
}

/// Signs a request to `path` on behalf of the holder of `key`.
pub fn sign_request(key: &SigningKey, clock: &dyn Clock, path: &str) -> RequestSignature {
    let timestamp = clock.now_secs();
    let pid = KeyId::derive(&key.verifying_key());
    let message = signing_string(timestamp, &pid, path);
    RequestSignature {
        timestamp,
        pid,
        signature: BASE64.encode(keys::sign(key, message.as_bytes())),
    }
}

/// Verifies a request signature against the sender's public key.
///
/// Rejects stale or future-dated timestamps beyond the skew window, a pid
/// the key does not derive to, and of course a bad signature. All three are
/// authentication failures.
pub fn verify_request(
    pub_key: &VerifyingKey,
    signature: &RequestSignature,
    path: &str,
    clock: &dyn Clock,
) -> Result<()> {
    let now = clock.now_secs();
    if (now - signature.timestamp).abs() > MAX_TIMESTAMP_SKEW_SECS {
        return Err(Error::Signature);
    }
    if signature.pid != KeyId::derive(pub_key) {
        return Err(Error::IdMismatch(format!(
            "pid {} is not derived from the declared public key",
            signature.pid
        )));
    }
    let signature_bytes = BASE64
        .decode(&signature.signature)
        .map_err(|_| Error::Signature)?;
    let message = signing_string(signature.timestamp, &signature.pid, path);
    keys::verify(pub_key, message.as_bytes(), &signature_bytes)
}
