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

//! Key pairs and the stable identifiers derived from them.
//!
//! A [`KeyId`] is the canonical identity of a public key:
//! `base58(multihash(sha2-256(pub_key_bytes)))`. It is the id that ops
//! record as `author_id`, that sync headers carry as `id`/`pid`, and that
//! policies see as the subject. Note the encoding is distinct from log ids,
//! which are lowercase base32 of a raw SHA-256 (see [`crate::log::LogId`]).

use std::fmt;
use std::fmt::Debug;

use digest::Digest as _;
use ed25519_dalek::Signature;
use ed25519_dalek::Signer as _;
use ed25519_dalek::SigningKey;
use ed25519_dalek::Verifier as _;
use ed25519_dalek::VerifyingKey;
use multihash::Multihash;
use sha2::Sha256;

use crate::error::Error;
use crate::error::Result;

/// Multicodec code for SHA2-256.
const SHA2_256_CODE: u64 = 0x12;

/// Derived identifier of a public key.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct KeyId(String);

impl KeyId {
    /// Wraps an already-derived identifier, e.g. one read from a header.
    /// The binding to an actual key is checked where the key is available;
    /// see [`Author::from_parts`](crate::identity::Author::from_parts).
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Derives the canonical identifier of `key`.
    pub fn derive(key: &VerifyingKey) -> Self {
        let digest = Sha256::digest(key.as_bytes());
        let hash = Multihash::<64>::wrap(SHA2_256_CODE, &digest)
            .expect("sha2-256 digest fits in a 64-byte multihash");
        Self(bs58::encode(hash.to_bytes()).into_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Debug for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("KeyId").field(&self.0).finish()
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

/// Generates a fresh ed25519 key pair from the OS entropy source.
pub fn generate_signing_key() -> SigningKey {
    let mut csprng = rand_core::OsRng;
    SigningKey::generate(&mut csprng)
}

/// Reconstructs a private key from its raw 32 bytes.
pub fn signing_key_from_bytes(bytes: &[u8]) -> Result<SigningKey> {
    let bytes: &[u8; 32] = bytes
        .try_into()
        .map_err(|_| Error::BadRequest("invalid private key length".to_string()))?;
    Ok(SigningKey::from_bytes(bytes))
}

/// Reconstructs a public key from its raw 32 bytes.
pub fn verifying_key_from_bytes(bytes: &[u8]) -> Result<VerifyingKey> {
    let bytes: &[u8; 32] = bytes
        .try_into()
        .map_err(|_| Error::BadRequest("invalid public key length".to_string()))?;
    VerifyingKey::from_bytes(bytes).map_err(|_| Error::BadRequest("invalid public key".to_string()))
}

/// Signs `message`, returning the detached signature bytes.
pub fn sign(key: &SigningKey, message: &[u8]) -> Vec<u8> {
    key.sign(message).to_vec()
}

/// Verifies a detached signature. Empty or malformed signatures are
/// reported as [`Error::Signature`], same as a failed verification.
pub fn verify(key: &VerifyingKey, message: &[u8], signature: &[u8]) -> Result<()> {
    let signature = Signature::from_slice(signature).map_err(|_| Error::Signature)?;
    key.verify(message, &signature).map_err(|_| Error::Signature)
}
