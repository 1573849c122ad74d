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

//! At-rest encryption for the journal file, keyed on the owner's private
//! key.
//!
//! The AES-256 key is the 32 *hex characters* of `md5(priv_key_bytes)` used
//! directly as key bytes — not the raw digest. This halves the effective
//! key material but is the historical on-disk format; changing it would
//! make every existing journal file undecipherable, so it stays.

use aes_gcm::Aes256Gcm;
use aes_gcm::Nonce;
use aes_gcm::aead::Aead as _;
use aes_gcm::aead::AeadCore as _;
use aes_gcm::aead::KeyInit as _;
use aes_gcm::aead::OsRng;
use digest::Digest as _;
use ed25519_dalek::SigningKey;
use md5::Md5;

use crate::error::Error;
use crate::error::Result;

/// AES-GCM standard nonce length in bytes.
const NONCE_LEN: usize = 12;

fn derive_cipher(key: &SigningKey) -> Result<Aes256Gcm> {
    let digest = Md5::digest(key.to_bytes());
    let key_bytes = hex::encode(digest).into_bytes();
    Aes256Gcm::new_from_slice(&key_bytes).map_err(|_| Error::InvalidCipher)
}

/// Seals `plaintext` under a key derived from `key`, returning
/// `nonce || ciphertext`. The nonce is freshly random per call.
pub fn seal(key: &SigningKey, plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = derive_cipher(key)?;
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|_| Error::InvalidCipher)?;
    let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    sealed.extend_from_slice(nonce.as_slice());
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

/// Reverses [`seal`]. Wrong key and corrupt bytes are indistinguishable;
/// both are [`Error::InvalidCipher`].
pub fn open(key: &SigningKey, sealed: &[u8]) -> Result<Vec<u8>> {
    if sealed.len() < NONCE_LEN {
        return Err(Error::InvalidCipher);
    }
    let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
    let cipher = derive_cipher(key)?;
    cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| Error::InvalidCipher)
}
