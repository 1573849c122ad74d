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

//! Storage for key identifiers and their public/private keys.
//!
//! Every write checks the key↔id binding: a key stored under an id it does
//! not derive to is rejected with [`Error::IdMismatch`]. The file-backed
//! store keeps a JSON document of base64 key bytes keyed by derived id and
//! guards disk access with an advisory `.lock` file; the in-memory store is
//! a mutexed map.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::fmt::Debug;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use ed25519_dalek::SigningKey;
use ed25519_dalek::VerifyingKey;
use itertools::Itertools as _;

use crate::error::Error;
use crate::error::Result;
use crate::file_util;
use crate::file_util::PathError;
use crate::keys;
use crate::keys::KeyId;
use crate::lock::FileLock;

/// A mapping from derived key ids to key material.
pub trait KeyStore: Send + Sync + Debug {
    /// Stores a public key. Fails with [`Error::IdMismatch`] if `id` is not
    /// the key's derived id.
    fn put_pub_key(&self, id: &KeyId, key: VerifyingKey) -> Result<()>;

    /// Stores a private key. Fails with [`Error::IdMismatch`] if `id` is
    /// not derived from the key's public half.
    fn put_priv_key(&self, id: &KeyId, key: SigningKey) -> Result<()>;

    fn get_pub_key(&self, id: &KeyId) -> Result<VerifyingKey>;

    fn get_priv_key(&self, id: &KeyId) -> Result<SigningKey>;

    /// All ids with at least one stored key, sorted.
    fn ids_with_keys(&self) -> Result<Vec<KeyId>>;
}

fn check_pub_key_binding(id: &KeyId, key: &VerifyingKey) -> Result<()> {
    if *id != KeyId::derive(key) {
        return Err(Error::IdMismatch(format!(
            "public key does not derive to id {id}"
        )));
    }
    Ok(())
}

fn check_priv_key_binding(id: &KeyId, key: &SigningKey) -> Result<()> {
    if *id != KeyId::derive(&key.verifying_key()) {
        return Err(Error::IdMismatch(format!(
            "private key does not derive to id {id}"
        )));
    }
    Ok(())
}

/// Keys held only for the lifetime of the process.
#[derive(Debug, Default)]
pub struct MemKeyStore {
    public_keys: Mutex<HashMap<KeyId, VerifyingKey>>,
    private_keys: Mutex<HashMap<KeyId, SigningKey>>,
}

impl MemKeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyStore for MemKeyStore {
    fn put_pub_key(&self, id: &KeyId, key: VerifyingKey) -> Result<()> {
        check_pub_key_binding(id, &key)?;
        self.public_keys.lock().unwrap().insert(id.clone(), key);
        Ok(())
    }

    fn put_priv_key(&self, id: &KeyId, key: SigningKey) -> Result<()> {
        check_priv_key_binding(id, &key)?;
        self.private_keys.lock().unwrap().insert(id.clone(), key);
        Ok(())
    }

    fn get_pub_key(&self, id: &KeyId) -> Result<VerifyingKey> {
        self.public_keys
            .lock()
            .unwrap()
            .get(id)
            .copied()
            .ok_or_else(|| Error::not_found(format!("public key for {id}")))
    }

    fn get_priv_key(&self, id: &KeyId) -> Result<SigningKey> {
        self.private_keys
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("private key for {id}")))
    }

    fn ids_with_keys(&self) -> Result<Vec<KeyId>> {
        let public_keys = self.public_keys.lock().unwrap();
        let private_keys = self.private_keys.lock().unwrap();
        Ok(public_keys
            .keys()
            .chain(private_keys.keys())
            .unique()
            .cloned()
            .sorted()
            .collect())
    }
}

/// On-disk JSON representation; see the repository format docs.
#[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
struct StoredKeys {
    #[serde(default)]
    public_keys: BTreeMap<String, String>,
    #[serde(default)]
    private_keys: BTreeMap<String, String>,
}

/// Keys persisted to a JSON file next to a `<file>.lock` advisory lock.
#[derive(Debug)]
pub struct FileKeyStore {
    path: PathBuf,
}

impl FileKeyStore {
    /// Opens (or designates) the key store file at `path`. The file itself
    /// is created lazily on first write.
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".lock");
        PathBuf::from(name)
    }

    fn read_stored(&self) -> Result<StoredKeys> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Ok(StoredKeys::default());
            }
            Err(err) => {
                return Err(PathError {
                    path: self.path.clone(),
                    source: err,
                }
                .into());
            }
        };
        serde_json::from_slice(&data)
            .map_err(|err| Error::BadRequest(format!("malformed key store file: {err}")))
    }

    fn write_stored(&self, stored: &StoredKeys) -> Result<()> {
        let data = serde_json::to_vec_pretty(stored)
            .map_err(|err| Error::BadRequest(format!("cannot encode key store: {err}")))?;
        file_util::write_file_atomic(&self.path, &data)?;
        Ok(())
    }

    fn update(&self, f: impl FnOnce(&mut StoredKeys)) -> Result<()> {
        let _lock = FileLock::lock(self.lock_path())?;
        let mut stored = self.read_stored()?;
        f(&mut stored);
        self.write_stored(&stored)
    }
}

impl KeyStore for FileKeyStore {
    fn put_pub_key(&self, id: &KeyId, key: VerifyingKey) -> Result<()> {
        check_pub_key_binding(id, &key)?;
        self.update(|stored| {
            stored
                .public_keys
                .insert(id.to_string(), BASE64.encode(key.as_bytes()));
        })
    }

    fn put_priv_key(&self, id: &KeyId, key: SigningKey) -> Result<()> {
        check_priv_key_binding(id, &key)?;
        self.update(|stored| {
            stored
                .private_keys
                .insert(id.to_string(), BASE64.encode(key.to_bytes()));
        })
    }

    fn get_pub_key(&self, id: &KeyId) -> Result<VerifyingKey> {
        let _lock = FileLock::lock(self.lock_path())?;
        let stored = self.read_stored()?;
        let encoded = stored
            .public_keys
            .get(id.as_str())
            .ok_or_else(|| Error::not_found(format!("public key for {id}")))?;
        let bytes = BASE64
            .decode(encoded)
            .map_err(|err| Error::BadRequest(format!("malformed stored public key: {err}")))?;
        keys::verifying_key_from_bytes(&bytes)
    }

    fn get_priv_key(&self, id: &KeyId) -> Result<SigningKey> {
        let _lock = FileLock::lock(self.lock_path())?;
        let stored = self.read_stored()?;
        let encoded = stored
            .private_keys
            .get(id.as_str())
            .ok_or_else(|| Error::not_found(format!("private key for {id}")))?;
        let bytes = BASE64
            .decode(encoded)
            .map_err(|err| Error::BadRequest(format!("malformed stored private key: {err}")))?;
        keys::signing_key_from_bytes(&bytes)
    }

    fn ids_with_keys(&self) -> Result<Vec<KeyId>> {
        let _lock = FileLock::lock(self.lock_path())?;
        let stored = self.read_stored()?;
        Ok(stored
            .public_keys
            .keys()
            .chain(stored.private_keys.keys())
            .unique()
            .sorted()
            .map(KeyId::new)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::keys::generate_signing_key;

    #[test]
    fn test_mem_key_store_rejects_mismatched_id() {
        let store = MemKeyStore::new();
        let key = generate_signing_key();
        let other = generate_signing_key();
        let wrong_id = KeyId::derive(&other.verifying_key());
        assert_matches!(
            store.put_pub_key(&wrong_id, key.verifying_key()),
            Err(Error::IdMismatch(_))
        );
        assert_matches!(store.put_priv_key(&wrong_id, key), Err(Error::IdMismatch(_)));
    }

    #[test]
    fn test_mem_key_store_round_trip() {
        let store = MemKeyStore::new();
        let key = generate_signing_key();
        let id = KeyId::derive(&key.verifying_key());
        store.put_pub_key(&id, key.verifying_key()).unwrap();
        store.put_priv_key(&id, key.clone()).unwrap();
        assert_eq!(store.get_pub_key(&id).unwrap(), key.verifying_key());
        assert_eq!(store.get_priv_key(&id).unwrap().to_bytes(), key.to_bytes());
        assert_eq!(store.ids_with_keys().unwrap(), vec![id]);
    }

    #[test]
    fn test_file_key_store_persists_across_reopen() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("keys.json");
        let key = generate_signing_key();
        let id = KeyId::derive(&key.verifying_key());
        {
            let store = FileKeyStore::new(path.clone());
            store.put_pub_key(&id, key.verifying_key()).unwrap();
            store.put_priv_key(&id, key.clone()).unwrap();
        }
        let store = FileKeyStore::new(path.clone());
        assert_eq!(store.get_pub_key(&id).unwrap(), key.verifying_key());
        assert_eq!(store.get_priv_key(&id).unwrap().to_bytes(), key.to_bytes());
        // The advisory lock is released between operations.
        assert!(!path.with_extension("json.lock").exists());
    }

    #[test]
    fn test_file_key_store_missing_key() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = FileKeyStore::new(temp_dir.path().join("keys.json"));
        let id = KeyId::derive(&generate_signing_key().verifying_key());
        assert_matches!(store.get_pub_key(&id), Err(Error::NotFound(_)));
        assert_eq!(store.ids_with_keys().unwrap(), vec![]);
    }
}
