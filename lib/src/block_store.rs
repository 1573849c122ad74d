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

//! The content-addressed store holding dataset bodies.
//!
//! The journal core only pins and unpins by content id as versions arrive
//! and leave; moving the bytes themselves is the embedding application's
//! concern. [`MemBlockStore`] backs tests and single-process use.

use std::collections::BTreeSet;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Mutex;

use digest::Digest as _;
use multihash::Multihash;
use sha2::Sha256;

use crate::error::Error;
use crate::error::Result;

/// Multicodec code for SHA2-256.
const SHA2_256_CODE: u64 = 0x12;

/// Derives the content id of a block: an `/ipfs/`-prefixed base58
/// multihash of its bytes.
pub fn content_id(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    let hash = Multihash::<64>::wrap(SHA2_256_CODE, &digest)
        .expect("sha2-256 digest fits in a 64-byte multihash");
    format!("/ipfs/{}", bs58::encode(hash.to_bytes()).into_string())
}

/// A content-addressed block store that can pin blocks against collection.
pub trait BlockStore: Send + Sync + Debug {
    /// Stores a block, returning its content id.
    fn put(&self, data: &[u8]) -> Result<String>;

    /// Reads a block back by content id.
    fn get(&self, id: &str) -> Result<Vec<u8>>;

    fn has(&self, id: &str) -> bool;

    /// Marks a block as retained. Pinning an id whose bytes have not
    /// arrived yet records the intent.
    fn pin(&self, id: &str) -> Result<()>;

    fn unpin(&self, id: &str) -> Result<()>;
}

/// Blocks held in process memory.
#[derive(Debug, Default)]
pub struct MemBlockStore {
    blocks: Mutex<HashMap<String, Vec<u8>>>,
    pins: Mutex<BTreeSet<String>>,
}

impl MemBlockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pinned(&self, id: &str) -> bool {
        self.pins.lock().unwrap().contains(id)
    }
}

impl BlockStore for MemBlockStore {
    fn put(&self, data: &[u8]) -> Result<String> {
        let id = content_id(data);
        self.blocks.lock().unwrap().insert(id.clone(), data.to_vec());
        Ok(id)
    }

    fn get(&self, id: &str) -> Result<Vec<u8>> {
        self.blocks
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("block {id}")))
    }

    fn has(&self, id: &str) -> bool {
        self.blocks.lock().unwrap().contains_key(id)
    }

    fn pin(&self, id: &str) -> Result<()> {
        self.pins.lock().unwrap().insert(id.to_string());
        Ok(())
    }

    fn unpin(&self, id: &str) -> Result<()> {
        self.pins.lock().unwrap().remove(id);
        Ok(())
    }
}
