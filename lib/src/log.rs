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

#![expect(missing_docs)]

//! The log: an append-only, single-author op sequence with child logs.
//!
//! A log never shrinks and is never edited in place; "removal" is one more
//! op. Two replicas of a log (same init op) merge by longest-opset-wins,
//! which makes merge idempotent and order-insensitive for authors that
//! respect the append-only discipline.

use std::fmt;
use std::fmt::Debug;

use digest::Digest as _;
use ed25519_dalek::SigningKey;
use ed25519_dalek::VerifyingKey;
use md5::Md5;
use sha2::Sha256;

use crate::codec;
use crate::error::Error;
use crate::error::Result;
use crate::keys;
use crate::op::Op;
use crate::op::OpType;

/// Stable content-derived identifier of a log: lowercase unpadded base32
/// of the SHA-256 of the init op's canonical encoding.
///
/// Two logs with the same init op share the same id, however far their op
/// sequences have diverged. Distinct from [`crate::keys::KeyId`], which is
/// base58 of a multihash.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct LogId(String);

impl LogId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Computes the id of a log whose init op is `init`.
    pub fn derive(init: &Op) -> Self {
        let digest = Sha256::digest(codec::encode_op(init));
        Self(
            data_encoding::BASE32_NOPAD
                .encode(&digest)
                .to_ascii_lowercase(),
        )
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Debug for LogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("LogId").field(&self.0).finish()
    }
}

impl fmt::Display for LogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

/// A causally ordered op sequence authored by a single identity, plus its
/// child logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Log {
    ops: Vec<Op>,
    children: Vec<Log>,
    signature: Vec<u8>,
}

impl Log {
    /// Creates a log from its initialization op.
    pub fn init(op: Op) -> Result<Self> {
        if op.op_type != OpType::Init {
            return Err(Error::BadRequest(
                "the first op of a log must be an init op".to_string(),
            ));
        }
        Ok(Self {
            ops: vec![op],
            children: vec![],
            signature: vec![],
        })
    }

    /// Reassembles a log from decoded parts, checking the structural
    /// invariants: a non-empty op sequence starting with an init op, and no
    /// two sibling children sharing an init op.
    pub fn from_parts(ops: Vec<Op>, children: Vec<Self>, signature: Vec<u8>) -> Result<Self> {
        let Some(init) = ops.first() else {
            return Err(Error::BadRequest("log has no ops".to_string()));
        };
        if init.op_type != OpType::Init {
            return Err(Error::BadRequest(
                "the first op of a log must be an init op".to_string(),
            ));
        }
        for (i, child) in children.iter().enumerate() {
            if children[..i].iter().any(|other| other.init_op() == child.init_op()) {
                return Err(Error::BadRequest(
                    "sibling logs share an init op".to_string(),
                ));
            }
        }
        Ok(Self {
            ops,
            children,
            signature,
        })
    }

    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    pub fn children(&self) -> &[Self] {
        &self.children
    }

    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    fn init_op(&self) -> &Op {
        &self.ops[0]
    }

    /// The log's kind: the model of its init op. Fixed for the log's
    /// lifetime, merges included.
    pub fn model(&self) -> u32 {
        self.init_op().model
    }

    /// The most recent non-empty name set by an op of the log's own model,
    /// or `""`.
    pub fn name(&self) -> &str {
        let model = self.model();
        self.ops
            .iter()
            .rev()
            .find(|op| op.model == model && !op.name.is_empty())
            .map_or("", |op| op.name.as_str())
    }

    /// The most recent non-empty attributed author id set by an op of the
    /// log's own model, or `""`.
    pub fn author(&self) -> &str {
        let model = self.model();
        self.ops
            .iter()
            .rev()
            .find(|op| op.model == model && !op.author_id.is_empty())
            .map_or("", |op| op.author_id.as_str())
    }

    /// The last op.
    pub fn head(&self) -> &Op {
        self.ops.last().expect("log ops are non-empty")
    }

    /// Stable id derived from the init op alone.
    pub fn id(&self) -> LogId {
        LogId::derive(self.init_op())
    }

    /// True once any op of the log's own model is a remove op. Removed logs
    /// are hidden from lookup by name; lookup by id still finds them.
    pub fn removed(&self) -> bool {
        let model = self.model();
        self.ops
            .iter()
            .any(|op| op.op_type == OpType::Remove && op.model == model)
    }

    /// Appends an op. The op may belong to another model, in which case it
    /// rides along as an annotation without affecting `name()`/`author()`.
    pub fn append(&mut self, op: Op) {
        self.ops.push(op);
    }

    /// Drops ops past `len`, undoing appends that were made since. Used by
    /// push rollback.
    pub(crate) fn truncate_ops(&mut self, len: usize) {
        if len >= 1 && len < self.ops.len() {
            self.ops.truncate(len);
            self.signature.clear();
        }
    }

    /// Adds a child log. Siblings must have distinct init ops; replicas of
    /// an existing child belong in [`Log::merge`] instead.
    pub fn add_child(&mut self, child: Self) -> Result<()> {
        if self
            .children
            .iter()
            .any(|existing| existing.init_op() == child.init_op())
        {
            return Err(Error::BadRequest(
                "a sibling log with the same init op already exists".to_string(),
            ));
        }
        self.children.push(child);
        Ok(())
    }

    /// Merges a replica of this log (same init op) into `self`:
    ///
    /// - the longer op sequence wins; on equal length `self` is preserved;
    /// - children are matched by init op and merged recursively, unmatched
    ///   incoming children are adopted whole.
    ///
    /// Merging is idempotent, and commutative up to the left-wins
    /// tie-break. A matching init op with a divergent model can only come
    /// from a corrupted store and is a [`Error::Conflict`].
    pub fn merge(&mut self, other: Self) -> Result<()> {
        if other.init_op() != self.init_op() {
            let kind = if other.init_op().model == self.init_op().model {
                "init op"
            } else {
                "model"
            };
            return Err(Error::Conflict(format!(
                "cannot merge logs with divergent {kind}"
            )));
        }
        if other.ops.len() > self.ops.len() {
            self.ops = other.ops;
            self.signature.clear();
        }
        for incoming in other.children {
            match self
                .children
                .iter_mut()
                .find(|existing| existing.init_op() == incoming.init_op())
            {
                Some(existing) => existing.merge(incoming)?,
                None => self.children.push(incoming),
            }
        }
        Ok(())
    }

    /// Walks `children` by `name()`, returning the named descendant.
    /// Removed descendants are invisible to this lookup.
    pub fn descend(&self, names: &[&str]) -> Result<&Self> {
        let mut current = self;
        for name in names {
            current = current
                .children
                .iter()
                .find(|child| !child.removed() && child.name() == *name)
                .ok_or_else(|| Error::not_found(format!("log {name}")))?;
        }
        Ok(current)
    }

    pub(crate) fn descend_mut(&mut self, names: &[&str]) -> Result<&mut Self> {
        let mut current = self;
        for name in names {
            current = current
                .children
                .iter_mut()
                .find(|child| !child.removed() && child.name() == *name)
                .ok_or_else(|| Error::not_found(format!("log {name}")))?;
        }
        Ok(current)
    }

    /// Finds a log anywhere in this subtree by id, removed logs included.
    pub fn find(&self, id: &LogId) -> Option<&Self> {
        if self.id() == *id {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(id))
    }

    /// Detaches and returns the named descendant. The final path component
    /// is removed from its parent's children; intermediate components must
    /// be live (not removed).
    pub(crate) fn detach_descendant(&mut self, names: &[&str]) -> Result<Self> {
        let (last, parents) = names
            .split_last()
            .ok_or_else(|| Error::BadRequest("empty log path".to_string()))?;
        let parent = self.descend_mut(parents)?;
        let index = parent
            .children
            .iter()
            .position(|child| !child.removed() && child.name() == *last)
            .ok_or_else(|| Error::not_found(format!("log {last}")))?;
        Ok(parent.children.remove(index))
    }

    /// The input that `signature` covers: an MD5 digest over the
    /// concatenated `ref_id` of every op, in order.
    ///
    /// Hashing only the refs is a historical artifact of the on-disk
    /// format; changing it would orphan every signed repository in the
    /// wild.
    pub fn signing_input(&self) -> Vec<u8> {
        let mut hasher = Md5::new();
        for op in &self.ops {
            hasher.update(op.ref_id.as_bytes());
        }
        hasher.finalize().to_vec()
    }

    /// Signs this log (children keep their own signatures).
    pub fn sign(&mut self, key: &SigningKey) {
        self.signature = keys::sign(key, &self.signing_input());
    }

    /// Verifies this log's signature. An empty signature fails.
    pub fn verify(&self, key: &VerifyingKey) -> Result<()> {
        if self.signature.is_empty() {
            return Err(Error::Signature);
        }
        keys::verify(key, &self.signing_input(), &self.signature)
    }
}

impl Debug for Log {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Log")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("ops", &self.ops.len())
            .field("children", &self.children)
            .finish()
    }
}
