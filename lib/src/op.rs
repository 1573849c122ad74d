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

/// What an op does to the entity its log tracks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum OpType {
    /// Brings the entity into existence. Always and only the first op of a
    /// log.
    #[default]
    Init,
    /// Updates the entity in place.
    Amend,
    /// Marks the entity removed. The log stays readable for archival;
    /// lookup by name hides it.
    Remove,
}

/// A single immutable operation record.
///
/// `timestamp`, `size`, and `note` are annotations: they travel with the op
/// and feed listings, but ordering and merge never consult them. Equality
/// is field-wise over every persisted field.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Op {
    pub op_type: OpType,
    /// Domain tag fixing which kind of entity this op describes. A log's
    /// kind is the model of its first op; ops of other models may ride in
    /// the same log as annotations.
    pub model: u32,
    /// Content identifier of the referenced artifact. May be empty.
    pub ref_id: String,
    /// Content identifier of the previous state in a causal chain. May be
    /// empty.
    pub prev: String,
    /// Related identifiers; semantics are per-model.
    pub relations: Vec<String>,
    /// Current name of the entity after this op.
    pub name: String,
    /// Current attributed author after this op.
    pub author_id: String,
    /// Nanoseconds since the unix epoch. Annotation only.
    pub timestamp: i64,
    /// Referenced artifact size in bytes. Annotation only.
    pub size: i64,
    /// Free text. Annotation only.
    pub note: String,
}
