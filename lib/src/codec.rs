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

//! Binary codec for ops, logs, and journals.
//!
//! The wire and at-rest format is the proto3 encoding of the messages in
//! `protos/journal.proto`. Proto3 is tagged and field-optional, so the
//! format evolves by appending fields; and prost writes fields in ascending
//! tag order, so encoding the same value twice yields identical bytes. The
//! encoding of a log's init op is its identity input ([`crate::log::LogId`]).

use prost::Message as _;

use crate::error::Error;
use crate::error::Result;
use crate::log::Log;
use crate::log::LogId;
use crate::op::Op;
use crate::op::OpType;
use crate::protos;

fn op_type_to_proto(op_type: OpType) -> u32 {
    match op_type {
        OpType::Init => 1,
        OpType::Amend => 2,
        OpType::Remove => 3,
    }
}

fn op_type_from_proto(value: u32) -> Result<OpType> {
    match value {
        1 => Ok(OpType::Init),
        2 => Ok(OpType::Amend),
        3 => Ok(OpType::Remove),
        _ => Err(Error::BadRequest(format!("unknown op type {value}"))),
    }
}

pub fn op_to_proto(op: &Op) -> protos::journal::Op {
    protos::journal::Op {
        op_type: op_type_to_proto(op.op_type),
        model: op.model,
        r#ref: op.ref_id.clone(),
        prev: op.prev.clone(),
        relations: op.relations.clone(),
        name: op.name.clone(),
        author_id: op.author_id.clone(),
        timestamp: op.timestamp,
        size: op.size,
        note: op.note.clone(),
    }
}

pub fn op_from_proto(proto: protos::journal::Op) -> Result<Op> {
    Ok(Op {
        op_type: op_type_from_proto(proto.op_type)?,
        model: proto.model,
        ref_id: proto.r#ref,
        prev: proto.prev,
        relations: proto.relations,
        name: proto.name,
        author_id: proto.author_id,
        timestamp: proto.timestamp,
        size: proto.size,
        note: proto.note,
    })
}

/// Canonical bytes of a single op; the identity input for logs.
pub fn encode_op(op: &Op) -> Vec<u8> {
    op_to_proto(op).encode_to_vec()
}

pub fn log_to_proto(log: &Log) -> protos::journal::Log {
    protos::journal::Log {
        signature: log.signature().to_vec(),
        ops: log.ops().iter().map(op_to_proto).collect(),
        children: log.children().iter().map(log_to_proto).collect(),
    }
}

pub fn log_from_proto(proto: protos::journal::Log) -> Result<Log> {
    let ops = proto
        .ops
        .into_iter()
        .map(op_from_proto)
        .collect::<Result<Vec<_>>>()?;
    let children = proto
        .children
        .into_iter()
        .map(log_from_proto)
        .collect::<Result<Vec<_>>>()?;
    Log::from_parts(ops, children, proto.signature)
}

/// Serializes one log subtree; the unit that travels over logsync.
pub fn encode_log(log: &Log) -> Vec<u8> {
    log_to_proto(log).encode_to_vec()
}

pub fn decode_log(data: &[u8]) -> Result<Log> {
    let proto = protos::journal::Log::decode(data)?;
    log_from_proto(proto)
}

/// Serializes a journal's forest and active id (the plaintext that at-rest
/// encryption seals).
pub fn encode_journal(logs: &[Log], active_id: &LogId) -> Vec<u8> {
    let proto = protos::journal::Journal {
        logs: logs.iter().map(log_to_proto).collect(),
        active_id: active_id.as_str().to_string(),
    };
    proto.encode_to_vec()
}

pub fn decode_journal(data: &[u8]) -> Result<(Vec<Log>, LogId)> {
    let proto = protos::journal::Journal::decode(data)?;
    let logs = proto
        .logs
        .into_iter()
        .map(log_from_proto)
        .collect::<Result<Vec<_>>>()?;
    Ok((logs, LogId::new(proto.active_id)))
}
