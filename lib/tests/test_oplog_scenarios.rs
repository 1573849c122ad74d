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

use assert_matches::assert_matches;
use keel_lib::codec;
use pretty_assertions::assert_eq;
use keel_lib::error::Error;
use keel_lib::journal::Journal;
use keel_lib::log::Log;
use keel_lib::op::Op;
use keel_lib::op::OpType;
use testutils::test_author;
use testutils::test_signing_key;

fn init_op(model: u32, name: &str) -> Op {
    Op {
        op_type: OpType::Init,
        model,
        name: name.to_string(),
        ..Op::default()
    }
}

#[test]
fn test_log_id_stability() {
    // The id is a function of the init op alone and is stable across
    // recomputation and serialization.
    let log = Log::init(init_op(0x1, "hello")).unwrap();
    let id = log.id();
    assert_eq!(log.id(), id);
    let round_tripped = codec::decode_log(&codec::encode_log(&log)).unwrap();
    assert_eq!(round_tripped.id(), id);

    // 256 bits of base32: 52 lowercase digits, no padding.
    assert_eq!(id.as_str().len(), 52);
    assert!(id
        .as_str()
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));

    // Annotation fields of the init op participate in the id.
    let annotated = Log::init(Op {
        timestamp: 2,
        ..init_op(0x1, "hello")
    })
    .unwrap();
    assert_ne!(annotated.id(), id);

    // Later ops don't.
    let mut extended = Log::init(init_op(0x1, "hello")).unwrap();
    extended.append(Op {
        op_type: OpType::Amend,
        model: 0x1,
        name: "renamed".to_string(),
        timestamp: 99,
        ..Op::default()
    });
    assert_eq!(extended.id(), id);
}

#[test]
fn test_every_log_starts_with_an_init_op() {
    let log = Log::init(init_op(1, "x")).unwrap();
    assert!(!log.ops().is_empty());
    assert_eq!(log.ops()[0].op_type, OpType::Init);

    for bad in [OpType::Amend, OpType::Remove] {
        let op = Op {
            op_type: bad,
            ..Op::default()
        };
        assert_matches!(Log::init(op), Err(Error::BadRequest(_)));
    }
}

#[test]
fn test_sign_verify_round_trip_for_any_log_shape() {
    let key = test_signing_key(9);
    for refs in [vec![], vec!["QmA"], vec!["QmA", "QmB", "QmC"]] {
        let mut log = Log::init(init_op(1, "ds")).unwrap();
        for ref_id in refs {
            log.append(Op {
                op_type: OpType::Amend,
                model: 1,
                ref_id: ref_id.to_string(),
                ..Op::default()
            });
        }
        log.sign(&key);
        log.verify(&key.verifying_key()).unwrap();
        assert_matches!(
            log.verify(&test_signing_key(10).verifying_key()),
            Err(Error::Signature)
        );
    }
}

#[test]
fn test_double_merge_equals_single_merge() {
    let mut base = Log::init(init_op(1, "ds")).unwrap();
    let mut child = Log::init(init_op(3, "main")).unwrap();
    child.append(Op {
        op_type: OpType::Init,
        model: 4,
        ref_id: "QmV1".to_string(),
        ..Op::default()
    });
    base.add_child(child).unwrap();

    let mut longer = base.clone();
    longer.append(Op {
        op_type: OpType::Amend,
        model: 1,
        name: "ds2".to_string(),
        ..Op::default()
    });

    let mut once = base.clone();
    once.merge(longer.clone()).unwrap();
    let mut twice = base.clone();
    twice.merge(longer.clone()).unwrap();
    twice.merge(longer).unwrap();
    assert_eq!(once, twice);
}

#[test]
fn test_merge_tie_break_preserves_longer_opset() {
    // A has appended an extra (annotation) op; B is a stale replica.
    let mut a = Log::init(Op {
        author_id: "a".to_string(),
        ..init_op(1, "r")
    })
    .unwrap();
    a.append(Op {
        op_type: OpType::Init,
        model: 0x11,
        ..Op::default()
    });
    let b = Log::init(Op {
        author_id: "a".to_string(),
        ..init_op(1, "r")
    })
    .unwrap();

    let before = a.clone();
    a.merge(b).unwrap();
    assert_eq!(a, before);
}

#[test]
fn test_removed_subtree_hidden_from_path_lookup_but_not_id_lookup() {
    let owner = test_author("root", 1);
    let mut journal = Journal::new(owner);

    let mut root = Log::init(init_op(1, "root")).unwrap();
    root.add_child(Log::init(init_op(2, "a")).unwrap()).unwrap();
    let mut b = Log::init(init_op(2, "b")).unwrap();
    b.append(Op {
        op_type: OpType::Remove,
        model: 2,
        ..Op::default()
    });
    let b_id = b.id();
    root.add_child(b).unwrap();
    journal.append_log(root).unwrap();

    assert_eq!(journal.head_ref(&["root", "a"]).unwrap().name(), "a");
    assert_matches!(journal.head_ref(&["root", "b"]), Err(Error::NotFound(_)));
    let found = journal.get(&b_id).unwrap();
    assert_eq!(found.id(), b_id);
    assert!(found.removed());
}

#[test]
fn test_merge_converges_across_peers() {
    // Two journals exchange logs in opposite orders and converge.
    let mut ours = Log::init(init_op(1, "shared")).unwrap();
    let mut theirs = ours.clone();
    ours.add_child(Log::init(init_op(2, "from-us")).unwrap())
        .unwrap();
    theirs.add_child(Log::init(init_op(2, "from-them")).unwrap())
        .unwrap();

    let mut merged_ours = ours.clone();
    merged_ours.merge(theirs.clone()).unwrap();
    let mut merged_theirs = theirs;
    merged_theirs.merge(ours).unwrap();

    // Same set of children on both sides (order reflects arrival).
    let mut our_names: Vec<_> = merged_ours.children().iter().map(Log::name).collect();
    let mut their_names: Vec<_> = merged_theirs.children().iter().map(Log::name).collect();
    our_names.sort_unstable();
    their_names.sort_unstable();
    assert_eq!(our_names, their_names);
}
