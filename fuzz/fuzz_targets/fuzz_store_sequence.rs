#![no_main]

use arbitrary::Arbitrary;
use fc_command::{Command, Reply, apply_command};
use fc_store::{Aggregate, ScoreBound, Store};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
enum Op {
    Set { key: u8, value: u8 },
    IncrBy { key: u8, delta: i8 },
    Del { key: u8 },
    RPush { key: u8, value: u8 },
    LPop { key: u8 },
    LTrim { key: u8, start: i8, stop: i8 },
    ZAdd { key: u8, member: u8, score: i16 },
    ZIncrBy { key: u8, member: u8, delta: i8 },
    ZRem { key: u8, member: u8 },
    ZRemRangeByScore { key: u8, min: i16, max: i16, exclusive: bool },
    ZRemRangeByRank { key: u8, start: i8, stop: i8 },
    ZInterStore { dest: u8, left: u8, right: u8, right_weight: i8 },
}

fn key(k: u8) -> String {
    format!("k{}", k % 6)
}

fn member(m: u8) -> String {
    format!("m{}", m % 12)
}

fn to_command(op: &Op) -> Command {
    match *op {
        Op::Set { key: k, value } => Command::Set {
            key: key(k),
            value: value.to_string(),
            ttl: None,
        },
        Op::IncrBy { key: k, delta } => Command::IncrBy {
            key: key(k),
            delta: i64::from(delta),
        },
        Op::Del { key: k } => Command::Del { keys: vec![key(k)] },
        Op::RPush { key: k, value } => Command::RPush {
            key: key(k),
            values: vec![value.to_string()],
        },
        Op::LPop { key: k } => Command::LPop { key: key(k) },
        Op::LTrim { key: k, start, stop } => Command::LTrim {
            key: key(k),
            start: i64::from(start),
            stop: i64::from(stop),
        },
        Op::ZAdd { key: k, member: m, score } => Command::ZAdd {
            key: key(k),
            members: vec![(f64::from(score), member(m))],
        },
        Op::ZIncrBy { key: k, member: m, delta } => Command::ZIncrBy {
            key: key(k),
            member: member(m),
            delta: f64::from(delta),
        },
        Op::ZRem { key: k, member: m } => Command::ZRem {
            key: key(k),
            members: vec![member(m)],
        },
        Op::ZRemRangeByScore {
            key: k,
            min,
            max,
            exclusive,
        } => {
            let bound = |v: i16| {
                if exclusive {
                    ScoreBound::Exclusive(f64::from(v))
                } else {
                    ScoreBound::Inclusive(f64::from(v))
                }
            };
            Command::ZRemRangeByScore {
                key: key(k),
                min: bound(min),
                max: bound(max),
            }
        }
        Op::ZRemRangeByRank { key: k, start, stop } => Command::ZRemRangeByRank {
            key: key(k),
            start: i64::from(start),
            stop: i64::from(stop),
        },
        Op::ZInterStore {
            dest,
            left,
            right,
            right_weight,
        } => Command::ZInterStore {
            dest: key(dest),
            sources: vec![key(left), key(right)],
            weights: vec![1.0, f64::from(right_weight)],
            aggregate: Aggregate::Sum,
        },
    }
}

fuzz_target!(|ops: Vec<Op>| {
    let mut store = Store::new();
    for op in ops.iter().take(256) {
        let _ = apply_command(&to_command(op), &mut store, 0);
    }

    // Every surviving sorted set reads back ascending with matching ranks.
    for k in 0..6u8 {
        let key = key(k);
        let Ok(Reply::Scored(pairs)) = apply_command(
            &Command::ZRangeByRank {
                key: key.clone(),
                start: 0,
                stop: -1,
            },
            &mut store,
            0,
        ) else {
            continue;
        };
        for window in pairs.windows(2) {
            let ((a, sa), (b, sb)) = (&window[0], &window[1]);
            assert!(sa < sb || (sa == sb && a < b), "unordered {pairs:?}");
        }
        for (rank, (member, _)) in pairs.iter().enumerate() {
            let reply = apply_command(
                &Command::ZRank {
                    key: key.clone(),
                    member: member.clone(),
                },
                &mut store,
                0,
            );
            assert_eq!(reply, Ok(Reply::Integer(rank as i64)));
        }
    }
});
