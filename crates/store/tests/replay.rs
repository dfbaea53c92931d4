#![forbid(unsafe_code)]

use mazu_core::fixtures::{flag, round, team};
use mazu_core::{Flag, Round, Team};
use mazu_store::Collection;

enum Op<T> {
    Upsert(T),
    Remove(i32),
    Replace(Vec<T>),
}

fn replay<T: mazu_core::Entity<Id = i32>>(c: &Collection<T>, ops: Vec<Op<T>>) {
    for op in ops {
        match op {
            Op::Upsert(r) => c.upsert(r),
            Op::Remove(id) => {
                c.remove(&id);
            }
            Op::Replace(rs) => c.replace_all(rs),
        }
    }
}

#[test]
fn replay_basic_sequence() {
    let c: Collection<Team> = Collection::new("teams");

    // created, duplicate create, second team, rename, delete
    let mut renamed = team(1);
    renamed.team_name = "renamed".into();
    replay(&c, vec![Op::Upsert(team(1)), Op::Upsert(team(1))]);
    let snap1 = c.snapshot();
    assert_eq!(snap1.epoch, 2);
    assert_eq!(snap1.items.len(), 1);

    replay(&c, vec![Op::Upsert(team(2)), Op::Upsert(renamed), Op::Remove(2)]);
    let snap2 = c.snapshot();
    assert_eq!(snap2.epoch, 5);
    assert_eq!(snap2.ids(), vec![1]);
    assert_eq!(snap2.get(&1).map(|t| t.team_name.as_str()), Some("renamed"));

    // Earlier snapshots are unaffected by later writes.
    assert_eq!(snap1.get(&1).map(|t| t.team_name.as_str()), Some("team 1"));
}

#[test]
fn replace_all_then_events_converge() {
    let c: Collection<Round> = Collection::newest_first("rounds");
    replay(
        &c,
        vec![
            Op::Upsert(round(9, "pending")),
            Op::Replace(vec![round(3, "running"), round(2, "finished"), round(1, "finished")]),
            Op::Upsert(round(4, "pending")),
            Op::Remove(2),
            Op::Remove(2),
            Op::Upsert(round(3, "finished")),
        ],
    );
    assert_eq!(c.ids(), vec![4, 3, 1]);
    assert_eq!(c.get(&3).map(|r| r.status), Some("finished".to_string()));
    assert!(!c.contains(&9));
}

#[test]
fn same_sequence_same_snapshot() {
    let seq = || {
        vec![
            Op::Upsert(flag(1, 1)),
            Op::Upsert(flag(2, 1)),
            Op::Upsert(flag(1, 1)),
            Op::Remove(7),
            Op::Upsert(flag(3, 2)),
            Op::Remove(2),
        ]
    };
    let a: Collection<Flag> = Collection::newest_first("flags");
    let b: Collection<Flag> = Collection::newest_first("flags");
    replay(&a, seq());
    replay(&b, seq());
    assert_eq!(a.items(), b.items());
    assert_eq!(a.ids(), vec![3, 1]);
}
