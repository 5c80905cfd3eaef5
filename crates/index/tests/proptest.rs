//! Property-based tests for tempora-index using proptest.

use proptest::prelude::*;
use tempora_index::{
    ActiveInterval, ActiveIntervalIndex, Endpoint, EndpointScheduler, SchedulerKind, SlotId,
};

#[derive(Debug, Clone)]
enum Op {
    Insert { hash: i32, invisible: bool },
    Remove(usize),
    Promote,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0i32..8, any::<bool>()).prop_map(|(hash, invisible)| Op::Insert { hash, invisible }),
        2 => (0usize..64).prop_map(Op::Remove),
        1 => Just(Op::Promote),
    ]
}

/// Model entry: (slot, hash, payload, visible).
type ModelEntry = (SlotId, i32, u32, bool);

proptest! {
    /// `find` returns exactly the visible entries the model holds for a hash.
    #[test]
    fn index_matches_model(ops in prop::collection::vec(op_strategy(), 1..200)) {
        let mut index: ActiveIntervalIndex<i32, u32> = ActiveIntervalIndex::new();
        let mut model: Vec<ModelEntry> = Vec::new();
        let mut next_payload = 0u32;

        for op in ops {
            match op {
                Op::Insert { hash, invisible } => {
                    let interval = ActiveInterval { start: 0, end: 1, key: hash, payload: next_payload };
                    let slot = if invisible {
                        index.insert_invisible_interval(hash, interval)
                    } else {
                        index.insert_interval(hash, interval)
                    };
                    prop_assert!(model.iter().all(|e| e.0 != slot), "slot {:?} handed out twice", slot);
                    model.push((slot, hash, next_payload, !invisible));
                    next_payload += 1;
                }
                Op::Remove(i) => {
                    if !model.is_empty() {
                        let (slot, _, payload, _) = model.remove(i % model.len());
                        let removed = index.remove(slot);
                        prop_assert_eq!(removed.map(|iv| iv.payload), Some(payload));
                    }
                }
                Op::Promote => {
                    let pending = index.take_invisible();
                    for &slot in &pending {
                        index.make_visible(slot);
                    }
                    index.recycle_invisible(pending);
                    for entry in model.iter_mut() {
                        entry.3 = true;
                    }
                }
            }

            prop_assert_eq!(index.len(), model.len());
            prop_assert_eq!(index.invisible_len(), model.iter().filter(|e| !e.3).count());
            for hash in 0..8 {
                let mut found: Vec<u32> = index.find(hash).map(|(_, iv)| iv.payload).collect();
                found.sort_unstable();
                let mut expected: Vec<u32> = model
                    .iter()
                    .filter(|e| e.1 == hash && e.3)
                    .map(|e| e.2)
                    .collect();
                expected.sort_unstable();
                prop_assert_eq!(found, expected);
            }
        }
    }

    /// Both scheduler kinds drain in non-decreasing time order and never
    /// return an entry later than the requested time.
    #[test]
    fn scheduler_drains_in_time_order(
        times in prop::collection::vec(0i64..1000, 1..200),
        cut in 0i64..1000,
    ) {
        let mut index: ActiveIntervalIndex<(), ()> = ActiveIntervalIndex::new();
        let mut sorted = times.clone();
        sorted.sort_unstable();

        for kind in [SchedulerKind::Ordered, SchedulerKind::Fifo] {
            let input: &[i64] = if kind == SchedulerKind::Fifo { &sorted } else { &times };
            let mut scheduler = EndpointScheduler::new(kind);
            for &t in input {
                scheduler.insert(t, Endpoint::Left(index.insert(0)));
            }

            let mut drained = Vec::new();
            while let Some((t, _)) = scheduler.try_next_inclusive(cut) {
                prop_assert!(t <= cut);
                drained.push(t);
            }
            let expected: Vec<i64> = sorted.iter().copied().filter(|&t| t <= cut).collect();
            prop_assert_eq!(&drained, &expected);
            prop_assert_eq!(scheduler.len(), times.len() - expected.len());
            if let Some(next) = scheduler.peek_time() {
                prop_assert!(next > cut);
            }
        }
    }
}
