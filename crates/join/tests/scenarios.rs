//! End-to-end scenarios for both join operators.

use tempora_core::{hash_key, Batch, BatchSink, Event, RowKind};
use tempora_join::{EquiJoin, JoinConfig, PartitionPhase, PartitionedEquiJoin};

type Key = (char, u32);

fn key(partition: char, id: u32) -> Key {
    (partition, id)
}

fn interval(start: i64, end: i64, k: Key, payload: &'static str) -> Event<Key, &'static str> {
    Event::interval(start, end, k, hash_key(&k), payload)
}

fn batch(rows: Vec<Event<Key, &'static str>>) -> Batch<Key, &'static str> {
    Batch::from_events(rows).unwrap()
}

fn pair(l: &&'static str, r: &&'static str) -> (&'static str, &'static str) {
    (*l, *r)
}

type Pair = (&'static str, &'static str);
type Single = EquiJoin<Key, &'static str, &'static str, Pair>;
type Partitioned = PartitionedEquiJoin<char, Key, &'static str, &'static str, Pair>;

fn single() -> (Single, BatchSink<Key, Pair>) {
    let sink = BatchSink::new();
    let join = EquiJoin::new(JoinConfig::default(), pair, sink.clone()).unwrap();
    (join, sink)
}

fn partitioned() -> (Partitioned, BatchSink<Key, Pair>) {
    let sink = BatchSink::new();
    let join =
        PartitionedEquiJoin::new(JoinConfig::default(), |k: &Key| k.0, pair, sink.clone()).unwrap();
    (join, sink)
}

fn data(sink: &BatchSink<Key, Pair>) -> Vec<(i64, i64, Key, Pair)> {
    sink.events()
        .into_iter()
        .filter(|e| e.kind() == RowKind::Interval)
        .map(|e| (e.sync_time, e.other_time, e.key, e.payload))
        .collect()
}

fn watermarks(sink: &BatchSink<Key, Pair>) -> Vec<i64> {
    sink.events()
        .into_iter()
        .filter(|e| e.kind() == RowKind::LowWatermark)
        .map(|e| e.sync_time)
        .collect()
}

#[test]
fn test_overlap_scenario_partitioned_both_orders() {
    for left_first in [true, false] {
        let (mut join, sink) = partitioned();
        let left = batch(vec![interval(0, 10, key('a', 1), "l"), Event::low_watermark(20)]);
        let right = batch(vec![interval(5, 15, key('a', 1), "r"), Event::low_watermark(20)]);
        if left_first {
            join.on_left_batch(left);
            join.on_right_batch(right);
        } else {
            join.on_right_batch(right);
            join.on_left_batch(left);
        }
        join.on_flush();
        assert_eq!(data(&sink), vec![(5, 10, key('a', 1), ("l", "r"))]);
    }
}

#[test]
fn test_half_open_boundary() {
    let (mut s, s_sink) = single();
    s.on_left_batch(batch(vec![interval(10, 20, key('a', 1), "l")]));
    s.on_right_batch(batch(vec![interval(20, 30, key('a', 1), "r")]));
    s.on_left_completed();
    s.on_right_completed();
    assert!(data(&s_sink).is_empty());

    let (mut p, p_sink) = partitioned();
    p.on_left_batch(batch(vec![interval(10, 20, key('a', 1), "l")]));
    p.on_right_batch(batch(vec![interval(20, 30, key('a', 1), "r")]));
    p.on_left_completed();
    p.on_right_completed();
    assert!(data(&p_sink).is_empty());
}

#[test]
fn test_same_time_delivery_order_does_not_matter() {
    let rows_left = || {
        batch(vec![
            interval(5, 9, key('a', 1), "l1"),
            interval(5, 12, key('a', 2), "l2"),
        ])
    };
    let rows_right = || {
        batch(vec![
            interval(5, 7, key('a', 1), "r1"),
            interval(5, 20, key('a', 2), "r2"),
        ])
    };

    let mut results = Vec::new();
    for left_first in [true, false] {
        let (mut join, sink) = partitioned();
        if left_first {
            join.on_left_batch(rows_left());
            join.on_right_batch(rows_right());
        } else {
            join.on_right_batch(rows_right());
            join.on_left_batch(rows_left());
        }
        join.on_left_completed();
        join.on_right_completed();
        let mut rows = data(&sink);
        rows.sort();
        results.push(rows);
    }
    assert_eq!(results[0], results[1]);
    assert_eq!(
        results[0],
        vec![
            (5, 7, key('a', 1), ("l1", "r1")),
            (5, 12, key('a', 2), ("l2", "r2")),
        ]
    );
}

#[test]
fn test_watermarks_never_exceed_either_side() {
    let (mut join, sink) = partitioned();
    join.on_left_batch(batch(vec![Event::low_watermark(10)]));
    join.on_right_batch(batch(vec![Event::low_watermark(5)]));
    join.on_right_batch(batch(vec![Event::low_watermark(5)]));
    join.on_left_batch(batch(vec![Event::low_watermark(30)]));
    join.on_right_batch(batch(vec![Event::low_watermark(25)]));
    join.on_flush();
    assert_eq!(watermarks(&sink), vec![5, 25]);
    assert_eq!(join.current_watermark(), 25);
}

#[test]
fn test_memory_reclaimed_after_watermark() {
    let (mut join, _sink) = partitioned();
    join.on_left_batch(batch(vec![
        interval(0, 10, key('a', 1), "l"),
        interval(2, 8, key('b', 1), "l"),
    ]));
    join.on_right_batch(batch(vec![interval(3, 9, key('a', 1), "r")]));
    assert_eq!(join.live_partitions(), 2);

    join.on_left_batch(batch(vec![Event::low_watermark(50)]));
    assert_eq!(join.live_partitions(), 2);
    join.on_right_batch(batch(vec![Event::low_watermark(50)]));

    assert_eq!(join.current_watermark(), 50);
    assert_eq!(join.live_partitions(), 0);
    assert_eq!(join.live_intervals(), 0);
    assert_eq!(join.pending_rows(), 0);
}

#[test]
fn test_watermark_purging_one_partition_spares_unseen_one() {
    let (mut join, sink) = partitioned();
    join.on_left_batch(batch(vec![interval(0, 50, key('a', 1), "la")]));
    join.on_right_batch(batch(vec![interval(10, 60, key('a', 1), "ra")]));
    join.on_left_batch(batch(vec![Event::low_watermark(100)]));
    join.on_right_batch(batch(vec![Event::low_watermark(100)]));
    assert_eq!(join.partition_phase(&'a'), None);
    assert_eq!(join.partition_phase(&'b'), None);

    join.on_left_batch(batch(vec![interval(120, 130, key('b', 1), "lb")]));
    assert_eq!(join.partition_phase(&'b'), Some(PartitionPhase::Active));
    join.on_right_batch(batch(vec![interval(125, 140, key('b', 1), "rb")]));
    join.on_left_batch(batch(vec![Event::low_watermark(200)]));
    join.on_right_batch(batch(vec![Event::low_watermark(200)]));
    join.on_flush();

    assert_eq!(
        data(&sink),
        vec![
            (10, 50, key('a', 1), ("la", "ra")),
            (125, 130, key('b', 1), ("lb", "rb")),
        ]
    );
    assert_eq!(watermarks(&sink), vec![100, 200]);
    assert_eq!(join.live_partitions(), 0);
}

#[test]
fn test_punctuation_forwarded_once_per_timeline() {
    let (mut join, sink) = single();
    join.on_left_batch(batch(vec![
        Event::punctuation(10, key('a', 0)),
        Event::punctuation(10, key('a', 0)),
    ]));
    join.on_right_batch(batch(vec![
        Event::punctuation(8, key('a', 0)),
        Event::punctuation(10, key('a', 0)),
        Event::punctuation(12, key('a', 0)),
    ]));
    join.on_left_completed();
    join.on_right_completed();

    let forwarded: Vec<i64> = sink
        .events()
        .into_iter()
        .filter(|e| e.kind() == RowKind::Punctuation)
        .map(|e| e.sync_time)
        .collect();
    assert_eq!(forwarded, vec![8, 10, 12]);
}

#[test]
fn test_checkpoint_restore_partitioned() {
    let (mut join, sink) = partitioned();
    join.on_left_batch(batch(vec![
        interval(0, 40, key('a', 1), "l1"),
        interval(5, 30, key('b', 2), "l2"),
        Event::low_watermark(5),
    ]));
    join.on_right_batch(batch(vec![interval(3, 20, key('a', 1), "r1")]));
    let snapshot = join.checkpoint();
    assert_eq!(snapshot.live_partitions(), 2);

    let replay_sink = BatchSink::new();
    let mut replay = Partitioned::restore(
        JoinConfig::default(),
        |k: &Key| k.0,
        pair,
        replay_sink.clone(),
        snapshot,
    )
    .unwrap();
    assert_eq!(replay.live_partitions(), 2);
    assert_eq!(replay.live_intervals(), join.live_intervals());
    assert_eq!(replay.partition_time(&'a'), join.partition_time(&'a'));

    let tail = || {
        batch(vec![
            interval(10, 25, key('b', 2), "r2"),
            Event::low_watermark(60),
        ])
    };
    let sent = sink.events().len();
    join.on_right_batch(tail());
    replay.on_right_batch(tail());
    for j in [&mut join, &mut replay] {
        j.on_left_batch(batch(vec![Event::low_watermark(60)]));
        j.on_flush();
    }

    assert_eq!(sink.events()[sent..].to_vec(), replay_sink.events());
    assert_eq!(
        data(&replay_sink),
        vec![
            (3, 20, key('a', 1), ("l1", "r1")),
            (10, 25, key('b', 2), ("l2", "r2")),
        ]
    );
    assert_eq!(replay.live_partitions(), 0);
}

#[test]
fn test_consumer_returns_batches_to_pool() {
    let config = JoinConfig::builder()
        .batch_capacity(1)
        .max_pooled_batches(2)
        .build()
        .unwrap();
    let sink = BatchSink::new();
    let mut join: Single = EquiJoin::new(config, pair, sink.clone()).unwrap();

    join.on_left_batch(batch(vec![
        interval(0, 10, key('a', 1), "l1"),
        interval(0, 10, key('a', 1), "l2"),
        interval(0, 10, key('a', 1), "l3"),
    ]));
    join.on_right_batch(batch(vec![interval(1, 5, key('a', 1), "r")]));
    join.on_left_completed();
    join.on_right_completed();

    assert_eq!(join.batches_emitted(), 3);
    assert_eq!(join.pool_stats().allocated, 3);
    for out in sink.take_batches() {
        assert_eq!(out.len(), 1);
        join.pool().recycle(out);
    }
    assert_eq!(join.pool().available(), 2);
    assert_eq!(join.pool_stats().discarded, 1);

    let reused = join.pool().get();
    assert!(reused.is_empty());
    assert_eq!(join.pool_stats().reused, 1);
}
