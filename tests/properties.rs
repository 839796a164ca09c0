use proptest::prelude::*;

use segalloc::{HEAP_OVERHEAD, HeapConfig, Pointer, SegAlloc};

#[derive(Debug, Clone)]
enum Op {
    Alloc(usize),
    Free(usize),
    Realloc(usize, usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (1usize..2048).prop_map(Op::Alloc),
        1 => (1usize..20_000).prop_map(Op::Alloc),
        3 => any::<usize>().prop_map(Op::Free),
        2 => (any::<usize>(), 0usize..4096).prop_map(|(i, size)| Op::Realloc(i, size)),
    ]
}

/// A live allocation and the byte it was filled with.
#[derive(Debug, Clone, Copy)]
struct Live {
    ptr: Pointer,
    len: usize,
    fill: u8,
}

fn run(ops: &[Op]) -> (SegAlloc, Vec<Live>) {
    let mut heap = SegAlloc::with_config(HeapConfig::default().with_max_heap(1 << 22)).unwrap();
    let mut live: Vec<Live> = Vec::new();
    let mut fill = 0u8;

    for op in ops {
        fill = fill.wrapping_add(1);

        match *op {
            Op::Alloc(size) => {
                if let Some(ptr) = heap.allocate(size) {
                    heap.payload_mut(ptr)[..size].fill(fill);
                    live.push(Live { ptr, len: size, fill });
                }
            }
            Op::Free(i) if !live.is_empty() => {
                let entry = live.swap_remove(i % live.len());
                heap.deallocate(entry.ptr);
            }
            Op::Realloc(i, size) if !live.is_empty() => {
                let index = i % live.len();
                let old = live[index];
                let keep = old.len.min(size);

                match heap.reallocate(Some(old.ptr), size) {
                    Some(ptr) => {
                        assert!(heap.payload(ptr)[..keep].iter().all(|b| *b == old.fill));
                        heap.payload_mut(ptr)[keep..size].fill(old.fill);
                        live[index] = Live { ptr, len: size, fill: old.fill };
                    }
                    None if size == 0 => {
                        live.swap_remove(index);
                    }
                    None => {}
                }
            }
            _ => {}
        }
    }

    (heap, live)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn heap_stays_consistent(ops in prop::collection::vec(op(), 1..200)) {
        let (heap, live) = run(&ops);

        let stats = heap.validate().map_err(|err| TestCaseError::fail(err.to_string()))?;

        prop_assert_eq!(stats.allocated_blocks, live.len());
        prop_assert_eq!(stats.heap_size, stats.overhead + stats.allocated_bytes + stats.free_bytes);
        prop_assert_eq!(stats.overhead, HEAP_OVERHEAD);
        prop_assert_eq!(heap.validate(), Ok(stats));
    }

    #[test]
    fn live_payloads_keep_their_bytes(ops in prop::collection::vec(op(), 1..200)) {
        let (heap, live) = run(&ops);

        for entry in &live {
            prop_assert!(heap.usable_size(entry.ptr) >= entry.len);
            prop_assert!(heap.payload(entry.ptr)[..entry.len].iter().all(|b| *b == entry.fill));
        }
    }

    #[test]
    fn live_payloads_never_overlap(ops in prop::collection::vec(op(), 1..200)) {
        let (heap, live) = run(&ops);

        let mut spans: Vec<(usize, usize)> = live
            .iter()
            .map(|entry| (entry.ptr.offset(), entry.ptr.offset() + heap.usable_size(entry.ptr)))
            .collect();
        spans.sort();

        for pair in spans.windows(2) {
            prop_assert!(pair[0].1 <= pair[1].0);
        }
        for (start, _) in &spans {
            prop_assert_eq!(start % 8, 0);
        }
    }

    #[test]
    fn no_two_free_blocks_touch(ops in prop::collection::vec(op(), 1..200)) {
        let (heap, _) = run(&ops);

        let blocks: Vec<_> = heap.blocks().collect();
        for pair in blocks.windows(2) {
            prop_assert!(pair[0].allocated || pair[1].allocated);
            prop_assert_eq!(pair[0].offset + pair[0].size, pair[1].offset);
        }
    }

    #[test]
    fn freeing_everything_restores_one_block(ops in prop::collection::vec(op(), 1..200)) {
        let (mut heap, live) = run(&ops);

        for entry in live {
            heap.deallocate(entry.ptr);
        }

        let stats = heap.stats();
        prop_assert_eq!(stats.allocated_blocks, 0);
        prop_assert!(stats.free_blocks <= 1);
        prop_assert_eq!(stats.free_bytes, stats.heap_size - stats.overhead);
    }
}
