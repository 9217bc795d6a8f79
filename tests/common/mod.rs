#[cfg(all(feature = "std", not(feature = "shuttle"), not(loom)))]
pub mod list;

use wfsim::HelpQueue;

cfg_if::cfg_if! {
    if #[cfg(loom)] {
        pub(crate) use loom::sync::Arc;
        pub(crate) use loom::thread;
    } else if #[cfg(feature = "shuttle")] {
        pub(crate) use shuttle::sync::Arc;
        pub(crate) use shuttle::thread;
    } else {
        pub(crate) use std::sync::Arc;
        pub(crate) use std::thread;
    }
}

/// Push `PER_PARTICIPANT` values from every participant concurrently, then
/// drain and check that nothing was lost and per-participant order held.
#[allow(dead_code)]
pub(crate) fn queue_drain_test<const N: usize, const PER_PARTICIPANT: usize>() {
    let queue: Arc<HelpQueue<usize, N>> = Arc::new(HelpQueue::new());

    let handles: Vec<thread::JoinHandle<()>> = (0..N)
        .map(|enqueuer| {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for i in 0..PER_PARTICIPANT {
                    queue.push_back(enqueuer, enqueuer * PER_PARTICIPANT + i);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("A thread panicked");
    }

    let mut drained = Vec::new();
    while let Some(front) = queue.peek_front() {
        assert!(queue.try_pop_front(front));
        drained.push(front);
    }
    assert_eq!(drained.len(), N * PER_PARTICIPANT);

    for enqueuer in 0..N {
        let order: Vec<usize> = drained
            .iter()
            .copied()
            .filter(|value| value / PER_PARTICIPANT == enqueuer)
            .collect();
        let expected: Vec<usize> =
            (0..PER_PARTICIPANT).map(|i| enqueuer * PER_PARTICIPANT + i).collect();
        assert_eq!(order, expected);
    }
}
