#[macro_export]
macro_rules! write_test_cases_for_me {
    ($e:ty, $element:expr) => {
        fn element(i: i32) -> <$e as $crate::Element>::Owned {
            ($element)(i)
        }

        fn add(set: &$crate::HashSet<$e>, i: i32) -> bool {
            set.add(std::borrow::Borrow::<$e>::borrow(&element(i)))
        }

        fn contains(set: &$crate::HashSet<$e>, i: i32) -> bool {
            set.contains(std::borrow::Borrow::<$e>::borrow(&element(i)))
        }

        fn remove(set: &$crate::HashSet<$e>, i: i32) -> bool {
            set.remove(std::borrow::Borrow::<$e>::borrow(&element(i)))
        }

        #[test]
        fn insertion() {
            const MAX_VALUE: i32 = 512;

            let set = $crate::HashSet::<$e>::with_bits(false, 2, 12);

            for i in 0..MAX_VALUE {
                assert!(add(&set, i));

                assert!(!set.is_empty());
                assert_eq!(set.len(), (i + 1) as usize);

                for j in 0..=i {
                    assert!(contains(&set, j));
                    assert!(!add(&set, j));
                }

                for k in i + 1..MAX_VALUE {
                    assert!(!contains(&set, k));
                }
            }

            assert_eq!(set.verify(), Ok(MAX_VALUE as usize));
        }

        #[test]
        fn growth() {
            const MAX_VALUE: i32 = 512;

            let set = $crate::HashSet::<$e>::with_bits(false, 0, 4);

            for i in 0..MAX_VALUE {
                assert!(add(&set, i));

                assert!(!set.is_empty());
                assert_eq!(set.len(), (i + 1) as usize);

                for j in 0..=i {
                    assert!(contains(&set, j));
                    assert!(!add(&set, j));
                }

                for k in i + 1..MAX_VALUE {
                    assert!(!contains(&set, k));
                }
            }

            assert!(set.capacity() > 16);
            assert_eq!(set.verify(), Ok(MAX_VALUE as usize));
        }

        #[test]
        fn concurrent_insertion() {
            const MAX_VALUE: i32 = 512;
            const NUM_THREADS: usize = 64;
            const MAX_INSERTED_VALUE: i32 = (NUM_THREADS as i32) * MAX_VALUE;

            let set = std::sync::Arc::new($crate::HashSet::<$e>::with_bits(true, 4, 12));
            let barrier = std::sync::Arc::new(std::sync::Barrier::new(NUM_THREADS));

            let threads: Vec<_> = (0..NUM_THREADS)
                .map(|i| {
                    let set = std::sync::Arc::clone(&set);
                    let barrier = std::sync::Arc::clone(&barrier);

                    std::thread::spawn(move || {
                        barrier.wait();

                        for j in (0..MAX_VALUE).map(|j| j + (i as i32 * MAX_VALUE)) {
                            assert!(add(&set, j));
                        }
                    })
                })
                .collect();

            for result in threads.into_iter().map(std::thread::JoinHandle::join) {
                assert!(result.is_ok());
            }

            assert!(!set.is_empty());
            assert_eq!(set.len(), MAX_INSERTED_VALUE as usize);

            for i in 0..MAX_INSERTED_VALUE {
                assert!(contains(&set, i));
            }

            assert_eq!(set.verify(), Ok(MAX_INSERTED_VALUE as usize));
            $crate::cht::test_util::run_deferred();
        }

        #[test]
        fn concurrent_growth() {
            const MAX_VALUE: i32 = 512;
            const NUM_THREADS: usize = 64;
            const MAX_INSERTED_VALUE: i32 = (NUM_THREADS as i32) * MAX_VALUE;

            // A single shard, so that every thread contends for the same
            // resizes.
            let set = std::sync::Arc::new($crate::HashSet::<$e>::with_bits(true, 0, 4));
            let barrier = std::sync::Arc::new(std::sync::Barrier::new(NUM_THREADS));

            let threads: Vec<_> = (0..NUM_THREADS)
                .map(|i| {
                    let set = std::sync::Arc::clone(&set);
                    let barrier = std::sync::Arc::clone(&barrier);

                    std::thread::spawn(move || {
                        barrier.wait();

                        for j in (0..MAX_VALUE).map(|j| j + (i as i32 * MAX_VALUE)) {
                            assert!(add(&set, j));
                            assert!(contains(&set, j));
                        }
                    })
                })
                .collect();

            for result in threads.into_iter().map(|t| t.join()) {
                assert!(result.is_ok());
            }

            assert!(!set.is_empty());
            assert_eq!(set.len(), MAX_INSERTED_VALUE as usize);

            for i in 0..MAX_INSERTED_VALUE {
                assert!(contains(&set, i));
            }

            assert_eq!(set.verify(), Ok(MAX_INSERTED_VALUE as usize));
            $crate::cht::test_util::run_deferred();
        }

        #[test]
        fn removal() {
            const MAX_VALUE: i32 = 512;

            let set = $crate::HashSet::<$e>::with_bits(false, 2, 4);

            for i in 0..MAX_VALUE {
                assert!(add(&set, i));
            }

            for i in 0..MAX_VALUE {
                assert!(remove(&set, i));
                assert!(!remove(&set, i));
            }

            assert!(set.is_empty());
            assert_eq!(set.len(), 0);

            for i in 0..MAX_VALUE {
                assert!(!contains(&set, i));
            }

            assert_eq!(set.verify(), Ok(0));
        }

        #[test]
        fn concurrent_removal() {
            const MAX_VALUE: i32 = 512;
            const NUM_THREADS: usize = 64;
            const MAX_INSERTED_VALUE: i32 = (NUM_THREADS as i32) * MAX_VALUE;

            let set = $crate::HashSet::<$e>::with_bits(true, 4, 4);

            for i in 0..MAX_INSERTED_VALUE {
                assert!(add(&set, i));
            }

            let set = std::sync::Arc::new(set);
            let barrier = std::sync::Arc::new(std::sync::Barrier::new(NUM_THREADS));

            let threads: Vec<_> = (0..NUM_THREADS)
                .map(|i| {
                    let set = std::sync::Arc::clone(&set);
                    let barrier = std::sync::Arc::clone(&barrier);

                    std::thread::spawn(move || {
                        barrier.wait();

                        for j in (0..MAX_VALUE).map(|j| j + (i as i32 * MAX_VALUE)) {
                            assert!(remove(&set, j));
                        }
                    })
                })
                .collect();

            for result in threads.into_iter().map(|t| t.join()) {
                assert!(result.is_ok());
            }

            assert_eq!(set.len(), 0);

            for i in 0..MAX_INSERTED_VALUE {
                assert!(!contains(&set, i));
            }

            $crate::cht::test_util::run_deferred();
        }

        #[test]
        fn concurrent_growth_and_removal() {
            const MAX_VALUE: i32 = 512;
            const NUM_THREADS: usize = 64;
            const MAX_INSERTED_VALUE: i32 = (NUM_THREADS as i32) * MAX_VALUE * 2;
            const INSERTED_MIDPOINT: i32 = MAX_INSERTED_VALUE / 2;

            let set = $crate::HashSet::<$e>::with_bits(true, 1, 4);

            for i in INSERTED_MIDPOINT..MAX_INSERTED_VALUE {
                assert!(add(&set, i));
            }

            let set = std::sync::Arc::new(set);
            let barrier = std::sync::Arc::new(std::sync::Barrier::new(NUM_THREADS * 2));

            let insert_threads: Vec<_> = (0..NUM_THREADS)
                .map(|i| {
                    let set = std::sync::Arc::clone(&set);
                    let barrier = std::sync::Arc::clone(&barrier);

                    std::thread::spawn(move || {
                        barrier.wait();

                        for j in (0..MAX_VALUE).map(|j| j + (i as i32 * MAX_VALUE)) {
                            assert!(add(&set, j));
                        }
                    })
                })
                .collect();

            let remove_threads: Vec<_> = (0..NUM_THREADS)
                .map(|i| {
                    let set = std::sync::Arc::clone(&set);
                    let barrier = std::sync::Arc::clone(&barrier);

                    std::thread::spawn(move || {
                        barrier.wait();

                        for j in
                            (0..MAX_VALUE).map(|j| INSERTED_MIDPOINT + j + (i as i32 * MAX_VALUE))
                        {
                            assert!(remove(&set, j));
                        }
                    })
                })
                .collect();

            for result in insert_threads
                .into_iter()
                .chain(remove_threads.into_iter())
                .map(std::thread::JoinHandle::join)
            {
                assert!(result.is_ok());
            }

            assert!(!set.is_empty());
            assert_eq!(set.len(), INSERTED_MIDPOINT as usize);

            for i in 0..INSERTED_MIDPOINT {
                assert!(contains(&set, i));
            }

            for i in INSERTED_MIDPOINT..MAX_INSERTED_VALUE {
                assert!(!contains(&set, i));
            }

            assert_eq!(set.verify(), Ok(INSERTED_MIDPOINT as usize));
            $crate::cht::test_util::run_deferred();
        }

        #[test]
        fn readers_during_growth() {
            const PRESENT: i32 = 1024;
            const MAX_VALUE: i32 = 4096;
            const NUM_WRITERS: usize = 8;
            const NUM_READERS: usize = 8;

            let set = $crate::HashSet::<$e>::with_bits(true, 0, 4);
            for i in 0..PRESENT {
                assert!(add(&set, i));
            }

            let set = std::sync::Arc::new(set);
            let barrier = std::sync::Arc::new(std::sync::Barrier::new(NUM_WRITERS + NUM_READERS));
            let done = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));

            let writers: Vec<_> = (0..NUM_WRITERS)
                .map(|i| {
                    let set = std::sync::Arc::clone(&set);
                    let barrier = std::sync::Arc::clone(&barrier);

                    std::thread::spawn(move || {
                        barrier.wait();

                        for j in (0..MAX_VALUE).map(|j| PRESENT + j + (i as i32 * MAX_VALUE)) {
                            assert!(add(&set, j));
                        }
                    })
                })
                .collect();

            let readers: Vec<_> = (0..NUM_READERS)
                .map(|_| {
                    let set = std::sync::Arc::clone(&set);
                    let barrier = std::sync::Arc::clone(&barrier);
                    let done = std::sync::Arc::clone(&done);

                    std::thread::spawn(move || {
                        barrier.wait();

                        while !done.load(std::sync::atomic::Ordering::Relaxed) {
                            for j in 0..PRESENT {
                                assert!(contains(&set, j), "lost {j} during a resize");
                            }
                        }
                    })
                })
                .collect();

            for result in writers.into_iter().map(std::thread::JoinHandle::join) {
                assert!(result.is_ok());
            }
            done.store(true, std::sync::atomic::Ordering::Relaxed);
            for result in readers.into_iter().map(std::thread::JoinHandle::join) {
                assert!(result.is_ok());
            }

            let total = PRESENT as usize + NUM_WRITERS * MAX_VALUE as usize;
            assert_eq!(set.len(), total);
            assert_eq!(set.verify(), Ok(total));
            $crate::cht::test_util::run_deferred();
        }

        #[test]
        fn iteration() {
            const MAX_VALUE: i32 = 2048;

            let set = $crate::HashSet::<$e>::with_bits(false, 3, 4);
            for i in 0..MAX_VALUE {
                assert!(add(&set, i));
            }

            let mut visited: Vec<_> = set.iter().collect();
            assert_eq!(visited.len(), MAX_VALUE as usize);

            let mut expected: Vec<_> = (0..MAX_VALUE).map(element).collect();
            visited.sort();
            expected.sort();
            assert_eq!(visited, expected);
        }

        #[test]
        fn add_all_and_add_exclusive() {
            const MAX_VALUE: i32 = 1024;

            let src = $crate::HashSet::<$e>::with_bits(true, 2, 4);
            let dst = $crate::HashSet::<$e>::with_bits(true, 2, 4);
            let narrow = $crate::HashSet::<$e>::with_bits(false, 0, 4);

            for i in 0..MAX_VALUE {
                assert!(add(&src, i));
            }
            for i in MAX_VALUE / 2..MAX_VALUE {
                assert!(add(&dst, i));
            }

            assert_eq!(dst.add_all(&src), (MAX_VALUE / 2) as usize);
            assert_eq!(narrow.add_all(&src), MAX_VALUE as usize);
            assert_eq!(dst.len(), MAX_VALUE as usize);
            assert_eq!(narrow.len(), MAX_VALUE as usize);

            let fresh = $crate::HashSet::<$e>::with_bits(false, 2, 4);
            for i in 0..MAX_VALUE * 2 {
                let v = element(i);
                let inserted = fresh.add_exclusive(std::borrow::Borrow::<$e>::borrow(&v), Some(&src));
                assert_eq!(inserted, i >= MAX_VALUE);
            }
            assert_eq!(fresh.len(), MAX_VALUE as usize);
        }
    };
}
