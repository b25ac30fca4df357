mod integration {
    mod ping_lifecycle {

        extern crate pingstore;
        extern crate tempdir;

        use self::pingstore::metric::{
            test_get_num_recorded_errors, CounterMetric, EventMetric, OverflowPolicy, StringMetric,
        };
        use self::pingstore::{
            CommonMetricData, Config, Database, Error, ErrorType, Lifetime, MetricType,
            PingCollector,
        };
        use self::tempdir::TempDir;
        use std::collections::HashMap;
        use std::fs;
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;
        use std::thread;

        fn meta(category: &str, name: &str, lifetime: Lifetime) -> CommonMetricData {
            CommonMetricData::new(category, name, lifetime, vec!["metrics".into()])
        }

        fn on_disk(dir: &TempDir) -> Config {
            let mut config = Config::with_data_directory(dir.path());
            config.flush_interval = 0;
            config
        }

        #[test]
        fn truncated_string_is_reported_and_cleared() {
            let db = Database::new(Config::default()).unwrap();
            let engine = StringMetric::new(meta("search", "engine", Lifetime::Ping));
            let value = "abcdefghij".repeat(6);
            assert_eq!(60, value.len());

            engine.set(&db, value.as_str());
            assert_eq!(
                1,
                test_get_num_recorded_errors(
                    &db,
                    engine.identity(),
                    ErrorType::InvalidOverflow,
                    "metrics"
                )
            );

            let payload = db.collect("metrics").unwrap();
            assert_eq!(
                Some(&value[..50].to_string()),
                payload.metrics.string.get("search.engine")
            );
            assert_eq!(
                Some(&1),
                payload
                    .metrics
                    .counter
                    .get("recording_error.invalid_overflow:search.engine")
            );

            assert!(db.engines().strings.peek("metrics").is_empty());
            assert!(db.engines().counters.peek("metrics").is_empty());
        }

        #[test]
        fn second_collect_holds_only_new_data() {
            let db = Database::new(Config::default()).unwrap();
            let clicks = CounterMetric::new(meta("ui", "clicks", Lifetime::Ping));
            clicks.add(&db, 2);

            let first = db.collect("metrics").unwrap();
            assert_eq!(Some(&2), first.metrics.counter.get("ui.clicks"));

            let second = db.collect("metrics").unwrap();
            assert!(second.is_empty());
            assert_eq!(first.ping_info.seq + 1, second.ping_info.seq);

            clicks.add(&db, 5);
            let third = db.collect("metrics").unwrap();
            assert_eq!(Some(&5), third.metrics.counter.get("ui.clicks"));
        }

        #[test]
        fn collecting_one_store_leaves_the_others() {
            let db = Database::new(Config::default()).unwrap();
            let clicks = CounterMetric::new(CommonMetricData::new(
                "ui",
                "clicks",
                Lifetime::Ping,
                vec!["metrics".into(), "baseline".into()],
            ));
            clicks.add(&db, 1);

            db.collect("metrics").unwrap();
            let baseline = db.collect("baseline").unwrap();
            assert_eq!(Some(&1), baseline.metrics.counter.get("ui.clicks"));
        }

        #[test]
        fn gate_drops_everything_while_closed() {
            let db = Database::new(Config::default()).unwrap();
            let engine = StringMetric::new(meta("search", "engine", Lifetime::Ping));
            db.set_upload_enabled(false);
            engine.set(&db, "x".repeat(80));
            db.set_upload_enabled(true);

            let payload = db.collect("metrics").unwrap();
            assert!(payload.is_empty());
        }

        #[test]
        fn concurrent_writers_lose_nothing() {
            const WRITERS: usize = 4;
            const ADDS: usize = 2_000;

            let db = Arc::new(Database::new(Config::default()).unwrap());
            let done = Arc::new(AtomicBool::new(false));
            let ping = CounterMetric::new(meta("race", "ping", Lifetime::Ping));
            let app = CounterMetric::new(meta("race", "app", Lifetime::Application));

            let mut writers = Vec::new();
            for _ in 0..WRITERS {
                let db = Arc::clone(&db);
                let ping = ping.clone();
                let app = app.clone();
                writers.push(thread::spawn(move || {
                    for _ in 0..ADDS {
                        ping.add(&db, 1);
                        app.add(&db, 1);
                    }
                }));
            }

            let collector = {
                let db = Arc::clone(&db);
                let done = Arc::clone(&done);
                thread::spawn(move || {
                    let mut collected = 0i64;
                    while !done.load(Ordering::SeqCst) {
                        let payload = db.collect("metrics").unwrap();
                        collected += i64::from(*payload.metrics.counter.get("race.ping").unwrap_or(&0));
                    }
                    collected
                })
            };

            for w in writers {
                w.join().unwrap();
            }
            done.store(true, Ordering::SeqCst);
            let mut collected = collector.join().unwrap();

            let last = db.collect("metrics").unwrap();
            collected += i64::from(*last.metrics.counter.get("race.ping").unwrap_or(&0));

            assert_eq!((WRITERS * ADDS) as i64, collected);
            assert_eq!(
                Some(&((WRITERS * ADDS) as i32)),
                last.metrics.counter.get("race.app")
            );
        }

        #[test]
        fn persisted_data_survives_restart() {
            let dir = TempDir::new("pingstore").unwrap();
            let ping = CounterMetric::new(meta("t", "ping", Lifetime::Ping));
            let app = CounterMetric::new(meta("t", "app", Lifetime::Application));
            let user = StringMetric::new(meta("t", "user", Lifetime::User));
            let (client_id, seq) = {
                let db = Database::new(on_disk(&dir)).unwrap();
                ping.add(&db, 1);
                app.add(&db, 2);
                user.set(&db, "kept");
                let seq = db.collect("metrics").unwrap().ping_info.seq;
                (db.client_id(), seq)
            };

            let db = Database::new(on_disk(&dir)).unwrap();
            assert_eq!(client_id, db.client_id());
            let payload = db.collect("metrics").unwrap();
            assert_eq!(seq + 1, payload.ping_info.seq);
            assert_eq!(None, payload.metrics.counter.get("t.ping"));
            assert_eq!(Some(&2), payload.metrics.counter.get("t.app"));
            assert_eq!(Some(&"kept".to_string()), payload.metrics.string.get("t.user"));
        }

        #[test]
        fn failed_collect_keeps_data_and_seq() {
            let dir = TempDir::new("pingstore").unwrap();
            let data = dir.path().join("data");
            let mut config = Config::with_data_directory(&data);
            config.flush_interval = 0;
            let db = Database::new(config).unwrap();
            let clicks = CounterMetric::new(meta("ui", "clicks", Lifetime::Ping));
            clicks.add(&db, 3);

            // Swap the data directory for a plain file so every flush fails.
            fs::remove_dir_all(&data).unwrap();
            fs::write(&data, b"in the way").unwrap();

            match db.collect("metrics") {
                Err(Error::Persistence(_)) => {}
                other => panic!("expected a persistence error, got {:?}", other),
            }
            assert_eq!(Some(3), clicks.test_get_value(&db, "metrics"));

            clicks.add(&db, 4);

            fs::remove_file(&data).unwrap();
            fs::create_dir_all(&data).unwrap();
            let payload = db.collect("metrics").unwrap();
            assert_eq!(0, payload.ping_info.seq);
            assert_eq!(Some(&7), payload.metrics.counter.get("ui.clicks"));
        }

        #[test]
        fn truncation_errors_ship_with_their_values() {
            const WRITERS: usize = 2;
            const SETS: usize = 500;

            let db = Arc::new(Database::new(Config::default()).unwrap());
            let done = Arc::new(AtomicBool::new(false));
            let engine = StringMetric::new(meta("search", "engine", Lifetime::Ping));
            let error = "recording_error.invalid_overflow:search.engine";

            let mut writers = Vec::new();
            for _ in 0..WRITERS {
                let db = Arc::clone(&db);
                let engine = engine.clone();
                writers.push(thread::spawn(move || {
                    for _ in 0..SETS {
                        engine.set(&db, "y".repeat(60));
                    }
                }));
            }

            let collector = {
                let db = Arc::clone(&db);
                let done = Arc::clone(&done);
                thread::spawn(move || {
                    let mut payloads = Vec::new();
                    while !done.load(Ordering::SeqCst) {
                        payloads.push(db.collect("metrics").unwrap());
                    }
                    payloads
                })
            };

            for w in writers {
                w.join().unwrap();
            }
            done.store(true, Ordering::SeqCst);
            let mut payloads = collector.join().unwrap();
            payloads.push(db.collect("metrics").unwrap());

            let mut errors = 0;
            for payload in payloads.iter() {
                assert_eq!(
                    payload.metrics.string.contains_key("search.engine"),
                    payload.metrics.counter.contains_key(error)
                );
                errors += payload.metrics.counter.get(error).cloned().unwrap_or(0);
            }
            assert_eq!((WRITERS * SETS) as i32, errors);
        }

        fn events_db(policy: OverflowPolicy) -> Database {
            let mut config = Config::default();
            config.max_events = 2;
            config.event_overflow = policy;
            Database::new(config).unwrap()
        }

        fn page_views(db: &Database, pages: &[&str]) -> Vec<String> {
            let view = EventMetric::new(
                CommonMetricData::new("nav", "view", Lifetime::Ping, vec!["events".into()]),
                vec!["page".into()],
            );
            for page in pages {
                let mut extra = HashMap::new();
                extra.insert("page".to_string(), page.to_string());
                view.record_event(db, Some(extra));
            }
            let payload = db.collect("events").unwrap();
            assert_eq!(
                Some(&1),
                payload
                    .metrics
                    .counter
                    .get("recording_error.invalid_overflow:nav.view")
            );
            assert_eq!(0, payload.events[0].timestamp);
            payload
                .events
                .iter()
                .map(|e| e.extra.as_ref().unwrap()["page"].clone())
                .collect()
        }

        #[test]
        fn event_overflow_drops_oldest() {
            let db = events_db(OverflowPolicy::DropOldest);
            assert_eq!(vec!["b", "c"], page_views(&db, &["a", "b", "c"]));
        }

        #[test]
        fn event_overflow_rejects_newest() {
            let db = events_db(OverflowPolicy::Reject);
            assert_eq!(vec!["a", "b"], page_views(&db, &["a", "b", "c"]));
        }

        #[test]
        fn reset_clears_by_lifetime() {
            let db = Database::new(Config::default()).unwrap();
            let app = CounterMetric::new(meta("t", "app", Lifetime::Application));
            let user = CounterMetric::new(meta("t", "user", Lifetime::User));
            app.add(&db, 1);
            user.add(&db, 1);

            db.clear_application_lifetime().unwrap();
            let payload = db.collect("metrics").unwrap();
            assert_eq!(None, payload.metrics.counter.get("t.app"));
            assert_eq!(Some(&1), payload.metrics.counter.get("t.user"));

            let before = payload.client_info.client_id.clone();
            db.clear_all().unwrap();
            let payload = db.collect("metrics").unwrap();
            assert!(payload.is_empty());
            assert_eq!(0, payload.ping_info.seq);
            assert!(payload.client_info.client_id.is_some());
            assert_ne!(before, payload.client_info.client_id);
        }
    }
}
