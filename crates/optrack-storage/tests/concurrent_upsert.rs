use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use chrono::Utc;
use optrack_core::{Category, Opportunity, OpportunityDraft, Priority};
use optrack_storage::{JsonStore, LockOptions, Store};

fn patient() -> LockOptions {
    LockOptions {
        timeout: Duration::from_secs(10),
        ..LockOptions::default()
    }
}

fn tokyo(priority: Priority) -> OpportunityDraft {
    OpportunityDraft {
        name: "ETHGlobal Tokyo".into(),
        url: Some("https://ethglobal.com".into()),
        category: Some(Category::Hackathon),
        priority: Some(priority),
        ..Default::default()
    }
}

#[test]
fn racing_writers_on_one_key_leave_exactly_one_record() {
    let dir = tempfile::tempdir().expect("tempdir");
    let barrier = Arc::new(Barrier::new(2));

    let handles: Vec<_> = [Priority::High, Priority::Low]
        .into_iter()
        .map(|priority| {
            let data_dir = dir.path().to_path_buf();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let store = JsonStore::<Opportunity>::open(&data_dir, patient());
                barrier.wait();
                for _ in 0..20 {
                    store
                        .write(|set| set.upsert(tokyo(priority), Utc::now()))
                        .expect("upsert under lock");
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("writer thread");
    }

    let store = JsonStore::<Opportunity>::open(dir.path(), patient());
    let set = store.load().expect("store still parses");
    assert_eq!(set.len(), 1);
    assert!(matches!(set.records()[0].priority, Priority::High | Priority::Low));
    assert_eq!(set.records()[0].id, 1);
    assert!(!store.lock_path().exists());
}

#[test]
fn racing_writers_on_distinct_keys_lose_nothing() {
    let dir = tempfile::tempdir().expect("tempdir");

    let handles: Vec<_> = (0..4)
        .map(|worker| {
            let data_dir = dir.path().to_path_buf();
            thread::spawn(move || {
                let store = JsonStore::<Opportunity>::open(&data_dir, patient());
                for n in 0..10 {
                    let draft = OpportunityDraft {
                        name: format!("grant {worker}-{n}"),
                        ..Default::default()
                    };
                    store
                        .write(|set| set.upsert(draft, Utc::now()))
                        .expect("upsert under lock");
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("writer thread");
    }

    let set = JsonStore::<Opportunity>::open(dir.path(), patient())
        .load()
        .expect("load");
    assert_eq!(set.len(), 40);
    let mut ids: Vec<u64> = set.records().iter().map(|r| r.id).collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 40);
}
