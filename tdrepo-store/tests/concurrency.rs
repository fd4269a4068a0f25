use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use chrono::Utc;
use tdrepo_store::{DocumentStore, SqliteStore, ThingMetadata};

fn metadata() -> ThingMetadata {
    let now = Utc::now();
    ThingMetadata {
        endpoint: "http://example.org/".to_string(),
        created_at: now,
        modified_at: now,
        expires_at: now + chrono::Duration::seconds(60),
    }
}

fn write(store: &SqliteStore, uri: &str, title: &str) {
    let mut tx = store.begin_write().unwrap();
    tx.put_document(uri, &format!(r#"{{"title": "{}"}}"#, title))
        .unwrap();
    tx.put_keywords(uri, &[title.to_lowercase()]).unwrap();
    tx.put_metadata(uri, &metadata()).unwrap();
    tx.commit().unwrap();
}

#[test]
fn test_concurrent_writers_with_sweeper() {
    let _ = tracing_subscriber::fmt::try_init();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("race_test.db");
    let store = Arc::new(SqliteStore::open(&path).unwrap());

    let writers = 4;
    let per_writer = 50;
    let done = Arc::new(AtomicBool::new(false));

    // Deletes every doomed document it can see while writers run
    let sweeper = {
        let store = Arc::clone(&store);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            let mut removed = 0;
            loop {
                let finished = done.load(Ordering::Relaxed);
                for uri in store.query_text("doomed").unwrap() {
                    if store.delete_document(&uri).unwrap() {
                        removed += 1;
                    }
                }
                if finished {
                    break removed;
                }
                thread::yield_now();
            }
        })
    };

    let handles: Vec<_> = (0..writers)
        .map(|w| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for i in 0..per_writer {
                    let title = if i % 5 == 0 { "Doomed" } else { "Keeper" };
                    write(&store, &format!("http://h/td/{}-{}", w, i), title);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    done.store(true, Ordering::Relaxed);
    let removed = sweeper.join().unwrap();

    let doomed = writers * per_writer / 5;
    assert_eq!(removed, doomed);

    // Reopen to check what reached disk
    drop(store);
    let store = SqliteStore::open(&path).unwrap();
    assert_eq!(store.count().unwrap(), writers * per_writer - doomed);
    assert!(store.query_text("doomed").unwrap().is_empty());
    assert_eq!(
        store.query_text("keeper").unwrap().len(),
        writers * per_writer - doomed
    );
    assert_eq!(store.expiry_entries().unwrap().len(), store.count().unwrap());
}
