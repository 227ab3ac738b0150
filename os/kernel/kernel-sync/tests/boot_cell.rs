use kernel_sync::BootCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

#[test]
fn empty_until_set() {
    let cell = BootCell::<u32>::new();
    assert!(cell.get().is_none());
    assert!(!cell.is_set());

    assert_eq!(cell.set(7), Ok(&7));
    assert_eq!(cell.get(), Some(&7));
    assert!(cell.is_set());
}

#[test]
fn second_set_returns_the_value() {
    let cell = BootCell::new();
    assert!(cell.set(String::from("first")).is_ok());
    assert_eq!(cell.set(String::from("second")), Err(String::from("second")));
    assert_eq!(cell.get().map(String::as_str), Some("first"));
}

#[test]
fn exactly_one_concurrent_writer_wins() {
    let cell = Arc::new(BootCell::<usize>::new());
    let winners = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let cell = Arc::clone(&cell);
            let winners = Arc::clone(&winners);
            thread::spawn(move || {
                if cell.set(i).is_ok() {
                    winners.fetch_add(1, Ordering::Relaxed);
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(winners.load(Ordering::Relaxed), 1);
    assert!(cell.get().is_some_and(|v| *v < 8));
}

#[test]
fn drops_the_published_value() {
    let marker = Arc::new(());
    {
        let cell = BootCell::new();
        assert!(cell.set(Arc::clone(&marker)).is_ok());
        assert_eq!(Arc::strong_count(&marker), 2);
    }
    assert_eq!(Arc::strong_count(&marker), 1);
}
