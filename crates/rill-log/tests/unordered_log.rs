//! Unordered log integration tests: splicing, erasure and concurrent
//! producers.

use std::sync::Arc;

use rill_common::reclaim::{ImmediateReclaimer, QueuedReclaimer};
use rill_common::{PageId, PAGE_SIZE};
use rill_log::{LogPage, UnorderedLog, MAX_ENTRY_SIZE};
use rill_page::PageManager;

fn setup(pages: usize) -> (Arc<PageManager>, UnorderedLog) {
    let manager = Arc::new(PageManager::new(pages * PAGE_SIZE));
    let log = UnorderedLog::new(Arc::clone(&manager), Arc::new(ImmediateReclaimer)).unwrap();
    (manager, log)
}

/// Builds a detached chain of `count` formatted pages, each holding one
/// sealed entry tagged with `tag`.
fn build_sublist(manager: &PageManager, count: usize, tag: u32) -> (PageId, PageId) {
    let ids: Vec<PageId> = (0..count).map(|_| manager.alloc().unwrap()).collect();
    for (i, &id) in ids.iter().enumerate() {
        let page = LogPage::format(manager, id);
        let mut entry = page.append(16, tag).unwrap();
        entry.payload_mut().fill(tag as u8);
        entry.seal();
        if i + 1 < count {
            page.set_next(ids[i + 1]);
        }
    }
    (ids[0], ids[count - 1])
}

#[test]
fn append_page_splices_sublists() {
    let (manager, log) = setup(8);

    for i in 0..3u8 {
        log.append_sealed(&[i; 16], 1).unwrap();
    }

    let (begin, end) = build_sublist(&manager, 2, 9);
    log.append_page(begin, end);
    assert_eq!(log.page_count(), 3);

    // Every entry, spliced or appended, is reachable from the heads.
    let sealed: Vec<u32> = log
        .iter()
        .filter(|e| e.is_sealed())
        .map(|e| e.entry_type())
        .collect();
    assert_eq!(sealed.len(), 5);
    assert_eq!(sealed.iter().filter(|&&t| t == 9).count(), 2);

    // Appends keep landing on the write head, not the spliced pages.
    log.append_sealed(&[7; 16], 1).unwrap();
    assert_eq!(log.iter().filter(|e| e.is_sealed()).count(), 6);
    assert_eq!(log.page_count(), 3);
}

#[test]
fn erase_detaches_old_pages() {
    let manager = Arc::new(PageManager::new(8 * PAGE_SIZE));
    let reclaimer = Arc::new(QueuedReclaimer::new());
    let log = UnorderedLog::new(Arc::clone(&manager), reclaimer.clone()).unwrap();

    // Force two rotations: three pages chained write-head → … → tail.
    let payload = vec![2u8; (MAX_ENTRY_SIZE / 2) as usize];
    for _ in 0..3 {
        log.append_sealed(&payload, 0).unwrap();
    }
    assert_eq!(log.page_count(), 3);

    // Make the current write head the new tail; everything older detaches.
    let keep = log.write_head_page();
    log.erase(keep, None);
    assert_eq!(log.tail_page(), keep);
    assert_eq!(log.page_count(), 1);

    // The detached segment is released only after the grace period.
    let before = manager.allocated_pages();
    assert_eq!(reclaimer.drain(), 1);
    assert_eq!(manager.allocated_pages(), before - 2);

    // The surviving page still serves appends and reads.
    log.append_sealed(&[9; 16], 3).unwrap();
    assert!(log.iter().any(|e| e.entry_type() == 3));
}

#[test]
fn erase_between_pages() {
    let (manager, log) = setup(8);

    // Chain: write head -> middle -> tail.
    let payload = vec![4u8; (MAX_ENTRY_SIZE / 2) as usize];
    for _ in 0..3 {
        log.append_sealed(&payload, 0).unwrap();
    }
    let head = log.write_head_page();
    let tail = log.tail_page();

    // Detach the single page strictly between head and tail.
    log.erase(head, Some(tail));
    assert_eq!(log.page_count(), 2);
    assert_eq!(LogPage::from_manager(&manager, head).next(), Some(tail));

    // Erasing an empty range is a no-op.
    log.erase(head, Some(tail));
    assert_eq!(log.page_count(), 2);
}

#[test]
fn concurrent_appends_all_arrive() {
    let (_manager, log) = setup(8);
    let log = Arc::new(log);

    let mut handles = Vec::new();
    for t in 0..4u32 {
        let log = Arc::clone(&log);
        handles.push(std::thread::spawn(move || {
            for i in 0..250u32 {
                let tag = t * 1000 + i + 1;
                log.append_sealed(&tag.to_le_bytes(), tag).unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    let mut tags: Vec<u32> = log
        .iter()
        .filter(|e| e.is_sealed())
        .map(|e| e.entry_type())
        .collect();
    assert_eq!(tags.len(), 1000);
    tags.sort_unstable();
    tags.dedup();
    assert_eq!(tags.len(), 1000, "duplicate or lost entries");
}
