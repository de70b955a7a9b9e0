//! GC integration tests: no-op sweeps, fill-page rotation with resume,
//! insert folding and the table-level driver.

use std::sync::Arc;

use rill_common::reclaim::QueuedReclaimer;
use rill_common::{PageId, RecordAddr, RecordKey, Version, PAGE_SIZE};
use rill_deltamain::{
    Compactor, GarbageCollector, GcStep, HashIndex, IndexModifier, InsertEntry, InsertMap,
    MultiVersionRecord, RowStorePage, UpdateEntry,
};
use rill_log::{OrderedLog, UnorderedLog};
use rill_page::PageManager;

struct Fixture {
    pages: Arc<PageManager>,
    reclaimer: Arc<QueuedReclaimer>,
}

impl Fixture {
    fn new(arena_pages: usize) -> Self {
        Self {
            pages: Arc::new(PageManager::new(arena_pages * PAGE_SIZE)),
            reclaimer: Arc::new(QueuedReclaimer::new()),
        }
    }

    fn compactor(&self) -> Compactor {
        Compactor::new(Arc::clone(&self.pages), self.reclaimer.clone())
    }

    fn row_page(&self) -> (PageId, RowStorePage<'_>) {
        let id = self.pages.alloc().unwrap();
        (id, RowStorePage::new(&self.pages, id))
    }
}

/// Reads the record the index resolves for `key`.
fn resolve<'a>(index: &HashIndex, key: u64) -> MultiVersionRecord<'a> {
    let addr = index.get(RecordKey::new(key)).expect("key not indexed");
    // SAFETY: the fixture keeps every page alive for the test's duration.
    unsafe { MultiVersionRecord::from_addr(addr) }
}

#[test]
fn clean_page_is_left_untouched() {
    let fixture = Fixture::new(8);
    let (id, mut page) = fixture.row_page();
    let mut index = HashIndex::new();

    for key in 0..3u64 {
        let data = vec![key as u8; 100];
        let versions: Vec<(Version, Option<&[u8]>)> =
            vec![(Version::new(10), Some(data.as_slice()))];
        let addr = page.push_record(RecordKey::new(key), &versions).unwrap();
        index.insert(RecordKey::new(key), addr, false);
    }

    let mut compactor = fixture.compactor();
    let mut insert_map = InsertMap::new();
    let step = compactor
        .gc(&mut page, Version::new(5), &mut insert_map, &mut index)
        .unwrap();

    assert_eq!(step, GcStep::Clean);
    assert!(!compactor.has_open_fill());
    assert_eq!(fixture.reclaimer.pending(), 0, "clean page must not be retired");

    // The index still points into the original page.
    let rec = resolve(&index, 0);
    assert!(rec.addr().as_u64() >= fixture.pages.page_ptr(id).as_ptr() as u64);
}

#[test]
fn compaction_rotates_fill_pages_and_resumes() {
    let fixture = Fixture::new(16);
    let mut index = HashIndex::new();
    let delta_log = OrderedLog::new(Arc::clone(&fixture.pages), fixture.reclaimer.clone()).unwrap();

    const RECORDS_PER_PAGE: u64 = 6;
    const UPDATE_LEN: usize = 180_000;
    let survivor_size = 40 + UPDATE_LEN; // one version plus the record header

    // Two input pages of small records, each with one large pending update
    // chained on. With the floor above every version, compaction keeps just
    // the update, so the survivors are far larger than the inputs and the
    // fill page must rotate mid-way through the second page.
    let mut input = Vec::new();
    for page_no in 0..2u64 {
        let (id, mut page) = fixture.row_page();
        for i in 0..RECORDS_PER_PAGE {
            let key = RecordKey::new(page_no * RECORDS_PER_PAGE + i);
            let base = vec![0x11; 100];
            let versions: Vec<(Version, Option<&[u8]>)> =
                vec![(Version::new(10), Some(base.as_slice()))];
            let addr = page.push_record(key, &versions).unwrap();
            index.insert(key, addr, false);

            let update = vec![key.as_u64() as u8; UPDATE_LEN];
            let chain =
                UpdateEntry::append(&delta_log, key, Version::new(30), 0, Some(update.as_slice()))
                    .unwrap();
            // SAFETY: the record was just written and its page is alive.
            unsafe { MultiVersionRecord::from_addr(addr) }.set_newest(chain);
        }
        input.push((id, page));
    }
    let mut iter = input.into_iter();
    let (_id_a, mut page_a) = iter.next().unwrap();
    let (_id_b, mut page_b) = iter.next().unwrap();

    let mut compactor = fixture.compactor();
    let mut insert_map = InsertMap::new();
    let lowest = Version::new(35);

    // Page A drains entirely into the first fill page.
    let step = compactor
        .gc(&mut page_a, lowest, &mut insert_map, &mut index)
        .unwrap();
    assert_eq!(step, GcStep::Drained);
    assert!(compactor.has_open_fill());
    assert_eq!(fixture.reclaimer.pending(), 1, "page A retired");

    // Page B fills the rest of it; the sixth record does not fit.
    let step = compactor
        .gc(&mut page_b, lowest, &mut insert_map, &mut index)
        .unwrap();
    let full = match step {
        GcStep::FillFull(id) => id,
        other => panic!("expected FillFull, got {other:?}"),
    };
    let full_used = RowStorePage::new(&fixture.pages, full).used_bytes();
    assert_eq!(full_used, 8 + 11 * survivor_size);

    // The second call resumes exactly where the first stopped.
    let step = compactor
        .gc(&mut page_b, lowest, &mut insert_map, &mut index)
        .unwrap();
    assert_eq!(step, GcStep::Drained);
    assert_eq!(fixture.reclaimer.pending(), 2, "page B retired once");

    let tail = match compactor
        .fill_with_inserts(lowest, &mut insert_map, &mut index)
        .unwrap()
    {
        Some(id) => id,
        None => panic!("open fill page expected"),
    };
    let tail_used = RowStorePage::new(&fixture.pages, tail).used_bytes();

    // Every surviving byte is accounted for across the two fill pages.
    assert_eq!(
        (full_used - 8) + (tail_used - 8),
        12 * survivor_size,
        "relocated sizes must equal surviving bytes"
    );

    // All twelve records were relocated and carry only the update version.
    for key in 0..12u64 {
        let rec = resolve(&index, key);
        assert_eq!(rec.key().as_u64(), key);
        assert_eq!(rec.version_count(), 1);
        assert_eq!(rec.version_at(0), Version::new(30));
        let data = rec.version_data(0).unwrap();
        assert_eq!(data.len(), UPDATE_LEN);
        assert!(data.iter().all(|&b| b == key as u8));
        assert_eq!(rec.newest(), 0, "folded chains are reset");
    }
}

#[test]
fn mixed_page_relocates_every_record() {
    let fixture = Fixture::new(8);
    let (_id, mut page) = fixture.row_page();
    let mut index = HashIndex::new();

    // One collapsible record among clean ones drags the whole page through
    // compaction.
    for key in 0..4u64 {
        let new = vec![0xB0 | key as u8; 64];
        let old = vec![0x0A; 64];
        let versions: Vec<(Version, Option<&[u8]>)> = if key == 2 {
            vec![
                (Version::new(20), Some(new.as_slice())),
                (Version::new(10), Some(old.as_slice())),
            ]
        } else {
            vec![(Version::new(20), Some(new.as_slice()))]
        };
        let addr = page.push_record(RecordKey::new(key), &versions).unwrap();
        index.insert(RecordKey::new(key), addr, false);
    }

    let mut compactor = fixture.compactor();
    let mut insert_map = InsertMap::new();
    let step = compactor
        .gc(&mut page, Version::new(25), &mut insert_map, &mut index)
        .unwrap();
    assert_eq!(step, GcStep::Drained);

    for key in 0..4u64 {
        let rec = resolve(&index, key);
        assert_eq!(rec.version_count(), 1, "old version of key 2 collapsed");
        assert_eq!(rec.version_at(0), Version::new(20));
        assert_eq!(rec.version_data(0).unwrap()[0], 0xB0 | key as u8);
    }
}

#[test]
fn insert_folding_skips_indexed_keys() {
    let fixture = Fixture::new(8);
    let mut index = HashIndex::new();

    // Key 42 was folded by an earlier cycle and still resolves.
    let sentinel = RecordAddr::new(0x1000);
    index.insert(RecordKey::new(42), sentinel, false);

    let mut insert_map = InsertMap::new();
    let data42 = vec![0x42; 64];
    let data43 = vec![0x43; 64];
    insert_map.push(
        RecordKey::new(42),
        rill_deltamain::PendingInsert {
            version: Version::new(50),
            data: Some(bytes::Bytes::copy_from_slice(&data42)),
        },
    );
    insert_map.push(
        RecordKey::new(43),
        rill_deltamain::PendingInsert {
            version: Version::new(50),
            data: Some(bytes::Bytes::copy_from_slice(&data43)),
        },
    );

    let mut compactor = fixture.compactor();
    let page = compactor
        .fill_with_inserts(Version::new(10), &mut insert_map, &mut index)
        .unwrap()
        .unwrap();

    // 42 dropped without touching the fill page, 43 materialized.
    assert!(insert_map.is_empty());
    assert_eq!(index.get(RecordKey::new(42)), Some(sentinel));

    let view = RowStorePage::new(&fixture.pages, page);
    let keys: Vec<u64> = view.records().map(|(_, r)| r.key().as_u64()).collect();
    assert_eq!(keys, vec![43]);

    let rec = resolve(&index, 43);
    assert_eq!(rec.version_at(0), Version::new(50));
    assert_eq!(rec.version_data(0), Some(data43.as_slice()));
    assert!(rec.is_tombstone(1), "the vehicle's deleted floor remains");

    // A second pass over stale entries is a no-op: the key now resolves.
    let mut stale = InsertMap::new();
    stale.push(
        RecordKey::new(43),
        rill_deltamain::PendingInsert {
            version: Version::new(50),
            data: Some(bytes::Bytes::copy_from_slice(&data43)),
        },
    );
    let addr_before = index.get(RecordKey::new(43));
    let empty = compactor
        .fill_with_inserts(Version::new(10), &mut stale, &mut index)
        .unwrap()
        .unwrap();
    assert!(stale.is_empty());
    assert_eq!(index.get(RecordKey::new(43)), addr_before);
    assert_eq!(RowStorePage::new(&fixture.pages, empty).used_bytes(), 8);
}

#[test]
fn full_sweep_with_insert_log() {
    let fixture = Fixture::new(16);
    let mut index = HashIndex::new();
    let insert_log =
        UnorderedLog::new(Arc::clone(&fixture.pages), fixture.reclaimer.clone()).unwrap();

    // Page a: entirely live, must survive untouched.
    let (id_a, mut page_a) = fixture.row_page();
    for key in 0..2u64 {
        let data = vec![0xAA; 50];
        let versions: Vec<(Version, Option<&[u8]>)> =
            vec![(Version::new(20), Some(data.as_slice()))];
        let addr = page_a.push_record(RecordKey::new(key), &versions).unwrap();
        index.insert(RecordKey::new(key), addr, false);
    }

    // Page b: collapsible version chains.
    let (id_b, mut page_b) = fixture.row_page();
    for key in 10..12u64 {
        let new = vec![0xBB; 50];
        let old = vec![0x0B; 50];
        let versions: Vec<(Version, Option<&[u8]>)> = vec![
            (Version::new(8), Some(new.as_slice())),
            (Version::new(4), Some(old.as_slice())),
        ];
        let addr = page_b.push_record(RecordKey::new(key), &versions).unwrap();
        index.insert(RecordKey::new(key), addr, false);
    }

    // Page c: a deleted row whose key has a pending reinsert.
    let (id_c, mut page_c) = fixture.row_page();
    let versions: Vec<(Version, Option<&[u8]>)> = vec![(Version::new(5), None)];
    let addr = page_c.push_record(RecordKey::new(77), &versions).unwrap();
    index.insert(RecordKey::new(77), addr, false);

    let reinsert = vec![0x77; 80];
    InsertEntry::append(
        &insert_log,
        RecordKey::new(77),
        Version::new(50),
        Some(reinsert.as_slice()),
    )
    .unwrap();
    // And a brand-new row nobody has seen yet.
    let fresh = vec![0xC8; 80];
    InsertEntry::append(
        &insert_log,
        RecordKey::new(200),
        Version::new(50),
        Some(fresh.as_slice()),
    )
    .unwrap();

    let gc = GarbageCollector::new(Arc::clone(&fixture.pages), fixture.reclaimer.clone());
    let survivors = gc
        .run(
            &[id_a, id_b, id_c],
            Version::new(10),
            &insert_log,
            &mut index,
        )
        .unwrap();

    // The clean page survives as-is; b and c collapse into one fill page.
    assert_eq!(survivors.len(), 2);
    assert_eq!(survivors[0], id_a);
    assert_ne!(survivors[1], id_b);
    assert_ne!(survivors[1], id_c);
    assert_eq!(fixture.reclaimer.pending(), 2, "pages b and c retired");

    // Collapsed chains keep only the floor snapshot.
    for key in 10..12u64 {
        let rec = resolve(&index, key);
        assert_eq!(rec.version_count(), 1);
        assert_eq!(rec.version_at(0), Version::new(8));
    }

    // The reinsert was folded onto the deleted row during compaction.
    let rec = resolve(&index, 77);
    assert_eq!(rec.version_count(), 2);
    assert_eq!(rec.version_at(0), Version::new(50));
    assert_eq!(rec.version_data(0), Some(reinsert.as_slice()));
    assert!(rec.is_tombstone(1));

    // The fresh insert was materialized through the vehicle record.
    let rec = resolve(&index, 200);
    assert_eq!(rec.version_at(0), Version::new(50));
    assert_eq!(rec.version_data(0), Some(fresh.as_slice()));

    // Input pages are only released once the grace period expires.
    let allocated = fixture.pages.allocated_pages();
    assert_eq!(fixture.reclaimer.drain(), 2);
    assert_eq!(fixture.pages.allocated_pages(), allocated - 2);
}

#[test]
fn sweep_without_garbage_is_stable() {
    let fixture = Fixture::new(8);
    let mut index = HashIndex::new();
    let insert_log =
        UnorderedLog::new(Arc::clone(&fixture.pages), fixture.reclaimer.clone()).unwrap();

    let (id, mut page) = fixture.row_page();
    let data = vec![0x01; 30];
    let versions: Vec<(Version, Option<&[u8]>)> = vec![(Version::new(9), Some(data.as_slice()))];
    let addr = page.push_record(RecordKey::new(1), &versions).unwrap();
    index.insert(RecordKey::new(1), addr, false);

    let gc = GarbageCollector::new(Arc::clone(&fixture.pages), fixture.reclaimer.clone());
    let survivors = gc
        .run(&[id], Version::new(5), &insert_log, &mut index)
        .unwrap();

    assert_eq!(survivors, vec![id]);
    assert_eq!(index.get(RecordKey::new(1)), Some(addr));
    assert_eq!(fixture.reclaimer.pending(), 0);
}
