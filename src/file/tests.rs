use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};

use proptest::prelude::*;

use super::*;
use crate::page::PageType;

const TEST_PAGE_SIZE: u32 = 512;

#[derive(Debug, Clone)]
enum Operation {
    Allocate { tag: u8 },
    Free { pick: usize },
    Write { pick: usize, bytes: Vec<u8> },
}

fn arb_operation() -> impl Strategy<Value = Operation> {
    prop_oneof![
        3 => (1u8..=4).prop_map(|tag| Operation::Allocate { tag }),
        2 => any::<usize>().prop_map(|pick| Operation::Free { pick }),
        2 => (any::<usize>(), prop::collection::vec(any::<u8>(), 1..64))
            .prop_map(|(pick, bytes)| Operation::Write { pick, bytes }),
    ]
}

/// Expected state of the store after a sequence of operations
#[derive(Default)]
struct Model {
    live: BTreeMap<PageId, Vec<u8>>,
    /// Free pages, most recently freed last
    free_stack: Vec<PageId>,
    page_count: u64,
}

impl Model {
    fn pick_live(&self, pick: usize) -> Option<PageId> {
        if self.live.is_empty() {
            return None;
        }
        self.live.keys().nth(pick % self.live.len()).copied()
    }
}

fn flip_byte(path: &std::path::Path, offset: u64) {
    let mut file = OpenOptions::new().read(true).write(true).open(path).unwrap();
    let mut byte = [0u8; 1];
    file.seek(SeekFrom::Start(offset)).unwrap();
    file.read_exact(&mut byte).unwrap();
    byte[0] ^= 0x5A;
    file.seek(SeekFrom::Start(offset)).unwrap();
    file.write_all(&byte).unwrap();
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_churn_matches_model(ops in prop::collection::vec(arb_operation(), 1..120)) {
        let temp_dir = tempfile::tempdir().unwrap();
        let fm = FileManager::create(temp_dir.path().join("churn.db"), TEST_PAGE_SIZE).unwrap();
        let mut model = Model { page_count: 1, ..Model::default() };

        for op in ops {
            match op {
                Operation::Allocate { tag } => {
                    let expected = model
                        .free_stack
                        .pop()
                        .unwrap_or(PageId::new(model.page_count));
                    let page = fm.allocate_page(PageType::from_u8(tag)).unwrap();
                    prop_assert_eq!(page.page_id(), expected);
                    prop_assert!(!model.live.contains_key(&expected));
                    if expected.as_u64() == model.page_count {
                        model.page_count += 1;
                    }
                    model.live.insert(expected, Vec::new());
                }
                Operation::Free { pick } => {
                    let Some(page_id) = model.pick_live(pick) else { continue };
                    fm.free_page(page_id).unwrap();
                    model.live.remove(&page_id);
                    model.free_stack.push(page_id);
                }
                Operation::Write { pick, bytes } => {
                    let Some(page_id) = model.pick_live(pick) else { continue };
                    let mut page = fm.read_page(page_id).unwrap();
                    page.payload_mut()[..bytes.len()].copy_from_slice(&bytes);
                    fm.write_page(&mut page).unwrap();
                    model.live.insert(page_id, bytes);
                }
            }

            let page_count = fm.page_count().unwrap();
            prop_assert_eq!(page_count, model.page_count);
        }

        // Chain is the model's stack in hand-out order, inside the file
        let chain = fm.free_list().unwrap();
        let expected_chain: Vec<PageId> = model.free_stack.iter().rev().copied().collect();
        prop_assert_eq!(&chain, &expected_chain);
        for page_id in &chain {
            prop_assert!(page_id.as_u64() >= 1 && page_id.as_u64() < model.page_count);
        }

        let mut visited = Vec::new();
        let report = fm
            .for_each_page(|page_id, page, _| visited.push((page_id, page.payload().to_vec())))
            .unwrap();
        prop_assert!(report.is_clean());
        prop_assert_eq!(report.live_pages as usize, model.live.len());
        prop_assert_eq!(report.free_pages as usize, model.free_stack.len());
        prop_assert_eq!(visited.len(), model.live.len());

        for ((page_id, payload), (expected_id, bytes)) in visited.iter().zip(&model.live) {
            prop_assert_eq!(page_id, expected_id);
            prop_assert_eq!(&payload[..bytes.len()], bytes.as_slice());

            let page = fm.read_page(*page_id).unwrap();
            prop_assert_eq!(page.checksum(), FileManager::calculate_checksum(&page));
        }
    }

    #[test]
    fn prop_single_byte_damage_is_detected(
        bytes in prop::collection::vec(any::<u8>(), 1..128),
        offset in 0u64..TEST_PAGE_SIZE as u64,
    ) {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("damage.db");
        let fm = FileManager::create(&path, TEST_PAGE_SIZE).unwrap();

        let mut page = fm.allocate_page(PageType::Data).unwrap();
        page.payload_mut()[..bytes.len()].copy_from_slice(&bytes);
        fm.write_page(&mut page).unwrap();

        flip_byte(&path, page.page_id().as_u64() * TEST_PAGE_SIZE as u64 + offset);

        let result = fm.read_page(page.page_id());
        let detected = matches!(result, Err(FileError::ChecksumMismatch { .. }));
        prop_assert!(detected, "damage at offset {} went unnoticed: {:?}", offset, result);
    }

    #[test]
    fn prop_create_then_open_keeps_header(page_size in MIN_PAGE_SIZE..=MAX_PAGE_SIZE) {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("header.db");
        let created = FileManager::create(&path, page_size).unwrap().header().unwrap();

        let opened = FileManager::open(&path).unwrap().header().unwrap();
        prop_assert_eq!(opened.signature, created.signature);
        prop_assert_eq!(opened.version, created.version);
        prop_assert_eq!(opened.page_size, page_size);
        prop_assert_eq!(opened.page_count, 1);
    }

    #[test]
    fn prop_pool_stays_bounded_and_serves_last_write(capacity in 1usize..8, extra in 1usize..8) {
        let temp_dir = tempfile::tempdir().unwrap();
        let options = StorageOptions { page_size: TEST_PAGE_SIZE, cache_capacity: capacity };
        let pm = PageManager::create(temp_dir.path().join("pool.db"), &options).unwrap();

        let mut written = Vec::new();
        for i in 0..capacity + extra {
            let page = pm.new_page(PageType::Data).unwrap();
            let text = format!("page-{i:03}");
            page.write().payload_mut()[..text.len()].copy_from_slice(text.as_bytes());
            pm.mark_dirty(&page).unwrap();
            written.push((page.read().page_id(), text));
        }
        prop_assert!(pm.cached_page_count() <= capacity);

        for (page_id, text) in &written {
            let page = pm.fetch_page(*page_id).unwrap();
            let guard = page.read();
            let stored = guard.payload()[..text.len()].to_vec();
            drop(guard);
            drop(page);
            prop_assert_eq!(stored.as_slice(), text.as_bytes());
            prop_assert!(pm.cached_page_count() <= capacity);
        }
    }
}
