use search_core::model::SiteStatus;
use search_core::store::IndexStore;
use std::collections::HashMap;
use std::sync::{Arc, Barrier};
use std::thread;

fn counts(pairs: &[(&str, u32)]) -> HashMap<String, u32> {
    pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
}

#[test]
fn repeated_update_is_idempotent() {
    let store = IndexStore::temporary().unwrap();
    let site = store.create_site("http://ex.com", "ex", SiteStatus::Indexing).unwrap();
    let page = store.save_page(site.id, "/", 200, "<p>кот</p>").unwrap();
    let map = counts(&[("кот", 2), ("дом", 1)]);

    store.update_lemma_and_index(site.id, page.id, &map).unwrap();
    store.update_lemma_and_index(site.id, page.id, &map).unwrap();

    assert_eq!(store.index_entries_for_page(page.id).unwrap().len(), 2);
    let kot = store.find_lemma(site.id, "кот").unwrap().unwrap();
    assert_eq!(kot.frequency, 1);
    assert_eq!(store.index_entry(page.id, kot.id).unwrap().unwrap().rank, 2.0);
}

#[test]
fn frequency_counts_distinct_pages() {
    let store = IndexStore::temporary().unwrap();
    let site = store.create_site("http://ex.com", "ex", SiteStatus::Indexing).unwrap();
    let a = store.save_page(site.id, "/", 200, "").unwrap();
    let b = store.save_page(site.id, "/about", 200, "").unwrap();
    store.update_lemma_and_index(site.id, a.id, &counts(&[("кот", 5)])).unwrap();
    store.update_lemma_and_index(site.id, b.id, &counts(&[("кот", 1)])).unwrap();

    let kot = store.find_lemma(site.id, "кот").unwrap().unwrap();
    assert_eq!(kot.frequency, 2);
    assert_eq!(store.pages_with_lemma(kot.id).unwrap().len(), 2);
}

#[test]
fn delete_reverses_update() {
    let store = IndexStore::temporary().unwrap();
    let site = store.create_site("http://ex.com", "ex", SiteStatus::Indexing).unwrap();
    let a = store.save_page(site.id, "/", 200, "").unwrap();
    let b = store.save_page(site.id, "/b", 200, "").unwrap();
    store.update_lemma_and_index(site.id, a.id, &counts(&[("кот", 1), ("дом", 3)])).unwrap();
    store.update_lemma_and_index(site.id, b.id, &counts(&[("кот", 2), ("сад", 1)])).unwrap();

    store.delete_page_data(&b).unwrap();

    assert_eq!(store.find_lemma(site.id, "кот").unwrap().unwrap().frequency, 1);
    assert_eq!(store.find_lemma(site.id, "дом").unwrap().unwrap().frequency, 1);
    assert!(store.find_lemma(site.id, "сад").unwrap().is_none());
    assert!(store.index_entries_for_page(b.id).unwrap().is_empty());
    assert!(store.page(b.id).unwrap().is_none());
    assert!(!store.page_exists(site.id, "/b").unwrap());
    assert_eq!(store.count_lemmas(site.id).unwrap(), 2);

    let kot = store.find_lemma(site.id, "кот").unwrap().unwrap();
    assert_eq!(store.pages_with_lemma(kot.id).unwrap(), vec![a.id]);
}

#[test]
fn site_reset_removes_everything_it_owns() {
    let store = IndexStore::temporary().unwrap();
    let site = store.create_site("http://ex.com", "ex", SiteStatus::Indexed).unwrap();
    let other = store.create_site("http://other.com", "other", SiteStatus::Indexed).unwrap();
    let p = store.save_page(site.id, "/", 200, "").unwrap();
    let q = store.save_page(other.id, "/", 200, "").unwrap();
    store.update_lemma_and_index(site.id, p.id, &counts(&[("кот", 1)])).unwrap();
    store.update_lemma_and_index(other.id, q.id, &counts(&[("кот", 1)])).unwrap();

    store.delete_site_data(&site).unwrap();

    assert!(store.site(site.id).unwrap().is_none());
    assert!(store.site_by_url("http://ex.com").unwrap().is_none());
    assert_eq!(store.count_pages(site.id).unwrap(), 0);
    assert_eq!(store.count_lemmas(site.id).unwrap(), 0);
    assert!(store.index_entries_for_page(p.id).unwrap().is_empty());

    let kept = store.find_lemma(other.id, "кот").unwrap().unwrap();
    assert_eq!(kept.frequency, 1);
    assert_eq!(store.pages_with_lemma(kept.id).unwrap(), vec![q.id]);
}

#[test]
fn status_updates_are_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let id = {
        let store = IndexStore::open(dir.path()).unwrap();
        let site = store.create_site("http://ex.com", "ex", SiteStatus::Indexing).unwrap();
        store.set_site_status(site.id, SiteStatus::Failed, Some("boom".into())).unwrap();
        store.flush().unwrap();
        site.id
    };
    let store = IndexStore::open(dir.path()).unwrap();
    let site = store.site(id).unwrap().unwrap();
    assert_eq!(site.status, SiteStatus::Failed);
    assert_eq!(site.last_error.as_deref(), Some("boom"));
    assert_eq!(store.sites_with_status(SiteStatus::Failed).unwrap().len(), 1);
}

#[test]
fn concurrent_retractions_decrement_once() {
    let shared: Vec<(String, u32)> = (0..50).map(|i| (format!("слово{i}"), 1)).collect();
    let map: HashMap<String, u32> = shared.iter().cloned().collect();

    for _ in 0..20 {
        let store = Arc::new(IndexStore::temporary().unwrap());
        let site = store.create_site("http://ex.com", "ex", SiteStatus::Indexing).unwrap();
        let mut pages = Vec::new();
        for path in ["/a", "/b", "/c"] {
            let page = store.save_page(site.id, path, 200, "").unwrap();
            store.update_lemma_and_index(site.id, page.id, &map).unwrap();
            pages.push(page);
        }

        let barrier = Arc::new(Barrier::new(2));
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let store = store.clone();
                let barrier = barrier.clone();
                let page = pages[1].clone();
                thread::spawn(move || {
                    barrier.wait();
                    store.delete_page_data(&page).unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        for (text, _) in &shared {
            let lemma = store.find_lemma(site.id, text).unwrap().unwrap();
            assert_eq!(lemma.frequency, 2);
            assert_eq!(store.pages_with_lemma(lemma.id).unwrap(), vec![pages[0].id, pages[2].id]);
        }
    }
}
