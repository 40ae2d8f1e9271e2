//! sled-backed storage for sites, pages, lemmas and the inverted index.
//!
//! Four trees, each holding a primary keyspace and the secondary keys that
//! point into it:
//!
//! * `sites`   : `s{site_id}` -> Site, `u{url}` -> site_id
//! * `pages`   : `p{page_id}` -> Page, `k{site_id}{path}` -> page_id
//! * `lemmas`  : `l{lemma_id}` -> Lemma, `t{site_id}{text}` -> lemma_id
//! * `postings`: `f{page_id}{lemma_id}` -> IndexEntry, `r{lemma_id}{page_id}` -> index_id
//!
//! Ids are big-endian so prefix scans come back in id order. Every operation
//! touching more than one row runs in a single sled transaction.

use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::transaction::{ConflictableTransactionError, ConflictableTransactionResult, TransactionError};
use sled::{Db, Transactional, Tree};
use std::collections::HashMap;
use std::path::Path;
use time::OffsetDateTime;

use crate::error::StoreError;
use crate::model::{IndexEntry, Lemma, LemmaId, Page, PageId, Site, SiteId, SiteStatus};

const SITE: u8 = b's';
const SITE_URL: u8 = b'u';
const PAGE: u8 = b'p';
const PAGE_PATH: u8 = b'k';
const LEMMA: u8 = b'l';
const LEMMA_TEXT: u8 = b't';
const FORWARD: u8 = b'f';
const REVERSE: u8 = b'r';

type TxResult<T> = ConflictableTransactionResult<T, StoreError>;

pub struct IndexStore {
    db: Db,
    sites: Tree,
    pages: Tree,
    lemmas: Tree,
    postings: Tree,
}

impl IndexStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        Self::from_db(sled::open(path)?)
    }

    /// In-memory store removed on drop.
    pub fn temporary() -> Result<Self, StoreError> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: Db) -> Result<Self, StoreError> {
        Ok(Self {
            sites: db.open_tree("sites")?,
            pages: db.open_tree("pages")?,
            lemmas: db.open_tree("lemmas")?,
            postings: db.open_tree("postings")?,
            db,
        })
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    // --- sites ---

    pub fn create_site(&self, url: &str, name: &str, status: SiteStatus) -> Result<Site, StoreError> {
        let site = Site {
            id: self.db.generate_id()?,
            url: url.to_string(),
            name: name.to_string(),
            status,
            status_time: OffsetDateTime::now_utc(),
            last_error: None,
        };
        let value = encode(&site)?;
        let url_key = scoped_key(SITE_URL, &[], url.as_bytes());
        self.sites
            .transaction(|sites| -> TxResult<()> {
                if sites.get(&url_key)?.is_some() {
                    return Err(ConflictableTransactionError::Abort(StoreError::DuplicateSite(url.to_string())));
                }
                sites.insert(url_key.clone(), &site.id.to_be_bytes()[..])?;
                sites.insert(id_key(SITE, site.id), value.clone())?;
                Ok(())
            })
            .map_err(from_tx)?;
        Ok(site)
    }

    pub fn site(&self, id: SiteId) -> Result<Option<Site>, StoreError> {
        self.sites.get(id_key(SITE, id))?.map(|v| decode(&v)).transpose()
    }

    pub fn site_by_url(&self, url: &str) -> Result<Option<Site>, StoreError> {
        match self.sites.get(scoped_key(SITE_URL, &[], url.as_bytes()))? {
            Some(id) => self.site(decode_id(&id)?),
            None => Ok(None),
        }
    }

    pub fn sites(&self) -> Result<Vec<Site>, StoreError> {
        let mut out = Vec::new();
        for item in self.sites.scan_prefix([SITE]) {
            let (_, v) = item?;
            out.push(decode(&v)?);
        }
        Ok(out)
    }

    /// The stored site whose URL is the longest prefix of `url`.
    pub fn site_for_url(&self, url: &str) -> Result<Option<Site>, StoreError> {
        Ok(self.sites()?.into_iter().filter(|s| s.owns(url)).max_by_key(|s| s.url.len()))
    }

    pub fn sites_with_status(&self, status: SiteStatus) -> Result<Vec<Site>, StoreError> {
        Ok(self.sites()?.into_iter().filter(|s| s.status == status).collect())
    }

    pub fn set_site_status(
        &self,
        id: SiteId,
        status: SiteStatus,
        last_error: Option<String>,
    ) -> Result<Site, StoreError> {
        let mut site = self.site(id)?.ok_or(StoreError::SiteNotFound(id))?;
        site.status = status;
        site.status_time = OffsetDateTime::now_utc();
        site.last_error = last_error;
        self.sites.insert(id_key(SITE, id), encode(&site)?)?;
        Ok(site)
    }

    // --- pages ---

    pub fn save_page(&self, site_id: SiteId, path: &str, code: u16, content: &str) -> Result<Page, StoreError> {
        let page = Page {
            id: self.db.generate_id()?,
            site_id,
            path: path.to_string(),
            code,
            content: content.to_string(),
        };
        let value = encode(&page)?;
        let path_key = scoped_key(PAGE_PATH, &site_id.to_be_bytes(), path.as_bytes());
        self.pages
            .transaction(|pages| -> TxResult<()> {
                if pages.get(&path_key)?.is_some() {
                    return Err(ConflictableTransactionError::Abort(StoreError::DuplicatePage {
                        site_id,
                        path: path.to_string(),
                    }));
                }
                pages.insert(path_key.clone(), &page.id.to_be_bytes()[..])?;
                pages.insert(id_key(PAGE, page.id), value.clone())?;
                Ok(())
            })
            .map_err(from_tx)?;
        Ok(page)
    }

    pub fn page(&self, id: PageId) -> Result<Option<Page>, StoreError> {
        self.pages.get(id_key(PAGE, id))?.map(|v| decode(&v)).transpose()
    }

    pub fn find_page(&self, site_id: SiteId, path: &str) -> Result<Option<Page>, StoreError> {
        match self.pages.get(scoped_key(PAGE_PATH, &site_id.to_be_bytes(), path.as_bytes()))? {
            Some(id) => self.page(decode_id(&id)?),
            None => Ok(None),
        }
    }

    pub fn page_exists(&self, site_id: SiteId, path: &str) -> Result<bool, StoreError> {
        Ok(self.pages.contains_key(scoped_key(PAGE_PATH, &site_id.to_be_bytes(), path.as_bytes()))?)
    }

    pub fn count_pages(&self, site_id: SiteId) -> Result<usize, StoreError> {
        count_prefix(&self.pages, scoped_key(PAGE_PATH, &site_id.to_be_bytes(), &[]))
    }

    // --- lemmas and postings ---

    pub fn lemma(&self, id: LemmaId) -> Result<Option<Lemma>, StoreError> {
        self.lemmas.get(id_key(LEMMA, id))?.map(|v| decode(&v)).transpose()
    }

    pub fn find_lemma(&self, site_id: SiteId, text: &str) -> Result<Option<Lemma>, StoreError> {
        match self.lemmas.get(scoped_key(LEMMA_TEXT, &site_id.to_be_bytes(), text.as_bytes()))? {
            Some(id) => self.lemma(decode_id(&id)?),
            None => Ok(None),
        }
    }

    pub fn count_lemmas(&self, site_id: SiteId) -> Result<usize, StoreError> {
        count_prefix(&self.lemmas, scoped_key(LEMMA_TEXT, &site_id.to_be_bytes(), &[]))
    }

    /// Pages holding an index row for the lemma, in page id order.
    pub fn pages_with_lemma(&self, lemma_id: LemmaId) -> Result<Vec<PageId>, StoreError> {
        let prefix = id_key(REVERSE, lemma_id);
        let mut out = Vec::new();
        for item in self.postings.scan_prefix(&prefix) {
            let (k, _) = item?;
            out.push(decode_id(&k[prefix.len()..])?);
        }
        Ok(out)
    }

    pub fn index_entry(&self, page_id: PageId, lemma_id: LemmaId) -> Result<Option<IndexEntry>, StoreError> {
        self.postings.get(pair_key(FORWARD, page_id, lemma_id))?.map(|v| decode(&v)).transpose()
    }

    pub fn index_entries_for_page(&self, page_id: PageId) -> Result<Vec<IndexEntry>, StoreError> {
        let mut out = Vec::new();
        for item in self.postings.scan_prefix(id_key(FORWARD, page_id)) {
            let (_, v) = item?;
            out.push(decode(&v)?);
        }
        Ok(out)
    }

    /// Adds one page's lemma counts to the site's lemmas and index rows.
    ///
    /// A lemma's frequency only moves when this page has no index row for it
    /// yet, so calling this again for the same page changes nothing.
    pub fn update_lemma_and_index(
        &self,
        site_id: SiteId,
        page_id: PageId,
        counts: &HashMap<String, u32>,
    ) -> Result<(), StoreError> {
        (&self.lemmas, &self.postings)
            .transaction(|(lemmas, postings)| -> TxResult<()> {
                for (text, count) in counts {
                    let text_key = scoped_key(LEMMA_TEXT, &site_id.to_be_bytes(), text.as_bytes());
                    let lemma_id = match lemmas.get(&text_key)? {
                        Some(id) => {
                            let id = tx_id(&id)?;
                            if postings.get(pair_key(FORWARD, page_id, id))?.is_some() {
                                continue;
                            }
                            let key = id_key(LEMMA, id);
                            let bytes = lemmas
                                .get(&key)?
                                .ok_or_else(|| abort_corrupt(format!("lemma {id} missing for {text}")))?;
                            let mut lemma: Lemma = tx_decode(&bytes)?;
                            lemma.frequency += 1;
                            lemmas.insert(key, tx_encode(&lemma)?)?;
                            id
                        }
                        None => {
                            let id = lemmas.generate_id()?;
                            let lemma = Lemma { id, site_id, text: text.clone(), frequency: 1 };
                            lemmas.insert(id_key(LEMMA, id), tx_encode(&lemma)?)?;
                            lemmas.insert(text_key, &id.to_be_bytes()[..])?;
                            id
                        }
                    };
                    let forward = pair_key(FORWARD, page_id, lemma_id);
                    if postings.get(&forward)?.is_none() {
                        let entry_id = postings.generate_id()?;
                        let entry = IndexEntry { id: entry_id, page_id, lemma_id, rank: *count as f32 };
                        postings.insert(forward, tx_encode(&entry)?)?;
                        postings.insert(pair_key(REVERSE, lemma_id, page_id), &entry_id.to_be_bytes()[..])?;
                    }
                }
                Ok(())
            })
            .map_err(from_tx)
    }

    /// Retracts a page: every lemma it contributed to loses one unit of
    /// frequency (and disappears at zero), then its index rows and the page
    /// itself are removed.
    pub fn delete_page_data(&self, page: &Page) -> Result<(), StoreError> {
        let entries = self.index_entries_for_page(page.id)?;
        (&self.pages, &self.lemmas, &self.postings)
            .transaction(|(pages, lemmas, postings)| -> TxResult<()> {
                for entry in &entries {
                    let forward = pair_key(FORWARD, page.id, entry.lemma_id);
                    // already retracted by a concurrent call
                    if postings.get(&forward)?.is_none() {
                        continue;
                    }
                    let key = id_key(LEMMA, entry.lemma_id);
                    if let Some(bytes) = lemmas.get(&key)? {
                        let mut lemma: Lemma = tx_decode(&bytes)?;
                        if lemma.frequency <= 1 {
                            // frequency hit zero: this page held the lemma's last posting
                            lemmas.remove(key)?;
                            lemmas.remove(scoped_key(LEMMA_TEXT, &lemma.site_id.to_be_bytes(), lemma.text.as_bytes()))?;
                        } else {
                            lemma.frequency -= 1;
                            lemmas.insert(key, tx_encode(&lemma)?)?;
                        }
                    }
                    postings.remove(forward)?;
                    postings.remove(pair_key(REVERSE, entry.lemma_id, page.id))?;
                }
                pages.remove(id_key(PAGE, page.id))?;
                pages.remove(scoped_key(PAGE_PATH, &page.site_id.to_be_bytes(), page.path.as_bytes()))?;
                Ok(())
            })
            .map_err(from_tx)
    }

    /// Removes the site row together with all its pages, lemmas and index rows.
    pub fn delete_site_data(&self, site: &Site) -> Result<(), StoreError> {
        let scope = site.id.to_be_bytes();

        let mut page_keys = Vec::new();
        let mut posting_keys = Vec::new();
        for item in self.pages.scan_prefix(scoped_key(PAGE_PATH, &scope, &[])) {
            let (path_key, id) = item?;
            let page_id = decode_id(&id)?;
            for entry in self.index_entries_for_page(page_id)? {
                posting_keys.push(pair_key(FORWARD, page_id, entry.lemma_id));
                posting_keys.push(pair_key(REVERSE, entry.lemma_id, page_id));
            }
            page_keys.push(path_key.to_vec());
            page_keys.push(id_key(PAGE, page_id));
        }

        let mut lemma_keys = Vec::new();
        for item in self.lemmas.scan_prefix(scoped_key(LEMMA_TEXT, &scope, &[])) {
            let (text_key, id) = item?;
            lemma_keys.push(text_key.to_vec());
            lemma_keys.push(id_key(LEMMA, decode_id(&id)?));
        }

        let site_keys = [id_key(SITE, site.id), scoped_key(SITE_URL, &[], site.url.as_bytes())];

        (&self.sites, &self.pages, &self.lemmas, &self.postings)
            .transaction(|(sites, pages, lemmas, postings)| -> TxResult<()> {
                for k in &posting_keys {
                    postings.remove(k.as_slice())?;
                }
                for k in &lemma_keys {
                    lemmas.remove(k.as_slice())?;
                }
                for k in &page_keys {
                    pages.remove(k.as_slice())?;
                }
                for k in &site_keys {
                    sites.remove(k.as_slice())?;
                }
                Ok(())
            })
            .map_err(from_tx)
    }
}

fn id_key(tag: u8, id: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(9);
    key.push(tag);
    key.extend_from_slice(&id.to_be_bytes());
    key
}

fn pair_key(tag: u8, a: u64, b: u64) -> Vec<u8> {
    let mut key = id_key(tag, a);
    key.extend_from_slice(&b.to_be_bytes());
    key
}

fn scoped_key(tag: u8, scope: &[u8], suffix: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + scope.len() + suffix.len());
    key.push(tag);
    key.extend_from_slice(scope);
    key.extend_from_slice(suffix);
    key
}

fn count_prefix(tree: &Tree, prefix: Vec<u8>) -> Result<usize, StoreError> {
    let mut n = 0;
    for item in tree.scan_prefix(prefix) {
        item?;
        n += 1;
    }
    Ok(n)
}

fn decode_id(bytes: &[u8]) -> Result<u64, StoreError> {
    let arr: [u8; 8] = bytes
        .try_into()
        .map_err(|_| StoreError::Corrupt(format!("id of {} bytes", bytes.len())))?;
    Ok(u64::from_be_bytes(arr))
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    Ok(bincode::serialize(value)?)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
    Ok(bincode::deserialize(bytes)?)
}

fn tx_id(bytes: &[u8]) -> TxResult<u64> {
    decode_id(bytes).map_err(ConflictableTransactionError::Abort)
}

fn tx_encode<T: Serialize>(value: &T) -> TxResult<Vec<u8>> {
    encode(value).map_err(ConflictableTransactionError::Abort)
}

fn tx_decode<T: DeserializeOwned>(bytes: &[u8]) -> TxResult<T> {
    decode(bytes).map_err(ConflictableTransactionError::Abort)
}

fn abort_corrupt(msg: String) -> ConflictableTransactionError<StoreError> {
    ConflictableTransactionError::Abort(StoreError::Corrupt(msg))
}

fn from_tx(err: TransactionError<StoreError>) -> StoreError {
    match err {
        TransactionError::Abort(e) => e,
        TransactionError::Storage(e) => StoreError::Sled(e),
    }
}
