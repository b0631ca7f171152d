//! # Cart Store
//!
//! Client-resident shopping cart for mystery-cart.
//!
//! The cart is a set of `(item id, quantity)` entries. Every mutation is
//! written to durable storage before it is committed to the in-memory mirror,
//! so the two never disagree. Durable storage is the source of truth: an empty
//! mirror is always reloaded from storage before use.

use crate::error::{CheckoutError, CheckoutResult};
use crate::product::ItemId;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, warn};

/// One cart line: a mystery box and how many of it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartEntry {
    /// Catalog id of the mystery box
    #[serde(rename = "mysterybox_id")]
    pub item_id: ItemId,

    /// Always at least 1
    pub quantity: u32,
}

impl CartEntry {
    pub fn new(item_id: ItemId, quantity: u32) -> Self {
        Self { item_id, quantity }
    }
}

/// Durable key-value persistence for the cart entry sequence.
pub trait CartStorage: Send + Sync {
    /// Read the persisted entries (empty when nothing was ever saved)
    fn load(&self) -> CheckoutResult<Vec<CartEntry>>;

    /// Replace the persisted entries
    fn save(&self, entries: &[CartEntry]) -> CheckoutResult<()>;
}

/// Cart persisted as a JSON array in a single file.
///
/// Writes go to a sibling temp file that is then renamed over the target, so
/// a crash mid-write never leaves a truncated cart behind.
#[derive(Debug, Clone)]
pub struct JsonFileStorage {
    path: PathBuf,
}

impl JsonFileStorage {
    /// Default file name, relative to the working directory
    pub const DEFAULT_PATH: &'static str = "cart.json";

    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl Default for JsonFileStorage {
    fn default() -> Self {
        Self::new(Self::DEFAULT_PATH)
    }
}

impl CartStorage for JsonFileStorage {
    fn load(&self) -> CheckoutResult<Vec<CartEntry>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(CheckoutError::Storage(format!(
                    "Failed to read {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };

        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }

        match serde_json::from_str::<Vec<CartEntry>>(&raw) {
            Ok(entries) => Ok(entries),
            Err(e) => {
                warn!(
                    "Discarding unreadable cart file {}: {}",
                    self.path.display(),
                    e
                );
                Ok(Vec::new())
            }
        }
    }

    fn save(&self, entries: &[CartEntry]) -> CheckoutResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                CheckoutError::Storage(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }

        let json = serde_json::to_string(entries)
            .map_err(|e| CheckoutError::Storage(format!("Failed to encode cart: {}", e)))?;

        let tmp = self.temp_path();
        fs::write(&tmp, json).map_err(|e| {
            CheckoutError::Storage(format!("Failed to write {}: {}", tmp.display(), e))
        })?;
        fs::rename(&tmp, &self.path).map_err(|e| {
            CheckoutError::Storage(format!("Failed to replace {}: {}", self.path.display(), e))
        })
    }
}

/// In-process storage, for tests and ephemeral sessions
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<Vec<CartEntry>>,
    fail_writes: AtomicBool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate the durable copy
    pub fn with_entries(entries: Vec<CartEntry>) -> Self {
        Self {
            entries: Mutex::new(entries),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Make subsequent writes fail (simulates a full or read-only disk)
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// What is currently persisted
    pub fn persisted(&self) -> Vec<CartEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl CartStorage for MemoryStorage {
    fn load(&self) -> CheckoutResult<Vec<CartEntry>> {
        Ok(self.persisted())
    }

    fn save(&self, entries: &[CartEntry]) -> CheckoutResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(CheckoutError::Storage("write refused".to_string()));
        }
        *self.entries.lock().unwrap_or_else(PoisonError::into_inner) = entries.to_vec();
        Ok(())
    }
}

/// Drop zero quantities and merge duplicate ids from a loaded sequence
fn normalize(entries: Vec<CartEntry>) -> Vec<CartEntry> {
    let mut merged: Vec<CartEntry> = Vec::with_capacity(entries.len());
    for entry in entries.into_iter().filter(|e| e.quantity > 0) {
        match merged.iter_mut().find(|e| e.item_id == entry.item_id) {
            Some(existing) => {
                existing.quantity = existing.quantity.saturating_add(entry.quantity)
            }
            None => merged.push(entry),
        }
    }
    merged
}

/// The single writer of cart state.
///
/// Holds at most one entry per item id, every quantity ≥ 1.
pub struct CartStore {
    storage: Arc<dyn CartStorage>,
    entries: Vec<CartEntry>,
}

impl CartStore {
    /// Open the cart, reading the durable copy
    pub fn open(storage: Arc<dyn CartStorage>) -> CheckoutResult<Self> {
        let entries = normalize(storage.load()?);
        debug!("Opened cart with {} entries", entries.len());
        Ok(Self { storage, entries })
    }

    /// Entries as currently persisted, rehydrating the mirror if empty
    fn current(&mut self) -> CheckoutResult<Vec<CartEntry>> {
        if self.entries.is_empty() {
            self.entries = normalize(self.storage.load()?);
        }
        Ok(self.entries.clone())
    }

    /// Persist first, then update the mirror
    fn commit(&mut self, next: Vec<CartEntry>) -> CheckoutResult<()> {
        if let Err(e) = self.storage.save(&next) {
            error!("Cart not updated, persisting failed: {}", e);
            return Err(e);
        }
        self.entries = next;
        Ok(())
    }

    /// Add one unit of `item_id`, merging into an existing entry.
    ///
    /// An absent or malformed id is logged and ignored.
    pub fn add(&mut self, item_id: &str) -> CheckoutResult<()> {
        let Some(id) = ItemId::parse(item_id) else {
            warn!("Ignoring add to cart with invalid item id {:?}", item_id);
            return Ok(());
        };

        let mut next = self.current()?;
        match next.iter_mut().find(|e| e.item_id == id) {
            Some(entry) => match entry.quantity.checked_add(1) {
                Some(quantity) => entry.quantity = quantity,
                None => {
                    warn!("Quantity limit reached for item {}", id);
                    return Ok(());
                }
            },
            None => next.push(CartEntry::new(id.clone(), 1)),
        }

        debug!("Added item {} to cart", id);
        self.commit(next)
    }

    /// Remove one unit of `item_id`; the entry disappears when it reaches 0
    pub fn decrease(&mut self, item_id: &str) -> CheckoutResult<()> {
        let Some(id) = ItemId::parse(item_id) else {
            return Ok(());
        };

        let mut next = self.current()?;
        let Some(pos) = next.iter().position(|e| e.item_id == id) else {
            return Ok(());
        };

        if next[pos].quantity > 1 {
            next[pos].quantity -= 1;
        } else {
            next.remove(pos);
        }

        debug!("Decreased item {} in cart", id);
        self.commit(next)
    }

    /// Drop the whole entry for `item_id`
    pub fn remove(&mut self, item_id: &str) -> CheckoutResult<()> {
        let Some(id) = ItemId::parse(item_id) else {
            return Ok(());
        };

        let mut next = self.current()?;
        let before = next.len();
        next.retain(|e| e.item_id != id);
        if next.len() == before {
            return Ok(());
        }

        debug!("Removed item {} from cart", id);
        self.commit(next)
    }

    /// Empty the cart. Only called once a sale is confirmed.
    pub fn clear(&mut self) -> CheckoutResult<()> {
        self.commit(Vec::new())
    }

    /// Current entries, in insertion order
    pub fn snapshot(&mut self) -> CheckoutResult<Vec<CartEntry>> {
        self.current()
    }

    /// Quantity held for `item_id` (0 when absent)
    pub fn quantity_of(&mut self, item_id: &str) -> CheckoutResult<u32> {
        let Some(id) = ItemId::parse(item_id) else {
            return Ok(0);
        };
        Ok(self
            .current()?
            .iter()
            .find(|e| e.item_id == id)
            .map(|e| e.quantity)
            .unwrap_or(0))
    }

    /// Total units across all entries
    pub fn item_count(&mut self) -> CheckoutResult<u32> {
        Ok(self.current()?.iter().map(|e| e.quantity).sum())
    }
}

/// Cloneable handle to the one cart store, shared by the cart view and any
/// open checkout. Each call holds the lock only for that operation.
#[derive(Clone)]
pub struct SharedCart {
    inner: Arc<Mutex<CartStore>>,
}

impl SharedCart {
    pub fn new(store: CartStore) -> Self {
        Self {
            inner: Arc::new(Mutex::new(store)),
        }
    }

    /// Open a store over `storage` and share it
    pub fn open(storage: Arc<dyn CartStorage>) -> CheckoutResult<Self> {
        Ok(Self::new(CartStore::open(storage)?))
    }

    fn lock(&self) -> MutexGuard<'_, CartStore> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add(&self, item_id: &str) -> CheckoutResult<()> {
        self.lock().add(item_id)
    }

    pub fn decrease(&self, item_id: &str) -> CheckoutResult<()> {
        self.lock().decrease(item_id)
    }

    pub fn remove(&self, item_id: &str) -> CheckoutResult<()> {
        self.lock().remove(item_id)
    }

    pub fn clear(&self) -> CheckoutResult<()> {
        self.lock().clear()
    }

    pub fn snapshot(&self) -> CheckoutResult<Vec<CartEntry>> {
        self.lock().snapshot()
    }

    pub fn quantity_of(&self, item_id: &str) -> CheckoutResult<u32> {
        self.lock().quantity_of(item_id)
    }

    pub fn item_count(&self) -> CheckoutResult<u32> {
        self.lock().item_count()
    }
}
