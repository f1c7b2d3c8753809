//! Demand-loaded, write-back cache of LPN->PPN entries (the DFTL "CMT").
//!
//! Every operation on the rows of one m_vpn holds that m_vpn's interface lock.
//! Loading, writing back or relocating a translation page additionally holds the
//! translation-page lock in [`Device::trans_page_locks`], which the cleaner shares.
//! A semaphore bounds how many load and insert sequences may evict at once.

use std::collections::BTreeSet;
use std::fmt;
use std::ops::Range;

use log::*;
use lru::LruCache;
use parking_lot::Mutex;
use tokio::sync::{Semaphore, SemaphorePermit};

use crate::config::*;
use crate::device::{Device, LockPool};
use crate::directory::{L2PValue, MappingOnFlash};
use crate::error::{ensure_invariant, FtlError, Result};
use crate::flash::{Flash, FlashTag, PageData};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RowState {
    Free,
    FreeLocked,
    Used,
    /// Cached entry of an m_vpn that is being loaded.
    UsedLocked,
    /// Picked for eviction; no other eviction may take it.
    UsedHeld,
}

impl RowState {
    pub fn can_become(self, next: RowState) -> bool {
        use RowState::*;
        matches!(
            (self, next),
            (Free, FreeLocked)
                | (FreeLocked, Free)
                | (FreeLocked, Used)
                | (Used, FreeLocked)
                | (Used, UsedLocked)
                | (UsedLocked, Used)
                | (Used, UsedHeld)
                | (UsedHeld, Used)
        )
    }

    /// Row data may only change in these states.
    pub fn allows_modification(self) -> bool {
        matches!(self, RowState::FreeLocked | RowState::Used | RowState::UsedHeld)
    }
}

type RowId = usize;

#[derive(Debug, Clone)]
struct Row {
    lpn: Option<Lpn>,
    value: L2PValue,
    dirty: bool,
    state: RowState,
}

impl Row {
    fn empty() -> Self {
        Row {
            lpn: None,
            value: L2PValue::Uninitiated,
            dirty: false,
            state: RowState::Free,
        }
    }

    fn set_state(&mut self, next: RowState) -> Result<()> {
        if cfg!(debug_assertions) {
            ensure_invariant!(
                self.state.can_become(next),
                "row of lpn {:?} cannot go from {:?} to {:?}",
                self.lpn,
                self.state,
                next
            );
        }
        self.state = next;
        Ok(())
    }

    fn check_modifiable(&self) -> Result<()> {
        if cfg!(debug_assertions) {
            ensure_invariant!(
                self.state.allows_modification(),
                "row of lpn {:?} modified in state {:?}",
                self.lpn,
                self.state
            );
        }
        Ok(())
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RowStats {
    pub free: Counter,
    pub free_locked: Counter,
    pub used: Counter,
    pub used_locked: Counter,
    pub used_held: Counter,
}

impl RowStats {
    /// Rows holding an entry.
    pub fn occupied(&self) -> Counter {
        self.used + self.used_locked + self.used_held
    }
}

impl fmt::Display for RowStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "free: {}, free_locked: {}, used: {}, used_locked: {}, used_held: {}",
            self.free, self.free_locked, self.used, self.used_locked, self.used_held
        )
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CacheCounters {
    pub hits: Counter,
    pub misses: Counter,
    pub loads: Counter,
    pub evictions: Counter,
    pub write_backs: Counter,
    pub overwrites: Counter,
    pub inserts: Counter,
}

/// Fixed set of rows plus the recency order of the LPNs they hold.
struct LpnTable {
    rows: Vec<Row>,
    free_rows: Vec<RowId>,
    lru: LruCache<Lpn, RowId>,
}

impl LpnTable {
    fn new(n_rows: Counter) -> Self {
        LpnTable {
            rows: vec![Row::empty(); n_rows],
            // popped from the back, so row 0 goes first
            free_rows: (0..n_rows).rev().collect(),
            lru: LruCache::unbounded(),
        }
    }

    fn contains(&self, lpn: Lpn) -> bool {
        self.lru.contains(&lpn)
    }

    fn lookup(&mut self, lpn: Lpn) -> Option<L2PValue> {
        let id = *self.lru.get(&lpn)?;
        Some(self.rows[id].value)
    }

    fn peek(&self, lpn: Lpn) -> Option<&Row> {
        self.lru.peek(&lpn).map(|&id| &self.rows[id])
    }

    fn lock_free_rows(&mut self, n: Counter) -> Result<Vec<RowId>> {
        let mut ids = Vec::with_capacity(n);
        while ids.len() < n {
            let Some(id) = self.free_rows.pop() else {
                break;
            };
            self.rows[id].set_state(RowState::FreeLocked)?;
            ids.push(id);
        }
        Ok(ids)
    }

    fn unlock_free_rows(&mut self, ids: impl IntoIterator<Item = RowId>) -> Result<()> {
        for id in ids {
            self.rows[id].set_state(RowState::Free)?;
            self.free_rows.push(id);
        }
        Ok(())
    }

    fn add(
        &mut self,
        id: RowId,
        lpn: Lpn,
        value: L2PValue,
        dirty: bool,
        as_least_recent: bool,
    ) -> Result<()> {
        ensure_invariant!(!self.contains(lpn), "lpn {} is already cached", lpn);
        let row = &mut self.rows[id];
        row.check_modifiable()?;
        row.lpn = Some(lpn);
        row.value = value;
        row.dirty = dirty;
        row.set_state(RowState::Used)?;

        self.lru.push(lpn, id);
        if as_least_recent {
            self.lru.demote(&lpn);
        }
        Ok(())
    }

    fn overwrite(&mut self, lpn: Lpn, value: L2PValue) -> Result<()> {
        let id = *self
            .lru
            .get(&lpn)
            .ok_or_else(|| FtlError::InvariantViolation(format!("overwriting uncached lpn {}", lpn)))?;
        let row = &mut self.rows[id];
        row.check_modifiable()?;
        row.value = value;
        row.dirty = true;
        Ok(())
    }

    /// Removes a USED row and hands it back locked.
    fn delete(&mut self, lpn: Lpn) -> Result<RowId> {
        let id = self
            .lru
            .pop(&lpn)
            .ok_or_else(|| FtlError::InvariantViolation(format!("deleting uncached lpn {}", lpn)))?;
        let row = &mut self.rows[id];
        row.set_state(RowState::FreeLocked)?;
        row.lpn = None;
        row.value = L2PValue::Uninitiated;
        row.dirty = false;
        Ok(id)
    }

    fn set_row_state(&mut self, id: RowId, state: RowState) -> Result<()> {
        self.rows[id].set_state(state)
    }

    fn rows_of(&self, lpns: Range<Lpn>) -> Vec<RowId> {
        lpns.filter_map(|lpn| self.lru.peek(&lpn).copied()).collect()
    }

    fn has_dirty(&self, lpns: Range<Lpn>) -> bool {
        lpns.filter_map(|lpn| self.peek(lpn)).any(|row| row.dirty)
    }

    /// Marks every cached entry of the range clean and returns them.
    fn take_for_write_back(&mut self, lpns: Range<Lpn>) -> Result<Vec<(Lpn, L2PValue)>> {
        let mut entries = Vec::new();
        for lpn in lpns {
            if let Some(&id) = self.lru.peek(&lpn) {
                let row = &mut self.rows[id];
                row.check_modifiable()?;
                row.dirty = false;
                entries.push((lpn, row.value));
            }
        }
        Ok(entries)
    }

    /// Least recently used USED row whose m_vpn is not avoided.
    fn victim(&self, avoid: &BTreeSet<MVpn>, entries_per_page: BaseType) -> Option<(RowId, Lpn)> {
        self.lru
            .iter()
            .rev()
            .find(|&(&lpn, &id)| {
                self.rows[id].state == RowState::Used && !avoid.contains(&(lpn / entries_per_page))
            })
            .map(|(&lpn, &id)| (id, lpn))
    }

    /// Least to most recently used.
    fn lpns_by_recency(&self) -> Vec<Lpn> {
        self.lru.iter().rev().map(|(&lpn, _)| lpn).collect()
    }

    fn drop_all(&mut self) -> Result<()> {
        for lpn in self.lpns_by_recency() {
            let id = self.delete(lpn)?;
            self.unlock_free_rows([id])?;
        }
        Ok(())
    }

    fn stats(&self) -> RowStats {
        let mut stats = RowStats::default();
        for row in &self.rows {
            match row.state {
                RowState::Free => stats.free += 1,
                RowState::FreeLocked => stats.free_locked += 1,
                RowState::Used => stats.used += 1,
                RowState::UsedLocked => stats.used_locked += 1,
                RowState::UsedHeld => stats.used_held += 1,
            }
        }
        stats
    }
}

pub struct MappingCache {
    conf: Config,
    table: Mutex<LpnTable>,
    mapping_on_flash: Mutex<MappingOnFlash>,
    interface_locks: LockPool,
    quota: Semaphore,
    counters: Mutex<CacheCounters>,
}

fn quota_closed<E>(_: E) -> FtlError {
    FtlError::InvariantViolation("translation quota closed".into())
}

impl MappingCache {
    pub fn new(conf: &Config) -> Self {
        debug!(
            "mapping cache: {} entries ({} translation pages), quota {}",
            conf.cache_entries,
            conf.cache_translation_pages(),
            conf.translation_quota()
        );
        MappingCache {
            conf: conf.clone(),
            table: Mutex::new(LpnTable::new(conf.cache_entries)),
            mapping_on_flash: Mutex::new(MappingOnFlash::new(conf)),
            interface_locks: LockPool::new(conf.total_translation_pages()),
            quota: Semaphore::new(conf.translation_quota()),
            counters: Mutex::new(CacheCounters::default()),
        }
    }

    /// Current mapping of `lpn`, loading its translation page on a miss.
    pub async fn translate<F: Flash>(&self, dev: &Device<F>, lpn: Lpn) -> Result<L2PValue> {
        let _iface = self.interface_locks.lock(self.conf.lpn_to_m_vpn(lpn)).await;
        self.translate_locked(dev, lpn).await
    }

    pub async fn translate_batch<F: Flash>(
        &self,
        dev: &Device<F>,
        lpns: impl IntoIterator<Item = Lpn>,
    ) -> Result<Vec<L2PValue>> {
        let mut values = Vec::new();
        for lpn in lpns {
            values.push(self.translate(dev, lpn).await?);
        }
        Ok(values)
    }

    pub async fn update<F: Flash>(&self, dev: &Device<F>, lpn: Lpn, value: L2PValue) -> Result<()> {
        let _iface = self.interface_locks.lock(self.conf.lpn_to_m_vpn(lpn)).await;
        self.update_locked(dev, lpn, value).await
    }

    /// Installs `value` and returns what it replaced, as one step for this m_vpn.
    pub async fn swap<F: Flash>(
        &self,
        dev: &Device<F>,
        lpn: Lpn,
        value: L2PValue,
    ) -> Result<L2PValue> {
        let _iface = self.interface_locks.lock(self.conf.lpn_to_m_vpn(lpn)).await;
        let old = self.translate_locked(dev, lpn).await?;
        self.update_locked(dev, lpn, value).await?;
        Ok(old)
    }

    /// Unmaps `lpn`, returning the page it used to map to. Unwritten LPNs stay
    /// untouched.
    pub async fn discard<F: Flash>(&self, dev: &Device<F>, lpn: Lpn) -> Result<Option<PageId>> {
        let _iface = self.interface_locks.lock(self.conf.lpn_to_m_vpn(lpn)).await;
        let old = self.translate_locked(dev, lpn).await?;
        if old.is_mapped() {
            self.update_locked(dev, lpn, L2PValue::Uninitiated).await?;
        }
        Ok(old.ppn())
    }

    /// Points `lpn` at `new_ppn` only if it still maps to `expected`. The cleaner
    /// uses this so that a copy never overrides a newer host write or discard.
    pub async fn relocate<F: Flash>(
        &self,
        dev: &Device<F>,
        lpn: Lpn,
        expected: PageId,
        new_ppn: PageId,
    ) -> Result<bool> {
        let _iface = self.interface_locks.lock(self.conf.lpn_to_m_vpn(lpn)).await;
        let current = self.translate_locked(dev, lpn).await?;
        if current != L2PValue::Mapped(expected) {
            trace!(
                "lpn {} moved from {} to {:?} during relocation",
                lpn,
                expected,
                current
            );
            return Ok(false);
        }
        self.update_locked(dev, lpn, L2PValue::Mapped(new_ppn)).await?;
        Ok(true)
    }

    /// Writes back every dirty translation page, least recently used first.
    pub async fn flush<F: Flash>(&self, dev: &Device<F>) -> Result<()> {
        let mut m_vpns = Vec::new();
        {
            let table = self.table.lock();
            let mut seen = BTreeSet::new();
            for lpn in table.lpns_by_recency() {
                let dirty = table.peek(lpn).is_some_and(|row| row.dirty);
                let m_vpn = self.conf.lpn_to_m_vpn(lpn);
                if dirty && seen.insert(m_vpn) {
                    m_vpns.push(m_vpn);
                }
            }
        }

        debug!("flushing {} dirty translation pages", m_vpns.len());
        for m_vpn in m_vpns {
            let _tp = dev.trans_page_locks.lock(m_vpn).await;
            let dirty = self.table.lock().has_dirty(self.conf.m_vpn_to_lpns(m_vpn));
            if dirty {
                self.write_back(dev, m_vpn).await?;
            }
        }
        Ok(())
    }

    /// Forgets every cached entry. Dirty entries are lost unless flushed first.
    pub fn drop_all(&self) -> Result<()> {
        self.table.lock().drop_all()
    }

    pub fn contains(&self, lpn: Lpn) -> bool {
        self.table.lock().contains(lpn)
    }

    pub fn is_dirty(&self, lpn: Lpn) -> Option<bool> {
        self.table.lock().peek(lpn).map(|row| row.dirty)
    }

    pub fn row_stats(&self) -> RowStats {
        self.table.lock().stats()
    }

    pub fn counters(&self) -> CacheCounters {
        self.counters.lock().clone()
    }

    /// Ground truth as last written back, bypassing the cache.
    pub fn on_flash(&self, lpn: Lpn) -> L2PValue {
        self.mapping_on_flash.lock().get(lpn)
    }

    async fn translate_locked<F: Flash>(&self, dev: &Device<F>, lpn: Lpn) -> Result<L2PValue> {
        let hit = self.table.lock().lookup(lpn);
        if let Some(value) = hit {
            self.counters.lock().hits += 1;
            return Ok(value);
        }
        self.counters.lock().misses += 1;
        self.load_missing(dev, lpn).await
    }

    async fn update_locked<F: Flash>(&self, dev: &Device<F>, lpn: Lpn, value: L2PValue) -> Result<()> {
        let overwritten = {
            let mut table = self.table.lock();
            if table.contains(lpn) {
                table.overwrite(lpn, value)?;
                true
            } else {
                false
            }
        };
        if overwritten {
            self.counters.lock().overwrites += 1;
            return Ok(());
        }
        self.insert(dev, lpn, value).await
    }

    async fn insert<F: Flash>(&self, dev: &Device<F>, lpn: Lpn, value: L2PValue) -> Result<()> {
        let free = self.table.lock().lock_free_rows(1)?;
        let row = match free.first() {
            Some(&row) => row,
            None => {
                let _permit = self.acquire_quota(1).await?;
                self.evict(dev, None).await?
            }
        };
        self.table.lock().add(row, lpn, value, true, false)?;
        self.counters.lock().inserts += 1;
        Ok(())
    }

    async fn acquire_quota(&self, n: u32) -> Result<SemaphorePermit<'_>> {
        self.quota.acquire_many(n).await.map_err(quota_closed)
    }

    async fn load_missing<F: Flash>(&self, dev: &Device<F>, lpn: Lpn) -> Result<L2PValue> {
        let m_vpn = self.conf.lpn_to_m_vpn(lpn);
        let _permit = self.acquire_quota(2).await?;
        let _tp = dev.trans_page_locks.lock(m_vpn).await;

        let hit = self.table.lock().lookup(lpn);
        if let Some(value) = hit {
            return Ok(value);
        }

        self.load(dev, m_vpn).await?;
        let loaded = self.table.lock().lookup(lpn);
        loaded.ok_or_else(|| {
            FtlError::InvariantViolation(format!(
                "lpn {} missing right after loading m_vpn {}",
                lpn, m_vpn
            ))
        })
    }

    /// Brings every uncached entry of `m_vpn` in. The caller holds the m_vpn's
    /// interface and translation-page locks.
    async fn load<F: Flash>(&self, dev: &Device<F>, m_vpn: MVpn) -> Result<()> {
        let lpns = self.conf.m_vpn_to_lpns(m_vpn);

        let (pinned, mut rows, needed) = {
            let mut table = self.table.lock();
            let cached = table.rows_of(lpns.clone());
            let needed = lpns.len() - cached.len();
            // rows held by a pending eviction stay where they are
            let mut pinned = Vec::new();
            for id in cached {
                if table.rows[id].state == RowState::Used {
                    table.set_row_state(id, RowState::UsedLocked)?;
                    pinned.push(id);
                }
            }
            let rows = table.lock_free_rows(needed)?;
            (pinned, rows, needed)
        };

        while rows.len() < needed {
            rows.push(self.evict(dev, Some(m_vpn)).await?);
        }

        let on_flash = self
            .read_translation_page(dev, m_vpn, FlashTag::TransCache)
            .await?;

        let mut table = self.table.lock();
        let uncached: Vec<_> = on_flash
            .into_iter()
            .filter(|&(lpn, _)| !table.contains(lpn))
            .collect();
        ensure_invariant!(
            uncached.len() <= rows.len(),
            "m_vpn {} has {} uncached entries but only {} locked rows",
            m_vpn,
            uncached.len(),
            rows.len()
        );

        let mut rows = rows.into_iter();
        for ((lpn, value), id) in uncached.into_iter().zip(rows.by_ref()) {
            table.add(id, lpn, value, false, true)?;
        }
        table.unlock_free_rows(rows)?;
        for id in pinned {
            table.set_row_state(id, RowState::Used)?;
        }
        drop(table);

        self.counters.lock().loads += 1;
        trace!("loaded m_vpn {}", m_vpn);
        Ok(())
    }

    /// Frees one row. Loads pass the m_vpn they are loading, which together with
    /// every m_vpn under a translation-page lock is not evicted from.
    async fn evict<F: Flash>(&self, dev: &Device<F>, loading: Option<MVpn>) -> Result<RowId> {
        let (id, lpn) = {
            let mut avoid = BTreeSet::new();
            if let Some(m_vpn) = loading {
                avoid.insert(m_vpn);
                avoid.extend(dev.trans_page_locks.locked());
            }
            let mut table = self.table.lock();
            let Some((id, lpn)) = table.victim(&avoid, self.conf.entries_per_page()) else {
                let stats = table.stats();
                error!("no evictable row, avoiding {:?}, rows {}", avoid, stats);
                return Err(FtlError::CacheExhausted {
                    avoid: avoid.into_iter().collect(),
                    stats: stats.to_string(),
                });
            };
            table.set_row_state(id, RowState::UsedHeld)?;
            (id, lpn)
        };

        let m_vpn = self.conf.lpn_to_m_vpn(lpn);
        let _tp = dev.trans_page_locks.lock(m_vpn).await;

        // an overwrite may land while the translation page is being programmed
        loop {
            let dirty = self.table.lock().rows[id].dirty;
            if !dirty {
                break;
            }
            self.write_back(dev, m_vpn).await?;
        }

        let freed = {
            let mut table = self.table.lock();
            table.set_row_state(id, RowState::Used)?;
            table.delete(lpn)?
        };
        self.counters.lock().evictions += 1;
        trace!("evicted lpn {} of m_vpn {}", lpn, m_vpn);
        Ok(freed)
    }

    /// Persists the cached entries of `m_vpn` to a new translation page. The caller
    /// holds the m_vpn's translation-page lock.
    async fn write_back<F: Flash>(&self, dev: &Device<F>, m_vpn: MVpn) -> Result<()> {
        let lpns = self.conf.m_vpn_to_lpns(m_vpn);
        let n_cached = self.table.lock().rows_of(lpns.clone()).len();
        if n_cached < lpns.len() {
            // the rest of the page has to come from flash
            self.read_translation_page(dev, m_vpn, FlashTag::TransCache)
                .await?;
        }

        let entries = self.table.lock().take_for_write_back(lpns)?;
        self.mapping_on_flash.lock().set_batch(entries);

        let new_ppn = dev.block_pool.lock().next_translation_page()?;
        dev.flash
            .program_page(new_ppn, PageData::Translation { m_vpn }, FlashTag::TransCache)
            .await;

        let old_ppn = dev.directory.lock().lookup(m_vpn);
        dev.oob.lock().relocate(m_vpn, Some(old_ppn), new_ppn, true)?;
        dev.directory.lock().update(m_vpn, new_ppn);

        self.counters.lock().write_backs += 1;
        trace!("m_vpn {} written back to {}", m_vpn, new_ppn);
        Ok(())
    }

    async fn read_translation_page<F: Flash>(
        &self,
        dev: &Device<F>,
        m_vpn: MVpn,
        tag: FlashTag,
    ) -> Result<Vec<(Lpn, L2PValue)>> {
        let ppn = dev.directory.lock().lookup(m_vpn);
        match dev.flash.read_page(ppn, tag).await {
            // pages reserved at start-up were never programmed
            None => {}
            Some(PageData::Translation { m_vpn: owner }) if owner == m_vpn => {}
            Some(other) => {
                return Err(FtlError::InvariantViolation(format!(
                    "translation page {} of m_vpn {} holds {:?}",
                    ppn, m_vpn, other
                )))
            }
        }
        Ok(self
            .mapping_on_flash
            .lock()
            .get_batch(self.conf.m_vpn_to_lpns(m_vpn)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::small_config;
    use crate::flash::SimFlash;
    use crate::oob::PageState;
    use futures::future::try_join_all;
    use std::collections::HashMap;

    fn setup(conf: Config) -> (Device<SimFlash>, MappingCache) {
        let flash = SimFlash::new(&conf);
        let cache = MappingCache::new(&conf);
        (Device::new(conf, flash).unwrap(), cache)
    }

    fn one_page_config() -> Config {
        Config {
            cache_entries: 16,
            ..small_config()
        }
    }

    #[test]
    fn row_transitions() {
        use RowState::*;
        assert!(Free.can_become(FreeLocked));
        assert!(FreeLocked.can_become(Used));
        assert!(Used.can_become(UsedHeld));
        assert!(UsedLocked.can_become(Used));
        assert!(!Free.can_become(Used));
        assert!(!UsedHeld.can_become(FreeLocked));
        assert!(!UsedLocked.can_become(UsedHeld));
        assert!(!Used.can_become(Free));

        assert!(UsedHeld.allows_modification());
        assert!(!UsedLocked.allows_modification());
        assert!(!Free.allows_modification());
    }

    #[test]
    fn table_rejects_illegal_moves() {
        let mut table = LpnTable::new(2);
        assert!(table.add(0, 5, L2PValue::Mapped(1), true, false).is_err());

        let ids = table.lock_free_rows(2).unwrap();
        assert_eq!(ids, vec![0, 1]);
        table.add(0, 5, L2PValue::Mapped(1), true, false).unwrap();
        assert!(table.add(1, 5, L2PValue::Mapped(2), true, false).is_err());

        table.set_row_state(0, RowState::UsedLocked).unwrap();
        assert!(table.overwrite(5, L2PValue::Mapped(3)).is_err());
        assert!(table.delete(5).is_err());
    }

    #[test]
    fn table_victim_order_and_avoid() {
        let mut table = LpnTable::new(3);
        let ids = table.lock_free_rows(3).unwrap();
        table.add(ids[0], 0, L2PValue::Mapped(1), false, false).unwrap();
        table.add(ids[1], 20, L2PValue::Mapped(2), false, false).unwrap();
        table.add(ids[2], 40, L2PValue::Mapped(3), false, true).unwrap();

        assert_eq!(table.lpns_by_recency(), vec![40, 0, 20]);
        assert_eq!(table.victim(&BTreeSet::new(), 16), Some((ids[2], 40)));

        // m_vpn 2 avoided
        let avoid = BTreeSet::from([2]);
        assert_eq!(table.victim(&avoid, 16), Some((ids[0], 0)));

        table.lookup(0);
        assert_eq!(table.victim(&avoid, 16), Some((ids[1], 20)));

        table.set_row_state(ids[1], RowState::UsedHeld).unwrap();
        table.set_row_state(ids[0], RowState::UsedLocked).unwrap();
        assert_eq!(table.victim(&avoid, 16), None);
        assert_eq!(table.stats().occupied(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn unwritten_lpn_is_uninitiated() {
        let (dev, cache) = setup(small_config());
        assert_eq!(cache.translate(&dev, 100).await.unwrap(), L2PValue::Uninitiated);
        assert_eq!(cache.translate(&dev, 101).await.unwrap(), L2PValue::Uninitiated);

        let counters = cache.counters();
        assert_eq!(counters.misses, 1);
        assert_eq!(counters.hits, 1);
        assert_eq!(counters.loads, 1);
        // the whole translation page came in clean
        assert_eq!(cache.row_stats().used, 16);
        assert_eq!(cache.is_dirty(111), Some(false));
    }

    #[tokio::test(start_paused = true)]
    async fn one_eviction_after_filling_one_page_cache() {
        let conf = one_page_config();
        let epp = conf.entries_per_page();
        let (dev, cache) = setup(conf);

        for lpn in 0..epp {
            cache.update(&dev, lpn, L2PValue::Mapped(1000 + lpn)).await.unwrap();
        }
        assert_eq!(cache.counters().evictions, 0);
        assert_eq!(cache.row_stats().free, 0);

        cache.update(&dev, epp, L2PValue::Mapped(1000 + epp)).await.unwrap();
        let counters = cache.counters();
        assert_eq!(counters.evictions, 1);
        assert_eq!(counters.write_backs, 1);
        assert!(!cache.contains(0));
        assert_eq!(cache.on_flash(0), L2PValue::Mapped(1000));

        // reloading brings the evicted mapping back
        assert_eq!(cache.translate(&dev, 0).await.unwrap(), L2PValue::Mapped(1000));
        assert_eq!(
            cache.translate(&dev, epp).await.unwrap(),
            L2PValue::Mapped(1000 + epp)
        );
        assert!(cache.row_stats().occupied() <= 16);
    }

    #[tokio::test(start_paused = true)]
    async fn write_back_moves_translation_page() {
        let (dev, cache) = setup(small_config());
        let before = dev.directory.lock().lookup(0);

        cache.update(&dev, 3, L2PValue::Mapped(77)).await.unwrap();
        assert_eq!(cache.is_dirty(3), Some(true));
        cache.flush(&dev).await.unwrap();

        let after = dev.directory.lock().lookup(0);
        assert_ne!(before, after);
        assert_eq!(dev.oob.lock().state(before), PageState::Invalid);
        assert_eq!(dev.oob.lock().owner(after), Some(0));
        assert_eq!(
            dev.flash.peek(after),
            Some(PageData::Translation { m_vpn: 0 })
        );
        assert_eq!(cache.is_dirty(3), Some(false));
        assert_eq!(cache.on_flash(3), L2PValue::Mapped(77));

        // nothing dirty, nothing written
        cache.flush(&dev).await.unwrap();
        assert_eq!(dev.directory.lock().lookup(0), after);
    }

    #[tokio::test(start_paused = true)]
    async fn flush_then_drop_keeps_mappings() {
        let (dev, cache) = setup(small_config());
        for lpn in [1, 17, 33] {
            cache.update(&dev, lpn, L2PValue::Mapped(lpn * 2)).await.unwrap();
        }
        cache.flush(&dev).await.unwrap();
        cache.drop_all().unwrap();
        assert_eq!(cache.row_stats().free, 64);

        for lpn in [1, 17, 33] {
            assert_eq!(
                cache.translate(&dev, lpn).await.unwrap(),
                L2PValue::Mapped(lpn * 2)
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn swap_discard_and_relocate() {
        let (dev, cache) = setup(small_config());

        let old = cache.swap(&dev, 5, L2PValue::Mapped(10)).await.unwrap();
        assert_eq!(old, L2PValue::Uninitiated);
        let old = cache.swap(&dev, 5, L2PValue::Mapped(11)).await.unwrap();
        assert_eq!(old, L2PValue::Mapped(10));

        assert!(!cache.relocate(&dev, 5, 10, 12).await.unwrap());
        assert!(cache.relocate(&dev, 5, 11, 12).await.unwrap());
        assert_eq!(cache.translate(&dev, 5).await.unwrap(), L2PValue::Mapped(12));

        assert_eq!(cache.discard(&dev, 5).await.unwrap(), Some(12));
        assert_eq!(cache.translate(&dev, 5).await.unwrap(), L2PValue::Uninitiated);

        // discarding an unwritten lpn changes nothing
        assert_eq!(cache.discard(&dev, 6).await.unwrap(), None);
        assert_eq!(cache.is_dirty(6), Some(false));
        assert!(!cache.relocate(&dev, 6, 10, 13).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_updates_to_one_m_vpn() {
        let (dev, cache) = setup(one_page_config());
        futures::try_join!(
            cache.update(&dev, 1, L2PValue::Mapped(100)),
            cache.update(&dev, 2, L2PValue::Mapped(200)),
        )
        .unwrap();
        assert_eq!(cache.translate(&dev, 1).await.unwrap(), L2PValue::Mapped(100));
        assert_eq!(cache.translate(&dev, 2).await.unwrap(), L2PValue::Mapped(200));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_misses_respect_capacity() {
        let (dev, cache) = setup(small_config());
        // one lpn in each of 40 translation pages, far more than the 4 that fit
        let lpns: Vec<Lpn> = (0..40).map(|i| i * 16 + i % 16).collect();

        try_join_all(
            lpns.iter()
                .map(|&lpn| cache.swap(&dev, lpn, L2PValue::Mapped(lpn + 5000))),
        )
        .await
        .unwrap();
        assert!(cache.row_stats().occupied() <= 64);

        let values = cache.translate_batch(&dev, lpns.iter().copied()).await.unwrap();
        for (lpn, value) in lpns.iter().zip(values) {
            assert_eq!(value, L2PValue::Mapped(lpn + 5000));
        }
        let stats = cache.row_stats();
        assert_eq!(stats.free_locked + stats.used_locked + stats.used_held, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cache_agrees_with_model_under_churn() {
        let (dev, cache) = setup(small_config());
        let mut model = HashMap::new();

        for round in 0..3 {
            for i in 0..200 {
                let lpn = (i * 37 + round * 11) % 1024;
                let value = L2PValue::Mapped(round * 10_000 + i);
                cache.update(&dev, lpn, value).await.unwrap();
                model.insert(lpn, value);
                assert!(cache.row_stats().occupied() <= 64);
            }
        }

        for (&lpn, &value) in &model {
            assert_eq!(cache.translate(&dev, lpn).await.unwrap(), value);
        }
        assert!(cache.counters().evictions > 0);
    }
}
