//! Garbage collection and wear leveling.

use futures::future::try_join_all;
use log::*;
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use crate::blkpool::{BlockPool, BlockTag, EraseChoice};
use crate::cache::MappingCache;
use crate::config::*;
use crate::device::Device;
use crate::error::{ensure_invariant, FtlError, Result};
use crate::flash::{Flash, FlashTag, PageData};
use crate::oob::OutOfBandArea;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Purpose {
    GarbageCollection,
    WearLeveling,
}

impl Purpose {
    /// GC fills the freshest blocks, wear leveling parks cold data on worn ones.
    fn erase_choice(self) -> EraseChoice {
        match self {
            Purpose::GarbageCollection => EraseChoice::LeastErased,
            Purpose::WearLeveling => EraseChoice::MostErased,
        }
    }

    fn flash_tag(self, tag: BlockTag) -> FlashTag {
        match (self, tag) {
            (Purpose::GarbageCollection, BlockTag::Trans) => FlashTag::TransClean,
            (Purpose::WearLeveling, BlockTag::Trans) => FlashTag::TransWearLevel,
            (Purpose::GarbageCollection, _) => FlashTag::DataCleaning,
            (Purpose::WearLeveling, _) => FlashTag::DataWearLevel,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Victim {
    pub block: BlockId,
    pub tag: BlockTag,
    pub valid_count: Counter,
}

/// Used blocks that may be erased right now: not being programmed and without
/// pages that are still on their way to the flash.
fn settled_blocks(pool: &mut BlockPool, oob: &OutOfBandArea) -> Vec<Victim> {
    pool.remove_full_current_blocks();
    let current = pool.current_blocks();

    let mut blocks = Vec::new();
    for tag in [BlockTag::Data, BlockTag::Trans] {
        for block in pool.blocks_of_tag(tag) {
            if current.contains(&block) || oob.erased_count(block) > 0 {
                continue;
            }
            blocks.push(Victim {
                block,
                tag,
                valid_count: oob.valid_count(block),
            });
        }
    }
    blocks
}

/// GC candidates, fewest valid pages first. Blocks that are entirely valid or
/// above `max_victim_valid_ratio` are left alone. Ties keep data blocks ahead of
/// translation blocks, each in block order.
pub fn victim_blocks(conf: &Config, pool: &mut BlockPool, oob: &OutOfBandArea) -> Vec<Victim> {
    let mut victims: Vec<Victim> = settled_blocks(pool, oob)
        .into_iter()
        .filter(|v| {
            let ratio = v.valid_count as f64 / conf.pages_per_block as f64;
            v.valid_count < conf.pages_per_block && ratio <= conf.max_victim_valid_ratio
        })
        .collect();
    victims.sort_by_key(|v| v.valid_count);
    victims
}

/// The least erased share of the device among used blocks, whatever their
/// valid ratio.
pub fn wear_leveling_victims(
    conf: &Config,
    pool: &mut BlockPool,
    oob: &OutOfBandArea,
) -> Vec<Victim> {
    let n = (conf.wear_leveling_victim_ratio * conf.blocks_per_dev() as f64).ceil() as usize;
    let mut candidates = settled_blocks(pool, oob);
    candidates.sort_by_key(|v| (pool.block(v.block).erase_counter(), v.block));
    candidates.truncate(n);
    candidates
}

/// Outcome of one GC or wear-leveling pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CleanReport {
    pub blocks_cleaned: Counter,
    pub pages_moved: Counter,
    pub used_ratio_before: f64,
    pub used_ratio_after: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PurposeCounters {
    pub passes: Counter,
    pub data_page_moves: Counter,
    pub trans_page_moves: Counter,
    /// Copies dropped because the host rewrote the page meanwhile.
    pub stale_copies: Counter,
    pub data_block_erases: Counter,
    pub trans_block_erases: Counter,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanerCounters {
    pub gc: PurposeCounters,
    pub wear_leveling: PurposeCounters,
}

impl CleanerCounters {
    fn of(&mut self, purpose: Purpose) -> &mut PurposeCounters {
        match purpose {
            Purpose::GarbageCollection => &mut self.gc,
            Purpose::WearLeveling => &mut self.wear_leveling,
        }
    }
}

pub struct Cleaner {
    conf: Config,
    // one GC or wear-leveling pass at a time
    pass: Semaphore,
    block_cleaners: Semaphore,
    counters: Mutex<CleanerCounters>,
}

fn permit_closed<E>(_: E) -> FtlError {
    FtlError::InvariantViolation("cleaner permits closed".into())
}

impl Cleaner {
    pub fn new(conf: &Config) -> Self {
        Cleaner {
            conf: conf.clone(),
            pass: Semaphore::new(1),
            block_cleaners: Semaphore::new(conf.gc_procs),
            counters: Mutex::new(CleanerCounters::default()),
        }
    }

    pub fn needs_cleaning<F>(&self, dev: &Device<F>) -> bool {
        dev.block_pool.lock().used_ratio() > self.conf.gc_high_watermark
    }

    pub fn is_stopping_needed<F>(&self, dev: &Device<F>) -> bool {
        dev.block_pool.lock().used_ratio() < self.conf.gc_low_watermark
    }

    pub fn counters(&self) -> CleanerCounters {
        self.counters.lock().clone()
    }

    /// Runs a GC pass whether or not the high watermark was crossed.
    pub async fn clean<F: Flash>(&self, dev: &Device<F>, cache: &MappingCache) -> Result<CleanReport> {
        let _pass = self.pass.acquire().await.map_err(permit_closed)?;
        self.gc_pass(dev, cache).await
    }

    /// Runs a pass when above the high watermark. Callers queue behind a running
    /// pass and skip their own if that pass got below the watermark.
    pub async fn clean_if_needed<F: Flash>(
        &self,
        dev: &Device<F>,
        cache: &MappingCache,
    ) -> Result<Option<CleanReport>> {
        if !self.needs_cleaning(dev) {
            return Ok(None);
        }
        let _pass = self.pass.acquire().await.map_err(permit_closed)?;
        if !self.needs_cleaning(dev) {
            return Ok(None);
        }
        self.gc_pass(dev, cache).await.map(Some)
    }

    pub async fn level_wear<F: Flash>(
        &self,
        dev: &Device<F>,
        cache: &MappingCache,
    ) -> Result<CleanReport> {
        let _pass = self.pass.acquire().await.map_err(permit_closed)?;

        let victims = {
            let mut pool = dev.block_pool.lock();
            let oob = dev.oob.lock();
            debug!("erasure counts before leveling: {:?}", pool.erasure_count_dist());
            wear_leveling_victims(&self.conf, &mut pool, &oob)
        };
        info!("wear leveling {} blocks", victims.len());

        let mut report = CleanReport {
            used_ratio_before: dev.used_ratio(),
            ..Default::default()
        };
        for batch in victims.chunks(self.conf.victims_per_batch()) {
            self.clean_batch(dev, cache, batch, Purpose::WearLeveling, &mut report)
                .await?;
        }
        report.used_ratio_after = dev.used_ratio();
        self.counters.lock().wear_leveling.passes += 1;

        debug!(
            "erasure counts after leveling: {:?}",
            dev.block_pool.lock().erasure_count_dist()
        );
        Ok(report)
    }

    async fn gc_pass<F: Flash>(&self, dev: &Device<F>, cache: &MappingCache) -> Result<CleanReport> {
        let victims = {
            let mut pool = dev.block_pool.lock();
            let oob = dev.oob.lock();
            victim_blocks(&self.conf, &mut pool, &oob)
        };

        let mut report = CleanReport {
            used_ratio_before: dev.used_ratio(),
            ..Default::default()
        };
        info!(
            "cleaning: used ratio {:.3}, {} candidate blocks",
            report.used_ratio_before,
            victims.len()
        );

        for batch in victims.chunks(self.conf.victims_per_batch()) {
            if self.is_stopping_needed(dev) {
                break;
            }
            self.clean_batch(dev, cache, batch, Purpose::GarbageCollection, &mut report)
                .await?;
        }
        report.used_ratio_after = dev.used_ratio();
        self.counters.lock().gc.passes += 1;

        info!(
            "cleaned {} blocks, moved {} pages, used ratio {:.3} -> {:.3}",
            report.blocks_cleaned,
            report.pages_moved,
            report.used_ratio_before,
            report.used_ratio_after
        );
        Ok(report)
    }

    async fn clean_batch<F: Flash>(
        &self,
        dev: &Device<F>,
        cache: &MappingCache,
        batch: &[Victim],
        purpose: Purpose,
        report: &mut CleanReport,
    ) -> Result<()> {
        let moved = try_join_all(
            batch
                .iter()
                .map(|&victim| self.clean_block(dev, cache, victim, purpose)),
        )
        .await?;
        report.blocks_cleaned += batch.len();
        report.pages_moved += moved.iter().sum::<Counter>();
        Ok(())
    }

    async fn clean_block<F: Flash>(
        &self,
        dev: &Device<F>,
        cache: &MappingCache,
        victim: Victim,
        purpose: Purpose,
    ) -> Result<Counter> {
        let _permit = self.block_cleaners.acquire().await.map_err(permit_closed)?;
        trace!("cleaning {:?} for {:?}", victim, purpose);

        let moved = match victim.tag {
            BlockTag::Data => self.clean_data_block(dev, cache, victim.block, purpose).await?,
            BlockTag::Trans => self.clean_trans_block(dev, victim.block, purpose).await?,
            BlockTag::Free => {
                return Err(FtlError::InvariantViolation(format!(
                    "free block {} chosen as victim",
                    victim.block
                )))
            }
        };

        let remaining = dev.oob.lock().valid_count(victim.block);
        ensure_invariant!(
            remaining == 0,
            "block {} still has {} valid pages after cleaning",
            victim.block,
            remaining
        );

        dev.flash
            .erase_block(victim.block, purpose.flash_tag(victim.tag))
            .await;
        dev.oob.lock().erase_block(victim.block);
        dev.block_pool.lock().reclaim(victim.block)?;

        let mut counters = self.counters.lock();
        let counters = counters.of(purpose);
        match victim.tag {
            BlockTag::Trans => counters.trans_block_erases += 1,
            _ => counters.data_block_erases += 1,
        }
        Ok(moved)
    }

    async fn clean_data_block<F: Flash>(
        &self,
        dev: &Device<F>,
        cache: &MappingCache,
        block: BlockId,
        purpose: Purpose,
    ) -> Result<Counter> {
        let tag = purpose.flash_tag(BlockTag::Data);
        let mut moved = 0;

        for ppn in self.conf.block_to_page_range(block) {
            let owner = {
                let oob = dev.oob.lock();
                if !oob.is_page_valid(ppn) {
                    continue;
                }
                oob.owner(ppn)
            };
            let lpn = owner.ok_or_else(|| {
                FtlError::InvariantViolation(format!("valid data page {} has no owner", ppn))
            })?;

            let data = match dev.flash.read_page(ppn, tag).await {
                Some(data @ PageData::User { lpn: stored, .. }) if stored == lpn => data,
                other => {
                    return Err(FtlError::InvariantViolation(format!(
                        "data page {} of lpn {} holds {:?}",
                        ppn, lpn, other
                    )))
                }
            };

            let new_ppn = dev
                .block_pool
                .lock()
                .next_gc_data_page(purpose.erase_choice())?;
            dev.flash.program_page(new_ppn, data, tag).await;

            if cache.relocate(dev, lpn, ppn, new_ppn).await? {
                dev.oob.lock().relocate(lpn, Some(ppn), new_ppn, false)?;
                moved += 1;
                self.counters.lock().of(purpose).data_page_moves += 1;
            } else {
                dev.oob.lock().discard_unused(new_ppn)?;
                self.counters.lock().of(purpose).stale_copies += 1;
            }
        }
        Ok(moved)
    }

    async fn clean_trans_block<F: Flash>(
        &self,
        dev: &Device<F>,
        block: BlockId,
        purpose: Purpose,
    ) -> Result<Counter> {
        let tag = purpose.flash_tag(BlockTag::Trans);
        let mut moved = 0;

        for ppn in self.conf.block_to_page_range(block) {
            let owner = {
                let oob = dev.oob.lock();
                if !oob.is_page_valid(ppn) {
                    continue;
                }
                oob.owner(ppn)
            };
            let m_vpn = owner.ok_or_else(|| {
                FtlError::InvariantViolation(format!("valid translation page {} has no owner", ppn))
            })?;
            let _tp = dev.trans_page_locks.lock(m_vpn).await;

            // a write-back may have moved the page while we waited
            let current = dev.directory.lock().lookup(m_vpn) == ppn
                && dev.oob.lock().is_page_valid(ppn);
            if !current {
                continue;
            }

            match dev.flash.read_page(ppn, tag).await {
                // reserved at start-up and never written back since
                None => {}
                Some(PageData::Translation { m_vpn: stored }) if stored == m_vpn => {}
                other => {
                    return Err(FtlError::InvariantViolation(format!(
                        "translation page {} of m_vpn {} holds {:?}",
                        ppn, m_vpn, other
                    )))
                }
            }
            let new_ppn = dev
                .block_pool
                .lock()
                .next_gc_translation_page(purpose.erase_choice())?;
            dev.flash
                .program_page(new_ppn, PageData::Translation { m_vpn }, tag)
                .await;

            dev.directory.lock().update(m_vpn, new_ppn);
            dev.oob.lock().relocate(m_vpn, Some(ppn), new_ppn, false)?;
            moved += 1;
            self.counters.lock().of(purpose).trans_page_moves += 1;
        }
        Ok(moved)
    }
}
