use std::ops::Range;
use std::time::Duration;

use num_integer::Integer;

use crate::error::{FtlError, Result};

pub type BaseType = usize;

pub type PageId = BaseType;
pub type BlockId = BaseType;
pub type ChannelId = BaseType;
pub type Counter = BaseType;
/// Logical page number, the host-visible unit.
pub type Lpn = BaseType;
/// Virtual translation page number: index of a group of `entries_per_page()` LPNs.
pub type MVpn = BaseType;

pub const PAGE_SIZE: BaseType = 4096;
pub const PAGES_PER_BLOCK: BaseType = 64;
pub const BLOCKS_PER_CHANNEL: BaseType = 1024;
pub const CHANNELS: BaseType = 4;

/// Bytes of one LPN->PPN entry inside a translation page.
pub const TRANSLATION_PAGE_ENTRY_BYTES: BaseType = 4;

/// Scheduler time for a span of device time. The tokio timer wheel only resolves
/// milliseconds, so the simulated clock runs one millisecond per device nanosecond.
pub fn sim_duration(nanos: u64) -> Duration {
    Duration::from_millis(nanos)
}

/// Inverse of [`sim_duration`].
pub fn device_nanos(span: Duration) -> u128 {
    span.as_millis()
}

/// NAND timing parameters in nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashTiming {
    pub t_wc: u64,
    pub t_r: u64,
    pub t_rc: u64,
    pub t_prog: u64,
    pub t_bers: u64,
}

impl Default for FlashTiming {
    fn default() -> Self {
        FlashTiming {
            t_wc: 0,
            t_r: 20_000,
            t_rc: 0,
            t_prog: 200_000,
            t_bers: 1_500_000,
        }
    }
}

impl FlashTiming {
    pub fn read_time(&self, page_size: BaseType) -> Duration {
        sim_duration(7 * self.t_wc + self.t_r + page_size as u64 * self.t_rc)
    }

    pub fn program_time(&self, page_size: BaseType) -> Duration {
        sim_duration(7 * self.t_wc + page_size as u64 * self.t_wc + self.t_prog)
    }

    pub fn erase_time(&self) -> Duration {
        sim_duration(5 * self.t_wc + self.t_bers)
    }
}

/// Construction-time description of one simulated device and its FTL.
#[derive(Debug, Clone)]
pub struct Config {
    pub page_size: BaseType,
    pub pages_per_block: BaseType,
    pub blocks_per_channel: BaseType,
    pub channels: BaseType,

    pub translation_page_entry_bytes: BaseType,
    /// Number of LPN->PPN rows the mapping cache may hold.
    pub cache_entries: BaseType,

    pub gc_high_watermark: f64,
    pub gc_low_watermark: f64,
    pub over_provisioning: f64,
    pub min_spare_blocks: BaseType,
    pub check_gc_setting: bool,
    pub max_victim_valid_ratio: f64,
    /// Defaults to twice the channel count.
    pub victims_per_batch: Option<BaseType>,
    pub gc_procs: BaseType,

    pub wear_leveling_factor: f64,
    pub wear_leveling_diff: Counter,
    pub wear_leveling_victim_ratio: f64,
    pub do_wear_leveling: bool,
    /// Device nanoseconds between two wear-leveling checks.
    pub wear_leveling_check_interval: u64,

    /// Pages taken from one channel before moving to the next.
    pub stripe_size: BaseType,
    /// Permits for concurrent load/insert sequences in the mapping cache.
    /// Defaults to the cache's translation page capacity minus one, at least two.
    pub translation_quota: Option<BaseType>,

    pub timing: FlashTiming,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            page_size: PAGE_SIZE,
            pages_per_block: PAGES_PER_BLOCK,
            blocks_per_channel: BLOCKS_PER_CHANNEL,
            channels: CHANNELS,
            translation_page_entry_bytes: TRANSLATION_PAGE_ENTRY_BYTES,
            cache_entries: 16 * (PAGE_SIZE / TRANSLATION_PAGE_ENTRY_BYTES),
            gc_high_watermark: 0.95,
            gc_low_watermark: 0.9,
            over_provisioning: 1.28,
            min_spare_blocks: 32,
            check_gc_setting: true,
            max_victim_valid_ratio: 1.0,
            victims_per_batch: None,
            gc_procs: 16,
            wear_leveling_factor: 2.0,
            wear_leveling_diff: 10,
            wear_leveling_victim_ratio: 0.1,
            do_wear_leveling: false,
            wear_leveling_check_interval: 10_000_000_000,
            stripe_size: 1,
            translation_quota: None,
            timing: FlashTiming::default(),
        }
    }
}

impl Config {
    pub fn blocks_per_dev(&self) -> BaseType {
        self.blocks_per_channel * self.channels
    }

    pub fn pages_per_channel(&self) -> BaseType {
        self.blocks_per_channel * self.pages_per_block
    }

    pub fn total_pages(&self) -> BaseType {
        self.blocks_per_dev() * self.pages_per_block
    }

    pub fn device_bytes(&self) -> BaseType {
        self.total_pages() * self.page_size
    }

    pub fn entries_per_page(&self) -> BaseType {
        self.page_size / self.translation_page_entry_bytes
    }

    /// Translation pages needed to map every physical page.
    pub fn total_translation_pages(&self) -> BaseType {
        Integer::div_ceil(
            &(self.total_pages() * self.translation_page_entry_bytes),
            &self.page_size,
        )
    }

    /// Size of the LPN space, always a whole number of translation pages.
    pub fn logical_pages(&self) -> BaseType {
        self.total_translation_pages() * self.entries_per_page()
    }

    /// Pages a host is expected to use given the over-provisioning factor.
    pub fn user_pages(&self) -> BaseType {
        (self.total_pages() as f64 / self.over_provisioning) as BaseType
    }

    pub fn cache_translation_pages(&self) -> BaseType {
        self.cache_entries / self.entries_per_page()
    }

    pub fn translation_quota(&self) -> BaseType {
        self.translation_quota
            .unwrap_or_else(|| self.cache_translation_pages().saturating_sub(1).max(2))
    }

    pub fn victims_per_batch(&self) -> BaseType {
        self.victims_per_batch.unwrap_or(self.channels * 2)
    }

    pub fn lpn_to_m_vpn(&self, lpn: Lpn) -> MVpn {
        lpn / self.entries_per_page()
    }

    pub fn m_vpn_to_lpns(&self, m_vpn: MVpn) -> Range<Lpn> {
        let start = m_vpn * self.entries_per_page();
        start..start + self.entries_per_page()
    }

    pub fn block_to_page_range(&self, block: BlockId) -> Range<PageId> {
        let start = block * self.pages_per_block;
        start..start + self.pages_per_block
    }

    pub fn page_to_block(&self, ppn: PageId) -> BlockId {
        ppn / self.pages_per_block
    }

    pub fn block_to_channel(&self, block: BlockId) -> ChannelId {
        block / self.blocks_per_channel
    }

    pub fn page_to_channel(&self, ppn: PageId) -> ChannelId {
        ppn / self.pages_per_channel()
    }

    /// Rejects configurations that cannot run to completion.
    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0
            || self.pages_per_block == 0
            || self.blocks_per_channel == 0
            || self.channels == 0
        {
            return Err(FtlError::Config("device geometry must be non-zero".into()));
        }
        if self.translation_page_entry_bytes == 0
            || !Integer::is_multiple_of(&self.page_size, &self.translation_page_entry_bytes)
        {
            return Err(FtlError::Config(format!(
                "page size {} is not a multiple of entry size {}",
                self.page_size, self.translation_page_entry_bytes
            )));
        }
        if self.cache_entries < self.entries_per_page() {
            return Err(FtlError::Config(format!(
                "mapping cache holds {} entries, less than one translation page ({})",
                self.cache_entries,
                self.entries_per_page()
            )));
        }
        if !Integer::is_multiple_of(&self.cache_entries, &self.entries_per_page()) {
            return Err(FtlError::Config(format!(
                "mapping cache size {} is not aligned to translation page size {}",
                self.cache_entries,
                self.entries_per_page()
            )));
        }
        if self.translation_quota() < 2 {
            return Err(FtlError::Config(format!(
                "translation quota {} is below 2, loads could never start",
                self.translation_quota()
            )));
        }
        if self.stripe_size == 0 || self.gc_procs == 0 || self.victims_per_batch() == 0 {
            return Err(FtlError::Config(
                "stripe size, gc procs and victims per batch must be non-zero".into(),
            ));
        }
        if !(self.gc_low_watermark < self.gc_high_watermark && self.gc_high_watermark <= 1.0) {
            return Err(FtlError::Config(format!(
                "gc watermarks must satisfy low ({}) < high ({}) <= 1",
                self.gc_low_watermark, self.gc_high_watermark
            )));
        }
        if !(0.0..=1.0).contains(&self.wear_leveling_victim_ratio) {
            return Err(FtlError::Config(format!(
                "wear leveling victim ratio {} is outside [0, 1]",
                self.wear_leveling_victim_ratio
            )));
        }
        if self.total_translation_pages() >= self.total_pages() {
            return Err(FtlError::Config(
                "translation pages would fill the whole device".into(),
            ));
        }

        if self.check_gc_setting {
            self.check_gc_thresholds()?;
        }

        Ok(())
    }

    fn check_gc_thresholds(&self) -> Result<()> {
        let min_high = 1.0 / self.over_provisioning;
        if self.gc_high_watermark < min_high {
            return Err(FtlError::Config(format!(
                "gc high watermark {} is below {:.3}; a full file system would keep \
                 the cleaner running",
                self.gc_high_watermark, min_high
            )));
        }

        let spare_blocks = (1.0 - self.gc_high_watermark) * self.blocks_per_dev() as f64;
        if spare_blocks < self.min_spare_blocks as f64 {
            return Err(FtlError::Config(format!(
                "only {:.1} spare blocks above the high watermark, need {}",
                spare_blocks, self.min_spare_blocks
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn small_config() -> Config {
    // 4 channels x 32 blocks x 16 pages, 16 entries per translation page.
    Config {
        page_size: 64,
        pages_per_block: 16,
        blocks_per_channel: 32,
        channels: 4,
        translation_page_entry_bytes: 4,
        cache_entries: 64,
        gc_high_watermark: 0.8,
        gc_low_watermark: 0.6,
        min_spare_blocks: 4,
        ..Config::default()
    }
}
