//! The flash channel interface the FTL drives, and an in-memory controller that
//! charges simulated time for every operation.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use log::*;
use parking_lot::Mutex;
use tokio::sync::Mutex as ChannelLock;

use crate::config::*;

/// Why a flash operation was issued; used for accounting only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FlashTag {
    DataUser,
    DataCleaning,
    DataWearLevel,
    /// Translation page reads for cache misses and writes for evictions.
    TransCache,
    TransClean,
    TransWearLevel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FlashOp {
    Read,
    Program,
    Erase,
}

/// Contents of a simulated page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageData {
    User { lpn: Lpn, version: u64 },
    Translation { m_vpn: MVpn },
}

/// A multi-channel NAND device. Every call resolves once the owning channel
/// reports completion.
#[allow(async_fn_in_trait)]
pub trait Flash {
    async fn program_page(&self, ppn: PageId, data: PageData, tag: FlashTag);

    async fn read_page(&self, ppn: PageId, tag: FlashTag) -> Option<PageData>;

    async fn erase_block(&self, block: BlockId, tag: FlashTag);
}

/// Each channel serves one operation at a time.
pub struct SimFlash {
    pages_per_block: BaseType,
    pages_per_channel: BaseType,
    blocks_per_channel: BaseType,
    read_time: Duration,
    program_time: Duration,
    erase_time: Duration,

    channels: Vec<ChannelLock<()>>,
    pages: Mutex<HashMap<PageId, PageData>>,
    counters: Mutex<BTreeMap<(FlashOp, FlashTag), Counter>>,
    busy_time: Mutex<Vec<Duration>>,
}

impl SimFlash {
    pub fn new(conf: &Config) -> Self {
        SimFlash {
            pages_per_block: conf.pages_per_block,
            pages_per_channel: conf.pages_per_channel(),
            blocks_per_channel: conf.blocks_per_channel,
            read_time: conf.timing.read_time(conf.page_size),
            program_time: conf.timing.program_time(conf.page_size),
            erase_time: conf.timing.erase_time(),
            channels: (0..conf.channels).map(|_| ChannelLock::new(())).collect(),
            pages: Mutex::new(HashMap::new()),
            counters: Mutex::new(BTreeMap::new()),
            busy_time: Mutex::new(vec![Duration::ZERO; conf.channels]),
        }
    }

    async fn occupy(&self, channel: ChannelId, op: FlashOp, tag: FlashTag) {
        let delay = match op {
            FlashOp::Read => self.read_time,
            FlashOp::Program => self.program_time,
            FlashOp::Erase => self.erase_time,
        };

        let _channel = self.channels[channel].lock().await;
        tokio::time::sleep(delay).await;

        self.busy_time.lock()[channel] += delay;
        *self.counters.lock().entry((op, tag)).or_insert(0) += 1;
    }

    pub fn count(&self, op: FlashOp, tag: FlashTag) -> Counter {
        self.counters.lock().get(&(op, tag)).copied().unwrap_or(0)
    }

    pub fn count_op(&self, op: FlashOp) -> Counter {
        self.counters
            .lock()
            .iter()
            .filter(|((o, _), _)| *o == op)
            .map(|(_, n)| n)
            .sum()
    }

    pub fn counters(&self) -> BTreeMap<(FlashOp, FlashTag), Counter> {
        self.counters.lock().clone()
    }

    pub fn busy_time(&self, channel: ChannelId) -> Duration {
        self.busy_time.lock()[channel]
    }

    /// Contents without charging time; for inspection.
    pub fn peek(&self, ppn: PageId) -> Option<PageData> {
        self.pages.lock().get(&ppn).copied()
    }
}

impl Flash for SimFlash {
    async fn program_page(&self, ppn: PageId, data: PageData, tag: FlashTag) {
        self.occupy(ppn / self.pages_per_channel, FlashOp::Program, tag)
            .await;
        if let Some(old) = self.pages.lock().insert(ppn, data) {
            warn!("page {} programmed twice without erase (held {:?})", ppn, old);
        }
    }

    async fn read_page(&self, ppn: PageId, tag: FlashTag) -> Option<PageData> {
        self.occupy(ppn / self.pages_per_channel, FlashOp::Read, tag)
            .await;
        self.pages.lock().get(&ppn).copied()
    }

    async fn erase_block(&self, block: BlockId, tag: FlashTag) {
        self.occupy(block / self.blocks_per_channel, FlashOp::Erase, tag)
            .await;
        let start = block * self.pages_per_block;
        let mut pages = self.pages.lock();
        for ppn in start..start + self.pages_per_block {
            pages.remove(&ppn);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::small_config;
    use tokio::time::Instant;

    fn timed_config() -> Config {
        Config {
            timing: FlashTiming {
                t_wc: 0,
                t_r: 10,
                t_rc: 0,
                t_prog: 100,
                t_bers: 1000,
            },
            ..small_config()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn program_read_erase() {
        let conf = timed_config();
        let flash = SimFlash::new(&conf);
        let data = PageData::User { lpn: 4, version: 1 };

        flash.program_page(17, data, FlashTag::DataUser).await;
        assert_eq!(flash.read_page(17, FlashTag::DataUser).await, Some(data));
        assert_eq!(flash.read_page(18, FlashTag::DataUser).await, None);

        flash.erase_block(1, FlashTag::DataCleaning).await;
        assert_eq!(flash.peek(17), None);

        assert_eq!(flash.count(FlashOp::Program, FlashTag::DataUser), 1);
        assert_eq!(flash.count(FlashOp::Read, FlashTag::DataUser), 2);
        assert_eq!(flash.count_op(FlashOp::Erase), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn same_channel_serializes() {
        let conf = timed_config();
        let flash = SimFlash::new(&conf);
        let data = PageData::Translation { m_vpn: 0 };

        let start = Instant::now();
        futures::join!(
            flash.program_page(0, data, FlashTag::TransCache),
            flash.program_page(1, data, FlashTag::TransCache),
        );
        assert_eq!(device_nanos(start.elapsed()), 200);
        assert_eq!(device_nanos(flash.busy_time(0)), 200);
    }

    #[tokio::test(start_paused = true)]
    async fn channels_run_in_parallel() {
        let conf = timed_config();
        let flash = SimFlash::new(&conf);
        let data = PageData::Translation { m_vpn: 0 };

        let start = Instant::now();
        let other_channel = conf.pages_per_channel();
        futures::join!(
            flash.program_page(0, data, FlashTag::TransCache),
            flash.program_page(other_channel, data, FlashTag::TransCache),
        );
        assert_eq!(device_nanos(start.elapsed()), 100);
    }
}
