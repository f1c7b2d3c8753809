//! State shared by the mapping cache, the cleaner and the host paths of one
//! simulated drive.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use log::*;
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};

use crate::blkpool::BlockPool;
use crate::config::*;
use crate::directory::GlobalTranslationDirectory;
use crate::error::Result;
use crate::flash::Flash;
use crate::oob::OutOfBandArea;

/// Exclusive locks indexed by m_vpn. Each lock is created on first use and lives as
/// long as the pool. The pool also knows which m_vpns are held right now.
pub struct LockPool {
    locks: Vec<OnceLock<AsyncMutex<()>>>,
    // m_vpn -> holders; only ever 0 or 1 but kept as a count to catch misuse
    held: Mutex<BTreeMap<MVpn, Counter>>,
}

pub struct LockPoolGuard<'a> {
    pool: &'a LockPool,
    m_vpn: MVpn,
    _guard: AsyncMutexGuard<'a, ()>,
}

impl LockPool {
    pub fn new(n: BaseType) -> Self {
        LockPool {
            locks: (0..n).map(|_| OnceLock::new()).collect(),
            held: Mutex::new(BTreeMap::new()),
        }
    }

    pub async fn lock(&self, m_vpn: MVpn) -> LockPoolGuard<'_> {
        let lock = self.locks[m_vpn].get_or_init(|| AsyncMutex::new(()));
        let guard = lock.lock().await;
        *self.held.lock().entry(m_vpn).or_insert(0) += 1;
        LockPoolGuard {
            pool: self,
            m_vpn,
            _guard: guard,
        }
    }

    pub fn is_locked(&self, m_vpn: MVpn) -> bool {
        self.held.lock().contains_key(&m_vpn)
    }

    pub fn locked(&self) -> Vec<MVpn> {
        self.held.lock().keys().copied().collect()
    }
}

impl Drop for LockPoolGuard<'_> {
    fn drop(&mut self) {
        let mut held = self.pool.held.lock();
        if let Some(n) = held.get_mut(&self.m_vpn) {
            *n -= 1;
            if *n == 0 {
                held.remove(&self.m_vpn);
            }
        }
    }
}

/// Flash, block allocation and page metadata of one drive. The synchronous parts
/// sit behind `parking_lot` mutexes that are never held across an await.
pub struct Device<F> {
    pub conf: Config,
    pub flash: F,
    pub block_pool: Mutex<BlockPool>,
    pub oob: Mutex<OutOfBandArea>,
    pub directory: Mutex<GlobalTranslationDirectory>,
    /// Serializes loads, write-backs and relocation of each translation page.
    pub trans_page_locks: LockPool,
}

impl<F: Flash> Device<F> {
    pub fn new(conf: Config, flash: F) -> Result<Self> {
        conf.validate()?;

        let mut block_pool = BlockPool::new(&conf);
        let mut oob = OutOfBandArea::new(&conf);
        let directory = GlobalTranslationDirectory::new(&conf, &mut block_pool, &mut oob)?;
        debug!(
            "directory holds {} translation pages in {} blocks",
            directory.len(),
            block_pool.trans_used_blocks().len()
        );

        Ok(Device {
            trans_page_locks: LockPool::new(conf.total_translation_pages()),
            conf,
            flash,
            block_pool: Mutex::new(block_pool),
            oob: Mutex::new(oob),
            directory: Mutex::new(directory),
        })
    }

    pub fn used_ratio(&self) -> f64 {
        self.block_pool.lock().used_ratio()
    }
}
