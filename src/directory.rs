//! Ground-truth mapping tables: the per-LPN table as it would sit in translation pages,
//! and the directory telling where each translation page currently lives.

use crate::blkpool::BlockPool;
use crate::config::*;
use crate::error::Result;
use crate::oob::OutOfBandArea;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum L2PValue {
    #[default]
    Uninitiated,
    Mapped(PageId),
}

impl L2PValue {
    pub fn ppn(self) -> Option<PageId> {
        match self {
            L2PValue::Mapped(ppn) => Some(ppn),
            L2PValue::Uninitiated => None,
        }
    }

    pub fn is_mapped(self) -> bool {
        matches!(self, L2PValue::Mapped(_))
    }
}

impl From<Option<PageId>> for L2PValue {
    fn from(ppn: Option<PageId>) -> Self {
        ppn.map_or(L2PValue::Uninitiated, L2PValue::Mapped)
    }
}

/// Contents of all translation pages. Only written back by the mapping cache while
/// it holds the translation-page lock of the m_vpn.
#[derive(Debug)]
pub struct MappingOnFlash {
    l2p: Vec<L2PValue>,
}

impl MappingOnFlash {
    pub fn new(conf: &Config) -> Self {
        let mut l2p = Vec::new();
        l2p.resize(conf.logical_pages(), L2PValue::Uninitiated);
        MappingOnFlash { l2p }
    }

    pub fn len(&self) -> usize {
        self.l2p.len()
    }

    pub fn get(&self, lpn: Lpn) -> L2PValue {
        self.l2p[lpn]
    }

    pub fn set(&mut self, lpn: Lpn, value: L2PValue) {
        self.l2p[lpn] = value;
    }

    pub fn get_batch(&self, lpns: impl IntoIterator<Item = Lpn>) -> Vec<(Lpn, L2PValue)> {
        lpns.into_iter().map(|lpn| (lpn, self.l2p[lpn])).collect()
    }

    pub fn set_batch(&mut self, entries: impl IntoIterator<Item = (Lpn, L2PValue)>) {
        for (lpn, value) in entries {
            self.l2p[lpn] = value;
        }
    }
}

/// GTD: m_vpn -> physical page holding its latest snapshot.
#[derive(Debug)]
pub struct GlobalTranslationDirectory {
    mapping: Vec<PageId>,
}

impl GlobalTranslationDirectory {
    /// Reserves one translation page per m_vpn up front, so every lookup is defined
    /// from the first request on.
    pub fn new(
        conf: &Config,
        block_pool: &mut BlockPool,
        oob: &mut OutOfBandArea,
    ) -> Result<Self> {
        let n = conf.total_translation_pages();
        let mut mapping = Vec::with_capacity(n);
        for m_vpn in 0..n {
            let ppn = block_pool.next_translation_page()?;
            oob.relocate(m_vpn, None, ppn, true)?;
            mapping.push(ppn);
        }
        Ok(GlobalTranslationDirectory { mapping })
    }

    pub fn len(&self) -> usize {
        self.mapping.len()
    }

    pub fn lookup(&self, m_vpn: MVpn) -> PageId {
        self.mapping[m_vpn]
    }

    pub fn update(&mut self, m_vpn: MVpn, ppn: PageId) {
        self.mapping[m_vpn] = ppn;
    }
}
