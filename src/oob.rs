//! Out-of-band metadata kept alongside every physical page.

use bitvec::prelude::*;
use log::*;

use crate::config::*;
use crate::error::{ensure_invariant, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageState {
    Erased,
    Valid,
    Invalid,
}

// Two bits per page: 00 erased, 01 valid, 10 invalid.
const VALID_BIT: usize = 1;
const INVALID_BIT: usize = 0;

#[derive(Debug)]
pub struct OutOfBandArea {
    pages_per_block: BaseType,
    states: BitVec,
    valid_pages: Vec<Counter>,
    // lpn for data pages, m_vpn for translation pages
    owners: Vec<Option<BaseType>>,
    // Only programming advances a timestamp. Host data gets a fresh stamp,
    // relocated data keeps the stamp of its source page.
    timestamps: Vec<Option<u64>>,
    cur_timestamp: u64,
}

impl OutOfBandArea {
    pub fn new(conf: &Config) -> Self {
        let total = conf.total_pages();
        OutOfBandArea {
            pages_per_block: conf.pages_per_block,
            states: bitvec![0; 2 * total],
            valid_pages: vec![0; conf.blocks_per_dev()],
            owners: vec![None; total],
            timestamps: vec![None; total],
            cur_timestamp: 0,
        }
    }

    pub fn state(&self, ppn: PageId) -> PageState {
        match (self.states[2 * ppn + VALID_BIT], self.states[2 * ppn + INVALID_BIT]) {
            (false, false) => PageState::Erased,
            (true, _) => PageState::Valid,
            (false, true) => PageState::Invalid,
        }
    }

    fn set_state(&mut self, ppn: PageId, state: PageState) {
        let (valid, invalid) = match state {
            PageState::Erased => (false, false),
            PageState::Valid => (true, false),
            PageState::Invalid => (false, true),
        };
        self.states.set(2 * ppn + VALID_BIT, valid);
        self.states.set(2 * ppn + INVALID_BIT, invalid);
    }

    pub fn is_page_valid(&self, ppn: PageId) -> bool {
        self.state(ppn) == PageState::Valid
    }

    pub fn owner(&self, ppn: PageId) -> Option<BaseType> {
        self.owners[ppn]
    }

    pub fn timestamp(&self, ppn: PageId) -> Option<u64> {
        self.timestamps[ppn]
    }

    fn block_of(&self, ppn: PageId) -> BlockId {
        ppn / self.pages_per_block
    }

    fn next_timestamp(&mut self) -> u64 {
        let t = self.cur_timestamp;
        self.cur_timestamp += 1;
        t
    }

    /// Marks `new_ppn` valid and owned by `id`, then invalidates `old_ppn` if any.
    /// With `fresh_timestamp` unset the new page inherits the old page's stamp, which
    /// is how relocations by the cleaner are told apart from host writes.
    pub fn relocate(
        &mut self,
        id: BaseType,
        old_ppn: Option<PageId>,
        new_ppn: PageId,
        fresh_timestamp: bool,
    ) -> Result<()> {
        ensure_invariant!(
            self.state(new_ppn) == PageState::Erased,
            "page {} programmed for {} is {:?}, not erased",
            new_ppn,
            id,
            self.state(new_ppn)
        );

        let stamp = match old_ppn {
            Some(old) if !fresh_timestamp => self.timestamps[old],
            _ => Some(self.next_timestamp()),
        };
        self.timestamps[new_ppn] = stamp;

        let block = self.block_of(new_ppn);
        self.set_state(new_ppn, PageState::Valid);
        self.valid_pages[block] += 1;
        self.owners[new_ppn] = Some(id);

        if let Some(old) = old_ppn {
            self.invalidate(old)?;
        }
        Ok(())
    }

    pub fn invalidate(&mut self, ppn: PageId) -> Result<()> {
        ensure_invariant!(
            self.state(ppn) == PageState::Valid,
            "invalidating page {} which is {:?}",
            ppn,
            self.state(ppn)
        );
        self.set_state(ppn, PageState::Invalid);
        let block = self.block_of(ppn);
        self.valid_pages[block] -= 1;
        Ok(())
    }

    pub fn invalidate_ppns(&mut self, ppns: &[PageId]) -> Result<()> {
        for &ppn in ppns {
            self.invalidate(ppn)?;
        }
        Ok(())
    }

    /// A programmed page that never became live, e.g. a relocated copy whose
    /// source was overwritten in the meantime.
    pub fn discard_unused(&mut self, ppn: PageId) -> Result<()> {
        ensure_invariant!(
            self.state(ppn) == PageState::Erased,
            "discarding page {} which is {:?}",
            ppn,
            self.state(ppn)
        );
        self.set_state(ppn, PageState::Invalid);
        Ok(())
    }

    pub fn erase_block(&mut self, block: BlockId) {
        let start = block * self.pages_per_block;
        let end = start + self.pages_per_block;
        self.states[2 * start..2 * end].fill(false);
        for ppn in start..end {
            self.owners[ppn] = None;
            self.timestamps[ppn] = None;
        }
        self.valid_pages[block] = 0;
        trace!("oob of block {} erased", block);
    }

    pub fn valid_count(&self, block: BlockId) -> Counter {
        self.valid_pages[block]
    }

    pub fn valid_ratio(&self, block: BlockId) -> f64 {
        self.valid_pages[block] as f64 / self.pages_per_block as f64
    }

    /// Pages of the block not yet programmed, or programmed but not yet accounted.
    pub fn erased_count(&self, block: BlockId) -> Counter {
        let start = 2 * block * self.pages_per_block;
        let end = start + 2 * self.pages_per_block;
        self.pages_per_block - self.states[start..end].count_ones()
    }
}
