//! Per-channel block bookkeeping and striped page allocation.

use std::collections::BTreeMap;
use std::ops::Range;

use log::*;

use crate::config::*;
use crate::error::{ensure_invariant, FtlError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BlockTag {
    Free,
    Data,
    Trans,
}

/// Which free block to open when a current block fills up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EraseChoice {
    LeastErased,
    MostErased,
}

#[derive(Debug, Clone)]
pub struct Block {
    block_id: BlockId,
    tag: BlockTag,
    erase_counter: Counter,
}

impl Block {
    pub fn new(block_id: BlockId) -> Self {
        Block {
            block_id,
            tag: BlockTag::Free,
            erase_counter: 0,
        }
    }

    pub fn tag(&self) -> BlockTag {
        self.tag
    }

    pub fn erase_counter(&self) -> Counter {
        self.erase_counter
    }
}

/// The block a channel is currently programming for one tag.
#[derive(Debug, Clone)]
struct CurrentBlock {
    block_id: BlockId,
    cursor: BaseType, // points to the next page offset
}

impl CurrentBlock {
    fn next_ppns(&mut self, n: BaseType, pages_per_block: BaseType) -> Vec<PageId> {
        let end = (self.cursor + n).min(pages_per_block);
        let base = self.block_id * pages_per_block;
        let ppns = (self.cursor..end).map(|off| base + off).collect();
        self.cursor = end;
        ppns
    }

    fn full(&self, pages_per_block: BaseType) -> bool {
        debug_assert!(self.cursor <= pages_per_block);
        self.cursor == pages_per_block
    }
}

#[derive(Debug)]
struct ChannelPool {
    blocks: Range<BlockId>,
    // indexed by slot(): data, trans
    current: [Option<CurrentBlock>; 2],
}

fn slot(tag: BlockTag) -> Result<usize> {
    match tag {
        BlockTag::Data => Ok(0),
        BlockTag::Trans => Ok(1),
        BlockTag::Free => Err(FtlError::InvariantViolation(
            "pages can only be allocated for data or translation blocks".into(),
        )),
    }
}

#[derive(Debug)]
pub struct BlockPool {
    pages_per_block: BaseType,
    stripe_size: BaseType,
    leveling_factor: f64,
    leveling_diff: Counter,

    blocks: Vec<Block>,
    channels: Vec<ChannelPool>,
    next_channel: ChannelId,
    n_free: Counter,
}

impl BlockPool {
    pub fn new(conf: &Config) -> Self {
        let channels = (0..conf.channels)
            .map(|ch| ChannelPool {
                blocks: ch * conf.blocks_per_channel..(ch + 1) * conf.blocks_per_channel,
                current: [None, None],
            })
            .collect();

        BlockPool {
            pages_per_block: conf.pages_per_block,
            stripe_size: conf.stripe_size,
            leveling_factor: conf.wear_leveling_factor,
            leveling_diff: conf.wear_leveling_diff,
            blocks: (0..conf.blocks_per_dev()).map(Block::new).collect(),
            channels,
            next_channel: 0,
            n_free: conf.blocks_per_dev(),
        }
    }

    pub fn block(&self, block: BlockId) -> &Block {
        &self.blocks[block]
    }

    pub fn tag_of(&self, block: BlockId) -> BlockTag {
        self.blocks[block].tag
    }

    /// Pages for a host write, striped over channels `stripe_size` pages at a time.
    pub fn next_data_pages_striped(&mut self, n: Counter) -> Result<Vec<PageId>> {
        self.next_ppns(n, BlockTag::Data, self.stripe_size, EraseChoice::LeastErased)
    }

    pub fn next_translation_page(&mut self) -> Result<PageId> {
        self.next_page(BlockTag::Trans, EraseChoice::LeastErased)
    }

    pub fn next_gc_data_page(&mut self, choice: EraseChoice) -> Result<PageId> {
        self.next_page(BlockTag::Data, choice)
    }

    pub fn next_gc_translation_page(&mut self, choice: EraseChoice) -> Result<PageId> {
        self.next_page(BlockTag::Trans, choice)
    }

    fn next_page(&mut self, tag: BlockTag, choice: EraseChoice) -> Result<PageId> {
        let ppns = self.next_ppns(1, tag, 1, choice)?;
        Ok(ppns[0])
    }

    /// Walks the channels round-robin, taking up to `stripe_size` pages from each
    /// channel's current block before moving on. Fails once every channel has run
    /// out of free blocks.
    pub fn next_ppns(
        &mut self,
        n: Counter,
        tag: BlockTag,
        stripe_size: BaseType,
        choice: EraseChoice,
    ) -> Result<Vec<PageId>> {
        let slot = slot(tag)?;
        let n_channels = self.channels.len();
        let mut empty_channels = vec![false; n_channels];
        let mut n_empty = 0;

        let mut ppns = Vec::with_capacity(n);
        while ppns.len() < n && n_empty < n_channels {
            let channel = self.next_channel;
            let want = (n - ppns.len()).min(stripe_size);
            let got = self.next_ppns_in_channel(channel, want, tag, slot, choice);
            if got.is_empty() && !empty_channels[channel] {
                empty_channels[channel] = true;
                n_empty += 1;
            }
            ppns.extend(got);
            self.next_channel = (self.next_channel + 1) % n_channels;
        }

        if ppns.len() < n {
            error!(
                "out of space: wanted {} {:?} pages, found {} (free blocks: {})",
                n,
                tag,
                ppns.len(),
                self.n_free
            );
            return Err(FtlError::OutOfSpace { tag });
        }

        Ok(ppns)
    }

    /// Returns what the channel can give; an empty result means the channel is out
    /// of free blocks.
    fn next_ppns_in_channel(
        &mut self,
        channel: ChannelId,
        n: Counter,
        tag: BlockTag,
        slot: usize,
        choice: EraseChoice,
    ) -> Vec<PageId> {
        let mut ppns = Vec::with_capacity(n);
        while ppns.len() < n {
            let pages_per_block = self.pages_per_block;
            let need_block = match &self.channels[channel].current[slot] {
                Some(cur) => cur.full(pages_per_block),
                None => true,
            };
            if need_block {
                match self.pick_and_move(channel, tag, choice) {
                    Some(block_id) => {
                        trace!("channel {} opens {:?} block {}", channel, tag, block_id);
                        self.channels[channel].current[slot] = Some(CurrentBlock {
                            block_id,
                            cursor: 0,
                        });
                    }
                    None => break,
                }
            }

            let want = n - ppns.len();
            if let Some(cur) = self.channels[channel].current[slot].as_mut() {
                ppns.extend(cur.next_ppns(want, pages_per_block));
            }
        }
        ppns
    }

    fn pick_and_move(
        &mut self,
        channel: ChannelId,
        tag: BlockTag,
        choice: EraseChoice,
    ) -> Option<BlockId> {
        let range = self.channels[channel].blocks.clone();
        let free = self.blocks[range].iter().filter(|b| b.tag == BlockTag::Free);
        let picked = match choice {
            EraseChoice::LeastErased => free.min_by_key(|b| (b.erase_counter, b.block_id)),
            EraseChoice::MostErased => {
                free.max_by_key(|b| (b.erase_counter, std::cmp::Reverse(b.block_id)))
            }
        }?
        .block_id;

        self.blocks[picked].tag = tag;
        self.n_free -= 1;
        Some(picked)
    }

    /// Returns an erased DATA or TRANS block to the free pool.
    pub fn reclaim(&mut self, block: BlockId) -> Result<()> {
        let tag = self.blocks[block].tag;
        ensure_invariant!(
            tag != BlockTag::Free,
            "reclaiming block {} which is already free",
            block
        );
        ensure_invariant!(
            !self.current_blocks().contains(&block),
            "reclaiming block {} while it is still being programmed",
            block
        );

        let b = &mut self.blocks[block];
        b.tag = BlockTag::Free;
        b.erase_counter += 1;
        self.n_free += 1;
        Ok(())
    }

    /// Forgets current blocks that have no pages left, making them cleanable.
    pub fn remove_full_current_blocks(&mut self) {
        let pages_per_block = self.pages_per_block;
        for channel in self.channels.iter_mut() {
            for cur in channel.current.iter_mut() {
                if cur.as_ref().is_some_and(|c| c.full(pages_per_block)) {
                    *cur = None;
                }
            }
        }
    }

    pub fn current_blocks(&self) -> Vec<BlockId> {
        self.channels
            .iter()
            .flat_map(|ch| ch.current.iter().flatten().map(|cur| cur.block_id))
            .collect()
    }

    pub fn count_blocks(&self, tag: BlockTag) -> Counter {
        if tag == BlockTag::Free {
            return self.n_free;
        }
        self.blocks.iter().filter(|b| b.tag == tag).count()
    }

    pub fn blocks_of_tag(&self, tag: BlockTag) -> Vec<BlockId> {
        self.blocks
            .iter()
            .filter(|b| b.tag == tag)
            .map(|b| b.block_id)
            .collect()
    }

    pub fn data_used_blocks(&self) -> Vec<BlockId> {
        self.blocks_of_tag(BlockTag::Data)
    }

    pub fn trans_used_blocks(&self) -> Vec<BlockId> {
        self.blocks_of_tag(BlockTag::Trans)
    }

    pub fn used_blocks(&self) -> Vec<BlockId> {
        let mut blocks = self.data_used_blocks();
        blocks.extend(self.trans_used_blocks());
        blocks
    }

    pub fn num_free_blocks(&self) -> Counter {
        self.n_free
    }

    pub fn total_used_blocks(&self) -> Counter {
        self.blocks.len() - self.n_free
    }

    pub fn used_ratio(&self) -> f64 {
        self.total_used_blocks() as f64 / self.blocks.len() as f64
    }

    /// Erase count -> number of blocks erased that many times.
    pub fn erasure_count_dist(&self) -> BTreeMap<Counter, Counter> {
        let mut dist = BTreeMap::new();
        for b in &self.blocks {
            *dist.entry(b.erase_counter).or_insert(0) += 1;
        }
        dist
    }

    /// (max / min, max - min) over all erase counters.
    pub fn wear_status(&self) -> (f64, Counter) {
        let max = self.blocks.iter().map(|b| b.erase_counter).max().unwrap_or(0);
        let min = self.blocks.iter().map(|b| b.erase_counter).min().unwrap_or(0);
        let factor = max as f64 / min.max(1) as f64;
        (factor, max - min)
    }

    pub fn need_wear_leveling(&self) -> bool {
        let (factor, diff) = self.wear_status();
        factor > self.leveling_factor && diff > self.leveling_diff
    }

    #[cfg(test)]
    pub(crate) fn set_erase_counter(&mut self, block: BlockId, count: Counter) {
        self.blocks[block].erase_counter = count;
    }
}
