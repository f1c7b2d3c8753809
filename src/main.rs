#![allow(dead_code)]

mod blkpool;
mod cache;
mod cleaner;
mod config;
mod device;
mod directory;
mod error;
mod flash;
mod ftl;
mod host;
mod oob;

#[macro_use]
extern crate log;

use anyhow::Context;
use byte_unit::Byte;
use clap::Parser;
use simplelog::{ConfigBuilder, LevelFilter, SimpleLogger};
use time::macros::format_description;

use crate::config::*;
use crate::flash::{FlashOp, SimFlash};
use crate::ftl::Ftl;
use crate::host::{random_writes, replay, sequential_fill};

/// Replays a random-write workload against a simulated DFTL drive.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    #[arg(long, default_value_t = PAGE_SIZE)]
    page_size: BaseType,

    #[arg(long, default_value_t = PAGES_PER_BLOCK)]
    pages_per_block: BaseType,

    #[arg(long, default_value_t = 256)]
    blocks_per_channel: BaseType,

    #[arg(long, default_value_t = CHANNELS)]
    channels: BaseType,

    /// Mapping cache size in translation pages.
    #[arg(long, default_value_t = 4)]
    cache_pages: BaseType,

    /// Times the user capacity is randomly overwritten after preconditioning.
    #[arg(long, default_value_t = 2)]
    rounds: Counter,

    /// Requests in flight.
    #[arg(long, default_value_t = 8)]
    depth: usize,

    #[arg(long, default_value_t = 7)]
    seed: u64,

    #[arg(long)]
    wear_leveling: bool,

    #[arg(long, default_value_t = LevelFilter::Info)]
    log_level: LevelFilter,
}

impl Args {
    fn config(&self) -> Config {
        let mut conf = Config {
            page_size: self.page_size,
            pages_per_block: self.pages_per_block,
            blocks_per_channel: self.blocks_per_channel,
            channels: self.channels,
            do_wear_leveling: self.wear_leveling,
            ..Config::default()
        };
        conf.cache_entries = self.cache_pages * conf.entries_per_page();
        conf.min_spare_blocks = conf.min_spare_blocks.min(conf.blocks_per_dev() / 32);
        conf
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_cfg = ConfigBuilder::new()
        .set_time_format_custom(format_description!("[hour]:[minute]:[second].[subsecond]"))
        .build();
    SimpleLogger::init(args.log_level, log_cfg)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .start_paused(true)
        .build()?;
    runtime.block_on(run(args))
}

async fn run(args: Args) -> anyhow::Result<()> {
    let conf = args.config();
    let flash = SimFlash::new(&conf);
    let fw = Ftl::new(conf, flash).context("invalid drive configuration")?;
    let user_pages = fw.config().user_pages();

    replay(&fw, sequential_fill(user_pages, 64), args.depth)
        .await
        .context("preconditioning failed")?;
    info!("Drive preconditioned");

    for round in 0..args.rounds {
        let events = random_writes(user_pages, user_pages, args.seed + round as u64);
        let stats = replay(&fw, events, args.depth)
            .await
            .with_context(|| format!("random write round {}", round))?;
        info!(
            "Capacity {} randomly written in {} ns",
            round,
            device_nanos(stats.elapsed)
        );
    }

    fw.flush_trans_cache().await?;

    let traffic = fw.snapshot_user_traffic().traffic;
    let flash = fw.flash();
    let programs = flash.count_op(FlashOp::Program);
    info!(
        "Host wrote {}, flash programmed {} pages, write amplification {:.2}",
        Byte::from(traffic.written_bytes).get_appropriate_unit(true).to_string(),
        programs,
        (programs * fw.config().page_size) as f64 / traffic.written_bytes.max(1) as f64
    );
    info!("Flash ops: {:?}", flash.counters());
    info!("Cache: {:?}", fw.cache_counters());
    info!("Cleaner: {:?}", fw.cleaner_counters());
    fw.snapshot_valid_ratios();
    fw.snapshot_erasure_count_dist();

    Ok(())
}
