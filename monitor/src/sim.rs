//! # Sync Session Simulator
//!
//! Plays every collaborator a light client wires around its chain index,
//! against one shared [`HashChain`]:
//!
//! ```text
//! tip reporter ── update_server_tip_height ──┐
//!                                            ▼
//! header fetcher ── add_or_replace ───▶ HashChain ── watch_status ──▶ progress display
//!                └─ remove_last (reorg)      │
//!                                            └── observer ──▶ debug log
//! ```
//!
//! Headers are fabricated locally: the hash of height `h` on fork `f` is
//! `blake3(h_le || f_le)`. A reorg rewinds a few headers with `remove_last`
//! and replays the same heights on a new fork id.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::watch;
use tracing::{debug, info};

use hashchain_index::hash::GENESIS_HEIGHT;
use hashchain_index::{BlockHash, ChainStatus, HashChain, PropertyChange};

use crate::cli::RunArgs;

/// Synthetic header hash for `height` on `fork`.
pub fn synthetic_hash(height: u64, fork: u64) -> BlockHash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&height.to_le_bytes());
    hasher.update(&fork.to_le_bytes());
    BlockHash::from_bytes(*hasher.finalize().as_bytes())
}

/// Runs a full sync session and returns the final status.
///
/// Returns once the server has stopped at `target_height` and the index has
/// caught up with it.
pub async fn run(args: &RunArgs) -> Result<ChainStatus> {
    let chain = Arc::new(HashChain::new());
    let observer = chain.subscribe(|change: &PropertyChange| {
        debug!(property = %change.property(), ?change, "chain property changed");
    });

    chain.update_server_tip_height(args.start_server_height);
    chain.add_or_replace(GENESIS_HEIGHT, synthetic_hash(GENESIS_HEIGHT, 0));
    info!(
        start_server_height = args.start_server_height,
        target_height = args.target_height,
        "sync session starting"
    );

    let display = tokio::spawn(display_progress(chain.watch_status(), args.target_height));
    let reporter = tokio::spawn(report_server_tip(Arc::clone(&chain), args.clone()));
    let fetcher = tokio::spawn(fetch_headers(Arc::clone(&chain), args.clone()));

    let (reported, fetched) = tokio::join!(reporter, fetcher);
    reported.context("tip reporter task failed")?;
    let reorgs = fetched.context("header fetcher task failed")?;
    display.await.context("progress display task failed")?;

    chain.unsubscribe(observer);
    let status = chain.status();

    let resolved = chain
        .try_get_height(&status.tip_hash)
        .context("tip hash is missing from the index")?;
    ensure!(
        resolved == status.tip_height,
        "tip hash resolves to height {} but tip height is {}",
        resolved,
        status.tip_height
    );

    info!(
        tip_height = status.tip_height,
        hash_count = status.hash_count,
        reorgs,
        "sync session complete"
    );
    Ok(status)
}

/// Raises the server tip by `server_growth` per tick until `target_height`.
async fn report_server_tip(chain: Arc<HashChain>, args: RunArgs) {
    let mut interval = tokio::time::interval(Duration::from_millis(args.tick_ms));
    let mut height = chain.server_tip_height();

    while height < args.target_height {
        interval.tick().await;
        height = height.saturating_add(args.server_growth).min(args.target_height);
        chain.update_server_tip_height(height);
    }
    debug!(height, "server reached target height");
}

/// Appends headers up to the server tip, occasionally reorganizing the last
/// few. Returns the number of reorgs simulated.
async fn fetch_headers(chain: Arc<HashChain>, args: RunArgs) -> u64 {
    let mut interval = tokio::time::interval(Duration::from_millis(args.tick_ms));
    let mut rng = StdRng::seed_from_u64(args.seed);
    let mut fork = 0u64;
    let mut reorgs = 0u64;

    loop {
        interval.tick().await;

        let status = chain.status();
        if status.server_tip_height >= args.target_height && status.hashes_left == 0 {
            return reorgs;
        }

        if args.max_reorg_depth > 0 && rng.gen_bool(args.reorg_probability) {
            let depth = rng.gen_range(1..=args.max_reorg_depth);
            fork += 1;
            let replayed = reorganize(&chain, depth, fork);
            if replayed > 0 {
                reorgs += 1;
                info!(depth = replayed, fork, "simulated reorg");
            }
        }

        let tip = chain.tip_height();
        let end = tip
            .saturating_add(args.batch_size)
            .min(chain.server_tip_height());
        for height in tip + 1..=end {
            chain.add_or_replace(height, synthetic_hash(height, fork));
        }
    }
}

/// Rewinds up to `depth` headers, never genesis, and replays them on `fork`.
/// Returns how many heights were replaced.
fn reorganize(chain: &HashChain, depth: u64, fork: u64) -> u64 {
    let mut removed = Vec::new();
    while (removed.len() as u64) < depth && chain.hash_count() > 1 {
        match chain.remove_last() {
            Some((height, _)) => removed.push(height),
            None => break,
        }
    }

    for height in removed.iter().rev() {
        chain.add_or_replace(*height, synthetic_hash(*height, fork));
    }
    removed.len() as u64
}

/// Logs progress every ten percent until the server sits at `target` and
/// nothing is left to fetch.
async fn display_progress(mut rx: watch::Receiver<ChainStatus>, target: u64) {
    let mut last_decile = None;

    loop {
        let status = rx.borrow_and_update().clone();
        let decile = (status.progress() * 10.0) as u64;
        if last_decile != Some(decile) {
            last_decile = Some(decile);
            info!(
                tip_height = status.tip_height,
                server_tip_height = status.server_tip_height,
                hashes_left = status.hashes_left,
                progress_pct = (status.progress() * 100.0).round() as u64,
                "sync progress"
            );
        }

        if status.server_tip_height >= target && status.hashes_left == 0 {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}
