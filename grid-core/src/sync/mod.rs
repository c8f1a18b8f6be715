//! The Sync Engine (spec §4.6): reconciles the in-memory grid against
//! what the chain actually reports, in both directions.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::accountant::Accountant;
use crate::config::SidePair;
use crate::core::{ChainOrderId, GridId, Side, SlotState, SlotType};
use crate::errors::CoreError;
use crate::precision::{compare_sizes, price_tolerance};
use crate::state_machine::{FundEffect, StateMachine};

/// One order as reported by `ChainAdapter::read_open_orders`.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenChainOrder {
    pub order_id: ChainOrderId,
    pub side: Side,
    pub price: Decimal,
    pub remaining_size: Decimal,
}

/// One fill as reported by `ChainAdapter::subscribe_fills` or a history
/// backfill.
#[derive(Debug, Clone, PartialEq)]
pub struct FillEvent {
    pub fill_id: ChainOrderId,
    pub order_id: ChainOrderId,
    pub side: Side,
    pub price: Decimal,
    pub filled_size: Decimal,
}

/// What `sync_from_open_orders` changed, for logging/metrics by the
/// caller.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub matched: usize,
    pub price_corrected: usize,
    pub size_corrected: usize,
    pub claimed_untracked: usize,
    pub marked_missing: usize,
}

/// Bounded-window dedup set for fill ids, grounded on the gap detector's
/// evict-by-age pattern: entries older than `window` are dropped on
/// every `seen` call rather than scanned by a background task.
pub struct FillDedup {
    window: Duration,
    seen: Vec<(ChainOrderId, Instant)>,
}

impl FillDedup {
    pub fn new(window: Duration) -> Self {
        FillDedup { window, seen: Vec::new() }
    }

    /// Returns `true` if `fill_id` had not been seen within the window
    /// (and records it), `false` if it's a duplicate.
    pub fn seen(&mut self, fill_id: ChainOrderId, now: Instant) -> bool {
        self.seen.retain(|(_, stamp)| now.duration_since(*stamp) < self.window);
        if self.seen.iter().any(|(id, _)| *id == fill_id) {
            return false;
        }
        self.seen.push((fill_id, now));
        true
    }
}

impl Default for FillDedup {
    fn default() -> Self {
        // Spec's fill-history backfill and live subscription can overlap
        // by a few seconds around bot restart; 5s covers that overlap
        // without growing unbounded.
        Self::new(Duration::from_secs(5))
    }
}

/// Six-pass reconciliation of open chain orders against the in-memory
/// grid (spec §4.6a).
///
/// Pass 1: match chain orders to slots by `order_id`, correcting price
///         drift and size drift in place. Price outside `price_tolerance`
///         wins over a size correction: size is left untouched and the
///         slot is queued for re-placement at the right price.
/// Pass 2: chain orders with no matching slot (untracked) are claimed by
///         the nearest-price Virtual slot of the matching side, if one
///         exists; otherwise queued as orphaned.
/// Pass 3: slots claiming an order_id absent from the chain's open-order
///         list are demoted to a Spread placeholder (the order must have
///         filled or been cancelled externally).
/// Pass 4: reconcile active+partial counts per side against `targets`:
///         surplus (above target) queues the worst-matching (outermost)
///         slots in `orders_pending_cancellation`; shortage (below
///         target) retries claiming still-orphaned chain orders from
///         pass 2 into Virtual slots freed up by pass 3's demotions.
/// Pass 5: slots in Active/Partial with no order_id at all (a prior
///         crash mid-placement) are queued in
///         `orders_needing_price_correction` for re-placement.
/// Pass 6: `assert_index_consistency` runs last, after every mutation.
pub fn sync_from_open_orders(
    sm: &mut StateMachine,
    accountant: &mut Accountant,
    open_orders: &[OpenChainOrder],
    price_precision: u32,
    quote_precision: u32,
    targets: SidePair<u32>,
) -> Result<SyncReport, CoreError> {
    let mut report = SyncReport::default();
    let open_ids: HashSet<ChainOrderId> = open_orders.iter().map(|o| o.order_id).collect();

    // Pass 1: match and correct.
    let mut claimed: HashSet<ChainOrderId> = HashSet::new();
    let slot_ids: Vec<GridId> = sm.slots().keys().copied().collect();
    for id in &slot_ids {
        let Some(slot) = sm.get(*id) else { continue };
        let Some(order_id) = slot.order_id else { continue };
        let Some(chain_order) = open_orders.iter().find(|o| o.order_id == order_id) else {
            continue;
        };
        claimed.insert(order_id);

        let tolerance = price_tolerance(
            slot.price,
            chain_order.remaining_size,
            slot.side().unwrap_or(chain_order.side),
            Some(price_precision),
            Some(quote_precision),
        )
        .unwrap_or(Decimal::ZERO);
        let price_drifted = (slot.price - chain_order.price).abs() > tolerance;
        let size_drifted = compare_sizes(slot.size, chain_order.remaining_size, price_precision)
            .unwrap_or(std::cmp::Ordering::Equal)
            != std::cmp::Ordering::Equal;

        if !price_drifted && !size_drifted {
            report.matched += 1;
            continue;
        }

        let mut corrected = slot.clone();
        if price_drifted {
            sm.orders_needing_price_correction.push(*id);
            corrected.state = SlotState::Active;
            report.price_corrected += 1;
        } else if size_drifted {
            corrected.size = chain_order.remaining_size;
            corrected.state = if chain_order.remaining_size < corrected.ideal_size {
                SlotState::Partial
            } else {
                SlotState::Active
            };
            report.size_corrected += 1;
        }
        sm.upsert_order(corrected, FundEffect::None, accountant)?;
    }

    // Pass 2: claim untracked chain orders into the nearest Virtual slot.
    for chain_order in open_orders {
        if claimed.contains(&chain_order.order_id) {
            continue;
        }
        let candidate = sm
            .slots()
            .values()
            .filter(|s| s.state == SlotState::Virtual && s.side() == Some(chain_order.side))
            .min_by_key(|s| (s.price - chain_order.price).abs());

        if let Some(candidate) = candidate {
            let mut claimed_slot = candidate.clone();
            claimed_slot.order_id = Some(chain_order.order_id);
            claimed_slot.size = chain_order.remaining_size;
            claimed_slot.state = if chain_order.remaining_size < claimed_slot.ideal_size {
                SlotState::Partial
            } else {
                SlotState::Active
            };
            accountant.note_reused_order(chain_order.order_id);
            sm.upsert_order(claimed_slot, FundEffect::None, accountant)?;
            report.claimed_untracked += 1;
        } else {
            warn!(order_id = %chain_order.order_id, "untracked chain order has no claimable slot; queuing cancellation");
            sm.orphaned_chain_orders.push(chain_order.order_id);
        }
    }

    // Pass 3: demote slots whose order vanished from the chain's open list.
    // The order filled or was cancelled externally; it becomes a SPREAD
    // placeholder rather than reverting to its original side so rotation
    // and consolidation have it available as a target again.
    for id in &slot_ids {
        let Some(slot) = sm.get(*id) else { continue };
        let Some(order_id) = slot.order_id else { continue };
        if open_ids.contains(&order_id) {
            continue;
        }
        let mut demoted = slot.clone();
        demoted.order_id = None;
        demoted.size = Decimal::ZERO;
        demoted.state = SlotState::Virtual;
        demoted.slot_type = SlotType::Spread;
        sm.upsert_order(demoted, FundEffect::None, accountant)?;
        report.marked_missing += 1;
    }

    // Pass 4: surplus/shortage reconciliation per side against `targets`.
    let mut deficit = SidePair { buy: 0usize, sell: 0usize };
    for side in [Side::Buy, Side::Sell] {
        let mut matched_ids: Vec<GridId> = sm
            .slots()
            .values()
            .filter(|s| s.side() == Some(side) && matches!(s.state, SlotState::Active | SlotState::Partial))
            .map(|s| s.id)
            .collect();
        let target = match side {
            Side::Buy => targets.buy,
            Side::Sell => targets.sell,
        } as usize;

        if matched_ids.len() > target {
            let surplus = matched_ids.len() - target;
            matched_ids.sort_by(|a, b| {
                let pa = sm.get(*a).map(|s| s.price).unwrap_or_default();
                let pb = sm.get(*b).map(|s| s.price).unwrap_or_default();
                match side {
                    Side::Buy => pa.cmp(&pb),
                    Side::Sell => pb.cmp(&pa),
                }
            });
            sm.orders_pending_cancellation.extend(matched_ids.into_iter().take(surplus));
        } else {
            let remaining = target - matched_ids.len();
            match side {
                Side::Buy => deficit.buy = remaining,
                Side::Sell => deficit.sell = remaining,
            }
        }
    }

    if deficit.buy > 0 || deficit.sell > 0 {
        let mut still_orphaned = Vec::new();
        for order_id in std::mem::take(&mut sm.orphaned_chain_orders) {
            let Some(chain_order) = open_orders.iter().find(|o| o.order_id == order_id) else {
                still_orphaned.push(order_id);
                continue;
            };
            let side_deficit = match chain_order.side {
                Side::Buy => &mut deficit.buy,
                Side::Sell => &mut deficit.sell,
            };
            if *side_deficit == 0 {
                still_orphaned.push(order_id);
                continue;
            }

            // Pass 2 already exhausted same-side Virtual candidates, so
            // the only pool left is the SPREAD placeholders freed up by
            // pass 3's demotions (or left over from grid generation);
            // claiming one converts it to this order's side.
            let candidate = sm
                .slots()
                .values()
                .filter(|s| s.state == SlotState::Virtual && s.slot_type == SlotType::Spread)
                .min_by_key(|s| (s.price - chain_order.price).abs())
                .cloned();

            match candidate {
                Some(mut claimed_slot) => {
                    claimed_slot.slot_type = match chain_order.side {
                        Side::Buy => SlotType::Buy,
                        Side::Sell => SlotType::Sell,
                    };
                    claimed_slot.order_id = Some(chain_order.order_id);
                    claimed_slot.size = chain_order.remaining_size;
                    claimed_slot.state = if chain_order.remaining_size < claimed_slot.ideal_size {
                        SlotState::Partial
                    } else {
                        SlotState::Active
                    };
                    sm.upsert_order(claimed_slot, FundEffect::None, accountant)?;
                    report.claimed_untracked += 1;
                    *side_deficit -= 1;
                }
                None => still_orphaned.push(order_id),
            }
        }
        sm.orphaned_chain_orders = still_orphaned;
    }

    // Pass 5: Active/Partial slots with no order_id need re-placement.
    for id in &slot_ids {
        let Some(slot) = sm.get(*id) else { continue };
        if matches!(slot.state, SlotState::Active | SlotState::Partial) && slot.order_id.is_none() {
            sm.orders_needing_price_correction.push(*id);
        }
    }

    // Pass 6.
    sm.assert_index_consistency()?;

    info!(
        matched = report.matched,
        price_corrected = report.price_corrected,
        size_corrected = report.size_corrected,
        claimed_untracked = report.claimed_untracked,
        marked_missing = report.marked_missing,
        "sync_from_open_orders complete"
    );

    Ok(report)
}

/// Direct-match reconciliation against fill history (spec §4.6b): each
/// fill is matched to its originating slot by `order_id`, deduplicated
/// against `dedup`, and returned for the caller (typically the strategy
/// engine) to post proceeds and trigger rebalance-after-fill.
pub fn sync_from_fill_history(
    sm: &StateMachine,
    fills: &[FillEvent],
    dedup: &mut FillDedup,
    now: Instant,
) -> Vec<FillEvent> {
    let mut applicable = Vec::new();
    for fill in fills {
        if !dedup.seen(fill.fill_id, now) {
            continue;
        }
        if sm.get_slot_for_order(fill.order_id).is_none() {
            warn!(order_id = %fill.order_id, "fill references an order not tracked by any slot, skipping");
            continue;
        }
        applicable.push(fill.clone());
    }
    applicable
}
