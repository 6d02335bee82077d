use std::time::Duration;

use tokio::time::sleep;
use tracing::info;

use crate::dto::{BackfillDayResult, BackfillStatus, CurrentGoldData, Karat};
use crate::helpers::{calculate_price_change, date_key_days_ago};
use crate::implementation::GoldPriceSource;
use crate::store::PriceStore;

/// Delay between consecutive upstream calls during a backfill, to respect
/// the provider's rate limits.
const BACKFILL_CALL_DELAY: Duration = Duration::from_millis(500);

/// Pull a fresh snapshot, stamp per-karat day-over-day changes against the
/// latest stored historical point, and persist the snapshot. This is the
/// on-demand refresh behind the current-price endpoint; it does not touch
/// the historical series.
pub async fn refresh_snapshot(source: &GoldPriceSource, store: &PriceStore) -> CurrentGoldData {
    let mut snapshot = source.fetch_current().await;

    for karat in Karat::ALL {
        let Some(entry) = snapshot.prices.get(&karat).cloned() else {
            continue;
        };
        // With no prior point the previous price defaults to the current one,
        // yielding a zero change rather than an undefined percentage.
        let previous = store
            .get_last_historical_point(karat)
            .await
            .map(|point| point.price)
            .unwrap_or(entry.gram);
        let movement = calculate_price_change(entry.gram, previous);
        if let Some(entry) = snapshot.prices.get_mut(&karat) {
            entry.change = Some(movement.change);
            entry.change_percent = Some(movement.change_percent);
        }
    }

    store.set_current(&snapshot).await;
    snapshot
}

/// The scheduled refresh routine: persist a fresh snapshot and append one
/// historical point per karat.
///
/// Repeated invocations within the same timestamp append duplicate points;
/// that is accepted, the series tolerates duplicates.
pub async fn refresh_current(source: &GoldPriceSource, store: &PriceStore) -> CurrentGoldData {
    let snapshot = refresh_snapshot(source, store).await;

    for karat in Karat::ALL {
        if let Some(entry) = snapshot.prices.get(&karat) {
            store
                .add_historical_point(karat, snapshot.timestamp, entry.gram)
                .await;
        }
    }

    info!(date = %snapshot.date, "current gold prices refreshed");
    snapshot
}

/// Backfill up to `min(days, limit)` past days of history starting `offset`
/// days back. Per-day failures are recorded and do not abort the remaining
/// days.
pub async fn backfill(
    source: &GoldPriceSource,
    store: &PriceStore,
    days: usize,
    offset: usize,
    limit: usize,
) -> Vec<BackfillDayResult> {
    let to_process = days.min(limit);
    let mut results = Vec::with_capacity(to_process);

    info!(days = to_process, offset, "starting historical backfill");

    for step in 0..to_process {
        let date_key = date_key_days_ago((offset + step) as i64);

        match source.fetch_historical(&date_key).await {
            Some(snapshot) => {
                for karat in Karat::ALL {
                    if let Some(entry) = snapshot.prices.get(&karat) {
                        store
                            .add_historical_point(karat, snapshot.timestamp, entry.gram)
                            .await;
                    }
                }
                results.push(BackfillDayResult {
                    date: date_key,
                    status: BackfillStatus::Success,
                    price: snapshot.prices.get(&Karat::K24).map(|entry| entry.gram),
                    error: None,
                });
            }
            None => {
                results.push(BackfillDayResult {
                    date: date_key,
                    status: BackfillStatus::Failed,
                    price: None,
                    error: Some("no data returned".to_string()),
                });
            }
        }

        if step + 1 < to_process {
            sleep(BACKFILL_CALL_DELAY).await;
        }
    }

    results
}
