//! Periodic garbage collection. The admin endpoints stay the authoritative
//! triggers; this pass just keeps an unattended deployment from accumulating
//! expired accounts, dead orders and settled withdrawal batches.

use crate::exchange::Exchange;
use anyhow::Result;
use chrono::{Duration, Utc};

/// How long settled withdrawal batches are kept around for auditing before
/// the cleaner deletes them.
const SETTLED_WITHDRAWAL_RETENTION_DAYS: i64 = 30;

impl Exchange {
    /// One garbage collection pass over everything the ledger is allowed to
    /// forget: expired accounts, orders that can never match again, expired
    /// fulfillments and withdrawal batches settled longer ago than the
    /// retention window. Batches still in processing are never touched here;
    /// they wait for reconciliation.
    pub async fn run_maintenance(&self) -> Result<()> {
        let pruned = self.prune_accounts().await?;
        if !pruned.is_empty() {
            tracing::info!(count = pruned.len(), "pruned expired accounts");
        }
        let (sell_orders, fulfilled_orders) = self.batch_prune_fulfilled_orders().await?;
        if sell_orders + fulfilled_orders > 0 {
            tracing::info!(sell_orders, fulfilled_orders, "pruned dead orders");
        }
        let cutoff = Utc::now() - Duration::days(SETTLED_WITHDRAWAL_RETENTION_DAYS);
        let cleaned = self.clean_old_withdrawals(cutoff).await?;
        if !cleaned.is_empty() {
            tracing::info!(count = cleaned.len(), "cleaned settled withdrawal batches");
        }
        Ok(())
    }
}
