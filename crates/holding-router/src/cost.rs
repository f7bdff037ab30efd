use chrono::{DateTime, Local, NaiveDate, TimeZone, Utc};
use holding_core::HoldingResult;
use holding_store::{CostSummaryRow, Store};
use std::sync::Arc;

/// Read-side view over the cost log.
#[derive(Clone)]
pub struct CostTracker {
    store: Arc<dyn Store>,
}

/// UTC instant at which local `date` begins.
pub fn start_of_local_day(date: NaiveDate) -> DateTime<Utc> {
    date.and_hms_opt(0, 0, 0)
        .and_then(|midnight| Local.from_local_datetime(&midnight).earliest())
        .map_or_else(
            || Utc.from_utc_datetime(&date.and_time(chrono::NaiveTime::default())),
            |local| local.with_timezone(&Utc),
        )
}

impl CostTracker {
    /// Creates a tracker reading from `store`.
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Costs grouped by tenant, agent and model.
    pub async fn summary(&self, tenant_id: Option<&str>) -> HoldingResult<Vec<CostSummaryRow>> {
        self.store.cost_summary(tenant_id).await
    }

    /// Total estimated cost.
    pub async fn total_cost(&self, tenant_id: Option<&str>) -> HoldingResult<f64> {
        Ok(self
            .summary(tenant_id)
            .await?
            .iter()
            .map(|r| r.cost_usd)
            .sum())
    }

    /// Total number of successful calls.
    pub async fn total_calls(&self, tenant_id: Option<&str>) -> HoldingResult<u64> {
        Ok(self
            .summary(tenant_id)
            .await?
            .iter()
            .map(|r| r.call_count)
            .sum())
    }

    /// Spend recorded since local midnight of `today`, across all tenants.
    pub async fn spent_on(&self, today: NaiveDate) -> HoldingResult<f64> {
        self.store.total_cost_since(start_of_local_day(today)).await
    }
}
