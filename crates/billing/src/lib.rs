use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Datelike, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// `tasks_included` value meaning the plan is unmetered.
pub const UNMETERED: i64 = -1;

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("unknown plan {0:?}")]
    UnknownPlan(String),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub tasks_included: i64,
    pub overage_per_task_cents: i64,
    pub monthly_price_cents: i64,
}

impl Plan {
    pub fn is_unmetered(&self) -> bool {
        self.tasks_included == UNMETERED
    }

    pub fn allows_overage(&self) -> bool {
        self.overage_per_task_cents > 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Trialing,
    PastDue,
    Canceled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub tenant_id: Uuid,
    pub plan_id: String,
    pub status: SubscriptionStatus,
    pub current_period_start: DateTime<Utc>,
    pub current_period_end: DateTime<Utc>,
}

impl Subscription {
    /// Whether the subscription currently entitles the tenant to its plan.
    pub fn is_entitled(&self) -> bool {
        matches!(
            self.status,
            SubscriptionStatus::Active | SubscriptionStatus::Trialing
        )
    }
}

/// The plan catalogue. The free tier is what tenants without a paid
/// subscription fall back to.
#[derive(Debug, Clone)]
pub struct PlanCatalog {
    plans: HashMap<String, Plan>,
    free_plan_id: String,
}

impl Default for PlanCatalog {
    fn default() -> Self {
        Self::new(
            vec![
                Plan {
                    id: "free".to_string(),
                    tasks_included: 10,
                    overage_per_task_cents: 0,
                    monthly_price_cents: 0,
                },
                Plan {
                    id: "pro".to_string(),
                    tasks_included: 200,
                    overage_per_task_cents: 50,
                    monthly_price_cents: 4900,
                },
                Plan {
                    id: "scale".to_string(),
                    tasks_included: UNMETERED,
                    overage_per_task_cents: 0,
                    monthly_price_cents: 19900,
                },
            ],
            "free",
        )
    }
}

impl PlanCatalog {
    pub fn new(plans: Vec<Plan>, free_plan_id: &str) -> Self {
        Self {
            plans: plans.into_iter().map(|p| (p.id.clone(), p)).collect(),
            free_plan_id: free_plan_id.to_string(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&Plan> {
        self.plans.get(id)
    }

    pub fn free_plan(&self) -> &Plan {
        &self.plans[&self.free_plan_id]
    }
}

/// Lookup contract implemented by the billing collaborator.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    async fn subscription_for_tenant(
        &self,
        tenant_id: Uuid,
    ) -> Result<Option<Subscription>, BillingError>;

    /// Usage within the period. Summed quantity, served under a
    /// count-shaped name; quantity is 1 per task today.
    async fn usage_count(
        &self,
        tenant_id: Uuid,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> Result<i64, BillingError>;
}

/// The admission predicate the engine's caller consults before submitting.
#[derive(Clone)]
pub struct QuotaService {
    store: Arc<dyn SubscriptionStore>,
    catalog: PlanCatalog,
}

impl QuotaService {
    pub fn new(store: Arc<dyn SubscriptionStore>, catalog: PlanCatalog) -> Self {
        Self { store, catalog }
    }

    /// True iff the tenant may start another task: a paid plan that is
    /// unmetered or allows overage always admits; otherwise usage in the
    /// current period must be below the plan's inclusion.
    pub async fn check_quota(&self, tenant_id: Uuid) -> Result<bool, BillingError> {
        if let Some(sub) = self.store.subscription_for_tenant(tenant_id).await?
            && sub.is_entitled()
        {
            let plan = self
                .catalog
                .get(&sub.plan_id)
                .ok_or_else(|| BillingError::UnknownPlan(sub.plan_id.clone()))?;
            if plan.is_unmetered() || plan.allows_overage() {
                return Ok(true);
            }
            let used = self
                .store
                .usage_count(tenant_id, sub.current_period_start, sub.current_period_end)
                .await?;
            return Ok(used < plan.tasks_included);
        }

        // No entitled subscription: free tier over the calendar month.
        let (start, end) = current_month_period(Utc::now());
        let used = self.store.usage_count(tenant_id, start, end).await?;
        Ok(used < self.catalog.free_plan().tasks_included)
    }
}

fn current_month_period(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = Utc
        .with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
        .unwrap();
    let (next_year, next_month) = if now.month() == 12 {
        (now.year() + 1, 1)
    } else {
        (now.year(), now.month() + 1)
    };
    let end = Utc
        .with_ymd_and_hms(next_year, next_month, 1, 0, 0, 0)
        .unwrap();
    (start, end)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use chrono::Duration;

    use super::*;

    struct FakeStore {
        subscription: Option<Subscription>,
        usage: Mutex<i64>,
    }

    #[async_trait]
    impl SubscriptionStore for FakeStore {
        async fn subscription_for_tenant(
            &self,
            _tenant_id: Uuid,
        ) -> Result<Option<Subscription>, BillingError> {
            Ok(self.subscription.clone())
        }

        async fn usage_count(
            &self,
            _tenant_id: Uuid,
            _period_start: DateTime<Utc>,
            _period_end: DateTime<Utc>,
        ) -> Result<i64, BillingError> {
            Ok(*self.usage.lock().unwrap())
        }
    }

    fn service(subscription: Option<Subscription>, usage: i64) -> QuotaService {
        QuotaService::new(
            Arc::new(FakeStore {
                subscription,
                usage: Mutex::new(usage),
            }),
            PlanCatalog::default(),
        )
    }

    fn subscription(plan_id: &str, status: SubscriptionStatus) -> Subscription {
        let now = Utc::now();
        Subscription {
            tenant_id: Uuid::new_v4(),
            plan_id: plan_id.to_string(),
            status,
            current_period_start: now - Duration::days(10),
            current_period_end: now + Duration::days(20),
        }
    }

    #[tokio::test]
    async fn free_tier_admits_below_inclusion() {
        let svc = service(None, 9);
        assert!(svc.check_quota(Uuid::new_v4()).await.unwrap());
    }

    #[tokio::test]
    async fn free_tier_refuses_at_inclusion() {
        let svc = service(None, 10);
        assert!(!svc.check_quota(Uuid::new_v4()).await.unwrap());
    }

    #[tokio::test]
    async fn unmetered_plan_always_admits() {
        let svc = service(
            Some(subscription("scale", SubscriptionStatus::Active)),
            100_000,
        );
        assert!(svc.check_quota(Uuid::new_v4()).await.unwrap());
    }

    #[tokio::test]
    async fn overage_plan_admits_past_inclusion() {
        let svc = service(Some(subscription("pro", SubscriptionStatus::Active)), 5_000);
        assert!(svc.check_quota(Uuid::new_v4()).await.unwrap());
    }

    #[tokio::test]
    async fn canceled_subscription_falls_back_to_free_tier() {
        let svc = service(Some(subscription("scale", SubscriptionStatus::Canceled)), 10);
        assert!(!svc.check_quota(Uuid::new_v4()).await.unwrap());
    }

    #[tokio::test]
    async fn unknown_plan_is_an_error() {
        let svc = service(Some(subscription("legacy", SubscriptionStatus::Active)), 0);
        assert!(matches!(
            svc.check_quota(Uuid::new_v4()).await,
            Err(BillingError::UnknownPlan(_))
        ));
    }
}
