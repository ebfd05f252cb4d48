use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use atelier_core::{DomainError, DomainResult, Entity, OrderGroupId, UserId};

/// OrderGroup status lifecycle.
///
/// Only `InProgress` is produced by the split; settlement logic moves the group on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderGroupStatus {
    InProgress,
    Completed,
    Cancelled,
}

status_labels!(OrderGroupStatus, "order group status", {
    InProgress => "in_progress",
    Completed => "completed",
    Cancelled => "cancelled",
});

/// Parent of a multi-provider split.
///
/// `total_orders` is fixed at creation (number of distinct providers in the
/// split); `completed_orders` only ever climbs towards it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderGroup {
    pub id: OrderGroupId,
    pub shopper_id: UserId,
    pub status: OrderGroupStatus,
    pub total_orders: u32,
    pub completed_orders: u32,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl OrderGroup {
    pub fn new(
        id: OrderGroupId,
        shopper_id: UserId,
        total_orders: u32,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            shopper_id,
            status: OrderGroupStatus::InProgress,
            total_orders,
            completed_orders: 0,
            created_at,
            expires_at,
        }
    }

    pub fn is_settled(&self) -> bool {
        self.completed_orders == self.total_orders
    }

    /// Count one member order as completed.
    ///
    /// The group flips to `Completed` once every order has been counted.
    pub fn record_completed_order(&mut self) -> DomainResult<()> {
        if self.status != OrderGroupStatus::InProgress {
            return Err(DomainError::invalid_state(format!(
                "order group {} is {}",
                self.id,
                self.status.as_str()
            )));
        }
        if self.completed_orders >= self.total_orders {
            return Err(DomainError::invalid_state(format!(
                "order group {} already has {} of {} orders completed",
                self.id, self.completed_orders, self.total_orders
            )));
        }

        self.completed_orders += 1;
        if self.is_settled() {
            self.status = OrderGroupStatus::Completed;
        }
        Ok(())
    }
}

impl Entity for OrderGroup {
    type Id = OrderGroupId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn group(total: u32) -> OrderGroup {
        let now = Utc::now();
        OrderGroup::new(OrderGroupId::new(), UserId::new(), total, now, now + Duration::minutes(30))
    }

    #[test]
    fn completing_every_order_settles_the_group() {
        let mut g = group(2);
        g.record_completed_order().unwrap();
        assert_eq!(g.status, OrderGroupStatus::InProgress);
        g.record_completed_order().unwrap();
        assert_eq!(g.status, OrderGroupStatus::Completed);
        assert_eq!(g.completed_orders, 2);
    }

    #[test]
    fn completed_orders_never_exceed_total() {
        let mut g = group(1);
        g.record_completed_order().unwrap();
        let err = g.record_completed_order().unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));
        assert_eq!(g.completed_orders, 1);
    }

    #[test]
    fn cancelled_group_rejects_completion() {
        let mut g = group(3);
        g.status = OrderGroupStatus::Cancelled;
        assert!(g.record_completed_order().is_err());
        assert_eq!(g.completed_orders, 0);
    }

    #[test]
    fn status_round_trips_through_storage_label() {
        for s in [
            OrderGroupStatus::InProgress,
            OrderGroupStatus::Completed,
            OrderGroupStatus::Cancelled,
        ] {
            assert_eq!(OrderGroupStatus::parse(s.as_str()).unwrap(), s);
        }
    }
}
