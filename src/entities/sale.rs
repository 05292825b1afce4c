use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Sale entity; one row per checkout, items live in `sale_items`.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "sales")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    /// Business date of the sale (not the row creation time)
    pub date: DateTimeUtc,

    /// Sum of `unit_price * quantity` over the items, fixed at creation
    pub total_amount: Decimal,

    /// Operator that recorded the sale
    pub user_id: i32,

    pub status: SaleStatus,

    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::sale_item::Entity")]
    SaleItems,
}

impl Related<super::sale_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::SaleItems.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Sale lifecycle status.
///
/// `Returned` and `Cancelled` are terminal. A completed sale can only be
/// returned, never cancelled.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    EnumIter,
    DeriveActiveEnum,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[strum(serialize_all = "lowercase")]
pub enum SaleStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "completed")]
    Completed,
    #[sea_orm(string_value = "returned")]
    Returned,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
}

impl SaleStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, SaleStatus::Returned | SaleStatus::Cancelled)
    }

    /// Whether moving to `to` is a legal lifecycle step.
    pub fn can_transition(self, to: SaleStatus) -> bool {
        match (self, to) {
            (SaleStatus::Pending, SaleStatus::Completed) => true,
            (SaleStatus::Pending, SaleStatus::Cancelled) => true,
            (SaleStatus::Completed, SaleStatus::Returned) => true,
            // Completed sales are returned, not cancelled; terminal states
            // accept nothing.
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::SaleStatus;
    use test_case::test_case;

    #[test_case(SaleStatus::Pending, SaleStatus::Completed => true)]
    #[test_case(SaleStatus::Pending, SaleStatus::Cancelled => true)]
    #[test_case(SaleStatus::Completed, SaleStatus::Returned => true)]
    #[test_case(SaleStatus::Completed, SaleStatus::Cancelled => false)]
    #[test_case(SaleStatus::Returned, SaleStatus::Cancelled => false)]
    #[test_case(SaleStatus::Cancelled, SaleStatus::Cancelled => false)]
    #[test_case(SaleStatus::Returned, SaleStatus::Returned => false)]
    #[test_case(SaleStatus::Pending, SaleStatus::Returned => false)]
    fn transition_matrix(from: SaleStatus, to: SaleStatus) -> bool {
        from.can_transition(to)
    }

    #[test]
    fn terminal_states() {
        assert!(!SaleStatus::Pending.is_terminal());
        assert!(!SaleStatus::Completed.is_terminal());
        assert!(SaleStatus::Returned.is_terminal());
        assert!(SaleStatus::Cancelled.is_terminal());
    }
}
