use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use rust_decimal::Decimal;
use sea_orm::sea_query::{Alias, Expr};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, JoinType, LoaderTrait,
    QueryFilter, QueryOrder, QuerySelect, RelationTrait, Set, TransactionTrait,
};
use tracing::error;

use crate::entities::{
    sale::{self, Entity as SaleEntity, SaleStatus},
    sale_item::{self, Entity as SaleItemEntity},
};
use crate::errors::ServiceError;

use super::{DailySalesSummary, NewSale, SaleStore, SaleWithItems};

/// SeaORM-backed sale store
#[derive(Clone)]
pub struct SaleRepository {
    db: Arc<DatabaseConnection>,
}

impl SaleRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    async fn with_items(
        &self,
        sales: Vec<sale::Model>,
    ) -> Result<Vec<SaleWithItems>, ServiceError> {
        let items = sales
            .load_many(SaleItemEntity, &*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?;

        Ok(sales
            .into_iter()
            .zip(items)
            .map(|(sale, items)| SaleWithItems { sale, items })
            .collect())
    }
}

#[async_trait]
impl SaleStore for SaleRepository {
    async fn insert(&self, new: NewSale) -> Result<SaleWithItems, ServiceError> {
        let txn = self.db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start transaction for sale insert");
            ServiceError::DatabaseError(e)
        })?;

        let sale_model = sale::ActiveModel {
            date: Set(new.date),
            total_amount: Set(new.total_amount),
            user_id: Set(new.user_id),
            status: Set(new.status),
            created_at: Set(Utc::now()),
            ..Default::default()
        }
        .insert(&txn)
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to insert sale");
            ServiceError::DatabaseError(e)
        })?;

        let mut item_models = Vec::with_capacity(new.items.len());
        for item in new.items {
            let item_model = sale_item::ActiveModel {
                sale_id: Set(sale_model.id),
                product_id: Set(item.product_id),
                quantity: Set(item.quantity),
                unit_price: Set(item.unit_price),
                discount_percentage: Set(item.discount_percentage),
                ..Default::default()
            }
            .insert(&txn)
            .await
            .map_err(|e| {
                error!(error = %e, sale_id = sale_model.id, "Failed to insert sale item");
                ServiceError::DatabaseError(e)
            })?;
            item_models.push(item_model);
        }

        txn.commit().await.map_err(|e| {
            error!(error = %e, sale_id = sale_model.id, "Failed to commit sale insert");
            ServiceError::DatabaseError(e)
        })?;

        Ok(SaleWithItems {
            sale: sale_model,
            items: item_models,
        })
    }

    async fn find_by_id(&self, id: i32) -> Result<Option<SaleWithItems>, ServiceError> {
        let Some(sale) = SaleEntity::find_by_id(id)
            .one(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?
        else {
            return Ok(None);
        };

        let mut resolved = self.with_items(vec![sale]).await?;
        Ok(resolved.pop())
    }

    async fn find_all(&self) -> Result<Vec<SaleWithItems>, ServiceError> {
        let sales = SaleEntity::find()
            .order_by_asc(sale::Column::Id)
            .all(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?;
        self.with_items(sales).await
    }

    async fn find_by_date_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<SaleWithItems>, ServiceError> {
        let sales = SaleEntity::find()
            .filter(sale::Column::Date.gte(from))
            .filter(sale::Column::Date.lte(to))
            .order_by_asc(sale::Column::Date)
            .all(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?;
        self.with_items(sales).await
    }

    async fn find_by_product(&self, product_id: i32) -> Result<Vec<SaleWithItems>, ServiceError> {
        let sales = SaleEntity::find()
            .join(JoinType::InnerJoin, sale::Relation::SaleItems.def())
            .filter(sale_item::Column::ProductId.eq(product_id))
            .distinct()
            .order_by_asc(sale::Column::Id)
            .all(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?;
        self.with_items(sales).await
    }

    async fn find_by_user(&self, user_id: i32) -> Result<Vec<SaleWithItems>, ServiceError> {
        let sales = SaleEntity::find()
            .filter(sale::Column::UserId.eq(user_id))
            .order_by_asc(sale::Column::Id)
            .all(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?;
        self.with_items(sales).await
    }

    async fn transition(
        &self,
        id: i32,
        from: SaleStatus,
        to: SaleStatus,
    ) -> Result<bool, ServiceError> {
        // Conditional flip: loses the race to any concurrent transition, in
        // which case the caller reports a business `false`.
        let result = SaleEntity::update_many()
            .col_expr(sale::Column::Status, Expr::value(to))
            .filter(sale::Column::Id.eq(id))
            .filter(sale::Column::Status.eq(from))
            .exec(&*self.db)
            .await
            .map_err(|e| {
                error!(error = %e, sale_id = id, "Failed to transition sale status");
                ServiceError::DatabaseError(e)
            })?;

        Ok(result.rows_affected == 1)
    }

    async fn completed_items_for_product(
        &self,
        product_id: i32,
    ) -> Result<Vec<sale_item::Model>, ServiceError> {
        let items = SaleItemEntity::find()
            .join(JoinType::InnerJoin, sale_item::Relation::Sale.def())
            .filter(sale_item::Column::ProductId.eq(product_id))
            .filter(sale::Column::Status.eq(SaleStatus::Completed))
            .all(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?;
        Ok(items)
    }

    async fn daily_summary(
        &self,
        day: NaiveDate,
    ) -> Result<Option<DailySalesSummary>, ServiceError> {
        let start = Utc.from_utc_datetime(&day.and_time(NaiveTime::MIN));
        let end = start + chrono::Duration::days(1);

        let total_sales: Option<Option<Decimal>> = SaleEntity::find()
            .select_only()
            .column_as(
                Expr::col((SaleEntity, sale::Column::TotalAmount)).sum(),
                "total_sales",
            )
            .filter(sale::Column::Status.eq(SaleStatus::Completed))
            .filter(sale::Column::Date.gte(start))
            .filter(sale::Column::Date.lt(end))
            .into_tuple()
            .one(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?;

        let Some(total_sales) = total_sales.flatten() else {
            return Ok(None);
        };

        let quantity_sold: Option<Option<i64>> = SaleItemEntity::find()
            .select_only()
            .column_as(
                Expr::col((SaleItemEntity, sale_item::Column::Quantity)).sum(),
                "quantity_sold",
            )
            .join(JoinType::InnerJoin, sale_item::Relation::Sale.def())
            .filter(sale::Column::Status.eq(SaleStatus::Completed))
            .filter(sale::Column::Date.gte(start))
            .filter(sale::Column::Date.lt(end))
            .into_tuple()
            .one(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?;

        let top: Option<(i32, i64)> = SaleItemEntity::find()
            .select_only()
            .column(sale_item::Column::ProductId)
            .column_as(
                Expr::col((SaleItemEntity, sale_item::Column::Quantity)).sum(),
                "quantity",
            )
            .join(JoinType::InnerJoin, sale_item::Relation::Sale.def())
            .filter(sale::Column::Status.eq(SaleStatus::Completed))
            .filter(sale::Column::Date.gte(start))
            .filter(sale::Column::Date.lt(end))
            .group_by(sale_item::Column::ProductId)
            .order_by_desc(Expr::col(Alias::new("quantity")))
            .limit(1)
            .into_tuple()
            .one(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?;

        Ok(Some(DailySalesSummary {
            total_sales,
            quantity_sold: quantity_sold.flatten().unwrap_or(0),
            top_product_id: top.map(|(id, _)| id),
            top_product_quantity: top.map(|(_, qty)| qty).unwrap_or(0),
        }))
    }
}
