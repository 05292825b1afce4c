use std::sync::Arc;

use async_trait::async_trait;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use tracing::error;

use crate::entities::product::{self, Entity as ProductEntity};
use crate::errors::ServiceError;

use super::{NewProduct, ProductChanges, ProductStore, StockDecrement};

/// SeaORM-backed product store
#[derive(Clone)]
pub struct ProductRepository {
    db: Arc<DatabaseConnection>,
}

impl ProductRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    async fn current_stock(&self, id: i32) -> Result<Option<i32>, ServiceError> {
        let product = ProductEntity::find_by_id(id)
            .one(&*self.db)
            .await
            .map_err(|e| {
                error!(error = %e, product_id = id, "Failed to read stock level");
                ServiceError::DatabaseError(e)
            })?;
        Ok(product.map(|p| p.stock))
    }
}

#[async_trait]
impl ProductStore for ProductRepository {
    async fn insert(&self, new: NewProduct) -> Result<product::Model, ServiceError> {
        let model = product::ActiveModel {
            name: Set(new.name),
            category: Set(new.category),
            price: Set(new.price),
            stock: Set(new.stock),
            is_active: Set(true),
            ..Default::default()
        }
        .insert(&*self.db)
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to insert product");
            ServiceError::DatabaseError(e)
        })?;

        Ok(model)
    }

    async fn find_by_id(&self, id: i32) -> Result<Option<product::Model>, ServiceError> {
        let product = ProductEntity::find_by_id(id)
            .one(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?;
        Ok(product)
    }

    async fn find_all_active(&self) -> Result<Vec<product::Model>, ServiceError> {
        let products = ProductEntity::find()
            .filter(product::Column::IsActive.eq(true))
            .order_by_asc(product::Column::Id)
            .all(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?;
        Ok(products)
    }

    async fn update(
        &self,
        id: i32,
        changes: ProductChanges,
    ) -> Result<Option<product::Model>, ServiceError> {
        let Some(existing) = self.find_by_id(id).await? else {
            return Ok(None);
        };
        if !existing.is_active {
            return Ok(None);
        }

        let mut active: product::ActiveModel = existing.into();
        active.name = Set(changes.name);
        active.category = Set(changes.category);
        active.price = Set(changes.price);
        active.stock = Set(changes.stock);

        let updated = active.update(&*self.db).await.map_err(|e| {
            error!(error = %e, product_id = id, "Failed to update product");
            ServiceError::DatabaseError(e)
        })?;

        Ok(Some(updated))
    }

    async fn soft_delete(&self, id: i32) -> Result<bool, ServiceError> {
        let Some(existing) = self.find_by_id(id).await? else {
            return Ok(false);
        };
        if !existing.is_active {
            return Ok(false);
        }

        let mut active: product::ActiveModel = existing.into();
        active.is_active = Set(false);
        active.update(&*self.db).await.map_err(|e| {
            error!(error = %e, product_id = id, "Failed to soft delete product");
            ServiceError::DatabaseError(e)
        })?;

        Ok(true)
    }

    async fn find_low_stock(&self, threshold: i32) -> Result<Vec<product::Model>, ServiceError> {
        let products = ProductEntity::find()
            .filter(product::Column::IsActive.eq(true))
            .filter(product::Column::Stock.lte(threshold))
            .order_by_asc(product::Column::Stock)
            .all(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?;
        Ok(products)
    }

    async fn search(&self, keyword: &str) -> Result<Vec<product::Model>, ServiceError> {
        let products = ProductEntity::find()
            .filter(product::Column::IsActive.eq(true))
            .filter(
                Condition::any()
                    .add(product::Column::Name.contains(keyword))
                    .add(product::Column::Category.contains(keyword)),
            )
            .all(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?;
        Ok(products)
    }

    async fn categories(&self) -> Result<Vec<String>, ServiceError> {
        let categories: Vec<String> = ProductEntity::find()
            .select_only()
            .column(product::Column::Category)
            .filter(product::Column::IsActive.eq(true))
            .distinct()
            .into_tuple()
            .all(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?;
        Ok(categories)
    }

    async fn try_decrement_stock(
        &self,
        id: i32,
        quantity: i32,
    ) -> Result<StockDecrement, ServiceError> {
        // The stock >= quantity guard in the WHERE clause is what makes
        // concurrent reservations safe; rows_affected == 0 means either the
        // product is gone/inactive or the stock ran out.
        let result = ProductEntity::update_many()
            .col_expr(
                product::Column::Stock,
                Expr::col(product::Column::Stock).sub(quantity),
            )
            .filter(product::Column::Id.eq(id))
            .filter(product::Column::IsActive.eq(true))
            .filter(product::Column::Stock.gte(quantity))
            .exec(&*self.db)
            .await
            .map_err(|e| {
                error!(error = %e, product_id = id, "Failed to decrement stock");
                ServiceError::DatabaseError(e)
            })?;

        if result.rows_affected == 1 {
            let remaining = self.current_stock(id).await?.unwrap_or(0);
            return Ok(StockDecrement::Applied { remaining });
        }

        match self.find_by_id(id).await? {
            Some(p) if p.is_active => Ok(StockDecrement::Insufficient),
            _ => Ok(StockDecrement::NotFound),
        }
    }

    async fn increment_stock(
        &self,
        id: i32,
        quantity: i32,
    ) -> Result<Option<i32>, ServiceError> {
        // Restores apply to inactive products too; a soft-deleted product
        // still owns the stock coming back from a cancelled sale.
        let result = ProductEntity::update_many()
            .col_expr(
                product::Column::Stock,
                Expr::col(product::Column::Stock).add(quantity),
            )
            .filter(product::Column::Id.eq(id))
            .exec(&*self.db)
            .await
            .map_err(|e| {
                error!(error = %e, product_id = id, "Failed to increment stock");
                ServiceError::DatabaseError(e)
            })?;

        if result.rows_affected == 0 {
            return Ok(None);
        }
        self.current_stock(id).await
    }

    async fn set_stock(&self, id: i32, stock: i32) -> Result<Option<i32>, ServiceError> {
        let result = ProductEntity::update_many()
            .col_expr(product::Column::Stock, Expr::value(stock))
            .filter(product::Column::Id.eq(id))
            .filter(product::Column::IsActive.eq(true))
            .exec(&*self.db)
            .await
            .map_err(|e| {
                error!(error = %e, product_id = id, "Failed to set stock");
                ServiceError::DatabaseError(e)
            })?;

        if result.rows_affected == 0 {
            return Ok(None);
        }
        Ok(Some(stock))
    }
}
