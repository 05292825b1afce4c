//! Store-level tests against a real (SQLite) database.
//!
//! Ignored by default because they need a SQLite-capable build and run the
//! embedded migrations. Run with: cargo test -- --ignored seaorm

use std::sync::Arc;

use chrono::Utc;
use rust_decimal_macros::dec;

use salestracker_api::db;
use salestracker_api::entities::SaleStatus;
use salestracker_api::repositories::{
    NewProduct, NewSale, NewSaleItem, ProductRepository, ProductStore, SaleRepository, SaleStore,
    StockDecrement,
};

async fn connect() -> Arc<sea_orm::DatabaseConnection> {
    let pool = db::establish_connection("sqlite::memory:")
        .await
        .expect("db connect");
    db::run_migrations(&pool).await.expect("migrations");
    Arc::new(pool)
}

#[tokio::test]
#[ignore]
async fn seaorm_conditional_decrement_enforces_stock_floor() {
    let db = connect().await;
    let products = ProductRepository::new(db);

    let product = products
        .insert(NewProduct {
            name: "Desk".to_string(),
            category: "Furniture".to_string(),
            price: dec!(120.00),
            stock: 3,
        })
        .await
        .unwrap();

    assert_eq!(
        products.try_decrement_stock(product.id, 2).await.unwrap(),
        StockDecrement::Applied { remaining: 1 }
    );
    assert_eq!(
        products.try_decrement_stock(product.id, 2).await.unwrap(),
        StockDecrement::Insufficient
    );
    assert_eq!(
        products.try_decrement_stock(9999, 1).await.unwrap(),
        StockDecrement::NotFound
    );

    assert_eq!(products.increment_stock(product.id, 4).await.unwrap(), Some(5));
    assert_eq!(products.set_stock(product.id, 7).await.unwrap(), Some(7));
}

#[tokio::test]
#[ignore]
async fn seaorm_sale_insert_is_atomic_and_transitions_are_conditional() {
    let db = connect().await;
    let products = ProductRepository::new(db.clone());
    let sales = SaleRepository::new(db);

    let product = products
        .insert(NewProduct {
            name: "Chair".to_string(),
            category: "Furniture".to_string(),
            price: dec!(60.00),
            stock: 10,
        })
        .await
        .unwrap();

    let stored = sales
        .insert(NewSale {
            user_id: 1,
            date: Utc::now(),
            total_amount: dec!(120.00),
            status: SaleStatus::Pending,
            items: vec![NewSaleItem {
                product_id: product.id,
                quantity: 2,
                unit_price: dec!(60.00),
                discount_percentage: dec!(0),
            }],
        })
        .await
        .unwrap();

    let reloaded = sales.find_by_id(stored.sale.id).await.unwrap().unwrap();
    assert_eq!(reloaded.items.len(), 1);
    assert_eq!(reloaded.sale.status, SaleStatus::Pending);

    // Conditional transition: succeeds once, then the stale `from` loses
    assert!(sales
        .transition(stored.sale.id, SaleStatus::Pending, SaleStatus::Completed)
        .await
        .unwrap());
    assert!(!sales
        .transition(stored.sale.id, SaleStatus::Pending, SaleStatus::Cancelled)
        .await
        .unwrap());

    let completed_items = sales
        .completed_items_for_product(product.id)
        .await
        .unwrap();
    assert_eq!(completed_items.len(), 1);
    assert_eq!(completed_items[0].quantity, 2);
}
