pub mod alerts;
pub mod mailer;
pub mod products;
pub mod sales;
pub mod stock;
pub mod summary;

pub use alerts::{StockAlertProcessor, StockAlertProcessorConfig, StockAlertPublisher};
pub use mailer::Mailer;
pub use products::ProductService;
pub use sales::SaleService;
pub use stock::StockService;
pub use summary::DailySummaryJob;
