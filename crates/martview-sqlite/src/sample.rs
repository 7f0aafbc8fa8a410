//! Small demonstration dataset.
//!
//! Loaded by `martviewd init-db --sample`. Dates sit in June 2024, so pair it
//! with `analytics.reference_date = "2024-06-30"` for stable results. It
//! carries a few deliberate defects (a customer without email, an order for
//! an unknown customer, an overdue shipment) so the quality checks have
//! something to find.

use tracing::info;

use crate::db::SourceDb;
use crate::error::SourceResult;

/// Reference date the sample dataset is written against.
pub const SAMPLE_REFERENCE_DATE: &str = "2024-06-30";

pub const SAMPLE_DATA: &str = "
INSERT INTO customers (customer_id, email, first_name, last_name, region, signup_date) VALUES
    (1, 'alice@example.com', 'Alice', 'Moreau', 'north', '2023-01-10'),
    (2, 'bob@example.com',   'Bob',   'Lin',    'south', '2023-03-05'),
    (3, 'carol@example.com', 'Carol', 'Okafor', 'north', '2023-06-20'),
    (4, NULL,                'Dan',   'Reyes',  'south', '2024-01-02');

INSERT INTO stores (store_id, name, region, opened_on) VALUES
    (1, 'Downtown', 'north', '2019-04-01'),
    (2, 'Harbor',   'south', '2021-09-15');

INSERT INTO products (product_id, sku, name, category, unit_price, unit_cost) VALUES
    (1, 'SKU-001', 'Espresso Machine', 'appliances', 1200.0, 700.0),
    (2, 'SKU-002', 'Coffee Beans 1kg', 'grocery',      20.0,   8.0),
    (3, 'SKU-003', 'Stoneware Mug',    'kitchen',      12.0,   4.0);

INSERT INTO campaigns (campaign_id, name, channel, start_date, end_date, budget) VALUES
    (1, 'Summer Launch', 'email', '2024-05-25', '2024-06-30', 1000.0);

INSERT INTO orders (order_id, customer_id, store_id, campaign_id, order_date, status, total_amount) VALUES
    (1, 1,  1, 1,    '2024-06-01 10:12:00', 'completed', 4800.0),
    (2, 1,  1, NULL, '2024-06-15 16:40:00', 'completed', 1200.0),
    (3, 2,  2, 1,    '2024-06-15 11:05:00', 'completed',   60.0),
    (4, 3,  2, NULL, '2024-05-20 09:30:00', 'completed',   36.0),
    (5, 99, 1, NULL, '2024-06-29 18:20:00', 'completed',   20.0),
    (6, 2,  2, NULL, '2024-06-20 13:00:00', 'cancelled',  100.0);

INSERT INTO order_items (order_item_id, order_id, product_id, quantity, unit_price) VALUES
    (1, 1, 1, 4, 1200.0),
    (2, 2, 1, 1, 1200.0),
    (3, 3, 2, 3,   20.0),
    (4, 4, 3, 3,   12.0),
    (5, 5, 2, 1,   20.0),
    (6, 6, 2, 5,   20.0);

INSERT INTO shipments (shipment_id, order_id, carrier, shipped_date, delivered_date, status) VALUES
    (1, 1, 'UPS',   '2024-06-02', '2024-06-05', 'delivered'),
    (2, 2, 'UPS',   '2024-06-16', NULL,         'in_transit'),
    (3, 3, 'FedEx', '2024-06-16', '2024-06-18', 'delivered'),
    (4, 4, 'FedEx', '2024-05-21', '2024-06-05', 'delivered'),
    (5, 5, 'DHL',   '2024-06-29', NULL,         'in_transit');
";

impl SourceDb {
    /// Insert the demonstration dataset. Fails if the rows already exist.
    pub fn load_sample(&self) -> SourceResult<()> {
        self.blocking(|conn| {
            let tx = conn.transaction()?;
            tx.execute_batch(SAMPLE_DATA)?;
            tx.commit()?;
            Ok(())
        })?;
        info!("sample dataset loaded");
        Ok(())
    }
}

/// Schema, parameters pinned to the sample's reference date, and data.
#[cfg(test)]
pub(crate) fn seeded_db() -> SourceDb {
    use martview_core::{AnalyticsConfig, QualityConfig};

    let db = SourceDb::open_in_memory().unwrap();
    db.init_schema().unwrap();
    let analytics = AnalyticsConfig {
        reference_date: Some(SAMPLE_REFERENCE_DATE.to_string()),
        ..Default::default()
    };
    db.sync_parameters(&analytics, &QualityConfig::default()).unwrap();
    db.load_sample().unwrap();
    db
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_loads_once() {
        let db = seeded_db();
        let orders: i64 = db
            .blocking(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM orders", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(orders, 6);
        assert!(db.load_sample().is_err());
    }
}
