//! Read-only data-quality checks over the source tables.
//!
//! Each check is one `SELECT` returning a single count of affected records.
//! Thresholds are read from `bi_parameters`; "now" for timeliness checks is
//! the configured reference date.

use rusqlite::Connection;
use tracing::debug;

use martview_refresh::{BoxFuture, CheckFailure, CheckResult, QualityChecker};
use martview_state::{QualityCategory, QualityFinding, Severity};

use crate::db::SourceDb;
use crate::error::SourceResult;

#[derive(Debug, Clone, Copy)]
pub struct QualityCheck {
    pub name: &'static str,
    pub category: QualityCategory,
    pub severity: Severity,
    /// Table the check reads.
    pub source: &'static str,
    pub description: &'static str,
    /// Returns one integer: the number of affected records.
    pub sql: &'static str,
}

pub const CHECKS: &[QualityCheck] = &[
    // completeness
    QualityCheck {
        name: "orders_missing_customer",
        category: QualityCategory::Completeness,
        severity: Severity::High,
        source: "orders",
        description: "orders without a customer reference",
        sql: "SELECT COUNT(*) FROM orders WHERE customer_id IS NULL",
    },
    QualityCheck {
        name: "customers_missing_email",
        category: QualityCategory::Completeness,
        severity: Severity::Medium,
        source: "customers",
        description: "customers without an email address",
        sql: "SELECT COUNT(*) FROM customers WHERE email IS NULL OR trim(email) = ''",
    },
    // accuracy
    QualityCheck {
        name: "negative_order_totals",
        category: QualityCategory::Accuracy,
        severity: Severity::Critical,
        source: "orders",
        description: "orders with a negative total",
        sql: "SELECT COUNT(*) FROM orders WHERE total_amount < 0",
    },
    QualityCheck {
        name: "order_totals_above_limit",
        category: QualityCategory::Accuracy,
        severity: Severity::Medium,
        source: "orders",
        description: "orders with a total above max_order_total",
        sql: "SELECT COUNT(*) FROM orders
              WHERE total_amount > (SELECT CAST(value AS REAL) FROM bi_parameters WHERE name = 'max_order_total')",
    },
    QualityCheck {
        name: "order_items_invalid_quantity",
        category: QualityCategory::Accuracy,
        severity: Severity::High,
        source: "order_items",
        description: "order lines with a zero or negative quantity",
        sql: "SELECT COUNT(*) FROM order_items WHERE quantity <= 0",
    },
    // consistency
    QualityCheck {
        name: "orders_unknown_customer",
        category: QualityCategory::Consistency,
        severity: Severity::High,
        source: "orders",
        description: "orders referencing a customer that does not exist",
        sql: "SELECT COUNT(*) FROM orders o
              WHERE o.customer_id IS NOT NULL
                AND NOT EXISTS (SELECT 1 FROM customers c WHERE c.customer_id = o.customer_id)",
    },
    QualityCheck {
        name: "order_items_unknown_product",
        category: QualityCategory::Consistency,
        severity: Severity::High,
        source: "order_items",
        description: "order lines referencing a product that does not exist",
        sql: "SELECT COUNT(*) FROM order_items oi
              WHERE oi.product_id IS NULL
                 OR NOT EXISTS (SELECT 1 FROM products p WHERE p.product_id = oi.product_id)",
    },
    QualityCheck {
        name: "shipments_unknown_order",
        category: QualityCategory::Consistency,
        severity: Severity::Medium,
        source: "shipments",
        description: "shipments referencing an order that does not exist",
        sql: "SELECT COUNT(*) FROM shipments s
              WHERE s.order_id IS NULL
                 OR NOT EXISTS (SELECT 1 FROM orders o WHERE o.order_id = s.order_id)",
    },
    // timeliness
    QualityCheck {
        name: "shipments_overdue",
        category: QualityCategory::Timeliness,
        severity: Severity::Medium,
        source: "shipments",
        description: "undelivered shipments older than late_shipment_days",
        sql: "SELECT COUNT(*) FROM shipments
              WHERE delivered_date IS NULL
                AND shipped_date IS NOT NULL
                AND julianday((SELECT datetime(value) FROM bi_parameters WHERE name = 'reference_date'))
                    - julianday(shipped_date)
                    > (SELECT CAST(value AS REAL) FROM bi_parameters WHERE name = 'late_shipment_days')",
    },
    QualityCheck {
        name: "orders_not_recent",
        category: QualityCategory::Timeliness,
        severity: Severity::Low,
        source: "orders",
        description: "no order received within stale_order_hours",
        sql: "SELECT CASE
                WHEN COUNT(*) > 0
                 AND (julianday((SELECT datetime(value) FROM bi_parameters WHERE name = 'reference_date'))
                      - julianday(MAX(order_date))) * 24
                     > (SELECT CAST(value AS REAL) FROM bi_parameters WHERE name = 'stale_order_hours')
                THEN 1 ELSE 0 END
              FROM orders",
    },
    // uniqueness
    QualityCheck {
        name: "duplicate_customer_emails",
        category: QualityCategory::Uniqueness,
        severity: Severity::Medium,
        source: "customers",
        description: "customers sharing an email address",
        sql: "SELECT COALESCE(SUM(n), 0) FROM (
                SELECT COUNT(*) AS n FROM customers
                WHERE email IS NOT NULL AND trim(email) <> ''
                GROUP BY lower(trim(email)) HAVING COUNT(*) > 1)",
    },
    QualityCheck {
        name: "duplicate_product_skus",
        category: QualityCategory::Uniqueness,
        severity: Severity::High,
        source: "products",
        description: "products sharing a SKU",
        sql: "SELECT COALESCE(SUM(n), 0) FROM (
                SELECT COUNT(*) AS n FROM products
                WHERE sku IS NOT NULL
                GROUP BY sku HAVING COUNT(*) > 1)",
    },
];

impl QualityCheck {
    fn evaluate(&self, conn: &Connection) -> CheckResult {
        let counted: rusqlite::Result<i64> = conn.query_row(self.sql, [], |row| row.get(0));
        match counted {
            Ok(count) => {
                let affected_count = count.max(0) as u64;
                debug!(check = self.name, affected_count, "quality check evaluated");
                Ok(QualityFinding {
                    check_name: self.name.to_string(),
                    category: self.category,
                    severity: self.severity,
                    source: self.source.to_string(),
                    affected_count,
                    description: format!("{affected_count} {}", self.description),
                })
            }
            Err(e) => Err(CheckFailure {
                check_name: self.name.to_string(),
                message: e.to_string(),
            }),
        }
    }
}

pub struct SqliteQualityChecker {
    db: SourceDb,
}

impl SqliteQualityChecker {
    pub fn new(db: SourceDb) -> Self {
        Self { db }
    }

    /// Evaluate every check. A failing check does not stop the others.
    pub async fn run(&self) -> SourceResult<Vec<CheckResult>> {
        self.db
            .with_conn(|conn| Ok(CHECKS.iter().map(|check| check.evaluate(conn)).collect()))
            .await
    }
}

impl QualityChecker for SqliteQualityChecker {
    fn run_all_checks(&self) -> BoxFuture<'_, Vec<CheckResult>> {
        Box::pin(async move {
            match self.run().await {
                Ok(results) => results,
                // The connection itself is unusable: every check failed.
                Err(e) => CHECKS
                    .iter()
                    .map(|check| {
                        Err(CheckFailure {
                            check_name: check.name.to_string(),
                            message: e.to_string(),
                        })
                    })
                    .collect(),
            }
        })
    }
}
