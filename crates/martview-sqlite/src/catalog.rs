//! Derived-view definitions for the retail source.
//!
//! Declaration order is dependency order: `mv_customer_segments` reads
//! `mv_customer_summary` and `mv_store_performance` reads `mv_sales_daily`.
//! Thresholds come from `bi_parameters` so the SQL stays static.

use martview_refresh::ViewDefinition;
use martview_state::{RefreshCadence, ViewKind};

/// SQL behind one derived view.
#[derive(Debug, Clone, Copy)]
pub struct ViewSql {
    pub name: &'static str,
    pub category: &'static str,
    pub kind: ViewKind,
    pub cadence: RefreshCadence,
    /// SELECT that produces the view's rows.
    pub select: &'static str,
}

impl ViewSql {
    pub fn definition(&self) -> ViewDefinition {
        ViewDefinition::new(self.name, self.category, self.kind, self.cadence)
    }
}

pub const VIEWS: &[ViewSql] = &[
    ViewSql {
        name: "mv_sales_daily",
        category: "sales",
        kind: ViewKind::PrecomputedSnapshot,
        cadence: RefreshCadence::Daily,
        select: "
            SELECT date(o.order_date)                AS sales_date,
                   o.store_id                        AS store_id,
                   COUNT(*)                          AS order_count,
                   COUNT(DISTINCT o.customer_id)     AS customer_count,
                   ROUND(SUM(o.total_amount), 2)     AS revenue,
                   ROUND(AVG(o.total_amount), 2)     AS avg_order_value
            FROM orders o
            WHERE o.status <> 'cancelled'
            GROUP BY date(o.order_date), o.store_id",
    },
    ViewSql {
        name: "mv_sales_by_category",
        category: "sales",
        kind: ViewKind::PrecomputedSnapshot,
        cadence: RefreshCadence::Daily,
        select: "
            SELECT p.category                                          AS category,
                   COUNT(DISTINCT oi.order_id)                         AS order_count,
                   SUM(oi.quantity)                                    AS units_sold,
                   ROUND(SUM(oi.quantity * oi.unit_price), 2)          AS revenue,
                   ROUND(SUM(oi.quantity * (oi.unit_price - p.unit_cost)), 2) AS gross_margin
            FROM order_items oi
            JOIN products p ON p.product_id = oi.product_id
            JOIN orders o ON o.order_id = oi.order_id
            WHERE o.status <> 'cancelled'
            GROUP BY p.category",
    },
    ViewSql {
        name: "mv_customer_summary",
        category: "customers",
        kind: ViewKind::PrecomputedSnapshot,
        cadence: RefreshCadence::Daily,
        select: "
            SELECT c.customer_id                                AS customer_id,
                   c.email                                      AS email,
                   c.region                                     AS region,
                   c.signup_date                                AS signup_date,
                   COUNT(o.order_id)                            AS order_count,
                   ROUND(COALESCE(SUM(o.total_amount), 0), 2)   AS lifetime_value,
                   MIN(date(o.order_date))                      AS first_order_date,
                   MAX(date(o.order_date))                      AS last_order_date,
                   CAST(julianday((SELECT date(value) FROM bi_parameters WHERE name = 'reference_date'))
                        - julianday(MAX(date(o.order_date))) AS INTEGER) AS days_since_last_order
            FROM customers c
            LEFT JOIN orders o
              ON o.customer_id = c.customer_id AND o.status <> 'cancelled'
            GROUP BY c.customer_id",
    },
    ViewSql {
        name: "mv_customer_segments",
        category: "customers",
        kind: ViewKind::OnDemandView,
        cadence: RefreshCadence::Realtime,
        select: "
            SELECT s.customer_id,
                   s.lifetime_value,
                   s.order_count,
                   CASE
                     WHEN s.lifetime_value >= (SELECT CAST(value AS REAL) FROM bi_parameters WHERE name = 'clv_platinum') THEN 'platinum'
                     WHEN s.lifetime_value >= (SELECT CAST(value AS REAL) FROM bi_parameters WHERE name = 'clv_gold') THEN 'gold'
                     WHEN s.lifetime_value >= (SELECT CAST(value AS REAL) FROM bi_parameters WHERE name = 'clv_silver') THEN 'silver'
                     ELSE 'bronze'
                   END AS clv_tier,
                   CASE
                     WHEN s.order_count = 0 THEN 'prospect'
                     WHEN s.days_since_last_order <= 90 THEN 'active'
                     WHEN s.days_since_last_order <= 365 THEN 'lapsing'
                     ELSE 'churned'
                   END AS lifecycle_stage
            FROM mv_customer_summary s",
    },
    ViewSql {
        name: "mv_product_performance",
        category: "products",
        kind: ViewKind::PrecomputedSnapshot,
        cadence: RefreshCadence::Daily,
        select: "
            SELECT p.product_id,
                   p.sku,
                   p.name,
                   p.category,
                   COALESCE(SUM(oi.quantity), 0)                                     AS units_sold,
                   ROUND(COALESCE(SUM(oi.quantity * oi.unit_price), 0), 2)           AS revenue,
                   ROUND(COALESCE(SUM(oi.quantity * (oi.unit_price - p.unit_cost)), 0), 2) AS gross_margin,
                   COUNT(DISTINCT oi.order_id)                                       AS order_count
            FROM products p
            LEFT JOIN order_items oi ON oi.product_id = p.product_id
            GROUP BY p.product_id",
    },
    ViewSql {
        name: "mv_store_performance",
        category: "stores",
        kind: ViewKind::PrecomputedSnapshot,
        cadence: RefreshCadence::Daily,
        select: "
            SELECT s.store_id,
                   s.name,
                   s.region,
                   COALESCE(SUM(d.order_count), 0)          AS order_count,
                   ROUND(COALESCE(SUM(d.revenue), 0), 2)    AS revenue,
                   COUNT(d.sales_date)                      AS trading_days,
                   ROUND(COALESCE(SUM(d.revenue), 0) / MAX(COUNT(d.sales_date), 1), 2) AS avg_daily_revenue
            FROM stores s
            LEFT JOIN mv_sales_daily d ON d.store_id = s.store_id
            GROUP BY s.store_id",
    },
    ViewSql {
        name: "mv_marketing_roi",
        category: "marketing",
        kind: ViewKind::PrecomputedSnapshot,
        cadence: RefreshCadence::Weekly,
        select: "
            SELECT c.campaign_id,
                   c.name,
                   c.channel,
                   c.budget,
                   COUNT(o.order_id)                            AS attributed_orders,
                   ROUND(COALESCE(SUM(o.total_amount), 0), 2)   AS attributed_revenue,
                   CASE WHEN c.budget > 0
                        THEN ROUND((COALESCE(SUM(o.total_amount), 0) - c.budget) / c.budget, 4)
                   END                                          AS roi
            FROM campaigns c
            LEFT JOIN orders o
              ON o.campaign_id = c.campaign_id AND o.status <> 'cancelled'
            GROUP BY c.campaign_id",
    },
    ViewSql {
        name: "mv_shipment_performance",
        category: "operations",
        kind: ViewKind::PrecomputedSnapshot,
        cadence: RefreshCadence::Hourly,
        select: "
            SELECT COALESCE(sh.carrier, 'unknown')   AS carrier,
                   COUNT(*)                          AS shipment_count,
                   SUM(sh.delivered_date IS NOT NULL) AS delivered_count,
                   ROUND(AVG(julianday(sh.delivered_date) - julianday(sh.shipped_date)), 2) AS avg_transit_days,
                   SUM(sh.delivered_date IS NOT NULL
                       AND julianday(sh.delivered_date) - julianday(sh.shipped_date)
                           > (SELECT CAST(value AS REAL) FROM bi_parameters WHERE name = 'late_shipment_days')) AS late_count
            FROM shipments sh
            GROUP BY COALESCE(sh.carrier, 'unknown')",
    },
];

/// The declared catalog, ready for a `ViewRegistry`.
pub fn retail_catalog() -> Vec<ViewDefinition> {
    VIEWS.iter().map(ViewSql::definition).collect()
}

pub fn find(name: &str) -> Option<&'static ViewSql> {
    VIEWS.iter().find(|v| v.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use martview_refresh::ViewRegistry;

    #[test]
    fn catalog_builds_a_registry() {
        let registry = ViewRegistry::new(retail_catalog()).unwrap();
        assert_eq!(registry.len(), 8);
        assert_eq!(
            registry.modules(),
            vec!["sales", "customers", "products", "stores", "marketing", "operations"]
        );
    }

    #[test]
    fn dependencies_are_declared_first() {
        let position = |name: &str| VIEWS.iter().position(|v| v.name == name).unwrap();
        assert!(position("mv_sales_daily") < position("mv_store_performance"));
        assert!(position("mv_customer_summary") < position("mv_customer_segments"));
    }

    #[test]
    fn only_segments_is_on_demand() {
        let on_demand: Vec<&str> = VIEWS
            .iter()
            .filter(|v| v.kind == ViewKind::OnDemandView)
            .map(|v| v.name)
            .collect();
        assert_eq!(on_demand, vec!["mv_customer_segments"]);
        assert!(find("mv_marketing_roi").is_some());
        assert!(find("mv_unknown").is_none());
    }
}
