//! Operational retail schema.
//!
//! Foreign keys are declared for documentation only and are not enforced:
//! the consistency checks exist to find the orphans enforcement would have
//! rejected.

pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS customers (
    customer_id  INTEGER PRIMARY KEY,
    email        TEXT,
    first_name   TEXT,
    last_name    TEXT,
    region       TEXT,
    signup_date  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS stores (
    store_id   INTEGER PRIMARY KEY,
    name       TEXT NOT NULL,
    region     TEXT,
    opened_on  TEXT
);

CREATE TABLE IF NOT EXISTS products (
    product_id  INTEGER PRIMARY KEY,
    sku         TEXT,
    name        TEXT NOT NULL,
    category    TEXT NOT NULL,
    unit_price  REAL NOT NULL,
    unit_cost   REAL NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS campaigns (
    campaign_id  INTEGER PRIMARY KEY,
    name         TEXT NOT NULL,
    channel      TEXT,
    start_date   TEXT,
    end_date     TEXT,
    budget       REAL NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS orders (
    order_id      INTEGER PRIMARY KEY,
    customer_id   INTEGER REFERENCES customers(customer_id),
    store_id      INTEGER REFERENCES stores(store_id),
    campaign_id   INTEGER REFERENCES campaigns(campaign_id),
    order_date    TEXT NOT NULL,
    status        TEXT NOT NULL DEFAULT 'completed',
    total_amount  REAL NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_orders_date ON orders(order_date);
CREATE INDEX IF NOT EXISTS idx_orders_customer ON orders(customer_id);

CREATE TABLE IF NOT EXISTS order_items (
    order_item_id  INTEGER PRIMARY KEY,
    order_id       INTEGER NOT NULL REFERENCES orders(order_id),
    product_id     INTEGER REFERENCES products(product_id),
    quantity       INTEGER NOT NULL,
    unit_price     REAL NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_order_items_order ON order_items(order_id);

CREATE TABLE IF NOT EXISTS shipments (
    shipment_id     INTEGER PRIMARY KEY,
    order_id        INTEGER REFERENCES orders(order_id),
    carrier         TEXT,
    shipped_date    TEXT,
    delivered_date  TEXT,
    status          TEXT NOT NULL DEFAULT 'pending'
);

CREATE TABLE IF NOT EXISTS bi_parameters (
    name   TEXT PRIMARY KEY,
    value  TEXT NOT NULL
);
";

/// Tables created by [`SCHEMA`], in creation order.
pub const SOURCE_TABLES: &[&str] = &[
    "customers",
    "stores",
    "products",
    "campaigns",
    "orders",
    "order_items",
    "shipments",
    "bi_parameters",
];
