//! redb table definitions for the martview metadata store.
//!
//! Values are JSON-serialized domain types. Append-only tables use a
//! monotonically increasing `u64` sequence as key so iteration order is
//! insertion order.

use redb::TableDefinition;

/// View catalog keyed by view name. The only table updated in place.
pub const VIEWS: TableDefinition<&str, &[u8]> = TableDefinition::new("views");

/// Operation log entries keyed by log handle.
pub const OPERATION_LOG: TableDefinition<u64, &[u8]> = TableDefinition::new("operation_log");

/// Per-view refresh outcomes keyed by sequence number.
pub const REFRESH_HISTORY: TableDefinition<u64, &[u8]> = TableDefinition::new("refresh_history");

/// Data-quality issues keyed by issue id.
pub const QUALITY_ISSUES: TableDefinition<u64, &[u8]> = TableDefinition::new("quality_issues");
