use redb::TableDefinition;

/// Entries table: store key -> EntryRecord (serialized)
pub const ENTRIES: TableDefinition<&str, &[u8]> = TableDefinition::new("entries");

/// Quota table: fingerprint -> CreationLog (serialized)
/// Only used when no external quota service is configured
pub const QUOTAS: TableDefinition<&str, &[u8]> = TableDefinition::new("quotas");
