pub mod analytics;
pub mod audit;
pub mod document_indexer;
pub mod property_units;
pub mod rent_ledger;
pub mod report_export;
pub mod scheduler;
