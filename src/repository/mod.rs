pub mod table_service;
