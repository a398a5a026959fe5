pub mod agent;
pub mod collect;
pub mod table;
