pub mod blocklist;
pub mod journal;
pub mod memory;
pub mod sqlite;
