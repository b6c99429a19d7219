pub mod db;
pub mod entities;
pub mod kv;
pub mod repository;

pub use kv::{KvError, KvStore, MemoryKv, RedisKv};
pub use repository::{
    DailyStatRow, ProxyHealth, ProxyStatsQuery, QuotaPattern, Repository, RequestLogInsert,
    StorageError, StorageResult, row_to_account, row_to_descriptor,
};
