//! Configuration surface (spec §6).

#[derive(Debug, Clone, Copy)]
pub struct WriteConcern {
    pub w: i32,
    pub j: bool,
}

impl Default for WriteConcern {
    fn default() -> Self {
        Self { w: 1, j: false }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Config {
    pub cursor_ttl_ms: u64,
    pub max_batch_size: usize,
    pub oplog_enabled: bool,
    pub default_write_concern: WriteConcern,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cursor_ttl_ms: 600_000,
            max_batch_size: 101,
            oplog_enabled: true,
            default_write_concern: WriteConcern::default(),
        }
    }
}
