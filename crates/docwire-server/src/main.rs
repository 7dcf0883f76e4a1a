mod protocol;
mod server;
mod session;

use std::sync::Arc;

use docwire_collection::{Config, Database, NoOpSink};
use docwire_store::MemoryStore;

use server::Server;

fn main() {
    tracing_subscriber::fmt::init();

    let addr = std::env::var("DOCWIRE_ADDR").unwrap_or_else(|_| "0.0.0.0:9700".to_string());

    let mut config = Config::default();
    if let Ok(ttl) = std::env::var("DOCWIRE_CURSOR_TTL_MS") {
        if let Ok(ttl) = ttl.parse() {
            config.cursor_ttl_ms = ttl;
        }
    }
    if let Ok(batch) = std::env::var("DOCWIRE_MAX_BATCH_SIZE") {
        if let Ok(batch) = batch.parse() {
            config.max_batch_size = batch;
        }
    }
    if let Ok(oplog_enabled) = std::env::var("DOCWIRE_OPLOG_ENABLED") {
        config.oplog_enabled = oplog_enabled != "0" && oplog_enabled.to_lowercase() != "false";
    }

    let store = MemoryStore::new();
    let db = Database::new(store, config, Arc::new(NoOpSink));
    let server = Server::new(db, &addr);

    tracing::info!(addr = %addr, "docwire-server starting");
    server.serve().expect("server failed");
}
