//! Oplog sink contract (spec §6: "`append(entry)` where an entry
//! carries `{ts, ns, op ∈ {i,u,d,n}, o, o2?}`. A no-op sink is provided
//! as default").

use docwire_value::Document;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Insert,
    Update,
    Delete,
    NoOp,
}

impl OpKind {
    pub fn code(self) -> &'static str {
        match self {
            OpKind::Insert => "i",
            OpKind::Update => "u",
            OpKind::Delete => "d",
            OpKind::NoOp => "n",
        }
    }
}

#[derive(Debug, Clone)]
pub struct OplogEntry {
    pub ts: i64,
    pub ns: String,
    pub op: OpKind,
    pub o: Document,
    pub o2: Option<Document>,
}

/// Pluggable oplog backend. `docwire-server` wires a real sink in;
/// tests and a disabled configuration use [`NoOpSink`].
pub trait OplogSink: Send + Sync {
    fn append(&self, entry: OplogEntry);
}

#[derive(Debug, Default)]
pub struct NoOpSink;

impl OplogSink for NoOpSink {
    fn append(&self, _entry: OplogEntry) {}
}
