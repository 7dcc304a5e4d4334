use sqlx::PgPool;

/// Executes SQL messages against a connection pool.
///
/// Each SQL operation is its own message type with a
/// `kanau::processor::Processor` impl on this struct.
#[derive(Debug, Clone)]
pub struct DatabaseProcessor {
    pub pool: PgPool,
}

impl DatabaseProcessor {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}
