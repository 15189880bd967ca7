//! Observability hooks
//!
//! The library logs through the `log` facade. With the `tracing` feature
//! (on by default) the runner also opens spans around each upgrade/downgrade,
//! each revision step, each operation and lock acquisition; callers enter them
//! with `let _span = tracing_helpers::x_span(..).entered();`.

#[cfg(feature = "tracing")]
pub mod tracing_helpers {
    use tracing::{info_span, Span};

    /// Span covering a whole upgrade or downgrade call
    pub fn migrate_span(direction: &str, target: &str) -> Span {
        info_span!("strata.migrate", direction = %direction, target = %target)
    }

    /// Span covering one revision step (one transaction)
    pub fn revision_step_span(revision: &str, direction: &str) -> Span {
        info_span!("strata.revision_step", revision = %revision, direction = %direction)
    }

    pub fn operation_span(kind: &str, table: &str) -> Span {
        info_span!("strata.operation", kind = %kind, table = %table)
    }

    pub fn lock_span(timeout_ms: u128) -> Span {
        info_span!("strata.lock", timeout_ms = timeout_ms as u64)
    }

    pub fn statement_span(sql: &str) -> Span {
        info_span!("strata.statement", sql = %sql)
    }

    pub fn connect_span() -> Span {
        info_span!("strata.connect")
    }
}
