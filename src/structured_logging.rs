//! Structured pipeline events

use crate::observability::{CorrelationId, TraceContext};

/// Structured logger bound to one operation's trace context
///
/// Group-level events go through a child logger from [`PipelineLogger::group`],
/// which keeps the trace and correlation ids and opens its own span.
#[derive(Debug, Clone)]
pub struct PipelineLogger {
    context: TraceContext,
}

impl PipelineLogger {
    pub fn new(context: &TraceContext) -> Self {
        Self {
            context: context.clone(),
        }
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        self.context.correlation_id()
    }

    pub fn context(&self) -> &TraceContext {
        &self.context
    }

    /// Child logger for one transaction group
    pub fn group(&self, index: usize) -> Self {
        let operation = format!("{}.group_{}", self.context.operation, index);
        Self {
            context: self.context.child_span(&operation),
        }
    }

    pub fn log_batch_planned(&self, items: usize, groups: usize, group_size: usize) {
        tracing::info!(
            correlation_id = %self.context.correlation_id,
            trace_id = %self.context.trace_id,
            span_id = %self.context.span_id,
            operation = %self.context.operation,
            started_at = self.context.timestamp,
            items,
            groups,
            group_size,
            "Batch planned"
        );
    }

    pub fn log_group_started(&self, mints: &[String]) {
        tracing::debug!(
            correlation_id = %self.context.correlation_id,
            trace_id = %self.context.trace_id,
            span_id = %self.context.span_id,
            parent_span_id = ?self.context.parent_span_id,
            operation = %self.context.operation,
            mints = ?mints,
            "Assembling group"
        );
    }

    pub fn log_transaction_ready(&self, size: usize, pending_signers: usize) {
        tracing::info!(
            correlation_id = %self.context.correlation_id,
            trace_id = %self.context.trace_id,
            span_id = %self.context.span_id,
            parent_span_id = ?self.context.parent_span_id,
            operation = %self.context.operation,
            size,
            pending_signers,
            "Transaction serialized"
        );
    }

    pub fn log_operation_complete(&self, transactions: usize, latency_ms: u64) {
        tracing::info!(
            correlation_id = %self.context.correlation_id,
            trace_id = %self.context.trace_id,
            span_id = %self.context.span_id,
            operation = %self.context.operation,
            transactions,
            latency_ms,
            "Operation complete"
        );
    }

    pub fn log_operation_failed(&self, category: &str, error: &str, latency_ms: u64) {
        tracing::warn!(
            correlation_id = %self.context.correlation_id,
            trace_id = %self.context.trace_id,
            span_id = %self.context.span_id,
            operation = %self.context.operation,
            category,
            error,
            latency_ms,
            "Operation failed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_logger_opens_child_span() {
        let root = TraceContext::new("build_multiple_delegate_and_lock");
        let logger = PipelineLogger::new(&root);
        let group = logger.group(2);

        assert_eq!(group.context().trace_id, root.trace_id);
        assert_eq!(group.correlation_id(), root.correlation_id());
        assert_eq!(
            group.context().parent_span_id.as_deref(),
            Some(root.span_id.as_str())
        );
        assert_ne!(group.context().span_id, root.span_id);
        assert_eq!(
            group.context().operation,
            "build_multiple_delegate_and_lock.group_2"
        );
    }

    #[test]
    fn test_groups_get_distinct_spans() {
        let logger = PipelineLogger::new(&TraceContext::new("build_transfer_transactions"));
        let (a, b) = (logger.group(0), logger.group(1));

        assert_ne!(a.context().span_id, b.context().span_id);
        assert_eq!(a.context().parent_span_id, b.context().parent_span_id);
    }
}
