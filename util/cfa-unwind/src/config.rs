//! Capacities and tunables for CFA evaluation.

use core::sync::atomic::{AtomicUsize, Ordering};

/// Register rule entries shared by all snapshots of a [`CfaState`](crate::CfaState).
pub const MAX_REGISTERS: usize = 100;

/// Hash buckets per snapshot.
pub const BUCKET_COUNT: usize = 14;

/// Snapshots in a [`CfaState`](crate::CfaState), the current one included.
pub const MAX_STATES: usize = 6;

/// Depth of the DWARF expression stack.
pub const EXPR_STACK_DEPTH: usize = 100;

const DEFAULT_MAX_EXPRESSION_STEPS: usize = 1024;

/// Global bound on operations executed by one expression evaluation.
static MAX_EXPRESSION_STEPS: AtomicUsize = AtomicUsize::new(DEFAULT_MAX_EXPRESSION_STEPS);

/// Sets the maximum number of operations one expression may execute.
pub fn set_max_expression_steps(steps: usize) {
    if steps > 0 {
        MAX_EXPRESSION_STEPS.store(steps, Ordering::Relaxed);
    }
}

/// Returns the maximum number of operations one expression may execute.
pub fn max_expression_steps() -> usize {
    MAX_EXPRESSION_STEPS.load(Ordering::Relaxed)
}
