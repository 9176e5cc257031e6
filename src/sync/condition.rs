//! Per-operation condition gating.
//!
//! Every operation kind carries a configurable boolean expression deciding
//! whether the computed change may proceed. The engine is agnostic to the
//! expression language: evaluation goes through the injected [`Evaluator`].
//! The literal strings `"true"` and `"false"` short-circuit without touching
//! the evaluator, so the overwhelmingly common default never pays for
//! interpreter start-up.

use crate::connector::Record;
use std::sync::Arc;

/// Failure to evaluate a condition, identifier or hook expression.
#[derive(Debug, thiserror::Error)]
#[error("failed to evaluate `{expression}`: {message}")]
pub struct EvaluationError {
    /// The expression that failed.
    pub expression: String,
    /// What went wrong, in the evaluator's words.
    pub message: String,
}

impl EvaluationError {
    /// Create an evaluation error for the given expression.
    pub fn new(expression: &str, message: impl Into<String>) -> Self {
        Self {
            expression: expression.to_string(),
            message: message.into(),
        }
    }
}

/// Variables bound for one evaluation: the records under reconciliation and
/// the owning task's name.
#[derive(Debug, Clone, Copy)]
pub struct Bindings<'a> {
    /// Name of the task driving the reconciliation.
    pub task: &'a str,
    /// Source record, absent on the clean path.
    pub source: Option<&'a Record>,
    /// Destination record, absent when the entry does not exist yet.
    pub destination: Option<&'a Record>,
}

/// Expression evaluation contract.
///
/// Implementations wrap whatever scripting engine the deployment uses; the
/// core only relies on boolean and string results.
pub trait Evaluator: Send + Sync {
    /// Evaluate an expression to a boolean.
    fn eval_boolean(&self, expression: &str, bindings: &Bindings<'_>)
    -> Result<bool, EvaluationError>;

    /// Evaluate an expression to a string, used for destination identifiers.
    fn eval_string(&self, expression: &str, bindings: &Bindings<'_>)
    -> Result<String, EvaluationError>;
}

/// Gate deciding whether an operation may proceed.
pub struct ConditionGate {
    evaluator: Arc<dyn Evaluator>,
}

impl ConditionGate {
    /// Create a gate around the given evaluator.
    pub fn new(evaluator: Arc<dyn Evaluator>) -> Self {
        Self { evaluator }
    }

    /// Evaluate a condition expression against the bound records.
    ///
    /// Literal `"true"` / `"false"` return immediately; anything else is
    /// delegated to the evaluator.
    pub fn allow(
        &self,
        expression: &str,
        bindings: &Bindings<'_>,
    ) -> Result<bool, EvaluationError> {
        match expression.trim() {
            "true" => Ok(true),
            "false" => Ok(false),
            other => self.evaluator.eval_boolean(other, bindings),
        }
    }
}

/// Default evaluator accepting only boolean literals.
///
/// Deployments without a scripting engine run with this; any non-literal
/// expression is a configuration problem surfaced as an [`EvaluationError`].
pub struct LiteralEvaluator;

impl Evaluator for LiteralEvaluator {
    fn eval_boolean(
        &self,
        expression: &str,
        _bindings: &Bindings<'_>,
    ) -> Result<bool, EvaluationError> {
        match expression.trim() {
            "true" => Ok(true),
            "false" => Ok(false),
            other => Err(EvaluationError::new(
                other,
                "literal evaluator only understands boolean literals",
            )),
        }
    }

    fn eval_string(
        &self,
        expression: &str,
        _bindings: &Bindings<'_>,
    ) -> Result<String, EvaluationError> {
        Err(EvaluationError::new(
            expression,
            "literal evaluator cannot produce strings",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Evaluator that panics when invoked, proving the literal fast path.
    struct PanicEvaluator;

    impl Evaluator for PanicEvaluator {
        fn eval_boolean(&self, _: &str, _: &Bindings<'_>) -> Result<bool, EvaluationError> {
            panic!("evaluator must not run for literal conditions");
        }

        fn eval_string(&self, _: &str, _: &Bindings<'_>) -> Result<String, EvaluationError> {
            panic!("evaluator must not run for literal conditions");
        }
    }

    struct RecordingEvaluator {
        invoked: std::sync::atomic::AtomicBool,
    }

    impl Evaluator for RecordingEvaluator {
        fn eval_boolean(&self, _: &str, _: &Bindings<'_>) -> Result<bool, EvaluationError> {
            self.invoked.store(true, std::sync::atomic::Ordering::Relaxed);
            Ok(true)
        }

        fn eval_string(&self, e: &str, _: &Bindings<'_>) -> Result<String, EvaluationError> {
            Err(EvaluationError::new(e, "unsupported"))
        }
    }

    fn bindings() -> Bindings<'static> {
        Bindings {
            task: "test",
            source: None,
            destination: None,
        }
    }

    #[test]
    fn literals_never_invoke_the_evaluator() {
        let gate = ConditionGate::new(Arc::new(PanicEvaluator));
        assert!(gate.allow("true", &bindings()).unwrap());
        assert!(!gate.allow("false", &bindings()).unwrap());
        assert!(gate.allow("  true ", &bindings()).unwrap());
    }

    #[test]
    fn non_literals_always_delegate() {
        let evaluator = Arc::new(RecordingEvaluator {
            invoked: std::sync::atomic::AtomicBool::new(false),
        });
        let gate = ConditionGate::new(evaluator.clone());
        assert!(gate.allow("src.cn == dst.cn", &bindings()).unwrap());
        assert!(evaluator.invoked.load(std::sync::atomic::Ordering::Relaxed));
    }

    #[test]
    fn literal_evaluator_rejects_expressions() {
        let evaluator = LiteralEvaluator;
        assert!(evaluator.eval_boolean("true", &bindings()).unwrap());
        assert!(evaluator.eval_boolean("1 == 1", &bindings()).is_err());
        assert!(evaluator.eval_string("anything", &bindings()).is_err());
    }
}
