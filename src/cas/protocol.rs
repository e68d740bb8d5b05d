use super::{CasError, CasOperation, CasResult};
use crate::core::{MapperError, Result};
use crate::store::StatementOutcome;
use log::debug;
use std::sync::Arc;

/// Receives the outcome of a conditional write instead of the caller
/// getting a `CasRejected` error.
pub trait CasResultListener: Send + Sync {
    fn on_cas_success(&self);

    fn on_cas_error(&self, error: &CasError);
}

/// Interprets the store's answer to a conditional write.
///
/// Applied writes notify the listener, if any. Rejected writes go to the
/// listener when one is registered and become `MapperError::CasRejected`
/// otherwise.
pub fn interpret_outcome(
    operation: CasOperation,
    outcome: StatementOutcome,
    listener: Option<&Arc<dyn CasResultListener>>,
) -> Result<CasResult> {
    if outcome.applied {
        if let Some(listener) = listener {
            listener.on_cas_success();
        }
        return Ok(CasResult::applied());
    }

    let error = CasError {
        operation,
        current_values: outcome.current_values.unwrap_or_default(),
    };
    debug!("{}", error);

    match listener {
        Some(listener) => {
            listener.on_cas_error(&error);
            Ok(CasResult::rejected(error.current_values))
        }
        None => Err(MapperError::CasRejected(error)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Row, Value};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        successes: Mutex<usize>,
        errors: Mutex<Vec<CasError>>,
    }

    impl CasResultListener for Recorder {
        fn on_cas_success(&self) {
            *self.successes.lock().unwrap() += 1;
        }

        fn on_cas_error(&self, error: &CasError) {
            self.errors.lock().unwrap().push(error.clone());
        }
    }

    fn rejected_outcome() -> StatementOutcome {
        let mut row = Row::new();
        row.insert("id".to_string(), Value::from(10));
        StatementOutcome {
            applied: false,
            current_values: Some(row),
        }
    }

    #[test]
    fn test_rejection_without_listener_is_an_error() {
        let err = interpret_outcome(CasOperation::Update, rejected_outcome(), None).unwrap_err();
        match err {
            MapperError::CasRejected(cas) => {
                assert_eq!(cas.operation, CasOperation::Update);
                assert_eq!(cas.current_values.get("id"), Some(&Value::from(10)));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_rejection_with_listener_is_routed() {
        let recorder = Arc::new(Recorder::default());
        let listener: Arc<dyn CasResultListener> = recorder.clone();

        let result =
            interpret_outcome(CasOperation::Delete, rejected_outcome(), Some(&listener)).unwrap();

        assert!(!result.applied);
        assert_eq!(recorder.errors.lock().unwrap().len(), 1);
        assert_eq!(*recorder.successes.lock().unwrap(), 0);
    }

    #[test]
    fn test_applied_notifies_listener() {
        let recorder = Arc::new(Recorder::default());
        let listener: Arc<dyn CasResultListener> = recorder.clone();

        let result =
            interpret_outcome(CasOperation::Insert, StatementOutcome::applied(), Some(&listener))
                .unwrap();

        assert!(result.applied);
        assert_eq!(*recorder.successes.lock().unwrap(), 1);
        assert!(recorder.errors.lock().unwrap().is_empty());
    }
}
