//! Runs discrete user actions while tracking their progress in [`ActionStateCell`].

use std::{future::Future, sync::Arc};

use futures::future::BoxFuture;
use tracing::{info, warn};

use crate::{error::ServiceError, state::action::ActionStateCell};

/// Follow-up fetch executed after a successful action.
pub type Refresh<'a> = BoxFuture<'a, Result<(), ServiceError>>;

/// Wraps actions with loading, error and success reporting.
///
/// Only one action is tracked at a time; callers must not start a second action under the
/// same key while one is running.
#[derive(Clone)]
pub struct ActionRunner {
    state: Arc<ActionStateCell>,
}

impl ActionRunner {
    /// Report through `state`.
    pub fn new(state: Arc<ActionStateCell>) -> Self {
        Self { state }
    }

    /// Run `action` under `key`, then `refresh` when given.
    ///
    /// The error of either step is reported with its user-facing message and returned.
    pub async fn run<T, A>(
        &self,
        key: &str,
        action: A,
        refresh: Option<Refresh<'_>>,
        success: Option<String>,
    ) -> Result<T, ServiceError>
    where
        A: Future<Output = Result<T, ServiceError>>,
    {
        self.state.start(key);

        let outcome = match action.await {
            Ok(value) => match refresh {
                Some(refresh) => refresh.await.map(|()| value),
                None => Ok(value),
            },
            Err(err) => Err(err),
        };

        match outcome {
            Ok(value) => {
                info!(action = key, "action completed");
                self.state.succeed(success);
                Ok(value)
            }
            Err(err) => {
                warn!(action = key, error = %err, "action failed");
                self.state.fail(err.user_message());
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    #[tokio::test]
    async fn success_refreshes_and_reports() {
        let state = Arc::new(ActionStateCell::new());
        let runner = ActionRunner::new(state.clone());
        let refreshed = AtomicBool::new(false);

        let observed = state.clone();
        let value = runner
            .run(
                "invite",
                async move {
                    assert_eq!(observed.get().loading_key.as_deref(), Some("invite"));
                    Ok(42)
                },
                Some(Box::pin(async {
                    refreshed.store(true, Ordering::SeqCst);
                    Ok(())
                })),
                Some("Invitation sent".into()),
            )
            .await
            .unwrap();

        assert_eq!(value, 42);
        assert!(refreshed.load(Ordering::SeqCst));
        let after = state.get();
        assert_eq!(after.loading_key, None);
        assert_eq!(after.success.as_deref(), Some("Invitation sent"));
        assert_eq!(after.error, None);
    }

    #[tokio::test]
    async fn failure_skips_refresh_and_reports_message() {
        let state = Arc::new(ActionStateCell::new());
        let runner = ActionRunner::new(state.clone());
        let refreshed = AtomicBool::new(false);

        let result: Result<(), _> = runner
            .run(
                "kick",
                async { Err(ServiceError::NotFound("Participant".into())) },
                Some(Box::pin(async {
                    refreshed.store(true, Ordering::SeqCst);
                    Ok(())
                })),
                Some("done".into()),
            )
            .await;

        assert!(matches!(result, Err(ServiceError::NotFound(_))));
        assert!(!refreshed.load(Ordering::SeqCst));
        let after = state.get();
        assert_eq!(after.loading_key, None);
        assert_eq!(after.success, None);
        assert_eq!(after.error.as_deref(), Some("Participant could not be found"));
    }

    #[tokio::test]
    async fn refresh_failure_is_reported() {
        let state = Arc::new(ActionStateCell::new());
        let runner = ActionRunner::new(state.clone());

        let result = runner
            .run(
                "playlist",
                async { Ok(()) },
                Some(Box::pin(async { Err(ServiceError::Network("reset".into())) })),
                None,
            )
            .await;

        assert!(result.is_err());
        assert_eq!(state.get().error.as_deref(), Some("Could not reach the server"));
    }
}
