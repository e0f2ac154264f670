use serde::Serialize;
use tokio::sync::watch;

/// Transient state of the discrete action currently tracked by the UI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ActionState {
    /// Key of the running action, if any.
    pub loading_key: Option<String>,
    /// Human-readable error of the last failed action or autosave.
    pub error: Option<String>,
    /// Confirmation message of the last successful action.
    pub success: Option<String>,
}

/// Loading state of the aggregate itself. A failure here is fatal to the view, unlike
/// [`ActionState::error`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "message", rename_all = "snake_case")]
pub enum LoadState {
    /// Nothing requested yet.
    #[default]
    Idle,
    /// Initial fetch or refresh in progress.
    Loading,
    /// Aggregate available in the store.
    Ready,
    /// The primary fetch failed.
    Failed(String),
}

/// Shared cell broadcasting [`ActionState`] changes.
pub struct ActionStateCell {
    inner: watch::Sender<ActionState>,
}

impl Default for ActionStateCell {
    fn default() -> Self {
        Self::new()
    }
}

impl ActionStateCell {
    /// Create an idle cell.
    pub fn new() -> Self {
        let (inner, _rx) = watch::channel(ActionState::default());
        Self { inner }
    }

    /// Current state.
    pub fn get(&self) -> ActionState {
        self.inner.borrow().clone()
    }

    /// Observe changes.
    pub fn subscribe(&self) -> watch::Receiver<ActionState> {
        self.inner.subscribe()
    }

    /// Mark `key` as running and reset the previous outcome.
    pub fn start(&self, key: &str) {
        self.inner.send_replace(ActionState {
            loading_key: Some(key.to_string()),
            error: None,
            success: None,
        });
    }

    /// Clear loading and record a success message.
    pub fn succeed(&self, message: Option<String>) {
        self.inner.send_modify(|state| {
            state.loading_key = None;
            state.error = None;
            state.success = message;
        });
    }

    /// Clear loading and record an error message.
    pub fn fail(&self, message: String) {
        self.inner.send_modify(|state| {
            state.loading_key = None;
            state.success = None;
            state.error = Some(message);
        });
    }

    /// Record a background error without touching the loading key.
    pub fn report_error(&self, message: String) {
        self.inner.send_modify(|state| state.error = Some(message));
    }

    /// Forget the last outcome.
    pub fn dismiss(&self) {
        self.inner.send_modify(|state| {
            state.error = None;
            state.success = None;
        });
    }
}
