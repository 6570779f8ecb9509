//! Per-item error policies for backends.

use titlemgr_core::DataOpError;

/// Callback deciding whether an operation continues after an item error.
pub type ErrorCallback = Box<dyn FnMut(u32, &DataOpError) -> bool + Send>;

/// How a backend answers `on_item_error`.
///
/// Cancellation is never continued, whatever the policy.
#[derive(Default)]
pub enum ErrorPolicy {
    /// Stop at the first failure.
    #[default]
    Abort,
    /// Record the failure and move on to the next item.
    SkipAndContinue,
    /// Move on only if a later item exists; a failure on the last item
    /// stops the operation.
    ContinueUnlessLast { total: u32 },
    /// Ask the caller.
    Custom(ErrorCallback),
}

impl ErrorPolicy {
    /// Wrap a closure as a policy.
    pub fn custom(callback: impl FnMut(u32, &DataOpError) -> bool + Send + 'static) -> Self {
        Self::Custom(Box::new(callback))
    }

    /// Decide whether to continue after `error` on item `index`.
    pub fn decide(&mut self, index: u32, error: &DataOpError) -> bool {
        if error.is_cancelled() {
            return false;
        }
        match self {
            Self::Abort => false,
            Self::SkipAndContinue => true,
            Self::ContinueUnlessLast { total } => index.saturating_add(1) < *total,
            Self::Custom(callback) => callback(index, error),
        }
    }
}

impl std::fmt::Debug for ErrorPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Abort => write!(f, "Abort"),
            Self::SkipAndContinue => write!(f, "SkipAndContinue"),
            Self::ContinueUnlessLast { total } => {
                f.debug_struct("ContinueUnlessLast").field("total", total).finish()
            }
            Self::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}
