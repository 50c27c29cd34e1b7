use tokio_util::sync::CancellationToken;

use crate::status::Status;

/// A cancellable context scoping one call (or one connection).
///
/// Every blocking step in the call runtime races against the context, so
/// cancelling it promptly unblocks pending sends, receives and worker-side
/// waits with [`Context::error`]. Cancellation does not forcibly terminate a
/// service implementation that ignores its context; implementations are
/// expected to watch it themselves for long-running work.
#[derive(Clone, Debug)]
pub struct Context {
    token: CancellationToken,
}

impl Context {
    /// Creates a fresh, uncancelled context.
    pub fn new() -> Context {
        Context {
            token: CancellationToken::new(),
        }
    }

    /// Creates a child context: cancelled when its parent is cancelled, but
    /// cancellable on its own without affecting the parent.
    pub fn child(&self) -> Context {
        Context {
            token: self.token.child_token(),
        }
    }

    /// Cancels this context and all of its children.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether this context has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once this context is cancelled.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// The status every pending operation resolves with once the context is
    /// cancelled.
    pub fn error(&self) -> Status {
        Status::aborted("context cancelled")
    }
}

impl Default for Context {
    fn default() -> Context {
        Context::new()
    }
}
