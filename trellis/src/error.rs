use std::future::Future;
use std::pin::Pin;

/// The error type service implementations return.
///
/// Implementations that want full control over what a client sees return a
/// [`crate::Status`] (boxed through this alias); anything else is treated as
/// an internal failure and redacted at the wire boundary.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub(crate) type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
