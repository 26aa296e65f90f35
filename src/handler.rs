use std::future::Future;

use crate::error::TaskError;

/// The unit of work run once per task attempt.
///
/// Implement this for your domain (create one account, fetch one mailbox...).
/// The executor may call `execute` more than once for the same item when an
/// attempt fails, so implementations must be safe to repeat.
///
/// # Example
///
/// ```ignore
/// use bulk_executor::*;
///
/// struct CreateAccount {
///     client: reqwest::Client,
/// }
///
/// impl TaskHandler<String> for CreateAccount {
///     type Output = String;
///
///     async fn execute(&self, address: &String) -> Result<String, TaskError> {
///         let resp = self.client.post("https://api/accounts").json(address).send().await?;
///         if resp.status() == 422 {
///             return Err(TaskError::permanent("address rejected").with_status(422));
///         }
///         Ok(resp.text().await?)
///     }
/// }
/// ```
pub trait TaskHandler<T>: Send + Sync + 'static {
    type Output: Send + 'static;

    fn execute(&self, data: &T) -> impl Future<Output = Result<Self::Output, TaskError>> + Send;
}

/// Adapter returned by [`handler_fn`].
#[derive(Clone)]
pub struct HandlerFn<F> {
    f: F,
}

/// Wrap an async closure as a [`TaskHandler`]. The item is cloned into every call.
///
/// ```
/// use bulk_executor::{handler_fn, TaskError};
///
/// let handler = handler_fn(|n: u32| async move {
///     if n == 0 {
///         Err(TaskError::permanent("zero"))
///     } else {
///         Ok(n * 2)
///     }
/// });
/// # let _ = handler;
/// ```
pub fn handler_fn<F>(f: F) -> HandlerFn<F> {
    HandlerFn { f }
}

impl<T, F, Fut, R> TaskHandler<T> for HandlerFn<F>
where
    T: Clone + Send + Sync + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, TaskError>> + Send,
    R: Send + 'static,
{
    type Output = R;

    fn execute(&self, data: &T) -> impl Future<Output = Result<R, TaskError>> + Send {
        (self.f)(data.clone())
    }
}
