use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Background tasks owned by one session. Shutting down cancels and aborts all of them.
#[derive(Debug, Default)]
pub(crate) struct TaskGroup {
    token: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl TaskGroup {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// A child token; cancelling it does not cancel siblings.
    pub(crate) fn child_token(&self) -> CancellationToken {
        self.token.child_token()
    }

    pub(crate) fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handles.push(tokio::spawn(task));
    }

    pub(crate) fn shutdown(&mut self) {
        self.token.cancel();
        for handle in self.handles.drain(..) {
            handle.abort();
        }
    }
}

impl Drop for TaskGroup {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Interrupted {
    TimedOut,
    Cancelled,
}

/// Run `fut` with a deadline, giving up early if `token` is cancelled.
pub(crate) async fn bounded<F>(
    limit: Duration,
    token: &CancellationToken,
    fut: F,
) -> Result<F::Output, Interrupted>
where
    F: Future,
{
    tokio::select! {
        biased;
        () = token.cancelled() => Err(Interrupted::Cancelled),
        result = tokio::time::timeout(limit, fut) => result.map_err(|_| Interrupted::TimedOut),
    }
}

/// Sleep for `delay`; returns `false` if cancelled first.
pub(crate) async fn sleep_or_cancel(delay: Duration, token: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        () = token.cancelled() => false,
        () = tokio::time::sleep(delay) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn bounded_reports_timeout() {
        let token = CancellationToken::new();
        let result = bounded(Duration::from_secs(30), &token, std::future::pending::<()>()).await;
        assert_eq!(result, Err(Interrupted::TimedOut));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_token_wins_over_work() {
        let token = CancellationToken::new();
        token.cancel();
        let result = bounded(Duration::from_secs(30), &token, async { 7 }).await;
        assert_eq!(result, Err(Interrupted::Cancelled));
        assert!(!sleep_or_cancel(Duration::from_secs(1), &token).await);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_aborts_spawned_tasks() {
        let mut group = TaskGroup::new();
        let token = group.child_token();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<u32>();
        group.spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(1)).await;
                if tx.send(1).is_err() {
                    return;
                }
            }
        });
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        group.shutdown();
        assert!(token.is_cancelled());
        while rx.try_recv().is_ok() {}
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_err());
    }
}
