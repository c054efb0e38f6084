//! Two-phase readiness for components whose backing state is created in the
//! background.
//!
//! A [`ReadinessFlag`] starts out not ready. Whoever owns the background
//! initialisation subscribes for a [`Token`] and later redeems it with
//! [`Readiness::mark_ready`]. Dependent code either checks
//! [`Readiness::is_ready`] and skips work, or awaits
//! [`Readiness::wait_ready`].

use std::collections::HashSet;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicI32;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::sync::watch;
use tokio::time;

pub mod errors;

pub use errors::ReadinessError;

/// Upper bound on how long token bookkeeping may wait for its lock.
const LOCK_TIMEOUT: Duration = Duration::from_millis(1000);

/// Opaque handle returned by [`Readiness::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Token(i32);

#[async_trait]
pub trait Readiness: Send + Sync + 'static {
    /// Non-blocking check.
    fn is_ready(&self) -> bool;

    /// Registers a party that will later mark the flag ready.
    async fn subscribe(&self) -> Result<Token, ReadinessError>;

    /// Flips the flag when `token` is a live subscription. Returns `false`
    /// for unknown tokens or when the flag was already ready.
    async fn mark_ready(&self, token: Token) -> Result<bool, ReadinessError>;

    /// Resolves once the flag is ready.
    async fn wait_ready(&self);
}

#[derive(Debug)]
pub struct ReadinessFlag {
    ready: AtomicBool,
    next_id: AtomicI32,
    tokens: Mutex<HashSet<Token>>,
    tx: watch::Sender<bool>,
}

impl ReadinessFlag {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            ready: AtomicBool::new(false),
            next_id: AtomicI32::new(1),
            tokens: Mutex::new(HashSet::new()),
            tx,
        }
    }

    async fn with_tokens<R>(
        &self,
        f: impl FnOnce(&mut HashSet<Token>) -> R + Send,
    ) -> Result<R, ReadinessError> {
        let mut tokens = time::timeout(LOCK_TIMEOUT, self.tokens.lock())
            .await
            .map_err(|_| ReadinessError::TokenLockFailed)?;
        Ok(f(&mut tokens))
    }
}

impl Default for ReadinessFlag {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Readiness for ReadinessFlag {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    async fn subscribe(&self) -> Result<Token, ReadinessError> {
        if self.is_ready() {
            return Err(ReadinessError::FlagAlreadyReady);
        }
        let token = Token(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.with_tokens(|tokens| {
            tokens.insert(token);
        })
        .await?;
        Ok(token)
    }

    async fn mark_ready(&self, token: Token) -> Result<bool, ReadinessError> {
        if self.is_ready() {
            return Ok(false);
        }
        let redeemed = self
            .with_tokens(|tokens| {
                if tokens.remove(&token) {
                    tokens.clear();
                    true
                } else {
                    false
                }
            })
            .await?;
        if !redeemed {
            return Ok(false);
        }
        self.ready.store(true, Ordering::Release);
        self.tx.send_replace(true);
        Ok(true)
    }

    async fn wait_ready(&self) {
        if self.is_ready() {
            return;
        }
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this only returns once ready.
        let _ = rx.wait_for(|ready| *ready).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use assert_matches::assert_matches;

    use super::*;

    #[tokio::test]
    async fn starts_not_ready() {
        let flag = ReadinessFlag::new();
        assert!(!flag.is_ready());
    }

    #[tokio::test]
    async fn subscribed_token_marks_ready() {
        let flag = ReadinessFlag::new();
        let token = flag.subscribe().await.expect("subscribe");
        assert!(flag.mark_ready(token).await.expect("mark ready"));
        assert!(flag.is_ready());
    }

    #[tokio::test]
    async fn unknown_token_is_rejected() {
        let flag = ReadinessFlag::new();
        let _token = flag.subscribe().await.expect("subscribe");
        assert!(!flag.mark_ready(Token(999)).await.expect("mark ready"));
        assert!(!flag.is_ready());
    }

    #[tokio::test]
    async fn second_mark_is_a_no_op() {
        let flag = ReadinessFlag::new();
        let first = flag.subscribe().await.expect("subscribe");
        let second = flag.subscribe().await.expect("subscribe");
        assert!(flag.mark_ready(first).await.expect("mark ready"));
        assert!(!flag.mark_ready(second).await.expect("mark ready"));
    }

    #[tokio::test]
    async fn subscribe_after_ready_fails() {
        let flag = ReadinessFlag::new();
        let token = flag.subscribe().await.expect("subscribe");
        flag.mark_ready(token).await.expect("mark ready");
        assert_matches!(
            flag.subscribe().await,
            Err(ReadinessError::FlagAlreadyReady)
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn wait_ready_resolves_after_background_mark() {
        let flag = Arc::new(ReadinessFlag::new());
        let token = flag.subscribe().await.expect("subscribe");

        let background = Arc::clone(&flag);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            background.mark_ready(token).await.expect("mark ready")
        });

        tokio::time::timeout(Duration::from_secs(5), flag.wait_ready())
            .await
            .expect("flag never became ready");
        assert!(handle.await.expect("join"));
    }
}
