use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReadinessError {
    #[error("timed out waiting for the readiness token lock")]
    TokenLockFailed,
    #[error("readiness flag is already ready")]
    FlagAlreadyReady,
}
