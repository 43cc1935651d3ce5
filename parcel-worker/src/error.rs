use thiserror::Error;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("failed to install signal handler: {0}")]
    SignalSetup(#[source] std::io::Error),
}
