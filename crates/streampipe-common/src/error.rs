use thiserror::Error;

/// Erreurs distinguées par le moteur de streaming
#[derive(Debug, Error)]
pub enum EngineError {
    /// `start()` appelé alors qu'un run est déjà en cours
    #[error("stream is already running")]
    AlreadyRunning,

    /// Job invalide (timestamp, sous-titres): fatal au job, pas au moteur
    #[error("{0}")]
    Validation(String),

    /// Le pipe nommé n'a pas pu être créé ou ouvert
    #[error("named pipe error: {0}")]
    Pipe(String),

    /// Un sous-processus ffmpeg s'est terminé avec un code non nul
    #[error("{message}")]
    Subprocess { message: String },

    /// Le scope du sous-processus a été annulé (skip ou stop), bénin
    #[error("subprocess cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EngineError {
    /// L'erreur provient-elle d'une annulation de scope
    pub fn is_cancellation(&self) -> bool {
        matches!(self, EngineError::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
