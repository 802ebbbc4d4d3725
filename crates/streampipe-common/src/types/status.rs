use super::JobRef;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Dernière erreur fatale du moteur, conservée jusqu'au prochain `start()`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastError {
    pub message: String,
    pub time: DateTime<Utc>,
}

impl LastError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            time: Utc::now(),
        }
    }
}

/// Instantané de l'état du moteur exposé au plan de contrôle
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatus {
    /// Un run est en cours
    pub running: bool,
    /// Un job est effectivement en train d'être poussé dans le pipe
    pub actively_streaming: bool,
    /// Nombre de jobs en attente
    pub queue_length: usize,
    /// Job courant, s'il y en a un
    #[serde(skip_serializing_if = "Option::is_none")]
    pub playing: Option<JobRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<LastError>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_status_json_shape() {
        let status = EngineStatus {
            running: true,
            actively_streaming: true,
            queue_length: 2,
            playing: Some(JobRef {
                id: "123".to_string(),
                file: PathBuf::from("/videos/clip.mp4"),
            }),
            error: None,
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["running"], true);
        assert_eq!(json["activelyStreaming"], true);
        assert_eq!(json["queueLength"], 2);
        assert_eq!(json["playing"]["id"], "123");
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_idle_status_omits_playing() {
        let status = EngineStatus {
            running: false,
            actively_streaming: false,
            queue_length: 0,
            playing: None,
            error: None,
        };
        let json = serde_json::to_string(&status).unwrap();
        assert!(!json.contains("playing"));
    }
}
