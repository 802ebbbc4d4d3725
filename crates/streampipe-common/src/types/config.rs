use serde::{Deserialize, Serialize};

/// Encodeur vidéo par défaut (H.264 logiciel)
pub const DEFAULT_ENCODER: &str = "libx264";
/// Preset du passage de préprocessing (vitesse avant tout)
pub const DEFAULT_PREPROCESS_PRESET: &str = "ultrafast";
/// Niveau de log ffmpeg par défaut
pub const DEFAULT_LOG_LEVEL: &str = "error";

/// Configuration d'un run de streaming, appliquée à `start()` et
/// immuable jusqu'à l'arrêt
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamConfig {
    /// URL RTMP de destination
    pub destination: String,
    /// Identifiant injecté dans l'URL si le schéma est `rtmp://`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Encodeur vidéo ffmpeg
    #[serde(default = "default_encoder")]
    pub encoder: String,
    /// Preset de l'encodeur (défaut: `ultrafast` en préprocessing)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preset: Option<String>,
    /// Bitrate maximal, par exemple `"3000k"`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_bitrate: Option<String>,
    /// Taille de GOP en frames
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyframe_interval: Option<u32>,
    /// Niveau de log passé à ffmpeg
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_encoder() -> String {
    DEFAULT_ENCODER.to_string()
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            destination: String::new(),
            username: None,
            password: None,
            encoder: default_encoder(),
            preset: None,
            max_bitrate: None,
            keyframe_interval: None,
            log_level: default_log_level(),
        }
    }
}

impl StreamConfig {
    /// URL de destination avec `user:pass@` injecté si le schéma est rtmp://
    pub fn destination_with_credentials(&self) -> String {
        match (&self.username, &self.password) {
            (Some(user), Some(pass)) if self.destination.starts_with("rtmp://") => {
                let rest = &self.destination["rtmp://".len()..];
                format!("rtmp://{}:{}@{}", user, pass, rest)
            }
            _ => self.destination.clone(),
        }
    }
}
