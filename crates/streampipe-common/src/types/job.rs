use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Position d'ancrage du filigrane dans l'image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverlayPosition {
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

impl Default for OverlayPosition {
    fn default() -> Self {
        Self::BottomRight
    }
}

/// Réglages du filigrane (nom du fichier incrusté dans la vidéo)
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverlaySettings {
    /// Incruster le nom du fichier source
    pub show_filename: bool,
    /// Coin de l'image où dessiner le texte
    #[serde(default)]
    pub position: OverlayPosition,
    /// Taille de police en pixels
    pub font_size: u32,
}

impl Default for OverlaySettings {
    fn default() -> Self {
        Self {
            show_filename: false,
            position: OverlayPosition::BottomRight,
            font_size: 24,
        }
    }
}

/// Requête d'ajout d'un fichier à la playlist (forme JSON du plan de contrôle)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRequest {
    /// Chemin absolu du fichier source
    pub file: PathBuf,
    /// Filigrane optionnel
    #[serde(default)]
    pub overlay: OverlaySettings,
    /// Position de départ (secondes décimales ou `HH:MM:SS[.fff]`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_timestamp: Option<String>,
    /// Fichier de sous-titres à incruster
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitle_file: Option<PathBuf>,
}

/// Entrée de la playlist, immuable une fois en queue
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamJob {
    /// Identifiant unique, croissant (horodatage nanoseconde)
    pub id: String,
    pub file: PathBuf,
    pub overlay: OverlaySettings,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_timestamp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitle_file: Option<PathBuf>,
}

impl StreamJob {
    /// Créer un job à partir d'une requête, en lui attribuant son identifiant
    pub fn from_request(request: JobRequest) -> Self {
        let id = Utc::now().timestamp_nanos_opt().unwrap_or(0).to_string();
        Self {
            id,
            file: request.file,
            overlay: request.overlay,
            start_timestamp: request.start_timestamp,
            subtitle_file: request.subtitle_file,
        }
    }

    /// Référence courte `{id, file}` renvoyée au plan de contrôle
    pub fn as_ref_info(&self) -> JobRef {
        JobRef {
            id: self.id.clone(),
            file: self.file.clone(),
        }
    }
}

/// Référence `{id, file}` d'un job (réponse d'enqueue, champ `playing` du status)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRef {
    pub id: String,
    pub file: PathBuf,
}
