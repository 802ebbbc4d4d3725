use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Télémétrie agrégée d'un bloc `-progress` de ffmpeg
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    /// Frame courante
    pub frame: u64,
    /// FPS instantané
    pub fps: f64,
    /// Bitrate tel que rapporté par ffmpeg (ex: `"1234.5kbits/s"`)
    pub bitrate: String,
    /// Octets écrits sur la sortie
    pub total_bytes: u64,
    /// Temps de sortie en microsecondes
    pub out_time_micros: i64,
    /// Temps de sortie au format horloge (ex: `"00:01:23.456000"`)
    pub out_time: String,
    /// Frames dupliquées
    pub dup_frames: u64,
    /// Frames abandonnées
    pub drop_frames: u64,
    /// Vitesse relative (ex: `"1.01x"`)
    pub speed: String,
    /// `continue` pendant la lecture, `end` à la fin du flux
    pub progress: String,
    /// Horodatage mur à l'émission du bloc
    pub timestamp: DateTime<Utc>,
    /// Durée totale du fichier courant (0 si inconnue)
    pub duration_seconds: f64,
    /// Progression en pourcentage, bornée à [0, 100]
    pub percentage: f64,
}

impl Default for Progress {
    fn default() -> Self {
        Self {
            frame: 0,
            fps: 0.0,
            bitrate: String::new(),
            total_bytes: 0,
            out_time_micros: 0,
            out_time: String::new(),
            dup_frames: 0,
            drop_frames: 0,
            speed: String::new(),
            progress: String::new(),
            timestamp: Utc::now(),
            duration_seconds: 0.0,
            percentage: 0.0,
        }
    }
}

impl Progress {
    /// Le flux est-il arrivé à son terme
    pub fn is_end(&self) -> bool {
        self.progress == "end"
    }
}
