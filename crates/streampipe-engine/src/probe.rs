use serde::Deserialize;
use std::path::Path;
use tokio::process::Command;
use tracing::warn;

/// Décisions de transcodage dérivées d'un passage de ffprobe sur la source
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProbeInfo {
    /// La piste vidéo doit être ré-encodée (HEVC, 10 bits, profils exotiques)
    pub needs_video_reencode: bool,
    /// La piste audio doit être ré-encodée (ni AAC ni MP3)
    pub needs_audio_reencode: bool,
    /// Un mapping explicite est requis (sous-titres présents ou plus de 5 streams)
    pub needs_explicit_mapping: bool,
    /// Une piste audio existe dans la source
    pub has_audio: bool,
    /// Durée totale en secondes (0 si inconnue)
    pub duration_seconds: f64,
}

impl ProbeInfo {
    /// Valeur de repli quand ffprobe échoue: tout ré-encoder
    pub fn conservative() -> Self {
        Self {
            needs_video_reencode: true,
            needs_audio_reencode: true,
            needs_explicit_mapping: true,
            has_audio: true,
            duration_seconds: 0.0,
        }
    }
}

/// Sortie JSON de ffprobe
#[derive(Debug, Deserialize)]
struct FFProbeOutput {
    #[serde(default)]
    format: Option<FFProbeFormat>,
    #[serde(default)]
    streams: Vec<FFProbeStream>,
}

#[derive(Debug, Deserialize)]
struct FFProbeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FFProbeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    pix_fmt: Option<String>,
    profile: Option<String>,
    duration: Option<String>,
}

/// Prober un fichier source. N'échoue jamais: toute erreur de ffprobe ou de
/// parsing dégrade vers le repli conservateur et un avertissement.
pub async fn probe_file(ffprobe_bin: &Path, input: &Path) -> ProbeInfo {
    let output = Command::new(ffprobe_bin)
        .args(["-v", "quiet", "-print_format", "json", "-show_format", "-show_streams"])
        .arg(input)
        .output()
        .await;

    let output = match output {
        Ok(output) if output.status.success() => output,
        Ok(output) => {
            warn!(
                "ffprobe a échoué sur {} (code {:?}), repli conservateur",
                input.display(),
                output.status.code()
            );
            return ProbeInfo::conservative();
        }
        Err(e) => {
            warn!(
                "impossible d'exécuter ffprobe sur {}: {}, repli conservateur",
                input.display(),
                e
            );
            return ProbeInfo::conservative();
        }
    };

    match parse_probe_output(&String::from_utf8_lossy(&output.stdout)) {
        Ok(info) => info,
        Err(e) => {
            warn!(
                "sortie ffprobe illisible pour {}: {}, repli conservateur",
                input.display(),
                e
            );
            ProbeInfo::conservative()
        }
    }
}

/// Dériver les décisions de transcodage du JSON de ffprobe
pub fn parse_probe_output(json: &str) -> anyhow::Result<ProbeInfo> {
    let probe: FFProbeOutput = serde_json::from_str(json)?;

    let mut first_video: Option<&FFProbeStream> = None;
    let mut first_audio: Option<&FFProbeStream> = None;
    let mut has_subtitles = false;

    for stream in &probe.streams {
        match stream.codec_type.as_deref() {
            Some("video") => {
                if first_video.is_none() {
                    first_video = Some(stream);
                }
            }
            Some("audio") => {
                if first_audio.is_none() {
                    first_audio = Some(stream);
                }
            }
            Some("subtitle") => has_subtitles = true,
            _ => {}
        }
    }

    let needs_video_reencode = match first_video {
        Some(stream) => video_needs_reencode(stream),
        None => true,
    };

    let needs_audio_reencode = match first_audio {
        Some(stream) => !matches!(stream.codec_name.as_deref(), Some("aac") | Some("mp3")),
        None => true,
    };

    let needs_explicit_mapping = has_subtitles || probe.streams.len() > 5;

    // durée: conteneur d'abord, puis premier stream vidéo, puis audio
    let duration_seconds = probe
        .format
        .as_ref()
        .and_then(|f| f.duration.as_deref())
        .or_else(|| first_video.and_then(|s| s.duration.as_deref()))
        .or_else(|| first_audio.and_then(|s| s.duration.as_deref()))
        .and_then(|d| d.parse::<f64>().ok())
        .unwrap_or(0.0);

    Ok(ProbeInfo {
        needs_video_reencode,
        needs_audio_reencode,
        needs_explicit_mapping,
        has_audio: first_audio.is_some(),
        duration_seconds,
    })
}

/// Règles de ré-encodage vidéo: HEVC toujours; H.264 seulement en 10 bits ou
/// profils High 4:4:4 / High 10; tout autre codec aussi
fn video_needs_reencode(stream: &FFProbeStream) -> bool {
    match stream.codec_name.as_deref() {
        Some("hevc") | Some("h265") => true,
        Some("h264") => {
            let ten_bit = stream
                .pix_fmt
                .as_deref()
                .map(|p| p.contains("10le") || p.contains("10be"))
                .unwrap_or(false);
            let profile = stream
                .profile
                .as_deref()
                .map(str::to_ascii_lowercase)
                .unwrap_or_default();
            ten_bit || profile.contains("high 4:4:4") || profile.contains("high 10")
        }
        _ => true,
    }
}
