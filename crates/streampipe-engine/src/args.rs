// Construit les vecteurs d'arguments ffmpeg des deux étages du pipeline.
// Fonction pure: mêmes entrées, même vecteur, aucun accès disque.

use std::path::Path;

use streampipe_common::{
    OverlayPosition, OverlaySettings, StreamConfig, StreamJob, DEFAULT_PREPROCESS_PRESET,
};

use crate::probe::ProbeInfo;

/// Requête de construction: `source` sélectionne le mode préprocessing,
/// `fifo_path` le mode streaming
#[derive(Debug, Clone, Copy)]
pub struct CommandRequest<'a> {
    pub source: Option<&'a StreamJob>,
    pub fifo_path: Option<&'a Path>,
    pub config: &'a StreamConfig,
    pub probe: &'a ProbeInfo,
}

/// Construire le vecteur d'arguments pour le mode demandé
pub fn build_ffmpeg_args(request: &CommandRequest<'_>) -> Vec<String> {
    if let Some(job) = request.source {
        preprocessing_args(job, request.config, request.probe)
    } else if let Some(fifo) = request.fifo_path {
        streaming_args(fifo, request.config)
    } else {
        Vec::new()
    }
}

/// Étage de préprocessing: lit le fichier source, incruste filigrane et
/// sous-titres, normalise l'encodage et écrit du MPEG-TS sur stdout (le pipe)
fn preprocessing_args(job: &StreamJob, config: &StreamConfig, probe: &ProbeInfo) -> Vec<String> {
    let mut args = vec!["-hide_banner".to_string()];

    if let Some(ts) = &job.start_timestamp {
        args.push("-ss".to_string());
        args.push(ts.clone());
    }

    args.push("-i".to_string());
    args.push(job.file.to_string_lossy().to_string());

    // la piste de sous-titres est une seconde entrée, consommée par le filtre
    if let Some(subtitle) = &job.subtitle_file {
        args.push("-i".to_string());
        args.push(subtitle.to_string_lossy().to_string());
    }

    args.push("-loglevel".to_string());
    args.push(config.log_level.clone());

    let mut filters = Vec::new();
    if let Some(subtitle) = &job.subtitle_file {
        filters.push(format!(
            "subtitles='{}'",
            escape_single_quotes(&subtitle.to_string_lossy())
        ));
    }
    if job.overlay.show_filename {
        filters.push(drawtext_filter(&job.file, &job.overlay));
    }
    if !filters.is_empty() {
        args.push("-vf".to_string());
        args.push(filters.join(","));
        args.push("-vsync".to_string());
        args.push("vfr".to_string());
    }

    args.push("-c:v".to_string());
    args.push(config.encoder.clone());
    args.push("-preset".to_string());
    args.push(
        config
            .preset
            .clone()
            .unwrap_or_else(|| DEFAULT_PREPROCESS_PRESET.to_string()),
    );

    if let Some(gop) = config.keyframe_interval {
        args.push("-g".to_string());
        args.push(gop.to_string());
        args.push("-keyint_min".to_string());
        args.push(gop.to_string());
    }

    match &config.max_bitrate {
        Some(bitrate) => {
            args.push("-b:v".to_string());
            args.push(bitrate.clone());
            args.push("-maxrate".to_string());
            args.push(bitrate.clone());
            args.push("-bufsize".to_string());
            args.push(bitrate.clone());
        }
        None => {
            args.push("-crf".to_string());
            args.push("18".to_string());
        }
    }

    args.push("-pix_fmt".to_string());
    args.push("yuv420p".to_string());

    if probe.has_audio {
        args.push("-c:a".to_string());
        args.push("aac".to_string());
        args.push("-b:a".to_string());
        args.push("128k".to_string());
        args.push("-ac".to_string());
        args.push("2".to_string());
    }

    args.push("-f".to_string());
    args.push("mpegts".to_string());
    args.push("pipe:1".to_string());

    args
}

/// Étage de streaming: lit le pipe nommé et pousse du FLV vers la
/// destination RTMP. Le préprocessing ayant normalisé l'encodage, les deux
/// pistes sont copiées telles quelles.
fn streaming_args(fifo: &Path, config: &StreamConfig) -> Vec<String> {
    let mut args = vec![
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        config.log_level.clone(),
        "-progress".to_string(),
        "pipe:1".to_string(),
        "-y".to_string(),
        // les sauts de DTS aux frontières de fichiers sont attendus
        "-fflags".to_string(),
        "+igndts".to_string(),
        "-i".to_string(),
        fifo.to_string_lossy().to_string(),
        "-c:v".to_string(),
        "copy".to_string(),
        "-c:a".to_string(),
        "copy".to_string(),
        "-f".to_string(),
        "flv".to_string(),
        "-flvflags".to_string(),
        "no_duration_filesize".to_string(),
        "-flush_packets".to_string(),
        "1".to_string(),
        "-rtmp_live".to_string(),
        "live".to_string(),
    ];
    args.push(config.destination_with_credentials());
    args
}

/// Filtre drawtext: nom de base du fichier source, texte blanc sur fond noir
/// à 50% d'opacité, au coin demandé
fn drawtext_filter(file: &Path, overlay: &OverlaySettings) -> String {
    let normalized = file.to_string_lossy().replace('\\', "/");
    let basename = normalized.rsplit('/').next().unwrap_or(&normalized);

    let (x, y) = match overlay.position {
        OverlayPosition::TopLeft => ("10", "10"),
        OverlayPosition::TopRight => ("main_w-text_w-10", "10"),
        OverlayPosition::BottomLeft => ("10", "main_h-text_h-10"),
        OverlayPosition::BottomRight => ("main_w-text_w-10", "main_h-text_h-10"),
    };

    format!(
        "drawtext=text='{}':fontsize={}:fontcolor=white:x={}:y={}:box=1:boxcolor=black@0.5",
        escape_single_quotes(basename),
        overlay.font_size,
        x,
        y
    )
}

/// Les apostrophes des chemins doivent être échappées pour le parseur de
/// filtres de ffmpeg
fn escape_single_quotes(input: &str) -> String {
    input.replace('\'', "\\'")
}
