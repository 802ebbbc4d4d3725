// Le moteur du pipeline: possède le pipe nommé, lance l'étage d'écriture
// (préprocessing, draine la queue vers le pipe) et l'étage de lecture
// (streaming, pousse le pipe vers la destination RTMP), et porte les deux
// scopes d'annulation.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::{ChildStderr, Command};
use tokio::sync::{mpsc, Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use streampipe_common::{
    EngineError, EngineStatus, JobRef, JobRequest, LastError, Progress, StreamConfig, StreamJob,
};

use crate::args::{build_ffmpeg_args, CommandRequest};
use crate::fifo;
use crate::logsink::{PrefixWriter, StderrTail, STDERR_TAIL_LIMIT};
use crate::probe::{probe_file, ProbeInfo};
use crate::progress::pump_progress;
use crate::queue::JobQueue;
use crate::settings::EngineSettings;
use crate::timestamp::parse_timestamp;

/// Extensions de sous-titres acceptées pour l'incrustation
pub const SUBTITLE_EXTENSIONS: &[&str] = &["srt", "vtt", "ass", "ssa", "sub", "sbv"];

const PREPROCESSING_PREFIX: &str = "[PREPROCESSING] ";
const STREAMING_PREFIX: &str = "[STREAMING] ";

/// État partagé, protégé par l'unique verrou lecture/écriture du moteur
struct EngineState {
    running: bool,
    config: Option<StreamConfig>,
    queue: JobQueue,
    current: Option<StreamJob>,
    last_error: Option<LastError>,
    engine_cancel: Option<CancellationToken>,
    current_cancel: Option<CancellationToken>,
    /// Numéro de run, pour que le nettoyage d'un run ne touche pas au suivant
    generation: u64,
}

/// Contexte cloné dans les tâches des deux étages
#[derive(Clone)]
struct StageContext {
    settings: EngineSettings,
    state: Arc<RwLock<EngineState>>,
    queue_wake: Arc<Notify>,
    progress_tx: mpsc::Sender<Progress>,
    cancel: CancellationToken,
}

/// Orchestrateur de diffusion: une playlist de fichiers présentée à la
/// destination RTMP comme un direct ininterrompu
pub struct Engine {
    settings: EngineSettings,
    state: Arc<RwLock<EngineState>>,
    queue_wake: Arc<Notify>,
    progress_tx: mpsc::Sender<Progress>,
    progress_rx: Mutex<mpsc::Receiver<Progress>>,
}

impl Engine {
    pub fn new(settings: EngineSettings) -> Self {
        let (progress_tx, progress_rx) = mpsc::channel(settings.progress_capacity);
        let queue = JobQueue::new();
        let queue_wake = queue.wake_handle();
        Self {
            settings,
            state: Arc::new(RwLock::new(EngineState {
                running: false,
                config: None,
                queue,
                current: None,
                last_error: None,
                engine_cancel: None,
                current_cancel: None,
                generation: 0,
            })),
            queue_wake,
            progress_tx,
            progress_rx: Mutex::new(progress_rx),
        }
    }

    /// Démarrer un run et bloquer jusqu'au retour des deux étages
    pub async fn start(&self, config: StreamConfig) -> Result<(), EngineError> {
        self.start_with_shutdown(config, CancellationToken::new())
            .await
    }

    /// Variante avec jeton d'arrêt fourni par le processus hôte; son
    /// annulation équivaut à `stop()`
    pub async fn start_with_shutdown(
        &self,
        config: StreamConfig,
        shutdown: CancellationToken,
    ) -> Result<(), EngineError> {
        let (cancel, generation) = {
            let mut state = self.state.write().await;
            if state.running {
                return Err(EngineError::AlreadyRunning);
            }

            fifo::create_fifo(&self.settings.fifo_path).map_err(|e| {
                EngineError::Pipe(format!("{}: {}", self.settings.fifo_path.display(), e))
            })?;

            let cancel = CancellationToken::new();
            state.running = true;
            state.config = Some(config);
            state.current = None;
            state.last_error = None;
            state.engine_cancel = Some(cancel.clone());
            state.current_cancel = None;
            state.generation = state.generation.wrapping_add(1);
            (cancel, state.generation)
        };
        info!(
            "run démarré, pipe nommé recréé: {}",
            self.settings.fifo_path.display()
        );

        // l'arrêt du processus hôte se comporte exactement comme stop()
        let watcher = tokio::spawn({
            let cancel = cancel.clone();
            async move {
                tokio::select! {
                    _ = shutdown.cancelled() => cancel.cancel(),
                    _ = cancel.cancelled() => {}
                }
            }
        });

        let ctx = StageContext {
            settings: self.settings.clone(),
            state: self.state.clone(),
            queue_wake: self.queue_wake.clone(),
            progress_tx: self.progress_tx.clone(),
            cancel: cancel.clone(),
        };

        let writer = tokio::spawn(writer_stage(ctx.clone()));
        let reader = tokio::spawn({
            let ctx = ctx.clone();
            async move {
                let result = reader_stage(ctx.clone()).await;
                if let Err(e) = &result {
                    set_last_error(&ctx, &e.to_string()).await;
                }
                // la fin du lecteur (destination fermée comprise) clôt le run
                ctx.cancel.cancel();
                result
            }
        });

        let (writer_result, reader_result) = futures::future::join(writer, reader).await;

        // nettoyage inconditionnel, sauf si un nouveau run a déjà pris la main
        cancel.cancel();
        let _ = watcher.await;
        {
            let mut state = self.state.write().await;
            if state.generation == generation {
                state.running = false;
                state.current = None;
                if let Some(token) = state.current_cancel.take() {
                    token.cancel();
                }
                state.engine_cancel = None;
                fifo::remove_fifo(&self.settings.fifo_path);
            }
        }
        info!("run terminé, pipe nommé supprimé");

        for result in [writer_result, reader_result] {
            match result {
                Ok(Ok(())) | Ok(Err(EngineError::Cancelled)) => {}
                Ok(Err(e)) => return Err(e),
                Err(e) => {
                    return Err(EngineError::Other(anyhow::anyhow!(
                        "une tâche d'étage a paniqué: {e}"
                    )))
                }
            }
        }
        Ok(())
    }

    /// Ajouter un job à la playlist; l'append pose le réveil non bloquant
    /// de l'étage d'écriture
    pub async fn enqueue(&self, request: JobRequest) -> JobRef {
        let job = StreamJob::from_request(request);
        let info = job.as_ref_info();
        self.state.write().await.queue.append(job);
        info!("job {} ajouté à la playlist: {}", info.id, info.file.display());
        info
    }

    /// Retirer un job encore en attente. Renvoie false s'il a déjà été
    /// sélectionné ou n'existe pas.
    pub async fn dequeue(&self, id: &str) -> bool {
        let removed = self.state.write().await.queue.remove(id);
        if removed {
            info!("job {} retiré de la playlist", id);
        }
        removed
    }

    /// Copie ordonnée de la playlist en attente
    pub async fn queue(&self) -> Vec<StreamJob> {
        self.state.read().await.queue.snapshot()
    }

    /// Instantané de l'état du moteur
    pub async fn status(&self) -> EngineStatus {
        let state = self.state.read().await;
        EngineStatus {
            running: state.running,
            actively_streaming: state.running && state.current.is_some(),
            queue_length: state.queue.len(),
            playing: state.current.as_ref().map(StreamJob::as_ref_info),
            error: state.last_error.clone(),
        }
    }

    /// Prochain enregistrement de progression, sans attendre
    pub async fn progress(&self) -> Option<Progress> {
        self.progress_rx.lock().await.try_recv().ok()
    }

    /// Annuler le job courant seulement. Renvoie true s'il y en avait un.
    pub async fn skip(&self) -> bool {
        let state = self.state.write().await;
        match (&state.current, &state.current_cancel) {
            (Some(job), Some(token)) => {
                info!("skip du job {}", job.id);
                token.cancel();
                true
            }
            _ => false,
        }
    }

    /// Annuler le scope moteur et drainer les deux étages. Renvoie true si
    /// un run était en cours. `running` repasse à false immédiatement, avant
    /// la fin du nettoyage.
    pub async fn stop(&self) -> bool {
        let mut state = self.state.write().await;
        if !state.running {
            return false;
        }
        state.running = false;
        if let Some(token) = &state.engine_cancel {
            token.cancel();
        }
        info!("arrêt demandé, drain des deux étages");
        true
    }
}

/// Boucle de l'étage d'écriture: attendre un réveil, drainer la queue job
/// par job. Un réveil coalescé peut couvrir plusieurs jobs, et un réveil
/// sans job est valide.
async fn writer_stage(ctx: StageContext) -> Result<(), EngineError> {
    loop {
        tokio::select! {
            _ = ctx.cancel.cancelled() => return Ok(()),
            _ = ctx.queue_wake.notified() => {}
        }

        loop {
            if ctx.cancel.is_cancelled() {
                return Ok(());
            }
            let Some((job, job_cancel, config)) = take_next_job(&ctx).await else {
                break;
            };

            let result = run_preprocessing(&ctx, &job, &job_cancel, &config).await;
            {
                let mut state = ctx.state.write().await;
                state.current = None;
                state.current_cancel = None;
            }

            match result {
                Ok(()) => info!("job {} diffusé jusqu'au bout", job.id),
                Err(EngineError::Cancelled) => {
                    if ctx.cancel.is_cancelled() {
                        return Ok(());
                    }
                    info!("job {} sauté, passage au suivant", job.id);
                }
                Err(EngineError::Validation(message)) => {
                    warn!("job {} rejeté: {}", job.id, message);
                }
                Err(e) => {
                    set_last_error(&ctx, &e.to_string()).await;
                    ctx.cancel.cancel();
                    return Err(e);
                }
            }
        }
    }
}

/// Extraire la tête de queue et la marquer courante, sous le verrou en
/// écriture, avec un scope d'annulation enfant du scope moteur
async fn take_next_job(
    ctx: &StageContext,
) -> Option<(StreamJob, CancellationToken, StreamConfig)> {
    let mut state = ctx.state.write().await;
    let job = state.queue.pop_head()?;
    let job_cancel = ctx.cancel.child_token();
    state.current = Some(job.clone());
    state.current_cancel = Some(job_cancel.clone());
    let config = state.config.clone().unwrap_or_default();
    Some((job, job_cancel, config))
}

/// Jouer un job: probe, validation, rendez-vous sur le pipe, puis le
/// sous-processus de préprocessing jusqu'à sa fin ou son annulation
async fn run_preprocessing(
    ctx: &StageContext,
    job: &StreamJob,
    cancel: &CancellationToken,
    config: &StreamConfig,
) -> Result<(), EngineError> {
    let probe = probe_file(&ctx.settings.ffprobe_bin, &job.file).await;

    if let Some(ts) = &job.start_timestamp {
        let start = parse_timestamp(ts)?;
        if start >= probe.duration_seconds {
            return Err(EngineError::Validation(format!(
                "start timestamp {}s is at or beyond the file duration {}s",
                start, probe.duration_seconds
            )));
        }
    }
    if let Some(subtitle) = &job.subtitle_file {
        if !subtitle.exists() {
            return Err(EngineError::Validation(format!(
                "subtitle file not found: {}",
                subtitle.display()
            )));
        }
        let extension = subtitle
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        if !SUBTITLE_EXTENSIONS.contains(&extension.as_str()) {
            return Err(EngineError::Validation(format!(
                "unsupported subtitle extension: .{}",
                extension
            )));
        }
    }

    // point de synchronisation des deux étages: l'ouverture en écriture
    // n'aboutit que lorsque le lecteur est attaché au pipe
    let fifo_file = open_fifo_writer(&ctx.settings.fifo_path, cancel).await?;

    let args = build_ffmpeg_args(&CommandRequest {
        source: Some(job),
        fifo_path: None,
        config,
        probe: &probe,
    });
    info!("préprocessing de {}", job.file.display());

    let mut child = Command::new(&ctx.settings.ffmpeg_bin)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::from(fifo_file))
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| {
            EngineError::Subprocess {
                message: format!("FFmpeg processing failed for {}: {}", job.file.display(), e),
            }
        })?;

    let tail_task = spawn_stderr_tee(
        child.stderr.take(),
        ctx.settings.log_dir.clone(),
        "preprocessing",
        PREPROCESSING_PREFIX,
    );

    let status = tokio::select! {
        _ = cancel.cancelled() => {
            let _ = child.kill().await;
            let _ = child.wait().await;
            let _ = tail_task.await;
            return Err(EngineError::Cancelled);
        }
        status = child.wait() => status.map_err(|e| EngineError::Subprocess {
            message: format!("FFmpeg processing failed for {}: {}", job.file.display(), e),
        })?,
    };
    let tail = tail_task.await.unwrap_or_default();

    if !status.success() {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        let message = format!(
            "FFmpeg processing failed for {}: {}\nFFmpeg stderr: {}",
            job.file.display(),
            status,
            tail
        );
        return Err(EngineError::Subprocess { message });
    }
    Ok(())
}

/// Étage de lecture: un unique sous-processus de streaming tient le bout
/// lecture du pipe pour toute la durée du run et publie sa progression
async fn reader_stage(ctx: StageContext) -> Result<(), EngineError> {
    // probe de la source courante (ou de la tête de queue) pour alimenter
    // le pourcentage de progression
    let source = {
        let state = ctx.state.read().await;
        state
            .current
            .as_ref()
            .map(|job| job.file.clone())
            .or_else(|| state.queue.snapshot().first().map(|job| job.file.clone()))
    };
    let probe = match &source {
        Some(path) => probe_file(&ctx.settings.ffprobe_bin, path).await,
        None => ProbeInfo::default(),
    };
    let config = ctx.state.read().await.config.clone().unwrap_or_default();

    let args = build_ffmpeg_args(&CommandRequest {
        source: None,
        fifo_path: Some(&ctx.settings.fifo_path),
        config: &config,
        probe: &probe,
    });
    info!("streaming vers {}", config.destination);

    let mut child = Command::new(&ctx.settings.ffmpeg_bin)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| {
            EngineError::Subprocess {
                message: format!("FFmpeg streaming failed: {}", e),
            }
        })?;

    let tail_task = spawn_stderr_tee(
        child.stderr.take(),
        ctx.settings.log_dir.clone(),
        "streaming",
        STREAMING_PREFIX,
    );
    let pump_task = child.stdout.take().map(|stdout| {
        tokio::spawn(pump_progress(
            stdout,
            probe.duration_seconds,
            ctx.progress_tx.clone(),
            ctx.cancel.clone(),
        ))
    });

    let status = tokio::select! {
        _ = ctx.cancel.cancelled() => {
            let _ = child.kill().await;
            let _ = child.wait().await;
            let _ = tail_task.await;
            if let Some(pump) = pump_task {
                let _ = pump.await;
            }
            return Ok(());
        }
        status = child.wait() => status.map_err(|e| EngineError::Subprocess {
            message: format!("FFmpeg streaming failed: {}", e),
        })?,
    };
    let tail = tail_task.await.unwrap_or_default();
    if let Some(pump) = pump_task {
        let _ = pump.await;
    }

    if !status.success() {
        if ctx.cancel.is_cancelled() {
            return Ok(());
        }
        let message = format!("FFmpeg streaming failed: {}\nFFmpeg stderr: {}", status, tail);
        return Err(EngineError::Subprocess { message });
    }
    info!("étage de streaming terminé, destination fermée");
    Ok(())
}

/// Ouvrir le bout écriture du pipe sans bloquer de thread: tant qu'aucun
/// lecteur n'est attaché, O_NONBLOCK échoue avec ENXIO et on réessaie,
/// annulable entre deux tentatives
async fn open_fifo_writer(
    path: &Path,
    cancel: &CancellationToken,
) -> Result<std::fs::File, EngineError> {
    use std::os::unix::fs::OpenOptionsExt;

    loop {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        match std::fs::OpenOptions::new()
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(path)
        {
            Ok(file) => {
                clear_nonblock(&file)?;
                return Ok(file);
            }
            Err(e) if e.raw_os_error() == Some(libc::ENXIO) => {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(EngineError::Cancelled),
                    _ = tokio::time::sleep(Duration::from_millis(50)) => {}
                }
            }
            Err(e) => {
                return Err(EngineError::Pipe(format!(
                    "cannot open fifo {} for writing: {}",
                    path.display(),
                    e
                )))
            }
        }
    }
}

/// Repasser le descripteur en mode bloquant: ffmpeg écrit dedans au rythme
/// du lecteur
fn clear_nonblock(file: &std::fs::File) -> Result<(), EngineError> {
    use std::os::unix::io::AsRawFd;

    let fd = file.as_raw_fd();
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(EngineError::Pipe("fcntl(F_GETFL) failed".to_string()));
    }
    let rc = unsafe { libc::fcntl(fd, libc::F_SETFL, flags & !libc::O_NONBLOCK) };
    if rc < 0 {
        return Err(EngineError::Pipe("fcntl(F_SETFL) failed".to_string()));
    }
    Ok(())
}

/// Lire le stderr d'un sous-processus: garder les derniers octets pour les
/// messages d'erreur, et tout verser préfixé dans un fichier de log créé
/// paresseusement. Renvoie la fin de stderr une fois le flux clos.
fn spawn_stderr_tee(
    stderr: Option<ChildStderr>,
    log_dir: std::path::PathBuf,
    stage: &'static str,
    prefix: &'static str,
) -> JoinHandle<String> {
    tokio::spawn(async move {
        let Some(mut stderr) = stderr else {
            return String::new();
        };
        let mut tail = StderrTail::new(STDERR_TAIL_LIMIT);
        let mut sink: Option<PrefixWriter<std::fs::File>> = None;
        let mut buf = [0u8; 8192];

        loop {
            match stderr.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    tail.push(&buf[..n]);
                    if sink.is_none() {
                        match open_log_file(&log_dir, stage) {
                            Ok((file, path)) => {
                                info!("log {} ouvert: {}", stage, path.display());
                                sink = Some(PrefixWriter::new(file, prefix));
                            }
                            Err(e) => {
                                warn!("impossible de créer le fichier de log {}: {}", stage, e)
                            }
                        }
                    }
                    if let Some(writer) = &mut sink {
                        use std::io::Write;
                        let _ = writer.write(&buf[..n]);
                    }
                }
                Err(e) => {
                    warn!("lecture du stderr {} interrompue: {}", stage, e);
                    break;
                }
            }
        }
        tail.into_string()
    })
}

fn open_log_file(
    log_dir: &Path,
    stage: &str,
) -> std::io::Result<(std::fs::File, std::path::PathBuf)> {
    std::fs::create_dir_all(log_dir)?;
    let path = log_dir.join(format!("{}-{}.log", stage, uuid::Uuid::new_v4()));
    Ok((std::fs::File::create(&path)?, path))
}

async fn set_last_error(ctx: &StageContext, message: &str) {
    error!("{}", message);
    let mut state = ctx.state.write().await;
    state.last_error = Some(LastError::new(message));
}
