// Parse la sortie `-progress pipe:1` de ffmpeg: des blocs de lignes
// key=value clos par `progress=continue` ou `progress=end`.

use chrono::Utc;
use std::collections::HashMap;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use streampipe_common::Progress;

/// Accumule les lignes key=value et produit un enregistrement quand un bloc
/// est clos
pub struct ProgressParser {
    fields: HashMap<String, String>,
    duration_seconds: f64,
}

impl ProgressParser {
    pub fn new(duration_seconds: f64) -> Self {
        Self {
            fields: HashMap::new(),
            duration_seconds,
        }
    }

    /// Ingérer une ligne. Renvoie l'enregistrement agrégé quand la ligne
    /// close un bloc. Les lignes sans `=` sont ignorées.
    pub fn feed_line(&mut self, line: &str) -> Option<Progress> {
        let line = line.trim();
        let (key, value) = line.split_once('=')?;
        let key = key.trim();
        let value = value.trim();

        if key == "progress" {
            let record = self.build_record(value);
            self.fields.clear();
            return Some(record);
        }

        self.fields.insert(key.to_string(), value.to_string());
        None
    }

    fn build_record(&self, progress: &str) -> Progress {
        let out_time_micros = self.parse_i64("out_time_us");
        Progress {
            frame: self.parse_u64("frame"),
            fps: self.parse_f64("fps"),
            bitrate: self.field("bitrate"),
            total_bytes: self.parse_u64("total_size"),
            out_time_micros,
            out_time: self.field("out_time"),
            dup_frames: self.parse_u64("dup_frames"),
            drop_frames: self.parse_u64("drop_frames"),
            speed: self.field("speed"),
            progress: progress.to_string(),
            timestamp: Utc::now(),
            duration_seconds: self.duration_seconds,
            percentage: percentage(out_time_micros, self.duration_seconds),
        }
    }

    fn field(&self, key: &str) -> String {
        self.fields.get(key).cloned().unwrap_or_default()
    }

    // les champs numériques illisibles restent à zéro sans invalider le bloc
    fn parse_u64(&self, key: &str) -> u64 {
        self.fields.get(key).and_then(|v| v.parse().ok()).unwrap_or(0)
    }

    fn parse_i64(&self, key: &str) -> i64 {
        self.fields.get(key).and_then(|v| v.parse().ok()).unwrap_or(0)
    }

    fn parse_f64(&self, key: &str) -> f64 {
        self.fields.get(key).and_then(|v| v.parse().ok()).unwrap_or(0.0)
    }
}

/// Progression en pourcentage, bornée à [0, 100]; 0 tant que l'une des deux
/// grandeurs n'est pas strictement positive
pub fn percentage(out_time_micros: i64, duration_seconds: f64) -> f64 {
    if out_time_micros <= 0 || duration_seconds <= 0.0 {
        return 0.0;
    }
    (out_time_micros as f64 / 1e6 / duration_seconds * 100.0).clamp(0.0, 100.0)
}

/// Lire le flux de progression de l'encodeur jusqu'à EOF ou annulation, et
/// publier chaque bloc dans le canal borné. Canal plein: le bloc est perdu,
/// jamais bloquant.
pub async fn pump_progress<R>(
    reader: R,
    duration_seconds: f64,
    tx: mpsc::Sender<Progress>,
    cancel: CancellationToken,
) where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    let mut parser = ProgressParser::new(duration_seconds);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        if let Some(record) = parser.feed_line(&line) {
                            match tx.try_send(record) {
                                Ok(()) => {}
                                Err(mpsc::error::TrySendError::Full(_)) => {
                                    debug!("canal de progression plein, bloc abandonné");
                                }
                                Err(mpsc::error::TrySendError::Closed(_)) => return,
                            }
                        }
                    }
                    Ok(None) => return,
                    Err(e) => {
                        warn!("lecture du flux de progression interrompue: {}", e);
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;

    fn feed_block(parser: &mut ProgressParser, lines: &[&str]) -> Option<Progress> {
        let mut record = None;
        for line in lines {
            record = parser.feed_line(line);
        }
        record
    }

    #[test]
    fn test_parse_complete_block() {
        let mut parser = ProgressParser::new(20.0);
        let record = feed_block(
            &mut parser,
            &[
                "frame=250",
                "fps=24.99",
                "bitrate=1456.2kbits/s",
                "total_size=1048576",
                "out_time_us=10000000",
                "out_time=00:00:10.000000",
                "dup_frames=1",
                "drop_frames=2",
                "speed=1.01x",
                "progress=continue",
            ],
        )
        .unwrap();

        assert_eq!(record.frame, 250);
        assert!((record.fps - 24.99).abs() < 1e-9);
        assert_eq!(record.bitrate, "1456.2kbits/s");
        assert_eq!(record.total_bytes, 1_048_576);
        assert_eq!(record.out_time_micros, 10_000_000);
        assert_eq!(record.out_time, "00:00:10.000000");
        assert_eq!(record.dup_frames, 1);
        assert_eq!(record.drop_frames, 2);
        assert_eq!(record.speed, "1.01x");
        assert_eq!(record.progress, "continue");
        assert!((record.percentage - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_end_block() {
        let mut parser = ProgressParser::new(10.0);
        let record = feed_block(&mut parser, &["frame=100", "progress=end"]).unwrap();
        assert!(record.is_end());
    }

    #[test]
    fn test_blocks_do_not_leak_fields() {
        let mut parser = ProgressParser::new(10.0);
        feed_block(&mut parser, &["frame=100", "progress=continue"]);
        let record = feed_block(&mut parser, &["fps=30.0", "progress=continue"]).unwrap();
        assert_eq!(record.frame, 0);
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let mut parser = ProgressParser::new(10.0);
        assert!(parser.feed_line("pas de signe égal").is_none());
        assert!(parser.feed_line("").is_none());
        let record = feed_block(&mut parser, &["frame=7", "progress=continue"]).unwrap();
        assert_eq!(record.frame, 7);
    }

    #[test]
    fn test_unparsable_numbers_stay_zero() {
        let mut parser = ProgressParser::new(10.0);
        let record =
            feed_block(&mut parser, &["frame=N/A", "out_time_us=N/A", "progress=continue"])
                .unwrap();
        assert_eq!(record.frame, 0);
        assert_eq!(record.out_time_micros, 0);
        assert_eq!(record.percentage, 0.0);
    }

    #[test]
    fn test_whitespace_is_trimmed() {
        let mut parser = ProgressParser::new(10.0);
        let record = feed_block(&mut parser, &["  frame = 12  ", "progress=continue"]).unwrap();
        assert_eq!(record.frame, 12);
    }

    #[test]
    fn test_percentage_is_monotonic_over_a_run() {
        let mut parser = ProgressParser::new(10.0);
        let mut previous = feed_block(&mut parser, &["out_time_us=1000000", "progress=continue"])
            .unwrap();
        for micros in [2_000_000i64, 5_000_000, 9_000_000, 20_000_000] {
            let record = feed_block(
                &mut parser,
                &[&format!("out_time_us={}", micros), "progress=continue"],
            )
            .unwrap();
            assert!(record.out_time_micros >= previous.out_time_micros);
            assert!(record.percentage >= previous.percentage);
            previous = record;
        }
        assert_eq!(previous.percentage, 100.0);
    }

    #[test]
    fn test_percentage_clamps_to_100() {
        assert_eq!(percentage(20_000_000, 10.0), 100.0);
        assert_eq!(percentage(5_000_000, 10.0), 50.0);
        assert_eq!(percentage(0, 10.0), 0.0);
        assert_eq!(percentage(5_000_000, 0.0), 0.0);
        assert_eq!(percentage(-1, 10.0), 0.0);
    }

    #[tokio::test]
    async fn test_pump_publishes_records() {
        let (mut writer, reader) = tokio::io::duplex(1024);
        let (tx, mut rx) = mpsc::channel(10);
        let cancel = CancellationToken::new();

        let pump = tokio::spawn(pump_progress(reader, 10.0, tx, cancel));
        writer
            .write_all(b"frame=1\nout_time_us=1000000\nprogress=continue\n")
            .await
            .unwrap();
        drop(writer);
        pump.await.unwrap();

        let record = rx.recv().await.unwrap();
        assert_eq!(record.frame, 1);
        assert!((record.percentage - 10.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_pump_drops_when_channel_full_without_blocking() {
        let (mut writer, reader) = tokio::io::duplex(64 * 1024);
        let (tx, mut rx) = mpsc::channel(2);
        let cancel = CancellationToken::new();

        // personne ne consomme pendant l'écriture: le pump doit terminer
        // quand même, en perdant les blocs excédentaires
        let pump = tokio::spawn(pump_progress(reader, 10.0, tx, cancel));
        for i in 0..50 {
            let block = format!("frame={}\nprogress=continue\n", i);
            writer.write_all(block.as_bytes()).await.unwrap();
        }
        drop(writer);
        tokio::time::timeout(Duration::from_secs(5), pump)
            .await
            .expect("le pump ne doit pas bloquer sur un canal plein")
            .unwrap();

        let mut received = 0;
        while rx.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, 2);
    }

    #[tokio::test]
    async fn test_pump_returns_promptly_on_cancellation() {
        let (_writer, reader) = tokio::io::duplex(64);
        let (tx, _rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();

        let pump = tokio::spawn(pump_progress(reader, 10.0, tx, cancel.clone()));
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), pump)
            .await
            .expect("le pump doit rendre la main à l'annulation")
            .unwrap();
    }
}
