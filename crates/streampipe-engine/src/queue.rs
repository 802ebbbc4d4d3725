use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Notify;

use streampipe_common::StreamJob;

/// File FIFO des jobs en attente, avec son signal de réveil à un seul
/// permis. Toujours consultée sous le verrou en écriture du moteur.
#[derive(Debug, Default)]
pub struct JobQueue {
    entries: VecDeque<StreamJob>,
    wake: Arc<Notify>,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pousser un job en queue et tenter un réveil non bloquant. Un permis
    /// déjà posé est conservé tel quel: les réveils se coalescent.
    pub fn append(&mut self, job: StreamJob) {
        self.entries.push_back(job);
        self.wake.notify_one();
    }

    /// Poignée sur le signal de réveil, pour l'étage d'écriture
    pub fn wake_handle(&self) -> Arc<Notify> {
        self.wake.clone()
    }

    /// Retirer la première entrée portant cet identifiant
    pub fn remove(&mut self, id: &str) -> bool {
        match self.entries.iter().position(|job| job.id == id) {
            Some(at) => {
                self.entries.remove(at);
                true
            }
            None => false,
        }
    }

    /// Copie défensive de la liste ordonnée
    pub fn snapshot(&self) -> Vec<StreamJob> {
        self.entries.iter().cloned().collect()
    }

    /// Extraire la tête de file
    pub fn pop_head(&mut self) -> Option<StreamJob> {
        self.entries.pop_front()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;
    use streampipe_common::{JobRequest, OverlaySettings};

    fn job(file: &str) -> StreamJob {
        StreamJob::from_request(JobRequest {
            file: PathBuf::from(file),
            overlay: OverlaySettings::default(),
            start_timestamp: None,
            subtitle_file: None,
        })
    }

    #[test]
    fn test_fifo_ordering() {
        let mut queue = JobQueue::new();
        queue.append(job("/a.mp4"));
        queue.append(job("/b.mp4"));
        queue.append(job("/c.mp4"));

        assert_eq!(queue.pop_head().unwrap().file, PathBuf::from("/a.mp4"));
        assert_eq!(queue.pop_head().unwrap().file, PathBuf::from("/b.mp4"));
        assert_eq!(queue.pop_head().unwrap().file, PathBuf::from("/c.mp4"));
        assert!(queue.pop_head().is_none());
    }

    #[test]
    fn test_remove_by_id() {
        let mut queue = JobQueue::new();
        queue.append(job("/a.mp4"));
        let b = job("/b.mp4");
        let b_id = b.id.clone();
        queue.append(b);
        queue.append(job("/c.mp4"));

        assert!(queue.remove(&b_id));
        assert!(!queue.remove(&b_id));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop_head().unwrap().file, PathBuf::from("/a.mp4"));
        assert_eq!(queue.pop_head().unwrap().file, PathBuf::from("/c.mp4"));
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let mut queue = JobQueue::new();
        queue.append(job("/a.mp4"));

        let snapshot = queue.snapshot();
        queue.pop_head();
        assert_eq!(snapshot.len(), 1);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_wake_signal_coalesces_without_losing_jobs() {
        let mut queue = JobQueue::new();
        let wake = queue.wake_handle();
        queue.append(job("/a.mp4"));
        queue.append(job("/b.mp4"));

        // un seul permis est posé pour les deux appends
        tokio::time::timeout(Duration::from_millis(100), wake.notified())
            .await
            .expect("un permis doit être disponible");
        assert!(
            tokio::time::timeout(Duration::from_millis(50), wake.notified())
                .await
                .is_err(),
            "le second réveil ne doit pas être déjà signalé"
        );

        // mais aucun job n'est perdu
        assert_eq!(queue.len(), 2);
    }
}
