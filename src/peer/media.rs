//! Медиапотоки с точки зрения переговоров. Захват камеры/экрана — забота
//! хоста; здесь только ссылки на треки и их привязка к соединению.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

/// Локальный поток: набор треков, которые вешаются на каждое новое
/// соединение, пока поток активен.
pub struct LocalStream {
    tracks: Vec<Arc<dyn TrackLocal + Send + Sync>>,
    active: AtomicBool,
}

impl LocalStream {
    pub fn new(tracks: Vec<Arc<dyn TrackLocal + Send + Sync>>) -> Self {
        Self {
            tracks,
            active: AtomicBool::new(true),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn tracks(&self) -> &[Arc<dyn TrackLocal + Send + Sync>] {
        &self.tracks
    }

    /// Помечает все треки остановленными. Сам захват выключает хост.
    pub fn stop(&self) {
        self.active.store(false, Ordering::SeqCst);
    }
}

/// Синтетический контейнер удалённого потока. Создаётся пустым, треки
/// добавляются по мере их обнаружения; живёт дольше одного звонка.
#[derive(Default)]
pub struct RemoteStream {
    tracks: Mutex<HashMap<String, Arc<TrackRemote>>>,
}

impl RemoteStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Добавляет трек, дедупликация по id трека.
    /// Возвращает false, если трек уже был (повторное добавление — no-op).
    pub fn add_track(&self, track: Arc<TrackRemote>) -> bool {
        let id = track.id();
        self.tracks.lock().unwrap().insert(id, track).is_none()
    }

    pub fn track_count(&self) -> usize {
        self.tracks.lock().unwrap().len()
    }

    pub fn tracks(&self) -> Vec<Arc<TrackRemote>> {
        self.tracks.lock().unwrap().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use webrtc::api::media_engine::MIME_TYPE_OPUS;
    use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
    use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

    #[test]
    fn local_stream_starts_active_and_stops() {
        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                ..Default::default()
            },
            "audio".to_owned(),
            "local".to_owned(),
        ));
        let stream = LocalStream::new(vec![track]);
        assert!(stream.is_active());
        assert_eq!(stream.tracks().len(), 1);
        stream.stop();
        assert!(!stream.is_active());
    }

    #[test]
    fn remote_stream_starts_empty() {
        let stream = RemoteStream::new();
        assert_eq!(stream.track_count(), 0);
        assert!(stream.tracks().is_empty());
    }
}
