//! In-process реализация relay: запись + две полосы кандидатов на комнату.
//!
//! Повторяет семантику документного store: серверные временные метки,
//! снапшот записи при каждом изменении, каждый кандидат доставляется ровно
//! один раз (backlog при подписке, дальше только новые).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::RelayError;
use crate::signaling::{
    CallRecord, CandidateCallback, CandidateLane, CandidatePayload, RecordCallback, RecordPatch,
    SessionAnswer, SessionOffer, SignalingRelay, Subscription,
};

type SharedRecordCb = Arc<dyn Fn(CallRecord) + Send + Sync>;
type SharedCandidateCb = Arc<dyn Fn(CandidatePayload) + Send + Sync>;

#[derive(Default)]
struct Room {
    /// None — комнату завели подписчики/кандидаты, но записи ещё нет
    doc: Option<CallRecord>,
    offer_candidates: Vec<CandidatePayload>,
    answer_candidates: Vec<CandidatePayload>,
    record_watchers: Vec<(u64, SharedRecordCb)>,
    offer_watchers: Vec<(u64, SharedCandidateCb)>,
    answer_watchers: Vec<(u64, SharedCandidateCb)>,
}

impl Room {
    fn lane(&self, lane: CandidateLane) -> &Vec<CandidatePayload> {
        match lane {
            CandidateLane::Offer => &self.offer_candidates,
            CandidateLane::Answer => &self.answer_candidates,
        }
    }

    fn lane_watchers(&mut self, lane: CandidateLane) -> &mut Vec<(u64, SharedCandidateCb)> {
        match lane {
            CandidateLane::Offer => &mut self.offer_watchers,
            CandidateLane::Answer => &mut self.answer_watchers,
        }
    }

    /// Комната без записи, кандидатов и наблюдателей не держит ничего живого
    fn is_empty(&self) -> bool {
        self.doc.is_none()
            && self.offer_candidates.is_empty()
            && self.answer_candidates.is_empty()
            && self.record_watchers.is_empty()
            && self.offer_watchers.is_empty()
            && self.answer_watchers.is_empty()
    }
}

#[derive(Default)]
struct Inner {
    rooms: HashMap<String, Room>,
    next_watcher_id: u64,
}

/// Relay в памяти процесса. Используется тестами и локальными запусками;
/// боевой адаптер реализует тот же трейт поверх настоящего store.
#[derive(Clone, Default)]
pub struct MemoryRelay {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Сколько комнат сейчас живёт в store
    pub fn room_count(&self) -> usize {
        self.inner.lock().unwrap().rooms.len()
    }

    fn now_ms() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    /// Снимаем колбэки под локом, зовём после его освобождения:
    /// колбэк может снова дернуть relay.
    fn notify_record(&self, room_id: &str) {
        let (watchers, snapshot) = {
            let inner = self.inner.lock().unwrap();
            match inner.rooms.get(room_id) {
                Some(room) => match &room.doc {
                    Some(doc) => (
                        room.record_watchers
                            .iter()
                            .map(|(_, cb)| cb.clone())
                            .collect::<Vec<_>>(),
                        doc.clone(),
                    ),
                    None => return,
                },
                None => return,
            }
        };
        for cb in watchers {
            cb(snapshot.clone());
        }
    }
}

#[async_trait]
impl SignalingRelay for MemoryRelay {
    async fn create_record(&self, room_id: &str, offer: SessionOffer) -> Result<(), RelayError> {
        {
            let mut inner = self.inner.lock().unwrap();
            let room = inner.rooms.entry(room_id.to_string()).or_default();
            if room.doc.is_some() {
                return Err(RelayError::AlreadyExists);
            }
            let mut offer = offer;
            offer.created = Some(Self::now_ms());
            room.doc = Some(CallRecord {
                offer: Some(offer),
                ..Default::default()
            });
        }
        self.notify_record(room_id);
        Ok(())
    }

    async fn read_record(&self, room_id: &str) -> Result<CallRecord, RelayError> {
        let inner = self.inner.lock().unwrap();
        inner
            .rooms
            .get(room_id)
            .and_then(|room| room.doc.clone())
            .ok_or(RelayError::NotFound)
    }

    async fn update_record(&self, room_id: &str, patch: RecordPatch) -> Result<(), RelayError> {
        {
            let mut inner = self.inner.lock().unwrap();
            let doc = inner
                .rooms
                .get_mut(room_id)
                .and_then(|room| room.doc.as_mut())
                .ok_or(RelayError::NotFound)?;

            let now = Self::now_ms();
            if let Some(mut offer) = patch.offer {
                if patch.mark_offer_updated {
                    offer.updated = Some(now);
                }
                if offer.created.is_none() {
                    // сохраняем исходную метку создания при перезаписи offer
                    offer.created = doc.offer.as_ref().and_then(|o| o.created);
                }
                doc.offer = Some(offer);
            }
            if let Some(mut answer) = patch.answer {
                answer.timestamp = Some(now);
                doc.answer = Some(answer);
            }
            if let Some(answered) = patch.answered {
                if let Some(offer) = doc.offer.as_mut() {
                    offer.answered = answered;
                }
            }
            if patch.mark_answered_at {
                doc.answered_at = Some(now);
            }
            if patch.mark_answer_updated {
                doc.answer_updated = Some(now);
            }
        }
        self.notify_record(room_id);
        Ok(())
    }

    async fn delete_record(&self, room_id: &str) -> Result<(), RelayError> {
        // удаление каскадно уносит обе subcollection и всех наблюдателей
        self.inner.lock().unwrap().rooms.remove(room_id);
        Ok(())
    }

    async fn append_candidate(
        &self,
        room_id: &str,
        lane: CandidateLane,
        candidate: CandidatePayload,
    ) -> Result<(), RelayError> {
        let watchers = {
            let mut inner = self.inner.lock().unwrap();
            let room = inner.rooms.entry(room_id.to_string()).or_default();
            match lane {
                CandidateLane::Offer => room.offer_candidates.push(candidate.clone()),
                CandidateLane::Answer => room.answer_candidates.push(candidate.clone()),
            }
            room.lane_watchers(lane)
                .iter()
                .map(|(_, cb)| cb.clone())
                .collect::<Vec<_>>()
        };
        for cb in watchers {
            cb(candidate.clone());
        }
        Ok(())
    }

    fn subscribe_record(&self, room_id: &str, on_change: RecordCallback) -> Subscription {
        let cb: SharedRecordCb = Arc::from(on_change);
        let (id, snapshot) = {
            let mut inner = self.inner.lock().unwrap();
            let id = inner.next_watcher_id;
            inner.next_watcher_id += 1;
            let room = inner.rooms.entry(room_id.to_string()).or_default();
            room.record_watchers.push((id, cb.clone()));
            (id, room.doc.clone())
        };
        // снапшот при подписке, если запись уже есть
        if let Some(doc) = snapshot {
            cb(doc);
        }

        let inner = self.inner.clone();
        let room_id = room_id.to_string();
        Subscription::new(move || {
            let mut inner = inner.lock().unwrap();
            // подписка могла завести комнату раньше записи: пустую уносим,
            // иначе карта комнат только растёт
            let drained = match inner.rooms.get_mut(&room_id) {
                Some(room) => {
                    room.record_watchers.retain(|(wid, _)| *wid != id);
                    room.is_empty()
                }
                None => false,
            };
            if drained {
                inner.rooms.remove(&room_id);
            }
        })
    }

    fn subscribe_candidates(
        &self,
        room_id: &str,
        lane: CandidateLane,
        on_added: CandidateCallback,
    ) -> Subscription {
        let cb: SharedCandidateCb = Arc::from(on_added);
        let (id, backlog) = {
            let mut inner = self.inner.lock().unwrap();
            let id = inner.next_watcher_id;
            inner.next_watcher_id += 1;
            let room = inner.rooms.entry(room_id.to_string()).or_default();
            let backlog = room.lane(lane).clone();
            room.lane_watchers(lane).push((id, cb.clone()));
            (id, backlog)
        };
        // backlog доставляется один раз, дальше только новые append'ы
        for candidate in backlog {
            cb(candidate);
        }

        let inner = self.inner.clone();
        let room_id = room_id.to_string();
        Subscription::new(move || {
            let mut inner = inner.lock().unwrap();
            let drained = match inner.rooms.get_mut(&room_id) {
                Some(room) => {
                    room.lane_watchers(lane).retain(|(wid, _)| *wid != id);
                    room.is_empty()
                }
                None => false,
            };
            if drained {
                inner.rooms.remove(&room_id);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn offer(sdp: &str) -> SessionOffer {
        SessionOffer {
            sdp: sdp.into(),
            sdp_type: "offer".into(),
            created: None,
            answered: false,
            updated: None,
        }
    }

    fn candidate(n: u16) -> CandidatePayload {
        CandidatePayload {
            candidate: format!("candidate:{n} 1 udp 1 192.0.2.1 {n} typ host"),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
        }
    }

    #[tokio::test]
    async fn create_is_unique_and_server_stamped() {
        let relay = MemoryRelay::new();
        relay.create_record("AB12CD34EF", offer("v=0...")).await.unwrap();

        let record = relay.read_record("AB12CD34EF").await.unwrap();
        let stored = record.offer.unwrap();
        assert_eq!(stored.sdp_type, "offer");
        assert!(stored.created.is_some(), "relay must stamp created");
        assert!(!stored.answered);

        let err = relay.create_record("AB12CD34EF", offer("v=0...")).await;
        assert!(matches!(err, Err(RelayError::AlreadyExists)));
    }

    #[tokio::test]
    async fn read_missing_record_is_not_found() {
        let relay = MemoryRelay::new();
        assert!(matches!(
            relay.read_record("NOPE").await,
            Err(RelayError::NotFound)
        ));
        assert!(matches!(
            relay.update_record("NOPE", RecordPatch::default()).await,
            Err(RelayError::NotFound)
        ));
    }

    #[tokio::test]
    async fn update_merges_and_stamps_answer() {
        let relay = MemoryRelay::new();
        relay.create_record("ROOM", offer("v=0...")).await.unwrap();

        relay
            .update_record(
                "ROOM",
                RecordPatch {
                    answer: Some(SessionAnswer {
                        sdp: "v=0-answer".into(),
                        sdp_type: "answer".into(),
                        timestamp: None,
                    }),
                    answered: Some(true),
                    mark_answered_at: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let record = relay.read_record("ROOM").await.unwrap();
        assert!(record.offer.as_ref().unwrap().answered);
        assert!(record.offer.as_ref().unwrap().created.is_some());
        assert!(record.answer.as_ref().unwrap().timestamp.is_some());
        assert!(record.answered_at.is_some());
        assert!(record.answer_updated.is_none());
    }

    #[tokio::test]
    async fn record_subscription_sees_snapshot_and_changes() {
        let relay = MemoryRelay::new();
        relay.create_record("ROOM", offer("v=0...")).await.unwrap();

        let seen = Arc::new(AtomicUsize::new(0));
        let sub = {
            let seen = seen.clone();
            relay.subscribe_record(
                "ROOM",
                Box::new(move |_record| {
                    seen.fetch_add(1, Ordering::SeqCst);
                }),
            )
        };
        // снапшот при подписке
        assert_eq!(seen.load(Ordering::SeqCst), 1);

        relay
            .update_record(
                "ROOM",
                RecordPatch {
                    answered: Some(true),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 2);

        sub.unsubscribe();
        relay
            .update_record(
                "ROOM",
                RecordPatch {
                    mark_answered_at: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 2, "unsubscribed watcher fired");
    }

    #[tokio::test]
    async fn candidates_delivered_exactly_once_per_entry() {
        let relay = MemoryRelay::new();
        relay.create_record("ROOM", offer("v=0...")).await.unwrap();
        relay
            .append_candidate("ROOM", CandidateLane::Offer, candidate(1))
            .await
            .unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let _sub = {
            let seen = seen.clone();
            relay.subscribe_candidates(
                "ROOM",
                CandidateLane::Offer,
                Box::new(move |c| {
                    seen.lock().unwrap().push(c.candidate);
                }),
            )
        };

        relay
            .append_candidate("ROOM", CandidateLane::Offer, candidate(2))
            .await
            .unwrap();
        // другая полоса не протекает
        relay
            .append_candidate("ROOM", CandidateLane::Answer, candidate(3))
            .await
            .unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2, "backlog once + one new append");
        assert!(seen[0].starts_with("candidate:1"));
        assert!(seen[1].starts_with("candidate:2"));
    }

    #[tokio::test]
    async fn unsubscribe_prunes_rooms_created_by_subscription() {
        let relay = MemoryRelay::new();

        // подписки на ещё не созданную комнату заводят пустой слот
        let record_sub = relay.subscribe_record("GHOST", Box::new(|_| {}));
        let lane_sub =
            relay.subscribe_candidates("GHOST", CandidateLane::Offer, Box::new(|_| {}));
        assert_eq!(relay.room_count(), 1);

        record_sub.unsubscribe();
        assert_eq!(relay.room_count(), 1, "lane watcher still holds the room");
        lane_sub.unsubscribe();
        assert_eq!(relay.room_count(), 0, "empty room must be dropped");

        // комната с записью переживает уход наблюдателей
        relay.create_record("ROOM", offer("v=0...")).await.unwrap();
        let sub = relay.subscribe_record("ROOM", Box::new(|_| {}));
        sub.unsubscribe();
        assert_eq!(relay.room_count(), 1);
    }

    #[tokio::test]
    async fn delete_cascades_and_is_idempotent() {
        let relay = MemoryRelay::new();
        relay.create_record("ROOM", offer("v=0...")).await.unwrap();
        relay
            .append_candidate("ROOM", CandidateLane::Answer, candidate(1))
            .await
            .unwrap();

        relay.delete_record("ROOM").await.unwrap();
        assert!(matches!(
            relay.read_record("ROOM").await,
            Err(RelayError::NotFound)
        ));
        assert_eq!(relay.room_count(), 0);

        // повторное удаление — no-op
        relay.delete_record("ROOM").await.unwrap();
    }
}
