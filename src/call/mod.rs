//! Контроллер звонка: две роли переговоров, reconnect-протокол и hangup.
//!
//! Все внешние колбэки (уведомления relay, события peer connection)
//! превращаются в типизированные [`SessionEvent`] и съедаются одним
//! reducer'ом на одной задаче: порядок чередования явный и тестируемый
//! без живой сети.

mod answer;
mod create;
mod hangup;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use webrtc::peer_connection::offer_answer_options::RTCOfferOptions;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::peer_connection::RTCPeerConnection;

use crate::config;
use crate::error::CallError;
use crate::logger::{log, AppEvent, Notifier, NoticeLevel, StatusKind};
use crate::peer::connection::create_connection;
use crate::peer::media::{LocalStream, RemoteStream};
use crate::peer::types::{candidate_init, ServerConfig};
use crate::session::SessionContext;
use crate::signaling::{
    CallRecord, CandidateLane, CandidatePayload, RecordPatch, SessionAnswer, SessionOffer,
    SignalingRelay, Subscription,
};

/// Состояния машины звонка
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Idle,
    Creating,
    AwaitingOffer,
    AwaitingAnswer,
    Negotiating,
    Connected,
    Closing,
}

/// Роль в переговорах
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallRole {
    Initiator,
    Responder,
}

/// Типизированные события, которые переваривает reducer
#[derive(Debug)]
pub enum SessionEvent {
    /// Полный снапшот записи звонка из relay
    RecordChanged(CallRecord),
    /// Кандидат противоположной стороны из relay
    RemoteCandidate(CandidatePayload),
    /// Локально найденный кандидат от peer connection
    LocalCandidate(CandidatePayload),
    /// Смена connection state у peer connection
    ConnectionState(RTCPeerConnectionState),
}

/// Настройки сессии
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub ice_servers: Vec<ServerConfig>,
    pub grace_period: Duration,
    pub redial_delay: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            ice_servers: config::default_ice_servers(),
            grace_period: config::GRACE_PERIOD,
            redial_delay: config::REDIAL_DELAY,
        }
    }
}

pub(crate) struct SessionInner {
    pub(crate) relay: Arc<dyn SignalingRelay>,
    pub(crate) ctx: Mutex<SessionContext>,
    pub(crate) events_tx: mpsc::UnboundedSender<SessionEvent>,
    pub(crate) notifier: Notifier,
    pub(crate) ice_servers: Vec<ServerConfig>,
    pub(crate) grace_period: Duration,
    pub(crate) redial_delay: Duration,
}

/// Сессия звонка: одна на пользователя, живёт всю жизнь процесса.
pub struct CallSession {
    inner: Arc<SessionInner>,
    pump: JoinHandle<()>,
}

impl CallSession {
    pub fn new(relay: Arc<dyn SignalingRelay>, options: SessionOptions) -> Self {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(SessionInner {
            relay,
            ctx: Mutex::new(SessionContext::new()),
            events_tx,
            notifier: Notifier::new(),
            ice_servers: options.ice_servers,
            grace_period: options.grace_period,
            redial_delay: options.redial_delay,
        });

        let pump_inner = inner.clone();
        let pump = tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                pump_inner.handle_event(event).await;
            }
        });

        Self { inner, pump }
    }

    /// Создать звонок (роль инициатора). Возвращает код комнаты.
    pub async fn create_call(&self) -> Result<String, CallError> {
        self.inner.create_call().await
    }

    /// Присоединиться к звонку по коду комнаты (роль отвечающего).
    /// Код не чувствителен к регистру.
    pub async fn answer_call(&self, room_code: &str) -> Result<(), CallError> {
        self.inner.answer_call(room_code).await
    }

    /// Завершить звонок. Повторный вызов безопасен.
    pub async fn hangup(&self, delete_record: bool) {
        self.inner.hangup(delete_record).await;
    }

    pub fn state(&self) -> CallState {
        self.inner.ctx.lock().unwrap().state
    }

    pub fn role(&self) -> Option<CallRole> {
        self.inner.ctx.lock().unwrap().role
    }

    pub fn room_id(&self) -> Option<String> {
        self.inner.ctx.lock().unwrap().room_id.clone()
    }

    pub fn remote_stream(&self) -> Arc<RemoteStream> {
        self.inner.ctx.lock().unwrap().remote_stream.clone()
    }

    /// Локальный поток задаёт хост после захвата камеры/микрофона
    pub fn set_local_stream(&self, stream: Option<Arc<LocalStream>>) {
        self.inner.ctx.lock().unwrap().local_stream = stream;
    }

    pub fn set_screen_stream(&self, stream: Option<Arc<LocalStream>>) {
        self.inner.ctx.lock().unwrap().screen_stream = stream;
    }

    /// Подписка на статус и уведомления
    pub fn events(&self) -> broadcast::Receiver<AppEvent> {
        self.inner.notifier.subscribe()
    }
}

impl Drop for CallSession {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

impl SessionInner {
    /// Reducer: единственная точка, где внешние события меняют состояние
    pub(crate) async fn handle_event(self: &Arc<Self>, event: SessionEvent) {
        match event {
            SessionEvent::LocalCandidate(candidate) => self.on_local_candidate(candidate).await,
            SessionEvent::RemoteCandidate(candidate) => self.on_remote_candidate(candidate).await,
            SessionEvent::RecordChanged(record) => self.on_record_changed(record).await,
            SessionEvent::ConnectionState(state) => self.on_connection_state(state).await,
        }
    }

    /// Свой кандидат уходит в свою полосу. Fire-and-forget: провал записи
    /// логируется и не останавливает переговоры.
    async fn on_local_candidate(&self, candidate: CandidatePayload) {
        let (room_id, role, pc) = {
            let ctx = self.ctx.lock().unwrap();
            (ctx.room_id.clone(), ctx.role, ctx.pc.clone())
        };
        let (Some(room_id), Some(role), Some(pc)) = (room_id, role, pc) else {
            log("Dropping local candidate: no active call");
            return;
        };
        if pc.signaling_state() == RTCSignalingState::Closed {
            log("Dropping local candidate: connection closed");
            return;
        }
        let lane = match role {
            CallRole::Initiator => CandidateLane::Offer,
            CallRole::Responder => CandidateLane::Answer,
        };
        if let Err(e) = self.relay.append_candidate(&room_id, lane, candidate).await {
            log(&format!("Error adding ICE candidate to relay: {e}"));
        }
    }

    /// Кандидат противоположной стороны применяется только пока соединение
    /// открыто и remote description уже установлен; иначе он молча
    /// отбрасывается (поздние/гоночные доставки после hangup — не ошибка).
    async fn on_remote_candidate(&self, candidate: CandidatePayload) {
        let pc = { self.ctx.lock().unwrap().pc.clone() };
        let Some(pc) = pc else {
            log("Dropping remote candidate: no connection");
            return;
        };
        if pc.signaling_state() == RTCSignalingState::Closed {
            log("Dropping remote candidate: connection closed");
            return;
        }
        if pc.remote_description().await.is_none() {
            log("Dropping remote candidate: no remote description yet");
            return;
        }
        if let Err(e) = pc.add_ice_candidate(candidate_init(candidate)).await {
            log(&format!("Failed to add remote ICE candidate: {e}"));
        }
    }

    async fn on_record_changed(self: &Arc<Self>, record: CallRecord) {
        let role = { self.ctx.lock().unwrap().role };
        match role {
            Some(CallRole::Initiator) => self.on_initiator_record(record).await,
            Some(CallRole::Responder) => self.on_responder_record(record).await,
            None => {}
        }
    }

    /// Инициатор: ждём answer; применяем его ровно один раз
    async fn on_initiator_record(&self, record: CallRecord) {
        let (state, pc, answer_applied_at) = {
            let ctx = self.ctx.lock().unwrap();
            (ctx.state, ctx.pc.clone(), ctx.answer_applied_at)
        };
        let Some(pc) = pc else {
            return;
        };
        let Some(answer) = record.answer else {
            return;
        };
        if pc.signaling_state() == RTCSignalingState::Closed {
            return;
        }

        if matches!(state, CallState::Creating | CallState::AwaitingAnswer) {
            // relay доставляет at-least-once: повторный снапшот с тем же
            // answer игнорируется по наличию remote description
            if pc.remote_description().await.is_some() {
                log("Answer snapshot ignored: remote description already set");
                return;
            }
            log("Got remote answer from relay");
            let desc = match remote_description(&answer.sdp_type, answer.sdp) {
                Ok(desc) => desc,
                Err(e) => {
                    log(&format!("Rejected malformed answer: {e}"));
                    return;
                }
            };
            match pc.set_remote_description(desc).await {
                Ok(()) => {
                    {
                        let mut ctx = self.ctx.lock().unwrap();
                        ctx.state = CallState::Connected;
                        ctx.set_started();
                    }
                    self.notifier.status(StatusKind::Online, "connected to call");
                    self.notifier
                        .notice(NoticeLevel::Success, "connected", "the call has started");
                }
                Err(e) => {
                    log(&format!("Failed to set remote description: {e}"));
                    self.notifier.notice(
                        NoticeLevel::Error,
                        "negotiation failed",
                        &format!("could not apply the answer: {e}"),
                    );
                }
            }
        } else if let Some(updated) = record.answer_updated {
            if pc.signaling_state() != RTCSignalingState::HaveLocalOffer {
                return;
            }
            // answerUpdated переживает эпизод восстановления: снапшот с уже
            // применённой меткой (например, от собственной перезаписи offer
            // при следующем restart) несёт устаревший answer
            if answer_applied_at.is_some_and(|seen| updated <= seen) {
                return;
            }
            {
                self.ctx.lock().unwrap().answer_applied_at = Some(updated);
            }
            // обновлённый answer после ICE restart
            log("Got renewed answer after ICE restart");
            let desc = match remote_description(&answer.sdp_type, answer.sdp) {
                Ok(desc) => desc,
                Err(e) => {
                    log(&format!("Rejected malformed renewed answer: {e}"));
                    return;
                }
            };
            match pc.set_remote_description(desc).await {
                Ok(()) => self.notifier.notice(
                    NoticeLevel::Info,
                    "connection renewed",
                    "reconnected successfully",
                ),
                Err(e) => log(&format!("Failed to apply renewed answer: {e}")),
            }
        }
    }

    /// Отвечающий: renegotiation, когда инициатор перезаписал offer.
    /// Только в состоянии stable и не более одного раза на метку updated;
    /// любой провал здесь логируется и не рвёт звонок.
    async fn on_responder_record(&self, record: CallRecord) {
        let (pc, room_id, renegotiated_at) = {
            let ctx = self.ctx.lock().unwrap();
            (ctx.pc.clone(), ctx.room_id.clone(), ctx.renegotiated_at)
        };
        let (Some(pc), Some(room_id)) = (pc, room_id) else {
            return;
        };
        let Some(offer) = record.offer else {
            return;
        };
        let Some(updated) = offer.updated else {
            return;
        };
        if renegotiated_at.is_some_and(|seen| updated <= seen) {
            return;
        }
        if pc.signaling_state() != RTCSignalingState::Stable {
            log("Skipping renegotiation: signaling state is not stable");
            return;
        }
        // метку фиксируем до обработки, чтобы собственный снапшот после
        // записи нового answer не запустил цикл
        {
            self.ctx.lock().unwrap().renegotiated_at = Some(updated);
        }
        log("Received updated offer for reconnection");

        let desc = match remote_description(&offer.sdp_type, offer.sdp) {
            Ok(desc) => desc,
            Err(e) => {
                log(&format!("Rejected malformed updated offer: {e}"));
                return;
            }
        };
        if let Err(e) = pc.set_remote_description(desc).await {
            log(&format!("Renegotiation failed to set remote offer: {e}"));
            return;
        }
        let answer = match pc.create_answer(None).await {
            Ok(answer) => answer,
            Err(e) => {
                log(&format!("Renegotiation failed to create answer: {e}"));
                return;
            }
        };
        if let Err(e) = pc.set_local_description(answer).await {
            log(&format!("Renegotiation failed to apply local answer: {e}"));
            return;
        }
        let Some(local) = pc.local_description().await else {
            return;
        };
        let patch = RecordPatch {
            answer: Some(SessionAnswer {
                sdp: local.sdp,
                sdp_type: local.sdp_type.to_string(),
                timestamp: None,
            }),
            mark_answer_updated: true,
            ..Default::default()
        };
        match self.relay.update_record(&room_id, patch).await {
            Ok(()) => self.notifier.notice(
                NoticeLevel::Info,
                "connection renewed",
                "reconnected successfully",
            ),
            Err(e) => log(&format!("Renegotiation failed to write answer: {e}")),
        }
    }

    /// Политика восстановления: "disconnected" взводит один grace-таймер,
    /// "connected" его снимает. Если по истечении таймера соединение всё ещё
    /// лежит — ровно один ICE restart, без пересоздания соединения.
    async fn on_connection_state(self: &Arc<Self>, state: RTCPeerConnectionState) {
        match state {
            RTCPeerConnectionState::Connected => {
                let pending = { self.ctx.lock().unwrap().grace_task.take() };
                if let Some(task) = pending {
                    task.abort();
                    log("Connection recovered - canceling pending grace timer");
                    self.notifier.notice(
                        NoticeLevel::Info,
                        "connection recovered",
                        "the call is back",
                    );
                }
            }
            RTCPeerConnectionState::Disconnected | RTCPeerConnectionState::Failed => {
                {
                    let mut ctx = self.ctx.lock().unwrap();
                    if ctx.grace_task.is_some() {
                        log("Grace timer already pending, ignoring");
                        return;
                    }
                    if ctx.pc.is_none() {
                        return;
                    }
                    let inner = self.clone();
                    let grace = self.grace_period;
                    ctx.grace_task = Some(tokio::spawn(async move {
                        log(&format!(
                            "Grace period started, waiting {} ms",
                            grace.as_millis()
                        ));
                        sleep(grace).await;
                        inner.after_grace().await;
                    }));
                }
                self.notifier.notice(
                    NoticeLevel::Warning,
                    "connection interrupted",
                    "trying to recover...",
                );
            }
            RTCPeerConnectionState::Closed => {
                if let Some(task) = self.ctx.lock().unwrap().grace_task.take() {
                    task.abort();
                }
            }
            _ => {}
        }
    }

    async fn after_grace(self: &Arc<Self>) {
        let pc = { self.ctx.lock().unwrap().pc.clone() };
        let still_down = pc.as_ref().is_some_and(|pc| {
            matches!(
                pc.connection_state(),
                RTCPeerConnectionState::Disconnected | RTCPeerConnectionState::Failed
            )
        });
        if still_down {
            log("Grace period over, connection still down - restarting ICE");
            self.restart_ice().await;
        } else {
            log("Connection recovered during grace period");
        }
        self.ctx.lock().unwrap().grace_task = None;
    }

    /// Восстановление живости: ICE restart на существующем соединении.
    /// Инициатор публикует перезапущенный offer с меткой updated, отвечающий
    /// ответит по пути renegotiation.
    async fn restart_ice(&self) {
        let (pc, role, room_id) = {
            let ctx = self.ctx.lock().unwrap();
            (ctx.pc.clone(), ctx.role, ctx.room_id.clone())
        };
        let Some(pc) = pc else {
            return;
        };
        if pc.signaling_state() == RTCSignalingState::Closed {
            // AlreadyClosed: молча выходим
            return;
        }
        let options = RTCOfferOptions {
            ice_restart: true,
            ..Default::default()
        };
        let offer = match pc.create_offer(Some(options)).await {
            Ok(offer) => offer,
            Err(e) => {
                log(&format!("ICE restart failed to create offer: {e}"));
                self.notifier.notice(
                    NoticeLevel::Error,
                    "reconnect failed",
                    "could not restart the connection",
                );
                return;
            }
        };
        if let Err(e) = pc.set_local_description(offer).await {
            log(&format!("ICE restart failed to apply local offer: {e}"));
            return;
        }
        log("ICE restart initiated");

        match (role, room_id) {
            (Some(CallRole::Initiator), Some(room_id)) => {
                let Some(local) = pc.local_description().await else {
                    return;
                };
                let patch = RecordPatch {
                    offer: Some(SessionOffer {
                        sdp: local.sdp,
                        sdp_type: local.sdp_type.to_string(),
                        created: None,
                        answered: true,
                        updated: None, // метку ставит relay
                    }),
                    mark_offer_updated: true,
                    ..Default::default()
                };
                if let Err(e) = self.relay.update_record(&room_id, patch).await {
                    log(&format!("Failed to publish restarted offer: {e}"));
                }
            }
            _ => {
                // отвечающий не может положить offer в запись, не сломав
                // роли: ждём перезапущенный offer от инициатора
                self.notifier.notice(
                    NoticeLevel::Warning,
                    "connection lost",
                    "waiting for the caller to reconnect",
                );
            }
        }
    }

    /// Закрывает старое соединение (если было) и создаёт новое с текущими
    /// локальными треками и тем же контейнером удалённого потока.
    pub(crate) async fn fresh_connection(
        self: &Arc<Self>,
    ) -> Result<Arc<RTCPeerConnection>, CallError> {
        let (old, local, remote) = {
            let mut ctx = self.ctx.lock().unwrap();
            (ctx.pc.take(), ctx.local_stream.clone(), ctx.remote_stream.clone())
        };
        let pc =
            create_connection(old, &self.ice_servers, local, remote, self.events_tx.clone())
                .await?;
        self.ctx.lock().unwrap().pc = Some(pc.clone());
        Ok(pc)
    }

    pub(crate) fn subscribe_record_events(&self, room_id: &str) -> Subscription {
        let tx = self.events_tx.clone();
        self.relay.subscribe_record(
            room_id,
            Box::new(move |record| {
                let _ = tx.send(SessionEvent::RecordChanged(record));
            }),
        )
    }

    pub(crate) fn subscribe_candidate_events(
        &self,
        room_id: &str,
        lane: CandidateLane,
    ) -> Subscription {
        let tx = self.events_tx.clone();
        self.relay.subscribe_candidates(
            room_id,
            lane,
            Box::new(move |candidate| {
                let _ = tx.send(SessionEvent::RemoteCandidate(candidate));
            }),
        )
    }

    /// Откат неудавшейся попытки: состояние Idle, поля звонка очищены,
    /// соединение остаётся на месте для повторной попытки.
    pub(crate) fn abort_to_idle(&self, status_text: &str) {
        {
            let mut ctx = self.ctx.lock().unwrap();
            ctx.state = CallState::Idle;
            ctx.role = None;
            ctx.room_id = None;
            ctx.set_subscriptions(None, None, None);
        }
        self.notifier.status(StatusKind::Offline, status_text);
    }
}

/// Строит remote description из полей записи
fn remote_description(sdp_type: &str, sdp: String) -> Result<RTCSessionDescription, webrtc::Error> {
    match sdp_type {
        "offer" => RTCSessionDescription::offer(sdp),
        "answer" => RTCSessionDescription::answer(sdp),
        "pranswer" => RTCSessionDescription::pranswer(sdp),
        other => Err(webrtc::Error::new(format!("unknown sdp type: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signaling::memory::MemoryRelay;
    use std::time::Duration;
    use tokio::time::sleep;

    use webrtc::api::media_engine::MIME_TYPE_OPUS;
    use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
    use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
    use webrtc::track::track_local::TrackLocal;

    fn test_options() -> SessionOptions {
        SessionOptions {
            ice_servers: vec![],
            grace_period: Duration::from_millis(100),
            redial_delay: Duration::from_millis(10),
        }
    }

    fn test_session() -> CallSession {
        CallSession::new(Arc::new(MemoryRelay::new()), test_options())
    }

    fn media() -> Arc<LocalStream> {
        let track: Arc<dyn TrackLocal + Send + Sync> = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                ..Default::default()
            },
            "audio".to_owned(),
            "local".to_owned(),
        ));
        Arc::new(LocalStream::new(vec![track]))
    }

    async fn connected_pair() -> (CallSession, CallSession, MemoryRelay, String) {
        let relay = MemoryRelay::new();
        let caller = CallSession::new(Arc::new(relay.clone()), test_options());
        let callee = CallSession::new(Arc::new(relay.clone()), test_options());
        caller.set_local_stream(Some(media()));
        callee.set_local_stream(Some(media()));

        let code = caller.create_call().await.unwrap();
        callee.answer_call(&code).await.unwrap();
        for _ in 0..200 {
            if caller.state() == CallState::Connected {
                break;
            }
            sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(caller.state(), CallState::Connected);
        (caller, callee, relay, code)
    }

    #[tokio::test]
    async fn remote_candidate_without_connection_is_dropped() {
        let session = test_session();
        session
            .inner
            .events_tx
            .send(SessionEvent::RemoteCandidate(CandidatePayload {
                candidate: "candidate:1 1 udp 1 192.0.2.1 9 typ host".into(),
                sdp_mid: Some("0".into()),
                sdp_mline_index: Some(0),
            }))
            .unwrap();
        sleep(Duration::from_millis(50)).await;
        assert_eq!(session.state(), CallState::Idle);
    }

    #[tokio::test]
    async fn remote_candidate_before_remote_description_is_dropped() {
        let session = test_session();
        let pc = session.inner.fresh_connection().await.unwrap();
        session
            .inner
            .events_tx
            .send(SessionEvent::RemoteCandidate(CandidatePayload {
                candidate: "candidate:1 1 udp 1 192.0.2.1 9 typ host".into(),
                sdp_mid: Some("0".into()),
                sdp_mline_index: Some(0),
            }))
            .unwrap();
        sleep(Duration::from_millis(50)).await;
        assert!(pc.remote_description().await.is_none());
        assert_eq!(session.state(), CallState::Idle);
    }

    #[tokio::test]
    async fn disconnected_arms_a_single_grace_timer() {
        let session = test_session();
        session.inner.fresh_connection().await.unwrap();

        session
            .inner
            .events_tx
            .send(SessionEvent::ConnectionState(
                RTCPeerConnectionState::Disconnected,
            ))
            .unwrap();
        session
            .inner
            .events_tx
            .send(SessionEvent::ConnectionState(
                RTCPeerConnectionState::Disconnected,
            ))
            .unwrap();
        sleep(Duration::from_millis(30)).await;
        assert!(session.inner.ctx.lock().unwrap().grace_task.is_some());

        // соединение на самом деле не лежит (state = New), так что таймер
        // истекает по ветке "recovered" и снимает сам себя
        sleep(Duration::from_millis(200)).await;
        assert!(session.inner.ctx.lock().unwrap().grace_task.is_none());
    }

    #[tokio::test]
    async fn connected_cancels_pending_grace_timer() {
        let session = test_session();
        session.inner.fresh_connection().await.unwrap();

        session
            .inner
            .events_tx
            .send(SessionEvent::ConnectionState(
                RTCPeerConnectionState::Disconnected,
            ))
            .unwrap();
        sleep(Duration::from_millis(30)).await;
        assert!(session.inner.ctx.lock().unwrap().grace_task.is_some());

        session
            .inner
            .events_tx
            .send(SessionEvent::ConnectionState(
                RTCPeerConnectionState::Connected,
            ))
            .unwrap();
        sleep(Duration::from_millis(30)).await;
        assert!(session.inner.ctx.lock().unwrap().grace_task.is_none());
    }

    #[test]
    fn remote_description_rejects_unknown_type() {
        assert!(remote_description("rollback", "v=0\r\n".into()).is_err());
    }

    #[tokio::test]
    async fn ice_restart_republishes_offer_exactly_once() {
        let (caller, _callee, relay, code) = connected_pair().await;
        let before = relay.read_record(&code).await.unwrap();
        assert!(before.offer.unwrap().updated.is_none());

        caller.inner.restart_ice().await;

        let mut stamp = None;
        for _ in 0..200 {
            stamp = relay.read_record(&code).await.unwrap().offer.unwrap().updated;
            if stamp.is_some() {
                break;
            }
            sleep(Duration::from_millis(20)).await;
        }
        let stamp = stamp.expect("restart must republish the offer");

        // переответ отвечающего не трогает offer: вторая перезапись
        // означала бы лишний цикл переговоров
        sleep(Duration::from_millis(200)).await;
        let record = relay.read_record(&code).await.unwrap();
        assert_eq!(record.offer.unwrap().updated, Some(stamp));
        assert!(record.answer_updated.is_some(), "responder must re-answer");
    }

    #[tokio::test]
    async fn renewed_answer_is_applied_after_each_restart() {
        let (caller, _callee, relay, code) = connected_pair().await;
        let pc = caller.inner.ctx.lock().unwrap().pc.clone().unwrap();

        // два эпизода восстановления подряд: answerUpdated прошлого эпизода
        // остаётся в записи, свежий answer всё равно обязан дойти до
        // remote description инициатора
        for episode in 1..=2 {
            caller.inner.restart_ice().await;

            let mut applied = false;
            for _ in 0..200 {
                let record = relay.read_record(&code).await.unwrap();
                let remote = pc.remote_description().await;
                if let (Some(answer), Some(remote)) = (record.answer, remote) {
                    if record.answer_updated.is_some()
                        && pc.signaling_state() == RTCSignalingState::Stable
                        && remote.sdp == answer.sdp
                    {
                        applied = true;
                        break;
                    }
                }
                sleep(Duration::from_millis(20)).await;
            }
            assert!(applied, "renewed answer was not applied in episode {episode}");
        }
    }
}
