//! Состояние текущего звонка. Один экземпляр на контроллер, живёт всю
//! жизнь процесса; на hangup сбрасываются только поля звонка, ссылки на
//! медиапотоки переживают звонок (камера остаётся включённой).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use webrtc::peer_connection::RTCPeerConnection;

use crate::call::{CallRole, CallState};
use crate::peer::media::{LocalStream, RemoteStream};
use crate::signaling::Subscription;

pub struct SessionContext {
    pub state: CallState,
    pub role: Option<CallRole>,
    pub room_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,

    pub pc: Option<Arc<RTCPeerConnection>>,

    pub local_stream: Option<Arc<LocalStream>>,
    pub remote_stream: Arc<RemoteStream>,
    pub screen_stream: Option<Arc<LocalStream>>,

    pub record_sub: Option<Subscription>,
    pub offer_candidates_sub: Option<Subscription>,
    pub answer_candidates_sub: Option<Subscription>,

    /// Отложенная проверка после "disconnected"
    pub grace_task: Option<JoinHandle<()>>,

    /// Метка offer.updated, которую уже обработали (защита от повторных
    /// снапшотов при renegotiation)
    pub renegotiated_at: Option<i64>,

    /// Метка answerUpdated последнего применённого обновлённого answer.
    /// answerUpdated живёт в записи между эпизодами восстановления, поэтому
    /// снапшот со старой меткой не должен применяться повторно
    pub answer_applied_at: Option<i64>,
}

// Все группы сеттеров зовутся под одним внешним Mutex, поэтому читатель
// никогда не видит смесь старых и новых полей.
impl SessionContext {
    pub fn new() -> Self {
        Self {
            state: CallState::Idle,
            role: None,
            room_id: None,
            started_at: None,
            pc: None,
            local_stream: None,
            remote_stream: Arc::new(RemoteStream::new()),
            screen_stream: None,
            record_sub: None,
            offer_candidates_sub: None,
            answer_candidates_sub: None,
            grace_task: None,
            renegotiated_at: None,
            answer_applied_at: None,
        }
    }

    pub fn set_call_info(&mut self, role: CallRole, room_id: String) {
        self.role = Some(role);
        self.room_id = Some(room_id);
        self.renegotiated_at = None;
        self.answer_applied_at = None;
    }

    pub fn set_subscriptions(
        &mut self,
        record: Option<Subscription>,
        offer_candidates: Option<Subscription>,
        answer_candidates: Option<Subscription>,
    ) {
        self.record_sub = record;
        self.offer_candidates_sub = offer_candidates;
        self.answer_candidates_sub = answer_candidates;
    }

    pub fn set_started(&mut self) {
        self.started_at = Some(Utc::now());
    }

    /// Сбрасывает поля звонка. Медиапотоки не трогаем: они живут до
    /// следующего создания соединения.
    pub fn reset_call(&mut self) {
        self.role = None;
        self.room_id = None;
        self.started_at = None;
        self.record_sub = None;
        self.offer_candidates_sub = None;
        self.answer_candidates_sub = None;
        self.renegotiated_at = None;
        self.answer_applied_at = None;
        if let Some(task) = self.grace_task.take() {
            task.abort();
        }
    }
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_clears_call_fields_but_keeps_streams() {
        let mut ctx = SessionContext::new();
        ctx.set_call_info(CallRole::Initiator, "AB12CD34EF".into());
        ctx.set_started();
        ctx.set_subscriptions(Some(Subscription::new(|| {})), None, None);
        let remote = ctx.remote_stream.clone();

        ctx.reset_call();

        assert!(ctx.role.is_none());
        assert!(ctx.room_id.is_none());
        assert!(ctx.started_at.is_none());
        assert!(ctx.record_sub.is_none());
        assert!(Arc::ptr_eq(&ctx.remote_stream, &remote));
    }
}
