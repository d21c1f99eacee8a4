//! Создание звонка: инициатор публикует offer и ждёт answer через relay.

use std::sync::Arc;

use crate::call::{CallRole, CallState, SessionInner};
use crate::error::CallError;
use crate::logger::{log, NoticeLevel, StatusKind};
use crate::signaling::{CandidateLane, SessionOffer};
use crate::utils::generate_room_id;

impl SessionInner {
    /// Создаёт звонок и возвращает код комнаты. Требует свободную сессию и
    /// активный локальный поток; при провале записи в relay откатывается
    /// в Idle, соединение остаётся для повторной попытки.
    pub(crate) async fn create_call(self: &Arc<Self>) -> Result<String, CallError> {
        {
            let ctx = self.ctx.lock().unwrap();
            if ctx.state != CallState::Idle {
                return Err(CallError::Busy);
            }
            if !ctx.local_stream.as_ref().is_some_and(|s| s.is_active()) {
                return Err(CallError::NoLocalMedia);
            }
        }
        self.notifier.status(StatusKind::Connecting, "creating call...");

        let pc = self.fresh_connection().await?;
        let room_id = generate_room_id();
        log(&format!("Creating call {room_id}"));

        // роль и комната фиксируются до create_offer: локальные кандидаты
        // начинают сыпаться сразу после set_local_description, и им уже
        // нужна правильная полоса
        {
            let mut ctx = self.ctx.lock().unwrap();
            ctx.state = CallState::Creating;
            ctx.set_call_info(CallRole::Initiator, room_id.clone());
        }

        let offer = match self.negotiate_offer(&pc).await {
            Ok(offer) => offer,
            Err(e) => {
                self.abort_to_idle("offline");
                return Err(e);
            }
        };

        if let Err(e) = self.relay.create_record(&room_id, offer).await {
            log(&format!("Failed to publish offer: {e}"));
            self.abort_to_idle("offline");
            self.notifier.notice(
                NoticeLevel::Error,
                "call failed",
                "could not reach the signaling server",
            );
            return Err(e.into());
        }

        let record_sub = self.subscribe_record_events(&room_id);
        let answer_sub = self.subscribe_candidate_events(&room_id, CandidateLane::Answer);
        {
            let mut ctx = self.ctx.lock().unwrap();
            ctx.set_subscriptions(Some(record_sub), None, Some(answer_sub));
            // answer мог прийти и раньше (снапшот при подписке обгоняет
            // этот lock) - reducer принимает его и из Creating
            if ctx.state == CallState::Creating {
                ctx.state = CallState::AwaitingAnswer;
            }
        }

        self.notifier.notice(
            NoticeLevel::Success,
            "call created",
            &format!("share the code {room_id} to invite"),
        );
        Ok(room_id)
    }

    async fn negotiate_offer(
        &self,
        pc: &Arc<webrtc::peer_connection::RTCPeerConnection>,
    ) -> Result<SessionOffer, CallError> {
        let offer = pc.create_offer(None).await?;
        pc.set_local_description(offer).await?;
        let local = pc
            .local_description()
            .await
            .ok_or(CallError::AlreadyClosed)?;
        Ok(SessionOffer {
            sdp: local.sdp,
            sdp_type: local.sdp_type.to_string(),
            created: None, // метку ставит relay
            answered: false,
            updated: None,
        })
    }
}
