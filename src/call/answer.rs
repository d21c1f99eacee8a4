//! Присоединение к звонку: отвечающий читает offer из relay и пишет answer.

use std::sync::Arc;

use crate::call::{CallRole, CallState, SessionInner};
use crate::error::{CallError, RelayError};
use crate::logger::{log, NoticeLevel, StatusKind};
use crate::signaling::{CandidateLane, RecordPatch, SessionAnswer};
use crate::utils::normalize_room_id;

impl SessionInner {
    /// Присоединяется к звонку по коду комнаты. Код нормализуется
    /// (регистр/пробелы); пустой код отклоняется до любого похода в relay.
    pub(crate) async fn answer_call(self: &Arc<Self>, room_code: &str) -> Result<(), CallError> {
        let room_id = normalize_room_id(room_code);
        if room_id.is_empty() {
            return Err(CallError::MissingCode);
        }
        {
            let ctx = self.ctx.lock().unwrap();
            if ctx.state != CallState::Idle {
                return Err(CallError::Busy);
            }
            if !ctx.local_stream.as_ref().is_some_and(|s| s.is_active()) {
                return Err(CallError::NoLocalMedia);
            }
        }
        self.notifier.status(StatusKind::Connecting, "joining call...");

        let pc = self.fresh_connection().await?;
        log(&format!("Joining call {room_id}"));
        {
            let mut ctx = self.ctx.lock().unwrap();
            ctx.state = CallState::AwaitingOffer;
            ctx.set_call_info(CallRole::Responder, room_id.clone());
        }

        let record = match self.relay.read_record(&room_id).await {
            Ok(record) => record,
            Err(RelayError::NotFound) => {
                self.abort_to_idle("offline");
                return Err(CallError::InvalidCall);
            }
            Err(e) => {
                log(&format!("Failed to read call record: {e}"));
                self.abort_to_idle("offline");
                return Err(e.into());
            }
        };
        let Some(offer) = record.offer else {
            self.abort_to_idle("offline");
            return Err(CallError::InvalidCall);
        };

        {
            self.ctx.lock().unwrap().state = CallState::Negotiating;
        }
        let answer = match self.negotiate_answer(&pc, offer.sdp_type, offer.sdp).await {
            Ok(answer) => answer,
            Err(e) => {
                self.abort_to_idle("offline");
                self.notifier.notice(
                    NoticeLevel::Error,
                    "join failed",
                    &format!("could not negotiate the call: {e}"),
                );
                return Err(e);
            }
        };

        let patch = RecordPatch {
            answer: Some(answer),
            answered: Some(true),
            mark_answered_at: true,
            ..Default::default()
        };
        if let Err(e) = self.relay.update_record(&room_id, patch).await {
            log(&format!("Failed to publish answer: {e}"));
            self.abort_to_idle("offline");
            self.notifier.notice(
                NoticeLevel::Error,
                "join failed",
                "could not reach the signaling server",
            );
            return Err(e.into());
        }

        // подписка на полосу инициатора доставит backlog кандидатов,
        // накопленный до нашего прихода
        let record_sub = self.subscribe_record_events(&room_id);
        let offer_sub = self.subscribe_candidate_events(&room_id, CandidateLane::Offer);
        {
            let mut ctx = self.ctx.lock().unwrap();
            ctx.set_subscriptions(Some(record_sub), Some(offer_sub), None);
            ctx.state = CallState::Connected;
            ctx.set_started();
        }

        self.notifier.status(StatusKind::Online, "connected to call");
        self.notifier
            .notice(NoticeLevel::Success, "connected", "the call has started");
        Ok(())
    }

    async fn negotiate_answer(
        &self,
        pc: &Arc<webrtc::peer_connection::RTCPeerConnection>,
        offer_type: String,
        offer_sdp: String,
    ) -> Result<SessionAnswer, CallError> {
        let remote = super::remote_description(&offer_type, offer_sdp)?;
        pc.set_remote_description(remote).await?;
        let answer = pc.create_answer(None).await?;
        pc.set_local_description(answer).await?;
        let local = pc
            .local_description()
            .await
            .ok_or(CallError::AlreadyClosed)?;
        Ok(SessionAnswer {
            sdp: local.sdp,
            sdp_type: local.sdp_type.to_string(),
            timestamp: None, // метку ставит relay
        })
    }
}
