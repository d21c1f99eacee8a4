//! Завершение звонка: снять обработчики, закрыть соединение, убрать запись,
//! подготовить свежее соединение для следующего звонка.

use std::sync::Arc;

use chrono::Utc;
use tokio::time::sleep;

use crate::call::{CallState, SessionInner};
use crate::logger::{log, NoticeLevel, StatusKind};
use crate::peer::connection::detach_handlers;
use crate::utils::format_duration;

impl SessionInner {
    /// Разбирает звонок в фиксированном порядке. Идемпотентен: повторный
    /// вызов без активного звонка ничего не делает и не возвращает ошибок.
    pub(crate) async fn hangup(self: &Arc<Self>, delete_record: bool) {
        let (pc, room_id, started_at, subs, screen, grace) = {
            let mut ctx = self.ctx.lock().unwrap();
            if ctx.state == CallState::Idle && ctx.pc.is_none() {
                return;
            }
            ctx.state = CallState::Closing;
            (
                ctx.pc.take(),
                ctx.room_id.clone(),
                ctx.started_at.take(),
                (
                    ctx.record_sub.take(),
                    ctx.offer_candidates_sub.take(),
                    ctx.answer_candidates_sub.take(),
                ),
                ctx.screen_stream.take(),
                ctx.grace_task.take(),
            )
        };
        log("Hanging up call");

        if let Some(task) = grace {
            task.abort();
        }

        // сначала снимаем обработчики, потом закрываем: поздние колбэки
        // не должны видеть закрывающееся соединение
        if let Some(pc) = pc {
            detach_handlers(&pc);
            let _ = pc.close().await;
        }

        let (record_sub, offer_sub, answer_sub) = subs;
        if let Some(sub) = record_sub {
            sub.unsubscribe();
        }
        if let Some(sub) = offer_sub {
            sub.unsubscribe();
        }
        if let Some(sub) = answer_sub {
            sub.unsubscribe();
        }

        // удаление записи — best effort: провал не мешает локальному разбору
        if delete_record {
            if let Some(room_id) = &room_id {
                if let Err(e) = self.relay.delete_record(room_id).await {
                    log(&format!("Failed to delete call record: {e}"));
                }
            }
        }

        if let Some(screen) = screen {
            screen.stop();
        }

        if let Some(started_at) = started_at {
            let seconds = (Utc::now() - started_at).num_seconds().max(0);
            self.notifier.notice(
                NoticeLevel::Info,
                "call ended",
                &format!("duration {}", format_duration(seconds)),
            );
        }

        {
            let mut ctx = self.ctx.lock().unwrap();
            ctx.reset_call();
            ctx.state = CallState::Idle;
        }
        self.notifier.status(StatusKind::Online, "ready");

        // свежее соединение для следующего звонка, с паузой: закрывающийся
        // транспорт не должен пересекаться с новым
        let inner = self.clone();
        let delay = self.redial_delay;
        tokio::spawn(async move {
            sleep(delay).await;
            let idle = { inner.ctx.lock().unwrap().state == CallState::Idle };
            if !idle {
                return;
            }
            if let Err(e) = inner.fresh_connection().await {
                log(&format!("Failed to prepare replacement connection: {e}"));
            }
        });
    }
}
