//! Адаптер канала сигналинга: типы записи звонка и контракт relay.
//!
//! Relay — внешний документный store, используемый как почтовый ящик.
//! Здесь нет бизнес-логики: создать запись, прочитать/обновить, подписаться
//! на изменения. Все временные метки ставит relay, не локальные часы.

pub mod memory;

use std::fmt;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::RelayError;

/// Offer в записи звонка
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SessionOffer {
    pub sdp: String,
    #[serde(rename = "type")]
    pub sdp_type: String,
    /// Ставится relay при создании записи
    pub created: Option<i64>,
    pub answered: bool,
    /// Ставится relay при перезаписи offer для renegotiation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated: Option<i64>,
}

/// Answer в записи звонка
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SessionAnswer {
    pub sdp: String,
    #[serde(rename = "type")]
    pub sdp_type: String,
    /// Ставится relay при записи
    pub timestamp: Option<i64>,
}

/// Запись звонка, ключ — код комнаты.
/// Максимум один offer и один текущий answer.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct CallRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offer: Option<SessionOffer>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<SessionAnswer>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answered_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer_updated: Option<i64>,
}

/// ICE кандидат в том виде, в котором он лежит в subcollection
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CandidatePayload {
    pub candidate: String,
    pub sdp_mid: Option<String>,
    pub sdp_mline_index: Option<u16>,
}

/// Две упорядоченные append-only subcollection на запись
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CandidateLane {
    /// offerCandidates — кандидаты инициатора
    Offer,
    /// answerCandidates — кандидаты отвечающего
    Answer,
}

impl fmt::Display for CandidateLane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CandidateLane::Offer => write!(f, "offerCandidates"),
            CandidateLane::Answer => write!(f, "answerCandidates"),
        }
    }
}

/// Частичное обновление записи: поля сливаются с существующими.
/// Флаги `mark_*` просят relay проставить соответствующую серверную метку.
#[derive(Debug, Clone, Default)]
pub struct RecordPatch {
    pub offer: Option<SessionOffer>,
    pub answer: Option<SessionAnswer>,
    pub answered: Option<bool>,
    pub mark_answered_at: bool,
    pub mark_answer_updated: bool,
    pub mark_offer_updated: bool,
}

pub type RecordCallback = Box<dyn Fn(CallRecord) + Send + Sync>;
pub type CandidateCallback = Box<dyn Fn(CandidatePayload) + Send + Sync>;

/// Контракт signaling relay.
///
/// Подписки на запись отдают полный снапшот при каждом изменении
/// (at-least-once, включая снапшот при подписке, если запись есть).
/// Подписки на кандидатов отдают каждый элемент ровно один раз:
/// накопленный backlog при подписке, затем каждый новый append.
#[async_trait]
pub trait SignalingRelay: Send + Sync {
    async fn create_record(&self, room_id: &str, offer: SessionOffer) -> Result<(), RelayError>;

    async fn read_record(&self, room_id: &str) -> Result<CallRecord, RelayError>;

    async fn update_record(&self, room_id: &str, patch: RecordPatch) -> Result<(), RelayError>;

    /// Удаляет запись вместе с обеими subcollection. Идемпотентно.
    async fn delete_record(&self, room_id: &str) -> Result<(), RelayError>;

    async fn append_candidate(
        &self,
        room_id: &str,
        lane: CandidateLane,
        candidate: CandidatePayload,
    ) -> Result<(), RelayError>;

    fn subscribe_record(&self, room_id: &str, on_change: RecordCallback) -> Subscription;

    fn subscribe_candidates(
        &self,
        room_id: &str,
        lane: CandidateLane,
        on_added: CandidateCallback,
    ) -> Subscription;
}

/// Хэндл подписки. Повторный unsubscribe — no-op.
pub struct Subscription {
    cancel: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Mutex::new(Some(Box::new(cancel))),
        }
    }

    pub fn unsubscribe(&self) {
        if let Some(cancel) = self.cancel.lock().unwrap().take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let active = self.cancel.lock().unwrap().is_some();
        f.debug_struct("Subscription").field("active", &active).finish()
    }
}
