use thiserror::Error;

/// Ошибки со стороны signaling relay
#[derive(Debug, Error)]
pub enum RelayError {
    /// Запись с таким ключом уже существует
    #[error("call record already exists")]
    AlreadyExists,

    /// Запись не найдена (или исчезла посреди звонка)
    #[error("call record not found")]
    NotFound,

    /// Любая ошибка бэкенда relay
    #[error("relay backend error: {0}")]
    Backend(String),
}

/// Ошибки управления звонком.
///
/// Политика распространения: append кандидатов и удаление записи —
/// fire-and-forget (логируются, звонок продолжается); запись offer/answer
/// и установка описаний — фатальны для текущей попытки и отдаются вызывающему.
#[derive(Debug, Error)]
pub enum CallError {
    /// Нет активного локального медиапотока, сначала нужно включить камеру
    #[error("no active local media stream")]
    NoLocalMedia,

    /// Пустой код комнаты
    #[error("missing room code")]
    MissingCode,

    /// Запись не найдена или в ней нет offer
    #[error("call not found or missing an offer")]
    InvalidCall,

    /// Звонок уже идёт, сначала hangup
    #[error("a call is already in progress")]
    Busy,

    /// Соединение уже закрыто; внутренние guard'ы обычно
    /// молча обрывают операцию вместо этой ошибки
    #[error("peer connection already closed")]
    AlreadyClosed,

    #[error("relay write failed: {0}")]
    Relay(#[from] RelayError),

    #[error("negotiation failed: {0}")]
    Negotiation(#[from] webrtc::Error),
}
