//! P2P видеозвонок поверх WebRTC с документным store в роли сигналинга.
//!
//! Store — почтовый ящик: инициатор кладёт offer, отвечающий отвечает
//! answer'ом, ICE-кандидаты текут через две append-only полосы. Прямой
//! связи между пирами до установления транспорта нет.

pub mod call;
pub mod config;
pub mod error;
pub mod logger;
pub mod peer;
pub mod session;
pub mod signaling;
pub mod utils;

pub use call::{CallRole, CallSession, CallState, SessionOptions};
pub use error::{CallError, RelayError};
pub use logger::{AppEvent, NoticeLevel, StatusKind};
pub use peer::{LocalStream, RemoteStream, ServerConfig};
pub use signaling::memory::MemoryRelay;
pub use signaling::SignalingRelay;
