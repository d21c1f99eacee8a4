// Конфигурация библиотеки
// Логирование можно отключить только в режиме разработки

use std::time::Duration;

use crate::peer::types::ServerConfig;

#[cfg(debug_assertions)]
pub const LOGGING_ENABLED: bool = true; // В режиме отладки логирование включено

#[cfg(not(debug_assertions))]
pub const LOGGING_ENABLED: bool = false; // В продакшене логирование отключено

/// Сколько ждём после "disconnected" прежде чем перезапускать ICE
pub const GRACE_PERIOD: Duration = Duration::from_secs(3);

/// Пауза перед созданием нового соединения после hangup.
/// Даёт relay время подтвердить удаление записи до того, как новые записи
/// начнут попадать в тот же шаблон room id.
pub const REDIAL_DELAY: Duration = Duration::from_millis(500);

/// Дефолтный набор STUN/TURN серверов
pub fn default_ice_servers() -> Vec<ServerConfig> {
    vec![
        ServerConfig {
            id: "default-stun".into(),
            r#type: "stun".into(),
            url: "stun:stun.l.google.com:19302".into(),
            username: None,
            credential: None,
        },
        ServerConfig {
            id: "default-stun-1".into(),
            r#type: "stun".into(),
            url: "stun:stun1.l.google.com:19302".into(),
            username: None,
            credential: None,
        },
        ServerConfig {
            id: "default-stun-2".into(),
            r#type: "stun".into(),
            url: "stun:stun2.l.google.com:19302".into(),
            username: None,
            credential: None,
        },
        ServerConfig {
            id: "openrelay-turn".into(),
            r#type: "turn".into(),
            url: "turn:openrelay.metered.ca:80".into(),
            username: Some("openrelayproject".into()),
            credential: Some("openrelayproject".into()),
        },
        ServerConfig {
            id: "openrelay-turn-443".into(),
            r#type: "turn".into(),
            url: "turn:openrelay.metered.ca:443".into(),
            username: Some("openrelayproject".into()),
            credential: Some("openrelayproject".into()),
        },
    ]
}
