use crate::peer::types::ServerConfig;
use rand::Rng;

const ROOM_CODE_LEN: usize = 10;
const ROOM_CODE_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Генерирует короткий код комнаты: 10 символов, верхний регистр
pub fn generate_room_id() -> String {
    let mut rng = rand::rng();
    (0..ROOM_CODE_LEN)
        .map(|_| ROOM_CODE_CHARSET[rng.random_range(0..ROOM_CODE_CHARSET.len())] as char)
        .collect()
}

/// Код комнаты не чувствителен к регистру, нормализуем к верхнему
pub fn normalize_room_id(raw: &str) -> String {
    raw.trim().to_ascii_uppercase()
}

/// Форматирует длительность в MM:SS
pub fn format_duration(seconds: i64) -> String {
    let minutes = seconds / 60;
    let rest = seconds % 60;
    format!("{}:{:02}", minutes, rest)
}

// Функция для добавления схемы протокола к URL ICE сервера, если она отсутствует
pub fn add_ice_url_scheme(config: &ServerConfig) -> String {
    // Если url уже начинается с "turn:" или "stun:", возвращаем как есть
    if config.url.starts_with("turn:") || config.url.starts_with("stun:") {
        config.url.clone()
    } else {
        let scheme = if config.r#type == "turn" {
            "turn:"
        } else {
            "stun:"
        };
        format!("{}{}", scheme, config.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_id_is_fixed_length_uppercase_alphanumeric() {
        for _ in 0..50 {
            let id = generate_room_id();
            assert_eq!(id.len(), ROOM_CODE_LEN);
            assert!(id
                .bytes()
                .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit()));
        }
    }

    #[test]
    fn room_ids_do_not_trivially_collide() {
        let a = generate_room_id();
        let b = generate_room_id();
        assert_ne!(a, b);
    }

    #[test]
    fn normalize_uppercases_and_trims() {
        assert_eq!(normalize_room_id("  ab12cd34ef "), "AB12CD34EF");
        assert_eq!(normalize_room_id(""), "");
    }

    #[test]
    fn duration_formats_as_minutes_seconds() {
        assert_eq!(format_duration(0), "0:00");
        assert_eq!(format_duration(65), "1:05");
        assert_eq!(format_duration(600), "10:00");
    }

    #[test]
    fn ice_url_scheme_added_when_missing() {
        let cfg = ServerConfig {
            id: "t".into(),
            r#type: "turn".into(),
            url: "relay.example.com:443".into(),
            username: None,
            credential: None,
        };
        assert_eq!(add_ice_url_scheme(&cfg), "turn:relay.example.com:443");

        let cfg = ServerConfig {
            r#type: "stun".into(),
            url: "stun:stun.example.com".into(),
            ..cfg
        };
        assert_eq!(add_ice_url_scheme(&cfg), "stun:stun.example.com");
    }
}
