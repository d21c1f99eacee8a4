use tokio::sync::broadcast;

/// Логирование с временными метками
pub fn log(msg: &str) {
    if crate::config::LOGGING_ENABLED {
        let now = chrono::Local::now();
        println!("[{}] {}", now.format("%Y-%m-%d %H:%M:%S%.3f"), msg);
    }
}

/// Статус соединения для UI: ровно три состояния
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    Offline,
    Connecting,
    Online,
}

/// Уровень уведомления (аналог toast)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// События, которые библиотека отдаёт наружу. Чисто наблюдательный вывод,
/// никакой логики на них не завязано.
#[derive(Debug, Clone)]
pub enum AppEvent {
    Status { kind: StatusKind, text: String },
    Notice { level: NoticeLevel, title: String, message: String },
}

/// Рассылка событий подписчикам. Отсутствие подписчиков — не ошибка.
#[derive(Clone)]
pub struct Notifier {
    tx: broadcast::Sender<AppEvent>,
}

impl Notifier {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(64);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AppEvent> {
        self.tx.subscribe()
    }

    pub fn status(&self, kind: StatusKind, text: &str) {
        log(&format!("status -> {:?}: {}", kind, text));
        let _ = self.tx.send(AppEvent::Status {
            kind,
            text: text.to_string(),
        });
    }

    pub fn notice(&self, level: NoticeLevel, title: &str, message: &str) {
        log(&format!("notice [{:?}] {}: {}", level, title, message));
        let _ = self.tx.send(AppEvent::Notice {
            level,
            title: title.to_string(),
            message: message.to_string(),
        });
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}
