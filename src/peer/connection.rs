use std::sync::Arc;

use tokio::sync::mpsc;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::peer_connection::RTCPeerConnection;

use crate::call::SessionEvent;
use crate::error::CallError;
use crate::logger::log;
use crate::peer::media::{LocalStream, RemoteStream};
use crate::peer::types::{candidate_payload, ServerConfig};
use crate::utils::add_ice_url_scheme;

/// Создаёт новое peer connection. Старое, если было, сначала закрывается
/// (повторное закрытие — no-op). После возврата живёт ровно одно соединение,
/// и на нём висят текущие локальные треки.
pub async fn create_connection(
    old: Option<Arc<RTCPeerConnection>>,
    ice_servers: &[ServerConfig],
    local_stream: Option<Arc<LocalStream>>,
    remote_stream: Arc<RemoteStream>,
    events: mpsc::UnboundedSender<SessionEvent>,
) -> Result<Arc<RTCPeerConnection>, CallError> {
    if let Some(old) = old {
        log("Closing previous peer connection");
        let _ = old.close().await;
    }

    let mut media = MediaEngine::default();
    media.register_default_codecs()?;
    let mut registry = Registry::new();
    registry = register_default_interceptors(registry, &mut media)?;
    let api = APIBuilder::new()
        .with_media_engine(media)
        .with_interceptor_registry(registry)
        .build();

    let pc = Arc::new(api.new_peer_connection(rtc_config(ice_servers)).await?);
    log("Created new peer connection");

    // Локальные кандидаты уходят в sink вызывающего, но только пока
    // signaling state не closed: защита от записей после закрытия
    let weak_pc = Arc::downgrade(&pc);
    let candidate_events = events.clone();
    pc.on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
        let events = candidate_events.clone();
        let weak_pc = weak_pc.clone();
        Box::pin(async move {
            let Some(cand) = cand else {
                // None означает конец сбора
                log("ICE candidate gathering completed");
                return;
            };
            let Some(pc) = weak_pc.upgrade() else {
                return;
            };
            if pc.signaling_state() == RTCSignalingState::Closed {
                log("Dropping local ICE candidate: connection closed");
                return;
            }
            match cand.to_json() {
                Ok(init) => {
                    let _ = events.send(SessionEvent::LocalCandidate(candidate_payload(init)));
                }
                Err(e) => log(&format!("Failed to serialize local candidate: {e:?}")),
            }
        })
    }));

    // Удалённые треки складываются в синтетический контейнер,
    // дедупликация по id трека
    let on_track_remote = remote_stream.clone();
    pc.on_track(Box::new(move |track, _receiver, _transceiver| {
        let remote = on_track_remote.clone();
        Box::pin(async move {
            let kind = track.kind();
            if remote.add_track(track) {
                log(&format!("Added remote {kind} track to remote stream"));
            } else {
                log(&format!("Duplicate remote {kind} track ignored"));
            }
        })
    }));

    // Политика восстановления живёт в контроллере: здесь только
    // логируем и пробрасываем событие
    let state_events = events;
    pc.on_peer_connection_state_change(Box::new(move |st| {
        log(&format!("Peer connection state changed to: {st:?}"));
        let _ = state_events.send(SessionEvent::ConnectionState(st));
        Box::pin(async {})
    }));

    pc.on_signaling_state_change(Box::new(move |st| {
        log(&format!("Signaling state changed to: {st:?}"));
        Box::pin(async {})
    }));

    // Перевешиваем текущие локальные треки, если поток активен
    if let Some(stream) = local_stream {
        if stream.is_active() {
            for track in stream.tracks() {
                pc.add_track(track.clone()).await?;
            }
            log(&format!(
                "Attached {} local track(s) to peer connection",
                stream.tracks().len()
            ));
        }
    }

    Ok(pc)
}

/// Снимает все четыре обработчика перед закрытием, чтобы поздние колбэки
/// не наблюдали закрывающееся соединение.
pub fn detach_handlers(pc: &RTCPeerConnection) {
    pc.on_ice_candidate(Box::new(|_| Box::pin(async {})));
    pc.on_track(Box::new(|_, _, _| Box::pin(async {})));
    pc.on_peer_connection_state_change(Box::new(|_| Box::pin(async {})));
    pc.on_signaling_state_change(Box::new(|_| Box::pin(async {})));
}

/// Создает конфигурацию для peer connection
fn rtc_config(servers: &[ServerConfig]) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: map_ice_servers(servers),
        ice_candidate_pool_size: 10,
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

fn map_ice_servers(servers: &[ServerConfig]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|config| RTCIceServer {
            urls: vec![add_ice_url_scheme(config)],
            username: config.username.clone().unwrap_or_default(),
            credential: config.credential.clone().unwrap_or_default(),
        })
        .collect()
}
