//! The wake word service: protocol state machine and main loop.

use crate::audio::{FrameBuffer, decode_payload, pcm_to_samples};
use crate::config::{Config, DisabledAudioPolicy, WakewordConfig};
use crate::decoder::{DecoderKey, DecoderLoader, DecoderManager, DecoderOutput, DetectionEvent};
use crate::defaults;
use crate::error::{Result, WakeError};
use crate::hermes::{
    AsrStartListening, GetHotwords, HotwordDetected, HotwordError, HotwordModel, HotwordToggle,
    Hotwords, InboundMessage, OutboundMessage, ReloadRequest,
};
use crate::router::{Route, SiteRouter};
use crate::transport::{MqttTransport, Transport, TransportEvent};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Service state: routing table, frame buffers and decoder workers.
pub struct WakeService {
    config: Config,
    router: SiteRouter,
    buffer: FrameBuffer,
    decoders: DecoderManager,
    outputs: UnboundedReceiver<DecoderOutput>,
    pending: VecDeque<OutboundMessage>,
    connected: bool,
}

impl WakeService {
    /// Validates the configuration and preloads one decoder per wakeword.
    ///
    /// Fails with [`WakeError::NoDecodersLoaded`] if none of them load.
    pub fn new(config: Config, loader: Arc<dyn DecoderLoader>) -> Result<Self> {
        config.validate()?;

        let wakewords: Vec<Arc<WakewordConfig>> =
            config.wakewords.iter().cloned().map(Arc::new).collect();
        let (mut decoders, outputs) = DecoderManager::new(loader, config.audio.queue_capacity);

        let mut loaded = 0;
        for wakeword in &wakewords {
            match decoders.preload(wakeword) {
                Ok(()) => {
                    info!(wakeword = %wakeword.wakeword_id, keyphrase = %wakeword.keyword, "Decoder loaded");
                    loaded += 1;
                }
                Err(e) => warn!(wakeword = %wakeword.wakeword_id, error = %e, "Decoder failed to load"),
            }
        }
        if loaded == 0 {
            return Err(WakeError::NoDecodersLoaded);
        }

        let router = SiteRouter::new(config.site_ids.clone(), wakewords);
        let buffer = FrameBuffer::new(config.audio.frame_size)
            .with_max_chunk_bytes(config.audio.max_chunk_bytes);

        Ok(Self {
            config,
            router,
            buffer,
            decoders,
            outputs,
            pending: VecDeque::new(),
            connected: false,
        })
    }

    pub fn router(&self) -> &SiteRouter {
        &self.router
    }

    pub fn decoders(&self) -> &DecoderManager {
        &self.decoders
    }

    /// Bytes of partial frame held for a site.
    pub fn pending_audio(&self, site_id: &str) -> usize {
        self.buffer.pending_len(site_id)
    }

    /// Applies one inbound message and returns what to publish right away.
    ///
    /// Detections are not returned here; they arrive later from the decoder
    /// workers and go through [`outbound_for`](Self::outbound_for).
    pub fn handle_message(&mut self, message: InboundMessage) -> Vec<OutboundMessage> {
        let Some(route) = self.router.route(&message) else {
            debug!(site = ?message.site_id(), "Ignoring message for another site or wakeword");
            return Vec::new();
        };

        match message {
            InboundMessage::AudioFrame { site_id, payload } => {
                self.handle_audio(&site_id, &payload, &route);
                Vec::new()
            }
            InboundMessage::ToggleOff(toggle) => {
                self.handle_toggle_off(&toggle);
                Vec::new()
            }
            InboundMessage::ToggleOn(toggle) => {
                self.handle_toggle_on(&toggle);
                Vec::new()
            }
            InboundMessage::Reload(request) => {
                self.handle_reload(&request, &route);
                Vec::new()
            }
            InboundMessage::GetHotwords(request) => vec![hotwords_for(&request, &route)],
        }
    }

    fn handle_audio(&mut self, site_id: &str, payload: &[u8], route: &Route) {
        let pcm = match decode_payload(payload, self.config.audio.sample_rate) {
            Ok(pcm) => pcm,
            Err(e) => {
                warn!(site = %site_id, error = %e, "Dropping audio frame");
                return;
            }
        };

        let frames = match self.buffer.push(site_id, &pcm) {
            Ok(frames) => frames,
            Err(e) => {
                warn!(site = %site_id, error = %e, "Dropping audio chunk");
                return;
            }
        };

        if !route.enabled {
            if !frames.is_empty() {
                debug!(site = %site_id, frames = frames.len(), "Detection disabled, discarding frames");
            }
            return;
        }

        let keys: Vec<DecoderKey> = route
            .wakewords
            .iter()
            .filter_map(|wakeword| match self.decoders.get_or_create(site_id, wakeword) {
                Ok(key) => Some(key),
                Err(e) => {
                    warn!(site = %site_id, wakeword = %wakeword.wakeword_id, error = %e, "No decoder");
                    None
                }
            })
            .collect();

        for frame in frames {
            let samples: Arc<[i16]> = pcm_to_samples(&frame).into();
            for key in &keys {
                self.decoders.process(key, Arc::clone(&samples), route.epoch);
            }
        }
    }

    fn handle_toggle_off(&mut self, toggle: &HotwordToggle) {
        for site_id in self.router.toggle_off(toggle) {
            info!(site = %site_id, reason = ?toggle.reason, "Detection disabled");
            if self.config.audio.on_disable == DisabledAudioPolicy::ResetBuffer {
                let dropped = self.buffer.discard(&site_id);
                debug!(site = %site_id, bytes = dropped, "Partial frame discarded");
            }
        }
    }

    fn handle_toggle_on(&mut self, toggle: &HotwordToggle) {
        for site_id in self.router.toggle_on(toggle) {
            info!(site = %site_id, reason = ?toggle.reason, "Detection enabled");
            // Audio heard before the toggle-off must not finish a detection
            for key in self.site_keys(&site_id) {
                self.decoders.reset(&key);
            }
        }
    }

    fn handle_reload(&mut self, request: &ReloadRequest, route: &Route) {
        let mut reloaded = 0;
        for wakeword in &route.wakewords {
            self.decoders.forget_preloaded(&wakeword.wakeword_id);
            let keys: Vec<DecoderKey> = self
                .decoders
                .keys()
                .filter(|key| key.wakeword_id == wakeword.wakeword_id)
                .filter(|key| request.site_id.as_deref().is_none_or(|s| key.site_id == s))
                .cloned()
                .collect();
            for key in keys {
                if self.decoders.reload(&key) {
                    reloaded += 1;
                }
            }
        }
        info!(pairs = reloaded, wakeword = ?request.wakeword_id, site = ?request.site_id, "Reload requested");
    }

    fn site_keys(&self, site_id: &str) -> Vec<DecoderKey> {
        self.decoders
            .keys()
            .filter(|key| key.site_id == site_id)
            .cloned()
            .collect()
    }

    /// Turns a decoder worker output into bus messages.
    ///
    /// A detection becomes `detected` followed by `startListening`, unless
    /// the site was disabled while the frame was in flight.
    pub fn outbound_for(&self, output: DecoderOutput) -> Vec<OutboundMessage> {
        match output {
            DecoderOutput::Detected(event) => self.detection_messages(event),
            DecoderOutput::Failed {
                key,
                error,
                context,
            } => vec![OutboundMessage::Error(HotwordError {
                error,
                context: Some(format!("{}: {}", context, key)),
                site_id: key.site_id,
            })],
        }
    }

    fn detection_messages(&self, event: DetectionEvent) -> Vec<OutboundMessage> {
        if !self.router.is_enabled(&event.site_id) {
            debug!(site = %event.site_id, "Suppressing detection for disabled site");
            return Vec::new();
        }
        if event.epoch < self.router.epoch(&event.site_id) {
            debug!(site = %event.site_id, "Dropping detection from audio heard before toggle-off");
            return Vec::new();
        }
        let Some(wakeword) = self
            .router
            .wakewords()
            .iter()
            .find(|w| w.wakeword_id == event.wakeword_id)
        else {
            return Vec::new();
        };

        let session_id = Uuid::new_v4().to_string();
        info!(
            site = %event.site_id,
            wakeword = %event.wakeword_id,
            confidence = ?event.confidence,
            "Wakeword detected"
        );

        vec![
            OutboundMessage::Detected(HotwordDetected {
                site_id: event.site_id.clone(),
                wakeword_id: event.wakeword_id.clone(),
                model_id: wakeword.keyword.clone(),
                model_version: String::new(),
                model_type: defaults::MODEL_TYPE.to_string(),
                current_sensitivity: wakeword.threshold,
                session_id: Some(session_id.clone()),
                send_audio_captured: None,
            }),
            OutboundMessage::StartListening(AsrStartListening {
                site_id: event.site_id,
                session_id: Some(session_id),
                wakeword_id: Some(event.wakeword_id),
                stop_on_silence: true,
                send_audio_captured: true,
            }),
        ]
    }

    /// Reacts to one transport event.
    pub async fn handle_event<T: Transport + ?Sized>(&mut self, transport: &mut T, event: TransportEvent) {
        match event {
            TransportEvent::Connected => {
                self.connected = true;
                let topics = self.router.subscriptions();
                match transport.subscribe(&topics).await {
                    Ok(()) => info!(topics = topics.len(), "Connected, subscribed"),
                    Err(e) => warn!(error = %e, "Subscribe failed"),
                }
                self.flush_pending(transport).await;
            }
            TransportEvent::Disconnected { reason } => {
                self.connected = false;
                warn!(%reason, "Disconnected from message bus");
            }
            TransportEvent::Message { topic, payload } => {
                match InboundMessage::parse(&topic, &payload) {
                    Ok(Some(message)) => {
                        for outbound in self.handle_message(message) {
                            self.publish(transport, outbound).await;
                        }
                    }
                    Ok(None) => debug!(%topic, "Unhandled topic"),
                    Err(e) => warn!(error = %e, "Ignoring message"),
                }
            }
        }
    }

    /// Runs until `shutdown` resolves or the transport closes.
    ///
    /// On the way out every decoder worker finishes its queue and the
    /// resulting events are still published.
    pub async fn run<T, F>(mut self, transport: &mut T, shutdown: F) -> Result<()>
    where
        T: Transport + ?Sized,
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutting down");
                    break;
                }
                event = transport.next_event() => match event {
                    Some(event) => self.handle_event(transport, event).await,
                    None => {
                        info!("Message bus closed");
                        break;
                    }
                },
                Some(output) = self.outputs.recv() => {
                    for message in self.outbound_for(output) {
                        self.publish(transport, message).await;
                    }
                }
            }
        }

        let workers = self.decoders.close();
        if let Err(e) = tokio::task::spawn_blocking(move || workers.wait()).await {
            warn!(error = %e, "Decoder workers did not shut down cleanly");
        }
        while let Ok(output) = self.outputs.try_recv() {
            for message in self.outbound_for(output) {
                self.publish(transport, message).await;
            }
        }
        if !self.pending.is_empty() {
            warn!(messages = self.pending.len(), "Dropping unpublished messages");
        }
        transport.close().await
    }

    async fn publish<T: Transport + ?Sized>(&mut self, transport: &mut T, message: OutboundMessage) {
        // Keep order: nothing overtakes messages already waiting
        if self.connected && self.pending.is_empty() && send(transport, &message).await {
            return;
        }
        self.queue(message);
    }

    async fn flush_pending<T: Transport + ?Sized>(&mut self, transport: &mut T) {
        while let Some(message) = self.pending.pop_front() {
            if !send(transport, &message).await {
                self.pending.push_front(message);
                break;
            }
        }
    }

    fn queue(&mut self, message: OutboundMessage) {
        if self.pending.len() >= defaults::PENDING_PUBLISH_CAPACITY
            && let Some(dropped) = self.pending.pop_front()
        {
            warn!(topic = %dropped.topic(), "Publish backlog full, dropping oldest message");
        }
        self.pending.push_back(message);
    }
}

/// Publishes one message. Returns false if it should be retried.
async fn send<T: Transport + ?Sized>(transport: &mut T, message: &OutboundMessage) -> bool {
    let topic = message.topic();
    let payload = match message.payload() {
        Ok(payload) => payload,
        Err(e) => {
            warn!(%topic, error = %e, "Cannot serialize message");
            return true;
        }
    };
    match transport.publish(&topic, payload).await {
        Ok(()) => {
            debug!(%topic, site = %message.site_id(), "Published");
            true
        }
        Err(e) => {
            warn!(%topic, error = %e, "Publish failed, will retry");
            false
        }
    }
}

fn hotwords_for(request: &GetHotwords, route: &Route) -> OutboundMessage {
    OutboundMessage::Hotwords(Hotwords {
        models: route
            .wakewords
            .iter()
            .map(|w| HotwordModel {
                model_id: w.keyword.clone(),
                words: w.keyword.clone(),
                model_version: String::new(),
                model_type: defaults::MODEL_TYPE.to_string(),
            })
            .collect(),
        id: request.id.clone(),
        site_id: request.site_id.clone(),
    })
}

/// Connect to the broker and serve until SIGINT or SIGTERM.
pub async fn run_service(config: Config, loader: Arc<dyn DecoderLoader>) -> Result<()> {
    let mut transport = MqttTransport::new(&config);
    let service = WakeService::new(config, loader)?;
    info!("Service ready");
    service.run(&mut transport, shutdown_signal()).await
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received SIGINT, shutting down...");
        }
        _ = wait_for_sigterm() => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}

/// Wait for SIGTERM signal (used by systemd).
#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{SignalKind, signal};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            warn!("Failed to register SIGTERM handler: {}", e);
            std::future::pending::<()>().await
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    // On non-Unix, just wait forever (Ctrl+C will still work)
    std::future::pending::<()>().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::samples_to_pcm;
    use crate::decoder::MockLoader;
    use crate::hermes::topics;
    use crate::transport::MemoryTransport;
    use std::path::PathBuf;
    use std::time::Duration;

    fn config(sites: &[&str]) -> Config {
        Config {
            site_ids: sites.iter().map(|s| s.to_string()).collect(),
            wakewords: vec![WakewordConfig::new(
                "ok computer",
                PathBuf::from("/models/en-us"),
                PathBuf::from("/models/en-us.dict"),
            )],
            ..Config::default()
        }
    }

    fn service(sites: &[&str]) -> WakeService {
        WakeService::new(config(sites), Arc::new(MockLoader::new())).unwrap()
    }

    fn loud(bytes: usize) -> Vec<u8> {
        samples_to_pcm(&vec![20_000i16; bytes / 2])
    }

    fn audio(site: &str, payload: Vec<u8>) -> InboundMessage {
        InboundMessage::AudioFrame {
            site_id: site.to_string(),
            payload,
        }
    }

    fn toggle_off(site: &str) -> InboundMessage {
        InboundMessage::ToggleOff(HotwordToggle {
            site_id: Some(site.to_string()),
            ..HotwordToggle::default()
        })
    }

    fn toggle_on(site: &str) -> InboundMessage {
        InboundMessage::ToggleOn(HotwordToggle {
            site_id: Some(site.to_string()),
            ..HotwordToggle::default()
        })
    }

    #[test]
    fn test_new_fails_without_any_decoder() {
        let loader = Arc::new(MockLoader::new().failing_for("default"));
        match WakeService::new(config(&[]), loader) {
            Err(WakeError::NoDecodersLoaded) => {}
            Err(e) => panic!("Expected NoDecodersLoaded, got {}", e),
            Ok(_) => panic!("Expected NoDecodersLoaded"),
        }
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let result = WakeService::new(Config::default(), Arc::new(MockLoader::new()));
        assert!(matches!(result, Err(WakeError::ConfigInvalidValue { .. })));
    }

    #[test]
    fn test_audio_for_foreign_site_creates_nothing() {
        let mut service = service(&["alice"]);
        assert!(service.handle_message(audio("bob", loud(4096))).is_empty());
        assert!(service.decoders().is_empty());
        assert_eq!(service.pending_audio("bob"), 0);
    }

    #[test]
    fn test_audio_creates_decoder_and_keeps_remainder() {
        let mut service = service(&["alice"]);
        service.handle_message(audio("alice", loud(3000)));
        assert!(service.decoders().contains(&DecoderKey::new("alice", "default")));
        assert_eq!(service.pending_audio("alice"), 3000 - defaults::FRAME_SIZE_BYTES);
    }

    #[test]
    fn test_disabled_site_buffers_without_decoding() {
        let mut service = service(&[]);
        service.handle_message(toggle_off("alice"));
        service.handle_message(audio("alice", loud(3000)));
        assert!(service.decoders().is_empty());
        assert_eq!(service.pending_audio("alice"), 3000 - defaults::FRAME_SIZE_BYTES);
    }

    #[test]
    fn test_reset_buffer_policy_drops_partial_frame_on_toggle_off() {
        let mut config = config(&[]);
        config.audio.on_disable = DisabledAudioPolicy::ResetBuffer;
        let mut service = WakeService::new(config, Arc::new(MockLoader::new())).unwrap();

        service.handle_message(audio("alice", vec![0u8; 100]));
        assert_eq!(service.pending_audio("alice"), 100);
        service.handle_message(toggle_off("alice"));
        assert_eq!(service.pending_audio("alice"), 0);
    }

    #[test]
    fn test_detection_is_suppressed_after_toggle_off() {
        let mut service = service(&[]);
        service.handle_message(toggle_off("alice"));
        let event = DetectionEvent {
            site_id: "alice".to_string(),
            wakeword_id: "default".to_string(),
            timestamp: std::time::SystemTime::now(),
            confidence: None,
            epoch: 1,
        };
        assert!(service.outbound_for(DecoderOutput::Detected(event)).is_empty());
    }

    #[test]
    fn test_detection_becomes_detected_then_start_listening() {
        let service = service(&[]);
        let event = DetectionEvent {
            site_id: "alice".to_string(),
            wakeword_id: "default".to_string(),
            timestamp: std::time::SystemTime::now(),
            confidence: Some(0.9),
            epoch: 0,
        };
        let messages = service.outbound_for(DecoderOutput::Detected(event));
        assert_eq!(messages.len(), 2);
        match (&messages[0], &messages[1]) {
            (OutboundMessage::Detected(detected), OutboundMessage::StartListening(listen)) => {
                assert_eq!(detected.model_id, "ok computer");
                assert_eq!(detected.current_sensitivity, 1e-40);
                assert_eq!(detected.session_id, listen.session_id);
                assert_eq!(listen.wakeword_id.as_deref(), Some("default"));
            }
            other => panic!("Unexpected messages {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_audio_heard_before_quick_off_on_does_not_detect() {
        let mut service = service(&[]);
        service.handle_message(audio("alice", loud(2048)));
        service.handle_message(toggle_off("alice"));
        service.handle_message(toggle_on("alice"));

        let output = tokio::time::timeout(Duration::from_secs(5), service.outputs.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(output, DecoderOutput::Detected(DetectionEvent { epoch: 0, .. })));
        assert!(service.outbound_for(output).is_empty());

        service.handle_message(audio("alice", loud(2048)));
        let output = tokio::time::timeout(Duration::from_secs(5), service.outputs.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(service.outbound_for(output).len(), 2);
    }

    #[test]
    fn test_failure_becomes_error_message() {
        let service = service(&[]);
        let messages = service.outbound_for(DecoderOutput::Failed {
            key: DecoderKey::new("alice", "default"),
            error: "model missing".to_string(),
            context: "reload".to_string(),
        });
        match &messages[..] {
            [OutboundMessage::Error(error)] => {
                assert_eq!(error.site_id, "alice");
                assert_eq!(error.context.as_deref(), Some("reload: alice/default"));
            }
            other => panic!("Unexpected messages {:?}", other),
        }
    }

    #[test]
    fn test_get_hotwords_lists_keyphrases() {
        let mut service = service(&[]);
        let messages = service.handle_message(InboundMessage::GetHotwords(GetHotwords {
            site_id: "alice".to_string(),
            id: Some("req".to_string()),
        }));
        match &messages[..] {
            [OutboundMessage::Hotwords(hotwords)] => {
                assert_eq!(hotwords.site_id, "alice");
                assert_eq!(hotwords.id.as_deref(), Some("req"));
                assert_eq!(hotwords.models[0].model_id, "ok computer");
                assert_eq!(hotwords.models[0].words, "ok computer");
            }
            other => panic!("Unexpected messages {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_run_subscribes_on_connect_and_stops_on_shutdown() {
        let (mut transport, bus) = MemoryTransport::new();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let service = service(&["alice"]);

        let task = tokio::spawn(async move {
            service
                .run(&mut transport, async {
                    stop_rx.await.ok();
                })
                .await
        });

        bus.connect();
        assert!(bus.wait_until(Duration::from_secs(5), |b| b.subscribe_calls() == 1).await);
        assert!(bus.subscriptions().contains(&topics::audio_frame("alice")));

        stop_tx.send(()).ok();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_messages_published_while_disconnected_are_sent_after_reconnect() {
        let (mut transport, bus) = MemoryTransport::new();
        let mut service = service(&[]);

        service
            .handle_event(
                &mut transport,
                TransportEvent::Message {
                    topic: topics::GET_HOTWORDS.to_string(),
                    payload: br#"{"siteId":"alice"}"#.to_vec(),
                },
            )
            .await;
        assert!(bus.published().is_empty());

        bus.connect();
        let event = transport.next_event().await.unwrap();
        service.handle_event(&mut transport, event).await;
        assert_eq!(bus.published_topics(), vec![topics::HOTWORDS.to_string()]);
    }
}
