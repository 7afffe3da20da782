//! End-to-end scenarios: the service driven over an in-memory bus.
//!
//! Uses MockLoader, whose decoders fire on loud audio, so a burst of
//! high-amplitude samples stands in for someone saying the keyphrase.

use hermes_wake::audio::{encode_wav, samples_to_pcm};
use hermes_wake::config::{Config, WakewordConfig};
use hermes_wake::decoder::MockLoader;
use hermes_wake::hermes::topics;
use hermes_wake::transport::{MemoryBus, MemoryTransport};
use hermes_wake::{Result, WakeService};
use serde_json::Value;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

const TIMEOUT: Duration = Duration::from_secs(5);

/// 0.1 s of loud audio, published in two 1600-byte chunks.
fn utterance() -> [Vec<u8>; 2] {
    let chunk = samples_to_pcm(&[20_000i16; 800]);
    [chunk.clone(), chunk]
}

fn silence(bytes: usize) -> Vec<u8> {
    vec![0u8; bytes]
}

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

/// A running service plus the handles needed to drive and stop it.
struct Harness {
    bus: MemoryBus,
    stop: oneshot::Sender<()>,
    task: JoinHandle<Result<()>>,
    sync_site: String,
    syncs: usize,
}

impl Harness {
    async fn start(config: Config, loader: Arc<MockLoader>) -> Self {
        let sync_site = config
            .site_ids
            .first()
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        let service = WakeService::new(config, loader).unwrap();
        let (mut transport, bus) = MemoryTransport::new();
        let (stop, stop_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            service
                .run(&mut transport, async {
                    stop_rx.await.ok();
                })
                .await
        });

        bus.connect();
        assert!(bus.wait_until(TIMEOUT, |b| b.subscribe_calls() == 1).await);
        Self {
            bus,
            stop,
            task,
            sync_site,
            syncs: 0,
        }
    }

    fn audio(&self, site: &str, payload: Vec<u8>) {
        self.bus.inject(&topics::audio_frame(site), payload);
    }

    fn say_keyphrase(&self, site: &str) {
        for chunk in utterance() {
            self.audio(site, chunk);
        }
    }

    /// Waits until every message injected so far has been handled.
    ///
    /// Messages are processed in order, so once the answer to a fresh
    /// getHotwords request is out, everything before it has been seen.
    async fn sync(&mut self) {
        self.syncs += 1;
        let id = format!("sync-{}", self.syncs);
        let request = serde_json::json!({ "siteId": self.sync_site, "id": id });
        self.bus.inject(topics::GET_HOTWORDS, request.to_string());
        assert!(
            self.bus.wait_until(TIMEOUT, |b| answered(b, &id)).await,
            "service did not answer {}",
            id
        );
    }

    /// Stops the service and returns everything it published, minus the
    /// sync replies.
    async fn finish(mut self) -> Vec<(String, Value)> {
        self.sync().await;
        self.stop.send(()).ok();
        self.task.await.unwrap().unwrap();
        self.bus
            .published()
            .into_iter()
            .filter(|(topic, _)| topic != topics::HOTWORDS)
            .map(|(topic, payload)| (topic, serde_json::from_slice(&payload).unwrap()))
            .collect()
    }
}

fn answered(bus: &MemoryBus, id: &str) -> bool {
    bus.published().iter().any(|(topic, payload)| {
        topic == topics::HOTWORDS
            && serde_json::from_slice::<Value>(payload).is_ok_and(|reply| reply["id"] == id)
    })
}

fn detections(published: &[(String, Value)]) -> Vec<&Value> {
    published
        .iter()
        .filter(|(topic, _)| *topic == topics::detected("default"))
        .map(|(_, payload)| payload)
        .collect()
}

fn assert_single_detection(published: &[(String, Value)], site: &str) {
    let seen: Vec<&str> = published.iter().map(|(t, _)| t.as_str()).collect();
    assert_eq!(
        seen,
        vec![topics::detected("default").as_str(), topics::START_LISTENING],
        "unexpected publishes: {:?}",
        published
    );

    let detected = &published[0].1;
    let listen = &published[1].1;
    assert_eq!(detected["siteId"], site);
    assert_eq!(detected["modelId"], "ok computer");
    assert_eq!(detected["modelType"], "personal");
    assert_eq!(listen["siteId"], site);
    assert_eq!(listen["stopOnSilence"], true);
    assert!(detected["sessionId"].is_string());
    assert_eq!(detected["sessionId"], listen["sessionId"]);
}

#[tokio::test]
async fn keyphrase_produces_one_detection_then_start_listening() {
    let harness = Harness::start(config(&["alice"]), Arc::new(MockLoader::new())).await;
    harness.say_keyphrase("alice");
    let published = harness.finish().await;
    assert_single_detection(&published, "alice");
}

#[tokio::test]
async fn keyphrase_detected_once_with_small_frames() {
    // Each chunk becomes a frame of its own, both loud
    let mut config = config(&["alice"]);
    config.audio.frame_size = 1600;

    let harness = Harness::start(config, Arc::new(MockLoader::new())).await;
    harness.say_keyphrase("alice");
    let published = harness.finish().await;
    assert_single_detection(&published, "alice");
}

#[tokio::test]
async fn silence_between_utterances_rearms_detection() {
    let mut harness = Harness::start(config(&[]), Arc::new(MockLoader::new())).await;
    harness.say_keyphrase("alice");
    harness.audio("alice", silence(4096));
    harness.sync().await;
    harness.say_keyphrase("alice");
    let published = harness.finish().await;
    assert_eq!(detections(&published).len(), 2);
}

#[tokio::test]
async fn toggle_off_suppresses_and_toggle_on_restores() {
    let mut harness = Harness::start(config(&["alice"]), Arc::new(MockLoader::new())).await;

    harness.bus.inject(
        topics::TOGGLE_OFF,
        r#"{"siteId":"alice","reason":"dialogueSession"}"#,
    );
    harness.say_keyphrase("alice");
    harness.sync().await;
    assert!(!harness.bus.published_topics().contains(&topics::detected("default")));

    harness.bus.inject(
        topics::TOGGLE_ON,
        r#"{"siteId":"alice","reason":"dialogueSession"}"#,
    );
    harness.say_keyphrase("alice");
    let published = harness.finish().await;
    assert_single_detection(&published, "alice");
}

#[tokio::test]
async fn every_reason_must_be_cleared_before_detection_resumes() {
    let mut harness = Harness::start(config(&["alice"]), Arc::new(MockLoader::new())).await;

    harness
        .bus
        .inject(topics::TOGGLE_OFF, r#"{"siteId":"alice","reason":"dialogueSession"}"#);
    harness
        .bus
        .inject(topics::TOGGLE_OFF, r#"{"siteId":"alice","reason":"playAudio"}"#);
    harness
        .bus
        .inject(topics::TOGGLE_ON, r#"{"siteId":"alice","reason":"playAudio"}"#);
    harness.say_keyphrase("alice");
    harness.sync().await;
    assert!(!harness.bus.published_topics().contains(&topics::detected("default")));

    harness
        .bus
        .inject(topics::TOGGLE_ON, r#"{"siteId":"alice","reason":"dialogueSession"}"#);
    harness.say_keyphrase("alice");
    let published = harness.finish().await;
    assert_eq!(detections(&published).len(), 1);
}

#[tokio::test]
async fn reconnect_mid_utterance_keeps_partial_frame() {
    let mut harness = Harness::start(config(&["alice"]), Arc::new(MockLoader::new())).await;
    let [first, second] = utterance();

    harness.audio("alice", first);
    harness.sync().await;
    assert!(!harness.bus.published_topics().contains(&topics::detected("default")));

    harness.bus.disconnect("broker restarted");
    harness.bus.connect();
    assert!(
        harness
            .bus
            .wait_until(TIMEOUT, |b| b.subscribe_calls() == 2)
            .await
    );
    assert!(harness.bus.subscriptions().contains(&topics::audio_frame("alice")));

    harness.audio("alice", second);
    let published = harness.finish().await;
    assert_single_detection(&published, "alice");
}

#[tokio::test]
async fn failed_reload_reports_error_and_keeps_listening() {
    let loader = Arc::new(MockLoader::new());
    let mut harness = Harness::start(config(&["alice", "bob"]), loader.clone()).await;

    // Start a decoder on both sites
    harness.audio("alice", silence(2048));
    harness.audio("bob", silence(2048));
    harness.sync().await;
    // Bob loads on his worker thread
    assert!(harness.bus.wait_until(TIMEOUT, |_| loader.loads() == 2).await);

    loader.set_failing("default", true);
    harness
        .bus
        .inject(topics::RELOAD, r#"{"wakewordId":"default","siteId":"alice"}"#);
    assert!(
        harness
            .bus
            .wait_until(TIMEOUT, |b| b
                .published_topics()
                .contains(&topics::HOTWORD_ERROR.to_string()))
            .await
    );

    harness.say_keyphrase("alice");
    harness.say_keyphrase("bob");
    let published = harness.finish().await;

    let errors: Vec<&Value> = published
        .iter()
        .filter(|(topic, _)| topic == topics::HOTWORD_ERROR)
        .map(|(_, payload)| payload)
        .collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0]["siteId"], "alice");
    assert_eq!(errors[0]["context"], "reload: alice/default");

    let mut sites: Vec<&str> = detections(&published)
        .iter()
        .filter_map(|d| d["siteId"].as_str())
        .collect();
    sites.sort_unstable();
    assert_eq!(sites, vec!["alice", "bob"]);
}

#[tokio::test]
async fn reload_only_touches_the_named_site() {
    let loader = Arc::new(MockLoader::new());
    let mut harness = Harness::start(config(&["alice", "bob"]), loader.clone()).await;

    harness.audio("alice", silence(2048));
    harness.audio("bob", silence(2048));
    harness.sync().await;
    harness
        .bus
        .inject(topics::RELOAD, r#"{"wakewordId":"default","siteId":"bob"}"#);
    let published = harness.finish().await;

    assert!(published.is_empty(), "unexpected publishes: {:?}", published);
    // Preload for alice, a load for bob, then bob's reload
    assert_eq!(loader.loads(), 3);
}

#[tokio::test]
async fn wav_payloads_are_decoded() {
    let harness = Harness::start(config(&["alice"]), Arc::new(MockLoader::new())).await;
    let wav = encode_wav(&[20_000i16; 1600], 16_000).unwrap();
    harness.audio("alice", wav);
    let published = harness.finish().await;
    assert_single_detection(&published, "alice");
}

#[tokio::test]
async fn get_hotwords_lists_configured_keyphrases() {
    let harness = Harness::start(config(&["alice"]), Arc::new(MockLoader::new())).await;
    harness
        .bus
        .inject(topics::GET_HOTWORDS, r#"{"siteId":"alice","id":"req-1"}"#);
    assert!(harness.bus.wait_for_published(1, TIMEOUT).await);

    let (topic, payload) = harness.bus.published().remove(0);
    assert_eq!(topic, topics::HOTWORDS);
    let reply: Value = serde_json::from_slice(&payload).unwrap();
    assert_eq!(reply["siteId"], "alice");
    assert_eq!(reply["id"], "req-1");
    assert_eq!(reply["models"][0]["modelId"], "ok computer");
    assert_eq!(reply["models"][0]["words"], "ok computer");

    harness.finish().await;
}

#[tokio::test]
async fn audio_from_other_sites_is_ignored() {
    let harness = Harness::start(config(&["alice"]), Arc::new(MockLoader::new())).await;
    assert!(!harness.bus.subscriptions().contains(&topics::AUDIO_FRAME_WILDCARD.to_string()));

    harness.say_keyphrase("bob");
    let published = harness.finish().await;
    assert!(published.is_empty(), "unexpected publishes: {:?}", published);
}

#[tokio::test]
async fn service_runs_from_config_file() {
    let mut file = NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
            site_ids = ["kitchen"]

            [audio]
            frame_size = 1600

            [[wakeword]]
            keyphrase = "ok computer"
            acoustic_model = "/models/en-us"
            dictionary = "/models/en-us.dict"
        "#
    )
    .unwrap();
    file.flush().unwrap();

    let config = Config::load(file.path()).unwrap();
    let harness = Harness::start(config, Arc::new(MockLoader::new())).await;
    assert!(harness.bus.subscriptions().contains(&topics::audio_frame("kitchen")));

    harness.say_keyphrase("kitchen");
    let published = harness.finish().await;
    assert_single_detection(&published, "kitchen");
}
