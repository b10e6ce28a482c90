use super::device::AppleTv;
use super::relayer::{DEFAULT_PRIORITY, POWER_PRIORITY, Relayer};
use super::stacks::SetupData;
use crate::error::{AtvError, Result};
use crate::interface::{
    Artwork, Audio, FeatureName, FeatureSet, FeatureState, Metadata, Power, RemoteControl,
};
use crate::state::StateProducer;
use crate::types::{DeviceConfiguration, PlayingState, Protocol};
use async_trait::async_trait;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct CallLog {
    calls: Mutex<Vec<String>>,
}

impl CallLog {
    fn record(&self, call: &str) {
        self.calls.lock().unwrap().push(call.to_string());
    }
    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

struct FakeStack {
    name: &'static str,
    log: Arc<CallLog>,
    artwork_fetches: AtomicU32,
}

impl FakeStack {
    fn new(name: &'static str, log: Arc<CallLog>) -> Arc<Self> {
        Arc::new(Self {
            name,
            log,
            artwork_fetches: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl RemoteControl for FakeStack {
    async fn play(&self) -> Result<()> {
        self.log.record(&format!("{}:play", self.name));
        Ok(())
    }
}

#[async_trait]
impl Power for FakeStack {
    async fn turn_on(&self) -> Result<()> {
        self.log.record(&format!("{}:turn_on", self.name));
        Ok(())
    }
}

#[async_trait]
impl Audio for FakeStack {
    async fn set_volume(&self, level: f32) -> Result<()> {
        self.log.record(&format!("{}:set_volume:{level}", self.name));
        Ok(())
    }
}

#[async_trait]
impl Metadata for FakeStack {
    async fn playing(&self) -> Result<PlayingState> {
        Ok(PlayingState {
            title: Some("title".to_string()),
            ..PlayingState::default()
        })
    }
    async fn artwork(&self, width: Option<u32>, height: Option<u32>) -> Result<Artwork> {
        self.artwork_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(Artwork {
            bytes: vec![1, 2, 3],
            mimetype: "image/jpeg".to_string(),
            width,
            height,
        })
    }
}

fn setup(
    protocol: Protocol,
    stack: &Arc<FakeStack>,
    features: &[FeatureName],
) -> SetupData {
    SetupData {
        protocol,
        features: features.iter().copied().collect::<FeatureSet>(),
        remote_control: Some(stack.clone()),
        metadata: Some(stack.clone()),
        power: Some(stack.clone()),
        audio: Some(stack.clone()),
        apps: None,
        keyboard: None,
        stream: None,
        push_updater: None,
        close: Box::new(Vec::new),
    }
}

fn config() -> DeviceConfiguration {
    DeviceConfiguration::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), "Facade test")
}

fn device_with_mrp_and_companion(log: &Arc<CallLog>) -> (AppleTv, Arc<FakeStack>, Arc<FakeStack>) {
    let mrp = FakeStack::new("mrp", log.clone());
    let companion = FakeStack::new("companion", log.clone());
    let device = AppleTv::new(
        config(),
        Arc::new(StateProducer::new()),
        vec![
            setup(
                Protocol::Mrp,
                &mrp,
                &[
                    FeatureName::Play,
                    FeatureName::TurnOn,
                    FeatureName::Playing,
                    FeatureName::Artwork,
                    FeatureName::SetVolume,
                ],
            ),
            setup(
                Protocol::Companion,
                &companion,
                &[FeatureName::Play, FeatureName::TurnOn],
            ),
        ],
    );
    (device, mrp, companion)
}

#[tokio::test]
async fn default_priority_prefers_mrp() {
    let log = Arc::new(CallLog::default());
    let (device, _, _) = device_with_mrp_and_companion(&log);

    device.play().await.unwrap();
    assert_eq!(log.calls(), vec!["mrp:play"]);
}

#[tokio::test]
async fn power_priority_prefers_companion() {
    let log = Arc::new(CallLog::default());
    let (device, _, _) = device_with_mrp_and_companion(&log);

    device.turn_on().await.unwrap();
    assert_eq!(log.calls(), vec!["companion:turn_on"]);
}

#[tokio::test]
async fn feature_reports_serving_protocol() {
    let log = Arc::new(CallLog::default());
    let (device, _, _) = device_with_mrp_and_companion(&log);

    let power = device.feature(FeatureName::TurnOn);
    assert_eq!(power.state, FeatureState::Available);
    assert_eq!(power.protocol, Some(Protocol::Companion));

    let play = device.feature(FeatureName::Play);
    assert_eq!(play.state, FeatureState::Available);
    assert_eq!(play.protocol, Some(Protocol::Mrp));

    let missing = device.feature(FeatureName::LaunchApp);
    assert_eq!(missing.state, FeatureState::Unsupported);
    assert_eq!(missing.protocol, None);
}

#[tokio::test]
async fn no_candidate_fails_with_not_supported() {
    let log = Arc::new(CallLog::default());
    let (device, _, _) = device_with_mrp_and_companion(&log);

    assert!(matches!(device.next().await, Err(AtvError::NotSupported)));
    assert!(matches!(
        device.app_list().await,
        Err(AtvError::NotSupported)
    ));
}

#[tokio::test]
async fn volume_validated_at_facade_boundary() {
    let log = Arc::new(CallLog::default());
    let (device, _, _) = device_with_mrp_and_companion(&log);

    assert!(matches!(
        device.set_volume(150.0).await,
        Err(AtvError::InvalidArgument(_))
    ));
    assert!(matches!(
        device.set_volume(-1.0).await,
        Err(AtvError::InvalidArgument(_))
    ));
    assert!(matches!(
        device.set_volume(f32::NAN).await,
        Err(AtvError::InvalidArgument(_))
    ));
    // Validation happens before provider selection
    assert!(log.calls().is_empty());

    device.set_volume(55.0).await.unwrap();
    assert_eq!(log.calls(), vec!["mrp:set_volume:55"]);
}

#[tokio::test]
async fn position_rejects_nan_and_negative() {
    let log = Arc::new(CallLog::default());
    let (device, _, _) = device_with_mrp_and_companion(&log);

    assert!(matches!(
        device.set_position(f64::NAN).await,
        Err(AtvError::InvalidArgument(_))
    ));
    assert!(matches!(
        device.set_position(-3.0).await,
        Err(AtvError::InvalidArgument(_))
    ));
}

#[tokio::test]
async fn artwork_is_cached_per_size() {
    let log = Arc::new(CallLog::default());
    let (device, mrp, _) = device_with_mrp_and_companion(&log);

    let first = device.artwork(Some(512), Some(512)).await.unwrap();
    let second = device.artwork(Some(512), Some(512)).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(mrp.artwork_fetches.load(Ordering::SeqCst), 1);

    // A different size is a different cache entry
    let _ = device.artwork(Some(64), Some(64)).await.unwrap();
    assert_eq!(mrp.artwork_fetches.load(Ordering::SeqCst), 2);
}

#[test]
fn relayer_takeover_and_release() {
    let log = Arc::new(CallLog::default());
    let mrp = FakeStack::new("mrp", log.clone());
    let dmap = FakeStack::new("dmap", log);

    let mut relayer: Relayer<dyn RemoteControl> = Relayer::new(&DEFAULT_PRIORITY);
    let features: FeatureSet = [FeatureName::Play].into();
    relayer.register(Protocol::Mrp, mrp, features.clone());
    relayer.register(Protocol::Dmap, dmap, features);

    assert_eq!(relayer.provider(FeatureName::Play), Some(Protocol::Mrp));

    relayer.take_over(Protocol::Dmap);
    assert_eq!(relayer.provider(FeatureName::Play), Some(Protocol::Dmap));

    relayer.release();
    assert_eq!(relayer.provider(FeatureName::Play), Some(Protocol::Mrp));
}

#[test]
fn takeover_requires_registration() {
    let mut relayer: Relayer<dyn Power> = Relayer::new(&POWER_PRIORITY);
    relayer.take_over(Protocol::Raop);
    assert_eq!(relayer.provider(FeatureName::TurnOn), None);
}

#[test]
fn relayer_ignores_unregistered_candidates() {
    let log = Arc::new(CallLog::default());
    let raop = FakeStack::new("raop", log);

    let mut relayer: Relayer<dyn RemoteControl> = Relayer::new(&DEFAULT_PRIORITY);
    relayer.register(Protocol::Raop, raop, [FeatureName::Play].into());

    // RAOP is last in the default priority but the only candidate
    assert_eq!(relayer.provider(FeatureName::Play), Some(Protocol::Raop));
    assert!(relayer.relay(FeatureName::Pause).is_err());
}
