use super::*;
use std::sync::atomic::{AtomicUsize, Ordering};

struct Counter {
    seen: AtomicUsize,
}

impl Counter {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            seen: AtomicUsize::new(0),
        })
    }
}

impl DeviceListener for Counter {
    fn on_event(&self, _event: &DeviceEvent) {
        self.seen.fetch_add(1, Ordering::SeqCst);
    }
}

fn weak_of(counter: &Arc<Counter>) -> Weak<dyn DeviceListener> {
    let listener: Arc<dyn DeviceListener> = counter.clone();
    Arc::downgrade(&listener)
}

#[test]
fn events_reach_registered_listeners() {
    let producer = StateProducer::new();
    let listener = Counter::new();
    let strong: Arc<dyn DeviceListener> = listener.clone();
    let _handle = producer.register(Arc::downgrade(&strong)).unwrap();

    producer.emit(&DeviceEvent::ConnectionClosed);
    producer.emit(&DeviceEvent::VolumeUpdate(30.0));
    assert_eq!(listener.seen.load(Ordering::SeqCst), 2);
}

#[test]
fn detach_stops_delivery() {
    let producer = StateProducer::new();
    let listener = Counter::new();
    let strong: Arc<dyn DeviceListener> = listener.clone();
    let handle = producer.register(Arc::downgrade(&strong)).unwrap();

    producer.emit(&DeviceEvent::ConnectionClosed);
    handle.detach();
    producer.emit(&DeviceEvent::ConnectionClosed);
    assert_eq!(listener.seen.load(Ordering::SeqCst), 1);
}

#[test]
fn dropped_listeners_are_pruned() {
    let producer = StateProducer::new();
    let listener = Counter::new();
    let strong: Arc<dyn DeviceListener> = listener.clone();
    let _handle = producer.register(Arc::downgrade(&strong));

    drop(strong);
    drop(listener);
    producer.emit(&DeviceEvent::ConnectionClosed);
    assert_eq!(producer.listener_count(), 0);
}

#[test]
fn fan_out_is_bounded() {
    let producer = StateProducer::new();
    let counters: Vec<_> = (0..StateProducer::MAX_LISTENERS)
        .map(|_| Counter::new())
        .collect();
    let strongs: Vec<Arc<dyn DeviceListener>> =
        counters.iter().map(|c| c.clone() as Arc<dyn DeviceListener>).collect();
    for strong in &strongs {
        assert!(producer.register(Arc::downgrade(strong)).is_some());
    }

    let overflow = Counter::new();
    assert!(producer.register(weak_of(&overflow)).is_none());
}

#[test]
fn dedup_suppresses_identical_snapshots() {
    use crate::types::{DeviceState, PlayingState};

    let dedup = PlayStatusDedup::new();
    let playing = PlayingState {
        title: Some("Track".to_string()),
        device_state: DeviceState::Playing,
        ..Default::default()
    };

    assert!(dedup.accept(&playing));
    assert!(!dedup.accept(&playing));

    // State change with identical content still goes through
    let paused = PlayingState {
        device_state: DeviceState::Paused,
        ..playing.clone()
    };
    assert!(dedup.accept(&paused));

    let other = PlayingState {
        title: Some("Other".to_string()),
        ..paused
    };
    assert!(dedup.accept(&other));
}

#[test]
fn backoff_grows_linearly_and_resets() {
    let mut backoff = ReconnectBackoff::new(Some(Duration::from_secs(2)));
    assert_eq!(backoff.next_delay(), Duration::from_secs(2));
    assert_eq!(backoff.next_delay(), Duration::from_secs(4));
    assert_eq!(backoff.next_delay(), Duration::from_secs(6));
    backoff.reset();
    assert_eq!(backoff.next_delay(), Duration::from_secs(2));
}

#[test]
fn backoff_saturates() {
    let mut backoff = ReconnectBackoff::new(Some(Duration::from_secs(30)));
    for _ in 0..10 {
        let _ = backoff.next_delay();
    }
    assert_eq!(backoff.next_delay(), Duration::from_secs(60));
}
