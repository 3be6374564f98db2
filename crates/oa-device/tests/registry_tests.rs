//! Registry enumeration and hot-plug notification tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use oa_core::{AudioConfig, AudioError, SampleFormat, StreamFormat};
use oa_device::backend::MockOp;
use oa_device::{
    DeviceListEvent, DeviceRegistry, Direction, MockBackend, NullBackend, SessionState, Subsystem,
};

fn stereo() -> StreamFormat {
    StreamFormat::default()
}

fn counter() -> (Arc<AtomicUsize>, impl Fn() + Send + Sync + 'static) {
    let count = Arc::new(AtomicUsize::new(0));
    let handle = Arc::clone(&count);
    (count, move || {
        handle.fetch_add(1, Ordering::SeqCst);
    })
}

fn mock_registry(backend: &Arc<MockBackend>) -> DeviceRegistry {
    DeviceRegistry::with_subsystem(Subsystem::new(backend.clone())).unwrap()
}

#[test]
fn test_enumeration_preserves_backend_order() {
    let backend = Arc::new(
        MockBackend::new()
            .with_device(Direction::Output, "Speakers", stereo())
            .with_device(Direction::Input, "Microphone", stereo())
            .with_device(Direction::Output, "HDMI", stereo())
            .with_device(Direction::Output, "USB DAC", stereo()),
    );
    let registry = mock_registry(&backend);

    let outputs: Vec<String> = registry
        .output_devices()
        .unwrap()
        .iter()
        .map(|s| s.name().to_string())
        .collect();
    assert_eq!(outputs, ["Speakers", "HDMI", "USB DAC"]);

    let inputs = registry.input_devices().unwrap();
    assert_eq!(inputs.len(), 1);
    assert!(inputs[0].is_input());
    assert_eq!(inputs[0].state(), SessionState::Stopped);
}

#[test]
fn test_default_device_is_detached() {
    let backend = Arc::new(
        MockBackend::new()
            .with_device(Direction::Output, "Speakers", stereo())
            .with_device(Direction::Output, "HDMI", stereo()),
    );
    backend.set_default_device(Direction::Output, Some("HDMI"));
    let registry = mock_registry(&backend);

    let default = registry.default_output_device().unwrap().unwrap();
    assert_eq!(default.name(), "HDMI");
    let listed = registry.output_devices().unwrap();
    assert!(listed.iter().all(|s| s.id() != default.id()));
    assert!(registry.default_input_device().unwrap().is_none());
}

#[test]
fn test_find_device_by_name() {
    let backend = Arc::new(MockBackend::new().with_device(Direction::Input, "Line In", stereo()));
    let registry = mock_registry(&backend);

    assert_eq!(registry.find_device(Direction::Input, "Line In").unwrap().name(), "Line In");
    assert!(matches!(
        registry.find_device(Direction::Output, "Line In"),
        Err(AudioError::DeviceNotFound(_))
    ));
}

#[test]
fn test_configured_preferences_applied_to_sessions() {
    let backend = Arc::new(MockBackend::new().with_device(Direction::Output, "Speakers", stereo()));
    let config = AudioConfig {
        sample_rate: Some(44_100),
        buffer_size_frames: Some(256),
        ..AudioConfig::default()
    };
    let registry =
        DeviceRegistry::with_subsystem_and_config(Subsystem::new(backend.clone()), config).unwrap();

    let session = registry.find_device(Direction::Output, "Speakers").unwrap();
    assert_eq!(session.sample_rate(), 44_100);
    assert_eq!(session.buffer_size_frames(), 256);
    assert_eq!(session.sample_format(), SampleFormat::F32);
}

#[test]
fn test_subsystem_initialized_once_across_registries() {
    let backend = Arc::new(MockBackend::new());
    let subsystem = Subsystem::new(backend.clone());

    let first = DeviceRegistry::with_subsystem(Arc::clone(&subsystem)).unwrap();
    let second = DeviceRegistry::with_subsystem(Arc::clone(&subsystem)).unwrap();
    let third = first.clone();
    drop((first, second, third));

    assert_eq!(backend.init_calls(), 1);
    subsystem.terminate();
    subsystem.terminate();
    assert_eq!(backend.terminate_calls(), 1);
}

#[test]
fn test_failed_initialization_reported() {
    let backend = Arc::new(MockBackend::new());
    backend.fail_next(MockOp::Initialize);
    let result = DeviceRegistry::with_subsystem(Subsystem::new(backend.clone()));
    assert!(matches!(result, Err(AudioError::Unavailable(_))));
}

#[test]
fn test_device_list_callback_fires_on_hotplug() {
    let backend = Arc::new(MockBackend::new());
    let registry = mock_registry(&backend);
    let (count, callback) = counter();
    registry.set_device_list_callback(DeviceListEvent::DeviceListChanged, callback);

    backend.add_device(Direction::Output, "USB Headset", stereo());
    backend.add_device(Direction::Input, "USB Headset Mic", stereo());
    backend.remove_device(Direction::Output, "USB Headset");
    assert_eq!(count.load(Ordering::SeqCst), 3);
}

#[test]
fn test_registration_replaces_previous_subscriber() {
    let backend = Arc::new(MockBackend::new());
    let registry = mock_registry(&backend);
    let (a, callback_a) = counter();
    let (b, callback_b) = counter();

    registry.set_device_list_callback(DeviceListEvent::DeviceListChanged, callback_a);
    registry.set_device_list_callback(DeviceListEvent::DeviceListChanged, callback_b);
    backend.add_device(Direction::Output, "USB", stereo());

    assert_eq!(a.load(Ordering::SeqCst), 0);
    assert_eq!(b.load(Ordering::SeqCst), 1);
}

#[test]
fn test_registries_share_subscriber_slots() {
    let backend = Arc::new(MockBackend::new());
    let subsystem = Subsystem::new(backend.clone());
    let first = DeviceRegistry::with_subsystem(Arc::clone(&subsystem)).unwrap();
    let second = DeviceRegistry::with_subsystem(subsystem).unwrap();
    let (a, callback_a) = counter();
    let (b, callback_b) = counter();

    first.set_device_list_callback(DeviceListEvent::DeviceListChanged, callback_a);
    second.set_device_list_callback(DeviceListEvent::DeviceListChanged, callback_b);
    backend.add_device(Direction::Input, "Mic", stereo());

    assert_eq!(a.load(Ordering::SeqCst), 0);
    assert_eq!(b.load(Ordering::SeqCst), 1);
}

#[test]
fn test_default_changed_filters_unrelated_devices() {
    let backend = Arc::new(MockBackend::new());
    let registry = mock_registry(&backend);
    let (output_changes, on_output) = counter();
    let (input_changes, on_input) = counter();
    registry.set_device_list_callback(DeviceListEvent::DefaultOutputDeviceChanged, on_output);
    registry.set_device_list_callback(DeviceListEvent::DefaultInputDeviceChanged, on_input);

    // Not the default
    backend.add_device(Direction::Output, "HDMI", stereo());
    assert_eq!(output_changes.load(Ordering::SeqCst), 0);

    // The platform switches to the new device as it appears
    backend.set_default_device(Direction::Output, Some("Headphones"));
    backend.add_device(Direction::Output, "Headphones", stereo());
    assert_eq!(output_changes.load(Ordering::SeqCst), 1);
    assert_eq!(input_changes.load(Ordering::SeqCst), 0);
}

#[test]
fn test_cleared_callback_stops_firing() {
    let backend = Arc::new(MockBackend::new());
    let registry = mock_registry(&backend);
    let (count, callback) = counter();
    registry.set_device_list_callback(DeviceListEvent::DeviceListChanged, callback);
    assert!(registry.clear_device_list_callback(DeviceListEvent::DeviceListChanged));

    backend.add_device(Direction::Output, "USB", stereo());
    assert_eq!(count.load(Ordering::SeqCst), 0);
}

#[test]
fn test_concurrent_registration_and_delivery() {
    let backend = Arc::new(MockBackend::new());
    let registry = mock_registry(&backend);
    let fired = Arc::new(AtomicUsize::new(0));
    registry.set_device_list_callback(DeviceListEvent::DeviceListChanged, || {});

    let pump = {
        let backend = Arc::clone(&backend);
        thread::spawn(move || {
            for i in 0..200 {
                let name = format!("device {i}");
                backend.add_device(Direction::Output, &name, StreamFormat::default());
                backend.remove_device(Direction::Output, &name);
            }
        })
    };
    let registrars: Vec<_> = (0..4)
        .map(|_| {
            let registry = registry.clone();
            let fired = Arc::clone(&fired);
            thread::spawn(move || {
                for _ in 0..100 {
                    let fired = Arc::clone(&fired);
                    registry.set_device_list_callback(DeviceListEvent::DeviceListChanged, move || {
                        fired.fetch_add(1, Ordering::SeqCst);
                    });
                }
            })
        })
        .collect();

    pump.join().unwrap();
    for registrar in registrars {
        registrar.join().unwrap();
    }

    // Every event after the last registration reaches exactly one subscriber
    let before = fired.load(Ordering::SeqCst);
    backend.add_device(Direction::Input, "late", StreamFormat::default());
    assert_eq!(fired.load(Ordering::SeqCst), before + 1);
}

#[test]
fn test_null_backend_has_no_devices() {
    let registry = DeviceRegistry::with_subsystem(Subsystem::new(Arc::new(NullBackend::new()))).unwrap();
    assert_eq!(registry.backend_name(), "null");
    assert!(registry.output_devices().unwrap().is_empty());
    assert!(registry.input_devices().unwrap().is_empty());
    assert!(registry.default_output_device().unwrap().is_none());
}
