//! Process-wide audio subsystem lifetime
//!
//! The platform audio layer is brought up at most once per [`Subsystem`],
//! on first use, and torn down once at process exit through an `atexit`
//! hook. The subsystem also owns the hot-plug notification slots, so every
//! registry sharing it sees one subscriber per event.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Once, OnceLock, Weak};

use oa_core::{hotplug_debug, AudioConfig, AudioError, Result};
use parking_lot::Mutex;
use tracing::{error, info};

use crate::backend::{default_backend, AudioBackend};
use crate::notifier::HotplugNotifier;
use crate::types::DeviceEvent;

static GLOBAL: OnceLock<Arc<Subsystem>> = OnceLock::new();
static EXIT_HOOKS: Mutex<Vec<Weak<Subsystem>>> = Mutex::new(Vec::new());
static REGISTER_EXIT: Once = Once::new();

/// Owner of a backend's initialize/terminate pair
pub struct Subsystem {
    backend: Arc<dyn AudioBackend>,
    init: OnceLock<std::result::Result<(), String>>,
    terminated: AtomicBool,
    notifier: Arc<HotplugNotifier>,
    sink_installed: Once,
}

impl Subsystem {
    /// Wrap a backend; nothing is initialized until first use
    pub fn new(backend: Arc<dyn AudioBackend>) -> Arc<Self> {
        Arc::new(Self {
            backend,
            init: OnceLock::new(),
            terminated: AtomicBool::new(false),
            notifier: Arc::new(HotplugNotifier::new()),
            sink_installed: Once::new(),
        })
    }

    /// Process-wide subsystem over the compiled-in backend. The first
    /// caller's configuration wins.
    pub fn global(config: &AudioConfig) -> Arc<Self> {
        Arc::clone(GLOBAL.get_or_init(|| Self::new(default_backend(config))))
    }

    pub fn backend(&self) -> &Arc<dyn AudioBackend> {
        &self.backend
    }

    pub fn notifier(&self) -> &HotplugNotifier {
        &self.notifier
    }

    /// Route backend device events into the notifier. Installed at most
    /// once; the sink holds no strong reference back to the subsystem.
    pub fn install_event_sink(&self) {
        self.sink_installed.call_once(|| {
            let notifier = Arc::downgrade(&self.notifier);
            let backend = Arc::downgrade(&self.backend);
            self.backend.add_event_sink(Arc::new(move |event: &DeviceEvent| {
                let (Some(notifier), Some(backend)) = (notifier.upgrade(), backend.upgrade())
                else {
                    return;
                };
                notifier.dispatch(event, |direction| {
                    backend
                        .default_device(direction)
                        .ok()
                        .flatten()
                        .map(|descriptor| descriptor.info.name)
                });
            }));
            hotplug_debug!(backend = self.backend.name(), "event sink installed");
        });
    }

    /// Initialize the backend on first call. Later calls return the cached
    /// outcome, so a failed bring-up is not retried.
    pub fn ensure_initialized(self: &Arc<Self>) -> Result<()> {
        let outcome = self.init.get_or_init(|| match self.backend.initialize() {
            Ok(()) => {
                info!(backend = self.backend.name(), "audio subsystem initialized");
                register_exit_hook(Arc::downgrade(self));
                Ok(())
            }
            Err(err) => {
                error!(backend = self.backend.name(), error = %err, "audio subsystem failed to initialize");
                Err(err.to_string())
            }
        });
        outcome.clone().map_err(AudioError::Unavailable)
    }

    pub fn is_initialized(&self) -> bool {
        matches!(self.init.get(), Some(Ok(())))
    }

    /// Tear down the backend if it was initialized. Only the first call
    /// has an effect.
    pub fn terminate(&self) {
        if !self.is_initialized() || self.terminated.swap(true, Ordering::AcqRel) {
            return;
        }
        self.backend.terminate();
        info!(backend = self.backend.name(), "audio subsystem terminated");
    }
}

fn register_exit_hook(subsystem: Weak<Subsystem>) {
    REGISTER_EXIT.call_once(|| {
        // SAFETY: `run_exit_hooks` is a plain extern "C" fn with no
        // arguments, as atexit requires.
        let status = unsafe { libc::atexit(run_exit_hooks) };
        if status != 0 {
            error!("failed to register audio subsystem exit hook");
        }
    });
    EXIT_HOOKS.lock().push(subsystem);
}

extern "C" fn run_exit_hooks() {
    let hooks = std::mem::take(&mut *EXIT_HOOKS.lock());
    for subsystem in hooks.iter().filter_map(Weak::upgrade) {
        subsystem.terminate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MockBackend, MockOp};

    #[test]
    fn test_initializes_once() {
        let backend = Arc::new(MockBackend::new());
        let subsystem = Subsystem::new(backend.clone());
        assert!(!subsystem.is_initialized());

        subsystem.ensure_initialized().unwrap();
        subsystem.ensure_initialized().unwrap();
        assert!(subsystem.is_initialized());
        assert_eq!(backend.init_calls(), 1);
    }

    #[test]
    fn test_failed_init_is_cached() {
        let backend = Arc::new(MockBackend::new());
        backend.fail_next(MockOp::Initialize);
        let subsystem = Subsystem::new(backend.clone());

        assert!(matches!(
            subsystem.ensure_initialized(),
            Err(AudioError::Unavailable(_))
        ));
        assert!(subsystem.ensure_initialized().is_err());
        assert_eq!(backend.init_calls(), 0);

        subsystem.terminate();
        assert_eq!(backend.terminate_calls(), 0);
    }

    #[test]
    fn test_event_sink_installed_once() {
        use crate::notifier::DeviceListEvent;
        use crate::types::Direction;
        use oa_core::StreamFormat;
        use std::sync::atomic::AtomicUsize;

        let backend = Arc::new(MockBackend::new());
        let subsystem = Subsystem::new(backend.clone());
        subsystem.install_event_sink();
        subsystem.install_event_sink();

        let count = Arc::new(AtomicUsize::new(0));
        let handle = Arc::clone(&count);
        subsystem
            .notifier()
            .set(DeviceListEvent::DeviceListChanged, move || {
                handle.fetch_add(1, Ordering::SeqCst);
            });

        backend.add_device(Direction::Output, "usb", StreamFormat::default());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_terminate_runs_once() {
        let backend = Arc::new(MockBackend::new());
        let subsystem = Subsystem::new(backend.clone());
        subsystem.ensure_initialized().unwrap();

        subsystem.terminate();
        subsystem.terminate();
        assert_eq!(backend.terminate_calls(), 1);
    }
}
