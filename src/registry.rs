//! Deduplicated publish/subscribe keyed by event name.
//!
//! Handlers are compared by the identity of their [`Arc`] allocation, so the
//! same handler registered twice for one event is stored once. Emission
//! works on a snapshot of the handler list: registrations or removals made
//! from inside a handler only affect later emissions.

#![expect(
    clippy::module_name_repetitions,
    reason = "ListenerRegistry is the established name for this type"
)]

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use dashmap::DashMap;

use crate::error::HandlerPanic;

/// A reference-counted listener. Clone the `Arc` to keep its identity.
pub type Handler<P> = Arc<dyn Fn(&P) + Send + Sync>;

type HandlerMap<P> = DashMap<String, Vec<Handler<P>>>;

/// Wrap a closure into a [`Handler`].
pub fn handler<P, F>(f: F) -> Handler<P>
where
    F: Fn(&P) + Send + Sync + 'static,
{
    Arc::new(f)
}

fn same_handler<P>(a: &Handler<P>, b: &Handler<P>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Registration token returned by [`ListenerRegistry::on`].
///
/// Dropping it leaves the handler registered; call [`Subscription::unsubscribe`]
/// to remove it.
#[must_use = "keep the Subscription to be able to unregister the handler"]
pub struct Subscription {
    unregister: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    fn new<F: FnOnce() + Send + Sync + 'static>(unregister: F) -> Self {
        Self {
            unregister: Some(Box::new(unregister)),
        }
    }

    /// Remove the handler this subscription was created for. Removing a
    /// handler that is already gone is a no-op.
    pub fn unsubscribe(mut self) {
        if let Some(unregister) = self.unregister.take() {
            unregister();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.unregister.is_some())
            .finish()
    }
}

/// Event-name keyed registry of handlers receiving `&P`.
pub struct ListenerRegistry<P> {
    handlers: Arc<HandlerMap<P>>,
}

impl<P> Clone for ListenerRegistry<P> {
    fn clone(&self) -> Self {
        Self {
            handlers: Arc::clone(&self.handlers),
        }
    }
}

impl<P> Default for ListenerRegistry<P> {
    fn default() -> Self {
        Self {
            handlers: Arc::new(DashMap::new()),
        }
    }
}

impl<P> fmt::Debug for ListenerRegistry<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("events", &self.handlers.len())
            .finish()
    }
}

impl<P: 'static> ListenerRegistry<P> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `event`. Registering an already registered
    /// handler is a no-op, and the returned subscription still removes it.
    pub fn on(&self, event: &str, handler: &Handler<P>) -> Subscription {
        {
            let mut entry = self.handlers.entry(event.to_owned()).or_default();
            if !entry.iter().any(|h| same_handler(h, handler)) {
                entry.push(Arc::clone(handler));
            }
        }

        let registry: Weak<HandlerMap<P>> = Arc::downgrade(&self.handlers);
        let event = event.to_owned();
        let handler = Arc::clone(handler);
        Subscription::new(move || {
            if let Some(handlers) = registry.upgrade() {
                remove(&handlers, &event, &handler);
            }
        })
    }

    /// Remove `handler` from `event`. Unknown handlers are ignored.
    pub fn off(&self, event: &str, handler: &Handler<P>) {
        remove(&self.handlers, event, handler);
    }

    /// Invoke every handler registered for `event`, in registration order,
    /// on the calling thread.
    ///
    /// A panicking handler is logged and skipped; it neither stops the
    /// remaining handlers nor propagates to the caller. Returns how many
    /// handlers completed normally.
    pub fn emit(&self, event: &str, payload: &P) -> usize {
        // The shard guard is released before any handler runs.
        let snapshot: Vec<Handler<P>> = match self.handlers.get(event) {
            Some(entry) => entry.value().clone(),
            None => return 0,
        };

        let mut completed = 0_usize;
        for handler in &snapshot {
            match panic::catch_unwind(AssertUnwindSafe(|| handler(payload))) {
                Ok(()) => completed += 1,
                Err(panic) => {
                    let failure = HandlerPanic {
                        event: event.to_owned(),
                        message: panic_message(panic.as_ref()),
                    };
                    #[cfg(feature = "tracing")]
                    tracing::error!(event = %failure.event, error = %failure, "Listener panicked");
                    #[cfg(not(feature = "tracing"))]
                    let _ = &failure;
                }
            }
        }

        completed
    }

    /// Drop the handlers of one event, or of every event when `event` is `None`.
    pub fn clear(&self, event: Option<&str>) {
        match event {
            Some(name) => {
                self.handlers.remove(name);
            }
            None => self.handlers.clear(),
        }
    }

    #[must_use]
    pub fn listener_count(&self, event: &str) -> usize {
        self.handlers.get(event).map_or(0, |entry| entry.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.iter().all(|entry| entry.is_empty())
    }
}

fn remove<P>(handlers: &HandlerMap<P>, event: &str, handler: &Handler<P>) {
    handlers.remove_if_mut(event, |_, list| {
        list.retain(|h| !same_handler(h, handler));
        list.is_empty()
    });
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn counter() -> (Arc<AtomicUsize>, Handler<u32>) {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let h = handler(move |_: &u32| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        (count, h)
    }

    #[test]
    fn duplicate_registration_delivers_once() {
        let registry = ListenerRegistry::new();
        let (count, h) = counter();

        let _first = registry.on("chat_response", &h);
        let _second = registry.on("chat_response", &h);

        assert_eq!(registry.listener_count("chat_response"), 1);
        assert_eq!(registry.emit("chat_response", &1), 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn same_handler_on_different_events_is_kept_per_event() {
        let registry = ListenerRegistry::new();
        let (count, h) = counter();

        let _a = registry.on("a", &h);
        let _b = registry.on("b", &h);
        registry.emit("a", &0);
        registry.emit("b", &0);

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn off_stops_delivery_and_is_idempotent() {
        let registry = ListenerRegistry::new();
        let (count, h) = counter();

        let _sub = registry.on("status", &h);
        registry.off("status", &h);
        registry.off("status", &h);
        registry.off("never-registered", &h);

        assert_eq!(registry.emit("status", &7), 0);
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn unsubscribe_removes_handler() {
        let registry = ListenerRegistry::new();
        let (count, h) = counter();

        let sub = registry.on("memory_update", &h);
        sub.unsubscribe();
        registry.emit("memory_update", &1);

        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unsubscribe_after_registry_dropped_is_noop() {
        let registry = ListenerRegistry::new();
        let (_count, h) = counter();

        let sub = registry.on("x", &h);
        drop(registry);
        sub.unsubscribe();
    }

    #[test]
    fn handlers_run_in_registration_order() {
        let registry = ListenerRegistry::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let handlers: Vec<Handler<u32>> = (0..3)
            .map(|i| {
                let order = Arc::clone(&order);
                handler(move |_: &u32| order.lock().unwrap().push(i))
            })
            .collect();
        let _subs: Vec<_> = handlers.iter().map(|h| registry.on("e", h)).collect();

        registry.emit("e", &0);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn panicking_handler_does_not_stop_later_handlers() {
        let registry = ListenerRegistry::new();
        let (count, after) = counter();
        let boom: Handler<u32> = handler(|_: &u32| panic!("boom"));

        let _boom = registry.on("chat_response", &boom);
        let _after = registry.on("chat_response", &after);

        let completed = registry.emit("chat_response", &1);

        assert_eq!(completed, 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    /// Captures tracing output to prove the failure is logged with its event name.
    #[cfg(feature = "tracing")]
    #[test]
    fn panic_is_logged_with_event_name() {
        use tracing_subscriber::layer::SubscriberExt as _;

        let output: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let output_clone = Arc::clone(&output);

        let layer = tracing_subscriber::fmt::layer()
            .with_writer(move || {
                struct CaptureWriter(Arc<Mutex<Vec<String>>>);
                impl std::io::Write for CaptureWriter {
                    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                        if let Ok(s) = std::str::from_utf8(buf) {
                            self.0.lock().expect("lock").push(s.to_owned());
                        }
                        Ok(buf.len())
                    }
                    fn flush(&mut self) -> std::io::Result<()> {
                        Ok(())
                    }
                }
                CaptureWriter(Arc::clone(&output_clone))
            })
            .with_ansi(false);
        let subscriber = tracing_subscriber::registry().with(layer);

        tracing::subscriber::with_default(subscriber, || {
            let registry = ListenerRegistry::new();
            let boom: Handler<u32> = handler(|_: &u32| panic!("listener exploded"));
            let _boom = registry.on("memory_snapshot", &boom);

            assert_eq!(registry.emit("memory_snapshot", &1), 0);
        });

        let logged = output.lock().expect("lock").join("");
        assert!(logged.contains("memory_snapshot"), "missing event name: {logged}");
        assert!(logged.contains("listener exploded"), "missing panic message: {logged}");
    }

    #[test]
    fn registration_during_emit_affects_only_later_emissions() {
        let registry: ListenerRegistry<u32> = ListenerRegistry::new();
        let (late_count, late) = counter();

        let inner_registry = registry.clone();
        let adder = handler(move |_: &u32| {
            let _sub = inner_registry.on("grow", &late);
        });
        let _adder = registry.on("grow", &adder);

        assert_eq!(registry.emit("grow", &0), 1);
        assert_eq!(late_count.load(Ordering::SeqCst), 0);

        assert_eq!(registry.emit("grow", &0), 2);
        assert_eq!(late_count.load(Ordering::SeqCst), 1);
        assert_eq!(registry.listener_count("grow"), 2);
    }

    #[test]
    fn clear_one_event_or_all() {
        let registry = ListenerRegistry::new();
        let (_count, h) = counter();

        let _a = registry.on("a", &h);
        let _b = registry.on("b", &h);

        registry.clear(Some("a"));
        assert_eq!(registry.listener_count("a"), 0);
        assert_eq!(registry.listener_count("b"), 1);

        registry.clear(None);
        assert!(registry.is_empty());
    }

    #[test]
    fn emit_without_listeners_returns_zero() {
        let registry: ListenerRegistry<u32> = ListenerRegistry::new();
        assert_eq!(registry.emit("nobody", &1), 0);
    }

    #[test]
    fn panic_message_extracts_strings() {
        let owned: Box<dyn Any + Send> = Box::new("owned".to_owned());
        let borrowed: Box<dyn Any + Send> = Box::new("borrowed");
        let other: Box<dyn Any + Send> = Box::new(42_u8);

        assert_eq!(panic_message(owned.as_ref()), "owned");
        assert_eq!(panic_message(borrowed.as_ref()), "borrowed");
        assert_eq!(panic_message(other.as_ref()), "non-string panic payload");
    }
}
