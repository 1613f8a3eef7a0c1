//! A small buffered logging core, generic over the event type.
//!
//! A [`Logger<T>`] accumulates timestamped events and flushes them to an
//! installed action once the buffer fills or [`Logger::flush`] is called
//! explicitly. A [`Registry`] lets a process bind names (e.g. `"exstack/push"`)
//! to destinations without every call site needing to know where events end up.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Binds names to typed loggers.
pub struct Registry {
    /// An instant common to all logging statements.
    time: Instant,
    /// A map from names to typed loggers.
    map: HashMap<String, Box<dyn Any>>,
}

impl Registry {
    /// Creates a new logger registry.
    pub fn new(time: Instant) -> Self {
        Registry { time, map: HashMap::new() }
    }

    /// Binds a log name to an action on log event batches.
    ///
    /// Returns any pre-installed action, rather than overwriting it and
    /// pivoting the logging destination mid-stream: new loggers with this name
    /// use the new destination, existing loggers keep using the old one.
    pub fn insert<T: 'static>(
        &mut self,
        name: String,
        action: Box<dyn Fn(&Duration, &[(Duration, T)])>,
    ) -> Option<Box<dyn Any>> {
        let logger = Logger::<T>::new(self.time, action);
        self.map.insert(name, Box::new(logger))
    }

    /// Removes a bound logger, closing its stream.
    pub fn remove(&mut self, name: &str) -> Option<Box<dyn Any>> {
        self.map.remove(name)
    }

    /// Retrieves a shared logger, if one has been inserted.
    pub fn get<T: 'static>(&self, name: &str) -> Option<Logger<T>> {
        self.map
            .get(name)
            .and_then(|entry| entry.downcast_ref::<Logger<T>>())
            .map(Logger::clone)
    }
}

/// A buffering logger.
pub struct Logger<T> {
    time: Instant,
    action: Rc<Box<dyn Fn(&Duration, &[(Duration, T)])>>,
    buffer: Rc<RefCell<Vec<(Duration, T)>>>,
}

impl<T> Clone for Logger<T> {
    fn clone(&self) -> Self {
        Logger {
            time: self.time,
            action: Rc::clone(&self.action),
            buffer: Rc::clone(&self.buffer),
        }
    }
}

impl<T> Logger<T> {
    /// Allocates a new shareable logger bound to a write destination.
    pub fn new(time: Instant, action: Box<dyn Fn(&Duration, &[(Duration, T)])>) -> Self {
        Logger {
            time,
            action: Rc::new(action),
            buffer: Rc::new(RefCell::new(Vec::with_capacity(1024))),
        }
    }

    /// Logs an event, timestamped at the moment of the call.
    ///
    /// The write may be delayed by buffering; it becomes visible to the sink
    /// when the buffer fills or `flush` is called.
    pub fn log(&self, event: T) {
        let mut buffer = self.buffer.borrow_mut();
        buffer.push((self.time.elapsed(), event));
        if buffer.len() == buffer.capacity() {
            (self.action)(&self.time.elapsed(), &buffer[..]);
            buffer.clear();
        }
    }

    /// Flushes logged events to the sink.
    pub fn flush(&self) {
        let mut buffer = self.buffer.borrow_mut();
        (self.action)(&self.time.elapsed(), &buffer[..]);
        buffer.clear();
    }
}
