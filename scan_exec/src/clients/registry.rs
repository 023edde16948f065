//! # Sensor registry
//!
//! Holds one list per capability. A client joins exactly the lists its
//! [`SensorClientHandle`] declares, so the controller never has to ask a
//! client what it can do.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::{debug, info, warn};
use serde::Serialize;

use super::{ChunkDumpable, Logger, StatusReporting, TimestampConsumer, TimestampProvider};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A collaborator and the capabilities it declares.
pub struct SensorClientHandle {
    name: String,
    logger: Option<Arc<dyn Logger>>,
    dumpable: Option<Arc<dyn ChunkDumpable>>,
    reporter: Option<Arc<dyn StatusReporting>>,
    timestamp_consumer: Option<Arc<dyn TimestampConsumer>>,
}

/// Which capabilities a handle declares.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Serialize)]
pub struct Capabilities {
    pub logger: bool,
    pub dumpable: bool,
    pub reporter: bool,
    pub timestamp_consumer: bool,
}

pub struct SensorRegistry {
    attached: RwLock<Vec<(String, Capabilities)>>,
    loggers: RwLock<Vec<Arc<dyn Logger>>>,
    dumpables: RwLock<Vec<(String, Arc<dyn ChunkDumpable>)>>,
    reporters: RwLock<Vec<Arc<dyn StatusReporting>>>,
    timestamp_consumers: RwLock<Vec<Arc<dyn TimestampConsumer>>>,

    /// Provider handed to every timestamp consumer on attachment
    timestamp_provider: Arc<dyn TimestampProvider>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl SensorClientHandle {
    /// A handle with no capabilities.
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            logger: None,
            dumpable: None,
            reporter: None,
            timestamp_consumer: None,
        }
    }

    pub fn logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn dumpable(mut self, dumpable: Arc<dyn ChunkDumpable>) -> Self {
        self.dumpable = Some(dumpable);
        self
    }

    pub fn reporter(mut self, reporter: Arc<dyn StatusReporting>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    pub fn timestamp_consumer(mut self, consumer: Arc<dyn TimestampConsumer>) -> Self {
        self.timestamp_consumer = Some(consumer);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            logger: self.logger.is_some(),
            dumpable: self.dumpable.is_some(),
            reporter: self.reporter.is_some(),
            timestamp_consumer: self.timestamp_consumer.is_some(),
        }
    }
}

impl SensorRegistry {
    pub fn new(timestamp_provider: Arc<dyn TimestampProvider>) -> Self {
        Self {
            attached: RwLock::new(Vec::new()),
            loggers: RwLock::new(Vec::new()),
            dumpables: RwLock::new(Vec::new()),
            reporters: RwLock::new(Vec::new()),
            timestamp_consumers: RwLock::new(Vec::new()),
            timestamp_provider,
        }
    }

    /// Attach a client, adding it to each list its handle declares.
    ///
    /// Names must be unique, a second handle with an attached name is
    /// ignored and `false` returned.
    pub fn attach(&self, handle: SensorClientHandle) -> bool {
        let caps = handle.capabilities();

        {
            let mut attached = write(&self.attached);
            if attached.iter().any(|(n, _)| n == &handle.name) {
                warn!("A client named \"{}\" is already attached", handle.name);
                return false;
            }
            attached.push((handle.name.clone(), caps));
        }

        if let Some(c) = handle.timestamp_consumer {
            c.set_timestamp_provider(self.timestamp_provider.clone());
            write(&self.timestamp_consumers).push(c);
        }
        if let Some(l) = handle.logger {
            write(&self.loggers).push(l);
        }
        if let Some(d) = handle.dumpable {
            write(&self.dumpables).push((handle.name.clone(), d));
        }
        if let Some(r) = handle.reporter {
            write(&self.reporters).push(r);
        }

        info!("Client \"{}\" attached with {:?}", handle.name, caps);

        true
    }

    pub fn is_attached(&self, name: &str) -> bool {
        read(&self.attached).iter().any(|(n, _)| n == name)
    }

    /// True if every named client is attached.
    pub fn has_all<S: AsRef<str>>(&self, names: &[S]) -> bool {
        names.iter().all(|n| self.is_attached(n.as_ref()))
    }

    /// Names and capabilities of every attached client, in attachment order.
    pub fn attached(&self) -> Vec<(String, Capabilities)> {
        read(&self.attached).clone()
    }

    pub fn loggers(&self) -> Vec<Arc<dyn Logger>> {
        read(&self.loggers).clone()
    }

    pub fn dumpables(&self) -> Vec<(String, Arc<dyn ChunkDumpable>)> {
        read(&self.dumpables).clone()
    }

    pub fn reporters(&self) -> Vec<Arc<dyn StatusReporting>> {
        read(&self.reporters).clone()
    }

    pub fn timestamp_provider(&self) -> Arc<dyn TimestampProvider> {
        self.timestamp_provider.clone()
    }

    /// Start logging on every logger.
    pub fn broadcast_start(&self) {
        let loggers = self.loggers();
        debug!("Starting {} loggers", loggers.len());
        for l in loggers {
            l.start_logging();
        }
    }

    /// Stop logging on every logger.
    pub fn broadcast_stop(&self) {
        let loggers = self.loggers();
        debug!("Stopping {} loggers", loggers.len());
        for l in loggers {
            l.stop_logging();
        }
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

// The lists are only ever pushed to, so a poisoned lock still holds a valid list.

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|p| p.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|p| p.into_inner())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::clients::PendingDump;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct FixedClock;

    impl TimestampProvider for FixedClock {
        fn timestamp(&self) -> u64 {
            1234
        }
    }

    #[derive(Default)]
    struct FakeSensor {
        logging: AtomicBool,
        starts: AtomicUsize,
        provider: Mutex<Option<Arc<dyn TimestampProvider>>>,
    }

    impl Logger for FakeSensor {
        fn start_logging(&self) {
            self.logging.store(true, Ordering::SeqCst);
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn stop_logging(&self) {
            self.logging.store(false, Ordering::SeqCst);
        }
    }

    impl ChunkDumpable for FakeSensor {
        fn freeze(&self) -> PendingDump {
            PendingDump::empty("fake")
        }
    }

    impl StatusReporting for FakeSensor {
        fn name(&self) -> &str {
            "fake"
        }

        fn status(&self) -> Value {
            json!({ "logging": self.logging.load(Ordering::SeqCst) })
        }
    }

    impl TimestampConsumer for FakeSensor {
        fn set_timestamp_provider(&self, provider: Arc<dyn TimestampProvider>) {
            *self.provider.lock().unwrap() = Some(provider);
        }
    }

    #[test]
    fn test_declared_capabilities_only() {
        let registry = SensorRegistry::new(Arc::new(FixedClock));
        let sensor = Arc::new(FakeSensor::default());

        // Declared as a reporter only, even though it could do more
        assert!(registry.attach(SensorClientHandle::new("fake").reporter(sensor.clone())));

        assert!(registry.is_attached("fake"));
        assert_eq!(registry.reporters().len(), 1);
        assert!(registry.loggers().is_empty());
        assert!(registry.dumpables().is_empty());
        assert!(sensor.provider.lock().unwrap().is_none());

        registry.broadcast_start();
        assert_eq!(sensor.starts.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_attach_all() {
        let registry = SensorRegistry::new(Arc::new(FixedClock));
        let sensor = Arc::new(FakeSensor::default());

        let handle = SensorClientHandle::new("fake")
            .logger(sensor.clone())
            .dumpable(sensor.clone())
            .reporter(sensor.clone())
            .timestamp_consumer(sensor.clone());
        assert_eq!(
            handle.capabilities(),
            Capabilities {
                logger: true,
                dumpable: true,
                reporter: true,
                timestamp_consumer: true
            }
        );
        assert!(registry.attach(handle));

        // Provider is wired on attachment
        let provider = sensor.provider.lock().unwrap().clone().unwrap();
        assert_eq!(provider.timestamp(), 1234);

        registry.broadcast_start();
        registry.broadcast_start();
        assert!(sensor.logging.load(Ordering::SeqCst));
        registry.broadcast_stop();
        assert!(!sensor.logging.load(Ordering::SeqCst));

        // Duplicate names are refused
        assert!(!registry.attach(SensorClientHandle::new("fake").logger(sensor.clone())));
        assert_eq!(registry.loggers().len(), 1);
    }

    #[test]
    fn test_has_all() {
        let registry = SensorRegistry::new(Arc::new(FixedClock));
        let mandatory = ["gpio", "fs"];

        assert!(!registry.has_all(&mandatory));
        registry.attach(SensorClientHandle::new("gpio"));
        assert!(!registry.has_all(&mandatory));
        registry.attach(SensorClientHandle::new("fs"));
        assert!(registry.has_all(&mandatory));
        assert!(registry.has_all::<&str>(&[]));
    }
}
