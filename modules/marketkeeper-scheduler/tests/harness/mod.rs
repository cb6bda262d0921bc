#![allow(dead_code)]

//! Shared wiring for tick tests: real scheduler services around mocks.

use std::sync::Arc;
use std::time::Duration;

use marketkeeper_common::config::{PublisherConfig, WindowConfig};
use marketkeeper_scheduler::testing::{MockBlobs, MockClassifier, MockStore, MockTransport};
use marketkeeper_scheduler::traits::EventTransport;
use marketkeeper_scheduler::{Collaborators, Services};

pub struct Harness {
    pub store: Arc<MockStore>,
    pub blobs: Arc<MockBlobs>,
    pub classifier: Arc<MockClassifier>,
    pub transport: Arc<MockTransport>,
    pub services: Services,
}

pub fn publisher_config() -> PublisherConfig {
    PublisherConfig {
        max_attempts: 2,
        base_delay: Duration::from_millis(1),
    }
}

pub fn build(store: MockStore, blobs: MockBlobs, classifier: MockClassifier) -> Harness {
    build_with(store, blobs, classifier, MockTransport::new(), &["key-0", "key-1"])
}

pub fn build_with(
    store: MockStore,
    blobs: MockBlobs,
    classifier: MockClassifier,
    transport: MockTransport,
    keys: &[&str],
) -> Harness {
    let store = Arc::new(store);
    let blobs = Arc::new(blobs);
    let classifier = Arc::new(classifier);
    let transport = Arc::new(transport);

    let services = Services::new(
        Collaborators {
            store: store.clone(),
            blobs: blobs.clone(),
            classifier: classifier.clone(),
            transport: Some(transport.clone() as Arc<dyn EventTransport>),
        },
        keys.iter().map(|k| k.to_string()).collect(),
        &WindowConfig::default(),
        &publisher_config(),
    )
    .expect("services");

    Harness {
        store,
        blobs,
        classifier,
        transport,
        services,
    }
}
