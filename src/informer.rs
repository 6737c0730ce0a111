// System
use std::{collections::HashMap, time::Duration};

// Third Party
use futures::{pin_mut, Stream, StreamExt};
use k8s_openapi::api::core::v1::Service;
use kube::{
    api::Api,
    runtime::{reflector::ObjectRef, watcher, watcher::Event, WatchStreamExt},
    Client,
};
use tokio::{
    sync::{mpsc, oneshot},
    time,
};
use tracing::{debug, info, warn};

/// A change to a Service as seen by the informer. Updates carry the new object only.
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceEvent {
    Added(Service),
    Updated(Service),
    Deleted(Service),
    /// Missing from a relist. The last cached state is all that is known about it.
    Vanished(Service),
}

impl ServiceEvent {
    pub fn service(&self) -> &Service {
        match self {
            ServiceEvent::Added(service)
            | ServiceEvent::Updated(service)
            | ServiceEvent::Deleted(service)
            | ServiceEvent::Vanished(service) => service,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ServiceEvent::Added(_) => "added",
            ServiceEvent::Updated(_) => "updated",
            ServiceEvent::Deleted(_) => "deleted",
            ServiceEvent::Vanished(_) => "vanished",
        }
    }
}

/// Local mirror of the watched Services, used to tell additions from updates and to find the
/// objects that disappeared across a relist.
#[derive(Debug, Default)]
pub struct ServiceCache {
    services: HashMap<ObjectRef<Service>, Service>,
    synced: bool,
}

impl ServiceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a full list has been applied at least once.
    pub fn has_synced(&self) -> bool {
        self.synced
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    #[cfg(test)]
    pub fn get(&self, namespace: &str, name: &str) -> Option<&Service> {
        self.services.get(&ObjectRef::new(name).within(namespace))
    }

    /// Applies a raw watcher event and returns the resulting service events in delivery order.
    pub fn apply(&mut self, event: Event<Service>) -> Vec<ServiceEvent> {
        match event {
            Event::Applied(service) => vec![self.upsert(service)],
            Event::Deleted(service) => {
                self.services.remove(&ObjectRef::from_obj(&service));
                vec![ServiceEvent::Deleted(service)]
            }
            Event::Restarted(services) => {
                let mut previous = std::mem::take(&mut self.services);
                let mut events = Vec::with_capacity(services.len());
                for service in services {
                    let key = ObjectRef::from_obj(&service);
                    let known = previous.remove(&key).is_some();
                    self.services.insert(key, service.clone());
                    events.push(if known {
                        ServiceEvent::Updated(service)
                    } else {
                        ServiceEvent::Added(service)
                    });
                }
                // Whatever is left was deleted while the watch was down.
                events.extend(previous.into_values().map(ServiceEvent::Vanished));
                self.synced = true;
                events
            }
        }
    }

    fn upsert(&mut self, service: Service) -> ServiceEvent {
        let key = ObjectRef::from_obj(&service);
        match self.services.insert(key, service.clone()) {
            Some(_) => ServiceEvent::Updated(service),
            None => ServiceEvent::Added(service),
        }
    }
}

/// Watches the Services of one namespace and forwards their events over a channel.
pub struct ServiceInformer {
    services: Api<Service>,
    namespace: String,
    config: watcher::Config,
}

impl ServiceInformer {
    pub fn new(client: &Client, namespace: &str, config: watcher::Config) -> Self {
        Self {
            services: Api::namespaced(client.clone(), namespace),
            namespace: namespace.to_string(),
            config,
        }
    }

    /// Runs the watch until the receiving side goes away. `synced` fires once the initial list
    /// is in the cache.
    pub async fn run(
        self,
        events: mpsc::Sender<ServiceEvent>,
        synced: oneshot::Sender<()>,
    ) -> Result<(), anyhow::Error> {
        info!("Starting service watcher in namespace {}...", self.namespace);
        let stream = watcher(self.services, self.config).default_backoff();
        let mut cache = ServiceCache::new();
        forward_events(stream, &mut cache, events, synced).await
    }
}

/// Drives a watcher stream through `cache`, forwarding each resulting event. The sync
/// notification is sent before the events of the first relist so a receiver that waits for the
/// sync first cannot block the forwarding.
pub async fn forward_events<S>(
    stream: S,
    cache: &mut ServiceCache,
    events: mpsc::Sender<ServiceEvent>,
    synced: oneshot::Sender<()>,
) -> Result<(), anyhow::Error>
where
    S: Stream<Item = Result<Event<Service>, watcher::Error>>,
{
    pin_mut!(stream);
    let mut synced = Some(synced);
    while let Some(result) = stream.next().await {
        let event = match result {
            Ok(event) => event,
            Err(e) => {
                warn!("Service watch error: {}", e);
                continue;
            }
        };
        let service_events = cache.apply(event);
        if cache.has_synced() {
            if let Some(synced) = synced.take() {
                info!("Service cache synced with {} services", cache.len());
                if synced.send(()).is_err() {
                    debug!("Nobody is waiting for the cache sync, stopping");
                    return Ok(());
                }
            }
        }
        for service_event in service_events {
            if events.send(service_event).await.is_err() {
                debug!("Event receiver dropped, stopping");
                return Ok(());
            }
        }
    }
    Err(anyhow::Error::msg("Service watch stream ended"))
}

/// How waiting for the initial cache sync ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Synced,
    /// The informer dropped its sync sender without firing it.
    InformerStopped,
    TimedOut,
    /// A termination signal arrived first.
    Interrupted,
}

/// Waits for `synced` to fire, giving up after `timeout` or when `exit_signal` completes.
pub async fn wait_for_sync(
    synced: oneshot::Receiver<()>,
    timeout: Duration,
    exit_signal: &mut oneshot::Receiver<i32>,
) -> SyncOutcome {
    tokio::select! {
        synced = time::timeout(timeout, synced) => match synced {
            Ok(Ok(())) => SyncOutcome::Synced,
            Ok(Err(_)) => SyncOutcome::InformerStopped,
            Err(_) => SyncOutcome::TimedOut,
        },
        _ = exit_signal => SyncOutcome::Interrupted,
    }
}
