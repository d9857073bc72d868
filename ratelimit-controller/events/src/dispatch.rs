use crate::{resync, Catalog, HandleEvent};
use parking_lot::Mutex;
use ratelimit_controller_core::{
    artifact::{ArtifactDeployer, Event, Lifecycle},
    RetryExecutor,
};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info_span, Instrument};

/// Applies lifecycle events to an [`ArtifactDeployer`].
///
/// Resync requests are served in the background when a catalog is
/// configured, so that a slow catalog doesn't stall the event stream. At most
/// one resync runs at a time: a new request supersedes the one in flight, and
/// every resync stops once the process begins shutting down.
pub struct EventDispatcher<D> {
    deployer: Arc<D>,
    catalog: Option<Arc<dyn Catalog>>,
    retry: RetryExecutor,
    drain: drain::Watch,
    resyncing: Mutex<Option<JoinHandle<()>>>,
}

// === impl EventDispatcher ===

impl<D> EventDispatcher<D>
where
    D: ArtifactDeployer + 'static,
{
    pub fn new(
        deployer: Arc<D>,
        catalog: Option<Arc<dyn Catalog>>,
        retry: RetryExecutor,
        drain: drain::Watch,
    ) -> Self {
        Self {
            deployer,
            catalog,
            retry,
            drain,
            resyncing: Mutex::new(None),
        }
    }

    /// Starts a resync in the background, replacing any resync in flight.
    /// Returns false if no catalog is configured.
    fn resync(&self) -> bool {
        let Some(catalog) = self.catalog.clone() else {
            debug!("No catalog configured; ignoring resync request");
            return false;
        };
        let deployer = self.deployer.clone();
        let retry = self.retry;
        let drain = self.drain.clone();

        let mut slot = self.resyncing.lock();
        let superseded = slot.take();
        if let Some(task) = superseded.as_ref() {
            if !task.is_finished() {
                debug!("Superseding in-flight resync");
            }
            task.abort();
        }

        let task = async move {
            // The superseded task must stop before this one touches the
            // deployer.
            if let Some(task) = superseded {
                let _ = task.await;
            }
            tokio::select! {
                _ = resync(&*catalog, &*deployer, &retry) => {}
                release = drain.signaled() => {
                    debug!("Resync interrupted by shutdown");
                    drop(release);
                }
            }
        };
        *slot = Some(tokio::spawn(task.instrument(info_span!("resync"))));
        true
    }

    async fn apply(&self, event: Event) -> anyhow::Result<()> {
        let deployer = &*self.deployer;
        match event {
            Event::Resync => {
                self.resync();
                Ok(())
            }

            Event::Application(Lifecycle::Created, app) => deployer.deploy_application(app).await,
            Event::Application(Lifecycle::Updated, app) => deployer.update_application(app).await,
            Event::Application(Lifecycle::Deleted, app) => {
                deployer.delete_application(&app.uuid).await
            }

            Event::Subscription(Lifecycle::Created, sub) => deployer.deploy_subscription(sub).await,
            Event::Subscription(Lifecycle::Updated, sub) => deployer.update_subscription(sub).await,
            Event::Subscription(Lifecycle::Deleted, sub) => {
                deployer.delete_subscription(&sub.uuid).await
            }

            Event::ApplicationMapping(Lifecycle::Created, m) => {
                deployer.deploy_application_mapping(m).await
            }
            Event::ApplicationMapping(Lifecycle::Updated, m) => {
                deployer.update_application_mapping(m).await
            }
            Event::ApplicationMapping(Lifecycle::Deleted, m) => {
                deployer.delete_application_mapping(&m.uuid).await
            }

            Event::KeyMapping(Lifecycle::Created, km) => deployer.deploy_key_mapping(km).await,
            Event::KeyMapping(Lifecycle::Updated, km) => deployer.update_key_mapping(km).await,
            Event::KeyMapping(Lifecycle::Deleted, km) => deployer.delete_key_mapping(km).await,
        }
    }
}

#[async_trait::async_trait]
impl<D> HandleEvent for EventDispatcher<D>
where
    D: ArtifactDeployer + 'static,
{
    async fn handle(&self, event: Event) {
        let kind = event.kind();
        debug!(kind, "Applying event");
        if let Err(error) = self.apply(event).await {
            error!(kind, %error, "Failed to apply event");
        }
    }
}

impl<D> std::fmt::Debug for EventDispatcher<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("catalog", &self.catalog.is_some())
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{mirror::ArtifactIndex, CatalogApplication, FetchError};
    use ratelimit_controller_core::artifact::{
        Application, ApplicationKeyMapping, ApplicationMapping, Subscription,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::{self, Duration};

    struct OneApp;

    #[async_trait::async_trait]
    impl Catalog for OneApp {
        async fn subscriptions(&self) -> Result<Vec<Subscription>, FetchError> {
            Ok(vec![])
        }

        async fn applications(&self) -> Result<Vec<CatalogApplication>, FetchError> {
            Ok(vec![CatalogApplication {
                application: Application {
                    uuid: "app-9".to_string(),
                    ..Default::default()
                },
                security_schemes: vec![],
            }])
        }

        async fn application_mappings(&self) -> Result<Vec<ApplicationMapping>, FetchError> {
            Ok(vec![])
        }
    }

    /// Fails every fetch with a retryable error.
    #[derive(Default)]
    struct Unavailable {
        fetches: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Catalog for Unavailable {
        async fn subscriptions(&self) -> Result<Vec<Subscription>, FetchError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Err(FetchError::Status {
                status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
                body: String::new(),
            })
        }

        async fn applications(&self) -> Result<Vec<CatalogApplication>, FetchError> {
            unreachable!("subscriptions never succeed")
        }

        async fn application_mappings(&self) -> Result<Vec<ApplicationMapping>, FetchError> {
            unreachable!("subscriptions never succeed")
        }
    }

    fn dispatcher(
        catalog: Option<Arc<dyn Catalog>>,
        retry: RetryExecutor,
    ) -> (EventDispatcher<ArtifactIndex>, ArtifactIndex, drain::Signal) {
        let index = ArtifactIndex::default();
        let (signal, drain) = drain::channel();
        (
            EventDispatcher::new(Arc::new(index.clone()), catalog, retry, drain),
            index,
            signal,
        )
    }

    fn once() -> RetryExecutor {
        RetryExecutor::new(0, Duration::from_secs(1))
    }

    fn in_flight<D>(dispatcher: &EventDispatcher<D>) -> Option<JoinHandle<()>> {
        dispatcher.resyncing.lock().take()
    }

    #[tokio::test]
    async fn applies_lifecycle_events() {
        let (dispatcher, index, _signal) = dispatcher(None, once());
        let app = Application {
            uuid: "app-1".to_string(),
            name: "shop".to_string(),
            ..Default::default()
        };
        let renamed = Application {
            name: "store".to_string(),
            ..app.clone()
        };
        let mapping = ApplicationMapping {
            uuid: "map-1".to_string(),
            application_ref: "app-1".to_string(),
            subscription_ref: "sub-1".to_string(),
            ..Default::default()
        };
        let km = ApplicationKeyMapping {
            application_uuid: "app-1".to_string(),
            ..Default::default()
        };

        dispatcher
            .handle(Event::Application(Lifecycle::Created, app))
            .await;
        dispatcher
            .handle(Event::Application(Lifecycle::Updated, renamed))
            .await;
        dispatcher
            .handle(Event::ApplicationMapping(Lifecycle::Created, mapping.clone()))
            .await;
        dispatcher
            .handle(Event::KeyMapping(Lifecycle::Created, km))
            .await;
        assert_eq!(index.applications()[0].name, "store");
        assert_eq!(index.application_mappings(), vec![mapping.clone()]);
        assert_eq!(index.key_mappings().len(), 1);

        dispatcher
            .handle(Event::ApplicationMapping(Lifecycle::Deleted, mapping))
            .await;
        dispatcher
            .handle(Event::Application(
                Lifecycle::Deleted,
                Application {
                    uuid: "app-1".to_string(),
                    ..Default::default()
                },
            ))
            .await;
        assert!(index.applications().is_empty());
        assert!(index.application_mappings().is_empty());
        assert!(index.key_mappings().is_empty());
    }

    #[tokio::test]
    async fn resync_without_catalog_is_ignored() {
        let (dispatcher, index, _signal) = dispatcher(None, once());
        assert!(!dispatcher.resync());
        dispatcher.handle(Event::Resync).await;
        assert!(in_flight(&dispatcher).is_none());
        assert!(index.applications().is_empty());
    }

    #[tokio::test]
    async fn resync_fetches_catalog() {
        let (dispatcher, index, _signal) = dispatcher(Some(Arc::new(OneApp)), once());
        dispatcher.handle(Event::Resync).await;
        in_flight(&dispatcher)
            .expect("catalog is configured")
            .await
            .expect("resync must not panic");
        assert_eq!(index.applications()[0].uuid, "app-9");
    }

    #[tokio::test(start_paused = true)]
    async fn resyncs_supersede_each_other() {
        let catalog = Arc::new(Unavailable::default());
        let retry = RetryExecutor::unbounded(Duration::from_secs(1));
        let (dispatcher, _index, _signal) = dispatcher(Some(catalog.clone()), retry);

        dispatcher.handle(Event::Resync).await;
        tokio::task::yield_now().await;
        assert_eq!(catalog.fetches.load(Ordering::SeqCst), 1);

        // The first resync is now waiting to retry; a second request replaces
        // it rather than running alongside it.
        dispatcher.handle(Event::Resync).await;
        let before = catalog.fetches.load(Ordering::SeqCst);
        time::sleep(Duration::from_millis(10_500)).await;
        let fetched = catalog.fetches.load(Ordering::SeqCst) - before;
        assert!(
            (9..=11).contains(&fetched),
            "a single resync must be fetching; saw {fetched} fetches in 10.5s"
        );

        let task = in_flight(&dispatcher).expect("resync must be running");
        assert!(!task.is_finished());
        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn resync_stops_on_shutdown() {
        let catalog = Arc::new(Unavailable::default());
        let retry = RetryExecutor::unbounded(Duration::from_secs(1));
        let (dispatcher, _index, signal) = dispatcher(Some(catalog.clone()), retry);

        dispatcher.handle(Event::Resync).await;
        let task = in_flight(&dispatcher).expect("resync must start");
        time::sleep(Duration::from_millis(2_500)).await;
        assert!(catalog.fetches.load(Ordering::SeqCst) > 0);

        drop(dispatcher);
        time::timeout(Duration::from_secs(1), signal.drain())
            .await
            .expect("resync must release the drain");
        task.await.expect("resync must not panic");

        let fetched = catalog.fetches.load(Ordering::SeqCst);
        time::sleep(Duration::from_secs(10)).await;
        assert_eq!(catalog.fetches.load(Ordering::SeqCst), fetched);
    }
}
