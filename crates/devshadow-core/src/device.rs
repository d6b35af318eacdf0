use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{oneshot, Mutex};

use devshadow_domain::{
    wellknown, AttributePath, ClusterPath, CommandId, DataValue, DataVersion, EndpointId, NodeId,
    ReachabilityState, RemoteStatus,
};
use devshadow_store::StorageContract;
use devshadow_transport::{
    AttributeDataItem, ConnectivityMonitor, DataVersionFilter, EventDataItem, InvokeResult,
    ReadClientCallbacks, SessionError, SessionProvider, SubscriptionTransport, TimeSyncClient,
    TransportError,
};

use crate::cluster_store::{AttributeReportItem, ClusterStore};
use crate::config::ShadowConfig;
use crate::delegate::{Delegate, EventReportItem};
use crate::error::{ErrorKind, Result, ShadowError};
use crate::expected_cache::ExpectedValueCache;
use crate::queue::{EnqueueRead, ReadParams, Ready, WorkQueue};
use crate::subscription::{Effect, SubscriptionEngine};
use crate::time_sync;

/// What a queued item resolves to, delivered to whichever caller(s) are
/// waiting on its id (§4.3, §9).
#[derive(Debug, Clone)]
enum Outcome {
    Read(Result<Vec<AttributeDataItem>>),
    Write(Result<RemoteStatus>),
    Invoke(Result<InvokeResult>),
    InvokeExpired,
}

impl Clone for ShadowError {
    fn clone(&self) -> Self {
        // ShadowError wraps non-Clone error sources; fan-out to multiple
        // waiters only needs the classification, so re-derive a lightweight
        // equivalent rather than cloning the original cause.
        ShadowError::Internal(self.to_string())
    }
}

struct StateLock {
    cluster_store: ClusterStore,
    expected_cache: ExpectedValueCache,
    queue: WorkQueue,
    subscription: SubscriptionEngine,
    session: Option<devshadow_transport::SessionHandle>,
    read_client: Option<devshadow_transport::ReadClientHandle>,
    delegate: Option<Weak<dyn Delegate>>,
    pending: HashMap<u64, Vec<oneshot::Sender<Outcome>>>,
    current_batch_historical: bool,
    invalidated: bool,
}

struct DeviceInner {
    node: NodeId,
    config: ShadowConfig,
    overrides: crate::test_overrides::TestOverrides,
    storage: Arc<dyn StorageContract>,
    transport: Arc<dyn SubscriptionTransport>,
    sessions: Arc<dyn SessionProvider>,
    connectivity: Arc<dyn ConnectivityMonitor>,
    time_sync: Arc<dyn TimeSyncClient>,
    state: Mutex<StateLock>,
    /// Serializes time-sync passes; holds no data of its own (§5).
    time: Mutex<()>,
}

/// C5: the device facade (§4.5). Cheap to clone — every clone shares the
/// same underlying state behind `Arc`.
#[derive(Clone)]
pub struct Device {
    inner: Arc<DeviceInner>,
}

impl Device {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        node: NodeId,
        config: ShadowConfig,
        overrides: crate::test_overrides::TestOverrides,
        storage: Arc<dyn StorageContract>,
        transport: Arc<dyn SubscriptionTransport>,
        sessions: Arc<dyn SessionProvider>,
        connectivity: Arc<dyn ConnectivityMonitor>,
        time_sync: Arc<dyn TimeSyncClient>,
    ) -> Self {
        let subscription = SubscriptionEngine::new(
            config.backoff_cap,
            config.unreachable_timeout,
            config.time_sync_initial_delay,
        );
        let state = StateLock {
            cluster_store: ClusterStore::new(),
            expected_cache: ExpectedValueCache::new(),
            queue: WorkQueue::new(),
            subscription,
            session: None,
            read_client: None,
            delegate: None,
            pending: HashMap::new(),
            current_batch_historical: false,
            invalidated: false,
        };
        Self {
            inner: Arc::new(DeviceInner {
                node,
                config,
                overrides,
                storage,
                transport,
                sessions,
                connectivity,
                time_sync,
                state: Mutex::new(state),
                time: Mutex::new(()),
            }),
        }
    }

    pub fn node(&self) -> NodeId {
        self.inner.node
    }

    /// Loads whatever was persisted for this node before any subscription
    /// activity starts (§3 "cold start").
    pub async fn load_persisted(&self) -> Result<()> {
        let data = self.inner.storage.load_all(self.inner.node).await?;
        let mut st = self.inner.state.lock().await;
        st.cluster_store.inject_persisted(data);
        Ok(())
    }

    /// Installs the delegate and begins subscribing, unless
    /// `TestOverrides::skip_subscription` is set.
    pub async fn set_delegate(&self, delegate: Arc<dyn Delegate>) {
        let effects = {
            let mut st = self.inner.state.lock().await;
            st.delegate = Some(Arc::downgrade(&delegate));
            if self.inner.overrides.skip_subscription {
                Vec::new()
            } else {
                let mut effects = st.subscription.on_set_delegate();
                let primed = st.cluster_store.is_primed();
                effects.extend(st.subscription.note_cache_primed_if(primed));
                effects
            }
        };
        self.apply_effects(effects).await;
    }

    /// Tears down everything and fails all in-flight operations. A device
    /// must not be used again after this (§4.5).
    pub async fn invalidate(&self) {
        let (effects, read_client, waiters) = {
            let mut st = self.inner.state.lock().await;
            st.invalidated = true;
            st.delegate = None;
            let read_client = st.read_client.take();
            let effects = st.subscription.invalidate();
            let waiters: Vec<_> = st.pending.drain().flat_map(|(_, v)| v).collect();
            (effects, read_client, waiters)
        };
        for tx in waiters {
            let _ = tx.send(Outcome::Read(Err(ShadowError::Invalidated)));
        }
        if let Some(handle) = read_client {
            self.inner.transport.stop_subscription(handle).await;
        }
        self.inner.connectivity.stop();
        self.apply_effects(effects).await;
    }

    async fn ensure_not_invalidated(&self) -> Result<()> {
        let st = self.inner.state.lock().await;
        if st.invalidated {
            Err(ShadowError::Invalidated)
        } else {
            Ok(())
        }
    }

    pub async fn read_attribute(&self, path: AttributePath) -> Result<DataValue> {
        self.ensure_not_invalidated().await?;

        if !self.inner.overrides.skip_expected_values {
            let mut st = self.inner.state.lock().await;
            if let Some(v) = st.expected_cache.lookup(path) {
                self.refresh_if_changes_omitted(path);
                return Ok(v);
            }
        }
        {
            let mut st = self.inner.state.lock().await;
            if let Some(v) = st
                .cluster_store
                .get_paged(self.inner.node, path, self.inner.storage.as_ref())
                .await?
            {
                self.refresh_if_changes_omitted(path);
                return Ok(v);
            }
        }

        let items = self.run_read(vec![path]).await?;
        let item = items
            .into_iter()
            .find(|i| i.path == path)
            .ok_or_else(|| ShadowError::Internal("read returned no data for requested path".into()))?;
        item.result.map_err(ShadowError::Remote)
    }

    /// Ordinary subscription deltas can't be relied on to report
    /// "changes omitted" attributes (§4.5) — a cached hit on one of them
    /// still needs a background refresh read to keep the shadow current.
    fn refresh_if_changes_omitted(&self, path: AttributePath) {
        if wellknown::is_changes_omitted(path.cluster, path.attribute) {
            let device = self.clone();
            tokio::spawn(async move {
                if let Err(err) = device.run_read(vec![path]).await {
                    tracing::debug!(path = %path, error = %err, "changes-omitted refresh read failed");
                }
            });
        }
    }

    async fn run_read(&self, paths: Vec<AttributePath>) -> Result<Vec<AttributeDataItem>> {
        let (id, rx) = {
            let mut st = self.inner.state.lock().await;
            let (tx, rx) = oneshot::channel();
            let id = match st.queue.enqueue_read(paths, ReadParams::default()) {
                EnqueueRead::New(id) => id,
                EnqueueRead::Duplicate(id) => id,
            };
            st.pending.entry(id).or_default().push(tx);
            (id, rx)
        };
        self.kick_queue();
        match rx.await {
            Ok(Outcome::Read(result)) => result,
            Ok(_) => Err(ShadowError::Internal("unexpected outcome kind for a read".into())),
            Err(_) => Err(ShadowError::Internal(format!("queue dropped pending read {id}"))),
        }
    }

    /// Writes a single attribute. Installs an optimistic expected value
    /// immediately (unless overridden) and removes it once the real result
    /// (or a failure) arrives (§4.2, §4.3).
    pub async fn write_attribute(
        &self,
        path: AttributePath,
        value: DataValue,
        data_version: Option<DataVersion>,
        expected_interval: Duration,
    ) -> Result<()> {
        self.ensure_not_invalidated().await?;

        let expected_generation = if self.inner.overrides.skip_expected_values {
            None
        } else {
            let mut st = self.inner.state.lock().await;
            let cluster_store = &st.cluster_store;
            let (generation, reports) = st.expected_cache.set(
                vec![(path, value.clone())],
                expected_interval,
                |p| cluster_store.get(p),
            );
            drop(st);
            self.deliver_attribute_reports(reports).await;
            Some(generation)
        };

        let (id, rx) = {
            let mut st = self.inner.state.lock().await;
            let (tx, rx) = oneshot::channel();
            let id = st.queue.enqueue_write(path, value, data_version, expected_generation);
            st.pending.entry(id).or_default().push(tx);
            (id, rx)
        };
        self.kick_queue();

        let result = match rx.await {
            Ok(Outcome::Write(result)) => result,
            Ok(_) => Err(ShadowError::Internal("unexpected outcome kind for a write".into())),
            Err(_) => Err(ShadowError::Internal(format!("queue dropped pending write {id}"))),
        };

        if let Some(generation) = expected_generation {
            self.clear_expected(path, generation).await;
        }

        match result? {
            RemoteStatus::Success => Ok(()),
            status => Err(ShadowError::Remote(status)),
        }
    }

    /// Invokes a command. If `expected_interval` is missing (zero) or
    /// `expected` is empty, no expected values are stored; otherwise every
    /// provided pair is installed under one generation before the invoke is
    /// enqueued, and cleared if the outcome is a `Remote` or `Protocol`
    /// failure (§4.5, §7). A successful outcome leaves them in place for the
    /// ordinary report path to supersede.
    #[allow(clippy::too_many_arguments)]
    pub async fn invoke_command(
        &self,
        endpoint: EndpointId,
        cluster: ClusterPath,
        command: CommandId,
        fields: DataValue,
        timeout: Option<Duration>,
        expected: Vec<(AttributePath, DataValue)>,
        expected_interval: Duration,
    ) -> Result<Option<DataValue>> {
        self.ensure_not_invalidated().await?;
        let timeout = timeout.or(Some(self.inner.config.default_timed_invoke_timeout));

        let expected_generation = if expected.is_empty()
            || expected_interval.is_zero()
            || self.inner.overrides.skip_expected_values
        {
            None
        } else {
            let mut st = self.inner.state.lock().await;
            let cluster_store = &st.cluster_store;
            let (generation, reports) =
                st.expected_cache
                    .set(expected.clone(), expected_interval, |p| cluster_store.get(p));
            drop(st);
            self.deliver_attribute_reports(reports).await;
            Some(generation)
        };

        let (id, rx) = {
            let mut st = self.inner.state.lock().await;
            let (tx, rx) = oneshot::channel();
            let id = st
                .queue
                .enqueue_invoke(endpoint, cluster, command, fields, timeout, expected_generation);
            st.pending.entry(id).or_default().push(tx);
            (id, rx)
        };
        self.kick_queue();

        let result = match rx.await {
            Ok(Outcome::Invoke(result)) => result,
            Ok(Outcome::InvokeExpired) => Err(ShadowError::Timeout),
            Ok(_) => Err(ShadowError::Internal("unexpected outcome kind for an invoke".into())),
            Err(_) => Err(ShadowError::Internal(format!("queue dropped pending invoke {id}"))),
        };

        if let Some(generation) = expected_generation {
            let should_clear = matches!(
                result.as_ref().err().map(ShadowError::kind),
                Some(ErrorKind::Remote) | Some(ErrorKind::Protocol)
            ) || result
                .as_ref()
                .ok()
                .is_some_and(|invoke| !invoke.status.is_success());
            if should_clear {
                let paths: Vec<AttributePath> = expected.iter().map(|(p, _)| *p).collect();
                self.clear_expected_paths(&paths, generation).await;
            }
        }

        let invoke = result?;
        if invoke.status.is_success() {
            Ok(invoke.response)
        } else {
            Err(ShadowError::Remote(invoke.status))
        }
    }

    async fn clear_expected(&self, path: AttributePath, generation: u64) {
        self.clear_expected_paths(&[path], generation).await;
    }

    async fn clear_expected_paths(&self, paths: &[AttributePath], generation: u64) {
        let mut reports = Vec::new();
        {
            let mut st = self.inner.state.lock().await;
            for &path in paths {
                let cluster_store = &st.cluster_store;
                if let Some(report) = st.expected_cache.remove(path, generation, |p| cluster_store.get(p)) {
                    reports.push(report);
                }
            }
        }
        if !reports.is_empty() {
            self.deliver_attribute_reports(reports).await;
        }
    }

    /// Drives the head of the queue once, resolving whichever caller(s) are
    /// waiting on it, then schedules itself again if work remains. Never
    /// holds `state_lock` across the transport call (§5).
    fn kick_queue(&self) {
        let device = self.clone();
        tokio::spawn(async move {
            device.drain_one().await;
        });
    }

    async fn current_session(&self) -> Option<devshadow_transport::SessionHandle> {
        self.inner.state.lock().await.session.clone()
    }

    async fn drain_one(&self) {
        let ready = {
            let mut st = self.inner.state.lock().await;
            st.queue.dequeue_ready()
        };
        let Some(ready) = ready else { return };

        // An expired invoke resolves unconditionally — it never needed a
        // session to begin with.
        if let Ready::InvokeExpired { id, .. } = ready {
            self.resolve(vec![id], Outcome::InvokeExpired).await;
            if !self.inner.state.lock().await.queue.is_empty() {
                self.kick_queue();
            }
            return;
        }

        let Some(session) = self.current_session().await else {
            // No session yet: put it back and let subscription establishment
            // re-kick the queue once a session exists.
            self.requeue(ready).await;
            return;
        };

        match ready {
            Ready::Read { merged_ids, paths, params, retries_left, .. } => {
                match self.inner.transport.send_read(&session, paths.clone()).await {
                    Ok(items) => {
                        self.ingest_and_resolve_read(merged_ids, items).await;
                    }
                    Err(err) if matches!(err, TransportError::Busy | TransportError::SendFailed(_)) => {
                        let mut st = self.inner.state.lock().await;
                        let retried = st.queue.retry_read(merged_ids.clone(), paths, params, retries_left);
                        drop(st);
                        if !retried {
                            self.resolve(merged_ids, Outcome::Read(Err(err.into()))).await;
                        }
                    }
                    Err(err) => self.resolve(merged_ids, Outcome::Read(Err(err.into()))).await,
                }
            }
            Ready::Write { id, path, value, data_version, expected_generation: _ } => {
                // Clearing the expected value is the caller's job (see
                // `write_attribute`), which already holds the generation.
                let result = self
                    .inner
                    .transport
                    .send_write(&session, path, value, data_version)
                    .await;
                self.resolve(vec![id], Outcome::Write(result.map_err(Into::into))).await;
            }
            Ready::InvokeExpired { id, .. } => {
                self.resolve(vec![id], Outcome::InvokeExpired).await;
            }
            Ready::Invoke { id, endpoint, cluster, command, fields, timeout, cutoff, expected_generation, busy_retries_left } => {
                match self
                    .inner
                    .transport
                    .send_invoke(&session, endpoint, cluster, command, fields.clone(), timeout)
                    .await
                {
                    Ok(result) if result.status == RemoteStatus::Busy => {
                        let mut st = self.inner.state.lock().await;
                        let retried = st.queue.retry_invoke_busy(
                            id,
                            endpoint,
                            cluster,
                            command,
                            fields,
                            cutoff,
                            expected_generation,
                            busy_retries_left,
                        );
                        drop(st);
                        if !retried {
                            self.resolve(vec![id], Outcome::Invoke(Ok(result))).await;
                        }
                    }
                    Ok(result) => self.resolve(vec![id], Outcome::Invoke(Ok(result))).await,
                    Err(err) => self.resolve(vec![id], Outcome::Invoke(Err(err.into()))).await,
                }
            }
        }

        // More work may remain (batching only folds in compatible reads).
        if !self.inner.state.lock().await.queue.is_empty() {
            self.kick_queue();
        }
    }

    /// Puts an item back because no session exists yet to attempt it —
    /// not a retry, so every caller's original id (and, for invoke, its
    /// busy-retry budget) must come back unchanged (§9 per-caller reply).
    async fn requeue(&self, ready: Ready) {
        let mut st = self.inner.state.lock().await;
        match ready {
            Ready::Read { merged_ids, paths, params, retries_left, .. } => {
                st.queue.retry_read(merged_ids, paths, params, retries_left + 1);
            }
            Ready::Write { id, path, value, data_version, expected_generation } => {
                st.queue.requeue_write(id, path, value, data_version, expected_generation);
            }
            Ready::Invoke {
                id, endpoint, cluster, command, fields, cutoff, expected_generation, busy_retries_left, ..
            } => {
                st.queue.retry_invoke_busy(
                    id,
                    endpoint,
                    cluster,
                    command,
                    fields,
                    cutoff,
                    expected_generation,
                    busy_retries_left + 1,
                );
            }
            Ready::InvokeExpired { .. } => {}
        }
    }

    async fn ingest_and_resolve_read(&self, ids: Vec<u64>, items: Vec<AttributeDataItem>) {
        let (reports, config_changed) = {
            let mut st = self.inner.state.lock().await;
            if self.inner.overrides.force_report_on_match {
                st.cluster_store.apply_report_forced(items.clone())
            } else {
                st.cluster_store.apply_report(items.clone())
            }
        };
        self.resolve(ids, Outcome::Read(Ok(items))).await;
        self.deliver_attribute_reports(reports).await;
        if config_changed {
            self.fire_configuration_changed().await;
        }
    }

    async fn resolve(&self, ids: Vec<u64>, outcome: Outcome) {
        let mut senders = Vec::new();
        {
            let mut st = self.inner.state.lock().await;
            for id in ids {
                if let Some(txs) = st.pending.remove(&id) {
                    senders.extend(txs);
                }
            }
        }
        for tx in senders {
            let _ = tx.send(outcome.clone());
        }
    }

    async fn delegate(&self) -> Option<Arc<dyn Delegate>> {
        self.inner.state.lock().await.delegate.as_ref().and_then(Weak::upgrade)
    }

    async fn deliver_attribute_reports(&self, reports: Vec<AttributeReportItem>) {
        if reports.is_empty() {
            return;
        }
        if let Some(delegate) = self.delegate().await {
            delegate.received_attribute_report(reports).await;
        }
    }

    async fn fire_configuration_changed(&self) {
        if let Some(delegate) = self.delegate().await {
            delegate.device_configuration_changed().await;
        }
    }

    /// Applies the side effects a [`SubscriptionEngine`] transition
    /// produced. Never called while holding `state_lock`.
    async fn apply_effects(&self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::ArmUnreachableTimer(delay) => {
                    let device = self.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        device.check_unreachable_timeout().await;
                    });
                }
                Effect::RequestSession => {
                    let device = self.clone();
                    tokio::spawn(async move {
                        device.acquire_and_subscribe().await;
                    });
                }
                Effect::StartConnectivityMonitor => {
                    let device = self.clone();
                    let handler: Arc<dyn Fn() + Send + Sync> = Arc::new(move || {
                        let device = device.clone();
                        tokio::spawn(async move {
                            device.handle_connectivity_kick().await;
                        });
                    });
                    self.inner.connectivity.start(handler);
                }
                Effect::StopConnectivityMonitor => {
                    self.inner.connectivity.stop();
                }
                Effect::ScheduleRetry(delay) => {
                    let device = self.clone();
                    tokio::spawn(async move {
                        if !delay.is_zero() {
                            tokio::time::sleep(delay).await;
                        }
                        device.acquire_and_subscribe().await;
                    });
                }
                Effect::FireStateChanged(reachability) => {
                    if let Some(delegate) = self.delegate().await {
                        delegate.state_changed(reachability).await;
                    }
                }
                Effect::FireDeviceCachePrimed => {
                    if let Some(delegate) = self.delegate().await {
                        delegate.device_cache_primed().await;
                    }
                }
                Effect::FireDeviceBecameActive => {
                    if let Some(delegate) = self.delegate().await {
                        delegate.device_became_active().await;
                    }
                }
                Effect::ScheduleTimeSync(delay) => {
                    let device = self.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        device.run_time_sync_once().await;
                    });
                }
            }
        }
    }

    async fn check_unreachable_timeout(&self) {
        let effects = {
            let mut st = self.inner.state.lock().await;
            if st.subscription.state() == devshadow_domain::SubscriptionState::Subscribing
                && st.subscription.reachability() != ReachabilityState::Unreachable
            {
                st.subscription.on_establish_failure(None)
            } else {
                Vec::new()
            }
        };
        self.apply_effects(effects).await;
    }

    async fn handle_connectivity_kick(&self) {
        let effects = {
            let mut st = self.inner.state.lock().await;
            st.subscription.on_connectivity_kick()
        };
        self.apply_effects(effects).await;
    }

    async fn run_time_sync_once(&self) {
        let reachable = {
            let st = self.inner.state.lock().await;
            st.subscription.reachability() == ReachabilityState::Reachable
        };
        if !reachable {
            return;
        }
        let _time = self.inner.time.lock().await;
        let Some(session) = self.current_session().await else { return };

        let endpoints = {
            let st = self.inner.state.lock().await;
            let root_parts: Vec<EndpointId> = st
                .cluster_store
                .get(AttributePath::new(
                    devshadow_domain::ROOT_ENDPOINT,
                    devshadow_domain::wellknown::DESCRIPTOR_CLUSTER,
                    devshadow_domain::wellknown::DESCRIPTOR_PARTS_LIST,
                ))
                .into_iter()
                .flat_map(|v| match v {
                    DataValue::Array(items) => items
                        .into_iter()
                        .filter_map(|v| match v {
                            DataValue::UnsignedInt(n) => Some(EndpointId(n as u16)),
                            _ => None,
                        })
                        .collect::<Vec<_>>(),
                    _ => Vec::new(),
                })
                .collect();
            time_sync::time_sync_endpoints(&st.cluster_store, &root_parts)
        };

        let utc_us = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(0);
        let _ = time_sync::run_time_sync(self.inner.time_sync.as_ref(), &session, &endpoints, utc_us, 0).await;
    }

    async fn acquire_and_subscribe(&self) {
        {
            let st = self.inner.state.lock().await;
            if st.invalidated {
                return;
            }
        }
        let session = match self.inner.sessions.acquire_session(self.inner.node).await {
            Ok(session) => session,
            Err(SessionError { error, retry_delay }) => {
                tracing::debug!(node = %self.inner.node, error = %error, "session acquisition failed");
                let effects = {
                    let mut st = self.inner.state.lock().await;
                    st.subscription.on_establish_failure(retry_delay)
                };
                self.apply_effects(effects).await;
                return;
            }
        };

        let mut filters: Vec<DataVersionFilter> = {
            let st = self.inner.state.lock().await;
            st.cluster_store
                .data_version_map()
                .into_iter()
                .map(|(cluster, data_version)| DataVersionFilter { cluster, data_version })
                .collect()
        };

        let callbacks: Arc<dyn ReadClientCallbacks> = Arc::new(DeviceCallbacks { device: self.clone() });
        let max_interval = self
            .inner
            .overrides
            .subscription_interval_override
            .unwrap_or(self.inner.config.max_interval_ceiling)
            .clamp(self.inner.config.max_interval_floor, self.inner.config.max_interval_ceiling);

        loop {
            let attempt = self
                .inner
                .transport
                .start_subscription(&session, filters.clone(), self.inner.config.min_interval, max_interval, callbacks.clone())
                .await;
            match attempt {
                Ok(handle) => {
                    let mut st = self.inner.state.lock().await;
                    st.session = Some(session);
                    st.read_client = Some(handle);
                    return;
                }
                Err(TransportError::NoMemory) if !filters.is_empty() => {
                    filters.pop();
                    continue;
                }
                Err(err) => {
                    tracing::debug!(node = %self.inner.node, error = %err, "subscription start failed");
                    let effects = {
                        let mut st = self.inner.state.lock().await;
                        st.subscription.on_establish_failure(None)
                    };
                    self.apply_effects(effects).await;
                    return;
                }
            }
        }
    }

    async fn on_report_begin(&self) {
        let mut st = self.inner.state.lock().await;
        st.current_batch_historical = st.subscription.reachability() != ReachabilityState::Reachable;
    }

    async fn on_attribute_data(&self, items: Vec<AttributeDataItem>) {
        let (reports, config_changed) = {
            let mut st = self.inner.state.lock().await;
            if self.inner.overrides.force_report_on_match {
                st.cluster_store.apply_report_forced(items)
            } else {
                st.cluster_store.apply_report(items)
            }
        };
        self.deliver_attribute_reports(reports).await;
        if config_changed {
            self.fire_configuration_changed().await;
        }
    }

    async fn on_event_data(&self, items: Vec<EventDataItem>) {
        let historical = self.inner.state.lock().await.current_batch_historical;
        let reports: Vec<EventReportItem> = items
            .into_iter()
            .map(|e| EventReportItem {
                cluster: e.cluster,
                event_number: e.event_number,
                value: e.value,
                time_type: e.time_type,
                is_historical: historical,
            })
            .collect();
        if let Some(delegate) = self.delegate().await {
            delegate.received_event_report(reports).await;
        }
    }

    async fn on_report_end(&self) {
        let is_primed = {
            let mut st = self.inner.state.lock().await;
            st.current_batch_historical = false;
            st.cluster_store.is_primed()
        };
        let effects = {
            let mut st = self.inner.state.lock().await;
            st.subscription.note_cache_primed_if(is_primed)
        };
        self.apply_effects(effects).await;
        self.flush_dirty().await;
    }

    async fn on_error(&self, err: TransportError) {
        tracing::debug!(node = %self.inner.node, error = %err, "read-client error");
    }

    async fn on_resubscribe_needed(&self, _err: TransportError, retry_delay: Option<Duration>) {
        let effects = {
            let mut st = self.inner.state.lock().await;
            st.session = None;
            st.read_client = None;
            st.subscription.on_resubscription_needed(retry_delay)
        };
        self.apply_effects(effects).await;
    }

    async fn on_subscription_established(&self, _subscription_id: u64) {
        let is_primed = {
            let st = self.inner.state.lock().await;
            st.cluster_store.is_primed()
        };
        let effects = {
            let mut st = self.inner.state.lock().await;
            st.subscription.on_established(is_primed)
        };
        self.apply_effects(effects).await;
        self.kick_queue();
    }

    async fn on_unsolicited_message(&self) {
        let effects = {
            let mut st = self.inner.state.lock().await;
            st.subscription.on_unsolicited_message()
        };
        self.apply_effects(effects).await;
    }

    async fn on_done(&self) {
        let mut st = self.inner.state.lock().await;
        st.read_client = None;
    }

    async fn flush_dirty(&self) {
        let mut st = self.inner.state.lock().await;
        if let Err(err) = st.cluster_store.flush_to(self.inner.node, self.inner.storage.as_ref()).await {
            tracing::debug!(node = %self.inner.node, error = %err, "persisting cluster data failed");
        }
    }

    /// Read-through fallback (§4.4): when not reachable and the guard
    /// window has elapsed since the last failure, force a fresh session
    /// acquisition attempt outside the normal backoff schedule.
    pub async fn maybe_read_through_resubscribe(&self) {
        let should = {
            let st = self.inner.state.lock().await;
            st.subscription
                .should_attempt_read_through_resubscribe(self.inner.config.read_through_guard, Instant::now())
        };
        if should {
            self.acquire_and_subscribe().await;
        }
    }

    /// Runs one C2 sweep pass and schedules the next one, if any entries
    /// remain (§4.2).
    pub async fn sweep_expected_values(&self) {
        let (reports, next) = {
            let mut st = self.inner.state.lock().await;
            let cluster_store = &st.cluster_store;
            let (reports, next) = st
                .expected_cache
                .sweep(self.inner.config.expected_value_min_sweep, |p| cluster_store.get(p));
            (reports, next)
        };
        self.deliver_attribute_reports(reports).await;
        if let Some(delay) = next {
            let device = self.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                device.sweep_expected_values().await;
            });
        }
    }
}

struct DeviceCallbacks {
    device: Device,
}

#[async_trait]
impl ReadClientCallbacks for DeviceCallbacks {
    async fn on_report_begin(&self) {
        self.device.on_report_begin().await;
    }

    async fn on_attribute_data(&self, items: Vec<AttributeDataItem>) {
        self.device.on_attribute_data(items).await;
    }

    async fn on_event_data(&self, items: Vec<EventDataItem>) {
        self.device.on_event_data(items).await;
    }

    async fn on_report_end(&self) {
        self.device.on_report_end().await;
    }

    async fn on_error(&self, err: TransportError) {
        self.device.on_error(err).await;
    }

    async fn on_resubscribe_needed(&self, err: TransportError, retry_delay: Option<Duration>) {
        self.device.on_resubscribe_needed(err, retry_delay).await;
    }

    async fn on_subscription_established(&self, subscription_id: u64) {
        self.device.on_subscription_established(subscription_id).await;
    }

    async fn on_unsolicited_message(&self) {
        self.device.on_unsolicited_message().await;
    }

    async fn on_done(&self) {
        self.device.on_done().await;
    }
}
