// ABOUTME: Test support utilities.
// ABOUTME: In-memory Docker and Kubernetes fakes plus a recording reporter.

#![allow(dead_code)]

use async_trait::async_trait;
use futures::StreamExt;
use futures::channel::mpsc;
use k8s_openapi::api::core::v1::{Pod, PodStatus, Service};
use kube::api::WatchEvent;
use kube_compose::cluster::{ClusterError, ClusterOps, EventStream, LineStream, Listing};
use kube_compose::deploy::AppStatus;
use kube_compose::deploy::manifest::service_of;
use kube_compose::output::Reporter;
use kube_compose::runtime::{
    ContainerError, ContainerOps, ImageDetails, ImageError, ImageOps, LocalImage, TransferMessage,
    TransferStream,
};
use kube_compose::types::{ContainerId, ImageId, ImageRef};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Once;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

static TRACING_INIT: Once = Once::new();

/// Initialize tracing for tests. Safe to call multiple times.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::EnvFilter;
        let filter = EnvFilter::from_default_env()
            .add_directive("kube_compose=debug".parse().unwrap());
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// Poll `condition` until it holds, panicking after a few seconds.
pub async fn eventually(what: &str, mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

// =============================================================================
// Docker
// =============================================================================

/// An image a fake registry can serve.
#[derive(Clone)]
struct RemoteImage {
    image: LocalImage,
    details: ImageDetails,
}

#[derive(Default)]
pub struct FakeDocker {
    images: Mutex<Vec<LocalImage>>,
    details: Mutex<HashMap<String, ImageDetails>>,
    remote: Mutex<HashMap<String, RemoteImage>>,
    files: Mutex<HashMap<String, String>>,
    pub tags: Mutex<Vec<(String, String)>>,
    pub builds: Mutex<Vec<(String, Vec<u8>)>>,
    pub pushes: Mutex<Vec<String>>,
    pulls: AtomicUsize,
    inspects: AtomicUsize,
    containers: AtomicUsize,
    removed: AtomicUsize,
    failing_removes: AtomicBool,
    stalled_copies: AtomicBool,
    panicking_inspects: Mutex<HashSet<String>>,
}

pub fn details(cmd: &[&str]) -> ImageDetails {
    ImageDetails {
        cmd: cmd.iter().map(|s| s.to_string()).collect(),
        ..Default::default()
    }
}

impl FakeDocker {
    pub fn new() -> Self {
        Self::default()
    }

    /// An image already present in the daemon.
    pub fn with_local_image(self, id: &str, repo_tag: &str, details: ImageDetails) -> Self {
        self.images.lock().push(LocalImage {
            id: ImageId::new(id),
            repo_tags: vec![repo_tag.to_string()],
            repo_digests: vec![],
        });
        self.details.lock().insert(id.to_string(), details);
        self
    }

    /// An image only the registry has; pulling `reference` yields `digest`.
    pub fn with_remote_image(
        self,
        reference: &str,
        id: &str,
        digest: &str,
        details: ImageDetails,
    ) -> Self {
        let repository = reference.split(':').next().unwrap_or(reference);
        self.remote.lock().insert(
            reference.to_string(),
            RemoteImage {
                image: LocalImage {
                    id: ImageId::new(id),
                    repo_tags: vec![reference.to_string()],
                    repo_digests: vec![format!("{repository}@{digest}")],
                },
                details,
            },
        );
        self
    }

    /// A file readable from containers of any image.
    pub fn with_file(self, path: &str, content: &str) -> Self {
        self.files.lock().insert(path.to_string(), content.to_string());
        self
    }

    /// Removing containers fails with a daemon error.
    pub fn with_failing_remove(self) -> Self {
        self.failing_removes.store(true, Ordering::SeqCst);
        self
    }

    /// Copying files out of containers never finishes.
    pub fn with_stalled_copy(self) -> Self {
        self.stalled_copies.store(true, Ordering::SeqCst);
        self
    }

    /// Inspecting the image `id` panics.
    pub fn with_panicking_inspect(self, id: &str) -> Self {
        self.panicking_inspects.lock().insert(id.to_string());
        self
    }

    pub fn pull_count(&self) -> usize {
        self.pulls.load(Ordering::SeqCst)
    }

    pub fn inspect_count(&self) -> usize {
        self.inspects.load(Ordering::SeqCst)
    }

    pub fn containers_created(&self) -> usize {
        self.containers.load(Ordering::SeqCst)
    }

    pub fn containers_removed(&self) -> usize {
        self.removed.load(Ordering::SeqCst)
    }
}

fn transfer_stream(messages: Vec<Result<TransferMessage, ImageError>>) -> TransferStream {
    futures::stream::iter(messages).boxed()
}

#[async_trait]
impl ImageOps for FakeDocker {
    async fn list_images(&self) -> Result<Vec<LocalImage>, ImageError> {
        Ok(self.images.lock().clone())
    }

    async fn inspect_image(&self, reference: &str) -> Result<ImageDetails, ImageError> {
        self.inspects.fetch_add(1, Ordering::SeqCst);
        if self.panicking_inspects.lock().contains(reference) {
            panic!("inspecting {reference} blew up");
        }
        self.details
            .lock()
            .get(reference)
            .cloned()
            .ok_or_else(|| ImageError::NotFound(reference.to_string()))
    }

    fn pull_image(&self, reference: &ImageRef) -> TransferStream {
        self.pulls.fetch_add(1, Ordering::SeqCst);
        let key = reference.to_string();
        let Some(remote) = self.remote.lock().get(&key).cloned() else {
            return transfer_stream(vec![Err(ImageError::PullFailed(format!(
                "{key}: manifest unknown"
            )))]);
        };

        let digest = remote.image.repo_digests[0]
            .split_once('@')
            .map(|(_, d)| d.to_string())
            .unwrap_or_default();
        self.images.lock().push(remote.image.clone());
        self.details
            .lock()
            .insert(remote.image.id.as_str().to_string(), remote.details);

        transfer_stream(vec![
            Ok(TransferMessage::status("Pulling from library/app")),
            Ok(TransferMessage::layer("l1", "Pulling fs layer")),
            Ok(TransferMessage::layer("l2", "Pulling fs layer")),
            Ok(TransferMessage::layer("l1", "Downloading").with_progress(50, 100)),
            Ok(TransferMessage::layer("l2", "Already exists")),
            Ok(TransferMessage::layer("l1", "Downloading").with_progress(100, 100)),
            Ok(TransferMessage::layer("l1", "Extracting").with_progress(10, 10)),
            Ok(TransferMessage::layer("l1", "Pull complete")),
            Ok(TransferMessage::status(&format!("Digest: {digest}"))),
            Ok(TransferMessage::status(&format!("Status: Downloaded newer image for {key}"))),
        ])
    }

    fn push_image(&self, reference: &ImageRef) -> TransferStream {
        self.pushes.lock().push(reference.to_string());
        let tag = reference.tag().unwrap_or("latest").to_string();
        transfer_stream(vec![
            Ok(TransferMessage::status(&format!(
                "The push refers to repository [{}]",
                reference.name()
            ))),
            Ok(TransferMessage::status("Preparing")),
            Ok(TransferMessage::status(&format!(
                "{tag}: digest: sha256:5e1ec7 size: 1570"
            ))),
        ])
    }

    async fn tag_image(&self, source: &ImageId, target: &ImageRef) -> Result<(), ImageError> {
        self.tags
            .lock()
            .push((source.as_str().to_string(), target.to_string()));
        Ok(())
    }

    async fn build_image(&self, context: Vec<u8>, tag: &ImageRef) -> Result<(), ImageError> {
        self.builds.lock().push((tag.to_string(), context));
        Ok(())
    }
}

#[async_trait]
impl ContainerOps for FakeDocker {
    async fn create_container(&self, _image: &ImageId) -> Result<ContainerId, ContainerError> {
        let n = self.containers.fetch_add(1, Ordering::SeqCst);
        Ok(ContainerId::new(format!("c{n}")))
    }

    async fn remove_container(&self, _id: &ContainerId) -> Result<(), ContainerError> {
        self.removed.fetch_add(1, Ordering::SeqCst);
        if self.failing_removes.load(Ordering::SeqCst) {
            return Err(ContainerError::Runtime("removal of container is already in progress".to_string()));
        }
        Ok(())
    }

    async fn copy_from_container(
        &self,
        _id: &ContainerId,
        path: &str,
    ) -> Result<Vec<u8>, ContainerError> {
        if self.stalled_copies.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let content = self
            .files
            .lock()
            .get(path)
            .cloned()
            .ok_or_else(|| ContainerError::PathNotFound(path.to_string()))?;
        let name = path.rsplit('/').next().unwrap_or(path);
        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        builder
            .append_data(&mut header, name, content.as_bytes())
            .map_err(|e| ContainerError::Runtime(e.to_string()))?;
        builder
            .into_inner()
            .map_err(|e| ContainerError::Runtime(e.to_string()))
    }
}

// =============================================================================
// Kubernetes
// =============================================================================

type Sender<K> = mpsc::UnboundedSender<Result<WatchEvent<K>, ClusterError>>;

/// Objects of one kind with an event log; the resource version is the log length.
pub struct ObjectStore<K> {
    inner: Mutex<StoreInner<K>>,
}

struct StoreInner<K> {
    objects: BTreeMap<String, K>,
    log: Vec<WatchEvent<K>>,
    watchers: Vec<Sender<K>>,
}

impl<K> Default for ObjectStore<K> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(StoreInner {
                objects: BTreeMap::new(),
                log: Vec::new(),
                watchers: Vec::new(),
            }),
        }
    }
}

impl<K> ObjectStore<K>
where
    K: kube::Resource + Clone + Send + 'static,
{
    fn emit(inner: &mut StoreInner<K>, event: WatchEvent<K>) {
        inner.log.push(event.clone());
        inner
            .watchers
            .retain(|tx| tx.unbounded_send(Ok(event.clone())).is_ok());
    }

    pub fn list(&self, selector: &str) -> Listing<K> {
        let inner = self.inner.lock();
        let (key, value) = selector.split_once('=').unwrap_or((selector, ""));
        let items = inner
            .objects
            .values()
            .filter(|obj| {
                obj.meta()
                    .labels
                    .as_ref()
                    .and_then(|l| l.get(key))
                    .is_some_and(|v| v == value)
            })
            .cloned()
            .collect();
        Listing {
            items,
            resource_version: inner.log.len().to_string(),
        }
    }

    /// Replay every event after `resource_version`, then stream new ones.
    pub fn watch(&self, resource_version: &str) -> EventStream<K> {
        let mut inner = self.inner.lock();
        let from: usize = resource_version.parse().unwrap_or(0);
        let (tx, rx) = mpsc::unbounded();
        for event in inner.log.iter().skip(from) {
            let _ = tx.unbounded_send(Ok(event.clone()));
        }
        inner.watchers.push(tx);
        rx.boxed()
    }

    pub fn insert(&self, obj: K) -> Result<(), ClusterError> {
        let name = obj.meta().name.clone().unwrap_or_default();
        let mut inner = self.inner.lock();
        if inner.objects.contains_key(&name) {
            return Err(ClusterError::AlreadyExists(name));
        }
        inner.objects.insert(name, obj.clone());
        Self::emit(&mut inner, WatchEvent::Added(obj));
        Ok(())
    }

    pub fn update(&self, name: &str, f: impl FnOnce(&mut K)) {
        let mut inner = self.inner.lock();
        let Some(obj) = inner.objects.get_mut(name) else {
            panic!("no object named {name}");
        };
        f(obj);
        let obj = obj.clone();
        Self::emit(&mut inner, WatchEvent::Modified(obj));
    }

    pub fn remove(&self, name: &str) -> Result<(), ClusterError> {
        let mut inner = self.inner.lock();
        let obj = inner
            .objects
            .remove(name)
            .ok_or_else(|| ClusterError::NotFound(name.to_string()))?;
        Self::emit(&mut inner, WatchEvent::Deleted(obj));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<K> {
        self.inner.lock().objects.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.lock().objects.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().objects.len()
    }

    /// Whether anyone is watching.
    pub fn is_watched(&self) -> bool {
        !self.inner.lock().watchers.is_empty()
    }

    /// End every open watch stream.
    pub fn close_watches(&self) {
        self.inner.lock().watchers.clear();
    }
}

/// What the fake kubelet does with a newly created Pod.
#[derive(Debug, Clone)]
pub enum PodBehavior {
    Ready,
    Started,
    Pending,
    Terminated { reason: String, exit_code: i32 },
}

/// A Pod status showing the given behavior for `container`.
pub fn pod_status(container: &str, behavior: &PodBehavior) -> PodStatus {
    let running = json!({ "running": {} });
    let (ready, state) = match behavior {
        PodBehavior::Ready => (true, running),
        PodBehavior::Started => (false, running),
        PodBehavior::Pending => return serde_json::from_value(json!({ "phase": "Pending" })).unwrap(),
        PodBehavior::Terminated { reason, exit_code } => (
            false,
            json!({ "terminated": { "exitCode": exit_code, "reason": reason } }),
        ),
    };
    serde_json::from_value(json!({
        "phase": "Running",
        "conditions": [{ "type": "Ready", "status": if ready { "True" } else { "False" } }],
        "containerStatuses": [{
            "name": container,
            "image": "",
            "imageID": "",
            "ready": ready,
            "restartCount": 0,
            "state": state,
        }],
    }))
    .unwrap()
}

#[derive(Default)]
pub struct FakeCluster {
    pub pods: ObjectStore<Pod>,
    pub services: ObjectStore<Service>,
    behaviors: Mutex<HashMap<String, PodBehavior>>,
    logs: Mutex<HashMap<(String, String), Vec<String>>>,
    failing_deletes: Mutex<HashSet<String>>,
    pub pod_creations: Mutex<Vec<String>>,
    pub log_requests: Mutex<Vec<(String, String)>>,
    next_ip: AtomicUsize,
    pending_ips: AtomicBool,
    unlisted: Mutex<HashSet<String>>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// How Pods of `service` behave once created (default: Ready).
    pub fn with_behavior(self, service: &str, behavior: PodBehavior) -> Self {
        self.behaviors.lock().insert(service.to_string(), behavior);
        self
    }

    pub fn with_logs(self, pod: &str, container: &str, lines: &[&str]) -> Self {
        self.logs.lock().insert(
            (pod.to_string(), container.to_string()),
            lines.iter().map(|l| l.to_string()).collect(),
        );
        self
    }

    /// Services start without a cluster IP until `assign_cluster_ip`.
    pub fn with_pending_cluster_ips(self) -> Self {
        self.pending_ips.store(true, Ordering::SeqCst);
        self
    }

    /// Leave the object `name` out of list responses; watches still see it.
    pub fn with_unlisted(self, name: &str) -> Self {
        self.unlisted.lock().insert(name.to_string());
        self
    }

    /// Give a Service its cluster IP as the API server would.
    pub fn assign_cluster_ip(&self, service: &str) {
        let ip = self.next_cluster_ip();
        self.services.update(service, |s| {
            if let Some(spec) = s.spec.as_mut() {
                spec.cluster_ip = Some(ip);
            }
        });
    }

    fn next_cluster_ip(&self) -> String {
        let n = self.next_ip.fetch_add(1, Ordering::SeqCst) + 1;
        format!("10.96.0.{n}")
    }

    fn listed<K: kube::Resource>(&self, mut listing: Listing<K>) -> Listing<K> {
        let unlisted = self.unlisted.lock();
        listing
            .items
            .retain(|obj| !obj.meta().name.as_ref().is_some_and(|n| unlisted.contains(n)));
        listing
    }

    pub fn with_failing_delete(self, name: &str) -> Self {
        self.failing_deletes.lock().insert(name.to_string());
        self
    }

    /// Change a Pod's status as the kubelet would.
    pub fn set_pod_behavior(&self, pod: &str, behavior: PodBehavior) {
        self.pods.update(pod, |p| {
            let container = first_container(p);
            p.status = Some(pod_status(&container, &behavior));
        });
    }

    pub fn pod_json(&self, name: &str) -> serde_json::Value {
        serde_json::to_value(self.pods.get(name).expect("pod exists")).unwrap()
    }
}

fn first_container(pod: &Pod) -> String {
    pod.spec
        .as_ref()
        .and_then(|s| s.containers.first())
        .map(|c| c.name.clone())
        .unwrap_or_default()
}

#[async_trait]
impl ClusterOps for FakeCluster {
    async fn list_pods(&self, selector: &str) -> Result<Listing<Pod>, ClusterError> {
        Ok(self.listed(self.pods.list(selector)))
    }

    async fn watch_pods(
        &self,
        _selector: &str,
        resource_version: &str,
    ) -> Result<EventStream<Pod>, ClusterError> {
        Ok(self.pods.watch(resource_version))
    }

    async fn create_pod(&self, pod: &Pod) -> Result<(), ClusterError> {
        let mut pod = pod.clone();
        let name = pod.metadata.name.clone().unwrap_or_default();
        self.pod_creations.lock().push(name);
        let behavior = service_of(&pod.metadata)
            .and_then(|service| self.behaviors.lock().get(service).cloned())
            .unwrap_or(PodBehavior::Ready);
        pod.status = Some(pod_status(&first_container(&pod), &behavior));
        self.pods.insert(pod)
    }

    async fn delete_pod(&self, name: &str) -> Result<(), ClusterError> {
        if self.failing_deletes.lock().contains(name) {
            return Err(ClusterError::Api {
                code: 403,
                message: "forbidden".to_string(),
            });
        }
        self.pods.remove(name)
    }

    async fn list_services(&self, selector: &str) -> Result<Listing<Service>, ClusterError> {
        Ok(self.listed(self.services.list(selector)))
    }

    async fn watch_services(
        &self,
        _selector: &str,
        resource_version: &str,
    ) -> Result<EventStream<Service>, ClusterError> {
        Ok(self.services.watch(resource_version))
    }

    async fn create_service(&self, service: &Service) -> Result<(), ClusterError> {
        let mut service = service.clone();
        if !self.pending_ips.load(Ordering::SeqCst)
            && let Some(spec) = service.spec.as_mut()
        {
            spec.cluster_ip = Some(self.next_cluster_ip());
        }
        self.services.insert(service)
    }

    async fn delete_service(&self, name: &str) -> Result<(), ClusterError> {
        if self.failing_deletes.lock().contains(name) {
            return Err(ClusterError::Api {
                code: 403,
                message: "forbidden".to_string(),
            });
        }
        self.services.remove(name)
    }

    async fn pod_logs(&self, pod: &str, container: &str) -> Result<LineStream, ClusterError> {
        let key = (pod.to_string(), container.to_string());
        self.log_requests.lock().push(key.clone());
        let lines = self.logs.lock().get(&key).cloned().unwrap_or_default();
        Ok(futures::stream::iter(lines.into_iter().map(Ok)).boxed())
    }
}

// =============================================================================
// Reporter
// =============================================================================

#[derive(Default)]
pub struct RecordingReporter {
    pub statuses: Mutex<Vec<(String, AppStatus)>>,
    pub progress: Mutex<Vec<(String, String, f64)>>,
    pub lines: Mutex<Vec<(String, String)>>,
}

impl Reporter for RecordingReporter {
    fn status(&self, app: &str, status: AppStatus) {
        self.statuses.lock().push((app.to_string(), status));
    }

    fn progress(&self, app: &str, stage: &str, fraction: f64) {
        self.progress
            .lock()
            .push((app.to_string(), stage.to_string(), fraction));
    }

    fn log_line(&self, app: &str, _prefix: &str, line: &str) {
        self.lines.lock().push((app.to_string(), line.to_string()));
    }
}
