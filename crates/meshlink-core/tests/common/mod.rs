// In-process fakes of every trait the core consumes.

#![allow(dead_code, clippy::unwrap_used)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use meshlink_api::{
    AddonConfig, AddonError, AddonInfo, AddonManager, ControllerEvent, HomeId, Node, NodeId,
    Transport, Value, ValueMetadata,
};
use meshlink_core::{
    AddonLifecycleGuard, CoreError, DiscoveryDescriptor, DiscoveryError, EntryConfig, EntryId,
    EntryRuntime, EventBus, HostServices, InMemoryDeviceRegistry, InMemoryEntityRegistry,
    Platform, PlatformHost, SessionNotice, TransportFactory, ValueDiscovery,
};
use secrecy::SecretString;
use tokio::sync::{Notify, broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

pub const HOME_ID: HomeId = 3_823_415_432;

/// Route core logs to the test output; `RUST_LOG=meshlink_core=debug`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_target(false)
        .with_test_writer()
        .try_init();
}

/// Shared, ordered record of what the fakes were asked to do.
#[derive(Clone, Default)]
pub struct Log(Arc<Mutex<Vec<String>>>);

impl Log {
    pub fn push(&self, line: impl Into<String>) {
        self.0.lock().unwrap().push(line.into());
    }

    pub fn lines(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, line: &str) -> usize {
        self.lines().iter().filter(|l| *l == line).count()
    }

    pub fn position(&self, line: &str) -> Option<usize> {
        self.lines().iter().position(|l| l == line)
    }
}

/// Pushes a line when dropped: marks where a future was cancelled.
struct DropMarker {
    log: Log,
    line: String,
    armed: bool,
}

impl Drop for DropMarker {
    fn drop(&mut self) {
        if self.armed {
            self.log.push(self.line.clone());
        }
    }
}

// ── Nodes ───────────────────────────────────────────────────────────

pub fn value(node_id: NodeId, cc: u8, property: &str) -> Value {
    Value {
        value_id: format!("{node_id}-{cc}-0-{property}"),
        command_class: cc,
        command_class_name: format!("CC {cc}"),
        endpoint: 0,
        property: serde_json::json!(property),
        property_name: Some(property.to_owned()),
        property_key: None,
        property_key_name: None,
        metadata: ValueMetadata::default(),
        value: None,
    }
}

/// A node exposing one binary-switch value and one sensor value.
pub fn node(node_id: NodeId, ready: bool) -> Arc<Node> {
    Arc::new(Node {
        node_id,
        ready,
        values: vec![value(node_id, 37, "currentValue"), value(node_id, 49, "Air temperature")],
        ..Node::default()
    })
}

// ── Transport ───────────────────────────────────────────────────────

/// How `connect` behaves.
#[derive(Clone)]
pub enum ConnectBehavior {
    Succeed,
    Fail(meshlink_api::Error),
    Hang,
    /// Succeeds once the notify fires.
    Wait(Arc<Notify>),
}

pub struct FakeTransport {
    pub log: Log,
    connect: Mutex<ConnectBehavior>,
    connected: AtomicBool,
    home_id: Mutex<Option<HomeId>>,
    nodes: Mutex<Vec<Arc<Node>>>,
    events: broadcast::Sender<ControllerEvent>,
    listen_end: Notify,
    listen_result: Mutex<Option<Result<(), meshlink_api::Error>>>,
    /// Fire `driver_ready` as soon as `listen` starts.
    auto_ready: AtomicBool,
    ready_gate: Notify,
}

impl FakeTransport {
    pub fn new(log: Log, nodes: Vec<Arc<Node>>) -> Arc<Self> {
        init_tracing();
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            log,
            connect: Mutex::new(ConnectBehavior::Succeed),
            connected: AtomicBool::new(false),
            home_id: Mutex::new(None),
            nodes: Mutex::new(nodes),
            events,
            listen_end: Notify::new(),
            listen_result: Mutex::new(None),
            auto_ready: AtomicBool::new(true),
            ready_gate: Notify::new(),
        })
    }

    pub fn set_connect(&self, behavior: ConnectBehavior) {
        *self.connect.lock().unwrap() = behavior;
    }

    /// Hold `driver_ready` until [`release_ready`](Self::release_ready).
    pub fn hold_ready(&self) {
        self.auto_ready.store(false, Ordering::SeqCst);
    }

    pub fn release_ready(&self) {
        self.ready_gate.notify_one();
    }

    pub fn set_nodes(&self, nodes: Vec<Arc<Node>>) {
        *self.nodes.lock().unwrap() = nodes;
    }

    /// Push a controller event to subscribers.
    pub fn emit(&self, event: ControllerEvent) {
        let _ = self.events.send(event);
    }

    /// End the running listen loop with `result`.
    pub fn end_listen(&self, result: Result<(), meshlink_api::Error>) {
        *self.listen_result.lock().unwrap() = Some(result);
        self.listen_end.notify_one();
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn connect(&self) -> Result<(), meshlink_api::Error> {
        self.log.push("connect");
        let behavior = self.connect.lock().unwrap().clone();
        match behavior {
            ConnectBehavior::Succeed => {
                self.connected.store(true, Ordering::SeqCst);
                Ok(())
            }
            ConnectBehavior::Fail(e) => Err(e),
            ConnectBehavior::Hang => {
                std::future::pending::<()>().await;
                Ok(())
            }
            ConnectBehavior::Wait(go) => {
                go.notified().await;
                self.connected.store(true, Ordering::SeqCst);
                Ok(())
            }
        }
    }

    async fn listen(&self, driver_ready: oneshot::Sender<()>) -> Result<(), meshlink_api::Error> {
        self.log.push("listen");
        let mut marker = DropMarker {
            log: self.log.clone(),
            line: "listen cancelled".into(),
            armed: true,
        };

        if !self.auto_ready.load(Ordering::SeqCst) {
            self.ready_gate.notified().await;
        }
        *self.home_id.lock().unwrap() = Some(HOME_ID);
        let _ = driver_ready.send(());

        self.listen_end.notified().await;
        marker.armed = false;
        self.connected.store(false, Ordering::SeqCst);
        self.listen_result.lock().unwrap().take().unwrap_or(Ok(()))
    }

    async fn disconnect(&self) {
        self.log.push("disconnect");
        self.connected.store(false, Ordering::SeqCst);
    }

    fn connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn subscribe(&self) -> broadcast::Receiver<ControllerEvent> {
        self.events.subscribe()
    }

    fn home_id(&self) -> Option<HomeId> {
        *self.home_id.lock().unwrap()
    }

    fn nodes(&self) -> Vec<Arc<Node>> {
        self.nodes.lock().unwrap().clone()
    }
}

/// Hands out pre-built transports, reusing the last one when it runs out.
pub struct FakeTransportFactory {
    transports: Mutex<Vec<Arc<FakeTransport>>>,
    last: Mutex<Option<Arc<FakeTransport>>>,
    pub created: AtomicUsize,
}

impl FakeTransportFactory {
    pub fn new(transports: Vec<Arc<FakeTransport>>) -> Arc<Self> {
        Arc::new(Self {
            transports: Mutex::new(transports.into_iter().rev().collect()),
            last: Mutex::new(None),
            created: AtomicUsize::new(0),
        })
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Transport handed out by the latest `create`.
    pub fn current(&self) -> Arc<FakeTransport> {
        self.last.lock().unwrap().clone().unwrap()
    }
}

impl TransportFactory for FakeTransportFactory {
    fn create(&self, _config: &EntryConfig) -> Arc<dyn Transport> {
        self.created.fetch_add(1, Ordering::SeqCst);
        let next = self.transports.lock().unwrap().pop();
        let transport = match next {
            Some(t) => t,
            None => self.current(),
        };
        *self.last.lock().unwrap() = Some(Arc::clone(&transport));
        transport
    }
}

// ── Add-on manager ──────────────────────────────────────────────────

pub struct FakeAddonManager {
    pub log: Log,
    pub info: Mutex<Result<AddonInfo, AddonError>>,
    /// Operations named here fail.
    pub failing: Mutex<Vec<&'static str>>,
    /// Background operations block until released.
    pub gate: Mutex<Option<Arc<Notify>>>,
}

impl FakeAddonManager {
    pub fn new(log: Log, info: AddonInfo) -> Arc<Self> {
        Arc::new(Self {
            log,
            info: Mutex::new(Ok(info)),
            failing: Mutex::new(Vec::new()),
            gate: Mutex::new(None),
        })
    }

    pub fn fail(&self, op: &'static str) {
        self.failing.lock().unwrap().push(op);
    }

    fn step(&self, op: &'static str) -> Result<(), String> {
        self.log.push(format!("addon {op}"));
        if self.failing.lock().unwrap().contains(&op) {
            Err(format!("{op} refused"))
        } else {
            Ok(())
        }
    }

    async fn gated(&self) {
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
    }
}

#[async_trait]
impl AddonManager for FakeAddonManager {
    async fn addon_info(&self) -> Result<AddonInfo, AddonError> {
        self.info.lock().unwrap().clone()
    }

    async fn install(&self) -> Result<(), AddonError> {
        self.gated().await;
        self.step("install").map_err(AddonError::Install)?;
        self.info.lock().unwrap().as_mut().unwrap().installed = true;
        Ok(())
    }

    async fn set_options(&self, _config: &AddonConfig) -> Result<(), AddonError> {
        self.step("set_options").map_err(AddonError::SetOptions)
    }

    async fn start(&self) -> Result<(), AddonError> {
        self.gated().await;
        self.step("start").map_err(AddonError::Start)?;
        self.info.lock().unwrap().as_mut().unwrap().running = true;
        Ok(())
    }

    async fn stop(&self) -> Result<(), AddonError> {
        self.step("stop").map_err(AddonError::Stop)
    }

    async fn update(&self) -> Result<(), AddonError> {
        self.step("update").map_err(AddonError::Update)
    }

    async fn create_snapshot(&self) -> Result<(), AddonError> {
        self.step("snapshot").map_err(AddonError::Snapshot)
    }

    async fn uninstall(&self) -> Result<(), AddonError> {
        self.step("uninstall").map_err(AddonError::Uninstall)
    }
}

pub fn addon_config() -> AddonConfig {
    AddonConfig {
        usb_path: "/dev/ttyACM0".into(),
        network_key: SecretString::from("0123456789abcdef".to_owned()),
    }
}

// ── Platform host ───────────────────────────────────────────────────

pub struct FakePlatformHost {
    pub log: Log,
    setups: Mutex<HashMap<Platform, usize>>,
    /// Setups block until this is notified.
    pub gate: Mutex<Option<Arc<Notify>>>,
    pub failing: Mutex<Vec<Platform>>,
    /// Platforms whose unload reports `false`.
    pub refusing: Mutex<Vec<Platform>>,
    /// Unloads block until this is notified.
    pub unload_gate: Mutex<Option<Arc<Notify>>>,
    pub delay: Mutex<Option<Duration>>,
}

impl FakePlatformHost {
    pub fn new(log: Log) -> Arc<Self> {
        Arc::new(Self {
            log,
            setups: Mutex::new(HashMap::new()),
            gate: Mutex::new(None),
            failing: Mutex::new(Vec::new()),
            refusing: Mutex::new(Vec::new()),
            unload_gate: Mutex::new(None),
            delay: Mutex::new(None),
        })
    }

    pub fn setups(&self, platform: Platform) -> usize {
        self.setups.lock().unwrap().get(&platform).copied().unwrap_or(0)
    }

    pub fn block(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    pub fn block_unload(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.unload_gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }
}

#[async_trait]
impl PlatformHost for FakePlatformHost {
    async fn setup_platform(&self, _entry_id: &EntryId, platform: Platform) -> Result<(), CoreError> {
        *self.setups.lock().unwrap().entry(platform).or_default() += 1;
        self.log.push(format!("setup {platform}"));

        let mut marker = DropMarker {
            log: self.log.clone(),
            line: format!("setup {platform} cancelled"),
            armed: true,
        };
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        marker.armed = false;

        if self.failing.lock().unwrap().contains(&platform) {
            return Err(CoreError::Internal(format!("{platform} exploded")));
        }
        Ok(())
    }

    async fn unload_platform(&self, _entry_id: &EntryId, platform: Platform) -> Result<bool, CoreError> {
        self.log.push(format!("unload {platform}"));
        let gate = self.unload_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        Ok(!self.refusing.lock().unwrap().contains(&platform))
    }
}

// ── Discovery ───────────────────────────────────────────────────────

/// Maps command class 37 to a switch and 49 to a sensor; errors on 0xFF.
pub struct RecordingDiscovery {
    pub passes: Mutex<Vec<NodeId>>,
}

impl RecordingDiscovery {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            passes: Mutex::new(Vec::new()),
        })
    }

    pub fn passes_for(&self, node_id: NodeId) -> usize {
        self.passes.lock().unwrap().iter().filter(|n| **n == node_id).count()
    }
}

impl ValueDiscovery for RecordingDiscovery {
    fn discover<'a>(
        &'a self,
        node: &'a Node,
    ) -> Box<dyn Iterator<Item = Result<DiscoveryDescriptor, DiscoveryError>> + Send + 'a> {
        self.passes.lock().unwrap().push(node.node_id);
        Box::new(node.values.iter().filter_map(move |v| {
            let platform = match v.command_class {
                37 => Platform::Switch,
                49 => Platform::Sensor,
                0xFF => {
                    return Some(Err(DiscoveryError::InvalidValue {
                        value_id: v.value_id.clone(),
                        reason: "unsupported".into(),
                    }));
                }
                _ => return None,
            };
            Some(Ok(DiscoveryDescriptor {
                node_id: node.node_id,
                platform,
                platform_hint: None,
                primary_value: v.clone(),
                legacy_value_ids: Vec::new(),
            }))
        }))
    }
}

// ── Harness ─────────────────────────────────────────────────────────

pub struct Harness {
    pub log: Log,
    pub transports: Arc<FakeTransportFactory>,
    pub platforms: Arc<FakePlatformHost>,
    pub discovery: Arc<RecordingDiscovery>,
    pub devices: Arc<InMemoryDeviceRegistry>,
    pub entities: Arc<InMemoryEntityRegistry>,
    pub addon: Option<Arc<FakeAddonManager>>,
    pub bus: EventBus,
}

impl Harness {
    pub fn new(transports: Vec<Arc<FakeTransport>>) -> Self {
        init_tracing();
        let log = transports
            .first()
            .map(|t| t.log.clone())
            .unwrap_or_default();
        Self {
            platforms: FakePlatformHost::new(log.clone()),
            log,
            transports: FakeTransportFactory::new(transports),
            discovery: RecordingDiscovery::new(),
            devices: Arc::new(InMemoryDeviceRegistry::new()),
            entities: Arc::new(InMemoryEntityRegistry::new()),
            addon: None,
            bus: EventBus::new(64),
        }
    }

    pub fn with_addon(mut self, info: AddonInfo) -> Self {
        self.addon = Some(FakeAddonManager::new(self.log.clone(), info));
        self
    }

    pub fn services(&self) -> HostServices {
        HostServices {
            transports: self.transports.clone(),
            addon: self.addon.as_ref().map(|m| {
                let manager: Arc<dyn AddonManager> = m.clone();
                Arc::new(AddonLifecycleGuard::new(manager))
            }),
            devices: self.devices.clone(),
            entities: self.entities.clone(),
            discovery: self.discovery.clone(),
            platforms: self.platforms.clone(),
            bus: self.bus.clone(),
        }
    }
}

pub fn entry_config() -> EntryConfig {
    EntryConfig::new("main", "ws://localhost:3000".parse().unwrap())
}

/// Let spawned tasks run until they block.
pub async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

/// Poll `cond` until it holds, failing the test after ~2s.
pub async fn eventually(mut cond: impl FnMut() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

/// An entry runtime started outside a supervisor.
pub struct Started {
    pub runtime: EntryRuntime,
    pub notices: mpsc::UnboundedReceiver<SessionNotice>,
    pub cancel: CancellationToken,
}

/// Set up an entry on the harness and wait for the driver to load.
pub async fn start_entry(h: &Harness) -> Started {
    let (tx, notices) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();
    let runtime = EntryRuntime::setup(h.services(), entry_config(), 1, &cancel, tx)
        .await
        .unwrap();
    let transport = h.transports.current();
    eventually(|| transport.home_id().is_some()).await;
    settle().await;
    Started {
        runtime,
        notices,
        cancel,
    }
}
