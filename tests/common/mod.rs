//! Shared in-memory fakes for integration tests
//!
//! Every test builds an isolated `PhoneManager` wired to these fakes; there
//! is no shared process-wide state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc;

use webphone_core::provider::{
    CallLogQuery, ExtensionInfo, KeyValueStore, PhoneNumberInfo, RawCallLogPage, RawCallLogRecord,
    RawCallParty, RawPaging, SignalingTransport, TelephonyApi, TokenBundle, TransportEvent,
    TransportFactory, TransportRegistration,
};
use webphone_core::{AuthConfig, ClientError, ClientResult, PhoneBuilder, PhoneManager};

// ===== DURABLE STORE =====

#[derive(Default)]
pub struct MemoryStore {
    pub data: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn contains(&self, key: &str) -> bool {
        self.data.lock().unwrap().contains_key(key)
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.data.lock().unwrap().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.data
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> anyhow::Result<()> {
        self.data.lock().unwrap().remove(key);
        Ok(())
    }
}

// ===== PLATFORM API =====

pub struct FakeApi {
    pub exchanges: AtomicUsize,
    pub refreshes: AtomicUsize,
    pub extension_fetches: AtomicUsize,
    pub number_fetches: AtomicUsize,
    pub provisions: AtomicUsize,
    pub call_log_fetches: AtomicUsize,
    pub revocations: Mutex<Vec<String>>,
    pub fail_exchange: AtomicBool,
    pub fail_refresh: AtomicBool,
    pub quota_on_provision: AtomicBool,
    pub fail_call_log: AtomicBool,
    pub call_log_pages: Mutex<Vec<RawCallLogPage>>,
}

impl FakeApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            exchanges: AtomicUsize::new(0),
            refreshes: AtomicUsize::new(0),
            extension_fetches: AtomicUsize::new(0),
            number_fetches: AtomicUsize::new(0),
            provisions: AtomicUsize::new(0),
            call_log_fetches: AtomicUsize::new(0),
            revocations: Mutex::new(Vec::new()),
            fail_exchange: AtomicBool::new(false),
            fail_refresh: AtomicBool::new(false),
            quota_on_provision: AtomicBool::new(false),
            fail_call_log: AtomicBool::new(false),
            call_log_pages: Mutex::new(vec![default_page()]),
        })
    }
}

pub fn default_page() -> RawCallLogPage {
    RawCallLogPage {
        records: vec![
            raw_record("r1", "Inbound", "Completed", "+15550101", "+15550199"),
            raw_record("r2", "Outbound", "Missed", "+15550199", "+15550102"),
        ],
        paging: Some(RawPaging {
            page: Some(1),
            per_page: Some(50),
            total_elements: Some(2),
        }),
    }
}

pub fn raw_record(
    id: &str,
    direction: &str,
    result: &str,
    from: &str,
    to: &str,
) -> RawCallLogRecord {
    RawCallLogRecord {
        id: Some(id.to_string()),
        session_id: None,
        start_time: Some(Utc::now()),
        duration: Some(30),
        direction: Some(direction.to_string()),
        result: Some(result.to_string()),
        from: Some(RawCallParty {
            phone_number: Some(from.to_string()),
            extension_number: None,
            name: None,
            location: None,
        }),
        to: Some(RawCallParty {
            phone_number: Some(to.to_string()),
            extension_number: None,
            name: None,
            location: None,
        }),
        transport: Some("VoIP".to_string()),
        recording: None,
        billing: None,
    }
}

#[async_trait]
impl TelephonyApi for FakeApi {
    async fn exchange_assertion(&self, _assertion: &str) -> ClientResult<TokenBundle> {
        if self.fail_exchange.load(Ordering::SeqCst) {
            return Err(ClientError::authentication_failed("assertion rejected"));
        }
        let n = self.exchanges.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(TokenBundle {
            access_token: format!("access-{}", n),
            refresh_token: Some(format!("refresh-{}", n)),
            expires_in_secs: 3600,
        })
    }

    async fn refresh_token(&self, refresh_token: &str) -> ClientResult<TokenBundle> {
        if self.fail_refresh.load(Ordering::SeqCst) {
            return Err(ClientError::authentication_failed("refresh token revoked"));
        }
        let n = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(TokenBundle {
            access_token: format!("refreshed-{}", n),
            refresh_token: Some(format!("{}+{}", refresh_token, n)),
            expires_in_secs: 3600,
        })
    }

    async fn fetch_extension(&self, _token: &str) -> ClientResult<ExtensionInfo> {
        self.extension_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(ExtensionInfo {
            id: "ext-1".to_string(),
            name: Some("Front Desk".to_string()),
            extension_number: Some("101".to_string()),
        })
    }

    async fn list_phone_numbers(&self, _token: &str) -> ClientResult<Vec<PhoneNumberInfo>> {
        self.number_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(vec![
            PhoneNumberInfo {
                number: "+15550002".to_string(),
                primary: false,
                caller_id_capable: true,
                label: Some("Support".to_string()),
            },
            PhoneNumberInfo {
                number: "+15550001".to_string(),
                primary: true,
                caller_id_capable: true,
                label: Some("Main".to_string()),
            },
        ])
    }

    async fn provision_transport(&self, _token: &str) -> ClientResult<TransportRegistration> {
        if self.quota_on_provision.load(Ordering::SeqCst) {
            return Err(ClientError::session_quota_exceeded(
                "too many registered devices",
            ));
        }
        let n = self.provisions.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(TransportRegistration {
            outbound_proxy: "wss://sip.example.com:8083".to_string(),
            transport_user: "user".to_string(),
            transport_password: "pass".to_string(),
            authorization_id: None,
            device_id: format!("device-{}", n),
            expires_secs: Some(3600),
        })
    }

    async fn revoke_transport(&self, _token: &str, device_id: &str) -> ClientResult<()> {
        self.revocations.lock().unwrap().push(device_id.to_string());
        Ok(())
    }

    async fn fetch_call_log(
        &self,
        _token: &str,
        query: &CallLogQuery,
    ) -> ClientResult<RawCallLogPage> {
        self.call_log_fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail_call_log.load(Ordering::SeqCst) {
            return Err(ClientError::network_error("platform unreachable"));
        }
        let pages = self.call_log_pages.lock().unwrap();
        Ok(pages
            .get((query.page - 1) as usize)
            .cloned()
            .unwrap_or_default())
    }

    async fn fetch_recording(&self, _token: &str, _recording_id: &str) -> ClientResult<Vec<u8>> {
        Ok(vec![0x52, 0x49, 0x46, 0x46])
    }
}

// ===== SIGNALING TRANSPORT =====

pub struct FakeTransport {
    pub ops: Mutex<Vec<String>>,
    pub fail_calls: AtomicBool,
    pub disposed: AtomicBool,
    events: mpsc::UnboundedSender<TransportEvent>,
    next_call: AtomicUsize,
}

impl FakeTransport {
    fn record(&self, op: impl Into<String>) -> ClientResult<()> {
        if self.fail_calls.load(Ordering::SeqCst) {
            return Err(ClientError::transport_failed("injected transport failure"));
        }
        self.ops.lock().unwrap().push(op.into());
        Ok(())
    }

    pub fn ops(&self) -> Vec<String> {
        self.ops.lock().unwrap().clone()
    }

    /// Push a provider-originated event into the client
    pub fn push(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl SignalingTransport for FakeTransport {
    async fn start(&self) -> ClientResult<()> {
        self.record("start")
    }

    async fn dispose(&self) -> ClientResult<()> {
        self.disposed.store(true, Ordering::SeqCst);
        self.ops.lock().unwrap().push("dispose".to_string());
        Ok(())
    }

    async fn place_call(&self, number: &str, caller_id: Option<&str>) -> ClientResult<String> {
        self.record(format!(
            "place_call:{}:{}",
            number,
            caller_id.unwrap_or("-")
        ))?;
        let n = self.next_call.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("tp-{}", n))
    }

    async fn answer(&self, id: &str) -> ClientResult<()> {
        self.record(format!("answer:{}", id))
    }

    async fn decline(&self, id: &str) -> ClientResult<()> {
        self.record(format!("decline:{}", id))
    }

    async fn hangup(&self, id: &str) -> ClientResult<()> {
        self.record(format!("hangup:{}", id))
    }

    async fn hold(&self, id: &str) -> ClientResult<()> {
        self.record(format!("hold:{}", id))
    }

    async fn unhold(&self, id: &str) -> ClientResult<()> {
        self.record(format!("unhold:{}", id))
    }

    async fn set_muted(&self, id: &str, muted: bool) -> ClientResult<()> {
        self.record(format!("set_muted:{}:{}", id, muted))
    }

    async fn send_dtmf(&self, id: &str, digits: &str) -> ClientResult<()> {
        self.record(format!("dtmf:{}:{}", id, digits))
    }

    async fn set_input_device(&self, id: &str, device: &str) -> ClientResult<()> {
        self.record(format!("input:{}:{}", id, device))
    }

    async fn set_output_device(&self, id: &str, device: &str) -> ClientResult<()> {
        self.record(format!("output:{}:{}", id, device))
    }

    async fn set_recording(&self, id: &str, recording: bool) -> ClientResult<()> {
        self.record(format!("recording:{}:{}", id, recording))
    }

    async fn reinvite(&self, id: &str) -> ClientResult<()> {
        self.record(format!("reinvite:{}", id))
    }
}

pub struct FakeTransportFactory {
    pub created: Mutex<Vec<Arc<FakeTransport>>>,
    pub fail_create: AtomicBool,
}

impl FakeTransportFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            created: Mutex::new(Vec::new()),
            fail_create: AtomicBool::new(false),
        })
    }

    pub fn created_count(&self) -> usize {
        self.created.lock().unwrap().len()
    }

    pub fn latest(&self) -> Arc<FakeTransport> {
        self.created
            .lock()
            .unwrap()
            .last()
            .expect("no transport created yet")
            .clone()
    }
}

#[async_trait]
impl TransportFactory for FakeTransportFactory {
    async fn create(
        &self,
        _registration: &TransportRegistration,
    ) -> ClientResult<(
        Arc<dyn SignalingTransport>,
        mpsc::UnboundedReceiver<TransportEvent>,
    )> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(ClientError::transport_failed("factory failure"));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(FakeTransport {
            ops: Mutex::new(Vec::new()),
            fail_calls: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            events: tx,
            next_call: AtomicUsize::new(0),
        });
        self.created.lock().unwrap().push(transport.clone());
        let dyn_transport: Arc<dyn SignalingTransport> = transport;
        Ok((dyn_transport, rx))
    }
}

// ===== WIRING =====

pub struct Harness {
    pub phone: Arc<PhoneManager>,
    pub api: Arc<FakeApi>,
    pub factory: Arc<FakeTransportFactory>,
    pub store: Arc<MemoryStore>,
}

pub fn build_phone(mutate: impl FnOnce(&mut webphone_core::PhoneConfig)) -> Harness {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("webphone_core=debug")
        .with_test_writer()
        .try_init();

    let api = FakeApi::new();
    let factory = FakeTransportFactory::new();
    let store = Arc::new(MemoryStore::default());

    let mut config = webphone_core::PhoneConfig::new(
        "https://platform.example.com".parse().unwrap(),
        "test-app".to_string(),
        AuthConfig::JwtAssertion {
            assertion: "test-jwt".to_string(),
        },
    )
    .with_fallback_caller_id("+15550009");
    // Keep test timing tight
    config.history.post_call_refresh_delay_ms = 20;
    config.reconnect_backoff.initial_delay = Duration::from_millis(20);
    config.reconnect_backoff.max_delay = Duration::from_millis(100);
    mutate(&mut config);

    let phone = PhoneBuilder::new()
        .config(config)
        .api(api.clone())
        .transport_factory(factory.clone())
        .store(store.clone())
        .build()
        .expect("failed to build phone");

    Harness {
        phone,
        api,
        factory,
        store,
    }
}

/// Poll until `condition` holds or the timeout elapses
pub async fn wait_for(condition: impl Fn() -> bool, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
