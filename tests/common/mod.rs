#![allow(dead_code)]

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use paygate_core::adapters::InMemoryPaymentStore;
use paygate_core::domain::{
    Caller, ItemKind, ItemRef, PayerProfile, PaymentError, PaymentMethod, PurchasableItem,
    Registration, Transaction,
};
use paygate_core::gateway::{GatewayCallback, SignatureAlgorithms, SignatureCodec};
use paygate_core::ports::{
    GatewayAck, GatewayError, GatewayStatus, PaymentGateway, ProofArtifactGenerator, ProofPayload,
};
use paygate_core::services::{OrchestratorSettings, TransactionOrchestrator};
use secrecy::SecretString;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

pub const MERCHANT_ID: &str = "D0001";
pub const MERCHANT_SECRET: &str = "merchant-secret";
pub const PAYER_ID: i64 = 42;
pub const OTHER_PAYER_ID: i64 = 43;
pub const METHOD: &str = "VC";
pub const CALLBACK_TIME: &str = "2026-03-01 08:05:00";

/// Scripted gateway that counts the requests it receives.
#[derive(Default)]
pub struct FakeGateway {
    requests: AtomicUsize,
    status_queries: AtomicUsize,
    delay: Mutex<Duration>,
    failures: Mutex<Vec<GatewayError>>,
    status: Mutex<Option<Result<GatewayStatus, GatewayError>>>,
}

impl FakeGateway {
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn status_queries(&self) -> usize {
        self.status_queries.load(Ordering::SeqCst)
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    /// The next payment request fails with `error`.
    pub fn fail_next(&self, error: GatewayError) {
        self.failures.lock().unwrap().push(error);
    }

    pub fn report_status(&self, result_code: &str, reference: Option<&str>) {
        *self.status.lock().unwrap() = Some(Ok(GatewayStatus {
            result_code: result_code.to_string(),
            reference: reference.map(str::to_string),
            raw: serde_json::json!({ "statusCode": result_code, "reference": reference }),
        }));
    }

    pub fn status_unavailable(&self) {
        *self.status.lock().unwrap() =
            Some(Err(GatewayError::Unavailable("connection refused".to_string())));
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn request_payment(
        &self,
        transaction: &Transaction,
        _payer: &PayerProfile,
        _item_label: &str,
    ) -> Result<GatewayAck, GatewayError> {
        let n = self.requests.fetch_add(1, Ordering::SeqCst) + 1;
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = self.failures.lock().unwrap().pop() {
            return Err(error);
        }

        Ok(GatewayAck {
            reference: format!("REF{}", n),
            payment_url: Some(format!("https://pay.test/{}", transaction.order_ref)),
            va_number: Some(format!("8800{}", n)),
            qr_payload: None,
        })
    }

    async fn query_status(&self, _order_ref: &str) -> Result<GatewayStatus, GatewayError> {
        self.status_queries.fetch_add(1, Ordering::SeqCst);
        self.status.lock().unwrap().clone().unwrap_or_else(|| {
            Ok(GatewayStatus {
                result_code: "01".to_string(),
                reference: None,
                raw: serde_json::json!({ "statusCode": "01" }),
            })
        })
    }
}

/// Proof generator that records calls and can be switched into failure.
#[derive(Default)]
pub struct CountingProofs {
    calls: AtomicUsize,
    failing: AtomicBool,
}

impl CountingProofs {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl ProofArtifactGenerator for CountingProofs {
    async fn generate(
        &self,
        transaction_id: Uuid,
        _payload: &ProofPayload,
    ) -> Result<String, PaymentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(PaymentError::ProofGenerationFailed("disk full".to_string()));
        }
        Ok(format!("proofs/{}.svg", transaction_id))
    }
}

pub struct Harness {
    pub store: InMemoryPaymentStore,
    pub gateway: Arc<FakeGateway>,
    pub proofs: Arc<CountingProofs>,
    pub codec: Arc<SignatureCodec>,
    pub orchestrator: Arc<TransactionOrchestrator>,
    pub item: ItemRef,
    pub registration: Registration,
}

pub fn codec() -> SignatureCodec {
    SignatureCodec::new(
        MERCHANT_ID,
        SecretString::new(MERCHANT_SECRET.to_string()),
        SignatureAlgorithms::default(),
    )
}

pub fn test_settings() -> OrchestratorSettings {
    let mut settings = OrchestratorSettings::new(10, 30);
    settings.claim_poll_interval = Duration::from_millis(10);
    settings.claim_wait = Duration::from_secs(5);
    settings
}

impl Harness {
    /// Payer 42 registered for exam 7 priced at 150000, plus an unregistered payer 43.
    pub async fn new() -> Self {
        let store = InMemoryPaymentStore::new();
        let item = ItemRef::new(ItemKind::Exam, 7);

        for (id, name) in [(PAYER_ID, "Ayu"), (OTHER_PAYER_ID, "Budi")] {
            store
                .add_payer(PayerProfile {
                    id,
                    name: name.to_string(),
                    email: format!("{}@example.com", name.to_lowercase()),
                })
                .await;
        }
        store
            .add_item(PurchasableItem {
                item,
                label: "Certification Exam".to_string(),
                fee: BigDecimal::from(150_000),
            })
            .await;
        store
            .add_payment_method(PaymentMethod {
                code: METHOD.to_string(),
                name: "Credit Card".to_string(),
                active: true,
            })
            .await;
        store
            .add_payment_method(PaymentMethod {
                code: "OV".to_string(),
                name: "Retired Wallet".to_string(),
                active: false,
            })
            .await;
        let registration = store.register(PAYER_ID, item).await;

        let gateway = Arc::new(FakeGateway::default());
        let proofs = Arc::new(CountingProofs::default());
        let codec = Arc::new(codec());
        let orchestrator = Arc::new(TransactionOrchestrator::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            gateway.clone(),
            proofs.clone(),
            codec.clone(),
            test_settings(),
        ));

        Self {
            store,
            gateway,
            proofs,
            codec,
            orchestrator,
            item,
            registration,
        }
    }

    pub fn payer(&self) -> Caller {
        Caller::member(PAYER_ID)
    }

    /// A correctly signed callback as the gateway would post it.
    pub fn signed_callback(
        &self,
        order_ref: &str,
        amount: &str,
        result_code: &str,
        reference: &str,
    ) -> GatewayCallback {
        GatewayCallback {
            merchant_code: Some(MERCHANT_ID.to_string()),
            merchant_order_id: order_ref.to_string(),
            amount: amount.to_string(),
            result_code: result_code.to_string(),
            reference: Some(reference.to_string()),
            signature: self.codec.sign_callback(amount, order_ref, CALLBACK_TIME),
            datetime: CALLBACK_TIME.to_string(),
            payment_code: Some(METHOD.to_string()),
            publisher_order_id: None,
            settlement_date: None,
            additional_param: None,
        }
    }
}
