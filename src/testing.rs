//! Fixtures shared by the unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::auth::Session;
use crate::config::{Config, MailConfig, MomoConfig, PaymentTiming, StoreBackend};
use crate::domain::aggregates::{OrderLineRequest, PaymentOutcome, PaymentStatus, Product, ProductDraft, Role, User};
use crate::mail::templates;
use crate::payments::{PaymentError, PaymentGateway, PaymentRequest, ProviderStatus};
use crate::state::{AppState, EventBus};
use crate::store::{MemoryStore, ProductStore, Store, UserStore};

/// Gateway that records requests and answers status lookups from a script.
/// Once the script runs out, the last answer repeats.
pub(crate) struct ScriptedGateway {
    pub requests: Mutex<Vec<PaymentRequest>>,
    pub status_calls: AtomicUsize,
    initiation_error: Mutex<Option<PaymentError>>,
    script: Mutex<VecDeque<Result<ProviderStatus, PaymentError>>>,
    last: Mutex<Result<ProviderStatus, PaymentError>>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            status_calls: AtomicUsize::new(0),
            initiation_error: Mutex::new(None),
            script: Mutex::new(VecDeque::new()),
            last: Mutex::new(Ok(ProviderStatus::Pending)),
        }
    }

    pub fn answer(&self, status: Result<ProviderStatus, PaymentError>) {
        self.script.lock().unwrap().push_back(status);
    }

    pub fn fail_initiation(&self, error: PaymentError) {
        *self.initiation_error.lock().unwrap() = Some(error);
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    fn provider_name(&self) -> &'static str {
        "scripted"
    }

    async fn request_to_pay(&self, request: &PaymentRequest) -> Result<(), PaymentError> {
        if let Some(error) = self.initiation_error.lock().unwrap().clone() {
            return Err(error);
        }
        self.requests.lock().unwrap().push(request.clone());
        Ok(())
    }

    async fn transaction_status(&self, _reference: &str) -> Result<ProviderStatus, PaymentError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let mut last = self.last.lock().unwrap();
        if let Some(next) = self.script.lock().unwrap().pop_front() {
            *last = next;
        }
        last.clone()
    }
}

pub(crate) fn test_config() -> Config {
    Config {
        port: 0,
        backend: StoreBackend::Memory,
        database_url: None,
        database_max_connections: 1,
        nats_url: None,
        momo: MomoConfig {
            api_url: "http://127.0.0.1:9".into(),
            api_key: "key".into(),
            user_id: "user".into(),
            api_secret: "secret".into(),
            target_environment: "sandbox".into(),
            currency: "RWF".into(),
            country_code: "250".into(),
        },
        payments: PaymentTiming {
            poll_interval: Duration::from_secs(5),
            client_timeout: Duration::from_secs(120),
            deadline: Duration::from_secs(600),
            sweep_interval: Duration::from_secs(60),
        },
        mail: MailConfig {
            relay_url: None,
            relay_api_key: String::new(),
            from_name: "MTN Store".into(),
            from_email: "shop@example.rw".into(),
            app_url: "https://shop.example.rw".into(),
            dispatch_interval: Duration::from_secs(10),
            max_attempts: 5,
        },
        session_ttl: chrono::Duration::hours(1),
        admin_email: None,
        admin_password: None,
    }
}

pub(crate) struct Harness {
    pub state: AppState,
    pub store: Arc<MemoryStore>,
    pub gateway: Arc<ScriptedGateway>,
}

pub(crate) fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let gateway = Arc::new(ScriptedGateway::new());
    let state = AppState {
        config: Arc::new(test_config()),
        store: store.clone(),
        payments: gateway.clone(),
        events: EventBus::disabled(),
    };
    Harness { state, store, gateway }
}

impl Harness {
    pub async fn product(&self, name: &str, price: i64, stock: i32, category: &str) -> Product {
        let product = Product::create(ProductDraft {
            name: name.into(),
            description: format!("{name} description"),
            price,
            stock,
            category: category.into(),
            image: "/img/p.png".into(),
        })
        .unwrap();
        self.store.insert_product(&product).await.unwrap();
        product
    }

    /// A user with an unusable password hash; sign in through [`Harness::token_for`].
    pub async fn user(&self, email: &str, role: Role) -> User {
        let user = User::register("Test User", email, "0788123456", "unusable".into(), role);
        self.store.insert_user(&user).await.unwrap();
        user
    }

    pub async fn token_for(&self, user: &User) -> String {
        let (token, session) = Session::issue(user.id, chrono::Duration::hours(1), Utc::now());
        self.store.insert_session(&session).await.unwrap();
        token
    }
}

// =============================================================================
// Backend contract checks, run against every Store implementation
// =============================================================================

async fn seed(store: &Arc<dyn Store>, stock: i32) -> (Product, Vec<User>) {
    let product = Product::create(ProductDraft {
        name: "Router".into(),
        description: "Dual band".into(),
        price: 100,
        stock,
        category: "network".into(),
        image: "/img/r.png".into(),
    })
    .unwrap();
    store.insert_product(&product).await.unwrap();

    let mut buyers = Vec::new();
    for email in ["first@x.rw", "second@x.rw"] {
        let user = User::register("Buyer", email, "0788123456", "unusable".into(), Role::User);
        store.insert_user(&user).await.unwrap();
        buyers.push(user);
    }
    (product, buyers)
}

/// Two buyers race for the last unit: one order, one rejection, stock at zero.
pub async fn assert_last_unit_sells_once(store: Arc<dyn Store>) {
    let (product, buyers) = seed(&store, 1).await;
    let lines = vec![OrderLineRequest { product_id: product.id, quantity: 1, price: 100 }];

    let attempt = |buyer: &User| {
        let (store, lines, buyer) = (store.clone(), lines.clone(), buyer.id);
        tokio::spawn(async move { store.place_order(buyer, &lines, Some(100)).await })
    };
    let (a, b) = tokio::join!(attempt(&buyers[0]), attempt(&buyers[1]));
    let results = [a.unwrap(), b.unwrap()];

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    let rejected = results.iter().find_map(|r| r.as_ref().err()).unwrap();
    assert_eq!(rejected.to_string(), "Insufficient stock for Router");
    assert_eq!(store.get_product(product.id).await.unwrap().unwrap().stock, 0);
}

/// Concurrent settlement of one success applies once and queues one email.
/// A completed order refuses new attempts, and an outcome observed for a
/// superseded attempt is refused.
pub async fn assert_payment_settles_once(store: Arc<dyn Store>) {
    let (product, buyers) = seed(&store, 5).await;
    let lines = [OrderLineRequest { product_id: product.id, quantity: 1, price: 100 }];
    let now = Utc::now();

    let order = store.place_order(buyers[0].id, &lines, Some(100)).await.unwrap();
    let order = store.record_payment_initiation(order.id, "order_a_1", now).await.unwrap().unwrap();
    let transition = order.transition_for(PaymentOutcome::Completed).unwrap();
    let notice = templates::order_confirmation(&order, &buyers[0], "https://shop.example.rw");

    let order_id = order.id;
    let attempt = || {
        let (store, transition, notice) = (store.clone(), transition.clone(), notice.clone());
        tokio::spawn(async move { store.transition_payment(order_id, transition, Some(notice)).await })
    };
    let (a, b) = tokio::join!(attempt(), attempt());
    let applied: Vec<_> = [a.unwrap().unwrap(), b.unwrap().unwrap()].into_iter().flatten().collect();
    assert_eq!(applied.len(), 1);
    assert_eq!(applied[0].payment_status, PaymentStatus::Completed);

    let later = now + chrono::Duration::days(1);
    assert_eq!(store.claim_due_emails(later, later, 10).await.unwrap().len(), 1);
    assert!(store.record_payment_initiation(order_id, "order_a_2", now).await.unwrap().is_none());

    let other = store.place_order(buyers[1].id, &lines, Some(100)).await.unwrap();
    let first = store.record_payment_initiation(other.id, "order_b_1", now).await.unwrap().unwrap();
    let expire = first.transition_for(PaymentOutcome::Failed).unwrap();
    store.record_payment_initiation(other.id, "order_b_2", now).await.unwrap().unwrap();
    assert!(store.transition_payment(other.id, expire, None).await.unwrap().is_none());
    let stored = store.find_order(other.id).await.unwrap().unwrap();
    assert_eq!(stored.payment_status, PaymentStatus::Pending);
    assert_eq!(stored.transaction_ref.as_deref(), Some("order_b_2"));
}
