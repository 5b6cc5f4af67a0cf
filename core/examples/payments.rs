//! The payments service's outbound breakers, wired through one registry
//!
//! Run with `RUST_LOG=outcall_breaker=debug cargo run --example payments`.

use outcall_breaker::{BreakerRegistry, CircuitBreaker, CircuitError, ConfigError};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

const SETTINGS: &str = r#"
[defaults]
errorThreshold = 20
timeout = 20000
healthRequests = 5
sleepTimeMS = 100
maxRequests = 0

[breakers.usersGetCustomer]
timeout = 2000
"#;

/// Error shape seen by the HTTP handlers
#[derive(Debug, Clone, PartialEq)]
enum ApiError {
    /// Transport-level failure talking to a sibling service
    Network(String),
    /// Error response from the dependency
    Upstream { status: u16 },
}

/// Network errors pass through, anything else degrades to a 503
fn unavailable<A, T>(err: CircuitError<ApiError>, _args: A) -> Result<T, ApiError> {
    tracing::error!(error = %err, "outbound call failed");
    match err {
        CircuitError::Execution(ApiError::Network(reason)) => Err(ApiError::Network(reason)),
        _ => Err(ApiError::Upstream { status: 503 }),
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::Network(reason) => write!(f, "network error: {}", reason),
            ApiError::Upstream { status } => write!(f, "upstream returned {}", status),
        }
    }
}

impl std::error::Error for ApiError {}

struct OutboundCalls {
    payment_intents_create: CircuitBreaker<u64, String, ApiError>,
    users_get_customer: CircuitBreaker<String, String, ApiError>,
}

fn wire(
    registry: &BreakerRegistry,
    processor_up: Arc<AtomicBool>,
) -> Result<OutboundCalls, ConfigError> {
    let payment_intents_create = registry.register(
        registry
            .builder("stripePaymentIntentsCreate")
            .request(move |amount: u64| {
                let up = processor_up.load(Ordering::SeqCst);
                async move {
                    if up {
                        Ok(format!("pi_{}", amount))
                    } else {
                        Err(ApiError::Upstream { status: 500 })
                    }
                }
            })
            .fallback(unavailable),
    )?;

    let users_get_customer = registry.register(
        registry
            .builder("usersGetCustomer")
            .request(|customer_id: String| async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                if customer_id.starts_with("cus_offline") {
                    return Err(ApiError::Network(format!(
                        "connection reset fetching {}",
                        customer_id
                    )));
                }
                Ok(format!("customer {}", customer_id))
            })
            .fallback(unavailable),
    )?;

    // The remaining breakers share the same defaults; register them so they
    // show up in health reporting.
    for name in [
        "stripePaymentMethodsAttach",
        "stripeCustomersUpdate",
        "stripeSubscriptionsCreate",
        "stripeWebhooksConstructEvent",
        "stripeSubscriptionsDel",
        "deliveriesCreate",
        "productsRetrieveProducts",
    ] {
        registry.register(
            registry
                .builder::<String, String, ApiError>(name)
                .request(|body: String| async move { Ok(body) })
                .fallback(unavailable),
        )?;
    }

    Ok(OutboundCalls {
        payment_intents_create,
        users_get_customer,
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "outcall_breaker=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let registry = BreakerRegistry::from_toml_str(SETTINGS)?;
    let processor_up = Arc::new(AtomicBool::new(true));
    let calls = wire(&registry, Arc::clone(&processor_up))?;

    let customer = calls.users_get_customer.execute("cus_42".to_string()).await?;
    println!("{}", customer);

    // Transport failures reach the handler unchanged instead of becoming a 503
    let unreachable = calls
        .users_get_customer
        .execute("cus_offline_7".to_string())
        .await;
    println!("{:?}", unreachable);

    println!("--- healthy processor ---");
    for amount in [1000, 2500] {
        println!("{:?}", calls.payment_intents_create.execute(amount).await);
    }

    println!("--- processor outage ---");
    processor_up.store(false, Ordering::SeqCst);
    for amount in 0..12 {
        let result = calls.payment_intents_create.execute(amount).await;
        println!(
            "{:>2}: {:?} (state {})",
            amount,
            result,
            calls.payment_intents_create.state()
        );
    }

    println!("--- recovery ---");
    processor_up.store(true, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(100)).await;
    for amount in 0..5 {
        let result = calls.payment_intents_create.execute(amount).await;
        println!(
            "probe {}: {:?} (state {})",
            amount + 1,
            result,
            calls.payment_intents_create.state()
        );
    }

    println!("--- health ---");
    for status in registry.statuses() {
        println!("{}", serde_json::to_string(&status)?);
    }

    Ok(())
}
