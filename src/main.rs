//! OCR worker - dispatches collection documents to OCR providers.

use std::sync::Arc;

use ocr_dispatch::config::Settings;
use ocr_dispatch::dispatch::OcrDispatcher;
use ocr_dispatch::entitlement::{EntitlementLookup, StaticEntitlements};
use ocr_dispatch::fulfillment::OcrFulfillment;
use ocr_dispatch::indexing::HttpIndexingNotifier;
use ocr_dispatch::metrics::OcrMetrics;
use ocr_dispatch::ocr::docling::DoclingProvider;
use ocr_dispatch::ocr::mistral::MistralOcrProvider;
use ocr_dispatch::quota::{InMemoryQuotaLedger, QuotaGate, QuotaLedger};
use ocr_dispatch::registry::ProviderRegistry;
use ocr_dispatch::server::{router, AppState};
use ocr_dispatch::store::{CollectionStore, InMemoryCollectionStore, SupabaseClient};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "ocr_dispatch=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Settings::load()?;
    let client = reqwest::Client::new();

    // Providers
    let mut registry = ProviderRegistry::new(settings.routing.clone());
    registry.register(Arc::new(DoclingProvider::new(client.clone(), &settings.local)))?;
    registry.register(Arc::new(MistralOcrProvider::new(client.clone(), &settings.cloud)))?;
    let available = registry.available_providers();
    if available.is_empty() {
        warn!("No OCR provider is available; set DOCLING_URL or MISTRAL_API_KEY");
    } else {
        info!("OCR providers available: {:?}", available);
    }

    // Persistence
    let store: Arc<dyn CollectionStore>;
    let ledger: Arc<dyn QuotaLedger>;
    let entitlements: Arc<dyn EntitlementLookup>;
    match &settings.supabase {
        Some(config) => {
            let supabase = Arc::new(SupabaseClient::new(client.clone(), config));
            info!("Supabase store at {}", config.url);
            store = supabase.clone();
            ledger = supabase.clone();
            entitlements = supabase;
        }
        None => {
            warn!("SUPABASE_URL not set, using in-memory store");
            store = Arc::new(InMemoryCollectionStore::new());
            ledger = Arc::new(InMemoryQuotaLedger::new());
            entitlements = Arc::new(StaticEntitlements::new());
        }
    }

    let metrics = Arc::new(OcrMetrics::new());
    let dispatcher = Arc::new(OcrDispatcher::new(
        Arc::new(registry),
        Arc::new(QuotaGate::new(ledger, settings.quota.clone())),
        metrics.clone(),
        settings.tiers.clone(),
    ));

    let mut fulfillment = OcrFulfillment::new(store, dispatcher.clone(), entitlements);
    if let Some(url) = &settings.indexing_webhook_url {
        info!("Indexing webhook: {}", url);
        fulfillment = fulfillment.with_indexer(Arc::new(HttpIndexingNotifier::new(client.clone(), url)));
    }

    let state = AppState {
        fulfillment: Arc::new(fulfillment),
        dispatcher,
        metrics,
    };

    let app = router(state).layer(TraceLayer::new_for_http());

    // Run server
    let listener = tokio::net::TcpListener::bind(settings.bind_addr.as_str()).await?;
    info!("OCR worker listening on http://{}", settings.bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}
