//! Domus - conversational real-estate assistant
//!
//! Routes each client message to a search, negotiation, legal or small-talk
//! handler and drives that handler's capability loop to a reply.

mod budget;
mod capabilities;
mod config;
mod driver;
mod generation;
mod handler;
mod llm;
mod router;
mod session;
mod state;

#[cfg(test)]
mod testing;

use capabilities::backend::{Backends, PropertyCatalog};
use capabilities::memory::{
    InMemoryAlerts, InMemoryCatalog, LogDealNotifier, UnavailableLegalKnowledge,
};
use capabilities::CapabilityRegistry;
use config::Config;
use driver::GraphDriver;
use generation::LlmGeneration;
use llm::ModelRegistry;
use session::SessionStore;
use state::ConversationState;
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    // Logs go to stderr so replies stay readable on stdout
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "domus=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let config = Config::from_env()?;

    let llm_registry = ModelRegistry::new(&config.llm);
    if !llm_registry.has_models() {
        tracing::error!("No LLM API keys configured. Set OPENAI_API_KEY or LLM_GATEWAY.");
        return Err("no language model available".into());
    }
    let Some(llm) = llm_registry.default() else {
        return Err("no language model available".into());
    };
    if llm.model_id() != llm_registry.default_model_id() {
        tracing::warn!(
            requested = %llm_registry.default_model_id(),
            using = %llm.model_id(),
            "Default model unavailable"
        );
    }
    tracing::info!(
        models = ?llm_registry.available_models(),
        default = %llm.model_id(),
        "LLM registry initialized"
    );

    let catalog = match &config.listings_path {
        Some(path) => {
            let catalog = InMemoryCatalog::from_file(path)?;
            if catalog.is_empty() {
                tracing::warn!(path = %path.display(), "Listings file holds no listings");
            } else {
                tracing::info!(path = %path.display(), listings = catalog.len(), "Loaded listings");
            }
            catalog
        }
        None => {
            tracing::warn!("DOMUS_LISTINGS_PATH not set; property catalog is empty");
            InMemoryCatalog::new(Vec::new())
        }
    };
    let catalog: Arc<dyn PropertyCatalog> = Arc::new(catalog);
    let backends = Backends {
        catalog,
        alerts: Arc::new(InMemoryAlerts::new()),
        notifier: Arc::new(LogDealNotifier),
        legal: Arc::new(UnavailableLegalKnowledge),
    };
    let registry = CapabilityRegistry::standard(&backends)?;

    let driver = GraphDriver::new(Arc::new(LlmGeneration::new(llm)), &registry, config.limits)
        .with_session(config.session.clone());

    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    tracing::info!(path = %config.db_path.display(), "Opening session store");
    let sessions = SessionStore::open(&config.db_path)?;
    let mut state = sessions.load(&config.session)?.unwrap_or_default();
    if let Some(updated_at) = sessions.updated_at(&config.session)? {
        tracing::info!(
            session = %config.session,
            messages = state.transcript.len(),
            %updated_at,
            "Resuming session"
        );
        if let Some(last) = state.last_assistant_text() {
            println!("{last}");
        }
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        match line {
            "" => continue,
            "q" | "quit" | "exit" => break,
            "/reset" => {
                sessions.reset(&config.session)?;
                state = ConversationState::new();
                println!("Conversation réinitialisée.");
                continue;
            }
            _ => {}
        }

        // Ctrl-C interrupts the turn in flight, not the process
        let cancel = CancellationToken::new();
        let interrupt = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    cancel.cancel();
                }
            })
        };
        let result = driver
            .run_turn_with_cancel(std::mem::take(&mut state), line, cancel)
            .await;
        interrupt.abort();

        state = match result {
            Ok(outcome) => {
                tracing::debug!(
                    route = ?outcome.route,
                    status = ?outcome.status,
                    steps = outcome.steps_used,
                    appended = outcome.turn_messages().len(),
                    "Turn applied"
                );
                println!("{}", outcome.reply());
                outcome.state
            }
            Err(err) => {
                tracing::error!(kind = %err.kind, error = %err.message, "Turn failed");
                println!("{}", err.apology());
                err.into_degraded_state()
            }
        };
        sessions.save(&config.session, &state)?;
    }

    Ok(())
}
