use std::{env, sync::Arc};

use anyhow::{Context, bail};
use dotenvy::dotenv;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use automation::{BridgeHostFactory, HostManager, StatusReporter, StepExecutor, VocabularyProvider};
use common::actors::{Actor, ActorType};
use common::config::{Settings, SourceConfig};
use common::logger;
use common::models::StaticConfigLookup;
use executor::actors::supervisor::Supervisor;
use executor::services::{SessionRunner, TelegramService};
use executor::{Dispatcher, ExecutionGate};
use intake::remote::SignalClient;
use intake::services::SourceActor;
use intake::sources::{PollingSource, PushSource, SignalSource};
use intake::{DedupFilter, SourceEvent};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logger::setup_logger();
    dotenv().ok();
    debug!("System starting up...");

    let settings = Settings::from_env().context("Invalid configuration")?;

    let trade_config_path =
        env::var("TRADE_CONFIG_PATH").unwrap_or_else(|_| "config/trades.json".to_string());
    let lookup = StaticConfigLookup::from_json_file(&trade_config_path)
        .with_context(|| format!("Failed to load trade configuration from {}", trade_config_path))?;
    info!("Loaded {} trade configurations", lookup.len());

    let vocabulary_dir =
        env::var("VOCABULARY_DIR").unwrap_or_else(|_| "config/vocabularies".to_string());
    let providers = VocabularyProvider::load_dir(&vocabulary_dir)
        .with_context(|| format!("Failed to load action vocabularies from {}", vocabulary_dir))?;
    if providers.is_empty() {
        bail!("No action vocabularies found in {}", vocabulary_dir);
    }
    info!("Platforms available: {}", providers.platforms().join(", "));

    let Some(bridge_url) = settings.host.bridge_url.as_deref() else {
        bail!("HOST_BRIDGE_URL must point at the automation sidecar");
    };
    let factory = Arc::new(
        BridgeHostFactory::new(bridge_url).context("HOST_BRIDGE_URL is not a valid URL")?,
    );

    let gate = ExecutionGate::new(settings.gate.clone());
    let reporter = StatusReporter::new(1024);
    let runner = Arc::new(SessionRunner::new(
        HostManager::new(factory, &settings.host),
        providers,
        StepExecutor::new(settings.automation.clone()),
        reporter.clone(),
        gate.clone(),
    ));
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::new(DedupFilter::new(&settings.dedup)),
        gate,
        Arc::new(lookup),
        runner,
    ));

    match TelegramService::from_env() {
        Some(telegram) => {
            tokio::spawn(telegram.start(reporter.subscribe()));
        }
        None => debug!("Telegram notifications not configured"),
    }

    let (ingest_tx, ingest_rx) = mpsc::channel::<SourceEvent>(1024);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut supervisor = Supervisor::new();
    let sources = register_sources(&mut supervisor, &settings.sources, &ingest_tx)?;
    if sources == 0 {
        warn!("No signal sources configured; set SIGNAL_POLL_URL and/or SIGNAL_PUSH_URL");
    }
    drop(ingest_tx);

    let dispatcher_task = {
        let dispatcher = dispatcher.clone();
        let shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move { dispatcher.run(ingest_rx, shutdown_rx).await })
    };
    let supervisor_task = tokio::spawn(async move { supervisor.start(shutdown_rx).await });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutdown requested");
    shutdown_tx.send_replace(true);

    supervisor_task.await?;
    if let Err(e) = dispatcher_task.await? {
        warn!("Dispatcher stopped: {}", e);
    }
    info!("Bye");
    Ok(())
}

fn register_sources(
    supervisor: &mut Supervisor,
    config: &SourceConfig,
    ingest_tx: &mpsc::Sender<SourceEvent>,
) -> anyhow::Result<usize> {
    let mut registered = 0;

    if let Some(url) = &config.poll_url {
        let client = SignalClient::new(url.clone(), config.poll_token.clone())?;

        let (fg_client, fg_tx, fg_interval) =
            (client.clone(), ingest_tx.clone(), config.foreground_interval);
        supervisor.register_actor(
            ActorType::ForegroundPoller,
            Box::new(move || {
                source_actor(PollingSource::foreground(fg_client.clone(), fg_interval), &fg_tx)
            }),
        );

        let (bg_client, bg_tx, bg_interval) =
            (client, ingest_tx.clone(), config.background_interval);
        supervisor.register_actor(
            ActorType::BackgroundPoller,
            Box::new(move || {
                source_actor(PollingSource::background(bg_client.clone(), bg_interval), &bg_tx)
            }),
        );
        registered += 2;
    }

    if let Some(url) = &config.push_url {
        let (push_url, push_tx) = (url.clone(), ingest_tx.clone());
        supervisor.register_actor(
            ActorType::PushListener,
            Box::new(move || source_actor(PushSource::new(push_url.clone()), &push_tx)),
        );
        registered += 1;
    }

    Ok(registered)
}

fn source_actor(
    source: impl SignalSource + 'static,
    ingest_tx: &mpsc::Sender<SourceEvent>,
) -> Box<dyn Actor> {
    Box::new(SourceActor::new(Box::new(source), ingest_tx.clone()))
}
