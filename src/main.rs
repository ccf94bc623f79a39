//! CLI entry point: load configuration, wire the provider/orchestrator
//! stack, and run one batch to completion against an in-memory company
//! list (or, with a real `Store` implementation swapped in, a database).

use clap::Parser;
use company_profiler::config::AppConfig;
use company_profiler::core_types::Company;
use company_profiler::llm::call_manager::CallManager;
use company_profiler::llm::discovery::DiscoveryAgent;
use company_profiler::llm::provider_manager::ProviderManager;
use company_profiler::orchestrator::{BatchOrchestrator, GlobalOrchestrator};
use company_profiler::proxy_pool::ProxyPool;
use company_profiler::search::SerperSearchClient;
use company_profiler::store::{InMemoryStore, Store};
use std::sync::Arc;
use tracing::{error as log_error, info as log_info};

#[derive(Parser, Debug)]
#[command(name = "company-profiler", about = "Batch B2B company profiling pipeline")]
struct Cli {
    /// Path to a CSV file of companies to profile (cnpj_basico,razao_social,website,...).
    #[arg(long)]
    companies_csv: Option<String>,

    /// Override the configured worker count per instance.
    #[arg(long, env = "WORKERS_PER_INSTANCE")]
    workers: Option<usize>,
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut config = AppConfig::from_env()?;
    if let Some(workers) = cli.workers {
        config.orchestrator.workers_per_instance = workers;
    }

    let companies = match &cli.companies_csv {
        Some(path) => load_companies_csv(path)?,
        None => Vec::new(),
    };
    log_info!(count = companies.len(), "loaded companies for this run");

    let store: Arc<dyn Store> = Arc::new(InMemoryStore::new(companies));
    let proxy_pool = Arc::new(ProxyPool::new(config.proxy_source.clone()));
    let global = Arc::new(GlobalOrchestrator::new(
        [
            (company_profiler::orchestrator::ResourceKind::Scraper, config.orchestrator.scraper_slot_capacity),
            (company_profiler::orchestrator::ResourceKind::Discovery, config.orchestrator.discovery_slot_capacity),
            (company_profiler::orchestrator::ResourceKind::Llm, config.orchestrator.llm_slot_capacity),
            (company_profiler::orchestrator::ResourceKind::Proxy, config.orchestrator.proxy_slot_capacity),
            (company_profiler::orchestrator::ResourceKind::HttpConnection, config.orchestrator.http_connection_slot_capacity),
        ]
        .into_iter()
        .collect(),
    ));

    let providers: Vec<Arc<ProviderManager>> = config
        .providers
        .iter()
        .cloned()
        .map(|endpoint| ProviderManager::new(endpoint).map(Arc::new))
        .collect::<Result<_, _>>()?;
    let call_manager = Arc::new(CallManager::new(providers));

    let discovery = config.serper_api_key.clone().map(|key| {
        let search = Arc::new(SerperSearchClient::new(key));
        Arc::new(DiscoveryAgent::new(search, call_manager.clone()))
    });

    let orchestrator = BatchOrchestrator::with_discovery(
        store.clone(),
        proxy_pool,
        call_manager,
        discovery,
        global,
        config.orchestrator.clone(),
    );
    let status = orchestrator.run().await;

    log_info!(
        succeeded = status.succeeded,
        partial = status.partial,
        failed = status.failed,
        "batch run complete"
    );
    println!("{}", serde_json::to_string_pretty(&status)?);

    Ok(())
}

fn load_companies_csv(path: &str) -> anyhow::Result<Vec<Company>> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut companies = Vec::new();
    for record in reader.deserialize() {
        let company: CompanyCsvRow = match record {
            Ok(row) => row,
            Err(err) => {
                log_error!(error = %err, "skipping malformed CSV row");
                continue;
            }
        };
        companies.push(company.into());
    }
    Ok(companies)
}

#[derive(serde::Deserialize)]
struct CompanyCsvRow {
    cnpj_basico: String,
    razao_social: String,
    nome_fantasia: Option<String>,
    website: Option<String>,
    municipio: Option<String>,
    uf: Option<String>,
    cnae_principal: Option<String>,
}

impl From<CompanyCsvRow> for Company {
    fn from(row: CompanyCsvRow) -> Self {
        Company {
            cnpj_basico: row.cnpj_basico,
            razao_social: row.razao_social,
            nome_fantasia: row.nome_fantasia,
            website: row.website,
            municipio: row.municipio,
            uf: row.uf,
            cnae_principal: row.cnae_principal,
        }
    }
}
