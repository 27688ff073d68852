// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tracing::{error, info};

use maas_client::auth::{StaticToken, TokenFile};
use maas_client::{
    CallContext, Classifier, ConfigBuilder, InvalidationEvent, KafkaClient, RabbitClient,
};

/// Resolve MaaS classifiers and watch tenant invalidations.
#[derive(Debug, Parser)]
#[command(name = "maas-resolve", version, about)]
struct Cli {
    /// MaaS agent base URL.
    #[arg(long, env = "MAAS_AGENT_URL")]
    agent_url: Option<String>,

    /// Tenant-manager base URL.
    #[arg(long, env = "TENANT_MANAGER_URL")]
    tenant_manager_url: Option<String>,

    /// Namespace applied to classifiers that carry none.
    #[arg(long, env = "MICROSERVICE_NAMESPACE")]
    namespace: Option<String>,

    /// Static bearer token.
    #[arg(long, env = "MAAS_TOKEN", conflicts_with = "token_file")]
    token: Option<String>,

    /// File holding the bearer token, re-read on every request.
    #[arg(long, env = "MAAS_TOKEN_FILE")]
    token_file: Option<PathBuf>,

    /// Per-request timeout in seconds.
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Log format (json or text).
    #[arg(long, env = "MAAS_LOG_FORMAT", default_value = "text")]
    log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "MAAS_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Resolve a Kafka topic.
    Topic(Target),
    /// Resolve a Rabbit queue.
    Queue(Target),
    /// Print invalidations for a classifier's namespace until interrupted.
    Watch(Target),
}

#[derive(Debug, Args)]
struct Target {
    /// Classifier name.
    name: String,

    /// Tenant external id.
    #[arg(long)]
    tenant_id: Option<String>,

    /// Extra classifier entries as key=value.
    #[arg(long = "key", value_parser = parse_key_value)]
    keys: Vec<(String, String)>,
}

impl Target {
    fn classifier(&self) -> Classifier {
        let mut classifier = Classifier::new(&self.name);
        for (k, v) in &self.keys {
            classifier = classifier.with(k, v);
        }
        if let Some(ref tenant) = self.tenant_id {
            classifier = classifier.with_tenant_id(tenant);
        }
        classifier
    }
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((k, v)) if !k.is_empty() => Ok((k.to_owned(), v.to_owned())),
        _ => Err(format!("expected key=value, got {s:?}")),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(&cli);

    if let Err(e) = run(cli).await {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}

fn init_tracing(cli: &Cli) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    match cli.log_format.as_str() {
        "json" => {
            fmt::fmt().with_env_filter(filter).with_writer(std::io::stderr).json().init();
        }
        _ => {
            fmt::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
        }
    }
}

fn build_config(cli: &Cli) -> maas_client::Configuration {
    let mut builder = ConfigBuilder::new();
    if let Some(ref url) = cli.agent_url {
        builder = builder.maas_agent_url(url);
    }
    if let Some(ref url) = cli.tenant_manager_url {
        builder = builder.tenant_manager_url(url);
    }
    if let Some(ref ns) = cli.namespace {
        builder = builder.namespace(ns);
    }
    if let Some(ref token) = cli.token {
        builder = builder.auth_supplier(StaticToken(token.clone()));
    } else if let Some(ref path) = cli.token_file {
        builder = builder.auth_supplier(TokenFile::new(path));
    }
    if let Some(secs) = cli.timeout_secs {
        builder = builder.request_timeout(Duration::from_secs(secs));
    }
    builder.build()
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = build_config(&cli);
    let cx = CallContext::background();

    match cli.command {
        Command::Topic(ref target) => {
            let client = KafkaClient::new(config);
            let topic = client.get_topic(&cx, &target.classifier()).await?;
            print_json(&topic)
        }
        Command::Queue(ref target) => {
            let client = RabbitClient::new(config);
            let queue = client.get_queue(&cx, &target.classifier()).await?;
            print_json(&queue)
        }
        Command::Watch(ref target) => watch(config, target.classifier()).await,
    }
}

fn print_json<T: serde::Serialize>(value: &Option<T>) -> anyhow::Result<()> {
    match value {
        Some(v) => println!("{}", serde_json::to_string_pretty(v)?),
        None => anyhow::bail!("no topology registered for classifier"),
    }
    Ok(())
}

async fn watch(config: maas_client::Configuration, classifier: Classifier) -> anyhow::Result<()> {
    let client = KafkaClient::new(config);
    let listener = Arc::new(move |event: &InvalidationEvent| {
        let line = serde_json::json!({
            "namespace": event.namespace,
            "type": event.kind,
            "tenants": event.tenants,
        });
        println!("{line}");
    });
    let _handle = client.watch(&classifier, listener)?;

    let mut states = client.invalidation_channel().state_changes();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            res = &mut shutdown => {
                res?;
                break;
            }
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *states.borrow_and_update();
                info!(state = ?state, "invalidation channel state");
            }
        }
    }

    client.close().await;
    Ok(())
}
