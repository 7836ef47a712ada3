use std::path::PathBuf;

use anyhow::{bail, Context as _};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use podforward::{Context, ForwarderConfig, PortForwarder, TargetPod};

/// Forward a local port to a pod in a Kubernetes cluster
#[derive(Debug, Parser)]
#[command(name = "podforward", version, about)]
struct Args {
    /// Port on the pod
    #[arg(short, long)]
    port: u16,

    /// Exact pod name; takes precedence over selectors
    #[arg(long)]
    pod: Option<String>,

    /// Namespace to look in
    #[arg(short, long)]
    namespace: Option<String>,

    /// Label selector entry, key=value (repeatable)
    #[arg(short = 'l', long = "selector", value_parser = parse_key_value)]
    selector: Vec<(String, String)>,

    /// Field selector entry, key=value (repeatable)
    #[arg(long = "field-selector", value_parser = parse_key_value)]
    field_selector: Vec<(String, String)>,

    /// Stop after this many seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Kubeconfig context
    #[arg(long, env = "KUBE_CONTEXT")]
    context: Option<String>,

    /// Kubeconfig file
    #[arg(long)]
    kubeconfig: Option<PathBuf>,

    /// Override the API server address
    #[arg(long)]
    master_url: Option<String>,

    /// Configuration file
    #[arg(long)]
    config: Option<PathBuf>,
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got {:?}", s)),
    }
}

fn load_config(args: &Args) -> anyhow::Result<ForwarderConfig> {
    let mut config = match &args.config {
        Some(path) => ForwarderConfig::load_from(path)?,
        None => ForwarderConfig::load()?,
    };
    config.apply_env();

    if let Some(context) = &args.context {
        config.cluster.context = Some(context.clone());
    }
    if let Some(path) = &args.kubeconfig {
        config.cluster.kubeconfig = Some(path.clone());
        config.cluster.kubeconfig_base64 = None;
    }
    if let Some(url) = &args.master_url {
        config.cluster.master_url = Some(url.clone());
    }
    if let Some(secs) = args.timeout {
        config.timeout_secs = Some(secs);
    }
    Ok(config)
}

fn build_target(args: &Args, config: &ForwarderConfig) -> TargetPod {
    let mut target = TargetPod::new(args.port).in_namespace(
        args.namespace
            .clone()
            .unwrap_or_else(|| config.default_namespace.clone()),
    );
    if let Some(pod) = &args.pod {
        target = target.with_name(pod);
    }
    for (key, value) in &args.selector {
        target = target.with_label(key, value);
    }
    for (key, value) in &args.field_selector {
        target = target.with_field(key, value);
    }
    target
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;
    let target = build_target(&args, &config);

    let forwarder = PortForwarder::from_config(&config)
        .await
        .context("failed to set up port forwarder")?;

    let ctx = match config.timeout() {
        Some(timeout) => Context::background().with_timeout(timeout),
        None => Context::background(),
    };

    let session = forwarder.forward_pod(&ctx, target).await?;

    let started = session.started();
    let finished = session.finished();
    tokio::select! {
        _ = started.wait() => {
            println!(
                "Forwarding {}:{} -> {}/{}:{}",
                config.bind_address,
                session.local_port(),
                session.namespace(),
                session.pod(),
                session.remote_port()
            );
        }
        _ = finished.wait() => {}
    }

    tokio::select! {
        _ = finished.wait() => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, stopping port forward");
            session.stop();
            finished.wait().await;
        }
    }

    if let Some(err) = session.err() {
        bail!(err);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_value() {
        assert_eq!(
            parse_key_value("run=nginx"),
            Ok(("run".to_string(), "nginx".to_string()))
        );
        assert_eq!(
            parse_key_value("status.phase=Running"),
            Ok(("status.phase".to_string(), "Running".to_string()))
        );
        assert!(parse_key_value("novalue").is_err());
        assert!(parse_key_value("=x").is_err());
    }

    #[test]
    fn test_build_target_from_args() {
        let args = Args::parse_from([
            "podforward",
            "--port",
            "80",
            "-l",
            "run=nginx",
            "-l",
            "tier=web",
        ]);
        let mut config = ForwarderConfig::default();
        config.default_namespace = "forwarder".into();

        let target = build_target(&args, &config);
        assert_eq!(target.port, 80);
        assert_eq!(target.namespace, "forwarder");
        assert_eq!(target.name, None);
        assert_eq!(target.label_selector.len(), 2);
    }

    #[test]
    fn test_build_target_with_pod_and_namespace() {
        let args = Args::parse_from(["podforward", "-p", "8080", "--pod", "api-0", "-n", "prod"]);
        let target = build_target(&args, &ForwarderConfig::default());
        assert_eq!(target.name.as_deref(), Some("api-0"));
        assert_eq!(target.namespace, "prod");
    }
}
