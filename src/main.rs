use std::time::Duration;

use ae_mesh_gateway::config::GatewayConfig;
use ae_mesh_gateway::state::GatewayState;
use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = GatewayConfig::parse();
    init_tracing(config.log_json);

    // Fatal-at-startup: a missing session secret must not silently fall
    // back to an ephemeral or default key (§4.5, §6).
    if let Err(e) = config.session_secret() {
        tracing::error!(error = %e, "missing required session secret, refusing to start");
        anyhow::bail!(e);
    }

    let listen_addr = config.listen_addr.clone();
    let policy_poll_secs = config.policy_poll_secs;
    let state = GatewayState::build(config)?;

    spawn_policy_reload_task(state.clone(), Duration::from_secs(policy_poll_secs));

    let router = ae_mesh_gateway::routes::router(state);
    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    tracing::info!(addr = %listen_addr, "gateway listening");
    axum::serve(listener, router).await?;

    Ok(())
}

fn init_tracing(json: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Poll the static policy file on an interval and rebuild the effective
/// policy snapshot on change. A parse failure is logged and audited but
/// never interrupts in-flight requests (§4.6, §5).
fn spawn_policy_reload_task(state: std::sync::Arc<GatewayState>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if let Err(e) = state.policy.poll_static() {
                tracing::warn!(error = %e, "policy reload failed, keeping previous snapshot");
                let record = ae_mesh_gateway::audit::AuditRecord::new(
                    "system",
                    ae_mesh_gateway::audit::AuditAction::PolicyReloadFailed,
                    "Rejected",
                )
                .with_reason(e.to_string());
                if let Err(audit_err) = state.audit.append(&record) {
                    tracing::error!(error = %audit_err, "failed to audit policy reload failure");
                }
            }
        }
    });
}
