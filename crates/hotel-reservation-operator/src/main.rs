//! Hotel Reservation Kubernetes Operator
//!
//! Watches HotelReservationApp custom resources and provisions the
//! hotel-reservation microservice topology for each of them.

use anyhow::{Context, Result};
use clap::Parser;
use hotel_reservation_operator::bootstrap::DEFAULT_FIELD_MANAGER;
use hotel_reservation_operator::controller::{self, ControllerConfig};
use hotel_reservation_operator::crd::HotelReservationApp;
use kube::Client;
use std::net::SocketAddr;
use tracing::{info, Level};
use tracing_subscriber::fmt::format::FmtSpan;

/// Hotel Reservation Kubernetes Operator
#[derive(Parser, Debug)]
#[command(name = "hotel-reservation-operator")]
#[command(about = "Kubernetes operator for the hotel-reservation microservice demo")]
#[command(version)]
struct Args {
    /// Metrics server address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: SocketAddr,

    /// Health probe address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: SocketAddr,

    /// Namespace to watch (empty for cluster-wide)
    #[arg(long, env = "WATCH_NAMESPACE", default_value = "")]
    namespace: String,

    /// Field manager recorded on created objects
    #[arg(long, env = "FIELD_MANAGER", default_value = DEFAULT_FIELD_MANAGER)]
    field_manager: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: Level,

    /// Enable JSON log format
    #[arg(long, env = "LOG_JSON", default_value = "false")]
    log_json: bool,

    /// Print CRD YAML and exit
    #[arg(long)]
    print_crd: bool,
}

impl Args {
    fn controller_config(&self) -> ControllerConfig {
        let namespace = self.namespace.trim();
        ControllerConfig {
            namespace: (!namespace.is_empty()).then(|| namespace.to_string()),
            field_manager: self.field_manager.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_crd {
        print_crd()?;
        return Ok(());
    }

    init_logging(&args)?;

    let config = args.controller_config();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        namespace = config.namespace.as_deref().unwrap_or("all"),
        "Starting Hotel Reservation Kubernetes Operator"
    );

    let metrics_addr = args.metrics_addr;
    tokio::spawn(async move {
        if let Err(e) = start_metrics_server(metrics_addr).await {
            tracing::error!(error = %e, "Metrics server failed");
        }
    });

    let health_addr = args.health_addr;
    tokio::spawn(async move {
        if let Err(e) = start_health_server(health_addr).await {
            tracing::error!(error = %e, "Health server failed");
        }
    });

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    controller::run_controller(client, config)
        .await
        .context("Controller failed")?;

    Ok(())
}

/// Initialize logging subsystem
fn init_logging(args: &Args) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(args.log_level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(true)
        .with_thread_ids(false)
        .with_line_number(false);

    if args.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    Ok(())
}

/// Start the Prometheus metrics server
async fn start_metrics_server(addr: SocketAddr) -> Result<()> {
    use metrics_exporter_prometheus::PrometheusBuilder;

    info!(address = %addr, "Starting metrics server");

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;

    // The exporter runs on its own task
    std::future::pending::<()>().await;

    Ok(())
}

/// Start the health probe server
async fn start_health_server(addr: SocketAddr) -> Result<()> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    info!(address = %addr, "Starting health server");

    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind health server")?;

    loop {
        let (mut socket, _) = listener.accept().await?;

        tokio::spawn(async move {
            let mut buf = [0; 1024];
            if socket.read(&mut buf).await.is_ok() {
                let response = "HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nOK";
                let _ = socket.write_all(response.as_bytes()).await;
            }
        });
    }
}

/// Print the CRD YAML for installation
fn print_crd() -> Result<()> {
    use kube::CustomResourceExt;

    let crd = HotelReservationApp::crd();
    let yaml = serde_yaml::to_string(&crd)?;
    println!("{}", yaml);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::parse_from(["hotel-reservation-operator"]);
        let config = args.controller_config();
        assert_eq!(config.namespace, None);
        assert_eq!(config.field_manager, DEFAULT_FIELD_MANAGER);
        assert!(!args.print_crd);
    }

    #[test]
    fn test_namespace_and_field_manager_flags() {
        let args = Args::parse_from([
            "hotel-reservation-operator",
            "--namespace",
            "hotel",
            "--field-manager",
            "ops",
            "--log-level",
            "debug",
        ]);
        let config = args.controller_config();
        assert_eq!(config.namespace.as_deref(), Some("hotel"));
        assert_eq!(config.field_manager, "ops");
        assert_eq!(args.log_level, Level::DEBUG);
    }
}
