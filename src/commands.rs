pub mod serve {
    use crate::chip_tool::ProcessExecutor;
    use crate::commissioning::CommissioningOrchestrator;
    use crate::datamodel::{BundledDictionary, DataModelDictionary};
    use crate::gateway::CommandGateway;
    use crate::mqtt::MqttController;
    use crate::notify::Broadcaster;
    use crate::polling::{PollingConfig, PollingControl, PollingEngine};
    use crate::registry::Registry;
    use std::sync::Arc;

    /// Starts the bridge: opens the device database, boots the polling engine, connects to the
    /// MQTT broker and serves the HTTP/WebSocket API until the process receives a shutdown signal.
    #[derive(clap::Parser)]
    pub struct Args {
        #[clap(flatten)]
        config: crate::config::Args,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error(transparent)]
        Registry(#[from] crate::registry::Error),
        #[error(transparent)]
        Mqtt(#[from] crate::mqtt::Error),
        #[error("could not bind the HTTP server to {1}")]
        Bind(#[source] std::io::Error, std::net::SocketAddr),
        #[error("HTTP server failed")]
        Serve(#[source] std::io::Error),
    }

    pub fn run(args: Args) -> Result<(), Error> {
        let config = args.config;
        init_tracing(&config);

        tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .expect("failed to start the tokio runtime")
            .block_on(serve(config))
    }

    async fn serve(config: crate::config::Args) -> Result<(), Error> {
        let dict: Arc<dyn DataModelDictionary> = Arc::new(BundledDictionary::default());

        let registry = Registry::open(&config.database_path).await?;

        let executor = Arc::new(ProcessExecutor::new(
            config.chip_tool_path.clone(),
            config.commissioning_dir.clone(),
            config.paa_cert_dir_path.clone(),
            config.max_concurrent_processes,
            config.command_retries,
            Arc::clone(&dict),
        ));

        let polling_control = Arc::new(PollingControl::default());
        let polling = Arc::new(PollingEngine::new(
            registry.clone(),
            Arc::clone(&executor),
            Arc::clone(&polling_control),
            PollingConfig {
                polling_interval: config.polling_interval(),
                max_concurrent_devices: config.max_concurrent_devices,
                command_timeout: config.command_timeout(),
                device_error_stop: config.device_error_stop,
                auto_discovery_interval: config.auto_discovery_interval(),
            },
        ));
        polling.start().await?;

        let gateway = Arc::new(CommandGateway::new(Arc::clone(&executor), Arc::clone(&polling)));
        let commissioning = Arc::new(CommissioningOrchestrator::new(
            Arc::clone(&executor),
            registry.clone(),
            Arc::clone(&dict),
        ));

        let mqtt = MqttController::connect(
            &config.mqtt_broker_url,
            config.mqtt_broker_port,
            registry.clone(),
            Arc::clone(&dict),
            Arc::clone(&gateway),
        )
        .await?;
        mqtt.publish_all_devices().await?;
        spawn_mqtt_forwarder(Arc::clone(&polling), Arc::clone(&mqtt), registry.clone());

        let broadcaster = Broadcaster::new(polling.change_sender());

        let state = crate::http::AppState {
            registry: registry.clone(),
            gateway,
            commissioning,
            dict,
            broadcaster,
            mqtt: Arc::clone(&mqtt),
            polling: Arc::clone(&polling),
        };
        let router = crate::http::router(state);

        let listener = tokio::net::TcpListener::bind(config.http_bind_addr)
            .await
            .map_err(|e| Error::Bind(e, config.http_bind_addr))?;
        tracing::info!(message = "matter-fabric-bridge listening", addr = %config.http_bind_addr);

        let shutdown = shutdown_signal();
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(Error::Serve)?;

        polling.stop();
        let _ = mqtt.shutdown().await;
        Ok(())
    }

    /// Forwards every change event the Polling Engine emits to the MQTT Controller's retained
    /// value topic, independently of the WebSocket fan-out -- a publish failure here is logged and
    /// never blocks the polling loop that produced the event (C10/C11 error isolation).
    fn spawn_mqtt_forwarder(polling: Arc<PollingEngine>, mqtt: Arc<MqttController>, registry: Registry) {
        let mut events = polling.subscribe();
        tokio::task::spawn(async move {
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                };
                let device = match registry.get_device(event.device.node, event.device.endpoint).await {
                    Ok(Some(device)) => device,
                    Ok(None) => continue,
                    Err(e) => {
                        tracing::warn!(message = "could not look up device for mqtt forward", error = %e);
                        continue;
                    }
                };
                if let Err(e) =
                    mqtt.publish_value(&device, &event.data.cluster, &event.data.attribute, &event.data.value).await
                {
                    tracing::warn!(message = "mqtt publish of changed value failed", error = %e);
                }
            }
        });
    }

    async fn shutdown_signal() {
        let ctrl_c = async {
            let _ = tokio::signal::ctrl_c().await;
        };
        #[cfg(unix)]
        let terminate = async {
            let Ok(mut sigterm) = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) else {
                return;
            };
            sigterm.recv().await;
        };
        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {}
            _ = terminate => {}
        }
        tracing::info!("shutdown signal received");
    }

    fn init_tracing(config: &crate::config::Args) {
        use tracing_subscriber::EnvFilter;
        let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(config.enable_colored_logs)
            .init();
    }
}
