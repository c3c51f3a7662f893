use pc321mqtt::{metering_pc321::discovery_messages, Config, MqttConnection, MqttManager, Pc321Manager, Transmission};
use std::process::ExitCode;
use std::time::Duration;
use log::{error, info};

/* bounded hand-off between the MQTT event loop and the pipeline */
const INCOMING_QUEUE_SIZE: usize = 10;

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize logging
    let default_filter = std::env::var("PC321_LOG_LEVEL").unwrap_or("info".to_string());
    env_logger::init_from_env(env_logger::Env::new().default_filter_or(default_filter));

    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let mut connection = MqttConnection::new(&config.mqtt);
    let (mut mqtt, sender) = MqttManager::new(connection.client());
    let (incoming_tx, incoming_rx) = tokio::sync::mpsc::channel(INCOMING_QUEUE_SIZE);

    if let Err(e) = connection.connect().await {
        error!("Connect failed: {e}");
        return ExitCode::FAILURE;
    }

    if config.mqtt.ha_enabled {
        for disc in discovery_messages() {
            if let Err(e) = mqtt.publish_discovery(&disc).await {
                error!("Failed to publish {}: {e}", disc.discover_topic);
            }
        }
    }

    if let Err(e) = connection.subscribe(&incoming_tx).await {
        error!("Subscription failed: {e}");
        return ExitCode::FAILURE;
    }

    let eventloop = tokio::spawn(connection.run(incoming_tx));
    let mut mqtt_thread = tokio::spawn(async move {
        mqtt.start_thread().await;
    });
    let mut pc321 = Pc321Manager::new(sender.clone(), incoming_rx);
    let mut pc321_thread = tokio::spawn(async move {
        pc321.start_thread().await;
    });

    info!("All modules started, now waiting for a signal to exit");
    let (mqtt_done, exit_code) = tokio::select! {
        _ = shutdown_signal() => { info!("Shutdown requested"); (false, ExitCode::SUCCESS) }
        _ = &mut pc321_thread => { error!("PC321 thread exited unexpectedly"); (false, ExitCode::FAILURE) }
        _ = &mut mqtt_thread => { error!("MQTT thread exited unexpectedly"); (true, ExitCode::FAILURE) }
    };

    /* graceful disconnect, the message currently in flight may be lost */
    pc321_thread.abort();
    let _ = sender.send(Transmission::Disconnect).await;
    if !mqtt_done {
        let _ = tokio::time::timeout(Duration::from_secs(1), mqtt_thread).await;
    }
    let _ = tokio::time::timeout(Duration::from_millis(250), eventloop).await;

    info!("Subscriber disconnected");
    exit_code
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            error!("Unable to listen for SIGTERM: {e}");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {},
        _ = term.recv() => {},
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
