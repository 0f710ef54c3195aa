use std::{env, path::PathBuf, sync::Arc, time::Duration};

use engine_core::{ConnectionState, EngineConfig, EngineEvent, Step};
use engine_platform::{
    FileDeviceIdentity, JsonFileSettingsStore, LAST_ENDPOINT_KEY, SettingsStore,
};
use engine_ws::spawn;
use tokio::sync::broadcast;

mod logging;

const EVENT_WAIT: Duration = Duration::from_secs(20);

#[tokio::main]
async fn main() {
    logging::init();

    let data_dir = env::var("TAPVOLT_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./.tapvolt-smoke"));
    let settings = JsonFileSettingsStore::new(data_dir.join("settings.json"));

    let host = env::var("TAPVOLT_HOST")
        .ok()
        .filter(|value| !value.trim().is_empty())
        .or_else(|| settings.get(LAST_ENDPOINT_KEY).ok().flatten());
    let Some(host) = host else {
        eprintln!("Set TAPVOLT_HOST (e.g. 192.168.1.20:8080) to run the live smoke flow.");
        std::process::exit(1);
    };
    let client_name =
        env::var("TAPVOLT_CLIENT_NAME").unwrap_or_else(|_| "tapvolt-mobile".to_owned());

    let identity = Arc::new(FileDeviceIdentity::new(data_dir.join("device-id")));
    let (engine, _engine_task) = spawn(EngineConfig::default(), identity);
    let mut events = engine.subscribe();

    engine.connect(&host);
    wait_for(&mut events, "connection", |event| {
        matches!(event, EngineEvent::Connected)
    })
    .await;
    println!("Connected to {host}.");

    if !engine.authenticate(&client_name).await {
        eprintln!("Authentication could not be sent.");
        std::process::exit(1);
    }
    let auth = wait_for(&mut events, "auth outcome", |event| {
        matches!(
            event,
            EngineEvent::AuthSucceeded | EngineEvent::AuthFailed { .. }
        )
    })
    .await;
    match auth {
        EngineEvent::AuthSucceeded => println!("Authenticated as {client_name}."),
        EngineEvent::AuthFailed { message } => {
            eprintln!("Authentication rejected: {message}");
            std::process::exit(1);
        }
        _ => unreachable!(),
    }

    if let Some(text) = env::var("TAPVOLT_SMOKE_TEXT").ok().filter(|v| !v.is_empty()) {
        let id = engine
            .send_action(Step::Text { value: text })
            .await
            .expect("live action dispatch failed");
        println!("Dispatched action {id}.");

        let outcome = wait_for(&mut events, "action result", |event| {
            matches!(event, EngineEvent::ActionResult(result) if result.id == id)
        })
        .await;
        if let EngineEvent::ActionResult(result) = outcome {
            println!(
                "Action {} finished with status {:?} in {} ms.",
                result.id, result.status, result.execution_time
            );
        }
    } else {
        println!("Set TAPVOLT_SMOKE_TEXT to dispatch a text action.");
    }

    if let Err(err) = settings.put(LAST_ENDPOINT_KEY, &host) {
        eprintln!("Could not remember the endpoint: {err}");
    }

    engine.disconnect();
}

/// Drain events until one matches, echoing engine errors along the way.
async fn wait_for<F>(
    events: &mut broadcast::Receiver<EngineEvent>,
    what: &str,
    mut is_match: F,
) -> EngineEvent
where
    F: FnMut(&EngineEvent) -> bool,
{
    let waited = tokio::time::timeout(EVENT_WAIT, async {
        loop {
            let event = events.recv().await.expect("engine event stream closed");
            if let EngineEvent::Error(err) = &event {
                eprintln!("engine error: {err}");
            }
            if let EngineEvent::StateChanged { state, .. } = &event
                && *state == ConnectionState::Error
            {
                eprintln!("engine entered the ERROR state while waiting for {what}");
                std::process::exit(1);
            }
            if is_match(&event) {
                return event;
            }
        }
    })
    .await;

    match waited {
        Ok(event) => event,
        Err(_) => {
            eprintln!("Timed out waiting for {what}.");
            std::process::exit(1);
        }
    }
}
