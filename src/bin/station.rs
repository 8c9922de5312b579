use anyhow::Result;
use clap::Parser;
use nalgebra as na;
use serde::de::DeserializeOwned;
use std::{path::PathBuf, sync::Arc, time::Duration};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::interval;
use tracing::{debug, error, info, warn};
use zenoh::{prelude::r#async::*, Session, SessionDeclarations};

use turtle_station::{
    commander::{CommandEmitter, ZenohCommandSink},
    configuration::AppConfig,
    error::ErrorWrapper,
    localisation::{LaserScan, PoseUpdate, ScanConfig},
    logging,
    station::{
        DestinationMessage, KeyInputMessage, MarkerDetectionMessage, Mode, StationController,
        StationEvent,
    },
};

#[derive(Parser, Debug)]
#[command(version, about = "Turtle ground station")]
struct Args {
    /// path to config
    #[arg(long)]
    config: Option<PathBuf>,

    /// Sets the level of verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbosity: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    logging::setup_tracing(args.verbosity);

    let app_config = AppConfig::load_config(&args.config)?;
    let topics = app_config.topics.clone();

    let zenoh_config = app_config.zenoh.get_zenoh_config()?;
    let zenoh_session = zenoh::open(zenoh_config)
        .res()
        .await
        .map_err(ErrorWrapper::ZenohError)?
        .into_arc();

    let (event_sender, mut event_receiver) = mpsc::channel(16);

    // sensor streams drop samples when the loop is busy, control inputs wait
    spawn_json_listener::<MarkerDetectionMessage, _>(
        zenoh_session.clone(),
        topics.marker.clone(),
        event_sender.clone(),
        true,
        StationEvent::MarkerDetection,
    );
    spawn_json_listener::<PoseUpdate, _>(
        zenoh_session.clone(),
        topics.pose.clone(),
        event_sender.clone(),
        true,
        |pose| StationEvent::PoseUpdate(pose.into()),
    );
    spawn_json_listener::<Mode, _>(
        zenoh_session.clone(),
        topics.mode.clone(),
        event_sender.clone(),
        false,
        StationEvent::ModeSwitch,
    );
    spawn_json_listener::<Option<DestinationMessage>, _>(
        zenoh_session.clone(),
        topics.destination.clone(),
        event_sender.clone(),
        false,
        |destination| {
            StationEvent::Destination(
                destination.map(|destination| na::Point2::new(destination.x, destination.y)),
            )
        },
    );
    spawn_json_listener::<KeyInputMessage, _>(
        zenoh_session.clone(),
        topics.input.clone(),
        event_sender.clone(),
        false,
        StationEvent::KeyInput,
    );
    spawn_scan_forwarder(
        zenoh_session.clone(),
        topics.scan.clone(),
        topics.scan_filtered.clone(),
        app_config.scan.clone(),
    );
    spawn_debug_listener(zenoh_session.clone(), topics.debug.clone());

    zenoh_session
        .put(topics.debug.as_str(), "station online")
        .res_async()
        .await
        .map_err(ErrorWrapper::ZenohError)?;

    let sink = ZenohCommandSink::new(zenoh_session.clone(), topics.cmd_vel.clone());
    let emitter = CommandEmitter::new(Box::new(sink), app_config.command.encoding);
    let mut controller = StationController::new(&app_config, emitter);

    tokio::spawn({
        let event_sender = event_sender.clone();
        async move {
            let mut ticker = interval(Duration::from_millis(100));
            loop {
                ticker.tick().await;
                if event_sender.send(StationEvent::Tick).await.is_err() {
                    return;
                }
            }
        }
    });

    info!("Station started");
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Caught interrupt, exiting");
                break;
            }
            event = event_receiver.recv() => {
                let Some(event) = event else { break };
                if let Err(error) = controller.handle_event(event).await {
                    error!("Failed to handle event: {error:?}");
                }
            }
        }
    }

    // subscribers and the session unwind here, releasing the transport
    Ok(())
}

fn spawn_json_listener<T, F>(
    session: Arc<Session>,
    topic: String,
    sender: mpsc::Sender<StationEvent>,
    drop_when_full: bool,
    into_event: F,
) where
    T: DeserializeOwned + Send + 'static,
    F: Fn(T) -> StationEvent + Send + Sync + 'static,
{
    tokio::spawn(async move {
        if let Err(error) =
            run_json_listener(session, &topic, sender, drop_when_full, into_event).await
        {
            error!(topic = %topic, "Listener failed: {error:?}");
        }
    });
}

async fn run_json_listener<T, F>(
    session: Arc<Session>,
    topic: &str,
    sender: mpsc::Sender<StationEvent>,
    drop_when_full: bool,
    into_event: F,
) -> Result<()>
where
    T: DeserializeOwned + Send + 'static,
    F: Fn(T) -> StationEvent + Send + Sync + 'static,
{
    let subscriber = session
        .declare_subscriber(topic)
        .res()
        .await
        .map_err(ErrorWrapper::ZenohError)?;
    loop {
        let sample = subscriber.recv_async().await?;
        let payload = sample.value.payload.contiguous().to_vec();
        let message: T = match serde_json::from_slice(&payload) {
            Ok(message) => message,
            Err(error) => {
                warn!(topic = %topic, "Dropping malformed payload: {error}");
                continue;
            }
        };
        let event = into_event(message);
        if drop_when_full {
            match sender.try_send(event) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => debug!(topic = %topic, "Consumer busy, dropping sample"),
                Err(TrySendError::Closed(_)) => return Ok(()),
            }
        } else if sender.send(event).await.is_err() {
            return Ok(());
        }
    }
}

/// Gate scans by intensity and hand them to the localization engine's input
/// topic. The engine's pose output comes back through the pose listener.
fn spawn_scan_forwarder(
    session: Arc<Session>,
    topic: String,
    filtered_topic: String,
    scan_config: ScanConfig,
) {
    tokio::spawn(async move {
        if let Err(error) = run_scan_forwarder(session, &topic, &filtered_topic, scan_config).await
        {
            error!(topic = %topic, "Scan forwarder failed: {error:?}");
        }
    });
}

async fn run_scan_forwarder(
    session: Arc<Session>,
    topic: &str,
    filtered_topic: &str,
    scan_config: ScanConfig,
) -> Result<()> {
    let subscriber = session
        .declare_subscriber(topic)
        .res()
        .await
        .map_err(ErrorWrapper::ZenohError)?;
    loop {
        let sample = subscriber.recv_async().await?;
        let payload = sample.value.payload.contiguous().to_vec();
        let mut scan = match LaserScan::decode(&payload) {
            Ok(scan) => scan,
            Err(error) => {
                warn!(topic = %topic, "Dropping malformed scan: {error}");
                continue;
            }
        };
        scan.gate_by_intensity(&scan_config);
        session
            .put(filtered_topic, scan.encode()?)
            .res_async()
            .await
            .map_err(ErrorWrapper::ZenohError)?;
    }
}

fn spawn_debug_listener(session: Arc<Session>, topic: String) {
    tokio::spawn(async move {
        if let Err(error) = run_debug_listener(session, &topic).await {
            error!(topic = %topic, "Debug listener failed: {error:?}");
        }
    });
}

async fn run_debug_listener(session: Arc<Session>, topic: &str) -> Result<()> {
    let subscriber = session
        .declare_subscriber(topic)
        .res()
        .await
        .map_err(ErrorWrapper::ZenohError)?;
    loop {
        let sample = subscriber.recv_async().await?;
        match String::try_from(sample.value) {
            Ok(message) => info!(topic = %topic, "{message}"),
            Err(error) => warn!(topic = %topic, "Undecodable debug message: {error}"),
        }
    }
}
