// bin/sensornode.rs

use clap::Parser;
use log::*;
use tokio::sync::Mutex;

use sensornode::*;

fn main() -> anyhow::Result<()> {
    env_logger::init();
    info!("Hello.");
    info!("Starting sensornode {FW_VERSION}");

    let config = MyConfig::parse();
    config.validate()?;
    info!("My config:\n{config:#?}");

    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?
        .block_on(run(config))
}

async fn run(config: MyConfig) -> anyhow::Result<()> {
    let client = PublishClient::new(config.publish_config());
    let diag = DiagnosticsChannel::new(client.clone(), &config.sensor_id, &config.info_topic);
    let link = TcpLink::new(&config.broker_addr);

    let channels = build_channels(&config, &diag).await?;
    let controller = CycleController::new(&config, channels, client.clone(), diag.clone())?;

    info!("Entering main loop...");
    tokio::select! {
        res = controller.run() => { error!("cycle controller ended: {res:?}"); }
        res = client.run(link) => { error!("publish client ended: {res:?}"); }
    }
    bail!("main loop exited");
}

// The DHT22 and BMP180 sit behind external drivers on real hardware; their
// channels get simulated stand-ins so the agent runs end to end anywhere.
async fn build_channels(config: &MyConfig, diag: &DiagnosticsChannel) -> anyhow::Result<Vec<Channel>> {
    let mut channels = vec![
        Channel::new(
            ChannelKind::Temperature,
            Box::new(SimulatedSource::new(21.0, 1.5, 0.05)),
        ),
        Channel::new(
            ChannelKind::Humidity,
            Box::new(SimulatedSource::new(55.0, 8.0, 0.05)),
        ),
        Channel::new(
            ChannelKind::Bmp180Temperature,
            Box::new(SimulatedSource::new(21.5, 1.0, 0.01)),
        ),
        Channel::new(
            ChannelKind::Bmp180Airpressure,
            Box::new(SimulatedSource::new(101_325.0, 150.0, 0.01)),
        ),
    ];

    let device: Box<dyn ParticulateSensor> = match config.particulate_sensor {
        ParticulateKind::Honeywell => {
            diag.emit("initialising Honeywell sensor").await;
            let mut sensor = honeywell::Honeywell::open(&config.particulate_port)?;
            diag.emit("starting particulate measurements").await;
            sensor.start_measuring().await?;
            Box::new(sensor)
        }
        ParticulateKind::Sds011 => {
            diag.emit("initialising Nova SDS-011 sensor").await;
            Box::new(sds011::Sds011::open(&config.particulate_port)?)
        }
        ParticulateKind::Simulated => {
            diag.emit("no particulate sensor attached, using simulated readings")
                .await;
            Box::new(SimulatedParticulate::new())
        }
    };
    let device = Arc::new(Mutex::new(device));

    channels.push(Channel::new(
        ChannelKind::Pm25,
        Box::new(ParticulateSource::new(device.clone(), ParticulateField::Pm25)),
    ));
    channels.push(Channel::new(
        ChannelKind::Pm10,
        Box::new(ParticulateSource::new(device, ParticulateField::Pm10)),
    ));
    Ok(channels)
}

// EOF
