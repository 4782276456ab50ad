use clap::{Parser, Subcommand, ValueEnum};
use std::{error::Error, time::Duration};
use webcontrol::{
    Gateway, ScanOptions,
    command::{Intent, POSITION_CLOSED},
    http::{HttpConfig, HttpTransport},
    topology::ChannelRecord,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Base URL of the gateway
    #[arg(short, long, default_value = "http://192.168.99.198")]
    url: String,

    /// Request timeout in seconds
    #[arg(short, long, default_value_t = 5)]
    timeout: u64,

    #[command(subcommand)]
    action: Action,
}

#[derive(Subcommand, Debug)]
enum Action {
    /// List rooms and controllable channels
    Discover,
    /// Read the state of a room slot
    Poll {
        /// Room index
        room: u8,
        /// Slot index within the room
        slot: u8,
    },
    /// Move a cover
    Move {
        /// Channel list index
        channel: u8,
        #[arg(value_enum)]
        direction: Direction,
        /// Target opening in percent (100 = fully open), only used with `position`
        #[arg(short, long, default_value_t = 100, value_parser = clap::value_parser!(u8).range(0..=100))]
        percent: u8,
    },
    /// Switch a light
    Light {
        /// Channel list index
        channel: u8,
        #[arg(value_enum)]
        state: LightState,
    },
}

#[derive(ValueEnum, Copy, Clone, Debug)]
enum Direction {
    Open,
    Close,
    Stop,
    Position,
}

#[derive(ValueEnum, Copy, Clone, Debug)]
enum LightState {
    On,
    Off,
}

/// Converts an opening percentage to the gateway's raw position.
fn raw_position(percent: u8) -> u8 {
    let closed = u16::from(100 - percent.min(100)) * u16::from(POSITION_CLOSED) / 100;

    u8::try_from(closed).unwrap_or(POSITION_CLOSED)
}

async fn find_channel(
    gateway: &Gateway<HttpTransport>,
    index: u8,
) -> Result<ChannelRecord, Box<dyn Error>> {
    let inst = gateway.initialize(&ScanOptions::default()).await?;

    inst.valid
        .into_iter()
        .find(|ch| ch.channel_index == index)
        .ok_or_else(|| format!("channel {index} not found").into())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let args = Args::parse();
    let config = HttpConfig {
        base_url: args.url,
        timeout: Duration::from_secs(args.timeout),
    };
    let gateway = webcontrol::http::connect(&config)?;

    match args.action {
        Action::Discover => {
            let inst = gateway.initialize(&ScanOptions::default()).await?;

            println!("Language: {:?}", gateway.session_info().await.language());
            println!("Winter mode: {:?}", inst.winter_active);

            for (idx, (room, slot)) in inst.matrix.iter() {
                let name = inst.matrix.room_name(room).unwrap_or_default();

                println!("Channel {idx:3} -> room {room} ({name}), slot {slot}");
            }

            for ch in &inst.covers {
                println!("Cover {:3}: {}", ch.channel_index, ch.name);
            }

            for ch in &inst.lights {
                println!("Light {:3}: {}", ch.channel_index, ch.name);
            }
        }
        Action::Poll { room, slot } => match gateway.poll(room, slot).await? {
            Some(state) => println!(
                "Position: {:?}, angle: {:?}",
                state.last_position, state.last_angle
            ),
            None => println!("No data"),
        },
        Action::Move {
            channel,
            direction,
            percent,
        } => {
            let ch = find_channel(&gateway, channel).await?;
            let intent = match direction {
                Direction::Open => Intent::Raise,
                Direction::Close => Intent::Lower,
                Direction::Stop => Intent::Stop,
                Direction::Position => Intent::SetPosition(raw_position(percent)),
            };
            let resp = gateway.execute(&ch, intent).await?;

            println!("Response: {:?}", resp.response_id());
        }
        Action::Light { channel, state } => {
            let ch = find_channel(&gateway, channel).await?;
            let resp = match state {
                LightState::On => gateway.light_on(&ch).await?,
                LightState::Off => gateway.light_off(&ch).await?,
            };

            println!("Response: {:?}", resp.response_id());
        }
    }

    Ok(())
}
