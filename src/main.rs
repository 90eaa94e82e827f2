//! CLI Entry Point for sem_remcon
//!
//! Talks to one console over its serial link:
//! - `status`: beam, imaging and stage readout
//! - `kv`, `mag`: set accelerating voltage or magnification
//! - `stage pose|move|step|insert`: stage motion with settle polling
//!
//! # Usage
//!
//! ```bash
//! sem_remcon --config config/sem_remcon.toml status
//! sem_remcon stage step rot -10
//! SEM_REMCON_SERIAL__PORT=/dev/ttyUSB1 sem_remcon stage insert
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, info};

use sem_remcon::config::{RemconConfig, DEFAULT_CONFIG_PATH};
use sem_remcon::logging;
use sem_remcon::remcon::RemconClient;
use sem_remcon::stage::{MotionRequest, StageAxis, StageController};

#[derive(Parser)]
#[command(name = "sem_remcon")]
#[command(about = "Remote control for RemCon32 SEM consoles", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Override the serial port from the configuration
    #[arg(long)]
    port: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print beam, imaging and stage readout
    Status,

    /// Set accelerating voltage in kV (clamped to 0..=30)
    Kv {
        /// Voltage in kV
        value: f64,
    },

    /// Set magnification (clamped to 5..=1e6)
    Mag {
        /// Magnification
        value: f64,
    },

    /// Stage motion
    Stage {
        #[command(subcommand)]
        action: StageCommands,
    },
}

#[derive(Subcommand)]
enum StageCommands {
    /// Print the current pose
    Pose,

    /// Absolute move; omitted axes stay put
    Move {
        /// X target
        #[arg(long)]
        x: Option<f64>,
        /// Y target
        #[arg(long)]
        y: Option<f64>,
        /// Z target
        #[arg(long)]
        z: Option<f64>,
        /// Tilt target
        #[arg(long)]
        tilt: Option<f64>,
        /// Rotation target in degrees
        #[arg(long)]
        rot: Option<f64>,
    },

    /// Relative step on one axis (x, y, z, tilt, rot)
    Step {
        /// Axis name
        axis: StageAxis,
        /// Signed step
        #[arg(allow_hyphen_values = true)]
        delta: f64,
    },

    /// Travel to the configured specimen exchange position
    Insert,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = RemconConfig::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(port) = cli.port {
        config.serial.port = port;
    }
    config.validate()?;
    logging::init_from_config(&config)?;

    let client = Arc::new(
        RemconClient::open(&config)
            .await
            .with_context(|| format!("opening console on {}", config.serial.port))?,
    );
    info!(port = %config.serial.port, "Connected to console");

    let outcome = run(cli.command, &config, client.clone()).await;
    client.close().await?;
    outcome
}

async fn run(command: Commands, config: &RemconConfig, client: Arc<RemconClient>) -> Result<()> {
    match command {
        Commands::Status => {
            println!("EHT:        {:.3} kV", client.get_kv().await?);
            println!("Mag:        {:.1}x", client.get_mag().await?);
            println!("WD:         {:.4} mm", client.get_wd().await?);
            println!("Pixel size: {:.3} nm", client.get_pixel_size().await? * 1e9);
            println!("Full size:  {:.3} um", client.get_full_size().await? * 1e6);
            println!("Detector:   {}", client.get_detector().await?);
            println!(
                "Stage:      {} ({})",
                client.get_stage_pose().await?,
                if client.get_stage_initialized().await? {
                    "initialised"
                } else {
                    "not initialised"
                }
            );
        }
        Commands::Kv { value } => {
            client.set_kv(value).await?;
            println!("EHT requested: {value} kV");
        }
        Commands::Mag { value } => {
            client.set_mag(value).await?;
            println!("Mag now {:.1}x", client.get_mag().await?);
        }
        Commands::Stage { action } => {
            let mut controller = StageController::new(client, config.stage.motion_settings());
            if let Some(arc) = config.stage.forbidden_arc() {
                controller = controller.with_rotation_policy(arc);
            }
            // Ends when the controller is dropped
            let mut status = controller.subscribe();
            tokio::spawn(async move {
                while status.changed().await.is_ok() {
                    let current = *status.borrow_and_update();
                    debug!(state = ?current.state, pose = ?current.last_pose, "Stage status");
                }
            });
            run_stage(action, config, &controller).await?;
        }
    }
    Ok(())
}

async fn run_stage(
    action: StageCommands,
    config: &RemconConfig,
    controller: &StageController<RemconClient>,
) -> Result<()> {
    let pose = match action {
        StageCommands::Pose => controller.link().get_stage_pose().await?,
        StageCommands::Move {
            x,
            y,
            z,
            tilt,
            rot,
        } => {
            let request = MotionRequest {
                x,
                y,
                z,
                tilt,
                rotation: rot,
            };
            if request.is_empty() {
                anyhow::bail!("stage move needs at least one of --x --y --z --tilt --rot");
            }
            let current = controller.link().get_stage_pose().await?;
            controller
                .move_to_target(&request, current.rotation)
                .await?
        }
        StageCommands::Step { axis, delta } => controller.step(axis, delta).await?,
        StageCommands::Insert => {
            controller
                .move_to_insert_position(&config.stage.insert)
                .await?
        }
    };
    println!("{pose}");
    Ok(())
}
