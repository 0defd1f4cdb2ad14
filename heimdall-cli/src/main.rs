//! Interface en ligne de commande: un seul binaire, cinq actions mutuellement
//! exclusives (`--list`, `--start`, `--enable-ptp`, `--disable-ptp`,
//! `--set-feature`), plus les drapeaux ambiants (`--config`, `-v`,
//! `--metrics-port`).
//!
//! Convention de sortie: `0` succès, `1` erreur de saisie/sémantique
//! (caméra inconnue, feature non reconnue), `2` échec d'exécution (caméra
//! injoignable, délai PTP dépassé, instabilité d'acquisition).

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use heimdall_camera::{Camera, PixelFormat};
use heimdall_gige::acquisition::LoggingCompositeSink;
use heimdall_gige::{GigeSession, SessionConfig};

#[derive(Parser, Debug)]
#[command(name = "heimdall-cli", about = "Orchestration d'une flotte de caméras GigE Vision")]
struct Cli {
    /// Énumère les caméras joignables; avec `--cameras`, ouvre et détaille chacune.
    #[arg(long)]
    list: bool,

    /// Ouvre les caméras listées, synchronise PTP, ordonnance la bande passante,
    /// puis diffuse jusqu'à interruption.
    #[arg(long)]
    start: bool,

    /// Active PTP sur les caméras listées et bloque jusqu'à convergence.
    #[arg(long = "enable-ptp")]
    enable_ptp: bool,

    /// Désactive PTP sur les caméras listées (retour en mode free-run).
    #[arg(long = "disable-ptp")]
    disable_ptp: bool,

    /// Écrit une feature sur les caméras listées (ou toutes, si omis).
    #[arg(long = "set-feature")]
    set_feature: bool,

    /// Liste d'ids de caméras séparés par des virgules.
    #[arg(long)]
    cameras: Option<String>,

    /// Délai en millisecondes avant de démarrer l'acquisition (`--start`).
    #[arg(long)]
    delay: Option<u64>,

    /// Désactive la persistance des images sur disque pendant `--start`.
    #[arg(long = "no-save")]
    no_save: bool,

    /// Nom de la feature à écrire (`--set-feature`).
    #[arg(long)]
    feature: Option<String>,

    /// Valeur à écrire (`--set-feature`).
    #[arg(long)]
    value: Option<String>,

    /// Fichier de configuration en couche au-dessus des valeurs par défaut.
    #[arg(long)]
    config: Option<String>,

    /// Verbosité (`-v` debug, `-vv` trace); sans effet si `RUST_LOG` est défini.
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    verbose: u8,

    /// Démarre un exporteur Prometheus sur ce port.
    #[arg(long = "metrics-port")]
    metrics_port: Option<u16>,
}

#[derive(Debug)]
enum CliError {
    UserInput(String),
    Runtime(String),
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CliError::UserInput(msg) => write!(f, "{msg}"),
            CliError::Runtime(msg) => write!(f, "{msg}"),
        }
    }
}

impl From<heimdall_gige::GigEError> for CliError {
    fn from(err: heimdall_gige::GigEError) -> Self {
        CliError::Runtime(err.to_string())
    }
}

fn parse_camera_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn init_logging(verbose: u8) {
    let default_filter = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn install_metrics_exporter(port: u16) -> Result<(), CliError> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .map_err(|err| CliError::Runtime(format!("failed to install metrics exporter: {err}")))
}

fn load_config(cli: &Cli) -> Result<SessionConfig, CliError> {
    let mut config = SessionConfig::load(cli.config.as_deref())
        .map_err(|err| CliError::UserInput(format!("invalid configuration: {err}")))?;
    if cli.no_save {
        config.save_frames = false;
    }
    if cli.metrics_port.is_some() {
        config.metrics_port = cli.metrics_port;
    }
    Ok(config)
}

/// Mappe un nom de feature logique vers l'un des setters typés exposés par
/// `Camera`. Les noms acceptés recouvrent les champs de `CameraConfig` plus
/// `frame_rate`, la seule feature de `--set-feature` qui n'en fait pas partie.
async fn apply_feature(camera: &mut dyn Camera, feature: &str, value: &str) -> Result<(), CliError> {
    match feature {
        "exposure" | "exposure_micros" | "ExposureTime" => {
            let parsed: f64 = value
                .parse()
                .map_err(|_| CliError::UserInput(format!("invalid exposure value: {value}")))?;
            camera.set_exposure_micros(parsed).await.map_err(|err| CliError::Runtime(err.to_string()))
        }
        "gain" | "gain_db" | "Gain" => {
            let parsed: f64 = value
                .parse()
                .map_err(|_| CliError::UserInput(format!("invalid gain value: {value}")))?;
            camera.set_gain(parsed).await.map_err(|err| CliError::Runtime(err.to_string()))
        }
        "width" | "Width" => {
            let parsed: u32 = value
                .parse()
                .map_err(|_| CliError::UserInput(format!("invalid width value: {value}")))?;
            camera.set_width(parsed).await.map_err(|err| CliError::Runtime(err.to_string()))
        }
        "height" | "Height" => {
            let parsed: u32 = value
                .parse()
                .map_err(|_| CliError::UserInput(format!("invalid height value: {value}")))?;
            camera.set_height(parsed).await.map_err(|err| CliError::Runtime(err.to_string()))
        }
        "frame_rate" | "fps" | "AcquisitionFrameRate" => {
            let parsed: f64 = value
                .parse()
                .map_err(|_| CliError::UserInput(format!("invalid frame rate value: {value}")))?;
            camera.set_frame_rate(parsed).await.map_err(|err| CliError::Runtime(err.to_string()))
        }
        "pixel_format" | "PixelFormat" => {
            let parsed = parse_pixel_format(value)
                .ok_or_else(|| CliError::UserInput(format!("unrecognized pixel format: {value}")))?;
            camera.set_pixel_format(parsed).await.map_err(|err| CliError::Runtime(err.to_string()))
        }
        other => Err(CliError::UserInput(format!("unrecognized feature name: {other}"))),
    }
}

fn parse_pixel_format(value: &str) -> Option<PixelFormat> {
    match value {
        "Mono8" => Some(PixelFormat::Mono8),
        "Mono16" => Some(PixelFormat::Mono16),
        "RGB8" => Some(PixelFormat::RGB8),
        "BGR8" => Some(PixelFormat::BGR8),
        "RGBA8" => Some(PixelFormat::RGBA8),
        "BGRA8" => Some(PixelFormat::BGRA8),
        "YUV422" => Some(PixelFormat::YUV422),
        "YUV422Packed" => Some(PixelFormat::YUV422Packed),
        "BayerRG8" => Some(PixelFormat::BayerRG8),
        "BayerGB8" => Some(PixelFormat::BayerGB8),
        "BayerGR8" => Some(PixelFormat::BayerGR8),
        "BayerBG8" => Some(PixelFormat::BayerBG8),
        _ => None,
    }
}

async fn run_list(mut session: GigeSession, cameras: Option<String>) -> Result<(), CliError> {
    let available = session.discover()?;
    if available.is_empty() {
        println!("no camera reachable on the link");
        return Ok(());
    }

    let Some(raw) = cameras else {
        for identity in &available {
            println!(
                "{}  {} {}  ip={}  dialect={:?}",
                identity.id, identity.vendor, identity.model, identity.current_ip, identity.dialect
            );
        }
        return Ok(());
    };

    let requested = parse_camera_list(&raw);
    let opened = session.open(&requested).await;
    if opened.len() != requested.len() {
        eprintln!("warning: {}/{} requested cameras could not be opened", opened.len(), requested.len());
    }
    let report = session.diagnose();
    print!("{report}");
    session.shutdown().await?;
    Ok(())
}

async fn run_start(
    mut session: GigeSession,
    session_id: &str,
    cameras: String,
    delay_ms: Option<u64>,
) -> Result<(), CliError> {
    let requested = parse_camera_list(&cameras);
    if requested.is_empty() {
        return Err(CliError::UserInput("--cameras must list at least one camera id".into()));
    }
    let opened = session.open(&requested).await;
    if opened.is_empty() {
        return Err(CliError::Runtime("none of the requested cameras could be opened".into()));
    }

    session.synchronize(session_id).await?;
    let plan = session.schedule_bandwidth(session_id).await?;

    let stop_flag = session.stop_flag();
    heimdall_gige::lifecycle::install_interrupt_handler(stop_flag)?;

    if let Some(delay) = delay_ms {
        tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
    }

    session.run_acquisition(session_id, plan.fps_ceiling, Arc::new(LoggingCompositeSink))?;
    session.shutdown().await?;
    Ok(())
}

async fn run_enable_ptp(mut session: GigeSession, session_id: &str, cameras: String) -> Result<(), CliError> {
    let requested = parse_camera_list(&cameras);
    if requested.is_empty() {
        return Err(CliError::UserInput("--cameras must list at least one camera id".into()));
    }
    session.open(&requested).await;
    let state = session.synchronize(session_id).await?;
    println!("PTP converged: {state:?}");
    session.shutdown().await?;
    Ok(())
}

async fn run_disable_ptp(mut session: GigeSession, cameras: String) -> Result<(), CliError> {
    let requested = parse_camera_list(&cameras);
    if requested.is_empty() {
        return Err(CliError::UserInput("--cameras must list at least one camera id".into()));
    }
    let opened = session.open(&requested).await;
    let mut failures = Vec::new();
    for id in &opened {
        if let Some(camera) = session.devices_mut().camera_mut(id) {
            if let Err(err) = camera.set_ptp(false).await {
                failures.push(format!("{id}: {err}"));
            }
        }
    }
    session.shutdown().await?;
    if !failures.is_empty() {
        return Err(CliError::Runtime(format!("failed to disable PTP on: {}", failures.join(", "))));
    }
    Ok(())
}

async fn run_set_feature(
    mut session: GigeSession,
    cameras: Option<String>,
    feature: String,
    value: String,
) -> Result<(), CliError> {
    let requested = match cameras {
        Some(raw) => parse_camera_list(&raw),
        None => {
            let available = session.discover()?;
            available.into_iter().map(|identity| identity.id).collect()
        }
    };
    if requested.is_empty() {
        return Err(CliError::UserInput("no camera available to set a feature on".into()));
    }

    let opened = session.open(&requested).await;
    let mut failures = Vec::new();
    for id in &opened {
        if let Some(camera) = session.devices_mut().camera_mut(id) {
            if let Err(err) = apply_feature(camera.as_mut(), &feature, &value).await {
                failures.push(format!("{id}: {err}"));
            }
        }
    }
    session.shutdown().await?;
    if !failures.is_empty() {
        return Err(CliError::Runtime(format!("failed to apply feature on: {}", failures.join(", "))));
    }
    Ok(())
}

async fn dispatch(cli: Cli) -> Result<(), CliError> {
    let actions = [cli.list, cli.start, cli.enable_ptp, cli.disable_ptp, cli.set_feature];
    let selected = actions.iter().filter(|flag| **flag).count();
    if selected != 1 {
        return Err(CliError::UserInput(
            "exactly one of --list, --start, --enable-ptp, --disable-ptp, --set-feature is required".into(),
        ));
    }

    let config = load_config(&cli)?;
    if let Some(port) = config.metrics_port {
        install_metrics_exporter(port)?;
    }

    let session_id = chrono::Local::now().format("%Y%m%d_%H%M%S").to_string();
    let session = GigeSession::new(config);

    if cli.list {
        run_list(session, cli.cameras).await
    } else if cli.start {
        let cameras = cli
            .cameras
            .ok_or_else(|| CliError::UserInput("--start requires --cameras".into()))?;
        run_start(session, &session_id, cameras, cli.delay).await
    } else if cli.enable_ptp {
        let cameras = cli
            .cameras
            .ok_or_else(|| CliError::UserInput("--enable-ptp requires --cameras".into()))?;
        run_enable_ptp(session, &session_id, cameras).await
    } else if cli.disable_ptp {
        let cameras = cli
            .cameras
            .ok_or_else(|| CliError::UserInput("--disable-ptp requires --cameras".into()))?;
        run_disable_ptp(session, cameras).await
    } else {
        let feature = cli
            .feature
            .ok_or_else(|| CliError::UserInput("--set-feature requires --feature".into()))?;
        let value = cli
            .value
            .ok_or_else(|| CliError::UserInput("--set-feature requires --value".into()))?;
        run_set_feature(session, cli.cameras, feature, value).await
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match dispatch(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(CliError::UserInput(msg)) => {
            eprintln!("error: {msg}");
            ExitCode::from(1)
        }
        Err(CliError::Runtime(msg)) => {
            eprintln!("error: {msg}");
            ExitCode::from(2)
        }
    }
}
