//! `maskforge` binary: HTTP server plus offline mask tooling.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use clap::{Parser, Subcommand};
use maskforge_app::{
    MultipartInput, RouteResponse, ServerConfig, ServerContext, UploadedFile, app_version,
    derive_mask_files, expand_file, handle_combine, handle_edit, handle_generate,
    handle_understand, letterbox_file, routes,
};
use serde::Deserialize;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Masked image editing server and tools.
#[derive(Parser, Debug)]
#[command(name = "maskforge", version, about, long_about = None)]
struct Cli {
    /// Enable debug logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP server configured from the environment.
    Serve,
    /// Diff an annotated layer against its clean render and write the edit mask.
    DeriveMask {
        /// Clean composited layer.
        #[arg(long, value_name = "PNG")]
        original: PathBuf,
        /// Same layer with strokes drawn on it.
        #[arg(long, value_name = "PNG")]
        annotated: PathBuf,
        /// Mask output path.
        #[arg(long, value_name = "PNG")]
        out: PathBuf,
    },
    /// Center an image on a 2x canvas and write the preserve mask.
    Expand {
        /// Source image.
        #[arg(long, value_name = "FILE")]
        image: PathBuf,
        /// Expanded image output path.
        #[arg(long, value_name = "PNG")]
        out_image: PathBuf,
        /// Preserve mask output path.
        #[arg(long, value_name = "PNG")]
        out_mask: PathBuf,
    },
    /// Letterbox an image onto a white surface of the given size.
    Letterbox {
        /// Source image.
        #[arg(long, value_name = "FILE")]
        image: PathBuf,
        /// Surface width in pixels.
        #[arg(long)]
        width: u32,
        /// Surface height in pixels.
        #[arg(long)]
        height: u32,
        /// Output path.
        #[arg(long, value_name = "PNG")]
        out: PathBuf,
    },
}

fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("maskforge={log_level}").into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    if let Err(err) = run(cli.command) {
        error!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

fn run(command: Command) -> Result<()> {
    match command {
        Command::Serve => serve(),
        Command::DeriveMask {
            original,
            annotated,
            out,
        } => {
            let edited = derive_mask_files(&original, &annotated, &out)
                .context("mask derivation failed")?;
            info!(
                stage = "cli",
                action = "derive_mask",
                edited_pixels = edited,
                out = %out.display()
            );
            Ok(())
        }
        Command::Expand {
            image,
            out_image,
            out_mask,
        } => {
            let (width, height) =
                expand_file(&image, &out_image, &out_mask).context("expansion failed")?;
            info!(stage = "cli", action = "expand", width, height);
            Ok(())
        }
        Command::Letterbox {
            image,
            width,
            height,
            out,
        } => {
            letterbox_file(&image, width, height, &out).context("letterbox failed")?;
            info!(stage = "cli", action = "letterbox", width, height, out = %out.display());
            Ok(())
        }
    }
}

fn serve() -> Result<()> {
    let config = ServerConfig::from_env().context("invalid configuration")?;
    info!(stage = "config", action = "loaded", config = ?config);

    // Blocking HTTP clients must be built and dropped outside the runtime.
    let context = Arc::new(ServerContext::from_config(&config).context("server setup failed")?);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    runtime.block_on(serve_http(&config, Arc::clone(&context)))?;
    drop(runtime);
    drop(context);
    Ok(())
}

async fn serve_http(config: &ServerConfig, context: Arc<ServerContext>) -> Result<()> {
    let body_limit = config.max_upload_bytes.saturating_mul(8).saturating_add(1024 * 1024);
    let app = Router::new()
        .route("/", get(health))
        .route(routes::GENERATE, post(generate))
        .route(routes::EDIT, post(edit))
        .route(routes::COMBINE, post(combine))
        .route(routes::UNDERSTAND, post(understand))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(context);

    let addr = config.socket_addr();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(stage = "server", action = "listening", %addr, version = app_version());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server terminated abnormally")
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!(stage = "server", action = "shutdown_requested");
    }
}

async fn health() -> String {
    format!("maskforge server {} is running", app_version())
}

#[derive(Debug, Default, Deserialize)]
struct GenerateBody {
    prompt: Option<String>,
}

async fn generate(
    State(context): State<Arc<ServerContext>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let headers = header_pairs(&headers);
    let prompt = serde_json::from_slice::<GenerateBody>(&body)
        .unwrap_or_default()
        .prompt;
    blocking(move || handle_generate(&context, &headers, prompt.as_deref())).await
}

async fn edit(
    State(context): State<Arc<ServerContext>>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Response {
    multipart_route(context, headers, multipart, handle_edit).await
}

async fn combine(
    State(context): State<Arc<ServerContext>>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Response {
    multipart_route(context, headers, multipart, handle_combine).await
}

async fn understand(
    State(context): State<Arc<ServerContext>>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Response {
    multipart_route(context, headers, multipart, handle_understand).await
}

type MultipartHandler = fn(&ServerContext, &[(String, String)], &MultipartInput) -> RouteResponse;

async fn multipart_route(
    context: Arc<ServerContext>,
    headers: HeaderMap,
    multipart: Multipart,
    handler: MultipartHandler,
) -> Response {
    let headers = header_pairs(&headers);
    let input = match read_multipart(multipart).await {
        Ok(input) => input,
        Err(response) => return into_http(response),
    };
    blocking(move || handler(&context, &headers, &input)).await
}

async fn read_multipart(mut multipart: Multipart) -> Result<MultipartInput, RouteResponse> {
    let mut input = MultipartInput::default();
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => return Ok(input),
            Err(error) => {
                return Err(RouteResponse::validation(format!(
                    "Malformed multipart body: {error}"
                )));
            }
        };

        let name = field.name().unwrap_or_default().to_string();
        match field.file_name().map(str::to_string) {
            Some(filename) => {
                let content_type = field.content_type().map(str::to_string);
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|error| {
                        RouteResponse::validation(format!("Could not read `{name}`: {error}"))
                    })?;
                input.files.push(UploadedFile {
                    field: name,
                    filename,
                    content_type,
                    bytes: bytes.to_vec(),
                });
            }
            None => {
                let value = field
                    .text()
                    .await
                    .map_err(|error| {
                        RouteResponse::validation(format!("Could not read `{name}`: {error}"))
                    })?;
                input.fields.push((name, value));
            }
        }
    }
}

async fn blocking<F>(work: F) -> Response
where
    F: FnOnce() -> RouteResponse + Send + 'static,
{
    match tokio::task::spawn_blocking(work).await {
        Ok(response) => into_http(response),
        Err(join_error) => {
            error!(stage = "server", action = "handler_panicked", error = %join_error);
            into_http(RouteResponse::internal("An unexpected server error occurred."))
        }
    }
}

fn into_http(response: RouteResponse) -> Response {
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, axum::Json(response.body)).into_response()
}

fn header_pairs(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_string(), value.to_string()))
        })
        .collect()
}
