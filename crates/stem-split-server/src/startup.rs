//! Actix server startup + app wiring.
//!
//! Resolves config, bootstraps storage, and registers routes, middleware,
//! static assets and OpenAPI endpoints.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Instant;

use actix_cors::Cors;
use actix_files::{Files, NamedFile};
use actix_web::dev::{Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::http::{Method, StatusCode, header};
use actix_web::rt::System;
use actix_web::{App, Error, HttpServer, web};
use anyhow::Result;
use futures_util::future::{LocalBoxFuture, Ready, ok};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::api;
use crate::config;
use crate::openapi;
use crate::state::AppState;
use crate::storage::Storage;

/// Build server state and start the Actix HTTP server.
pub(crate) async fn run(args: crate::Args) -> Result<()> {
    let cfg = load_config(args.config.as_ref())?;
    let bind = resolve_bind(args.bind, &cfg)?;
    let upload_dir = args
        .upload_dir
        .unwrap_or_else(|| config::upload_dir_from_config(&cfg));
    let output_dir = args
        .output_dir
        .unwrap_or_else(|| config::output_dir_from_config(&cfg));
    let separator = config::separator_from_config(&cfg)?;
    let storage = Storage::bootstrap(&upload_dir, &output_dir)?;
    let web_ui_dir = config::web_ui_dir_from_config(&cfg).or_else(locate_web_ui_dir);
    let cors_origins = cfg.cors_origins.clone().unwrap_or_default();

    tracing::info!(
        bind = %bind,
        upload_dir = %storage.upload_root().display(),
        output_dir = %storage.output_root().display(),
        program = %separator.program,
        args = ?separator.args,
        model = %separator.model_dir(),
        "starting stem-split-server"
    );
    match web_ui_dir.as_ref() {
        Some(dir) => tracing::info!(path = %dir.display(), "web ui enabled"),
        None => tracing::warn!("web ui disabled (web-ui directory not found)"),
    }

    let state = web::Data::new(AppState::new(storage, separator));
    setup_shutdown();

    HttpServer::new(move || {
        let mut app = App::new()
            .app_data(state.clone())
            .wrap(build_cors(&cors_origins))
            .wrap(RequestLogger)
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}")
                    .url("/api-doc/openapi.json", openapi::ApiDoc::openapi()),
            )
            .service(api::health_check)
            .service(api::separate_track)
            .service(api::download_stem);

        if let Some(dir) = web_ui_dir.clone() {
            let static_dir = dir.join("static");
            if static_dir.exists() {
                app = app.service(Files::new("/static", static_dir));
            }

            let index_path = dir.join("index.html");
            if index_path.exists() {
                app = app.service(
                    web::resource("/").route(web::get().to(move || serve_index(index_path.clone()))),
                );
            }
        }

        app
    })
    .bind(bind)?
    .run()
    .await?;

    Ok(())
}

fn build_cors(origins: &[String]) -> Cors {
    let mut cors = Cors::default()
        .allowed_methods(vec!["GET", "POST"])
        .allowed_headers(vec![actix_web::http::header::CONTENT_TYPE])
        .max_age(3600);
    for origin in origins {
        cors = cors.allowed_origin(origin);
    }
    cors
}

/// Return true when the request path should be logged.
fn should_log_path(path: &str) -> bool {
    !(path == "/health" || path.starts_with("/static/") || path.starts_with("/swagger-ui/"))
}

/// Request fields captured before the handler consumes the request.
#[derive(Debug)]
struct RequestLine {
    method: Method,
    path: String,
    peer: String,
    user_agent: String,
    started: Instant,
}

impl RequestLine {
    /// Capture a request, or `None` when its path is filtered out.
    fn capture(req: &ServiceRequest) -> Option<Self> {
        if !should_log_path(req.path()) {
            return None;
        }
        Some(Self {
            method: req.method().clone(),
            path: req.path().to_string(),
            peer: req
                .connection_info()
                .realip_remote_addr()
                .unwrap_or("-")
                .to_string(),
            user_agent: req
                .headers()
                .get(header::USER_AGENT)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("-")
                .to_string(),
            started: Instant::now(),
        })
    }

    /// Elapsed time is measured to the response head; SSE bodies run on afterwards.
    fn finish(&self, status: StatusCode) {
        let elapsed_ms = self.started.elapsed().as_millis() as u64;
        if status.is_server_error() {
            tracing::warn!(
                method = %self.method,
                path = %self.path,
                status = status.as_u16(),
                peer = %self.peer,
                user_agent = %self.user_agent,
                elapsed_ms,
                "http request failed"
            );
        } else {
            tracing::info!(
                method = %self.method,
                path = %self.path,
                status = status.as_u16(),
                peer = %self.peer,
                user_agent = %self.user_agent,
                elapsed_ms,
                "http request"
            );
        }
    }
}

/// Middleware logging one line per request, skipping noisy paths.
struct RequestLogger;

impl<S, B> Transform<S, ServiceRequest> for RequestLogger
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = RequestLoggerService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(RequestLoggerService { inner: service })
    }
}

struct RequestLoggerService<S> {
    inner: S,
}

impl<S, B> Service<ServiceRequest> for RequestLoggerService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    actix_web::dev::forward_ready!(inner);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let line = RequestLine::capture(&req);
        let response = self.inner.call(req);
        Box::pin(async move {
            let res = response.await?;
            if let Some(line) = line {
                line.finish(res.status());
            }
            Ok(res)
        })
    }
}

/// Load server config from `--config`, `config.toml` beside the binary, or defaults.
fn load_config(path: Option<&PathBuf>) -> Result<config::ServerConfig> {
    if let Some(path) = path {
        return config::ServerConfig::load(path);
    }
    let auto_path = std::env::current_exe()
        .ok()
        .and_then(|path| path.parent().map(|dir| dir.join("config.toml")));
    match auto_path {
        Some(path) if path.exists() => {
            tracing::info!(path = %path.display(), "using config beside executable");
            config::ServerConfig::load(&path)
        }
        _ => {
            tracing::info!("no config file; using defaults");
            Ok(config::ServerConfig::default())
        }
    }
}

/// Resolve the final bind address from args + config.
fn resolve_bind(bind: Option<SocketAddr>, cfg: &config::ServerConfig) -> Result<SocketAddr> {
    match bind {
        Some(addr) => Ok(addr),
        None => config::bind_from_config(cfg),
    }
}

fn locate_web_ui_dir() -> Option<PathBuf> {
    let mut candidates = Vec::new();
    if let Ok(dir) = std::env::current_dir() {
        candidates.push(dir.join("web-ui"));
    }
    if let Ok(exe) = std::env::current_exe() {
        if let Some(parent) = exe.parent() {
            candidates.push(parent.join("web-ui"));
        }
    }
    candidates
        .into_iter()
        .find(|path| path.join("index.html").exists())
}

async fn serve_index(index_path: PathBuf) -> actix_web::Result<NamedFile> {
    Ok(NamedFile::open(index_path)?)
}

/// Install a Ctrl+C handler that stops the Actix system.
///
/// The handler runs on its own thread, so the system handle is captured here
/// on the runtime thread. Stopping the system drops in-flight jobs, and
/// kill-on-drop terminates their separators.
fn setup_shutdown() {
    let system = System::current();
    if let Err(e) = ctrlc::set_handler(move || stop_system(&system)) {
        tracing::warn!(error = %e, "failed to install ctrl-c handler");
    }
}

fn stop_system(system: &System) {
    tracing::info!("shutdown requested");
    system.stop();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noisy_paths_are_not_logged() {
        assert!(should_log_path("/separate"));
        assert!(should_log_path("/download/song_vocals.wav"));
        assert!(should_log_path("/"));
        assert!(!should_log_path("/health"));
        assert!(!should_log_path("/static/app.js"));
        assert!(!should_log_path("/swagger-ui/index.html"));
    }

    #[test]
    fn request_line_skips_filtered_paths() {
        let req = actix_web::test::TestRequest::get()
            .uri("/download/song_vocals.wav")
            .insert_header((header::USER_AGENT, "curl/8.0"))
            .to_srv_request();
        let line = RequestLine::capture(&req).expect("download is logged");
        assert_eq!(line.method, Method::GET);
        assert_eq!(line.path, "/download/song_vocals.wav");
        assert_eq!(line.user_agent, "curl/8.0");

        let req = actix_web::test::TestRequest::get().uri("/health").to_srv_request();
        assert!(RequestLine::capture(&req).is_none());

        let req = actix_web::test::TestRequest::post().uri("/separate").to_srv_request();
        assert_eq!(RequestLine::capture(&req).unwrap().user_agent, "-");
    }

    #[test]
    fn explicit_bind_overrides_config() {
        let cfg = config::ServerConfig {
            bind: Some("127.0.0.1:9000".to_string()),
            ..config::ServerConfig::default()
        };
        let cli: SocketAddr = "0.0.0.0:7000".parse().unwrap();
        assert_eq!(resolve_bind(Some(cli), &cfg).unwrap(), cli);
        assert_eq!(
            resolve_bind(None, &cfg).unwrap(),
            "127.0.0.1:9000".parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn shutdown_from_handler_thread_stops_system() {
        let runner = System::new();
        let system = System::current();
        let handler = std::thread::spawn(move || stop_system(&system));
        runner.run().expect("system stops cleanly");
        handler.join().unwrap();
    }

    #[test]
    fn explicit_config_path_must_exist() {
        let missing = PathBuf::from("/nonexistent/stem-split/config.toml");
        assert!(load_config(Some(&missing)).is_err());
    }
}
