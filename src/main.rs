use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use gui_agent_workflow_webapp::{
    api,
    app_state::AppState,
    config::AppConfig,
    generation::HttpGenerationClient,
    preferences::FilePreferenceStore,
    session::{Session, SessionController},
};
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Cargar .env e inicializar logging
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // 2. Cargar configuración
    let cfg = AppConfig::from_env().context("Error al cargar la configuración")?;

    // 3. Colaboradores: preferencias en disco y cliente del servicio de generación
    let preferences = Arc::new(FilePreferenceStore::new(cfg.preferences_path.clone()));
    info!("Preferencias en {}", preferences.path().display());
    let client = Arc::new(HttpGenerationClient::from_config(&cfg));

    // 4. Sesión única del usuario
    let session = Session::new(cfg.max_images, cfg.max_upload_bytes, preferences);
    let controller = SessionController::new(session, client.clone(), client);

    // Las plantillas se precargan en segundo plano; si fallan, la UI puede reintentar.
    let prefetch = controller.clone();
    tokio::spawn(async move {
        if let Err(e) = prefetch.refresh_templates().await {
            warn!("No se pudieron precargar las plantillas: {}", e);
        }
    });

    // 5. Estado compartido y canal de apagado
    let (app_state, shutdown_rx) = AppState::new(cfg.clone(), controller);

    // 6. Router de la API y servicio de ficheros estáticos
    let app = Router::new()
        .merge(api::create_router(app_state))
        .fallback_service(ServeDir::new(&cfg.frontend_dir))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    // 7. Iniciar el servidor
    let listener = tokio::net::TcpListener::bind(&cfg.server_addr)
        .await
        .with_context(|| format!("No se pudo escuchar en {}", cfg.server_addr))?;
    let server_url = format!("http://{}", listener.local_addr()?);
    info!("🚀 Servidor escuchando en {}", &server_url);
    info!("Servicio de generación: {}", cfg.generation_service_url);

    if cfg.open_browser && webbrowser::open(&server_url).is_err() {
        info!("No se pudo abrir el navegador. Por favor, accede a {} manualmente.", server_url);
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_rx.await.ok();
            info!("Señal de apagado recibida, iniciando cierre del servidor.");
        })
        .await?;

    info!("✅ Servidor cerrado correctamente.");
    Ok(())
}
