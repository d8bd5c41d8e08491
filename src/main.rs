use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use coursebot::api::{self, AppState};
use coursebot::engine::Engine;
use coursebot::ledger::SqliteLedger;
use coursebot::tenant::SqliteTenantResolver;
use coursebot::transport::WhatsAppTransport;
use coursebot::utils::init_log;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tracing::{info, warn};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

const DEV_VERIFY_TOKEN: &str = "whatsapp_bot_token_fijo_123";

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to database file
    #[arg(short, long, default_value = "./database/coursebot.db")]
    database: PathBuf,

    /// Bind host
    #[arg(short = 'H', long, default_value = "0.0.0.0")]
    host: String,

    /// Bind port
    #[arg(short, long, default_value = "3001")]
    port: u16,

    /// Log directory (stdout when omitted)
    #[arg(short, long)]
    log: Option<PathBuf>,

    /// Deliver items with an interactive Next button instead of plain text
    #[arg(long)]
    next_button: bool,
}

#[derive(OpenApi)]
#[openapi(
    paths(
        coursebot::api::health,
        coursebot::api::webhook::verify,
        coursebot::api::courses::list_courses,
        coursebot::api::courses::create_course,
        coursebot::api::courses::get_course,
        coursebot::api::courses::update_course,
        coursebot::api::courses::delete_course,
        coursebot::api::courses::add_item,
        coursebot::api::enrollments::enroll_user,
        coursebot::api::dashboard::active_users,
    ),
    components(schemas(
        coursebot::api::enrollments::EnrollRequest,
        coursebot::api::enrollments::EnrollResponse,
        coursebot::api::courses::CreateCourseRequest,
        coursebot::api::courses::UpdateCourseRequest,
        coursebot::api::courses::AddItemRequest,
    ))
)]
struct ApiDoc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let args = Cli::parse();
    let _guard = init_log(args.log.clone());

    let verify_token = dotenvy::var("VERIFY_TOKEN").unwrap_or_else(|_| {
        warn!("VERIFY_TOKEN not set, using the built-in development token");
        DEV_VERIFY_TOKEN.to_string()
    });

    if let Some(parent) = args.database.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let options = SqliteConnectOptions::new()
        .filename(&args.database)
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new().connect_with(options).await?;
    sqlx::query("PRAGMA foreign_keys = ON").execute(&pool).await?;
    sqlx::raw_sql(include_str!("../schema.sql"))
        .execute(&pool)
        .await?;

    let ledger = Arc::new(SqliteLedger::new(pool.clone()));
    let transport = Arc::new(WhatsAppTransport::from_env());
    let mut engine = Engine::new(ledger.clone(), transport);
    if args.next_button {
        engine = engine.with_next_button();
    }
    let state = AppState {
        engine: Arc::new(engine),
        ledger,
        tenants: Arc::new(SqliteTenantResolver::new(pool)),
        verify_token,
        started_at: Instant::now(),
    };

    let app = api::router(state)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    let listener = tokio::net::TcpListener::bind((args.host.as_str(), args.port)).await?;
    info!("coursebot listening on {}:{}", args.host, args.port);
    info!("webhook endpoint: /webhook, swagger ui: /swagger-ui");
    axum::serve(listener, app).await?;

    Ok(())
}
