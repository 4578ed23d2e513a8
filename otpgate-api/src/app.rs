/// Application state and router builder
///
/// This module defines the shared application state and provides
/// a function to build the Axum router with all routes and middleware.
///
/// # Example
///
/// ```no_run
/// use otpgate_api::{app::AppState, config::Config};
/// use sqlx::PgPool;
///
/// # async fn example() -> anyhow::Result<()> {
/// let config = Config::from_env()?;
/// let pool = PgPool::connect(&config.database.url).await?;
/// let state = AppState::new(pool, config)?;
/// let app = otpgate_api::app::build_router(state);
/// # Ok(())
/// # }
/// ```

use crate::{
    bot::{BotClient, BotError},
    config::Config,
    error::ApiError,
    middleware::security::SecurityHeadersLayer,
};
use axum::{
    extract::{Request, State},
    http::{header, HeaderValue, Method},
    middleware::{self, Next},
    response::Response,
    routing::{delete, get, post, put},
    Router,
};
use otpgate_shared::{
    auth::{
        authorization::require_admin,
        middleware::{org_token_auth_middleware, session_auth_middleware, AuthContext, AuthError},
    },
    credits::CreditLedger,
};
use sqlx::PgPool;
use std::{sync::Arc, time::Duration};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

/// Shared application state
///
/// This is cloned for each request handler via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: PgPool,

    /// Application configuration
    pub config: Arc<Config>,

    /// Credit ledger (personal and organization)
    pub ledger: CreditLedger,

    /// Messaging bot client
    pub bot: BotClient,
}

impl AppState {
    /// Creates new application state
    pub fn new(db: PgPool, config: Config) -> Result<Self, BotError> {
        let bot = BotClient::new(
            config.bot.service_url.clone(),
            config.bot.shared_secret.clone(),
            Duration::from_secs(config.bot.timeout_seconds),
        )?;
        let ledger = CreditLedger::new(db.clone(), config.trial_policy());

        Ok(Self {
            db,
            config: Arc::new(config),
            ledger,
            bot,
        })
    }

    /// Gets JWT secret for token operations
    pub fn jwt_secret(&self) -> &str {
        &self.config.jwt.secret
    }
}

/// Builds the complete Axum router with all routes and middleware
///
/// # Architecture
///
/// ```text
/// /
/// ├── /health                          # Health check (public)
/// └── /api/
///     ├── /auth/                       # register, login, QR flow (public)
///     │   ├── /qr/request, /qr/status/:hash
///     │   ├── /whatsapp-verify         # bot webhook (X-Internal-Secret)
///     │   └── /logout, /me             # session
///     ├── /contact                     # public contact form
///     ├── /credits, /otp, /payments    # session
///     ├── /organizations               # session + membership checks
///     ├── /support, /settings, /profile
///     ├── /admin/                      # session + admin role
///     └── /v1/validate-hash            # organization token
/// ```
///
/// # Middleware Stack
///
/// Applied in order (outermost first):
/// 1. Security headers
/// 2. CORS (tower-http CorsLayer)
/// 3. Logging (tower-http TraceLayer)
/// 4. Authentication (per route group)
pub fn build_router(state: AppState) -> Router {
    use crate::routes;

    let health_routes = Router::new().route("/health", get(routes::health::health_check));

    let public_auth_routes = Router::new()
        .route("/register", post(routes::auth::register))
        .route("/login", post(routes::auth::login))
        .route("/qr/request", post(routes::qr_login::request_qr))
        .route("/qr/status/:hash", get(routes::qr_login::qr_status))
        .route("/whatsapp-verify", post(routes::qr_login::whatsapp_verify));

    let session_auth_routes = Router::new()
        .route("/logout", post(routes::auth::logout))
        .route("/me", get(routes::auth::me));

    let credit_routes = Router::new()
        .route("/balance", get(routes::credits::balance))
        .route("/transactions", get(routes::credits::transactions))
        .route("/use", post(routes::credits::use_credit));

    let otp_routes = Router::new()
        .route("/send", post(routes::otp::send_otp))
        .route("/verify", post(routes::otp::verify_otp));

    let payment_routes = Router::new().route(
        "/",
        get(routes::payments::list_payments).post(routes::payments::create_payment),
    );

    let organization_routes = Router::new()
        .route(
            "/",
            get(routes::organizations::list_organizations)
                .post(routes::organizations::create_organization),
        )
        .route("/:org_id", get(routes::organizations::get_organization))
        .route(
            "/:org_id/members",
            get(routes::organizations::list_members).post(routes::organizations::add_member),
        )
        .route(
            "/:org_id/members/:user_id",
            delete(routes::organizations::remove_member),
        )
        .route(
            "/:org_id/groups",
            get(routes::organizations::list_groups).post(routes::organizations::create_group),
        )
        .route(
            "/:org_id/groups/:group_id/members",
            post(routes::organizations::add_group_member),
        )
        .route(
            "/:org_id/groups/:group_id/members/:user_id",
            delete(routes::organizations::remove_group_member),
        )
        .route(
            "/:org_id/tokens",
            get(routes::organizations::list_tokens).post(routes::organizations::create_token),
        )
        .route(
            "/:org_id/tokens/:token_id/revoke",
            post(routes::organizations::revoke_token),
        )
        .route("/:org_id/credits", get(routes::organizations::credits));

    let support_routes = Router::new()
        .route(
            "/tickets",
            get(routes::support::list_tickets).post(routes::support::create_ticket),
        )
        .route("/tickets/:id", get(routes::support::get_ticket));

    let session_routes = Router::new()
        .nest("/auth", session_auth_routes)
        .nest("/credits", credit_routes)
        .nest("/otp", otp_routes)
        .nest("/payments", payment_routes)
        .nest("/organizations", organization_routes)
        .nest("/support", support_routes)
        .route(
            "/settings",
            get(routes::account::get_settings).put(routes::account::update_settings),
        )
        .route("/profile", put(routes::account::update_profile))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            session_auth_layer,
        ));

    let admin_routes = Router::new()
        .route("/stats", get(routes::admin::stats))
        .route("/users", get(routes::admin::list_users))
        .route("/users/:id/block", post(routes::admin::block_user))
        .route("/users/:id/unblock", post(routes::admin::unblock_user))
        .route("/users/:id/role", post(routes::admin::set_user_role))
        .route("/users/:id/credits", post(routes::admin::grant_user_credits))
        .route("/tickets", get(routes::admin::list_tickets))
        .route("/tickets/:id/respond", post(routes::admin::respond_ticket))
        .route("/tickets/:id/close", post(routes::admin::close_ticket))
        .route("/login-requests", get(routes::admin::list_login_requests))
        .route("/otp-requests", get(routes::admin::list_otp_requests))
        .route("/payments", get(routes::admin::list_payments))
        .route("/payments/:id/complete", post(routes::admin::complete_payment))
        .route("/payments/:id/fail", post(routes::admin::fail_payment))
        .route("/contact-messages", get(routes::admin::list_contact_messages))
        .route(
            "/contact-messages/:id/read",
            post(routes::admin::mark_contact_message_read),
        )
        .route("/organizations", get(routes::admin::list_organizations))
        .route(
            "/organizations/:id/credits",
            post(routes::admin::grant_organization_credits),
        )
        .route(
            "/maintenance/normalize-phones",
            post(routes::admin::normalize_phones),
        )
        .layer(middleware::from_fn(admin_only_layer))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            session_auth_layer,
        ));

    let org_token_routes = Router::new()
        .route("/validate-hash", post(routes::org_api::validate_hash))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            org_token_auth_layer,
        ));

    let api_routes = Router::new()
        .nest("/auth", public_auth_routes)
        .route("/contact", post(routes::support::submit_contact))
        .merge(session_routes)
        .nest("/admin", admin_routes)
        .nest("/v1", org_token_routes);

    // Configure CORS based on environment
    let cors = if state.config.api.cors_origins.iter().any(|o| o == "*") {
        CorsLayer::permissive()
    } else {
        let origins: Vec<HeaderValue> = state
            .config
            .api
            .cors_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::DELETE,
                Method::OPTIONS,
            ])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
            .max_age(Duration::from_secs(3600))
    };

    let production = state.config.api.production;

    Router::new()
        .merge(health_routes)
        .nest("/api", api_routes)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors)
        .layer(SecurityHeadersLayer::new(production))
        .with_state(state)
}

/// Session bearer layer
///
/// Validates the JWT and its session row, then injects [`AuthContext`].
async fn session_auth_layer(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    session_auth_middleware(state.db.clone(), state.config.jwt.secret.clone(), req, next).await
}

/// Organization token bearer layer
async fn org_token_auth_layer(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    org_token_auth_middleware(state.db.clone(), req, next).await
}

/// Rejects sessions without the admin role
///
/// Must run inside [`session_auth_layer`].
async fn admin_only_layer(req: Request, next: Next) -> Result<Response, ApiError> {
    let auth = req
        .extensions()
        .get::<AuthContext>()
        .ok_or_else(|| ApiError::Unauthorized("Missing credentials".to_string()))?;

    require_admin(auth)?;

    Ok(next.run(req).await)
}
