use std::{env, sync::Arc};

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{AppendHeaders, IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::Utc;
use serde_json::json;
use sqlx::{postgres::PgPoolOptions, Row};
use tower_http::cors::CorsLayer;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use crate::analytics;
use crate::auth::{
    auth_cookie, authed_staff, expired_cookie, find_admin, sign_token, staff_from_row,
    ACCESS_COOKIE, ACCESS_TTL_SECS, REFRESH_COOKIE, REFRESH_TTL_SECS,
};
use crate::engine;
use crate::settings;
use crate::types::*;

fn normalize_email(value: &str) -> String {
    value.trim().to_lowercase()
}

fn resolve_database_url() -> String {
    if let Ok(url) = env::var("DATABASE_URL") {
        if !url.trim().is_empty() {
            return url;
        }
    }
    let host = env::var("POSTGRES_HOST")
        .or_else(|_| env::var("PGHOST"))
        .unwrap_or_else(|_| "localhost".to_string());
    let port = env::var("POSTGRES_PORT")
        .or_else(|_| env::var("PGPORT"))
        .unwrap_or_else(|_| "5432".to_string());
    let user = env::var("POSTGRES_USER")
        .or_else(|_| env::var("PGUSER"))
        .unwrap_or_else(|_| "postgres".to_string());
    let password = env::var("POSTGRES_PASSWORD")
        .or_else(|_| env::var("PGPASSWORD"))
        .unwrap_or_else(|_| "postgres".to_string());
    let db = env::var("POSTGRES_DB")
        .or_else(|_| env::var("PGDATABASE"))
        .unwrap_or_else(|_| "leaddesk".to_string());
    format!("postgres://{user}:{password}@{host}:{port}/{db}")
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "status": "ok" })))
}

/// One-time bootstrap rule: the first registrant becomes the admin, every
/// later registrant becomes a member parented to that admin.
async fn register_staff(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RegisterBody>,
) -> Response {
    let email = normalize_email(&body.email);
    let user_name = body.user_name.trim().to_string();
    if email.is_empty() || user_name.is_empty() || body.password.trim().len() < 6 {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "userName, email and a password of 6+ characters are required" })),
        )
            .into_response();
    }
    if !engine::valid_email(&email) {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "invalid email address" })),
        )
            .into_response();
    }

    let exists = sqlx::query_scalar::<_, i64>("SELECT COUNT(1) FROM users WHERE email = $1")
        .bind(&email)
        .fetch_one(&state.db)
        .await
        .unwrap_or(0)
        > 0;
    if exists {
        return crate::error::EngineError::Duplicate("a user with this email").into_response();
    }

    let admin = match find_admin(&state.db).await {
        Ok(admin) => admin,
        Err(err) => return crate::error::EngineError::from(err).into_response(),
    };
    let (role, parent) = match &admin {
        None => (ROLE_ADMIN, None),
        Some(admin) => (ROLE_MEMBER, Some(admin.id.clone())),
    };

    let password_hash = match hash(body.password, DEFAULT_COST) {
        Ok(v) => v,
        Err(_) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "unable to hash password" })),
            )
                .into_response();
        }
    };
    let user_id = Uuid::new_v4().to_string();
    let mut role = role;
    let mut parent = parent;
    let mut inserted =
        insert_staff(&state, &user_id, &user_name, &email, &password_hash, role, &parent).await;
    let lost_race =
        matches!(&inserted, Err(err) if crate::sequencer::is_unique_violation(err));
    if lost_race {
        // either the email or the single admin slot got taken between the
        // checks above and the insert
        let email_taken =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(1) FROM users WHERE email = $1")
                .bind(&email)
                .fetch_one(&state.db)
                .await
                .unwrap_or(0)
                > 0;
        if email_taken {
            return crate::error::EngineError::Duplicate("a user with this email")
                .into_response();
        }
        if let Ok(Some(admin)) = find_admin(&state.db).await {
            role = ROLE_MEMBER;
            parent = Some(admin.id.clone());
            inserted =
                insert_staff(&state, &user_id, &user_name, &email, &password_hash, role, &parent)
                    .await;
        }
    }
    if inserted.is_err() {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "failed to create user" })),
        )
            .into_response();
    }

    tracing::info!(%email, role, "staff user registered");
    (
        StatusCode::CREATED,
        Json(json!({ "userId": user_id, "userRole": role })),
    )
        .into_response()
}

async fn insert_staff(
    state: &Arc<AppState>,
    user_id: &str,
    user_name: &str,
    email: &str,
    password_hash: &str,
    role: &str,
    parent: &Option<String>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO users (id, user_name, email, password_hash, user_role, parent, created_at) \
         VALUES ($1,$2,$3,$4,$5,$6,$7)",
    )
    .bind(user_id)
    .bind(user_name)
    .bind(email)
    .bind(password_hash)
    .bind(role)
    .bind(parent)
    .bind(Utc::now())
    .execute(&state.db)
    .await?;
    Ok(())
}

async fn login_staff(
    State(state): State<Arc<AppState>>,
    Json(body): Json<LoginBody>,
) -> Response {
    let email = normalize_email(&body.email);
    let row = sqlx::query(
        "SELECT id, user_name, email, password_hash, user_role, parent, created_at \
         FROM users WHERE email = $1",
    )
    .bind(&email)
    .fetch_optional(&state.db)
    .await
    .ok()
    .flatten();
    let Some(row) = row else {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "invalid credentials" })),
        )
            .into_response();
    };

    let password_hash: String = row.get("password_hash");
    if !verify(body.password, &password_hash).unwrap_or(false) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "invalid credentials" })),
        )
            .into_response();
    }
    let user = staff_from_row(row);

    let now = Utc::now().timestamp();
    let access = sign_token(&state.token_secret, &user.id, now + ACCESS_TTL_SECS);
    let refresh = sign_token(&state.token_secret, &user.id, now + REFRESH_TTL_SECS);

    // one active session: a new login invalidates the previous refresh token
    let stored = sqlx::query("UPDATE users SET refresh_token = $1 WHERE id = $2")
        .bind(&refresh)
        .bind(&user.id)
        .execute(&state.db)
        .await
        .is_ok();
    if !stored {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "failed to start session" })),
        )
            .into_response();
    }

    (
        StatusCode::OK,
        AppendHeaders([
            (header::SET_COOKIE, auth_cookie(ACCESS_COOKIE, &access, ACCESS_TTL_SECS)),
            (header::SET_COOKIE, auth_cookie(REFRESH_COOKIE, &refresh, REFRESH_TTL_SECS)),
        ]),
        Json(json!({ "user": user })),
    )
        .into_response()
}

async fn logout_staff(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if let Ok(auth) = authed_staff(&state, &headers).await {
        let _ = sqlx::query("UPDATE users SET refresh_token = NULL WHERE id = $1")
            .bind(&auth.user.id)
            .execute(&state.db)
            .await;
    }
    // expire both cookies even when the session lookup failed
    (
        StatusCode::OK,
        AppendHeaders([
            (header::SET_COOKIE, expired_cookie(ACCESS_COOKIE)),
            (header::SET_COOKIE, expired_cookie(REFRESH_COOKIE)),
        ]),
        Json(json!({ "message": "logged out" })),
    )
        .into_response()
}

async fn get_me(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let auth = match authed_staff(&state, &headers).await {
        Ok(auth) => auth,
        Err(err) => return err.into_response(),
    };
    let user = auth.user.clone();
    auth.respond((StatusCode::OK, Json(json!({ "user": user }))))
}

async fn get_users(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let auth = match authed_staff(&state, &headers).await {
        Ok(auth) => auth,
        Err(err) => return err.into_response(),
    };
    if !auth.user.is_admin() {
        return crate::error::EngineError::Forbidden("only the admin can list users")
            .into_response();
    }
    let rows = sqlx::query(
        "SELECT id, user_name, email, user_role, parent, created_at FROM users \
         ORDER BY created_at",
    )
    .fetch_all(&state.db)
    .await;
    let users: Vec<StaffUser> = match rows {
        Ok(rows) => rows.into_iter().map(staff_from_row).collect(),
        Err(err) => return crate::error::EngineError::from(err).into_response(),
    };
    auth.respond((StatusCode::OK, Json(json!({ "users": users }))))
}

async fn delete_user(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
) -> Response {
    let auth = match authed_staff(&state, &headers).await {
        Ok(auth) => auth,
        Err(err) => return err.into_response(),
    };
    match engine::delete_staff_user(&state.db, &auth.user, &user_id).await {
        Ok(()) => auth.respond((StatusCode::OK, Json(json!({ "message": "user deleted" })))),
        Err(err) => err.into_response(),
    }
}

async fn get_settings(State(state): State<Arc<AppState>>) -> Response {
    match settings::get_or_seed(&state.db).await {
        Ok(widget) => (StatusCode::OK, Json(json!({ "settings": widget }))).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn patch_settings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<SettingsPatch>,
) -> Response {
    let auth = match authed_staff(&state, &headers).await {
        Ok(auth) => auth,
        Err(err) => return err.into_response(),
    };
    match settings::update(&state.db, body).await {
        Ok(widget) => auth.respond((StatusCode::OK, Json(json!({ "settings": widget })))),
        Err(err) => err.into_response(),
    }
}

async fn post_lead(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateLeadBody>,
) -> Response {
    match engine::create_lead(&state.db, &body.message).await {
        Ok(lead_id) => (StatusCode::OK, Json(json!({ "leadId": lead_id }))).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn post_lead_form(
    State(state): State<Arc<AppState>>,
    Json(body): Json<LeadFormBody>,
) -> Response {
    let result = engine::submit_lead_form(
        &state.db,
        &body.lead_id,
        body.name.as_deref(),
        body.email.as_deref(),
        body.phone.as_deref(),
    )
    .await;
    match result {
        Ok(()) => (StatusCode::OK, Json(json!({ "message": "details saved" }))).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn put_visitor_message(
    State(state): State<Arc<AppState>>,
    Path(lead_id): Path<String>,
    Json(body): Json<MessageBody>,
) -> Response {
    match engine::post_visitor_message(&state.db, &lead_id, &body.message).await {
        Ok(()) => (StatusCode::OK, Json(json!({ "message": "message sent" }))).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn get_lead(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(lead_id): Path<String>,
) -> Response {
    let auth = match authed_staff(&state, &headers).await {
        Ok(auth) => auth,
        Err(err) => return err.into_response(),
    };
    match engine::get_lead_detail(&state.db, &lead_id).await {
        Ok(lead) => auth.respond((StatusCode::OK, Json(json!({ "lead": lead })))),
        Err(err) => err.into_response(),
    }
}

// unauthenticated: the widget polls this to render the thread
async fn get_lead_conversation(
    State(state): State<Arc<AppState>>,
    Path(lead_id): Path<String>,
) -> Response {
    match engine::get_conversation(&state.db, &lead_id).await {
        Ok(turns) => (StatusCode::OK, Json(json!({ "conversation": turns }))).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn delete_lead(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(lead_id): Path<String>,
) -> Response {
    let auth = match authed_staff(&state, &headers).await {
        Ok(auth) => auth,
        Err(err) => return err.into_response(),
    };
    if !auth.user.is_admin() {
        return crate::error::EngineError::Forbidden("only the admin can delete leads")
            .into_response();
    }
    match engine::delete_lead(&state.db, &lead_id).await {
        Ok(()) => auth.respond((StatusCode::OK, Json(json!({ "message": "lead deleted" })))),
        Err(err) => err.into_response(),
    }
}

async fn get_tickets(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<TicketQuery>,
) -> Response {
    let auth = match authed_staff(&state, &headers).await {
        Ok(auth) => auth,
        Err(err) => return err.into_response(),
    };
    // lazy refresh: overdue leads get their missed flag before the read
    if let Err(err) = engine::sweep_missed_chats(&state.db).await {
        return err.into_response();
    }
    match engine::list_tickets(&state.db, query.page, query.limit, query.status.as_deref()).await
    {
        Ok(page) => auth.respond((StatusCode::OK, Json(page))),
        Err(err) => err.into_response(),
    }
}

async fn get_assigned(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let auth = match authed_staff(&state, &headers).await {
        Ok(auth) => auth,
        Err(err) => return err.into_response(),
    };
    if let Err(err) = engine::sweep_missed_chats(&state.db).await {
        return err.into_response();
    }
    match engine::list_assigned_leads(&state.db, &auth.user).await {
        Ok(leads) => auth.respond((StatusCode::OK, Json(json!({ "leadsList": leads })))),
        Err(err) => err.into_response(),
    }
}

async fn put_ticket_status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<StatusBody>,
) -> Response {
    let auth = match authed_staff(&state, &headers).await {
        Ok(auth) => auth,
        Err(err) => return err.into_response(),
    };
    match engine::update_status(&state.db, &body.lead_id, &auth.user, &body.status).await {
        Ok(()) => auth.respond((StatusCode::OK, Json(json!({ "message": "status updated" })))),
        Err(err) => err.into_response(),
    }
}

async fn put_staff_message(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(lead_id): Path<String>,
    Json(body): Json<MessageBody>,
) -> Response {
    let auth = match authed_staff(&state, &headers).await {
        Ok(auth) => auth,
        Err(err) => return err.into_response(),
    };
    match engine::post_staff_message(&state.db, &lead_id, &auth.user, &body.message).await {
        Ok(()) => auth.respond((StatusCode::OK, Json(json!({ "message": "message sent" })))),
        Err(err) => err.into_response(),
    }
}

async fn put_ticket_assignee(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<AssigneeBody>,
) -> Response {
    let auth = match authed_staff(&state, &headers).await {
        Ok(auth) => auth,
        Err(err) => return err.into_response(),
    };
    match engine::reassign(&state.db, &body.lead_id, &auth.user, &body.assignee_id).await {
        Ok(()) => auth.respond((StatusCode::OK, Json(json!({ "message": "ticket reassigned" })))),
        Err(err) => err.into_response(),
    }
}

async fn get_analytics(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let auth = match authed_staff(&state, &headers).await {
        Ok(auth) => auth,
        Err(err) => return err.into_response(),
    };
    if let Err(err) = engine::sweep_missed_chats(&state.db).await {
        return err.into_response();
    }
    match analytics::compute_analytics(&state.db).await {
        Ok(stats) => auth.respond((StatusCode::OK, Json(stats))),
        Err(err) => err.into_response(),
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/auth/register", post(register_staff))
        .route("/api/auth/login", post(login_staff))
        .route("/api/auth/logout", post(logout_staff))
        .route("/api/auth/me", get(get_me))
        .route("/api/users", get(get_users))
        .route("/api/users/{user_id}", delete(delete_user))
        .route("/api/settings", get(get_settings).patch(patch_settings))
        .route("/api/lead", post(post_lead))
        .route("/api/lead/form", post(post_lead_form))
        .route(
            "/api/lead/{lead_id}",
            get(get_lead).put(put_visitor_message).delete(delete_lead),
        )
        .route("/api/lead/{lead_id}/conversation", get(get_lead_conversation))
        .route("/api/chat/ticket", get(get_tickets))
        .route("/api/chat/ticket/status", put(put_ticket_status))
        .route("/api/chat/ticket/assignee", put(put_ticket_assignee))
        .route("/api/chat/ticket/{lead_id}", put(put_staff_message))
        .route("/api/chat/assigned", get(get_assigned))
        .route("/api/chat/analytics", get(get_analytics))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn run() {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let port = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse::<u16>().ok())
        .unwrap_or(4000);
    let database_url = resolve_database_url();
    let token_secret = env::var("AUTH_TOKEN_SECRET").unwrap_or_else(|_| {
        tracing::warn!("AUTH_TOKEN_SECRET not set, using a development secret");
        "leaddesk-dev-secret".to_string()
    });

    let db = PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await
        .expect("failed to connect to postgres (set DATABASE_URL or POSTGRES_* env vars)");

    sqlx::migrate!("./migrations")
        .run(&db)
        .await
        .expect("failed to run sqlx migrations");

    // seed the settings singleton up front rather than on first read
    if let Err(err) = settings::get_or_seed(&db).await {
        tracing::warn!(error = %err, "could not seed settings at boot");
    }

    let state = Arc::new(AppState { db, token_secret });
    let app = router(state);

    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind TCP listener");

    tracing::info!("leaddesk server running at http://localhost:{port}");
    axum::serve(listener, app)
        .await
        .expect("server runtime failure");
}
