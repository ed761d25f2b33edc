use axum::{
    extract::{FromRef, Path, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use tracing::{error, info, instrument, warn};

use crate::{
    auth::{
        dto::{
            AuthResponse, ConfirmResponse, LoginRequest, MessageResponse, ProfileResponse,
            PublicUser, RegisterRequest, SetRoleRequest, UpdateProfileRequest,
        },
        extractors::AuthUser,
        jwt::JwtKeys,
        password,
        registration::{Registration, RegistrationError, CONFIRM_PATH},
    },
    error::{non_empty, AppError},
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route(&format!("{CONFIRM_PATH}/:token"), get(confirm))
}

pub fn me_routes() -> Router<AppState> {
    Router::new().route("/me", get(get_me).put(update_me).delete(delete_me))
}

pub fn admin_routes() -> Router<AppState> {
    Router::new().route("/admin/users/:id/role", put(set_role))
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<MessageResponse>), RegistrationError> {
    Registration::from_state(&state)
        .submit(payload.into())
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(MessageResponse {
            message: "Check your email for a confirmation link.".into(),
        }),
    ))
}

#[instrument(skip(state, token))]
pub async fn confirm(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<(StatusCode, Json<ConfirmResponse>), RegistrationError> {
    Registration::from_state(&state).confirm(&token).await?;

    Ok((
        StatusCode::CREATED,
        Json(ConfirmResponse {
            message: "Registration confirmed. Please log in.".into(),
            login_url: "/auth/login".into(),
        }),
    ))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    let email = payload.email.trim();

    let user = match state.users.find_by_email(email).await {
        Ok(Some(u)) => u,
        Ok(None) => {
            password::verify_against_dummy(&payload.password);
            warn!(%email, "login unknown email");
            return Err(AppError::Unauthorized("Invalid email or password".into()));
        }
        Err(e) => {
            error!(error = %e, "find_by_email failed");
            return Err(AppError::Internal(e));
        }
    };

    if !state.users.verify_password(&user, &payload.password) {
        warn!(%email, user_id = user.id, "login invalid password");
        return Err(AppError::Unauthorized("Invalid email or password".into()));
    }

    let access_token = JwtKeys::from_ref(&state).sign(user.identity())?;

    info!(user_id = user.id, email = %user.email, "user logged in");
    Ok(Json(AuthResponse {
        access_token,
        user: PublicUser::from(user),
    }))
}

#[instrument(skip(state))]
pub async fn get_me(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
) -> Result<Json<ProfileResponse>, AppError> {
    let user = state
        .users
        .find_by_id(identity.user_id)
        .await?
        .ok_or(AppError::NotFound("User"))?;
    Ok(Json(user.into()))
}

#[instrument(skip(state, payload))]
pub async fn update_me(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Json(payload): Json<UpdateProfileRequest>,
) -> Result<Json<ProfileResponse>, AppError> {
    let nickname = non_empty("nickname", &payload.nickname)?;
    let user = state
        .users
        .update_profile(identity.user_id, &nickname, payload.contact_info.trim())
        .await?
        .ok_or(AppError::NotFound("User"))?;

    info!(user_id = user.id, "profile updated");
    Ok(Json(user.into()))
}

#[instrument(skip(state))]
pub async fn delete_me(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
) -> Result<StatusCode, AppError> {
    if !state.users.delete(identity.user_id).await? {
        return Err(AppError::NotFound("User"));
    }
    info!(user_id = identity.user_id, "account deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state, payload))]
pub async fn set_role(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Path(user_id): Path<i64>,
    Json(payload): Json<SetRoleRequest>,
) -> Result<Json<ProfileResponse>, AppError> {
    if !identity.is_admin() {
        warn!(user_id = identity.user_id, "non-admin tried to change a role");
        return Err(AppError::Forbidden);
    }
    let user = state
        .users
        .set_role(user_id, payload.role)
        .await?
        .ok_or(AppError::NotFound("User"))?;

    info!(admin_id = identity.user_id, user_id, role = ?user.role, "role changed");
    Ok(Json(user.into()))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::{to_bytes, Body},
        http::{header, Request},
        Router,
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::{
        auth::{
            identity::Role,
            repo::{MemoryUserStore, UserStore},
            repo_types::{PendingRegistration, User},
        },
        mail::RecordingMailer,
    };

    struct Harness {
        app: Router,
        users: Arc<MemoryUserStore>,
        mailer: Arc<RecordingMailer>,
        state: AppState,
    }

    fn harness() -> Harness {
        let users = Arc::new(MemoryUserStore::default());
        let mailer = Arc::new(RecordingMailer::default());
        let state = AppState::fake_with(users.clone(), mailer.clone());
        let app = Router::new()
            .merge(auth_routes())
            .merge(me_routes())
            .merge(admin_routes())
            .with_state(state.clone());
        Harness { app, users, mailer, state }
    }

    async fn call(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let res = app.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
        (status, body)
    }

    fn json_request(method: &str, uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(t) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {t}"));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn register_body() -> Value {
        json!({
            "email": "a@x.com",
            "nickname": "Ann",
            "password": "pw123",
            "contact_info": "555-0100"
        })
    }

    fn link_path(h: &Harness) -> String {
        let sent = h.mailer.sent();
        let body = &sent.last().expect("mail sent").body;
        let start = body.find("/confirm/").expect("confirm link");
        body[start..].trim().to_string()
    }

    async fn registered(h: &Harness) -> User {
        let (status, _) = call(&h.app, json_request("POST", "/auth/register", None, register_body())).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let path = link_path(h);
        let (status, _) = call(&h.app, Request::get(path).body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::CREATED);
        h.users.find_by_email("a@x.com").await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn register_confirm_login_and_read_profile() {
        let h = harness();
        let user = registered(&h).await;
        assert_eq!(user.role, Role::User);

        let (status, body) = call(
            &h.app,
            json_request("POST", "/auth/login", None, json!({"email": "a@x.com", "password": "pw123"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user"]["nickname"], "Ann");
        assert!(body["user"].get("password_hash").is_none());
        let token = body["access_token"].as_str().unwrap().to_string();

        let req = Request::get("/me")
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap();
        let (status, body) = call(&h.app, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["email"], "a@x.com");
        assert_eq!(body["contact_info"], "555-0100");
        assert_eq!(body["role"], "user");
    }

    #[tokio::test]
    async fn duplicate_registration_and_reused_link() {
        let h = harness();
        registered(&h).await;
        let path = link_path(&h);

        let (status, body) = call(&h.app, json_request("POST", "/auth/register", None, register_body())).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body, "This email is already registered.");

        let (status, body) = call(&h.app, Request::get(path).body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body, "This email has already been confirmed.");
        assert_eq!(h.users.len(), 1);
    }

    #[tokio::test]
    async fn garbage_link_gets_generic_rejection() {
        let h = harness();
        let (status, body) = call(
            &h.app,
            Request::get("/confirm/not-a-token").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, "The confirmation link is invalid or has expired.");
    }

    #[tokio::test]
    async fn wrong_password_is_unauthorized() {
        let h = harness();
        registered(&h).await;
        let (status, _) = call(
            &h.app,
            json_request("POST", "/auth/login", None, json!({"email": "a@x.com", "password": "nope"})),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = call(
            &h.app,
            json_request("POST", "/auth/login", None, json!({"email": "b@x.com", "password": "pw123"})),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn update_and_delete_own_account() {
        let h = harness();
        let user = registered(&h).await;
        let token = JwtKeys::from_ref(&h.state).sign(user.identity()).unwrap();

        let (status, body) = call(
            &h.app,
            json_request("PUT", "/me", Some(&token), json!({"nickname": "Annie", "contact_info": "x"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["nickname"], "Annie");

        let (status, _) = call(
            &h.app,
            json_request("PUT", "/me", Some(&token), json!({"nickname": "   "})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let req = Request::delete("/me")
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap();
        let (status, _) = call(&h.app, req).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(h.users.len(), 0);
    }

    async fn seeded_admin(h: &Harness) -> User {
        let admin = h
            .users
            .insert(&PendingRegistration {
                email: "root@x.com".into(),
                nickname: "Root".into(),
                password_hash: "unused".into(),
                contact_info: String::new(),
            })
            .await
            .unwrap();
        h.users.set_role(admin.id, Role::Admin).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn demoted_admin_cannot_use_old_token() {
        let h = harness();
        let admin = seeded_admin(&h).await;
        let old_token = JwtKeys::from_ref(&h.state).sign(admin.identity()).unwrap();
        h.users.set_role(admin.id, Role::User).await.unwrap();

        let uri = format!("/admin/users/{}/role", admin.id);
        let (status, _) = call(
            &h.app,
            json_request("PUT", &uri, Some(&old_token), json!({"role": "admin"})),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let stored = h.users.find_by_id(admin.id).await.unwrap().unwrap();
        assert_eq!(stored.role, Role::User);
    }

    #[tokio::test]
    async fn token_outlives_deleted_account() {
        let h = harness();
        let user = registered(&h).await;
        let token = JwtKeys::from_ref(&h.state).sign(user.identity()).unwrap();
        h.users.delete(user.id).await.unwrap();

        let req = Request::get("/me")
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap();
        let (status, body) = call(&h.app, req).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, "Account no longer exists");
    }

    #[tokio::test]
    async fn only_admins_change_roles() {
        let h = harness();
        let user = registered(&h).await;
        let keys = JwtKeys::from_ref(&h.state);
        let uri = format!("/admin/users/{}/role", user.id);

        let self_token = keys.sign(user.identity()).unwrap();
        let (status, _) = call(
            &h.app,
            json_request("PUT", &uri, Some(&self_token), json!({"role": "admin"})),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let admin = seeded_admin(&h).await;
        let admin_token = keys.sign(admin.identity()).unwrap();
        let (status, body) = call(
            &h.app,
            json_request("PUT", &uri, Some(&admin_token), json!({"role": "admin"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["role"], "admin");
    }
}
