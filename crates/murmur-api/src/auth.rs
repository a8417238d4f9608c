use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Redirect, Response},
};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand_core::OsRng;
use serde::Deserialize;
use tracing::{info, warn};
use url::Url;
use uuid::Uuid;

use murmur_db::models::UserRow;
use murmur_types::api::{
    Claims, FlashResponse, FormPage, LoginRequest, LoginResponse, RegisterRequest, ResetClaims,
    ResetPasswordForm, ResetPasswordRequest,
};

use crate::error::{ApiError, FieldErrors};
use crate::extract::ApiJson;
use crate::forms::Validate;
use crate::i18n::{Locale, Msg};
use crate::mail;
use crate::middleware::{clear_session_cookie, session_cookie};
use crate::state::{AppState, with_db};

const RESET_TOKEN_LIFETIME_SECS: i64 = 600;

// -- Passwords --

pub fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Password hashing failed: {}", e))?
        .to_string();
    Ok(hash)
}

/// False for a wrong password and for a hash that cannot be parsed.
pub fn verify_password(password: &str, hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        warn!("Stored password hash is not in PHC format");
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

// -- Tokens --

pub fn create_session_token(
    secret: &str,
    user_id: Uuid,
    username: &str,
    lifetime: Duration,
) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id,
        username: username.to_string(),
        exp: (Utc::now() + lifetime).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}

pub fn create_reset_token(secret: &str, user_id: Uuid, now: DateTime<Utc>) -> anyhow::Result<String> {
    let claims = ResetClaims {
        reset_password: user_id,
        exp: (now.timestamp() + RESET_TOKEN_LIFETIME_SECS) as usize,
    };
    Ok(encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?)
}

/// The user id a reset token was issued for, if the token is genuine and
/// unexpired.
pub fn verify_reset_token(secret: &str, token: &str) -> Option<Uuid> {
    let mut validation = Validation::default();
    validation.leeway = 0;
    decode::<ResetClaims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)
        .map(|data| data.claims.reset_password)
        .ok()
}

/// Keep `next` only when it stays on this site. Absolute URLs and
/// scheme-relative `//host` paths fall back to the index page.
pub fn safe_next_page(next: Option<&str>) -> String {
    const DEFAULT: &str = "/index";
    let Some(next) = next.map(str::trim).filter(|n| !n.is_empty()) else {
        return DEFAULT.to_string();
    };

    let Ok(base) = Url::parse("http://murmur.invalid/") else {
        return DEFAULT.to_string();
    };
    match base.join(next) {
        Ok(url) if url.origin() == base.origin() => {
            let mut target = url.path().to_string();
            if let Some(query) = url.query() {
                target.push('?');
                target.push_str(query);
            }
            target
        }
        _ => DEFAULT.to_string(),
    }
}

// -- Handlers --

#[derive(Debug, Default, Deserialize)]
pub struct NextQuery {
    pub next: Option<String>,
}

pub async fn login_page(locale: Locale) -> Json<FormPage> {
    Json(FormPage {
        title: Msg::SignIn.text(locale),
    })
}

pub async fn login(
    State(state): State<AppState>,
    Query(query): Query<NextQuery>,
    locale: Locale,
    ApiJson(req): ApiJson<LoginRequest>,
) -> Result<Response, ApiError> {
    req.validate(locale)?;

    let username = req.username.clone();
    let password = req.password;
    let user = with_db(&state, move |db| {
        let user = db.get_user_by_username(&username)?;
        Ok(user.filter(|u| verify_password(&password, &u.password_hash)))
    })
    .await?;

    let Some(user) = user else {
        warn!("Failed login for '{}'", req.username);
        return Err(ApiError::unauthorized(Msg::InvalidCredentials.text(locale)).with_redirect("/login"));
    };

    let user_id: Uuid = user
        .id
        .parse()
        .map_err(|e| anyhow::anyhow!("Corrupt user id '{}': {}", user.id, e))?;

    let (lifetime, max_age) = if req.remember_me {
        let lifetime = Duration::days(state.settings.remember_days);
        (lifetime, Some(lifetime.num_seconds()))
    } else {
        (Duration::days(1), None)
    };
    let token = create_session_token(&state.settings.secret, user_id, &user.username, lifetime)?;

    info!("User '{}' logged in", user.username);
    Ok((
        [(header::SET_COOKIE, session_cookie(&token, max_age))],
        Json(LoginResponse {
            user_id,
            username: user.username,
            token,
            redirect: safe_next_page(query.next.as_deref()),
        }),
    )
        .into_response())
}

pub async fn logout(locale: Locale) -> impl IntoResponse {
    (
        [(header::SET_COOKIE, clear_session_cookie())],
        Json(FlashResponse {
            message: Msg::LoggedOut.text(locale),
            redirect: "/index".into(),
        }),
    )
}

pub async fn register_page(locale: Locale) -> Json<FormPage> {
    Json(FormPage {
        title: Msg::Register.text(locale),
    })
}

enum Registration {
    Created,
    Taken(FieldErrors),
}

pub async fn register(
    State(state): State<AppState>,
    locale: Locale,
    ApiJson(req): ApiJson<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    req.validate(locale)?;

    let user_id = Uuid::new_v4();
    let username = req.username.trim().to_string();
    let email = req.email.trim().to_string();
    let password = req.password;

    let (name, address) = (username.clone(), email.clone());
    let outcome = with_db(&state, move |db| {
        let mut taken = FieldErrors::default();
        if db.get_user_by_username(&name)?.is_some() {
            taken.add("username", Msg::UsernameTaken.text(locale));
        }
        if db.get_user_by_email(&address)?.is_some() {
            taken.add("email", Msg::EmailTaken.text(locale));
        }
        if !taken.is_empty() {
            return Ok(Registration::Taken(taken));
        }

        let hash = hash_password(&password)?;
        match db.create_user(&user_id.to_string(), &name, &address, &hash) {
            Ok(()) => Ok(Registration::Created),
            Err(e) => match murmur_db::unique_violation(&e).as_deref() {
                Some("users.username") => Ok(Registration::Taken(FieldErrors::single(
                    "username",
                    Msg::UsernameTaken.text(locale),
                ))),
                Some("users.email") => Ok(Registration::Taken(FieldErrors::single(
                    "email",
                    Msg::EmailTaken.text(locale),
                ))),
                _ => Err(e),
            },
        }
    })
    .await?;

    if let Registration::Taken(errors) = outcome {
        return Err(ApiError::Validation(errors));
    }

    info!("Registered user '{}' ({})", username, user_id);
    Ok((
        StatusCode::CREATED,
        Json(FlashResponse {
            message: Msg::Registered.text(locale),
            redirect: "/login".into(),
        }),
    ))
}

pub async fn reset_password_request_page(locale: Locale) -> Json<FormPage> {
    Json(FormPage {
        title: Msg::ResetPassword.text(locale),
    })
}

/// Always answers with the same confirmation, whether or not the address
/// belongs to an account.
pub async fn reset_password_request(
    State(state): State<AppState>,
    locale: Locale,
    ApiJson(req): ApiJson<ResetPasswordRequest>,
) -> Result<Json<FlashResponse>, ApiError> {
    req.validate(locale)?;

    let email = req.email.trim().to_string();
    let user = with_db(&state, move |db| db.get_user_by_email(&email)).await?;

    if let Some(user) = user {
        send_reset_email(&state, &user).await;
    }

    Ok(Json(FlashResponse {
        message: Msg::CheckEmail.text(locale),
        redirect: "/login".into(),
    }))
}

async fn send_reset_email(state: &AppState, user: &UserRow) {
    let user_id: Uuid = match user.id.parse() {
        Ok(id) => id,
        Err(e) => {
            warn!("Corrupt user id '{}': {}", user.id, e);
            return;
        }
    };
    match create_reset_token(&state.settings.secret, user_id, Utc::now()) {
        Ok(token) => {
            let email = mail::password_reset_email(&state.settings, user, &token);
            mail::send_logged(state.mailer.as_ref(), email).await;
        }
        Err(e) => warn!("Failed to issue reset token: {:#}", e),
    }
}

/// Resolve a reset token to its user. Any failure sends the client to the
/// index page.
async fn reset_target(state: &AppState, token: &str) -> Result<Option<UserRow>, ApiError> {
    let Some(user_id) = verify_reset_token(&state.settings.secret, token) else {
        return Ok(None);
    };
    with_db(state, move |db| db.get_user_by_id(&user_id.to_string())).await
}

pub async fn reset_password_page(
    State(state): State<AppState>,
    Path(token): Path<String>,
    locale: Locale,
) -> Result<Response, ApiError> {
    match reset_target(&state, &token).await? {
        Some(_) => Ok(Json(FormPage {
            title: Msg::ResetPassword.text(locale),
        })
        .into_response()),
        None => Ok(Redirect::to("/index").into_response()),
    }
}

pub async fn reset_password(
    State(state): State<AppState>,
    Path(token): Path<String>,
    locale: Locale,
    ApiJson(form): ApiJson<ResetPasswordForm>,
) -> Result<Response, ApiError> {
    let Some(user) = reset_target(&state, &token).await? else {
        return Ok(Redirect::to("/index").into_response());
    };
    form.validate(locale)?;

    let password = form.password;
    let user_id = user.id.clone();
    with_db(&state, move |db| {
        let hash = hash_password(&password)?;
        db.set_password_hash(&user_id, &hash)
    })
    .await?;

    info!("Password reset for '{}'", user.username);
    Ok(Json(FlashResponse {
        message: Msg::PasswordWasReset.text(locale),
        redirect: "/login".into(),
    })
    .into_response())
}
