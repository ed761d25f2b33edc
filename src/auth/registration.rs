//! Email-confirmed registration.
//!
//! `submit` validates the form, checks the email is free, hashes the password
//! and mails a signed link; nothing is written to the database. `confirm`
//! verifies the link and creates the user row. The `users.email` unique
//! constraint is the final arbiter when two confirmations race.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;
use time::Duration;
use tracing::{error, info, warn};

use super::{
    password,
    repo::{StoreError, UserStore},
    repo_types::{PendingRegistration, User},
    token::{TokenError, TokenSigner},
};
use crate::{mail::Mailer, state::AppState};

pub const CONFIRM_PURPOSE: &str = "email-confirm";
pub const CONFIRM_MAX_AGE: Duration = Duration::hours(1);
pub const CONFIRM_PATH: &str = "/confirm";
pub const CONFIRM_SUBJECT: &str = "Confirm your registration";

#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("{0}")]
    InvalidInput(&'static str),

    #[error("This email is already registered.")]
    DuplicateEmail,

    #[error("The confirmation link is invalid or has expired.")]
    LinkInvalidOrExpired,

    #[error("This email has already been confirmed.")]
    AlreadyConfirmed,

    #[error("Could not send the confirmation email. Please try again.")]
    NotificationFailure(#[source] anyhow::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for RegistrationError {
    fn into_response(self) -> Response {
        let status = match &self {
            RegistrationError::InvalidInput(_) | RegistrationError::LinkInvalidOrExpired => {
                StatusCode::BAD_REQUEST
            }
            RegistrationError::DuplicateEmail | RegistrationError::AlreadyConfirmed => {
                StatusCode::CONFLICT
            }
            RegistrationError::NotificationFailure(_) => StatusCode::BAD_GATEWAY,
            RegistrationError::Internal(e) => {
                error!(error = %e, "registration failed");
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
                    .into_response();
            }
        };
        (status, self.to_string()).into_response()
    }
}

/// Raw registration form as submitted by the visitor.
#[derive(Debug, Clone)]
pub struct RegistrationForm {
    pub email: String,
    pub nickname: String,
    pub password: String,
    pub contact_info: String,
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

pub fn confirmation_url(base_url: &str, token: &str) -> String {
    format!("{}{}/{}", base_url.trim_end_matches('/'), CONFIRM_PATH, token)
}

pub struct Registration<'a> {
    pub users: &'a dyn UserStore,
    pub mailer: &'a dyn Mailer,
    pub signer: &'a TokenSigner,
    pub base_url: &'a str,
}

impl<'a> Registration<'a> {
    pub fn from_state(state: &'a AppState) -> Self {
        Self {
            users: state.users.as_ref(),
            mailer: state.mailer.as_ref(),
            signer: &state.signer,
            base_url: &state.config.base_url,
        }
    }

    pub async fn submit(&self, form: RegistrationForm) -> Result<(), RegistrationError> {
        let email = form.email.trim().to_string();
        if !is_valid_email(&email) {
            warn!(%email, "invalid email");
            return Err(RegistrationError::InvalidInput("Invalid email"));
        }
        let nickname = form.nickname.trim().to_string();
        if nickname.is_empty() {
            return Err(RegistrationError::InvalidInput("Nickname is required"));
        }
        if form.password.is_empty() {
            return Err(RegistrationError::InvalidInput("Password is required"));
        }

        if self.users.find_by_email(&email).await?.is_some() {
            warn!(%email, "email already registered");
            return Err(RegistrationError::DuplicateEmail);
        }

        let pending = PendingRegistration {
            email,
            nickname,
            password_hash: password::hash_password(&form.password)?,
            contact_info: form.contact_info.trim().to_string(),
        };
        let token = self.signer.issue(&pending, CONFIRM_PURPOSE)?;
        let url = confirmation_url(self.base_url, &token);
        let body = format!("Hi, please click the link to confirm your registration:\n{url}");

        if let Err(e) = self
            .mailer
            .send(&pending.email, CONFIRM_SUBJECT, &body)
            .await
        {
            error!(error = %e, email = %pending.email, "confirmation email not sent");
            return Err(RegistrationError::NotificationFailure(e));
        }

        info!(email = %pending.email, "confirmation email sent");
        Ok(())
    }

    pub async fn confirm(&self, token: &str) -> Result<User, RegistrationError> {
        let pending: PendingRegistration = self
            .signer
            .verify(token, CONFIRM_PURPOSE, CONFIRM_MAX_AGE)
            .map_err(|e| {
                match e {
                    TokenError::Expired => info!("confirmation link expired"),
                    TokenError::Invalid => warn!("confirmation link invalid"),
                }
                RegistrationError::LinkInvalidOrExpired
            })?;

        if self.users.find_by_email(&pending.email).await?.is_some() {
            warn!(email = %pending.email, "registration already confirmed");
            return Err(RegistrationError::AlreadyConfirmed);
        }

        let user = match self.users.insert(&pending).await {
            Ok(u) => u,
            Err(StoreError::DuplicateEmail) => {
                warn!(email = %pending.email, "lost confirmation race");
                return Err(RegistrationError::AlreadyConfirmed);
            }
            Err(StoreError::Other(e)) => return Err(RegistrationError::Internal(e)),
        };

        info!(user_id = user.id, email = %user.email, "user registered");
        Ok(user)
    }
}
