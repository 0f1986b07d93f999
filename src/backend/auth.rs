use std::{fmt::Write as _, str::FromStr, sync::Arc};

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{SqliteConnection, SqlitePool};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{timestamp, Email, MailError, Mailer};
use crate::records::MIN_PASSWORD_CHARS;

/// Who the backend says the caller is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: Uuid,
    pub email: String,
    pub username: Option<String>,
}

impl Identity {
    /// The username chosen at sign-up, or the email when there is none.
    pub fn display_name(&self) -> &str {
        self.username
            .as_deref()
            .filter(|name| !name.is_empty())
            .unwrap_or(&self.email)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OtpType {
    Signup,
    Magiclink,
    /// Accepts any emailed token.
    Email,
}

impl OtpType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Signup => "signup",
            Self::Magiclink => "magiclink",
            Self::Email => "email",
        }
    }

    fn accepts(self, issued: &str) -> bool {
        self == Self::Email || self.as_str() == issued
    }
}

impl FromStr for OtpType {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "signup" => Ok(Self::Signup),
            "magiclink" => Ok(Self::Magiclink),
            "email" => Ok(Self::Email),
            _ => Err(AuthError::Rejected(TOKEN_INVALID.to_owned())),
        }
    }
}

const INVALID_CREDENTIALS: &str = "Invalid login credentials";
const NOT_CONFIRMED: &str = "Email not confirmed";
const ALREADY_REGISTERED: &str = "User already registered";
const INVALID_EMAIL: &str = "Unable to validate email address: invalid format";
const TOKEN_INVALID: &str = "Token has expired or is invalid";

#[derive(Debug, Error)]
pub enum AuthError {
    /// Shown to the user as-is.
    #[error("{0}")]
    Rejected(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("password hashing failed: {0}")]
    Hash(String),
    #[error(transparent)]
    Mail(#[from] MailError),
}

impl AuthError {
    fn rejected(message: &str) -> Self {
        Self::Rejected(message.to_owned())
    }

    /// Text safe to put in front of the user.
    pub fn user_message(&self) -> String {
        match self {
            Self::Rejected(message) => message.clone(),
            Self::Mail(_) => "Error sending email".to_owned(),
            _ => "Something went wrong. Please try again.".to_owned(),
        }
    }
}

pub type AuthResult<T> = Result<T, AuthError>;

#[async_trait]
pub trait Auth: Send + Sync {
    async fn sign_in_with_password(&self, email: &str, password: &str) -> AuthResult<Identity>;

    /// Registers an account and mails a confirmation link to `redirect_to`.
    async fn sign_up(&self, email: &str, password: &str, username: &str, redirect_to: &str) -> AuthResult<()>;

    /// Mails a one-time sign-in link, creating the account if needed.
    async fn sign_in_with_otp(&self, email: &str, redirect_to: &str) -> AuthResult<()>;

    async fn verify_otp(&self, token_hash: &str, kind: OtpType) -> AuthResult<Identity>;
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: String,
    email: String,
    password_hash: Option<String>,
    username: Option<String>,
    confirmed_at: Option<String>,
}

impl UserRow {
    fn identity(self) -> AuthResult<Identity> {
        let id = Uuid::parse_str(&self.id).map_err(|err| AuthError::Database(sqlx::Error::Decode(Box::new(err))))?;
        Ok(Identity {
            id,
            email: self.email,
            username: self.username,
        })
    }
}

/// Accounts and one-time tokens kept next to the collections.
pub struct SqliteAuth {
    pool: SqlitePool,
    mailer: Arc<dyn Mailer>,
    token_ttl: Duration,
}

fn normalize_email(email: &str) -> AuthResult<String> {
    let email = email.trim().to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') && !domain.ends_with('.') => Ok(email),
        _ => Err(AuthError::rejected(INVALID_EMAIL)),
    }
}

fn hash_password(password: &str) -> AuthResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| AuthError::Hash(err.to_string()))
}

fn password_matches(password: &str, stored: &str) -> bool {
    match PasswordHash::new(stored) {
        Ok(parsed) => Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok(),
        Err(err) => {
            warn!(error = %err, "stored password hash is unreadable");
            false
        }
    }
}

fn new_token_hash() -> String {
    let bytes: [u8; 32] = rand::random();
    bytes.iter().fold(String::with_capacity(64), |mut out, byte| {
        let _ = write!(out, "{byte:02x}");
        out
    })
}

fn link(redirect_to: &str, token_hash: &str, kind: OtpType) -> String {
    let separator = if redirect_to.contains('?') { '&' } else { '?' };
    format!("{redirect_to}{separator}token_hash={token_hash}&type={}", kind.as_str())
}

async fn user_by_email(conn: &mut SqliteConnection, email: &str) -> AuthResult<Option<UserRow>> {
    Ok(sqlx::query_as("select id,email,password_hash,username,confirmed_at from users where email=?")
        .bind(email)
        .fetch_optional(&mut *conn)
        .await?)
}

impl SqliteAuth {
    pub fn new(pool: SqlitePool, mailer: Arc<dyn Mailer>, token_ttl: Duration) -> Self {
        Self { pool, mailer, token_ttl }
    }

    async fn issue_token(&self, conn: &mut SqliteConnection, user_id: &str, kind: OtpType) -> AuthResult<String> {
        let token_hash = new_token_hash();
        let now = Utc::now();
        sqlx::query("insert into one_time_tokens (token_hash,user_id,kind,created_at,expires_at) values (?,?,?,?,?)")
            .bind(&token_hash)
            .bind(user_id)
            .bind(kind.as_str())
            .bind(timestamp(now))
            .bind(timestamp(now + self.token_ttl))
            .execute(&mut *conn)
            .await?;
        Ok(token_hash)
    }

    async fn mail_link(&self, to: &str, redirect_to: &str, token_hash: &str, kind: OtpType) -> AuthResult<()> {
        let (subject, intro) = match kind {
            OtpType::Signup => ("Confirm your signup", "Follow this link to confirm your account:"),
            _ => ("Your sign-in link", "Follow this link to sign in:"),
        };
        let link = link(redirect_to, token_hash, kind);
        self.mailer
            .send(Email {
                to: to.to_owned(),
                subject: subject.to_owned(),
                body: format!("{intro}\n\n{link}\n"),
                link,
            })
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Auth for SqliteAuth {
    async fn sign_in_with_password(&self, email: &str, password: &str) -> AuthResult<Identity> {
        let email = normalize_email(email).map_err(|_| AuthError::rejected(INVALID_CREDENTIALS))?;
        let mut conn = self.pool.acquire().await?;

        let Some(user) = user_by_email(&mut conn, &email).await? else {
            return Err(AuthError::rejected(INVALID_CREDENTIALS));
        };
        let Some(stored) = user.password_hash.as_deref() else {
            return Err(AuthError::rejected(INVALID_CREDENTIALS));
        };
        if !password_matches(password, stored) {
            return Err(AuthError::rejected(INVALID_CREDENTIALS));
        }
        if user.confirmed_at.is_none() {
            return Err(AuthError::rejected(NOT_CONFIRMED));
        }

        user.identity()
    }

    async fn sign_up(&self, email: &str, password: &str, username: &str, redirect_to: &str) -> AuthResult<()> {
        let email = normalize_email(email)?;
        if password.chars().count() < MIN_PASSWORD_CHARS {
            return Err(AuthError::Rejected(format!(
                "Password should be at least {MIN_PASSWORD_CHARS} characters."
            )));
        }
        let username = Some(username.trim()).filter(|name| !name.is_empty());
        let password_hash = hash_password(password)?;

        let mut tx = self.pool.begin().await?;
        let user_id = match user_by_email(&mut tx, &email).await? {
            Some(user) if user.confirmed_at.is_some() => return Err(AuthError::rejected(ALREADY_REGISTERED)),
            Some(user) => {
                debug!(user = %user.id, "re-sending confirmation to unconfirmed account");
                sqlx::query("update users set password_hash=?, username=? where id=?")
                    .bind(&password_hash)
                    .bind(username)
                    .bind(&user.id)
                    .execute(&mut *tx)
                    .await?;
                user.id
            }
            None => {
                let id = Uuid::now_v7().to_string();
                sqlx::query("insert into users (id,email,password_hash,username,created_at) values (?,?,?,?,?)")
                    .bind(&id)
                    .bind(&email)
                    .bind(&password_hash)
                    .bind(username)
                    .bind(timestamp(Utc::now()))
                    .execute(&mut *tx)
                    .await?;
                id
            }
        };
        let token_hash = self.issue_token(&mut tx, &user_id, OtpType::Signup).await?;
        tx.commit().await?;

        self.mail_link(&email, redirect_to, &token_hash, OtpType::Signup).await?;
        info!(user = %user_id, "sign-up pending confirmation");
        Ok(())
    }

    async fn sign_in_with_otp(&self, email: &str, redirect_to: &str) -> AuthResult<()> {
        let email = normalize_email(email)?;

        let mut tx = self.pool.begin().await?;
        let user_id = match user_by_email(&mut tx, &email).await? {
            Some(user) => user.id,
            None => {
                let id = Uuid::now_v7().to_string();
                sqlx::query("insert into users (id,email,created_at) values (?,?,?)")
                    .bind(&id)
                    .bind(&email)
                    .bind(timestamp(Utc::now()))
                    .execute(&mut *tx)
                    .await?;
                id
            }
        };
        let token_hash = self.issue_token(&mut tx, &user_id, OtpType::Magiclink).await?;
        tx.commit().await?;

        self.mail_link(&email, redirect_to, &token_hash, OtpType::Magiclink).await?;
        info!(user = %user_id, "sign-in link sent");
        Ok(())
    }

    async fn verify_otp(&self, token_hash: &str, kind: OtpType) -> AuthResult<Identity> {
        let mut tx = self.pool.begin().await?;

        let token: Option<(String, String, String)> =
            sqlx::query_as("select user_id,kind,expires_at from one_time_tokens where token_hash=?")
                .bind(token_hash)
                .fetch_optional(&mut *tx)
                .await?;
        let Some((user_id, issued_kind, expires_at)) = token else {
            return Err(AuthError::rejected(TOKEN_INVALID));
        };
        if !kind.accepts(&issued_kind) {
            return Err(AuthError::rejected(TOKEN_INVALID));
        }

        // tokens are single use, even when expired
        sqlx::query("delete from one_time_tokens where token_hash=?")
            .bind(token_hash)
            .execute(&mut *tx)
            .await?;

        let expired = DateTime::parse_from_rfc3339(&expires_at)
            .map(|at| at.with_timezone(&Utc) <= Utc::now())
            .unwrap_or(true);
        if expired {
            tx.commit().await?;
            return Err(AuthError::rejected(TOKEN_INVALID));
        }

        sqlx::query("update users set confirmed_at=? where id=? and confirmed_at is null")
            .bind(timestamp(Utc::now()))
            .bind(&user_id)
            .execute(&mut *tx)
            .await?;
        let user: UserRow = sqlx::query_as("select id,email,password_hash,username,confirmed_at from users where id=?")
            .bind(&user_id)
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;

        user.identity()
    }
}
