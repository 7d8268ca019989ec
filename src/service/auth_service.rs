use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::{ApiClient, AuthEvent};
use crate::errors::AppError;
use crate::models::{LoginCredentials, PasswordChange, ProfileUpdate, RegisterData, User};

/// Owns "who is logged in". The chat coordinator follows [`AuthService::watch_user`] to start
/// and tear down real-time sessions.
#[derive(Clone)]
pub struct AuthService {
    api: ApiClient,
    user: Arc<watch::Sender<Option<User>>>,
}

impl AuthService {
    pub fn new(api: ApiClient) -> Self {
        let (user, _) = watch::channel(None);
        Self { api, user: Arc::new(user) }
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn current_user(&self) -> Option<User> {
        self.user.borrow().clone()
    }

    pub fn watch_user(&self) -> watch::Receiver<Option<User>> {
        self.user.subscribe()
    }

    pub fn is_authenticated(&self) -> bool {
        self.user.borrow().is_some()
    }

    fn set_user(&self, user: Option<User>) {
        self.user.send_replace(user);
    }

    /// Restores a session from a stored token. Any failure means "logged out".
    pub async fn check_auth(&self) -> Option<User> {
        if self.api.token().is_none() {
            debug!("No stored token; starting logged out");
            self.set_user(None);
            return None;
        }
        match self.api.profile().await.map(|r| r.into_data()) {
            Ok(Some(user)) => {
                info!("Session restored for {}", user.username);
                self.set_user(Some(user.clone()));
                Some(user)
            }
            Ok(None) => {
                self.api.clear_token();
                self.set_user(None);
                None
            }
            Err(e) => {
                warn!("Stored token rejected: {e}");
                self.api.clear_token();
                self.set_user(None);
                None
            }
        }
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<User, AppError> {
        let credentials = LoginCredentials {
            email: email.to_string(),
            password: password.to_string(),
        };
        let response = self.api.login(&credentials).await?;
        let reason = response.reason().map(str::to_string);
        let Some(payload) = response.into_data() else {
            return Err(AppError::rejected(200, reason.unwrap_or_else(|| "Login failed".into())));
        };
        let Some(token) = payload.token else {
            return Err(AppError::rejected(200, "Login response carried no token"));
        };
        self.api.set_token(&token)?;

        // Prefer the profile endpoint; fall back to the user echoed by the login response.
        let profile = match self.api.profile().await {
            Ok(response) => response.into_data(),
            Err(e) => {
                debug!("Profile fetch after login failed: {e}");
                None
            }
        };
        let Some(user) = profile.or(payload.user) else {
            self.api.clear_token();
            return Err(AppError::rejected(200, "Failed to get user data"));
        };

        info!("Logged in as {}", user.username);
        self.set_user(Some(user.clone()));
        Ok(user)
    }

    pub async fn register(&self, data: &RegisterData) -> Result<User, AppError> {
        let response = self.api.register(data).await?;
        let reason = response.reason().map(str::to_string);
        let payload = response.into_data();
        match payload.and_then(|p| Some((p.token?, p.user?))) {
            Some((token, user)) => {
                self.api.set_token(&token)?;
                info!("Registered {}", user.username);
                self.set_user(Some(user.clone()));
                Ok(user)
            }
            None => Err(AppError::rejected(200, reason.unwrap_or_else(|| "Registration failed".into()))),
        }
    }

    /// The local session ends even when the backend call fails.
    pub async fn logout(&self) {
        if let Err(e) = self.api.logout().await {
            warn!("Logout request failed: {e}");
        }
        self.set_user(None);
        info!("Logged out");
    }

    pub async fn update_profile(&self, update: &ProfileUpdate) -> Result<User, AppError> {
        let response = self.api.update_profile(update).await?;
        let reason = response.reason().map(str::to_string);
        let user = response
            .into_data()
            .ok_or_else(|| AppError::rejected(200, reason.unwrap_or_else(|| "Profile update failed".into())))?;
        self.set_user(Some(user.clone()));
        Ok(user)
    }

    pub async fn change_password(&self, current: &str, new: &str) -> Result<(), AppError> {
        if new.is_empty() {
            return Err(AppError::EmptyField { field_name: "new_password".into() });
        }
        let change = PasswordChange {
            current_password: current.to_string(),
            new_password: new.to_string(),
        };
        let response = self.api.change_password(&change).await?;
        if response.success {
            Ok(())
        } else {
            Err(AppError::rejected(200, response.reason().unwrap_or("Password change failed")))
        }
    }

    pub async fn refresh_user(&self) -> Result<Option<User>, AppError> {
        let user = self.api.profile().await?.into_data();
        if user.is_some() {
            self.set_user(user.clone());
        }
        Ok(user)
    }

    /// Ends the session whenever the API client reports an authorization failure.
    pub fn watch_unauthorized(&self) -> JoinHandle<()> {
        let mut events = self.api.auth_events();
        let service = self.clone();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(AuthEvent::Unauthorized { redirect_to }) => {
                        warn!("Authorization lost; redirecting to {redirect_to}");
                        service.set_user(None);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!("Skipped {skipped} auth events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}
