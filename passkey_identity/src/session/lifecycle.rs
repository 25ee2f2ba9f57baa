use chrono::Utc;

use crate::coordination::{Account, IdentityError, IdentityService};
use crate::ids::SessionId;
use crate::storage::NewSessionRecord;

use super::types::{SessionGrant, VerifiedSession};

impl IdentityService {
    /// Starts a session for an already authenticated account.
    #[tracing::instrument(skip(self, account), fields(account_id = %account.id))]
    pub async fn issue_session(&self, account: &Account) -> Result<SessionGrant, IdentityError> {
        let now = Utc::now();
        let expires_at = now
            .checked_add_signed(self.config.session_ttl())
            .ok_or_else(|| {
                IdentityError::Config("session duration out of range".to_string()).log()
            })?;

        let session = self
            .store
            .create_session(NewSessionRecord {
                id: SessionId::new()?,
                account_id: account.id.clone(),
                expires_at,
            })
            .await?;
        let token = self.signer.sign(session.id.as_str().as_bytes())?;

        tracing::info!("Session issued");
        Ok(SessionGrant {
            token,
            max_age: session.expires_at - now,
            session: session.into(),
            account: account.clone(),
        })
    }

    /// Resolves a session token to its live session and account.
    #[tracing::instrument(skip_all)]
    pub async fn verify_session(&self, token: &str) -> Result<VerifiedSession, IdentityError> {
        let session_id = self.session_id_from_token(token)?;

        // Expired rows are fetched too so the expiry check happens here.
        let resolved = self
            .store
            .get_session(&session_id, true)
            .await?
            .ok_or(IdentityError::SessionExpired)?;

        if resolved.session.is_expired_at(Utc::now()) {
            tracing::debug!(account_id = %resolved.account.id, "Session past expiry");
            return Err(IdentityError::SessionExpired);
        }

        Ok(VerifiedSession {
            session: resolved.session.into(),
            account: resolved.account.into(),
        })
    }

    /// Ends the session named by a validly signed token. Ending an already
    /// ended session is not an error.
    #[tracing::instrument(skip_all)]
    pub async fn end_session(&self, token: &str) -> Result<(), IdentityError> {
        let session_id = self.session_id_from_token(token)?;
        self.store.delete_session(&session_id).await?;
        tracing::info!("Session ended");
        Ok(())
    }

    fn session_id_from_token(&self, token: &str) -> Result<SessionId, IdentityError> {
        let payload = self.signer.verify(token)?;
        std::str::from_utf8(&payload)
            .ok()
            .and_then(|s| SessionId::parse(s).ok())
            .ok_or_else(|| IdentityError::InvalidToken.log())
    }
}
