use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{Role, UserProfile};
use crate::store::{collections, Filter, Store};

/// Everything a signed-in principal carries: the stored user id plus the
/// profile document. The role attribute is assumed immutable for the
/// session's lifetime.
#[derive(Debug, Clone)]
pub struct Identity {
    pub uid: String,
    pub profile: UserProfile,
}

/// The session gate. Each command resolves this once from a single `users`
/// lookup and the result decides which operations are reachable.
#[derive(Debug, Clone)]
pub enum Session {
    SignedOut,
    Coach(Identity),
    Athlete(Identity),
}

impl Session {
    pub async fn resolve(store: &dyn Store, email: &str) -> Result<Session> {
        let docs = store
            .list(collections::USERS, &Filter::field("email", email))
            .await?;

        match docs.first() {
            None => Ok(Session::SignedOut),
            Some(doc) => {
                let profile: UserProfile = doc.parse()?;
                let identity = Identity {
                    uid: doc.id.clone(),
                    profile,
                };
                Ok(match identity.profile.role {
                    Role::Coach => Session::Coach(identity),
                    Role::Athlete => Session::Athlete(identity),
                })
            }
        }
    }

    pub fn require_coach(&self) -> Result<&Identity> {
        match self {
            Session::Coach(identity) => Ok(identity),
            Session::Athlete(_) => Err(Error::validation("only coaches can do this")),
            Session::SignedOut => Err(Error::validation("no account found for this email")),
        }
    }

    pub fn require_athlete(&self) -> Result<&Identity> {
        match self {
            Session::Athlete(identity) => Ok(identity),
            Session::Coach(_) => {
                Err(Error::validation("only athletes can submit reflections"))
            }
            Session::SignedOut => Err(Error::validation("no account found for this email")),
        }
    }
}

async fn ensure_new_account(store: &dyn Store, name: &str, email: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::validation("please enter your full name"));
    }
    if email.trim().is_empty() {
        return Err(Error::validation("please enter an email address"));
    }
    let existing = store
        .list(collections::USERS, &Filter::field("email", email))
        .await?;
    if !existing.is_empty() {
        return Err(Error::validation(format!(
            "an account already exists for {email}"
        )));
    }
    Ok(())
}

/// Create a coach account with a fresh team. Returns the 6-character team
/// code athletes use to join.
pub async fn signup_coach(store: &dyn Store, name: &str, email: &str) -> Result<String> {
    ensure_new_account(store, name, email).await?;

    let team_id: String = Uuid::new_v4().to_string().chars().take(6).collect();
    let profile = UserProfile {
        name: name.trim().to_string(),
        email: email.trim().to_string(),
        role: Role::Coach,
        team_id: team_id.clone(),
    };
    let uid = Uuid::new_v4().to_string();
    store
        .put(collections::USERS, &uid, serde_json::to_value(&profile)?)
        .await?;
    tracing::info!(%uid, %team_id, "coach account created");
    Ok(team_id)
}

pub async fn signup_athlete(
    store: &dyn Store,
    name: &str,
    email: &str,
    team_code: &str,
) -> Result<()> {
    if team_code.trim().is_empty() {
        return Err(Error::validation("please enter a team code"));
    }
    ensure_new_account(store, name, email).await?;

    let profile = UserProfile {
        name: name.trim().to_string(),
        email: email.trim().to_string(),
        role: Role::Athlete,
        team_id: team_code.trim().to_string(),
    };
    let uid = Uuid::new_v4().to_string();
    store
        .put(collections::USERS, &uid, serde_json::to_value(&profile)?)
        .await?;
    tracing::info!(%uid, team_code, "athlete account created");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn unknown_email_resolves_to_signed_out() {
        let store = MemoryStore::new();
        let session = Session::resolve(&store, "nobody@example.com").await.unwrap();
        assert!(matches!(session, Session::SignedOut));
        assert!(session.require_coach().is_err());
        assert!(session.require_athlete().is_err());
    }

    #[tokio::test]
    async fn coach_signup_creates_a_joinable_team() {
        let store = MemoryStore::new();
        let code = signup_coach(&store, "Dana Brooks", "dana@example.com")
            .await
            .unwrap();
        assert_eq!(code.len(), 6);

        signup_athlete(&store, "Avery Lee", "avery@example.com", &code)
            .await
            .unwrap();

        let coach = Session::resolve(&store, "dana@example.com").await.unwrap();
        let identity = coach.require_coach().unwrap();
        assert_eq!(identity.profile.team_id, code);
        assert!(coach.require_athlete().is_err());

        let athlete = Session::resolve(&store, "avery@example.com").await.unwrap();
        assert_eq!(athlete.require_athlete().unwrap().profile.team_id, code);
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected() {
        let store = MemoryStore::new();
        signup_coach(&store, "Dana", "dana@example.com").await.unwrap();
        let err = signup_coach(&store, "Dana Again", "dana@example.com")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn athlete_signup_requires_a_team_code() {
        let store = MemoryStore::new();
        let err = signup_athlete(&store, "Avery", "avery@example.com", "  ")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
