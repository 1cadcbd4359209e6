use chrono::Utc;

use crate::error::{Error, Result};
use crate::inference::InferenceApi;
use crate::models::ReflectionDoc;
use crate::session::Session;
use crate::store::{collections, Store};

/// Score a free-text reflection remotely, then persist it. Validation and
/// the role gate run before any remote call; an inference failure aborts
/// before anything is written.
pub async fn submit_reflection(
    store: &dyn Store,
    inference: &dyn InferenceApi,
    session: &Session,
    message: &str,
    anonymous: bool,
) -> Result<ReflectionDoc> {
    if message.trim().is_empty() {
        return Err(Error::validation("reflection message is empty"));
    }
    let identity = session.require_athlete()?;

    let scored = inference.reflect(message).await?;
    tracing::debug!(
        sentiment = %scored.sentiment,
        score = scored.score,
        "reflection scored"
    );

    let doc = ReflectionDoc {
        athlete: identity.profile.email.clone(),
        name: if anonymous {
            None
        } else {
            Some(identity.profile.name.clone())
        },
        message: message.to_string(),
        sentiment: scored.sentiment,
        score: scored.score,
        team_id: identity.profile.team_id.clone(),
        anonymous,
        user_id: identity.uid.clone(),
        timestamp: Utc::now(),
    };

    store
        .insert(collections::REFLECTIONS, serde_json::to_value(&doc)?)
        .await?;
    Ok(doc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::testing::ScriptedInference;
    use crate::store::{Filter, MemoryStore};

    async fn athlete_session(store: &MemoryStore) -> Session {
        crate::session::signup_coach(store, "Dana", "dana@example.com")
            .await
            .unwrap();
        let code = {
            let coach = Session::resolve(store, "dana@example.com").await.unwrap();
            coach.require_coach().unwrap().profile.team_id.clone()
        };
        crate::session::signup_athlete(store, "Avery Lee", "avery@example.com", &code)
            .await
            .unwrap();
        Session::resolve(store, "avery@example.com").await.unwrap()
    }

    #[tokio::test]
    async fn anonymous_submission_stores_a_null_name() {
        let store = MemoryStore::new();
        let session = athlete_session(&store).await;
        let inference = ScriptedInference::new();
        inference.set_sentiment("Red Flag", 2.5);

        submit_reflection(&store, &inference, &session, "rough week", true)
            .await
            .unwrap();

        let docs = store
            .list(collections::REFLECTIONS, &Filter::none())
            .await
            .unwrap();
        assert_eq!(docs.len(), 1);
        assert!(docs[0].data["name"].is_null());
        assert_eq!(docs[0].data["anonymous"], true);
        assert_eq!(docs[0].data["sentiment"], "Red Flag");
        assert_eq!(docs[0].data["score"], 2.5);
    }

    #[tokio::test]
    async fn named_submission_stores_the_profile_name() {
        let store = MemoryStore::new();
        let session = athlete_session(&store).await;
        let inference = ScriptedInference::new();

        let doc = submit_reflection(&store, &inference, &session, "good practice", false)
            .await
            .unwrap();
        assert_eq!(doc.name.as_deref(), Some("Avery Lee"));

        let docs = store
            .list(collections::REFLECTIONS, &Filter::none())
            .await
            .unwrap();
        assert_eq!(docs[0].data["name"], "Avery Lee");
    }

    #[tokio::test]
    async fn empty_message_is_rejected_before_any_remote_call() {
        let store = MemoryStore::new();
        let session = athlete_session(&store).await;
        // A failing inference double proves validation short-circuits.
        let inference = ScriptedInference::failing();

        let err = submit_reflection(&store, &inference, &session, "   ", false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn coaches_cannot_submit_reflections() {
        let store = MemoryStore::new();
        athlete_session(&store).await;
        let coach = Session::resolve(&store, "dana@example.com").await.unwrap();
        let inference = ScriptedInference::new();

        let err = submit_reflection(&store, &inference, &coach, "hello", false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn inference_failure_writes_nothing() {
        let store = MemoryStore::new();
        let session = athlete_session(&store).await;
        let inference = ScriptedInference::failing();

        let err = submit_reflection(&store, &inference, &session, "hello", false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Inference(_)));

        let docs = store
            .list(collections::REFLECTIONS, &Filter::none())
            .await
            .unwrap();
        assert!(docs.is_empty());
    }
}
