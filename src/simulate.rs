use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::inference::{self, InferenceApi};
use crate::models::{AthleteProfile, ChatTurn, CoachStats, Sender, SimulationDoc};
use crate::session::Identity;
use crate::store::{collections, Store};

/// Fixed coach line that seeds every simulated conversation.
pub const OPENER: &str = "Hey, how are you feeling lately?";

const MAX_UPDATE_ATTEMPTS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Form,
    Chat,
    Sending,
    Evaluate,
}

/// What `finish` produced: the free-text evaluation, the score parsed out
/// of it (None when the model gave no "Score:" line), and the coach's
/// statistics after the increment (untouched on a failed parse).
#[derive(Debug)]
pub struct EvaluationOutcome {
    pub evaluation: String,
    pub score: Option<f64>,
    pub stats: Option<CoachStats>,
}

/// Drives one simulated athlete conversation through its states:
/// Form -> Chat on `start`, Chat -> Chat via `send` (Sending while the
/// model call is in flight), Chat -> Evaluate on `finish`. The transcript
/// is persisted incrementally: the first completed exchange inserts the
/// simulation document, later exchanges update it in place.
pub struct SimulationController<'a> {
    store: &'a dyn Store,
    inference: &'a dyn InferenceApi,
    coach: Identity,
    profile: AthleteProfile,
    transcript: Vec<ChatTurn>,
    step: Step,
    doc_id: Option<String>,
    started_at: DateTime<Utc>,
}

impl<'a> SimulationController<'a> {
    pub fn new(
        store: &'a dyn Store,
        inference: &'a dyn InferenceApi,
        coach: &Identity,
        profile: AthleteProfile,
    ) -> Self {
        SimulationController {
            store,
            inference,
            coach: coach.clone(),
            profile,
            transcript: Vec::new(),
            step: Step::Form,
            doc_id: None,
            started_at: Utc::now(),
        }
    }

    pub fn step(&self) -> Step {
        self.step
    }

    pub fn transcript(&self) -> &[ChatTurn] {
        &self.transcript
    }

    /// Seed the transcript with the fixed opener and fetch the first
    /// athlete reply. On failure the controller is back in `Form` with an
    /// empty transcript.
    pub async fn start(&mut self) -> Result<String> {
        if self.step != Step::Form {
            return Err(Error::validation("simulation already started"));
        }
        self.transcript.push(ChatTurn {
            sender: Sender::Coach,
            message: OPENER.to_string(),
        });
        self.step = Step::Sending;

        let reply = match self.inference.simulate(&self.profile, &self.transcript).await {
            Ok(reply) => reply,
            Err(err) => {
                self.transcript.pop();
                self.step = Step::Form;
                return Err(err);
            }
        };

        self.transcript.push(ChatTurn {
            sender: Sender::Athlete,
            message: reply.clone(),
        });
        self.save_transcript(None).await?;
        self.step = Step::Chat;
        Ok(reply)
    }

    /// One coach turn: append the line, ask the model for the athlete's
    /// reply, persist the grown transcript. On failure the coach line is
    /// withdrawn and the controller stays in `Chat`.
    pub async fn send(&mut self, message: &str) -> Result<String> {
        if self.step != Step::Chat {
            return Err(Error::validation("conversation is not active"));
        }
        if message.trim().is_empty() {
            return Err(Error::validation("message is empty"));
        }

        self.transcript.push(ChatTurn {
            sender: Sender::Coach,
            message: message.to_string(),
        });
        self.step = Step::Sending;

        let reply = match self.inference.simulate(&self.profile, &self.transcript).await {
            Ok(reply) => reply,
            Err(err) => {
                self.transcript.pop();
                self.step = Step::Chat;
                return Err(err);
            }
        };

        self.transcript.push(ChatTurn {
            sender: Sender::Athlete,
            message: reply.clone(),
        });
        self.save_transcript(None).await?;
        self.step = Step::Chat;
        Ok(reply)
    }

    /// End the conversation: evaluate the full transcript, persist the
    /// evaluation, and on a parseable score apply one read-modify-write
    /// increment to the coach's statistics. An unparseable evaluation
    /// leaves the statistics untouched; the already persisted transcript
    /// is not rolled back.
    pub async fn finish(&mut self) -> Result<EvaluationOutcome> {
        if self.step != Step::Chat {
            return Err(Error::validation("conversation is not active"));
        }
        self.step = Step::Evaluate;

        let evaluation = match self.inference.evaluate(&self.profile, &self.transcript).await {
            Ok(evaluation) => evaluation,
            Err(err) => {
                self.step = Step::Chat;
                return Err(err);
            }
        };

        self.save_transcript(Some(evaluation.clone())).await?;

        let score = inference::parse_score(&evaluation);
        let stats = match score {
            Some(score) => Some(record_evaluation(self.store, &self.coach, score).await?),
            None => {
                tracing::debug!("evaluation carried no score line; stats untouched");
                None
            }
        };

        Ok(EvaluationOutcome {
            evaluation,
            score,
            stats,
        })
    }

    async fn save_transcript(&mut self, evaluation: Option<String>) -> Result<()> {
        let doc = SimulationDoc {
            profile: self.profile.clone(),
            chat_history: self.transcript.clone(),
            evaluation,
            team_id: self.coach.profile.team_id.clone(),
            timestamp: self.started_at,
        };
        let data = serde_json::to_value(&doc)?;

        match &self.doc_id {
            None => {
                let id = self.store.insert(collections::SIMULATIONS, data).await?;
                self.doc_id = Some(id);
            }
            Some(id) => {
                self.store.put(collections::SIMULATIONS, id, data).await?;
            }
        }
        Ok(())
    }
}

/// Fold one evaluation score into the coach's running statistic through the
/// versioned-update loop: first score creates the document, later ones
/// re-read and retry on conflict.
pub async fn record_evaluation(
    store: &dyn Store,
    coach: &Identity,
    score: f64,
) -> Result<CoachStats> {
    for _ in 0..MAX_UPDATE_ATTEMPTS {
        match store.get(collections::COACH_STATS, &coach.uid).await? {
            None => {
                let stats = CoachStats {
                    name: coach.profile.name.clone(),
                    total_score: score,
                    total_sessions: 1,
                    average_score: score,
                };
                store
                    .put(collections::COACH_STATS, &coach.uid, serde_json::to_value(&stats)?)
                    .await?;
                return Ok(stats);
            }
            Some(doc) => {
                let current: CoachStats = doc.parse()?;
                let total_score = current.total_score + score;
                let total_sessions = current.total_sessions + 1;
                let stats = CoachStats {
                    name: current.name,
                    total_score,
                    total_sessions,
                    average_score: total_score / total_sessions as f64,
                };
                if store
                    .update_if(
                        collections::COACH_STATS,
                        &coach.uid,
                        doc.version,
                        serde_json::to_value(&stats)?,
                    )
                    .await?
                {
                    return Ok(stats);
                }
                tracing::debug!(coach = %coach.uid, "stats update conflicted; retrying");
            }
        }
    }
    Err(Error::Conflict(MAX_UPDATE_ATTEMPTS))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::testing::ScriptedInference;
    use crate::models::{Role, UserProfile};
    use crate::store::{Filter, MemoryStore};

    fn coach() -> Identity {
        Identity {
            uid: "coach-1".to_string(),
            profile: UserProfile {
                name: "Dana Brooks".to_string(),
                email: "dana@example.com".to_string(),
                role: Role::Coach,
                team_id: "3f9a1c".to_string(),
            },
        }
    }

    fn profile() -> AthleteProfile {
        AthleteProfile {
            age: 16,
            sport: "Soccer".to_string(),
            anxiety_level: "High".to_string(),
            motivation_level: "Low".to_string(),
            context: "Before Game".to_string(),
        }
    }

    #[tokio::test]
    async fn start_seeds_the_opener_and_first_reply() {
        let store = MemoryStore::new();
        let inference = ScriptedInference::new();
        inference.push_reply("Honestly, pretty nervous.");

        let coach = coach();
        let mut sim = SimulationController::new(&store, &inference, &coach, profile());
        assert_eq!(sim.step(), Step::Form);

        let reply = sim.start().await.unwrap();
        assert_eq!(reply, "Honestly, pretty nervous.");
        assert_eq!(sim.step(), Step::Chat);
        assert_eq!(sim.transcript().len(), 2);
        assert_eq!(sim.transcript()[0].message, OPENER);
        assert_eq!(sim.transcript()[0].sender, Sender::Coach);
        assert_eq!(sim.transcript()[1].sender, Sender::Athlete);

        let docs = store
            .list(collections::SIMULATIONS, &Filter::none())
            .await
            .unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].data["chat_history"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn send_grows_one_document_in_place() {
        let store = MemoryStore::new();
        let inference = ScriptedInference::new();
        inference.push_reply("Pretty nervous.");
        inference.push_reply("The first game mostly.");

        let coach = coach();
        let mut sim = SimulationController::new(&store, &inference, &coach, profile());
        sim.start().await.unwrap();
        sim.send("What part worries you most?").await.unwrap();

        assert_eq!(sim.transcript().len(), 4);

        let docs = store
            .list(collections::SIMULATIONS, &Filter::none())
            .await
            .unwrap();
        assert_eq!(docs.len(), 1, "turns update the document, not add new ones");
        assert_eq!(docs[0].data["chat_history"].as_array().unwrap().len(), 4);
        assert_eq!(docs[0].data["teamId"], "3f9a1c");
    }

    #[tokio::test]
    async fn start_failure_returns_to_the_form() {
        let store = MemoryStore::new();
        let inference = ScriptedInference::failing();

        let coach = coach();
        let mut sim = SimulationController::new(&store, &inference, &coach, profile());
        assert!(sim.start().await.is_err());
        assert_eq!(sim.step(), Step::Form);
        assert!(sim.transcript().is_empty());

        let docs = store
            .list(collections::SIMULATIONS, &Filter::none())
            .await
            .unwrap();
        assert!(docs.is_empty());
    }

    #[tokio::test]
    async fn finish_scores_and_increments_coach_stats() {
        let store = MemoryStore::new();
        let inference = ScriptedInference::new();
        inference.push_evaluation("Score: 7.5\nFeedback: good pacing");

        let coach = coach();
        let mut sim = SimulationController::new(&store, &inference, &coach, profile());
        sim.start().await.unwrap();

        let outcome = sim.finish().await.unwrap();
        assert_eq!(outcome.score, Some(7.5));
        let stats = outcome.stats.unwrap();
        assert_eq!(stats.total_score, 7.5);
        assert_eq!(stats.total_sessions, 1);
        assert_eq!(stats.average_score, 7.5);

        // A second evaluated simulation folds into the same statistic.
        let inference = ScriptedInference::new();
        inference.push_evaluation("Score: 8.5\nFeedback: stronger close");
        let mut sim = SimulationController::new(&store, &inference, &coach, profile());
        sim.start().await.unwrap();
        let outcome = sim.finish().await.unwrap();

        let stats = outcome.stats.unwrap();
        assert_eq!(stats.total_score, 16.0);
        assert_eq!(stats.total_sessions, 2);
        assert_eq!(stats.average_score, 8.0);
    }

    #[tokio::test]
    async fn unparseable_evaluation_leaves_stats_untouched() {
        let store = MemoryStore::new();
        let inference = ScriptedInference::new();
        inference.push_evaluation("Warm tone throughout, no numeric grade.");

        let coach = coach();
        let mut sim = SimulationController::new(&store, &inference, &coach, profile());
        sim.start().await.unwrap();

        let outcome = sim.finish().await.unwrap();
        assert_eq!(outcome.score, None);
        assert!(outcome.stats.is_none());
        assert!(store
            .get(collections::COACH_STATS, "coach-1")
            .await
            .unwrap()
            .is_none());

        // The transcript write that preceded the parse is not rolled back.
        let docs = store
            .list(collections::SIMULATIONS, &Filter::none())
            .await
            .unwrap();
        assert_eq!(
            docs[0].data["evaluation"],
            "Warm tone throughout, no numeric grade."
        );
    }

    #[tokio::test]
    async fn send_requires_an_active_conversation() {
        let store = MemoryStore::new();
        let inference = ScriptedInference::new();
        let coach = coach();
        let mut sim = SimulationController::new(&store, &inference, &coach, profile());

        assert!(matches!(
            sim.send("hello").await.unwrap_err(),
            Error::Validation(_)
        ));
        assert!(matches!(
            sim.finish().await.unwrap_err(),
            Error::Validation(_)
        ));
    }
}
