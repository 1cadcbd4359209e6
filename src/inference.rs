use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::{AthleteProfile, ChatTurn};

const REQUEST_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone, Deserialize)]
pub struct SentimentResult {
    pub sentiment: String,
    pub score: f64,
}

/// The four remote-inference endpoints, behind a trait so the submission
/// flow and the simulation controller can run against a scripted double.
#[async_trait]
pub trait InferenceApi: Send + Sync {
    async fn reflect(&self, message: &str) -> Result<SentimentResult>;

    async fn simulate(
        &self,
        profile: &AthleteProfile,
        chat_history: &[ChatTurn],
    ) -> Result<String>;

    async fn evaluate(
        &self,
        profile: &AthleteProfile,
        chat_history: &[ChatTurn],
    ) -> Result<String>;

    async fn team_message(&self, avg_score: f64, summary: &str) -> Result<String>;
}

#[derive(Serialize)]
struct ReflectRequest<'a> {
    message: &'a str,
}

#[derive(Serialize)]
struct SimulateRequest<'a> {
    profile: &'a AthleteProfile,
    chat_history: &'a [ChatTurn],
}

#[derive(Serialize)]
struct TeamMessageRequest<'a> {
    #[serde(rename = "avgScore")]
    avg_score: f64,
    summary: &'a str,
}

#[derive(Deserialize)]
struct SimulateResponse {
    athlete_response: String,
}

#[derive(Deserialize)]
struct EvaluateResponse {
    evaluation: String,
}

#[derive(Deserialize)]
struct TeamMessageResponse {
    message: String,
}

pub struct HttpInference {
    base_url: String,
    client: Client,
}

impl HttpInference {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|_| Client::new());
        HttpInference {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        }
    }

    async fn post_json<B, R>(&self, path: &str, body: &B) -> Result<R>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!(%url, "inference request");

        let response = self.client.post(&url).json(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Inference(format!("{path} returned {status}")));
        }
        response
            .json::<R>()
            .await
            .map_err(|err| Error::Inference(format!("{path} returned an unparseable body: {err}")))
    }
}

#[async_trait]
impl InferenceApi for HttpInference {
    async fn reflect(&self, message: &str) -> Result<SentimentResult> {
        self.post_json("/reflect", &ReflectRequest { message }).await
    }

    async fn simulate(
        &self,
        profile: &AthleteProfile,
        chat_history: &[ChatTurn],
    ) -> Result<String> {
        let response: SimulateResponse = self
            .post_json("/simulate", &SimulateRequest { profile, chat_history })
            .await?;
        Ok(response.athlete_response)
    }

    async fn evaluate(
        &self,
        profile: &AthleteProfile,
        chat_history: &[ChatTurn],
    ) -> Result<String> {
        let response: EvaluateResponse = self
            .post_json("/evaluate", &SimulateRequest { profile, chat_history })
            .await?;
        Ok(response.evaluation)
    }

    async fn team_message(&self, avg_score: f64, summary: &str) -> Result<String> {
        let response: TeamMessageResponse = self
            .post_json("/team_message", &TeamMessageRequest { avg_score, summary })
            .await?;
        Ok(response.message)
    }
}

/// Pull the numeric score out of a free-text evaluation. The model is asked
/// to lead with a "Score: <n>" line; no match means no score, which callers
/// treat as an expected edge rather than an error.
pub fn parse_score(evaluation: &str) -> Option<f64> {
    static SCORE_RE: OnceLock<Regex> = OnceLock::new();
    let re = SCORE_RE
        .get_or_init(|| Regex::new(r"(?i)Score:\s*([\d.]+)").expect("score pattern is valid"));
    re.captures(evaluation)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
}

#[cfg(test)]
pub mod testing {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;

    /// Scripted stand-in for the remote inference service.
    #[derive(Default)]
    pub struct ScriptedInference {
        pub replies: Mutex<VecDeque<String>>,
        pub evaluations: Mutex<VecDeque<String>>,
        pub sentiment: Mutex<Option<(String, f64)>>,
        pub fail: bool,
    }

    impl ScriptedInference {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn failing() -> Self {
            ScriptedInference {
                fail: true,
                ..Self::default()
            }
        }

        pub fn push_reply(&self, reply: &str) {
            self.replies
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push_back(reply.to_string());
        }

        pub fn push_evaluation(&self, evaluation: &str) {
            self.evaluations
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push_back(evaluation.to_string());
        }

        pub fn set_sentiment(&self, sentiment: &str, score: f64) {
            *self.sentiment.lock().unwrap_or_else(|e| e.into_inner()) =
                Some((sentiment.to_string(), score));
        }
    }

    #[async_trait]
    impl InferenceApi for ScriptedInference {
        async fn reflect(&self, _message: &str) -> Result<SentimentResult> {
            if self.fail {
                return Err(Error::Inference("scripted failure".to_string()));
            }
            let (sentiment, score) = self
                .sentiment
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone()
                .unwrap_or_else(|| ("Neutral".to_string(), 5.0));
            Ok(SentimentResult { sentiment, score })
        }

        async fn simulate(
            &self,
            _profile: &AthleteProfile,
            _chat_history: &[ChatTurn],
        ) -> Result<String> {
            if self.fail {
                return Err(Error::Inference("scripted failure".to_string()));
            }
            Ok(self
                .replies
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .pop_front()
                .unwrap_or_else(|| "Okay, I guess.".to_string()))
        }

        async fn evaluate(
            &self,
            _profile: &AthleteProfile,
            _chat_history: &[ChatTurn],
        ) -> Result<String> {
            if self.fail {
                return Err(Error::Inference("scripted failure".to_string()));
            }
            Ok(self
                .evaluations
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .pop_front()
                .unwrap_or_else(|| "Score: 7.5\nFeedback: good pacing".to_string()))
        }

        async fn team_message(&self, avg_score: f64, _summary: &str) -> Result<String> {
            if self.fail {
                return Err(Error::Inference("scripted failure".to_string()));
            }
            Ok(format!("Keep showing up for each other (avg {avg_score:.1})."))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_leading_score_line() {
        assert_eq!(parse_score("Score: 7.5\nFeedback: good pacing"), Some(7.5));
        assert_eq!(parse_score("score: 8"), Some(8.0));
        assert_eq!(parse_score("Some preamble.\nScore:  9.25\nMore."), Some(9.25));
    }

    #[test]
    fn no_match_yields_none() {
        assert_eq!(parse_score("Great empathy, nothing numeric here."), None);
        assert_eq!(parse_score(""), None);
        assert_eq!(parse_score("Score: not-a-number"), None);
    }

    #[test]
    fn team_message_request_uses_wire_field_names() {
        let body = serde_json::to_value(TeamMessageRequest {
            avg_score: 6.4,
            summary: "Team is mostly stable.",
        })
        .unwrap();
        assert_eq!(body["avgScore"], 6.4);
        assert_eq!(body["summary"], "Team is mostly stable.");
    }
}
