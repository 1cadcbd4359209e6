use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Coach,
    Athlete,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Coach => write!(f, "coach"),
            Role::Athlete => write!(f, "athlete"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub name: String,
    pub email: String,
    pub role: Role,
    #[serde(rename = "teamId")]
    pub team_id: String,
}

/// Stored shape of one reflection document, field names matching the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReflectionDoc {
    pub athlete: String,
    pub name: Option<String>,
    pub message: String,
    pub sentiment: String,
    pub score: f64,
    #[serde(rename = "teamId")]
    pub team_id: String,
    pub anonymous: bool,
    #[serde(rename = "userId")]
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
}

/// One reflection after normalization: every field defaulted, alias applied.
#[derive(Debug, Clone)]
pub struct ReflectionEntry {
    pub author_id: String,
    pub display_name: String,
    pub sentiment: String,
    pub score: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct AuthorSummary {
    pub author_id: String,
    pub display_name: String,
    pub average_score: f64,
    pub sentiment: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutlookBucket {
    Thriving,
    Stable,
    NeedsSupport,
}

#[derive(Debug, Clone)]
pub struct TeamOutlook {
    pub thriving: usize,
    pub stable: usize,
    pub needs_support: usize,
    pub average_score: f64,
    pub summary: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    Coach,
    Athlete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub sender: Sender,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AthleteProfile {
    pub age: u32,
    pub sport: String,
    pub anxiety_level: String,
    pub motivation_level: String,
    pub context: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationDoc {
    pub profile: AthleteProfile,
    pub chat_history: Vec<ChatTurn>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evaluation: Option<String>,
    #[serde(rename = "teamId")]
    pub team_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub name: String,
    pub comment: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedPost {
    #[serde(rename = "coachUid")]
    pub coach_uid: String,
    #[serde(rename = "coachName")]
    pub coach_name: String,
    pub simulation: SimulationDoc,
    #[serde(default)]
    pub comments: Vec<Comment>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoachStats {
    pub name: String,
    #[serde(rename = "totalScore")]
    pub total_score: f64,
    #[serde(rename = "totalSessions")]
    pub total_sessions: u64,
    #[serde(rename = "averageScore")]
    pub average_score: f64,
}
