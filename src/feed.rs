use chrono::Utc;

use crate::error::{Error, Result};
use crate::models::{Comment, FeedPost, SimulationDoc};
use crate::session::Identity;
use crate::store::{collections, Filter, Store};

const MAX_UPDATE_ATTEMPTS: usize = 5;

/// Post an evaluated simulation to the global coach feed.
pub async fn share_simulation(
    store: &dyn Store,
    coach: &Identity,
    simulation: SimulationDoc,
) -> Result<String> {
    if simulation.evaluation.is_none() {
        return Err(Error::validation(
            "only evaluated simulations can be shared to the feed",
        ));
    }
    let post = FeedPost {
        coach_uid: coach.uid.clone(),
        coach_name: coach.profile.name.clone(),
        simulation,
        comments: Vec::new(),
        timestamp: Utc::now(),
    };
    let id = store
        .insert(collections::COACH_FEED, serde_json::to_value(&post)?)
        .await?;
    tracing::info!(post = %id, "simulation shared to coach feed");
    Ok(id)
}

/// All feed posts, newest first. Posts that fail to parse are skipped with
/// a warning rather than sinking the whole feed.
pub async fn list_feed(store: &dyn Store) -> Result<Vec<(String, FeedPost)>> {
    let docs = store.list(collections::COACH_FEED, &Filter::none()).await?;

    let mut posts: Vec<(String, FeedPost)> = Vec::with_capacity(docs.len());
    for doc in docs {
        match doc.parse::<FeedPost>() {
            Ok(post) => posts.push((doc.id, post)),
            Err(err) => tracing::warn!(post = %doc.id, error = %err, "skipping malformed feed post"),
        }
    }
    posts.sort_by(|a, b| b.1.timestamp.cmp(&a.1.timestamp));
    Ok(posts)
}

/// Append one comment to a post. Read, append, write-if-unchanged, retry on
/// conflict: concurrent commenters each land their comment instead of
/// overwriting each other's list.
pub async fn add_comment(
    store: &dyn Store,
    commenter: &str,
    post_id: &str,
    text: &str,
) -> Result<FeedPost> {
    if text.trim().is_empty() {
        return Err(Error::validation("comment is empty"));
    }

    for _ in 0..MAX_UPDATE_ATTEMPTS {
        let doc = store
            .get(collections::COACH_FEED, post_id)
            .await?
            .ok_or_else(|| Error::NotFound {
                collection: collections::COACH_FEED.to_string(),
                id: post_id.to_string(),
            })?;

        let mut post: FeedPost = doc.parse()?;
        post.comments.push(Comment {
            name: commenter.to_string(),
            comment: text.to_string(),
            timestamp: Utc::now(),
        });

        if store
            .update_if(
                collections::COACH_FEED,
                post_id,
                doc.version,
                serde_json::to_value(&post)?,
            )
            .await?
        {
            return Ok(post);
        }
        tracing::debug!(post = %post_id, "comment write conflicted; retrying");
    }
    Err(Error::Conflict(MAX_UPDATE_ATTEMPTS))
}
