use std::path::PathBuf;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tokio::io::AsyncBufReadExt;
use tokio_stream::StreamExt;
use tracing_subscriber::EnvFilter;

mod aggregate;
mod db;
mod error;
mod feed;
mod inference;
mod models;
mod reflect;
mod report;
mod session;
mod simulate;
mod store;

use inference::{HttpInference, InferenceApi};
use models::AthleteProfile;
use session::Session;
use store::{collections, Filter, Store};

#[derive(Parser)]
#[command(name = "team-reflect")]
#[command(about = "Team reflection and coach simulation client", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed data
    Seed,
    /// Import reflections from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Create a coach or athlete account
    Signup {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        /// Create a coach account with a fresh team code
        #[arg(long)]
        coach: bool,
        /// Team code to join (athletes only)
        #[arg(long)]
        team_code: Option<String>,
    },
    /// Submit a reflection (athletes only)
    Reflect {
        #[arg(long)]
        user: String,
        #[arg(long)]
        message: String,
        /// Submit privately; the coach dashboard shows an alias instead
        #[arg(long)]
        anonymous: bool,
    },
    /// Show the team outlook dashboard (coaches only)
    Outlook {
        #[arg(long)]
        user: String,
        /// Keep watching and re-render on every change
        #[arg(long)]
        watch: bool,
    },
    /// Generate a suggested team message from the current outlook
    TeamMessage {
        #[arg(long)]
        user: String,
    },
    /// Run an interactive simulated athlete conversation (coaches only)
    Simulate {
        #[arg(long)]
        user: String,
        #[arg(long, default_value_t = 16)]
        age: u32,
        #[arg(long, default_value = "Soccer")]
        sport: String,
        #[arg(long, default_value = "High")]
        anxiety: String,
        #[arg(long, default_value = "Low")]
        motivation: String,
        #[arg(long, default_value = "Before Game")]
        context: String,
    },
    /// Share an evaluated simulation to the coach feed
    Share {
        #[arg(long)]
        user: String,
        #[arg(long)]
        simulation: String,
    },
    /// Browse the coach feed
    Feed {
        #[arg(long)]
        user: String,
    },
    /// Comment on a coach feed post
    Comment {
        #[arg(long)]
        user: String,
        #[arg(long)]
        post: String,
        #[arg(long)]
        text: String,
    },
    /// Show the coach leaderboard
    Leaderboard {
        #[arg(long)]
        user: String,
    },
    /// Generate a markdown report for the team
    Report {
        #[arg(long)]
        user: String,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
}

fn inference_client() -> anyhow::Result<HttpInference> {
    let base_url = std::env::var("INFERENCE_URL")
        .context("INFERENCE_URL must point at the inference service")?;
    Ok(HttpInference::new(base_url))
}

async fn resolve(store: &dyn Store, email: &str) -> anyhow::Result<Session> {
    Ok(Session::resolve(store, email).await?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let database_url =
        std::env::var("DATABASE_URL").context("DATABASE_URL must be set to a Postgres instance")?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;
    let store = db::PgStore::new(pool.clone());

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::Import { csv } => {
            let inserted = db::import_csv(&pool, &csv).await?;
            println!("Inserted {inserted} reflections from {}.", csv.display());
        }
        Commands::Signup {
            name,
            email,
            coach,
            team_code,
        } => {
            if coach {
                let code = session::signup_coach(&store, &name, &email).await?;
                println!("Coach account created. Your team code: {code}");
            } else {
                let code = team_code.unwrap_or_default();
                session::signup_athlete(&store, &name, &email, &code).await?;
                println!("Athlete account created. Welcome to team {}.", code.trim());
            }
        }
        Commands::Reflect {
            user,
            message,
            anonymous,
        } => {
            let inference = inference_client()?;
            let session = resolve(&store, &user).await?;
            let doc =
                reflect::submit_reflection(&store, &inference, &session, &message, anonymous)
                    .await?;
            println!(
                "Thanks for your response! Scored {} ({:.1}).",
                doc.sentiment, doc.score
            );
        }
        Commands::Outlook { user, watch } => {
            let session = resolve(&store, &user).await?;
            let identity = session.require_coach()?;
            let team_filter = Filter::field("teamId", identity.profile.team_id.as_str());

            if watch {
                let mut snapshots = store
                    .subscribe(collections::REFLECTIONS, team_filter)
                    .await?;
                println!("Watching team {} (ctrl-c to stop).", identity.profile.team_id);
                while let Some(snapshot) = snapshots.next().await {
                    let (summaries, outlook) = aggregate::run(&snapshot);
                    println!("{}", report::render_dashboard(&outlook, &summaries));
                }
            } else {
                let snapshot = store.list(collections::REFLECTIONS, &team_filter).await?;
                let (summaries, outlook) = aggregate::run(&snapshot);
                print!("{}", report::render_dashboard(&outlook, &summaries));

                let simulations = store
                    .list(
                        collections::SIMULATIONS,
                        &Filter::field("teamId", identity.profile.team_id.as_str()),
                    )
                    .await?;
                if !simulations.is_empty() {
                    println!("\nSimulation History");
                    let mut docs = simulations;
                    docs.sort_by(|a, b| b.data["timestamp"].to_string().cmp(&a.data["timestamp"].to_string()));
                    for doc in docs {
                        let sport = doc.data["profile"]["sport"].as_str().unwrap_or("?");
                        let age = doc.data["profile"]["age"].as_u64().unwrap_or(0);
                        let evaluated = !doc.data["evaluation"].is_null();
                        println!(
                            "- {} | {sport}, age {age}{}",
                            doc.id,
                            if evaluated { " (evaluated)" } else { "" }
                        );
                    }
                }
            }
        }
        Commands::TeamMessage { user } => {
            let inference = inference_client()?;
            let session = resolve(&store, &user).await?;
            let identity = session.require_coach()?;

            let snapshot = store
                .list(
                    collections::REFLECTIONS,
                    &Filter::field("teamId", identity.profile.team_id.as_str()),
                )
                .await?;
            let (_, outlook) = aggregate::run(&snapshot);
            let message = inference
                .team_message(outlook.average_score, outlook.summary)
                .await?;
            println!("Suggested message: {message}");
        }
        Commands::Simulate {
            user,
            age,
            sport,
            anxiety,
            motivation,
            context,
        } => {
            let inference = inference_client()?;
            let session = resolve(&store, &user).await?;
            let identity = session.require_coach()?.clone();

            let profile = AthleteProfile {
                age,
                sport,
                anxiety_level: anxiety,
                motivation_level: motivation,
                context,
            };
            let mut sim =
                simulate::SimulationController::new(&store, &inference, &identity, profile);

            println!("Coach: {}", simulate::OPENER);
            let reply = sim.start().await?;
            println!("Athlete: {reply}");
            println!("(type a message, /end to evaluate, /quit to leave)");

            let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
            while let Some(line) = lines.next_line().await? {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if line == "/quit" {
                    break;
                }
                if line == "/end" {
                    match sim.finish().await {
                        Ok(outcome) => {
                            println!("\n{}", outcome.evaluation);
                            match (outcome.score, outcome.stats) {
                                (Some(score), Some(stats)) => println!(
                                    "Recorded {score:.1}; your average is now {:.2} over {} sessions.",
                                    stats.average_score, stats.total_sessions
                                ),
                                _ => println!("No score line found; leaderboard unchanged."),
                            }
                        }
                        Err(err) => println!("Evaluation failed: {err}"),
                    }
                    break;
                }
                match sim.send(line).await {
                    Ok(reply) => println!("Athlete: {reply}"),
                    Err(err) => println!("Error: {err}"),
                }
            }
        }
        Commands::Share { user, simulation } => {
            let session = resolve(&store, &user).await?;
            let identity = session.require_coach()?;

            let doc = store
                .get(collections::SIMULATIONS, &simulation)
                .await?
                .ok_or_else(|| error::Error::NotFound {
                    collection: collections::SIMULATIONS.to_string(),
                    id: simulation.clone(),
                })?;
            let post_id = feed::share_simulation(&store, identity, doc.parse()?).await?;
            println!("Shared! Simulation posted to the coach feed as {post_id}.");
        }
        Commands::Feed { user } => {
            let session = resolve(&store, &user).await?;
            session.require_coach()?;

            let posts = feed::list_feed(&store).await?;
            if posts.is_empty() {
                println!("The coach feed is empty.");
            }
            for (id, post) in posts {
                println!("[{}] {}", id, post.coach_name);
                println!(
                    "  {} | Context: {}",
                    post.simulation.profile.sport, post.simulation.profile.context
                );
                if let Some(last) = post.simulation.chat_history.last() {
                    println!("  Last message: \"{}\"", last.message);
                }
                if let Some(evaluation) = &post.simulation.evaluation {
                    if let Some(score) = inference::parse_score(evaluation) {
                        println!("  Score: {score:.1}");
                    }
                }
                for comment in &post.comments {
                    println!("  {}: {}", comment.name, comment.comment);
                }
            }
        }
        Commands::Comment { user, post, text } => {
            let session = resolve(&store, &user).await?;
            let identity = session.require_coach()?;

            let updated =
                feed::add_comment(&store, &identity.profile.email, &post, &text).await?;
            println!("Comment posted ({} total).", updated.comments.len());
        }
        Commands::Leaderboard { user } => {
            let session = resolve(&store, &user).await?;
            session.require_coach()?;

            let rankings = report::leaderboard(&store).await?;
            if rankings.is_empty() {
                println!("No evaluated simulations yet.");
            }
            for (rank, stats) in rankings.iter().enumerate() {
                println!(
                    "#{} {} | Avg Score: {:.2} | Sessions: {}",
                    rank + 1,
                    stats.name,
                    stats.average_score,
                    stats.total_sessions
                );
            }
        }
        Commands::Report { user, out } => {
            let session = resolve(&store, &user).await?;
            let identity = session.require_coach()?;

            let snapshot = store
                .list(
                    collections::REFLECTIONS,
                    &Filter::field("teamId", identity.profile.team_id.as_str()),
                )
                .await?;
            let entries = aggregate::normalize(&snapshot);
            let summaries = aggregate::summarize_authors(&entries);
            let outlook = aggregate::team_outlook(&summaries);
            let rankings = report::leaderboard(&store).await?;

            let rendered = report::build_report(
                &identity.profile.team_id,
                Utc::now(),
                &outlook,
                &summaries,
                &rankings,
                &entries,
            );
            std::fs::write(&out, rendered)?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}
