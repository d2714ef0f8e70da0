//! aifctl - CLI client for aifd
//!
//! The stdio bridge between the assistant and the daemon's tool surface.
//! Exit codes: 0 success, 1 user-correctable, 2 precondition failed,
//! 64 internal error.

mod client;
mod render;

use std::path::PathBuf;

use aif_core::types::{Corpus, Decision};
use clap::{Parser, Subcommand};
use client::{Client, ClientError};
use serde_json::{json, Value};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// CLI client for the aifd assistance daemon.
#[derive(Parser)]
#[command(name = "aifctl")]
#[command(about = "Control plane for the aifd assistance daemon")]
#[command(version)]
struct Cli {
    /// Daemon address (default: http://127.0.0.1:7401)
    #[arg(long, global = true, env = "AIFD_ADDR")]
    addr: Option<String>,

    /// Emit raw JSON instead of rendered text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Daemon health check
    Health,

    /// Save a memory event
    Remember {
        /// Event text
        text: String,
        /// Event kind (decision, discovery, lesson, ...)
        #[arg(long, default_value = "event")]
        kind: String,
        /// Tags (repeatable)
        #[arg(long)]
        tag: Vec<String>,
        /// Importance in [0, 1]
        #[arg(long)]
        importance: Option<f64>,
        /// Session id
        #[arg(long)]
        session: Option<String>,
    },

    /// Search memory events
    Recall {
        query: String,
        #[arg(long, default_value_t = 10)]
        limit: u32,
    },

    /// Unified retrieval across code and governance
    Search {
        query: String,
        /// Corpus: code, governance, or hybrid (default: classified)
        #[arg(long)]
        corpus: Option<String>,
        #[arg(long, default_value_t = 10)]
        top_k: u32,
    },

    /// Retrieval backend status
    Status,

    /// Rebuild the retrieval indexes
    Reindex {
        /// Force a from-scratch code index
        #[arg(long)]
        full: bool,
    },

    /// Learning pipeline commands
    #[command(subcommand)]
    Learn(LearnCommand),

    /// Spec orchestration commands
    #[command(subcommand)]
    Spec(SpecCommand),
}

#[derive(Subcommand)]
enum LearnCommand {
    /// Analyze commits since the last run
    Analyze {
        /// Analyze since this commit instead
        #[arg(long)]
        since: Option<String>,
    },
    /// List pending proposals
    Proposals {
        #[arg(long, default_value_t = 10)]
        max_count: u32,
        #[arg(long)]
        min_confidence: Option<f64>,
    },
    /// Decide a proposal
    Decide {
        proposal_id: String,
        /// accept, reject, ignore, or snooze
        decision: String,
        /// Substitute edited artifact content from a file
        #[arg(long)]
        edited_file: Option<PathBuf>,
    },
    /// Learning pipeline stats
    Stats,
    /// Effective learning configuration
    Config,
    /// Failure analytics: summary, trend, hotspots, effectiveness
    Analytics {
        #[arg(default_value = "summary")]
        report: String,
        #[arg(long, default_value_t = 7)]
        days: u32,
    },
}

#[derive(Subcommand)]
enum SpecCommand {
    /// List all specs
    List,
    /// Show one spec
    Show { slug: String },
    /// Start a spec in planning
    Start {
        slug: String,
        /// Plan file; its contents key the worktree fingerprint
        #[arg(long)]
        plan: Option<PathBuf>,
    },
    /// Approve the plan and create the worktree
    ApprovePlan {
        slug: String,
        #[arg(long)]
        tasks: u32,
    },
    /// Mark a task started
    StartTask { slug: String, task: u32 },
    /// Mark a task complete
    CompleteTask { slug: String, task: u32 },
    /// Enter the verify phase
    Verify { slug: String },
    /// Submit a reviewer verdict (reads reviewer output from a file)
    Verdict {
        slug: String,
        reviewer: String,
        output_file: PathBuf,
    },
    /// Resolve the verify phase once all verdicts are in
    Resolve { slug: String },
    /// Enter the learn phase (sync the worktree)
    Learn { slug: String },
    /// Complete the spec (cleanup the worktree)
    Complete { slug: String },
    /// Abort the spec
    Abort {
        slug: String,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Show the spec worktree status
    Worktree { slug: String },
    /// Show the spec diff against the base branch
    Diff { slug: String },
    /// Whether any spec is actively busy (session-exit stop guard)
    Busy,
}

fn default_addr() -> String {
    "http://127.0.0.1:7401".to_string()
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let client = Client::new(cli.addr.clone().unwrap_or_else(default_addr));

    match run(&cli, &client).await {
        Ok(()) => {}
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(e.exit_code());
        }
    }
}

fn emit(cli: &Cli, body: &Value, rendered: String) {
    if cli.json {
        println!("{}", serde_json::to_string_pretty(body).unwrap_or_default());
    } else {
        print!("{rendered}");
    }
}

async fn run(cli: &Cli, client: &Client) -> Result<(), ClientError> {
    match &cli.command {
        Command::Health => {
            let body = client.get("/health").await?;
            emit(cli, &body, "ok\n".to_string());
        }

        Command::Remember {
            text,
            kind,
            tag,
            importance,
            session,
        } => {
            let body = client
                .post(
                    "/memory/events",
                    json!({
                        "kind": kind,
                        "text": text,
                        "tags": tag,
                        "importance": importance,
                        "session_id": session,
                    }),
                )
                .await?;
            let id = body.get("id").and_then(Value::as_str).unwrap_or("-");
            emit(cli, &body, format!("saved {id}\n"));
        }

        Command::Recall { query, limit } => {
            let path = format!(
                "/memory/search?query={}&limit={limit}",
                urlencoding::encode(query)
            );
            let body = client.get(&path).await?;
            let mut rendered = String::new();
            if let Some(results) = body.get("results").and_then(Value::as_array) {
                for result in results {
                    let score = result.get("score").and_then(Value::as_f64).unwrap_or(0.0);
                    let text = result
                        .pointer("/event/text")
                        .and_then(Value::as_str)
                        .unwrap_or("");
                    rendered.push_str(&format!("{score:.3}  {text}\n"));
                }
            }
            if rendered.is_empty() {
                rendered.push_str("no results\n");
            }
            emit(cli, &body, rendered);
        }

        Command::Search { query, corpus, top_k } => {
            let mut path = format!(
                "/retrieval/search?query={}&top_k={top_k}",
                urlencoding::encode(query)
            );
            if let Some(corpus) = corpus {
                let corpus = Corpus::parse(corpus).ok_or_else(|| ClientError::Api {
                    status: 400,
                    message: format!(
                        "unknown corpus: {corpus} (expected code|governance|hybrid)"
                    ),
                })?;
                path.push_str(&format!("&corpus={}", corpus.as_str()));
            }
            let body = client.get(&path).await?;
            let hits = body
                .get("hits")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            emit(cli, &body, render::render_hits(&hits));
        }

        Command::Status => {
            let body = client.get("/retrieval/status").await?;
            let rendered = format!(
                "code:       available={} stale={}\ngovernance: available={} chunks={}\n",
                body.pointer("/code/available").and_then(Value::as_bool).unwrap_or(false),
                body.pointer("/code/stale").and_then(Value::as_bool).unwrap_or(false),
                body.pointer("/governance/available").and_then(Value::as_bool).unwrap_or(false),
                body.pointer("/governance/chunks").and_then(Value::as_u64).unwrap_or(0),
            );
            emit(cli, &body, rendered);
        }

        Command::Reindex { full } => {
            let body = client
                .post("/retrieval/reindex", json!({ "full": full }))
                .await?;
            let indexed = body
                .pointer("/governance/files_indexed")
                .and_then(Value::as_u64)
                .unwrap_or(0);
            emit(cli, &body, format!("reindexed {indexed} governance file(s)\n"));
        }

        Command::Learn(learn) => run_learn(cli, client, learn).await?,
        Command::Spec(spec) => run_spec(cli, client, spec).await?,
    }
    Ok(())
}

async fn run_learn(cli: &Cli, client: &Client, command: &LearnCommand) -> Result<(), ClientError> {
    match command {
        LearnCommand::Analyze { since } => {
            let body = client
                .post("/learning/analyze", json!({ "since_commit": since }))
                .await?;
            let rendered = format!(
                "commits={} files={} detections={} proposals={}\n",
                body.get("commits_analyzed").and_then(Value::as_u64).unwrap_or(0),
                body.get("files_analyzed").and_then(Value::as_u64).unwrap_or(0),
                body.get("detections").and_then(Value::as_u64).unwrap_or(0),
                body.get("proposals_created").and_then(Value::as_u64).unwrap_or(0),
            );
            emit(cli, &body, rendered);
        }

        LearnCommand::Proposals {
            max_count,
            min_confidence,
        } => {
            let mut path = format!("/learning/proposals?max_count={max_count}");
            if let Some(min_confidence) = min_confidence {
                path.push_str(&format!("&min_confidence={min_confidence}"));
            }
            let body = client.get(&path).await?;
            let proposals = body
                .get("proposals")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            emit(cli, &body, render::render_proposals(&proposals));
        }

        LearnCommand::Decide {
            proposal_id,
            decision,
            edited_file,
        } => {
            let decision = Decision::parse(decision).ok_or_else(|| ClientError::Api {
                status: 400,
                message: format!(
                    "unknown decision: {decision} (expected accept|reject|ignore|snooze)"
                ),
            })?;
            let edited_content = match edited_file {
                Some(path) => Some(std::fs::read_to_string(path).map_err(|e| {
                    ClientError::Malformed(format!("cannot read {}: {e}", path.display()))
                })?),
                None => None,
            };
            let body = client
                .post(
                    &format!("/learning/proposals/{proposal_id}/decide"),
                    json!({ "decision": decision.as_str(), "edited_content": edited_content }),
                )
                .await?;
            let status = body
                .pointer("/proposal/status")
                .and_then(Value::as_str)
                .unwrap_or("-");
            let mut rendered = format!("{proposal_id}: {status}\n");
            if let Some(artifact) = body.get("artifact_path").and_then(Value::as_str) {
                rendered.push_str(&format!("artifact: {artifact}\n"));
            }
            if body.get("already_decided") == Some(&Value::Bool(true)) {
                rendered.push_str("(already decided; no changes made)\n");
            }
            emit(cli, &body, rendered);
        }

        LearnCommand::Stats => {
            let body = client.get("/learning/stats").await?;
            emit(cli, &body, format!("{body:#}\n"));
        }

        LearnCommand::Config => {
            let body = client.get("/learning/config").await?;
            emit(cli, &body, format!("{body:#}\n"));
        }

        LearnCommand::Analytics { report, days } => {
            let path = match report.as_str() {
                "summary" => format!("/learning/analytics/failures?days={days}"),
                "trend" => format!("/learning/analytics/trend?days={days}"),
                "hotspots" => format!("/learning/analytics/hotspots?days={days}"),
                "effectiveness" => "/learning/analytics/effectiveness".to_string(),
                other => {
                    return Err(ClientError::Malformed(format!(
                        "unknown report: {other} (expected summary|trend|hotspots|effectiveness)"
                    )))
                }
            };
            let body = client.get(&path).await?;
            emit(cli, &body, format!("{body:#}\n"));
        }
    }
    Ok(())
}

async fn run_spec(cli: &Cli, client: &Client, command: &SpecCommand) -> Result<(), ClientError> {
    match command {
        SpecCommand::List => {
            let body = client.get("/orchestration/specs").await?;
            let mut rendered = String::new();
            if let Some(specs) = body.get("specs").and_then(Value::as_array) {
                for spec in specs {
                    rendered.push_str(&format!(
                        "{:<24} {}\n",
                        spec.get("slug").and_then(Value::as_str).unwrap_or("-"),
                        spec.get("phase").and_then(Value::as_str).unwrap_or("-"),
                    ));
                }
            }
            if rendered.is_empty() {
                rendered.push_str("no specs\n");
            }
            emit(cli, &body, rendered);
        }

        SpecCommand::Show { slug } => {
            let body = client.get(&format!("/orchestration/specs/{slug}")).await?;
            let rendered = body
                .get("spec")
                .map(render::render_spec)
                .unwrap_or_default();
            emit(cli, &body, rendered);
        }

        SpecCommand::Start { slug, plan } => {
            let body = client
                .post(
                    "/orchestration/start",
                    json!({ "slug": slug, "plan_path": plan }),
                )
                .await?;
            emit(cli, &body, format!("{slug}: planning\n"));
        }

        SpecCommand::ApprovePlan { slug, tasks } => {
            let body = client
                .post(
                    &format!("/orchestration/specs/{slug}/approve-plan"),
                    json!({ "total_tasks": tasks }),
                )
                .await?;
            emit(cli, &body, format!("{slug}: implementing ({tasks} tasks)\n"));
        }

        SpecCommand::StartTask { slug, task } => {
            let body = client
                .post(
                    &format!("/orchestration/specs/{slug}/tasks/{task}/start"),
                    json!({}),
                )
                .await?;
            emit(cli, &body, format!("{slug}: task {task} started\n"));
        }

        SpecCommand::CompleteTask { slug, task } => {
            let body = client
                .post(
                    &format!("/orchestration/specs/{slug}/tasks/{task}/complete"),
                    json!({}),
                )
                .await?;
            let completed = body
                .pointer("/spec/completed_tasks")
                .and_then(Value::as_u64)
                .unwrap_or(0);
            let total = body
                .pointer("/spec/total_tasks")
                .and_then(Value::as_u64)
                .unwrap_or(0);
            emit(cli, &body, format!("{slug}: {completed}/{total} tasks complete\n"));
        }

        SpecCommand::Verify { slug } => {
            let body = client
                .post(&format!("/orchestration/specs/{slug}/start-verify"), json!({}))
                .await?;
            emit(cli, &body, format!("{slug}: verifying\n"));
        }

        SpecCommand::Verdict {
            slug,
            reviewer,
            output_file,
        } => {
            let output = std::fs::read_to_string(output_file).map_err(|e| {
                ClientError::Malformed(format!("cannot read {}: {e}", output_file.display()))
            })?;
            let body = client
                .post(
                    &format!("/orchestration/specs/{slug}/verdicts"),
                    json!({ "reviewer_id": reviewer, "output": output }),
                )
                .await?;
            let verdict = body
                .pointer("/verdict/verdict")
                .and_then(Value::as_str)
                .unwrap_or("-");
            emit(cli, &body, format!("{reviewer}: {verdict}\n"));
        }

        SpecCommand::Resolve { slug } => {
            let body = client
                .post(&format!("/orchestration/specs/{slug}/resolve-verify"), json!({}))
                .await?;
            let outcome = body.get("outcome").and_then(Value::as_str).unwrap_or("-");
            let phase = body
                .pointer("/spec/phase")
                .and_then(Value::as_str)
                .unwrap_or("-");
            emit(cli, &body, format!("{slug}: {outcome} -> {phase}\n"));
        }

        SpecCommand::Learn { slug } => {
            let body = client
                .post(&format!("/orchestration/specs/{slug}/start-learn"), json!({}))
                .await?;
            emit(cli, &body, format!("{slug}: learning\n"));
        }

        SpecCommand::Complete { slug } => {
            let body = client
                .post(&format!("/orchestration/specs/{slug}/complete"), json!({}))
                .await?;
            emit(cli, &body, format!("{slug}: done\n"));
        }

        SpecCommand::Abort { slug, reason } => {
            let body = client
                .post(
                    &format!("/orchestration/specs/{slug}/abort"),
                    json!({ "reason": reason }),
                )
                .await?;
            emit(cli, &body, format!("{slug}: aborted\n"));
        }

        SpecCommand::Worktree { slug } => {
            let body = client
                .get(&format!("/orchestration/specs/{slug}/worktree"))
                .await?;
            let rendered = format!(
                "path:    {}\nbranch:  {}\npresent: {} dirty: {} ahead: {} behind: {}\n",
                body.pointer("/worktree/path").and_then(Value::as_str).unwrap_or("-"),
                body.pointer("/worktree/branch").and_then(Value::as_str).unwrap_or("-"),
                body.pointer("/worktree/present").and_then(Value::as_bool).unwrap_or(false),
                body.pointer("/worktree/dirty").and_then(Value::as_bool).unwrap_or(false),
                body.pointer("/worktree/ahead").and_then(Value::as_u64).unwrap_or(0),
                body.pointer("/worktree/behind").and_then(Value::as_u64).unwrap_or(0),
            );
            emit(cli, &body, rendered);
        }

        SpecCommand::Diff { slug } => {
            let body = client.get(&format!("/orchestration/specs/{slug}/diff")).await?;
            let diff = body.get("diff").and_then(Value::as_str).unwrap_or("");
            emit(cli, &body, format!("{diff}\n"));
        }

        SpecCommand::Busy => {
            let body = client.get("/orchestration/busy").await?;
            let busy = body.get("busy").and_then(Value::as_bool).unwrap_or(false);
            emit(cli, &body, format!("{busy}\n"));
        }
    }
    Ok(())
}
