//! Conversation commands: turn, history, summarize, search-turns.

use anyhow::Result;
use clap::Args;
use console::{Style, style};

use mnemo_memory::{ConversationTurn, DEFAULT_SESSION, HistoryQuery, NewTurn, TurnSearch};

use super::{Context, labels, parse_timestamp, print_header, print_json, print_warnings, truncate};

/// Arguments for `mnemo turn`.
#[derive(Args, Debug)]
pub struct TurnArgs {
    /// What the user said
    pub user: String,

    /// What the assistant answered
    pub assistant: String,

    /// Session id
    #[arg(short, long)]
    pub session: Option<String>,

    /// Importance from 1 to 10 (default 5)
    #[arg(short, long)]
    pub importance: Option<i64>,

    /// Topic label (repeatable)
    #[arg(short, long = "topic")]
    pub topics: Vec<String>,

    /// Sentiment label
    #[arg(long)]
    pub sentiment: Option<String>,
}

/// Arguments for `mnemo history`.
#[derive(Args, Debug)]
pub struct HistoryArgs {
    /// Session id (default: all sessions)
    #[arg(short, long)]
    pub session: Option<String>,

    /// Only turns with one of these topics (repeatable)
    #[arg(short, long = "topic")]
    pub topics: Vec<String>,

    /// Only turns at or after this RFC 3339 timestamp
    #[arg(long)]
    pub since: Option<String>,

    /// Maximum turns
    #[arg(short, long)]
    pub limit: Option<usize>,
}

/// Arguments for `mnemo summarize`.
#[derive(Args, Debug)]
pub struct SummarizeArgs {
    /// Session id
    #[arg(default_value = DEFAULT_SESSION)]
    pub session: String,

    /// Persist the summary
    #[arg(long)]
    pub save: bool,
}

/// Arguments for `mnemo search-turns`.
#[derive(Args, Debug)]
pub struct SearchTurnsArgs {
    /// Search query
    pub query: String,

    /// Restrict to one session
    #[arg(short, long)]
    pub session: Option<String>,

    /// Minimum importance
    #[arg(long)]
    pub min_importance: Option<i64>,

    /// Maximum results
    #[arg(short, long)]
    pub limit: Option<usize>,
}

pub async fn turn(args: TurnArgs, ctx: &Context) -> Result<()> {
    let engine = ctx.open_engine()?;

    let mut input = NewTurn::new(args.user, args.assistant).with_topics(args.topics);
    if let Some(session) = args.session {
        input = input.in_session(session);
    }
    if let Some(importance) = args.importance {
        input = input.with_importance(importance);
    }
    if let Some(sentiment) = args.sentiment {
        input = input.with_sentiment(sentiment);
    }

    let stored = engine.store_conversation_turn(input).await?;
    print_warnings(&stored.warnings);
    engine.shutdown()?;

    if ctx.json_output {
        return print_json(&stored.value);
    }
    println!(
        "{} {} in session {}",
        Style::new().green().apply_to("Stored"),
        style(stored.value.id).cyan(),
        stored.value.session_id
    );
    Ok(())
}

pub async fn history(args: HistoryArgs, ctx: &Context) -> Result<()> {
    let engine = ctx.open_engine()?;

    let query = HistoryQuery {
        session_id: args.session,
        topics: args.topics,
        since: args.since.as_deref().map(parse_timestamp).transpose()?,
        limit: args.limit,
    };
    let turns = engine.recall_conversation_history(query)?;

    if ctx.json_output {
        return print_json(&turns);
    }
    print_header("Conversation History");
    print_turns(turns.iter().map(|t| (t, None)));
    Ok(())
}

pub async fn summarize(args: SummarizeArgs, ctx: &Context) -> Result<()> {
    let engine = ctx.open_engine()?;
    let summary = engine.summarize_conversation_session(&args.session, args.save)?;
    if args.save {
        engine.shutdown()?;
    }

    if ctx.json_output {
        return print_json(&summary);
    }

    let dim = Style::new().dim();
    print_header(&format!("Session {}", summary.session_id));
    println!();
    println!("  Turns:       {}", style(summary.turn_count).cyan());
    println!(
        "  Span:        {} to {} ({} min)",
        summary.first_turn_at.format("%Y-%m-%d %H:%M"),
        summary.last_turn_at.format("%Y-%m-%d %H:%M"),
        summary.duration_minutes
    );
    println!(
        "  Sentiment:   {}",
        summary.overall_sentiment.as_deref().unwrap_or("-")
    );
    if !summary.top_topics.is_empty() {
        let topics: Vec<String> = summary
            .top_topics
            .iter()
            .map(|t| format!("{} ({})", t.topic, t.count))
            .collect();
        println!("  Topics:      {}", topics.join(", "));
    }
    if !summary.high_importance_turns.is_empty() {
        println!();
        println!("{}", style("Highlights").bold());
        for h in &summary.high_importance_turns {
            println!(
                "  [{}] {}",
                style(h.importance).cyan(),
                truncate(&h.excerpt, 70)
            );
        }
    }
    if let Some(id) = summary.id {
        println!();
        println!("{}", dim.apply_to(format!("Saved as {}", id)));
    }
    Ok(())
}

pub async fn search(args: SearchTurnsArgs, ctx: &Context) -> Result<()> {
    let engine = ctx.open_engine()?;

    let mut search = TurnSearch::new(args.query);
    if let Some(session) = args.session {
        search = search.in_session(session);
    }
    if let Some(min) = args.min_importance {
        search = search.with_min_importance(min);
    }
    if let Some(limit) = args.limit {
        search = search.with_limit(limit);
    }
    let matches = engine.search_conversations(search).await?;
    print_warnings(&matches.warnings);

    if ctx.json_output {
        return print_json(&matches.value);
    }
    print_header("Conversation Search Results");
    print_turns(matches.value.iter().map(|m| (&m.turn, m.relevance)));
    Ok(())
}

fn print_turns<'a>(turns: impl Iterator<Item = (&'a ConversationTurn, Option<f32>)>) {
    let dim = Style::new().dim();
    let mut any = false;
    for (i, (turn, relevance)) in turns.enumerate() {
        if i == 0 {
            println!();
        }
        any = true;
        println!(
            "{}. {} {}",
            style(i + 1).cyan(),
            style("User:").bold(),
            truncate(&turn.user_message, 64)
        );
        println!("   {} {}", style("Assistant:").bold(), truncate(&turn.assistant_response, 59));
        let score = relevance
            .map(|r| format!("  (score: {:.3})", r))
            .unwrap_or_default();
        println!(
            "   {}",
            dim.apply_to(format!(
                "{}  {}  topics: {}{}",
                turn.timestamp.format("%Y-%m-%d %H:%M"),
                turn.session_id,
                labels(&turn.topics),
                score
            ))
        );
        println!();
    }
    if !any {
        println!("{}", dim.apply_to("No turns found"));
    }
}
