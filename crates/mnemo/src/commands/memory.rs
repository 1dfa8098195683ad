//! Memory commands: store, recall, associations, reflect, importance, related, stats.

use anyhow::Result;
use clap::Args;
use console::{Style, style};

use mnemo_memory::{AssociationQuery, Memory, MemoryId, NewMemory, RecallQuery, ReflectionReport};

use super::{
    Context, labels, parse_timestamp, print_header, print_json, print_warnings, truncate,
};

/// Arguments for `mnemo store`.
#[derive(Args, Debug)]
pub struct StoreArgs {
    /// Memory content
    pub content: String,

    /// Importance from 1 to 10 (default 5)
    #[arg(short, long)]
    pub importance: Option<i64>,

    /// Topic label (repeatable)
    #[arg(short, long = "topic")]
    pub topics: Vec<String>,

    /// Person involved (repeatable)
    #[arg(long = "person")]
    pub people: Vec<String>,

    /// Place involved (repeatable)
    #[arg(long = "place")]
    pub places: Vec<String>,

    /// Sentiment label (positive, neutral, negative or free text)
    #[arg(long)]
    pub sentiment: Option<String>,

    /// Provenance tag
    #[arg(long)]
    pub source: Option<String>,

    /// Id of a related memory (repeatable)
    #[arg(long = "related")]
    pub related: Vec<String>,

    /// When it happened (RFC 3339, default now)
    #[arg(long)]
    pub timestamp: Option<String>,
}

/// Arguments for `mnemo recall`.
#[derive(Args, Debug)]
pub struct RecallArgs {
    /// today, yesterday, last_week, last_month, last_year or START:END
    #[arg(default_value = "today")]
    pub period: String,

    /// Only memories with one of these topics (repeatable)
    #[arg(short, long = "topic")]
    pub topics: Vec<String>,

    /// Minimum importance
    #[arg(long)]
    pub min_importance: Option<i64>,

    /// Maximum results
    #[arg(short, long)]
    pub limit: Option<usize>,
}

/// Arguments for `mnemo associations`.
#[derive(Args, Debug)]
pub struct AssociationsArgs {
    /// Topic (repeatable)
    #[arg(short, long = "topic")]
    pub topics: Vec<String>,

    /// Person (repeatable)
    #[arg(long = "person")]
    pub people: Vec<String>,

    /// Place (repeatable)
    #[arg(long = "place")]
    pub places: Vec<String>,

    /// Sentiment label
    #[arg(long)]
    pub sentiment: Option<String>,

    /// Minimum importance
    #[arg(long)]
    pub min_importance: Option<i64>,

    /// Maximum results
    #[arg(short, long)]
    pub limit: Option<usize>,
}

/// Arguments for `mnemo reflect`.
#[derive(Args, Debug)]
pub struct ReflectArgs {
    /// topics, importance, sentiment, frequency, timeline or all
    #[arg(default_value = "all")]
    pub aspect: String,

    /// Restrict to a period (default: all memories)
    #[arg(short, long)]
    pub period: Option<String>,
}

/// Arguments for `mnemo importance`.
#[derive(Args, Debug)]
pub struct ImportanceArgs {
    /// Memory id
    pub id: MemoryId,

    /// New importance from 1 to 10 (omit to show the history)
    pub value: Option<i64>,

    /// Why the importance changed
    #[arg(short, long)]
    pub reason: Option<String>,
}

/// Arguments for `mnemo related`.
#[derive(Args, Debug)]
pub struct RelatedArgs {
    /// Memory id
    pub id: MemoryId,

    /// Maximum hops to follow
    #[arg(short, long, default_value = "2")]
    pub depth: usize,
}

pub async fn store(args: StoreArgs, ctx: &Context) -> Result<()> {
    let engine = ctx.open_engine()?;

    let mut input = NewMemory::new(args.content)
        .with_topics(args.topics)
        .with_people(args.people)
        .with_places(args.places);
    if let Some(importance) = args.importance {
        input = input.with_importance(importance);
    }
    if let Some(sentiment) = args.sentiment {
        input = input.with_sentiment(sentiment);
    }
    if let Some(source) = args.source {
        input = input.with_source(source);
    }
    for id in args.related {
        input = input.with_related(id);
    }
    if let Some(ts) = args.timestamp.as_deref() {
        input = input.with_timestamp(parse_timestamp(ts)?);
    }

    let stored = engine.store_memory(input).await?;
    print_warnings(&stored.warnings);
    engine.shutdown()?;

    if ctx.json_output {
        return print_json(&stored.value);
    }
    println!(
        "{} {}",
        Style::new().green().apply_to("Stored"),
        style(stored.value.id).cyan()
    );
    Ok(())
}

pub async fn recall(args: RecallArgs, ctx: &Context) -> Result<()> {
    let engine = ctx.open_engine()?;

    let mut query = RecallQuery::new(args.period).with_topics(args.topics);
    if let Some(min) = args.min_importance {
        query = query.with_min_importance(min);
    }
    if let Some(limit) = args.limit {
        query = query.with_limit(limit);
    }
    let result = engine.recall_by_time(query)?;

    if ctx.json_output {
        return print_json(&result);
    }
    print_header(&format!("Memories: {} ({})", result.period, result.range));
    print_memories(&result.memories);
    Ok(())
}

pub async fn associations(args: AssociationsArgs, ctx: &Context) -> Result<()> {
    let engine = ctx.open_engine()?;

    let mut query = AssociationQuery::new()
        .topics(args.topics)
        .people(args.people)
        .places(args.places);
    if let Some(sentiment) = args.sentiment {
        query = query.sentiment(sentiment);
    }
    if let Some(min) = args.min_importance {
        query = query.min_importance(min);
    }
    if let Some(limit) = args.limit {
        query = query.limit(limit);
    }
    let memories = engine.find_associations(query)?;

    if ctx.json_output {
        return print_json(&memories);
    }
    print_header("Associated Memories");
    print_memories(&memories);
    Ok(())
}

pub async fn reflect(args: ReflectArgs, ctx: &Context) -> Result<()> {
    let engine = ctx.open_engine()?;
    let report = engine.reflect_on_memories(&args.aspect, args.period.as_deref())?;

    if ctx.json_output {
        return print_json(&report);
    }
    print_reflection(&report);
    Ok(())
}

pub async fn importance(args: ImportanceArgs, ctx: &Context) -> Result<()> {
    let engine = ctx.open_engine()?;
    let dim = Style::new().dim();

    let Some(value) = args.value else {
        let history = engine.importance_history(args.id)?;
        if ctx.json_output {
            return print_json(&history);
        }
        print_header(&format!("Importance history of {}", args.id));
        if history.is_empty() {
            println!("{}", dim.apply_to("No changes recorded"));
        }
        for change in &history {
            println!(
                "  {}  {} -> {}  {}",
                dim.apply_to(change.changed_at.format("%Y-%m-%d %H:%M")),
                change.old,
                style(change.new).cyan(),
                change.reason.as_deref().unwrap_or("")
            );
        }
        return Ok(());
    };

    let update = engine.update_memory_importance(args.id, value, args.reason.as_deref())?;
    engine.shutdown()?;

    if ctx.json_output {
        return print_json(&update);
    }
    println!(
        "{} {}: {} -> {}",
        Style::new().green().apply_to("Updated"),
        style(args.id).cyan(),
        update.old,
        style(update.new).bold()
    );
    Ok(())
}

pub async fn related(args: RelatedArgs, ctx: &Context) -> Result<()> {
    let engine = ctx.open_engine()?;
    let memories = engine.related_memories(args.id, args.depth)?;

    if ctx.json_output {
        return print_json(&memories);
    }
    print_header(&format!("Related to {} (depth {})", args.id, args.depth));
    print_memories(&memories);
    Ok(())
}

pub async fn stats(ctx: &Context) -> Result<()> {
    let engine = ctx.open_engine()?;
    let stats = engine.stats()?;

    if ctx.json_output {
        return print_json(&stats);
    }

    print_header("Memory Statistics");
    println!();
    println!(
        "  Memories:    {} ({} live)",
        style(stats.memory_count).cyan(),
        stats.live_memory_count
    );
    println!(
        "  Turns:       {} in {} sessions",
        style(stats.turn_count).cyan(),
        stats.session_count
    );
    println!("  Captures:    {}", style(stats.capture_count).cyan());
    println!("  Learnings:   {}", style(stats.learning_count).cyan());
    println!("  Paths:       {}", style(stats.path_count).cyan());
    println!("  Summaries:   {}", style(stats.summary_count).cyan());
    println!("  Embeddings:  {}", style(stats.embedding_count).cyan());
    println!("  Schema:      v{}", stats.schema_version);
    println!();
    println!("  Database:    {}", ctx.database_path().display());
    Ok(())
}

fn print_memories(memories: &[Memory]) {
    let dim = Style::new().dim();
    if memories.is_empty() {
        println!("{}", dim.apply_to("No memories found"));
        return;
    }
    println!();
    for (i, memory) in memories.iter().enumerate() {
        println!(
            "{}. {} {}",
            style(i + 1).cyan(),
            truncate(&memory.content, 70),
            dim.apply_to(format!("[{}]", memory.importance))
        );
        println!(
            "   {}  topics: {}",
            dim.apply_to(memory.timestamp.format("%Y-%m-%d %H:%M")),
            labels(&memory.topics)
        );
        println!("   {}", dim.apply_to(memory.id));
        println!();
    }
}

fn print_reflection(report: &ReflectionReport) {
    let dim = Style::new().dim();
    let scope = report.period.as_deref().unwrap_or("all time");
    print_header(&format!("Reflection: {} ({})", report.aspect, scope));
    println!();
    println!("  Memories:    {}", style(report.total_memories).cyan());

    if let Some(topics) = &report.top_topics {
        println!();
        println!("{}", style("Topics").bold());
        for t in topics {
            println!("  {:<24} {}", t.topic, style(t.count).cyan());
        }
    }

    if let Some(importance) = &report.importance {
        println!();
        println!("{}", style("Importance").bold());
        println!(
            "  mean {:.1}, min {}, max {}, high {}",
            importance.mean, importance.min, importance.max, importance.high_importance_count
        );
    }

    if let Some(sentiment) = &report.sentiment {
        println!();
        println!("{}", style("Sentiment").bold());
        println!(
            "  positive {}, neutral {}, negative {}, other {}, unspecified {}",
            sentiment.positive,
            sentiment.neutral,
            sentiment.negative,
            sentiment.other,
            sentiment.unspecified
        );
    }

    if let Some(frequency) = &report.frequency {
        println!();
        println!("{}", style("Frequency").bold());
        println!(
            "  {} active days, current streak {}, longest {}",
            frequency.active_days, frequency.current_streak, frequency.longest_streak
        );
        println!(
            "  {}",
            dim.apply_to(format!(
                "mean access {:.1}, {} rarely accessed",
                frequency.access.mean_access_count, frequency.access.rarely_accessed
            ))
        );
    }

    if let Some(timeline) = &report.timeline {
        println!();
        println!("{}", style("Timeline").bold());
        println!(
            "  {} to {} ({} days)",
            timeline.earliest.format("%Y-%m-%d"),
            timeline.latest.format("%Y-%m-%d"),
            timeline.span_days
        );
    }

    if !report.recommendations.is_empty() {
        println!();
        println!("{}", style("Recommendations").bold());
        for r in &report.recommendations {
            println!("  - {}", r);
        }
    }
}
