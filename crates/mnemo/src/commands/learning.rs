//! Incremental learning commands: capture, expand, reinforce, progress, path.

use anyhow::Result;
use clap::Args;
use console::{Style, style};

use mnemo_memory::{CaptureId, CaptureRequest, ExpandRequest, LearningId, PathRequest};

use super::{Context, print_header, print_json, print_warnings, truncate};

/// Arguments for `mnemo capture`.
#[derive(Args, Debug)]
pub struct CaptureArgs {
    /// What you just learned, in a few words
    pub content: String,

    /// Where or how it came up
    #[arg(short, long)]
    pub context: Option<String>,

    /// Tag (repeatable)
    #[arg(short, long = "tag")]
    pub tags: Vec<String>,

    /// Do not queue the capture for expansion
    #[arg(long)]
    pub no_expand: bool,
}

/// Arguments for `mnemo expand`.
#[derive(Args, Debug)]
pub struct ExpandArgs {
    /// Capture id
    pub capture_id: CaptureId,

    /// The fully developed learning
    pub content: String,

    /// Importance from 1 to 10
    #[arg(short, long)]
    pub importance: Option<i64>,

    /// Topic (repeatable, default: the capture's tags)
    #[arg(short, long = "topic")]
    pub topics: Vec<String>,

    /// Related record id (repeatable)
    #[arg(long = "related")]
    pub related: Vec<String>,

    /// One-line takeaway
    #[arg(long)]
    pub insight: Option<String>,
}

/// Arguments for `mnemo reinforce`.
#[derive(Args, Debug)]
pub struct ReinforceArgs {
    /// Learning id
    pub learning_id: LearningId,

    /// How the learning was used
    #[arg(short, long)]
    pub context: Option<String>,

    /// Self-assessed mastery from 1 to 5
    #[arg(short, long)]
    pub mastery: Option<i64>,
}

/// Arguments for `mnemo progress`.
#[derive(Args, Debug)]
pub struct ProgressArgs {
    /// Period to report on
    #[arg(default_value = "last_week")]
    pub period: String,
}

/// Arguments for `mnemo path`.
#[derive(Args, Debug)]
pub struct PathArgs {
    /// What you want to learn
    pub goal: String,

    /// beginner, intermediate or advanced
    #[arg(short, long, default_value = "beginner")]
    pub level: String,

    /// Topic you already know (repeatable)
    #[arg(short, long = "topic")]
    pub topics: Vec<String>,

    /// Persist the path
    #[arg(long)]
    pub save: bool,
}

pub async fn capture(args: CaptureArgs, ctx: &Context) -> Result<()> {
    let engine = ctx.open_engine()?;

    let mut request = CaptureRequest::new(args.content)
        .with_tags(args.tags)
        .expand_later(!args.no_expand);
    if let Some(context) = args.context {
        request = request.with_context(context);
    }

    let captured = engine.quick_capture(request).await?;
    print_warnings(&captured.warnings);
    engine.shutdown()?;

    if ctx.json_output {
        return print_json(&captured.value);
    }
    println!(
        "{} {}",
        Style::new().green().apply_to("Captured"),
        style(captured.value.id).cyan()
    );
    Ok(())
}

pub async fn expand(args: ExpandArgs, ctx: &Context) -> Result<()> {
    let engine = ctx.open_engine()?;

    let mut request = ExpandRequest::new(args.content);
    if let Some(importance) = args.importance {
        request = request.with_importance(importance);
    }
    if !args.topics.is_empty() {
        request = request.with_topics(args.topics);
    }
    if let Some(insight) = args.insight {
        request = request.with_key_insight(insight);
    }
    for id in args.related {
        request = request.with_related(id);
    }

    let expanded = engine.expand_learning(args.capture_id, request).await?;
    print_warnings(&expanded.warnings);
    engine.shutdown()?;

    if ctx.json_output {
        return print_json(&expanded.value);
    }
    println!(
        "{} {} into {} [{}]",
        Style::new().green().apply_to("Expanded"),
        args.capture_id,
        style(expanded.value.id).cyan(),
        expanded.value.importance
    );
    Ok(())
}

pub async fn reinforce(args: ReinforceArgs, ctx: &Context) -> Result<()> {
    let engine = ctx.open_engine()?;
    let learning =
        engine.reinforce_learning(args.learning_id, args.context.as_deref(), args.mastery)?;
    engine.shutdown()?;

    if ctx.json_output {
        return print_json(&learning);
    }
    println!(
        "{} {}: {} reinforcements, importance {}, mastery {}",
        Style::new().green().apply_to("Reinforced"),
        style(learning.id).cyan(),
        learning.reinforcement_count,
        style(learning.importance).bold(),
        learning.mastery_level
    );
    Ok(())
}

pub async fn progress(args: ProgressArgs, ctx: &Context) -> Result<()> {
    let engine = ctx.open_engine()?;
    let report = engine.track_learning_progress(&args.period)?;

    if ctx.json_output {
        return print_json(&report);
    }

    let dim = Style::new().dim();
    print_header(&format!("Learning Progress: {}", report.period));
    println!();
    println!("  Captures:            {}", style(report.captures).cyan());
    println!("  Expansions:          {}", style(report.expansions).cyan());
    println!(
        "  Pending expansion:   {}",
        style(report.pending_expansion.len()).cyan()
    );
    println!(
        "  Need reinforcement:  {}",
        style(report.needs_reinforcement).cyan()
    );
    println!(
        "  Streak:              {} days (longest {})",
        report.current_streak, report.longest_streak
    );

    if !report.stalest.is_empty() {
        println!();
        println!("{}", style("Overdue for reinforcement").bold());
        for s in &report.stalest {
            println!(
                "  {} {}",
                truncate(&s.excerpt, 60),
                dim.apply_to(format!("({} days idle, {})", s.days_idle, s.id))
            );
        }
    }

    if !report.recommendations.is_empty() {
        println!();
        println!("{}", style("Recommendations").bold());
        for r in &report.recommendations {
            println!("  - {}", r);
        }
    }
    Ok(())
}

pub async fn path(args: PathArgs, ctx: &Context) -> Result<()> {
    let engine = ctx.open_engine()?;
    let path = engine.create_learning_path(PathRequest {
        goal: args.goal,
        current_level: args.level,
        related_topics: args.topics,
        save: args.save,
    })?;
    if path.saved {
        engine.shutdown()?;
    }

    if ctx.json_output {
        return print_json(&path);
    }

    print_header(&format!("Learning Path: {} ({})", path.goal, path.level.as_str()));
    for (i, milestone) in path.milestones.iter().enumerate() {
        println!();
        println!(
            "{}. {} - {}",
            style(i + 1).cyan(),
            style(&milestone.phase).bold(),
            milestone.description
        );
        for task in &milestone.tasks {
            println!("   - {}", task);
        }
    }
    if path.saved {
        println!();
        println!("{}", Style::new().dim().apply_to(format!("Saved as {}", path.id)));
    }
    Ok(())
}
