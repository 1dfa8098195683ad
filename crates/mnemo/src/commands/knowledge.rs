//! Knowledge maintenance commands: consolidate, organize.

use anyhow::Result;
use clap::Args;
use console::{Style, style};

use super::{Context, print_header, print_json, print_warnings, truncate};

/// Arguments for `mnemo consolidate`.
#[derive(Args, Debug)]
pub struct ConsolidateArgs {
    /// Topic whose memories are compared
    pub topic: String,

    /// Similarity at or above which two memories merge (0.0 to 1.0)
    #[arg(short, long)]
    pub threshold: Option<f32>,

    /// Maximum candidates to compare
    #[arg(short, long)]
    pub limit: Option<usize>,
}

/// Arguments for `mnemo organize`.
#[derive(Args, Debug)]
pub struct OrganizeArgs {
    /// Query selecting the memories
    pub query: String,

    /// Category to add
    pub category: String,

    /// Maximum memories to tag
    #[arg(short, long)]
    pub limit: Option<usize>,
}

pub async fn consolidate(args: ConsolidateArgs, ctx: &Context) -> Result<()> {
    let engine = ctx.open_engine()?;
    let report = engine
        .consolidate_knowledge(&args.topic, args.threshold, args.limit)
        .await?;
    print_warnings(&report.warnings);
    engine.shutdown()?;

    if ctx.json_output {
        return print_json(&report);
    }

    let dim = Style::new().dim();
    print_header(&format!("Consolidation: {}", report.topic));
    println!();
    println!(
        "  Candidates:   {} ({} comparisons, threshold {:.2})",
        style(report.candidates).cyan(),
        report.comparisons,
        report.threshold
    );
    println!("  Merged:       {}", style(report.merged.len()).green());
    if !report.skipped.is_empty() {
        println!(
            "  Skipped:      {}",
            Style::new().yellow().apply_to(report.skipped.len())
        );
    }
    if report.exact_match_only {
        println!(
            "  {}",
            dim.apply_to("Semantic index unavailable; only identical content was merged")
        );
    }

    for pair in &report.merged {
        println!(
            "  {} <- {} {}",
            style(pair.survivor).cyan(),
            pair.merged,
            dim.apply_to(format!("({:.3})", pair.similarity))
        );
    }
    for pair in &report.skipped {
        println!(
            "  {} {} / {}: {}",
            Style::new().yellow().apply_to("skipped"),
            pair.first,
            pair.second,
            pair.reason
        );
    }
    Ok(())
}

pub async fn organize(args: OrganizeArgs, ctx: &Context) -> Result<()> {
    let engine = ctx.open_engine()?;
    let organized = engine
        .organize_knowledge(&args.query, &args.category, args.limit)
        .await?;
    print_warnings(&organized.warnings);
    engine.shutdown()?;

    if ctx.json_output {
        return print_json(&organized.value);
    }

    let dim = Style::new().dim();
    print_header(&format!("Organized under '{}'", args.category.trim()));
    if organized.value.is_empty() {
        println!("{}", dim.apply_to("No matching memories"));
        return Ok(());
    }
    println!();
    for (i, item) in organized.value.iter().enumerate() {
        let score = item
            .relevance
            .map(|r| format!("(score: {:.3})", r))
            .unwrap_or_else(|| "(text match)".to_string());
        println!(
            "{}. {} {}",
            style(i + 1).cyan(),
            truncate(&item.memory.content, 70),
            dim.apply_to(score)
        );
    }
    Ok(())
}
