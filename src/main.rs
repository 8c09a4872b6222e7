use anyhow::{Result, anyhow};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use scout::batch::BatchController;
use scout::config::Settings;
use scout::matching;
use scout::models::{Factor, Listing, ScoreResult};
use scout::profile::{ListKind, Profile, ProfileStore};
use scout::sources::{
    CancelFlag, RenderedAdapter, SourceAdapter, StaticPageAdapter, SyntheticAdapter,
};
use scout::stats::IndustryStats;
use scout::store::MergeStore;
use scout::{Pipeline, RunReport};

#[derive(Parser)]
#[command(name = "scout")]
#[command(about = "Collect job listings in batches and rank them against your profile")]
struct Cli {
    /// Directory holding profile, listings and cursor files
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Log debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch the next batch of listings for a query, or one batch per
    /// profile role when no query is given
    Search {
        /// Search terms
        query: Option<String>,

        /// Location (defaults to the profile's)
        #[arg(short, long)]
        location: Option<String>,

        /// Where listings come from
        #[arg(short, long, value_enum, default_value = "synthetic")]
        source: SourceKind,

        /// Continue after the last batch instead of starting over
        #[arg(long)]
        more: bool,

        /// Results the synthetic source pretends to have
        #[arg(long, default_value = "25")]
        count: usize,

        /// Seed for the synthetic source
        #[arg(long, default_value = "42")]
        seed: u64,
    },

    /// Show stored listings ranked by match score
    Rank {
        /// Number of listings to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Show one listing with its score breakdown
    Show {
        /// Listing URL
        url: String,
    },

    /// Market statistics over every stored listing
    Stats {
        /// Entries per ranking
        #[arg(short, long, default_value = "10")]
        top: usize,
    },

    /// View or edit the matching profile
    Profile {
        #[command(subcommand)]
        command: ProfileCommands,
    },

    /// Delete every saved listing and the search cursor
    Clear {
        /// Confirm the deletion
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum ProfileCommands {
    /// Print the current profile
    Show,
    AddRole { name: String },
    RemoveRole { name: String },
    /// Move a role from one position to another (1-based)
    MoveRole { from: usize, to: usize },
    AddSkill { name: String },
    RemoveSkill { name: String },
    MoveSkill { from: usize, to: usize },
    AddBenefit { name: String },
    RemoveBenefit { name: String },
    MoveBenefit { from: usize, to: usize },
    /// Set a factor weight (role, skill, salary, experience, benefit) from 1 to 10
    Priority { factor: String, weight: u8 },
    /// Set the accepted salary range
    Salary { min: i64, max: i64 },
    /// Set the accepted years of experience
    Experience { min: i64, max: i64 },
}

#[derive(Clone, Copy, ValueEnum)]
enum SourceKind {
    Synthetic,
    Static,
    Browser,
}

enum ListEdit {
    Add(String),
    Remove(String),
    Move(usize, usize),
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// First Ctrl-C stops the batch after the current item, a second one exits.
fn watch_interrupt(flag: CancelFlag) {
    std::thread::spawn(move || {
        let Ok(rt) = tokio::runtime::Builder::new_current_thread().enable_all().build() else {
            return;
        };
        rt.block_on(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted, finishing the current item");
                flag.cancel();
            }
            if tokio::signal::ctrl_c().await.is_ok() {
                std::process::exit(130);
            }
        });
    });
}

fn make_adapter(
    kind: SourceKind,
    settings: &Settings,
    count: usize,
    seed: u64,
) -> Result<Box<dyn SourceAdapter>> {
    Ok(match kind {
        SourceKind::Synthetic => Box::new(SyntheticAdapter::new(seed, count)),
        SourceKind::Static => {
            Box::new(StaticPageAdapter::new(settings.http.clone(), &settings.user_agent)?)
        }
        SourceKind::Browser => {
            Box::new(RenderedAdapter::new(settings.browser.clone(), &settings.extraction)?)
        }
    })
}

fn open_pipeline(settings: &Settings, adapter: Box<dyn SourceAdapter>) -> Result<Pipeline> {
    let store = MergeStore::open(&settings.listings_path())?;
    let cursor = BatchController::load_cursor(&settings.cursor_path());
    let controller = BatchController::with_cursor(settings.batch_size, cursor);
    Ok(Pipeline::new(store, adapter, controller, settings))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut settings = Settings::load_default();
    if let Some(dir) = cli.data_dir {
        settings.data_dir = Some(dir);
    }
    info!(data_dir = %settings.data_dir().display(), "using data directory");
    // Profile edits must work on a broken profile so it can be repaired.
    let mut profiles = match &cli.command {
        Commands::Profile { .. } => ProfileStore::load(&settings.profile_path())?,
        _ => ProfileStore::open(&settings.profile_path())?,
    };

    match cli.command {
        Commands::Search {
            query,
            location,
            source,
            more,
            count,
            seed,
        } => {
            let location = location.unwrap_or_else(|| profiles.profile().location.clone());
            if query.is_none() && more {
                return Err(anyhow!(
                    "--more needs a query; a search over every role always starts over"
                ));
            }
            if query.is_none() && profiles.profile().roles.is_empty() {
                println!("No target roles in the profile. Add one with `scout profile add-role`.");
                return Ok(());
            }
            let adapter = make_adapter(source, &settings, count, seed)?;
            let mut pipeline = open_pipeline(&settings, adapter)?;
            watch_interrupt(pipeline.cancel_flag());

            match query {
                Some(query) => {
                    if !more {
                        pipeline.reset_cursor()?;
                    }
                    let report = pipeline.run_batch(&query, &location)?;
                    print_run(&report, profiles.profile());
                }
                None => {
                    let roles = profiles.profile().roles.clone();
                    let reports = pipeline.run_roles(&roles, &location)?;
                    for (role, report) in &reports {
                        println!("\n== {} ==", role);
                        print_run(report, profiles.profile());
                    }
                    let recorded: usize = reports.iter().map(|(_, r)| r.recorded).sum();
                    println!(
                        "\n{} role(s) searched, {} listing(s) recorded.",
                        reports.len(),
                        recorded
                    );
                }
            }
        }

        Commands::Rank { limit } => {
            let store = MergeStore::open(&settings.listings_path())?;
            let scores = matching::score_all(store.get_all(), profiles.profile());
            if scores.is_empty() {
                println!("No listings yet. Run `scout search` first.");
            } else {
                println!(
                    "{:<5} {:>6} {:<34} {:<22} {}",
                    "RANK", "SCORE", "TITLE", "COMPANY", "FLAGS"
                );
                println!("{}", "-".repeat(84));
                for (i, result) in scores.iter().take(limit).enumerate() {
                    let Some(listing) = store.get(&result.listing_url) else {
                        continue;
                    };
                    println!(
                        "{:<5} {:>6} {:<34} {:<22} {}",
                        i + 1,
                        result.total_score,
                        truncate(&listing.title, 32),
                        truncate(&listing.company, 20),
                        result.flags.join(", ")
                    );
                    let summary = result
                        .factors()
                        .iter()
                        .map(|f| format!("{} {}: {}", f.factor, f.score, f.rationale))
                        .collect::<Vec<_>>()
                        .join("; ");
                    let options = textwrap::Options::new(84)
                        .initial_indent("      ")
                        .subsequent_indent("      ");
                    println!("{}", textwrap::fill(&summary, options));
                }
            }
        }

        Commands::Show { url } => {
            let store = MergeStore::open(&settings.listings_path())?;
            let listing = store
                .get(&url)
                .ok_or_else(|| anyhow!("No listing stored for {}", url))?;
            print_listing(listing, &matching::score(listing, profiles.profile()));
        }

        Commands::Stats { top } => {
            let store = MergeStore::open(&settings.listings_path())?;
            let stats = IndustryStats::compute(store.get_all());
            println!("Listings: {}", stats.total_listings);
            if stats.total_listings == 0 {
                return Ok(());
            }
            print_ranking("Top skills", stats.top_skills(top));
            print_ranking("Top titles", stats.top_titles(top));
            print_ranking("Top companies", stats.top_companies(top));
            match &stats.salary {
                Some(salary) => {
                    println!(
                        "\nSalary ({} listings, {:.1}% coverage)",
                        salary.count, salary.coverage_pct
                    );
                    println!("  Mean: {:.0}", salary.mean);
                    println!("  Min:  {}", salary.min);
                    println!("  Max:  {}", salary.max);
                }
                None => println!("\nNo salary figures found."),
            }
        }

        Commands::Profile { command } => match command {
            ProfileCommands::Show => {
                print_profile(profiles.profile());
                for problem in profiles.profile().problems() {
                    println!("Needs fixing: {}", problem);
                }
            }
            ProfileCommands::AddRole { name } => {
                edit_list(&mut profiles, ListKind::Roles, ListEdit::Add(name))?
            }
            ProfileCommands::RemoveRole { name } => {
                edit_list(&mut profiles, ListKind::Roles, ListEdit::Remove(name))?
            }
            ProfileCommands::MoveRole { from, to } => {
                edit_list(&mut profiles, ListKind::Roles, ListEdit::Move(from, to))?
            }
            ProfileCommands::AddSkill { name } => {
                edit_list(&mut profiles, ListKind::Skills, ListEdit::Add(name))?
            }
            ProfileCommands::RemoveSkill { name } => {
                edit_list(&mut profiles, ListKind::Skills, ListEdit::Remove(name))?
            }
            ProfileCommands::MoveSkill { from, to } => {
                edit_list(&mut profiles, ListKind::Skills, ListEdit::Move(from, to))?
            }
            ProfileCommands::AddBenefit { name } => {
                edit_list(&mut profiles, ListKind::Benefits, ListEdit::Add(name))?
            }
            ProfileCommands::RemoveBenefit { name } => {
                edit_list(&mut profiles, ListKind::Benefits, ListEdit::Remove(name))?
            }
            ProfileCommands::MoveBenefit { from, to } => {
                edit_list(&mut profiles, ListKind::Benefits, ListEdit::Move(from, to))?
            }
            ProfileCommands::Priority { factor, weight } => {
                let factor = Factor::parse(&factor)
                    .ok_or_else(|| anyhow!("Unknown factor '{}'", factor))?;
                profiles.edit(|p| p.set_priority(factor, weight))?;
                println!("{} priority set to {}.", factor, weight);
            }
            ProfileCommands::Salary { min, max } => {
                profiles.edit(|p| p.set_salary_range(min, max))?;
                println!("Salary range set to {} - {}.", min, max);
            }
            ProfileCommands::Experience { min, max } => {
                profiles.edit(|p| p.set_experience_range(min, max))?;
                println!("Experience range set to {} - {} years.", min, max);
            }
        },

        Commands::Clear { yes } => {
            if !yes {
                println!("This deletes every saved listing. Re-run with --yes to confirm.");
                return Ok(());
            }
            let mut store = MergeStore::open(&settings.listings_path())?;
            let count = store.len();
            store.clear();
            store.save()?;
            BatchController::new(settings.batch_size).save_cursor(&settings.cursor_path())?;
            println!("Deleted {} listing(s).", count);
        }
    }

    Ok(())
}

fn edit_list(profiles: &mut ProfileStore, kind: ListKind, edit: ListEdit) -> Result<()> {
    let label = match kind {
        ListKind::Roles => "role",
        ListKind::Skills => "skill",
        ListKind::Benefits => "benefit",
    };
    let (changed, message) = match edit {
        ListEdit::Add(name) => {
            let added = profiles.edit(|p| Ok(p.append(kind, &name)))?;
            (added, format!("Added {} '{}'.", label, name.trim()))
        }
        ListEdit::Remove(name) => {
            let removed = profiles.edit(|p| Ok(p.remove(kind, &name)))?;
            (removed, format!("Removed {} '{}'.", label, name.trim()))
        }
        ListEdit::Move(from, to) => {
            let (from_idx, to_idx) = (from.saturating_sub(1), to.saturating_sub(1));
            let moved = profiles.edit(|p| Ok(p.reorder(kind, from_idx, to_idx)))?;
            (moved, format!("Moved {} {} to position {}.", label, from, to))
        }
    };
    if changed {
        println!("{}", message);
    } else {
        println!("No change to the {} list.", label);
    }
    Ok(())
}

fn print_run(report: &RunReport, profile: &Profile) {
    if report.listings.is_empty() && report.exhausted {
        println!("No more results for this query.");
    }
    for listing in &report.listings {
        let score = matching::score(listing, profile);
        println!(
            "{:>6}  {:<34} {:<22} {}",
            score.total_score,
            truncate(&listing.title, 32),
            truncate(&listing.company, 20),
            listing.url
        );
    }
    println!(
        "\n{}: {} recorded, {} skipped ({} new, {} updated)",
        report.source, report.recorded, report.skipped, report.inserted, report.updated
    );
    for entry in &report.degraded {
        println!("  degraded: {}", entry);
    }
    if report.cancelled {
        println!("Stopped early. Run again with --more to continue.");
    } else if !report.exhausted {
        println!("Run again with --more for the next batch.");
    }
}

fn print_listing(listing: &Listing, result: &ScoreResult) {
    println!("{}", listing.title);
    println!("Company: {}", listing.company);
    println!("URL: {}", listing.url);
    if let Some(source) = &listing.source {
        println!("Source: {}", source);
    }
    println!("Updated: {}", listing.last_updated.format("%Y-%m-%d %H:%M"));
    println!("\nScore: {}", result.total_score);
    for factor in result.factors() {
        println!("  {:<11} {:>5}  {}", factor.factor, factor.score, factor.rationale);
    }
    if !result.flags.is_empty() {
        println!("  Flags: {}", result.flags.join(", "));
    }
    println!("\n--- Description ---\n{}", textwrap::fill(&listing.description, 84));
}

fn print_profile(profile: &Profile) {
    let numbered = |items: &[String]| {
        items
            .iter()
            .enumerate()
            .map(|(i, s)| format!("{}. {}", i + 1, s))
            .collect::<Vec<_>>()
            .join(", ")
    };
    println!("Roles:      {}", numbered(&profile.roles));
    let skills = textwrap::fill(&numbered(&profile.skills), 72);
    println!("Skills:     {}", skills.replace('\n', "\n            "));
    println!("Benefits:   {}", numbered(&profile.benefits));
    println!("Salary:     {} - {}", profile.salary.min, profile.salary.max);
    println!("Experience: {} - {} years", profile.experience.min, profile.experience.max);
    println!("Location:   {}", profile.location);
    let weights = Factor::ALL
        .iter()
        .map(|f| format!("{} {}", f, profile.priority(*f)))
        .collect::<Vec<_>>()
        .join(", ");
    println!("Priorities: {}", weights);
}

fn print_ranking(title: &str, entries: &[(String, usize)]) {
    println!("\n{}", title);
    for (name, count) in entries {
        println!("  {:<32} {:>4}", truncate(name, 30), count);
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}
