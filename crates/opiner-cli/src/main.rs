use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use opiner_core::{Config, LintResult, Report, Severity};
use opiner_dbt::discovery::{find_dbt_projects, find_git_root, group_by_project};
use opiner_dbt::{DbtProject, LoadOptions, DBT_PROJECT_FILE};
use opiner_engine::{AuditKind, AuditTable, Linter, OpinionsPack};

/// dbt-opiner - Tool to lint dbt projects and keep them on rails
#[derive(Parser)]
#[command(name = "dbt-opiner")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file (default: first .dbt-opiner.yaml in the repository)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Logging level (RUST_LOG takes precedence)
    #[arg(long, global = true, value_enum, default_value_t = LogLevel::Info, ignore_case = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Lint files
    Lint {
        /// Files to process; directories are expanded
        #[arg(short, long, num_args = 1.., conflicts_with = "all_files")]
        files: Vec<PathBuf>,

        /// Process all files of every dbt project in the repository
        #[arg(short, long)]
        all_files: bool,

        #[command(flatten)]
        project: ProjectArgs,

        /// Write the lint results as markdown to this file
        #[arg(short, long)]
        output_file: Option<PathBuf>,

        /// Also save a JSON report
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Audit dbt project(s)
    Audit {
        /// Table(s) to print
        #[arg(short = 't', long = "type", value_enum, default_value_t = AuditType::General)]
        audit_type: AuditType,

        #[arg(short, long, value_enum, default_value_t = AuditFormat::Md)]
        format: AuditFormat,

        /// Directory of the dbt project to audit (default: every project in the repository)
        #[arg(long)]
        dbt_project_dir: Option<PathBuf>,

        #[command(flatten)]
        project: ProjectArgs,

        /// Write the audit to this file
        #[arg(short, long)]
        output_file: Option<PathBuf>,
    },
}

#[derive(clap::Args)]
struct ProjectArgs {
    /// dbt target used to compile the manifest
    #[arg(long, env = "DBT_TARGET")]
    target: Option<String>,

    /// Compile the dbt project manifest even if it exists
    #[arg(long)]
    force_compile: bool,

    /// Ignore every noqa directive, ignore_files pattern and ignored opinion
    #[arg(long)]
    no_ignore: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    fn directive(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warn",
            Self::Error | Self::Critical => "error",
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum AuditType {
    General,
    #[value(name = "by_tag")]
    ByTag,
    Detailed,
    All,
}

impl From<AuditType> for AuditKind {
    fn from(value: AuditType) -> Self {
        match value {
            AuditType::General => AuditKind::General,
            AuditType::ByTag => AuditKind::ByTag,
            AuditType::Detailed => AuditKind::Detailed,
            AuditType::All => AuditKind::All,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum AuditFormat {
    Md,
    Csv,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    // `${{ VAR }}` placeholders in the config may come from a .env file
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.log_level.directive())),
        )
        .init();

    let cwd = std::env::current_dir()?;
    let root = find_git_root(&cwd).unwrap_or_else(|| cwd.clone());
    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::discover(&root)?,
    };

    match cli.command {
        Commands::Lint {
            files,
            all_files,
            project,
            output_file,
            report,
        } => {
            if files.is_empty() && !all_files {
                bail!("Either --files or --all-files must be provided");
            }
            let files = expand_files(&cwd, &files)?;
            let projects = if all_files {
                load_all_projects(&root, &config, &project)?
            } else {
                load_projects_for_files(&root, &files, &config, &project)?
            };
            lint_command(
                &config,
                &projects,
                &project,
                output_file.as_deref(),
                report.as_deref(),
            )
        }
        Commands::Audit {
            audit_type,
            format,
            dbt_project_dir,
            project,
            output_file,
        } => {
            let projects = match dbt_project_dir {
                Some(dir) => {
                    let dbt_project_file = cwd.join(dir).join(DBT_PROJECT_FILE);
                    vec![load_project(&dbt_project_file, &config, &project, None)?]
                }
                None => load_all_projects(&root, &config, &project)?,
            };
            audit_command(
                &config,
                &projects,
                &project,
                audit_type,
                format,
                output_file.as_deref(),
            )
        }
    }
}

/// Absolute file paths; directories are replaced by the files they contain
fn expand_files(cwd: &Path, files: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut expanded = Vec::new();
    for file in files {
        let path = cwd.join(file);
        if path.is_dir() {
            expanded.extend(
                walkdir::WalkDir::new(&path)
                    .sort_by_file_name()
                    .into_iter()
                    .filter_map(|entry| entry.ok())
                    .filter(|entry| entry.file_type().is_file())
                    .map(|entry| entry.into_path()),
            );
        } else if path.is_file() {
            expanded.push(path);
        } else {
            bail!("{} does not exist", file.display());
        }
    }
    Ok(expanded)
}

fn load_project(
    dbt_project_file: &Path,
    config: &Config,
    args: &ProjectArgs,
    files: Option<Vec<PathBuf>>,
) -> Result<DbtProject> {
    let options = LoadOptions {
        target: args.target.clone(),
        force_compile: args.force_compile,
        files,
    };
    DbtProject::load(dbt_project_file, config, &options)
        .with_context(|| format!("Failed to load dbt project {}", dbt_project_file.display()))
}

fn load_all_projects(root: &Path, config: &Config, args: &ProjectArgs) -> Result<Vec<DbtProject>> {
    let project_files = find_dbt_projects(root);
    if project_files.is_empty() {
        tracing::warn!("No dbt projects found under {}", root.display());
    }
    project_files
        .iter()
        .map(|path| load_project(path, config, args, None))
        .collect()
}

fn load_projects_for_files(
    root: &Path,
    files: &[PathBuf],
    config: &Config,
    args: &ProjectArgs,
) -> Result<Vec<DbtProject>> {
    group_by_project(files, root)
        .into_iter()
        .map(|(project_file, files)| load_project(&project_file, config, args, Some(files)))
        .collect()
}

fn run_linter(config: &Config, projects: &[DbtProject], args: &ProjectArgs) -> Result<Linter> {
    let pack = OpinionsPack::new(config, args.no_ignore).map_err(|e| {
        tracing::error!("Could not load the opinions pack: {}", e);
        e
    })?;
    tracing::debug!("Loaded {} opinion(s)", pack.len());
    let mut linter = Linter::new(pack, config, args.no_ignore);
    for project in projects {
        linter.lint_project(project);
    }
    Ok(linter)
}

/// Lint command - print failures and exit non-zero on any `must` failure
fn lint_command(
    config: &Config,
    projects: &[DbtProject],
    args: &ProjectArgs,
    output_file: Option<&Path>,
    report_file: Option<&Path>,
) -> Result<()> {
    let linter = run_linter(config, projects, args)?;
    let results = linter.results(true);
    let exit_code = linter.exit_code();

    print_lint_results(&results, exit_code);

    if let Some(path) = output_file {
        std::fs::write(path, generate_markdown_report(&results, exit_code))?;
        tracing::info!("Lint results saved to {}", path.display());
    }

    if let Some(path) = report_file {
        let report = linter.report();
        report.save_to_file(path)?;
        print_report_summary(&report);
    }

    tracing::debug!("Exit with code: {}", exit_code);
    if exit_code != 0 {
        std::process::exit(exit_code);
    }
    Ok(())
}

/// Audit command - print statistics tables
fn audit_command(
    config: &Config,
    projects: &[DbtProject],
    args: &ProjectArgs,
    audit_type: AuditType,
    format: AuditFormat,
    output_file: Option<&Path>,
) -> Result<()> {
    let linter = run_linter(config, projects, args)?;
    let audit = linter.audit();
    let tables = audit.tables(audit_type.into());

    let mut rendered = String::new();
    for table in &tables {
        let body = render_table(table, format)?;
        if audit_type == AuditType::All {
            rendered.push_str(&format!("# {}\n{}\n\n", table.title, body));
        } else {
            rendered.push_str(&body);
        }
    }

    println!("{}", rendered);
    if let Some(path) = output_file {
        std::fs::write(path, &rendered)?;
        tracing::info!("Audit saved to {}", path.display());
    }
    Ok(())
}

fn render_table(table: &AuditTable, format: AuditFormat) -> Result<String> {
    match format {
        AuditFormat::Md => Ok(table.to_markdown()),
        AuditFormat::Csv => {
            let mut writer = csv::Writer::from_writer(Vec::new());
            writer.write_record(&table.headers)?;
            for row in &table.rows {
                writer.write_record(row)?;
            }
            let bytes = writer.into_inner().map_err(|e| e.into_error())?;
            Ok(String::from_utf8(bytes)?.trim_end().to_string())
        }
    }
}

fn result_line(result: &LintResult) -> String {
    format!(
        "{} | `{}` {}",
        result.opinion_code,
        result.file.path.display(),
        result.message
    )
}

fn print_lint_results(results: &[LintResult], exit_code: i32) {
    println!("\n{}", "=".repeat(60).bright_blue());
    println!("{}", "Dbt-opiner lint results".bold().bright_blue());
    println!("{}", "=".repeat(60).bright_blue());
    println!();

    for result in results.iter().filter(|r| !r.passed) {
        match result.severity {
            Severity::Must => println!("{} {}", "❌".red(), result_line(result).red()),
            Severity::Should => println!("{} {}", "⚠️".yellow(), result_line(result).yellow()),
        }
    }
    for result in results.iter().filter(|r| r.passed) {
        tracing::debug!("{}", result_line(result));
    }

    if exit_code == 0 {
        println!("{}", "✅ All opinions passed!".green().bold());
    }
    println!();
}

fn print_report_summary(report: &Report) {
    println!("{}", "Summary:".bold());
    println!("  Results:         {}", report.summary.total);
    println!("  Files checked:   {}", report.summary.files_checked);
    println!("  Passed:          {}", format!("{}", report.summary.passed).green());

    if report.summary.must_failures > 0 {
        println!("  Must failures:   {}", format!("{}", report.summary.must_failures).red().bold());
    } else {
        println!("  Must failures:   {}", format!("{}", report.summary.must_failures).green());
    }

    if report.summary.should_failures > 0 {
        println!("  Should failures: {}", format!("{}", report.summary.should_failures).yellow());
    } else {
        println!("  Should failures: {}", format!("{}", report.summary.should_failures).green());
    }
    println!();
}

/// Markdown lint report, one line per failure
fn generate_markdown_report(results: &[LintResult], exit_code: i32) -> String {
    let mut md = String::new();

    md.push_str("# ✨ Dbt-opiner lint results\n\n");
    for result in results.iter().filter(|r| !r.passed) {
        let marker = match result.severity {
            Severity::Must => "❌",
            Severity::Should => "⚠️",
        };
        md.push_str(&format!("- {} {}\n", marker, result_line(result)));
    }

    if exit_code == 0 {
        md.push_str("✅ All opinions passed!\n");
    }

    md
}
