use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use samplesync_lib::events::RecvError;
use samplesync_lib::sync_engine::{AudioAction, EntryErrorKind, ReconcileReport};
use samplesync_lib::{
    build_scheduler, logging, webhook, ConfigStore, CycleOutcome, EventBus, RemoteId, SyncHistory, SyncNotification,
    SyncSession,
};

#[derive(Parser)]
#[command(name = "sync-cli")]
#[command(about = "Mirror your sample collections into a local folder", long_about = None)]
struct Cli {
    /// Config file (defaults to the platform config dir)
    #[arg(long, env = "SAMPLESYNC_CONFIG")]
    config: Option<PathBuf>,

    #[arg(short, long)]
    user: Option<String>,

    /// Download folder
    #[arg(short, long)]
    root: Option<PathBuf>,

    /// Sync a single post and exit
    #[arg(long)]
    post_id: Option<String>,

    /// Run one forced cycle and exit
    #[arg(long)]
    once: bool,

    #[arg(short = 'n', long)]
    dry_run: bool,

    /// Print the sync history and exit
    #[arg(long)]
    history: bool,

    #[arg(long)]
    webhook_port: Option<u16>,

    #[arg(long)]
    log_level: Option<String>,
}

fn print_report(report: &ReconcileReport) {
    println!("📊 Results:");
    println!("   Downloaded: {}", report.downloaded);
    println!("   Moved: {}", report.relocated);
    println!("   Deleted: {}", report.deleted);
    println!("   Images downloaded: {}", report.images_downloaded);
    println!("   Images deleted: {}", report.images_deleted);
    if report.torn_down {
        println!("   Download folder cleared (no remote entries)");
    }
    for skipped in &report.skipped {
        eprintln!("   ⏭️  Skipped: {}", skipped.message);
    }
    if !report.errors.is_empty() {
        println!("   Errors: {}", report.errors.len());
        for error in &report.errors {
            let kind_str = match error.kind {
                EntryErrorKind::DownloadFailed => "Download Failed",
                EntryErrorKind::RelocateFailed => "Move Failed",
                EntryErrorKind::DeleteFailed => "Delete Failed",
                EntryErrorKind::ImageFailed => "Image Failed",
                EntryErrorKind::InvalidEntry => "Invalid Entry",
                EntryErrorKind::Other => "Error",
            };
            eprintln!("   ⚠️  [{}] {:?}: {}", kind_str, error.path, error.message);
        }
    }
}

fn spinner(message: &str) -> anyhow::Result<ProgressBar> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")?);
    pb.enable_steady_tick(Duration::from_millis(120));
    pb.set_message(message.to_string());
    Ok(pb)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = ConfigStore::resolve_path(cli.config.clone());
    let store = Arc::new(ConfigStore::load(&config_path));
    let mut settings = store.snapshot();
    settings.apply_env();
    if let Some(port) = cli.webhook_port {
        settings.webhook_port = Some(port);
    }
    if let Some(level) = &cli.log_level {
        settings.log_level = level.clone();
    }
    logging::init_tracing(&settings.log_level)?;

    // Flags override the persisted target.
    let session = match (cli.user.clone().or(settings.user_id.clone()), cli.root.clone().or(settings.download_dir.clone())) {
        (Some(user), Some(root)) => Some(SyncSession::new(user, root)),
        _ => None,
    };

    let bus = EventBus::default();
    let scheduler = Arc::new(build_scheduler(store, &settings, bus.clone())?);

    if cli.history {
        let history = match &session {
            Some(session) => SyncHistory::for_root(&session.download_root, settings.history_limit).read(),
            None => Vec::new(),
        };
        println!("{}", serde_json::to_string_pretty(&history)?);
        return Ok(());
    }

    let session = session.ok_or_else(|| anyhow::anyhow!("Missing sync target: pass --user and --root (or configure them)"))?;

    if cli.dry_run {
        println!("🔍 Dry-run mode - comparing with remote collections...");
        println!("   User: {}", session.user_id);
        println!("   Folder: {:?}", session.download_root);
        println!();

        let plan = scheduler.plan(&session).await?;
        println!("   Files to download: {}", plan.downloads());
        println!("   Files to move: {}", plan.relocations());
        println!("   Images to download: {}", plan.image_downloads());
        println!("   Files to delete: {}", plan.stale_files.len());
        println!("   Images to delete: {}", plan.stale_images.len());
        if plan.teardown {
            println!("   Folder would be cleared (no remote entries)");
        }
        println!();

        for entry in &plan.entries {
            match &entry.audio {
                AudioAction::Keep => {}
                AudioAction::Download => println!("   ➕ {:?}", entry.target),
                AudioAction::Relocate { from } => println!("   🔀 {:?} -> {:?}", from, entry.target),
            }
        }
        for path in plan.stale_files.iter().chain(&plan.stale_images) {
            println!("   ❌ {path:?}");
        }
        for invalid in &plan.invalid {
            println!("   ⏭️  {}", invalid.message);
        }
        if plan.is_noop() {
            println!("✅ Folder is in sync!");
        }
        return Ok(());
    }

    if let Some(post_id) = &cli.post_id {
        let pb = spinner(&format!("Syncing post {post_id}..."))?;
        match scheduler
            .sync_single_entry(&session.user_id, &RemoteId::new(post_id.as_str()), &session.download_root)
            .await
        {
            Ok(report) => {
                pb.finish_with_message("✅ Done");
                print_report(&report);
            }
            Err(e) => {
                pb.abandon_with_message("❌ Sync failed");
                eprintln!("❌ Error: {e}");
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    if cli.once {
        scheduler.config().set_target(&session)?;
        let pb = spinner("Synchronizing...")?;
        match scheduler.sync_now().await? {
            CycleOutcome::Synced(report) => {
                pb.finish_with_message("✅ Synchronization complete!");
                print_report(&report);
                if !report.is_clean() {
                    std::process::exit(1);
                }
            }
            CycleOutcome::Failed(e) => {
                pb.abandon_with_message("❌ Synchronization failed!");
                eprintln!("❌ Error: {e}");
                std::process::exit(1);
            }
            CycleOutcome::Skipped | CycleOutcome::Unchanged => pb.finish_with_message("✅ Nothing to synchronize!"),
        }
        return Ok(());
    }

    println!("🚀 Watching remote collections for {}", session.user_id);
    println!("   Folder: {:?}", session.download_root);
    println!("   Interval: {}s", settings.poll_interval_secs);

    let shutdown = CancellationToken::new();
    if let Some(port) = settings.webhook_port {
        let scheduler = scheduler.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = webhook::serve(port, scheduler, shutdown).await {
                tracing::error!("Webhook server stopped: {}", e);
            }
        });
        println!("   Webhook: http://127.0.0.1:{port}/webhook");
    }

    let mut rx = bus.subscribe();
    scheduler.start(session)?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("👋 Stopping...");
                break;
            }
            notification = rx.recv() => match notification {
                Ok(SyncNotification::FilesChanged { audio_path: Some(path), .. }) => println!("   ⬇️  {path:?}"),
                Ok(SyncNotification::CycleCompleted { summary }) if summary.errors > 0 => {
                    eprintln!("   ⚠️  Cycle finished with {} error(s), retrying next tick", summary.errors);
                }
                Ok(SyncNotification::CycleFailed { message, .. }) => eprintln!("   ❌ {message}"),
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            },
        }
    }

    scheduler.stop();
    shutdown.cancel();
    Ok(())
}
