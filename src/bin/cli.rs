use anyhow::{anyhow, bail, Context};
use ekyc_session::config::SessionConfig;
use ekyc_session::identity::{EntryParams, SessionIdentity};
use ekyc_session::server::{self, FsObjectStore, ObjectStore};
use ekyc_session::testing::{drive_synthetic_feed, SyntheticMediaDevices};
use ekyc_session::upload::UploadStatus;
use ekyc_session::{EkycRoom, LocalRendezvous};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    ekyc_session::init_logging();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: ekyc-cli <resolve|config|demo> [args]");
        std::process::exit(1);
    }

    let command = &args[1];
    match command.as_str() {
        "resolve" => cmd_resolve(&args),
        "config" => cmd_config(&args),
        "demo" => cmd_demo(&args).await,
        _ => {
            eprintln!("Unknown command: {}", command);
            std::process::exit(1);
        }
    }
}

fn cmd_resolve(args: &[String]) -> anyhow::Result<()> {
    // resolve [--admin] <ekyc_code> <applicant_id> [--json]
    let mut admin = false;
    let mut json = false;
    let mut positional = Vec::new();
    for arg in &args[2..] {
        match arg.as_str() {
            "--admin" => admin = true,
            "--json" => json = true,
            _ => positional.push(arg.clone()),
        }
    }

    let ekyc_code = positional.first().cloned().unwrap_or_default();
    let applicant_id = positional.get(1).cloned().unwrap_or_default();
    let params = if admin {
        EntryParams::admin(ekyc_code, applicant_id)
    } else {
        EntryParams::applicant(applicant_id, ekyc_code)
    };

    let identity = SessionIdentity::resolve(&params);
    if json {
        println!("{}", serde_json::to_string(&identity)?);
    } else if identity.is_resolved() {
        println!("{} -> {}", identity.role, identity.local_peer_id);
    } else {
        println!("{} -> (unresolved, will not register)", identity.role);
    }
    Ok(())
}

fn cmd_config(args: &[String]) -> anyhow::Result<()> {
    // config [--path <file>] [--write]
    let mut path = SessionConfig::default_path();
    let mut write = false;

    let mut i = 2;
    while i < args.len() {
        match args[i].as_str() {
            "--path" => {
                i += 1;
                path = PathBuf::from(args.get(i).ok_or_else(|| anyhow!("--path needs a value"))?);
            }
            "--write" => write = true,
            other => bail!("Unknown option: {}", other),
        }
        i += 1;
    }

    if write {
        SessionConfig::default().save_to_file(&path)?;
        println!("Wrote default configuration to {}", path.display());
        return Ok(());
    }

    let config = SessionConfig::load_from_file(&path)?;
    print!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

async fn cmd_demo(args: &[String]) -> anyhow::Result<()> {
    // demo [--chunks <n>] [--config <file>] [--json]
    let mut chunks = 10u64;
    let mut config_path = None;
    let mut json = false;

    let mut i = 2;
    while i < args.len() {
        match args[i].as_str() {
            "--chunks" => {
                i += 1;
                chunks = args
                    .get(i)
                    .ok_or_else(|| anyhow!("--chunks needs a value"))?
                    .parse()?;
            }
            "--config" => {
                i += 1;
                config_path = Some(PathBuf::from(
                    args.get(i).ok_or_else(|| anyhow!("--config needs a value"))?,
                ));
            }
            "--json" => json = true,
            other => bail!("Unknown option: {}", other),
        }
        i += 1;
    }

    let mut config = match config_path {
        Some(path) => SessionConfig::load_from_file(path)?,
        None => SessionConfig::load_or_default(),
    };
    config.media.width = 320;
    config.media.height = 240;

    // Local storage endpoints on an ephemeral port
    let store: Arc<dyn ObjectStore> = Arc::new(FsObjectStore::new(&config.server.storage_dir));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .context("failed to bind demo upload server")?;
    let addr = listener.local_addr()?;
    let app = server::router(store, &config.server);
    let server_task = tokio::spawn(async move { axum::serve(listener, app).await });
    config.upload.base_url = format!("http://{}", addr);

    let rendezvous = Arc::new(LocalRendezvous::new());
    let mut applicant = EkycRoom::open(
        config.clone(),
        &EntryParams::applicant("APP7", "SESSION42"),
        rendezvous.clone(),
        Arc::new(SyntheticMediaDevices::new()),
    )
    .await?;
    let mut admin = EkycRoom::open(
        config.clone(),
        &EntryParams::admin("SESSION42", "APP7"),
        rendezvous.clone(),
        Arc::new(SyntheticMediaDevices::new()),
    )
    .await?;
    println!(
        "Registered admin as {:?}, applicant as {:?}",
        admin.peer_id(),
        applicant.peer_id()
    );

    admin.call("APP7").await?;
    println!("Admin call state: {}", admin.call_state().await);

    let applicant_camera = applicant
        .local_stream()
        .await
        .ok_or_else(|| anyhow!("applicant has no local stream"))?;
    let feed = drive_synthetic_feed(applicant_camera, Duration::from_millis(20), 4096);

    admin.start_recording().await?;
    tokio::time::sleep(Duration::from_millis(20 * chunks)).await;
    let recording = admin.stop_recording().await?;
    let screenshot = admin.capture_screenshot().await?;

    let mut results = Vec::new();
    if let Some(task) = recording {
        results.push((task.kind(), task.wait().await));
    }
    results.push((screenshot.kind(), screenshot.wait().await));

    admin.hang_up().await?;
    applicant.teardown().await?;
    admin.teardown().await?;
    let published = feed.await?;
    server_task.abort();

    if json {
        let report: Vec<_> = results
            .iter()
            .map(|(kind, status)| serde_json::json!({ "kind": kind, "status": status }))
            .collect();
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Applicant camera published {} chunks", published);
        for (kind, status) in &results {
            match status {
                UploadStatus::Succeeded(receipt) => println!("{}: {}", kind, receipt.message),
                other => println!("{}: {:?}", kind, other),
            }
        }
    }
    Ok(())
}
