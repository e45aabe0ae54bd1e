//! CLI smoke entry point.
//!
//! Publishes one note end to end: local change, SQLite save, simulated
//! remote acknowledgment through the update pump, callback.
//!
//! Flags: `--db <path>`, `--sweep-ms <n>`, `--log-dir <abs path>`,
//! `--log-level <level>`.

use notepub_core::{
    init_logging, spawn_update_pump, LogLevel, Note, PublishConfig, PublishController,
    PublishRequest, SqliteNoteStore,
};
use std::error::Error;
use std::process::ExitCode;
use std::sync::{mpsc, Arc};

#[derive(Debug, Default)]
struct CliArgs {
    db: Option<String>,
    sweep_ms: Option<u64>,
    log_dir: Option<String>,
    log_level: Option<String>,
}

fn parse_args(args: impl Iterator<Item = String>) -> Result<CliArgs, String> {
    let mut parsed = CliArgs::default();
    let mut args = args;
    while let Some(flag) = args.next() {
        let mut value = || {
            args.next()
                .ok_or_else(|| format!("missing value for `{flag}`"))
        };
        match flag.as_str() {
            "--db" => parsed.db = Some(value()?),
            "--sweep-ms" => {
                let raw = value()?;
                parsed.sweep_ms = Some(
                    raw.parse()
                        .map_err(|_| format!("`--sweep-ms` expects an integer, got `{raw}`"))?,
                );
            }
            "--log-dir" => parsed.log_dir = Some(value()?),
            "--log-level" => parsed.log_level = Some(value()?),
            other => return Err(format!("unknown flag `{other}`")),
        }
    }
    Ok(parsed)
}

fn run(args: CliArgs) -> Result<(), Box<dyn Error>> {
    if let Some(log_dir) = args.log_dir.as_deref() {
        let level = args
            .log_level
            .unwrap_or_else(|| LogLevel::build_default().to_string());
        init_logging(&level, log_dir)?;
    }

    let store = match args.db.as_deref() {
        Some(path) => SqliteNoteStore::open(path)?,
        None => SqliteNoteStore::open_in_memory()?,
    };
    let config = match args.sweep_ms {
        Some(ms) => PublishConfig::from_millis(ms)?,
        None => PublishConfig::default(),
    };
    let controller = Arc::new(PublishController::builder(store).config(config).build()?);

    let (update_tx, update_rx) = mpsc::channel::<String>();
    let pump = spawn_update_pump(update_rx, controller.clone())?;

    let (done_tx, done_rx) = mpsc::channel();
    let mut note = Note::new("hello from notepub");
    let outcome = controller.request_state_change(&mut note, true, move |acked| {
        let _ = done_tx.send(acked.published);
    })?;
    println!("notepub request key={} outcome={outcome:?}", note.key);

    if outcome != PublishRequest::Unchanged {
        // Stand-in for the sync engine observing the remote write.
        update_tx.send(note.key.clone())?;
    }
    drop(update_tx);

    match done_rx.recv_timeout(config.sweep_interval) {
        Ok(published) => println!("notepub resolved key={} published={published}", note.key),
        Err(_) => println!("notepub unresolved key={} (timed out)", note.key),
    }

    let delivered = pump
        .join()
        .map_err(|_| "update pump thread panicked".to_string())?;
    let persisted = controller.store().get(&note.key)?;
    println!(
        "notepub persisted={} delivered={delivered} stats={:?}",
        persisted.is_some_and(|stored| stored.published),
        controller.stats()
    );
    println!("notepub_core version={}", notepub_core::core_version());
    Ok(())
}

fn main() -> ExitCode {
    let args = match parse_args(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(err) => {
            eprintln!("notepub: {err}");
            return ExitCode::from(2);
        }
    };

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("event=cli_run module=cli status=error error={err}");
            eprintln!("notepub: {err}");
            ExitCode::FAILURE
        }
    }
}
