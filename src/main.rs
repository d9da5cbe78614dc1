use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};

mod app;
mod cipher;
mod error;
mod history;
mod manager;
mod model;
mod output;
mod reader;
mod ssh;
mod storage;

use app::App;
use ssh::Ssh2Connector;
use storage::AppPaths;

const TICK_RATE: Duration = Duration::from_millis(33);

fn main() -> Result<()> {
    let paths = AppPaths::resolve()?;
    app::logging::init_tracing(&paths.log)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting");

    let mut app = App::load(paths, Arc::new(Ssh2Connector), io::stdout())?;

    enable_raw_mode().context("enable raw mode")?;
    app.start();
    let result = run_app(&mut app);
    disable_raw_mode().ok();

    app.shutdown();
    println!();
    if let Err(err) = &result {
        tracing::error!(error = ?err, "exited with error");
    }
    result
}

fn run_app<W: Write>(app: &mut App<W>) -> Result<()> {
    loop {
        if event::poll(TICK_RATE)? {
            if let Event::Key(key) = event::read()? {
                if key.kind != KeyEventKind::Release {
                    let ctrl_c = key.modifiers.contains(KeyModifiers::CONTROL)
                        && matches!(key.code, KeyCode::Char('c'));
                    if ctrl_c || app.handle_key(key)? {
                        return Ok(());
                    }
                }
            }
        }

        app.poll_connects();
        app.pump_output();
    }
}
