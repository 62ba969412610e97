//! Tandem CLI
//!
//! Demonstration and stress driver for the tandem bridge, running two
//! peers against an in-process loopback engine.
//!
//! ## Usage
//!
//! ```bash
//! # Walk two peers through sharing and editing one buffer
//! tandem demo
//!
//! # Same, pausing for Enter between acts
//! tandem demo --interactive
//!
//! # Randomized interleaved edits from both peers, then a convergence check
//! tandem churn --edits 200 --seed 7
//! ```

use std::ops::Range;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tandem_core::{
    text, AdapterClient, AdapterHandle, BridgeError, BridgeResult, BufferController, MemoryHub,
    Session, SessionConfig, SurfaceEdit, SurfacePosition, TextSurface,
};
use tokio::io::AsyncBufReadExt;

/// Tandem - collaborative buffer bridge
#[derive(Parser)]
#[command(name = "tandem")]
#[command(version)]
#[command(about = "Tandem - collaborative buffer bridge demo driver")]
struct Cli {
    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Walk two peers through sharing and editing one buffer
    Demo {
        /// Pause for Enter between acts
        #[arg(long)]
        interactive: bool,
    },
    /// Randomized interleaved edits from both peers, then a convergence check
    Churn {
        /// Edits issued per peer
        #[arg(long, default_value_t = 100)]
        edits: usize,
        /// RNG seed
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let directive = match cli.verbose {
        0 => "tandem_core=info,tandem_cli=info",
        1 => "tandem_core=debug,tandem_cli=debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| directive.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Demo { interactive } => match demo(interactive).await {
            // A dismissed prompt silently aborts the run.
            Err(BridgeError::Cancelled) => Ok(()),
            Err(e) => Err(e.into()),
            Ok(()) => Ok(()),
        },
        Commands::Churn { edits, seed } => churn(edits, seed).await,
    }
}

// ============================================================================
// demo
// ============================================================================

/// Host surface that narrates what the bridge does to it.
#[derive(Clone, Default)]
struct ConsoleSurface {
    name: &'static str,
    state: Arc<Mutex<(String, Option<AdapterClient>)>>,
}

impl ConsoleSurface {
    fn with_text(name: &'static str, t: &str) -> Self {
        Self {
            name,
            state: Arc::new(Mutex::new((t.to_string(), None))),
        }
    }

    fn wire(&self, client: AdapterClient) {
        self.state.lock().unwrap().1 = Some(client);
    }

    fn text(&self) -> String {
        self.state.lock().unwrap().0.clone()
    }

    /// Simulate the user typing one edit.
    fn type_edit(&self, edit: SurfaceEdit) {
        let client = {
            let mut state = self.state.lock().unwrap();
            state.0 = text::splice(&state.0, edit.span.start, edit.span.end, &edit.text);
            state.1.clone()
        };
        if let Some(client) = client {
            client.notify_edits(vec![edit]);
        }
    }
}

impl TextSurface for ConsoleSurface {
    fn content(&self) -> String {
        self.text()
    }

    fn replace(&mut self, span: Range<usize>, new_text: &str) -> BridgeResult<()> {
        let client = {
            let mut state = self.state.lock().unwrap();
            state.0 = text::splice(&state.0, span.start, span.end, new_text);
            state.1.clone()
        };
        println!(
            "  [{}] bridge replaced chars {}..{} with {:?}",
            self.name, span.start, span.end, new_text
        );
        if let Some(client) = client {
            client.notify_edits(vec![SurfaceEdit::replace(span, new_text)]);
        }
        Ok(())
    }

    fn render_cursor(&mut self, user: &str, _anchor: SurfacePosition, position: SurfacePosition) {
        println!(
            "  [{}] {} is at line {}, column {}",
            self.name, user, position.row, position.col
        );
    }
}

/// Wait for Enter; EOF counts as a dismissed prompt.
async fn pause(interactive: bool) -> Result<(), BridgeError> {
    if !interactive {
        return Ok(());
    }
    println!("  (Enter to continue)");
    let mut line = String::new();
    let mut stdin = tokio::io::BufReader::new(tokio::io::stdin());
    match stdin.read_line(&mut line).await {
        Ok(0) => Err(BridgeError::Cancelled),
        Ok(_) => Ok(()),
        Err(e) => Err(BridgeError::Surface(e.to_string())),
    }
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(150)).await;
}

async fn demo(interactive: bool) -> Result<(), BridgeError> {
    let hub = MemoryHub::spawn();

    println!("== act 1: alice shares a buffer");
    let alice = Session::connect(&hub, SessionConfig::new("alice", hub.address())).await?;
    alice.create("notes.txt", "Shopping:\n- apples\n").await?;
    let a_ctrl = alice.attach("notes.txt").await?;
    let a_cursors = alice.listen()?;

    let surface = ConsoleSurface::with_text("alice", &a_ctrl.content());
    let adapter = AdapterHandle::bind(a_ctrl.clone(), Some(a_cursors), surface.clone());
    surface.wire(adapter.client());
    println!("  [alice] sharing notes.txt:\n{}", indent(&surface.text()));
    pause(interactive).await?;

    println!("== act 2: bob joins and edits");
    let bob = Session::connect(&hub, SessionConfig::new("bob", hub.address())).await?;
    let b_ctrl = bob.attach("notes.txt").await?;
    let end = text::char_len(&b_ctrl.content());
    b_ctrl.apply(end, "- bread\n", end).await?;
    settle().await;
    println!("  [alice] now sees:\n{}", indent(&surface.text()));
    pause(interactive).await?;

    println!("== act 3: bob's cursor shows up");
    let b_cursors = bob.listen()?;
    b_cursors.send("notes.txt", (3, 0).into(), (3, 7).into()).await;
    settle().await;
    pause(interactive).await?;

    println!("== act 4: alice types back");
    let at = text::char_len(&surface.text());
    surface.type_edit(SurfaceEdit::insert(at, "- cheese\n"));
    settle().await;

    let audit = hub
        .audit("notes.txt")
        .await
        .ok_or_else(|| BridgeError::Engine("buffer vanished".to_string()))?;
    println!("  engine log: {} edits at revision {}", audit.log.len(), audit.rev);
    println!("  converged:\n{}", indent(&audit.content));

    if surface.text() != audit.content || b_ctrl.content() != audit.content {
        return Err(BridgeError::Engine(
            "peers failed to converge".to_string(),
        ));
    }
    println!("== all views converged");

    adapter.shutdown().await;
    Ok(())
}

fn indent(text: &str) -> String {
    text.lines()
        .map(|line| format!("      {}", line))
        .collect::<Vec<_>>()
        .join("\n")
}

// ============================================================================
// churn
// ============================================================================

/// Issue `edits` random in-bounds edits against the controller's evolving
/// converged content, tolerating conflicts from racing commits.
async fn churn_peer(controller: BufferController, edits: usize, seed: u64) -> (usize, usize) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut committed = 0;
    let mut conflicts = 0;

    for _ in 0..edits {
        let content = controller.content();
        let len = text::char_len(&content);
        let start = rng.random_range(0..=len);
        let end = rng.random_range(start..=len.min(start + 5));
        let snippet: String = (0..rng.random_range(0..3usize))
            .map(|_| rng.random_range('a'..='z'))
            .collect();
        if start == end && snippet.is_empty() {
            continue;
        }

        match controller.apply(start, &snippet, end).await {
            Ok(_) => committed += 1,
            Err(BridgeError::ApplyConflict(_)) => {
                // A peer's commit landed between our content() read and
                // the engine's bounds check; skip, the next read is fresh.
                conflicts += 1;
            }
            Err(e) => {
                tracing::error!(error = %e, "churn edit failed");
                break;
            }
        }
    }
    (committed, conflicts)
}

async fn churn(edits: usize, seed: u64) -> Result<()> {
    let hub = MemoryHub::spawn();

    let alice = Session::connect(&hub, SessionConfig::new("alice", hub.address())).await?;
    let bob = Session::connect(&hub, SessionConfig::new("bob", hub.address())).await?;

    alice.create("churn.txt", "the quick brown fox\n").await?;
    let a_ctrl = alice.attach("churn.txt").await?;
    let b_ctrl = bob.attach("churn.txt").await?;

    let a_task = tokio::spawn(churn_peer(a_ctrl.clone(), edits, seed));
    let b_task = tokio::spawn(churn_peer(b_ctrl.clone(), edits, seed.wrapping_add(1)));
    let (a_stats, b_stats) = (a_task.await?, b_task.await?);

    // Let the last broadcasts drain, then compare all three views.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    let audit = loop {
        let audit = hub
            .audit("churn.txt")
            .await
            .ok_or_else(|| anyhow::anyhow!("buffer vanished"))?;
        if a_ctrl.rev() == audit.rev && b_ctrl.rev() == audit.rev {
            break audit;
        }
        if tokio::time::Instant::now() > deadline {
            bail!("peers never caught up to revision {}", audit.rev);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    };

    println!(
        "alice committed {} ({} conflicts), bob committed {} ({} conflicts)",
        a_stats.0, a_stats.1, b_stats.0, b_stats.1
    );
    println!(
        "engine at revision {} with {} chars",
        audit.rev,
        text::char_len(&audit.content)
    );

    if a_ctrl.content() != audit.content || b_ctrl.content() != audit.content {
        bail!("peers diverged from the engine");
    }
    println!("all views converged");
    Ok(())
}
