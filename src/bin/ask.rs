//! Interactive front-end: reads one news headline per line from stdin and
//! prints the most likely sentiment.
//!
//! ```text
//! finmood-ask <model-dir | model.tar.gz>
//! ```
//!
//! A packed artifact is unpacked next to itself on first use and reused
//! afterwards.

use anyhow::{Context, Result};
use finmood::handler::{self, Answer};
use std::io::{BufRead, IsTerminal, Write};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let model_dir = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "model".to_string());
    let pipeline = handler::load_model(&model_dir)
        .await
        .with_context(|| format!("failed to load model from {model_dir}"))?;

    println!("FinMood: predicts the sentiment of a news article on the stock market.");
    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();
    let color = stdout.is_terminal();
    loop {
        print!("Enter the finance news below: ");
        stdout.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        match handler::answer(&line, &pipeline) {
            Answer::Empty => println!("Please enter a finance news."),
            Answer::Verdict(verdict) => println!("{}", verdict.render(color)),
            Answer::Failed(e) => println!("Could not classify this news: {e}"),
        }
    }

    Ok(())
}
