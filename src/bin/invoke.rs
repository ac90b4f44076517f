//! Sends sample texts to a running endpoint and prints the answer.
//!
//! ```text
//! finmood-invoke <url> [text] [--batch]
//! ```

use anyhow::{bail, Context, Result};
use finmood::handler::{decode_response, JSON_CONTENT_TYPE};
use finmood::{ClassificationResponse, Verdict};
use serde_json::json;
use std::io::IsTerminal;

const DEFAULT_TEXT: &str = "I really enjoyed this product, it works great!";

const DEFAULT_BATCH: [&str; 3] = [
    DEFAULT_TEXT,
    "The service was terrible and the staff was rude.",
    "This is neither good nor bad, just average.",
];

const BATCH_FILLERS: [&str; 2] = [
    "This is another example sentence.",
    "A third sample for testing.",
];

struct Args {
    url: String,
    text: Option<String>,
    batch: bool,
}

fn parse_args() -> Result<Args> {
    let mut url = None;
    let mut text = None;
    let mut batch = false;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--batch" => batch = true,
            _ if url.is_none() => url = Some(arg),
            _ if text.is_none() => text = Some(arg),
            _ => bail!("unexpected argument '{arg}'"),
        }
    }
    let Some(url) = url else {
        bail!("usage: finmood-invoke <url> [text] [--batch]");
    };
    Ok(Args { url, text, batch })
}

fn payload(text: Option<&str>, batch: bool) -> serde_json::Value {
    match (text, batch) {
        (Some(text), true) => {
            let mut inputs = vec![text];
            inputs.extend(BATCH_FILLERS);
            json!({ "inputs": inputs })
        }
        (None, true) => json!({ "inputs": DEFAULT_BATCH }),
        (text, false) => json!({ "inputs": text.unwrap_or(DEFAULT_TEXT) }),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = parse_args()?;
    let payload = payload(args.text.as_deref(), args.batch);
    if let Some(inputs) = payload["inputs"].as_array() {
        println!("Testing endpoint with batch of {} texts...", inputs.len());
    }

    let endpoint = format!("{}/invocations", args.url.trim_end_matches('/'));
    let response = reqwest::Client::new()
        .post(&endpoint)
        .header(reqwest::header::CONTENT_TYPE, JSON_CONTENT_TYPE)
        .header(reqwest::header::ACCEPT, JSON_CONTENT_TYPE)
        .json(&payload)
        .send()
        .await
        .with_context(|| format!("failed to reach {endpoint}"))?;

    let status = response.status();
    let body = response.bytes().await?;
    if !status.is_success() {
        bail!(
            "endpoint answered {status}: {}",
            String::from_utf8_lossy(&body)
        );
    }

    let value: serde_json::Value = serde_json::from_slice(&body)?;
    println!("\nEndpoint Response:");
    println!("{}", serde_json::to_string_pretty(&value)?);

    if let ClassificationResponse::Single(record) = decode_response(&body)? {
        let verdict = Verdict::from_record(&record)?;
        println!("\n{}", verdict.render(std::io::stdout().is_terminal()));
    }

    Ok(())
}
