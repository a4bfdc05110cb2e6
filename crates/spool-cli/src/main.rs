use std::time::Duration;

use rand::Rng;
use spool_core::{BufferEvent, ProcessError, Processor, ProcessorConfig, blocking_handler_fn};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const HELP: &str = "commands: a | s | z = push to Sip1 | Sip2 | Sip3, c = clear processed, p = print counts, q = quit";

fn load_config() -> Result<ProcessorConfig, Box<dyn std::error::Error>> {
    match std::env::args().nth(1) {
        Some(path) => {
            let text = std::fs::read_to_string(&path)?;
            Ok(ProcessorConfig::from_json_str(&text)?)
        }
        None => Ok(ProcessorConfig::default()),
    }
}

/// 処理本体：2〜4 秒かかる同期処理（blocking pool で実行）
fn slow_work(n: u32) -> Result<(), ProcessError> {
    let ms = rand::thread_rng().gen_range(2000..=4000);
    std::thread::sleep(Duration::from_millis(ms));
    info!(n, ms, "work done");
    Ok(())
}

fn print_event(event: &BufferEvent) {
    match serde_json::to_string(event) {
        Ok(json) => println!("{json}"),
        Err(err) => warn!(error = %err, "event could not be encoded"),
    }
}

fn print_counts(processor: &Processor<u32>) {
    let subjects = processor.subjects();
    if subjects.is_empty() {
        println!("(no subjects yet)");
    }
    for subject in subjects {
        let c = processor.counts(subject.as_str());
        println!(
            "{subject}: waiting={} running={} processed={} failed={}",
            c.waiting, c.running, c.processed, c.failed
        );
    }
    println!(
        "running {}/{}",
        processor.running_count(),
        processor.concurrency_cap()
    );
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // (A) 設定と Processor
    let config = load_config()?;
    info!(?config, "starting spool console");
    let processor = Processor::<u32>::builder()
        .config(config)
        .handler(blocking_handler_fn(slow_work))
        .build()?;

    // (B) イベントを表示するタスク
    let mut events = processor.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => print_event(&event),
                Err(RecvError::Lagged(n)) => warn!(skipped = n, "event printer lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    // (C) 標準入力のコマンド
    println!("{HELP}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let subject = match line.trim() {
            "a" => "Sip1",
            "s" => "Sip2",
            "z" => "Sip3",
            "c" => {
                processor.clear_processed(None);
                println!("processed history cleared");
                continue;
            }
            "p" => {
                print_counts(&processor);
                continue;
            }
            "q" => break,
            "" => continue,
            other => {
                println!("unknown command {other:?}; {HELP}");
                continue;
            }
        };
        let payload = rand::thread_rng().gen_range(0..1000);
        if let Err(err) = processor.push(subject, payload) {
            warn!(error = %err, subject, "push rejected");
        }
    }

    processor.shutdown();
    printer.abort();
    Ok(())
}
