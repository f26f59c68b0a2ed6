// ABOUTME: Simple interactive REPL for testing valet-agent backends.
// ABOUTME: Usage: agent-repl [config-path | claude | gemini | mock]

use anyhow::Result;
use std::io::{self, BufRead, Write};
use std::path::Path;
use std::sync::Arc;
use valet_agent::{
    BackendCatalog, BackendRegistry, Config, DispatchQueue, Message, PromptContext,
};

fn print_help() {
    println!();
    println!("Commands:");
    println!("  /status   - Show the backend roster");
    println!("  /health   - Re-run health checks");
    println!("  /model X  - Switch the active backend's model");
    println!("  /quit     - Exit the REPL");
    println!("  /help     - Show this help");
    println!();
    println!("Type anything else to send as a prompt.");
    println!();
}

fn build_registry(arg: &str) -> Result<BackendRegistry> {
    let catalog = BackendCatalog::default();

    if Path::new(arg).exists() {
        let config = Config::from_file(Path::new(arg))?;
        return BackendRegistry::from_config(&catalog, &config);
    }

    let registry = BackendRegistry::new();
    let backend = catalog.create(arg, &serde_json::json!({}))?;
    registry.register(arg, backend, 0)?;
    Ok(registry)
}

fn print_status(registry: &BackendRegistry) {
    for status in registry.status() {
        let marker = if status.active { "*" } else { " " };
        let health = if status.healthy { "healthy" } else { "unhealthy" };
        let mut line = format!(
            " {} {} (priority {}, {})",
            marker, status.name, status.priority, health
        );
        if !status.last_error.is_empty() {
            line.push_str(&format!(" - {}", status.last_error));
        }
        println!("{}", line);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let arg = std::env::args().nth(1).unwrap_or_else(|| "mock".to_string());

    let registry = Arc::new(build_registry(&arg)?);
    registry.health_check_all().await;
    print_status(&registry);

    let queue = DispatchQueue::new(
        registry.clone(),
        Arc::new(|_conversation, text, error, elapsed| {
            match error {
                Some(error) => {
                    if !text.is_empty() {
                        println!("{}", text);
                    }
                    println!("error after {:.1}s: {}", elapsed.as_secs_f64(), error);
                }
                None => println!("{}", text),
            }
            print!("> ");
            io::stdout().flush().ok();
        }),
    );
    queue.set_long_running_threshold(std::time::Duration::from_secs(10));
    queue.set_long_running_handler(Arc::new(|elapsed, preview| {
        if preview.is_empty() {
            println!("(still working after {:.0}s...)", elapsed.as_secs_f64());
        } else {
            println!(
                "(still working after {:.0}s: {})",
                elapsed.as_secs_f64(),
                preview
            );
        }
    }));

    print_help();
    print!("> ");
    io::stdout().flush().ok();

    let stdin = io::stdin();
    let mut conversation = 0i64;
    for line in stdin.lock().lines() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            print!("> ");
            io::stdout().flush().ok();
            continue;
        }

        match trimmed {
            "/quit" | "/q" => break,
            "/help" => {
                print_help();
            }
            "/status" => {
                print_status(&registry);
            }
            "/health" => {
                registry.health_check_all().await;
                print_status(&registry);
            }
            _ if trimmed.starts_with("/model") => {
                let model = trimmed.trim_start_matches("/model").trim();
                match registry.active_backend().and_then(|b| {
                    b.model_switch().map(|switch| {
                        if model.is_empty() {
                            Ok(switch.current_model())
                        } else {
                            switch.set_model(model).map(|_| model.to_string())
                        }
                    })
                }) {
                    Some(Ok(model)) => println!("model: {}", model),
                    Some(Err(e)) => println!("error: {}", e),
                    None => println!("active backend has no model switching"),
                }
            }
            prompt => {
                conversation += 1;
                queue.enqueue(PromptContext::new(), Message::text(conversation, prompt));
                continue;
            }
        }
        print!("> ");
        io::stdout().flush().ok();
    }

    registry.close_all().await?;
    Ok(())
}
