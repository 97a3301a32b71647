use anyhow::{bail, Result};
use chai::cli::{Cli, Commands};
use chai::utils::{self, Tone};
use chai::{open_store, ConversationStore, Message, MockResponder, Responder, Settings};
use clap::Parser;
use std::time::Instant;
use tokio::io::{self, AsyncBufReadExt, BufReader, Stdin};
use tracing_subscriber::EnvFilter;

type Input = BufReader<Stdin>;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let settings = Settings::new()?;
    init_tracing(&settings.logging.level);

    let mut storage = settings.storage.clone();
    cli.apply_overrides(&mut storage);
    let store = open_store(&storage).await?;

    let result = match cli.command {
        Commands::Chat { user, thread } => handle_chat(store.as_ref(), user, thread).await,
        Commands::Threads { user } => handle_threads(store.as_ref(), &user).await,
        Commands::Show { user, thread } => handle_show(store.as_ref(), &user, &thread).await,
        Commands::Delete { user, thread } => handle_delete(store.as_ref(), &user, &thread).await,
    };

    store.close().await?;

    result
}

// Logs go to stderr so they don't interleave with the chat transcript.
fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn read_input(reader: &mut Input, prompt: &str) -> Result<Option<String>> {
    utils::prompt(prompt)?;

    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim().to_string()))
}

async fn require_input(reader: &mut Input, prompt: &str) -> Result<String> {
    loop {
        match read_input(reader, prompt).await? {
            Some(value) if !value.is_empty() => return Ok(value),
            Some(_) => continue,
            None => bail!("Input closed before a value was entered"),
        }
    }
}

async fn handle_chat(
    store: &dyn ConversationStore,
    user: Option<String>,
    thread: Option<String>,
) -> Result<()> {
    utils::print_banner(
        "Welcome to Chai!",
        Some(&format!("Storage backend: {}", store.backend_name())),
    );

    let mut reader = BufReader::new(io::stdin());

    let user_id = match user {
        Some(user) => user,
        None => require_input(&mut reader, "Please enter your user ID to begin: ").await?,
    };

    let thread_name = match thread {
        Some(thread) => thread,
        None => select_thread(store, &mut reader, &user_id).await?,
    };

    run_chat(store, &mut reader, &user_id, &thread_name).await
}

async fn select_thread(store: &dyn ConversationStore, reader: &mut Input, user_id: &str) -> Result<String> {
    let threads: Vec<String> = store.list_user_threads(user_id).await?.into_iter().collect();

    if threads.is_empty() {
        return require_input(reader, "No threads found. Enter a name for your new thread: ").await;
    }

    utils::print_thread_menu(&threads);

    let choice = read_input(reader, "Select a thread number: ").await?.unwrap_or_default();
    match choice.parse::<usize>() {
        Ok(n) if (1..=threads.len()).contains(&n) => Ok(threads[n - 1].clone()),
        _ => require_input(reader, "Enter a name for your new thread: ").await,
    }
}

async fn run_chat(
    store: &dyn ConversationStore,
    reader: &mut Input,
    user_id: &str,
    thread_name: &str,
) -> Result<()> {
    let started = Instant::now();
    let mut history = store.get_conversation(user_id, thread_name).await?;
    let load_time = started.elapsed();

    if !history.is_empty() {
        println!("Previous conversation:");
        utils::print_transcript(&history, false);
        utils::print_timing("Load time", load_time);
    }

    println!("Conversation: '{}'. Type 'exit' to quit.\n", thread_name);

    let responder = MockResponder;
    loop {
        let Some(input) = read_input(reader, "> ").await? else {
            break;
        };
        if input.eq_ignore_ascii_case("exit") {
            break;
        }
        if input.is_empty() {
            continue;
        }

        let started = Instant::now();
        let message = Message::user(input);
        store.append_message(user_id, thread_name, message.clone()).await?;
        history.push(message);

        let reply = responder.respond(&history);
        store.append_message(user_id, thread_name, reply.clone()).await?;
        let elapsed = started.elapsed();

        println!("AI: {}", reply.content);
        utils::print_timing("Operation took", elapsed);
        history.push(reply);
    }

    utils::print_status(Tone::Success, "Goodbye!");
    Ok(())
}

async fn handle_threads(store: &dyn ConversationStore, user_id: &str) -> Result<()> {
    let threads = store.list_user_threads(user_id).await?;

    if threads.is_empty() {
        utils::print_status(Tone::Info, &format!("No threads found for '{}'", user_id));
        return Ok(());
    }

    utils::print_banner(&format!("Threads for {}", user_id), None);
    for thread in threads {
        println!("  {}", thread);
    }
    Ok(())
}

async fn handle_show(store: &dyn ConversationStore, user_id: &str, thread_name: &str) -> Result<()> {
    let messages = store.get_conversation(user_id, thread_name).await?;

    if messages.is_empty() {
        utils::print_status(
            Tone::Info,
            &format!("No messages in '{}' for '{}'", thread_name, user_id),
        );
        return Ok(());
    }

    utils::print_banner(&format!("{} / {}", user_id, thread_name), None);
    utils::print_transcript(&messages, true);
    Ok(())
}

async fn handle_delete(store: &dyn ConversationStore, user_id: &str, thread_name: &str) -> Result<()> {
    if store.delete_conversation(user_id, thread_name).await? {
        utils::print_status(Tone::Success, &format!("Deleted '{}' for '{}'", thread_name, user_id));
    } else {
        utils::print_status(
            Tone::Failure,
            &format!("No conversation '{}' for '{}'", thread_name, user_id),
        );
    }
    Ok(())
}
