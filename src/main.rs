use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use log::{info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use zap_inbox::api::models::{Direction, MediaKind};
use zap_inbox::api::realtime::RealtimeClient;
use zap_inbox::storage::Cache;
use zap_inbox::store::MessageEntry;
use zap_inbox::utils::format_timestamp;
use zap_inbox::{
    ApiClient, Backend, ComposeSlot, Config, Cooldown, Inbox, NoticeLevel, PollSchedule, RealtimeBridge,
    SendOrchestrator, SendOutcome, Update,
};

#[derive(Parser)]
#[command(name = "zap-inbox")]
#[command(about = "WhatsApp inbox from the terminal")]
struct Cli {
    /// Path to the TOML config file
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Skip the local cache
    #[arg(long)]
    no_cache: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List conversations, most recent first
    Conversations,

    /// List the organization's messaging instances
    Instances,

    /// Show the history of a conversation
    Messages { conversation_id: String },

    /// Send a text message
    Send { conversation_id: String, text: String },

    /// Send an image file
    SendImage {
        conversation_id: String,
        path: PathBuf,
        #[arg(long)]
        caption: Option<String>,
    },

    /// Send audio from a file holding a base64 data URL
    SendAudio { conversation_id: String, data_url_file: PathBuf },

    /// Follow live changes until Ctrl-C
    Watch { conversation_id: Option<String> },
}

fn print_entry(entry: &MessageEntry) {
    let m = &entry.message;
    let arrow = match m.direction {
        Direction::Inbound => "<",
        Direction::Outbound => ">",
    };
    println!(
        "{} {arrow} {} [{:?}]",
        format_timestamp(m.created_at),
        m.preview(),
        m.status
    );
}

async fn send(orchestrator: &SendOrchestrator, slot: &ComposeSlot) -> Result<()> {
    match orchestrator.submit(slot).await {
        Ok(SendOutcome::Sent { receipt, .. }) => {
            eprintln!("enviado ({})", receipt.provider_message_id.as_deref().unwrap_or("sem id"));
            Ok(())
        }
        Ok(SendOutcome::Skipped) => {
            eprintln!("nada para enviar");
            Ok(())
        }
        Err(notice) => {
            eprintln!("{}", notice.text);
            match notice.level {
                NoticeLevel::Info => Ok(()),
                NoticeLevel::Error => bail!("send failed"),
            }
        }
    }
}

async fn compose_slot(inbox: &Inbox, orchestrator: &SendOrchestrator, conversation_id: &str) -> Result<ComposeSlot> {
    inbox.refresh_conversations().await?;
    inbox.open_conversation(conversation_id).await?;
    let slot = orchestrator
        .slot_for(conversation_id)
        .await
        .with_context(|| format!("unknown conversation {conversation_id}"))??;
    Ok(slot)
}

async fn watch(config: &Config, inbox: Arc<Inbox>, conversation_id: Option<String>) -> Result<()> {
    inbox.warm_from_cache().await;
    inbox.refresh_conversations().await?;
    if let Some(id) = &conversation_id {
        inbox.open_conversation(id).await?;
        for entry in inbox.message_snapshot().await.iter() {
            print_entry(entry);
        }
    }

    let realtime = RealtimeClient::new(&config.base_url()?, &config.api_key, config.access_token.clone())?;
    let subscription = match realtime.subscribe(&config.organization_id).await {
        Ok(sub) => Some(sub),
        Err(e) => {
            warn!("realtime unavailable, polling only: {e}");
            None
        }
    };
    let (signals, _guard) = match subscription {
        Some(sub) => (Some(sub.signals), Some(sub.guard)),
        None => (None, None),
    };

    let schedule = PollSchedule::new(config.poll_interval(), config.poll_max_interval());
    let mut bridge = RealtimeBridge::new(inbox.clone(), schedule);
    let mut updates = bridge.subscribe_updates();
    let printer = tokio::spawn(async move {
        while let Some(update) = updates.recv().await {
            match update {
                Update::Appended(m) => println!("{} < {}", format_timestamp(m.created_at), m.preview()),
                Update::StatusChanged { message_id, status } => println!("{message_id}: {status:?}"),
                Update::ConversationsChanged => println!("(conversas atualizadas)"),
                Update::MessagesChanged => {}
            }
        }
    });

    info!("watching organization {}", config.organization_id);
    bridge
        .run(signals, async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await;
    printer.abort();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref()).context("loading config")?;
    config.validate().context("invalid config")?;

    let client = ApiClient::new(&config)?;
    let mut inbox = Inbox::new(Arc::new(client), &config.organization_id, config.instance_id.clone())
        .with_message_limit(config.message_limit);
    if !cli.no_cache {
        match Cache::open_default() {
            Ok(cache) => inbox = inbox.with_cache(cache),
            Err(e) => warn!("cache disabled: {e}"),
        }
    }
    let inbox = Arc::new(inbox);
    let orchestrator = SendOrchestrator::new(inbox.clone(), Arc::new(Cooldown::new(config.cooldown())));

    match cli.command {
        Commands::Conversations => {
            inbox.warm_from_cache().await;
            if let Err(e) = inbox.refresh_conversations().await {
                warn!("showing cached conversations: {e}");
            }
            let store = inbox.conversations().await;
            for c in store.list() {
                let when = c.last_message_at.map(format_timestamp).unwrap_or_default();
                let unread = if c.unread_count > 0 { format!(" ({})", c.unread_count) } else { String::new() };
                println!("{}  {}{unread}  {when}", c.id, c.title());
            }
        }
        Commands::Instances => {
            for i in inbox.backend().list_instances(&config.organization_id).await? {
                let state = if i.is_connected { "conectada" } else { "desconectada" };
                println!("{}  {}  {state}", i.id, i.display_name);
            }
        }
        Commands::Messages { conversation_id } => {
            inbox.open_conversation(&conversation_id).await?;
            for entry in inbox.message_snapshot().await.iter() {
                print_entry(entry);
            }
        }
        Commands::Send { conversation_id, text } => {
            let slot = compose_slot(&inbox, &orchestrator, &conversation_id).await?;
            slot.set_text(text).await;
            send(&orchestrator, &slot).await?;
        }
        Commands::SendImage { conversation_id, path, caption } => {
            let slot = compose_slot(&inbox, &orchestrator, &conversation_id).await?;
            slot.attach_file(MediaKind::Image, &path).await?;
            if let Some(caption) = caption {
                slot.set_text(caption).await;
            }
            send(&orchestrator, &slot).await?;
        }
        Commands::SendAudio { conversation_id, data_url_file } => {
            let data_url = tokio::fs::read_to_string(&data_url_file)
                .await
                .with_context(|| format!("reading {}", data_url_file.display()))?;
            let slot = compose_slot(&inbox, &orchestrator, &conversation_id).await?;
            slot.attach_data_url(MediaKind::Audio, &data_url).await?;
            send(&orchestrator, &slot).await?;
        }
        Commands::Watch { conversation_id } => watch(&config, inbox, conversation_id).await?,
    }
    Ok(())
}
