use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use quill_config::{Config, ConfigManager};
use quill_observability::{create_session_span, LogManager};
use quill_session::{
    HistoryConfig, KeyValueStore, SessionManager, SessionManagerConfig, SketchPadConfig,
};
use quill_tool::{SketchPadTool, Tool};
use std::path::PathBuf;
use std::time::Duration;
use tracing::Instrument;

#[derive(Parser)]
#[command(name = "quill")]
#[command(about = "Inspect and maintain Quill sessions")]
#[command(version)]
struct Cli {
    /// Enable debug mode
    #[arg(long, short, default_value = "false")]
    debug: bool,

    /// Config file path
    #[arg(long, env = "QUILL_CONFIG", default_value = "~/.quill/config.json")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 会话管理命令
    Sessions(SessionsArgs),
    /// 查看或操作会话的 SketchPad
    Sketch(SketchArgs),
    /// 查看会话的对话历史
    History {
        /// 会话 id
        session_id: String,
        /// 只显示最近 N 条
        #[arg(long, short)]
        limit: Option<usize>,
    },
    /// 配置管理命令
    Config(ConfigArgs),
}

#[derive(Args, Clone)]
struct SessionsArgs {
    #[command(subcommand)]
    command: SessionsCommands,
}

#[derive(Subcommand, Clone)]
enum SessionsCommands {
    /// 列出所有会话
    List,
    /// 创建会话
    Create {
        /// 会话 id，省略时自动生成
        id: Option<String>,
    },
    /// 显示会话详情
    Show {
        id: String,
    },
    /// 删除会话及其快照
    Delete {
        id: String,
    },
    /// 清扫所有已保存会话中过期的条目
    Sweep,
}

#[derive(Args, Clone)]
struct SketchArgs {
    /// 会话 id
    session_id: String,
    #[command(subcommand)]
    command: SketchCommands,
}

#[derive(Subcommand, Clone)]
enum SketchCommands {
    /// 列出条目
    List {
        /// 同时显示条目的值
        #[arg(long, default_value = "false")]
        values: bool,
    },
    /// 获取条目的值
    Get {
        key: String,
    },
    /// 按内容搜索
    Search {
        query: String,
        #[arg(long, short, default_value = "10")]
        limit: usize,
    },
    /// 以工具调用的方式执行操作，参数为 JSON
    Exec {
        /// 例如: {"operation":"store","value":"hello","tags":"demo"}
        arguments: String,
    },
}

#[derive(Args, Clone)]
struct ConfigArgs {
    #[command(subcommand)]
    command: ConfigCommands,
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// 获取配置值
    Get {
        /// 配置键 (如: sketch_pad.max_items, session.idle_timeout_secs)
        key: String,
    },
    /// 设置配置值
    Set {
        /// 配置键 (如: sketch_pad.max_items, session.idle_timeout_secs)
        key: String,
        /// 配置值
        value: String,
    },
    /// 初始化默认配置
    Init {
        /// 强制覆盖已有配置
        #[arg(long, default_value = "false")]
        force: bool,
    },
    /// 显示当前配置
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // 展开配置文件路径
    let config_path =
        quill_config::expand_tilde(&cli.config).unwrap_or_else(|| PathBuf::from(&cli.config));

    if cli.debug {
        eprintln!("{}", "[DEBUG] Debug mode enabled".dimmed());
        eprintln!("{}", format!("[DEBUG] Config path: {:?}", config_path).dimmed());
    }

    match cli.command {
        Commands::Config(args) => handle_config(args, config_path).await,
        command => {
            let manager = ConfigManager::load(&config_path).await?;
            let config = manager.snapshot().await;
            // guard 需要存活到进程结束
            let _logging = LogManager::init(&config.logging)?;

            let sessions = SessionManager::new(session_manager_config(&config)).await?;
            let result = match command {
                Commands::Sessions(args) => handle_sessions(&sessions, args).await,
                Commands::Sketch(args) => handle_sketch(&sessions, args).await,
                Commands::History { session_id, limit } => {
                    show_history(&sessions, &session_id, limit).await
                }
                Commands::Config(_) => Ok(()),
            };

            let saved = sessions.shutdown().await;
            if cli.debug {
                eprintln!("{}", format!("[DEBUG] Saved {} session(s)", saved).dimmed());
            }
            result
        }
    }
}

/// 把文件配置映射为会话管理配置
fn session_manager_config(config: &Config) -> SessionManagerConfig {
    let summarize_timeout = Duration::from_secs(config.summarizer.timeout_secs);

    SessionManagerConfig {
        sketch_dir: PathBuf::from(&config.storage.sketch_dir),
        context_dir: PathBuf::from(&config.storage.context_dir),
        conversation_dir: PathBuf::from(&config.storage.conversation_dir),
        sketch_pad: SketchPadConfig {
            max_items: config.sketch_pad.max_items,
            auto_summarize_threshold: config.sketch_pad.auto_summarize_threshold,
            summarize_prefix_chars: config.sketch_pad.summarize_prefix_chars,
            search_prefix_chars: config.sketch_pad.search_prefix_chars,
            summarize_timeout,
        },
        history: HistoryConfig {
            max_history_length: config.history.max_history_length,
            summarize_timeout,
        },
        idle_timeout_secs: config.session.idle_timeout_secs,
        max_active_sessions: config.session.max_active_sessions,
        auto_save_interval_secs: config.session.auto_save_interval_secs,
        cleanup_interval_secs: config.session.cleanup_interval_secs,
        sweep_interval_secs: config.session.sweep_interval_secs,
    }
}

fn fail(message: impl std::fmt::Display) -> ! {
    eprintln!("{}", format!("❌ {}", message).red());
    std::process::exit(1);
}

async fn handle_sessions(manager: &SessionManager, args: SessionsArgs) -> anyhow::Result<()> {
    match args.command {
        SessionsCommands::List => {
            let sessions = manager.list_sessions().await?;
            if sessions.is_empty() {
                println!("{}", "No sessions found".dimmed());
                return Ok(());
            }

            println!("{}", format!("📋 Sessions ({}):", sessions.len()).cyan().bold());
            for info in sessions {
                let created = info
                    .created_at
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| "-".to_string());
                let state = if info.active { "active".green() } else { "saved".dimmed() };
                println!(
                    "  {} [{}] created {} | {} items | {} messages",
                    info.id.bold(),
                    state,
                    created,
                    info.sketch_items,
                    info.messages
                );
            }
        }
        SessionsCommands::Create { id } => {
            let session = match manager.create_session(id.as_deref()).await {
                Ok(session) => session,
                Err(e) => fail(format!("Failed to create session: {}", e)),
            };
            println!("{}", format!("✅ Session ready: {}", session.id()).green());
        }
        SessionsCommands::Show { id } => {
            let Some(session) = manager.get_session(&id).await? else {
                fail(format!("Session not found: {}", id));
            };

            let span = create_session_span(session.id());
            async {
                let stats = session.sketch_pad().statistics().await;
                let metadata = session.history().metadata().await;

                println!("{}", format!("📋 Session {}", session.id()).cyan().bold());
                println!("  created:       {}", session.created_at().format("%Y-%m-%d %H:%M:%S"));
                println!("  sketch items:  {}/{}", stats.total_items, stats.max_items);
                println!("  accesses:      {}", stats.total_accesses);
                println!("  messages:      {}", metadata.total_messages);
                println!("  compactions:   {}", metadata.compactions);
                if !stats.popular_tags.is_empty() {
                    let tags: Vec<String> = stats
                        .popular_tags
                        .iter()
                        .map(|(tag, n)| format!("{} ({})", tag, n))
                        .collect();
                    println!("  tags:          {}", tags.join(", "));
                }
                if stats.degraded {
                    println!("{}", "⚠️  SketchPad is running on a fallback tier".yellow());
                }
            }
            .instrument(span)
            .await;
        }
        SessionsCommands::Delete { id } => {
            if manager.delete_session(&id).await? {
                println!("{}", format!("✅ Deleted session {}", id).green());
            } else {
                println!("{}", format!("⚠️  Session not found: {}", id).yellow());
            }
        }
        SessionsCommands::Sweep => {
            for info in manager.list_sessions().await? {
                if manager.get_session(&info.id).await?.is_none() {
                    println!("{}", format!("⚠️  Skipped incomplete session {}", info.id).yellow());
                }
            }
            let removed = manager.sweep_expired().await;
            println!("{}", format!("✅ Removed {} expired item(s)", removed).green());
        }
    }
    Ok(())
}

async fn handle_sketch(manager: &SessionManager, args: SketchArgs) -> anyhow::Result<()> {
    let Some(session) = manager.get_session(&args.session_id).await? else {
        fail(format!("Session not found: {}", args.session_id));
    };
    let pad = session.sketch_pad();
    let span = create_session_span(session.id());

    match args.command {
        SketchCommands::List { values } => {
            let items = pad.list_items(values).instrument(span).await;
            if items.is_empty() {
                println!("{}", "SketchPad is empty".dimmed());
                return Ok(());
            }

            println!("{}", format!("📋 SketchPad ({} items):", items.len()).cyan().bold());
            for item in items {
                let tags: Vec<&str> = item.tags.iter().map(String::as_str).collect();
                println!(
                    "  {} [{}] {}",
                    item.key.bold(),
                    item.content_type.as_str(),
                    tags.join(",").dimmed()
                );
                if let Some(summary) = &item.summary {
                    println!("    {}", summary);
                }
                if let Some(value) = &item.value {
                    println!("    {}", serde_json::to_string(value)?);
                }
            }
        }
        SketchCommands::Get { key } => match pad.get_value(&key).instrument(span).await {
            Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
            None => fail(format!("Key not found: {}", key)),
        },
        SketchCommands::Search { query, limit } => {
            let found = pad.search_by_content(&query, limit).instrument(span).await;
            println!("{}", format!("🔍 {} match(es) for '{}'", found.len(), query).cyan().bold());
            for (key, item) in found {
                let shown = item
                    .summary
                    .clone()
                    .unwrap_or_else(|| quill_session::item::stringify(&item.value));
                println!("  {}: {}", key.bold(), quill_session::item::char_prefix(&shown, 80));
            }
        }
        SketchCommands::Exec { arguments } => {
            let tool = SketchPadTool::new();
            let output = session
                .enter(async move { tool.execute(&arguments).await })
                .await?;
            println!("{}", output);
        }
    }
    Ok(())
}

async fn show_history(
    manager: &SessionManager,
    session_id: &str,
    limit: Option<usize>,
) -> anyhow::Result<()> {
    let Some(session) = manager.get_session(session_id).await? else {
        fail(format!("Session not found: {}", session_id));
    };
    let history = session.history();

    let span = create_session_span(session.id());
    let (summary, messages) = async {
        (history.get_summary().await, history.retrieve_messages(limit).await)
    }
    .instrument(span)
    .await;

    if let Some(summary) = summary {
        println!("{}", "📝 Summary:".cyan().bold());
        println!("{}", summary);
        println!();
    }

    if messages.is_empty() {
        println!("{}", "No messages".dimmed());
        return Ok(());
    }

    println!("{}", format!("💬 Messages ({}):", messages.len()).cyan().bold());
    for message in messages {
        let role = format!("[{}]", message.role);
        let body = if message.has_tool_calls() {
            let calls: Vec<String> = message
                .tool_calls
                .iter()
                .flatten()
                .map(|call| format!("{}({})", call.function.name, call.function.arguments))
                .collect();
            format!("calls {}", calls.join(", "))
        } else {
            message.text_content()
        };
        println!("{} {}", role.yellow(), body);
    }
    Ok(())
}

async fn handle_config(args: ConfigArgs, config_path: PathBuf) -> anyhow::Result<()> {
    match args.command {
        ConfigCommands::Get { key } => {
            let manager = ConfigManager::load(&config_path).await?;
            let config = manager.snapshot().await;

            match config.get_value(&key) {
                Some(value) => {
                    println!("{}", format!("{} = {}", key, value).green());
                }
                None => fail(format!("Key not found: {}", key)),
            }
        }
        ConfigCommands::Set { key, value } => {
            let manager = ConfigManager::load(&config_path).await?;

            if let Err(e) = manager.set_value(&key, &value).await {
                fail(format!("Failed to set value: {}", e));
            }
            println!("{}", format!("✅ Set {} = {}", key, value).green());
        }
        ConfigCommands::Init { force } => {
            if config_path.exists() && !force {
                println!("{}", format!("⚠️  Config already exists at {:?}", config_path).yellow());
                println!("{}", "Use --force to overwrite".dimmed());
                return Ok(());
            }

            let default_config = Config::default();
            // 初始化目录
            quill_config::init_quill_dirs(&default_config).await?;

            let manager = ConfigManager::new(default_config, config_path.clone());
            manager.save().await?;

            println!("{}", format!("✅ Config initialized at {:?}", config_path).green());
            println!("{}", "You can edit this file to customize your settings".dimmed());
        }
        ConfigCommands::Show => {
            let manager = ConfigManager::load(&config_path).await?;
            let config = manager.snapshot().await;

            println!("{}", "📋 Current Configuration:".cyan().bold());
            println!();

            // 显示为 JSON
            let json = serde_json::to_string_pretty(&config)?;
            println!("{}", json);
        }
    }
    Ok(())
}
