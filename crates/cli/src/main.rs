use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use ragchat_client::{
    ChatSession, DeploymentContext, EndpointResolver, ServiceKind, SettingsStore, UseCase,
    check_services, create_transport,
};
use ragchat_core::{Language, ResponseMode};
use snafu::{ResultExt, Snafu};
use tracing_subscriber::EnvFilter;

mod render;
mod repl;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub(crate) enum CliError {
    #[snafu(display("{source}"))]
    Client {
        stage: &'static str,
        source: ragchat_client::ClientError,
    },
    #[snafu(display("{source}"))]
    Input {
        stage: &'static str,
        source: ragchat_core::SessionError,
    },
    #[snafu(display("terminal I/O failed on `{stage}`: {source}"))]
    Terminal {
        stage: &'static str,
        source: std::io::Error,
    },
}

pub(crate) type CliResult<T> = Result<T, CliError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ServiceArg {
    Pdf,
    Sql,
    Nlp,
}

impl From<ServiceArg> for ServiceKind {
    fn from(value: ServiceArg) -> Self {
        match value {
            ServiceArg::Pdf => ServiceKind::Pdf,
            ServiceArg::Sql => ServiceKind::Sql,
            ServiceArg::Nlp => ServiceKind::Nlp,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ModeArg {
    Auto,
    Single,
    Stream,
}

impl From<ModeArg> for ResponseMode {
    fn from(value: ModeArg) -> Self {
        match value {
            ModeArg::Auto => ResponseMode::Auto,
            ModeArg::Single => ResponseMode::Single,
            ModeArg::Stream => ResponseMode::Stream,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum UseCaseArg {
    Summarization,
    TopicAnalysis,
    SentimentAnalysis,
}

impl From<UseCaseArg> for UseCase {
    fn from(value: UseCaseArg) -> Self {
        match value {
            UseCaseArg::Summarization => UseCase::Summarization,
            UseCaseArg::TopicAnalysis => UseCase::TopicAnalysis,
            UseCaseArg::SentimentAnalysis => UseCase::SentimentAnalysis,
        }
    }
}

/// Terminal client for the RAG document and database assistants.
#[derive(Debug, Parser)]
#[command(name = "ragchat", version)]
struct Cli {
    /// Backend to chat with.
    #[arg(long, value_enum, default_value_t = ServiceArg::Sql)]
    service: ServiceArg,
    /// Deployment environment (development, testing, qa, production).
    #[arg(long = "env")]
    environment: Option<String>,
    /// Hostname used to pick an environment when none is named.
    #[arg(long, default_value = "localhost")]
    host: String,
    /// Base URL that bypasses environment selection.
    #[arg(long)]
    base_url: Option<String>,
    /// Settings file; defaults to the user config directory.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Conversation language (english, russian, uzbek or en/ru/uz).
    #[arg(long)]
    language: Option<String>,
    #[arg(long, value_enum)]
    mode: Option<ModeArg>,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Interactive chat (default).
    Chat,
    /// Ask one question and print the answer.
    Ask { question: Vec<String> },
    /// Probe every service's status endpoint.
    Health,
    /// Run a text analysis on the NLP service.
    Analyze {
        #[arg(value_enum)]
        use_case: UseCaseArg,
        text: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(error = %error, "ragchat failed");
            eprintln!("error: {error}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> CliResult<()> {
    let store = match &cli.config {
        Some(path) => SettingsStore::open(path.clone()),
        None => SettingsStore::load(),
    }
    .context(ClientSnafu {
        stage: "load-settings",
    })?;
    let settings = store.settings();

    let mut context = DeploymentContext::for_host(cli.host.clone());
    context.environment = cli.environment.clone();
    context.base_url = cli.base_url.clone();
    let endpoints = EndpointResolver::new(&settings)
        .resolve(&context)
        .context(ClientSnafu {
            stage: "resolve-endpoints",
        })?;

    let language = match cli.language.as_deref() {
        Some(raw) => Language::parse(raw).context(InputSnafu {
            stage: "parse-language",
        })?,
        None => settings.language,
    };

    let service = ServiceKind::from(cli.service);
    let mut config = endpoints.request_config(service);
    if let Some(mode) = cli.mode {
        config.response_mode = mode.into();
    }
    let transport = create_transport("").context(ClientSnafu {
        stage: "create-transport",
    })?;

    match cli.command.unwrap_or(Command::Chat) {
        Command::Chat => {
            let session = ChatSession::new(language, config, transport);
            repl::run(session, &endpoints, service, &settings).await
        }
        Command::Ask { question } => {
            let mut session = ChatSession::new(language, config, transport);
            let question = question.join(" ");
            session.send(&question).await.context(ClientSnafu {
                stage: "ask",
            })?;
            render::print_last_reply(session.state());
            Ok(())
        }
        Command::Health => {
            let http = ragchat_client::HttpTransport::new().context(ClientSnafu {
                stage: "health-client",
            })?;
            let report = check_services(
                http.client(),
                &endpoints,
                Duration::from_millis(settings.health_timeout_ms),
            )
            .await;
            render::print_health(&report);
            Ok(())
        }
        Command::Analyze { use_case, text } => {
            let http = ragchat_client::HttpTransport::new().context(ClientSnafu {
                stage: "analyze-client",
            })?;
            let analysis = ragchat_client::analyze(
                http.client(),
                endpoints.service(ServiceKind::Nlp),
                &text.join(" "),
                use_case.into(),
                Duration::from_millis(settings.timeout_ms),
            )
            .await
            .context(ClientSnafu { stage: "analyze" })?;
            println!("{}", analysis.result);
            Ok(())
        }
    }
}
