use std::path::Path;
use std::time::Duration;

use ragchat_client::{
    ChatSession, ClientResult, ClientSettings, ErrorKind, HttpTransport, ResolvedEndpoints,
    ServiceKind, UseCase, analyze, check_services, upload_document,
};
use ragchat_core::{Language, MessageId, SessionState};
use snafu::ResultExt;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::render;
use crate::{ClientSnafu, CliResult, TerminalSnafu};

const HELP: &str = "\
commands:
  /more                 next page of the last answer
  /1 .. /9              ask a suggested question
  /lang <language>      switch language (clears the conversation)
  /upload <path>        add a pdf, docx or txt document
  /files                list uploaded documents
  /health               check every service
  /analyze <use> <text> summarization | topic_analysis | sentiment_analysis
  /quit                 leave
Ctrl-C cancels a pending answer.";

enum Input<'a> {
    Ask(String),
    More,
    Language(&'a str),
    Upload(&'a str),
    Files,
    Health,
    Analyze(&'a str, &'a str),
    Help,
    Quit,
    Unknown(&'a str),
}

fn parse_input<'a>(line: &'a str, suggestions: &[&str]) -> Option<Input<'a>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let Some(command) = line.strip_prefix('/') else {
        return Some(Input::Ask(line.to_string()));
    };

    let (name, rest) = command.split_once(' ').unwrap_or((command, ""));
    let rest = rest.trim();
    let input = match name {
        "more" => Input::More,
        "lang" => Input::Language(rest),
        "upload" => Input::Upload(rest),
        "files" => Input::Files,
        "health" => Input::Health,
        "analyze" => {
            let (use_case, text) = rest.split_once(' ').unwrap_or((rest, ""));
            Input::Analyze(use_case, text)
        }
        "help" => Input::Help,
        "quit" | "exit" => Input::Quit,
        other => match other.parse::<usize>() {
            Ok(index) if (1..=suggestions.len()).contains(&index) => {
                Input::Ask(suggestions[index - 1].to_string())
            }
            _ => Input::Unknown(other),
        },
    };
    Some(input)
}

fn parse_use_case(raw: &str) -> Option<UseCase> {
    UseCase::ALL
        .into_iter()
        .find(|use_case| use_case.as_str() == raw.trim().to_lowercase())
}

pub(crate) async fn run(
    mut session: ChatSession,
    endpoints: &ResolvedEndpoints,
    service: ServiceKind,
    settings: &ClientSettings,
) -> CliResult<()> {
    let http = HttpTransport::new().context(ClientSnafu {
        stage: "repl-http-client",
    })?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    println!("{service} @ {}", endpoints.service(service).url);
    render::print_log(session.state());

    loop {
        stdout
            .write_all(b"> ")
            .await
            .context(TerminalSnafu { stage: "prompt" })?;
        stdout.flush().await.context(TerminalSnafu { stage: "prompt" })?;

        let Some(line) = lines
            .next_line()
            .await
            .context(TerminalSnafu { stage: "read-line" })?
        else {
            return Ok(());
        };

        let suggestions: Vec<String> = session
            .state()
            .visible_suggestions()
            .into_iter()
            .map(str::to_string)
            .collect();
        let suggestion_refs: Vec<&str> = suggestions.iter().map(String::as_str).collect();
        let Some(input) = parse_input(&line, &suggestion_refs) else {
            continue;
        };

        match input {
            Input::Ask(question) => {
                let outcome = ask(&mut session, &question).await;
                report(&session, outcome.map(Some));
            }
            Input::More => {
                let outcome = match session.show_more() {
                    Ok(Some(exchange)) => {
                        println!("{}", session.language().locale().typing);
                        session
                            .drive_until(exchange, ctrl_c())
                            .await
                            .map(Some)
                    }
                    Ok(None) => {
                        println!("nothing to continue yet");
                        Ok(None)
                    }
                    Err(error) => Err(error),
                };
                report(&session, outcome);
            }
            Input::Language(raw) => match Language::parse(raw) {
                Ok(language) => {
                    session.set_language(language);
                    render::print_log(session.state());
                }
                Err(error) => println!("{error}"),
            },
            Input::Upload(raw) => {
                let path = Path::new(raw);
                match upload_document(
                    http.client(),
                    endpoints.service(service),
                    path,
                    session.state().session_id(),
                    session.language(),
                    Duration::from_millis(settings.timeout_ms),
                )
                .await
                {
                    Ok(receipt) => {
                        let added = session.record_upload(receipt.file_name.clone());
                        println!(
                            "uploaded {}{}{}",
                            receipt.file_name,
                            if added { "" } else { " (already listed)" },
                            receipt
                                .message
                                .map(|message| format!(": {message}"))
                                .unwrap_or_default()
                        );
                    }
                    Err(error) => println!("upload failed: {error}"),
                }
            }
            Input::Files => {
                for file in session.uploaded_files() {
                    println!("  {file}");
                }
            }
            Input::Health => {
                let report = check_services(
                    http.client(),
                    endpoints,
                    Duration::from_millis(settings.health_timeout_ms),
                )
                .await;
                render::print_health(&report);
            }
            Input::Analyze(raw_use_case, text) => {
                let Some(use_case) = parse_use_case(raw_use_case) else {
                    println!("unknown use case '{raw_use_case}'");
                    continue;
                };
                match analyze(
                    http.client(),
                    endpoints.service(ServiceKind::Nlp),
                    text,
                    use_case,
                    Duration::from_millis(settings.timeout_ms),
                )
                .await
                {
                    Ok(analysis) => println!("{}", analysis.result),
                    Err(error) => println!("analysis failed: {error}"),
                }
            }
            Input::Help => println!("{HELP}"),
            Input::Quit => return Ok(()),
            Input::Unknown(name) => println!("unknown command '/{name}', try /help"),
        }
    }
}

async fn ask(session: &mut ChatSession, question: &str) -> ClientResult<MessageId> {
    let exchange = session.submit(question)?;
    println!("{}", session.language().locale().typing);
    session.drive_until(exchange, ctrl_c()).await
}

async fn ctrl_c() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %error, "cannot listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

fn report(session: &ChatSession, outcome: ClientResult<Option<MessageId>>) {
    match outcome {
        Ok(Some(_)) => {
            render::print_last_reply(session.state());
            render::print_suggestions(session.state());
        }
        Ok(None) => {}
        // Validation failures leave no trace in the log.
        Err(error) if error.kind() == ErrorKind::Validation => println!("{error}"),
        Err(_) => {
            render::print_last_reply(session.state());
            if offers_retry(session.state()) {
                println!("send the question again to retry");
            }
        }
    }
}

fn offers_retry(state: &SessionState) -> bool {
    state
        .messages()
        .last()
        .and_then(|message| message.failure)
        .is_some_and(|failure| failure.is_retryable())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_lines_are_questions_and_numbers_pick_suggestions() {
        let suggestions = ["first", "second"];
        assert!(matches!(
            parse_input("  hello ", &suggestions),
            Some(Input::Ask(question)) if question == "hello"
        ));
        assert!(matches!(
            parse_input("/2", &suggestions),
            Some(Input::Ask(question)) if question == "second"
        ));
        assert!(matches!(parse_input("/3", &suggestions), Some(Input::Unknown("3"))));
        assert!(parse_input("   ", &suggestions).is_none());
    }

    #[test]
    fn commands_keep_their_arguments() {
        assert!(matches!(parse_input("/lang uz", &[]), Some(Input::Language("uz"))));
        assert!(matches!(
            parse_input("/analyze summarization Roads were built", &[]),
            Some(Input::Analyze("summarization", "Roads were built"))
        ));
        assert!(matches!(parse_input("/more", &[]), Some(Input::More)));
        assert_eq!(parse_use_case("Topic_Analysis"), Some(UseCase::TopicAnalysis));
    }

    #[test]
    fn retry_is_offered_for_timeouts_but_not_cancellations() {
        use ragchat_core::{DEFAULT_PAGE_SIZE, FailureKind, RequestKind, RequestTarget};

        let mut state = SessionState::new(Language::English, DEFAULT_PAGE_SIZE);
        assert!(!offers_retry(&state));

        for (failure, expected) in [(FailureKind::Timeout, true), (FailureKind::Cancelled, false)] {
            let target = RequestTarget::next(state.session_id());
            state.begin_request(target, RequestKind::Query).unwrap();
            state.append_pending_assistant_message(target).unwrap();
            state.fail_request(target, failure, "failed").unwrap();
            assert_eq!(offers_retry(&state), expected);
        }
    }
}
