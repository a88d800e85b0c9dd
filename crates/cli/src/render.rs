use ragchat_client::ServiceHealth;
use ragchat_core::sanitize::ALLOWED_TAGS;
use ragchat_core::{Message, Role, SessionState};

pub(crate) fn print_message(message: &Message) {
    let label = match message.role {
        Role::User => "you",
        Role::Assistant => "assistant",
        Role::System => "info",
        Role::Error => "error",
    };
    println!("[{label}] {}", terminal_text(&message.display_html()));

    for (index, source) in message.sources.iter().enumerate() {
        let mut line = format!("  {}. {}", index + 1, terminal_text(&source.display_title()));
        if let Some(location) = &source.location {
            line.push_str(&format!(" (p. {})", strip_controls(location)));
        }
        if let Some(citation) = source.display_citation() {
            line.push_str(&format!(" {}", terminal_text(&citation)));
        }
        if let Some(link) = source.link() {
            line.push_str(&format!(" <{}>", strip_controls(link)));
        }
        println!("{line}");
    }
}

pub(crate) fn print_log(state: &SessionState) {
    for message in state.messages() {
        print_message(message);
    }
    print_suggestions(state);
}

pub(crate) fn print_last_reply(state: &SessionState) {
    if let Some(message) = state.messages().last() {
        print_message(message);
    }
}

pub(crate) fn print_suggestions(state: &SessionState) {
    println!("{}", state.language().locale().suggested_heading);
    for (index, suggestion) in state.visible_suggestions().iter().enumerate() {
        println!("  /{} {}", index + 1, strip_controls(suggestion));
    }
    if state.pagination().has_more {
        println!(
            "  /more  (page {} of {})",
            state.pagination().page,
            state
                .pagination()
                .total_pages
                .map(|pages| pages.to_string())
                .unwrap_or_else(|| "?".to_string())
        );
    }
}

pub(crate) fn print_health(report: &[ServiceHealth]) {
    for entry in report {
        let status = entry
            .status
            .map(|code| code.to_string())
            .unwrap_or_else(|| "-".to_string());
        let verdict = if entry.ok { "ok" } else { "down" };
        print!(
            "{:<4} {:<5} {:>4} {:>6} ms  {}",
            entry.service, verdict, status, entry.latency_ms, entry.url
        );
        match &entry.error {
            Some(error) => println!("  ({error})"),
            None => println!(),
        }
    }
}

/// Flattens sanitized markup for a terminal: block tags become newlines,
/// other allowed tags are dropped, entities are decoded.
pub(crate) fn terminal_text(html: &str) -> String {
    let mut text = html.to_string();
    for (tag, replacement) in [
        ("<br>", "\n"),
        ("<br/>", "\n"),
        ("</p>", "\n"),
        ("<li>", "\n  - "),
    ] {
        text = text.replace(tag, replacement);
    }
    for tag in ALLOWED_TAGS {
        for form in [format!("<{tag}>"), format!("</{tag}>"), format!("<{tag}/>")] {
            text = text.replace(&form, "");
        }
    }
    let decoded = text
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");
    strip_controls(decoded.trim())
}

// Terminal escape sequences from remote text must not reach the tty.
fn strip_controls(raw: &str) -> String {
    raw.chars()
        .filter(|ch| !ch.is_control() || *ch == '\n' || *ch == '\t')
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_text_flattens_markup() {
        assert_eq!(
            terminal_text("<p>Roads</p><ul><li>North</li><li>South</li></ul>"),
            "Roads\n\n  - North\n  - South"
        );
        assert_eq!(terminal_text("a &lt;b&gt; &amp; c"), "a <b> & c");
    }

    #[test]
    fn terminal_text_drops_escape_sequences() {
        assert_eq!(terminal_text("ok\u{1b}[31mred"), "ok[31mred");
    }
}
