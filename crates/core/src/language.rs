use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::{SessionError, SessionResult, UnknownLanguageSnafu};

/// Conversation language offered by the chat front ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    English,
    Russian,
    Uzbek,
}

/// How a backend expects the `language` field to be spelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LanguageCodeStyle {
    /// `english`, `russian`, `uzbek`
    #[default]
    Name,
    /// `en`, `ru`, `uz`
    Iso,
}

impl Language {
    pub const ALL: [Language; 3] = [Language::English, Language::Russian, Language::Uzbek];

    pub fn name(&self) -> &'static str {
        match self {
            Self::English => "english",
            Self::Russian => "russian",
            Self::Uzbek => "uzbek",
        }
    }

    pub fn iso_code(&self) -> &'static str {
        match self {
            Self::English => "en",
            Self::Russian => "ru",
            Self::Uzbek => "uz",
        }
    }

    pub fn wire_code(&self, style: LanguageCodeStyle) -> &'static str {
        match style {
            LanguageCodeStyle::Name => self.name(),
            LanguageCodeStyle::Iso => self.iso_code(),
        }
    }

    pub fn locale(&self) -> &'static Locale {
        match self {
            Self::English => &ENGLISH,
            Self::Russian => &RUSSIAN,
            Self::Uzbek => &UZBEK,
        }
    }

    /// Accepts names, ISO codes and the native labels shown in the selectors.
    pub fn parse(raw: &str) -> SessionResult<Self> {
        let normalized = raw.trim().to_lowercase();
        let language = match normalized.as_str() {
            "english" | "en" => Self::English,
            "russian" | "ru" | "русский" => Self::Russian,
            "uzbek" | "uz" | "o'zbek" => Self::Uzbek,
            _ => {
                return UnknownLanguageSnafu {
                    stage: "parse-language",
                    raw: raw.to_string(),
                }
                .fail();
            }
        };
        Ok(language)
    }
}

impl fmt::Display for Language {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.locale().label)
    }
}

impl FromStr for Language {
    type Err = SessionError;

    fn from_str(raw: &str) -> SessionResult<Self> {
        Self::parse(raw)
    }
}

/// Static UI strings for one language.
#[derive(Debug)]
pub struct Locale {
    pub label: &'static str,
    pub welcome: &'static str,
    /// Second seeded message, shown under the greeting.
    pub welcome_hint: &'static str,
    pub suggested_heading: &'static str,
    pub typing: &'static str,
    /// Template; `{seconds}` is replaced by the configured timeout.
    pub error_timeout: &'static str,
    pub error_general: &'static str,
    pub error_cancelled: &'static str,
    pub no_response: &'static str,
    pub requires_translation: bool,
    pub suggestions: &'static [&'static str],
}

impl Locale {
    /// Timeout notice naming `timeout_ms` in whole or tenth seconds.
    pub fn timeout_message(&self, timeout_ms: u64) -> String {
        let seconds = if timeout_ms % 1000 == 0 {
            (timeout_ms / 1000).to_string()
        } else {
            format!("{:.1}", timeout_ms as f64 / 1000.0)
        };
        self.error_timeout.replace("{seconds}", &seconds)
    }

    pub fn suggestion_list(&self) -> Vec<String> {
        self.suggestions.iter().map(|s| s.to_string()).collect()
    }
}

static ENGLISH: Locale = Locale {
    label: "English",
    welcome: "Welcome! Ask me about infrastructure projects in Malawi.",
    welcome_hint: "Type a question below or pick one of the suggested questions.",
    suggested_heading: "Suggested questions:",
    typing: "Typing...",
    error_timeout: "Request timed out after {seconds} seconds. Please try again.",
    error_general: "Failed to get response from chatbot",
    error_cancelled: "Request cancelled.",
    no_response: "No response received",
    requires_translation: false,
    suggestions: &[
        "Show me infrastructure projects in Malawi",
        "What are the project sectors?",
        "Show projects by region",
        "List projects in Northern Region",
        "What is the status of education projects?",
    ],
};

static RUSSIAN: Locale = Locale {
    label: "Русский",
    welcome: "Добро пожаловать! Спрашивайте меня об инфраструктурных проектах в Малави.",
    welcome_hint: "Введите вопрос ниже или выберите один из предлагаемых вопросов.",
    suggested_heading: "Предлагаемые вопросы:",
    typing: "Печатает...",
    error_timeout: "Запрос не отвечен за {seconds} сек. Пожалуйста, попробуйте снова.",
    error_general: "Не удалось получить ответ от чат-бота",
    error_cancelled: "Запрос отменён.",
    no_response: "Ответ не получен",
    requires_translation: false,
    suggestions: &[
        "Покажите инфраструктурные проекты в Малави",
        "Какие есть секторы проектов?",
        "Покажите проекты по регионам",
        "Покажите проекты в Северном регионе",
        "Какой статус образовательных проектов?",
    ],
};

static UZBEK: Locale = Locale {
    label: "O'zbek",
    welcome: "Xush kelibsiz! Malavining infratuzilma loyihalari haqida so'rang.",
    welcome_hint: "Quyida savol yozing yoki tavsiya etilgan savollardan birini tanlang.",
    suggested_heading: "Tavsiya etilgan savollar:",
    typing: "Yozmoqda...",
    error_timeout: "So'rov {seconds} soniyada javob olmadi. Iltimos, qayta urinib ko'ring.",
    error_general: "Chatbotdan javob olishda xatolik yuz berdi",
    error_cancelled: "So'rov bekor qilindi.",
    no_response: "Javob olinmadi",
    requires_translation: true,
    suggestions: &[
        "Malavining infratuzilma loyihalarini ko'rsating",
        "Loyiha sektorlari qanday?",
        "Hududlar bo'yicha loyihalarni ko'rsating",
        "Shimoliy mintaqadagi loyihalarni ko'rsating",
        "Ta'lim loyihalarining holati qanday?",
    ],
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_names_codes_and_labels() {
        assert_eq!(Language::parse("English").unwrap(), Language::English);
        assert_eq!(Language::parse(" ru ").unwrap(), Language::Russian);
        assert_eq!(Language::parse("Русский").unwrap(), Language::Russian);
        assert_eq!(Language::parse("O'zbek").unwrap(), Language::Uzbek);
        assert!(Language::parse("chichewa").is_err());
    }

    #[test]
    fn wire_code_follows_style() {
        assert_eq!(Language::Uzbek.wire_code(LanguageCodeStyle::Name), "uzbek");
        assert_eq!(Language::Uzbek.wire_code(LanguageCodeStyle::Iso), "uz");
    }

    #[test]
    fn every_locale_ships_static_suggestions() {
        for language in Language::ALL {
            assert_eq!(language.locale().suggestions.len(), 5);
        }
    }

    #[test]
    fn timeout_message_names_the_configured_duration() {
        let english = Language::English.locale();
        assert_eq!(
            english.timeout_message(60_000),
            "Request timed out after 60 seconds. Please try again."
        );
        assert_eq!(
            english.timeout_message(500),
            "Request timed out after 0.5 seconds. Please try again."
        );
        for language in Language::ALL {
            assert!(!language.locale().timeout_message(1_500).contains("{seconds}"));
        }
    }
}
