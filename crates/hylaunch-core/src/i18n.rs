use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Язык сообщений об ошибках, которые видит пользователь
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Language {
    #[serde(rename = "ru")]
    #[default]
    Russian,
    #[serde(rename = "en")]
    English,
}

impl Language {
    /// Разбор кода или названия языка ("ru", "en", "english", ...)
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "ru" | "ru-ru" | "russian" | "русский" => Some(Language::Russian),
            "en" | "en-us" | "en-gb" | "english" => Some(Language::English),
            _ => None,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Language::Russian => "ru",
            Language::English => "en",
        }
    }

    /// Выбрать строку под текущий язык
    pub fn pick<'a>(&self, ru: &'a str, en: &'a str) -> &'a str {
        match self {
            Language::Russian => ru,
            Language::English => en,
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Language::parse(s).ok_or_else(|| format!("Unknown language: {}", s))
    }
}
