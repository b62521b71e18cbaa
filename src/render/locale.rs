use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    #[default]
    En,
    Fr,
    Es,
}

#[derive(Debug, thiserror::Error)]
#[error("unsupported language '{0}', expected one of en, fr, es")]
pub struct UnknownLocale(pub String);

impl Locale {
    pub const ALL: [Locale; 3] = [Locale::En, Locale::Fr, Locale::Es];

    pub fn tag(self) -> &'static str {
        match self {
            Self::En => "en",
            Self::Fr => "fr",
            Self::Es => "es",
        }
    }

    pub fn planning(self, league: &str) -> String {
        match self {
            Self::En => format!("Matches — {league}"),
            Self::Fr => format!("Matchs — {league}"),
            Self::Es => format!("Partidos — {league}"),
        }
    }

    pub fn standings_title(self, league: &str) -> String {
        match self {
            Self::En => format!("Standings — {league}"),
            Self::Fr => format!("Classement — {league}"),
            Self::Es => format!("Clasificación — {league}"),
        }
    }

    pub fn last_update(self) -> &'static str {
        match self {
            Self::En => "Last update",
            Self::Fr => "Dernière mise à jour",
            Self::Es => "Última actualización",
        }
    }

    pub fn kick_off(self) -> &'static str {
        match self {
            Self::En => "Kick-off",
            Self::Fr => "Coup d'envoi",
            Self::Es => "Saque inicial",
        }
    }

    pub fn finished(self) -> &'static str {
        match self {
            Self::En => "Finished",
            Self::Fr => "Terminé",
            Self::Es => "Finalizado",
        }
    }

    pub fn live(self) -> &'static str {
        match self {
            Self::En => "Live",
            Self::Fr => "En direct",
            Self::Es => "En directo",
        }
    }

    pub fn half_time(self) -> &'static str {
        match self {
            Self::En => "Half time",
            Self::Fr => "Mi-temps",
            Self::Es => "Descanso",
        }
    }

    /// Column labels for a standings row: points, played, W/D/L, goals, form.
    pub(crate) fn standings_labels(self) -> [&'static str; 5] {
        match self {
            Self::En => ["Pts", "Played", "W/D/L", "Goals", "Form"],
            Self::Fr => ["Pts", "Joués", "V/N/D", "Buts", "Forme"],
            Self::Es => ["Pts", "Jugados", "G/E/P", "Goles", "Forma"],
        }
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for Locale {
    type Err = UnknownLocale;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "en" => Ok(Self::En),
            "fr" => Ok(Self::Fr),
            "es" => Ok(Self::Es),
            _ => Err(UnknownLocale(s.to_string())),
        }
    }
}
