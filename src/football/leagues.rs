//! Static league catalog.

use std::collections::HashSet;

use crate::football::models::League;

/// Leagues that subscribers can follow, in display order.
const CATALOG: &[(&str, &str)] = &[
    ("39", "Premier League 🇬🇧"),
    ("140", "LaLiga 🇪🇸"),
    ("78", "Bundesliga 🇩🇪"),
    ("135", "Serie A 🇮🇹"),
    ("61", "Ligue 1 🇫🇷"),
    ("94", "Primeira Liga 🇵🇹"),
    ("88", "Eredivisie 🇳🇱"),
    ("2", "UEFA Champions League 🇪🇺"),
    ("3", "UEFA Europa League 🇪🇺"),
    ("848", "UEFA Europa Conference League 🇪🇺"),
];

pub fn all() -> Vec<League> {
    CATALOG
        .iter()
        .map(|(id, name)| League {
            id: (*id).to_string(),
            display_name: (*name).to_string(),
        })
        .collect()
}

pub fn find(league_id: &str) -> Option<League> {
    CATALOG
        .iter()
        .find(|(id, _)| *id == league_id)
        .map(|(id, name)| League {
            id: (*id).to_string(),
            display_name: (*name).to_string(),
        })
}

pub fn display_name(league_id: &str) -> Option<&'static str> {
    CATALOG
        .iter()
        .find(|(id, _)| *id == league_id)
        .map(|(_, name)| *name)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChoiceKind {
    Add,
    Remove,
}

/// Catalog leagues offered for adding (not yet subscribed) or removal (subscribed).
pub fn league_choices(subscribed: &HashSet<String>, kind: ChoiceKind) -> Vec<League> {
    if kind == ChoiceKind::Remove && subscribed.is_empty() {
        return Vec::new();
    }
    all()
        .into_iter()
        .filter(|league| match kind {
            ChoiceKind::Add => !subscribed.contains(&league.id),
            ChoiceKind::Remove => subscribed.contains(&league.id),
        })
        .collect()
}
