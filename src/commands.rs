//! Subscriber commands.
//!
//! Every entry point builds a [`CommandContext`] once; the operations below
//! never see the raw invocation.

use std::collections::HashSet;

use anyhow::Result;
use tracing::info;

use crate::football::leagues::{self, ChoiceKind};
use crate::football::models::League;
use crate::render::Locale;
use crate::service::Service;
use crate::sync::engine::SyncReport;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandContext {
    pub subscriber_id: String,
    pub language: Locale,
}

impl CommandContext {
    pub fn new(subscriber_id: impl Into<String>, language: Locale) -> Self {
        Self {
            subscriber_id: subscriber_id.into(),
            language,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Configured { channel_id: String, language: Locale },
    Added { league: League, report: SyncReport },
    Removed { league: League, report: SyncReport },
    AlreadySubscribed(League),
    NotSubscribed(League),
    UnknownLeague(String),
    /// The subscriber has not run `configure` yet.
    NotConfigured,
}

pub async fn configure(
    service: &Service,
    ctx: &CommandContext,
    channel_id: &str,
    language: Locale,
) -> Result<CommandOutcome> {
    service
        .store()
        .upsert_subscriber(&ctx.subscriber_id, channel_id, language)
        .await?;
    info!(subscriber = %ctx.subscriber_id, channel_id, language = %language, "Subscriber configured");
    Ok(CommandOutcome::Configured {
        channel_id: channel_id.to_string(),
        language,
    })
}

pub async fn add_league(
    service: &Service,
    ctx: &CommandContext,
    league_id: &str,
) -> Result<CommandOutcome> {
    let Some(league) = leagues::find(league_id) else {
        return Ok(CommandOutcome::UnknownLeague(league_id.to_string()));
    };
    let Some(subscriber) = service.store().find_subscriber(&ctx.subscriber_id).await? else {
        return Ok(CommandOutcome::NotConfigured);
    };
    if !service.store().add_league(&ctx.subscriber_id, &league).await? {
        return Ok(CommandOutcome::AlreadySubscribed(league));
    }

    let report = service.publish_league(&subscriber, &league).await;
    info!(subscriber = %ctx.subscriber_id, league = %league.id, created = report.created, "League added");
    Ok(CommandOutcome::Added { league, report })
}

pub async fn remove_league(
    service: &Service,
    ctx: &CommandContext,
    league_id: &str,
) -> Result<CommandOutcome> {
    let Some(league) = leagues::find(league_id) else {
        return Ok(CommandOutcome::UnknownLeague(league_id.to_string()));
    };
    let Some(subscriber) = service.store().find_subscriber(&ctx.subscriber_id).await? else {
        return Ok(CommandOutcome::NotConfigured);
    };
    if !subscriber.is_subscribed(&league.id) {
        return Ok(CommandOutcome::NotSubscribed(league));
    }

    let report = service.retire_league(&ctx.subscriber_id, &league.id).await?;
    service.store().remove_league(&ctx.subscriber_id, &league.id).await?;

    info!(subscriber = %ctx.subscriber_id, league = %league.id, deleted = report.deleted, "League removed");
    Ok(CommandOutcome::Removed { league, report })
}

/// Leagues offered for an add or remove command.
pub async fn league_choices(
    service: &Service,
    ctx: &CommandContext,
    kind: ChoiceKind,
) -> Result<Vec<League>> {
    let Some(subscriber) = service.store().find_subscriber(&ctx.subscriber_id).await? else {
        return Ok(Vec::new());
    };
    let subscribed: HashSet<String> = subscriber.leagues.into_iter().map(|l| l.id).collect();
    Ok(leagues::league_choices(&subscribed, kind))
}

impl CommandOutcome {
    /// Short confirmation shown to whoever ran the command.
    pub fn reply(&self, locale: Locale) -> String {
        match (self, locale) {
            (Self::Configured { channel_id, .. }, Locale::En) => {
                format!("Notifications will be posted in channel {channel_id}.")
            }
            (Self::Configured { channel_id, .. }, Locale::Fr) => {
                format!("Les notifications seront publiées dans le salon {channel_id}.")
            }
            (Self::Configured { channel_id, .. }, Locale::Es) => {
                format!("Las notificaciones se publicarán en el canal {channel_id}.")
            }
            (Self::Added { league, .. }, Locale::En) => format!("{} added.", league.display_name),
            (Self::Added { league, .. }, Locale::Fr) => format!("{} ajouté.", league.display_name),
            (Self::Added { league, .. }, Locale::Es) => format!("{} añadida.", league.display_name),
            (Self::Removed { league, .. }, Locale::En) => format!("{} removed.", league.display_name),
            (Self::Removed { league, .. }, Locale::Fr) => format!("{} supprimé.", league.display_name),
            (Self::Removed { league, .. }, Locale::Es) => format!("{} eliminada.", league.display_name),
            (Self::AlreadySubscribed(league), Locale::En) => {
                format!("{} is already followed.", league.display_name)
            }
            (Self::AlreadySubscribed(league), Locale::Fr) => {
                format!("{} est déjà suivi.", league.display_name)
            }
            (Self::AlreadySubscribed(league), Locale::Es) => {
                format!("{} ya está en seguimiento.", league.display_name)
            }
            (Self::NotSubscribed(league), Locale::En) => {
                format!("{} is not followed.", league.display_name)
            }
            (Self::NotSubscribed(league), Locale::Fr) => {
                format!("{} n'est pas suivi.", league.display_name)
            }
            (Self::NotSubscribed(league), Locale::Es) => {
                format!("{} no está en seguimiento.", league.display_name)
            }
            (Self::UnknownLeague(id), Locale::En) => format!("Unknown league id {id}."),
            (Self::UnknownLeague(id), Locale::Fr) => format!("Identifiant de championnat inconnu : {id}."),
            (Self::UnknownLeague(id), Locale::Es) => format!("Liga desconocida: {id}."),
            (Self::NotConfigured, Locale::En) => "Run configure first.".to_string(),
            (Self::NotConfigured, Locale::Fr) => "Lancez d'abord configure.".to_string(),
            (Self::NotConfigured, Locale::Es) => "Ejecute configure primero.".to_string(),
        }
    }
}
