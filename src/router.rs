//! Site routing and the per-site enabled flag.

use crate::config::WakewordConfig;
use crate::hermes::{HotwordToggle, InboundMessage, topics};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Where an inbound message goes.
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    /// `None` means every site
    pub site_id: Option<String>,
    /// Wakewords the message applies to
    pub wakewords: Vec<Arc<WakewordConfig>>,
    /// False if detection is switched off for the site
    pub enabled: bool,
    /// How many times the site has been disabled so far
    pub epoch: u64,
}

/// Decides which messages this service owns and tracks toggles per site.
///
/// A site is disabled while any toggle-off reason is outstanding. In
/// wildcard mode, toggles without a site id apply to every site, including
/// ones not seen yet; with an allow-list they are ignored.
///
/// Every enabled to disabled transition bumps the site's epoch. Frames are
/// tagged with the epoch they were decoded under, so detections from audio
/// heard before a toggle-off can be told apart from fresh ones.
#[derive(Debug, Clone)]
pub struct SiteRouter {
    site_ids: Vec<String>,
    wakewords: Vec<Arc<WakewordConfig>>,
    reasons: BTreeMap<String, BTreeSet<String>>,
    new_site_reasons: BTreeSet<String>,
    epochs: BTreeMap<String, u64>,
}

impl SiteRouter {
    /// An empty `site_ids` list makes the router authoritative for every site.
    pub fn new(site_ids: Vec<String>, wakewords: Vec<Arc<WakewordConfig>>) -> Self {
        Self {
            site_ids,
            wakewords,
            reasons: BTreeMap::new(),
            new_site_reasons: BTreeSet::new(),
            epochs: BTreeMap::new(),
        }
    }

    pub fn is_wildcard(&self) -> bool {
        self.site_ids.is_empty()
    }

    pub fn is_authoritative(&self, site_id: &str) -> bool {
        self.is_wildcard() || self.site_ids.iter().any(|s| s == site_id)
    }

    pub fn wakewords(&self) -> &[Arc<WakewordConfig>] {
        &self.wakewords
    }

    pub fn is_enabled(&self, site_id: &str) -> bool {
        self.reasons
            .get(site_id)
            .unwrap_or(&self.new_site_reasons)
            .is_empty()
    }

    /// Current disable epoch of the site.
    pub fn epoch(&self, site_id: &str) -> u64 {
        self.epochs.get(site_id).copied().unwrap_or(0)
    }

    /// Sites that have shown up so far, through audio or toggles.
    pub fn known_sites(&self) -> impl Iterator<Item = &str> {
        self.reasons.keys().map(String::as_str)
    }

    /// Routes a message, or returns `None` if it is not ours.
    ///
    /// Audio frames register their site so that later site-less toggles
    /// reach it.
    pub fn route(&mut self, message: &InboundMessage) -> Option<Route> {
        let site_id = message.site_id();
        if let Some(site_id) = site_id
            && !self.is_authoritative(site_id)
        {
            return None;
        }

        let wakeword_filter = match message {
            InboundMessage::AudioFrame { site_id, .. } => {
                self.site_entry(site_id);
                None
            }
            InboundMessage::ToggleOn(toggle) | InboundMessage::ToggleOff(toggle) => {
                if toggle.site_id.is_none() && !self.is_wildcard() {
                    return None;
                }
                toggle.wakeword_id.as_deref()
            }
            InboundMessage::Reload(request) => request.wakeword_id.as_deref(),
            InboundMessage::GetHotwords(_) => None,
        };

        let wakewords: Vec<_> = self
            .wakewords
            .iter()
            .filter(|w| wakeword_filter.is_none_or(|id| w.wakeword_id == id))
            .cloned()
            .collect();
        if wakewords.is_empty() {
            return None;
        }

        let enabled = site_id.is_none_or(|s| self.is_enabled(s));
        let epoch = site_id.map_or(0, |s| self.epoch(s));
        Some(Route {
            site_id: site_id.map(str::to_string),
            wakewords,
            enabled,
            epoch,
        })
    }

    /// Applies a toggle-off. Returns the sites that went from enabled to
    /// disabled.
    pub fn toggle_off(&mut self, toggle: &HotwordToggle) -> Vec<String> {
        let reason = toggle.reason.clone().unwrap_or_default();
        let changed = self.apply(toggle.site_id.as_deref(), |reasons| {
            reasons.insert(reason.clone());
        });
        for site in &changed {
            *self.epochs.entry(site.clone()).or_default() += 1;
        }
        changed
    }

    /// Applies a toggle-on. An empty reason clears every reason. Returns the
    /// sites that went from disabled to enabled.
    pub fn toggle_on(&mut self, toggle: &HotwordToggle) -> Vec<String> {
        let reason = toggle.reason.clone().unwrap_or_default();
        self.apply(toggle.site_id.as_deref(), |reasons| {
            if reason.is_empty() {
                reasons.clear();
            } else {
                reasons.remove(&reason);
            }
        })
    }

    fn apply(&mut self, site_id: Option<&str>, update: impl Fn(&mut BTreeSet<String>)) -> Vec<String> {
        let mut changed = Vec::new();
        let mut update_site = |site: &str, reasons: &mut BTreeSet<String>| {
            let was_enabled = reasons.is_empty();
            update(reasons);
            if was_enabled != reasons.is_empty() {
                changed.push(site.to_string());
            }
        };

        match site_id {
            Some(site_id) => {
                let mut reasons = self.site_entry(site_id).clone();
                update_site(site_id, &mut reasons);
                self.reasons.insert(site_id.to_string(), reasons);
            }
            None => {
                for (site, reasons) in self.reasons.iter_mut() {
                    update_site(site, reasons);
                }
                update(&mut self.new_site_reasons);
            }
        }
        changed
    }

    fn site_entry(&mut self, site_id: &str) -> &mut BTreeSet<String> {
        let defaults = &self.new_site_reasons;
        self.reasons
            .entry(site_id.to_string())
            .or_insert_with(|| defaults.clone())
    }

    /// Topics to subscribe to, audio first.
    pub fn subscriptions(&self) -> Vec<String> {
        let mut topics_list: Vec<String> = if self.is_wildcard() {
            vec![topics::AUDIO_FRAME_WILDCARD.to_string()]
        } else {
            self.site_ids.iter().map(|s| topics::audio_frame(s)).collect()
        };
        topics_list.extend(
            [
                topics::TOGGLE_ON,
                topics::TOGGLE_OFF,
                topics::RELOAD,
                topics::GET_HOTWORDS,
            ]
            .map(str::to_string),
        );
        topics_list
    }
}
