//! Location-repair batch job.
//!
//! Re-links events to canonical locations by their external location key.
//! Events carry the key as free text after a restore from a foreign system;
//! this job walks an ordered enumeration of event hrefs in batches, looks
//! each key up in the canonical location set, writes the location uid into
//! the event, and marks the key done so reruns skip it.
//!
//! The walk accepts a starting cursor so an interrupted run can resume
//! where it stopped.

use calvault_model::Event;
use calvault_store::{Identity, SvcFactory};
use calvault_types::{OwnerId, ProgressListener};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Prefix marking an already-relinked location key.
const DONE_PREFIX: &str = "DONE-";

/// Configuration for one repair run.
#[derive(Debug, Clone)]
pub struct RepairConfig {
    /// Event hrefs fetched per batch.
    pub batch_size: usize,
    /// Resume cursor into the ordered href enumeration.
    pub start: usize,
    /// Stop after this many events, leaving the rest for a resumed run.
    pub limit: Option<usize>,
    /// Account the repair session is opened as.
    pub admin_account: OwnerId,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            start: 0,
            limit: None,
            admin_account: OwnerId::new("admin"),
        }
    }
}

/// Tallies for one repair run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepairTallies {
    pub checked: u64,
    pub changed: u64,
    pub already_done: u64,
    pub no_loc: u64,
    pub missing_loc: u64,
    pub errors: u64,
    /// Location keys that matched no canonical location.
    pub missing_keys: BTreeSet<String>,
    /// Position in the href enumeration after this run; pass as `start`
    /// to resume.
    pub cursor: usize,
}

impl RepairTallies {
    /// Formats the tallies as report lines.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        let mut lines = vec![
            format!("      Checked: {} events", self.checked),
            format!("       errors: {}", self.errors),
            format!(" already done: {}", self.already_done),
            format!(" missing locs: {}", self.missing_loc),
            format!("       no loc: {}", self.no_loc),
            format!("      changed: {}", self.changed),
        ];
        if !self.missing_keys.is_empty() {
            lines.push("Missing locations:".to_string());
            for key in &self.missing_keys {
                lines.push(format!("    {key}"));
            }
        }
        lines
    }
}

/// Runs the repair batch. Per-event errors are tallied; only a failed
/// session open ends the run early.
pub async fn repair_locations(
    factory: Arc<dyn SvcFactory>,
    config: RepairConfig,
    listener: &dyn ProgressListener,
) -> RepairTallies {
    let mut tallies = RepairTallies {
        cursor: config.start,
        ..Default::default()
    };

    let svc = match factory
        .open_session(Identity::admin(config.admin_account.clone()))
        .await
    {
        Ok(svc) => svc,
        Err(err) => {
            error!("opening repair session: {err}");
            listener.line(&format!("Exception: {err}"));
            return tallies;
        }
    };

    // Canonical location key map. A location may carry several
    // `;`-separated keys.
    let locations = match svc.locations().await {
        Ok(locations) => locations,
        Err(err) => {
            error!("fetching locations: {err}");
            listener.line(&format!("Exception: {err}"));
            return tallies;
        }
    };
    let mut keys: HashMap<String, String> = HashMap::new();
    for loc in &locations {
        if loc.keys().next().is_none() {
            warn!("no location key for {}", loc.uid);
            continue;
        }
        for key in loc.keys() {
            if keys.contains_key(key) {
                warn!("duplicate location key {key} for {}", loc.uid);
                continue;
            }
            keys.insert(key.to_string(), loc.uid.clone());
        }
    }
    listener.line(&format!("Found {} location keys", keys.len()));

    let mut processed: u64 = 0;
    'batches: loop {
        let hrefs = match svc.event_hrefs(tallies.cursor, config.batch_size).await {
            Ok(hrefs) => hrefs,
            Err(err) => {
                tallies.errors += 1;
                error!("fetching event batch at {}: {err}", tallies.cursor);
                break;
            }
        };
        if hrefs.is_empty() {
            break;
        }

        if let Err(err) = svc.begin_transaction().await {
            tallies.errors += 1;
            error!("beginning repair transaction: {err}");
            break;
        }

        for href in hrefs {
            if let Some(limit) = config.limit {
                if processed >= limit as u64 {
                    let _ = svc.end_transaction().await;
                    break 'batches;
                }
            }
            processed += 1;
            tallies.cursor += 1;

            let event = match svc.get_event(&href).await {
                Ok(Some(event)) => event,
                Ok(None) => {
                    warn!("no event with href {href}");
                    continue;
                }
                Err(err) => {
                    tallies.errors += 1;
                    error!("fetching {href}: {err}");
                    continue;
                }
            };

            tallies.checked += 1;
            let mut event = event;
            if relink(&mut event, &keys, &mut tallies) {
                match svc.update_event(&href, event).await {
                    Ok(()) => tallies.changed += 1,
                    Err(err) => {
                        tallies.errors += 1;
                        warn!("error updating event {href}: {err}");
                    }
                }
            }
        }

        if let Err(err) = svc.end_transaction().await {
            tallies.errors += 1;
            error!("ending repair transaction: {err}");
            break;
        }

        info!("processed {} at {}", tallies.checked, tallies.cursor);
        listener.line(&format!(
            "Processed {} at {}",
            tallies.checked, tallies.cursor
        ));
    }

    tallies
}

/// Re-links one event (and its overrides) to canonical locations.
/// Returns true when the event was modified.
fn relink(event: &mut Event, keys: &HashMap<String, String>, tallies: &mut RepairTallies) -> bool {
    let mut changed = false;

    match event.location_key.clone() {
        None => tallies.no_loc += 1,
        Some(key) if key.starts_with(DONE_PREFIX) => tallies.already_done += 1,
        Some(key) => match keys.get(&key) {
            None => {
                tallies.missing_loc += 1;
                tallies.missing_keys.insert(key);
            }
            Some(uid) => {
                event.location_uid = Some(uid.clone());
                event.location_key = Some(format!("{DONE_PREFIX}{key}"));
                changed = true;
            }
        },
    }

    for ov in &mut event.overrides {
        if relink(ov, keys, tallies) {
            changed = true;
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn relink_sets_uid_and_marks_done() {
        let mut ev = Event {
            location_key: Some("MH-1".to_string()),
            ..Default::default()
        };
        let mut t = RepairTallies::default();
        assert!(relink(&mut ev, &keys(&[("MH-1", "loc-1")]), &mut t));
        assert_eq!(ev.location_uid.as_deref(), Some("loc-1"));
        assert_eq!(ev.location_key.as_deref(), Some("DONE-MH-1"));
    }

    #[test]
    fn relink_skips_done_and_counts_missing() {
        let mut done = Event {
            location_key: Some("DONE-MH-1".to_string()),
            ..Default::default()
        };
        let mut t = RepairTallies::default();
        assert!(!relink(&mut done, &keys(&[]), &mut t));
        assert_eq!(t.already_done, 1);

        let mut missing = Event {
            location_key: Some("GHOST".to_string()),
            ..Default::default()
        };
        assert!(!relink(&mut missing, &keys(&[]), &mut t));
        assert_eq!(t.missing_loc, 1);
        assert!(t.missing_keys.contains("GHOST"));
    }

    #[test]
    fn relink_descends_into_overrides() {
        let mut ev = Event {
            location_key: None,
            overrides: vec![Event {
                location_key: Some("MH-1".to_string()),
                recurrence_id: Some("20260309T090000Z".to_string()),
                ..Default::default()
            }],
            ..Default::default()
        };
        let mut t = RepairTallies::default();
        assert!(relink(&mut ev, &keys(&[("MH-1", "loc-1")]), &mut t));
        assert_eq!(ev.overrides[0].location_uid.as_deref(), Some("loc-1"));
        assert_eq!(t.no_loc, 1);
    }
}
