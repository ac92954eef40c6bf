//! The dump walker itself.

use crate::DumpResult;
use calvault_model::{Collection, CollectionKind, Event};
use calvault_store::{CalendarSvc, Identity, SvcFactory};
use calvault_types::{
    tags, AliasEntry, AliasInfo, CollectionPath, EntityCounts, OwnerId, ProgressListener,
    VersionStamp,
};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event as XmlEvent};
use quick_xml::Writer;
use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Configuration for one dump pass.
#[derive(Debug, Clone)]
pub struct DumpConfig {
    /// Fold account names to lowercase on the way out.
    pub lowercase_accounts: bool,
    /// Account the dump session is opened as.
    pub admin_account: OwnerId,
}

impl Default for DumpConfig {
    fn default() -> Self {
        Self {
            lowercase_accounts: false,
            admin_account: OwnerId::new("admin"),
        }
    }
}

/// Result of one dump (or subscription-sweep) pass.
#[derive(Debug)]
pub struct DumpOutcome {
    pub version: VersionStamp,
    pub counts: EntityCounts,
    /// Alias records grouped by target path, for the reconciler.
    pub aliases: HashMap<CollectionPath, AliasEntry>,
    /// External subscriptions, for the subscription check.
    pub external_subs: Vec<AliasInfo>,
    pub elapsed: Duration,
}

/// Dump engine: walks a live service and writes the dump format.
pub struct Dumper {
    factory: Arc<dyn SvcFactory>,
    config: DumpConfig,
}

impl Dumper {
    pub fn new(factory: Arc<dyn SvcFactory>, config: DumpConfig) -> Self {
        Self { factory, config }
    }

    /// Dumps the whole dataset to `out`.
    pub async fn dump_all<W: Write>(
        &self,
        out: W,
        listener: &dyn ProgressListener,
    ) -> DumpResult<DumpOutcome> {
        let started = Instant::now();
        let version = VersionStamp::current();
        let svc = self
            .factory
            .open_session(Identity::admin(self.config.admin_account.clone()))
            .await?;

        let mut writer = Writer::new_with_indent(out, b' ', 2);
        let mut counts = EntityCounts::default();
        let mut aliases: HashMap<CollectionPath, AliasEntry> = HashMap::new();
        let mut external_subs: Vec<AliasInfo> = Vec::new();

        write_root_start(&mut writer, tags::CALENDAR_DUMP, &version)?;

        // Simple sections, one transaction each.
        svc.begin_transaction().await?;
        element_start(&mut writer, tags::CATEGORIES)?;
        for cat in svc.categories().await? {
            counts.categories += 1;
            element_start(&mut writer, tags::CATEGORY)?;
            text_el(&mut writer, tags::UID, &cat.uid)?;
            text_el(&mut writer, tags::OWNER, &self.owner_text(&cat.owner))?;
            text_el(&mut writer, tags::WORD, &cat.word)?;
            element_end(&mut writer, tags::CATEGORY)?;
        }
        element_end(&mut writer, tags::CATEGORIES)?;
        svc.end_transaction().await?;

        svc.begin_transaction().await?;
        element_start(&mut writer, tags::LOCATIONS)?;
        for loc in svc.locations().await? {
            counts.locations += 1;
            element_start(&mut writer, tags::LOCATION)?;
            text_el(&mut writer, tags::UID, &loc.uid)?;
            text_el(&mut writer, tags::OWNER, &self.owner_text(&loc.owner))?;
            text_el(&mut writer, tags::ADDRESS, &loc.address)?;
            if let Some(key) = &loc.key {
                text_el(&mut writer, tags::KEY, key)?;
            }
            element_end(&mut writer, tags::LOCATION)?;
        }
        element_end(&mut writer, tags::LOCATIONS)?;
        svc.end_transaction().await?;

        svc.begin_transaction().await?;
        element_start(&mut writer, tags::CONTACTS)?;
        for contact in svc.contacts().await? {
            counts.contacts += 1;
            element_start(&mut writer, tags::CONTACT)?;
            text_el(&mut writer, tags::UID, &contact.uid)?;
            text_el(&mut writer, tags::OWNER, &self.owner_text(&contact.owner))?;
            text_el(&mut writer, tags::NAME, &contact.name)?;
            if let Some(email) = &contact.email {
                text_el(&mut writer, tags::EMAIL, email)?;
            }
            element_end(&mut writer, tags::CONTACT)?;
        }
        element_end(&mut writer, tags::CONTACTS)?;
        svc.end_transaction().await?;

        // Collection trees: one transaction per owner, collections written
        // flat in path order (parents precede children).
        element_start(&mut writer, tags::COLLECTIONS)?;
        for root in self.walk_roots(&svc).await? {
            svc.begin_transaction().await?;
            let mut stack = vec![root];
            while let Some(col) = stack.pop() {
                let mut children = svc.child_collections(&col.path).await?;
                // pop order: keep document order stable
                children.reverse();

                self.record_alias_info(&col, &mut aliases, &mut external_subs);
                counts.collections += 1;

                element_start(&mut writer, tags::COLLECTION)?;
                text_el(&mut writer, tags::PATH, col.path.as_str())?;
                text_el(&mut writer, tags::NAME, &col.name)?;
                text_el(&mut writer, tags::OWNER, &self.owner_text(&col.owner))?;
                if col.public {
                    text_el(&mut writer, tags::PUBLIC, "true")?;
                }
                match &col.kind {
                    CollectionKind::Alias { target } => {
                        text_el(&mut writer, tags::ALIAS_TARGET, target.as_str())?;
                    }
                    CollectionKind::ExternalSub { target } => {
                        text_el(&mut writer, tags::EXTERNAL_TARGET, target)?;
                    }
                    _ => {}
                }
                for ev in svc.events_in(&col.path).await? {
                    counts.events += 1;
                    self.write_event(&mut writer, &ev)?;
                    for ov in &ev.overrides {
                        counts.overrides += 1;
                        self.write_event(&mut writer, ov)?;
                    }
                }
                element_end(&mut writer, tags::COLLECTION)?;

                if counts.collections % 100 == 0 {
                    info!("dumped {} collections", counts.collections);
                    listener.line(&format!("Dumped {} collections", counts.collections));
                    listener.counts(&counts);
                }
                stack.extend(children);
            }
            svc.end_transaction().await?;
        }
        element_end(&mut writer, tags::COLLECTIONS)?;

        write_alias_sections(&mut writer, &aliases, &external_subs)?;
        element_end(&mut writer, tags::CALENDAR_DUMP)?;
        writer.into_inner().flush()?;

        counts.aliases = aliases.values().map(|e| e.aliases.len() as u64).sum();
        counts.external_subs = external_subs.len() as u64;
        listener.counts(&counts);

        Ok(DumpOutcome {
            version,
            counts,
            aliases,
            external_subs,
            elapsed: started.elapsed(),
        })
    }

    /// Walks the collection trees without writing anything, collecting
    /// external subscriptions (and alias info) only.
    pub async fn collect_external_subs(
        &self,
        listener: &dyn ProgressListener,
    ) -> DumpResult<DumpOutcome> {
        let started = Instant::now();
        let svc = self
            .factory
            .open_session(Identity::admin(self.config.admin_account.clone()))
            .await?;

        let mut counts = EntityCounts::default();
        let mut aliases: HashMap<CollectionPath, AliasEntry> = HashMap::new();
        let mut external_subs: Vec<AliasInfo> = Vec::new();

        svc.begin_transaction().await?;
        for root in self.walk_roots(&svc).await? {
            let mut stack = vec![root];
            while let Some(col) = stack.pop() {
                counts.collections += 1;
                self.record_alias_info(&col, &mut aliases, &mut external_subs);
                stack.extend(svc.child_collections(&col.path).await?);
            }
        }
        svc.end_transaction().await?;

        counts.aliases = aliases.values().map(|e| e.aliases.len() as u64).sum();
        counts.external_subs = external_subs.len() as u64;
        listener.line(&format!(
            "Found {} external subscriptions",
            counts.external_subs
        ));
        listener.counts(&counts);

        Ok(DumpOutcome {
            version: VersionStamp::current(),
            counts,
            aliases,
            external_subs,
            elapsed: started.elapsed(),
        })
    }

    /// Writes a standalone alias-info dump for later reloading.
    pub fn dump_alias_info<W: Write>(
        aliases: &HashMap<CollectionPath, AliasEntry>,
        external_subs: &[AliasInfo],
        out: W,
    ) -> DumpResult<()> {
        let mut writer = Writer::new_with_indent(out, b' ', 2);
        write_root_start(&mut writer, tags::ALIAS_INFO, &VersionStamp::current())?;
        write_alias_sections(&mut writer, aliases, external_subs)?;
        element_end(&mut writer, tags::ALIAS_INFO)?;
        writer.into_inner().flush()?;
        Ok(())
    }

    /// The roots of every tree worth walking: each owner's home collection
    /// (or its direct children when the home node itself is absent) plus
    /// the public tree.
    async fn walk_roots(&self, svc: &Arc<dyn CalendarSvc>) -> DumpResult<Vec<Collection>> {
        let mut roots = Vec::new();
        for owner in svc.owners().await? {
            let home = CollectionPath::user_home(&owner);
            match svc.get_collection(&home).await? {
                Some(col) => roots.push(col),
                None => roots.extend(svc.child_collections(&home).await?),
            }
        }
        let public = CollectionPath::new("/public");
        match svc.get_collection(&public).await? {
            Some(col) => roots.push(col),
            None => roots.extend(svc.child_collections(&public).await?),
        }
        debug!("walking {} collection roots", roots.len());
        Ok(roots)
    }

    fn record_alias_info(
        &self,
        col: &Collection,
        aliases: &mut HashMap<CollectionPath, AliasEntry>,
        external_subs: &mut Vec<AliasInfo>,
    ) {
        match &col.kind {
            CollectionKind::Alias { target } => {
                aliases
                    .entry(target.clone())
                    .or_insert_with(|| AliasEntry::new(target.clone()))
                    .push(AliasInfo::new(
                        col.owner.clone(),
                        col.path.clone(),
                        col.public,
                    ));
            }
            CollectionKind::ExternalSub { .. } => {
                external_subs.push(AliasInfo::new(
                    col.owner.clone(),
                    col.path.clone(),
                    col.public,
                ));
            }
            _ => {}
        }
    }

    /// Writes one event element. Overrides are written by the caller as
    /// sibling events carrying the master's uid.
    fn write_event<W: Write>(&self, writer: &mut Writer<W>, ev: &Event) -> DumpResult<()> {
        element_start(writer, tags::EVENT)?;
        text_el(writer, tags::UID, &ev.uid)?;
        text_el(writer, tags::OWNER, &self.owner_text(&ev.owner))?;
        text_el(writer, tags::SUMMARY, &ev.summary)?;
        if !ev.start.is_empty() {
            text_el(writer, tags::START, &ev.start)?;
        }
        if !ev.end.is_empty() {
            text_el(writer, tags::END, &ev.end)?;
        }
        if let Some(rid) = &ev.recurrence_id {
            text_el(writer, tags::RECURRENCE_ID, rid)?;
        }
        if let Some(key) = &ev.location_key {
            text_el(writer, tags::LOCATION_KEY, key)?;
        }
        if let Some(uid) = &ev.location_uid {
            text_el(writer, tags::LOCATION_UID, uid)?;
        }
        for cat in &ev.categories {
            text_el(writer, tags::CATEGORY_REF, cat)?;
        }
        element_end(writer, tags::EVENT)?;
        Ok(())
    }

    fn owner_text(&self, owner: &OwnerId) -> String {
        if self.config.lowercase_accounts {
            owner.to_lowercase().as_str().to_string()
        } else {
            owner.as_str().to_string()
        }
    }
}

fn write_alias_sections<W: Write>(
    writer: &mut Writer<W>,
    aliases: &HashMap<CollectionPath, AliasEntry>,
    external_subs: &[AliasInfo],
) -> DumpResult<()> {
    element_start(writer, tags::ALIASES)?;
    let mut targets: Vec<&CollectionPath> = aliases.keys().collect();
    targets.sort();
    for target in targets {
        for info in &aliases[target].aliases {
            element_start(writer, tags::ALIAS)?;
            text_el(writer, tags::OWNER, info.owner.as_str())?;
            text_el(writer, tags::PATH, info.path.as_str())?;
            text_el(writer, tags::TARGET, target.as_str())?;
            if info.public_owner {
                text_el(writer, tags::PUBLIC_OWNER, "true")?;
            }
            if info.no_access {
                text_el(writer, tags::NO_ACCESS, "true")?;
            }
            element_end(writer, tags::ALIAS)?;
        }
    }
    element_end(writer, tags::ALIASES)?;

    element_start(writer, tags::EXTERNAL_SUBS)?;
    for info in external_subs {
        element_start(writer, tags::EXTERNAL_SUB)?;
        text_el(writer, tags::OWNER, info.owner.as_str())?;
        text_el(writer, tags::PATH, info.path.as_str())?;
        if info.public_owner {
            text_el(writer, tags::PUBLIC_OWNER, "true")?;
        }
        if info.no_access {
            text_el(writer, tags::NO_ACCESS, "true")?;
        }
        element_end(writer, tags::EXTERNAL_SUB)?;
    }
    element_end(writer, tags::EXTERNAL_SUBS)?;
    Ok(())
}

fn write_root_start<W: Write>(
    writer: &mut Writer<W>,
    root: &str,
    version: &VersionStamp,
) -> DumpResult<()> {
    let mut start = BytesStart::new(root);
    start.push_attribute((tags::ATTR_MAJOR, version.major.to_string().as_str()));
    start.push_attribute((tags::ATTR_MINOR, version.minor.to_string().as_str()));
    start.push_attribute((tags::ATTR_DUMPED_AT, version.dumped_at.to_rfc3339().as_str()));
    writer.write_event(XmlEvent::Start(start))?;
    Ok(())
}

fn element_start<W: Write>(writer: &mut Writer<W>, tag: &str) -> DumpResult<()> {
    writer.write_event(XmlEvent::Start(BytesStart::new(tag)))?;
    Ok(())
}

fn element_end<W: Write>(writer: &mut Writer<W>, tag: &str) -> DumpResult<()> {
    writer.write_event(XmlEvent::End(BytesEnd::new(tag)))?;
    Ok(())
}

fn text_el<W: Write>(writer: &mut Writer<W>, tag: &str, value: &str) -> DumpResult<()> {
    writer.write_event(XmlEvent::Start(BytesStart::new(tag)))?;
    writer.write_event(XmlEvent::Text(BytesText::new(value)))?;
    writer.write_event(XmlEvent::End(BytesEnd::new(tag)))?;
    Ok(())
}
