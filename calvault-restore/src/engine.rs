//! The restore engine driver.
//!
//! Streams a dump file exactly once through the rule stack machine, commits
//! completed top-level subtrees in batches, and produces statistics plus
//! the alias/subscription info the reconciler runs on afterwards.
//!
//! Per-entity failures are tallied and the run continues with the next
//! subtree; a malformed header, unreadable stream or rejected version
//! aborts the run.

use crate::machine::{CollectionNode, Emit, Machine, Mode, TagEvent};
use crate::rules::SectionKind;
use crate::{RestoreError, RestoreResult};
use calvault_model::{Category, Collection, Contact, Event, Location};
use calvault_store::{CalendarSvc, Identity, SvcFactory};
use calvault_types::{
    tags, AliasEntry, AliasInfo, CollectionPath, EntityCounts, OwnerId, ProgressListener,
    VersionStamp,
};
use chrono::{DateTime, Utc};
use quick_xml::events::{BytesStart, Event as XmlEvent};
use quick_xml::Reader;
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Which top-level subtrees a restore commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreScope {
    /// Everything in the stream.
    All,
    /// Only entities belonging to one owner.
    Owner(OwnerId),
}

/// Configuration for one restore pass.
#[derive(Debug, Clone)]
pub struct RestoreConfig {
    pub mode: Mode,
    /// Overwrite entities whose identifier already exists instead of
    /// failing them.
    pub merge: bool,
    /// Parse, validate and resolve everything but withhold commits.
    pub dry_run: bool,
    pub scope: RestoreScope,
    /// Fold account names to lowercase on the way in.
    pub lowercase_accounts: bool,
    /// Top-level collection subtrees per transaction.
    pub commit_batch: usize,
    /// Account the restore session is opened as.
    pub admin_account: OwnerId,
}

impl Default for RestoreConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Lenient,
            merge: false,
            dry_run: false,
            scope: RestoreScope::All,
            lowercase_accounts: false,
            commit_batch: 1,
            admin_account: OwnerId::new("admin"),
        }
    }
}

/// Result of one restore pass.
#[derive(Debug)]
pub struct RestoreOutcome {
    pub version: VersionStamp,
    pub counts: EntityCounts,
    /// Alias records grouped by target path, for the reconciler.
    pub aliases: HashMap<CollectionPath, AliasEntry>,
    /// External subscriptions, for the subscription check.
    pub external_subs: Vec<AliasInfo>,
    pub elapsed: Duration,
}

/// Restore engine: opens dump streams against a service factory.
pub struct Restorer {
    factory: Arc<dyn SvcFactory>,
    config: RestoreConfig,
}

impl Restorer {
    pub fn new(factory: Arc<dyn SvcFactory>, config: RestoreConfig) -> Self {
        Self { factory, config }
    }

    /// Opens a dump file and validates its header. The returned run streams
    /// the file exactly once; it never seeks backward.
    pub fn open(&self, path: &Path) -> RestoreResult<RestoreRun> {
        let (reader, version) = open_markup(path, tags::CALENDAR_DUMP)?;
        info!(
            "opened dump {} (format {}.{})",
            path.display(),
            version.major,
            version.minor
        );
        Ok(RestoreRun {
            reader,
            version,
            machine: Machine::new(
                self.config.mode,
                version,
                self.config.lowercase_accounts,
            ),
            committer: Committer {
                factory: self.factory.clone(),
                session: None,
                in_tx: false,
                admin: self.config.admin_account.clone(),
            },
            config: self.config.clone(),
            pending: Vec::new(),
            committed: 0,
        })
    }
}

/// One open streaming pass over a dump file.
pub struct RestoreRun {
    reader: Reader<BufReader<File>>,
    version: VersionStamp,
    machine: Machine,
    committer: Committer,
    config: RestoreConfig,
    /// Completed subtrees awaiting the next commit flush.
    pending: Vec<CollectionNode>,
    /// Entities handled so far, for periodic progress lines.
    committed: u64,
}

impl std::fmt::Debug for RestoreRun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestoreRun")
            .field("version", &self.version)
            .field("pending", &self.pending)
            .field("committed", &self.committed)
            .finish_non_exhaustive()
    }
}

impl RestoreRun {
    /// The version stamp read from the stream header.
    #[must_use]
    pub fn version(&self) -> VersionStamp {
        self.version
    }

    /// Releases the stream without completing the pass. Dropping the run
    /// has the same effect; this just makes the intent explicit.
    pub fn close(self) {}

    /// Drives the pass to the end of the stream.
    pub async fn run(mut self, listener: &dyn ProgressListener) -> RestoreResult<RestoreOutcome> {
        let started = Instant::now();

        if !self.version.is_supported() {
            match self.config.mode {
                Mode::Strict => {
                    return Err(RestoreError::UnsupportedVersion {
                        major: self.version.major,
                        minor: self.version.minor,
                    });
                }
                Mode::Lenient => {
                    warn!(
                        "dump format {}.{} is newer than this build; unknown tags will be skipped",
                        self.version.major, self.version.minor
                    );
                    listener.line(&format!(
                        "Warning: dump format {}.{} not fully understood",
                        self.version.major, self.version.minor
                    ));
                }
            }
        }

        let mut counts = EntityCounts::default();
        let mut buf = Vec::new();

        loop {
            let emit = {
                let ev = self.reader.read_event_into(&mut buf)?;
                match ev {
                    XmlEvent::Eof => break,
                    XmlEvent::Start(e) => {
                        let name = local_name(&e);
                        self.machine.dispatch(TagEvent::Begin(&name))?
                    }
                    XmlEvent::Empty(e) => {
                        let name = local_name(&e);
                        self.machine.dispatch(TagEvent::Begin(&name))?;
                        self.machine.dispatch(TagEvent::End(&name))?
                    }
                    XmlEvent::End(e) => {
                        let name =
                            String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                        if self.machine.at_top_level() && name == tags::CALENDAR_DUMP {
                            None
                        } else {
                            self.machine.dispatch(TagEvent::End(&name))?
                        }
                    }
                    XmlEvent::Text(t) => {
                        let text = t.unescape()?;
                        let trimmed = text.trim();
                        if trimmed.is_empty() {
                            None
                        } else {
                            self.machine.dispatch(TagEvent::Text(trimmed))?
                        }
                    }
                    XmlEvent::CData(t) => {
                        let text = String::from_utf8_lossy(&t).into_owned();
                        self.machine.dispatch(TagEvent::Text(&text))?
                    }
                    _ => None,
                }
            };
            buf.clear();

            if let Some(emit) = emit {
                self.handle(emit, &mut counts, listener).await?;
            }
        }

        self.flush_pending(&mut counts, listener).await?;
        self.committer.end_tx().await?;

        counts.skipped += self.machine.skipped;
        let registry = std::mem::take(&mut self.machine.registry);
        let (mut aliases, mut external_subs) = registry.finish(&mut counts, listener);

        if let RestoreScope::Owner(owner) = &self.config.scope {
            for entry in aliases.values_mut() {
                entry.aliases.retain(|a| &a.owner == owner);
            }
            aliases.retain(|_, entry| !entry.aliases.is_empty());
            external_subs.retain(|a| &a.owner == owner);
        }
        counts.aliases = aliases.values().map(|e| e.aliases.len() as u64).sum();
        counts.external_subs = external_subs.len() as u64;

        listener.counts(&counts);
        let elapsed = started.elapsed();
        info!("restore pass finished in {elapsed:.2?}");

        Ok(RestoreOutcome {
            version: self.version,
            counts,
            aliases,
            external_subs,
            elapsed,
        })
    }

    async fn handle(
        &mut self,
        emit: Emit,
        counts: &mut EntityCounts,
        listener: &dyn ProgressListener,
    ) -> RestoreResult<()> {
        match emit {
            Emit::Category(cat) => {
                self.commit_simple(Simple::Category(cat), counts, listener)
                    .await?;
            }
            Emit::Location(loc) => {
                self.commit_simple(Simple::Location(loc), counts, listener)
                    .await?;
            }
            Emit::Contact(contact) => {
                self.commit_simple(Simple::Contact(contact), counts, listener)
                    .await?;
            }
            Emit::CollectionTree(node) => {
                self.pending.push(node);
                if self.pending.len() >= self.config.commit_batch.max(1) {
                    self.flush_pending(counts, listener).await?;
                }
            }
            Emit::SectionClosed(section) => {
                if section == SectionKind::Collections {
                    self.flush_pending(counts, listener).await?;
                }
                self.committer.end_tx().await?;
            }
            Emit::Invalid(msg) => {
                counts.failures += 1;
                warn!("dropped invalid entity: {msg}");
                listener.line(&format!("Invalid entity dropped: {msg}"));
            }
        }
        Ok(())
    }

    fn in_scope(&self, owner: &OwnerId) -> bool {
        match &self.config.scope {
            RestoreScope::All => true,
            RestoreScope::Owner(scoped) => owner == scoped,
        }
    }

    /// Commits one simple (non-collection) entity inside the open section
    /// transaction.
    async fn commit_simple(
        &mut self,
        entity: Simple,
        counts: &mut EntityCounts,
        listener: &dyn ProgressListener,
    ) -> RestoreResult<()> {
        if !self.in_scope(entity.owner()) {
            counts.skipped += 1;
            return Ok(());
        }
        entity.count(counts);
        if self.config.dry_run {
            return Ok(());
        }
        let svc = self.committer.begin().await?;
        if let Err(err) = entity.put(&svc, self.config.merge).await {
            counts.failures += 1;
            warn!("entity commit failed: {err}");
            listener.line(&format!("Failed: {err}"));
        }
        self.bump_progress(counts, listener);
        Ok(())
    }

    /// Commits the pending top-level subtrees in one transaction.
    async fn flush_pending(
        &mut self,
        counts: &mut EntityCounts,
        listener: &dyn ProgressListener,
    ) -> RestoreResult<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        for node in std::mem::take(&mut self.pending) {
            self.commit_tree(node, counts, listener).await?;
        }
        if !self.config.dry_run {
            self.committer.end_tx().await?;
        }
        Ok(())
    }

    async fn commit_tree(
        &mut self,
        node: CollectionNode,
        counts: &mut EntityCounts,
        listener: &dyn ProgressListener,
    ) -> RestoreResult<()> {
        if !self.in_scope(&node.col.owner) {
            counts.skipped += 1;
            return Ok(());
        }

        let mut flat: Vec<(Collection, Vec<Event>)> = Vec::new();
        flatten_tree(node, &mut flat);

        for (_, events) in &flat {
            counts.collections += 1;
            for ev in events {
                counts.events += 1;
                counts.overrides += ev.overrides.len() as u64;
            }
        }

        if self.config.dry_run {
            return Ok(());
        }

        let svc = self.committer.begin().await?;
        for (col, events) in flat {
            let path = col.path.clone();
            if let Err(err) = svc.put_collection(col, self.config.merge).await {
                counts.failures += 1;
                warn!("collection {path} failed: {err}");
                listener.line(&format!("Failed collection {path}: {err}"));
                // children and events depend on the parent; drop the rest
                break;
            }
            for ev in events {
                let uid = ev.uid.clone();
                if let Err(err) = svc.put_event(&path, ev, self.config.merge).await {
                    counts.failures += 1;
                    warn!("event {uid} in {path} failed: {err}");
                    listener.line(&format!("Failed event {uid} in {path}: {err}"));
                }
            }
        }
        self.bump_progress(counts, listener);
        Ok(())
    }

    fn bump_progress(&mut self, counts: &EntityCounts, listener: &dyn ProgressListener) {
        self.committed += 1;
        if self.committed % 100 == 0 {
            info!("processed {} units", self.committed);
            listener.line(&format!("Processed {} units", self.committed));
            listener.counts(counts);
        }
    }
}

/// A non-collection entity on its way to the store.
enum Simple {
    Category(Category),
    Location(Location),
    Contact(Contact),
}

impl Simple {
    fn owner(&self) -> &OwnerId {
        match self {
            Self::Category(c) => &c.owner,
            Self::Location(l) => &l.owner,
            Self::Contact(c) => &c.owner,
        }
    }

    fn count(&self, counts: &mut EntityCounts) {
        match self {
            Self::Category(_) => counts.categories += 1,
            Self::Location(_) => counts.locations += 1,
            Self::Contact(_) => counts.contacts += 1,
        }
    }

    async fn put(
        self,
        svc: &Arc<dyn CalendarSvc>,
        merge: bool,
    ) -> Result<(), calvault_store::SvcError> {
        match self {
            Self::Category(c) => svc.put_category(c, merge).await,
            Self::Location(l) => svc.put_location(l, merge).await,
            Self::Contact(c) => svc.put_contact(c, merge).await,
        }
    }
}

/// Depth-first flattening: parents precede their children.
fn flatten_tree(node: CollectionNode, out: &mut Vec<(Collection, Vec<Event>)>) {
    out.push((node.col, node.events));
    for child in node.children {
        flatten_tree(child, out);
    }
}

/// Holds the restore session and its transaction state.
struct Committer {
    factory: Arc<dyn SvcFactory>,
    session: Option<Arc<dyn CalendarSvc>>,
    in_tx: bool,
    admin: OwnerId,
}

impl Committer {
    /// Opens the session lazily and makes sure a transaction is open.
    async fn begin(&mut self) -> RestoreResult<Arc<dyn CalendarSvc>> {
        let svc = match &self.session {
            Some(svc) => svc.clone(),
            None => {
                let svc = self
                    .factory
                    .open_session(Identity::admin(self.admin.clone()))
                    .await?;
                self.session = Some(svc.clone());
                svc
            }
        };
        if !self.in_tx {
            svc.begin_transaction().await?;
            self.in_tx = true;
        }
        Ok(svc)
    }

    async fn end_tx(&mut self) -> RestoreResult<()> {
        if self.in_tx {
            if let Some(svc) = &self.session {
                svc.end_transaction().await?;
            }
            self.in_tx = false;
        }
        Ok(())
    }
}

/// Standalone alias-info dump, reloaded without touching the service.
#[derive(Debug)]
pub struct AliasInfoDump {
    pub version: VersionStamp,
    pub aliases: HashMap<CollectionPath, AliasEntry>,
    pub external_subs: Vec<AliasInfo>,
}

/// Reloads a previously dumped alias-info file, so the reconciler can run
/// without a fresh dump or restore pass.
pub fn load_alias_info(path: &Path) -> RestoreResult<AliasInfoDump> {
    let (mut reader, version) = open_markup(path, tags::ALIAS_INFO)?;
    let mut machine = Machine::new(Mode::Strict, version, false);
    let mut counts = EntityCounts::default();
    let mut buf = Vec::new();

    loop {
        let ev = reader.read_event_into(&mut buf)?;
        match ev {
            XmlEvent::Eof => break,
            XmlEvent::Start(e) => {
                let name = local_name(&e);
                machine.dispatch(TagEvent::Begin(&name))?;
            }
            XmlEvent::Empty(e) => {
                let name = local_name(&e);
                machine.dispatch(TagEvent::Begin(&name))?;
                machine.dispatch(TagEvent::End(&name))?;
            }
            XmlEvent::End(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if machine.at_top_level() && name == tags::ALIAS_INFO {
                    continue;
                }
                if let Some(Emit::Invalid(msg)) = machine.dispatch(TagEvent::End(&name))? {
                    return Err(RestoreError::SchemaViolation(msg));
                }
            }
            XmlEvent::Text(t) => {
                let text = t.unescape()?;
                let trimmed = text.trim();
                if !trimmed.is_empty() {
                    machine.dispatch(TagEvent::Text(trimmed))?;
                }
            }
            _ => {}
        }
        buf.clear();
    }

    let registry = std::mem::take(&mut machine.registry);
    let (aliases, external_subs) =
        registry.finish(&mut counts, &calvault_types::NullListener);
    Ok(AliasInfoDump {
        version,
        aliases,
        external_subs,
    })
}

/// Opens a markup file and consumes its root tag, returning the reader
/// positioned after the header plus the parsed version stamp.
fn open_markup(
    path: &Path,
    expected_root: &str,
) -> RestoreResult<(Reader<BufReader<File>>, VersionStamp)> {
    let file = File::open(path)?;
    let mut reader = Reader::from_reader(BufReader::new(file));
    // the construction stack enforces tag matching itself, with a better
    // diagnostic than the reader's
    reader.config_mut().check_end_names = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            XmlEvent::Start(e) => {
                let name = local_name(&e);
                if name != expected_root {
                    return Err(RestoreError::SchemaViolation(format!(
                        "incorrect root element <{name}>, expected <{expected_root}>"
                    )));
                }
                let version = parse_header(&e)?;
                return Ok((reader, version));
            }
            XmlEvent::Eof => {
                return Err(RestoreError::SchemaViolation(
                    "stream ended before the root element".to_string(),
                ));
            }
            // prolog, comments, whitespace
            _ => {}
        }
        buf.clear();
    }
}

/// Parses the version stamp from the root tag's attributes.
fn parse_header(e: &BytesStart<'_>) -> RestoreResult<VersionStamp> {
    let mut major = None;
    let mut minor = None;
    let mut dumped_at: Option<DateTime<Utc>> = None;

    for attr in e.attributes() {
        let attr = attr.map_err(|err| {
            RestoreError::SchemaViolation(format!("bad attribute in stream header: {err}"))
        })?;
        let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
        let value = attr.unescape_value()?.into_owned();
        match key.as_str() {
            tags::ATTR_MAJOR => {
                major = Some(value.parse::<u32>().map_err(|_| {
                    RestoreError::SchemaViolation(format!("bad major version '{value}'"))
                })?);
            }
            tags::ATTR_MINOR => {
                minor = Some(value.parse::<u32>().map_err(|_| {
                    RestoreError::SchemaViolation(format!("bad minor version '{value}'"))
                })?);
            }
            tags::ATTR_DUMPED_AT => {
                dumped_at = Some(
                    DateTime::parse_from_rfc3339(&value)
                        .map_err(|_| {
                            RestoreError::SchemaViolation(format!(
                                "bad dump timestamp '{value}'"
                            ))
                        })?
                        .with_timezone(&Utc),
                );
            }
            _ => {}
        }
    }

    let major = major.ok_or_else(|| {
        RestoreError::SchemaViolation("stream header missing major-version".to_string())
    })?;
    let minor = minor.ok_or_else(|| {
        RestoreError::SchemaViolation("stream header missing minor-version".to_string())
    })?;
    Ok(VersionStamp {
        major,
        minor,
        dumped_at: dumped_at.unwrap_or_else(Utc::now),
    })
}

fn local_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.name().local_name().as_ref()).into_owned()
}
