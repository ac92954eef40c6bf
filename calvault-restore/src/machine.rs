//! The rule stack machine.
//!
//! Consumes begin/text/end tag events and maintains an explicit stack of
//! partially built entities. At any end tag the stack top must match the
//! closing tag; a mismatch is a fatal schema violation. Completed top-level
//! units are handed back to the driver as [`Emit`] values.

use crate::registry::{EntityRegistry, OrphanOverride};
use crate::rules::{rule_for, EntityKind, RuleKind, SectionKind};
use crate::RestoreError;
use calvault_model::{Category, Collection, CollectionKind, Contact, Event, Location};
use calvault_types::{tags, AliasInfo, CollectionPath, OwnerId, VersionStamp};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Unknown-element policy for the pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Any unknown or misplaced tag fails the run.
    Strict,
    /// Unknown subtrees are skipped without touching the stack.
    #[default]
    Lenient,
}

/// One tag event, as produced by the streaming reader.
#[derive(Debug, Clone, Copy)]
pub(crate) enum TagEvent<'a> {
    Begin(&'a str),
    Text(&'a str),
    End(&'a str),
}

/// A completed unit handed to the driver.
#[derive(Debug)]
pub(crate) enum Emit {
    Category(Category),
    Location(Location),
    Contact(Contact),
    /// One top-level collection with all its descendants, the natural
    /// commit boundary.
    CollectionTree(CollectionNode),
    /// A section finished; the driver may close its transaction.
    SectionClosed(SectionKind),
    /// A structurally invalid entity was dropped; the run continues.
    Invalid(String),
}

/// A collection with its events and child collections.
#[derive(Debug, Default)]
pub(crate) struct CollectionNode {
    pub col: Collection,
    pub events: Vec<Event>,
    pub children: Vec<CollectionNode>,
}

/// Builder for records of the aliases/external-subscriptions sections.
#[derive(Debug, Default)]
struct AliasRec {
    owner: String,
    path: String,
    target: String,
    public_owner: bool,
    no_access: bool,
}

#[derive(Debug)]
enum Node {
    Section(SectionKind),
    Category(Category),
    Location(Location),
    Contact(Contact),
    Collection(CollectionNode),
    Event(Event),
    AliasRec(AliasRec),
    ExtSubRec(AliasRec),
    Field { tag: String, buf: String },
}

impl Node {
    /// The tag a node's end event must carry.
    fn expected_tag(&self) -> &str {
        match self {
            Node::Section(s) => s.tag(),
            Node::Category(_) => tags::CATEGORY,
            Node::Location(_) => tags::LOCATION,
            Node::Contact(_) => tags::CONTACT,
            Node::Collection(_) => tags::COLLECTION,
            Node::Event(_) => tags::EVENT,
            Node::AliasRec(_) => tags::ALIAS,
            Node::ExtSubRec(_) => tags::EXTERNAL_SUB,
            Node::Field { tag, .. } => tag,
        }
    }
}

/// The stack machine for one streaming pass.
pub(crate) struct Machine {
    mode: Mode,
    version: VersionStamp,
    lowercase_accounts: bool,
    stack: Vec<Node>,
    /// Nesting depth inside a skipped unknown subtree; zero when live.
    skip_depth: usize,
    /// Subtrees skipped under the lenient policy.
    pub skipped: u64,
    pub registry: EntityRegistry,
}

impl Machine {
    pub fn new(mode: Mode, version: VersionStamp, lowercase_accounts: bool) -> Self {
        Self {
            mode,
            version,
            lowercase_accounts,
            stack: Vec::new(),
            skip_depth: 0,
            skipped: 0,
            registry: EntityRegistry::new(),
        }
    }

    /// True when no element is open (between top-level sections).
    pub fn at_top_level(&self) -> bool {
        self.stack.is_empty() && self.skip_depth == 0
    }

    /// Feeds one tag event through the rule table.
    pub fn dispatch(&mut self, event: TagEvent<'_>) -> Result<Option<Emit>, RestoreError> {
        if self.skip_depth > 0 {
            match event {
                TagEvent::Begin(_) => self.skip_depth += 1,
                TagEvent::End(_) => self.skip_depth -= 1,
                TagEvent::Text(_) => {}
            }
            return Ok(None);
        }

        match event {
            TagEvent::Begin(tag) => self.begin(tag),
            TagEvent::Text(text) => {
                if let Some(Node::Field { buf, .. }) = self.stack.last_mut() {
                    buf.push_str(text);
                }
                Ok(None)
            }
            TagEvent::End(tag) => self.end(tag),
        }
    }

    /// Applies the unknown-element policy to a begin tag.
    fn unknown(&mut self, tag: &str, why: &str) -> Result<Option<Emit>, RestoreError> {
        match self.mode {
            Mode::Strict => Err(RestoreError::SchemaViolation(format!(
                "unexpected element <{tag}> ({why})"
            ))),
            Mode::Lenient => {
                debug!("skipping <{tag}> subtree ({why})");
                self.skip_depth = 1;
                self.skipped += 1;
                Ok(None)
            }
        }
    }

    fn begin(&mut self, tag: &str) -> Result<Option<Emit>, RestoreError> {
        let Some(rule) = rule_for(tag) else {
            return self.unknown(tag, "unknown element");
        };
        if !self.version.at_least_minor(rule.min_minor) {
            return self.unknown(tag, "not valid in this format version");
        }

        let node = match (rule.kind, self.stack.last()) {
            (RuleKind::Section(s), None) => Node::Section(s),

            (RuleKind::Entity(EntityKind::Category), Some(Node::Section(SectionKind::Categories))) => {
                Node::Category(Category::default())
            }
            (RuleKind::Entity(EntityKind::Location), Some(Node::Section(SectionKind::Locations))) => {
                Node::Location(Location::default())
            }
            (RuleKind::Entity(EntityKind::Contact), Some(Node::Section(SectionKind::Contacts))) => {
                Node::Contact(Contact::default())
            }
            (
                RuleKind::Entity(EntityKind::Collection),
                Some(Node::Section(SectionKind::Collections)) | Some(Node::Collection(_)),
            ) => Node::Collection(CollectionNode::default()),
            (RuleKind::Entity(EntityKind::Event), Some(Node::Collection(_))) => {
                Node::Event(Event::default())
            }
            (RuleKind::Entity(EntityKind::Alias), Some(Node::Section(SectionKind::Aliases))) => {
                Node::AliasRec(AliasRec::default())
            }
            (
                RuleKind::Entity(EntityKind::ExternalSub),
                Some(Node::Section(SectionKind::ExternalSubs)),
            ) => Node::ExtSubRec(AliasRec::default()),

            (RuleKind::Field, Some(parent)) if !matches!(parent, Node::Section(_) | Node::Field { .. }) => {
                Node::Field {
                    tag: tag.to_string(),
                    buf: String::new(),
                }
            }

            _ => return self.unknown(tag, "element not valid here"),
        };

        self.stack.push(node);
        Ok(None)
    }

    fn end(&mut self, tag: &str) -> Result<Option<Emit>, RestoreError> {
        let Some(top) = self.stack.pop() else {
            return Err(RestoreError::SchemaViolation(format!(
                "unexpected closing </{tag}> at top level"
            )));
        };
        if top.expected_tag() != tag {
            return Err(RestoreError::SchemaViolation(format!(
                "closing </{tag}> does not match open <{}>",
                top.expected_tag()
            )));
        }

        match top {
            Node::Field { tag, buf } => {
                self.assign_field(&tag, buf)?;
                Ok(None)
            }

            Node::Category(cat) => {
                if cat.uid.is_empty() || cat.word.is_empty() {
                    return Ok(Some(Emit::Invalid(format!(
                        "category missing uid or word (uid '{}')",
                        cat.uid
                    ))));
                }
                Ok(Some(Emit::Category(cat)))
            }

            Node::Location(loc) => {
                if loc.uid.is_empty() {
                    return Ok(Some(Emit::Invalid("location missing uid".to_string())));
                }
                Ok(Some(Emit::Location(loc)))
            }

            Node::Contact(contact) => {
                if contact.uid.is_empty() {
                    return Ok(Some(Emit::Invalid("contact missing uid".to_string())));
                }
                Ok(Some(Emit::Contact(contact)))
            }

            Node::Event(ev) => {
                if ev.uid.is_empty() {
                    return Ok(Some(Emit::Invalid("event missing uid".to_string())));
                }
                match self.stack.last_mut() {
                    Some(Node::Collection(parent)) => {
                        parent.events.push(ev);
                        Ok(None)
                    }
                    // begin() only admits events under a collection
                    _ => Err(RestoreError::SchemaViolation(
                        "event closed outside a collection".to_string(),
                    )),
                }
            }

            Node::Collection(node) => self.close_collection(node),

            Node::AliasRec(rec) => {
                let Some((target, info)) = self.alias_rec_parts(rec) else {
                    return Ok(Some(Emit::Invalid(
                        "alias record missing owner, path or target".to_string(),
                    )));
                };
                self.registry.record_alias(target, info);
                Ok(None)
            }

            Node::ExtSubRec(rec) => {
                if rec.owner.is_empty() || rec.path.is_empty() {
                    return Ok(Some(Emit::Invalid(
                        "external-subscription record missing owner or path".to_string(),
                    )));
                }
                let info = AliasInfo {
                    owner: self.owner_from(&rec.owner),
                    public_owner: rec.public_owner,
                    path: CollectionPath::new(rec.path),
                    no_access: rec.no_access,
                };
                self.registry.record_external_sub(info);
                Ok(None)
            }

            Node::Section(s) => Ok(Some(Emit::SectionClosed(s))),
        }
    }

    /// Finalizes a collection: attaches overrides to their masters, records
    /// alias/subscription info, and either hands the tree up or emits it.
    fn close_collection(&mut self, mut node: CollectionNode) -> Result<Option<Emit>, RestoreError> {
        if node.col.path.is_empty() || node.col.owner.as_str().is_empty() {
            return Ok(Some(Emit::Invalid(format!(
                "collection missing path or owner (path '{}')",
                node.col.path
            ))));
        }
        if node.col.name.is_empty() {
            node.col.name = node.col.path.name().to_string();
        }

        node.events = self.resolve_overrides(&node.col.path, std::mem::take(&mut node.events));

        self.registry.collection_seen(node.col.path.clone());
        match &node.col.kind {
            CollectionKind::Alias { target } => {
                self.registry.record_alias(
                    target.clone(),
                    AliasInfo::new(
                        node.col.owner.clone(),
                        node.col.path.clone(),
                        node.col.public,
                    ),
                );
            }
            CollectionKind::ExternalSub { .. } => {
                self.registry.record_external_sub(AliasInfo::new(
                    node.col.owner.clone(),
                    node.col.path.clone(),
                    node.col.public,
                ));
            }
            _ => {}
        }

        match self.stack.last_mut() {
            Some(Node::Collection(parent)) => {
                parent.children.push(node);
                Ok(None)
            }
            Some(Node::Section(SectionKind::Collections)) => {
                debug!("completed top-level subtree {}", node.col.path);
                Ok(Some(Emit::CollectionTree(node)))
            }
            _ => Err(RestoreError::SchemaViolation(
                "collection closed outside the collections section".to_string(),
            )),
        }
    }

    /// Attaches overrides to their masters, in either stream order. An
    /// override whose master never appeared stays standalone and is queued
    /// as unresolved.
    fn resolve_overrides(&mut self, path: &CollectionPath, events: Vec<Event>) -> Vec<Event> {
        let mut masters: Vec<Event> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut overrides: Vec<Event> = Vec::new();

        for ev in events {
            if ev.is_override() {
                overrides.push(ev);
            } else {
                index.insert(ev.uid.clone(), masters.len());
                masters.push(ev);
            }
        }

        for ov in overrides {
            match index.get(&ov.uid) {
                Some(&i) => masters[i].overrides.push(ov),
                None => {
                    warn!(
                        "override {} in {} has no master in stream",
                        ov.uid, path
                    );
                    self.registry.orphan_override(OrphanOverride {
                        collection: path.clone(),
                        uid: ov.uid.clone(),
                        recurrence_id: ov.recurrence_id.clone().unwrap_or_default(),
                    });
                    masters.push(ov);
                }
            }
        }

        masters
    }

    fn owner_from(&self, raw: &str) -> OwnerId {
        if self.lowercase_accounts {
            OwnerId::new(raw.to_lowercase())
        } else {
            OwnerId::new(raw)
        }
    }

    /// Writes a completed scalar field into the entity on top of the stack.
    /// A field the entity does not know follows the unknown-element policy
    /// (without a subtree to skip).
    fn assign_field(&mut self, tag: &str, value: String) -> Result<(), RestoreError> {
        let lowercase = self.lowercase_accounts;
        let owner_from = |raw: &str| {
            if lowercase {
                OwnerId::new(raw.to_lowercase())
            } else {
                OwnerId::new(raw)
            }
        };

        let known = match self.stack.last_mut() {
            Some(Node::Category(cat)) => match tag {
                tags::UID => {
                    cat.uid = value;
                    true
                }
                tags::OWNER => {
                    cat.owner = owner_from(&value);
                    true
                }
                tags::WORD => {
                    cat.word = value;
                    true
                }
                _ => false,
            },
            Some(Node::Location(loc)) => match tag {
                tags::UID => {
                    loc.uid = value;
                    true
                }
                tags::OWNER => {
                    loc.owner = owner_from(&value);
                    true
                }
                tags::ADDRESS => {
                    loc.address = value;
                    true
                }
                tags::KEY => {
                    loc.key = Some(value);
                    true
                }
                _ => false,
            },
            Some(Node::Contact(contact)) => match tag {
                tags::UID => {
                    contact.uid = value;
                    true
                }
                tags::OWNER => {
                    contact.owner = owner_from(&value);
                    true
                }
                tags::NAME => {
                    contact.name = value;
                    true
                }
                tags::EMAIL => {
                    contact.email = Some(value);
                    true
                }
                _ => false,
            },
            Some(Node::Collection(node)) => match tag {
                tags::PATH => {
                    node.col.path = CollectionPath::new(value);
                    true
                }
                tags::NAME => {
                    node.col.name = value;
                    true
                }
                tags::OWNER => {
                    node.col.owner = owner_from(&value);
                    true
                }
                tags::PUBLIC => {
                    node.col.public = value == "true";
                    true
                }
                tags::ALIAS_TARGET => {
                    node.col.kind = CollectionKind::Alias {
                        target: CollectionPath::new(value),
                    };
                    true
                }
                tags::EXTERNAL_TARGET => {
                    node.col.kind = CollectionKind::ExternalSub { target: value };
                    true
                }
                _ => false,
            },
            Some(Node::Event(ev)) => match tag {
                tags::UID => {
                    ev.uid = value;
                    true
                }
                tags::OWNER => {
                    ev.owner = owner_from(&value);
                    true
                }
                tags::SUMMARY => {
                    ev.summary = value;
                    true
                }
                tags::START => {
                    ev.start = value;
                    true
                }
                tags::END => {
                    ev.end = value;
                    true
                }
                tags::RECURRENCE_ID => {
                    ev.recurrence_id = Some(value);
                    true
                }
                tags::LOCATION_KEY => {
                    ev.location_key = Some(value);
                    true
                }
                tags::LOCATION_UID => {
                    ev.location_uid = Some(value);
                    true
                }
                tags::CATEGORY_REF => {
                    ev.categories.push(value);
                    true
                }
                _ => false,
            },
            Some(Node::AliasRec(rec)) | Some(Node::ExtSubRec(rec)) => match tag {
                tags::OWNER => {
                    rec.owner = value;
                    true
                }
                tags::PATH => {
                    rec.path = value;
                    true
                }
                tags::TARGET => {
                    rec.target = value;
                    true
                }
                tags::PUBLIC_OWNER => {
                    rec.public_owner = value == "true";
                    true
                }
                tags::NO_ACCESS => {
                    rec.no_access = value == "true";
                    true
                }
                _ => false,
            },
            _ => false,
        };

        if !known && self.mode == Mode::Strict {
            return Err(RestoreError::SchemaViolation(format!(
                "field <{tag}> not valid for the enclosing element"
            )));
        }
        Ok(())
    }

    fn alias_rec_parts(&self, rec: AliasRec) -> Option<(CollectionPath, AliasInfo)> {
        if rec.owner.is_empty() || rec.path.is_empty() || rec.target.is_empty() {
            return None;
        }
        let info = AliasInfo {
            owner: self.owner_from(&rec.owner),
            public_owner: rec.public_owner,
            path: CollectionPath::new(rec.path),
            no_access: rec.no_access,
        };
        Some((CollectionPath::new(rec.target), info))
    }
}
