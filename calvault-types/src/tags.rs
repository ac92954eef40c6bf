//! Tag vocabulary of the dump format.
//!
//! Shared by the dump walker (writer side) and the restore rule table
//! (reader side). The root tag carries the version stamp as attributes;
//! sections group entities of one kind; scalar fields are child tags.

/// Root of a full data dump.
pub const CALENDAR_DUMP: &str = "calendar-dump";
/// Root of a standalone alias-info dump.
pub const ALIAS_INFO: &str = "alias-info";

pub const ATTR_MAJOR: &str = "major-version";
pub const ATTR_MINOR: &str = "minor-version";
pub const ATTR_DUMPED_AT: &str = "dumped-at";

// ── Sections ─────────────────────────────────────────────────────

pub const CATEGORIES: &str = "categories";
pub const LOCATIONS: &str = "locations";
pub const CONTACTS: &str = "contacts";
pub const COLLECTIONS: &str = "collections";
pub const ALIASES: &str = "aliases";
pub const EXTERNAL_SUBS: &str = "external-subscriptions";

// ── Entities ─────────────────────────────────────────────────────

pub const CATEGORY: &str = "category";
pub const LOCATION: &str = "location";
pub const CONTACT: &str = "contact";
pub const COLLECTION: &str = "collection";
pub const EVENT: &str = "event";
pub const ALIAS: &str = "alias";
pub const EXTERNAL_SUB: &str = "external-subscription";

// ── Scalar fields ────────────────────────────────────────────────

pub const UID: &str = "uid";
pub const OWNER: &str = "owner";
pub const NAME: &str = "name";
pub const PATH: &str = "path";
pub const PUBLIC: &str = "public";
pub const PUBLIC_OWNER: &str = "public-owner";
pub const WORD: &str = "word";
pub const ADDRESS: &str = "address";
pub const KEY: &str = "key";
pub const EMAIL: &str = "email";
pub const SUMMARY: &str = "summary";
pub const START: &str = "start";
pub const END: &str = "end";
pub const RECURRENCE_ID: &str = "recurrence-id";
pub const LOCATION_KEY: &str = "location-key";
pub const LOCATION_UID: &str = "location-uid";
pub const CATEGORY_REF: &str = "category-ref";
pub const ALIAS_TARGET: &str = "alias-target";
pub const EXTERNAL_TARGET: &str = "external-target";
pub const TARGET: &str = "target";
pub const NO_ACCESS: &str = "no-access";
