//! The tag rule table.
//!
//! Every tag in the dump vocabulary maps to one rule: a section opener, an
//! entity constructor, or a scalar field. Rules carry the minor version
//! that introduced them; a tag outside the stream's version range is
//! treated as an unknown element and follows the strict/lenient policy.

use calvault_types::tags;

/// Entity-kind sections of the dump stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SectionKind {
    Categories,
    Locations,
    Contacts,
    Collections,
    Aliases,
    ExternalSubs,
}

impl SectionKind {
    pub(crate) fn tag(self) -> &'static str {
        match self {
            Self::Categories => tags::CATEGORIES,
            Self::Locations => tags::LOCATIONS,
            Self::Contacts => tags::CONTACTS,
            Self::Collections => tags::COLLECTIONS,
            Self::Aliases => tags::ALIASES,
            Self::ExternalSubs => tags::EXTERNAL_SUBS,
        }
    }
}

/// Leaf entity tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EntityKind {
    Category,
    Location,
    Contact,
    Collection,
    Event,
    Alias,
    ExternalSub,
}

/// What a tag means to the stack machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RuleKind {
    Section(SectionKind),
    Entity(EntityKind),
    Field,
}

/// One entry of the rule table.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Rule {
    pub kind: RuleKind,
    /// Minimum stream minor version this tag is valid in.
    pub min_minor: u32,
}

const fn rule(kind: RuleKind) -> Rule {
    Rule { kind, min_minor: 0 }
}

const fn rule_since(kind: RuleKind, min_minor: u32) -> Rule {
    Rule { kind, min_minor }
}

/// Looks a tag up in the rule table. `None` means unknown element.
pub(crate) fn rule_for(tag: &str) -> Option<Rule> {
    use EntityKind as E;
    use RuleKind as R;
    use SectionKind as S;

    let r = match tag {
        tags::CATEGORIES => rule(R::Section(S::Categories)),
        tags::LOCATIONS => rule(R::Section(S::Locations)),
        tags::CONTACTS => rule(R::Section(S::Contacts)),
        tags::COLLECTIONS => rule(R::Section(S::Collections)),
        // The alias sections were added in format 1.1.
        tags::ALIASES => rule_since(R::Section(S::Aliases), 1),
        tags::EXTERNAL_SUBS => rule_since(R::Section(S::ExternalSubs), 1),

        tags::CATEGORY => rule(R::Entity(E::Category)),
        tags::LOCATION => rule(R::Entity(E::Location)),
        tags::CONTACT => rule(R::Entity(E::Contact)),
        tags::COLLECTION => rule(R::Entity(E::Collection)),
        tags::EVENT => rule(R::Entity(E::Event)),
        tags::ALIAS => rule_since(R::Entity(E::Alias), 1),
        tags::EXTERNAL_SUB => rule_since(R::Entity(E::ExternalSub), 1),

        tags::UID
        | tags::OWNER
        | tags::NAME
        | tags::PATH
        | tags::PUBLIC
        | tags::PUBLIC_OWNER
        | tags::WORD
        | tags::ADDRESS
        | tags::KEY
        | tags::EMAIL
        | tags::SUMMARY
        | tags::START
        | tags::END
        | tags::RECURRENCE_ID
        | tags::LOCATION_KEY
        | tags::LOCATION_UID
        | tags::CATEGORY_REF
        | tags::ALIAS_TARGET
        | tags::EXTERNAL_TARGET
        | tags::TARGET
        | tags::NO_ACCESS => rule(R::Field),

        _ => return None,
    };
    Some(r)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_tag_has_no_rule() {
        assert!(rule_for("no-such-tag").is_none());
    }

    #[test]
    fn alias_section_requires_minor_one() {
        let r = rule_for(tags::ALIASES).unwrap();
        assert_eq!(r.min_minor, 1);
        let r = rule_for(tags::COLLECTIONS).unwrap();
        assert_eq!(r.min_minor, 0);
    }
}
